use async_trait::async_trait;

use crate::{AdapterError, ChainError, FetchContext, PoolConfig, PoolMetricSnapshot};

/// Protocol ids and chain ids an adapter declares it can serve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterSupport {
    pub protocol_ids: Vec<String>,
    pub chains: Vec<u64>,
}

impl AdapterSupport {
    pub fn new(protocol_ids: &[&str], chains: &[u64]) -> Self {
        Self {
            protocol_ids: protocol_ids.iter().map(|id| id.to_string()).collect(),
            chains: chains.to_vec(),
        }
    }

    pub fn supports_chain(&self, chain_id: u64) -> bool {
        self.chains.contains(&chain_id)
    }
}

/// Pluggable data source producing one metrics snapshot per configured pool
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Stable adapter identifier, e.g. `aave-v3`
    fn id(&self) -> &str;

    fn supports(&self) -> &AdapterSupport;

    /// `Ok(None)` means the adapter had nothing to report for this pool.
    async fn fetch_latest_metrics(
        &self,
        pool: &PoolConfig,
        context: &FetchContext,
    ) -> Result<Option<PoolMetricSnapshot>, AdapterError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub timestamp_secs: u64,
}

/// Read-only chain access handed to adapters. Implemented outside this workspace.
///
/// Integer readings are returned in their raw on-chain units.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// The block at `number`, or the latest block when `None`.
    async fn block(&self, number: Option<u64>) -> Result<BlockHeader, ChainError>;

    /// `currentLiquidityRate` of the reserve for `asset`, in ray (1e27).
    async fn aave_liquidity_rate(
        &self,
        pool_contract: &str,
        asset: &str,
        block: u64,
    ) -> Result<u128, ChainError>;

    async fn erc20_total_supply(&self, token: &str, block: u64) -> Result<u128, ChainError>;

    async fn erc20_decimals(&self, token: &str, block: u64) -> Result<u8, ChainError>;

    async fn oracle_asset_price(
        &self,
        oracle: &str,
        asset: &str,
        block: u64,
    ) -> Result<u128, ChainError>;
}
