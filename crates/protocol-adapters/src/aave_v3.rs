//! Aave V3 lending reserves.
//!
//! APY comes from the reserve's current liquidity rate (ray), TVL from the aToken
//! supply priced through the Aave oracle.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pool_core::{
    AdapterError, AdapterSupport, ChainClient, ChainError, FetchContext, PoolConfig,
    PoolMetricSnapshot, ProtocolAdapter,
};
use serde::Deserialize;
use serde_json::{json, Value};

pub const ADAPTER_ID: &str = "aave-v3";
const PROTOCOL_IDS: [&str; 2] = ["aave-v3", "aave"];
const CHAINS: [u64; 5] = [1, 10, 137, 8453, 42161];
const DEFAULT_ORACLE_DECIMALS: u8 = 8;
const RAY_DECIMALS: u8 = 27;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetadata {
    pool_contract: Option<String>,
    price_oracle: Option<String>,
    a_token_address: Option<String>,
    underlying_asset: Option<String>,
    asset_decimals: Option<u8>,
    oracle_decimals: Option<u8>,
}

/// Resolved per-pool contract addresses
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReserveMetadata {
    pool_contract: String,
    price_oracle: String,
    a_token: String,
    underlying_asset: String,
    asset_decimals: Option<u8>,
    oracle_decimals: u8,
}

impl ReserveMetadata {
    fn parse(pool: &PoolConfig) -> Result<Self, AdapterError> {
        let invalid = |reason: String| AdapterError::InvalidMetadata {
            pool_id: pool.id.clone(),
            reason,
        };

        let object = Value::Object(pool.metadata.clone().unwrap_or_default());
        let raw: RawMetadata =
            serde_json::from_value(object).map_err(|e| invalid(e.to_string()))?;

        let pool_contract = raw
            .pool_contract
            .ok_or_else(|| invalid("poolContract missing in metadata".to_string()))?;
        let price_oracle = raw
            .price_oracle
            .ok_or_else(|| invalid("priceOracle missing in metadata".to_string()))?;

        Ok(Self {
            pool_contract,
            price_oracle,
            a_token: raw.a_token_address.unwrap_or_else(|| pool.address.clone()),
            underlying_asset: raw.underlying_asset.unwrap_or_else(|| pool.address.clone()),
            asset_decimals: raw.asset_decimals,
            oracle_decimals: raw.oracle_decimals.unwrap_or(DEFAULT_ORACLE_DECIMALS),
        })
    }
}

pub struct AaveV3Adapter {
    support: AdapterSupport,
    clients: HashMap<u64, Arc<dyn ChainClient>>,
}

impl AaveV3Adapter {
    pub fn new() -> Self {
        Self {
            support: AdapterSupport::new(&PROTOCOL_IDS, &CHAINS),
            clients: HashMap::new(),
        }
    }

    /// Attach the chain client used for pools on `chain_id`.
    pub fn with_client(mut self, chain_id: u64, client: Arc<dyn ChainClient>) -> Self {
        self.clients.insert(chain_id, client);
        self
    }

    fn client_for(&self, chain_id: u64) -> Result<&Arc<dyn ChainClient>, AdapterError> {
        if !self.support.supports_chain(chain_id) {
            return Err(AdapterError::UnsupportedChain {
                adapter: ADAPTER_ID.to_string(),
                chain_id,
            });
        }
        self.clients
            .get(&chain_id)
            .ok_or_else(|| AdapterError::Other(format!("no chain client configured for chain {}", chain_id)))
    }
}

impl Default for AaveV3Adapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Scale a raw integer reading down by `decimals`, `None` when not representable.
fn normalize(raw: u128, decimals: u8) -> Option<f64> {
    let value = raw as f64 / 10f64.powi(i32::from(decimals));
    value.is_finite().then_some(value)
}

#[async_trait]
impl ProtocolAdapter for AaveV3Adapter {
    fn id(&self) -> &str {
        ADAPTER_ID
    }

    fn supports(&self) -> &AdapterSupport {
        &self.support
    }

    async fn fetch_latest_metrics(
        &self,
        pool: &PoolConfig,
        context: &FetchContext,
    ) -> Result<Option<PoolMetricSnapshot>, AdapterError> {
        let metadata = ReserveMetadata::parse(pool)?;
        let client = self.client_for(pool.chain_id)?;

        let block = client.block(context.block_tag).await?;
        let at = block.number;

        let decimals = async {
            match metadata.asset_decimals {
                Some(decimals) => Ok::<u8, ChainError>(decimals),
                None => client.erc20_decimals(&metadata.underlying_asset, at).await,
            }
        };

        let (liquidity_rate, total_supply, asset_decimals, asset_price) = tokio::try_join!(
            client.aave_liquidity_rate(&metadata.pool_contract, &metadata.underlying_asset, at),
            client.erc20_total_supply(&metadata.a_token, at),
            decimals,
            client.oracle_asset_price(&metadata.price_oracle, &metadata.underlying_asset, at),
        )?;

        let apy = normalize(liquidity_rate, RAY_DECIMALS).map(|rate| rate * 100.0);
        let tvl = match (
            normalize(total_supply, asset_decimals),
            normalize(asset_price, metadata.oracle_decimals),
        ) {
            (Some(supply), Some(price)) => Some(supply * price).filter(|v| v.is_finite()),
            _ => None,
        };

        tracing::debug!(
            pool_id = %pool.id,
            chain_id = pool.chain_id,
            block = at,
            ?apy,
            ?tvl,
            "Fetched Aave reserve"
        );

        let raw = json!({
            "liquidityRateRay": liquidity_rate.to_string(),
            "totalSupply": total_supply.to_string(),
            "assetDecimals": asset_decimals,
            "price": asset_price.to_string(),
            "oracleDecimals": metadata.oracle_decimals,
        });

        Ok(Some(PoolMetricSnapshot {
            protocol_id: pool.protocol_id.clone(),
            pool_id: pool.id.clone(),
            chain_id: pool.chain_id,
            address: metadata.underlying_asset,
            block_number: Some(at),
            timestamp: context.timestamp,
            apy,
            tvl,
            raw: raw.as_object().cloned(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pool_core::BlockHeader;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const POOL_CONTRACT: &str = "0xA238Dd80C259a72e81d7e4664a9801593F98d1c5";
    const ORACLE: &str = "0x2Cc0Fc26eD4563A5ce5e8bdcfe1A2878676Ae156";
    const USDC: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";

    #[derive(Default)]
    struct FixedChain {
        decimals_calls: AtomicUsize,
    }

    #[async_trait]
    impl ChainClient for FixedChain {
        async fn block(&self, number: Option<u64>) -> Result<BlockHeader, ChainError> {
            Ok(BlockHeader {
                number: number.unwrap_or(20_000_000),
                timestamp_secs: 1_700_000_000,
            })
        }

        async fn aave_liquidity_rate(&self, _: &str, _: &str, _: u64) -> Result<u128, ChainError> {
            // 5% in ray
            Ok(50_000_000_000_000_000_000_000_000)
        }

        async fn erc20_total_supply(&self, _: &str, _: u64) -> Result<u128, ChainError> {
            Ok(2_000_000 * 1_000_000)
        }

        async fn erc20_decimals(&self, _: &str, _: u64) -> Result<u8, ChainError> {
            self.decimals_calls.fetch_add(1, Ordering::SeqCst);
            Ok(6)
        }

        async fn oracle_asset_price(&self, _: &str, _: &str, _: u64) -> Result<u128, ChainError> {
            Ok(99_990_000)
        }
    }

    struct BrokenChain;

    #[async_trait]
    impl ChainClient for BrokenChain {
        async fn block(&self, _: Option<u64>) -> Result<BlockHeader, ChainError> {
            Err(ChainError::Rpc("connection refused".to_string()))
        }

        async fn aave_liquidity_rate(&self, _: &str, _: &str, _: u64) -> Result<u128, ChainError> {
            unreachable!()
        }

        async fn erc20_total_supply(&self, _: &str, _: u64) -> Result<u128, ChainError> {
            unreachable!()
        }

        async fn erc20_decimals(&self, _: &str, _: u64) -> Result<u8, ChainError> {
            unreachable!()
        }

        async fn oracle_asset_price(&self, _: &str, _: &str, _: u64) -> Result<u128, ChainError> {
            unreachable!()
        }
    }

    fn pool(chain_id: u64, metadata: Value) -> PoolConfig {
        PoolConfig {
            id: "usdc".to_string(),
            protocol_id: "aave-v3".to_string(),
            chain_id,
            address: USDC.to_string(),
            metadata: metadata.as_object().cloned(),
        }
    }

    fn context() -> FetchContext {
        FetchContext {
            timestamp: 1_700_000_000_500,
            block_tag: None,
        }
    }

    #[tokio::test]
    async fn reads_apy_and_tvl() {
        let chain = Arc::new(FixedChain::default());
        let adapter = AaveV3Adapter::new().with_client(8453, chain.clone());
        let pool = pool(8453, json!({ "poolContract": POOL_CONTRACT, "priceOracle": ORACLE }));

        let snapshot = adapter
            .fetch_latest_metrics(&pool, &context())
            .await
            .unwrap()
            .unwrap();

        assert!((snapshot.apy.unwrap() - 5.0).abs() < 1e-9);
        assert!((snapshot.tvl.unwrap() - 1_999_800.0).abs() < 1e-6);
        assert_eq!(snapshot.block_number, Some(20_000_000));
        assert_eq!(snapshot.timestamp, 1_700_000_000_500);
        assert_eq!(snapshot.address, USDC);
        let raw = snapshot.raw.unwrap();
        assert_eq!(raw["totalSupply"], "2000000000000");
        assert_eq!(raw["oracleDecimals"], 8);
        assert_eq!(chain.decimals_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn configured_decimals_skip_the_chain_read() {
        let chain = Arc::new(FixedChain::default());
        let adapter = AaveV3Adapter::new().with_client(1, chain.clone());
        let pool = pool(
            1,
            json!({
                "poolContract": POOL_CONTRACT,
                "priceOracle": ORACLE,
                "assetDecimals": 6,
                "oracleDecimals": 8
            }),
        );
        let ctx = FetchContext {
            timestamp: 1,
            block_tag: Some(19_000_000),
        };

        let snapshot = adapter.fetch_latest_metrics(&pool, &ctx).await.unwrap().unwrap();
        assert_eq!(snapshot.block_number, Some(19_000_000));
        assert_eq!(chain.decimals_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_metadata_is_rejected() {
        let adapter = AaveV3Adapter::new().with_client(1, Arc::new(FixedChain::default()));
        let err = adapter
            .fetch_latest_metrics(&pool(1, json!({ "poolContract": POOL_CONTRACT })), &context())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidMetadata { .. }));
        assert!(err.to_string().contains("priceOracle"));
    }

    #[tokio::test]
    async fn unsupported_chain_is_rejected() {
        let adapter = AaveV3Adapter::new();
        let err = adapter
            .fetch_latest_metrics(
                &pool(56, json!({ "poolContract": POOL_CONTRACT, "priceOracle": ORACLE })),
                &context(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AdapterError::UnsupportedChain {
                adapter: "aave-v3".to_string(),
                chain_id: 56
            }
        );
    }

    #[tokio::test]
    async fn chain_failures_surface_as_adapter_errors() {
        let adapter = AaveV3Adapter::new().with_client(10, Arc::new(BrokenChain));
        let err = adapter
            .fetch_latest_metrics(
                &pool(10, json!({ "poolContract": POOL_CONTRACT, "priceOracle": ORACLE })),
                &context(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Chain(ChainError::Rpc(_))));
    }
}
