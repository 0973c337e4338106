use async_trait::async_trait;
use pool_core::{
    AdapterError, AdapterSupport, FetchContext, PoolConfig, PoolMetricSnapshot, ProtocolAdapter,
};
use serde_json::{json, Value};

pub const ADAPTER_ID: &str = "curve";

/// Placeholder for Curve pools. Emits snapshots without metrics, so it never
/// produces deltas or alerts.
pub struct CurveAdapter {
    support: AdapterSupport,
}

impl CurveAdapter {
    pub fn new() -> Self {
        Self {
            support: AdapterSupport::new(&[ADAPTER_ID], &[1, 10, 137, 42161, 8453]),
        }
    }
}

impl Default for CurveAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolAdapter for CurveAdapter {
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
        // TODO: read virtual price and gauge APY through the Curve registry once a ChainClient method exists for it.
        tracing::warn!(
            pool_id = %pool.id,
            chain_id = pool.chain_id,
            "Curve metrics are not implemented; returning an empty snapshot"
        );

        let raw = json!({ "note": "Placeholder payload. Replace with live Curve metrics." });
        Ok(Some(PoolMetricSnapshot {
            protocol_id: pool.protocol_id.clone(),
            pool_id: pool.id.clone(),
            chain_id: pool.chain_id,
            address: pool.address.clone(),
            block_number: None,
            timestamp: context.timestamp,
            apy: None,
            tvl: None,
            raw: match raw {
                Value::Object(map) => Some(map),
                _ => None,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_metricless_snapshot() {
        let pool = PoolConfig {
            id: "3pool".to_string(),
            protocol_id: "curve".to_string(),
            chain_id: 1,
            address: "0xbEbc44782C7dB0a1A60Cb6fe97d0b483032FF1C7".to_string(),
            metadata: None,
        };
        let context = FetchContext {
            timestamp: 99,
            block_tag: None,
        };
        let snapshot = CurveAdapter::new()
            .fetch_latest_metrics(&pool, &context)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.apy, None);
        assert_eq!(snapshot.tvl, None);
        assert_eq!(snapshot.timestamp, 99);
        assert!(snapshot.raw.unwrap().contains_key("note"));
    }
}
