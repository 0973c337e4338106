use pool_core::{DeltaSnapshot, MetricKind, PoolMetricSnapshot};

/// Compare `current` against the stored baseline, one delta per metric.
///
/// A metric yields a delta only when both readings are present. The first
/// observation of a pool (`previous == None`) yields nothing.
pub fn compute_deltas(
    previous: Option<&PoolMetricSnapshot>,
    current: &PoolMetricSnapshot,
) -> Vec<DeltaSnapshot> {
    let Some(previous) = previous else {
        return Vec::new();
    };

    MetricKind::ALL
        .iter()
        .filter_map(|&kind| {
            let before = previous.metric(kind)?;
            let after = current.metric(kind)?;
            Some(metric_delta(kind, before, after, current))
        })
        .collect()
}

fn metric_delta(
    kind: MetricKind,
    previous: f64,
    current: f64,
    snapshot: &PoolMetricSnapshot,
) -> DeltaSnapshot {
    let absolute_change = current - previous;
    let percent_change = if previous != 0.0 {
        Some(absolute_change / previous * 100.0)
    } else {
        None
    };

    DeltaSnapshot {
        protocol_id: snapshot.protocol_id.clone(),
        pool_id: snapshot.pool_id.clone(),
        metric: kind,
        previous,
        current,
        absolute_change,
        percent_change,
        timestamp: snapshot.timestamp,
        block_number: snapshot.block_number,
    }
}
