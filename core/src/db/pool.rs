//! Pool sizing and saturation monitoring.
//!
//! When auto-tuning is enabled the pool size is derived from the host's
//! available parallelism rather than a fixed operator-supplied number,
//! mirroring how the rest of the ingestion pipeline scales its worker pool
//! off the same signal.

use std::time::Duration;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Multiplier applied to CPU core count to derive `max_connections` when
/// auto-tuning is enabled.
const CORES_TO_CONNECTIONS_FACTOR: u32 = 5;
/// Fraction of `max_connections` kept as `min_connections` (idle floor).
const IDLE_FRACTION: f64 = 0.4;

#[derive(Debug, Clone, Copy)]
pub struct PoolSizing {
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Resolve pool sizing. With auto-tuning, `max_connections` scales off
/// `std::thread::available_parallelism`; otherwise the operator-supplied
/// `configured_max`/`configured_min` are used verbatim.
#[must_use]
pub fn resolve_sizing(auto_tuning: bool, configured_max: u32, configured_min: u32) -> PoolSizing {
    if !auto_tuning {
        return PoolSizing { max_connections: configured_max, min_connections: configured_min };
    }

    let cores = std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(1) as u32;
    let max_connections = cores.saturating_mul(CORES_TO_CONNECTIONS_FACTOR).max(1);
    let min_connections = ((f64::from(max_connections)) * IDLE_FRACTION).round() as u32;
    info!(cores, max_connections, min_connections, "pool auto-tuned");
    PoolSizing { max_connections, min_connections }
}

/// Periodically log pool saturation (`size` vs. `num_idle`) until `cancel`
/// fires. `saturation_threshold` is the in-use/size ratio (0.0-1.0) above
/// which utilization is logged at `warn` instead of `info`.
pub async fn monitor(pool: SqlitePool, interval: Duration, saturation_threshold: f64, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let size = pool.size();
                let idle = pool.num_idle();
                let in_use = size as usize - idle;
                let ratio = if size > 0 { in_use as f64 / f64::from(size) } else { 0.0 };
                if ratio >= saturation_threshold && size > 0 {
                    warn!(size, idle, in_use, ratio, threshold = saturation_threshold, "connection pool saturation above threshold");
                } else {
                    info!(size, idle, in_use, ratio, "connection pool utilization");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_auto_tuning_uses_configured_value() {
        let sizing = resolve_sizing(false, 10, 2);
        assert_eq!(sizing.max_connections, 10);
        assert_eq!(sizing.min_connections, 2);
    }

    #[test]
    fn auto_tuning_scales_with_cores() {
        let sizing = resolve_sizing(true, 10, 2);
        assert!(sizing.max_connections >= CORES_TO_CONNECTIONS_FACTOR);
        assert!(sizing.min_connections <= sizing.max_connections);
    }
}
