use rand::Rng;
use std::time::Duration;

use crate::config::ElectionConfig;

/// Draws a duration uniformly from `[min_ms, max_ms)`.
///
/// A degenerate or inverted range yields `min_ms`.
pub fn random_timeout(min_ms: u64, max_ms: u64) -> Duration {
    if max_ms <= min_ms {
        return Duration::from_millis(min_ms);
    }
    let mut rng = rand::thread_rng();
    Duration::from_millis(rng.gen_range(min_ms..max_ms))
}

/// How long a pending node waits for a heartbeat before it takes over.
pub fn election_timeout(config: &ElectionConfig) -> Duration {
    random_timeout(
        config.election_timeout_min_ms,
        config.election_timeout_max_ms,
    )
}

/// Heartbeat period, drawn once per tenure.
pub fn heartbeat_interval(config: &ElectionConfig) -> Duration {
    random_timeout(
        config.heartbeat_interval_min_ms,
        config.heartbeat_interval_max_ms,
    )
}
