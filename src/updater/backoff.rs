//! Delay between retries of a failed watch.

use crate::updater::UpdaterConfig;
use std::time::Duration;

/// `retry_base_delay_ms` plus a uniform draw from `[0, retry_jitter_ms]`.
pub(crate) fn retry_delay(config: &UpdaterConfig) -> Duration {
    let jitter = if config.retry_jitter_ms > 0 {
        fastrand::u64(0..=config.retry_jitter_ms)
    } else {
        0
    };
    Duration::from_millis(config.retry_base_delay_ms.saturating_add(jitter))
}
