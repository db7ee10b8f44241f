//! Engine configuration and validation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AcdError, Result};
use crate::fifo::DispatchMode;

/// Configuration for a [`DistributionManager`](crate::DistributionManager).
///
/// All durations are plain `std::time::Duration` values; the defaults match
/// the behavior of a stock deployment: a freed agent rests for 30 seconds
/// before new work is offered, queued calls wait up to an hour, and offers
/// ring an agent for 20 seconds before counting as unanswered.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use callq_engine::AcdConfig;
///
/// let mut config = AcdConfig::default();
/// config.agent_lag = Duration::from_secs(10);
/// config.validate().expect("valid configuration");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcdConfig {
    /// Debounce applied before a just-freed agent is offered new work.
    pub agent_lag: Duration,

    /// Per-attempt grace period: how long a single offer may ring before
    /// it counts as unanswered and the call re-enters the queue.
    pub offer_grace: Duration,

    /// Default maximum time a call waits in a queue before it is evicted
    /// as unanswered. Overridable per call in
    /// [`QueueOptions`](crate::QueueOptions).
    pub default_timeout: Duration,

    /// Default call priority, 1-10, lower is serviced first.
    pub default_priority: u8,

    /// Dispatch mode applied when `queue()` has to create the fifo and no
    /// mode was requested.
    pub default_mode: DispatchMode,

    /// Capacity of the event bus subscription and the internal command
    /// channel.
    pub channel_capacity: usize,
}

impl Default for AcdConfig {
    fn default() -> Self {
        Self {
            agent_lag: Duration::from_millis(30_000),
            offer_grace: Duration::from_secs(20),
            default_timeout: Duration::from_secs(3600),
            default_priority: 5,
            default_mode: DispatchMode::RingAll,
            channel_capacity: 256,
        }
    }
}

impl AcdConfig {
    /// Validate the configuration.
    ///
    /// Checks the priority range and that no duration or capacity is zero.
    pub fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.default_priority) {
            return Err(AcdError::configuration(format!(
                "default_priority must be 1-10, got {}",
                self.default_priority
            )));
        }
        if self.offer_grace.is_zero() {
            return Err(AcdError::configuration("offer_grace must be non-zero"));
        }
        if self.default_timeout.is_zero() {
            return Err(AcdError::configuration("default_timeout must be non-zero"));
        }
        if self.channel_capacity == 0 {
            return Err(AcdError::configuration("channel_capacity must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AcdConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent_lag, Duration::from_millis(30_000));
        assert_eq!(config.default_timeout, Duration::from_secs(3600));
        assert_eq!(config.default_priority, 5);
    }

    #[test]
    fn rejects_out_of_range_priority() {
        let mut config = AcdConfig::default();
        config.default_priority = 0;
        assert!(matches!(config.validate(), Err(AcdError::Configuration(_))));
        config.default_priority = 11;
        assert!(matches!(config.validate(), Err(AcdError::Configuration(_))));
    }

    #[test]
    fn rejects_zero_durations() {
        let mut config = AcdConfig::default();
        config.offer_grace = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn serde_round_trip() {
        let config = AcdConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: AcdConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.default_priority, config.default_priority);
        assert_eq!(back.agent_lag, config.agent_lag);
    }
}
