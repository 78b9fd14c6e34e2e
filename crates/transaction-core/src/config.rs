use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::timer::TimerSettings;

/// Transaction layer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    pub timers: TimerSettings,

    /// Answer `100 Trying` when the TU has not responded to an INVITE within
    /// Timer 100
    pub send_trying: bool,

    /// How long a terminated transaction stays in the table to absorb late
    /// retransmissions
    #[serde(with = "duration_ms", rename = "transaction_linger_ms")]
    pub transaction_linger: Duration,

    /// Capacity of the event channel handed to the TU
    pub event_channel_capacity: usize,

    /// Capacity of each transaction's command queue
    pub command_channel_capacity: usize,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            timers: TimerSettings::default(),
            send_trying: true,
            transaction_linger: Duration::from_secs(32),
            event_channel_capacity: 256,
            command_channel_capacity: 32,
        }
    }
}

impl TransactionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timers(mut self, timers: TimerSettings) -> Self {
        self.timers = timers;
        self
    }

    pub fn with_send_trying(mut self, enabled: bool) -> Self {
        self.send_trying = enabled;
        self
    }

    pub fn with_transaction_linger(mut self, linger: Duration) -> Self {
        self.transaction_linger = linger;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Checks the values that would make the state machines misbehave
    pub fn validate(&self) -> Result<(), String> {
        if self.timers.t1.is_zero() {
            return Err("T1 must be greater than zero".to_string());
        }
        if self.timers.t2 < self.timers.t1 {
            return Err("T2 must not be smaller than T1".to_string());
        }
        if self.event_channel_capacity == 0 || self.command_channel_capacity == 0 {
            return Err("channel capacities must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Serializes a [`Duration`] as whole milliseconds
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TransactionConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.send_trying);
        assert_eq!(config.timers.t1, Duration::from_millis(500));
    }

    #[test]
    fn test_validate_rejects_small_t2() {
        let mut timers = TimerSettings::default();
        timers.t2 = Duration::from_millis(100);
        let config = TransactionConfig::new().with_timers(timers);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_in_milliseconds() {
        let config: TransactionConfig = toml::from_str(
            r#"
            send_trying = false
            transaction_linger_ms = 1000

            [timers]
            t1_ms = 250
            "#,
        )
        .unwrap();
        assert!(!config.send_trying);
        assert_eq!(config.transaction_linger, Duration::from_secs(1));
        assert_eq!(config.timers.t1, Duration::from_millis(250));
        assert_eq!(config.timers.t2, Duration::from_secs(4));
    }
}
