//! Timeouts and long-running negotiation deadlines
//!
//! Defaults follow the ISO 15118-2 time restrictions. Every value can be
//! overridden from configuration.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::messages::MessageKind;

/// Immutable timing table shared by both roles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingPolicy {
    /// Per-kind overrides of the built-in response timeouts (ms)
    #[serde(default)]
    pub message_timeouts: HashMap<MessageKind, u64>,

    /// SECC wait for the next request (ms)
    #[serde(default = "default_sequence_timeout_ms")]
    pub sequence_timeout_ms: u64,

    /// EVCC budget from connect to SessionSetupRes (ms)
    #[serde(default = "default_communication_setup_timeout_ms")]
    pub communication_setup_timeout_ms: u64,

    /// Authorization / charge parameter discovery ongoing budget (ms)
    #[serde(default = "default_ongoing_timeout_ms")]
    pub ongoing_timeout_ms: u64,

    #[serde(default = "default_cable_check_max_ms")]
    pub cable_check_max_ms: u64,

    #[serde(default = "default_pre_charge_max_ms")]
    pub pre_charge_max_ms: u64,
}

fn default_sequence_timeout_ms() -> u64 {
    60_000
}

fn default_communication_setup_timeout_ms() -> u64 {
    20_000
}

fn default_ongoing_timeout_ms() -> u64 {
    60_000
}

fn default_cable_check_max_ms() -> u64 {
    38_000
}

fn default_pre_charge_max_ms() -> u64 {
    7_000
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            message_timeouts: HashMap::new(),
            sequence_timeout_ms: default_sequence_timeout_ms(),
            communication_setup_timeout_ms: default_communication_setup_timeout_ms(),
            ongoing_timeout_ms: default_ongoing_timeout_ms(),
            cable_check_max_ms: default_cable_check_max_ms(),
            pre_charge_max_ms: default_pre_charge_max_ms(),
        }
    }
}

impl TimingPolicy {
    /// Built-in EVCC wait for a response of `kind`
    pub fn default_timeout_ms(kind: MessageKind) -> u64 {
        match kind {
            MessageKind::PowerDeliveryRes => 5_000,
            MessageKind::CurrentDemandRes => 250,
            _ => 2_000,
        }
    }

    /// How long to wait for a message of `kind`
    pub fn timeout_for(&self, kind: MessageKind) -> Duration {
        let ms = self
            .message_timeouts
            .get(&kind)
            .copied()
            .unwrap_or_else(|| Self::default_timeout_ms(kind));
        Duration::from_millis(ms)
    }

    pub fn sequence_timeout(&self) -> Duration {
        Duration::from_millis(self.sequence_timeout_ms)
    }

    pub fn communication_setup_timeout(&self) -> Duration {
        Duration::from_millis(self.communication_setup_timeout_ms)
    }

    pub fn ongoing_timeout(&self) -> Duration {
        Duration::from_millis(self.ongoing_timeout_ms)
    }

    pub fn cable_check_max(&self) -> Duration {
        Duration::from_millis(self.cable_check_max_ms)
    }

    pub fn pre_charge_max(&self) -> Duration {
        Duration::from_millis(self.pre_charge_max_ms)
    }
}

/// Start time of a negotiation that spans several round trips
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OngoingTimer {
    started: Option<Instant>,
}

impl OngoingTimer {
    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    /// Start as of `at`; lets callers back-date the phase
    pub fn start_at(&mut self, at: Instant) {
        self.started = Some(at);
    }

    pub fn clear(&mut self) {
        self.started = None;
    }

    pub fn is_active(&self) -> bool {
        self.started.is_some()
    }

    /// Time since start, zero when inactive
    pub fn elapsed(&self) -> Duration {
        self.started.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Budget left before `max` runs out, `None` once exceeded
    pub fn remaining(&self, max: Duration) -> Option<Duration> {
        max.checked_sub(self.elapsed()).filter(|d| !d.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let policy = TimingPolicy::default();
        assert_eq!(
            policy.timeout_for(MessageKind::PowerDeliveryRes),
            Duration::from_millis(5000)
        );
        assert_eq!(
            policy.timeout_for(MessageKind::CurrentDemandRes),
            Duration::from_millis(250)
        );
        assert_eq!(
            policy.timeout_for(MessageKind::CableCheckRes),
            Duration::from_millis(2000)
        );
        assert_eq!(policy.cable_check_max(), Duration::from_secs(38));
        assert_eq!(policy.pre_charge_max(), Duration::from_secs(7));
    }

    #[test]
    fn test_override_from_json() {
        let policy: TimingPolicy = serde_json::from_str(
            r#"{"message_timeouts": {"PreChargeRes": 900}, "pre_charge_max_ms": 3000}"#,
        )
        .unwrap();
        assert_eq!(
            policy.timeout_for(MessageKind::PreChargeRes),
            Duration::from_millis(900)
        );
        assert_eq!(policy.pre_charge_max_ms, 3000);
        assert_eq!(policy.sequence_timeout_ms, 60_000);
    }

    #[test]
    fn test_ongoing_timer() {
        let mut timer = OngoingTimer::default();
        assert!(!timer.is_active());
        assert_eq!(timer.elapsed(), Duration::ZERO);

        timer.start_at(Instant::now() - Duration::from_secs(5));
        assert!(timer.is_active());
        let left = timer.remaining(Duration::from_secs(7)).unwrap();
        assert!(left <= Duration::from_secs(2));
        assert!(timer.remaining(Duration::from_secs(4)).is_none());

        timer.clear();
        assert!(!timer.is_active());
    }
}
