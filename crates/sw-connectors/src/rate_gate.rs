//! Per-source throttle gate.
//!
//! When a provider signals throttling, the gate suppresses further calls to
//! it until a cooldown expires. Expiry is evaluated lazily on every check
//! against the caller-supplied time, so no timer outlives a session.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use sw_observability::metrics::ADAPTER_THROTTLES_TOTAL;
use tracing::{debug, info};

/// Default cooldown after a throttle signal: 7 days.
pub const DEFAULT_THROTTLE_COOLDOWN_MS: i64 = 604_800_000;

/// Returns the default throttle cooldown.
pub fn default_cooldown() -> Duration {
    Duration::milliseconds(DEFAULT_THROTTLE_COOLDOWN_MS)
}

/// Shared throttle state, one entry per source name.
///
/// The gate is shared across concurrent discovery sessions; each update
/// happens under the write lock so `blocked_until` is never torn.
#[derive(Debug, Default)]
pub struct RateGate {
    blocked_until: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl RateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while `now` has not passed the source's `blocked_until`.
    ///
    /// Expired entries are removed on the way out.
    pub fn is_blocked(&self, source: &str, now: DateTime<Utc>) -> bool {
        {
            let state = self.blocked_until.read().unwrap_or_else(|e| e.into_inner());
            match state.get(source) {
                None => return false,
                Some(until) if now <= *until => return true,
                Some(_) => {}
            }
        }

        let mut state = self.blocked_until.write().unwrap_or_else(|e| e.into_inner());
        // Re-check: another session may have recorded a fresh throttle in between.
        match state.get(source) {
            Some(until) if now <= *until => true,
            Some(_) => {
                state.remove(source);
                debug!(source = source, "Rate gate cooldown expired");
                false
            }
            None => false,
        }
    }

    /// Records a throttle signal for `source` at `now`.
    ///
    /// A later expiry never gets shortened by an earlier one.
    pub fn record_throttle(&self, source: &str, now: DateTime<Utc>, cooldown: Duration) {
        let until = now + cooldown;
        let mut state = self.blocked_until.write().unwrap_or_else(|e| e.into_inner());
        let entry = state.entry(source.to_string()).or_insert(until);
        if until > *entry {
            *entry = until;
        }
        metrics::counter!(ADAPTER_THROTTLES_TOTAL, "source" => source.to_string()).increment(1);
        info!(
            source = source,
            blocked_until = %*entry,
            "Source throttled, suppressing calls until cooldown expires"
        );
    }

    /// Lifts the gate for a source. Returns true if it was set.
    pub fn clear(&self, source: &str) -> bool {
        self.blocked_until
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(source)
            .is_some()
    }

    /// Returns the expiry for a source if it is still blocked at `now`.
    pub fn blocked_until(&self, source: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let state = self.blocked_until.read().unwrap_or_else(|e| e.into_inner());
        state.get(source).copied().filter(|until| now <= *until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_unknown_source_is_not_blocked() {
        let gate = RateGate::new();
        assert!(!gate.is_blocked("shodan", Utc::now()));
    }

    #[test]
    fn test_seven_day_cooldown() {
        let gate = RateGate::new();
        let now = Utc::now();
        gate.record_throttle("shodan", now, default_cooldown());

        assert!(gate.is_blocked("shodan", now + Duration::hours(1)));
        assert!(!gate.is_blocked("shodan", now + Duration::days(8)));
        // Lazily cleared.
        assert!(gate.blocked_until("shodan", now).is_none());
    }

    #[test]
    fn test_default_cooldown_is_seven_days() {
        assert_eq!(default_cooldown(), Duration::days(7));
    }

    #[test]
    fn test_gate_is_per_source() {
        let gate = RateGate::new();
        let now = Utc::now();
        gate.record_throttle("shodan", now, Duration::minutes(5));
        assert!(gate.is_blocked("shodan", now));
        assert!(!gate.is_blocked("censys", now));
    }

    #[test]
    fn test_shorter_cooldown_does_not_shorten_block() {
        let gate = RateGate::new();
        let now = Utc::now();
        gate.record_throttle("otx", now, Duration::days(7));
        gate.record_throttle("otx", now, Duration::minutes(1));
        assert!(gate.is_blocked("otx", now + Duration::days(1)));
    }

    #[test]
    fn test_clear() {
        let gate = RateGate::new();
        let now = Utc::now();
        gate.record_throttle("otx", now, Duration::days(1));
        assert!(gate.clear("otx"));
        assert!(!gate.is_blocked("otx", now));
        assert!(!gate.clear("otx"));
    }

    #[test]
    fn test_concurrent_updates() {
        let gate = Arc::new(RateGate::new());
        let now = Utc::now();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let gate = gate.clone();
                std::thread::spawn(move || {
                    gate.record_throttle("shodan", now, Duration::minutes(i + 1));
                    gate.is_blocked("shodan", now)
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(
            gate.blocked_until("shodan", now),
            Some(now + Duration::minutes(8))
        );
    }
}
