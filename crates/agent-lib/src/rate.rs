//! Rate computation between two successive snapshots
//!
//! CPU counters are cumulative nanoseconds and become a fraction of one CPU
//! (delta / elapsed nanoseconds). Virtual-LAN interface counters become
//! per-second rates. A rate is only refreshed when the counter grew; a
//! counter that stayed flat or went backwards (container restart) leaves the
//! previous rate untouched. Memory counters are never rated.

use crate::models::{metric, Rates, Snapshot};
use std::time::Duration;

/// Suffix appended to a network counter name to form its rate name
pub const NETWORK_RATE_SUFFIX: &str = ".rate";

/// Rate name of a CPU counter
pub fn cpu_rate_name(counter: &str) -> String {
    format!("{}_rate", counter)
}

/// Converts counter deltas into time-normalized rates
#[derive(Debug, Clone)]
pub struct RateEngine {
    vlan_prefix: String,
}

impl RateEngine {
    pub fn new(vlan_prefix: impl Into<String>) -> Self {
        Self {
            vlan_prefix: vlan_prefix.into(),
        }
    }

    /// Update `rates` from the `previous` baseline to the `current` snapshot
    /// taken `elapsed` later
    pub fn apply(&self, previous: &Snapshot, current: &Snapshot, elapsed: Duration, rates: &mut Rates) {
        let nanos = elapsed.as_nanos() as f64;
        let secs = elapsed.as_secs_f64();
        if nanos <= 0.0 {
            return;
        }

        for counter in metric::CPU_COUNTERS {
            if let Some(delta) = growth(previous, current, counter) {
                rates.insert(cpu_rate_name(counter), delta as f64 / nanos);
            }
        }

        for key in current.keys().filter(|k| k.starts_with(&self.vlan_prefix)) {
            if let Some(delta) = growth(previous, current, key) {
                rates.insert(format!("{}{}", key, NETWORK_RATE_SUFFIX), delta as f64 / secs);
            }
        }
    }
}

/// Positive growth of `key`, if it strictly increased. A counter absent from
/// the baseline counts from zero.
fn growth(previous: &Snapshot, current: &Snapshot, key: &str) -> Option<u64> {
    let now = *current.get(key)?;
    let before = previous.get(key).copied().unwrap_or(0);
    (now > before).then(|| now - before)
}

/// Merge the working snapshot into the baseline and clear the working buffer
pub fn promote(save: &mut Snapshot, info: &mut Snapshot) {
    save.extend(std::mem::take(info));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(entries: &[(&str, u64)]) -> Snapshot {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_cpu_rate_per_nanosecond() {
        let engine = RateEngine::new("vnbe");
        let prev = snap(&[("cpu_user", 1_000), ("cpu_system", 500), ("cpu_usage", 1_500)]);
        let cur = snap(&[("cpu_user", 6_000), ("cpu_system", 1_500), ("cpu_usage", 7_500)]);
        let mut rates = Rates::new();

        engine.apply(&prev, &cur, Duration::from_nanos(10_000), &mut rates);

        assert_eq!(rates["cpu_user_rate"], 0.5);
        assert_eq!(rates["cpu_system_rate"], 0.1);
        assert_eq!(rates["cpu_usage_rate"], 0.6);
    }

    #[test]
    fn test_network_rate_per_second() {
        let engine = RateEngine::new("vnbe");
        let prev = snap(&[("vnbe1.inbytes", 1_000), ("vnbe1.outbytes", 0)]);
        let cur = snap(&[("vnbe1.inbytes", 21_000), ("vnbe1.outbytes", 500)]);
        let mut rates = Rates::new();

        engine.apply(&prev, &cur, Duration::from_secs(10), &mut rates);

        assert_eq!(rates["vnbe1.inbytes.rate"], 2_000.0);
        assert_eq!(rates["vnbe1.outbytes.rate"], 50.0);
    }

    #[test]
    fn test_decreasing_counter_keeps_previous_rate() {
        let engine = RateEngine::new("vnbe");
        let mut rates = Rates::new();
        rates.insert("cpu_user_rate".to_string(), 0.25);
        rates.insert("vnbe1.inbytes.rate".to_string(), 42.0);

        let prev = snap(&[("cpu_user", 9_000), ("vnbe1.inbytes", 5_000)]);
        let cur = snap(&[("cpu_user", 100), ("vnbe1.inbytes", 10)]);
        engine.apply(&prev, &cur, Duration::from_secs(1), &mut rates);

        assert_eq!(rates["cpu_user_rate"], 0.25);
        assert_eq!(rates["vnbe1.inbytes.rate"], 42.0);
    }

    #[test]
    fn test_flat_counter_keeps_previous_rate() {
        let engine = RateEngine::new("vnbe");
        let mut rates = Rates::new();
        rates.insert("vnbe1.inbytes.rate".to_string(), 7.0);

        let prev = snap(&[("vnbe1.inbytes", 5_000)]);
        let cur = snap(&[("vnbe1.inbytes", 5_000)]);
        engine.apply(&prev, &cur, Duration::from_secs(1), &mut rates);

        assert_eq!(rates["vnbe1.inbytes.rate"], 7.0);
    }

    #[test]
    fn test_memory_never_rated() {
        let engine = RateEngine::new("vnbe");
        let prev = snap(&[("mem_usage", 100), ("mem_rss", 10)]);
        let cur = snap(&[("mem_usage", 900), ("mem_rss", 90)]);
        let mut rates = Rates::new();

        engine.apply(&prev, &cur, Duration::from_secs(1), &mut rates);

        assert!(rates.is_empty());
    }

    #[test]
    fn test_non_vlan_interfaces_not_rated() {
        let engine = RateEngine::new("vnbe");
        let prev = snap(&[("eth0.inbytes", 0)]);
        let cur = snap(&[("eth0.inbytes", 100)]);
        let mut rates = Rates::new();

        engine.apply(&prev, &cur, Duration::from_secs(1), &mut rates);

        assert!(rates.is_empty());
    }

    #[test]
    fn test_zero_elapsed_is_ignored() {
        let engine = RateEngine::new("vnbe");
        let prev = snap(&[("cpu_user", 0)]);
        let cur = snap(&[("cpu_user", 100)]);
        let mut rates = Rates::new();

        engine.apply(&prev, &cur, Duration::ZERO, &mut rates);

        assert!(rates.is_empty());
    }

    #[test]
    fn test_promote_moves_working_snapshot() {
        let mut save = snap(&[("cpu_user", 1), ("vnbe9.inbytes", 5)]);
        let mut info = snap(&[("cpu_user", 2), ("mem_usage", 3)]);

        promote(&mut save, &mut info);

        assert!(info.is_empty());
        assert_eq!(save["cpu_user"], 2);
        assert_eq!(save["mem_usage"], 3);
        assert_eq!(save["vnbe9.inbytes"], 5);
    }
}
