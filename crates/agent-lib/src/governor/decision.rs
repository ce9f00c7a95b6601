//! Eviction decision
//!
//! Greedy proportional-overage selection: while the total usage is at or
//! above the ceiling, stop the app whose usage exceeds its declared limit by
//! the largest factor. Apps without a limit have ratio 0 and are never
//! chosen. Ties go to the app that reported first in the round.

use std::collections::HashMap;

/// Memory readings of the current round, in first-seen order
#[derive(Debug, Default, Clone)]
pub struct UsageTable {
    entries: Vec<(String, u64)>,
}

impl UsageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reading. A repeated report overwrites the value and keeps
    /// the app's original position.
    pub fn record(&mut self, container_id: &str, memory_usage: u64) {
        match self.entries.iter_mut().find(|(id, _)| id == container_id) {
            Some(entry) => entry.1 = memory_usage,
            None => self
                .entries
                .push((container_id.to_string(), memory_usage)),
        }
    }

    /// Drop readings of apps that are no longer registered
    pub fn retain_registered(&mut self, registered: &HashMap<String, Option<f64>>) {
        self.entries.retain(|(id, _)| registered.contains_key(id));
    }

    /// Whether every registered app has reported this round. Assumes
    /// `retain_registered` ran against the same set.
    pub fn covers(&self, registered: &HashMap<String, Option<f64>>) -> bool {
        !self.entries.is_empty() && self.entries.len() == registered.len()
    }

    pub fn entries(&self) -> &[(String, u64)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// An app selected for termination
#[derive(Debug, Clone, PartialEq)]
pub struct Victim {
    pub container_id: String,
    pub memory_usage: u64,
    pub overage_ratio: f64,
}

/// Result of one decision round
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub total_usage: u64,
    /// Total usage once every victim is gone
    pub remaining_usage: u64,
    pub victims: Vec<Victim>,
    /// The ceiling was still exceeded when no candidate with a positive
    /// ratio was left
    pub unrelieved: bool,
}

impl Outcome {
    pub fn over_ceiling(&self) -> bool {
        self.total_usage != self.remaining_usage || self.unrelieved
    }
}

/// Usage divided by the declared limit; 0 without a usable limit
pub fn overage_ratio(memory_usage: u64, limit: Option<f64>) -> f64 {
    match limit {
        Some(limit) if limit > 0.0 => memory_usage as f64 / limit,
        _ => 0.0,
    }
}

/// Choose the apps to stop so that total usage drops below `ceiling`
pub fn plan_evictions(
    entries: &[(String, u64)],
    limits: &HashMap<String, Option<f64>>,
    ceiling: u64,
) -> Outcome {
    let total_usage: u64 = entries.iter().map(|(_, usage)| *usage).sum();
    let mut remaining = total_usage;
    let mut victims = Vec::new();
    let mut unrelieved = false;

    let mut candidates: Vec<(&str, u64, f64)> = entries
        .iter()
        .map(|(id, usage)| {
            let limit = limits.get(id).copied().flatten();
            (id.as_str(), *usage, overage_ratio(*usage, limit))
        })
        .collect();

    while remaining >= ceiling {
        let mut best: Option<usize> = None;
        for (idx, (_, _, ratio)) in candidates.iter().enumerate() {
            if best.map_or(true, |b| *ratio > candidates[b].2) {
                best = Some(idx);
            }
        }

        let Some(idx) = best.filter(|&b| candidates[b].2 > 0.0) else {
            unrelieved = true;
            break;
        };

        let (id, usage, ratio) = candidates.remove(idx);
        remaining = remaining.saturating_sub(usage);
        victims.push(Victim {
            container_id: id.to_string(),
            memory_usage: usage,
            overage_ratio: ratio,
        });
    }

    Outcome {
        total_usage,
        remaining_usage: remaining,
        victims,
        unrelieved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(items: &[(&str, u64)]) -> Vec<(String, u64)> {
        items.iter().map(|(id, u)| (id.to_string(), *u)).collect()
    }

    fn limits(items: &[(&str, Option<f64>)]) -> HashMap<String, Option<f64>> {
        items.iter().map(|(id, l)| (id.to_string(), *l)).collect()
    }

    fn victim_ids(outcome: &Outcome) -> Vec<&str> {
        outcome
            .victims
            .iter()
            .map(|v| v.container_id.as_str())
            .collect()
    }

    #[test]
    fn test_under_ceiling_no_action() {
        let outcome = plan_evictions(
            &entries(&[("a", 100), ("b", 200)]),
            &limits(&[("a", Some(50.0)), ("b", Some(50.0))]),
            600,
        );
        assert!(outcome.victims.is_empty());
        assert!(!outcome.unrelieved);
        assert!(!outcome.over_ceiling());
        assert_eq!(outcome.total_usage, 300);
    }

    #[test]
    fn test_worst_offender_only() {
        let outcome = plan_evictions(
            &entries(&[("A", 300), ("B", 500), ("C", 200)]),
            &limits(&[("A", Some(400.0)), ("B", Some(400.0)), ("C", Some(400.0))]),
            600,
        );

        assert_eq!(victim_ids(&outcome), vec!["B"]);
        assert_eq!(outcome.victims[0].overage_ratio, 1.25);
        assert_eq!(outcome.total_usage, 1000);
        assert_eq!(outcome.remaining_usage, 500);
        assert!(!outcome.unrelieved);
    }

    #[test]
    fn test_total_equal_to_ceiling_triggers() {
        let outcome = plan_evictions(
            &entries(&[("a", 300), ("b", 300)]),
            &limits(&[("a", Some(100.0)), ("b", Some(200.0))]),
            600,
        );
        assert_eq!(victim_ids(&outcome), vec!["a"]);
    }

    #[test]
    fn test_multiple_victims_in_ratio_order() {
        let outcome = plan_evictions(
            &entries(&[("a", 400), ("b", 400), ("c", 400)]),
            &limits(&[("a", Some(200.0)), ("b", Some(100.0)), ("c", Some(400.0))]),
            500,
        );
        assert_eq!(victim_ids(&outcome), vec!["b", "a"]);
        assert_eq!(outcome.remaining_usage, 400);
    }

    #[test]
    fn test_unlimited_app_never_chosen() {
        let outcome = plan_evictions(
            &entries(&[("big", 10_000), ("small", 300)]),
            &limits(&[("big", None), ("small", Some(100.0))]),
            1_000,
        );

        assert_eq!(victim_ids(&outcome), vec!["small"]);
        assert!(outcome.unrelieved);
        assert_eq!(outcome.remaining_usage, 10_000);
    }

    #[test]
    fn test_no_limits_at_all_is_unrelieved() {
        let outcome = plan_evictions(
            &entries(&[("a", 900), ("b", 900)]),
            &limits(&[("a", None), ("b", None)]),
            1_000,
        );
        assert!(outcome.victims.is_empty());
        assert!(outcome.unrelieved);
        assert!(outcome.over_ceiling());
    }

    #[test]
    fn test_tie_goes_to_first_reported() {
        let l = limits(&[("x", Some(100.0)), ("y", Some(100.0))]);

        let outcome = plan_evictions(&entries(&[("y", 200), ("x", 200)]), &l, 300);
        assert_eq!(victim_ids(&outcome), vec!["y"]);

        let outcome = plan_evictions(&entries(&[("x", 200), ("y", 200)]), &l, 300);
        assert_eq!(victim_ids(&outcome), vec!["x"]);
    }

    #[test]
    fn test_overage_ratio() {
        assert_eq!(overage_ratio(500, Some(400.0)), 1.25);
        assert_eq!(overage_ratio(500, None), 0.0);
        assert_eq!(overage_ratio(500, Some(0.0)), 0.0);
    }

    #[test]
    fn test_usage_table_keeps_first_seen_order() {
        let mut table = UsageTable::new();
        table.record("b", 1);
        table.record("a", 2);
        table.record("b", 3);

        assert_eq!(table.entries(), &entries(&[("b", 3), ("a", 2)])[..]);
    }

    #[test]
    fn test_usage_table_covers_and_prunes() {
        let registered = limits(&[("a", None), ("b", None)]);
        let mut table = UsageTable::new();
        assert!(!table.covers(&registered));

        table.record("a", 1);
        table.record("gone", 5);
        table.retain_registered(&registered);
        assert_eq!(table.len(), 1);
        assert!(!table.covers(&registered));

        table.record("b", 1);
        assert!(table.covers(&registered));

        table.clear();
        assert!(table.is_empty());
    }
}
