// SPDX-License-Identifier: Apache-2.0

//! Merged metric statistics for one reporting target.
//!
//! Producers record counters and response times; the harvest scheduler takes
//! the whole engine, merges it with any carry-over from a failed cycle, and
//! serializes it into the metrics batch. Unique metric names are capped:
//! once the cap is reached new names are dropped (and counted), while names
//! that already exist keep accumulating.

use std::time::Duration;

use hashbrown::HashMap;
use serde::Serialize;
use tracing::warn;
use ustr::Ustr;

use crate::metric_names::SUPPORTABILITY_METRIC_NAMES_DROPPED;

/// One metric's aggregated values, `[count, total, min, max, sum_of_squares]`
/// in the serialized batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricStats {
    pub count: u64,
    pub total: f64,
    pub min: f64,
    pub max: f64,
    pub sum_of_squares: f64,
}

impl MetricStats {
    fn empty() -> Self {
        MetricStats {
            count: 0,
            total: 0.0,
            min: f64::MAX,
            max: f64::MIN,
            sum_of_squares: 0.0,
        }
    }

    fn record(&mut self, value: f64) {
        self.count += 1;
        self.total += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum_of_squares += value * value;
    }

    fn increment(&mut self, count: u64) {
        self.count += count;
    }

    fn merge(&mut self, other: &MetricStats) {
        if other.count == 0 {
            return;
        }
        self.count += other.count;
        self.total += other.total;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum_of_squares += other.sum_of_squares;
    }
}

pub const DEFAULT_METRIC_LIMIT: usize = 15_000;

#[derive(Debug)]
pub struct StatsEngine {
    stats: HashMap<Ustr, MetricStats>,
    metric_limit: usize,
    dropped_names: u64,
}

impl Default for StatsEngine {
    fn default() -> Self {
        StatsEngine::new(DEFAULT_METRIC_LIMIT)
    }
}

impl StatsEngine {
    pub fn new(metric_limit: usize) -> Self {
        StatsEngine {
            stats: HashMap::new(),
            metric_limit,
            dropped_names: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty() && self.dropped_names == 0
    }

    pub fn increment_counter(&mut self, name: &str) {
        self.increment_counter_by(name, 1);
    }

    pub fn increment_counter_by(&mut self, name: &str, count: u64) {
        if let Some(stats) = self.entry(name) {
            stats.increment(count);
        }
    }

    /// Record a single data point (a duration in seconds, a clamp size, ...).
    pub fn record_value(&mut self, name: &str, value: f64) {
        if let Some(stats) = self.entry(name) {
            stats.record(value);
        }
    }

    pub fn record_response_time(&mut self, name: &str, duration: Duration) {
        self.record_value(name, duration.as_secs_f64());
    }

    pub fn get(&self, name: &str) -> Option<&MetricStats> {
        self.stats.get(&Ustr::from(name))
    }

    /// Merge another engine into this one. Names over the cap are subject to
    /// the same drop rule as direct recording.
    pub fn merge(&mut self, other: &StatsEngine) {
        for (name, stats) in &other.stats {
            if let Some(existing) = self.entry(name.as_str()) {
                existing.merge(stats);
            }
        }
        self.dropped_names += other.dropped_names;
    }

    /// Re-absorb a previously harvested entry; used when a send fails and
    /// the batch carries over into the next cycle.
    pub fn merge_entry(&mut self, name: &str, stats: &MetricStats) {
        if let Some(existing) = self.entry(name) {
            existing.merge(stats);
        }
    }

    pub fn clear(&mut self) {
        self.stats.clear();
        self.dropped_names = 0;
    }

    /// Drain everything into a sorted snapshot for the outbound batch. The
    /// dropped-name counter materializes as a supportability metric so the
    /// overflow is never silent.
    pub fn harvest(&mut self) -> Vec<(Ustr, MetricStats)> {
        if self.dropped_names > 0 {
            warn!(
                "Dropped {} unique metric names over the limit of {}",
                self.dropped_names, self.metric_limit
            );
            let mut dropped = MetricStats::empty();
            dropped.increment(self.dropped_names);
            self.stats
                .insert(Ustr::from(SUPPORTABILITY_METRIC_NAMES_DROPPED), dropped);
            self.dropped_names = 0;
        }
        let mut snapshot: Vec<(Ustr, MetricStats)> = self.stats.drain().collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    fn entry(&mut self, name: &str) -> Option<&mut MetricStats> {
        let key = Ustr::from(name);
        if self.stats.len() >= self.metric_limit && !self.stats.contains_key(&key) {
            self.dropped_names += 1;
            return None;
        }
        Some(self.stats.entry(key).or_insert_with(MetricStats::empty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_accumulates() {
        let mut engine = StatsEngine::new(100);
        engine.increment_counter("Custom/thing");
        engine.increment_counter("Custom/thing");
        assert_eq!(engine.get("Custom/thing").unwrap().count, 2);
    }

    #[test]
    fn test_record_value_tracks_min_max() {
        let mut engine = StatsEngine::new(100);
        engine.record_value("WebTransaction", 0.5);
        engine.record_value("WebTransaction", 1.5);
        let stats = engine.get("WebTransaction").unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total, 2.0);
        assert_eq!(stats.min, 0.5);
        assert_eq!(stats.max, 1.5);
        assert_eq!(stats.sum_of_squares, 2.5);
    }

    #[test]
    fn test_cardinality_cap_drops_new_names_only() {
        let mut engine = StatsEngine::new(2);
        engine.increment_counter("a");
        engine.increment_counter("b");
        engine.increment_counter("c"); // over the cap, dropped
        engine.increment_counter("a"); // existing name still accumulates
        assert_eq!(engine.size(), 2);
        assert_eq!(engine.get("a").unwrap().count, 2);
        assert!(engine.get("c").is_none());

        let snapshot = engine.harvest();
        let dropped = snapshot
            .iter()
            .find(|(name, _)| name.as_str() == SUPPORTABILITY_METRIC_NAMES_DROPPED)
            .expect("dropped counter missing");
        assert_eq!(dropped.1.count, 1);
    }

    #[test]
    fn test_merge() {
        let mut a = StatsEngine::new(100);
        a.record_value("m", 1.0);
        let mut b = StatsEngine::new(100);
        b.record_value("m", 3.0);
        b.increment_counter("n");
        a.merge(&b);
        assert_eq!(a.get("m").unwrap().count, 2);
        assert_eq!(a.get("m").unwrap().max, 3.0);
        assert_eq!(a.get("n").unwrap().count, 1);
    }

    #[test]
    fn test_harvest_drains_and_sorts() {
        let mut engine = StatsEngine::new(100);
        engine.increment_counter("b");
        engine.increment_counter("a");
        let snapshot = engine.harvest();
        assert_eq!(snapshot[0].0.as_str(), "a");
        assert_eq!(snapshot[1].0.as_str(), "b");
        assert!(engine.is_empty());
    }
}
