//! Metrics collaborator (§1, §2 ambient stack). Standing in for the
//! out-of-scope Prometheus registry / time-series store: a narrow trait
//! plus an in-process atomic-counters default so the engine runs
//! standalone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub trait MetricsSink: Send + Sync {
    fn incr_counter(&self, name: &str, labels: &HashMap<String, String>, by: u64);
    fn observe(&self, name: &str, labels: &HashMap<String, String>, value: f64);
}

#[derive(Default)]
struct Counter {
    value: AtomicU64,
}

/// In-process counters keyed by `name` + sorted label pairs joined into one
/// string; observations are kept as a running count/sum for a crude
/// average rather than a histogram, since a real histogram belongs to the
/// out-of-scope collaborator this stands in for.
#[derive(Default)]
pub struct InProcessMetrics {
    counters: Mutex<HashMap<String, Counter>>,
    observations: Mutex<HashMap<String, (u64, f64)>>,
}

impl InProcessMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str, labels: &HashMap<String, String>) -> String {
        let mut pairs: Vec<(&String, &String)> = labels.iter().collect();
        pairs.sort_by_key(|(k, _)| k.as_str());
        let mut key = name.to_string();
        for (k, v) in pairs {
            key.push('|');
            key.push_str(k);
            key.push('=');
            key.push_str(v);
        }
        key
    }

    pub fn counter_value(&self, name: &str, labels: &HashMap<String, String>) -> u64 {
        let key = Self::key(name, labels);
        self.counters
            .lock()
            .unwrap()
            .get(&key)
            .map(|c| c.value.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn average(&self, name: &str, labels: &HashMap<String, String>) -> Option<f64> {
        let key = Self::key(name, labels);
        self.observations
            .lock()
            .unwrap()
            .get(&key)
            .map(|(count, sum)| sum / (*count as f64))
    }
}

impl MetricsSink for InProcessMetrics {
    fn incr_counter(&self, name: &str, labels: &HashMap<String, String>, by: u64) {
        let key = Self::key(name, labels);
        let mut counters = self.counters.lock().unwrap();
        counters
            .entry(key)
            .or_default()
            .value
            .fetch_add(by, Ordering::Relaxed);
    }

    fn observe(&self, name: &str, labels: &HashMap<String, String>, value: f64) {
        let key = Self::key(name, labels);
        let mut observations = self.observations.lock().unwrap();
        let entry = observations.entry(key).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates_across_calls() {
        let m = InProcessMetrics::new();
        let labels = HashMap::new();
        m.incr_counter("conns", &labels, 1);
        m.incr_counter("conns", &labels, 2);
        assert_eq!(m.counter_value("conns", &labels), 3);
    }

    #[test]
    fn observe_tracks_running_average() {
        let m = InProcessMetrics::new();
        let labels = HashMap::new();
        m.observe("latency_ms", &labels, 10.0);
        m.observe("latency_ms", &labels, 20.0);
        assert_eq!(m.average("latency_ms", &labels), Some(15.0));
    }
}
