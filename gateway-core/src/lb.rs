//! Weighted selection algorithms over a target set (§4.6). Grounded on the
//! upstream project's use of a smooth-weighted / random-weighted / classic
//! weighted-round-robin library wrapped in a mutex-serialized selector.

use crate::config::{LoadBalanceAlgo, WeightedAddr};
use rand::Rng;
use std::sync::Mutex;

/// One entry per non-zero-weight target; weight-0 entries are filtered out
/// by the constructor, never at selection time (§3).
#[derive(Debug, Clone)]
struct Entry {
    addr: WeightedAddr,
    weight: i64,
    current: i64,
}

enum Algo {
    RoundRobinWeighted { cursor: usize },
    SmoothWeighted,
    RandomWeighted,
}

/// Concurrency-safe weighted selector; internally serialized with a mutex
/// (§4.6: "selector may serialize internally").
pub struct LoadBalancer {
    entries: Mutex<Vec<Entry>>,
    algo: Mutex<Algo>,
}

impl LoadBalancer {
    pub fn new(algo: LoadBalanceAlgo, targets: &[WeightedAddr]) -> Self {
        let entries = targets
            .iter()
            .filter(|t| t.weight > 0)
            .map(|t| Entry {
                addr: t.clone(),
                weight: t.weight as i64,
                current: 0,
            })
            .collect();
        let algo = match algo {
            LoadBalanceAlgo::RoundRobinWeighted => Algo::RoundRobinWeighted { cursor: 0 },
            LoadBalanceAlgo::SmoothWeighted => Algo::SmoothWeighted,
            LoadBalanceAlgo::RandomWeighted => Algo::RandomWeighted,
        };
        Self {
            entries: Mutex::new(entries),
            algo: Mutex::new(algo),
        }
    }

    /// Picks the next target. `None` if there are no weighted targets.
    pub fn pick(&self) -> Option<WeightedAddr> {
        let mut entries = self.entries.lock().unwrap();
        if entries.is_empty() {
            return None;
        }
        if entries.len() == 1 {
            return Some(entries[0].addr.clone());
        }

        let mut algo = self.algo.lock().unwrap();
        match &mut *algo {
            Algo::RoundRobinWeighted { cursor } => Some(pick_round_robin_weighted(&entries, cursor)),
            Algo::SmoothWeighted => Some(pick_smooth_weighted(&mut entries)),
            Algo::RandomWeighted => Some(pick_random_weighted(&entries)),
        }
    }
}

/// Classic weighted round robin with an explicit pointer: scans weights in
/// order, decrementing a shared "credits remaining at this pointer" notion
/// by walking the entries and re-visiting based on weight count.
fn pick_round_robin_weighted(entries: &[Entry], cursor: &mut usize) -> WeightedAddr {
    // Expand (index, remaining-visits) conceptually: visit entry `cursor`
    // `weight` times before moving to the next. We track a flat counter
    // across entries' weights to emit "one target per tick" in weight order.
    let total: i64 = entries.iter().map(|e| e.weight).sum();
    let tick = (*cursor as i64) % total.max(1);
    *cursor = cursor.wrapping_add(1);

    let mut remaining = tick;
    for entry in entries {
        if remaining < entry.weight {
            return entry.addr.clone();
        }
        remaining -= entry.weight;
    }
    entries[0].addr.clone()
}

/// Nginx-style smooth weighted round robin.
fn pick_smooth_weighted(entries: &mut [Entry]) -> WeightedAddr {
    let total: i64 = entries.iter().map(|e| e.weight).sum();
    for entry in entries.iter_mut() {
        entry.current += entry.weight;
    }
    let winner_idx = entries
        .iter()
        .enumerate()
        .max_by_key(|(_, e)| e.current)
        .map(|(i, _)| i)
        .unwrap();
    entries[winner_idx].current -= total;
    entries[winner_idx].addr.clone()
}

fn pick_random_weighted(entries: &[Entry]) -> WeightedAddr {
    let total: i64 = entries.iter().map(|e| e.weight).sum();
    let mut draw = rand::thread_rng().gen_range(0..total.max(1));
    for entry in entries {
        if draw < entry.weight {
            return entry.addr.clone();
        }
        draw -= entry.weight;
    }
    entries[entries.len() - 1].addr.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(name: &str, weight: u32) -> WeightedAddr {
        WeightedAddr {
            address: name.to_string(),
            network: "tcp".to_string(),
            weight,
            metric_labels: Default::default(),
        }
    }

    #[test]
    fn single_target_degenerates_to_always_that_target() {
        let lb = LoadBalancer::new(LoadBalanceAlgo::RoundRobinWeighted, &[addr("only", 3)]);
        for _ in 0..5 {
            assert_eq!(lb.pick().unwrap().address, "only");
        }
    }

    #[test]
    fn zero_weight_targets_are_excluded() {
        let lb = LoadBalancer::new(
            LoadBalanceAlgo::RoundRobinWeighted,
            &[addr("dead", 0), addr("alive", 1)],
        );
        for _ in 0..5 {
            assert_eq!(lb.pick().unwrap().address, "alive");
        }
    }

    #[test]
    fn round_robin_weighted_converges_to_weight_ratio() {
        let lb = LoadBalancer::new(
            LoadBalanceAlgo::RoundRobinWeighted,
            &[addr("a", 1), addr("b", 3)],
        );
        let mut counts = std::collections::HashMap::new();
        for _ in 0..400 {
            *counts.entry(lb.pick().unwrap().address).or_insert(0) += 1;
        }
        let a = counts["a"];
        let b = counts["b"];
        assert!((a as i64 - 100).abs() <= 1, "a={a}");
        assert!((b as i64 - 300).abs() <= 1, "b={b}");
    }

    #[test]
    fn smooth_weighted_converges_to_weight_ratio() {
        let lb = LoadBalancer::new(LoadBalanceAlgo::SmoothWeighted, &[addr("a", 1), addr("b", 4)]);
        let mut counts = std::collections::HashMap::new();
        for _ in 0..500 {
            *counts.entry(lb.pick().unwrap().address).or_insert(0) += 1;
        }
        assert!((counts["a"] as i64 - 100).abs() <= 1);
        assert!((counts["b"] as i64 - 400).abs() <= 1);
    }

    #[test]
    fn random_weighted_converges_statistically() {
        let lb = LoadBalancer::new(LoadBalanceAlgo::RandomWeighted, &[addr("a", 1), addr("b", 1)]);
        let mut counts = std::collections::HashMap::new();
        for _ in 0..2000 {
            *counts.entry(lb.pick().unwrap().address).or_insert(0) += 1;
        }
        let a = counts["a"] as f64;
        assert!((a / 2000.0 - 0.5).abs() < 0.07);
    }
}
