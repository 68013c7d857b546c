use crate::optimization::{pair_count, F};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A min/max/sum/count accumulator that multiple threads can update concurrently without a lock.
#[derive(Debug, Default)]
pub struct Accumulator {
    count: AtomicU64,
    sum_bits: AtomicU64,
    max_bits: AtomicU64,
    min_bits: AtomicU64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum_bits: AtomicU64::new(0f64.to_bits()),
            max_bits: AtomicU64::new(f64::MIN.to_bits()),
            min_bits: AtomicU64::new(f64::MAX.to_bits()),
        }
    }

    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        Self::fetch_update_f64(&self.sum_bits, |sum| sum + value);
        Self::fetch_update_f64(&self.max_bits, |max| max.max(value));
        Self::fetch_update_f64(&self.min_bits, |min| min.min(value));
    }

    fn fetch_update_f64(cell: &AtomicU64, f: impl Fn(f64) -> f64) {
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            let new = f(f64::from_bits(current)).to_bits();
            match cell.compare_exchange_weak(current, new, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn snapshot(&self) -> AccumulatorSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        AccumulatorSnapshot {
            count,
            sum: f64::from_bits(self.sum_bits.load(Ordering::Relaxed)),
            max: if count == 0 {
                0.0
            } else {
                f64::from_bits(self.max_bits.load(Ordering::Relaxed))
            },
            min: if count == 0 {
                0.0
            } else {
                f64::from_bits(self.min_bits.load(Ordering::Relaxed))
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccumulatorSnapshot {
    pub count: u64,
    pub sum: f64,
    pub max: f64,
    pub min: f64,
}

impl AccumulatorSnapshot {
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Per-mutator-kind counters updated from evaluator feedback.
#[derive(Debug, Default)]
pub struct MutatorCounters {
    pub attempts: AtomicU64,
    pub reward_sum_bits: AtomicU64,
    pub improved: AtomicU64,
    pub no_improvement: AtomicU64,
    pub bugs: AtomicU64,
    pub timeouts: AtomicU64,
    pub failures: AtomicU64,
    pub compile_failures: AtomicU64,
}

impl MutatorCounters {
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reward(&self, reward: f64) {
        Accumulator::fetch_update_f64(&self.reward_sum_bits, |sum| sum + reward);
    }
}

/// Process-wide, thread-safe state shared by every component of the pipeline.
pub struct GlobalStats {
    pub dispatched: AtomicU64,
    pub evaluated: AtomicU64,
    pub executed: AtomicU64,
    pub bugs: AtomicU64,
    pub interpreter_timeouts: AtomicU64,
    pub jit_timeouts: AtomicU64,
    pub compile_failures: AtomicU64,

    pub score: Accumulator,
    pub runtime_weight: Accumulator,
    pub compile_time_nanos: Accumulator,
    pub interpreter_exec_time_nanos: Accumulator,
    pub jit_exec_time_nanos: Accumulator,

    feature_counts: Vec<AtomicI64>,
    pair_counts: Vec<AtomicI64>,

    mutator_counters: Mutex<HashMap<&'static str, MutatorCounters>>,
    seen_bug_buckets: Mutex<HashSet<u64>>,

    corpus_size: AtomicU64,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalStats {
    pub fn new() -> Self {
        Self {
            dispatched: AtomicU64::new(0),
            evaluated: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            bugs: AtomicU64::new(0),
            interpreter_timeouts: AtomicU64::new(0),
            jit_timeouts: AtomicU64::new(0),
            compile_failures: AtomicU64::new(0),
            score: Accumulator::new(),
            runtime_weight: Accumulator::new(),
            compile_time_nanos: Accumulator::new(),
            interpreter_exec_time_nanos: Accumulator::new(),
            jit_exec_time_nanos: Accumulator::new(),
            feature_counts: (0..F).map(|_| AtomicI64::new(0)).collect(),
            pair_counts: (0..pair_count()).map(|_| AtomicI64::new(0)).collect(),
            mutator_counters: Mutex::new(HashMap::new()),
            seen_bug_buckets: Mutex::new(HashSet::new()),
            corpus_size: AtomicU64::new(0),
        }
    }

    pub fn feature_count(&self, feature: usize) -> i64 {
        self.feature_counts[feature].load(Ordering::Relaxed)
    }

    pub fn add_feature_occurrence(&self, feature: usize, amount: i64) {
        self.feature_counts[feature].fetch_add(amount, Ordering::Relaxed);
    }

    pub fn pair_count(&self, pair_idx: usize) -> i64 {
        self.pair_counts[pair_idx].load(Ordering::Relaxed)
    }

    pub fn add_pair_occurrence(&self, pair_idx: usize, amount: i64) {
        self.pair_counts[pair_idx].fetch_add(amount, Ordering::Relaxed);
    }

    pub fn with_mutator_counters<R>(
        &self,
        kind: &'static str,
        f: impl FnOnce(&MutatorCounters) -> R,
    ) -> R {
        let mut guard = self.mutator_counters.lock();
        let entry = guard.entry(kind).or_default();
        f(entry)
    }

    /// Returns true if this is the first time this bucket has been observed.
    pub fn record_bug_bucket(&self, bucket_id: u64) -> bool {
        self.seen_bug_buckets.lock().insert(bucket_id)
    }

    pub fn unique_bug_count(&self) -> usize {
        self.seen_bug_buckets.lock().len()
    }

    pub fn set_corpus_size(&self, size: usize) {
        self.corpus_size.store(size as u64, Ordering::Relaxed);
    }

    pub fn corpus_size(&self) -> u64 {
        self.corpus_size.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_tracks_min_max_mean() {
        let acc = Accumulator::new();
        acc.observe(1.0);
        acc.observe(5.0);
        acc.observe(3.0);
        let snap = acc.snapshot();
        assert_eq!(snap.count, 3);
        assert_eq!(snap.min, 1.0);
        assert_eq!(snap.max, 5.0);
        assert!((snap.mean() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn feature_and_pair_counters_are_independent() {
        let stats = GlobalStats::new();
        stats.add_feature_occurrence(1, 4);
        stats.add_pair_occurrence(0, 2);
        assert_eq!(stats.feature_count(1), 4);
        assert_eq!(stats.feature_count(2), 0);
        assert_eq!(stats.pair_count(0), 2);
    }

    #[test]
    fn bug_bucket_dedup() {
        let stats = GlobalStats::new();
        assert!(stats.record_bug_bucket(42));
        assert!(!stats.record_bug_bucket(42));
        assert_eq!(stats.unique_bug_count(), 1);
    }
}
