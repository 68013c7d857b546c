use crate::optimization::{OptimizationVectors, F};
use parking_lot::Mutex;

/// Which mutator (or the initial seed loader) produced a test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutatorKind {
    Seed,
    Named(&'static str),
}

impl MutatorKind {
    pub fn label(&self) -> &'static str {
        match self {
            MutatorKind::Seed => "SEED",
            MutatorKind::Named(name) => name,
        }
    }

    pub fn is_seed(&self) -> bool {
        matches!(self, MutatorKind::Seed)
    }
}

/// Outcome category an evaluation feeds back to the mutator scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationOutcome {
    Improved,
    NoImprovement,
    Bug,
    Timeout,
    Failure,
}

#[derive(Debug, Default)]
struct TestCaseState {
    score: f64,
    merged_optimization_counts: [i64; F],
    hashed_opt_vector: [i64; F],
    opt_vectors: OptimizationVectors,
    interpreter_runtime_nanos: u64,
    jit_runtime_nanos: u64,
    times_selected: u32,
    slow_mutation_count: u32,
    active_champion: bool,
}

/// A unit of work flowing through the pipeline: a mutated (or seed) source file plus all the
/// bookkeeping the scorer, scheduler and corpus attach to it over its lifetime.
///
/// Identity and lineage fields are fixed at construction; everything the pipeline updates after
/// the fact lives behind a single mutex, since a champion test case can be read by the dashboard
/// or a requeueing worker while the evaluator is concurrently updating it.
#[derive(Debug)]
pub struct TestCase {
    pub name: String,
    pub seed_name: String,
    pub parent_name: Option<String>,

    pub mutation_depth: u32,
    pub mutation_count: u32,
    pub mutator_kind: MutatorKind,
    pub parent_score: f64,
    pub parent_merged_counts: [i64; F],

    state: Mutex<TestCaseState>,
}

impl TestCase {
    pub fn new_seed(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            seed_name: name.clone(),
            parent_name: None,
            name,
            mutation_depth: 0,
            mutation_count: 0,
            mutator_kind: MutatorKind::Seed,
            parent_score: 0.0,
            parent_merged_counts: [0; F],
            state: Mutex::new(TestCaseState::default()),
        }
    }

    pub fn new_child(name: impl Into<String>, parent: &TestCase, mutator_kind: MutatorKind) -> Self {
        Self {
            name: name.into(),
            seed_name: parent.seed_name.clone(),
            parent_name: Some(parent.name.clone()),
            mutation_depth: parent.mutation_depth + 1,
            mutation_count: parent.mutation_count + 1,
            mutator_kind,
            parent_score: parent.score(),
            parent_merged_counts: parent.merged_optimization_counts(),
            state: Mutex::new(TestCaseState::default()),
        }
    }

    pub fn score(&self) -> f64 {
        self.state.lock().score
    }

    pub fn set_score(&self, score: f64) {
        self.state.lock().score = score;
    }

    /// Priority key for the mutation queue: highest score first, so this is negated.
    pub fn priority_key(&self) -> f64 {
        -self.score()
    }

    pub fn is_active_champion(&self) -> bool {
        self.state.lock().active_champion
    }

    pub fn set_active_champion(&self, value: bool) {
        self.state.lock().active_champion = value;
    }

    pub fn times_selected(&self) -> u32 {
        self.state.lock().times_selected
    }

    pub fn record_selection(&self) {
        self.state.lock().times_selected += 1;
    }

    pub fn slow_mutation_count(&self) -> u32 {
        self.state.lock().slow_mutation_count
    }

    pub fn record_slow_mutation(&self) -> u32 {
        let mut state = self.state.lock();
        state.slow_mutation_count += 1;
        state.slow_mutation_count
    }

    pub fn merged_optimization_counts(&self) -> [i64; F] {
        self.state.lock().merged_optimization_counts
    }

    pub fn set_merged_optimization_counts(&self, counts: [i64; F]) {
        self.state.lock().merged_optimization_counts = counts;
    }

    pub fn hashed_opt_vector(&self) -> [i64; F] {
        self.state.lock().hashed_opt_vector
    }

    pub fn set_hashed_opt_vector(&self, fingerprint: [i64; F]) {
        self.state.lock().hashed_opt_vector = fingerprint;
    }

    pub fn set_opt_vectors(&self, vectors: OptimizationVectors) {
        self.state.lock().opt_vectors = vectors;
    }

    pub fn opt_vectors(&self) -> OptimizationVectors {
        self.state.lock().opt_vectors.clone()
    }

    pub fn set_runtimes(&self, interpreter_nanos: u64, jit_nanos: u64) {
        let mut state = self.state.lock();
        state.interpreter_runtime_nanos = interpreter_nanos;
        state.jit_runtime_nanos = jit_nanos;
    }

    pub fn average_runtime_nanos(&self) -> f64 {
        let state = self.state.lock();
        if state.jit_runtime_nanos == 0 && state.interpreter_runtime_nanos == 0 {
            return 0.0;
        }
        (state.interpreter_runtime_nanos as f64 + state.jit_runtime_nanos as f64) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_depth_strictly_increases() {
        let seed = TestCase::new_seed("seed_0");
        seed.set_score(1.5);
        let child = TestCase::new_child("child_0", &seed, MutatorKind::Named("Inline"));
        assert_eq!(child.mutation_depth, 1);
        assert_eq!(child.parent_score, 1.5);
        assert_eq!(child.seed_name, "seed_0");
    }

    #[test]
    fn priority_key_is_negated_score() {
        let tc = TestCase::new_seed("s");
        tc.set_score(3.0);
        assert_eq!(tc.priority_key(), -3.0);
    }

    #[test]
    fn child_snapshots_parent_merged_counts() {
        let parent = TestCase::new_seed("seed_0");
        let mut counts = [0i64; F];
        counts[3] = 7;
        parent.set_merged_optimization_counts(counts);
        let child = TestCase::new_child("child_0", &parent, MutatorKind::Named("Inline"));
        assert_eq!(child.parent_merged_counts, counts);
        assert_eq!(child.merged_optimization_counts(), [0; F]);
    }

    #[test]
    fn selection_count_increments() {
        let tc = TestCase::new_seed("s");
        assert_eq!(tc.times_selected(), 0);
        tc.record_selection();
        tc.record_selection();
        assert_eq!(tc.times_selected(), 2);
    }

    #[test]
    fn active_champion_flag_round_trips() {
        let tc = TestCase::new_seed("s");
        assert!(!tc.is_active_champion());
        tc.set_active_champion(true);
        assert!(tc.is_active_champion());
    }
}
