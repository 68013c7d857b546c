use crate::corpus::ChampionCorpus;
use crate::error::Result;
use crate::file_manager::FileManager;
use crate::name_gen::NameGenerator;
use crate::queues::MutationQueue;
use crate::scheduler::MutatorScheduler;
use crate::stats::GlobalStats;
use crate::testcase::{MutatorKind, TestCase};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationStatus {
    Success,
    NotApplicable,
    Failed(String),
}

pub struct MutationAttempt {
    pub testcase: Option<Arc<TestCase>>,
    pub status: MutationStatus,
}

/// Capability boundary around the external mutation engine: a source-to-source rewriter that
/// the core only ever calls through this trait.
pub trait Mutator: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_applicable(&self, source: &str) -> bool;
    fn mutate(&self, source: &str, rng: &mut SmallRng) -> Result<String>;
}

/// Parses the parent source, checks applicability, applies the mutation under a fresh per-attempt
/// seed, and persists the child via the `FileManager`. Runs the mutator on a helper thread so a
/// hung mutator can be abandoned after `timeout` instead of blocking the worker forever.
pub fn attempt_mutation(
    mutator: Arc<dyn Mutator>,
    parent: &TestCase,
    parent_source: String,
    file_manager: &FileManager,
    name_gen: &NameGenerator,
    seed: u64,
    timeout: Duration,
) -> MutationAttempt {
    if !mutator.is_applicable(&parent_source) {
        return MutationAttempt {
            testcase: None,
            status: MutationStatus::NotApplicable,
        };
    }

    let mutator_name = mutator.name();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut rng = SmallRng::seed_from_u64(seed);
        let result = mutator.mutate(&parent_source, &mut rng);
        let _ = tx.send(result);
    });

    let mutated = match rx.recv_timeout(timeout) {
        Ok(Ok(source)) => source,
        Ok(Err(e)) => {
            return MutationAttempt {
                testcase: None,
                status: MutationStatus::Failed(e.to_string()),
            }
        }
        Err(_) => {
            return MutationAttempt {
                testcase: None,
                status: MutationStatus::Failed("mutator exceeded attempt timeout".to_string()),
            }
        }
    };

    let name = name_gen.next_name();
    let child = Arc::new(TestCase::new_child(
        name.clone(),
        parent,
        MutatorKind::Named(mutator_name),
    ));

    if let Err(e) = file_manager.write_source(&name, &mutated) {
        return MutationAttempt {
            testcase: None,
            status: MutationStatus::Failed(format!("failed to persist child source: {e}")),
        };
    }

    MutationAttempt {
        testcase: Some(child),
        status: MutationStatus::Success,
    }
}

/// Shared, read-mostly context one mutation worker thread operates against.
pub struct MutationWorkerContext {
    pub mutators: Vec<Arc<dyn Mutator>>,
    pub mutation_queue: Arc<MutationQueue>,
    pub execution_sender: crossbeam_channel::Sender<Arc<TestCase>>,
    pub corpus: Arc<ChampionCorpus>,
    pub scheduler: Arc<MutatorScheduler>,
    pub stats: Arc<GlobalStats>,
    pub file_manager: Arc<FileManager>,
    pub name_gen: Arc<NameGenerator>,
    pub batch_size: u32,
    pub mutator_timeout: Duration,
    pub slow_limit: u32,
    pub min_execution_capacity: usize,
    pub execution_capacity: usize,
    pub shutdown: Arc<AtomicBool>,
    pub worker_seed: u64,
}

fn mutator_by_name<'a>(mutators: &'a [Arc<dyn Mutator>], name: &str) -> Option<&'a Arc<dyn Mutator>> {
    mutators.iter().find(|m| m.name() == name)
}

/// Runs the mutation worker loop until shutdown. One iteration pulls a parent, mutates it up to
/// `batch_size` times, and either requeues or retires the parent.
pub fn mutation_worker_loop(ctx: &MutationWorkerContext) {
    let mut rng = SmallRng::seed_from_u64(ctx.worker_seed);
    let mut attempt_counter: u64 = 0;

    while !ctx.shutdown.load(Ordering::Relaxed) {
        while ctx.execution_sender.len()
            >= ctx
                .min_execution_capacity
                .max(((ctx.mutation_queue.len() as f64) * 0.25).ceil() as usize)
            || ctx.execution_sender.len() >= ctx.execution_capacity
        {
            if ctx.shutdown.load(Ordering::Relaxed) {
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        let use_random = {
            use rand::Rng;
            rng.gen_range(0.0..1.0) < 0.1
        };
        let parent = if use_random {
            ctx.mutation_queue.take_random()
        } else {
            ctx.mutation_queue.take_highest_priority()
        };
        let Some(parent) = parent else {
            return; // queue closed and drained: shutdown in progress
        };
        parent.record_selection();

        run_batch(ctx, &parent, &mut rng, &mut attempt_counter);
    }
}

fn run_batch(
    ctx: &MutationWorkerContext,
    parent: &Arc<TestCase>,
    rng: &mut SmallRng,
    attempt_counter: &mut u64,
) {
    use rand::Rng;

    let Ok(parent_source) = ctx.file_manager.read_source(&parent.name) else {
        ctx.corpus.remove(parent, "parent source missing");
        return;
    };

    let mut already_tried: Vec<&'static str> = Vec::new();
    let mut all_not_applicable = true;
    let mut retired = false;

    for _ in 0..ctx.batch_size {
        let mutator_name = ctx.scheduler.pick(&already_tried);
        already_tried.push(mutator_name);
        let Some(mutator) = mutator_by_name(&ctx.mutators, mutator_name) else {
            continue;
        };

        *attempt_counter += 1;
        let seed: u64 = rng.r#gen();
        let started = std::time::Instant::now();
        let attempt = attempt_mutation(
            mutator.clone(),
            parent,
            parent_source.clone(),
            &ctx.file_manager,
            &ctx.name_gen,
            seed,
            ctx.mutator_timeout,
        );
        let elapsed = started.elapsed();

        ctx.stats.with_mutator_counters(mutator_name, |c| c.record_attempt());

        match attempt.status {
            MutationStatus::NotApplicable => continue,
            MutationStatus::Failed(reason) => {
                all_not_applicable = false;
                log::debug!("mutation attempt failed for parent {}: {reason}", parent.name);
                if elapsed >= ctx.mutator_timeout {
                    let count = parent.record_slow_mutation();
                    if count >= ctx.slow_limit {
                        ctx.corpus.remove(parent, "slow parent");
                        parent.set_active_champion(false);
                        ctx.file_manager.delete_testcase(&parent.name);
                        retired = true;
                    }
                    // A timed-out attempt aborts the rest of this batch regardless of whether
                    // the parent is retired outright.
                    break;
                }
            }
            MutationStatus::Success => {
                all_not_applicable = false;
                let child = attempt.testcase.expect("success implies a child");
                let _ = ctx.execution_sender.send(child);
            }
        }
    }

    if all_not_applicable {
        ctx.corpus.remove(parent, "no applicable mutators");
        parent.set_active_champion(false);
        ctx.file_manager.delete_testcase(&parent.name);
        return;
    }

    if !retired && parent.is_active_champion() {
        ctx.mutation_queue.push(parent.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::ChampionCorpus;
    use crate::scheduler::MutatorScheduler;
    use crate::stats::GlobalStats;

    struct SlowMutator;
    impl Mutator for SlowMutator {
        fn name(&self) -> &'static str {
            "Slow"
        }
        fn is_applicable(&self, _source: &str) -> bool {
            true
        }
        fn mutate(&self, source: &str, _rng: &mut SmallRng) -> Result<String> {
            std::thread::sleep(Duration::from_millis(200));
            Ok(source.to_string())
        }
    }

    struct UppercaseMutator;
    impl Mutator for UppercaseMutator {
        fn name(&self) -> &'static str {
            "Uppercase"
        }
        fn is_applicable(&self, source: &str) -> bool {
            source.chars().any(|c| c.is_lowercase())
        }
        fn mutate(&self, source: &str, _rng: &mut SmallRng) -> Result<String> {
            Ok(source.to_uppercase())
        }
    }

    #[test]
    fn not_applicable_mutator_produces_no_testcase() {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();
        let name_gen = NameGenerator::new("tc");
        let parent = TestCase::new_seed("seed_0");
        let attempt = attempt_mutation(
            Arc::new(UppercaseMutator),
            &parent,
            "ALREADY UPPER".to_string(),
            &fm,
            &name_gen,
            1,
            Duration::from_secs(1),
        );
        assert_eq!(attempt.status, MutationStatus::NotApplicable);
        assert!(attempt.testcase.is_none());
    }

    #[test]
    fn successful_mutation_persists_child_source() {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();
        let name_gen = NameGenerator::new("tc");
        let parent = TestCase::new_seed("seed_0");
        let attempt = attempt_mutation(
            Arc::new(UppercaseMutator),
            &parent,
            "hello".to_string(),
            &fm,
            &name_gen,
            1,
            Duration::from_secs(1),
        );
        assert_eq!(attempt.status, MutationStatus::Success);
        let child = attempt.testcase.unwrap();
        assert_eq!(fm.read_source(&child.name).unwrap(), "HELLO");
        assert_eq!(child.mutation_depth, 1);
    }

    #[test]
    fn all_not_applicable_batch_evicts_parent_from_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let fm = Arc::new(FileManager::new(dir.path()).unwrap());
        let name_gen = Arc::new(NameGenerator::new("tc"));
        let parent = Arc::new(TestCase::new_seed("seed_0"));
        parent.set_active_champion(true);
        fm.write_source(&parent.name, "ALREADY UPPER").unwrap();

        let corpus = Arc::new(ChampionCorpus::champion(10));
        let mut fp = [0i64; crate::optimization::F];
        fp[1] = 4;
        let preview = crate::scorer::ScorePreview {
            score: 5.0,
            bucketed_counts: fp,
            present_features: vec![1],
        };
        parent.set_hashed_opt_vector(fp);
        corpus.evaluate(parent.clone(), &preview);

        let ctx = MutationWorkerContext {
            mutators: vec![Arc::new(UppercaseMutator)],
            mutation_queue: Arc::new(MutationQueue::new(1)),
            execution_sender: crossbeam_channel::unbounded().0,
            corpus: corpus.clone(),
            scheduler: Arc::new(MutatorScheduler::uniform(vec!["Uppercase"], 1)),
            stats: Arc::new(GlobalStats::new()),
            file_manager: fm.clone(),
            name_gen,
            batch_size: 3,
            mutator_timeout: Duration::from_secs(1),
            slow_limit: 2,
            min_execution_capacity: 100,
            execution_capacity: 500,
            shutdown: Arc::new(AtomicBool::new(false)),
            worker_seed: 1,
        };

        let mut rng = SmallRng::seed_from_u64(1);
        let mut counter = 0;
        run_batch(&ctx, &parent, &mut rng, &mut counter);

        assert_eq!(corpus.corpus_size(), 0);
        assert!(!fm.source_path(&parent.name).exists());
    }

    #[test]
    fn timed_out_attempt_aborts_rest_of_batch() {
        let dir = tempfile::tempdir().unwrap();
        let fm = Arc::new(FileManager::new(dir.path()).unwrap());
        let name_gen = Arc::new(NameGenerator::new("tc"));
        let parent = Arc::new(TestCase::new_seed("seed_0"));
        parent.set_active_champion(true);
        fm.write_source(&parent.name, "source").unwrap();

        let ctx = MutationWorkerContext {
            mutators: vec![Arc::new(SlowMutator)],
            mutation_queue: Arc::new(MutationQueue::new(1)),
            execution_sender: crossbeam_channel::unbounded().0,
            corpus: Arc::new(ChampionCorpus::champion(10)),
            scheduler: Arc::new(MutatorScheduler::uniform(vec!["Slow"], 1)),
            stats: Arc::new(GlobalStats::new()),
            file_manager: fm.clone(),
            name_gen,
            batch_size: 5,
            mutator_timeout: Duration::from_millis(20),
            slow_limit: 3,
            min_execution_capacity: 100,
            execution_capacity: 500,
            shutdown: Arc::new(AtomicBool::new(false)),
            worker_seed: 1,
        };

        let mut rng = SmallRng::seed_from_u64(1);
        let mut counter = 0;
        run_batch(&ctx, &parent, &mut rng, &mut counter);

        assert_eq!(counter, 1, "a timed-out attempt should abort the rest of the batch");
        assert_eq!(parent.slow_mutation_count(), 1);
        assert!(parent.is_active_champion());
    }
}
