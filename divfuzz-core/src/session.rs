use crate::compile_client::CompileClient;
use crate::config::{SessionConfig, MUTATOR_CANDIDATES};
use crate::corpus::ChampionCorpus;
use crate::dashboard::Dashboard;
use crate::error::Result;
use crate::evaluator::{evaluator_loop, BugBucketer, DefaultBugBucketer, EvaluatorContext};
use crate::executor::{executor_loop, ExecutorContext, TestCaseResult, TypeExtractor};
use crate::file_manager::FileManager;
use crate::mutation::{mutation_worker_loop, Mutator, MutationWorkerContext};
use crate::name_gen::NameGenerator;
use crate::queues::MutationQueue;
use crate::rng::derive_seed;
use crate::runtime::RuntimeRunner;
use crate::scheduler::MutatorScheduler;
use crate::scorer::Scorer;
use crate::stats::GlobalStats;
use crate::testcase::TestCase;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const EXECUTION_QUEUE_CAPACITY: usize = 500;
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Wires queues and threads together, loads seeds, runs the dashboard, and orchestrates
/// shutdown. The one long-lived object a CLI frontend constructs and runs.
pub struct SessionController {
    pub config: SessionConfig,
    pub stats: Arc<GlobalStats>,
    pub file_manager: Arc<FileManager>,
    pub corpus: Arc<ChampionCorpus>,
    pub mutation_queue: Arc<MutationQueue>,
    pub scheduler: Arc<MutatorScheduler>,
    pub shutdown: Arc<AtomicBool>,
}

impl SessionController {
    pub fn new(config: SessionConfig, session_dir: impl Into<std::path::PathBuf>) -> Result<Self> {
        config.validate()?;
        let file_manager = Arc::new(FileManager::new(session_dir)?);
        let corpus = Arc::new(config.build_corpus());
        let mutation_queue = Arc::new(MutationQueue::new(derive_seed(config.rng_seed, 2)));
        let scheduler = Arc::new(config.build_scheduler(MUTATOR_CANDIDATES.to_vec()));
        Ok(Self {
            config,
            stats: Arc::new(GlobalStats::new()),
            file_manager,
            corpus,
            mutation_queue,
            scheduler,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    fn load_blacklist(&self) -> HashSet<String> {
        let Some(path) = &self.config.blacklist_path else {
            return HashSet::new();
        };
        std::fs::read_to_string(path)
            .map(|contents| contents.lines().map(str::trim).map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn load_seeds(&self, name_gen: &NameGenerator) -> Result<Vec<Arc<TestCase>>> {
        let blacklist = self.load_blacklist();
        let mut seeds = Vec::new();
        for entry in std::fs::read_dir(&self.config.seeds_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            let stem = entry
                .path()
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| file_name.clone());
            if blacklist.contains(&stem) || blacklist.contains(&file_name) {
                log::info!("skipping blacklisted seed {file_name}");
                continue;
            }
            let source = std::fs::read_to_string(entry.path())?;
            let name = name_gen.next_name();
            self.file_manager.write_source(&name, &source)?;
            seeds.push(Arc::new(TestCase::new_seed(name)));
        }
        Ok(seeds)
    }

    /// Runs the full pipeline: spawns executor, mutator, and evaluator threads, enqueues seeds,
    /// then blocks running the dashboard on the calling thread until `shutdown` is set.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        mutators: Vec<Arc<dyn Mutator>>,
        compile_client: Arc<dyn CompileClient>,
        type_extractor: Arc<dyn TypeExtractor>,
        bug_bucketer: Option<Arc<dyn BugBucketer>>,
    ) -> Result<()> {
        let name_gen = Arc::new(NameGenerator::new("tc"));
        let seeds = self.load_seeds(&name_gen)?;
        log::info!("loaded {} seeds", seeds.len());

        let (execution_tx, execution_rx) =
            crossbeam_channel::bounded::<Arc<TestCase>>(EXECUTION_QUEUE_CAPACITY);
        let (evaluation_tx, evaluation_rx) = crossbeam_channel::unbounded::<TestCaseResult>();

        let runtime_runner = Arc::new(RuntimeRunner::new(self.config.jdk_home.as_deref()));
        let scorer = Arc::new(Scorer::new(self.config.scoring));
        let bug_bucketer = bug_bucketer.unwrap_or_else(|| Arc::new(DefaultBugBucketer));
        let execution_mode = self.config.mode.execution_mode();

        let mut handles = Vec::new();

        for i in 0..self.config.executors {
            let ctx = ExecutorContext {
                compile_client: compile_client.clone(),
                runtime_runner: runtime_runner.clone(),
                type_extractor: type_extractor.clone(),
                stats: self.stats.clone(),
                mode: execution_mode,
                execution_receiver: execution_rx.clone(),
                evaluation_sender: evaluation_tx.clone(),
                file_manager: self.file_manager.clone(),
                shutdown: self.shutdown.clone(),
            };
            handles.push(
                std::thread::Builder::new()
                    .name(format!("executor-{i}"))
                    .spawn(move || executor_loop(&ctx))
                    .expect("spawn executor thread"),
            );
        }

        let evaluator_ctx = EvaluatorContext {
            mode: execution_mode,
            evaluation_receiver: evaluation_rx,
            corpus: self.corpus.clone(),
            mutation_queue: self.mutation_queue.clone(),
            scorer: scorer.clone(),
            scheduler: self.scheduler.clone(),
            stats: self.stats.clone(),
            file_manager: self.file_manager.clone(),
            bug_bucketer,
            shutdown: self.shutdown.clone(),
        };
        handles.push(
            std::thread::Builder::new()
                .name("evaluator".to_string())
                .spawn(move || evaluator_loop(&evaluator_ctx))
                .expect("spawn evaluator thread"),
        );

        for i in 0..self.config.mutator_threads {
            let ctx = MutationWorkerContext {
                mutators: mutators.clone(),
                mutation_queue: self.mutation_queue.clone(),
                execution_sender: execution_tx.clone(),
                corpus: self.corpus.clone(),
                scheduler: self.scheduler.clone(),
                stats: self.stats.clone(),
                file_manager: self.file_manager.clone(),
                name_gen: name_gen.clone(),
                batch_size: self.config.mutator_batch_size,
                mutator_timeout: Duration::from_millis(self.config.mutator_timeout_ms),
                slow_limit: self.config.mutator_slow_limit,
                min_execution_capacity: EXECUTION_QUEUE_CAPACITY / 4,
                execution_capacity: EXECUTION_QUEUE_CAPACITY,
                shutdown: self.shutdown.clone(),
                worker_seed: derive_seed(self.config.rng_seed, 100 + i as u64),
            };
            handles.push(
                std::thread::Builder::new()
                    .name(format!("mutator-{i}"))
                    .spawn(move || mutation_worker_loop(&ctx))
                    .expect("spawn mutator thread"),
            );
        }

        for seed in seeds {
            self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
            seed.set_active_champion(true);
            let _ = execution_tx.send(seed);
        }

        let dashboard = Dashboard {
            stats: self.stats.clone(),
            corpus: self.corpus.clone(),
            mutation_queue: self.mutation_queue.clone(),
            session_dir: self.file_manager.session_dir().to_path_buf(),
            signal_interval: Duration::from_secs(self.config.signal_interval_secs),
        };
        dashboard.run(&self.shutdown)?;

        self.mutation_queue.close();
        drop(execution_tx);

        for handle in handles {
            join_with_timeout(handle, JOIN_TIMEOUT);
        }

        dashboard.write_final_report()?;
        Ok(())
    }
}

/// Joins `handle` within `timeout`. `std::thread::JoinHandle` has no timed join, so the actual
/// join runs on a supervisor thread; if it doesn't finish in time the worker is logged and left
/// to exit on its own rather than blocking shutdown indefinitely.
fn join_with_timeout(handle: std::thread::JoinHandle<()>, timeout: Duration) {
    let name = handle.thread().name().unwrap_or("worker").to_string();
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = handle.join();
        let _ = tx.send(());
    });
    match rx.recv_timeout(timeout) {
        Ok(()) => log::debug!("thread {name} joined"),
        Err(_) => log::warn!("thread {name} did not join within {timeout:?}; abandoning"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CorpusPolicyKind, Mode, MutatorPolicyKind};
    use crate::scorer::ScoringPolicy;

    #[test]
    fn load_seeds_skips_blacklisted_names() {
        let seeds_dir = tempfile::tempdir().unwrap();
        std::fs::write(seeds_dir.path().join("keep.src"), "a").unwrap();
        std::fs::write(seeds_dir.path().join("drop.src"), "b").unwrap();

        let blacklist_dir = tempfile::tempdir().unwrap();
        let blacklist_path = blacklist_dir.path().join("blacklist.txt");
        std::fs::write(&blacklist_path, "drop\n").unwrap();

        let session_dir = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            seeds_dir: seeds_dir.path().to_path_buf(),
            mode: Mode::Fuzz,
            mutator_policy: MutatorPolicyKind::Uniform,
            corpus_policy: CorpusPolicyKind::Champion,
            scoring: ScoringPolicy::PfIdf,
            executors: 1,
            mutator_threads: 1,
            mutator_batch_size: 1,
            mutator_timeout_ms: 1000,
            mutator_slow_limit: 3,
            rng_seed: 1,
            jdk_home: None,
            blacklist_path: Some(blacklist_path),
            seedpool_dir: None,
            log_level: "info".to_string(),
            signal_interval_secs: 5,
            mutator_interval_secs: 5,
            debug: false,
            print_ast: false,
            compile_service_url: "http://127.0.0.1:1".to_string(),
        };
        let controller = SessionController::new(config, session_dir.path()).unwrap();
        let name_gen = NameGenerator::new("tc");
        let seeds = controller.load_seeds(&name_gen).unwrap();
        assert_eq!(seeds.len(), 1);
    }
}
