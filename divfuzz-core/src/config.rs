use crate::corpus::ChampionCorpus;
use crate::error::{FuzzError, Result};
use crate::scheduler::MutatorScheduler;
use crate::scorer::ScoringPolicy;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Fuzz,
    FuzzAsserts,
    TestMutator,
}

impl Mode {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "fuzz" => Some(Self::Fuzz),
            "fuzz-asserts" => Some(Self::FuzzAsserts),
            "test-mutator" => Some(Self::TestMutator),
            _ => None,
        }
    }

    pub fn execution_mode(self) -> crate::executor::ExecutionMode {
        match self {
            Mode::Fuzz | Mode::TestMutator => crate::executor::ExecutionMode::Differential,
            Mode::FuzzAsserts => crate::executor::ExecutionMode::AssertOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutatorPolicyKind {
    Uniform,
    Bandit,
    Mop,
}

impl MutatorPolicyKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "uniform" => Some(Self::Uniform),
            "bandit" => Some(Self::Bandit),
            "mop" => Some(Self::Mop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusPolicyKind {
    Champion,
    Random,
}

impl CorpusPolicyKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "champion" => Some(Self::Champion),
            "random" => Some(Self::Random),
            _ => None,
        }
    }
}

/// Fully resolved session configuration: the product of CLI flags and `PROG_<FIELD>` environment
/// overrides, validated once at startup. Nothing downstream re-reads the environment.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub seeds_dir: PathBuf,
    pub mode: Mode,
    pub mutator_policy: MutatorPolicyKind,
    pub corpus_policy: CorpusPolicyKind,
    pub scoring: ScoringPolicy,
    pub executors: usize,
    pub mutator_threads: usize,
    pub mutator_batch_size: u32,
    pub mutator_timeout_ms: u64,
    pub mutator_slow_limit: u32,
    pub rng_seed: u64,
    pub jdk_home: Option<String>,
    pub blacklist_path: Option<PathBuf>,
    pub seedpool_dir: Option<PathBuf>,
    pub log_level: String,
    pub signal_interval_secs: u64,
    pub mutator_interval_secs: u64,
    pub debug: bool,
    pub print_ast: bool,
    pub compile_service_url: String,
}

const SCHEDULER_SALT: u64 = crate::rng::SCHEDULER_SALT;

impl SessionConfig {
    /// Applies `PROG_<FIELD>` environment overrides for fields the CLI left at their defaults.
    /// CLI-set values always win: the environment never overrides something already set
    /// explicitly on the command line.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("PROG_COMPILE_SERVICE_URL") {
            self.compile_service_url = host;
        }
        if let Ok(seed) = std::env::var("PROG_RNG") {
            if let Ok(parsed) = seed.parse() {
                self.rng_seed = parsed;
            }
        }
        if let Ok(level) = std::env::var("PROG_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.seeds_dir.is_dir() {
            return Err(FuzzError::InvalidInput(format!(
                "seeds directory does not exist: {}",
                self.seeds_dir.display()
            )));
        }
        if self.executors == 0 {
            return Err(FuzzError::InvalidInput("--executors must be >= 1".to_string()));
        }
        if self.mutator_threads == 0 {
            return Err(FuzzError::InvalidInput("--mutator-threads must be >= 1".to_string()));
        }
        if self.mutator_batch_size == 0 {
            return Err(FuzzError::InvalidInput("--mutator-batch-size must be >= 1".to_string()));
        }
        Ok(())
    }

    pub fn scheduler_seed(&self) -> u64 {
        self.rng_seed ^ SCHEDULER_SALT
    }

    pub fn build_scheduler(&self, candidates: Vec<&'static str>) -> MutatorScheduler {
        match self.mutator_policy {
            MutatorPolicyKind::Uniform => MutatorScheduler::uniform(candidates, self.scheduler_seed()),
            MutatorPolicyKind::Bandit => MutatorScheduler::bandit(candidates, self.scheduler_seed()),
            MutatorPolicyKind::Mop => MutatorScheduler::mop(candidates, self.scheduler_seed()),
        }
    }

    pub fn build_corpus(&self) -> ChampionCorpus {
        const CAPACITY: usize = 10_000;
        match self.corpus_policy {
            CorpusPolicyKind::Champion => ChampionCorpus::champion(CAPACITY),
            CorpusPolicyKind::Random => {
                ChampionCorpus::random(CAPACITY, crate::rng::derive_seed(self.rng_seed, 1))
            }
        }
    }
}

pub static MUTATOR_CANDIDATES: &[&str] = &[
    "Inline",
    "LoopUnroll",
    "ConstantFold",
    "DeadCodeElim",
    "Devirtualize",
    "Vectorize",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_seed_is_salted() {
        let mut cfg = sample_config();
        cfg.rng_seed = 42;
        assert_ne!(cfg.scheduler_seed(), cfg.rng_seed);
    }

    #[test]
    fn validate_rejects_missing_seeds_dir() {
        let mut cfg = sample_config();
        cfg.seeds_dir = PathBuf::from("/nonexistent/does/not/exist");
        assert!(cfg.validate().is_err());
    }

    fn sample_config() -> SessionConfig {
        SessionConfig {
            seeds_dir: PathBuf::from("."),
            mode: Mode::Fuzz,
            mutator_policy: MutatorPolicyKind::Uniform,
            corpus_policy: CorpusPolicyKind::Champion,
            scoring: ScoringPolicy::PfIdf,
            executors: 4,
            mutator_threads: 2,
            mutator_batch_size: 8,
            mutator_timeout_ms: 5000,
            mutator_slow_limit: 3,
            rng_seed: 1,
            jdk_home: None,
            blacklist_path: None,
            seedpool_dir: None,
            log_level: "info".to_string(),
            signal_interval_secs: 5,
            mutator_interval_secs: 5,
            debug: false,
            print_ast: false,
            compile_service_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}
