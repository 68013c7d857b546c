use clap::Parser;
use divfuzz_core::compile_client::HttpCompileClient;
use divfuzz_core::config::{CorpusPolicyKind, Mode, MutatorPolicyKind, SessionConfig};
use divfuzz_core::error::{FuzzError, Result};
use divfuzz_core::executor::TypeExtractor;
use divfuzz_core::mutation::Mutator;
use divfuzz_core::scorer::ScoringPolicy;
use divfuzz_core::session::SessionController;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "divfuzz", about = "Coverage- and optimization-guided differential JIT fuzzer")]
struct Cli {
    #[arg(long)]
    seeds: PathBuf,

    #[arg(long, default_value = "fuzz")]
    mode: String,

    #[arg(long = "mutator-policy", default_value = "uniform")]
    mutator_policy: String,

    #[arg(long = "corpus-policy", default_value = "champion")]
    corpus_policy: String,

    #[arg(long, default_value = "pf-idf")]
    scoring: String,

    #[arg(long, default_value_t = 4)]
    executors: usize,

    #[arg(long = "mutator-threads", default_value_t = 2)]
    mutator_threads: usize,

    #[arg(long = "mutator-batch-size", default_value_t = 8)]
    mutator_batch_size: u32,

    #[arg(long = "mutator-timeout-ms", default_value_t = 5000)]
    mutator_timeout_ms: u64,

    #[arg(long = "mutator-slow-limit", default_value_t = 3)]
    mutator_slow_limit: u32,

    #[arg(long = "rng", default_value_t = 0)]
    rng: u64,

    #[arg(long)]
    jdk: Option<String>,

    #[arg(long)]
    blacklist: Option<PathBuf>,

    #[arg(long)]
    seedpool: Option<PathBuf>,

    #[arg(long = "log-level", default_value = "info")]
    log_level: String,

    #[arg(long = "signal-interval", default_value_t = 5)]
    signal_interval: u64,

    #[arg(long = "mutator-interval", default_value_t = 5)]
    mutator_interval: u64,

    #[arg(long)]
    debug: bool,

    #[arg(long = "print-ast")]
    print_ast: bool,

    #[arg(long = "compile-service", default_value = "http://127.0.0.1:8080")]
    compile_service: String,
}

impl Cli {
    fn into_config(self) -> Result<SessionConfig> {
        let mode = Mode::parse(&self.mode)
            .ok_or_else(|| FuzzError::InvalidInput(format!("unknown --mode {}", self.mode)))?;
        let mutator_policy = MutatorPolicyKind::parse(&self.mutator_policy).ok_or_else(|| {
            FuzzError::InvalidInput(format!("unknown --mutator-policy {}", self.mutator_policy))
        })?;
        let corpus_policy = CorpusPolicyKind::parse(&self.corpus_policy).ok_or_else(|| {
            FuzzError::InvalidInput(format!("unknown --corpus-policy {}", self.corpus_policy))
        })?;
        let scoring = ScoringPolicy::parse(&self.scoring)
            .ok_or_else(|| FuzzError::InvalidInput(format!("unknown --scoring {}", self.scoring)))?;

        let mut config = SessionConfig {
            seeds_dir: self.seeds,
            mode,
            mutator_policy,
            corpus_policy,
            scoring,
            executors: self.executors,
            mutator_threads: self.mutator_threads,
            mutator_batch_size: self.mutator_batch_size,
            mutator_timeout_ms: self.mutator_timeout_ms,
            mutator_slow_limit: self.mutator_slow_limit,
            rng_seed: self.rng,
            jdk_home: self.jdk,
            blacklist_path: self.blacklist,
            seedpool_dir: self.seedpool,
            log_level: self.log_level,
            signal_interval_secs: self.signal_interval,
            mutator_interval_secs: self.mutator_interval,
            debug: self.debug,
            print_ast: self.print_ast,
            compile_service_url: self.compile_service,
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

/// Identity mutator used only by `--mode test-mutator`: a lightweight entry point for exercising
/// the pipeline end to end without wiring in a real source-rewriting engine.
struct IdentityMutator;

impl Mutator for IdentityMutator {
    fn name(&self) -> &'static str {
        "Identity"
    }

    fn is_applicable(&self, _source: &str) -> bool {
        true
    }

    fn mutate(&self, source: &str, _rng: &mut rand::rngs::SmallRng) -> Result<String> {
        Ok(source.to_string())
    }
}

struct NoopTypeExtractor;

impl TypeExtractor for NoopTypeExtractor {
    fn declared_types(&self, _source: &str) -> Vec<String> {
        Vec::new()
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug".to_string() } else { cli.log_level.clone() };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = cli.into_config()?;

    let session_dir = std::env::current_dir()?
        .join("fuzz_sessions")
        .join(session_timestamp());

    let controller = Arc::new(SessionController::new(config.clone(), session_dir)?);

    let shutdown = controller.shutdown_handle();
    ctrlc::set_handler(move || {
        log::warn!("received interrupt, shutting down");
        shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
    })
    .map_err(|e| FuzzError::ProcessError(format!("failed to install signal handler: {e}")))?;

    let compile_client = Arc::new(HttpCompileClient::new(config.compile_service_url.clone())?);
    let type_extractor: Arc<dyn TypeExtractor> = Arc::new(NoopTypeExtractor);
    let mutators: Vec<Arc<dyn Mutator>> = vec![Arc::new(IdentityMutator)];

    controller.run(mutators, compile_client, type_extractor, None)
}

fn session_timestamp() -> String {
    let since_epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    since_epoch.as_secs().to_string()
}
