use crate::compile_client::CompileClient;
use crate::runtime::{class_name_from_path, RunMode, RunOutcome, RuntimeRunner};
use crate::stats::GlobalStats;
use crate::testcase::TestCase;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Differential,
    AssertOnly,
}

/// Extracts the top-level declared type names from a source file, used to build a
/// "compile-only" class-path filter for the runtime. External collaborator: the parser that
/// understands the mutated language's grammar.
pub trait TypeExtractor: Send + Sync {
    fn declared_types(&self, source: &str) -> Vec<String>;
}

pub struct TestCaseResult {
    pub testcase: Arc<TestCase>,
    pub interpreter_result: Option<RunOutcome>,
    pub jit_result: RunOutcome,
    pub compilable: bool,
}

pub struct ExecutorContext {
    pub compile_client: Arc<dyn CompileClient>,
    pub runtime_runner: Arc<RuntimeRunner>,
    pub type_extractor: Arc<dyn TypeExtractor>,
    pub stats: Arc<GlobalStats>,
    pub mode: ExecutionMode,
    pub execution_receiver: crossbeam_channel::Receiver<Arc<TestCase>>,
    pub evaluation_sender: crossbeam_channel::Sender<TestCaseResult>,
    pub file_manager: Arc<crate::file_manager::FileManager>,
    pub shutdown: Arc<AtomicBool>,
}

/// Runs the executor loop until shutdown: compile, run under one or two modes, forward to
/// evaluation. Each step records the relevant `GlobalStats` counters so a dropped test case still
/// shows up in the dashboard.
pub fn executor_loop(ctx: &ExecutorContext) {
    while !ctx.shutdown.load(Ordering::Relaxed) {
        let testcase = match ctx
            .execution_receiver
            .recv_timeout(std::time::Duration::from_millis(200))
        {
            Ok(tc) => tc,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
        };

        ctx.stats.executed.fetch_add(1, Ordering::Relaxed);
        process_one(ctx, testcase);
    }
}

fn process_one(ctx: &ExecutorContext, testcase: Arc<TestCase>) {
    let source_path = ctx.file_manager.source_path(&testcase.name);
    let started = Instant::now();
    let outcome = ctx.compile_client.compile(&source_path);
    ctx.stats
        .compile_time_nanos
        .observe(started.elapsed().as_nanos() as f64);

    let compile_outcome = match outcome {
        Ok(o) if o.success => o,
        _ => {
            ctx.stats.compile_failures.fetch_add(1, Ordering::Relaxed);
            ctx.stats.with_mutator_counters(testcase.mutator_kind.label(), |c| {
                c.compile_failures.fetch_add(1, Ordering::Relaxed);
            });
            ctx.file_manager.delete_testcase(&testcase.name);
            return;
        }
    };

    let class_path = compile_outcome
        .class_path
        .unwrap_or_else(|| ctx.file_manager.session_dir().to_string_lossy().to_string());

    let entry_class = class_name_from_path(&source_path).unwrap_or_else(|| testcase.name.clone());

    let Ok(source) = ctx.file_manager.read_source(&testcase.name) else {
        return;
    };
    let _declared_types = ctx.type_extractor.declared_types(&source);

    let interpreter_result = if ctx.mode == ExecutionMode::Differential {
        let started = Instant::now();
        let result = ctx
            .runtime_runner
            .run(&class_path, &entry_class, RunMode::Interpreter)
            .ok();
        if let Some(r) = &result {
            ctx.stats
                .interpreter_exec_time_nanos
                .observe(started.elapsed().as_nanos() as f64);
            if r.timed_out {
                ctx.stats.interpreter_timeouts.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    } else {
        None
    };

    let started = Instant::now();
    let Ok(jit_result) = ctx.runtime_runner.run(&class_path, &entry_class, RunMode::Jit) else {
        ctx.file_manager.delete_testcase(&testcase.name);
        return;
    };
    ctx.stats
        .jit_exec_time_nanos
        .observe(started.elapsed().as_nanos() as f64);
    if jit_result.timed_out {
        ctx.stats.jit_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    testcase.set_runtimes(
        interpreter_result.as_ref().map_or(0, |r| r.wall_time.as_nanos() as u64),
        jit_result.wall_time.as_nanos() as u64,
    );

    let _ = ctx.evaluation_sender.send(TestCaseResult {
        testcase,
        interpreter_result,
        jit_result,
        compilable: true,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AllTypesExtractor;
    impl TypeExtractor for AllTypesExtractor {
        fn declared_types(&self, _source: &str) -> Vec<String> {
            vec!["Main".to_string()]
        }
    }

    #[test]
    fn extractor_returns_declared_names() {
        let extractor = AllTypesExtractor;
        assert_eq!(extractor.declared_types("class Main {}"), vec!["Main"]);
    }
}
