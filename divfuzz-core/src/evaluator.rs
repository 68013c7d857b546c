use crate::corpus::{ChampionCorpus, CorpusOutcome};
use crate::executor::{ExecutionMode, TestCaseResult};
use crate::file_manager::FileManager;
use crate::parser::parse_instrumentation;
use crate::queues::MutationQueue;
use crate::scheduler::{EvaluationFeedback, MutatorScheduler};
use crate::scorer::Scorer;
use crate::stats::GlobalStats;
use crate::testcase::{EvaluationOutcome, TestCase};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Fixed signature that identifies a JVM crash in assert-only mode's stdout.
const CRASH_SIGNATURE: &str = "FATAL ERROR";

/// Derives a stable identifier for a bug's signature, used to deduplicate unique bug counts.
/// Exposed as a hook so the corpus decision rule never has to change to support a different
/// triage backend.
pub trait BugBucketer: Send + Sync {
    fn bucket_id(&self, reason: &str, diverging_stream: &[u8]) -> u64;
}

pub struct DefaultBugBucketer;

impl BugBucketer for DefaultBugBucketer {
    fn bucket_id(&self, reason: &str, diverging_stream: &[u8]) -> u64 {
        use std::hash::{Hash, Hasher};
        let first_line = diverging_stream
            .split(|&b| b == b'\n')
            .next()
            .unwrap_or(&[]);
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        reason.hash(&mut hasher);
        first_line.hash(&mut hasher);
        hasher.finish()
    }
}

pub struct EvaluatorContext {
    pub mode: ExecutionMode,
    pub evaluation_receiver: crossbeam_channel::Receiver<TestCaseResult>,
    pub corpus: Arc<ChampionCorpus>,
    pub mutation_queue: Arc<MutationQueue>,
    pub scorer: Arc<Scorer>,
    pub scheduler: Arc<MutatorScheduler>,
    pub stats: Arc<GlobalStats>,
    pub file_manager: Arc<FileManager>,
    pub bug_bucketer: Arc<dyn BugBucketer>,
    pub shutdown: Arc<AtomicBool>,
}

pub fn evaluator_loop(ctx: &EvaluatorContext) {
    while !ctx.shutdown.load(Ordering::Relaxed) {
        let result = match ctx
            .evaluation_receiver
            .recv_timeout(std::time::Duration::from_millis(200))
        {
            Ok(r) => r,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
        };
        evaluate_one(ctx, result);
    }
}

fn persist_failing(ctx: &EvaluatorContext, result: &TestCaseResult, reason: &str) {
    let _ = ctx.file_manager.persist_failing(
        &result.testcase.name,
        &result.jit_result.stdout,
        &result.jit_result.stderr,
        reason,
    );
}

fn record_bug(ctx: &EvaluatorContext, result: &TestCaseResult, reason: &str, diverging: &[u8]) {
    ctx.stats.bugs.fetch_add(1, Ordering::Relaxed);
    let _ = ctx.file_manager.persist_bug(
        &result.testcase.name,
        &result.jit_result.stdout,
        &result.jit_result.stderr,
        reason,
    );
    let bucket_id = ctx.bug_bucketer.bucket_id(reason, diverging);
    ctx.stats.record_bug_bucket(bucket_id);
}

fn feedback_and_retire(
    ctx: &EvaluatorContext,
    result: &TestCaseResult,
    outcome: EvaluationOutcome,
) {
    ctx.scheduler.record_evaluation(&EvaluationFeedback {
        mutator: result.testcase.mutator_kind.label(),
        outcome,
        parent_counts: result.testcase.parent_merged_counts,
        child_counts: result.testcase.merged_optimization_counts(),
    });
    ctx.stats.with_mutator_counters(result.testcase.mutator_kind.label(), |c| {
        match outcome {
            EvaluationOutcome::Improved => c.improved.fetch_add(1, Ordering::Relaxed),
            EvaluationOutcome::NoImprovement => c.no_improvement.fetch_add(1, Ordering::Relaxed),
            EvaluationOutcome::Bug => c.bugs.fetch_add(1, Ordering::Relaxed),
            EvaluationOutcome::Timeout => c.timeouts.fetch_add(1, Ordering::Relaxed),
            EvaluationOutcome::Failure => c.failures.fetch_add(1, Ordering::Relaxed),
        };
    });
}

fn evaluate_one(ctx: &EvaluatorContext, result: TestCaseResult) {
    ctx.stats.evaluated.fetch_add(1, Ordering::Relaxed);

    match ctx.mode {
        ExecutionMode::Differential => {
            let interpreter = result.interpreter_result.as_ref();
            let timed_out = result.jit_result.timed_out
                || interpreter.is_some_and(|r| r.timed_out);
            if timed_out {
                persist_failing(ctx, &result, "interpreter/JIT timeout");
                feedback_and_retire(ctx, &result, EvaluationOutcome::Timeout);
                return;
            }

            if let Some(interpreter) = interpreter {
                if interpreter.exit_code != result.jit_result.exit_code {
                    record_bug(ctx, &result, "different exit codes", &result.jit_result.stdout);
                    feedback_and_retire(ctx, &result, EvaluationOutcome::Bug);
                    return;
                }
                if result.jit_result.exit_code != Some(0) {
                    persist_failing(ctx, &result, "non-zero exit");
                    feedback_and_retire(ctx, &result, EvaluationOutcome::Failure);
                    return;
                }
                if interpreter.stdout != result.jit_result.stdout {
                    record_bug(ctx, &result, "different stdout", &result.jit_result.stdout);
                    feedback_and_retire(ctx, &result, EvaluationOutcome::Bug);
                    return;
                }
            }
        }
        ExecutionMode::AssertOnly => {
            if result.jit_result.timed_out {
                persist_failing(ctx, &result, "JIT timeout");
                feedback_and_retire(ctx, &result, EvaluationOutcome::Timeout);
                return;
            }
            let crashed = result.jit_result.exit_code != Some(0)
                && String::from_utf8_lossy(&result.jit_result.stdout).contains(CRASH_SIGNATURE);
            if crashed {
                record_bug(ctx, &result, "runtime crash signature", &result.jit_result.stdout);
                feedback_and_retire(ctx, &result, EvaluationOutcome::Bug);
                return;
            }
        }
    }

    score_and_dispatch(ctx, result);
}

fn score_and_dispatch(ctx: &EvaluatorContext, result: TestCaseResult) {
    let testcase = result.testcase;
    let parent_counts = testcase.parent_merged_counts;

    let vectors = parse_instrumentation(&String::from_utf8_lossy(&result.jit_result.stderr));
    testcase.set_merged_optimization_counts(vectors.merged_counts());
    testcase.set_opt_vectors(vectors.clone());

    let preview = ctx.scorer.preview(&ctx.stats, &testcase, &vectors);

    if preview.score <= 0.0 || !preview.score.is_finite() {
        ctx.scorer.commit(&ctx.stats, &testcase, &preview);
        testcase.set_active_champion(false);
        feedback_from_coverage(ctx, &testcase, parent_counts);
        return;
    }

    let decision = ctx.corpus.evaluate(testcase.clone(), &preview);
    match decision.outcome {
        CorpusOutcome::Accepted | CorpusOutcome::Replaced => {
            ctx.scorer.commit(&ctx.stats, &testcase, &preview);
            testcase.set_active_champion(true);
            ctx.mutation_queue.remove_by_name(&testcase.name);
            ctx.mutation_queue.push(testcase.clone());
            if let Some(previous) = &decision.previous_champion {
                ctx.mutation_queue.remove_by_name(&previous.name);
                ctx.file_manager.delete_testcase(&previous.name);
            }
            ctx.stats.set_corpus_size(ctx.corpus.corpus_size());
        }
        CorpusOutcome::Rejected => {
            testcase.set_active_champion(false);
            ctx.file_manager.delete_testcase(&testcase.name);
        }
        CorpusOutcome::Discarded => {
            testcase.set_active_champion(false);
            ctx.file_manager.delete_testcase(&testcase.name);
        }
    }

    for evicted in &decision.evicted {
        ctx.mutation_queue.remove_by_name(&evicted.name);
        ctx.file_manager.delete_testcase(&evicted.name);
    }

    feedback_from_coverage(ctx, &testcase, parent_counts);
}

fn feedback_from_coverage(ctx: &EvaluatorContext, testcase: &TestCase, parent_counts: [i64; crate::optimization::F]) {
    let child_counts = testcase.merged_optimization_counts();
    let improved = (1..crate::optimization::F).any(|i| child_counts[i] > parent_counts[i]);
    let outcome = if improved {
        EvaluationOutcome::Improved
    } else {
        EvaluationOutcome::NoImprovement
    };
    ctx.scheduler.record_evaluation(&EvaluationFeedback {
        mutator: testcase.mutator_kind.label(),
        outcome,
        parent_counts,
        child_counts,
    });
    ctx.stats.with_mutator_counters(testcase.mutator_kind.label(), |c| match outcome {
        EvaluationOutcome::Improved => {
            c.improved.fetch_add(1, Ordering::Relaxed);
        }
        _ => {
            c.no_improvement.fetch_add(1, Ordering::Relaxed);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bug_bucketer_is_stable_for_identical_inputs() {
        let bucketer = DefaultBugBucketer;
        let a = bucketer.bucket_id("different exit codes", b"trace\nmore");
        let b = bucketer.bucket_id("different exit codes", b"trace\nmore");
        assert_eq!(a, b);
    }

    #[test]
    fn bug_bucketer_distinguishes_first_line() {
        let bucketer = DefaultBugBucketer;
        let a = bucketer.bucket_id("different exit codes", b"trace one\nmore");
        let b = bucketer.bucket_id("different exit codes", b"trace two\nmore");
        assert_ne!(a, b);
    }
}
