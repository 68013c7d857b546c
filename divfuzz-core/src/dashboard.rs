use crate::corpus::ChampionCorpus;
use crate::error::Result;
use crate::optimization::{pair_index, FEATURES, F};
use crate::queues::MutationQueue;
use crate::stats::GlobalStats;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct Dashboard {
    pub stats: Arc<GlobalStats>,
    pub corpus: Arc<ChampionCorpus>,
    pub mutation_queue: Arc<MutationQueue>,
    pub session_dir: std::path::PathBuf,
    pub signal_interval: Duration,
}

impl Dashboard {
    /// Runs until `shutdown` is set, appending one row to `signals.csv` every `signal_interval`
    /// and logging a one-line summary to the console.
    pub fn run(&self, shutdown: &AtomicBool) -> Result<()> {
        let path = self.session_dir.join("signals.csv");
        let mut writer = csv::WriterBuilder::new()
            .has_headers(!path.exists())
            .from_writer(
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)?,
            );

        while !shutdown.load(Ordering::Relaxed) {
            self.write_snapshot_row(&mut writer)?;
            writer.flush()?;
            std::thread::sleep(self.signal_interval);
        }
        Ok(())
    }

    fn write_snapshot_row(&self, writer: &mut csv::Writer<std::fs::File>) -> Result<()> {
        let dispatched = self.stats.dispatched.load(Ordering::Relaxed);
        let evaluated = self.stats.evaluated.load(Ordering::Relaxed);
        let executed = self.stats.executed.load(Ordering::Relaxed);
        let bugs = self.stats.bugs.load(Ordering::Relaxed);
        let unique_bugs = self.stats.unique_bug_count();
        let corpus_size = self.corpus.corpus_size();
        let queue_len = self.mutation_queue.len();
        let mean_score = self.stats.score.snapshot().mean();

        log::info!(
            "dispatched={dispatched} executed={executed} evaluated={evaluated} bugs={bugs} \
             unique_bugs={unique_bugs} corpus={corpus_size} queue={queue_len} mean_score={mean_score:.3}"
        );

        writer.write_record(&[
            dispatched.to_string(),
            executed.to_string(),
            evaluated.to_string(),
            bugs.to_string(),
            unique_bugs.to_string(),
            corpus_size.to_string(),
            queue_len.to_string(),
            format!("{mean_score:.6}"),
        ])?;
        Ok(())
    }

    /// Writes the end-of-run artifacts: a human-readable summary, the mutation queue sorted by
    /// score, and the list of feature pairs that were never jointly observed.
    pub fn write_final_report(&self) -> Result<()> {
        self.write_final_metrics(&self.session_dir.join("final_metrics.txt"))?;
        self.write_queue_snapshot(&self.session_dir.join("mutation_queue_snapshot.csv"))?;
        self.write_missing_pairs(&self.session_dir.join("missing_pairs.txt"))?;
        Ok(())
    }

    fn write_final_metrics(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "dispatched={}", self.stats.dispatched.load(Ordering::Relaxed))?;
        writeln!(file, "executed={}", self.stats.executed.load(Ordering::Relaxed))?;
        writeln!(file, "evaluated={}", self.stats.evaluated.load(Ordering::Relaxed))?;
        writeln!(file, "bugs={}", self.stats.bugs.load(Ordering::Relaxed))?;
        writeln!(file, "unique_bugs={}", self.stats.unique_bug_count())?;
        writeln!(file, "compile_failures={}", self.stats.compile_failures.load(Ordering::Relaxed))?;
        writeln!(file, "interpreter_timeouts={}", self.stats.interpreter_timeouts.load(Ordering::Relaxed))?;
        writeln!(file, "jit_timeouts={}", self.stats.jit_timeouts.load(Ordering::Relaxed))?;
        writeln!(file, "corpus_size={}", self.corpus.corpus_size())?;
        writeln!(file, "mean_score={:.6}", self.stats.score.snapshot().mean())?;
        Ok(())
    }

    fn write_queue_snapshot(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["name", "score", "mutation_depth", "mutator"])?;
        for tc in self.mutation_queue.snapshot_sorted_desc() {
            writer.write_record(&[
                tc.name.clone(),
                format!("{:.6}", tc.score()),
                tc.mutation_depth.to_string(),
                tc.mutator_kind.label().to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    fn write_missing_pairs(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        for i in 1..F {
            for j in (i + 1)..F {
                if self.stats.pair_count(pair_index(i, j)) == 0 {
                    writeln!(file, "{}-{}", FEATURES[i], FEATURES[j])?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testcase::TestCase;

    #[test]
    fn final_report_creates_all_three_files() {
        let dir = tempfile::tempdir().unwrap();
        let dashboard = Dashboard {
            stats: Arc::new(GlobalStats::new()),
            corpus: Arc::new(ChampionCorpus::champion(10)),
            mutation_queue: Arc::new(MutationQueue::new(1)),
            session_dir: dir.path().to_path_buf(),
            signal_interval: Duration::from_secs(1),
        };
        let tc = Arc::new(TestCase::new_seed("s"));
        tc.set_score(2.0);
        dashboard.mutation_queue.push(tc);

        dashboard.write_final_report().unwrap();
        assert!(dir.path().join("final_metrics.txt").exists());
        assert!(dir.path().join("mutation_queue_snapshot.csv").exists());
        assert!(dir.path().join("missing_pairs.txt").exists());
    }
}
