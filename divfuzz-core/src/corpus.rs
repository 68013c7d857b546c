use crate::optimization::F;
use crate::scorer::ScorePreview;
use crate::testcase::TestCase;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const REPLACE_MARGIN: f64 = 0.1;
const RANDOM_ACCEPT_PROBABILITY: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusOutcome {
    Accepted,
    Replaced,
    Rejected,
    Discarded,
}

pub struct ChampionEntry {
    pub test_case: Arc<TestCase>,
    pub score: f64,
    pub bucketed_counts: [i64; F],
}

pub struct CorpusDecision {
    pub outcome: CorpusOutcome,
    pub previous_champion: Option<Arc<TestCase>>,
    pub evicted: Vec<Arc<TestCase>>,
    pub reason: Option<&'static str>,
}

enum AcceptPolicy {
    Champion,
    Random(Mutex<SmallRng>),
}

/// Bounded table of "best so far" variants keyed by a bucketed coverage fingerprint.
pub struct ChampionCorpus {
    capacity: usize,
    entries: Mutex<HashMap<[i64; F], ChampionEntry>>,
    size: AtomicUsize,
    policy: AcceptPolicy,
}

impl ChampionCorpus {
    pub fn champion(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
            size: AtomicUsize::new(0),
            policy: AcceptPolicy::Champion,
        }
    }

    pub fn random(capacity: usize, seed: u64) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
            size: AtomicUsize::new(0),
            policy: AcceptPolicy::Random(Mutex::new(SmallRng::seed_from_u64(seed))),
        }
    }

    pub fn corpus_size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    fn is_all_zero(fingerprint: &[i64; F]) -> bool {
        fingerprint[1..].iter().all(|&c| c == 0)
    }

    /// Decides whether `testcase` becomes (or replaces) the incumbent for its fingerprint.
    pub fn evaluate(
        &self,
        testcase: Arc<TestCase>,
        preview: &ScorePreview,
    ) -> CorpusDecision {
        let fingerprint = preview.bucketed_counts;
        if Self::is_all_zero(&fingerprint) {
            return CorpusDecision {
                outcome: CorpusOutcome::Discarded,
                previous_champion: None,
                evicted: Vec::new(),
                reason: Some("empty or all-zero fingerprint"),
            };
        }

        let mut entries = self.entries.lock();
        let existing = entries.get(&fingerprint);

        let should_replace = match existing {
            None => true,
            Some(incumbent) => match &self.policy {
                AcceptPolicy::Champion => preview.score > incumbent.score + REPLACE_MARGIN,
                AcceptPolicy::Random(rng) => {
                    rng.lock().gen_range(0.0..1.0) < RANDOM_ACCEPT_PROBABILITY
                }
            },
        };

        if !should_replace {
            return CorpusDecision {
                outcome: CorpusOutcome::Rejected,
                previous_champion: None,
                evicted: Vec::new(),
                reason: None,
            };
        }

        let previous = entries.remove(&fingerprint).map(|e| e.test_case);
        let outcome = if previous.is_some() {
            CorpusOutcome::Replaced
        } else {
            CorpusOutcome::Accepted
        };

        entries.insert(
            fingerprint,
            ChampionEntry {
                test_case: testcase.clone(),
                score: preview.score,
                bucketed_counts: fingerprint,
            },
        );
        self.size.store(entries.len(), Ordering::Relaxed);

        let evicted = self.enforce_capacity_locked(&mut entries);
        self.size.store(entries.len(), Ordering::Relaxed);

        // If the just-inserted entry was itself evicted during capacity enforcement, the
        // challenger never really made it into the corpus.
        if evicted.iter().any(|e| Arc::ptr_eq(e, &testcase)) {
            return CorpusDecision {
                outcome: CorpusOutcome::Discarded,
                previous_champion: previous,
                evicted,
                reason: Some("evicted immediately under capacity pressure"),
            };
        }

        CorpusDecision {
            outcome,
            previous_champion: previous,
            evicted,
            reason: None,
        }
    }

    fn enforce_capacity_locked(
        &self,
        entries: &mut HashMap<[i64; F], ChampionEntry>,
    ) -> Vec<Arc<TestCase>> {
        if entries.len() <= self.capacity {
            return Vec::new();
        }

        let mut by_score: Vec<([i64; F], f64)> =
            entries.iter().map(|(k, v)| (*k, v.score)).collect();
        by_score.sort_by(|a, b| a.1.total_cmp(&b.1));

        let to_evict = entries.len() - self.capacity;
        let mut evicted = Vec::with_capacity(to_evict);
        for (key, _) in by_score.into_iter().take(to_evict) {
            if let Some(entry) = entries.remove(&key) {
                evicted.push(entry.test_case);
            }
        }
        evicted
    }

    /// Reconciles the cached score after a scorer commit changed it.
    pub fn synchronize_score(&self, testcase: &TestCase) {
        let fingerprint = testcase.hashed_opt_vector();
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&fingerprint) {
            entry.score = testcase.score();
        }
    }

    pub fn remove(&self, testcase: &TestCase, _reason: &str) -> bool {
        let fingerprint = testcase.hashed_opt_vector();
        let mut entries = self.entries.lock();
        let removed = match entries.get(&fingerprint) {
            Some(entry) if entry.test_case.name == testcase.name => {
                entries.remove(&fingerprint);
                true
            }
            _ => false,
        };
        self.size.store(entries.len(), Ordering::Relaxed);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testcase::MutatorKind;

    fn preview_with_fingerprint(score: f64, fingerprint: [i64; F]) -> ScorePreview {
        ScorePreview {
            score,
            bucketed_counts: fingerprint,
            present_features: Vec::new(),
        }
    }

    #[test]
    fn all_zero_fingerprint_is_discarded() {
        let corpus = ChampionCorpus::champion(10);
        let tc = Arc::new(TestCase::new_seed("a"));
        let decision = corpus.evaluate(tc, &preview_with_fingerprint(5.0, [0; F]));
        assert_eq!(decision.outcome, CorpusOutcome::Discarded);
    }

    #[test]
    fn replace_requires_margin() {
        let corpus = ChampionCorpus::champion(10);
        let mut fp = [0i64; F];
        fp[1] = 4;
        let first = Arc::new(TestCase::new_seed("a"));
        let decision = corpus.evaluate(first.clone(), &preview_with_fingerprint(5.0, fp));
        assert_eq!(decision.outcome, CorpusOutcome::Accepted);

        let challenger = Arc::new(TestCase::new_child("b", &first, MutatorKind::Named("M")));
        let decision = corpus.evaluate(challenger.clone(), &preview_with_fingerprint(5.05, fp));
        assert_eq!(decision.outcome, CorpusOutcome::Rejected);

        let strong_challenger =
            Arc::new(TestCase::new_child("c", &first, MutatorKind::Named("M")));
        let decision =
            corpus.evaluate(strong_challenger, &preview_with_fingerprint(5.2, fp));
        assert_eq!(decision.outcome, CorpusOutcome::Replaced);
    }

    #[test]
    fn capacity_eviction_keeps_highest_scores() {
        let corpus = ChampionCorpus::champion(3);
        let scores = [5.0, 4.0, 3.0];
        for (i, &score) in scores.iter().enumerate() {
            let mut fp = [0i64; F];
            fp[1] = (i + 1) as i64 * 4;
            let tc = Arc::new(TestCase::new_seed(format!("seed_{i}")));
            let decision = corpus.evaluate(tc, &preview_with_fingerprint(score, fp));
            assert_eq!(decision.outcome, CorpusOutcome::Accepted);
        }
        assert_eq!(corpus.corpus_size(), 3);

        let mut new_fp = [0i64; F];
        new_fp[1] = 100;
        let new_tc = Arc::new(TestCase::new_seed("new"));
        let decision = corpus.evaluate(new_tc, &preview_with_fingerprint(10.0, new_fp));
        assert_eq!(decision.outcome, CorpusOutcome::Accepted);
        assert_eq!(corpus.corpus_size(), 3);
        assert_eq!(decision.evicted.len(), 1);
        assert_eq!(decision.evicted[0].name, "seed_2");
    }
}
