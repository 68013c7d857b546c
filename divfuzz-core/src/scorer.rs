use crate::optimization::{bucketed_fingerprint, pair_index, MethodVector, OptimizationVectors, F};
use crate::stats::GlobalStats;
use crate::testcase::TestCase;

const LIFT_CAP: f64 = 8.0;
const EPS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringPolicy {
    PfIdf,
    AbsoluteCount,
    PairCoverageNovelty,
    InteractionDiversity,
    NovelFeatureBonus,
    Uniform,
}

impl ScoringPolicy {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "pf-idf" => Some(Self::PfIdf),
            "absolute-count" => Some(Self::AbsoluteCount),
            "pair-coverage" => Some(Self::PairCoverageNovelty),
            "interaction-diversity" => Some(Self::InteractionDiversity),
            "novel-feature-bonus" => Some(Self::NovelFeatureBonus),
            "uniform" => Some(Self::Uniform),
            _ => None,
        }
    }
}

/// Result of a preview scoring pass: the winning method vector's contribution, ready to be
/// either discarded or committed to global statistics.
#[derive(Debug, Clone)]
pub struct ScorePreview {
    pub score: f64,
    pub bucketed_counts: [i64; F],
    pub present_features: Vec<usize>,
}

pub struct Scorer {
    policy: ScoringPolicy,
}

impl Scorer {
    pub fn new(policy: ScoringPolicy) -> Self {
        Self { policy }
    }

    /// Computes the interestingness score for `vectors`, keeping the best-scoring method.
    /// Mutates `testcase.score` and `testcase.hashed_opt_vector` as a side effect, ahead of
    /// the corpus decision gate that follows.
    pub fn preview(
        &self,
        stats: &GlobalStats,
        testcase: &TestCase,
        vectors: &OptimizationVectors,
    ) -> ScorePreview {
        let is_seed = testcase.mutator_kind.is_seed();

        let mut best = ScorePreview {
            score: f64::MIN,
            bucketed_counts: [0; F],
            present_features: Vec::new(),
        };

        if vectors.is_empty() {
            best.score = 0.0;
            let preview = best;
            testcase.set_score(preview.score);
            testcase.set_hashed_opt_vector(preview.bucketed_counts);
            return preview;
        }

        for method in &vectors.methods {
            let raw = self.raw_score(stats, method, is_seed);
            let weight = self.runtime_weight(stats, testcase);
            let score = raw * weight;
            if score > best.score {
                let merged = method.counts;
                best = ScorePreview {
                    score,
                    bucketed_counts: bucketed_fingerprint(&merged),
                    present_features: method.present_features(),
                };
            }
        }

        if best.score == f64::MIN {
            best.score = 0.0;
        }

        testcase.set_score(best.score);
        testcase.set_hashed_opt_vector(best.bucketed_counts);
        best
    }

    fn runtime_weight(&self, stats: &GlobalStats, testcase: &TestCase) -> f64 {
        if self.policy == ScoringPolicy::AbsoluteCount || self.policy == ScoringPolicy::Uniform {
            return 1.0;
        }
        let t_case = testcase.average_runtime_nanos();
        let t_global = {
            let interp = stats.interpreter_exec_time_nanos.snapshot().mean();
            let jit = stats.jit_exec_time_nanos.snapshot().mean();
            (interp + jit) / 2.0
        };
        if t_global <= 0.0 {
            return 1.0;
        }
        (1.0 / (1.0 + t_case / t_global)).max(0.1)
    }

    fn raw_score(&self, stats: &GlobalStats, method: &MethodVector, is_seed: bool) -> f64 {
        match self.policy {
            ScoringPolicy::PfIdf | ScoringPolicy::Uniform => self.pf_idf(stats, method, is_seed),
            ScoringPolicy::AbsoluteCount => method.total() as f64,
            ScoringPolicy::PairCoverageNovelty => self.pair_coverage_novelty(stats, method),
            ScoringPolicy::InteractionDiversity => (method.total() - method.peak()) as f64,
            ScoringPolicy::NovelFeatureBonus => self.novel_feature_bonus(stats, method),
        }
    }

    fn pf_idf(&self, stats: &GlobalStats, method: &MethodVector, is_seed: bool) -> f64 {
        let present = method.present_features();
        if present.len() < 2 {
            return 0.0;
        }

        let n_evaluations = stats.evaluated.load(std::sync::atomic::Ordering::Relaxed) as f64;

        let lift = |feature: usize| -> f64 {
            if is_seed {
                return 0.0;
            }
            let avg_freq = stats.feature_count(feature) as f64 / n_evaluations.max(1.0);
            (method.counts[feature] as f64 / (avg_freq + EPS)).min(LIFT_CAP)
        };

        let denom = if is_seed {
            2.0f64.ln()
        } else {
            (n_evaluations + 1.0).ln()
        };

        let mut terms = Vec::new();
        for a in 0..present.len() {
            for b in (a + 1)..present.len() {
                let (i, j) = (present[a], present[b]);
                let lift_i = lift(i);
                let lift_j = lift(j);
                let n_ij = if is_seed {
                    0.0
                } else {
                    stats.pair_count(pair_index(i, j)) as f64
                };
                let idf = ((n_evaluations + 1.0) / (n_ij + 1.0)).ln() / denom;
                let term = ((lift_i * lift_j).sqrt() - 1.0) * idf;
                if term > 0.0 {
                    terms.push(term);
                }
            }
        }

        if terms.is_empty() {
            0.0
        } else {
            terms.iter().sum::<f64>() / terms.len() as f64
        }
    }

    fn pair_coverage_novelty(&self, stats: &GlobalStats, method: &MethodVector) -> f64 {
        let present = method.present_features();
        if present.is_empty() {
            return 0.0;
        }

        let mut score = 0.0;
        for &feature in &present {
            let unseen = stats.feature_count(feature) == 0;
            if unseen {
                score += 0.5 * method.counts[feature] as f64;
            }
        }
        for a in 0..present.len() {
            for b in (a + 1)..present.len() {
                let (i, j) = (present[a], present[b]);
                let n_ij = stats.pair_count(pair_index(i, j));
                if n_ij == 0 {
                    score += 1.0;
                } else {
                    score += 0.05;
                }
            }
        }
        score.max(0.1)
    }

    fn novel_feature_bonus(&self, stats: &GlobalStats, method: &MethodVector) -> f64 {
        let unseen = method
            .present_features()
            .into_iter()
            .filter(|&f| stats.feature_count(f) == 0)
            .count();
        unseen as f64 + 0.1 * method.total() as f64
    }

    /// Records the preview's contribution to global per-feature and per-pair statistics and
    /// returns the final committed score. Only called for variants the corpus accepted.
    pub fn commit(&self, stats: &GlobalStats, testcase: &TestCase, preview: &ScorePreview) -> f64 {
        for &feature in &preview.present_features {
            stats.add_feature_occurrence(feature, 1);
        }
        for a in 0..preview.present_features.len() {
            for b in (a + 1)..preview.present_features.len() {
                let (i, j) = (preview.present_features[a], preview.present_features[b]);
                stats.add_pair_occurrence(pair_index(i, j), 1);
            }
        }
        stats.score.observe(preview.score);
        testcase.set_score(preview.score);
        preview.score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testcase::TestCase;

    fn method_with(features: &[(usize, i64)]) -> MethodVector {
        let mut m = MethodVector::new("C", "m");
        for &(f, c) in features {
            m.counts[f] = c;
        }
        m
    }

    #[test]
    fn single_feature_cannot_score_positive_pf_idf() {
        let stats = GlobalStats::new();
        let scorer = Scorer::new(ScoringPolicy::PfIdf);
        let method = method_with(&[(1, 5)]);
        let score = scorer.pf_idf(&stats, &method, false);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn empty_vectors_score_zero() {
        let stats = GlobalStats::new();
        let scorer = Scorer::new(ScoringPolicy::PfIdf);
        let tc = TestCase::new_seed("s");
        let preview = scorer.preview(&stats, &tc, &OptimizationVectors::default());
        assert_eq!(preview.score, 0.0);
    }

    #[test]
    fn seed_pf_idf_is_neutral_to_prior_observations() {
        let stats = GlobalStats::new();
        stats.add_feature_occurrence(1, 1000);
        stats.add_pair_occurrence(pair_index(1, 2), 1000);
        let scorer = Scorer::new(ScoringPolicy::PfIdf);
        let method = method_with(&[(1, 3), (2, 4)]);

        let seed_score = scorer.pf_idf(&stats, &method, true);

        let fresh_stats = GlobalStats::new();
        let fresh_score = scorer.pf_idf(&fresh_stats, &method, true);
        assert!((seed_score - fresh_score).abs() < 1e-9);
    }

    #[test]
    fn absolute_count_sums_positive_counts() {
        let stats = GlobalStats::new();
        let scorer = Scorer::new(ScoringPolicy::AbsoluteCount);
        let method = method_with(&[(1, 5), (2, 3)]);
        assert_eq!(scorer.raw_score(&stats, &method, false), 8.0);
    }

    #[test]
    fn interaction_diversity_is_total_minus_peak() {
        let stats = GlobalStats::new();
        let scorer = Scorer::new(ScoringPolicy::InteractionDiversity);
        let method = method_with(&[(1, 5), (2, 3)]);
        assert_eq!(scorer.raw_score(&stats, &method, false), 3.0);
    }
}
