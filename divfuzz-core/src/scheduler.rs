use crate::optimization::F;
use crate::testcase::EvaluationOutcome;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

/// Feedback about one evaluated child, used to update scheduler arm statistics.
pub struct EvaluationFeedback {
    pub mutator: &'static str,
    pub outcome: EvaluationOutcome,
    pub parent_counts: [i64; F],
    pub child_counts: [i64; F],
}

fn sample_standard_normal(rng: &mut SmallRng) -> f64 {
    let u1: f64 = rng.gen_range(1e-12..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Draws a Gamma(shape, 1) sample via the Marsaglia-Tsang method, used to build Beta samples
/// for Thompson sampling (shape >= 1 is assumed, true for every alpha/beta this scheduler uses).
fn sample_gamma(rng: &mut SmallRng, shape: f64) -> f64 {
    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let mut x;
        let mut v;
        loop {
            x = sample_standard_normal(rng);
            v = 1.0 + c * x;
            if v > 0.0 {
                break;
            }
        }
        let v3 = v * v * v;
        let u: f64 = rng.gen_range(0.0..1.0);
        if u < 1.0 - 0.0331 * x * x * x * x {
            return d * v3;
        }
        if u.ln() < 0.5 * x * x + d * (1.0 - v3 + v3.ln()) {
            return d * v3;
        }
    }
}

fn sample_beta(rng: &mut SmallRng, alpha: f64, beta: f64) -> f64 {
    let x = sample_gamma(rng, alpha);
    let y = sample_gamma(rng, beta);
    x / (x + y)
}

/// Euclidean norm of the positive component-wise delta of `child - parent`, i.e. only the
/// features that increased contribute.
fn positive_delta_norm(parent: &[i64; F], child: &[i64; F]) -> f64 {
    let mut sum_sq = 0.0;
    for i in 1..F {
        let delta = child[i] - parent[i];
        if delta > 0 {
            sum_sq += (delta as f64) * (delta as f64);
        }
    }
    sum_sq.sqrt()
}

fn vector_norm(v: &[i64; F]) -> f64 {
    let mut sum_sq = 0.0;
    for i in 1..F {
        sum_sq += (v[i] as f64) * (v[i] as f64);
    }
    sum_sq.sqrt()
}

const EPSILON_EXPLORE: f64 = 0.1;

struct BetaArm {
    alpha: f64,
    beta: f64,
}

struct WeightArm {
    weight: f64,
}

enum ArmTable {
    Uniform,
    Bandit(Mutex<HashMap<&'static str, BetaArm>>),
    Mop(Mutex<HashMap<&'static str, WeightArm>>),
}

/// Chooses the next mutator to apply to a parent, and updates its internal arm statistics from
/// evaluation feedback. `candidates` is the fixed list of mutator kinds this session considers.
pub struct MutatorScheduler {
    candidates: Vec<&'static str>,
    arms: ArmTable,
    rng: Mutex<SmallRng>,
}

impl MutatorScheduler {
    pub fn uniform(candidates: Vec<&'static str>, seed: u64) -> Self {
        Self {
            candidates,
            arms: ArmTable::Uniform,
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }

    pub fn bandit(candidates: Vec<&'static str>, seed: u64) -> Self {
        let mut arms = HashMap::new();
        for &c in &candidates {
            arms.insert(c, BetaArm { alpha: 1.0, beta: 1.0 });
        }
        Self {
            candidates,
            arms: ArmTable::Bandit(Mutex::new(arms)),
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }

    pub fn mop(candidates: Vec<&'static str>, seed: u64) -> Self {
        let mut arms = HashMap::new();
        for &c in &candidates {
            arms.insert(c, WeightArm { weight: 1.0 });
        }
        Self {
            candidates,
            arms: ArmTable::Mop(Mutex::new(arms)),
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }

    /// Picks a mutator for `parent`, avoiding `already_tried` in this mutation batch when
    /// possible by falling back to an unused candidate.
    pub fn pick(&self, already_tried: &[&'static str]) -> &'static str {
        let pick = self.pick_raw();
        if !already_tried.contains(&pick) {
            return pick;
        }
        let unused: Vec<&'static str> = self
            .candidates
            .iter()
            .copied()
            .filter(|c| !already_tried.contains(c))
            .collect();
        if unused.is_empty() {
            return pick;
        }
        let mut rng = self.rng.lock();
        unused[rng.gen_range(0..unused.len())]
    }

    fn pick_raw(&self) -> &'static str {
        let mut rng = self.rng.lock();
        if self.candidates.len() == 1 {
            return self.candidates[0];
        }
        if rng.gen_range(0.0..1.0) < EPSILON_EXPLORE {
            return self.candidates[rng.gen_range(0..self.candidates.len())];
        }

        match &self.arms {
            ArmTable::Uniform => self.candidates[rng.gen_range(0..self.candidates.len())],
            ArmTable::Bandit(arms) => {
                let arms = arms.lock();
                let mut best = self.candidates[0];
                let mut best_sample = f64::MIN;
                for &c in &self.candidates {
                    let arm = &arms[c];
                    let sample = sample_beta(&mut rng, arm.alpha, arm.beta);
                    if sample > best_sample {
                        best_sample = sample;
                        best = c;
                    }
                }
                best
            }
            ArmTable::Mop(arms) => {
                let arms = arms.lock();
                let total: f64 = self.candidates.iter().map(|c| arms[c].weight).sum();
                let mut target = rng.gen_range(0.0..total);
                let mut chosen = self.candidates[self.candidates.len() - 1];
                for &c in &self.candidates {
                    let w = arms[c].weight;
                    if target < w {
                        chosen = c;
                        break;
                    }
                    target -= w;
                }
                chosen
            }
        }
    }

    pub fn record_evaluation(&self, feedback: &EvaluationFeedback) {
        match &self.arms {
            ArmTable::Uniform => {}
            ArmTable::Bandit(arms) => {
                let mut arms = arms.lock();
                if let Some(arm) = arms.get_mut(feedback.mutator) {
                    match feedback.outcome {
                        EvaluationOutcome::Bug => arm.alpha += 3.0,
                        EvaluationOutcome::Improved => arm.alpha += 1.0,
                        EvaluationOutcome::NoImprovement
                        | EvaluationOutcome::Failure
                        | EvaluationOutcome::Timeout => arm.beta += 1.0,
                    }
                }
            }
            ArmTable::Mop(arms) => {
                let mut arms = arms.lock();
                if let Some(arm) = arms.get_mut(feedback.mutator) {
                    let ratio = {
                        let delta_norm =
                            positive_delta_norm(&feedback.parent_counts, &feedback.child_counts);
                        let child_norm = vector_norm(&feedback.child_counts);
                        if child_norm <= 0.0 {
                            0.0
                        } else {
                            delta_norm / child_norm
                        }
                    };
                    arm.weight = (arm.weight * (1.0 + ratio)).clamp(1e-6, 1e6);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bandit_update_matches_reference_sequence() {
        let scheduler = MutatorScheduler::bandit(vec!["M1"], 42);
        let feedbacks = [
            EvaluationOutcome::Improved,
            EvaluationOutcome::NoImprovement,
            EvaluationOutcome::Bug,
        ];
        for outcome in feedbacks {
            scheduler.record_evaluation(&EvaluationFeedback {
                mutator: "M1",
                outcome,
                parent_counts: [0; F],
                child_counts: [0; F],
            });
        }
        if let ArmTable::Bandit(arms) = &scheduler.arms {
            let arms = arms.lock();
            let arm = &arms["M1"];
            assert_eq!(arm.alpha, 5.0);
            assert_eq!(arm.beta, 2.0);
        } else {
            panic!("expected bandit arms");
        }
    }

    #[test]
    fn mop_weight_increases_with_positive_delta() {
        let scheduler = MutatorScheduler::mop(vec!["M1"], 7);
        let mut parent = [0i64; F];
        let mut child = [0i64; F];
        parent[1] = 1;
        child[1] = 10;
        scheduler.record_evaluation(&EvaluationFeedback {
            mutator: "M1",
            outcome: EvaluationOutcome::Improved,
            parent_counts: parent,
            child_counts: child,
        });
        if let ArmTable::Mop(arms) = &scheduler.arms {
            let arms = arms.lock();
            assert!(arms["M1"].weight > 1.0);
        } else {
            panic!("expected mop arms");
        }
    }

    #[test]
    fn fallback_avoids_already_tried_candidate() {
        let scheduler = MutatorScheduler::uniform(vec!["A", "B"], 1);
        for _ in 0..20 {
            let picked = scheduler.pick(&["A"]);
            assert_eq!(picked, "B");
        }
    }
}
