//! Post-swap evaluation of the active model.

use std::path::Path;

use rand::Rng;

use super::store::PerformanceSnapshot;

/// Produces a performance snapshot for the artifact now in service.
pub trait ArtifactEvaluator: Send + Sync {
    fn evaluate(&self, artifact: &Path) -> PerformanceSnapshot;
}

/// Random perturbation around a fixed baseline. No real inference is run.
#[derive(Debug, Clone)]
pub struct SimulatedEvaluator {
    baseline: PerformanceSnapshot,
    jitter: f64,
}

impl SimulatedEvaluator {
    pub fn new(baseline: PerformanceSnapshot, jitter: f64) -> Self {
        Self {
            baseline,
            jitter: jitter.abs(),
        }
    }

    fn perturb(&self, rng: &mut impl Rng, value: f64) -> f64 {
        let offset = if self.jitter > 0.0 {
            rng.gen_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        let v = (value + offset).clamp(0.0, 1.0);
        (v * 10_000.0).round() / 10_000.0
    }
}

impl Default for SimulatedEvaluator {
    fn default() -> Self {
        Self::new(
            PerformanceSnapshot {
                accuracy: 0.95,
                recall: 0.93,
                f1_score: 0.94,
            },
            0.02,
        )
    }
}

impl ArtifactEvaluator for SimulatedEvaluator {
    fn evaluate(&self, _artifact: &Path) -> PerformanceSnapshot {
        let mut rng = rand::thread_rng();
        PerformanceSnapshot {
            accuracy: self.perturb(&mut rng, self.baseline.accuracy),
            recall: self.perturb(&mut rng, self.baseline.recall),
            f1_score: self.perturb(&mut rng, self.baseline.f1_score),
        }
    }
}
