//! Batch generation around an incumbent with an annealed perturbation scale.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use tracing::{debug, warn};

use cs_types::{
    Candidate, ContinuousDomain, CsError, CsResult, Domains, VariableRef, ALL_VARIABLES,
};

use crate::loss::LossEvaluator;
use crate::settings::ScanSettings;

/// Draws attempted before truncated sampling falls back to a uniform draw.
const MAX_REJECTIONS: usize = 1000;

/// Which variables a sampler step perturbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepTarget {
    /// Every variable (coarse phase).
    All,
    /// Exactly one variable (fine-tune phase).
    Variable(VariableRef),
}

impl StepTarget {
    /// Resolve `"all"` or a declared variable name.
    pub fn resolve(domains: &Domains, name: &str) -> CsResult<Self> {
        if name == ALL_VARIABLES {
            return Ok(Self::All);
        }
        domains
            .find(name)
            .map(Self::Variable)
            .ok_or_else(|| CsError::UnknownVariable(name.to_string()))
    }

    fn covers(&self, var: VariableRef) -> bool {
        match self {
            Self::All => true,
            Self::Variable(v) => *v == var,
        }
    }
}

/// Generates perturbed batches and picks the lowest-loss member.
#[derive(Debug, Clone)]
pub struct Sampler {
    settings: ScanSettings,
    max_steps: usize,
    rng: ChaCha8Rng,
}

impl Sampler {
    /// `max_steps` is the coarse-phase budget; it scales the annealing
    /// schedule in both phases.
    pub fn new(settings: ScanSettings, max_steps: usize) -> Self {
        let rng = match settings.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            settings,
            max_steps,
            rng,
        }
    }

    pub fn batch_size(&self, target: StepTarget) -> usize {
        match target {
            StepTarget::All => self.settings.step_batch_size,
            StepTarget::Variable(_) => self.settings.finetune_batch_size,
        }
    }

    pub fn scale(&self, step_index: usize) -> f64 {
        self.settings.annealing_std(self.max_steps, step_index)
    }

    /// Generate one batch of independent copies of `base`, each perturbed on
    /// the variables selected by `target`.
    ///
    /// Every [`Candidate`] is built over validated domains, so each
    /// categorical domain has at least one option and every bound is ordered.
    pub fn propose(
        &mut self,
        base: &Candidate,
        step_index: usize,
        target: StepTarget,
    ) -> Vec<Candidate> {
        let std = self.scale(step_index);
        let decimals = self.settings.decimals;
        let domains = base.domains().clone();

        (0..self.batch_size(target))
            .map(|_| {
                let mut next = base.to_builder();
                for (i, domain) in domains.categorical.iter().enumerate() {
                    if target.covers(VariableRef::Categorical(i)) {
                        let pick = self.rng.gen_range(0..domain.values.len());
                        next.set_categorical(i, domain.values[pick]);
                    }
                }
                for (i, domain) in domains.continuous.iter().enumerate() {
                    if target.covers(VariableRef::Continuous(i)) {
                        let centre = base.continuous_values()[i];
                        let value = sample_continuous(&mut self.rng, domain, centre, std, decimals);
                        next.set_continuous(i, value);
                    }
                }
                next.build()
            })
            .collect()
    }

    /// Propose a batch, score it, and return the best member with its loss.
    pub fn step(
        &mut self,
        base: &Candidate,
        step_index: usize,
        target: StepTarget,
        evaluator: &LossEvaluator,
    ) -> CsResult<(f64, Candidate)> {
        let batch = self.propose(base, step_index, target);
        let losses: Vec<f64> = if self.settings.parallel {
            batch
                .par_iter()
                .map(|c| evaluator.evaluate(c))
                .collect::<CsResult<_>>()?
        } else {
            batch
                .iter()
                .map(|c| evaluator.evaluate(c))
                .collect::<CsResult<_>>()?
        };

        let (loss, best) = select_best(batch, &losses)
            .ok_or_else(|| cs_types::internal_error!("sampler produced an empty batch"))?;
        debug!(step_index, ?target, loss, "sampler step");
        Ok((loss, best))
    }
}

/// Lowest loss in the batch; ties go to the lowest index.
pub fn select_best(batch: Vec<Candidate>, losses: &[f64]) -> Option<(f64, Candidate)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &loss) in losses.iter().enumerate() {
        match best {
            Some((_, current)) if loss >= current => {}
            _ => best = Some((i, loss)),
        }
    }
    let (index, loss) = best?;
    batch.into_iter().nth(index).map(|c| (loss, c))
}

fn sample_continuous<R: Rng + ?Sized>(
    rng: &mut R,
    domain: &ContinuousDomain,
    centre: f64,
    std: f64,
    decimals: u32,
) -> f64 {
    if domain.is_fixed() {
        return domain.min;
    }
    let raw = truncated_normal(rng, centre, std, domain.min, domain.max);
    round_to(raw, decimals).clamp(domain.min, domain.max)
}

/// Draw from `N(mean, std)` restricted to `[min, max]` by rejection.
///
/// Requires `min < max` and `std > 0`.
pub fn truncated_normal<R: Rng + ?Sized>(
    rng: &mut R,
    mean: f64,
    std: f64,
    min: f64,
    max: f64,
) -> f64 {
    for _ in 0..MAX_REJECTIONS {
        let z: f64 = rng.sample(StandardNormal);
        let x = mean + std * z;
        if (min..=max).contains(&x) {
            return x;
        }
    }
    warn!(mean, std, min, max, "truncated normal rejected every draw, sampling uniformly");
    rng.gen_range(min..=max)
}

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
