//! Tunable constants of the two-phase search.

use serde::{Deserialize, Serialize};

use cs_types::{validation_error, CsResult};

/// Algorithm settings shared by the sampler and the optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Candidates generated per coarse step.
    pub step_batch_size: usize,

    /// Candidates generated per single-variable fine-tune step.
    pub finetune_batch_size: usize,

    /// Perturbation scale the annealing schedule shrinks toward.
    pub floor_std: f64,

    /// Upper bound on fine-tune rounds.
    pub finetune_max_rounds: usize,

    /// Decimal places kept on sampled continuous values.
    pub decimals: u32,

    /// Seed for a reproducible run; OS entropy when `None`.
    pub seed: Option<u64>,

    /// Evaluate batch members on the rayon pool.
    pub parallel: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            step_batch_size: 50,
            finetune_batch_size: 500,
            floor_std: 0.01,
            finetune_max_rounds: 10,
            decimals: 2,
            seed: None,
            parallel: true,
        }
    }
}

impl ScanSettings {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_batch_sizes(mut self, step: usize, finetune: usize) -> Self {
        self.step_batch_size = step;
        self.finetune_batch_size = finetune;
        self
    }

    pub fn with_floor_std(mut self, floor_std: f64) -> Self {
        self.floor_std = floor_std;
        self
    }

    pub fn with_finetune_max_rounds(mut self, rounds: usize) -> Self {
        self.finetune_max_rounds = rounds;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Annealing scale for a step: `floor_std * max_steps / (step + 1)`.
    ///
    /// Depends only on the index, never on observed loss.
    pub fn annealing_std(&self, max_steps: usize, step_index: usize) -> f64 {
        self.floor_std * (max_steps as f64 / (step_index as f64 + 1.0))
    }

    pub fn validate(&self) -> CsResult<()> {
        if self.step_batch_size == 0 || self.finetune_batch_size == 0 {
            return Err(validation_error!("batch sizes must be at least 1"));
        }
        if !self.floor_std.is_finite() || self.floor_std <= 0.0 {
            return Err(validation_error!(
                "floor std must be positive and finite, got {}",
                self.floor_std
            ));
        }
        if self.finetune_max_rounds == 0 {
            return Err(validation_error!("fine-tune rounds must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_constants() {
        let s = ScanSettings::default();
        assert_eq!(s.step_batch_size, 50);
        assert_eq!(s.finetune_batch_size, 500);
        assert_eq!(s.floor_std, 0.01);
        assert_eq!(s.finetune_max_rounds, 10);
        assert_eq!(s.decimals, 2);
        s.validate().unwrap();
    }

    #[test]
    fn annealing_is_strictly_decreasing() {
        let s = ScanSettings::default();
        let max_steps = 1000;
        for step in 0..max_steps - 1 {
            assert!(s.annealing_std(max_steps, step) > s.annealing_std(max_steps, step + 1));
        }
        assert!((s.annealing_std(max_steps, 0) - 10.0).abs() < 1e-12);
        assert!((s.annealing_std(max_steps, max_steps - 1) - s.floor_std).abs() < 1e-12);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert!(ScanSettings::default().with_batch_sizes(0, 10).validate().is_err());
        assert!(ScanSettings::default().with_floor_std(0.0).validate().is_err());
        assert!(ScanSettings::default().with_floor_std(f64::NAN).validate().is_err());
        assert!(ScanSettings::default()
            .with_finetune_max_rounds(0)
            .validate()
            .is_err());
    }

    #[test]
    fn settings_round_trip_through_json() {
        let s = ScanSettings::default().with_seed(7).with_parallel(false);
        let json = serde_json::to_string(&s).unwrap();
        let back: ScanSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }
}
