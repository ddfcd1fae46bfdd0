//! Reduction of oracle predictions to a single scalar loss.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use cs_types::{validation_error, Candidate, CsResult, LossPolicy, Metric, SearchSpace};

use crate::oracle::OracleSet;
use crate::report::RowPrediction;
use crate::sampler::round_to;

/// Decimal places kept on row predictions.
pub const PREDICTION_DECIMALS: u32 = 2;

/// One predicted metric, recomputed for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPrediction {
    pub metric: Metric,
    pub value: f64,
    /// Target value when the metric enters the loss.
    pub target: Option<f64>,
}

/// Scores candidates against the oracles of one search space.
///
/// The policy and targets are resolved once at construction and stay fixed
/// for the whole run.
#[derive(Debug, Clone)]
pub struct LossEvaluator {
    policy: LossPolicy,
    targets: Vec<(Metric, f64)>,
    reported: &'static [Metric],
    feature_len: usize,
    oracles: Arc<OracleSet>,
}

impl LossEvaluator {
    pub fn new(space: &SearchSpace, oracles: Arc<OracleSet>) -> CsResult<Self> {
        oracles.check_covers(space)?;
        Ok(Self {
            policy: space.loss_policy(),
            targets: space.targets(),
            reported: space.reported_metrics(),
            feature_len: space.domains().feature_len(),
            oracles,
        })
    }

    pub fn policy(&self) -> LossPolicy {
        self.policy
    }

    /// Non-negative loss; lower is better.
    pub fn evaluate(&self, candidate: &Candidate) -> CsResult<f64> {
        match self.policy {
            LossPolicy::Linear => {
                let (metric, target) = self.targets[0];
                let prediction = self.oracles.predict(metric, candidate)?;
                Ok(linear_loss(prediction, target))
            }
            LossPolicy::PercentageComposite => {
                let mut total = 0.0;
                for &(metric, target) in &self.targets {
                    let prediction = self.oracles.predict(metric, candidate)?;
                    total += percentage_deviation(prediction, target);
                }
                Ok(total / self.targets.len() as f64)
            }
        }
    }

    /// Fresh predictions for every reported metric that has an oracle.
    pub fn predict_metrics(&self, candidate: &Candidate) -> CsResult<Vec<MetricPrediction>> {
        let metrics = self.available_metrics();
        self.predict_reported(&metrics, &candidate.feature_vector(), None)
    }

    /// Predict the reported metrics for raw feature rows laid out like
    /// [`Candidate::feature_vector`]. Values are rounded to
    /// [`PREDICTION_DECIMALS`] places.
    ///
    /// Any row of the wrong length or with a non-finite feature fails the
    /// whole batch.
    pub fn predict_rows(&self, rows: &[Vec<f64>]) -> CsResult<Vec<RowPrediction>> {
        for (i, row) in rows.iter().enumerate() {
            if row.len() != self.feature_len {
                return Err(validation_error!(
                    "row {i} has {} features, expected {}",
                    row.len(),
                    self.feature_len
                ));
            }
            if let Some(bad) = row.iter().find(|v| !v.is_finite()) {
                return Err(validation_error!("row {i} has non-finite feature {bad}"));
            }
        }

        let metrics = self.available_metrics();
        let predictions = rows
            .par_iter()
            .enumerate()
            .map(|(row, features)| {
                self.predict_reported(&metrics, features, Some(PREDICTION_DECIMALS))
                    .map(|predictions| RowPrediction { row, predictions })
            })
            .collect::<CsResult<Vec<_>>>()?;
        info!(rows = predictions.len(), "predicted feature rows");
        Ok(predictions)
    }

    fn available_metrics(&self) -> Vec<Metric> {
        self.reported
            .iter()
            .copied()
            .filter(|&metric| {
                let known = self.oracles.contains(metric);
                if !known {
                    warn!(%metric, "no oracle configured, metric left out of the report");
                }
                known
            })
            .collect()
    }

    fn predict_reported(
        &self,
        metrics: &[Metric],
        features: &[f64],
        decimals: Option<u32>,
    ) -> CsResult<Vec<MetricPrediction>> {
        metrics
            .iter()
            .map(|&metric| {
                let value = self.oracles.predict_features(metric, features)?;
                let target = self
                    .targets
                    .iter()
                    .find(|(m, _)| *m == metric)
                    .map(|(_, t)| *t);
                Ok(MetricPrediction {
                    metric,
                    value: decimals.map_or(value, |d| round_to(value, d)),
                    target,
                })
            })
            .collect()
    }
}

pub fn linear_loss(prediction: f64, target: f64) -> f64 {
    (prediction - target).abs()
}

/// `|prediction / target - 1| * 100`.
pub fn percentage_deviation(prediction: f64, target: f64) -> f64 {
    ((prediction / target) - 1.0).abs() * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{FnOracle, LinearOracle};
    use cs_types::{CsError, Domains};

    fn mechanical_candidate() -> Candidate {
        let domains = SearchSpace::mechanical_preset().domains().clone();
        Candidate::initial(Arc::new(domains)).unwrap()
    }

    #[test]
    fn linear_loss_is_absolute_difference() {
        let space = SearchSpace::dos(
            10.0,
            Domains::new()
                .add_categorical("temper", vec![1.0])
                .add_continuous("Mg%", 4.0, 5.5),
            5,
        )
        .unwrap();
        let oracles = OracleSet::new().with(Metric::Dos, FnOracle::new(|x: &[f64]| x[2] * 2.0));
        let evaluator = LossEvaluator::new(&space, Arc::new(oracles)).unwrap();

        let c = Candidate::initial(Arc::new(space.domains().clone())).unwrap();
        // Mg% starts at the midpoint 4.75 -> prediction 9.5
        assert!((evaluator.evaluate(&c).unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(evaluator.policy(), LossPolicy::Linear);
    }

    #[test]
    fn percentage_loss_is_zero_on_target() {
        let oracles = OracleSet::new()
            .with(Metric::Elongation, FnOracle::new(|_: &[f64]| 6.0))
            .with(Metric::YieldStrength, FnOracle::new(|_: &[f64]| 250.0));
        let evaluator =
            LossEvaluator::new(&SearchSpace::mechanical_preset(), Arc::new(oracles)).unwrap();

        assert_eq!(evaluator.evaluate(&mechanical_candidate()).unwrap(), 0.0);
    }

    #[test]
    fn percentage_loss_averages_both_deviations() {
        // elongation 10% high, yield 30% low -> mean 20%
        let oracles = OracleSet::new()
            .with(Metric::Elongation, FnOracle::new(|_: &[f64]| 6.6))
            .with(Metric::YieldStrength, FnOracle::new(|_: &[f64]| 175.0));
        let evaluator =
            LossEvaluator::new(&SearchSpace::mechanical_preset(), Arc::new(oracles)).unwrap();

        let loss = evaluator.evaluate(&mechanical_candidate()).unwrap();
        assert!((loss - 20.0).abs() < 1e-9, "loss was {loss}");
    }

    #[test]
    fn evaluator_requires_loss_oracles() {
        let oracles = OracleSet::new().with(Metric::Elongation, FnOracle::new(|_: &[f64]| 6.0));
        assert!(LossEvaluator::new(&SearchSpace::mechanical_preset(), Arc::new(oracles)).is_err());
    }

    #[test]
    fn report_includes_tensile_when_available() {
        let oracles = OracleSet::new()
            .with(Metric::Elongation, FnOracle::new(|_: &[f64]| 6.0))
            .with(Metric::TensileStrength, FnOracle::new(|_: &[f64]| 310.0))
            .with(Metric::YieldStrength, FnOracle::new(|_: &[f64]| 250.0));
        let evaluator =
            LossEvaluator::new(&SearchSpace::mechanical_preset(), Arc::new(oracles)).unwrap();

        let predictions = evaluator.predict_metrics(&mechanical_candidate()).unwrap();
        assert_eq!(predictions.len(), 3);
        assert_eq!(predictions[1].metric, Metric::TensileStrength);
        assert_eq!(predictions[1].value, 310.0);
        assert_eq!(predictions[1].target, None);
        assert_eq!(predictions[2].target, Some(250.0));
    }

    #[test]
    fn report_skips_metrics_without_oracle() {
        let oracles = OracleSet::new()
            .with(Metric::Elongation, FnOracle::new(|_: &[f64]| 6.0))
            .with(Metric::YieldStrength, FnOracle::new(|_: &[f64]| 250.0));
        let evaluator =
            LossEvaluator::new(&SearchSpace::mechanical_preset(), Arc::new(oracles)).unwrap();

        let predictions = evaluator.predict_metrics(&mechanical_candidate()).unwrap();
        let metrics: Vec<Metric> = predictions.iter().map(|p| p.metric).collect();
        assert_eq!(metrics, vec![Metric::Elongation, Metric::YieldStrength]);
    }

    #[test]
    fn predicts_dos_rows_rounded() {
        let space = SearchSpace::dos_preset();
        // DoS = Mg% / 3, Mg% sits at feature index 12
        let oracles = OracleSet::new().with(Metric::Dos, FnOracle::new(|x: &[f64]| x[12] / 3.0));
        let evaluator = LossEvaluator::new(&space, Arc::new(oracles)).unwrap();

        let mut first = vec![0.0; 21];
        first[12] = 5.0;
        let mut second = vec![0.0; 21];
        second[12] = 4.0;
        let rows = evaluator.predict_rows(&[first, second]).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row, 0);
        assert_eq!(rows[0].value(Metric::Dos), Some(1.67));
        assert_eq!(rows[1].row, 1);
        assert_eq!(rows[1].value(Metric::Dos), Some(1.33));
        assert_eq!(rows[0].to_string(), "0: DoS=1.67");
    }

    #[test]
    fn predicts_all_mechanical_metrics_per_row() {
        let oracles = OracleSet::new()
            .with(Metric::Elongation, FnOracle::new(|x: &[f64]| x[0] + 0.123))
            .with(Metric::TensileStrength, FnOracle::new(|_: &[f64]| 310.0))
            .with(Metric::YieldStrength, FnOracle::new(|x: &[f64]| x[1] * 2.5));
        let evaluator =
            LossEvaluator::new(&SearchSpace::mechanical_preset(), Arc::new(oracles)).unwrap();

        let mut row = vec![0.0; 26];
        row[0] = 6.0;
        row[1] = 100.0;
        let rows = evaluator.predict_rows(&[row]).unwrap();

        let metrics: Vec<Metric> = rows[0].predictions.iter().map(|p| p.metric).collect();
        assert_eq!(
            metrics,
            vec![Metric::Elongation, Metric::TensileStrength, Metric::YieldStrength]
        );
        assert_eq!(rows[0].value(Metric::Elongation), Some(6.12));
        assert_eq!(rows[0].value(Metric::TensileStrength), Some(310.0));
        assert_eq!(rows[0].value(Metric::YieldStrength), Some(250.0));
    }

    #[test]
    fn row_of_wrong_length_is_rejected() {
        let oracles = OracleSet::new().with(Metric::Dos, FnOracle::new(|_: &[f64]| 1.0));
        let evaluator = LossEvaluator::new(&SearchSpace::dos_preset(), Arc::new(oracles)).unwrap();

        let err = evaluator
            .predict_rows(&[vec![0.0; 21], vec![0.0; 26]])
            .unwrap_err();
        match err {
            CsError::Validation(message) => {
                assert!(message.contains("row 1"), "{message}");
                assert!(message.contains("21"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(evaluator.predict_rows(&[vec![f64::NAN; 21]]).is_err());
    }

    #[test]
    fn row_oracle_failures_propagate() {
        let oracles = OracleSet::new()
            .with(Metric::Dos, LinearOracle::new(vec![1.0; 20], 0.0));
        let evaluator = LossEvaluator::new(&SearchSpace::dos_preset(), Arc::new(oracles)).unwrap();
        assert!(matches!(
            evaluator.predict_rows(&[vec![0.0; 21]]),
            Err(CsError::Oracle { .. })
        ));
        assert!(evaluator.predict_rows(&[]).unwrap().is_empty());
    }
}
