//! Opaque property predictors and the per-metric oracle table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cs_types::{Candidate, CsError, CsResult, Metric, SearchSpace};

/// A predictive model mapping a feature vector to one scalar.
///
/// Implementations must accept the layout produced by
/// [`Candidate::feature_vector`] for the active mode.
pub trait Oracle: Send + Sync {
    fn predict(&self, features: &[f64]) -> CsResult<f64>;

    /// Expected feature-vector length, if the model knows it.
    fn input_dim(&self) -> Option<usize> {
        None
    }
}

/// Adapts a closure into an [`Oracle`].
pub struct FnOracle<F> {
    f: F,
    input_dim: Option<usize>,
}

impl<F> FnOracle<F>
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f, input_dim: None }
    }

    pub fn with_input_dim(mut self, dim: usize) -> Self {
        self.input_dim = Some(dim);
        self
    }
}

impl<F> Oracle for FnOracle<F>
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    fn predict(&self, features: &[f64]) -> CsResult<f64> {
        Ok((self.f)(features))
    }

    fn input_dim(&self) -> Option<usize> {
        self.input_dim
    }
}

/// Affine surrogate `bias + weights · x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearOracle {
    pub weights: Vec<f64>,
    #[serde(default)]
    pub bias: f64,
}

impl LinearOracle {
    pub fn new(weights: Vec<f64>, bias: f64) -> Self {
        Self { weights, bias }
    }
}

impl Oracle for LinearOracle {
    fn predict(&self, features: &[f64]) -> CsResult<f64> {
        Ok(self.bias
            + self
                .weights
                .iter()
                .zip(features)
                .map(|(w, x)| w * x)
                .sum::<f64>())
    }

    fn input_dim(&self) -> Option<usize> {
        Some(self.weights.len())
    }
}

/// Explicit metric-to-oracle table, built once by the host and handed to the
/// evaluator.
#[derive(Clone, Default)]
pub struct OracleSet {
    oracles: HashMap<Metric, Arc<dyn Oracle>>,
}

impl OracleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, metric: Metric, oracle: impl Oracle + 'static) -> Self {
        self.insert(metric, Arc::new(oracle));
        self
    }

    pub fn insert(&mut self, metric: Metric, oracle: Arc<dyn Oracle>) {
        self.oracles.insert(metric, oracle);
    }

    pub fn contains(&self, metric: Metric) -> bool {
        self.oracles.contains_key(&metric)
    }

    pub fn len(&self) -> usize {
        self.oracles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.oracles.is_empty()
    }

    /// Every metric entering the loss must have an oracle.
    pub fn check_covers(&self, space: &SearchSpace) -> CsResult<()> {
        for (metric, _) in space.targets() {
            if !self.contains(metric) {
                return Err(CsError::oracle(metric, "no oracle configured"));
            }
        }
        Ok(())
    }

    /// Predict `metric` for a candidate, with basic shape and sanity checks.
    pub fn predict(&self, metric: Metric, candidate: &Candidate) -> CsResult<f64> {
        self.predict_features(metric, &candidate.feature_vector())
    }

    /// Predict `metric` for a raw feature vector laid out like
    /// [`Candidate::feature_vector`].
    pub fn predict_features(&self, metric: Metric, features: &[f64]) -> CsResult<f64> {
        let oracle = self
            .oracles
            .get(&metric)
            .ok_or_else(|| CsError::oracle(metric, "no oracle configured"))?;

        if let Some(dim) = oracle.input_dim() {
            if dim != features.len() {
                return Err(CsError::oracle(
                    metric,
                    format!(
                        "oracle expects {dim} features, got {}",
                        features.len()
                    ),
                ));
            }
        }

        let prediction = oracle.predict(features).map_err(|e| match e {
            CsError::Oracle { .. } => e,
            other => CsError::oracle(metric, other.to_string()),
        })?;

        if !prediction.is_finite() {
            return Err(CsError::oracle(
                metric,
                format!("non-finite prediction {prediction}"),
            ));
        }
        Ok(prediction)
    }
}

impl fmt::Debug for OracleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut metrics: Vec<_> = self.oracles.keys().collect();
        metrics.sort();
        f.debug_struct("OracleSet").field("metrics", &metrics).finish()
    }
}
