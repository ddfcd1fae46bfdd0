//! # cs-scan
//!
//! Composition search against opaque property oracles.
//!
//! A scan starts from a validated [`SearchSpace`](cs_types::SearchSpace) and an
//! [`OracleSet`], runs a coarse phase that perturbs every variable with an
//! annealed scale, then fine-tunes one variable at a time until a round stops
//! improving. Progress and the final [`ScanReport`] are streamed as
//! [`ScanEvent`]s. The same oracles can also score raw feature rows through
//! [`LossEvaluator::predict_rows`].

mod control;
mod loss;
mod optimizer;
mod oracle;
mod report;
mod sampler;
mod settings;

pub use control::{CancellationToken, RunGuard, RunState, ScanSlot};
pub use loss::{
    linear_loss, percentage_deviation, LossEvaluator, MetricPrediction, PREDICTION_DECIMALS,
};
pub use optimizer::Optimizer;
pub use oracle::{FnOracle, LinearOracle, Oracle, OracleSet};
pub use report::{ProgressEvent, RowPrediction, ScanEvent, ScanId, ScanPhase, ScanReport};
pub use sampler::{round_to, select_best, truncated_normal, Sampler, StepTarget};
pub use settings::ScanSettings;
