//! Progress events and the final scan report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use uuid::Uuid;

use cs_types::{Candidate, LossPolicy, Metric, Mode};

use crate::loss::MetricPrediction;

/// Unique scan run identifier.
pub type ScanId = Uuid;

/// Search phase that produced a progress event. Completion is signalled by
/// [`ScanEvent::Finished`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanPhase {
    Coarse,
    FineTune,
}

/// Incumbent improvement notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub scan_id: ScanId,
    pub phase: ScanPhase,
    /// Coarse step index or fine-tune round index.
    pub index: usize,
    pub loss: f64,
}

/// Everything a scan emits, in order: zero or more progress events, then
/// exactly one `Finished`.
#[derive(Debug, Clone, Serialize)]
pub enum ScanEvent {
    Progress(ProgressEvent),
    Finished(Box<ScanReport>),
}

/// Result of a scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub id: ScanId,
    pub mode: Mode,
    pub loss_policy: LossPolicy,
    pub best: Candidate,
    pub best_loss: f64,
    /// Predictions recomputed for the best candidate.
    pub predictions: Vec<MetricPrediction>,
    pub coarse_steps: usize,
    pub finetune_rounds: usize,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ScanReport {
    pub fn duration_seconds(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }

    /// Human-readable result block.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        if self.cancelled {
            out.push_str("==========Scan Cancelled==========\n");
        } else {
            out.push_str("==========Scan Finished==========\n");
        }
        out.push_str(&self.best.describe());
        for p in &self.predictions {
            let _ = writeln!(out, "Results in a predicted {:.6} {}", p.value, p.metric);
        }
        let _ = writeln!(
            out,
            "Best {} loss {:.6} after {} steps and {} fine-tune rounds",
            self.loss_policy, self.best_loss, self.coarse_steps, self.finetune_rounds
        );
        out
    }
}

/// Predicted metrics for one input row, in the order the rows were given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowPrediction {
    pub row: usize,
    pub predictions: Vec<MetricPrediction>,
}

impl RowPrediction {
    pub fn value(&self, metric: Metric) -> Option<f64> {
        self.predictions
            .iter()
            .find(|p| p.metric == metric)
            .map(|p| p.value)
    }
}

impl fmt::Display for RowPrediction {
    /// `3: elongation%=6.5 tensile strength(MPa)=310 yield strength(MPa)=250`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.row)?;
        for p in &self.predictions {
            write!(f, " {}={}", p.metric, p.value)?;
        }
        Ok(())
    }
}
