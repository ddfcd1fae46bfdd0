//! Two-phase search driver: coarse annealed search, then coordinate-wise
//! fine-tuning until a round stops improving.
//!
//! Only strictly better candidates are ever adopted. The sampling scale
//! anneals; the acceptance rule does not.

use chrono::Utc;
use crossbeam_channel::Sender;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cs_types::{Candidate, CsError, CsResult, Domains, SearchSpace};

use crate::control::CancellationToken;
use crate::loss::LossEvaluator;
use crate::oracle::OracleSet;
use crate::report::{ProgressEvent, ScanEvent, ScanId, ScanPhase, ScanReport};
use crate::sampler::{Sampler, StepTarget};
use crate::settings::ScanSettings;

/// Best candidate so far. Replaced as a whole, never edited in place.
#[derive(Debug, Clone)]
struct Incumbent {
    candidate: Candidate,
    loss: f64,
}

/// Drives one search space against one oracle set.
pub struct Optimizer {
    space: SearchSpace,
    domains: Arc<Domains>,
    settings: ScanSettings,
    evaluator: LossEvaluator,
    sampler: Sampler,
    events: Option<Sender<ScanEvent>>,
    cancel: CancellationToken,
}

impl Optimizer {
    /// Validate the space, the settings and oracle coverage up front.
    pub fn new(
        space: SearchSpace,
        oracles: Arc<OracleSet>,
        settings: ScanSettings,
    ) -> CsResult<Self> {
        space.validate()?;
        settings.validate()?;
        let evaluator = LossEvaluator::new(&space, oracles)?;
        let sampler = Sampler::new(settings.clone(), space.max_steps());
        let domains = Arc::new(space.domains().clone());

        Ok(Self {
            space,
            domains,
            settings,
            evaluator,
            sampler,
            events: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Send progress and the final report to `tx`.
    pub fn with_events(mut self, tx: Sender<ScanEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Run the full search and report the best candidate found.
    ///
    /// Oracle failures abort the run. A cancelled run still reports its
    /// incumbent, unless no coarse step had completed yet.
    pub fn run(&mut self) -> CsResult<ScanReport> {
        let scan_id = Uuid::new_v4();
        let started_at = Utc::now();
        let policy = self.evaluator.policy();
        let max_steps = self.space.max_steps();
        info!(%scan_id, mode = %self.space.mode(), max_steps, "starting composition scan");

        let initial = Candidate::initial(Arc::clone(&self.domains))?;
        let mut incumbent: Option<Incumbent> = None;
        let mut cancelled = false;
        let mut coarse_steps = 0;

        for step in 0..max_steps {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let base = incumbent.as_ref().map_or(&initial, |i| &i.candidate);
            let (loss, candidate) =
                self.sampler
                    .step(base, step, StepTarget::All, &self.evaluator)?;
            coarse_steps += 1;

            if incumbent.as_ref().map_or(true, |i| loss < i.loss) {
                incumbent = Some(Incumbent { candidate, loss });
                info!("[Step {step}] Best {policy} Loss = {loss:.6}");
                self.emit_progress(scan_id, ScanPhase::Coarse, step, loss);
            }
        }

        let Some(mut best) = incumbent else {
            warn!(%scan_id, "scan cancelled before the first step");
            return Err(CsError::Cancelled);
        };

        let mut finetune_rounds = 0;
        if !cancelled {
            debug!(%scan_id, loss = best.loss, "entering fine-tune phase");
            let targets = self
                .domains
                .variable_names()
                .map(|name| StepTarget::resolve(&self.domains, name))
                .collect::<CsResult<Vec<_>>>()?;
            (best, finetune_rounds, cancelled) = self.fine_tune(scan_id, best, &targets)?;
        }

        if cancelled {
            warn!(%scan_id, coarse_steps, finetune_rounds, "scan cancelled, reporting incumbent");
        }

        let predictions = self.evaluator.predict_metrics(&best.candidate)?;
        let report = ScanReport {
            id: scan_id,
            mode: self.space.mode(),
            loss_policy: policy,
            best: best.candidate,
            best_loss: best.loss,
            predictions,
            coarse_steps,
            finetune_rounds,
            cancelled,
            started_at,
            finished_at: Utc::now(),
        };

        info!(%scan_id, loss = report.best_loss, "==========Scan Finished==========");
        self.emit(ScanEvent::Finished(Box::new(report.clone())));
        Ok(report)
    }

    /// Returns the new incumbent, the number of completed rounds and whether
    /// cancellation interrupted the phase.
    fn fine_tune(
        &mut self,
        scan_id: ScanId,
        mut best: Incumbent,
        targets: &[StepTarget],
    ) -> CsResult<(Incumbent, usize, bool)> {
        let mut rounds = 0;

        for round in 0..self.settings.finetune_max_rounds {
            let pre_round_loss = best.loss;

            for &target in targets {
                if self.cancel.is_cancelled() {
                    return Ok((best, rounds, true));
                }
                let (loss, candidate) =
                    self.sampler
                        .step(&best.candidate, round, target, &self.evaluator)?;
                if loss < best.loss {
                    best = Incumbent { candidate, loss };
                }
            }
            rounds += 1;

            if best.loss < pre_round_loss {
                info!("[Finetune] Best {} Loss = {:.6}", self.evaluator.policy(), best.loss);
                self.emit_progress(scan_id, ScanPhase::FineTune, round, best.loss);
            } else {
                debug!(%scan_id, round, "fine-tune round made no improvement, stopping");
                break;
            }
        }

        Ok((best, rounds, false))
    }

    fn emit_progress(&self, scan_id: ScanId, phase: ScanPhase, index: usize, loss: f64) {
        self.emit(ScanEvent::Progress(ProgressEvent {
            scan_id,
            phase,
            index,
            loss,
        }));
    }

    fn emit(&self, event: ScanEvent) {
        // Best-effort send; a dropped receiver does not fail the run.
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::FnOracle;
    use crossbeam_channel::unbounded;
    use cs_types::{Metric, SearchSpace};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// One categorical {1}, Mg% in [4, 5.5], every other element fixed at 0.
    fn scenario_space(max_steps: usize) -> SearchSpace {
        let domains = Domains::new()
            .add_categorical("temper", vec![1.0])
            .add_continuous("Mg%", 4.0, 5.5)
            .add_absent(&["Cu%", "Zn%", "Zr%"]);
        SearchSpace::dos(10.0, domains, max_steps).unwrap()
    }

    /// Predicts twice the Mg% content (feature index 2).
    fn doubling_oracle() -> Arc<OracleSet> {
        Arc::new(OracleSet::new().with(Metric::Dos, FnOracle::new(|x: &[f64]| x[2] * 2.0)))
    }

    fn split(events: impl IntoIterator<Item = ScanEvent>) -> (Vec<ProgressEvent>, Vec<ScanReport>) {
        let mut progress = Vec::new();
        let mut finished = Vec::new();
        for event in events {
            match event {
                ScanEvent::Progress(p) => progress.push(p),
                ScanEvent::Finished(r) => finished.push(*r),
            }
        }
        (progress, finished)
    }

    #[test]
    fn converges_to_domain_constrained_optimum() {
        let (tx, rx) = unbounded();
        let settings = ScanSettings::default().with_seed(42);
        let mut optimizer = Optimizer::new(scenario_space(5), doubling_oracle(), settings)
            .unwrap()
            .with_events(tx);

        let report = optimizer.run().unwrap();

        assert!(!report.cancelled);
        assert_eq!(report.coarse_steps, 5);
        assert_eq!(report.best_loss, 0.0);
        assert_eq!(report.best.continuous("Mg%"), Some(5.0));
        assert_eq!(report.best.remainder(), 95.0);
        assert!(report.finetune_rounds >= 1 && report.finetune_rounds <= 2);
        assert_eq!(report.predictions.len(), 1);
        assert_eq!(report.predictions[0].value, 10.0);

        let (progress, finished) = split(rx.try_iter());
        assert_eq!(finished.len(), 1);
        assert_eq!(progress[0].phase, ScanPhase::Coarse);
        assert_eq!(progress[0].index, 0);
    }

    #[test]
    fn fine_tune_stops_after_first_round_when_coarse_is_optimal() {
        // 50 coarse steps narrow onto Mg% = 5.00 for any seed
        let (tx, rx) = unbounded();
        let settings = ScanSettings::default().with_seed(42);
        let mut optimizer = Optimizer::new(scenario_space(50), doubling_oracle(), settings)
            .unwrap()
            .with_events(tx);

        let report = optimizer.run().unwrap();

        let (progress, _) = split(rx.try_iter());
        assert!(progress.iter().all(|p| p.phase == ScanPhase::Coarse));
        assert_eq!(progress.last().map(|p| p.loss), Some(0.0));
        assert_eq!(report.best_loss, 0.0);
        assert_eq!(report.finetune_rounds, 1);
        assert_eq!(report.best.continuous("Mg%"), Some(5.0));
    }

    #[test]
    fn progress_is_ordered_and_strictly_improving() {
        let (tx, rx) = unbounded();
        let settings = ScanSettings::default().with_seed(7);
        let mut optimizer = Optimizer::new(scenario_space(30), doubling_oracle(), settings)
            .unwrap()
            .with_events(tx);
        optimizer.run().unwrap();

        let events: Vec<ScanEvent> = rx.try_iter().collect();
        assert!(matches!(events.last(), Some(ScanEvent::Finished(_))));

        let (progress, _) = split(events);
        for pair in progress.windows(2) {
            assert!(pair[1].loss < pair[0].loss);
            if pair[0].phase == pair[1].phase {
                assert!(pair[1].index > pair[0].index);
            }
        }
    }

    #[test]
    fn mechanical_targets_hit_exactly_give_zero_loss() {
        let mut space = SearchSpace::mechanical_preset();
        if let SearchSpace::Mechanical(s) = &mut space {
            s.max_steps = 3;
        }
        let oracles = OracleSet::new()
            .with(Metric::Elongation, FnOracle::new(|_: &[f64]| 6.0))
            .with(Metric::TensileStrength, FnOracle::new(|_: &[f64]| 300.0))
            .with(Metric::YieldStrength, FnOracle::new(|_: &[f64]| 250.0));
        let (tx, rx) = unbounded();
        let mut optimizer = Optimizer::new(space, Arc::new(oracles), ScanSettings::default())
            .unwrap()
            .with_events(tx);

        let report = optimizer.run().unwrap();
        assert_eq!(report.best_loss, 0.0);
        // no round can beat a zero loss
        assert_eq!(report.finetune_rounds, 1);
        assert_eq!(report.predictions.len(), 3);

        let (progress, _) = split(rx.try_iter());
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].phase, ScanPhase::Coarse);
        assert_eq!(progress[0].index, 0);
    }

    #[test]
    fn fine_tune_stops_at_round_cap_while_improving() {
        // every call predicts lower than all earlier calls
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let oracles = OracleSet::new().with(
            Metric::Dos,
            FnOracle::new(move |_: &[f64]| 1e9 - counter.fetch_add(1, Ordering::SeqCst) as f64),
        );
        let settings = ScanSettings::default()
            .with_seed(1)
            .with_batch_sizes(4, 4)
            .with_finetune_max_rounds(3);
        let (tx, rx) = unbounded();
        let mut optimizer = Optimizer::new(scenario_space(6), Arc::new(oracles), settings)
            .unwrap()
            .with_events(tx);

        let report = optimizer.run().unwrap();
        assert_eq!(report.finetune_rounds, 3);

        let (progress, _) = split(rx.try_iter());
        let coarse = progress.iter().filter(|p| p.phase == ScanPhase::Coarse).count();
        let fine: Vec<usize> = progress
            .iter()
            .filter(|p| p.phase == ScanPhase::FineTune)
            .map(|p| p.index)
            .collect();
        assert_eq!(coarse, 6);
        assert_eq!(fine, vec![0, 1, 2]);
        // 6 coarse batches, 3 rounds over 5 variables, 1 report prediction
        assert_eq!(calls.load(Ordering::SeqCst), 6 * 4 + 3 * 5 * 4 + 1);
    }

    #[test]
    fn cancellation_before_start_is_an_error() {
        let mut optimizer =
            Optimizer::new(scenario_space(5), doubling_oracle(), ScanSettings::default()).unwrap();
        optimizer.cancellation_token().cancel();
        assert!(matches!(optimizer.run(), Err(CsError::Cancelled)));
    }

    #[test]
    fn cancellation_mid_run_reports_incumbent() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let oracles = OracleSet::new().with(
            Metric::Dos,
            FnOracle::new(move |x: &[f64]| {
                if counter.fetch_add(1, Ordering::SeqCst) >= 100 {
                    trigger.cancel();
                }
                x[2] * 2.0
            }),
        );
        let settings = ScanSettings::default().with_seed(3).with_batch_sizes(10, 10);
        let mut optimizer = Optimizer::new(scenario_space(1000), Arc::new(oracles), settings)
            .unwrap()
            .with_cancellation(token);

        let report = optimizer.run().unwrap();
        assert!(report.cancelled);
        assert!(report.coarse_steps < 1000);
        assert_eq!(report.finetune_rounds, 0);
        let mg = report.best.continuous("Mg%").unwrap();
        assert!((4.0..=5.5).contains(&mg));
    }

    #[test]
    fn oracle_failure_aborts_the_run() {
        let oracles = OracleSet::new().with(Metric::Dos, FnOracle::new(|_: &[f64]| f64::NAN));
        let mut optimizer =
            Optimizer::new(scenario_space(5), Arc::new(oracles), ScanSettings::default()).unwrap();
        assert!(matches!(optimizer.run(), Err(CsError::Oracle { .. })));
    }

    #[test]
    fn construction_validates_inputs() {
        let bad_settings = ScanSettings::default().with_batch_sizes(0, 1);
        assert!(Optimizer::new(scenario_space(5), doubling_oracle(), bad_settings).is_err());

        let no_oracles = Arc::new(OracleSet::new());
        assert!(Optimizer::new(scenario_space(5), no_oracles, ScanSettings::default()).is_err());

        let mut space = scenario_space(5);
        if let SearchSpace::Dos(s) = &mut space {
            s.max_steps = 0;
        }
        assert!(Optimizer::new(space, doubling_oracle(), ScanSettings::default()).is_err());
    }

    #[test]
    fn sequential_runs_reuse_the_optimizer() {
        let settings = ScanSettings::default().with_seed(5).with_parallel(false);
        let mut optimizer = Optimizer::new(scenario_space(5), doubling_oracle(), settings).unwrap();
        let first = optimizer.run().unwrap();
        let second = optimizer.run().unwrap();
        assert_ne!(first.id, second.id);
        assert!(second.best_loss <= 0.5);
    }
}
