use crossbeam_channel::unbounded;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use cs_scan::{CancellationToken, LossEvaluator, Optimizer, ScanEvent, ScanSlot};
use cs_service::ServiceConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServiceConfig::from_env()?;
    let space = config.load_space()?;
    let oracles = config.load_oracles()?;
    info!(mode = %space.mode(), oracles = oracles.len(), "composition scan service starting");

    if let Some(rows) = config.load_rows()? {
        let evaluator = LossEvaluator::new(&space, oracles)?;
        let predictions =
            tokio::task::spawn_blocking(move || evaluator.predict_rows(&rows)).await??;
        for row in &predictions {
            println!("{row}");
        }
        return Ok(());
    }

    let slot = ScanSlot::new();
    let guard = slot.try_acquire()?;

    let cancel = CancellationToken::new();
    let (tx, rx) = unbounded();
    let mut optimizer = Optimizer::new(space, oracles, config.settings())?
        .with_events(tx)
        .with_cancellation(cancel.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling scan");
            cancel.cancel();
        }
    });

    let progress = tokio::task::spawn_blocking(move || {
        for event in rx {
            if let ScanEvent::Progress(p) = event {
                debug!(scan_id = %p.scan_id, phase = ?p.phase, index = p.index, loss = p.loss, "progress event");
            }
        }
    });

    let report = tokio::task::spawn_blocking(move || optimizer.run()).await??;
    progress.await?;
    drop(guard);

    println!("{}", report.summary());
    Ok(())
}
