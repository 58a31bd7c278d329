//! Runs one sweep pass and exits. Meant to be triggered by cron or a scheduler.
//!
//! Usage: `sweep [settings-file]`
use anyhow::Context;
use order_workflow::config::Settings;
use order_workflow::flow::FlowRepository;
use order_workflow::order::TimeStamp;
use order_workflow::sinks::TracingSink;
use order_workflow::store::Store;
use order_workflow::sweeper::StaleOrderSweeper;
use order_workflow::telemetry;
use order_workflow::workflow::OrderWorkflow;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1);
    let settings = Settings::load(path.as_deref()).context("Failed to load settings")?;
    telemetry::init_tracing(&settings.logging)?;

    let store = Store::open(&settings.store.path)
        .with_context(|| format!("Failed to open store at {}", settings.store.path))?;

    let flows: Arc<dyn FlowRepository> = if settings.flows.is_empty() {
        Arc::new(store.clone())
    } else {
        Arc::new(settings.static_flows().context("Invalid flow configuration")?)
    };

    let workflow = Arc::new(OrderWorkflow::assemble(
        store.clone(),
        flows,
        Arc::new(TracingSink),
        Arc::new(TracingSink),
        settings.approval.clone(),
    ));
    let sweeper = StaleOrderSweeper::new(store.clone(), workflow, settings.sweeper.clone());

    let report = sweeper.run(&TimeStamp::new()).context("Sweep failed")?;
    store.flush()?;

    for failure in report
        .orders
        .iter()
        .chain(report.approvals.iter())
        .chain(report.intents.iter())
        .filter(|o| !o.success)
    {
        tracing::warn!(
            id = %failure.id,
            tenant_id = %failure.tenant_id,
            action = ?failure.action,
            error = failure.error.as_deref().unwrap_or_default(),
            "record not processed"
        );
    }

    Ok(())
}
