mod catalog;
mod config;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use scroll_core::{ControllerEvent, PaginatedFetchController, PollingVisibilitySignal};
use shared::domain::{AnchorId, PageIndex, QueryParams};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::catalog::{CatalogItem, CatalogSource, SimulatedViewport};

const SENTINEL: AnchorId = AnchorId(1);

#[derive(Parser, Debug)]
#[command(about = "Scrolls a simulated list backed by an in-memory paged catalog")]
struct Args {
    /// Settings file; defaults to ./scroll_demo.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Title filter applied halfway through the run.
    #[arg(long)]
    query: Option<String>,
    /// Extra initial query parameter, `key=value`.
    #[arg(long = "param")]
    params: Vec<String>,
    #[arg(long)]
    page_size: Option<usize>,
    #[arg(long)]
    total_items: Option<usize>,
    /// Page whose fetch fails.
    #[arg(long)]
    fail_at_page: Option<u64>,
    #[arg(long)]
    viewport_rows: Option<usize>,
    #[arg(long, default_value_t = 16)]
    steps: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = config::load_settings(args.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(page_size) = args.page_size {
        settings.page_size = page_size;
    }
    if let Some(total_items) = args.total_items {
        settings.total_items = total_items;
    }
    if let Some(rows) = args.viewport_rows {
        settings.viewport_rows = rows;
    }
    settings.params.merge(QueryParams::parse_pairs(&args.params)?);

    let controller_config = settings.controller_config();
    let poll_interval = Duration::from_millis(settings.poll_interval_ms.max(1));
    let latency = Duration::from_millis(settings.latency_ms);

    let source = CatalogSource::new(
        settings.total_items,
        settings.page_size,
        controller_config.initial_page,
    )
    .with_latency(latency)
    .with_failure_at(args.fail_at_page.map(PageIndex));
    let viewport = Arc::new(SimulatedViewport::new(settings.viewport_rows, SENTINEL));
    let signal = PollingVisibilitySignal::new(viewport.clone(), poll_interval);

    let controller: Arc<PaginatedFetchController<CatalogItem>> =
        PaginatedFetchController::new_with_signal(
            Arc::new(source),
            Arc::new(signal),
            settings.params.clone(),
            controller_config,
        );
    let event_log = spawn_event_log(&controller);

    info!(
        total_items = settings.total_items,
        page_size = settings.page_size,
        viewport_rows = viewport.rows(),
        "starting scroll demo"
    );
    let outcome = controller.fetch_initial().await;
    info!(?outcome, "initial fetch finished");
    controller.attach_anchor(SENTINEL).await?;

    let stride = (viewport.rows() / 2).max(1);
    let settle = poll_interval * 2 + latency;
    for step in 0..args.steps {
        if step == args.steps / 2 {
            if let Some(query) = &args.query {
                viewport.scroll_to_top();
                let outcome = controller
                    .update_params(QueryParams::new().with("q", query.as_str()))
                    .await;
                info!(query = %query, ?outcome, "filter applied");
            }
        }

        viewport.set_rendered(controller.snapshot().await.items.len());
        let offset = viewport.scroll_by(stride);
        tokio::time::sleep(settle).await;

        let snapshot = controller.snapshot().await;
        viewport.set_rendered(snapshot.items.len());
        println!(
            "step {step:>2}: offset={offset:>3} items={:>3} page={} phase={:?}",
            snapshot.items.len(),
            snapshot.page,
            snapshot.phase
        );
    }

    let snapshot = controller.snapshot().await;
    let top = viewport.offset();
    for item in snapshot.items.iter().skip(top).take(viewport.rows()) {
        println!("  #{:<4} {}", item.id, item.title);
    }
    println!(
        "loaded {} items over epoch {}; has_more={}",
        snapshot.items.len(),
        snapshot.epoch,
        snapshot.has_more
    );

    controller.dispose().await;
    if let Err(err) = event_log.await {
        warn!(error = %err, "event log task ended abnormally");
    }
    Ok(())
}

fn spawn_event_log(
    controller: &Arc<PaginatedFetchController<CatalogItem>>,
) -> tokio::task::JoinHandle<()> {
    let mut events = controller.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ControllerEvent::Disposed) => break,
                Ok(ControllerEvent::FetchFailed(report)) => {
                    warn!(page = %report.page, message = %report.message, "page fetch failed");
                }
                Ok(event) => info!(?event, "controller event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}
