// src/main.rs
//! Boots the scheduler, queue delivery, retention sweep, and the operator
//! HTTP surface against an in-memory store seeded from the pipeline config.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use newswire_ingest::api::{self, AppState};
use newswire_ingest::config::PipelineConfig;
use newswire_ingest::extract::{FeedExtractor, ScrapeExtractor};
use newswire_ingest::model::Source;
use newswire_ingest::queue::JobQueue;
use newswire_ingest::scheduler::Scheduler;
use newswire_ingest::store::MemoryStore;
use newswire_ingest::worker::IngestWorker;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("newswire_ingest=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    // Recorder must be in place before the first counter is touched.
    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("installing prometheus recorder")?;

    let cfg = PipelineConfig::load_default()?;

    let sources: Vec<Source> = cfg
        .sources
        .iter()
        .map(|s| Source {
            id: Uuid::new_v4(),
            name: s.name.clone(),
            url: s.url.clone(),
            feed_url: s.feed_url.clone(),
            scrape_enabled: s.scrape_enabled,
            active: s.active,
            fetch_frequency_minutes: s.fetch_frequency_minutes,
            last_fetched_at: None,
        })
        .collect();
    tracing::info!(sources = sources.len(), "loaded source registry");
    let store = Arc::new(MemoryStore::with_sources(sources));

    let queue = JobQueue::new(cfg.queue_config());
    let worker = Arc::new(IngestWorker::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(FeedExtractor::new(cfg.http_timeout())?),
        Arc::new(ScrapeExtractor::new(cfg.http_timeout())?),
    ));
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        queue.clone(),
        cfg.stagger(),
        cfg.bucket_secs,
    ));

    let _delivery = queue.clone().spawn_delivery(worker);
    let _sweep = queue
        .clone()
        .spawn_cleanup(Duration::from_secs(cfg.cleanup_interval_secs));
    let _schedule = scheduler
        .clone()
        .spawn(Duration::from_secs(cfg.schedule_interval_secs));

    let state = AppState {
        scheduler,
        queue,
        log: store,
    };
    let router = api::create_router(state).route(
        "/metrics",
        get(move || {
            let h = metrics_handle.clone();
            async move { h.render() }
        }),
    );

    let addr = format!("0.0.0.0:{}", cfg.listen_port);
    tracing::info!(%addr, "operator api listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
