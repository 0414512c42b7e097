use std::sync::Arc;

use flowcells::{
    FlowcellService,
    config::{ServiceConfig, TransportRuntime},
    transport::serve_http_with_workers,
};
use lims::InMemoryLims;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use views::InMemoryViews;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let serve_mode = std::env::args().any(|arg| arg == "--serve");
    let config = ServiceConfig::from_env();

    let views = match config.views_snapshot.as_deref() {
        Some(path) => match InMemoryViews::from_snapshot_file(path) {
            Ok(views) => views,
            Err(err) => {
                error!(path = %path.display(), error = %err, "flowcells failed loading view snapshot");
                std::process::exit(1);
            }
        },
        None => InMemoryViews::new(),
    };
    let lims = match config.lims_snapshot.as_deref() {
        Some(path) => match InMemoryLims::from_snapshot_file(path) {
            Ok(lims) => lims,
            Err(err) => {
                error!(path = %path.display(), error = %err, "flowcells failed loading LIMS snapshot");
                std::process::exit(1);
            }
        },
        None => InMemoryLims::new(),
    };
    let views = Arc::new(views);
    let lims = Arc::new(lims);

    let service = FlowcellService::new(views, lims.clone(), lims)
        .with_search_cache_ttl(config.search_cache_ttl)
        .with_recent_months(config.recent_months);

    info!(
        search_cache_ttl_secs = config.search_cache_ttl.as_secs(),
        recent_months = service.recent_months(),
        views_snapshot = config
            .views_snapshot
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "none".to_string()),
        lims_snapshot = config
            .lims_snapshot
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "none".to_string()),
        "flowcells service configured"
    );

    if !serve_mode {
        match service.list_brief_summaries() {
            Ok(summaries) => info!(
                flowcells = summaries.len(),
                "flowcells ready (pass --serve to start the HTTP transport)"
            ),
            Err(err) => {
                error!(error = %err, "flowcells failed reading summaries");
                std::process::exit(1);
            }
        }
        return;
    }

    let bind_addr = config.bind_addr.as_str();
    info!("flowcells transport listening on http://{bind_addr}");
    info!("flowcells transport workers: {}", config.http_workers);
    info!(
        "flowcells transport runtime: {}",
        config.transport_runtime.as_str()
    );
    info!("flowcells health endpoint: http://{bind_addr}/health");
    info!("flowcells metrics endpoint: http://{bind_addr}/metrics");
    info!("flowcells dashboard: http://{bind_addr}/flowcells");

    match config.transport_runtime {
        TransportRuntime::Std => {
            if let Err(err) = serve_http_with_workers(service, bind_addr, config.http_workers) {
                error!(error = %err, "flowcells transport failed");
                std::process::exit(1);
            }
        }
        TransportRuntime::Axum => {
            #[cfg(feature = "async-transport")]
            {
                if let Err(err) = flowcells::transport_axum::serve_http_with_axum(
                    service,
                    bind_addr,
                    config.http_workers,
                ) {
                    error!(error = %err, "flowcells transport failed");
                    std::process::exit(1);
                }
            }
            #[cfg(not(feature = "async-transport"))]
            {
                error!(
                    "flowcells transport runtime 'axum' requires build feature 'async-transport'"
                );
                std::process::exit(2);
            }
        }
    }
}
