//! RGB++ resolver service
//!
//! Serves cross-chain RGB++ transaction views backed by a Bitcoin indexer,
//! a CKB node and the CKB explorer.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use rgbpp_resolver::bitcoin;
use rgbpp_resolver::ckb::{CkbRpcClient, XudtTemplates};
use rgbpp_resolver::config::Settings;
use rgbpp_resolver::explorer::CkbExplorerClient;
use rgbpp_resolver::metrics::MetricsServer;
use rgbpp_resolver::{api, RgbppResolutionService, Upstreams};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting RGB++ resolver v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    info!(
        "Loaded configuration: bitcoin backend {:?} with {} url(s)",
        settings.bitcoin.backend,
        settings.bitcoin.urls.len()
    );

    let bitcoin = bitcoin::provider_from_config(&settings.bitcoin)?;
    let ckb = Arc::new(CkbRpcClient::new(&settings.ckb)?);
    let explorer = Arc::new(CkbExplorerClient::new(
        &settings.explorer,
        &settings.assets_api,
    )?);
    info!("Upstream clients initialized");

    let upstreams = Upstreams {
        bitcoin,
        ckb,
        bindings: explorer.clone(),
        tokens: explorer,
        xudt_templates: Arc::new(XudtTemplates::new(&settings.tokens.xudt_scripts)),
    };
    let service = Arc::new(RgbppResolutionService::new(
        upstreams,
        settings.resolver.clone(),
    ));

    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let api_handle = tokio::spawn({
        let server = settings.server.clone();
        async move {
            if let Err(e) = api::run_server(server, service).await {
                error!("API server error: {}", e);
            }
        }
    });

    info!("RGB++ resolver is running");
    info!("API server: http://{}:{}", settings.server.host, settings.server.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("RGB++ resolver stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,rgbpp_resolver=debug,hyper=warn,reqwest=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
