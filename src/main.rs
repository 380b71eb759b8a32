use std::{process, sync::Arc};

use fleetcache::{
    cache::{CacheConfig, CacheState, PageCache, PurgeCoordinator},
    config,
    error::AppError,
    infra::{
        error::InfraError,
        http::{self, UpstreamState},
        telemetry,
    },
    peers::{self, HttpPeerTransport, PeerDirectory, PeerTransport},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let cache = Arc::new(PageCache::new(CacheConfig::from(&settings.cache)));
    let directory = Arc::new(PeerDirectory::new(settings.peers.self_address.clone()));
    let poller = peers::start_discovery(&settings.peers, &directory)?;

    let transport: Arc<dyn PeerTransport> =
        Arc::new(HttpPeerTransport::new(settings.peers.port).map_err(|err| {
            AppError::from(InfraError::configuration(format!(
                "failed to build peer client: {err}"
            )))
        })?);
    let coordinator = Arc::new(PurgeCoordinator::new(
        Arc::clone(&cache),
        Arc::clone(&directory),
        transport,
    ));

    let upstream = UpstreamState::new(Arc::clone(&cache), &settings.render)?;
    let router = http::build_router(CacheState::new(coordinator), upstream);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        addr = %settings.server.addr,
        upstream = %settings.render.upstream_url,
        cache_enabled = settings.cache.enabled,
        "fleetcache listening"
    );

    let served = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Some(handle) = poller {
        handle.abort();
    }

    served.map_err(|err| AppError::unexpected(format!("server error: {err}")))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
