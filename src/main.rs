use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use greenlight::config::ServerArgs;
use greenlight::database::{self, Stores};
use greenlight::mailer::LogMailer;
use greenlight::observability;
use greenlight::{app, AppState};

#[derive(Parser)]
#[command(name = "greenlight")]
#[command(about = "Greenlight movie catalog API server")]
#[command(version)]
struct Args {
    #[command(flatten)]
    server: ServerArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so local runs pick up GREENLIGHT_DB_DSN and friends.
    let _ = dotenvy::dotenv();

    let config = Args::parse().server.resolve()?;
    observability::init_tracing(&config.log)?;
    info!(environment = config.environment.as_str(), "starting greenlight");

    let metrics = if config.metrics.enabled {
        Some(observability::install_metrics_recorder()?)
    } else {
        None
    };

    let pool = match config.database.dsn {
        Some(_) => Some(database::connect(&config.database).await?),
        None => {
            warn!("no database DSN configured, serving from the in-memory store");
            None
        }
    };
    let stores = match &pool {
        Some(pool) => Stores::postgres(pool.clone(), config.database.query_timeout()),
        None => Stores::memory(),
    };

    let port = config.server.port;
    let sweep_every = config.limiter.sweep_interval();
    let state = AppState::new(config, stores, Arc::new(LogMailer::default()), metrics);
    let sweep = state.limiter.start_sweep(sweep_every);
    let background = state.background.clone();

    let bind_addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "listening");

    axum::serve(listener, app(state).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("draining background tasks");
    sweep.stop().await;
    background.close();
    background.wait().await;
    if let Some(pool) = pool {
        pool.close().await;
    }
    info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
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
    info!("shutdown signal received");
}
