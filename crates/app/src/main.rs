mod service;

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use face_core::{Preprocessor, Session};
use tracing::{error, info};

use crate::service::config::ServiceConfig;
use crate::service::pool::{SessionFactory, SessionPool};
use crate::service::{server, telemetry};

/// Drain deadline for in-flight requests on shutdown.
const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[actix_web::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env().context("invalid service configuration")?;
    telemetry::init(config.debug);

    ort::init()
        .with_name("face-validation")
        .commit()
        .context("failed to initialize the inference runtime")?;

    let model_path = config.model_path.clone();
    let output_len = config.output_len();
    let factory: SessionFactory<Session> = Arc::new(move || Session::load(&model_path, output_len));
    let pool = SessionPool::new(factory, config.pool_size)
        .context("failed to build the session pool")?;
    let preprocessor = Arc::new(Preprocessor::new());

    let state = web::Data::new(server::AppState {
        pool: pool.clone(),
        preprocessor,
        config: config.clone(),
    });

    let http_server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(server::configure)
    })
    .bind(("0.0.0.0", config.port))
    .with_context(|| format!("failed to bind port {}", config.port))?
    .shutdown_timeout(SHUTDOWN_TIMEOUT_SECS)
    .run();

    let server_handle = http_server.handle();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received; draining in-flight requests");
        server_handle.stop(true).await;
    });

    info!(
        port = config.port,
        pool_size = pool.metrics().pool_size,
        model = %config.model_path.display(),
        "face validation service listening"
    );
    http_server.await.context("server error")?;

    pool.destroy().await;
    info!("session pool destroyed; exiting");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for SIGINT: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
