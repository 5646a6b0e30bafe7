use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use berth_api::rest::{AppState, create_router};
use berth_api::{
    ApiAuditLogger, ControllerConfig, Dispatcher, InMemoryRuntime, LifecycleController,
    LocalNetworks, MemoryStore,
};

#[derive(Parser)]
#[command(name = "berth-api")]
#[command(about = "berth API Server - container lifecycle management plane")]
struct Args {
    /// Listen address for REST API
    #[arg(short, long, default_value = "[::]:8080")]
    listen: String,

    /// Network attached to containers created without one
    #[arg(long, default_value = "private")]
    default_network: String,

    /// Project used when a request carries no X-Project-Id header
    #[arg(long, default_value = "default")]
    default_project: String,

    /// User used when a request carries no X-User-Id header
    #[arg(long, default_value = "admin")]
    default_user: String,

    /// Upper bound for list page sizes
    #[arg(long, default_value_t = 1000)]
    max_list_limit: usize,

    /// Seconds to wait on stop/reboot when the caller gives no timeout
    #[arg(long, default_value_t = 10)]
    stop_timeout: u64,

    /// Disable the audit trail
    #[arg(long)]
    no_audit: bool,
}

impl Args {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            default_network: self.default_network.clone(),
            default_stop_timeout: self.stop_timeout,
            max_list_limit: self.max_list_limit,
            default_project: self.default_project.clone(),
            default_user: self.default_user.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("berth_api=info".parse()?))
        .init();

    let args = Args::parse();
    let config = args.controller_config();

    info!(
        "Starting berth-api - REST: {}, default network: {}",
        args.listen, config.default_network
    );

    let audit = if args.no_audit {
        Arc::new(ApiAuditLogger::new_noop())
    } else {
        Arc::new(ApiAuditLogger::new())
    };

    let store = Arc::new(MemoryStore::new());
    let driver = Arc::new(InMemoryRuntime::new());
    let networks = Arc::new(LocalNetworks::new(config.default_network.clone()));
    let controller = LifecycleController::new(store, driver, networks, audit, config);

    let app_state = Arc::new(AppState {
        dispatcher: Dispatcher::new(controller),
    });
    let router = create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!("REST API listening on {}", args.listen);

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);

    let rest_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
            })
            .await
    });

    // Wait for shutdown signal
    let ctrl_c = signal::ctrl_c();
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }

    let _ = shutdown_tx.send(true);
    rest_handle.await??;

    info!("Shutdown complete");
    Ok(())
}
