use farolero::activator::Activator;
use farolero::config::Config;
use farolero::gateway::Gateway;
use farolero::runtime::{DockerRuntime, SharedRuntime};
use farolero::server::{GatewayServer, PKG_NAME, VERSION};
use farolero::store::StackStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("farolero=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("farolero.toml"));

    let config = Config::load_or_default(&config_path)
        .map_err(|e| {
            error!(path = %config_path.display(), error = %e, "Failed to load configuration");
            e
        })?
        .apply_env();

    if config_path.exists() {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        info!(path = %config_path.display(), "No configuration file, using defaults");
    }

    print_startup_banner(&config);

    let store = Arc::new(StackStore::new(config.stacks.file.clone()));
    if config.stacks.create_example {
        match store.ensure_example().await {
            Ok(true) => warn!(
                path = %store.path().display(),
                "Stack store was missing, wrote an example; edit it or use the dashboard"
            ),
            Ok(false) => {}
            Err(e) => error!(path = %store.path().display(), error = %e, "Failed to create example stack store"),
        }
    }

    match store.load() {
        Ok(stacks) => info!(count = stacks.len(), path = %store.path().display(), "Stacks loaded"),
        Err(e) => warn!(path = %store.path().display(), error = %e, "Stack store is not readable yet"),
    }

    let runtime = DockerRuntime::connect(&config.runtime).await?;
    if let Err(e) = runtime.ping().await {
        warn!(error = %e, "Docker daemon not reachable; stacks will be reported as stopped");
    }
    let runtime: SharedRuntime = Arc::new(runtime);

    let activator = Arc::new(Activator::new(runtime, config.runtime.launch_grace()));
    let gateway = Arc::new(Gateway::new(store, activator));

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    let server = GatewayServer::new(bind_addr, gateway, shutdown_rx);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Gateway server error");
        }
    });

    wait_for_shutdown().await;

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    // Wait for the server to stop (with timeout)
    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received SIGINT (Ctrl+C), shutting down...");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down...");
                    }
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    info!("Received Ctrl+C, shutting down...");
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting wake-on-request gateway");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        "Server configuration"
    );
    info!(
        stacks_file = %config.stacks.file.display(),
        create_example = config.stacks.create_example,
        "Stack store"
    );
    info!(
        docker_host = ?config.runtime.docker_host,
        compose_command = %config.runtime.compose_command,
        launch_grace_secs = config.runtime.launch_grace_secs,
        "Runtime settings"
    );
}
