mod config;

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use wings_contract::Destination;
use wings_control_plane::{build_router, AppState};
use wings_endpoint::{Endpoint, FolderEndpoint, FolderEndpointConfig};
use wings_storage::ShareStore;
use wings_worker::{
    trigger_channel, BroadcastNotifier, QueueProcessor, RecordingScheduler, RefCountedWakeHold,
    RetryPolicy, Scheduler, TokioScheduler, Wings,
};

use crate::config::RuntimeConfig;

#[derive(Debug, Parser)]
#[command(author, version, about = "Wings durable share-request queue daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the worker and the HTTP control plane.
    Serve {
        #[arg(long, default_value = "config/wings.toml")]
        config: PathBuf,
    },
    /// Queue one file; a running daemon picks it up on its next cycle.
    Enqueue {
        #[arg(long, default_value = "config/wings.toml")]
        config: PathBuf,
        file: PathBuf,
        #[arg(long)]
        endpoint: u16,
        #[arg(long, default_value_t = 0)]
        destination: u16,
    },
    /// Run a single drain cycle and print its report.
    Drain {
        #[arg(long, default_value = "config/wings.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config } => serve(config).await,
        Command::Enqueue {
            config,
            file,
            endpoint,
            destination,
        } => enqueue(config, file, Destination::new(endpoint, destination)).await,
        Command::Drain { config } => drain(config).await,
    }
}

async fn serve(config_path: PathBuf) -> Result<()> {
    let config = RuntimeConfig::load(&config_path)?;

    let require_bearer = requires_token(&config.http.bind);
    if require_bearer && config.http.auth_token.is_none() {
        return Err(anyhow!(
            "non-loopback bind {} requires http.auth_token",
            config.http.bind
        ));
    }

    if !require_bearer {
        info!("loopback bind detected: bearer auth optional");
    } else {
        warn!("non-loopback bind detected: bearer auth enforced");
    }

    let store = ShareStore::connect(&config.storage_config()).await?;
    let endpoints = open_endpoints(&config).await?;
    let notifications = BroadcastNotifier::default();
    let (trigger, triggers) = trigger_channel();
    let scheduler = Arc::new(TokioScheduler::new(trigger.clone()));
    let processor = build_processor(&config, store, endpoints, scheduler, &notifications)?;

    let (wings, worker) = Wings::start(Arc::new(processor), trigger, triggers);
    let wings = Arc::new(wings);
    wings.kick_after(config.boot_delay());
    info!(delay_secs = config.boot_delay().as_secs(), "boot drain scheduled");

    let state = AppState::new(
        wings.clone(),
        notifications,
        config.http.auth_token.clone(),
        require_bearer,
    );
    let app = build_router(state);

    let socket: SocketAddr = config
        .http
        .bind
        .parse()
        .with_context(|| format!("invalid socket address {}", config.http.bind))?;

    let listener = tokio::net::TcpListener::bind(socket)
        .await
        .with_context(|| format!("failed to bind {}", config.http.bind))?;

    info!(bind = %config.http.bind, "wingsd control-plane listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for shutdown signal");
            }
        })
        .await
        .context("axum server failed")?;

    info!("shutting down worker");
    wings.shutdown();
    worker.await.context("worker task failed")?;
    Ok(())
}

async fn enqueue(config_path: PathBuf, file: PathBuf, destination: Destination) -> Result<()> {
    let config = RuntimeConfig::load(&config_path)?;
    let store = ShareStore::connect(&config.storage_config()).await?;

    let file = std::path::absolute(&file)
        .with_context(|| format!("failed to resolve {}", file.display()))?;
    let id = store
        .create(&file, destination)
        .await
        .ok_or_else(|| anyhow!("share request for {} was not stored", file.display()))?;

    println!("{id}");
    Ok(())
}

async fn drain(config_path: PathBuf) -> Result<()> {
    let config = RuntimeConfig::load(&config_path)?;
    let store = ShareStore::connect(&config.storage_config()).await?;
    let endpoints = open_endpoints(&config).await?;
    let notifications = BroadcastNotifier::default();
    let scheduler = Arc::new(RecordingScheduler::new());

    let processor = build_processor(&config, store, endpoints, scheduler, &notifications)?;
    let report = processor.run_cycle().await;

    let rendered = serde_json::to_string_pretty(&report).context("serialize cycle report")?;
    println!("{rendered}");
    Ok(())
}

async fn open_endpoints(config: &RuntimeConfig) -> Result<Vec<Arc<dyn Endpoint>>> {
    let mut endpoints: Vec<Arc<dyn Endpoint>> = Vec::new();
    for folder in &config.folders {
        let endpoint = FolderEndpoint::open(FolderEndpointConfig {
            endpoint_id: folder.endpoint_id,
            name: folder.name.clone(),
            link_state_path: folder.link_state.clone(),
            subfolders: folder.subfolders.clone(),
            upload_timeout: config.upload_timeout(),
        })
        .await
        .with_context(|| format!("failed to open folder endpoint {}", folder.name))?;

        if let Some(root) = &folder.root {
            if endpoint.seed_link(root).await? {
                info!(name = %folder.name, root = %root.display(), "folder endpoint linked from config");
            }
        }

        info!(
            endpoint_id = folder.endpoint_id,
            name = %folder.name,
            linked = endpoint.is_linked().await,
            "folder endpoint registered"
        );
        endpoints.push(Arc::new(endpoint));
    }
    Ok(endpoints)
}

fn build_processor(
    config: &RuntimeConfig,
    store: ShareStore,
    endpoints: Vec<Arc<dyn Endpoint>>,
    scheduler: Arc<dyn Scheduler>,
    notifications: &BroadcastNotifier,
) -> Result<QueueProcessor> {
    let processor = QueueProcessor::new(
        store,
        endpoints,
        RetryPolicy::new(config.retry_step()),
        scheduler,
        Arc::new(RefCountedWakeHold::new()),
        Arc::new(notifications.clone()),
    )?;
    Ok(processor)
}

fn requires_token(bind: &str) -> bool {
    match bind.parse::<SocketAddr>() {
        Ok(addr) => !addr.ip().is_loopback(),
        Err(_) => true,
    }
}
