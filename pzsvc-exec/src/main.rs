//! pzsvc-exec
//!
//! Serves a configured command-line program over HTTP:
//! - downloads request inputs from the catalog into a private workspace
//! - runs the program there
//! - uploads requested outputs and reports their artifact ids

use anyhow::{Context, Result};
use clap::Parser;
use pzsvc_catalog::{ArtifactStore, CatalogClient, JobPoller, PollPolicy, ServiceRegistration};
use pzsvc_core::{Capabilities, ServiceConfig};
use pzsvc_http::{HttpServer, MiddlewareConfig};
use pzsvc_runner::{CommandExecutor, ExecSettings, Orchestrator, WorkspaceManager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod routes;
mod version;

use routes::{AppState, ServiceInfo};

#[derive(Parser, Debug)]
#[command(name = "pzsvc-exec")]
#[command(about = "Expose a command-line program as an HTTP service")]
struct Args {
    /// Path to the JSON config file
    config: PathBuf,

    /// Bind host
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Listen port (overrides Port from the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json)?;

    let config = ServiceConfig::load(&args.config)
        .with_context(|| format!("Failed to load config file {}", args.config.display()))?;

    let mut caps = config.capabilities();
    let credential = config.load_credential(&mut caps);
    let version = version::discover_version(&config).await;

    let catalog = if caps.can_file {
        Some(catalog_client(&config).context("Failed to build catalog client")?)
    } else {
        None
    };

    if let (Some(client), Some(key)) = (&catalog, &credential) {
        if caps.can_register {
            register(client, &config, &version, key).await;
        }
    }

    let orchestrator = Orchestrator::new(
        ExecSettings {
            base_command: config.cli_cmd.clone(),
            service_name: config.svc_name.clone(),
            version: version.clone(),
            credential,
            transfer_concurrency: config.transfer_concurrency,
        },
        WorkspaceManager::new(&config.work_root),
        CommandExecutor::new(&config.work_root),
        catalog.map(|c| Arc::new(c) as Arc<dyn ArtifactStore>),
    );

    let state = Arc::new(AppState {
        orchestrator,
        info: ServiceInfo {
            name: config.svc_name.clone(),
            description: config.description.clone(),
            attributes: config.attributes.clone(),
            version,
        },
    });
    log_capabilities(&caps);

    let server = HttpServer::builder()
        .bind(args.host)
        .port(args.port.unwrap_or_else(|| config.effective_port()))
        .middleware(MiddlewareConfig::new().timeout(config.request_timeout()))
        .router(routes::create_router(state))
        .build();

    server
        .serve_with_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    Ok(())
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("pzsvc_exec=info".parse()?)
        .add_directive("pzsvc_runner=info".parse()?)
        .add_directive("pzsvc_catalog=info".parse()?)
        .add_directive("pzsvc_core=info".parse()?)
        .add_directive("pzsvc_http=info".parse()?)
        .add_directive("tower_http=debug".parse()?);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

fn catalog_client(config: &ServiceConfig) -> pzsvc_catalog::Result<CatalogClient> {
    let policy = PollPolicy {
        initial_delay: config.poll_initial_delay(),
        interval: config.poll_interval(),
        max_attempts: config.poll_max_attempts,
    };
    CatalogClient::with_poller(config.pz_addr.clone(), JobPoller::new(policy))
}

/// Register or refresh this service in the catalog. Failure is logged only.
async fn register(client: &CatalogClient, config: &ServiceConfig, version: &str, credential: &str) {
    let registration = ServiceRegistration {
        name: config.svc_name.clone(),
        description: config.description.clone(),
        url: config.url.clone(),
        version: version.to_string(),
        attributes: config.attributes.clone().unwrap_or_default(),
    };

    match client.manage_registration(&registration, credential).await {
        Ok(outcome) => info!(?outcome, "Registration managed"),
        Err(e) => error!(error = %e, "Registration failed, continuing without it"),
    }
}

fn log_capabilities(caps: &Capabilities) {
    info!(
        file_transfer = caps.can_file,
        service_credential = caps.has_auth,
        registration = caps.can_register,
        "Starting pzsvc-exec"
    );
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await
        }
    }
}
