pub mod utils;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use common::attestation::AttestationVerifier;
use common::crypto::HybridKeyPair;

use crate::broker::{
    Broker, BrokerEndpoint, DirectoryError, DiscoveryDaemon, HttpWorkloadTransport,
    TransportError,
};
use crate::gcp::{ComputeInstanceDirectory, ConfidentialSpace, MetadataClient, MetadataError};
use crate::http_server;
use crate::service_state::{BrokerState, WorkloadState};
use crate::workload::{EchoEngine, RegistrationDaemon, Workload};
use crate::{BrokerServiceConfig, WorkloadServiceConfig};

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle for gracefully shutting down a running role.
pub struct ShutdownHandle {
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    shutdown_tx: watch::Sender<()>,
    shutdown_rx: watch::Receiver<()>,
}

impl ShutdownHandle {
    /// Block until the service shuts down (via signal or explicit shutdown).
    pub async fn wait(self) {
        shutdown_and_join(self.graceful_waiter, self.shutdown_rx, self.handles).await;
    }

    /// Trigger shutdown programmatically.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to read instance metadata: {0}")]
    Metadata(#[from] MetadataError),
    #[error("failed to set up instance discovery: {0}")]
    Directory(#[from] DirectoryError),
    #[error("failed to set up workload transport: {0}")]
    Transport(#[from] TransportError),
    #[error("invalid broker endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("failed to create HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to install signal handlers: {0}")]
    Signal(#[from] std::io::Error),
}

/// Where console logs go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    /// Keeps stdout free for program output
    Stderr,
}

/// Initialize logging, panic handler, and build info reporting.
/// Returns guards that must be kept alive for the duration of the program.
pub fn init_logging(
    log_level: tracing::Level,
    log_dir: Option<&Path>,
    output: LogOutput,
) -> Vec<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::fmt::format::FmtSpan;

    let mut guards = Vec::new();

    // Console layer
    let (console_writer, console_guard) = match output {
        LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
    };
    guards.push(console_guard);

    let console_env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(console_writer)
        .with_filter(console_env_filter);

    // File layer (if log_dir is set)
    if let Some(log_dir) = log_dir {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Failed to create log directory {:?}: {}",
                log_dir, e
            );
        }

        let file_appender = tracing_appender::rolling::daily(log_dir, "caims.log");
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        guards.push(file_guard);

        let file_env_filter = EnvFilter::builder()
            .with_default_directive(log_level.into())
            .from_env_lossy();

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(file_env_filter);

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry().with(console_layer).init();
    }

    utils::register_panic_logger();
    utils::report_build_info();

    guards
}

/// Wait for shutdown and join all handles with timeout.
async fn shutdown_and_join(
    graceful_waiter: tokio::task::JoinHandle<()>,
    mut shutdown_rx: watch::Receiver<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
) {
    // Either a signal or ShutdownHandle::shutdown ends the wait.
    tokio::select! {
        _ = graceful_waiter => {}
        _ = shutdown_rx.changed() => {}
    }

    if timeout(FINAL_SHUTDOWN_TIMEOUT, join_all(handles))
        .await
        .is_err()
    {
        tracing::error!(
            "Failed to shut down within {} seconds",
            FINAL_SHUTDOWN_TIMEOUT.as_secs()
        );
        std::process::exit(4);
    }
}

async fn resolve_broker_endpoint(
    metadata: &MetadataClient,
    project_number: Option<String>,
    region: Option<String>,
) -> Result<BrokerEndpoint, StartupError> {
    let project_number = match project_number {
        Some(number) => number,
        None => metadata.numeric_project_id().await?,
    };
    let region = match region {
        Some(region) => region,
        None => metadata.region().await?,
    };
    Ok(BrokerEndpoint::cloud_run(&project_number, &region)?)
}

/// Build the broker and spawn discovery plus the HTTP server.
pub async fn start_broker(
    config: &BrokerServiceConfig,
) -> Result<(BrokerState, ShutdownHandle), StartupError> {
    let metadata = MetadataClient::new()?;

    let project_id = match &config.project_id {
        Some(project_id) => project_id.clone(),
        None => metadata.project_id().await?,
    };
    let endpoint = match &config.endpoint {
        Some(endpoint) => endpoint.clone(),
        None => {
            resolve_broker_endpoint(&metadata, config.project_number.clone(), config.region.clone())
                .await?
        }
    };

    let verifier = AttestationVerifier::confidential_space(reqwest::Client::builder().build()?);
    let transport = Arc::new(HttpWorkloadTransport::new(config.workload_port)?);
    let broker = Arc::new(Broker::new(
        endpoint.clone(),
        config.policy.clone(),
        verifier,
        transport,
    ));
    let directory = Arc::new(ComputeInstanceDirectory::new(project_id.clone(), metadata)?);

    let (graceful_waiter, shutdown_tx, shutdown_rx) = utils::graceful_shutdown_blocker()?;
    let mut handles = Vec::new();

    let discovery = DiscoveryDaemon::new(broker.clone(), directory)
        .with_interval(config.discovery_interval);
    handles.push(tokio::spawn(discovery.run(shutdown_rx.clone())));

    let state = BrokerState::new(broker);
    let http_config = http_server::Config::new(config.listen_addr, config.max_concurrent_requests);
    let http_state = state.clone();
    let http_rx = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = http_server::run_broker(http_config, http_state, http_rx).await {
            tracing::error!("Broker server error: {}", e);
        }
    }));

    tracing::info!(
        %endpoint,
        project_id = %project_id,
        "Running: broker on {} + discovery every {:?}",
        config.listen_addr,
        config.discovery_interval
    );

    let handle = ShutdownHandle {
        graceful_waiter,
        handles,
        shutdown_tx,
        shutdown_rx,
    };
    Ok((state, handle))
}

/// Build the workload and spawn registration plus the HTTP server.
pub async fn start_workload(
    config: &WorkloadServiceConfig,
) -> Result<(WorkloadState, ShutdownHandle), StartupError> {
    // Lives as long as the process; its public half is what gets attested.
    let workload = Arc::new(Workload::new(
        HybridKeyPair::generate(),
        Arc::new(EchoEngine),
    ));

    let (graceful_waiter, shutdown_tx, shutdown_rx) = utils::graceful_shutdown_blocker()?;
    let mut handles = Vec::new();

    if config.register {
        let metadata = MetadataClient::new()?;
        let broker_endpoint = match &config.broker_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => resolve_broker_endpoint(&metadata, None, None).await?,
        };
        tracing::info!(broker = %broker_endpoint, "registering with broker");

        let registration = RegistrationDaemon::new(
            workload.clone(),
            broker_endpoint,
            Arc::new(ConfidentialSpace::new(config.tee_socket_path.clone())),
            Arc::new(metadata),
        )
        .with_interval(config.registration_interval);
        handles.push(tokio::spawn(registration.run(shutdown_rx.clone())));
    } else {
        tracing::warn!("registration disabled, this workload cannot be discovered");
        workload.mark_registered();
    }

    let state = WorkloadState::new(workload, config.max_message_size);
    let http_config = http_server::Config::new(config.listen_addr, config.max_concurrent_requests);
    let http_state = state.clone();
    let http_rx = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = http_server::run_workload(http_config, http_state, http_rx).await {
            tracing::error!("Workload server error: {}", e);
        }
    }));

    tracing::info!("Running: workload on {}", config.listen_addr);

    let handle = ShutdownHandle {
        graceful_waiter,
        handles,
        shutdown_tx,
        shutdown_rx,
    };
    Ok((state, handle))
}

/// Run the broker until a shutdown signal. Use for CLI binary usage.
pub async fn spawn_broker(config: &BrokerServiceConfig) {
    let _guards = init_logging(config.log_level, config.log_dir.as_deref(), LogOutput::Stdout);
    match start_broker(config).await {
        Ok((_, handle)) => handle.wait().await,
        Err(e) => {
            tracing::error!("error starting broker: {}", e);
            std::process::exit(3);
        }
    }
}

/// Run the workload server until a shutdown signal. Use for CLI binary usage.
pub async fn spawn_workload(config: &WorkloadServiceConfig) {
    let _guards = init_logging(config.log_level, config.log_dir.as_deref(), LogOutput::Stdout);
    match start_workload(config).await {
        Ok((_, handle)) => handle.wait().await,
        Err(e) => {
            tracing::error!("error starting workload: {}", e);
            std::process::exit(3);
        }
    }
}
