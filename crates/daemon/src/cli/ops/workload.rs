use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use caims_daemon::broker::BrokerEndpoint;
use caims_daemon::gcp::TEE_SERVER_SOCKET_PATH;
use caims_daemon::{spawn_workload, WorkloadServiceConfig};

#[derive(Args, Debug, Clone)]
pub struct Workload {
    /// Port to listen on (default from config)
    #[arg(long)]
    pub port: Option<u16>,

    /// Broker whose clients this workload serves; attestation tokens are
    /// bound to it
    #[arg(long)]
    pub broker: Option<BrokerEndpoint>,

    /// Serve without publishing attestation tokens (outside a TEE)
    #[arg(long)]
    pub no_register: bool,

    /// Unix socket of the launcher's TEE server
    #[arg(long, default_value = TEE_SERVER_SOCKET_PATH)]
    pub tee_socket: PathBuf,

    /// Directory for log files (logs to stdout only if not set)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    #[error("state error: {0}")]
    StateError(#[from] caims_daemon::state::StateError),

    #[error("invalid broker endpoint in config: {0}")]
    Endpoint(#[from] url::ParseError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Workload {
    type Error = WorkloadError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.state()?;
        let file = &state.config.workload;

        let broker_endpoint = match &self.broker {
            Some(endpoint) => Some(endpoint.clone()),
            None => file.broker_endpoint.as_deref().map(str::parse).transpose()?,
        };
        let port = self.port.unwrap_or(file.listen_port);

        let config = WorkloadServiceConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            max_concurrent_requests: file.max_concurrent_requests,
            max_message_size: file.max_message_size,
            register: !self.no_register,
            broker_endpoint,
            registration_interval: Duration::from_secs(file.registration_interval_secs),
            tee_socket_path: self.tee_socket.clone(),
            log_level: state.config.log_level(),
            log_dir: self.log_dir.clone(),
        };

        spawn_workload(&config).await;
        Ok("workload ended".to_string())
    }
}
