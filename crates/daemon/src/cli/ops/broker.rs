use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use caims_daemon::broker::{BrokerEndpoint, BrokerPolicy, DEFAULT_WORKLOAD_PORT};
use caims_daemon::{spawn_broker, BrokerServiceConfig};

#[derive(Args, Debug, Clone)]
pub struct Broker {
    /// Port to listen on (default from config)
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Public URL of this broker, used as the attestation audience
    #[arg(long)]
    pub endpoint: Option<BrokerEndpoint>,

    /// Project to discover workload instances in
    #[arg(long)]
    pub project_id: Option<String>,

    /// Refuse workloads that allow debugging
    #[arg(long)]
    pub require_production: bool,

    /// Directory for log files (logs to stdout only if not set)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("state error: {0}")]
    StateError(#[from] caims_daemon::state::StateError),

    #[error("invalid endpoint in config: {0}")]
    Endpoint(#[from] url::ParseError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Broker {
    type Error = BrokerError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.state()?;
        let file = &state.config.broker;

        let endpoint = match &self.endpoint {
            Some(endpoint) => Some(endpoint.clone()),
            None => file.endpoint.as_deref().map(str::parse).transpose()?,
        };
        let port = self.port.unwrap_or(file.listen_port);

        let config = BrokerServiceConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            max_concurrent_requests: file.max_concurrent_requests,
            endpoint,
            project_id: self.project_id.clone().or_else(|| file.project_id.clone()),
            project_number: file.project_number.clone(),
            region: file.region.clone(),
            policy: BrokerPolicy {
                max_request_tokens: file.max_request_tokens,
                require_production: self.require_production || file.require_production,
            },
            discovery_interval: Duration::from_secs(file.discovery_interval_secs),
            workload_port: DEFAULT_WORKLOAD_PORT,
            log_level: state.config.log_level(),
            log_dir: self.log_dir.clone(),
        };

        spawn_broker(&config).await;
        Ok("broker ended".to_string())
    }
}
