use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::broker::{BrokerEndpoint, BrokerPolicy};

#[derive(Debug, Clone)]
pub struct BrokerServiceConfig {
    // http server configuration
    /// Address the broker's HTTP server listens on
    pub listen_addr: SocketAddr,
    pub max_concurrent_requests: usize,

    // identity
    /// Public URL of the broker, derived from project metadata if not set
    pub endpoint: Option<BrokerEndpoint>,
    /// Project to discover workloads in, read from the metadata server if not set
    pub project_id: Option<String>,
    pub project_number: Option<String>,
    pub region: Option<String>,

    // routing
    pub policy: BrokerPolicy,
    pub discovery_interval: Duration,
    /// Port workload servers listen on
    pub workload_port: u16,

    // logging
    pub log_level: tracing::Level,
    /// Directory for log files (optional, logs to stdout only if not set)
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct WorkloadServiceConfig {
    // http server configuration
    pub listen_addr: SocketAddr,
    pub max_concurrent_requests: usize,
    /// Largest request ciphertext accepted
    pub max_message_size: usize,

    // registration
    /// Publish attestation tokens for discovery. Off when running outside
    /// a TEE.
    pub register: bool,
    /// Broker tokens are bound to, derived from project metadata if not set
    pub broker_endpoint: Option<BrokerEndpoint>,
    pub registration_interval: Duration,
    /// Unix socket of the launcher's TEE server
    pub tee_socket_path: PathBuf,

    // logging
    pub log_level: tracing::Level,
    pub log_dir: Option<PathBuf>,
}
