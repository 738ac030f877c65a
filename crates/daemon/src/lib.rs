/**
 * The broker role: verifies workload attestations,
 *  hands out request tokens and relays ciphertext.
 */
pub mod broker;
/**
 * The client role: picks workloads it trusts and
 *  seals prompts to them.
 */
pub mod client;
/**
 * Google Cloud collaborators: metadata server,
 *  Compute Engine and the Confidential Space launcher.
 */
pub mod gcp;
pub mod http_server;
pub mod process;
pub mod service_config;
pub mod service_state;
/**
 * The workload role: answers prompts inside the TEE
 *  and keeps its attestation published.
 */
pub mod workload;

// App state (configuration, paths)
pub mod state;

pub use process::{spawn_broker, spawn_workload, start_broker, start_workload, ShutdownHandle};
pub use service_config::{BrokerServiceConfig, WorkloadServiceConfig};
pub use service_state::{BrokerState, WorkloadState};
pub use state::{AppConfig, AppState, StateError};
