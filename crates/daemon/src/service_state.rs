use std::sync::Arc;

use axum::extract::FromRef;

use crate::broker::Broker;
use crate::http_server::health::DynDataSource;
use crate::workload::Workload;

/// Shared state of the broker's HTTP server
#[derive(Clone)]
pub struct BrokerState {
    broker: Arc<Broker>,
}

impl BrokerState {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }
}

impl FromRef<BrokerState> for DynDataSource {
    fn from_ref(state: &BrokerState) -> Self {
        state.broker.clone()
    }
}

/// Shared state of the workload's HTTP server
#[derive(Clone)]
pub struct WorkloadState {
    workload: Arc<Workload>,
    max_message_size: usize,
}

impl WorkloadState {
    pub fn new(workload: Arc<Workload>, max_message_size: usize) -> Self {
        Self {
            workload,
            max_message_size,
        }
    }

    pub fn workload(&self) -> &Arc<Workload> {
        &self.workload
    }

    /// Largest request ciphertext accepted
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

impl FromRef<WorkloadState> for DynDataSource {
    fn from_ref(state: &WorkloadState) -> Self {
        state.workload.clone()
    }
}
