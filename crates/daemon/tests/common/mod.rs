//! Shared test utilities for running broker and workload servers in-process
#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use url::Url;

use caims_daemon::broker::{
    Broker, BrokerEndpoint, BrokerPolicy, HttpWorkloadTransport, Registration, RequestToken,
};
use caims_daemon::http_server::{broker_router, workload_router, Config};
use caims_daemon::workload::{EchoEngine, Workload};
use caims_daemon::{BrokerState, WorkloadState};
use common::crypto::HybridKeyPair;
use common::protocol::DEFAULT_MAX_MESSAGE_SIZE;
use common::testkit::TestAuthority;

pub const PROJECT: &str = "test-project";
pub const ZONE: &str = "us-central1-a";

fn config() -> Config {
    Config::new(SocketAddr::from(([127, 0, 0, 1], 0)), 4)
}

/// Bind an ephemeral port and report the URL it answers on.
pub async fn bind() -> (TcpListener, Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, Url::parse(&format!("http://{}/", addr)).unwrap())
}

pub fn serve(listener: TcpListener, router: Router) {
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
}

/// A registered workload server listening on an ephemeral port
pub struct RunningWorkload {
    pub workload: Arc<Workload>,
    pub url: Url,
}

pub async fn start_workload() -> RunningWorkload {
    let workload = Arc::new(Workload::new(HybridKeyPair::generate(), Arc::new(EchoEngine)));
    workload.mark_registered();

    let (listener, url) = bind().await;
    let state = WorkloadState::new(workload.clone(), DEFAULT_MAX_MESSAGE_SIZE);
    serve(listener, workload_router(&config(), state));

    RunningWorkload { workload, url }
}

/// A broker listening on an ephemeral port whose transport reaches every
/// registration at `workload_url`
pub struct RunningBroker {
    pub broker: Arc<Broker>,
    pub endpoint: BrokerEndpoint,
}

pub async fn start_broker(
    authority: &TestAuthority,
    policy: BrokerPolicy,
    workload_url: Url,
) -> RunningBroker {
    let (listener, url) = bind().await;
    let endpoint = BrokerEndpoint::new(url);

    let target = workload_url.to_string();
    let transport =
        HttpWorkloadTransport::with_resolver(Arc::new(move |_: &Registration| target.clone()))
            .unwrap();
    let broker = Arc::new(Broker::new(
        endpoint.clone(),
        policy,
        authority.verifier(),
        Arc::new(transport),
    ));
    serve(listener, broker_router(&config(), BrokerState::new(broker.clone())));

    RunningBroker { broker, endpoint }
}

/// Publish a token for `workload` under `instance_name` and return it.
pub fn register(
    authority: &TestAuthority,
    broker: &RunningBroker,
    workload: &Workload,
    instance_name: &str,
    production: bool,
) -> RequestToken {
    let token = authority
        .token(broker.endpoint.audience())
        .production(production)
        .instance(instance_name, ZONE, PROJECT)
        .request_key(workload.public_key())
        .sign();

    let mut registrations = (*broker.broker.registrations()).clone();
    registrations.insert(Registration {
        project_id: PROJECT.to_string(),
        zone: ZONE.to_string(),
        instance_name: instance_name.to_string(),
        attestation_token: token.clone(),
    });
    broker.broker.refresh_registrations(registrations);

    RequestToken::new(token)
}

pub fn clear(broker: &RunningBroker) {
    broker.broker.refresh_registrations(HashSet::new());
}
