use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;

use common::attestation::AttestationToken;

use super::{Broker, Registration};
use crate::gcp::{GUEST_ATTRIBUTE_NAMESPACE, TOKEN_GUEST_ATTRIBUTE};

/// How often the instance directory is rescanned
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(60);

/// A running VM that may host a workload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceRef {
    pub project_id: String,
    /// Short zone name, e.g. `us-central1-a`
    pub zone: String,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    Default(#[from] anyhow::Error),
}

/// Enumerates candidate workload VMs and reads what they published
#[async_trait::async_trait]
pub trait InstanceDirectory: Send + Sync {
    /// Running instances that are configured to host a workload.
    async fn list_instances(&self) -> Result<Vec<InstanceRef>, DirectoryError>;

    /// Read a guest attribute, `None` if the instance never set it.
    async fn guest_attribute(
        &self,
        instance: &InstanceRef,
        namespace: &str,
        key: &str,
    ) -> Result<Option<String>, DirectoryError>;
}

/// Periodically rebuilds the broker's registration set from the instance
/// directory
pub struct DiscoveryDaemon {
    broker: Arc<Broker>,
    directory: Arc<dyn InstanceDirectory>,
    interval: Duration,
}

impl DiscoveryDaemon {
    pub fn new(broker: Arc<Broker>, directory: Arc<dyn InstanceDirectory>) -> Self {
        Self {
            broker,
            directory,
            interval: DEFAULT_DISCOVERY_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// One discovery cycle.
    ///
    /// Instances without a published token are left out. If the listing
    /// itself fails the previous registration set stays in place.
    pub async fn run_once(&self) -> Result<usize, DirectoryError> {
        let instances = self.directory.list_instances().await?;

        let reads = instances.into_iter().map(|instance| async move {
            let token = self
                .directory
                .guest_attribute(&instance, GUEST_ATTRIBUTE_NAMESPACE, TOKEN_GUEST_ATTRIBUTE)
                .await;
            (instance, token)
        });

        let mut registrations = HashSet::new();
        for (instance, token) in join_all(reads).await {
            match token {
                Ok(Some(token)) if !token.trim().is_empty() => {
                    registrations.insert(Registration {
                        project_id: instance.project_id,
                        zone: instance.zone,
                        instance_name: instance.name,
                        attestation_token: AttestationToken::new(token.trim()),
                    });
                }
                Ok(_) => {
                    tracing::debug!(instance = %instance.name, "instance has not registered yet");
                }
                Err(e) => {
                    tracing::warn!(
                        instance = %instance.name,
                        "failed to read registration token: {}",
                        e
                    );
                }
            }
        }

        let count = registrations.len();
        self.broker.refresh_registrations(registrations);
        Ok(count)
    }

    /// Run discovery cycles until `shutdown_rx` fires.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => break,
            }

            tokio::select! {
                result = self.run_once() => match result {
                    Ok(count) => tracing::info!(count, "refreshed workload registrations"),
                    Err(e) => tracing::error!("discovery cycle failed, keeping previous registrations: {}", e),
                },
                _ = shutdown_rx.changed() => break,
            }
        }

        tracing::info!("discovery daemon stopped");
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use parking_lot::Mutex;

    use common::attestation::AttestationVerifier;
    use common::protocol::EncryptedMessage;
    use common::testkit::TestAuthority;

    use super::*;
    use crate::broker::{BrokerPolicy, TransportError, WorkloadTransport};

    struct NoTransport;

    #[async_trait::async_trait]
    impl WorkloadTransport for NoTransport {
        async fn send(
            &self,
            _registration: &Registration,
            _message: &EncryptedMessage,
        ) -> Result<EncryptedMessage, TransportError> {
            Err(TransportError::Status(reqwest::StatusCode::NOT_IMPLEMENTED))
        }
    }

    #[derive(Default)]
    struct FakeDirectory {
        instances: Mutex<Option<Vec<InstanceRef>>>,
        tokens: Mutex<HashMap<String, String>>,
        broken: Vec<String>,
    }

    impl FakeDirectory {
        fn instance(name: &str) -> InstanceRef {
            InstanceRef {
                project_id: "my-project".to_string(),
                zone: "us-central1-a".to_string(),
                name: name.to_string(),
            }
        }
    }

    #[async_trait::async_trait]
    impl InstanceDirectory for FakeDirectory {
        async fn list_instances(&self) -> Result<Vec<InstanceRef>, DirectoryError> {
            self.instances
                .lock()
                .clone()
                .ok_or_else(|| DirectoryError::Default(anyhow::anyhow!("listing unavailable")))
        }

        async fn guest_attribute(
            &self,
            instance: &InstanceRef,
            namespace: &str,
            key: &str,
        ) -> Result<Option<String>, DirectoryError> {
            assert_eq!(namespace, GUEST_ATTRIBUTE_NAMESPACE);
            assert_eq!(key, TOKEN_GUEST_ATTRIBUTE);
            if self.broken.contains(&instance.name) {
                return Err(DirectoryError::Default(anyhow::anyhow!("read failed")));
            }
            Ok(self.tokens.lock().get(&instance.name).cloned())
        }
    }

    fn broker(verifier: AttestationVerifier) -> Arc<Broker> {
        Arc::new(Broker::new(
            "https://broker.example.com/".parse().unwrap(),
            BrokerPolicy::default(),
            verifier,
            Arc::new(NoTransport),
        ))
    }

    #[tokio::test]
    async fn test_run_once_collects_published_tokens() {
        let broker = broker(TestAuthority::new().verifier());
        let directory = Arc::new(FakeDirectory {
            broken: vec!["broken".to_string()],
            ..Default::default()
        });
        *directory.instances.lock() = Some(vec![
            FakeDirectory::instance("ready"),
            FakeDirectory::instance("booting"),
            FakeDirectory::instance("broken"),
        ]);
        directory
            .tokens
            .lock()
            .insert("ready".to_string(), "token-ready\n".to_string());

        let daemon = DiscoveryDaemon::new(broker.clone(), directory);
        assert_eq!(daemon.run_once().await.unwrap(), 1);

        let registrations = broker.registrations();
        let registration = registrations.iter().next().unwrap();
        assert_eq!(registration.instance_name, "ready");
        assert_eq!(registration.zone, "us-central1-a");
        assert_eq!(registration.attestation_token.as_str(), "token-ready");
        assert_eq!(broker.generation(), 1);
    }

    #[tokio::test]
    async fn test_listing_failure_keeps_previous_set() {
        let broker = broker(TestAuthority::new().verifier());
        let directory = Arc::new(FakeDirectory::default());
        *directory.instances.lock() = Some(vec![FakeDirectory::instance("a")]);
        directory
            .tokens
            .lock()
            .insert("a".to_string(), "token-a".to_string());

        let daemon = DiscoveryDaemon::new(broker.clone(), directory.clone());
        daemon.run_once().await.unwrap();

        *directory.instances.lock() = None;
        assert!(daemon.run_once().await.is_err());
        assert_eq!(broker.registrations().len(), 1);
        assert_eq!(broker.generation(), 1);
    }

    #[tokio::test]
    async fn test_vanished_instances_are_dropped() {
        let broker = broker(TestAuthority::new().verifier());
        let directory = Arc::new(FakeDirectory::default());
        *directory.instances.lock() = Some(vec![
            FakeDirectory::instance("a"),
            FakeDirectory::instance("b"),
        ]);
        directory
            .tokens
            .lock()
            .extend([("a".to_string(), "ta".to_string()), ("b".to_string(), "tb".to_string())]);

        let daemon = DiscoveryDaemon::new(broker.clone(), directory.clone());
        assert_eq!(daemon.run_once().await.unwrap(), 2);

        *directory.instances.lock() = Some(vec![FakeDirectory::instance("b")]);
        assert_eq!(daemon.run_once().await.unwrap(), 1);
        assert!(broker
            .registrations()
            .iter()
            .all(|r| r.instance_name == "b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let broker = broker(TestAuthority::new().verifier());
        let directory = Arc::new(FakeDirectory::default());
        *directory.instances.lock() = Some(Vec::new());

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let daemon = DiscoveryDaemon::new(broker.clone(), directory)
            .with_interval(Duration::from_secs(60));
        let handle = tokio::spawn(daemon.run(shutdown_rx));

        // first tick fires immediately
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(broker.generation(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(broker.generation(), 2);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_recovers_after_failed_cycle() {
        let broker = broker(TestAuthority::new().verifier());
        let directory = Arc::new(FakeDirectory::default());
        directory
            .tokens
            .lock()
            .insert("a".to_string(), "token-a".to_string());

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let daemon = DiscoveryDaemon::new(broker.clone(), directory.clone())
            .with_interval(Duration::from_secs(60));
        let handle = tokio::spawn(daemon.run(shutdown_rx));

        // listing unavailable on the first tick
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(broker.generation(), 0);

        *directory.instances.lock() = Some(vec![FakeDirectory::instance("a")]);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(broker.generation(), 1);
        assert_eq!(broker.registrations().len(), 1);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
