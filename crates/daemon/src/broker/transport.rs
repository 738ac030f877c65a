use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};

use common::protocol::{EncryptedMessage, ProtocolError};

use super::Registration;

/// Port workload servers listen on
pub const DEFAULT_WORKLOAD_PORT: u16 = 8080;
/// Largest reply frame accepted from a workload
pub const DEFAULT_MAX_REPLY_SIZE: usize = 16 * 1024;

const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("workload answered with HTTP status {0}")]
    Status(StatusCode),
    #[error("invalid reply from workload: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Delivers sealed payloads to workload instances
#[async_trait::async_trait]
pub trait WorkloadTransport: Send + Sync {
    /// Send one frame to `registration` and return its sealed reply.
    async fn send(
        &self,
        registration: &Registration,
        message: &EncryptedMessage,
    ) -> Result<EncryptedMessage, TransportError>;
}

/// Maps a registration to the URL its workload server answers on
pub type AddressResolver = Arc<dyn Fn(&Registration) -> String + Send + Sync>;

/// POSTs frames to workload servers over plain HTTP on the VPC
///
/// Confidentiality does not depend on the channel; payloads are sealed end
/// to end.
pub struct HttpWorkloadTransport {
    client: Client,
    resolver: AddressResolver,
    max_reply_size: usize,
}

impl fmt::Debug for HttpWorkloadTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpWorkloadTransport")
            .field("max_reply_size", &self.max_reply_size)
            .finish()
    }
}

impl HttpWorkloadTransport {
    /// Reach workloads by their internal DNS name on `port`.
    pub fn new(port: u16) -> Result<Self, TransportError> {
        Self::with_resolver(Arc::new(move |registration: &Registration| {
            format!("http://{}:{}/", registration.internal_hostname(), port)
        }))
    }

    pub fn with_resolver(resolver: AddressResolver) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(FORWARD_TIMEOUT).build()?;
        Ok(Self {
            client,
            resolver,
            max_reply_size: DEFAULT_MAX_REPLY_SIZE,
        })
    }
}

#[async_trait::async_trait]
impl WorkloadTransport for HttpWorkloadTransport {
    async fn send(
        &self,
        registration: &Registration,
        message: &EncryptedMessage,
    ) -> Result<EncryptedMessage, TransportError> {
        let url = (self.resolver)(registration);
        let response = self
            .client
            .post(url)
            .header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            )
            .body(message.to_frame()?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status()));
        }

        let body = response.bytes().await?;
        Ok(EncryptedMessage::from_frame(&body, self.max_reply_size)?)
    }
}
