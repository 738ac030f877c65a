use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use super::short_name;
use crate::workload::GuestAttributePublisher;

const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("invalid guest attribute name {0:?}: must not contain '/'")]
    InvalidName(String),
    #[error("metadata server request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("metadata server answered {0}: {1}")]
    Status(StatusCode, String),
    #[error("invalid metadata URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("unexpected metadata value: {0}")]
    Unexpected(String),
}

/// OAuth access token of the VM's (or service's) default service account
#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    /// Seconds until expiry
    pub expires_in: u64,
}

/// Client for the instance metadata server
///
/// Available on Compute Engine and Cloud Run alike. The host can be
/// overridden through `GCE_METADATA_HOST`.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    base_url: Url,
    client: Client,
}

impl MetadataClient {
    pub fn new() -> Result<Self, MetadataError> {
        let host = std::env::var("GCE_METADATA_HOST")
            .ok()
            .filter(|host| !host.is_empty())
            .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());
        Self::with_base_url(Url::parse(&format!("http://{}/", host))?)
    }

    pub fn with_base_url(base_url: Url) -> Result<Self, MetadataError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert("Metadata-Flavor", HeaderValue::from_static("Google"));
        let client = Client::builder()
            .default_headers(default_headers)
            .timeout(METADATA_TIMEOUT)
            .build()?;

        Ok(Self { base_url, client })
    }

    fn url(&self, path: &str) -> Result<Url, MetadataError> {
        Ok(self
            .base_url
            .join("computeMetadata/v1/")?
            .join(path)?)
    }

    async fn get(&self, path: &str) -> Result<String, MetadataError> {
        let response = self.client.get(self.url(path)?).send().await?;
        if !response.status().is_success() {
            return Err(MetadataError::Status(
                response.status(),
                response.text().await?,
            ));
        }
        Ok(response.text().await?.trim().to_string())
    }

    pub async fn project_id(&self) -> Result<String, MetadataError> {
        self.get("project/project-id").await
    }

    pub async fn numeric_project_id(&self) -> Result<String, MetadataError> {
        self.get("project/numeric-project-id").await
    }

    /// Short name of the zone the VM runs in.
    pub async fn zone(&self) -> Result<String, MetadataError> {
        let zone = self.get("instance/zone").await?;
        Ok(short_name(&zone).to_string())
    }

    /// Region the workload runs in.
    ///
    /// Cloud Run reports it directly; on Compute Engine it is derived from
    /// the zone.
    pub async fn region(&self) -> Result<String, MetadataError> {
        match self.get("instance/region").await {
            Ok(region) => Ok(short_name(&region).to_string()),
            Err(MetadataError::Status(StatusCode::NOT_FOUND, _)) => {
                let zone = self.zone().await?;
                zone.rsplit_once('-')
                    .map(|(region, _)| region.to_string())
                    .ok_or(MetadataError::Unexpected(zone))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn access_token(&self) -> Result<AccessToken, MetadataError> {
        let response = self
            .client
            .get(self.url("instance/service-accounts/default/token")?)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MetadataError::Status(
                response.status(),
                response.text().await?,
            ));
        }
        Ok(response.json().await?)
    }

    /// Publish a guest attribute on the current VM.
    pub async fn set_guest_attribute(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<(), MetadataError> {
        for name in [namespace, key] {
            if name.is_empty() || name.contains('/') {
                return Err(MetadataError::InvalidName(name.to_string()));
            }
        }

        let url = self.url(&format!("instance/guest-attributes/{}/{}", namespace, key))?;
        let response = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(value.to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MetadataError::Status(
                response.status(),
                response.text().await?,
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl GuestAttributePublisher for MetadataClient {
    async fn publish(&self, namespace: &str, key: &str, value: &str) -> Result<(), MetadataError> {
        self.set_guest_attribute(namespace, key, value).await
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use parking_lot::Mutex;

    use super::*;
    use crate::gcp::test_server;

    type Attributes = Arc<Mutex<HashMap<String, String>>>;

    fn flavored(headers: &HeaderMap) -> bool {
        headers
            .get("Metadata-Flavor")
            .and_then(|v| v.to_str().ok())
            == Some("Google")
    }

    async fn fake_metadata_server(region: bool) -> (MetadataClient, Attributes) {
        let attributes: Attributes = Arc::default();

        let mut router = Router::new()
            .route(
                "/computeMetadata/v1/project/project-id",
                get(|| async { "my-project" }),
            )
            .route(
                "/computeMetadata/v1/project/numeric-project-id",
                get(|| async { "123456\n" }),
            )
            .route(
                "/computeMetadata/v1/instance/zone",
                get(|| async { "projects/123456/zones/us-central1-a" }),
            )
            .route(
                "/computeMetadata/v1/instance/service-accounts/default/token",
                get(|| async {
                    Json(serde_json::json!({
                        "access_token": "ya29.token",
                        "expires_in": 3599,
                        "token_type": "Bearer"
                    }))
                }),
            )
            .route(
                "/computeMetadata/v1/instance/guest-attributes/:namespace/:key",
                put(
                    |State(attributes): State<Attributes>,
                     Path((namespace, key)): Path<(String, String)>,
                     headers: HeaderMap,
                     body: String| async move {
                        if !flavored(&headers) {
                            return StatusCode::FORBIDDEN;
                        }
                        attributes
                            .lock()
                            .insert(format!("{}/{}", namespace, key), body);
                        StatusCode::OK
                    },
                ),
            );
        if region {
            router = router.route(
                "/computeMetadata/v1/instance/region",
                get(|| async { "projects/123456/regions/europe-west4" }),
            );
        }

        let url = test_server::spawn(router.with_state(attributes.clone())).await;
        (MetadataClient::with_base_url(url).unwrap(), attributes)
    }

    #[tokio::test]
    async fn test_project_metadata() {
        let (client, _) = fake_metadata_server(false).await;
        assert_eq!(client.project_id().await.unwrap(), "my-project");
        assert_eq!(client.numeric_project_id().await.unwrap(), "123456");
        assert_eq!(client.zone().await.unwrap(), "us-central1-a");
        assert_eq!(client.access_token().await.unwrap().access_token, "ya29.token");
    }

    #[tokio::test]
    async fn test_region() {
        let (client, _) = fake_metadata_server(false).await;
        assert_eq!(client.region().await.unwrap(), "us-central1");

        let (client, _) = fake_metadata_server(true).await;
        assert_eq!(client.region().await.unwrap(), "europe-west4");
    }

    #[tokio::test]
    async fn test_set_guest_attribute() {
        let (client, attributes) = fake_metadata_server(false).await;
        client
            .set_guest_attribute("workload-server", "token", "eyJ.a.b")
            .await
            .unwrap();
        assert_eq!(
            attributes.lock().get("workload-server/token").map(String::as_str),
            Some("eyJ.a.b")
        );
    }

    #[tokio::test]
    async fn test_guest_attribute_names_are_validated() {
        let (client, attributes) = fake_metadata_server(false).await;

        let err = client
            .set_guest_attribute("workload/server", "token", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::InvalidName(_)));

        let err = client
            .set_guest_attribute("workload-server", "to/ken", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::InvalidName(_)));

        assert!(attributes.lock().is_empty());
    }
}
