use std::time::{Duration, Instant};

use anyhow::anyhow;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use super::{short_name, MetadataClient, TEE_IMAGE_METADATA_KEY};
use crate::broker::{DirectoryError, InstanceDirectory, InstanceRef};

const COMPUTE_API_URL: &str = "https://compute.googleapis.com/compute/v1/";
const RUNNING_FILTER: &str = "status = \"RUNNING\"";
/// Refresh access tokens this long before they expire
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregatedInstanceList {
    #[serde(default)]
    items: std::collections::HashMap<String, InstancesScopedList>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstancesScopedList {
    #[serde(default)]
    instances: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
struct Instance {
    name: String,
    zone: String,
    #[serde(default)]
    metadata: InstanceMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct InstanceMetadata {
    #[serde(default)]
    items: Vec<MetadataItem>,
}

#[derive(Debug, Deserialize)]
struct MetadataItem {
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GuestAttributes {
    query_value: Option<GuestAttributesValue>,
}

#[derive(Debug, Deserialize)]
struct GuestAttributesValue {
    #[serde(default)]
    items: Vec<GuestAttributeEntry>,
}

#[derive(Debug, Deserialize)]
struct GuestAttributeEntry {
    value: Option<String>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Lists Confidential Space VMs of one project through the Compute Engine
/// REST API
pub struct ComputeInstanceDirectory {
    project_id: String,
    base_url: Url,
    client: Client,
    metadata: MetadataClient,
    token: Mutex<Option<CachedToken>>,
}

impl ComputeInstanceDirectory {
    pub fn new(project_id: impl Into<String>, metadata: MetadataClient) -> Result<Self, DirectoryError> {
        let base_url = Url::parse(COMPUTE_API_URL).map_err(|e| DirectoryError::Default(e.into()))?;
        Self::with_base_url(project_id, metadata, base_url)
    }

    pub fn with_base_url(
        project_id: impl Into<String>,
        metadata: MetadataClient,
        base_url: Url,
    ) -> Result<Self, DirectoryError> {
        Ok(Self {
            project_id: project_id.into(),
            base_url,
            client: Client::builder().build()?,
            metadata,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, DirectoryError> {
        let cached = self
            .token
            .lock()
            .as_ref()
            .filter(|cached| cached.expires_at > Instant::now())
            .map(|cached| cached.value.clone());
        if let Some(token) = cached {
            return Ok(token);
        }

        let token = self
            .metadata
            .access_token()
            .await
            .map_err(|e| DirectoryError::Default(e.into()))?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *self.token.lock() = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    fn url(&self, path: &str) -> Result<Url, DirectoryError> {
        self.base_url
            .join(path)
            .map_err(|e| DirectoryError::Default(e.into()))
    }
}

#[async_trait::async_trait]
impl InstanceDirectory for ComputeInstanceDirectory {
    async fn list_instances(&self) -> Result<Vec<InstanceRef>, DirectoryError> {
        let url = self.url(&format!("projects/{}/aggregated/instances", self.project_id))?;
        let token = self.access_token().await?;

        let mut instances = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .get(url.clone())
                .bearer_auth(&token)
                .query(&[("filter", RUNNING_FILTER), ("returnPartialSuccess", "true")]);
            if let Some(page_token) = &page_token {
                request = request.query(&[("pageToken", page_token)]);
            }

            let page: AggregatedInstanceList = request.send().await?.error_for_status()?.json().await?;

            for scoped in page.items.into_values() {
                for instance in scoped.instances {
                    if !instance
                        .metadata
                        .items
                        .iter()
                        .any(|item| item.key == TEE_IMAGE_METADATA_KEY)
                    {
                        continue;
                    }
                    instances.push(InstanceRef {
                        project_id: self.project_id.clone(),
                        zone: short_name(&instance.zone).to_string(),
                        name: instance.name,
                    });
                }
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(instances)
    }

    async fn guest_attribute(
        &self,
        instance: &InstanceRef,
        namespace: &str,
        key: &str,
    ) -> Result<Option<String>, DirectoryError> {
        let url = self.url(&format!(
            "projects/{}/zones/{}/instances/{}/getGuestAttributes",
            instance.project_id, instance.zone, instance.name
        ))?;
        let token = self.access_token().await?;
        let query_path = format!("{}/{}", namespace, key);

        let response = self
            .client
            .get(url)
            .bearer_auth(&token)
            .query(&[("queryPath", query_path.as_str())])
            .send()
            .await?;

        // Instances that never set the attribute answer 404.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let attributes: GuestAttributes = response.error_for_status()?.json().await?;

        let value = attributes
            .query_value
            .ok_or_else(|| anyhow!("guest attribute response has no queryValue"))?
            .items
            .into_iter()
            .find_map(|item| item.value);
        Ok(value)
    }
}
