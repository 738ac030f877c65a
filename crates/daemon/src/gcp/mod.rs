//! Google Cloud collaborators
//!
//! Thin REST clients for the pieces of the platform the broker and workload
//! depend on: the metadata server, the Compute Engine API, and the
//! Confidential Space launcher's token endpoint.

mod compute;
mod metadata;
mod tee_server;

pub use compute::ComputeInstanceDirectory;
pub use metadata::{MetadataClient, MetadataError};
pub use tee_server::{ConfidentialSpace, TeeError, TEE_SERVER_SOCKET_PATH};

/// Guest attribute namespace workloads publish under
pub const GUEST_ATTRIBUTE_NAMESPACE: &str = "workload-server";
/// Guest attribute key holding a workload's attestation token
pub const TOKEN_GUEST_ATTRIBUTE: &str = "token";
/// Instance metadata key present on every Confidential Space VM
pub const TEE_IMAGE_METADATA_KEY: &str = "tee-image-reference";

/// Strip the resource path from a zone or region reference.
///
/// The APIs return either `us-central1-a` or a URL such as
/// `https://www.googleapis.com/compute/v1/projects/p/zones/us-central1-a`.
pub(crate) fn short_name(resource: &str) -> &str {
    resource.rsplit('/').next().unwrap_or(resource)
}

#[cfg(test)]
pub(crate) mod test_server {
    use std::net::SocketAddr;

    use axum::Router;
    use url::Url;

    /// Serve `router` on an ephemeral local port.
    pub async fn spawn(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{}/", addr)).unwrap()
    }
}
