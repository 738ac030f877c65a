use std::fmt::Debug;
use std::ops::Deref;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use http::request::Parts;

/// Whatever a role server must have in place before it takes traffic
#[async_trait]
pub trait DataSource {
    async fn is_ready(&self) -> Result<(), DataSourceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    /// The reason is reported to the caller, so it must not carry secrets.
    #[error("not ready: {0}")]
    DependencyFailure(String),

    #[error("shutting down")]
    ShuttingDown,
}

pub type DynDataSource = Arc<dyn DataSource + Send + Sync>;

/// Extractor for the readiness source of a router's state
pub struct StateDataSource(DynDataSource);

impl Debug for StateDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StateDataSource(..)")
    }
}

impl StateDataSource {
    pub fn new(source: DynDataSource) -> Self {
        Self(source)
    }
}

impl Deref for StateDataSource {
    type Target = DynDataSource;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for StateDataSource
where
    DynDataSource: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ();

    async fn from_request_parts(_parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(DynDataSource::from_ref(state)))
    }
}
