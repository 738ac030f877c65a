use axum::extract::FromRef;
use axum::routing::get;
use axum::Router;

mod data_source;
mod liveness;
mod readiness;
mod version;

pub use data_source::{DataSource, DataSourceError, DynDataSource, StateDataSource};

/// Liveness, readiness, and build info, for any state that can name what it
/// depends on.
pub fn router<S>(state: S) -> Router<S>
where
    DynDataSource: FromRef<S>,
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/livez", get(liveness::handler))
        .route("/readyz", get(readiness::handler))
        .route("/version", get(version::handler))
        .with_state(state)
}
