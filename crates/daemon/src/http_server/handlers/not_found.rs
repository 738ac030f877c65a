use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Fallback for unknown routes, JSON when the caller asks for it
pub async fn not_found_handler(method: Method, uri: Uri, headers: HeaderMap) -> Response {
    tracing::debug!(%method, path = uri.path(), "no route");

    let wants_json = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"));

    if wants_json {
        let body = serde_json::json!({"msg": "not found", "path": uri.path()});
        return (StatusCode::NOT_FOUND, Json(body)).into_response();
    }
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/plain")],
        "not found",
    )
        .into_response()
}
