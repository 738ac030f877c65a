use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST};
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::UnixStream;

use common::attestation::AttestationToken;

use crate::workload::AttestationProvider;

/// Where the Confidential Space launcher exposes its token endpoint
pub const TEE_SERVER_SOCKET_PATH: &str = "/run/container_launcher/teeserver.sock";

const TOKEN_ENDPOINT: &str = "/v1/token";
const TEE_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound on the launcher's reply
const MAX_RESPONSE_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum TeeError {
    #[error("TEE server socket not found at {0}, is this running inside Confidential Space?")]
    SocketNotFound(PathBuf),
    #[error("TEE server I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("TEE server did not answer within {0:?}")]
    Timeout(Duration),
    #[error("HTTP exchange with TEE server failed: {0}")]
    Http(#[from] hyper::Error),
    #[error("failed to build token request: {0}")]
    Request(#[from] http::Error),
    #[error("TEE server answered {0}: {1}")]
    Status(StatusCode, String),
    #[error("TEE server reply exceeds {0} bytes")]
    ResponseTooLarge(usize),
    #[error("malformed TEE server response: {0}")]
    MalformedResponse(String),
    #[error("failed to encode token request: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    audience: &'a str,
    token_type: &'static str,
    nonces: &'a [String],
}

/// Client for the launcher's TEE server, which speaks HTTP/1.1 over a Unix
/// domain socket
#[derive(Debug, Clone)]
pub struct ConfidentialSpace {
    socket_path: PathBuf,
}

impl Default for ConfidentialSpace {
    fn default() -> Self {
        Self::new(TEE_SERVER_SOCKET_PATH)
    }
}

impl ConfidentialSpace {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Request an OIDC attestation token for `audience` carrying `nonces`.
    pub async fn token(
        &self,
        audience: &str,
        nonces: &[String],
    ) -> Result<AttestationToken, TeeError> {
        if !self.socket_path.exists() {
            return Err(TeeError::SocketNotFound(self.socket_path.clone()));
        }

        let body = serde_json::to_vec(&TokenRequest {
            audience,
            token_type: "OIDC",
            nonces,
        })?;
        let request = Request::post(TOKEN_ENDPOINT)
            .header(HOST, "localhost")
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))?;

        tokio::time::timeout(TEE_TIMEOUT, self.send(request))
            .await
            .map_err(|_| TeeError::Timeout(TEE_TIMEOUT))?
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> Result<AttestationToken, TeeError> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (mut sender, connection) =
            hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!("TEE server connection ended: {}", e);
            }
        });

        let response = sender.send_request(request).await?;
        let status = response.status();
        let body = Limited::new(response.into_body(), MAX_RESPONSE_SIZE)
            .collect()
            .await
            .map_err(|e| {
                if e.is::<LengthLimitError>() {
                    TeeError::ResponseTooLarge(MAX_RESPONSE_SIZE)
                } else {
                    TeeError::MalformedResponse(e.to_string())
                }
            })?
            .to_bytes();

        parse_token(status, &body)
    }
}

#[async_trait::async_trait]
impl AttestationProvider for ConfidentialSpace {
    async fn fetch_token(
        &self,
        audience: &str,
        nonces: &[String],
    ) -> Result<AttestationToken, TeeError> {
        self.token(audience, nonces).await
    }
}

fn parse_token(status: StatusCode, body: &[u8]) -> Result<AttestationToken, TeeError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| TeeError::MalformedResponse("body is not UTF-8".to_string()))?;
    if status != StatusCode::OK {
        return Err(TeeError::Status(status, text.trim().to_string()));
    }

    let token = text.trim();
    if !token.starts_with("ey") {
        return Err(TeeError::MalformedResponse("body is not a JWT".to_string()));
    }
    Ok(AttestationToken::new(token))
}

#[cfg(test)]
mod test {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    use super::*;

    const TOKEN: &str = "eyJhbGciOiJSUzI1NiJ9.eyJhdWQiOiJ4In0.c2ln";

    fn content_length(head: &str) -> Option<usize> {
        head.lines().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse().ok())
                .flatten()
        })
    }

    /// Accept one connection, capture the request, answer with `response`
    /// and close.
    fn serve_once(listener: UnixListener, response: String) -> tokio::task::JoinHandle<String> {
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some((head, body)) = text.split_once("\r\n\r\n") {
                    if body.len() >= content_length(head).unwrap_or(0) {
                        break;
                    }
                }
            }
            // The client may hang up early on oversized replies.
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
            String::from_utf8(request).unwrap()
        })
    }

    fn socket() -> (tempfile::TempDir, PathBuf, UnixListener) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("teeserver.sock");
        let listener = UnixListener::bind(&path).unwrap();
        (dir, path, listener)
    }

    #[tokio::test]
    async fn test_fetch_token() {
        let (_dir, path, listener) = socket();
        let server = serve_once(
            listener,
            format!("HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\n{}\n", TOKEN),
        );

        let nonces = vec!["nonce-fragment-1".to_string(), "nonce-fragment-2".to_string()];
        let token = ConfidentialSpace::new(&path)
            .fetch_token("https://broker.example.com/", &nonces)
            .await
            .unwrap();
        assert_eq!(token.as_str(), TOKEN);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/token HTTP/1.1\r\n"));
        let body: serde_json::Value =
            serde_json::from_str(request.split_once("\r\n\r\n").unwrap().1).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "audience": "https://broker.example.com/",
                "token_type": "OIDC",
                "nonces": nonces,
            })
        );
    }

    #[tokio::test]
    async fn test_chunked_reply() {
        let (_dir, path, listener) = socket();
        let _server = serve_once(
            listener,
            format!(
                "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n{:x}\r\n{}\r\n{:x}\r\n{}\r\n0\r\n\r\n",
                10,
                &TOKEN[..10],
                TOKEN.len() - 10,
                &TOKEN[10..]
            ),
        );

        let token = ConfidentialSpace::new(&path)
            .fetch_token("aud", &[])
            .await
            .unwrap();
        assert_eq!(token.as_str(), TOKEN);
    }

    #[tokio::test]
    async fn test_error_status() {
        let (_dir, path, listener) = socket();
        let _server = serve_once(
            listener,
            "HTTP/1.1 400 Bad Request\r\n\r\nbad nonce".to_string(),
        );

        let err = ConfidentialSpace::new(&path)
            .fetch_token("aud", &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TeeError::Status(StatusCode::BAD_REQUEST, ref body) if body == "bad nonce"
        ));
    }

    #[tokio::test]
    async fn test_oversized_reply_is_rejected() {
        let (_dir, path, listener) = socket();
        let huge = format!("ey{}", "A".repeat(MAX_RESPONSE_SIZE));
        let _server = serve_once(
            listener,
            format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                huge.len(),
                huge
            ),
        );

        let err = ConfidentialSpace::new(&path)
            .fetch_token("aud", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, TeeError::ResponseTooLarge(_)));
    }

    #[tokio::test]
    async fn test_reply_must_be_jwt() {
        let (_dir, path, listener) = socket();
        let _server = serve_once(listener, "HTTP/1.1 200 OK\r\n\r\n<html>".to_string());

        let err = ConfidentialSpace::new(&path)
            .fetch_token("aud", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, TeeError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfidentialSpace::new(dir.path().join("absent.sock"))
            .fetch_token("aud", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, TeeError::SocketNotFound(_)));
    }
}
