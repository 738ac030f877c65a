use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct Config {
    // Listen address
    pub listen_addr: SocketAddr,
    // log level for http tracing
    pub log_level: tracing::Level,
    // Requests handled at once, the rest wait
    pub max_concurrent_requests: usize,
}

impl Config {
    pub fn new(listen_addr: SocketAddr, max_concurrent_requests: usize) -> Self {
        tracing::info!(
            "Creating HTTP server Config: listen_addr={}, max_concurrent_requests={}",
            listen_addr,
            max_concurrent_requests
        );
        Self {
            listen_addr,
            log_level: tracing::Level::INFO,
            max_concurrent_requests: max_concurrent_requests.max(1),
        }
    }
}
