use clap::Args;
use url::Url;

#[derive(Args, Debug, Clone)]
pub struct Health {
    /// Broker or workload server to check
    #[arg(long, default_value = "http://localhost:8080")]
    pub remote: Url,
}

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("Health check failed: {0}")]
    Failed(String),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Health {
    type Error = HealthError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut lines = Vec::new();

        lines.push("Config:".to_string());
        match ctx.state() {
            Ok(state) => {
                lines.push(format!("  directory:  {}", state.caims_dir.display()));
                let status = if state.config_path.exists() {
                    "OK"
                } else {
                    "defaults (no config.toml)"
                };
                lines.push(format!("  config:     {}", status));
            }
            Err(e) => {
                lines.push(format!("  error: {}", e));
            }
        }

        let client = reqwest::Client::new();
        let base = self.remote.as_str().trim_end_matches('/');

        lines.push(String::new());
        lines.push(format!("Server ({}):", self.remote));

        for check in ["livez", "readyz"] {
            let url = format!("{}/_status/{}", base, check);
            let line = match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => format!("  {}: OK", check),
                Ok(resp) => format!("  {}: UNHEALTHY ({})", check, resp.status()),
                Err(_) => format!("  {}: NOT REACHABLE", check),
            };
            lines.push(line);
        }

        Ok(lines.join("\n"))
    }
}
