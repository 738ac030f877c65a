use clap::Args;

use caims_daemon::state::{AppConfig, AppState};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Public URL of the broker, written to the workload and client sections
    #[arg(long)]
    pub broker: Option<String>,

    /// Port the broker and workload listen on
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] caims_daemon::state::StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = AppConfig::default();
        config.broker.listen_port = self.port;
        config.broker.endpoint = self.broker.clone();
        config.workload.listen_port = self.port;
        config.workload.broker_endpoint = self.broker.clone();
        config.client.broker_endpoint = self.broker.clone();

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;

        let output = format!(
            "Initialized caims directory at: {}\n\
             - Config: {}\n\
             - Listen port: {}\n\
             - Broker: {}",
            state.caims_dir.display(),
            state.config_path.display(),
            self.port,
            self.broker.as_deref().unwrap_or("derived from project metadata"),
        );

        Ok(output)
    }
}
