use std::time::Duration;

use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};

use common::attestation::AttestationVerifier;

use caims_daemon::broker::BrokerEndpoint;
use caims_daemon::client::{Client as PromptClient, ClientError as PromptError};
use caims_daemon::http_server::api::client::ApiError;
use caims_daemon::process::{init_logging, LogOutput};

#[derive(Args, Debug, Clone)]
pub struct Client {
    /// Broker to send prompts through (default from config)
    #[arg(long)]
    pub broker: Option<BrokerEndpoint>,

    /// Accept workloads whose VM allows debugging
    #[arg(long)]
    pub debug: bool,

    /// Send a single prompt instead of reading lines from stdin
    #[arg(long)]
    pub prompt: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("state error: {0}")]
    StateError(#[from] caims_daemon::state::StateError),

    #[error("no broker given: pass --broker or set [client] broker_endpoint")]
    MissingBroker,

    #[error("invalid broker endpoint in config: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("failed to reach broker: {0}")]
    Api(#[from] ApiError),

    #[error("prompt failed: {0}")]
    Prompt(#[from] PromptError),

    #[error("failed to read stdin: {0}")]
    Io(#[from] std::io::Error),

    #[error("interrupted")]
    Interrupted,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Client {
    type Error = ClientError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.state()?;
        let file = &state.config.client;
        // stdout carries replies only
        let _guards = init_logging(state.config.log_level(), None, LogOutput::Stderr);

        let endpoint = match &self.broker {
            Some(endpoint) => endpoint.clone(),
            None => file
                .broker_endpoint
                .as_deref()
                .ok_or(ClientError::MissingBroker)?
                .parse()?,
        };

        let verifier = AttestationVerifier::confidential_space(reqwest::Client::new());
        let client = PromptClient::new(endpoint, verifier, self.debug)?
            .with_max_tokens(file.max_tokens_per_prompt);

        let poll_interval = Duration::from_secs(file.poll_interval_secs);
        tracing::info!("waiting for workload instances to become available");
        let tokens = tokio::select! {
            tokens = client.broker().wait_for_tokens(poll_interval) => tokens?,
            _ = tokio::signal::ctrl_c() => return Err(ClientError::Interrupted),
        };
        tracing::info!("{} workload instances available", tokens.len());

        if let Some(prompt) = &self.prompt {
            return Ok(client.prompt(&tokens, prompt).await?);
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut tokens = tokens;
        while let Some(line) = lines.next_line().await? {
            let prompt = line.trim();
            if prompt.is_empty() {
                continue;
            }
            match client.prompt(&tokens, prompt).await {
                Ok(reply) => println!("{}", reply),
                // Offered workloads may have been replaced since we fetched.
                Err(PromptError::NoUsableToken) | Err(PromptError::Broker(_)) => {
                    tracing::warn!("prompt failed, refreshing workload tokens");
                    tokens = client.broker().wait_for_tokens(poll_interval).await?;
                    println!("{}", client.prompt(&tokens, prompt).await?);
                }
                // Usually an over-long prompt; the next line may fit.
                Err(PromptError::Protocol(e)) => eprintln!("Error: prompt failed: {}", e),
                Err(e) => return Err(e.into()),
            }
        }

        Ok(String::new())
    }
}
