use reqwest::Client;
use url::Url;

use common::protocol::EncryptedMessage;

use super::error::ApiError;
use super::ApiRequest;
use crate::broker::{WorkloadRequest, DEFAULT_MAX_REPLY_SIZE};
use crate::http_server::api::broker::FORWARD_PATH;

#[derive(Debug, Clone)]
pub struct ApiClient {
    pub remote: Url,
    client: Client,
}

impl ApiClient {
    pub fn new(remote: &Url) -> Result<Self, ApiError> {
        let client = Client::builder().build()?;

        Ok(Self {
            remote: remote.clone(),
            client,
        })
    }

    pub async fn call<T: ApiRequest>(&self, request: T) -> Result<T::Response, ApiError> {
        let request_builder = request.build_request(&self.remote, &self.client);
        let response = request_builder.send().await?;

        if response.status().is_success() {
            Ok(response.json::<T::Response>().await?)
        } else {
            Err(ApiError::HttpStatus(
                response.status(),
                response.text().await?,
            ))
        }
    }

    /// Hand sealed candidates to the broker and read back the framed reply
    pub async fn forward(&self, requests: &[WorkloadRequest]) -> Result<EncryptedMessage, ApiError> {
        let url = self.remote.join(FORWARD_PATH)?;
        let response = self.client.post(url).json(requests).send().await?;

        if !response.status().is_success() {
            return Err(ApiError::HttpStatus(
                response.status(),
                response.text().await?,
            ));
        }
        let body = response.bytes().await?;
        Ok(EncryptedMessage::from_frame(&body, DEFAULT_MAX_REPLY_SIZE)?)
    }
}
