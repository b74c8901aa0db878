//! HTTP transport for the eco-info service

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{EcoInfoError, EcoInfoRecord, EcoInfoService};

/// Eco-info service reached over `POST {base}/eco-info`
pub struct HttpEcoInfoService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEcoInfoService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EcoInfoError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EcoInfoError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/eco-info", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EcoInfoService for HttpEcoInfoService {
    async fn fetch(&self, object_name: &str) -> Result<EcoInfoRecord, EcoInfoError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "object_name": object_name }))
            .send()
            .await
            .map_err(|e| EcoInfoError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EcoInfoError::Status(status.as_u16()));
        }

        let record: EcoInfoRecord = response
            .json()
            .await
            .map_err(|e| EcoInfoError::Decode(e.to_string()))?;
        debug!("POST {} for {} -> {} videos", self.endpoint, object_name, record.videos.len());
        Ok(record)
    }
}
