//! HTTP transport for the detection service

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::debug;

use super::{DetectResponse, DetectionError, DetectionTransport, Prediction};

/// Detection service reached over `POST {base}/detect` with a multipart body
pub struct HttpDetectionService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDetectionService {
    /// Create a transport for the service rooted at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DetectionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DetectionError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/detect", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn map_reqwest_error(err: reqwest::Error) -> DetectionError {
    if err.is_timeout() {
        DetectionError::Timeout
    } else if err.is_decode() {
        DetectionError::Decode(err.to_string())
    } else {
        DetectionError::Transport(err.to_string())
    }
}

#[async_trait]
impl DetectionTransport for HttpDetectionService {
    async fn detect(&self, jpeg: Vec<u8>) -> Result<Vec<Prediction>, DetectionError> {
        let size = jpeg.len();
        let part = Part::bytes(jpeg)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| DetectionError::Transport(e.to_string()))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DetectionError::Status(status.as_u16()));
        }

        let body: DetectResponse = response.json().await.map_err(map_reqwest_error)?;
        debug!(
            "POST {} ({} bytes) -> {} predictions",
            self.endpoint,
            size,
            body.predictions.len()
        );
        Ok(body.predictions)
    }
}
