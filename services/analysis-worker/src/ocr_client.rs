//! Vision OCR boundary.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use sheetscan_models::OcrPayload;
use sheetscan_utils::OcrConfig;

use crate::error::AnalysisError;

const READ_PATH: &str = "computervision/imageanalysis:analyze";
const API_VERSION: &str = "2023-10-01";

#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Reads the text off one rendered page image.
    async fn recognize(&self, image: &[u8]) -> Result<OcrPayload, AnalysisError>;
}

/// Client for the hosted image-analysis `read` feature.
pub struct VisionOcrClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl VisionOcrClient {
    pub fn new(config: &OcrConfig) -> Result<Self, AnalysisError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AnalysisError::unexpected(format!("Failed to create OCR client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn read_url(&self) -> String {
        format!("{}/{}", self.endpoint, READ_PATH)
    }
}

#[async_trait]
impl TextRecognizer for VisionOcrClient {
    async fn recognize(&self, image: &[u8]) -> Result<OcrPayload, AnalysisError> {
        let response = self
            .client
            .post(self.read_url())
            .query(&[("features", "read"), ("api-version", API_VERSION)])
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header("Content-Type", "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| AnalysisError::unexpected(format!("Failed to call OCR service: {}", e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AnalysisError::RateLimited {
                service: "ocr".to_string(),
            });
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AnalysisError::unexpected(format!(
                "OCR service error {}: {}",
                status, error_text
            )));
        }

        let payload: OcrPayload = response
            .json()
            .await
            .map_err(|e| AnalysisError::unexpected(format!("Failed to parse OCR response: {}", e)))?;

        debug!(lines = payload.lines().count(), "OCR page read");
        Ok(payload)
    }
}
