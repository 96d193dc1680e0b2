//! Where document bytes come from.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

use sheetscan_models::DocumentSourceKind;
use sheetscan_utils::DocumentConfig;

use crate::error::AnalysisError;

#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub bytes: Vec<u8>,
    /// Last path segment of the URI, used for extension-based type hints.
    pub file_name: String,
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, uri: &str, kind: DocumentSourceKind) -> Result<FetchedDocument, AnalysisError>;
}

pub struct HttpDocumentSource {
    client: Client,
    object_store_host: Option<String>,
    repository_token: Option<String>,
}

impl HttpDocumentSource {
    pub fn new(config: &DocumentConfig, timeout: Duration) -> Result<Self, AnalysisError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalysisError::unexpected(format!("Failed to create HTTP client: {}", e)))?;

        let object_store_host = Url::parse(&config.object_store_base_uri)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase));

        Ok(Self {
            client,
            object_store_host,
            repository_token: config.repository_token.clone(),
        })
    }

    /// Object-store URIs must point at the configured account.
    fn check_object_store(&self, url: &Url) -> Result<(), AnalysisError> {
        let host = url.host_str().map(str::to_ascii_lowercase);
        match (&self.object_store_host, host) {
            (Some(expected), Some(actual)) if *expected == actual => Ok(()),
            _ => Err(AnalysisError::ResourceNotFound {
                uri: url.to_string(),
            }),
        }
    }
}

pub fn file_name_of(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl DocumentSource for HttpDocumentSource {
    async fn fetch(&self, uri: &str, kind: DocumentSourceKind) -> Result<FetchedDocument, AnalysisError> {
        let url = Url::parse(uri).map_err(|_| AnalysisError::ResourceNotFound {
            uri: uri.to_string(),
        })?;

        let mut request = self.client.get(url.clone());
        match kind {
            DocumentSourceKind::ObjectStore => self.check_object_store(&url)?,
            DocumentSourceKind::DocumentRepository => {
                if let Some(token) = &self.repository_token {
                    request = request.bearer_auth(token);
                }
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| AnalysisError::unexpected(format!("Failed to download {}: {}", uri, e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(AnalysisError::ResourceNotFound {
                    uri: uri.to_string(),
                })
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(AnalysisError::RateLimited {
                    service: kind.to_string(),
                })
            }
            status if !status.is_success() => {
                return Err(AnalysisError::unexpected(format!(
                    "Download of {} failed with {}",
                    uri, status
                )))
            }
            _ => {}
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AnalysisError::unexpected(format!("Failed to read {}: {}", uri, e)))?
            .to_vec();

        debug!(uri, source = %kind, bytes = bytes.len(), "Document fetched");
        Ok(FetchedDocument {
            bytes,
            file_name: file_name_of(&url),
        })
    }
}
