use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use sheetscan_utils::SheetscanResult;

use crate::blob::BlobStore;

/// The shared keyword set. Every write bumps `version` so a document's
/// persisted keyword list can be traced back to the set it was resolved from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalKeywords {
    pub id: String,
    pub version: u64,
    pub keywords: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl GlobalKeywords {
    pub fn empty() -> Self {
        Self {
            id: "default".to_string(),
            version: 0,
            keywords: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

pub struct KeywordStore {
    blobs: Arc<dyn BlobStore>,
    path: String,
}

impl KeywordStore {
    pub fn new(blobs: Arc<dyn BlobStore>, results_root: &str) -> Self {
        Self {
            blobs,
            path: format!("{}/global_keywords.json", results_root.trim_end_matches('/')),
        }
    }

    pub async fn load_global(&self) -> SheetscanResult<GlobalKeywords> {
        match self.blobs.get(&self.path).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(GlobalKeywords::empty()),
        }
    }

    pub async fn store_global(
        &self,
        id: impl Into<String>,
        keywords: Vec<String>,
    ) -> SheetscanResult<GlobalKeywords> {
        let current = self.load_global().await?;

        let mut cleaned: Vec<String> = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            let keyword = keyword.trim().to_string();
            if !keyword.is_empty() && !cleaned.iter().any(|k| k.eq_ignore_ascii_case(&keyword)) {
                cleaned.push(keyword);
            }
        }

        let entry = GlobalKeywords {
            id: id.into(),
            version: current.version + 1,
            keywords: cleaned,
            updated_at: Utc::now(),
        };
        self.blobs.put(&self.path, serde_json::to_vec(&entry)?).await?;

        tracing::info!(id = %entry.id, version = entry.version, count = entry.keywords.len(), "Stored global keywords");
        Ok(entry)
    }
}
