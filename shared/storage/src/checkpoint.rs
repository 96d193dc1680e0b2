//! Durable per-document pipeline state.
//!
//! Layout under `{results_root}/documents/{doc_key}/`:
//!
//! ```text
//! page_001/page_text.txt   line texts joined by a space
//! page_001/text.json       raw OCR payload
//! page_001/image.png       rendered page
//! page_001/analysis.json   PageResult, written last
//! file_analysis.json       FileAnalysisResult
//! keywords.json            keywords resolved for this document
//! {processing|finished|failed|queued}.lock
//! ```
//!
//! A page counts as checkpointed once its `analysis.json` exists.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use sheetscan_models::{
    DocumentSourceKind, FileAnalysisResult, MarkerState, OcrPayload, PageResult, StatusMarker,
};
use sheetscan_utils::{SheetscanError, SheetscanResult};

use crate::blob::BlobStore;

/// Deterministic namespace key for a document URI.
pub fn doc_key(uri: &str) -> String {
    STANDARD.encode(uri.as_bytes())
}

pub fn decode_doc_key(key: &str) -> Option<String> {
    let bytes = STANDARD.decode(key).ok()?;
    String::from_utf8(bytes).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageArtifact {
    PageText,
    RawText,
    Image,
    Analysis,
}

impl PageArtifact {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::PageText => "page_text.txt",
            Self::RawText => "text.json",
            Self::Image => "image.png",
            Self::Analysis => "analysis.json",
        }
    }
}

const FILE_RESULT: &str = "file_analysis.json";
const KEYWORDS: &str = "keywords.json";

pub struct CheckpointStore {
    blobs: Arc<dyn BlobStore>,
    root: String,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CheckpointStore {
    pub fn new(blobs: Arc<dyn BlobStore>, results_root: impl Into<String>) -> Self {
        Self {
            blobs,
            root: results_root.into().trim_end_matches('/').to_string(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn results_root(&self) -> &str {
        &self.root
    }

    pub fn blobs(&self) -> Arc<dyn BlobStore> {
        self.blobs.clone()
    }

    pub fn document_prefix(&self, key: &str) -> String {
        format!("{}/documents/{}/", self.root, key)
    }

    pub fn page_path(&self, key: &str, page: u32, artifact: PageArtifact) -> String {
        format!(
            "{}page_{:03}/{}",
            self.document_prefix(key),
            page,
            artifact.file_name()
        )
    }

    fn marker_path(&self, key: &str, marker: StatusMarker) -> String {
        format!("{}{}", self.document_prefix(key), marker.file_name())
    }

    fn document_path(&self, key: &str, name: &str) -> String {
        format!("{}{}", self.document_prefix(key), name)
    }

    // Markers

    pub async fn read_marker(&self, key: &str) -> SheetscanResult<Option<MarkerState>> {
        for marker in StatusMarker::ALL {
            if let Some(bytes) = self.blobs.get(&self.marker_path(key, marker)).await? {
                return Ok(Some(MarkerState {
                    marker,
                    content: String::from_utf8_lossy(&bytes).into_owned(),
                }));
            }
        }
        Ok(None)
    }

    /// Moves a document to `to`, replacing whatever marker it had.
    ///
    /// Serialized per document. Other markers are removed before the new one
    /// is written, so a reader sees at most one marker at any instant.
    pub async fn transition_marker(
        &self,
        key: &str,
        to: StatusMarker,
        content: &str,
    ) -> SheetscanResult<Option<StatusMarker>> {
        let lock = self.document_lock(key).await;
        let result = {
            let _guard = lock.lock().await;
            self.transition_locked(key, to, content).await
        };
        self.release_document_lock(key, lock).await;
        result
    }

    async fn transition_locked(
        &self,
        key: &str,
        to: StatusMarker,
        content: &str,
    ) -> SheetscanResult<Option<StatusMarker>> {
        let from = self.read_marker(key).await?.map(|state| state.marker);
        if !StatusMarker::can_transition(from, to) {
            return Err(SheetscanError::conflict(format!(
                "document {} cannot move from {} to {}",
                key,
                from.map(|m| m.to_string()).unwrap_or_else(|| "none".to_string()),
                to
            )));
        }

        for marker in StatusMarker::ALL.into_iter().filter(|m| *m != to) {
            self.blobs.delete(&self.marker_path(key, marker)).await?;
        }
        self.blobs
            .put(&self.marker_path(key, to), content.as_bytes().to_vec())
            .await?;

        tracing::debug!(doc_key = %key, from = ?from, to = %to, "Marker transition");
        Ok(from)
    }

    async fn document_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn release_document_lock(&self, key: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // One reference in the map, one held here: nobody else is waiting.
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(key);
        }
    }

    // Pages

    /// Number of leading pages (1..=n) whose analysis has been written.
    pub async fn count_completed_pages(&self, key: &str) -> SheetscanResult<u32> {
        let prefix = self.document_prefix(key);
        let analysis = PageArtifact::Analysis.file_name();

        let mut completed: Vec<u32> = self
            .blobs
            .list(&prefix)
            .await?
            .iter()
            .filter_map(|path| path.strip_prefix(&prefix))
            .filter_map(|rest| rest.split_once('/'))
            .filter(|(_, file)| *file == analysis)
            .filter_map(|(folder, _)| folder.strip_prefix("page_"))
            .filter_map(|number| number.parse().ok())
            .collect();
        completed.sort_unstable();

        let mut count = 0;
        for page in completed {
            if page != count + 1 {
                break;
            }
            count = page;
        }
        Ok(count)
    }

    pub async fn write_page_artifact(
        &self,
        key: &str,
        page: u32,
        artifact: PageArtifact,
        data: Vec<u8>,
    ) -> SheetscanResult<String> {
        let path = self.page_path(key, page, artifact);
        self.blobs.put(&path, data).await?;
        Ok(path)
    }

    pub async fn read_ocr_payload(&self, key: &str, page: u32) -> SheetscanResult<Option<OcrPayload>> {
        self.read_json(&self.page_path(key, page, PageArtifact::RawText))
            .await
    }

    pub async fn write_page_result(&self, key: &str, page: &PageResult) -> SheetscanResult<()> {
        self.write_json(
            &self.page_path(key, page.page_number, PageArtifact::Analysis),
            page,
        )
        .await
    }

    pub async fn read_page_result(&self, key: &str, page: u32) -> SheetscanResult<Option<PageResult>> {
        self.read_json(&self.page_path(key, page, PageArtifact::Analysis))
            .await
    }

    /// Removes every artifact of a document but leaves its marker alone.
    pub async fn clear_artifacts(&self, key: &str) -> SheetscanResult<usize> {
        let mut removed = 0;
        for path in self.blobs.list(&self.document_prefix(key)).await? {
            if path.ends_with(".lock") {
                continue;
            }
            if self.blobs.delete(&path).await? {
                removed += 1;
            }
        }
        tracing::info!(doc_key = %key, removed, "Cleared document artifacts");
        Ok(removed)
    }

    // File level

    pub async fn write_file_result(&self, key: &str, result: &FileAnalysisResult) -> SheetscanResult<()> {
        self.write_json(&self.document_path(key, FILE_RESULT), result)
            .await
    }

    pub async fn read_file_result(&self, key: &str) -> SheetscanResult<Option<FileAnalysisResult>> {
        self.read_json(&self.document_path(key, FILE_RESULT)).await
    }

    /// Rebuilds the running aggregate from the first `pages` stored page results.
    pub async fn rebuild_file_result(
        &self,
        key: &str,
        uri: &str,
        source: DocumentSourceKind,
        pages: u32,
    ) -> SheetscanResult<FileAnalysisResult> {
        let mut result = FileAnalysisResult::new(uri, source);
        for page in 1..=pages {
            let stored = self.read_page_result(key, page).await?.ok_or_else(|| {
                SheetscanError::not_found(format!("analysis for page {} of {}", page, key))
            })?;
            result.record_page(&stored);
            result.duration_ms += stored.duration_ms;
        }
        Ok(result)
    }

    pub async fn write_document_keywords(&self, key: &str, keywords: &[String]) -> SheetscanResult<()> {
        self.write_json(&self.document_path(key, KEYWORDS), &keywords)
            .await
    }

    pub async fn read_document_keywords(&self, key: &str) -> SheetscanResult<Option<Vec<String>>> {
        self.read_json(&self.document_path(key, KEYWORDS)).await
    }

    async fn write_json<T: Serialize + ?Sized>(&self, path: &str, value: &T) -> SheetscanResult<()> {
        let data = serde_json::to_vec(value)?;
        self.blobs.put(path, data).await
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &str) -> SheetscanResult<Option<T>> {
        match self.blobs.get(path).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
