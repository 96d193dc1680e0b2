use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use validator::Validate;

use crate::ocr::OcrWord;

/// Where a document's bytes are fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentSourceKind {
    #[serde(rename = "object_store", alias = "blob")]
    ObjectStore,
    #[serde(rename = "document_repository", alias = "sharepoint")]
    DocumentRepository,
}

impl Default for DocumentSourceKind {
    fn default() -> Self {
        Self::ObjectStore
    }
}

impl fmt::Display for DocumentSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ObjectStore => write!(f, "object_store"),
            Self::DocumentRepository => write!(f, "document_repository"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    Local,
    Global,
    Both,
}

impl Default for SearchScope {
    fn default() -> Self {
        Self::Both
    }
}

impl SearchScope {
    /// Merges caller keywords with the shared set. Order is preserved and
    /// duplicates (case-insensitive) keep their first spelling.
    pub fn resolve(&self, local: &[String], global: &[String]) -> Vec<String> {
        let sources: Vec<&[String]> = match self {
            Self::Local => vec![local],
            Self::Global => vec![global],
            Self::Both => vec![local, global],
        };

        let mut seen = BTreeSet::new();
        sources
            .into_iter()
            .flatten()
            .map(|keyword| keyword.trim())
            .filter(|keyword| !keyword.is_empty())
            .filter(|keyword| seen.insert(keyword.to_lowercase()))
            .map(str::to_string)
            .collect()
    }
}

/// One document to analyze, as carried on the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DocumentJob {
    #[serde(alias = "full_path")]
    #[validate(length(min = 1, message = "file_uri is required"))]
    pub file_uri: String,
    #[serde(default)]
    pub source: DocumentSourceKind,
    #[serde(default)]
    pub search_scope: SearchScope,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub force: bool,
}

impl DocumentJob {
    pub fn new(file_uri: impl Into<String>) -> Self {
        Self {
            file_uri: file_uri.into(),
            source: DocumentSourceKind::default(),
            search_scope: SearchScope::Local,
            keywords: Vec::new(),
            force: false,
        }
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordMatch {
    pub keyword: String,
    pub word: String,
    /// Percent, rounded to two decimals.
    pub confidence: f64,
    /// Flattened polygon: x0, y0, x1, y1, ...
    pub coordinates: Vec<f64>,
}

/// Written once per page as `analysis.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub page_number: u32,
    pub image_ref: String,
    pub raw_words: Vec<OcrWord>,
    pub matches: Vec<KeywordMatch>,
    pub matched_keywords: BTreeSet<String>,
    pub matched_word_count: usize,
    pub duration_ms: u64,
}

impl PageResult {
    pub fn summary(&self) -> PageSummary {
        PageSummary {
            page_number: self.page_number,
            matched_word_count: self.matched_word_count,
            matched_keywords: self.matched_keywords.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSummary {
    pub page_number: u32,
    pub matched_word_count: usize,
    pub matched_keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAnalysisResult {
    pub uri: String,
    pub source: DocumentSourceKind,
    pub page_count: u32,
    pub total_matched_words: usize,
    pub per_page_summaries: Vec<PageSummary>,
    pub duration_ms: u64,
}

impl FileAnalysisResult {
    pub fn new(uri: impl Into<String>, source: DocumentSourceKind) -> Self {
        Self {
            uri: uri.into(),
            source,
            page_count: 0,
            total_matched_words: 0,
            per_page_summaries: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Adds or replaces a page, keeping summaries ordered by page number.
    pub fn record_page(&mut self, page: &PageResult) {
        let summary = page.summary();
        match self
            .per_page_summaries
            .binary_search_by_key(&summary.page_number, |s| s.page_number)
        {
            Ok(index) => self.per_page_summaries[index] = summary,
            Err(index) => self.per_page_summaries.insert(index, summary),
        }
        self.total_matched_words = self
            .per_page_summaries
            .iter()
            .map(|s| s.matched_word_count)
            .sum();
    }

    /// Everything except timing, which never matches between two runs.
    pub fn same_outcome(&self, other: &FileAnalysisResult) -> bool {
        self.uri == other.uri
            && self.source == other.source
            && self.page_count == other.page_count
            && self.total_matched_words == other.total_matched_words
            && self.per_page_summaries == other.per_page_summaries
    }
}

/// The per-document lifecycle marker. At most one exists per document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusMarker {
    Queued,
    Processing,
    Finished,
    Failed,
}

impl StatusMarker {
    pub const ALL: [StatusMarker; 4] = [
        StatusMarker::Queued,
        StatusMarker::Processing,
        StatusMarker::Finished,
        StatusMarker::Failed,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Queued => "queued.lock",
            Self::Processing => "processing.lock",
            Self::Finished => "finished.lock",
            Self::Failed => "failed.lock",
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|marker| marker.file_name() == name)
    }

    /// Whether a document may move from `from` (None = no marker) to `to`.
    pub fn can_transition(from: Option<StatusMarker>, to: StatusMarker) -> bool {
        use StatusMarker::*;

        match (from, to) {
            (None, Queued | Processing) => true,
            (Some(Queued), Queued | Processing | Failed) => true,
            (Some(Processing), Processing | Finished | Failed) => true,
            (Some(Finished), Processing | Queued) => true,
            (Some(Failed), Processing | Queued) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl fmt::Display for StatusMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Processing => write!(f, "processing"),
            Self::Finished => write!(f, "finished"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A marker as read back from the store, with whatever it was written with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerState {
    pub marker: StatusMarker,
    pub content: String,
}

/// Answer to a status query for one document identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Processing,
    Success { total_pages: u32, file_uri: String },
    Failed { reason: String },
    InvalidIdentifier { message: String },
}
