//! Turns a document URI into a local PDF ready for page rendering.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::info;

use sheetscan_models::DocumentSourceKind;
use sheetscan_utils::{validate_file_size, DocumentConfig, PDF_MIME_TYPE};

use crate::converter::OfficeConverter;
use crate::error::AnalysisError;
use crate::source::DocumentSource;

/// A PDF on local disk. The directory is removed when this is dropped.
#[derive(Debug)]
pub struct OpenedDocument {
    _dir: TempDir,
    pub pdf_path: PathBuf,
    pub page_count: u32,
    pub mime: String,
}

pub struct DocumentOpener {
    source: Arc<dyn DocumentSource>,
    converter: Arc<dyn OfficeConverter>,
    max_file_size_bytes: u64,
    supported_mime_types: Vec<String>,
    convertible_mime_types: Vec<String>,
}

fn mime_for_extension(file_name: &str) -> Option<&'static str> {
    let extension = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    let mime = match extension.as_str() {
        "pdf" => PDF_MIME_TYPE,
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docm" => "application/vnd.ms-word.document.macroEnabled.12",
        "dotm" => "application/vnd.ms-word.template.macroEnabled.12",
        "dotx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.template",
        _ => return None,
    };
    Some(mime)
}

impl DocumentOpener {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        converter: Arc<dyn OfficeConverter>,
        config: &DocumentConfig,
    ) -> Self {
        Self {
            source,
            converter,
            max_file_size_bytes: config.max_file_size_bytes,
            supported_mime_types: config.supported_mime_types.clone(),
            convertible_mime_types: config.convertible_mime_types.clone(),
        }
    }

    fn is_supported(&self, mime: &str) -> bool {
        self.supported_mime_types.iter().any(|m| m == mime)
    }

    /// Content sniffing first; the file extension only breaks ties for
    /// containers that sniff as something generic (zip, OLE).
    pub fn detect_mime(&self, bytes: &[u8], file_name: &str) -> Result<String, AnalysisError> {
        let sniffed = infer::get(bytes).map(|kind| kind.mime_type().to_string());

        if let Some(mime) = sniffed.as_deref().filter(|mime| self.is_supported(mime)) {
            return Ok(mime.to_string());
        }
        if let Some(mime) = mime_for_extension(file_name).filter(|mime| self.is_supported(mime)) {
            if sniffed.is_none() || mime != PDF_MIME_TYPE {
                return Ok(mime.to_string());
            }
        }

        Err(AnalysisError::UnsupportedFileType {
            mime: sniffed.unwrap_or_else(|| "unknown".to_string()),
        })
    }

    pub async fn open(&self, uri: &str, kind: DocumentSourceKind) -> Result<OpenedDocument, AnalysisError> {
        let fetched = self.source.fetch(uri, kind).await?;
        let size = fetched.bytes.len() as u64;
        validate_file_size(size, self.max_file_size_bytes).map_err(|_| AnalysisError::FileTooLarge {
            size,
            max: self.max_file_size_bytes,
        })?;

        let mime = self.detect_mime(&fetched.bytes, &fetched.file_name)?;
        let dir = tempfile::tempdir()?;

        let pdf_path = if mime == PDF_MIME_TYPE {
            let path = dir.path().join("document.pdf");
            tokio::fs::write(&path, &fetched.bytes).await?;
            path
        } else if self.convertible_mime_types.iter().any(|m| *m == mime) {
            let extension = Path::new(&fetched.file_name)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("doc");
            let input = dir.path().join(format!("document.{}", extension));
            tokio::fs::write(&input, &fetched.bytes).await?;
            self.converter.convert_to_pdf(&input, dir.path()).await?
        } else {
            return Err(AnalysisError::UnsupportedFileType { mime });
        };

        let page_count = count_pages(&pdf_path).await?;
        info!(uri, mime = %mime, page_count, "Document opened");

        Ok(OpenedDocument {
            _dir: dir,
            pdf_path,
            page_count,
            mime,
        })
    }
}

pub async fn count_pages(pdf: &Path) -> Result<u32, AnalysisError> {
    let path = pdf.to_path_buf();
    tokio::task::spawn_blocking(move || {
        lopdf::Document::load(&path)
            .map(|document| document.get_pages().len() as u32)
            .map_err(|e| AnalysisError::unexpected(format!("Failed to read PDF: {}", e)))
    })
    .await
    .map_err(|e| AnalysisError::unexpected(format!("PDF reader task failed: {}", e)))?
}
