use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{AnalysisError, ConversionFailure};

#[async_trait]
pub trait OfficeConverter: Send + Sync {
    /// Converts `input` to PDF inside `out_dir` and returns the PDF's path.
    async fn convert_to_pdf(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, AnalysisError>;
}

/// Headless LibreOffice conversion.
pub struct LibreOfficeConverter {
    binary: String,
    timeout: Duration,
}

impl LibreOfficeConverter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            binary: "libreoffice".to_string(),
            timeout,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

fn converted_path(input: &Path, out_dir: &Path) -> Result<PathBuf, AnalysisError> {
    let stem = input.file_stem().ok_or_else(|| AnalysisError::ConversionFailed {
        kind: ConversionFailure::Tool,
        detail: format!("{} has no file name", input.display()),
    })?;
    Ok(out_dir.join(stem).with_extension("pdf"))
}

#[async_trait]
impl OfficeConverter for LibreOfficeConverter {
    async fn convert_to_pdf(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, AnalysisError> {
        let mut command = Command::new(&self.binary);
        command
            .args(["--headless", "--convert-to", "pdf", "--outdir"])
            .arg(out_dir)
            .arg(input)
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(output) => output.map_err(|e| AnalysisError::ConversionFailed {
                kind: ConversionFailure::Tool,
                detail: format!("failed to start {}: {}", self.binary, e),
            })?,
            Err(_) => {
                warn!(input = %input.display(), timeout = ?self.timeout, "Conversion timed out");
                return Err(AnalysisError::ConversionFailed {
                    kind: ConversionFailure::Timeout,
                    detail: format!("no result after {:?}", self.timeout),
                });
            }
        };

        if !output.status.success() {
            return Err(AnalysisError::ConversionFailed {
                kind: ConversionFailure::Tool,
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let pdf = converted_path(input, out_dir)?;
        if !tokio::fs::try_exists(&pdf).await.unwrap_or(false) {
            return Err(AnalysisError::ConversionFailed {
                kind: ConversionFailure::Tool,
                detail: format!("{} was not produced", pdf.display()),
            });
        }

        info!(input = %input.display(), output = %pdf.display(), "Converted document to PDF");
        Ok(pdf)
    }
}
