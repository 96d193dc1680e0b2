use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

use crate::error::AnalysisError;

#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Renders one 1-based page of a PDF to PNG bytes.
    async fn render_page(&self, pdf: &Path, page: u32) -> Result<Vec<u8>, AnalysisError>;
}

/// Rasterizes pages with poppler's `pdftoppm`.
pub struct PdftoppmRenderer {
    dpi: u32,
    timeout: Duration,
}

impl PdftoppmRenderer {
    pub fn new(dpi: u32, timeout: Duration) -> Self {
        Self { dpi, timeout }
    }
}

#[async_trait]
impl PageRenderer for PdftoppmRenderer {
    async fn render_page(&self, pdf: &Path, page: u32) -> Result<Vec<u8>, AnalysisError> {
        let temp_dir = tempfile::tempdir()?;
        let prefix = temp_dir.path().join("page");
        let page_arg = page.to_string();

        let mut command = Command::new("pdftoppm");
        command
            .args(["-png", "-r", &self.dpi.to_string()])
            .args(["-f", &page_arg, "-l", &page_arg, "-singlefile"])
            .arg(pdf)
            .arg(&prefix)
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                AnalysisError::unexpected(format!("Rendering page {} timed out after {:?}", page, self.timeout))
            })??;

        if !output.status.success() {
            return Err(AnalysisError::unexpected(format!(
                "pdftoppm failed on page {}: {}",
                page,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        // -singlefile writes exactly `{prefix}.png`
        let image = tokio::fs::read(prefix.with_extension("png")).await?;
        tracing::debug!(page, bytes = image.len(), "Page rendered");
        Ok(image)
    }
}
