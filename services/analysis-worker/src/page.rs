use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use sheetscan_models::{OcrPayload, PageResult};
use sheetscan_storage::{CheckpointStore, PageArtifact};

use crate::backoff::retry_rate_limited;
use crate::error::AnalysisError;
use crate::keyword_match::{matched_keywords, KeywordMatcher};
use crate::metrics::Metrics;
use crate::ocr_client::TextRecognizer;
use crate::renderer::PageRenderer;

/// Renders, reads and matches one page, checkpointing as it goes.
pub struct PageProcessor {
    checkpoints: Arc<CheckpointStore>,
    renderer: Arc<dyn PageRenderer>,
    ocr: Arc<dyn TextRecognizer>,
    metrics: Arc<Metrics>,
    rate_limit_wait: Duration,
    max_duration: Duration,
}

impl PageProcessor {
    pub fn new(
        checkpoints: Arc<CheckpointStore>,
        renderer: Arc<dyn PageRenderer>,
        ocr: Arc<dyn TextRecognizer>,
        metrics: Arc<Metrics>,
        rate_limit_wait: Duration,
        max_duration: Duration,
    ) -> Self {
        Self {
            checkpoints,
            renderer,
            ocr,
            metrics,
            rate_limit_wait,
            max_duration,
        }
    }

    pub async fn process(
        &self,
        key: &str,
        pdf: &Path,
        page: u32,
        matcher: &KeywordMatcher,
    ) -> Result<PageResult, AnalysisError> {
        let started = Instant::now();

        let image = self.renderer.render_page(pdf, page).await?;
        let image_ref = self
            .checkpoints
            .write_page_artifact(key, page, PageArtifact::Image, image.clone())
            .await?;

        let (payload, retries) = retry_rate_limited(self.rate_limit_wait, self.max_duration, || {
            self.ocr.recognize(&image)
        })
        .await?;
        if retries > 0 {
            self.metrics.ocr_rate_limit_retries.inc_by(retries as u64);
        }

        self.checkpoints
            .write_page_artifact(key, page, PageArtifact::RawText, serde_json::to_vec(&payload)?)
            .await?;
        self.checkpoints
            .write_page_artifact(key, page, PageArtifact::PageText, payload.page_text().into_bytes())
            .await?;

        let result = self
            .finish_page(key, page, image_ref, &payload, matcher, started)
            .await?;
        self.metrics.pages_processed.inc();
        info!(
            doc_key = %key,
            page,
            matches = result.matched_word_count,
            duration_ms = result.duration_ms,
            "Page analyzed"
        );
        Ok(result)
    }

    /// Matches again over the stored OCR text. No rendering, no OCR.
    pub async fn rematch(
        &self,
        key: &str,
        page: u32,
        matcher: &KeywordMatcher,
    ) -> Result<PageResult, AnalysisError> {
        let started = Instant::now();
        let payload = self
            .checkpoints
            .read_ocr_payload(key, page)
            .await?
            .ok_or_else(|| AnalysisError::unexpected(format!("No stored text for page {}", page)))?;

        let image_ref = self.checkpoints.page_path(key, page, PageArtifact::Image);
        let result = self
            .finish_page(key, page, image_ref, &payload, matcher, started)
            .await?;
        debug!(doc_key = %key, page, matches = result.matched_word_count, "Page re-matched");
        Ok(result)
    }

    async fn finish_page(
        &self,
        key: &str,
        page: u32,
        image_ref: String,
        payload: &OcrPayload,
        matcher: &KeywordMatcher,
        started: Instant,
    ) -> Result<PageResult, AnalysisError> {
        let matches = matcher.find(payload);
        let result = PageResult {
            page_number: page,
            image_ref,
            raw_words: payload.words().cloned().collect(),
            matched_keywords: matched_keywords(&matches),
            matched_word_count: matches.len(),
            matches,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        // Written last: its presence marks the page as done.
        self.checkpoints.write_page_result(key, &result).await?;
        Ok(result)
    }
}
