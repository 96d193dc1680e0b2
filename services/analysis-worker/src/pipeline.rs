//! Drives one document from claim to a terminal marker.
//!
//! Every page is checkpointed before the next starts, so a run that dies
//! anywhere resumes at the first page without an `analysis.json`. A document
//! that already finished is only re-matched against its stored OCR text.

use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use sheetscan_models::{
    DocumentJob, FileAnalysisResult, FileStatus, MarkerState, QueueEnvelope, SearchScope,
    StatusMarker,
};
use sheetscan_storage::{decode_doc_key, doc_key, CheckpointStore, KeywordStore, WorkQueue};
use sheetscan_utils::{validate_model, SheetscanError, SheetscanResult};

use crate::document::DocumentOpener;
use crate::error::AnalysisError;
use crate::keyword_match::KeywordMatcher;
use crate::lease::Lease;
use crate::metrics::Metrics;
use crate::page::PageProcessor;

pub const FILE_IN_PROCESSING: &str = "File is in processing";

pub struct DocumentPipeline {
    checkpoints: Arc<CheckpointStore>,
    keywords: Arc<KeywordStore>,
    opener: Arc<DocumentOpener>,
    pages: Arc<PageProcessor>,
    queue: Arc<dyn WorkQueue>,
    metrics: Arc<Metrics>,
}

/// Page count a `finished` marker was written with.
fn finished_page_count(state: &MarkerState) -> Option<u32> {
    state.content.trim().parse().ok()
}

impl DocumentPipeline {
    pub fn new(
        checkpoints: Arc<CheckpointStore>,
        keywords: Arc<KeywordStore>,
        opener: Arc<DocumentOpener>,
        pages: Arc<PageProcessor>,
        queue: Arc<dyn WorkQueue>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            checkpoints,
            keywords,
            opener,
            pages,
            queue,
            metrics,
        }
    }

    pub fn queue(&self) -> &Arc<dyn WorkQueue> {
        &self.queue
    }

    /// Runs a job and records how it ended.
    ///
    /// `MaxProcessingTimeExceeded` leaves the `processing` marker and all
    /// checkpoints in place; every other error is written as `failed`.
    pub async fn execute(&self, job: &DocumentJob, lease: &mut Lease) -> Result<FileAnalysisResult, AnalysisError> {
        let started = Instant::now();
        let key = doc_key(&job.file_uri);

        match self.run(&key, job, lease).await {
            Ok(result) => {
                self.metrics.document_finished("finished");
                self.metrics
                    .document_duration_seconds
                    .observe(started.elapsed().as_secs_f64());
                Ok(result)
            }
            Err(error) if error.keeps_claim() => {
                warn!(doc_key = %key, uri = %job.file_uri, error = %error, "Document run deferred");
                self.metrics.document_finished("deferred");
                Err(error)
            }
            Err(error) => {
                error!(doc_key = %key, uri = %job.file_uri, kind = error.kind(), error = %error, "Document analysis failed");
                if let Err(marker_error) = self
                    .checkpoints
                    .transition_marker(&key, StatusMarker::Failed, &error.failure_reason())
                    .await
                {
                    error!(doc_key = %key, error = %marker_error, "Could not record failure");
                }
                self.metrics.document_finished("failed");
                Err(error)
            }
        }
    }

    async fn run(&self, key: &str, job: &DocumentJob, lease: &mut Lease) -> Result<FileAnalysisResult, AnalysisError> {
        let previous = self.checkpoints.read_marker(key).await?;

        if job.force {
            self.checkpoints.clear_artifacts(key).await?;
        }
        self.checkpoints
            .transition_marker(key, StatusMarker::Processing, "")
            .await?;

        let keywords = self.resolve_keywords(key, job).await?;
        let matcher = KeywordMatcher::new(&keywords)?;

        let finished_pages = if job.force {
            None
        } else {
            self.finished_run_pages(key, previous.as_ref()).await?
        };
        if let Some(page_count) = finished_pages {
            return self.rematch(key, job, page_count, &matcher, lease).await;
        }

        let completed = self.checkpoints.count_completed_pages(key).await?;
        let mut result = self
            .checkpoints
            .rebuild_file_result(key, &job.file_uri, job.source, completed)
            .await?;

        let document = self.opener.open(&job.file_uri, job.source).await?;
        result.page_count = document.page_count;
        info!(
            doc_key = %key,
            uri = %job.file_uri,
            page_count = document.page_count,
            resume_from = completed + 1,
            keywords = keywords.len(),
            "Analyzing document"
        );

        for page in (completed + 1)..=document.page_count {
            let page_result = self
                .pages
                .process(key, &document.pdf_path, page, &matcher)
                .await?;
            result.record_page(&page_result);
            result.duration_ms += page_result.duration_ms;
            lease.check_and_extend(self.queue.as_ref()).await?;
        }

        self.finish(key, result).await
    }

    /// Page count of an earlier run that finished and still has every page
    /// stored. Re-queueing swaps the `finished` marker for `queued`, so the
    /// stored file result counts as evidence too.
    async fn finished_run_pages(
        &self,
        key: &str,
        previous: Option<&MarkerState>,
    ) -> Result<Option<u32>, AnalysisError> {
        let from_marker = previous
            .filter(|state| state.marker == StatusMarker::Finished)
            .and_then(finished_page_count);
        if from_marker.is_some() {
            return Ok(from_marker);
        }

        let Some(stored) = self.checkpoints.read_file_result(key).await? else {
            return Ok(None);
        };
        if stored.page_count == 0 {
            return Ok(None);
        }
        let completed = self.checkpoints.count_completed_pages(key).await?;
        Ok((completed >= stored.page_count).then_some(stored.page_count))
    }

    async fn rematch(
        &self,
        key: &str,
        job: &DocumentJob,
        page_count: u32,
        matcher: &KeywordMatcher,
        lease: &mut Lease,
    ) -> Result<FileAnalysisResult, AnalysisError> {
        info!(doc_key = %key, page_count, "Re-matching finished document from stored text");

        let mut result = FileAnalysisResult::new(&job.file_uri, job.source);
        result.page_count = page_count;
        for page in 1..=page_count {
            let page_result = self.pages.rematch(key, page, matcher).await?;
            result.record_page(&page_result);
            result.duration_ms += page_result.duration_ms;
            lease.check_and_extend(self.queue.as_ref()).await?;
        }

        self.finish(key, result).await
    }

    async fn finish(&self, key: &str, result: FileAnalysisResult) -> Result<FileAnalysisResult, AnalysisError> {
        self.checkpoints.write_file_result(key, &result).await?;
        self.checkpoints
            .transition_marker(key, StatusMarker::Finished, &result.page_count.to_string())
            .await?;

        info!(
            doc_key = %key,
            pages = result.page_count,
            matches = result.total_matched_words,
            duration_ms = result.duration_ms,
            "Document analysis finished"
        );
        Ok(result)
    }

    async fn resolve_keywords(&self, key: &str, job: &DocumentJob) -> Result<Vec<String>, AnalysisError> {
        let global = match job.search_scope {
            SearchScope::Local => Vec::new(),
            SearchScope::Global | SearchScope::Both => self.keywords.load_global().await?.keywords,
        };
        let resolved = job.search_scope.resolve(&job.keywords, &global);
        self.checkpoints.write_document_keywords(key, &resolved).await?;
        Ok(resolved)
    }

    /// Queues a job for the workers. Returns the document identifier.
    pub async fn enqueue(&self, job: DocumentJob) -> SheetscanResult<String> {
        validate_model(&job)?;
        let key = doc_key(&job.file_uri);

        if let Some(state) = self.checkpoints.read_marker(&key).await? {
            if state.marker == StatusMarker::Processing {
                return Err(SheetscanError::conflict(FILE_IN_PROCESSING));
            }
        }

        self.checkpoints
            .transition_marker(&key, StatusMarker::Queued, "")
            .await?;

        let body = QueueEnvelope::KeywordAnalysis(job).encode()?;
        match self.queue.enqueue(&body).await {
            Ok(message_id) => {
                info!(doc_key = %key, message_id = %message_id, "Document queued");
                Ok(key)
            }
            Err(error) => {
                self.checkpoints
                    .transition_marker(&key, StatusMarker::Failed, &error.to_string())
                    .await?;
                Err(error)
            }
        }
    }

    pub async fn status(&self, identifier: &str) -> SheetscanResult<FileStatus> {
        let Some(file_uri) = decode_doc_key(identifier) else {
            return Ok(FileStatus::InvalidIdentifier {
                message: "File identifier is not valid".to_string(),
            });
        };

        let status = match self.checkpoints.read_marker(identifier).await? {
            None => FileStatus::InvalidIdentifier {
                message: "No analysis exists for this file identifier".to_string(),
            },
            Some(state) => match state.marker {
                StatusMarker::Queued | StatusMarker::Processing => FileStatus::Processing,
                StatusMarker::Finished => FileStatus::Success {
                    total_pages: finished_page_count(&state).unwrap_or(0),
                    file_uri,
                },
                StatusMarker::Failed => FileStatus::Failed {
                    reason: state.content,
                },
            },
        };
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetscan_models::DocumentSourceKind;
    use sheetscan_storage::{MemoryBlobStore, MemoryQueue, QueueMessage};
    use sheetscan_utils::AppConfig;
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use crate::document::tests::{pdf_with_pages, FakeConverter, StaticSource};
    use crate::page::tests::{NumberRenderer, ScriptedOcr};
    use crate::converter::OfficeConverter;
    use crate::error::ConversionFailure;
    use crate::renderer::PageRenderer;

    const URI: &str = "https://store.example/sds/acme.pdf";

    struct Harness {
        pipeline: DocumentPipeline,
        checkpoints: Arc<CheckpointStore>,
        keywords: Arc<KeywordStore>,
        pages: Arc<PageProcessor>,
        ocr: Arc<ScriptedOcr>,
        source: Arc<StaticSource>,
        queue: Arc<MemoryQueue>,
    }

    fn sheet_words() -> Vec<Vec<&'static str>> {
        vec![
            vec!["Safety", "data", "sheet"],
            vec!["Contains", "PTFE", "and", "PFOA"],
            vec!["Disposal"],
            vec!["pfoa-free", "PTFE"],
        ]
    }

    fn harness_with(bytes: Vec<u8>, renderer: Arc<dyn PageRenderer>) -> Harness {
        harness_converting(bytes, "acme.pdf", renderer, Arc::new(FakeConverter { pages: 1 }))
    }

    fn harness_converting(
        bytes: Vec<u8>,
        file_name: &str,
        renderer: Arc<dyn PageRenderer>,
        converter: Arc<dyn OfficeConverter>,
    ) -> Harness {
        let blobs = Arc::new(MemoryBlobStore::new());
        let checkpoints = Arc::new(CheckpointStore::new(blobs.clone(), "results"));
        let keywords = Arc::new(KeywordStore::new(blobs, "results"));
        let ocr = Arc::new(ScriptedOcr::new(sheet_words()));
        let source = Arc::new(StaticSource::new(bytes, file_name));
        let queue = Arc::new(MemoryQueue::new());
        let metrics = Arc::new(Metrics::unregistered());

        let opener = Arc::new(DocumentOpener::new(
            source.clone(),
            converter,
            &AppConfig::default().documents,
        ));
        let pages = Arc::new(PageProcessor::new(
            checkpoints.clone(),
            renderer,
            ocr.clone(),
            metrics.clone(),
            Duration::from_secs(1),
            Duration::from_secs(300),
        ));
        let pipeline = DocumentPipeline::new(
            checkpoints.clone(),
            keywords.clone(),
            opener,
            pages.clone(),
            queue.clone(),
            metrics,
        );

        Harness {
            pipeline,
            checkpoints,
            keywords,
            pages,
            ocr,
            source,
            queue,
        }
    }

    fn harness() -> Harness {
        harness_with(pdf_with_pages(4), Arc::new(NumberRenderer))
    }

    impl Harness {
        async fn lease(&self) -> Lease {
            self.queue.enqueue("job").await.unwrap();
            let message = self.queue.receive(Duration::from_secs(300)).await.unwrap().unwrap();
            Lease::start(message, Duration::from_secs(300))
        }

        async fn execute(&self, job: &DocumentJob) -> Result<FileAnalysisResult, AnalysisError> {
            let mut lease = self.lease().await;
            self.pipeline.execute(job, &mut lease).await
        }

        async fn marker(&self) -> MarkerState {
            self.checkpoints.read_marker(&doc_key(URI)).await.unwrap().unwrap()
        }
    }

    fn job(keywords: &[&str]) -> DocumentJob {
        DocumentJob::new(URI).with_keywords(keywords)
    }

    #[tokio::test]
    async fn test_clean_run_finishes_every_page() {
        let h = harness();
        let result = h.execute(&job(&["PTFE", "PFOA"])).await.unwrap();

        assert_eq!(result.page_count, 4);
        assert_eq!(result.per_page_summaries.len(), 4);
        // PTFE + PFOA on page 2; pfoa-free + PTFE on page 4
        assert_eq!(result.total_matched_words, 4);
        assert_eq!(h.ocr.calls(), 4);

        let marker = h.marker().await;
        assert_eq!(marker.marker, StatusMarker::Finished);
        assert_eq!(marker.content, "4");

        let stored = h.checkpoints.read_file_result(&doc_key(URI)).await.unwrap().unwrap();
        assert!(stored.same_outcome(&result));
    }

    #[tokio::test]
    async fn test_resume_reads_only_missing_pages() {
        let keywords = ["PTFE", "PFOA"];
        let clean = harness().execute(&job(&keywords)).await.unwrap();

        // A previous worker checkpointed two pages and then died.
        let h = harness();
        let key = doc_key(URI);
        let matcher = KeywordMatcher::new(&keywords.map(String::from)).unwrap();
        h.checkpoints
            .transition_marker(&key, StatusMarker::Processing, "")
            .await
            .unwrap();
        for page in 1..=2 {
            h.pages.process(&key, Path::new("x.pdf"), page, &matcher).await.unwrap();
        }
        let before = h.ocr.calls();

        let resumed = h.execute(&job(&keywords)).await.unwrap();

        assert_eq!(h.ocr.calls() - before, 2);
        assert!(resumed.same_outcome(&clean));
    }

    #[tokio::test]
    async fn test_failed_document_resumes_from_checkpoint() {
        let h = harness();
        let key = doc_key(URI);
        let matcher = KeywordMatcher::new(&["PTFE".to_string()]).unwrap();
        h.checkpoints
            .transition_marker(&key, StatusMarker::Processing, "")
            .await
            .unwrap();
        h.pages.process(&key, Path::new("x.pdf"), 1, &matcher).await.unwrap();
        h.checkpoints
            .transition_marker(&key, StatusMarker::Failed, "boom")
            .await
            .unwrap();
        let before = h.ocr.calls();

        let result = h.execute(&job(&["PTFE"])).await.unwrap();
        assert_eq!(h.ocr.calls() - before, 3);
        assert_eq!(result.total_matched_words, 2);
    }

    #[tokio::test]
    async fn test_finished_document_is_rematched_without_ocr() {
        let h = harness();
        h.execute(&job(&["PTFE"])).await.unwrap();
        let ocr_calls = h.ocr.calls();
        let fetches = h.source.fetches.load(Ordering::SeqCst);

        let result = h.execute(&job(&["disposal", "safety"])).await.unwrap();

        assert_eq!(h.ocr.calls(), ocr_calls);
        assert_eq!(h.source.fetches.load(Ordering::SeqCst), fetches);
        assert_eq!(result.page_count, 4);
        assert_eq!(result.total_matched_words, 2);
        assert_eq!(h.marker().await.marker, StatusMarker::Finished);

        let persisted = h
            .checkpoints
            .read_document_keywords(&doc_key(URI))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted, vec!["disposal".to_string(), "safety".to_string()]);
    }

    #[tokio::test]
    async fn test_requeued_finished_document_is_rematched() {
        let h = harness();
        h.execute(&job(&["PTFE"])).await.unwrap();
        let ocr_calls = h.ocr.calls();

        h.pipeline.enqueue(job(&["disposal", "safety"])).await.unwrap();
        assert_eq!(h.marker().await.marker, StatusMarker::Queued);

        let result = h.execute(&job(&["disposal", "safety"])).await.unwrap();

        assert_eq!(h.ocr.calls(), ocr_calls);
        assert_eq!(result.total_matched_words, 2);
        let hits: Vec<(u32, Vec<String>)> = result
            .per_page_summaries
            .iter()
            .map(|page| (page.page_number, page.matched_keywords.clone()))
            .collect();
        assert_eq!(
            hits,
            vec![
                (1, vec!["safety".to_string()]),
                (2, vec![]),
                (3, vec!["disposal".to_string()]),
                (4, vec![]),
            ]
        );

        let stored = h.checkpoints.read_file_result(&doc_key(URI)).await.unwrap().unwrap();
        assert!(stored.same_outcome(&result));
        let page_two = h.checkpoints.read_page_result(&doc_key(URI), 2).await.unwrap().unwrap();
        assert_eq!(page_two.matched_word_count, 0);
    }

    #[tokio::test]
    async fn test_partial_run_without_file_result_is_resumed_not_rematched() {
        let h = harness();
        let key = doc_key(URI);
        let matcher = KeywordMatcher::new(&["PTFE".to_string()]).unwrap();
        h.checkpoints
            .transition_marker(&key, StatusMarker::Queued, "")
            .await
            .unwrap();
        h.pages.process(&key, Path::new("x.pdf"), 1, &matcher).await.unwrap();
        let before = h.ocr.calls();

        h.execute(&job(&["PTFE"])).await.unwrap();
        assert_eq!(h.ocr.calls() - before, 3);
        assert_eq!(h.source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_force_reprocesses_everything() {
        let h = harness();
        let first = h.execute(&job(&["PTFE"])).await.unwrap();

        let second = h.execute(&job(&["PTFE"]).forced()).await.unwrap();

        assert_eq!(h.ocr.calls(), 8);
        assert_eq!(h.source.fetches.load(Ordering::SeqCst), 2);
        assert!(second.same_outcome(&first));
    }

    #[tokio::test]
    async fn test_global_scope_uses_shared_keywords() {
        let h = harness();
        h.keywords
            .store_global("default", vec!["PFOA".to_string()])
            .await
            .unwrap();

        let mut both = job(&["PTFE"]);
        both.search_scope = SearchScope::Both;
        let result = h.execute(&both).await.unwrap();
        assert_eq!(result.total_matched_words, 4);

        let persisted = h
            .checkpoints
            .read_document_keywords(&doc_key(URI))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted, vec!["PTFE".to_string(), "PFOA".to_string()]);
    }

    #[tokio::test]
    async fn test_unsupported_document_is_marked_failed() {
        let png = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        let h = harness_with(png, Arc::new(NumberRenderer));

        let error = h.execute(&job(&["PTFE"])).await.unwrap_err();
        assert!(matches!(error, AnalysisError::UnsupportedFileType { .. }));

        let marker = h.marker().await;
        assert_eq!(marker.marker, StatusMarker::Failed);
        assert_eq!(marker.content, "Unsupported file type received");

        let status = h.pipeline.status(&doc_key(URI)).await.unwrap();
        assert_eq!(
            status,
            FileStatus::Failed {
                reason: "Unsupported file type received".to_string()
            }
        );
    }

    struct TimedOutConverter;

    #[async_trait::async_trait]
    impl OfficeConverter for TimedOutConverter {
        async fn convert_to_pdf(&self, _input: &Path, _out_dir: &Path) -> Result<std::path::PathBuf, AnalysisError> {
            Err(AnalysisError::ConversionFailed {
                kind: ConversionFailure::Timeout,
                detail: "no result after 600s".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_conversion_failure_is_marked_failed() {
        let mut ole = vec![0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
        ole.resize(4096, 0);
        let h = harness_converting(
            ole,
            "acme.doc",
            Arc::new(NumberRenderer),
            Arc::new(TimedOutConverter),
        );

        let error = h.execute(&job(&["PTFE"])).await.unwrap_err();
        assert!(matches!(
            error,
            AnalysisError::ConversionFailed {
                kind: ConversionFailure::Timeout,
                ..
            }
        ));
        assert_eq!(h.ocr.calls(), 0);

        let marker = h.marker().await;
        assert_eq!(marker.marker, StatusMarker::Failed);
        assert_eq!(marker.content, "Document to PDF conversion error");
    }

    /// Takes ten seconds per page.
    struct SlowRenderer;

    #[async_trait::async_trait]
    impl PageRenderer for SlowRenderer {
        async fn render_page(&self, pdf: &Path, page: u32) -> Result<Vec<u8>, AnalysisError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            NumberRenderer.render_page(pdf, page).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_lease_keeps_processing_marker() {
        let h = harness_with(pdf_with_pages(4), Arc::new(SlowRenderer));

        // A handle the queue no longer knows cannot be extended.
        let orphan = QueueMessage {
            id: "gone".to_string(),
            receipt: "stale".to_string(),
            body: String::new(),
            dequeue_count: 1,
        };
        let mut lease = Lease::start(orphan, Duration::from_secs(10));

        let error = h
            .pipeline
            .execute(&job(&["PTFE"]), &mut lease)
            .await
            .unwrap_err();
        assert!(error.keeps_claim());

        assert_eq!(h.marker().await.marker, StatusMarker::Processing);
        assert_eq!(
            h.checkpoints.count_completed_pages(&doc_key(URI)).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_enqueue_and_status() {
        let h = harness();
        let identifier = h.pipeline.enqueue(job(&["PTFE"])).await.unwrap();
        assert_eq!(identifier, doc_key(URI));
        assert_eq!(h.queue.len().await.unwrap(), 1);
        assert_eq!(h.pipeline.status(&identifier).await.unwrap(), FileStatus::Processing);

        let message = h.queue.receive(Duration::from_secs(300)).await.unwrap().unwrap();
        match QueueEnvelope::decode(&message.body).unwrap() {
            QueueEnvelope::KeywordAnalysis(queued) => assert_eq!(queued.file_uri, URI),
            other => panic!("unexpected envelope {:?}", other),
        }

        let mut lease = Lease::start(message, Duration::from_secs(300));
        h.pipeline.execute(&job(&["PTFE"]), &mut lease).await.unwrap();
        assert_eq!(
            h.pipeline.status(&identifier).await.unwrap(),
            FileStatus::Success {
                total_pages: 4,
                file_uri: URI.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_enqueue_rejects_document_in_processing() {
        let h = harness();
        h.checkpoints
            .transition_marker(&doc_key(URI), StatusMarker::Processing, "")
            .await
            .unwrap();

        let error = h.pipeline.enqueue(job(&["PTFE"])).await.unwrap_err();
        assert_eq!(error.error_code(), "CONFLICT");
        assert!(error.to_string().contains(FILE_IN_PROCESSING));
        assert_eq!(h.queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_validates_job() {
        let h = harness();
        let error = h.pipeline.enqueue(DocumentJob::new("")).await.unwrap_err();
        assert_eq!(error.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_status_of_unknown_identifiers() {
        let h = harness();
        assert!(matches!(
            h.pipeline.status("***").await.unwrap(),
            FileStatus::InvalidIdentifier { .. }
        ));
        assert!(matches!(
            h.pipeline.status(&doc_key("https://store/never.pdf")).await.unwrap(),
            FileStatus::InvalidIdentifier { .. }
        ));
    }

    #[test]
    fn test_source_kind_default_is_object_store() {
        assert_eq!(job(&[]).source, DocumentSourceKind::ObjectStore);
    }
}
