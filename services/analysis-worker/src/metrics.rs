use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Worker counters, exposed on `/metrics`.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub pages_processed: IntCounter,
    pub ocr_rate_limit_retries: IntCounter,
    pub documents: IntCounterVec,
    pub illegal_transitions: IntCounter,
    pub messages: IntCounterVec,
    pub document_duration_seconds: Histogram,
}

impl Metrics {
    pub fn new(namespace: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some(namespace.to_string()), None)?;

        let pages_processed = IntCounter::new("pages_processed_total", "Pages rendered, read and matched")?;
        let ocr_rate_limit_retries =
            IntCounter::new("ocr_rate_limit_retries_total", "OCR calls retried after a rate limit")?;
        let documents = IntCounterVec::new(
            Opts::new("documents_total", "Documents by how their run ended"),
            &["state"],
        )?;
        let illegal_transitions = IntCounter::new(
            "illegal_status_transitions_total",
            "Status assertions rejected as illegal source transitions",
        )?;
        let messages = IntCounterVec::new(
            Opts::new("queue_messages_total", "Queue messages by type and outcome"),
            &["message_type", "outcome"],
        )?;
        let document_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("document_duration_seconds", "Wall time of one document run")
                .buckets(vec![1.0, 5.0, 15.0, 60.0, 180.0, 600.0, 1800.0]),
        )?;

        registry.register(Box::new(pages_processed.clone()))?;
        registry.register(Box::new(ocr_rate_limit_retries.clone()))?;
        registry.register(Box::new(documents.clone()))?;
        registry.register(Box::new(illegal_transitions.clone()))?;
        registry.register(Box::new(messages.clone()))?;
        registry.register(Box::new(document_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            pages_processed,
            ocr_rate_limit_retries,
            documents,
            illegal_transitions,
            messages,
            document_duration_seconds,
        })
    }

    #[cfg(test)]
    pub fn unregistered() -> Self {
        Self::new("sheetscan_test").expect("metrics")
    }

    pub fn document_finished(&self, state: &str) {
        self.documents.with_label_values(&[state]).inc();
    }

    pub fn message_handled(&self, message_type: &str, outcome: &str) {
        self.messages.with_label_values(&[message_type, outcome]).inc();
    }

    pub fn encode(&self) -> String {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .unwrap_or_else(|_| "Error encoding metrics".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_uses_namespace() {
        let metrics = Metrics::new("sheetscan").unwrap();
        metrics.pages_processed.inc();
        metrics.document_finished("finished");

        let text = metrics.encode();
        assert!(text.contains("sheetscan_pages_processed_total 1"));
        assert!(text.contains("sheetscan_documents_total{state=\"finished\"} 1"));
    }
}
