use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::document::DocumentJob;
use crate::extraction::MaterialRecord;

/// Message body on the work queue: `{"message_type": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", content = "data", rename_all = "snake_case")]
pub enum QueueEnvelope {
    KeywordAnalysis(DocumentJob),
    MaterialIngest(MaterialRecord),
}

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("Malformed queue message: {0}")]
    Malformed(String),
    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

#[derive(Deserialize)]
struct RawEnvelope {
    message_type: Option<String>,
    #[serde(default)]
    data: Value,
}

impl QueueEnvelope {
    pub const KEYWORD_ANALYSIS: &'static str = "keyword_analysis";
    pub const MATERIAL_INGEST: &'static str = "material_ingest";

    pub fn message_type(&self) -> &'static str {
        match self {
            Self::KeywordAnalysis(_) => Self::KEYWORD_ANALYSIS,
            Self::MaterialIngest(_) => Self::MATERIAL_INGEST,
        }
    }

    /// Separates undecodable bodies from well-formed ones of a type nobody handles.
    pub fn decode(body: &str) -> Result<Self, EnvelopeError> {
        let raw: RawEnvelope =
            serde_json::from_str(body).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

        let message_type = raw
            .message_type
            .ok_or_else(|| EnvelopeError::Malformed("missing message_type".to_string()))?;

        let parsed = match message_type.as_str() {
            Self::KEYWORD_ANALYSIS => serde_json::from_value(raw.data).map(Self::KeywordAnalysis),
            Self::MATERIAL_INGEST => serde_json::from_value(raw.data).map(Self::MaterialIngest),
            _ => return Err(EnvelopeError::UnknownType(message_type)),
        };

        parsed.map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_keyword_analysis() {
        let envelope = QueueEnvelope::decode(
            r#"{"message_type": "keyword_analysis", "data": {"file_uri": "https://store/a.pdf", "keywords": ["PFAS"], "force": true}}"#,
        )
        .unwrap();

        match envelope {
            QueueEnvelope::KeywordAnalysis(job) => {
                assert_eq!(job.file_uri, "https://store/a.pdf");
                assert_eq!(job.keywords, vec!["PFAS".to_string()]);
                assert!(job.force);
            }
            other => panic!("unexpected envelope {:?}", other),
        }
    }

    #[test]
    fn test_encode_matches_decode() {
        let envelope = QueueEnvelope::KeywordAnalysis(DocumentJob::new("https://store/b.pdf"));
        let body = envelope.encode().unwrap();
        assert!(body.contains(r#""message_type":"keyword_analysis""#));
        assert_eq!(QueueEnvelope::decode(&body).unwrap(), envelope);
    }

    #[test]
    fn test_unknown_type_is_distinguished() {
        let error = QueueEnvelope::decode(r#"{"message_type": "folder_scan", "data": {}}"#).unwrap_err();
        assert!(matches!(error, EnvelopeError::UnknownType(t) if t == "folder_scan"));
    }

    #[test]
    fn test_malformed_bodies() {
        assert!(matches!(QueueEnvelope::decode("not json"), Err(EnvelopeError::Malformed(_))));
        assert!(matches!(QueueEnvelope::decode(r#"{"data": {}}"#), Err(EnvelopeError::Malformed(_))));
        assert!(matches!(
            QueueEnvelope::decode(r#"{"message_type": "keyword_analysis", "data": {}}"#),
            Err(EnvelopeError::Malformed(_))
        ));
    }
}
