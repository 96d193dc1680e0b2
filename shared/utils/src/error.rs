use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum SheetscanError {
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Status resolution error: {message}")]
    StatusResolution { message: String },

    #[error("Queue error: {message}")]
    Queue { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("External service error: {service} - {message}")]
    ExternalService { service: String, message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },
}

impl SheetscanError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn status_resolution(message: impl Into<String>) -> Self {
        Self::StatusResolution {
            message: message.into(),
        }
    }

    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn external_service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::StatusResolution { .. } => "STATUS_RESOLUTION_ERROR",
            Self::Queue { .. } => "QUEUE_ERROR",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::Storage { .. } => 500,
            Self::Validation { .. } => 400,
            Self::StatusResolution { .. } => 409,
            Self::Queue { .. } => 503,
            Self::Configuration { .. } => 500,
            Self::ExternalService { .. } => 502,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
        }
    }
}

pub type SheetscanResult<T> = Result<T, SheetscanError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl From<SheetscanError> for ErrorResponse {
    fn from(error: SheetscanError) -> Self {
        Self {
            error: error.to_string(),
            code: error.error_code().to_string(),
            message: error.to_string(),
            details: None,
        }
    }
}

// Conversion from common error types
impl From<sqlx::Error> for SheetscanError {
    fn from(error: sqlx::Error) -> Self {
        Self::storage(error.to_string())
    }
}

impl From<redis::RedisError> for SheetscanError {
    fn from(error: redis::RedisError) -> Self {
        Self::storage(error.to_string())
    }
}

impl From<reqwest::Error> for SheetscanError {
    fn from(error: reqwest::Error) -> Self {
        Self::external_service("HTTP Client", error.to_string())
    }
}

impl From<serde_json::Error> for SheetscanError {
    fn from(error: serde_json::Error) -> Self {
        Self::validation("JSON", error.to_string())
    }
}
