//! Failure categories for the classify-and-act pipeline.
//!
//! Capture and OCR failures surface as [`VisionServiceError`], classifier
//! failures as [`ClassificationError`], and a missing cache entry as
//! [`CacheError`]. Model-level problems start out as [`ModelError`] and are
//! either degraded (model not found) or folded into a classification error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no cache entry for window '{0}'")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum VisionServiceError {
    #[error("screen capture failed: {0}")]
    Capture(String),

    #[error("screen capture returned an empty frame ({0} bytes)")]
    EmptyFrame(usize),

    #[error("captured frame could not be decoded: {0}")]
    InvalidFrame(String),

    #[error("OCR engine used before init()")]
    OcrNotInitialized,

    #[error("OCR input rejected: {0}")]
    InvalidInput(String),

    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("{stage} timed out after {timeout_ms}ms")]
    Timeout { stage: &'static str, timeout_ms: u64 },

    #[error("{context}: {source:#}")]
    Other {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("classification model not found: {0}")]
    NotFound(String),

    #[error("classification model failed to initialize: {0}")]
    Initialization(String),

    #[error("classification model inference failed: {0}")]
    Inference(String),
}

#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("{context}: {source}")]
    Model {
        context: String,
        #[source]
        source: ModelError,
    },

    #[error("classifier timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("classifier failed: {0}")]
    Failed(String),
}

/// Everything a single pipeline run can fail with.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("window identifier required")]
    WindowIdRequired,

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Vision(#[from] VisionServiceError),

    #[error(transparent)]
    Classification(#[from] ClassificationError),
}

impl ClassificationError {
    /// Wraps a model failure with the operation that hit it.
    pub fn from_model(context: impl Into<String>, source: ModelError) -> Self {
        ClassificationError::Model {
            context: context.into(),
            source,
        }
    }

    /// True when the model itself is absent, which the pipeline treats as a
    /// degraded run rather than a failure.
    pub fn is_model_not_found(&self) -> bool {
        matches!(
            self,
            ClassificationError::Model {
                source: ModelError::NotFound(_),
                ..
            }
        )
    }
}

impl VisionServiceError {
    /// Catch-all for failures that have no dedicated variant.
    pub fn other(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        VisionServiceError::Other {
            context: context.into(),
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_id_required_message() {
        assert_eq!(
            PipelineError::WindowIdRequired.to_string(),
            "window identifier required"
        );
    }

    #[test]
    fn test_model_errors_wrap_with_context() {
        let err = ClassificationError::from_model(
            "classify 'Chrome - github.com'",
            ModelError::Inference("bad response".into()),
        );
        let message = err.to_string();
        assert!(message.contains("classify 'Chrome - github.com'"));
        assert!(message.contains("bad response"));
        assert!(!err.is_model_not_found());

        let missing =
            ClassificationError::from_model("init", ModelError::NotFound("model.py".into()));
        assert!(missing.is_model_not_found());
    }

    #[test]
    fn test_cache_error_converts_into_pipeline_error() {
        let err: PipelineError = CacheError::NotFound("A".into()).into();
        assert!(matches!(err, PipelineError::Cache(CacheError::NotFound(ref id)) if id == "A"));
    }
}
