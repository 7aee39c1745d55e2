pub mod keyword;
pub mod zero_shot;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::Mode;
use crate::error::ClassificationError;

pub use keyword::KeywordClassifier;
pub use zero_shot::ZeroShotClassifier;

/// Outcome of classifying one capture. `topic` becomes the batch's topic
/// label when the mode is `Studying`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub mode: Mode,
    pub topic: String,
}

impl Classification {
    pub fn idle() -> Self {
        Self {
            mode: Mode::Idle,
            topic: Mode::Idle.as_str().to_string(),
        }
    }

    pub fn studying(topic: impl Into<String>) -> Self {
        Self {
            mode: Mode::Studying,
            topic: topic.into(),
        }
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn init(&self) -> Result<(), ClassificationError> {
        Ok(())
    }

    async fn classify(&self, text: &str) -> Result<Classification, ClassificationError>;

    async fn dispose(&self) {}
}
