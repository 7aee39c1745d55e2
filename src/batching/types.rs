use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchEntry {
    pub text: String,
}

/// Consecutive captures sharing one (window, topic) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Batch {
    #[serde(rename = "window")]
    pub window_title: String,
    #[serde(rename = "topic")]
    pub topic_label: String,
    pub entries: Vec<BatchEntry>,
}

impl Batch {
    pub fn new(window_title: &str, topic_label: &str) -> Self {
        Self {
            window_title: window_title.to_string(),
            topic_label: topic_label.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn matches(&self, window_title: &str, topic_label: &str) -> bool {
        self.window_title == window_title && self.topic_label == topic_label
    }

    pub fn has_content(&self) -> bool {
        self.entries.iter().any(|entry| !entry.text.trim().is_empty())
    }
}

/// What the downstream sink receives:
/// `{ "batches": [{ "window", "topic", "entries": [{ "text" }] }] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchPayload {
    pub batches: Vec<Batch>,
}

impl BatchPayload {
    pub fn entry_count(&self) -> usize {
        self.batches.iter().map(|batch| batch.entries.len()).sum()
    }
}
