//! Keyword scoring classifier.
//!
//! Counts whole-word keyword hits per topic. The best topic wins if it has
//! at least `min_hits` hits; otherwise the text is idle.

use std::collections::HashSet;

use async_trait::async_trait;

use super::{Classification, Classifier};
use crate::error::ClassificationError;
use crate::settings::TopicKeywords;

const DEFAULT_MIN_HITS: usize = 2;

pub fn default_topics() -> Vec<TopicKeywords> {
    let topic = |name: &str, words: &[&str]| TopicKeywords {
        topic: name.to_string(),
        keywords: words.iter().map(|word| word.to_string()).collect(),
    };
    vec![
        topic(
            "computer science",
            &[
                "algorithm", "function", "compiler", "recursion", "struct", "class", "return",
                "complexity", "array", "pointer", "thread", "async", "const", "impl", "fn",
                "hook", "component", "database", "query", "runtime", "stack", "heap",
            ],
        ),
        topic(
            "mathematics",
            &[
                "theorem", "proof", "lemma", "integral", "derivative", "matrix", "vector",
                "equation", "polynomial", "eigenvalue", "limit", "probability", "corollary",
            ],
        ),
        topic(
            "sciences",
            &[
                "cell", "protein", "molecule", "enzyme", "photosynthesis", "velocity",
                "momentum", "energy", "reaction", "organism", "hypothesis", "experiment",
            ],
        ),
        topic(
            "languages",
            &[
                "vocabulary", "grammar", "conjugation", "tense", "pronunciation", "translate",
                "noun", "verb", "adjective", "sentence",
            ],
        ),
    ]
}

pub struct KeywordClassifier {
    topics: Vec<(String, HashSet<String>)>,
    min_hits: usize,
}

impl KeywordClassifier {
    pub fn new(topics: Vec<TopicKeywords>) -> Self {
        let topics = topics
            .into_iter()
            .map(|entry| {
                let words = entry
                    .keywords
                    .iter()
                    .map(|word| word.to_lowercase())
                    .collect();
                (entry.topic, words)
            })
            .collect();
        Self {
            topics,
            min_hits: DEFAULT_MIN_HITS,
        }
    }

    pub fn with_min_hits(mut self, min_hits: usize) -> Self {
        self.min_hits = min_hits.max(1);
        self
    }

    fn score(&self, text: &str) -> Option<(&str, usize)> {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .map(str::to_lowercase)
            .collect();

        self.topics
            .iter()
            .map(|(topic, keywords)| {
                let hits = words.iter().filter(|word| keywords.contains(*word)).count();
                (topic.as_str(), hits)
            })
            .filter(|(_, hits)| *hits > 0)
            // Earlier topics win ties.
            .fold(None, |best: Option<(&str, usize)>, candidate| match best {
                Some(current) if current.1 >= candidate.1 => Some(current),
                _ => Some(candidate),
            })
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, ClassificationError> {
        Ok(match self.score(text) {
            Some((topic, hits)) if hits >= self.min_hits => Classification::studying(topic),
            _ => Classification::idle(),
        })
    }
}
