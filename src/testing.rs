//! In-memory stand-ins for the orchestrator's collaborators.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::{
    batching::{BatchPayload, BatchSink},
    cache::Mode,
    classify::{Classification, Classifier},
    error::{ClassificationError, ModelError, VisionServiceError},
    orchestrator::Collaborators,
    sensing::{TextCapture, WindowObserver},
    settings::Settings,
};

/// Settings with pollers slow enough that tests drive every handler by hand.
pub fn quiet_settings() -> Settings {
    Settings {
        window_poll_interval_ms: 3_600_000,
        studying_ocr_interval_ms: 3_600_000,
        idle_revalidation_interval_ms: 3_600_000,
        new_window_delay_ms: 3_000,
        capture_timeout_ms: 1_000,
        ..Settings::default()
    }
}

#[derive(Default)]
pub struct FakeObserver {
    pub current: Mutex<Option<String>>,
}

#[async_trait]
impl WindowObserver for FakeObserver {
    async fn current_window_id(&self) -> Result<Option<String>> {
        Ok(self.current.lock().unwrap().clone())
    }
}

/// Returns `text`, or fails when `fail` is set.
pub struct FakeVision {
    pub text: Mutex<String>,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeVision {
    pub fn new(text: &str) -> Self {
        Self {
            text: Mutex::new(text.to_string()),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_text(&self, text: &str) {
        *self.text.lock().unwrap() = text.to_string();
    }
}

#[async_trait]
impl TextCapture for FakeVision {
    async fn capture_text(&self) -> Result<String, VisionServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(VisionServiceError::Capture("display unavailable".into()));
        }
        Ok(self.text.lock().unwrap().clone())
    }
}

pub enum Scripted {
    Mode(Classification),
    MissingModel,
    Fail,
}

/// Plays back queued answers, then repeats `fallback`.
pub struct FakeClassifier {
    pub queue: Mutex<VecDeque<Scripted>>,
    pub fallback: Mutex<Classification>,
    pub calls: AtomicUsize,
    pub disposed: AtomicBool,
}

impl FakeClassifier {
    pub fn always(classification: Classification) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(classification),
            calls: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn set(&self, classification: Classification) {
        *self.fallback.lock().unwrap() = classification;
    }

    pub fn push(&self, answer: Scripted) {
        self.queue.lock().unwrap().push_back(answer);
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(&self, _text: &str) -> Result<Classification, ClassificationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.queue.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Mode(classification)) => Ok(classification),
            Some(Scripted::MissingModel) => Err(ClassificationError::from_model(
                "classify",
                ModelError::NotFound("classifier.py".into()),
            )),
            Some(Scripted::Fail) => Err(ClassificationError::Failed("scripted failure".into())),
            None => Ok(self.fallback.lock().unwrap().clone()),
        }
    }

    async fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

/// Records every delivered payload.
#[derive(Default)]
pub struct RecordingSink {
    pub payloads: Mutex<Vec<BatchPayload>>,
    pub fail: AtomicBool,
    pub attempts: AtomicUsize,
}

impl RecordingSink {
    pub fn delivered(&self) -> Vec<BatchPayload> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchSink for RecordingSink {
    async fn deliver(&self, payload: &BatchPayload) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("sink offline"));
        }
        self.payloads.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

pub struct Harness {
    pub observer: Arc<FakeObserver>,
    pub vision: Arc<FakeVision>,
    pub classifier: Arc<FakeClassifier>,
    pub sink: Arc<RecordingSink>,
}

impl Harness {
    pub fn new(text: &str, classification: Classification) -> Self {
        Self {
            observer: Arc::new(FakeObserver::default()),
            vision: Arc::new(FakeVision::new(text)),
            classifier: Arc::new(FakeClassifier::always(classification)),
            sink: Arc::new(RecordingSink::default()),
        }
    }

    pub fn studying(text: &str) -> Self {
        Self::new(text, Classification::studying("computer science"))
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            observer: self.observer.clone(),
            vision: self.vision.clone(),
            classifier: self.classifier.clone(),
            sink: self.sink.clone(),
        }
    }
}

pub fn idle() -> Classification {
    Classification {
        mode: Mode::Idle,
        topic: Mode::Idle.as_str().to_string(),
    }
}
