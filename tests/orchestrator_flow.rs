use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;

use studylens_lib::{
    batching::ChannelSink,
    classify::{Classifier, KeywordClassifier},
    error::VisionServiceError,
    orchestrator::{Collaborators, Orchestrator},
    sensing::{TextCapture, WindowObserver},
    settings::Settings,
    Mode,
};

/// Window and screen text that the test flips as the "user" moves around.
#[derive(Default)]
struct Desktop {
    window: Mutex<Option<String>>,
    text: Mutex<String>,
}

impl Desktop {
    fn focus(&self, window: &str, text: &str) {
        *self.window.lock().unwrap() = Some(window.to_string());
        *self.text.lock().unwrap() = text.to_string();
    }
}

struct DesktopObserver(Arc<Desktop>);

#[async_trait]
impl WindowObserver for DesktopObserver {
    async fn current_window_id(&self) -> Result<Option<String>> {
        Ok(self.0.window.lock().unwrap().clone())
    }
}

struct DesktopVision(Arc<Desktop>);

#[async_trait]
impl TextCapture for DesktopVision {
    async fn capture_text(&self) -> Result<String, VisionServiceError> {
        Ok(self.0.text.lock().unwrap().clone())
    }
}

fn settings() -> Settings {
    Settings {
        window_poll_interval_ms: 1_000,
        studying_ocr_interval_ms: 10_000,
        idle_revalidation_interval_ms: 60_000,
        new_window_delay_ms: 2_000,
        batch_idle_flush_timeout_ms: 30_000,
        ..Settings::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_study_session_flows_into_sink() {
    let desktop = Arc::new(Desktop::default());
    let (sink, mut delivered) = ChannelSink::new(8);
    let classifier: Arc<dyn Classifier> = Arc::new(KeywordClassifier::new(
        studylens_lib::classify::keyword::default_topics(),
    ));
    let orchestrator = Orchestrator::new(
        settings(),
        Collaborators {
            observer: Arc::new(DesktopObserver(desktop.clone())),
            vision: Arc::new(DesktopVision(desktop.clone())),
            classifier,
            sink: Arc::new(sink),
        },
    );
    orchestrator.start().await.unwrap();
    assert_eq!(orchestrator.active_mode(), Mode::Idle);

    desktop.focus(
        "Firefox - docs.rs",
        "fn main() { let v: Vec<u32> = vec![]; } struct enum impl trait compiler algorithm",
    );
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(orchestrator.current_window(), "Firefox - docs.rs");
    assert_eq!(orchestrator.active_mode(), Mode::Studying);

    tokio::time::sleep(Duration::from_secs(3)).await;
    let batches = orchestrator.batcher().get_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].window_title, "Firefox - docs.rs");
    assert_eq!(batches[0].topic_label, "computer science");

    desktop.focus("Spotify - Discover Weekly", "play shuffle repeat liked songs");
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(orchestrator.active_mode(), Mode::Idle);
    assert_eq!(
        orchestrator.cache().get("Spotify - Discover Weekly").unwrap().mode,
        Mode::Idle
    );

    tokio::time::sleep(Duration::from_secs(31)).await;
    let payload = delivered.try_recv().expect("idle flush delivered");
    assert_eq!(payload.batches.len(), 1);
    assert_eq!(payload.batches[0].window_title, "Firefox - docs.rs");
    assert!(orchestrator.batcher().get_batches().is_empty());

    orchestrator.shutdown().await;
    assert!(delivered.try_recv().is_err());
}
