pub mod batching;
pub mod cache;
pub mod classify;
pub mod error;
pub mod orchestrator;
pub mod pollers;
pub mod scheduler;
pub mod sensing;
pub mod settings;
pub mod utils;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};

use batching::{BatchSink, LogSink};
use classify::{Classifier, KeywordClassifier, ZeroShotClassifier};
use orchestrator::{Collaborators, Orchestrator};
use sensing::{
    CommandScreenCapture, CommandWindowObserver, TesseractOcr, TextCapture, VisionService,
    WindowObserver,
};
use settings::{ClassifierSettings, Settings, SettingsStore};

pub use cache::Mode;
pub use error::PipelineError;
pub use orchestrator::{OrchestratorSnapshot, PipelineOutcome};

/// Builds the command-line backed collaborators described by `settings`.
pub fn default_collaborators(settings: &Settings) -> Collaborators {
    let observer: Arc<dyn WindowObserver> = match &settings.window_command {
        Some(command) => Arc::new(CommandWindowObserver::new(command.clone(), None)),
        None => Arc::new(CommandWindowObserver::platform_default()),
    };

    let capture = match &settings.capture_command {
        Some(command) => CommandScreenCapture::new(command.clone()),
        None => CommandScreenCapture::platform_default(),
    };
    let ocr = match &settings.ocr_command {
        Some(command) => TesseractOcr::new(command.clone()),
        None => TesseractOcr::platform_default(),
    };
    let vision: Arc<dyn TextCapture> =
        Arc::new(VisionService::new(Arc::new(capture), Arc::new(ocr)));

    let classifier: Arc<dyn Classifier> = match &settings.classifier {
        ClassifierSettings::Keyword { topics } => {
            Arc::new(KeywordClassifier::new(topics.clone()))
        }
        ClassifierSettings::ZeroShot {
            command,
            args,
            topic,
            model,
        } => Arc::new(ZeroShotClassifier::new(
            command.clone(),
            args.clone(),
            topic.clone(),
            model.clone(),
        )),
    };

    let sink: Arc<dyn BatchSink> = Arc::new(LogSink);

    Collaborators {
        observer,
        vision,
        classifier,
        sink,
    }
}

/// Runs a session until Ctrl-C.
pub async fn run() -> Result<()> {
    utils::init_logging();
    log::info!("studylens starting up...");

    let store = SettingsStore::new(SettingsStore::default_path())?;
    if let Err(err) = store.write_defaults_if_missing() {
        log::warn!("could not write default settings: {err:#}");
    }
    let settings = store.settings();
    log::info!("settings loaded from {}", store.path().display());

    let orchestrator = Orchestrator::new(settings.clone(), default_collaborators(&settings));
    orchestrator
        .start()
        .await
        .context("failed to start orchestrator")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    log::info!("ctrl-c received, shutting down");

    orchestrator.shutdown().await;
    if let Ok(status) = serde_json::to_string(&orchestrator.snapshot()) {
        log::debug!("final state: {status}");
    }
    Ok(())
}
