use std::{future::Future, time::Duration};

use chrono::Utc;

use crate::{
    cache::{Mode, WindowClassification},
    classify::Classification,
    error::{CacheError, ClassificationError, PipelineError, VisionServiceError},
};

use super::{controller::Orchestrator, state::PipelineOutcome};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

impl Orchestrator {
    /// Capture, classify and act on the result for `window_id`.
    ///
    /// The window must already be cached. The cache entry is refreshed with
    /// the new mode; the active state only follows it while `window_id` is
    /// still the focused window. Studying text goes to the batch
    /// accumulator. A missing classification model yields
    /// [`PipelineOutcome::Degraded`] instead of an error.
    pub async fn run_full_pipeline(&self, window_id: &str) -> Result<PipelineOutcome, PipelineError> {
        if window_id.is_empty() {
            return Err(PipelineError::WindowIdRequired);
        }
        if self.is_shut_down() {
            return Ok(PipelineOutcome::Discarded);
        }
        let previous = self
            .inner
            .cache
            .get(window_id)
            .ok_or_else(|| CacheError::NotFound(window_id.to_string()))?
            .mode;

        let timeout = self.inner.settings.capture_timeout();

        let text = with_timeout(timeout, self.inner.vision.capture_text(), || {
            VisionServiceError::Timeout {
                stage: "screen capture",
                timeout_ms: millis(timeout),
            }
        })
        .await?;

        let classification = match with_timeout(timeout, self.inner.classifier.classify(&text), || {
            ClassificationError::Timeout {
                timeout_ms: millis(timeout),
            }
        })
        .await
        {
            Ok(classification) => classification,
            Err(err) if err.is_model_not_found() => {
                log_warn!("classification model unavailable, skipping '{window_id}': {err}");
                return Ok(PipelineOutcome::Degraded);
            }
            Err(err) => return Err(err.into()),
        };

        let Classification { mode, topic } = classification;
        log_debug!("'{window_id}' classified as {mode} ({topic}), was {previous}");

        let transitioned = {
            let mut state = self.lock_state();
            if self.is_shut_down() {
                log_debug!("discarding {mode} result for '{window_id}', orchestrator stopped");
                return Ok(PipelineOutcome::Discarded);
            }
            self.inner
                .cache
                .set(window_id, WindowClassification::new(mode, Utc::now()));
            if state.current_window == window_id {
                self.change_state(&mut state, mode)
            } else {
                log_info!(
                    "'{window_id}' is no longer focused, cached {mode} without changing state"
                );
                false
            }
        };

        // `add` delivers on its own once the threshold is reached.
        let batched = mode == Mode::Studying;
        if batched {
            self.inner.batcher.add(window_id, &topic, &text).await;
        }

        Ok(PipelineOutcome::Classified {
            previous,
            mode,
            topic,
            transitioned,
            batched,
        })
    }
}

async fn with_timeout<T, E>(
    limit: Duration,
    work: impl Future<Output = Result<T, E>>,
    on_timeout: impl FnOnce() -> E,
) -> Result<T, E> {
    match tokio::time::timeout(limit, work).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
