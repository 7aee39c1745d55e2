use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use anyhow::{bail, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    batching::{BatchAccumulator, BatchSink},
    cache::{Mode, WindowCache, WindowClassification},
    classify::Classifier,
    error::PipelineError,
    pollers::{TickPoller, WindowChangePoller},
    scheduler::IntervalScheduler,
    sensing::{TextCapture, WindowObserver},
    settings::Settings,
};

use super::state::{ActiveState, OrchestratorSnapshot, PendingRun, RuntimeState};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// The external pieces the orchestrator drives.
pub struct Collaborators {
    pub observer: Arc<dyn WindowObserver>,
    pub vision: Arc<dyn TextCapture>,
    pub classifier: Arc<dyn Classifier>,
    pub sink: Arc<dyn BatchSink>,
}

pub(crate) struct Inner {
    pub settings: Settings,
    pub session_id: String,
    pub cache: WindowCache,
    pub batcher: BatchAccumulator,
    pub scheduler: IntervalScheduler,
    pub window_poller: WindowChangePoller,
    pub studying_poller: TickPoller,
    pub idle_poller: TickPoller,
    pub vision: Arc<dyn TextCapture>,
    pub classifier: Arc<dyn Classifier>,
    pub state: Mutex<RuntimeState>,
    /// Cancelled once by `shutdown`; nothing restarts after that.
    pub session: CancellationToken,
}

/// Idle/Studying state machine over the window cache, the pollers and the
/// batch accumulator. Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(settings: Settings, collaborators: Collaborators) -> Self {
        let scheduler = IntervalScheduler::new();
        let cache = WindowCache::new(settings.cache_ttl(), settings.cache_sweep_interval());
        let batcher = BatchAccumulator::new(
            collaborators.sink,
            settings.batch_flush_threshold,
            settings.batch_idle_flush_timeout(),
        );
        let window_poller = WindowChangePoller::new(
            scheduler.clone(),
            collaborators.observer,
            settings.window_poll_interval(),
        );
        let studying_poller =
            TickPoller::studying_ocr(scheduler.clone(), settings.studying_ocr_interval());
        let idle_poller =
            TickPoller::idle_revalidation(scheduler.clone(), settings.idle_revalidation_interval());

        Self {
            inner: Arc::new(Inner {
                settings,
                session_id: Uuid::new_v4().to_string(),
                cache,
                batcher,
                scheduler,
                window_poller,
                studying_poller,
                idle_poller,
                vision: collaborators.vision,
                classifier: collaborators.classifier,
                state: Mutex::new(RuntimeState::default()),
                session: CancellationToken::new(),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn cache(&self) -> &WindowCache {
        &self.inner.cache
    }

    pub fn batcher(&self) -> &BatchAccumulator {
        &self.inner.batcher
    }

    pub fn scheduler(&self) -> &IntervalScheduler {
        &self.inner.scheduler
    }

    pub fn active_mode(&self) -> Mode {
        self.lock_state().active.mode()
    }

    pub fn current_window(&self) -> String {
        self.lock_state().current_window.clone()
    }

    pub fn has_pending_debounce(&self) -> bool {
        self.lock_state().debounce.is_some()
    }

    pub fn snapshot(&self) -> OrchestratorSnapshot {
        let state = self.lock_state();
        OrchestratorSnapshot {
            session_id: self.inner.session_id.clone(),
            current_window: state.current_window.clone(),
            active_state: state.active,
            transitions: state.transitions,
            pending_debounce: state.debounce.as_ref().map(|pending| pending.window.clone()),
            cached_windows: self.inner.cache.len(),
            pending_batches: self.inner.batcher.get_batches().len(),
            pending_chars: self.inner.batcher.total_chars(),
        }
    }

    /// Initialises the backends, starts the cache sweep and enters Idle.
    /// Backend init failures are logged; the affected pipeline stage fails
    /// on each run until the backend recovers.
    pub async fn start(&self) -> Result<()> {
        if self.is_shut_down() {
            bail!("orchestrator session {} was shut down", self.inner.session_id);
        }
        {
            let state = self.lock_state();
            if state.started {
                return Ok(());
            }
        }

        log_info!("starting orchestrator session {}", self.inner.session_id);

        if let Err(err) = self.inner.vision.init().await {
            log_error!("vision service failed to initialize: {err}");
        }
        match self.inner.classifier.init().await {
            Ok(()) => {}
            Err(err) if err.is_model_not_found() => {
                log_warn!("classifier model not found, running degraded: {err}")
            }
            Err(err) => log_error!("classifier failed to initialize: {err}"),
        }

        self.install_callbacks();
        self.inner.cache.start_ttl();

        let mut state = self.lock_state();
        if state.started || self.is_shut_down() {
            return Ok(());
        }
        state.started = true;
        state.active = ActiveState::entered(Mode::Idle);
        self.on_enter(Mode::Idle);
        Ok(())
    }

    /// Stops every timer and poller, delivers what is still queued and
    /// releases the backends. Pipeline runs still in flight finish without
    /// touching the cache, the state or the batches.
    pub async fn shutdown(&self) {
        {
            let mut state = self.lock_state();
            self.inner.session.cancel();
            state.cancel_debounce();
            state.started = false;
        }
        self.inner.window_poller.stop();
        self.inner.studying_poller.stop();
        self.inner.idle_poller.stop();
        self.inner.scheduler.shutdown().await;
        self.inner.cache.stop_ttl();

        match self.inner.batcher.flush().await {
            Ok(true) => log_info!("flushed pending batches on shutdown"),
            Ok(false) => {}
            Err(err) => log_error!("failed to flush batches on shutdown: {err:#}"),
        }
        self.inner.batcher.clear_batches();

        self.inner.vision.dispose().await;
        self.inner.classifier.dispose().await;
        log_info!("orchestrator session {} stopped", self.inner.session_id);
    }

    fn install_callbacks(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner
            .window_poller
            .set_callback(Arc::new(move |old_id, new_id| {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(inner) = weak.upgrade() {
                        Orchestrator { inner }.handle_window_change(&old_id, &new_id);
                    }
                    Ok(())
                })
            }));

        let weak = Arc::downgrade(&self.inner);
        self.inner.studying_poller.set_callback(Arc::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    Orchestrator { inner }.studying_tick().await;
                }
                Ok(())
            })
        }));

        let weak = Arc::downgrade(&self.inner);
        self.inner.idle_poller.set_callback(Arc::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    Orchestrator { inner }.revalidate_idle().await;
                }
                Ok(())
            })
        }));
    }

    /// Reacts to the focused window changing from `old_id` to `new_id`.
    ///
    /// The old window is touched first. An unseen window is optimistically
    /// cached as Studying and a pipeline run is scheduled after the
    /// new-window delay; a cached window switches state right away. Errors
    /// are logged and the state falls back to whatever the cache says.
    pub fn handle_window_change(&self, old_id: &str, new_id: &str) {
        if self.is_shut_down() {
            log_debug!("ignoring window change to '{new_id}' after shutdown");
            return;
        }
        if let Err(err) = self.apply_window_change(old_id, new_id) {
            log_error!(
                "window change handling failed (session {}, old '{old_id}', new '{new_id}'): {err}",
                self.inner.session_id
            );
            self.fallback_to_cached(new_id);
        }
    }

    fn apply_window_change(&self, old_id: &str, new_id: &str) -> Result<(), PipelineError> {
        if new_id.is_empty() {
            return Err(PipelineError::WindowIdRequired);
        }

        let now = Utc::now();
        let mut state = self.lock_state();

        if !old_id.is_empty() && self.inner.cache.touch(old_id, now) {
            log_debug!("touched '{old_id}'");
        }

        state.current_window = new_id.to_string();
        if let Some(stale) = state.cancel_debounce() {
            log_debug!("cancelled pending pipeline run for '{stale}'");
        }

        match self.inner.cache.get(new_id) {
            None => {
                log_info!("new window '{new_id}', assuming Studying until classified");
                self.inner
                    .cache
                    .set(new_id, WindowClassification::new(Mode::Studying, now));
                self.change_state(&mut state, Mode::Studying);
                self.schedule_debounced_run(&mut state, new_id);
            }
            Some(entry) => {
                log_info!("switched to known window '{new_id}' ({})", entry.mode);
                self.change_state(&mut state, entry.mode);
            }
        }
        Ok(())
    }

    fn schedule_debounced_run(&self, state: &mut RuntimeState, window: &str) {
        state.debounce_generation += 1;
        let generation = state.debounce_generation;
        let delay: Duration = self.inner.settings.new_window_delay();
        let orchestrator = self.clone();
        let target = window.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            orchestrator.run_debounced(&target, generation).await;
        });

        state.debounce = Some(PendingRun {
            window: window.to_string(),
            generation,
            handle,
        });
    }

    pub(crate) async fn run_debounced(&self, window: &str, generation: u64) {
        {
            let mut state = self.lock_state();
            if self.is_shut_down() {
                return;
            }
            if state
                .debounce
                .as_ref()
                .is_some_and(|pending| pending.generation == generation)
            {
                state.debounce = None;
            }
            if state.current_window != window {
                log_debug!(
                    "skipping delayed pipeline for '{window}', now on '{}'",
                    state.current_window
                );
                return;
            }
        }
        self.run_pipeline_logged("new-window pipeline", window).await;
    }

    /// Studying re-poll: runs the pipeline for the current window.
    pub async fn studying_tick(&self) {
        let window = self.current_window();
        if self.is_shut_down() {
            return;
        }
        if window.is_empty() {
            log_debug!("studying tick with no current window");
            return;
        }
        self.ensure_cached(&window);
        self.run_pipeline_logged("studying OCR re-poll", &window).await;
    }

    /// Idle re-poll: reclassifies the current window if it is not cached or
    /// its Idle classification has gone stale.
    pub async fn revalidate_idle(&self) {
        let window = self.current_window();
        if self.is_shut_down() {
            return;
        }
        if window.is_empty() {
            log_info!("idle revalidation: no current window");
            return;
        }

        let threshold = self.inner.settings.idle_revalidation_threshold();
        let needs_run = match self.inner.cache.get(&window) {
            None => true,
            Some(entry) => entry.mode == Mode::Idle && entry.age_at(Utc::now()) > threshold,
        };
        if !needs_run {
            log_debug!("idle revalidation: '{window}' still active");
            return;
        }

        self.ensure_cached(&window);
        self.run_pipeline_logged("idle revalidation", &window).await;
    }

    /// Seeds an evicted entry for `window` with the active state's mode so
    /// the pipeline has something to reconcile against.
    fn ensure_cached(&self, window: &str) {
        let state = self.lock_state();
        if !self.inner.cache.has(window) {
            self.inner
                .cache
                .set(window, WindowClassification::now(state.active.mode()));
        }
    }

    async fn run_pipeline_logged(&self, operation: &str, window: &str) {
        match self.run_full_pipeline(window).await {
            Ok(outcome) => log_debug!("{operation} for '{window}': {outcome:?}"),
            Err(err) => {
                log_error!(
                    "{operation} failed (session {}, window '{window}', state {}): {err:#}",
                    self.inner.session_id,
                    self.active_mode()
                );
                self.fallback_to_cached(window);
            }
        }
    }

    /// Best effort: if `window` is current and cached, make the state match
    /// its cached mode.
    fn fallback_to_cached(&self, window: &str) {
        let mut state = self.lock_state();
        if state.current_window != window {
            return;
        }
        if let Some(entry) = self.inner.cache.get(window) {
            self.change_state(&mut state, entry.mode);
        }
    }

    /// Moves to `next`, running the exit/enter hooks. Returns false and does
    /// nothing when already in that state or after shutdown.
    pub(crate) fn change_state(&self, state: &mut RuntimeState, next: Mode) -> bool {
        let current = state.active.mode();
        if current == next || self.is_shut_down() {
            return false;
        }
        let held_for = Utc::now() - state.active.since();
        self.on_exit(current);
        state.active = ActiveState::entered(next);
        state.transitions += 1;
        self.on_enter(next);
        log_info!(
            "state {current} -> {next} after {}s (window '{}', session {})",
            held_for.num_seconds(),
            state.current_window,
            self.inner.session_id
        );
        true
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.session.is_cancelled()
    }

    /// Public form of [`Self::change_state`].
    pub fn transition_to(&self, next: Mode) -> bool {
        let mut state = self.lock_state();
        self.change_state(&mut state, next)
    }

    fn on_enter(&self, mode: Mode) {
        match mode {
            Mode::Idle => {
                self.inner.window_poller.start();
                self.inner.idle_poller.start();
                self.inner.batcher.notify_idle_started();
            }
            Mode::Studying => {
                self.inner.studying_poller.start();
                self.inner.batcher.notify_studying_started();
            }
        }
    }

    fn on_exit(&self, mode: Mode) {
        match mode {
            Mode::Idle => self.inner.idle_poller.stop(),
            Mode::Studying => self.inner.studying_poller.stop(),
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, RuntimeState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
