//! Groups captured text into (window, topic) batches and decides when they
//! leave for the sink.
//!
//! Two things trigger delivery: the running character total reaching the
//! flush threshold, and the idle-flush timer that starts when the user
//! leaves studying mode with undelivered text. The timer is single-shot;
//! re-entering idle replaces it and re-entering studying cancels it.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use super::sink::BatchSink;
use super::types::{Batch, BatchEntry, BatchPayload};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

struct IdleTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct BatcherState {
    batches: Vec<Batch>,
    total_chars: usize,
    studying: bool,
    idle_timer: Option<IdleTimer>,
    timer_generation: u64,
}

impl BatcherState {
    fn take_all(&mut self) -> Vec<Batch> {
        self.total_chars = 0;
        std::mem::take(&mut self.batches)
    }

    fn cancel_idle_timer(&mut self) -> bool {
        match self.idle_timer.take() {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    fn has_content(&self) -> bool {
        self.batches.iter().any(Batch::has_content)
    }

    /// Puts batches from a failed delivery back in front of anything added
    /// while the delivery was in flight.
    fn restore(&mut self, mut failed: Vec<Batch>) {
        let newer = std::mem::take(&mut self.batches);
        for batch in newer {
            let continues_last = failed
                .last()
                .is_some_and(|last| last.matches(&batch.window_title, &batch.topic_label));
            if !continues_last {
                failed.push(batch);
            } else if let Some(last) = failed.last_mut() {
                last.entries.extend(batch.entries);
            }
        }
        self.total_chars = failed.iter().map(batch_chars).sum();
        self.batches = failed;
    }
}

fn batch_chars(batch: &Batch) -> usize {
    batch
        .entries
        .iter()
        .map(|entry| entry_chars(&batch.window_title, &batch.topic_label, &entry.text))
        .sum()
}

fn entry_chars(window_title: &str, topic_label: &str, text: &str) -> usize {
    window_title.chars().count() + topic_label.chars().count() + text.chars().count()
}

#[derive(Clone)]
pub struct BatchAccumulator {
    state: Arc<Mutex<BatcherState>>,
    sink: Arc<dyn BatchSink>,
    flush_threshold: usize,
    idle_flush_timeout: Option<Duration>,
}

impl BatchAccumulator {
    /// `idle_flush_timeout` of `None` disables the idle flush.
    pub fn new(
        sink: Arc<dyn BatchSink>,
        flush_threshold: usize,
        idle_flush_timeout: Option<Duration>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(BatcherState::default())),
            sink,
            flush_threshold,
            idle_flush_timeout,
        }
    }

    /// Appends `text` to the open batch, or opens a new one when the
    /// (window, topic) pair changed. Flushes once the running total reaches
    /// the threshold; a failed flush is logged and the text stays queued.
    pub async fn add(&self, window_title: &str, topic_label: &str, text: &str) {
        let total = {
            let mut state = self.lock();
            let entry = BatchEntry {
                text: text.to_string(),
            };
            let same_pair = state
                .batches
                .last()
                .is_some_and(|open| open.matches(window_title, topic_label));
            if !same_pair {
                state.batches.push(Batch::new(window_title, topic_label));
            }
            if let Some(open) = state.batches.last_mut() {
                open.entries.push(entry);
            }
            state.total_chars += entry_chars(window_title, topic_label, text);
            state.total_chars
        };

        log_debug!(
            "queued {} chars for '{window_title}' / '{topic_label}', total {total}",
            text.len()
        );

        if total >= self.flush_threshold {
            if let Err(err) = self.flush_if_needed().await {
                log_error!("threshold flush failed, keeping batches: {err:#}");
            }
        }
    }

    /// Delivers everything once the character total has reached the flush
    /// threshold. Returns whether a delivery happened; below the threshold
    /// this is a no-op.
    pub async fn flush_if_needed(&self) -> Result<bool> {
        if self.total_chars() < self.flush_threshold {
            return Ok(false);
        }
        self.flush().await
    }

    /// Delivers everything queued regardless of size. On failure the batches
    /// are put back and the error is returned.
    pub async fn flush(&self) -> Result<bool> {
        let taken = self.lock().take_all();
        if taken.is_empty() {
            return Ok(false);
        }

        let payload = BatchPayload { batches: taken };
        match self.sink.deliver(&payload).await {
            Ok(()) => {
                log_info!(
                    "flushed {} batch(es), {} entries",
                    payload.batches.len(),
                    payload.entry_count()
                );
                Ok(true)
            }
            Err(err) => {
                let mut state = self.lock();
                state.restore(payload.batches);
                // An idle expiry during the delivery found nothing to flush.
                if !state.studying && state.idle_timer.is_none() {
                    self.arm_idle_timer(&mut state);
                }
                Err(err).context("batch sink rejected delivery")
            }
        }
    }

    /// Read-only copy of the queued batches.
    pub fn get_batches(&self) -> Vec<Batch> {
        self.lock().batches.clone()
    }

    pub fn get_batches_as_json(&self) -> Result<String> {
        let payload = BatchPayload {
            batches: self.get_batches(),
        };
        serde_json::to_string_pretty(&payload).context("failed to encode batches")
    }

    pub fn total_chars(&self) -> usize {
        self.lock().total_chars
    }

    /// Drops every queued batch and cancels the idle timer.
    pub fn clear_batches(&self) {
        let mut state = self.lock();
        state.take_all();
        state.cancel_idle_timer();
    }

    pub fn notify_studying_started(&self) {
        let mut state = self.lock();
        state.studying = true;
        if state.cancel_idle_timer() {
            log_debug!("idle flush cancelled, back to studying");
        }
    }

    /// Arms the idle flush if there is any non-blank text waiting. A timer
    /// that is already running is replaced, not stacked.
    pub fn notify_idle_started(&self) {
        let mut state = self.lock();
        state.studying = false;
        state.cancel_idle_timer();
        self.arm_idle_timer(&mut state);
    }

    fn arm_idle_timer(&self, state: &mut BatcherState) {
        let Some(timeout) = self.idle_flush_timeout else {
            return;
        };
        if !state.has_content() {
            return;
        }

        state.timer_generation += 1;
        let generation = state.timer_generation;
        let accumulator = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            accumulator.on_idle_timeout(generation).await;
        });
        state.idle_timer = Some(IdleTimer { generation, handle });
        log_debug!("idle flush armed for {}ms", timeout.as_millis());
    }

    pub fn is_studying(&self) -> bool {
        self.lock().studying
    }

    pub fn has_idle_timer(&self) -> bool {
        self.lock().idle_timer.is_some()
    }

    async fn on_idle_timeout(&self, generation: u64) {
        let taken = {
            let mut state = self.lock();
            match &state.idle_timer {
                Some(timer) if timer.generation == generation => {}
                _ => return,
            }
            state.idle_timer = None;
            state.take_all()
        };

        if taken.is_empty() {
            return;
        }

        let payload = BatchPayload { batches: taken };
        match self.sink.deliver(&payload).await {
            Ok(()) => log_info!(
                "idle flush delivered {} batch(es), {} entries",
                payload.batches.len(),
                payload.entry_count()
            ),
            Err(err) => log_warn!(
                "idle flush failed, discarding {} batch(es): {err:#}",
                payload.batches.len()
            ),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BatcherState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
