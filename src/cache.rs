//! Per-window classification state with a periodic TTL sweep.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Mode {
    Idle,
    Studying,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Idle => "Idle",
            Mode::Studying => "Studying",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WindowClassification {
    pub mode: Mode,
    pub last_classified_at: DateTime<Utc>,
}

impl WindowClassification {
    pub fn new(mode: Mode, at: DateTime<Utc>) -> Self {
        Self {
            mode,
            last_classified_at: at,
        }
    }

    pub fn now(mode: Mode) -> Self {
        Self::new(mode, Utc::now())
    }

    /// Time since the last classification or touch, zero if it lies in the
    /// future.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_classified_at).to_std().unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct WindowCache {
    entries: Arc<Mutex<HashMap<String, WindowClassification>>>,
    ttl: Duration,
    sweep_every: Duration,
    sweeper: Arc<Mutex<Option<CancellationToken>>>,
}

impl WindowCache {
    pub fn new(ttl: Duration, sweep_every: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            sweep_every,
            sweeper: Arc::new(Mutex::new(None)),
        }
    }

    pub fn get(&self, id: &str) -> Option<WindowClassification> {
        lock(&self.entries).get(id).copied()
    }

    pub fn set(&self, id: &str, value: WindowClassification) {
        lock(&self.entries).insert(id.to_string(), value);
    }

    pub fn has(&self, id: &str) -> bool {
        lock(&self.entries).contains_key(id)
    }

    pub fn delete(&self, id: &str) {
        lock(&self.entries).remove(id);
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refreshes `last_classified_at` without changing the mode. Returns
    /// false when the window is not cached.
    pub fn touch(&self, id: &str, at: DateTime<Utc>) -> bool {
        match lock(&self.entries).get_mut(id) {
            Some(entry) => {
                entry.last_classified_at = at;
                true
            }
            None => false,
        }
    }

    /// Removes every entry older than the TTL as of `now`.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|_, entry| entry.age_at(now) <= ttl);
        before - entries.len()
    }

    /// Starts the background sweep. Calling it again while running does
    /// nothing.
    pub fn start_ttl(&self) {
        let mut sweeper = lock(&self.sweeper);
        if sweeper.is_some() {
            return;
        }

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let cache = self.clone();
        let period = self.sweep_every;

        tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = cache.sweep_at(Utc::now());
                        if evicted > 0 {
                            log_info!("evicted {evicted} stale window(s), {} cached", cache.len());
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
            log_debug!("cache sweep stopped");
        });

        *sweeper = Some(cancel_token);
    }

    pub fn stop_ttl(&self) {
        if let Some(token) = lock(&self.sweeper).take() {
            token.cancel();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
