//! The three recurring tasks that drive the orchestrator, each a named
//! [`IntervalScheduler`] task with a settable callback.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use anyhow::Result;
use futures::future::BoxFuture;

use crate::scheduler::{IntervalScheduler, TaskFn};
use crate::sensing::WindowObserver;

const ENABLE_LOGS: bool = true;

use crate::log_debug;

pub const WINDOW_CHANGE_TASK: &str = "window-change-poller";
pub const STUDYING_OCR_TASK: &str = "studying-ocr-poller";
pub const IDLE_REVALIDATION_TASK: &str = "idle-revalidation-poller";

/// Receives `(old_id, new_id)`; `old_id` is empty on the first observation.
pub type WindowChangeCallback =
    Arc<dyn Fn(String, String) -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub type TickCallback = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct WindowChangePoller {
    scheduler: IntervalScheduler,
    observer: Arc<dyn WindowObserver>,
    interval: Duration,
    last_id: Arc<Mutex<String>>,
    callback: Arc<Mutex<Option<WindowChangeCallback>>>,
}

impl WindowChangePoller {
    pub fn new(
        scheduler: IntervalScheduler,
        observer: Arc<dyn WindowObserver>,
        interval: Duration,
    ) -> Self {
        Self {
            scheduler,
            observer,
            interval,
            last_id: Arc::new(Mutex::new(String::new())),
            callback: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_callback(&self, callback: WindowChangeCallback) {
        *lock(&self.callback) = Some(callback);
    }

    /// Compares the focused window against the last one seen and fires the
    /// callback on a difference. "No active window" leaves the last id
    /// untouched.
    pub async fn poll_once(&self) -> Result<()> {
        poll_window(&self.observer, &self.last_id, &self.callback).await
    }

    pub fn start(&self) {
        let observer = self.observer.clone();
        let last_id = self.last_id.clone();
        let callback = self.callback.clone();
        let task: TaskFn = Arc::new(move || {
            let observer = observer.clone();
            let last_id = last_id.clone();
            let callback = callback.clone();
            Box::pin(async move { poll_window(&observer, &last_id, &callback).await })
        });
        self.scheduler.register(WINDOW_CHANGE_TASK, self.interval, task);
    }

    pub fn stop(&self) {
        self.scheduler.unregister(WINDOW_CHANGE_TASK);
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_registered(WINDOW_CHANGE_TASK)
    }
}

async fn poll_window(
    observer: &Arc<dyn WindowObserver>,
    last_id: &Mutex<String>,
    callback: &Mutex<Option<WindowChangeCallback>>,
) -> Result<()> {
    let Some(current) = observer.current_window_id().await? else {
        log_debug!("no active window");
        return Ok(());
    };

    let previous = {
        let mut last = lock(last_id);
        if *last == current {
            return Ok(());
        }
        std::mem::replace(&mut *last, current.clone())
    };

    let callback = lock(callback).clone();
    match callback {
        Some(callback) => callback(previous, current).await,
        None => Ok(()),
    }
}

/// A poller that just invokes its callback on every tick.
pub struct TickPoller {
    name: &'static str,
    scheduler: IntervalScheduler,
    interval: Duration,
    callback: Arc<Mutex<Option<TickCallback>>>,
}

impl TickPoller {
    pub fn new(name: &'static str, scheduler: IntervalScheduler, interval: Duration) -> Self {
        Self {
            name,
            scheduler,
            interval,
            callback: Arc::new(Mutex::new(None)),
        }
    }

    /// Re-polls the current window while studying.
    pub fn studying_ocr(scheduler: IntervalScheduler, interval: Duration) -> Self {
        Self::new(STUDYING_OCR_TASK, scheduler, interval)
    }

    /// Re-checks stale idle windows.
    pub fn idle_revalidation(scheduler: IntervalScheduler, interval: Duration) -> Self {
        Self::new(IDLE_REVALIDATION_TASK, scheduler, interval)
    }

    pub fn set_callback(&self, callback: TickCallback) {
        *lock(&self.callback) = Some(callback);
    }

    pub fn start(&self) {
        let callback = self.callback.clone();
        let task: TaskFn = Arc::new(move || {
            let callback = lock(&callback).clone();
            Box::pin(async move {
                match callback {
                    Some(callback) => callback().await,
                    None => Ok(()),
                }
            })
        });
        self.scheduler.register(self.name, self.interval, task);
    }

    pub fn stop(&self) {
        self.scheduler.unregister(self.name);
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_registered(self.name)
    }
}
