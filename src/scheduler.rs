//! Named recurring tasks.
//!
//! Each registered task runs on its own tokio interval. A tick's future is
//! spawned separately so an error or a panic in one invocation is logged and
//! the next tick still happens.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;
use futures::future::BoxFuture;
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

/// Produces one invocation's future per tick.
pub type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct RegisteredTask {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Clone, Default)]
pub struct IntervalScheduler {
    tasks: Arc<Mutex<HashMap<String, RegisteredTask>>>,
}

impl IntervalScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `task` every `interval`. Does nothing if `name` is already
    /// registered. The first invocation happens one full interval after
    /// registration.
    pub fn register(&self, name: &str, interval: Duration, task: TaskFn) {
        let mut tasks = lock(&self.tasks);
        if tasks.contains_key(name) {
            log_debug!("task '{name}' already registered, ignoring");
            return;
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(run_task(
            name.to_string(),
            interval,
            task,
            cancel_token.clone(),
        ));

        log_info!("registered task '{name}' every {}ms", interval.as_millis());
        tasks.insert(
            name.to_string(),
            RegisteredTask {
                cancel_token,
                handle,
            },
        );
    }

    /// Stops and forgets `name`. Does nothing if it is not registered.
    pub fn unregister(&self, name: &str) {
        let removed = lock(&self.tasks).remove(name);
        if let Some(task) = removed {
            task.cancel_token.cancel();
            log_info!("unregistered task '{name}'");
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        lock(&self.tasks).contains_key(name)
    }

    /// Cancels every task and waits for their loops to exit.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, RegisteredTask)> = lock(&self.tasks).drain().collect();
        for (name, task) in drained {
            task.cancel_token.cancel();
            if let Err(err) = task.handle.await {
                log_error!("task '{name}' loop failed to join: {err}");
            }
        }
    }
}

async fn run_task(name: String, period: Duration, task: TaskFn, cancel_token: CancellationToken) {
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let invocation = tokio::spawn((task)());
                tokio::select! {
                    joined = invocation => match joined {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => log_error!("task '{name}' failed: {err:#}"),
                        Err(join_err) => log_error!("task '{name}' panicked: {join_err}"),
                    },
                    _ = cancel_token.cancelled() => break,
                }
            }
            _ = cancel_token.cancelled() => break,
        }
    }
    log_debug!("task '{name}' loop exited");
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
