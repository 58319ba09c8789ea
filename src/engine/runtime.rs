// src/engine/runtime.rs

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::exec::JobRunner;

use super::log::LogSink;
use super::manager::ProcessManager;

/// Options for the tick driver.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Time between two `monitor()` ticks.
    pub poll_interval: Duration,
    /// Stop every live process once this much time has passed.
    pub deadline: Option<Duration>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            deadline: None,
        }
    }
}

/// Drives a [`ProcessManager`] until no process is `RUNNING`.
///
/// This is the async IO shell around the manager: it owns the ticker, the
/// shutdown signal and the deadline, and leaves all scheduling decisions to
/// the manager.
pub struct Runtime<R: JobRunner, S: LogSink> {
    manager: ProcessManager<R, S>,
    options: RuntimeOptions,
}

impl<R: JobRunner, S: LogSink> fmt::Debug for Runtime<R, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<R: JobRunner, S: LogSink> Runtime<R, S> {
    pub fn new(manager: ProcessManager<R, S>, options: RuntimeOptions) -> Self {
        Self { manager, options }
    }

    /// Main tick loop.
    ///
    /// - Calls `monitor()` every `poll_interval`.
    /// - Returns once no process is running.
    /// - If `shutdown` resolves or the deadline expires first, every live
    ///   process is stopped before returning.
    ///
    /// The manager is handed back so the caller can inspect final states.
    pub async fn run<F>(mut self, shutdown: F) -> ProcessManager<R, S>
    where
        F: Future<Output = ()>,
    {
        info!(
            poll_interval = ?self.options.poll_interval,
            deadline = ?self.options.deadline,
            "dbx-tester runtime started"
        );

        let mut ticker = time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let deadline = self.options.deadline;
        let expired = async move {
            match deadline {
                Some(after) => time::sleep(after).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expired);
        tokio::pin!(shutdown);

        while self.manager.has_running() {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.manager.monitor().await;
                    debug!(
                        transitions = report.transitions.len(),
                        started = report.started.len(),
                        poll_errors = report.poll_errors,
                        "tick complete"
                    );
                }
                _ = &mut shutdown => {
                    info!("shutdown requested; stopping live processes");
                    self.manager.stop_all().await;
                    break;
                }
                _ = &mut expired => {
                    warn!(deadline = ?deadline, "deadline expired; stopping live processes");
                    self.manager.stop_all().await;
                    break;
                }
            }
        }

        info!("runtime exiting");
        self.manager
    }
}
