//! Periodic and on-demand sync passes with a single-flight guard.
//!
//! State machine: `Idle -> Running -> {Idle, Backoff}`. On-demand triggers
//! (SIGUSR1 in watch mode) start a pass early; one that arrives while a pass is
//! running is coalesced into the running pass. Failed passes
//! are retried with linear backoff up to a ceiling, after which the scheduler
//! falls back to its regular interval.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::retry::RetryConfig;
use crate::sync::{PassReport, PassVerdict, SyncPass};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    /// Waiting to retry after `attempt` consecutive failed passes.
    Backoff { attempt: u32 },
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Delay before the first pass after startup.
    pub initial_delay: Duration,
    pub interval: Duration,
    /// Linear backoff between failed passes; `max_retries` is the ceiling.
    pub backoff: RetryConfig,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            interval: Duration::from_secs(15 * 60),
            backoff: RetryConfig::sync_pass(5, 10),
        }
    }
}

#[derive(Debug)]
pub enum TriggerOutcome {
    Ran(Result<PassReport>),
    /// Another pass was in flight; this trigger was absorbed by it.
    AlreadyRunning,
}

pub struct SyncScheduler {
    pass: Arc<dyn SyncPass>,
    config: ScheduleConfig,
    in_flight: Mutex<()>,
    state: watch::Sender<SchedulerState>,
    wake: Notify,
}

impl SyncScheduler {
    pub fn new(pass: Arc<dyn SyncPass>, config: ScheduleConfig) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            pass,
            config,
            in_flight: Mutex::new(()),
            state,
            wake: Notify::new(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Ask a running [`run`](Self::run) loop to start a pass now.
    ///
    /// Returns false when a pass is already running and absorbs the request.
    pub fn request_run(&self) -> bool {
        if self.state() == SchedulerState::Running {
            tracing::info!("Sync pass already running, request coalesced");
            return false;
        }
        tracing::info!("Sync requested");
        self.wake.notify_one();
        true
    }

    /// Forward on-demand requests from `triggers` until shutdown or until the
    /// sender side closes.
    pub async fn listen_for_triggers(
        &self,
        mut triggers: mpsc::Receiver<()>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                trigger = triggers.recv() => match trigger {
                    Some(()) => {
                        self.request_run();
                    }
                    None => break,
                },
            }
        }
    }

    /// Run one pass immediately unless one is already in flight.
    pub async fn trigger_now(&self, shutdown: &CancellationToken) -> TriggerOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::debug!("Sync pass already running, trigger coalesced");
            return TriggerOutcome::AlreadyRunning;
        };

        let prior_failures = match self.state() {
            SchedulerState::Backoff { attempt } => attempt,
            _ => 0,
        };
        self.state.send_replace(SchedulerState::Running);

        let outcome = self.pass.run_pass(shutdown).await;
        let failed = match &outcome {
            Ok(report) => report.verdict == PassVerdict::Failed,
            Err(_) => true,
        };
        self.state.send_replace(if failed {
            SchedulerState::Backoff {
                attempt: prior_failures + 1,
            }
        } else {
            SchedulerState::Idle
        });
        TriggerOutcome::Ran(outcome)
    }

    /// Drive passes until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut next_delay = self.config.initial_delay;
        tracing::info!(
            first_in = next_delay.as_secs(),
            every = self.config.interval.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(next_delay) => {}
                _ = self.wake.notified() => tracing::debug!("Manual sync requested"),
            }

            match self.trigger_now(&shutdown).await {
                TriggerOutcome::AlreadyRunning => {
                    next_delay = self.config.interval;
                    continue;
                }
                TriggerOutcome::Ran(Ok(report)) => tracing::debug!(
                    uploaded = report.uploaded,
                    failed = report.failed,
                    verdict = ?report.verdict,
                    "Scheduled pass finished"
                ),
                TriggerOutcome::Ran(Err(e)) => tracing::error!("Sync pass failed: {:#}", e),
            }
            if shutdown.is_cancelled() {
                break;
            }

            next_delay = match self.state() {
                SchedulerState::Backoff { attempt } if attempt <= self.config.backoff.max_retries => {
                    let delay = self.config.backoff.delay_for_retry(attempt - 1);
                    tracing::warn!(
                        attempt,
                        max = self.config.backoff.max_retries,
                        "Sync pass failed, retrying in {}s",
                        delay.as_secs()
                    );
                    delay
                }
                SchedulerState::Backoff { attempt } => {
                    tracing::warn!(
                        attempts = attempt,
                        "Sync still failing after retries, waiting for the next scheduled pass"
                    );
                    self.state.send_replace(SchedulerState::Idle);
                    self.config.interval
                }
                _ => self.config.interval,
            };
        }

        tracing::info!("Scheduler stopped");
    }
}
