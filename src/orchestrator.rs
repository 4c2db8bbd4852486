//! Run Orchestrator
//!
//! Drives one assistant run from submission to a terminal outcome:
//!
//! ```text
//! Submitted ──► Polling ──► Completed(text)
//!                  │  ▲ ──► Failed(code, message)
//!                  └──┘ ──► TimedOut
//! ```
//!
//! Polling uses a fixed delay and stops at the deadline. Transient status errors keep the
//! loop going; a timed-out run is left running on the remote side.

use crate::backend::{AssistantBackend, BackendError, Role, RunError, RunSnapshot, RunStatus};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Time source for polling, swapped out in tests
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Tokio's clock (pausable under `tokio::test(start_paused = true)`)
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPolicy {
    pub poll_interval: Duration,
    /// Measured from submission
    pub timeout: Duration,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1500),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Diagnostics for a run that ended without output. Logged, never shown to users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub run_id: String,
    pub status: RunStatus,
    pub error: Option<RunError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(String),
    Failed(RunFailure),
    TimedOut,
}

enum RunState {
    Submitted,
    Polling(RunSnapshot),
    Done(RunOutcome),
}

pub struct RunOrchestrator {
    backend: Arc<dyn AssistantBackend>,
    clock: Arc<dyn Clock>,
    assistant_id: String,
    policy: RunPolicy,
}

impl RunOrchestrator {
    pub fn new(backend: Arc<dyn AssistantBackend>, assistant_id: &str, policy: RunPolicy) -> Self {
        Self::with_clock(backend, Arc::new(TokioClock), assistant_id, policy)
    }

    pub fn with_clock(
        backend: Arc<dyn AssistantBackend>,
        clock: Arc<dyn Clock>,
        assistant_id: &str,
        policy: RunPolicy,
    ) -> Self {
        Self {
            backend,
            clock,
            assistant_id: assistant_id.to_string(),
            policy,
        }
    }

    /// Post `text` to the session and wait for the reply.
    ///
    /// Every backend call, submission included, is bounded by the deadline. Errors only
    /// come from submission or from fetching the output of a completed run; everything
    /// after the run starts ends in exactly one `RunOutcome`.
    pub async fn run(&self, session_id: &str, text: &str) -> Result<RunOutcome, BackendError> {
        let deadline = self.clock.now() + self.policy.timeout;
        let mut state = RunState::Submitted;

        loop {
            state = match state {
                RunState::Submitted => {
                    let submitted = self
                        .before_deadline(deadline, async {
                            self.backend.append_turn(session_id, Role::User, text).await?;
                            self.backend.start_run(session_id, &self.assistant_id).await
                        })
                        .await;
                    match submitted {
                        Some(run) => {
                            let run = run?;
                            info!("Run {} started on {} ({})", run.run_id, session_id, run.status);
                            RunState::Polling(run)
                        }
                        None => {
                            warn!("Submission to {} timed out", session_id);
                            RunState::Done(RunOutcome::TimedOut)
                        }
                    }
                }

                RunState::Polling(run) if run.status.is_success() => {
                    let output = self
                        .before_deadline(deadline, self.backend.get_latest_output(session_id))
                        .await;
                    match output {
                        Some(output) => {
                            let output = output?;
                            info!("Run {} completed ({} chars)", run.run_id, output.len());
                            RunState::Done(RunOutcome::Completed(output))
                        }
                        None => {
                            warn!("Fetching output of run {} timed out", run.run_id);
                            RunState::Done(RunOutcome::TimedOut)
                        }
                    }
                }

                RunState::Polling(run) if run.status.is_terminal() => {
                    let (code, message) = run
                        .error
                        .as_ref()
                        .map(|e| (e.code.as_deref(), e.message.as_deref()))
                        .unwrap_or((None, None));
                    warn!(
                        "Run {} ended {}: code={:?} message={:?}",
                        run.run_id, run.status, code, message
                    );
                    RunState::Done(RunOutcome::Failed(RunFailure {
                        run_id: run.run_id,
                        status: run.status,
                        error: run.error,
                    }))
                }

                RunState::Polling(run) => {
                    let polled = self
                        .before_deadline(deadline, async {
                            let now = self.clock.now();
                            self.clock
                                .sleep(self.policy.poll_interval.min(deadline - now))
                                .await;
                            if self.clock.now() >= deadline {
                                return None;
                            }
                            Some(self.backend.get_run_status(session_id, &run.run_id).await)
                        })
                        .await
                        .flatten();

                    match polled {
                        Some(Ok(next)) => {
                            debug!("Run {} status: {}", next.run_id, next.status);
                            RunState::Polling(next)
                        }
                        Some(Err(e)) => {
                            warn!("Status check for run {} failed: {}", run.run_id, e);
                            RunState::Polling(run)
                        }
                        None => {
                            warn!("Run {} timed out ({})", run.run_id, run.status);
                            RunState::Done(RunOutcome::TimedOut)
                        }
                    }
                }

                RunState::Done(outcome) => return Ok(outcome),
            };
        }
    }

    /// Drive `work` until it finishes or the deadline passes; `None` means the deadline won
    async fn before_deadline<T, F>(&self, deadline: Instant, work: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let now = self.clock.now();
        if now >= deadline {
            return None;
        }
        tokio::select! {
            out = work => Some(out),
            _ = self.clock.sleep(deadline - now) => None,
        }
    }
}
