//! A submitted sequence plus the background worker executing it.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use db::SequenceStore;
use futures::FutureExt;
use sequencer_core::{Conclusion, SequenceState};
use tokio::sync::watch;
use tracing::{error, info};

use crate::error::{EngineError, Result};
use crate::gateway::{CommandGateway, DispatchSignal};
use crate::resources::{ResourceGuard, ResourcePlan};
use crate::sequence::Sequence;

/// What the worker needs besides the sequence itself.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub gateway: Arc<dyn CommandGateway>,
    pub store: Arc<dyn SequenceStore>,
    pub grace: Duration,
    pub poll_interval: Duration,
}

pub struct Job {
    sequence: Arc<Sequence>,
    resources: Vec<String>,
    dependencies: Vec<String>,
    started_at: DateTime<Utc>,
    poll_interval: Duration,
    done: watch::Receiver<bool>,
}

impl Job {
    /// Starts the worker. Resources held by `guard` are freed once the tail has run.
    pub(crate) fn spawn(
        sequence: Arc<Sequence>,
        plan: &ResourcePlan,
        guard: ResourceGuard,
        ctx: WorkerContext,
    ) -> Arc<Job> {
        let (done_tx, done) = watch::channel(false);
        let job = Arc::new(Job {
            sequence: sequence.clone(),
            resources: plan.resources.iter().cloned().collect(),
            dependencies: plan.dependencies.iter().cloned().collect(),
            started_at: Utc::now(),
            poll_interval: ctx.poll_interval,
            done,
        });

        tokio::spawn(async move {
            let mut guard = guard;
            let id = sequence.id();

            let run = AssertUnwindSafe(sequence.run(ctx.gateway.as_ref(), ctx.grace))
                .catch_unwind()
                .await;
            let mut failure = match run {
                Ok(Ok(())) => None,
                Ok(Err(e)) => {
                    error!(sequence_id = id, error = %e, "Sequence pipeline failed");
                    Some(e.to_string())
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(sequence_id = id, panic = %message, "Sequence worker panicked");
                    sequence.cancel_remaining();
                    Some(message)
                }
            };

            let finalized = AssertUnwindSafe(sequence.finalize(
                ctx.gateway.as_ref(),
                ctx.store.as_ref(),
                ctx.grace,
                failure.as_deref(),
            ))
            .catch_unwind()
            .await;
            if let Err(panic) = finalized {
                let message = panic_message(panic.as_ref());
                error!(sequence_id = id, panic = %message, "Sequence cleanup panicked");
                sequence.release_visit(ctx.store.as_ref()).await;
                failure.get_or_insert(message);
            }

            guard.release();
            sequence.conclude(failure.as_deref());
            info!(sequence_id = id, state = %sequence.state(), "Sequence worker done");
            done_tx.send_replace(true);
        });

        job
    }

    pub fn id(&self) -> i64 {
        self.sequence.id()
    }

    pub fn sequence(&self) -> &Arc<Sequence> {
        &self.sequence
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> SequenceState {
        self.sequence.state()
    }

    pub fn is_active(&self) -> bool {
        self.sequence.is_active()
    }

    /// True once the worker released everything, which can lag the terminal state slightly.
    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Requests an abort and returns once the sequence is terminal.
    pub async fn abort(&self) -> SequenceState {
        self.sequence
            .request_stop(Conclusion::Aborted, DispatchSignal::Abort);
        self.sequence.wait_concluded(self.poll_interval).await
    }

    /// Asks the command in flight to wrap up, skips the rest of the body and returns once
    /// the sequence is terminal.
    pub async fn finish_now(&self) -> SequenceState {
        self.sequence
            .request_stop(Conclusion::FinishRequested, DispatchSignal::Finish);
        self.sequence.wait_concluded(self.poll_interval).await
    }

    /// Waits for the worker and maps the terminal state onto a result.
    pub async fn wait(&self) -> Result<()> {
        let mut done = self.done.clone();
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                break;
            }
        }

        match self.sequence.state() {
            SequenceState::Finished => Ok(()),
            SequenceState::Aborted => Err(EngineError::SequenceAborted(self.id())),
            SequenceState::Failed => Err(match self.sequence.failure() {
                Some(failure) => failure.into(),
                None => EngineError::Worker(self.sequence.output()),
            }),
            state => Err(EngineError::Worker(format!(
                "worker for sequence {} exited while {}",
                self.id(),
                state
            ))),
        }
    }

    /// Status lines of the sequence and each sub-command, one per line.
    pub fn status(&self) -> String {
        self.sequence.status_lines().join("\n")
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sequence)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("resources", &self.resources)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static text");
        assert_eq!(panic_message(boxed.as_ref()), "static text");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned text"));
        assert_eq!(panic_message(boxed.as_ref()), "owned text");

        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
