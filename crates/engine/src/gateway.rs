//! Boundary to the remote peers that execute sub-commands.

use std::time::Duration;

use async_trait::async_trait;
use events::{Event, EventBus};
use sequencer_core::{Reply, ReplyLevel};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

/// What the sequence asks of the command currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchSignal {
    #[default]
    Proceed,
    Abort,
    Finish,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub sequence_id: i64,
    pub ordinal: usize,
    pub target: String,
    /// Command text with visit and frame arguments already filled in.
    pub command: String,
    pub time_limit: Duration,
}

impl DispatchRequest {
    pub fn command_head(&self) -> &str {
        self.command.split_whitespace().next().unwrap_or("")
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Identifier source unavailable: {0}")]
    IdentifierSourceUnavailable(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Per-dispatch handle given to the gateway: cancellation signal plus warning forwarding.
pub struct DispatchContext {
    sequence_id: i64,
    target: String,
    signal: watch::Receiver<DispatchSignal>,
    bus: EventBus,
    forwarded: Vec<String>,
}

impl DispatchContext {
    pub fn new(
        sequence_id: i64,
        target: impl Into<String>,
        signal: watch::Receiver<DispatchSignal>,
        bus: EventBus,
    ) -> Self {
        Self {
            sequence_id,
            target: target.into(),
            signal,
            bus,
            forwarded: Vec::new(),
        }
    }

    /// Latest signal, without waiting.
    pub fn signal(&self) -> DispatchSignal {
        *self.signal.borrow()
    }

    /// Resolves once the sequence asks the command to stop; pending forever otherwise.
    pub async fn interrupted(&mut self) -> DispatchSignal {
        loop {
            let current = *self.signal.borrow_and_update();
            if current != DispatchSignal::Proceed {
                return current;
            }
            if self.signal.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }

    /// Sends a non-final warning reply to the operator as soon as it arrives.
    pub fn forward_warning(&mut self, text: impl Into<String>) {
        let text = text.into();
        warn!(sequence_id = self.sequence_id, target = %self.target, "{}", text);
        self.forwarded.push(text.clone());
        self.bus.emit(Event::SubCommandWarning {
            sequence_id: self.sequence_id,
            target: self.target.clone(),
            text,
        });
    }

    /// Forwards the warning lines of `reply` that the gateway did not already send live.
    pub fn forward_reply_warnings(&mut self, reply: &Reply) {
        for line in reply.lines.iter().filter(|l| l.level == ReplyLevel::Warning) {
            if let Some(index) = self.forwarded.iter().position(|t| *t == line.text) {
                self.forwarded.remove(index);
                continue;
            }
            let text = line.text.clone();
            warn!(sequence_id = self.sequence_id, target = %self.target, "{}", text);
            self.bus.emit(Event::SubCommandWarning {
                sequence_id: self.sequence_id,
                target: self.target.clone(),
                text,
            });
        }
    }
}

/// Sends one command to one peer and collects its reply.
///
/// Exceeding `time_limit` must come back as a failed [`Reply`]; errors are reserved for
/// conditions where no reply could be obtained at all.
#[async_trait]
pub trait CommandGateway: Send + Sync {
    async fn call(
        &self,
        request: &DispatchRequest,
        ctx: &mut DispatchContext,
    ) -> Result<Reply, GatewayError>;
}

/// Stand-in gateway: every command succeeds after `delay`, except commands containing `fail`.
///
/// Honors abort and finish signals while "running". Used by the operator binary.
#[derive(Debug, Clone)]
pub struct SimulatedGateway {
    delay: Duration,
}

impl SimulatedGateway {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new(Duration::from_millis(200))
    }
}

#[async_trait]
impl CommandGateway for SimulatedGateway {
    async fn call(
        &self,
        request: &DispatchRequest,
        ctx: &mut DispatchContext,
    ) -> Result<Reply, GatewayError> {
        debug!(target = %request.target, command = %request.command, "Simulating dispatch");
        let duration = self.delay.min(request.time_limit);

        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            signal = ctx.interrupted() => {
                return Ok(match signal {
                    DispatchSignal::Abort => Reply::failed("text=\"aborted\"")
                        .with_line(ReplyLevel::Error, format!("{} aborted", request.command_head())),
                    _ => Reply::ok("text=\"finished early\""),
                });
            }
        }

        if self.delay > request.time_limit {
            return Ok(Reply::failed("text=\"timeout\"").with_line(
                ReplyLevel::Error,
                format!("{} timed out", request.command_head()),
            ));
        }

        if request.command.contains("fail") {
            return Ok(Reply::failed(format!("text=\"{} failed\"", request.command_head()))
                .with_line(ReplyLevel::Error, format!("{} failed", request.command_head())));
        }

        Ok(Reply::ok(format!("text=\"{} done\"", request.command_head())))
    }
}
