//! Drives a sequence: activation, the head/body dispatch loop, tail cleanup and conclusion.

use std::time::Duration;

use db::SequenceStore;
use events::Event;
use sequencer_core::{
    Conclusion, CorrelationRecord, Reply, ReplyLevel, Section, SequenceState, StatusMachine,
    StatusRecord,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{Sequence, SubCommandFailure};
use crate::error::{EngineError, Result};
use crate::gateway::{
    CommandGateway, DispatchContext, DispatchRequest, DispatchSignal, GatewayError,
};
use crate::visit::VisitAllocator;

/// A sub-command picked for dispatch.
struct Step {
    section: Section,
    index: usize,
    request: DispatchRequest,
}

impl Sequence {
    /// `Init -> Ready`: takes the visit if the profile needs one and numbers every sub-command.
    pub(crate) async fn activate(&self, visits: &VisitAllocator) -> Result<()> {
        StatusMachine::validate_transition(self.state(), SequenceState::Ready)?;

        let visit = match self.profile().visit_caller() {
            Some(caller) => {
                let mut visit = visits.allocate(caller).await?;
                visit.lock();
                Some(visit)
            }
            None => None,
        };

        let visit_event = visit.as_ref().map(|v| Event::VisitLocked {
            sequence_id: self.id(),
            visit_id: v.id(),
            caller: v.caller().to_string(),
        });

        {
            let mut progress = self.progress();
            let progress = &mut *progress;
            progress.status.ready()?;
            progress.visit = visit;

            let mut ordinal = progress.next_ordinal;
            for command in progress
                .head
                .iter_mut()
                .chain(progress.body.iter_mut())
                .chain(progress.tail.iter_mut())
            {
                command.ordinal = ordinal;
                ordinal += 1;
            }
            progress.next_ordinal = ordinal;
        }

        self.emit_transition(SequenceState::Init, SequenceState::Ready);
        self.bus().emit(Event::SequenceRegistered {
            sequence_id: self.id(),
            sequence_type: self.sequence_type().to_string(),
            name: self.name().to_string(),
            status: self.status_line(),
        });
        if let Some(event) = visit_event {
            self.bus().emit(event);
        }
        for command in self.commands() {
            self.emit_command(command.ordinal, command.result.code(), command.status_line(self.id()));
        }
        Ok(())
    }

    /// `Ready -> Executing`, then dispatches head and body until exhausted, failed or stopped.
    ///
    /// Returns with the conclusion flag set; the terminal transition is left to
    /// [`Sequence::conclude`].
    pub(crate) async fn run(&self, gateway: &dyn CommandGateway, grace: Duration) -> Result<()> {
        self.progress().status.execute()?;
        self.emit_transition(SequenceState::Ready, SequenceState::Executing);
        info!(sequence_id = self.id(), sequence_type = %self.sequence_type(), "Executing sequence");

        loop {
            if let Some(failure) = self.run_pending(gateway, grace).await {
                self.fail_with(failure);
                break;
            }

            // An empty body has no pass to repeat.
            let has_body = !self.progress().body.is_empty();
            if self.is_looped() && has_body && self.recycle_pass()? {
                debug!(sequence_id = self.id(), "Starting next pass");
                tokio::task::yield_now().await;
                continue;
            }
            break;
        }

        self.cancel_remaining();
        self.progress().status.request(Conclusion::Finished);
        Ok(())
    }

    async fn run_pending(
        &self,
        gateway: &dyn CommandGateway,
        grace: Duration,
    ) -> Option<SubCommandFailure> {
        loop {
            let step = match self.next_step() {
                Ok(Some(step)) => step,
                Ok(None) => return None,
                Err(failure) => return Some(failure),
            };

            let reply = self
                .dispatch(gateway, &step.request, self.signal().subscribe(), grace)
                .await;
            if let Some(failure) = self.store_reply(&step, reply) {
                return Some(failure);
            }
        }
    }

    /// Next pending head or body sub-command, `None` once exhausted or a conclusion was requested.
    fn next_step(&self) -> std::result::Result<Option<Step>, SubCommandFailure> {
        let mut progress = self.progress();
        if progress.status.flag().is_some() {
            return Ok(None);
        }

        let found = [Section::Head, Section::Body].into_iter().find_map(|section| {
            progress
                .section_mut(section)
                .iter()
                .position(|c| c.is_pending())
                .map(|index| (section, index))
        });
        let Some((section, index)) = found else {
            return Ok(None);
        };

        let progress = &mut *progress;
        let visit_id = progress.visit.as_ref().map(|v| v.id());
        let needs_frame = {
            let command = &progress.section_mut(section)[index];
            command.needs_frame() && command.frame_id.is_none()
        };
        if needs_frame {
            let frame = match progress.visit.as_mut() {
                Some(visit) => visit.next_frame().map_err(|e| e.to_string()),
                None => Err("no visit to allocate a frame from".to_string()),
            };
            let command = &mut progress.section_mut(section)[index];
            match frame {
                Ok(frame) => command.frame_id = Some(frame),
                Err(reason) => {
                    return Err(SubCommandFailure {
                        target: command.target.clone(),
                        command_head: command.command_head().to_string(),
                        reason,
                    })
                }
            }
        }

        let command = &progress.section_mut(section)[index];
        Ok(Some(Step {
            section,
            index,
            request: DispatchRequest {
                sequence_id: self.id(),
                ordinal: command.ordinal,
                target: command.target.clone(),
                command: command.render(visit_id),
                time_limit: command.time_limit,
            },
        }))
    }

    async fn dispatch(
        &self,
        gateway: &dyn CommandGateway,
        request: &DispatchRequest,
        signal: watch::Receiver<DispatchSignal>,
        grace: Duration,
    ) -> Reply {
        info!(
            sequence_id = self.id(),
            ordinal = request.ordinal,
            target = %request.target,
            command = %request.command,
            "Dispatching sub-command"
        );
        let mut ctx = DispatchContext::new(self.id(), &request.target, signal, self.bus().clone());

        let outcome =
            tokio::time::timeout(request.time_limit + grace, gateway.call(request, &mut ctx)).await;
        match outcome {
            Ok(Ok(reply)) => {
                if reply.is_ok() {
                    ctx.forward_reply_warnings(&reply);
                }
                reply
            }
            Ok(Err(GatewayError::IdentifierSourceUnavailable(reason))) => {
                let text = format!(
                    "{} {}: identifier source unavailable: {reason}",
                    request.target,
                    request.command_head()
                );
                error!(sequence_id = self.id(), target = %request.target, "{}", text);
                self.bus().emit(Event::Error {
                    message: text.clone(),
                    context: Some(format!("sequence {} identifier source", self.id())),
                });
                Reply::failed("text=\"identifier source unavailable\"")
                    .with_line(ReplyLevel::Error, text)
            }
            Ok(Err(e)) => {
                warn!(sequence_id = self.id(), target = %request.target, error = %e, "Dispatch failed");
                Reply::failed(format!("text=\"{e}\"")).with_line(ReplyLevel::Error, e.to_string())
            }
            Err(_) => {
                let text = format!(
                    "{} {} timed out after {}s",
                    request.target,
                    request.command_head(),
                    request.time_limit.as_secs()
                );
                warn!(sequence_id = self.id(), "{}", text);
                Reply::failed("text=\"timeout\"").with_line(ReplyLevel::Error, text)
            }
        }
    }

    fn store_reply(&self, step: &Step, reply: Reply) -> Option<SubCommandFailure> {
        let (line, code, failure) = {
            let mut progress = self.progress();
            let command = &mut progress.section_mut(step.section)[step.index];
            let failure = (!reply.is_ok()).then(|| SubCommandFailure {
                target: command.target.clone(),
                command_head: command.command_head().to_string(),
                reason: reply.failure_text(),
            });
            command.record(reply);
            (command.status_line(self.id()), command.result.code(), failure)
        };

        self.emit_command(step.request.ordinal, code, line);
        failure
    }

    /// Records the first failure and requests `Failed`, unless another conclusion came first.
    fn fail_with(&self, failure: SubCommandFailure) {
        let text = failure.to_string();
        let requested = {
            let mut progress = self.progress();
            let requested = progress.status.request(Conclusion::Failed);
            if requested {
                progress.status.record_failure(text.clone());
                progress.failure.get_or_insert(failure);
            }
            requested
        };

        if requested {
            error!(sequence_id = self.id(), "{}", text);
        } else {
            debug!(sequence_id = self.id(), "{} (already concluding)", text);
        }
        self.cancel_remaining();
    }

    /// Cancels every head or body sub-command that never got dispatched.
    pub(crate) fn cancel_remaining(&self) {
        let cancelled: Vec<(usize, i32, String)> = {
            let mut progress = self.progress();
            let progress = &mut *progress;
            progress
                .head
                .iter_mut()
                .chain(progress.body.iter_mut())
                .filter_map(|command| {
                    command.cancel().then(|| {
                        (command.ordinal, command.result.code(), command.status_line(self.id()))
                    })
                })
                .collect()
        };

        for (ordinal, code, line) in cancelled {
            self.emit_command(ordinal, code, line);
        }
    }

    /// Archives the body of a completed pass and renumbers it for the next one.
    fn recycle_pass(&self) -> Result<bool> {
        let renumbered = {
            let mut progress = self.progress();
            if !progress.status.recycle()? {
                return Ok(false);
            }

            let progress = &mut *progress;
            progress.archived.extend(progress.body.iter().cloned());
            let mut ordinal = progress.next_ordinal;
            for command in progress.body.iter_mut() {
                command.reset();
                command.ordinal = ordinal;
                ordinal += 1;
            }
            progress.next_ordinal = ordinal;

            progress
                .body
                .iter()
                .map(|c| (c.ordinal, c.result.code(), c.status_line(self.id())))
                .collect::<Vec<_>>()
        };

        for (ordinal, code, line) in renumbered {
            self.emit_command(ordinal, code, line);
        }
        Ok(true)
    }

    /// Persists the outcome, runs the tail and releases the visit.
    ///
    /// Never fails: every step here is best effort and only warns.
    pub(crate) async fn finalize(
        &self,
        gateway: &dyn CommandGateway,
        store: &dyn SequenceStore,
        grace: Duration,
        failure: Option<&str>,
    ) {
        let record = {
            let progress = self.progress();
            let mut preview = progress.status.clone();
            if preview.conclude(failure).is_err() {
                preview.abandon(failure.unwrap_or("sequence never executed"));
            }
            StatusRecord::from_status(self.id(), &preview)
        };
        if let Err(e) = store.insert_status(&record).await {
            warn!(sequence_id = self.id(), error = %e, "Failed to record sequence status");
            self.report_persistence(e.to_string());
        }

        self.run_tail(gateway, grace).await;
        self.release_visit(store).await;
    }

    async fn run_tail(&self, gateway: &dyn CommandGateway, grace: Duration) {
        let count = self.progress().tail.len();
        // The tail must run to completion, so it never sees abort or finish requests.
        let (quiet, _) = watch::channel(DispatchSignal::Proceed);

        for index in 0..count {
            let step = {
                let progress = self.progress();
                let visit_id = progress.visit.as_ref().map(|v| v.id());
                let command = &progress.tail[index];
                Step {
                    section: Section::Tail,
                    index,
                    request: DispatchRequest {
                        sequence_id: self.id(),
                        ordinal: command.ordinal,
                        target: command.target.clone(),
                        command: command.render(visit_id),
                        time_limit: command.time_limit,
                    },
                }
            };

            let reply = self.dispatch(gateway, &step.request, quiet.subscribe(), grace).await;
            if let Some(failure) = self.store_reply(&step, reply) {
                warn!(sequence_id = self.id(), "Cleanup failed: {}", failure);
                self.bus().emit(Event::Error {
                    message: failure.to_string(),
                    context: Some(format!("sequence {} cleanup", self.id())),
                });
            }
        }
    }

    pub(crate) async fn release_visit(&self, store: &dyn SequenceStore) {
        let Some(mut visit) = self.progress().visit.take() else {
            return;
        };

        if let Err(e) = visit.unlock() {
            warn!(sequence_id = self.id(), error = %e, "Visit was not locked");
        }
        self.bus().emit(Event::VisitReleased {
            sequence_id: self.id(),
            visit_id: visit.id(),
            caller: visit.caller().to_string(),
        });

        let correlation = CorrelationRecord {
            caller: visit.caller().to_string(),
            visit_id: visit.id(),
            sequence_id: self.id(),
        };
        if let Err(e) = store.insert_correlation(&correlation).await {
            warn!(sequence_id = self.id(), visit_id = visit.id(), error = %e, "Failed to record visit correlation");
            self.report_persistence(e.to_string());
        }
    }

    fn report_persistence(&self, message: String) {
        self.bus().emit(Event::Error {
            message,
            context: Some(format!("sequence {} persistence", self.id())),
        });
    }

    /// Terminal transition from the conclusion flag. Idempotent: `None` if already concluded.
    pub(crate) fn conclude(&self, failure: Option<&str>) -> Option<SequenceState> {
        let (from, concluded) = {
            let mut progress = self.progress();
            let from = progress.status.state();
            let concluded = match progress.status.conclude(failure) {
                Ok(state) => state,
                Err(e) => {
                    warn!(sequence_id = self.id(), error = %e, "Sequence concluded outside execution");
                    let reason = failure.map(str::to_string).unwrap_or_else(|| e.to_string());
                    progress
                        .status
                        .abandon(reason)
                        .then_some(SequenceState::Failed)
                }
            };
            (from, concluded)
        };

        let state = concluded?;
        self.emit_transition(from, state);
        info!(sequence_id = self.id(), state = %state, output = %self.output(), "Sequence concluded");
        self.bus().emit(Event::SequenceConcluded {
            sequence_id: self.id(),
            state: state.as_str().to_string(),
            status_code: self.status_code(),
            output: self.output(),
            status: self.status_line(),
        });
        Some(state)
    }

    /// Sets the flag to `conclusion` and forwards `signal` to the command in flight.
    ///
    /// Only the first request is forwarded; later ones just wait.
    pub(crate) fn request_stop(&self, conclusion: Conclusion, signal: DispatchSignal) -> bool {
        let requested = self.progress().status.request(conclusion);
        if requested {
            info!(sequence_id = self.id(), conclusion = %conclusion.as_str(), "Conclusion requested");
            self.signal().send_replace(signal);
        }
        requested
    }

    /// Polls until the sequence reached a terminal state.
    pub(crate) async fn wait_concluded(&self, poll: Duration) -> SequenceState {
        loop {
            let state = self.state();
            if state.is_terminal() {
                return state;
            }
            tokio::time::sleep(poll).await;
        }
    }

    fn emit_transition(&self, from: SequenceState, to: SequenceState) {
        debug!(sequence_id = self.id(), from = %from, to = %to, "Sequence state changed");
        self.bus().emit(Event::SequenceStateChanged {
            sequence_id: self.id(),
            from_state: from.as_str().to_string(),
            to_state: to.as_str().to_string(),
        });
    }

    fn emit_command(&self, ordinal: usize, code: i32, status: String) {
        self.bus().emit(Event::SubCommandUpdated {
            sequence_id: self.id(),
            ordinal,
            code,
            status,
        });
    }
}

impl From<SubCommandFailure> for EngineError {
    fn from(failure: SubCommandFailure) -> Self {
        EngineError::SubCommandFailed {
            target: failure.target,
            command_head: failure.command_head,
            reason: failure.reason,
        }
    }
}
