use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Output text of a sequence that has not concluded yet.
pub const ACTIVE_OUTPUT: &str = "None";
/// Status code of a sequence that has not concluded yet.
pub const ACTIVE_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SequenceState {
    Init,
    Ready,
    Executing,
    Finished,
    Failed,
    Aborted,
}

impl SequenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "init" => Some(Self::Init),
            "ready" => Some(Self::Ready),
            "executing" => Some(Self::Executing),
            "finished" => Some(Self::Finished),
            "failed" => Some(Self::Failed),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Aborted)
    }
}

impl std::fmt::Display for SequenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested outcome of a running sequence. Set once; the first request wins.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Finished,
    Failed,
    Aborted,
    FinishRequested,
}

impl Conclusion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
            Self::FinishRequested => "finish_requested",
        }
    }

    /// Code stored in status records.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::Finished => 0,
            Self::Failed => 1,
            Self::Aborted => 2,
            Self::FinishRequested => 3,
        }
    }

    pub fn terminal_state(&self) -> SequenceState {
        match self {
            Self::Finished | Self::FinishRequested => SequenceState::Finished,
            Self::Failed => SequenceState::Failed,
            Self::Aborted => SequenceState::Aborted,
        }
    }
}

/// Sequence position plus the asynchronously requested outcome.
///
/// `state` only moves through [`StatusMachine::validate_transition`]. `flag` is written by
/// whoever signals first (pipeline failure, exhaustion, abort or finish request) and is what
/// [`StatusMachine::conclude`] turns into a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusMachine {
    state: SequenceState,
    flag: Option<Conclusion>,
    output: String,
    failure: Option<String>,
}

impl Default for StatusMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusMachine {
    pub fn new() -> Self {
        Self {
            state: SequenceState::Init,
            flag: None,
            output: ACTIVE_OUTPUT.to_string(),
            failure: None,
        }
    }

    pub fn validate_transition(from: SequenceState, to: SequenceState) -> Result<(), CoreError> {
        if Self::allowed_transitions(from).contains(&to) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    fn allowed_transitions(from: SequenceState) -> Vec<SequenceState> {
        match from {
            SequenceState::Init => vec![SequenceState::Ready],
            SequenceState::Ready => vec![SequenceState::Executing],
            SequenceState::Executing => vec![
                SequenceState::Finished,
                SequenceState::Failed,
                SequenceState::Aborted,
            ],
            SequenceState::Finished => vec![SequenceState::Ready],
            SequenceState::Failed | SequenceState::Aborted => vec![],
        }
    }

    pub fn can_transition(from: SequenceState, to: SequenceState) -> bool {
        Self::validate_transition(from, to).is_ok()
    }

    fn transition(&mut self, to: SequenceState) -> Result<(), CoreError> {
        Self::validate_transition(self.state, to)?;
        self.state = to;

        if matches!(to, SequenceState::Init | SequenceState::Ready) {
            self.flag = None;
            self.failure = None;
            self.output = ACTIVE_OUTPUT.to_string();
        }
        Ok(())
    }

    pub fn ready(&mut self) -> Result<(), CoreError> {
        self.transition(SequenceState::Ready)
    }

    pub fn execute(&mut self) -> Result<(), CoreError> {
        self.transition(SequenceState::Executing)
    }

    /// `Finished -> Ready`, used to restart a sequence that already concluded.
    pub fn amend(&mut self) -> Result<(), CoreError> {
        if self.state != SequenceState::Finished {
            return Err(CoreError::InvalidTransition {
                from: self.state.as_str().to_string(),
                to: SequenceState::Ready.as_str().to_string(),
            });
        }
        self.transition(SequenceState::Ready)
    }

    /// Sets the conclusion flag unless it is already set or the sequence already concluded.
    pub fn request(&mut self, conclusion: Conclusion) -> bool {
        if self.state.is_terminal() || self.flag.is_some() {
            return false;
        }
        self.flag = Some(conclusion);
        true
    }

    /// Keeps the first failure text only.
    pub fn record_failure(&mut self, text: impl Into<String>) {
        if self.failure.is_none() {
            self.failure = Some(text.into());
        }
    }

    /// Drives the terminal transition from the flag.
    ///
    /// A failure reason records a `Failed` request (ignored if another signal came first).
    /// Returns `Ok(None)` when the sequence already concluded, leaving state and output untouched.
    pub fn conclude(&mut self, failure: Option<&str>) -> Result<Option<SequenceState>, CoreError> {
        if self.state.is_terminal() {
            return Ok(None);
        }

        if let Some(reason) = failure {
            self.record_failure(reason);
            self.request(Conclusion::Failed);
        }

        let conclusion = self.flag.unwrap_or(Conclusion::Finished);
        let to = conclusion.terminal_state();
        Self::validate_transition(self.state, to)?;

        self.flag = Some(conclusion);
        self.output = match conclusion {
            Conclusion::Finished => "complete".to_string(),
            Conclusion::FinishRequested => "finishRequested".to_string(),
            Conclusion::Aborted => "abortRequested".to_string(),
            Conclusion::Failed => self.failure.clone().unwrap_or_else(|| "failed".to_string()),
        };
        self.state = to;

        Ok(Some(to))
    }

    /// Restarts an executing looped sequence for another pass.
    ///
    /// Goes `Executing -> Finished -> Ready -> Executing` in one step so no observer sees the
    /// intermediate conclusion. Returns false, leaving everything untouched, when a conclusion
    /// was already requested.
    pub fn recycle(&mut self) -> Result<bool, CoreError> {
        if self.state != SequenceState::Executing || self.flag.is_some() {
            return Ok(false);
        }

        let mut next = self.clone();
        next.transition(SequenceState::Finished)?;
        next.amend()?;
        next.execute()?;
        *self = next;
        Ok(true)
    }

    /// Forces `Failed` from any non-terminal state.
    ///
    /// Only for sequences whose worker died or that never reached `Executing`.
    pub fn abandon(&mut self, reason: impl Into<String>) -> bool {
        if self.state.is_terminal() {
            return false;
        }

        let reason = reason.into();
        self.flag = Some(Conclusion::Failed);
        self.output = reason.clone();
        self.failure = Some(reason);
        self.state = SequenceState::Failed;
        true
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn flag(&self) -> Option<Conclusion> {
        self.flag
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn status_code(&self) -> i32 {
        match self.flag {
            Some(conclusion) if self.state.is_terminal() => conclusion.status_code(),
            _ => ACTIVE_CODE,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executing() -> StatusMachine {
        let mut status = StatusMachine::new();
        status.ready().unwrap();
        status.execute().unwrap();
        status
    }

    #[test]
    fn test_valid_transitions() {
        assert!(StatusMachine::can_transition(
            SequenceState::Init,
            SequenceState::Ready
        ));
        assert!(StatusMachine::can_transition(
            SequenceState::Executing,
            SequenceState::Aborted
        ));
        assert!(StatusMachine::can_transition(
            SequenceState::Finished,
            SequenceState::Ready
        ));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!StatusMachine::can_transition(
            SequenceState::Init,
            SequenceState::Executing
        ));
        assert!(!StatusMachine::can_transition(
            SequenceState::Failed,
            SequenceState::Ready
        ));
        assert!(!StatusMachine::can_transition(
            SequenceState::Aborted,
            SequenceState::Ready
        ));

        let mut status = StatusMachine::new();
        assert!(matches!(
            status.execute(),
            Err(CoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_first_request_wins() {
        let mut status = executing();
        assert!(status.request(Conclusion::Aborted));
        assert!(!status.request(Conclusion::FinishRequested));

        let state = status.conclude(Some("motor stalled")).unwrap();
        assert_eq!(state, Some(SequenceState::Aborted));
        assert_eq!(status.output(), "abortRequested");
        assert_eq!(status.status_code(), 2);
    }

    #[test]
    fn test_conclude_failure() {
        let mut status = executing();
        status.record_failure("first");
        status.record_failure("second");

        assert_eq!(
            status.conclude(Some("third")).unwrap(),
            Some(SequenceState::Failed)
        );
        assert_eq!(status.output(), "first");
        assert_eq!(status.status_code(), 1);
    }

    #[test]
    fn test_conclude_is_idempotent() {
        let mut status = executing();
        status.request(Conclusion::FinishRequested);
        assert_eq!(status.conclude(None).unwrap(), Some(SequenceState::Finished));
        assert_eq!(status.output(), "finishRequested");
        assert_eq!(status.status_code(), 3);

        assert_eq!(status.conclude(Some("late failure")).unwrap(), None);
        assert_eq!(status.state(), SequenceState::Finished);
        assert_eq!(status.output(), "finishRequested");
        assert!(!status.request(Conclusion::Aborted));
    }

    #[test]
    fn test_conclude_defaults_to_finished() {
        let mut status = executing();
        assert_eq!(status.status_code(), ACTIVE_CODE);
        assert_eq!(status.output(), ACTIVE_OUTPUT);

        status.conclude(None).unwrap();
        assert_eq!(status.output(), "complete");
        assert_eq!(status.status_code(), 0);
    }

    #[test]
    fn test_ready_resets_flag() {
        let mut status = executing();
        status.conclude(None).unwrap();
        status.amend().unwrap();

        assert_eq!(status.state(), SequenceState::Ready);
        assert_eq!(status.flag(), None);
        assert_eq!(status.output(), ACTIVE_OUTPUT);
    }

    #[test]
    fn test_request_before_execute_is_kept() {
        let mut status = StatusMachine::new();
        status.ready().unwrap();
        assert!(status.request(Conclusion::Aborted));
        status.execute().unwrap();

        assert_eq!(status.flag(), Some(Conclusion::Aborted));
        assert_eq!(status.conclude(None).unwrap(), Some(SequenceState::Aborted));
    }

    #[test]
    fn test_recycle() {
        let mut status = executing();
        assert!(status.recycle().unwrap());
        assert_eq!(status.state(), SequenceState::Executing);

        status.request(Conclusion::FinishRequested);
        assert!(!status.recycle().unwrap());
        assert_eq!(status.flag(), Some(Conclusion::FinishRequested));
    }

    #[test]
    fn test_abandon() {
        let mut status = StatusMachine::new();
        status.ready().unwrap();
        assert!(status.abandon("worker panicked"));
        assert_eq!(status.state(), SequenceState::Failed);
        assert_eq!(status.output(), "worker panicked");
        assert!(!status.abandon("again"));
    }

    #[test]
    fn test_state_parse() {
        assert_eq!(
            SequenceState::parse("executing"),
            Some(SequenceState::Executing)
        );
        assert_eq!(SequenceState::parse("bogus"), None);
        assert!(SequenceState::Aborted.is_terminal());
        assert!(!SequenceState::Ready.is_terminal());
    }
}
