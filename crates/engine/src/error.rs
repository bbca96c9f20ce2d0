use sequencer_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{} not connected.", .0.join(","))]
    ResourceUnavailable(Vec<String>),

    #[error("{} already busy.", .0.join(","))]
    ResourceBusy(Vec<String>),

    #[error("{target} {command_head} failed: {reason}")]
    SubCommandFailed {
        target: String,
        command_head: String,
        reason: String,
    },

    #[error("sequence {0} aborted")]
    SequenceAborted(i64),

    #[error("visit already active for {0}")]
    VisitActive(String),

    #[error("visit {0} is not active")]
    VisitNotActive(i64),

    #[error("visit {0} ran out of frames")]
    VisitOverflow(i64),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] db::DbError),

    #[error("{0}")]
    SequenceIdentification(String),

    #[error("{0}")]
    InvalidTransition(#[from] CoreError),

    #[error("Identifier source unavailable: {0}")]
    IdentifierSource(String),

    #[error("Sequence worker died: {0}")]
    Worker(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn sub_command_failed(
        target: impl Into<String>,
        command_head: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::SubCommandFailed {
            target: target.into(),
            command_head: command_head.into(),
            reason: reason.into(),
        }
    }

    pub fn identification(message: impl Into<String>) -> Self {
        Self::SequenceIdentification(message.into())
    }

    /// Admission and visit errors are raised before any sub-command runs.
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            Self::ResourceUnavailable(_)
                | Self::ResourceBusy(_)
                | Self::VisitActive(_)
                | Self::IdentifierSource(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
