use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid sequence state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("{0} already busy")]
    ResourceBusy(String),

    #[error("Malformed command: {0}")]
    MalformedCommand(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CoreError::InvalidTransition {
            from: "init".to_string(),
            to: "finished".to_string(),
        };
        assert!(error.to_string().contains("init"));
        assert!(error.to_string().contains("finished"));

        let busy = CoreError::ResourceBusy("lamp".to_string());
        assert_eq!(busy.to_string(), "lamp already busy");
    }
}
