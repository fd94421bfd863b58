//! Unified error type for agentsquad

use thiserror::Error;

/// Every failure the engine or coordinator can surface.
///
/// Each variant maps to a stable machine-readable code (see [`SquadError::code`])
/// which the process boundary turns into an exit status.
#[derive(Error, Debug)]
pub enum SquadError {
    // Agent errors
    #[error("No agent found for \"{0}\".")]
    AgentNotFound(String),

    #[error("Multiple agents match \"{0}\". Use the id instead.")]
    AmbiguousAgentName(String),

    #[error("{0} is not a detached process.")]
    AgentNotRunning(String),

    #[error("Unable to resolve the current agent. Provide --agent or set AGENTSQUAD_AGENT_ID.")]
    AgentIdRequired,

    // Task errors
    #[error("No task found for \"{0}\".")]
    TaskNotFound(String),

    #[error("Dependency {task_id} -> {depends_on} would create a cycle")]
    DependencyCycle { task_id: String, depends_on: String },

    #[error("Task {task_id} is {from} and cannot move to {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    #[error("Timed out after {waited_ms}ms waiting for task {task_id}")]
    WaitTimeout { task_id: String, waited_ms: u128 },

    // Message errors
    #[error("Provide either --text or --file.")]
    MessageEmpty,

    // Provider errors
    #[error("Provider \"{0}\" is not configured.")]
    ProviderUnknown(String),

    #[error("Profile \"{profile}\" is not configured for \"{provider}\".")]
    ProfileUnknown { provider: String, profile: String },

    #[error("Process error: {0}")]
    Process(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SquadError {
    /// Machine-readable kind, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            SquadError::AgentNotFound(_) => "AGENT_NOT_FOUND",
            SquadError::AmbiguousAgentName(_) => "AMBIGUOUS_AGENT_NAME",
            SquadError::AgentNotRunning(_) => "AGENT_NOT_RUNNING",
            SquadError::AgentIdRequired => "AGENT_ID_REQUIRED",
            SquadError::TaskNotFound(_) => "TASK_NOT_FOUND",
            SquadError::DependencyCycle { .. } => "DEPENDENCY_CYCLE",
            SquadError::InvalidTransition { .. } => "INVALID_TRANSITION",
            SquadError::WaitTimeout { .. } => "WAIT_TIMEOUT",
            SquadError::MessageEmpty => "MESSAGE_EMPTY",
            SquadError::ProviderUnknown(_) => "PROVIDER_UNKNOWN",
            SquadError::ProfileUnknown { .. } => "PROFILE_UNKNOWN",
            SquadError::Process(_) => "PROCESS_FAILED",
            SquadError::Config(_) => "CONFIG_INVALID",
            SquadError::InvalidArgument(_) => "INVALID_ARGUMENT",
            SquadError::Io(_) => "IO_ERROR",
            SquadError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Process exit status used by the command-line boundary.
    pub fn exit_code(&self) -> i32 {
        match self {
            SquadError::WaitTimeout { .. } => 124,
            SquadError::Io(_) | SquadError::Serialization(_) | SquadError::Process(_) => 2,
            _ => 1,
        }
    }
}

/// Result type alias using SquadError
pub type Result<T> = std::result::Result<T, SquadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(SquadError::AgentNotFound("x".into()).code(), "AGENT_NOT_FOUND");
        assert_eq!(SquadError::MessageEmpty.code(), "MESSAGE_EMPTY");
        assert_eq!(
            SquadError::ProfileUnknown {
                provider: "codex".into(),
                profile: "fast".into()
            }
            .code(),
            "PROFILE_UNKNOWN"
        );
    }

    #[test]
    fn test_messages_name_the_reference() {
        let err = SquadError::AmbiguousAgentName("max".into());
        assert_eq!(err.to_string(), "Multiple agents match \"max\". Use the id instead.");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        let err: SquadError = io.into();
        assert_eq!(err.code(), "IO_ERROR");
        assert_eq!(err.exit_code(), 2);
    }
}
