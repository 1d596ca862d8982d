use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("not initialized: run 'taskmaster init'")]
    NotInitialized,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("dependency cycle: {from} -> {to} closes a cycle (remove this edge)")]
    Cycle { from: String, to: String },

    #[error("dangling reference: task {task} references unknown task {reference}")]
    DanglingReference { task: String, reference: String },

    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("task {id} has complexity {complexity}, above the ceiling of {ceiling}; split it first")]
    ComplexityExceeded {
        id: String,
        complexity: u8,
        ceiling: u8,
    },

    #[error("task {id} is waiting on: {}", pending.join(", "))]
    DependenciesUnmet { id: String, pending: Vec<String> },

    #[error("quality gate failed for {id}: {}", failed.join(", "))]
    QualityGateFailed { id: String, failed: Vec<String> },

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task set not found: {0}")]
    TaskSetNotFound(String),

    #[error("task set already exists: {0}")]
    TaskSetExists(String),

    #[error("invalid slug '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidSlug(String),

    #[error("invalid task id '{0}': expected T-NNN")]
    InvalidTaskId(String),

    #[error("invalid phase: {0}")]
    InvalidPhase(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid strategy '{0}': expected quick-win or critical-path")]
    InvalidStrategy(String),

    #[error("invalid gate outcome '{0}': expected pass or fail")]
    InvalidGateOutcome(String),

    #[error("{0} is locked by another writer")]
    Locked(String),

    #[error("an auto-loop is already active for {0}")]
    LoopActive(String),

    #[error("no active auto-loop for {0}")]
    NoActiveLoop(String),

    #[error("executing {id} failed: {message}")]
    ExecutorFailed { id: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result classes surfaced to callers as process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Cycle,
    DanglingReference,
    InvalidTransition,
    ComplexityExceeded,
    QualityGate,
    Other,
}

impl ErrorKind {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Other => 1,
            ErrorKind::Validation => 2,
            ErrorKind::Cycle => 3,
            ErrorKind::DanglingReference => 4,
            ErrorKind::InvalidTransition => 5,
            ErrorKind::ComplexityExceeded => 6,
            ErrorKind::QualityGate => 7,
        }
    }
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Validation(_)
            | TaskError::InvalidSlug(_)
            | TaskError::InvalidTaskId(_)
            | TaskError::InvalidPhase(_)
            | TaskError::InvalidStatus(_)
            | TaskError::InvalidGateOutcome(_) => ErrorKind::Validation,
            TaskError::Cycle { .. } => ErrorKind::Cycle,
            TaskError::DanglingReference { .. } => ErrorKind::DanglingReference,
            TaskError::InvalidTransition { .. } | TaskError::DependenciesUnmet { .. } => {
                ErrorKind::InvalidTransition
            }
            TaskError::ComplexityExceeded { .. } => ErrorKind::ComplexityExceeded,
            TaskError::QualityGateFailed { .. } => ErrorKind::QualityGate,
            _ => ErrorKind::Other,
        }
    }
}

pub type Result<T> = std::result::Result<T, TaskError>;
