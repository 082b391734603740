use std::fmt;

/// Error type returned by store and file-storage collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Which part of a recall a fatal store failure came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    ShortTerm,
    Anchor,
    RootSearch,
    Expansion { depth: usize },
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::ShortTerm => write!(f, "short-term fetch"),
            Stage::Anchor => write!(f, "anchor lookup"),
            Stage::RootSearch => write!(f, "root search"),
            Stage::Expansion { depth } => write!(f, "expansion at depth {depth}"),
        }
    }
}

#[derive(Debug)]
pub enum RecallError {
    /// Malformed request, raised before any I/O.
    Validation(String),
    /// The anchor pair has no stored embedding.
    NotFound(String),
    Store { stage: Stage, source: BoxError },
    Presign { image_ref: String, source: BoxError },
    Cancelled,
    TimedOut,
    /// An expansion task panicked or was aborted from outside.
    Task(String),
}

impl RecallError {
    pub fn validation(msg: impl Into<String>) -> Self {
        RecallError::Validation(msg.into())
    }

    pub fn store(stage: Stage, source: BoxError) -> Self {
        RecallError::Store { stage, source }
    }

    /// True for errors caused by the request itself rather than a collaborator.
    pub fn is_client_error(&self) -> bool {
        matches!(self, RecallError::Validation(_) | RecallError::NotFound(_))
    }
}

impl fmt::Display for RecallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecallError::Validation(msg) => write!(f, "invalid request: {msg}"),
            RecallError::NotFound(msg) => write!(f, "not found: {msg}"),
            RecallError::Store { stage, source } => write!(f, "store error during {stage}: {source}"),
            RecallError::Presign { image_ref, source } => {
                write!(f, "failed to presign '{image_ref}': {source}")
            }
            RecallError::Cancelled => write!(f, "recall cancelled"),
            RecallError::TimedOut => write!(f, "recall timed out"),
            RecallError::Task(msg) => write!(f, "expansion task failed: {msg}"),
        }
    }
}

impl std::error::Error for RecallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecallError::Store { source, .. } | RecallError::Presign { source, .. } => {
                Some(source.as_ref())
            }
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for RecallError {
    fn from(e: tokio::task::JoinError) -> Self {
        RecallError::Task(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RecallError>;
