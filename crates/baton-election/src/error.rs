//! Error types for the election

use baton_coord::CoordinationError;
use thiserror::Error;

/// How a caller should react to an [`ElectionError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry the same operation on the same session
    Transient,
    /// The session cannot continue; start over with a new session and a new record
    SessionFatal,
    /// A protocol invariant was broken; propagate
    Invariant,
}

#[derive(Error, Debug)]
pub enum ElectionError {
    #[error("Coordination service error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("Election namespace does not exist: {0}")]
    NoNamespace(String),

    #[error("No candidacy records under {0}")]
    EmptyCandidateSet(String),

    #[error("Candidacy record {0} is not in the candidate set")]
    CandidateMissing(String),

    #[error("Unexpected candidacy record name: {0}")]
    MalformedRecord(String),

    #[error("Gave up after {attempts} consecutive transient failures: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<ElectionError>,
    },

    #[error("Already running")]
    AlreadyRunning,
}

impl ElectionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ElectionError::Coordination(e) if e.is_transient() => ErrorClass::Transient,
            ElectionError::Coordination(e) if e.is_session_fatal() => ErrorClass::SessionFatal,
            ElectionError::Coordination(CoordinationError::Connection(_)) => ErrorClass::SessionFatal,
            ElectionError::Coordination(_) => ErrorClass::Invariant,
            ElectionError::NoNamespace(_) | ElectionError::RetriesExhausted { .. } => {
                ErrorClass::SessionFatal
            }
            ElectionError::EmptyCandidateSet(_)
            | ElectionError::CandidateMissing(_)
            | ElectionError::MalformedRecord(_)
            | ElectionError::AlreadyRunning => ErrorClass::Invariant,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

pub type Result<T> = std::result::Result<T, ElectionError>;
