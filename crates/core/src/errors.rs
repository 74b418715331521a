use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid {record} transition from {from} to {to}")]
    InvalidTransition { record: &'static str, from: String, to: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failure surfaced to the job runtime. The variant decides whether the queue re-delivers.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("invalid job payload: {0}")]
    InvalidPayload(String),
}

impl ApplicationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Integration(_))
    }

    pub fn class(&self) -> &'static str {
        match self {
            Self::Domain(_) => "domain",
            Self::Persistence(_) => "persistence",
            Self::Integration(_) => "integration",
            Self::Configuration(_) => "configuration",
            Self::InvalidPayload(_) => "invalid_payload",
        }
    }
}
