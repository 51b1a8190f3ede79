use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("fleet api configuration error: {0}")]
    Configuration(String),
    #[error("fleet api transport error: {0}")]
    Transport(String),
    #[error("fleet api returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("fleet api payload decode error: {0}")]
    Decode(String),
    #[error("fleet api record not found: {0}")]
    NotFound(String),
    #[error("fleet api endpoint resolution failed: {0}")]
    Resolution(#[from] ResolveError),
}

/// Outcome of probing an ordered endpoint-candidate list. Not retried
/// automatically; call sites decide whether to offer a manual retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no candidate endpoints were provided")]
    NoCandidates,
    #[error("all {attempts} candidate endpoints failed; last error: {last}")]
    Exhausted { attempts: usize, last: Box<ApiError> },
}

impl ResolveError {
    pub fn last_error(&self) -> Option<&ApiError> {
        match self {
            Self::NoCandidates => None,
            Self::Exhausted { last, .. } => Some(last),
        }
    }
}
