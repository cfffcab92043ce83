use std::fmt;

/// Why a handler did not complete normally.
///
/// `Raised` is the sanctioned way to answer with a specific status; the
/// message reaches the client verbatim. Everything else is a `Fault`, which
/// the client only ever sees as a masked 500.
#[derive(Debug)]
pub enum HandlerError {
    Raised { status: u16, message: String },
    Fault(anyhow::Error),
}

/// Abort the handler with `status` and `message`
#[must_use]
pub fn raise(status: u16, message: impl Into<String>) -> HandlerError {
    HandlerError::Raised {
        status,
        message: message.into(),
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Raised { status, message } => write!(f, "{status} {message}"),
            HandlerError::Fault(e) => write!(f, "handler fault: {e}"),
        }
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HandlerError::Fault(e) => Some(e.as_ref()),
            HandlerError::Raised { .. } => None,
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(e: anyhow::Error) -> Self {
        HandlerError::Fault(e)
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(e: std::io::Error) -> Self {
        HandlerError::Fault(e.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::Fault(e.into())
    }
}

/// Result type every handler returns
pub type HandlerResult = Result<(), HandlerError>;
