//! Failure taxonomy shared by every console operation.
//!
//! Transports sit outside this crate, so errors carry no status codes of
//! any particular protocol; [`ConsoleError::code`] gives a stable string
//! form for logs and structured responses.

use thiserror::Error;

/// Errors surfaced by session, attachment, handle, and broadcast
/// operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    /// The handle (or the connection's ambient attachment) does not
    /// resolve to a live object of the expected kind.
    #[error("invalid handle")]
    InvalidHandle,

    /// The capability exists but lacks the requested access right.
    #[error("access denied")]
    AccessDenied,

    /// The operation is not legal in the connection's current state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// A caller-supplied value is outside the accepted domain.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A configured capacity limit was reached.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    /// A collaborator refused the operation; any state already applied
    /// stays applied.
    #[error("operation unsuccessful: {0}")]
    Unsuccessful(&'static str),
}

impl ConsoleError {
    /// Stable machine-readable code, independent of the Display text.
    pub fn code(&self) -> &'static str {
        match self {
            ConsoleError::InvalidHandle => "invalid_handle",
            ConsoleError::AccessDenied => "access_denied",
            ConsoleError::InvalidState(_) => "invalid_state",
            ConsoleError::InvalidParameter(_) => "invalid_parameter",
            ConsoleError::ResourceExhausted(_) => "resource_exhausted",
            ConsoleError::Unsuccessful(_) => "unsuccessful",
        }
    }
}

pub type Result<T> = std::result::Result<T, ConsoleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ConsoleError::InvalidHandle.code(), "invalid_handle");
        assert_eq!(ConsoleError::AccessDenied.code(), "access_denied");
        assert_eq!(ConsoleError::InvalidState("x").code(), "invalid_state");
        assert_eq!(
            ConsoleError::InvalidParameter("cp 1".into()).code(),
            "invalid_parameter"
        );
        assert_eq!(
            ConsoleError::ResourceExhausted("handles").code(),
            "resource_exhausted"
        );
        assert_eq!(ConsoleError::Unsuccessful("init").code(), "unsuccessful");
    }

    #[test]
    fn display_includes_context() {
        let e = ConsoleError::InvalidParameter("code page 12345".into());
        assert_eq!(e.to_string(), "invalid parameter: code page 12345");

        let e = ConsoleError::ResourceExhausted("session member limit");
        assert!(e.to_string().contains("session member limit"));
    }
}
