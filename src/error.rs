use core::fmt::{self, Display, Formatter};

/// Result type used throughout the driver
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Epd error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The bus or one of the control pins failed
    #[error("communication error: {0}")]
    Communication(String),

    /// A bounded wait ran out before the controller became ready
    #[error("timed out after {timeout_ms}ms waiting for {operation}")]
    Timeout {
        /// What was being waited on
        operation: &'static str,
        /// The bound that was exceeded
        timeout_ms: u32,
    },

    /// Bring-up failed, or an operation was issued before `init()`
    #[error("initialization error: {message}")]
    Initialization {
        /// Description of the failing step
        message: String,
        /// The error that made the step fail, if any
        #[source]
        source: Option<Box<Error>>,
    },

    /// The controller returned malformed or unavailable device info
    #[error("device error: {0}")]
    Device(String),

    /// A caller supplied value violates a contract
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A transfer would exceed the memory ceiling
    #[error("memory error: {0}")]
    Memory(String),
}

/// The kind of an [`Error`], without its payload.
///
/// Used by [`RetryPolicy`](crate::retry::RetryPolicy) to decide which
/// failures are worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::Communication`]
    Communication,
    /// See [`Error::Timeout`]
    Timeout,
    /// See [`Error::Initialization`]
    Initialization,
    /// See [`Error::Device`]
    Device,
    /// See [`Error::InvalidParameter`]
    InvalidParameter,
    /// See [`Error::Memory`]
    Memory,
}

impl Error {
    /// The kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Communication(_) => ErrorKind::Communication,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Initialization { .. } => ErrorKind::Initialization,
            Self::Device(_) => ErrorKind::Device,
            Self::InvalidParameter(_) => ErrorKind::InvalidParameter,
            Self::Memory(_) => ErrorKind::Memory,
        }
    }

    pub(crate) fn not_initialized() -> Self {
        Self::Initialization {
            message: "IT8951 not initialized. Call init() first".into(),
            source: None,
        }
    }

    pub(crate) fn init_failed(source: Error) -> Self {
        Self::Initialization {
            message: format!("failed to initialize IT8951: {source}"),
            source: Some(Box::new(source)),
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Communication => "communication",
            Self::Timeout => "timeout",
            Self::Initialization => "initialization",
            Self::Device => "device",
            Self::InvalidParameter => "invalid parameter",
            Self::Memory => "memory",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            Error::Communication("spi".into()).kind(),
            ErrorKind::Communication
        );
        assert_eq!(
            Error::Timeout {
                operation: "display",
                timeout_ms: 10
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(Error::Memory("big".into()).kind(), ErrorKind::Memory);
    }

    #[test]
    fn init_failure_keeps_cause() {
        let err = Error::init_failed(Error::Communication("bus stuck".into()));
        assert_eq!(err.kind(), ErrorKind::Initialization);
        assert!(err.to_string().contains("bus stuck"));
        let source = err.source().expect("source kept");
        assert!(source.to_string().contains("communication error"));
    }
}
