//! The crate-wide error type.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;

/// This enum contains all errors this library can return. Shim operations generally return a [`Result<T, SimnetError>`].
///
/// Simulated packet loss is never reported through this type: a dropped write or send reports success,
/// exactly like a real unreliable transport would from the sender's point of view.
///
/// [`Result<T, SimnetError>`]: std::result::Result
#[derive(Debug)]
pub enum SimnetError {
    /// The target address is in the profile's partition set. Nothing was sent and no connection was attempted.
    Partitioned {
        /// The address that could not be reached.
        address: String,
    },
    /// The real transport failed to establish an outbound connection.
    DialFailed {
        /// The address that was dialed.
        address: String,
        /// The underlying transport error.
        source: io::Error,
    },
    /// The real listener failed to accept an inbound connection.
    AcceptFailed {
        /// The underlying transport error.
        source: io::Error,
    },
    /// The connection was closed before or during the operation.
    Closed,
    /// A read, write, send or receive deadline elapsed before the operation completed.
    TimedOut,
    /// Any other failure reported by the real transport.
    Io {
        /// A description of what was being attempted.
        context: String,
        /// The underlying transport error.
        source: io::Error,
    },
}

impl SimnetError {
    /// Wraps a transport error with a short description of the failed operation.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        SimnetError::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns `true` if this is a reachability error caused by a partition.
    #[must_use]
    pub fn is_partitioned(&self) -> bool {
        matches!(self, SimnetError::Partitioned { .. })
    }

    /// Returns `true` if the connection was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, SimnetError::Closed)
    }

    /// The [`io::ErrorKind`] this error maps to when converted into an [`io::Error`].
    #[must_use]
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            SimnetError::Partitioned { .. } => io::ErrorKind::HostUnreachable,
            SimnetError::DialFailed { source, .. } => source.kind(),
            SimnetError::AcceptFailed { source } => source.kind(),
            SimnetError::Closed => io::ErrorKind::NotConnected,
            SimnetError::TimedOut => io::ErrorKind::TimedOut,
            SimnetError::Io { source, .. } => source.kind(),
        }
    }
}

impl Display for SimnetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimnetError::Partitioned { address } => {
                write!(f, "simnet: network partitioned: unable to reach address: {}", address)
            },
            SimnetError::DialFailed { address, source } => {
                write!(f, "simnet: dial failed: {}: {}", address, source)
            },
            SimnetError::AcceptFailed { source } => {
                write!(f, "simnet: failed to accept connection: {}", source)
            },
            SimnetError::Closed => {
                write!(f, "simnet: use of closed connection")
            },
            SimnetError::TimedOut => {
                write!(f, "simnet: i/o deadline exceeded")
            },
            SimnetError::Io { context, source } => {
                write!(f, "simnet: {}: {}", context, source)
            },
        }
    }
}

impl Error for SimnetError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SimnetError::DialFailed { source, .. }
            | SimnetError::AcceptFailed { source }
            | SimnetError::Io { source, .. } => Some(source),
            SimnetError::Partitioned { .. } | SimnetError::Closed | SimnetError::TimedOut => None,
        }
    }
}

impl From<SimnetError> for io::Error {
    fn from(err: SimnetError) -> Self {
        io::Error::new(err.kind(), err)
    }
}

/// Shorthand for results returned by this crate.
pub type SimnetResult<T> = Result<T, SimnetError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_partitioned_display_names_address() {
        let err = SimnetError::Partitioned {
            address: "10.0.0.1:80".to_owned(),
        };
        assert!(err.is_partitioned());
        assert_eq!(
            err.to_string(),
            "simnet: network partitioned: unable to reach address: 10.0.0.1:80"
        );
        assert!(err.source().is_none());
    }

    #[test]
    fn test_dial_failed_exposes_source() {
        let err = SimnetError::DialFailed {
            address: "127.0.0.1:1".to_owned(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
        let source = err.source().expect("dial failure carries its cause");
        assert_eq!(source.to_string(), "refused");
        assert!(err.to_string().starts_with("simnet: dial failed: 127.0.0.1:1"));
    }

    #[test]
    fn test_into_io_error_keeps_kind_and_inner() {
        let io_err: io::Error = SimnetError::Closed.into();
        assert_eq!(io_err.kind(), io::ErrorKind::NotConnected);
        let inner = io_err
            .get_ref()
            .and_then(|e| e.downcast_ref::<SimnetError>())
            .unwrap();
        assert!(inner.is_closed());

        let io_err: io::Error = SimnetError::Partitioned {
            address: "a".to_owned(),
        }
        .into();
        assert_eq!(io_err.kind(), io::ErrorKind::HostUnreachable);

        let io_err: io::Error = SimnetError::TimedOut.into();
        assert_eq!(io_err.kind(), io::ErrorKind::TimedOut);
    }
}
