//! Local error types for the bookie client.
//!
//! Only failures detected before a request leaves the caller are reported as
//! [`ClientError`]. Anything a bookie or the network does wrong reaches the
//! caller through the completion's [`ResultCode`](quire_types::ResultCode).

use quire_types::BookieId;
use snafu::{Location, Snafu};

/// Result type alias for bookie client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Synchronous failures of the bookie client API.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ClientError {
    /// The configuration cannot back a working client or pool.
    #[snafu(display("Invalid client configuration at {location}: {message}"))]
    InvalidConfig {
        /// Error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// An argument was rejected before dispatch.
    #[snafu(display("Invalid argument: {message}"))]
    InvalidArgument {
        /// Error description.
        message: String,
    },

    /// Establishing a connection failed.
    #[snafu(display("Failed to connect to bookie {bookie}: {source}"))]
    Connect {
        /// Bookie being contacted.
        bookie: BookieId,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use snafu::IntoError;

    use super::*;

    fn is_local(err: &ClientError) -> bool {
        match err {
            ClientError::InvalidConfig { .. } | ClientError::InvalidArgument { .. } => true,
            ClientError::Connect { .. } => false,
        }
    }

    #[test]
    fn argument_errors_name_the_problem() {
        let err = InvalidArgumentSnafu { message: "negative ledger id -3" }.build();
        assert!(is_local(&err));
        assert_eq!(err.to_string(), "Invalid argument: negative ledger id -3");
    }

    #[test]
    fn connect_errors_name_the_bookie() {
        let bookie = BookieId::parse("bookie-1:3181").unwrap();
        let source = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ConnectSnafu { bookie }.into_error(source);
        assert!(!is_local(&err));
        assert!(err.to_string().contains("bookie-1:3181"));
    }
}
