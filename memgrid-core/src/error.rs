//! Error types for memgrid operations.

use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Server-side error codes that mark an operation as safe to resend.
const RETRYABLE_ERROR_CODES: &[i32] = &[
    8,  // CALLER_NOT_MEMBER
    19, // INSTANCE_NOT_ACTIVE
    33, // MEMBER_LEFT
    39, // PARTITION_MIGRATING
    46, // RETRYABLE
    47, // RETRYABLE_IO
    52, // TARGET_DISCONNECTED
    53, // TARGET_NOT_MEMBER
    62, // WRONG_TARGET
];

/// One element of a remote stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackTraceElement {
    /// Declaring class of the frame.
    pub class_name: String,
    /// Method name of the frame.
    pub method_name: String,
    /// Source file, if the member reported one.
    pub file_name: Option<String>,
    /// Line number, or a negative value when unknown.
    pub line_number: i32,
}

/// An error reported by a cluster member in an exception response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// Numeric protocol error code.
    pub error_code: i32,
    /// Fully qualified class name of the server-side exception.
    pub class_name: String,
    /// Exception message, if any.
    pub message: Option<String>,
    /// Server-side stack trace.
    pub stack_trace: Vec<StackTraceElement>,
}

impl RemoteError {
    /// Creates a remote error without a stack trace.
    pub fn new(error_code: i32, class_name: impl Into<String>, message: Option<String>) -> Self {
        Self {
            error_code,
            class_name: class_name.into(),
            message,
            stack_trace: Vec::new(),
        }
    }

    /// Returns `true` if the failed operation may be resent to the cluster.
    pub fn is_retryable(&self) -> bool {
        RETRYABLE_ERROR_CODES.contains(&self.error_code)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote error {} ({})", self.error_code, self.class_name)?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

/// The main error type for memgrid operations.
///
/// The type is `Clone` so that a single failure can be handed to every
/// party waiting on the same shared operation.
#[derive(Debug, Clone, Error)]
pub enum GridError {
    /// Connection-related errors (refused, closed, unreachable).
    #[error("connection error: {0}")]
    Connection(String),

    /// The connection an operation was sent over went away.
    #[error("target disconnected: {0}")]
    TargetDisconnected(String),

    /// Protocol-related errors (malformed frames, unexpected messages).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Connect, handshake or authentication timeout.
    #[error("timeout error: {0}")]
    Timeout(String),

    /// An invocation exceeded its deadline; `cause` is the last failure seen.
    #[error("operation timed out: {message}")]
    OperationTimeout {
        /// Description of the timed out invocation.
        message: String,
        /// The failure that was being retried when the deadline passed.
        #[source]
        cause: Box<GridError>,
    },

    /// The cluster rejected the client's credentials.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// The cluster does not speak the client's serialization version.
    #[error("serialization version mismatch: {0}")]
    SerializationVersionMismatch(String),

    /// The cluster refused the client (blacklisted, wrong cluster, forced switch).
    #[error("client not allowed in cluster: {0}")]
    ClientNotAllowedInCluster(String),

    /// The member reports a partition count different from the one learned first.
    #[error("partition count mismatch: expected {expected}, member has {actual}")]
    PartitionCountMismatch {
        /// The partition count fixed by the first authenticated member.
        expected: i32,
        /// The partition count reported by the rejected member.
        actual: i32,
    },

    /// Configuration errors (invalid settings).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An operation was attempted in a state that does not allow it.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The client is shutting down or has shut down.
    #[error("client is not active: {0}")]
    ClientNotActive(String),

    /// The client has no connection yet and is configured not to wait for one.
    #[error("client is offline")]
    ClientOffline,

    /// An error reported by a cluster member.
    #[error("{0}")]
    Remote(RemoteError),

    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl GridError {
    /// Builds an I/O error of kind `NotConnected`, used when no usable
    /// connection exists for an operation.
    pub fn no_connection(message: impl Into<String>) -> Self {
        GridError::Io(Arc::new(io::Error::new(
            io::ErrorKind::NotConnected,
            message.into(),
        )))
    }

    /// Returns `true` for errors that stop the connect loop for a cluster
    /// immediately instead of backing off and retrying.
    pub fn is_cluster_fatal(&self) -> bool {
        matches!(
            self,
            GridError::ClientNotAllowedInCluster(_)
                | GridError::Configuration(_)
                | GridError::PartitionCountMismatch { .. }
        )
    }
}

impl From<io::Error> for GridError {
    fn from(err: io::Error) -> Self {
        GridError::Io(Arc::new(err))
    }
}

impl From<RemoteError> for GridError {
    fn from(err: RemoteError) -> Self {
        GridError::Remote(err)
    }
}

/// A specialized `Result` type for memgrid operations.
pub type Result<T> = std::result::Result<T, GridError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = GridError::Connection("failed to connect to server".to_string());
        assert_eq!(
            err.to_string(),
            "connection error: failed to connect to server"
        );
    }

    #[test]
    fn test_protocol_error_display() {
        let err = GridError::Protocol("invalid message format".to_string());
        assert_eq!(err.to_string(), "protocol error: invalid message format");
    }

    #[test]
    fn test_partition_count_mismatch_display() {
        let err = GridError::PartitionCountMismatch {
            expected: 271,
            actual: 13,
        };
        assert_eq!(
            err.to_string(),
            "partition count mismatch: expected 271, member has 13"
        );
    }

    #[test]
    fn test_operation_timeout_keeps_cause() {
        let err = GridError::OperationTimeout {
            message: "invocation 7 timed out".to_string(),
            cause: Box::new(GridError::TargetDisconnected("conn-1 closed".to_string())),
        };
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("target disconnected: conn-1 closed"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        let err: GridError = io_err.into();
        assert!(matches!(err, GridError::Io(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_no_connection_is_io() {
        let err = GridError::no_connection("no connection to member");
        match err {
            GridError::Io(inner) => assert_eq!(inner.kind(), io::ErrorKind::NotConnected),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_remote_error_retryable_codes() {
        assert!(RemoteError::new(39, "PartitionMigratingException", None).is_retryable());
        assert!(RemoteError::new(62, "WrongTargetException", None).is_retryable());
        assert!(!RemoteError::new(1, "ArrayIndexOutOfBoundsException", None).is_retryable());
    }

    #[test]
    fn test_remote_error_display() {
        let err = GridError::Remote(RemoteError::new(
            46,
            "RetryableException",
            Some("try again".to_string()),
        ));
        assert_eq!(
            err.to_string(),
            "remote error 46 (RetryableException): try again"
        );
    }

    #[test]
    fn test_cluster_fatal_classification() {
        assert!(GridError::ClientNotAllowedInCluster("x".into()).is_cluster_fatal());
        assert!(GridError::Configuration("x".into()).is_cluster_fatal());
        assert!(!GridError::Authentication("x".into()).is_cluster_fatal());
        assert!(!GridError::Timeout("x".into()).is_cluster_fatal());
    }

    #[test]
    fn test_error_is_send_sync_clone() {
        fn assert_traits<T: Send + Sync + Clone>() {}
        assert_traits::<GridError>();
    }
}
