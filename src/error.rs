//! Contains the `Error` and `Result` types that `mongodb_topology` uses.

use std::{fmt::Debug, sync::Arc};

use thiserror::Error;

use crate::{bson::Document, options::ServerAddress};

/// The result type for all methods that can return an error in the `mongodb_topology` crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in the `mongodb_topology` crate. The inner
/// [`ErrorKind`](enum.ErrorKind.html) is wrapped in a `Box` to keep the error small.
#[derive(Clone, Debug, Error)]
#[error("Kind: {kind}, server response: {server_response:?}")]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Box<ErrorKind>,

    pub(crate) server_response: Option<Box<Document>>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
            server_response: None,
        }
    }

    /// Attaches the raw document the server replied with.
    pub(crate) fn with_server_response(mut self, response: Document) -> Self {
        self.server_response = Some(Box::new(response));
        self
    }

    /// The raw reply document that caused this error, if the error originated from a server
    /// response.
    pub fn server_response(&self) -> Option<&Document> {
        self.server_response.as_deref()
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        ErrorKind::Internal {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_response(message: impl Into<String>) -> Self {
        ErrorKind::InvalidResponse {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        ErrorKind::Configuration {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn operation_failure(message: impl Into<String>) -> Self {
        ErrorKind::OperationFailure {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn no_nodes_available(message: impl Into<String>) -> Self {
        ErrorKind::NoNodesAvailable {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn connection_lost(address: &ServerAddress) -> Self {
        ErrorKind::ConnectionLost {
            address: address.clone(),
        }
        .into()
    }

    /// Whether this error was caused by the network: either an I/O failure or a connection that
    /// closed while the operation was in flight.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self.kind.as_ref(),
            ErrorKind::Io(..) | ErrorKind::ConnectionLost { .. }
        )
    }

    /// Whether the connection used for the operation was closed.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::ConnectionLost { .. })
    }

    /// Whether no seed could be reached during discovery.
    pub fn is_no_nodes_available(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::NoNodesAvailable { .. })
    }

    /// Whether the server rejected the operation or no suitable node could be selected for it.
    pub fn is_operation_failure(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::OperationFailure { .. })
    }

    /// Whether the deployment did not look the way the options required it to.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Configuration { .. })
    }

    /// Whether the operation did not complete within its socket timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.kind.as_ref(),
            ErrorKind::Io(err) if err.kind() == std::io::ErrorKind::TimedOut
        )
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        Error::new(err.into())
    }
}

impl From<bson::de::Error> for ErrorKind {
    fn from(err: bson::de::Error) -> Self {
        Self::BsonDeserialization(err)
    }
}

impl From<bson::ser::Error> for ErrorKind {
    fn from(err: bson::ser::Error) -> Self {
        Self::BsonSerialization(err)
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<std::io::ErrorKind> for ErrorKind {
    fn from(err: std::io::ErrorKind) -> Self {
        Self::Io(Arc::new(err.into()))
    }
}

/// The types of errors that can occur.
#[allow(missing_docs)]
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An invalid argument was provided, usually in the connection string.
    #[error("An invalid argument was provided: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// Wrapper around `bson::de::Error`.
    #[error("{0}")]
    BsonDeserialization(bson::de::Error),

    /// Wrapper around `bson::ser::Error`.
    #[error("{0}")]
    BsonSerialization(bson::ser::Error),

    /// None of the seeds could be connected to.
    #[error("No nodes available: {message}")]
    #[non_exhaustive]
    NoNodesAvailable { message: String },

    /// The deployment reported a shape that does not match what discovery expected, e.g. a
    /// replica-set member without any hosts.
    #[error("Configuration error: {message}")]
    #[non_exhaustive]
    Configuration { message: String },

    /// The server reported a failure, or no connection suitable for the operation exists.
    #[error("Operation failure: {message}")]
    #[non_exhaustive]
    OperationFailure { message: String },

    /// The connection to the given address closed while an operation was using it.
    #[error("Connection to {address} was lost")]
    #[non_exhaustive]
    ConnectionLost { address: ServerAddress },

    #[error("Internal error: {message}")]
    #[non_exhaustive]
    Internal { message: String },

    /// Wrapper around [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html).
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The server returned bytes that do not form a valid reply.
    #[error("The server returned an invalid reply to a database operation: {message}")]
    #[non_exhaustive]
    InvalidResponse { message: String },

    /// A method was called on a pool that was disconnected.
    #[error("Connection pool has been disconnected")]
    Shutdown,
}
