use thiserror::Error;

use crate::proto::ConnectionState;

/// The set of observable errors when interacting with a Faktory server.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The connection to the server, or one of its prerequisites, failed.
    #[error("connection: {0}")]
    Connect(#[from] Connect),

    /// Underlying io layer errors.
    ///
    /// These are overwhelmingly network communication errors on the socket
    /// connection to the server.
    #[error("underlying i/o: {0}")]
    Io(#[from] std::io::Error),

    /// Application-level errors.
    ///
    /// These generally indicate a mismatch between what the client expects
    /// and what the server expects.
    #[error("protocol: {0}")]
    Protocol(#[from] Protocol),

    /// Faktory payloads are JSON encoded.
    ///
    /// This error is one that was encountered when attempting to serialize or
    /// deserialize such a payload, and generally indicates a mismatch between
    /// what the client expects and what the server provided.
    #[error("serialization: {0}")]
    Serialization(#[source] serde_json::Error),

    /// An operation was issued while the connection was not in the
    /// [`Connected`](ConnectionState::Connected) state.
    ///
    /// The operation was refused before any bytes were written; other
    /// in-flight operations are unaffected.
    #[error("connection is {state:?}, not writable")]
    NotWritable {
        /// The connection state at the time the operation was refused.
        state: ConnectionState,
    },

    /// The connection was lost before a reply to this operation arrived.
    ///
    /// The operation may or may not have reached the server; callers that
    /// need exactly-once semantics must make the operation idempotent.
    #[error("connection was lost before a reply was received")]
    LostConnection,

    /// The operation requires a worker id, but none was configured for this
    /// client.
    #[error("no worker id configured for this client")]
    MissingWorkerId,
}

/// Errors specific to connection establishment.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Connect {
    /// The connection url contains no hostname.
    #[error("no hostname given")]
    MissingHostname,

    /// The server requires authentication, but no password was configured.
    #[error("server requires authentication, but no password was given")]
    AuthenticationNeeded,

    /// The server speaks a different protocol version than this client.
    #[error("server version mismatch (theirs: {theirs}, ours: {ours})")]
    VersionMismatch {
        /// The protocol version this client speaks.
        ours: usize,

        /// The protocol version the server speaks.
        theirs: usize,
    },

    /// The connection url failed to parse.
    #[error("url parse: {0}")]
    ParseUrl(#[source] url::ParseError),

    /// The reconnect budget was exhausted without re-establishing a session.
    #[error("gave up reconnecting after {attempts} attempts")]
    ExhaustedReconnectBudget {
        /// How many consecutive attempts were made.
        attempts: u32,
    },

    /// A lower-level i/o error occurred while establishing the connection.
    #[error("underlying i/o: {0}")]
    Io(#[source] std::io::Error),
}

/// The set of observable application-level errors when interacting with a
/// Faktory server.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Protocol {
    /// The server reports that an issued request was malformed.
    #[error("request was malformed: {desc}")]
    Malformed {
        /// Error reported by server
        desc: String,
    },

    /// The server responded with an error.
    #[error("an internal server error occurred: {msg}")]
    Internal {
        /// The error message given by the server.
        msg: String,
    },

    /// The server sent a response that did not match what was expected.
    #[error("expected {expected}, got unexpected response: {received}")]
    BadType {
        /// The expected response type.
        expected: &'static str,

        /// The received response.
        received: String,
    },

    /// The server sent a malformed response.
    #[error("server sent malformed {typed_as} response: {error} in {bytes:?}")]
    BadResponse {
        /// The type of the server response.
        typed_as: &'static str,

        /// A description of what was wrong with the server response.
        error: &'static str,

        /// The relevant bytes sent by the server.
        bytes: Vec<u8>,
    },
}

impl Protocol {
    pub(crate) fn new(line: String) -> Self {
        let mut parts = line.splitn(2, ' ');
        let code = parts.next();
        let error = parts.next();
        let error = match error {
            Some(error) => error.to_string(),
            None => {
                return Protocol::Internal {
                    msg: code.unwrap_or("").to_string(),
                }
            }
        };

        match code {
            Some("ERR") => Protocol::Internal { msg: error },
            Some("MALFORMED") => Protocol::Malformed { desc: error },
            Some(c) => Protocol::Internal {
                msg: format!("{} {}", c, error),
            },
            None => Protocol::Internal {
                msg: "empty error response".to_string(),
            },
        }
    }
}
