//! Error types for packet framing, encoding and decoding.

use std::fmt;

/// The primary error type for all mariawire operations.
#[derive(Debug)]
pub enum Error {
    /// Wire-level errors (desync, truncated or malformed packets, writer misuse)
    Protocol(ProtocolError),
    /// Error reported by the server in an ERR packet
    Server(ServerError),
    /// Caller supplied input that cannot be encoded
    Encode(EncodeError),
    /// Configuration errors
    Config(ConfigError),
    /// I/O errors from a transport adapter
    Io(std::io::Error),
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// A decoded ERR packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Server error number (e.g. 1062 for a duplicate key)
    pub code: u16,
    /// Five character SQLSTATE
    pub sql_state: String,
    /// Human-readable message sent by the server
    pub message: String,
    /// Whether the error means the connection is no longer usable
    pub fatal: bool,
}

/// Rejected caller input, located by row and parameter position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeError {
    /// Zero-based row index inside the batch, if the input was a batch row
    pub row: Option<usize>,
    /// Zero-based parameter position, if one value was at fault
    pub position: Option<usize>,
    pub message: String,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Does this error leave the connection unusable?
    ///
    /// Protocol desync and I/O failures always do; server errors only when
    /// their SQLSTATE belongs to a connection-loss class.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Protocol(_) | Error::Io(_) => true,
            Error::Server(e) => e.fatal,
            Error::Encode(_) | Error::Config(_) => false,
        }
    }

    /// Is this a connection error that requires reconnecting?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Protocol(_) | Error::Io(_) => true,
            Error::Server(e) => e.is_connection_loss(),
            _ => false,
        }
    }

    /// Get SQLSTATE if available (e.g. "23000" for an integrity violation)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(e) => Some(e.sql_state.as_str()),
            _ => None,
        }
    }

    /// Shorthand for a protocol error carrying only a message.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(ProtocolError {
            message: message.into(),
            raw_data: None,
            source: None,
        })
    }
}

impl ServerError {
    /// SQLSTATE used when the server omits the `#` marker.
    pub const DEFAULT_SQL_STATE: &'static str = "HY000";

    /// Build a server error, deriving the fatal flag from the SQLSTATE.
    pub fn new(code: u16, sql_state: impl Into<String>, message: impl Into<String>) -> Self {
        let sql_state = sql_state.into();
        let fatal = is_connection_loss_state(&sql_state);
        Self {
            code,
            sql_state,
            message: message.into(),
            fatal,
        }
    }

    /// SQLSTATE class 08 (connection exception) or 70100 (query interrupted).
    pub fn is_connection_loss(&self) -> bool {
        is_connection_loss_state(&self.sql_state)
    }

    /// Check if this is a unique constraint violation.
    pub fn is_duplicate_key(&self) -> bool {
        // ER_DUP_ENTRY
        self.code == 1062
    }

    /// Check if this is a foreign key constraint violation.
    pub fn is_foreign_key_violation(&self) -> bool {
        self.code == 1451 || self.code == 1452
    }
}

fn is_connection_loss_state(sql_state: &str) -> bool {
    sql_state.starts_with("08") || sql_state == "70100"
}

impl EncodeError {
    /// Error about one value of one batch row.
    pub fn at(row: usize, position: usize, message: impl Into<String>) -> Self {
        Self {
            row: Some(row),
            position: Some(position),
            message: message.into(),
        }
    }

    /// Error about a whole batch row.
    pub fn row(row: usize, message: impl Into<String>) -> Self {
        Self {
            row: Some(row),
            position: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Server(e) => write!(
                f,
                "Server error {} (SQLSTATE {}): {}",
                e.code, e.sql_state, e.message
            ),
            Error::Encode(e) => write!(f, "Encode error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Protocol(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {} [{}]", self.code, self.message, self.sql_state)
    }
}

impl std::error::Error for ServerError {}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.row, self.position) {
            (Some(row), Some(pos)) => {
                write!(f, "row {}, parameter {}: {}", row, pos, self.message)
            }
            (Some(row), None) => write!(f, "row {}: {}", row, self.message),
            (None, Some(pos)) => write!(f, "parameter {}: {}", pos, self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<ServerError> for Error {
    fn from(err: ServerError) -> Self {
        Error::Server(err)
    }
}

impl From<EncodeError> for Error {
    fn from(err: EncodeError) -> Self {
        Error::Encode(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for mariawire operations.
pub type Result<T> = std::result::Result<T, Error>;
