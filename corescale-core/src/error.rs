use std::fmt;

/// Result type alias for corescale core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for corescale core operations
#[derive(Debug)]
pub enum Error {
    /// I/O errors from process control or the session transport
    Io(std::io::Error),

    /// Rejected configuration (rates, core bounds, sizes)
    InvalidConfiguration(String),

    /// Malformed or unexpected data on an event session
    Session(String),

    /// The consumer could not attach to the producer in time
    Attach(String),

    /// Producer process failures (launch, exit status, stdin handshake)
    Producer(String),

    /// Other errors
    Other(String),
}

impl Error {
    /// Shorthand for an [`Error::InvalidConfiguration`]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidConfiguration(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {msg}"),
            Error::Session(msg) => write!(f, "Session error: {msg}"),
            Error::Attach(msg) => write!(f, "Attach error: {msg}"),
            Error::Producer(msg) => write!(f, "Producer error: {msg}"),
            Error::Other(msg) => write!(f, "Error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Other(format!("Task failed: {err}"))
    }
}
