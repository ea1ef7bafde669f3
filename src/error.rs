//! Error types for the leeching client
//!
//! One variant per failure class: malformed input, I/O, missed deadlines,
//! protocol violations, and metainfo validation.

use std::fmt;

/// Error type covering every component of the client
#[derive(Debug, Clone)]
pub enum Error {
    /// Malformed bencode, frame, or tracker response
    Decode { message: String },

    /// Socket or file I/O failure
    Io {
        message: String,
        source: Option<String>,
    },

    /// A deadline elapsed
    Timeout { message: String },

    /// Wire protocol violation (wrong header, wrong message type, hash mismatch)
    Protocol { message: String },

    /// Metainfo invariant violation at parse time
    Config { message: String },
}

impl Error {
    pub fn decode(message: impl Into<String>) -> Self {
        Error::Decode {
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Error::Io {
            message: message.into(),
            source: None,
        }
    }

    pub fn io_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        Error::Io {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Error::Timeout {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Decode { message } => write!(f, "decode error: {}", message),
            Error::Io { message, source } => {
                if let Some(src) = source {
                    write!(f, "i/o error: {} ({})", message, src)
                } else {
                    write!(f, "i/o error: {}", message)
                }
            }
            Error::Timeout { message } => write!(f, "timeout: {}", message),
            Error::Protocol { message } => write!(f, "protocol error: {}", message),
            Error::Config { message } => write!(f, "invalid metainfo: {}", message),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::io_with_source(err.to_string(), err.kind().to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::timeout("operation timed out")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_display() {
        let err = Error::decode("unexpected byte at position 3");
        assert_eq!(err.to_string(), "decode error: unexpected byte at position 3");
    }

    #[test]
    fn test_io_with_source_display() {
        let err = Error::io_with_source("writing piece", "broken pipe");
        assert!(err.to_string().contains("writing piece"));
        assert!(err.to_string().contains("broken pipe"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::timeout("waiting for unchoke");
        assert_eq!(err.to_string(), "timeout: waiting for unchoke");
    }
}
