//! Error types for the `sse` crate.
//!
//! A root Error struct carrying an error kind and an optional source for chaining.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for the sse crate.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in the event stream core.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Transport(TransportErrorKind),
    Frame(FrameErrorKind),
    Listener,
    Config,
}

/// Errors from establishing or reading a stream.
#[derive(Debug, PartialEq)]
pub enum TransportErrorKind {
    /// The request could not be sent or the connection dropped.
    Network,
    /// The server answered the handshake with a non-success status.
    Status(u16),
    /// The server answered with something other than an event stream.
    NotEventStream,
    BuilderFailed,
}

/// Errors from decoding a single event record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameErrorKind {
    InvalidUtf8,
    InvalidJson,
    LineTooLong,
}

impl Error {
    /// Whether a reconnect attempt could plausibly succeed after this error.
    ///
    /// Every handshake answer from the server is retried, including 401 since the
    /// token provider is asked again on the next attempt. Only a request that can
    /// never be built is final.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.error_kind,
            ErrorKind::Transport(TransportErrorKind::BuilderFailed) | ErrorKind::Config
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Transport(kind) => write!(f, "Transport error: {:?}", kind)?,
            ErrorKind::Frame(kind) => write!(f, "Frame error: {:?}", kind)?,
            ErrorKind::Listener => write!(f, "Listener error")?,
            ErrorKind::Config => write!(f, "Configuration error")?,
        }
        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = if err.is_builder() {
            ErrorKind::Transport(TransportErrorKind::BuilderFailed)
        } else if let Some(status) = err.status() {
            ErrorKind::Transport(TransportErrorKind::Status(status.as_u16()))
        } else {
            ErrorKind::Transport(TransportErrorKind::Network)
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

/// Helper function to create transport errors.
pub fn transport_error(kind: TransportErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Transport(kind),
    }
}

/// Helper function to create frame errors.
pub fn frame_error(kind: FrameErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Frame(kind),
    }
}

/// Helper function to wrap a listener's own error.
pub fn listener_error(source: Box<dyn StdError + Send + Sync>) -> Error {
    Error {
        source: Some(source),
        error_kind: ErrorKind::Listener,
    }
}

/// Helper function to create configuration errors.
pub fn config_error(message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Config,
    }
}
