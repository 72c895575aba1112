//! Error types for rivet-client

use rivet_wire::{DecodeError, ErrorCode, FrameError, Response};
use std::io;
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Every failure a call or the client can surface
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Transport error: {0}")]
    Transport(String),

    /// The contacted node is not authoritative
    #[error("Redirected: {0}")]
    Redirect(String),

    #[error("Server error {code}: {detail}")]
    Server { code: ErrorCode, detail: String },

    /// A write was interrupted and could not be resent safely
    #[error("Disconnected")]
    Disconnected,

    #[error("No more addresses to connect to")]
    NoMoreAddrs,

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification driving the retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Stream lost; reconnect and maybe resend
    Transport,
    /// Node not authoritative; close the stream, then as `Transport`
    Redirect,
    /// Per-call server failure, passed to the caller unchanged
    Application,
    /// Nothing more can be done for the call
    Fatal,
}

impl ClientError {
    /// Classify the error carried by a response, if any
    pub fn from_response(response: &Response) -> Option<Self> {
        let code = response.err_code?;
        let detail = response.err_detail.clone().unwrap_or_default();
        Some(match code {
            ErrorCode::Redirect => ClientError::Redirect(detail),
            code => ClientError::Server { code, detail },
        })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Decode(_) | ClientError::Frame(_) | ClientError::Transport(_) => {
                ErrorKind::Transport
            }
            ClientError::Redirect(_) => ErrorKind::Redirect,
            ClientError::Server { .. } => ErrorKind::Application,
            ClientError::Disconnected | ClientError::NoMoreAddrs | ClientError::Config(_) => {
                ErrorKind::Fatal
            }
        }
    }

    /// Returns true if the call may be resent on a new connection
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Redirect)
    }

    /// Server error code, for application failures
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}
