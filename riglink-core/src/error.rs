// SPDX-License-Identifier: MIT
//
// Riglink: Remote Control Link for Split SDR Transceivers
// Copyright (c) 2025 Riglink Contributors

//! Error types for the remote control link
//!
//! Provides a unified error taxonomy using `thiserror`. The variants follow the way the
//! session reacts to them: transport and authentication errors close the session,
//! protocol and state errors are answered inline and the session continues.

use crate::codec::Record;
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for link operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Timeouts, would-block, refused or still-pending connects; retried at the next heartbeat
    #[error("Transient transport error: {0}")]
    TransportTransient(String),

    /// Peer reset, peer closed, send failure; the session is closed
    #[error("Transport failure: {0}")]
    TransportFatal(String),

    /// Authentication handshake failed
    #[error("Authentication failed: {0}")]
    Auth(AuthFailure),

    /// Command arrived in a state where it cannot be applied; logged and ignored
    #[error("State error: {0}")]
    State(String),

    /// Record could not be framed
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Transport and auth failures end the session; everything else is reported inline
    pub fn closes_session(&self) -> bool {
        matches!(self, Error::TransportFatal(_) | Error::Io(_) | Error::Auth(_))
    }
}

/// Handshake failures that end the session
///
/// A wrong response is not among them: the host stays silent and the head may
/// answer again until the auth timer expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Auth timer expired (`TOKEN_BAD`)
    Timeout,
    /// Host has no password configured (`TOKEN_MISSING`)
    MissingPassword,
    /// Head has no password configured
    NoLocalPassword,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AuthFailure::Timeout => "challenge timed out",
            AuthFailure::MissingPassword => "remote radio has no password",
            AuthFailure::NoLocalPassword => "no local password configured",
        };
        f.write_str(text)
    }
}

/// Classes of protocol errors, each with its own `ERR_*` reply record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// Wrong parameter count or unparseable parameter value
    Param,
    /// Known shape, but the requested function is not supported here
    Unsupported,
    /// No command matches the record head
    Unrecognized,
    /// Structurally malformed payload
    BadFormat,
}

impl ProtocolErrorKind {
    pub fn reply_head(&self) -> &'static str {
        match self {
            ProtocolErrorKind::Param => "ERR_PARAM",
            ProtocolErrorKind::Unsupported => "ERR_UNSUPPORTED",
            ProtocolErrorKind::Unrecognized => "ERR_UNRECOGNIZED_CMD",
            ProtocolErrorKind::BadFormat => "ERR_BADFORMAT",
        }
    }

    pub fn from_reply_head(head: &str) -> Option<Self> {
        match head {
            "ERR_PARAM" => Some(ProtocolErrorKind::Param),
            "ERR_UNSUPPORTED" => Some(ProtocolErrorKind::Unsupported),
            "ERR_UNRECOGNIZED_CMD" => Some(ProtocolErrorKind::Unrecognized),
            "ERR_BADFORMAT" => Some(ProtocolErrorKind::BadFormat),
            _ => None,
        }
    }
}

/// A rejected record together with the reason
///
/// Produced by `Command::parse` and answered on the spot with [`ProtocolError::to_record`];
/// it never travels further as an [`Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub kind: ProtocolErrorKind,
    pub record: Record,
    pub detail: String,
}

impl ProtocolError {
    pub fn new(kind: ProtocolErrorKind, record: &Record, detail: impl Into<String>) -> Self {
        Self {
            kind,
            record: record.clone(),
            detail: detail.into(),
        }
    }

    pub fn param(record: &Record, detail: impl Into<String>) -> Self {
        Self::new(ProtocolErrorKind::Param, record, detail)
    }

    /// Reply record echoing the offending input: `ERR_<KIND>: <record line>`
    ///
    /// The echoed head is folded into the reply head, so the echoed fields remain
    /// fields and the reply is itself a well-formed record.
    pub fn to_record(&self) -> Record {
        Record {
            head: format!("{}: {}", self.kind.reply_head(), self.record.head),
            args: self.record.args.clone(),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} for '{}': {}",
            self.kind.reply_head(),
            self.record.to_line(),
            self.detail
        )
    }
}

/// Codec failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// A field contains `;`, `\n` or `\r`
    #[error("field {field} contains reserved character {ch:?}")]
    ReservedChar { field: usize, ch: char },

    /// The record head is empty
    #[error("record head is empty")]
    EmptyHead,
}

/// Outcome of classifying an OS-level transport error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry on the next attempt
    Transient,
    /// The socket reports it is already connected; confirm before trusting it
    AlreadyConnected,
    Fatal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_closing_classes() {
        assert!(Error::TransportFatal("reset".into()).closes_session());
        assert!(Error::Auth(AuthFailure::Timeout).closes_session());
        assert!(!Error::State("before auth".into()).closes_session());
        assert!(!Error::TransportTransient("refused".into()).closes_session());
        assert!(!Error::Config("bad port".into()).closes_session());
    }

    #[test]
    fn test_protocol_error_reply_echoes_record() {
        let record = Record::new("NotARealCommand", ["1"]);
        let err = ProtocolError::new(ProtocolErrorKind::Unrecognized, &record, "unknown");
        assert_eq!(
            err.to_record().to_line(),
            "ERR_UNRECOGNIZED_CMD: NotARealCommand;1"
        );
    }
}
