// SPDX-License-Identifier: MIT
//
// Riglink: Remote Control Link for Split SDR Transceivers
// Copyright (c) 2025 Riglink Contributors

//! Wire codec for control records
//!
//! A record is `Head (";" Arg)* "\n"`. There is no escaping: no field may contain the
//! delimiters, and the encoder refuses such input instead of producing a record that
//! would parse differently on the other end.
//!
//! Decoding is tolerant. Bytes are accumulated per session, every complete line is
//! drained, an optional trailing `\r` is dropped, empty lines are skipped and invalid
//! UTF-8 is replaced, since operator display strings may be localized.

use crate::error::EncodeError;
use bytes::{Buf, BytesMut};
use std::fmt;

const FIELD_SEPARATOR: char = ';';
const RECORD_TERMINATOR: u8 = b'\n';
const RESERVED: [char; 3] = [';', '\n', '\r'];

/// One control record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    /// Command identifier
    pub head: String,
    /// Positional fields, possibly empty strings
    pub args: Vec<String>,
}

impl Record {
    pub fn new<I, S>(head: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            head: head.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Record with no fields, such as `HEARTBEAT` or `TOKEN_OK`
    pub fn bare(head: impl Into<String>) -> Self {
        Self {
            head: head.into(),
            args: Vec::new(),
        }
    }

    /// Parse one line without its terminator
    pub fn from_line(line: &str) -> Self {
        let mut fields = line.split(FIELD_SEPARATOR);
        let head = fields.next().unwrap_or_default().to_string();
        Self {
            head,
            args: fields.map(str::to_string).collect(),
        }
    }

    /// Render the record without the terminator (used for logs and error echoes)
    pub fn to_line(&self) -> String {
        let mut line = self.head.clone();
        for arg in &self.args {
            line.push(FIELD_SEPARATOR);
            line.push_str(arg);
        }
        line
    }

    /// Frame the record for the wire
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        encode(&self.head, &self.args)
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

/// Encode a head and its fields into one newline-terminated record
pub fn encode<S: AsRef<str>>(head: &str, args: &[S]) -> Result<Vec<u8>, EncodeError> {
    if head.is_empty() {
        return Err(EncodeError::EmptyHead);
    }
    check_field(0, head)?;

    let mut out = Vec::with_capacity(head.len() + 1 + args.iter().map(|a| a.as_ref().len() + 1).sum::<usize>());
    out.extend_from_slice(head.as_bytes());
    for (i, arg) in args.iter().enumerate() {
        let arg = arg.as_ref();
        check_field(i + 1, arg)?;
        out.push(FIELD_SEPARATOR as u8);
        out.extend_from_slice(arg.as_bytes());
    }
    out.push(RECORD_TERMINATOR);
    Ok(out)
}

fn check_field(field: usize, text: &str) -> Result<(), EncodeError> {
    match text.chars().find(|c| RESERVED.contains(c)) {
        Some(ch) => Err(EncodeError::ReservedChar { field, ch }),
        None => Ok(()),
    }
}

/// Per-session receive accumulator
#[derive(Debug, Default)]
pub struct RecordDecoder {
    pending: BytesMut,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes and iterate over every complete record
    ///
    /// A trailing partial record stays buffered for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Records<'_> {
        self.pending.extend_from_slice(bytes);
        Records {
            pending: &mut self.pending,
        }
    }

    /// Bytes of an incomplete record waiting for their terminator
    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Iterator over the complete records currently buffered
pub struct Records<'a> {
    pending: &'a mut BytesMut,
}

impl Iterator for Records<'_> {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        loop {
            let end = self.pending.iter().position(|&b| b == RECORD_TERMINATOR)?;
            let mut line = self.pending.split_to(end);
            self.pending.advance(1);

            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if line.is_empty() {
                continue;
            }
            return Some(Record::from_line(&String::from_utf8_lossy(&line)));
        }
    }
}
