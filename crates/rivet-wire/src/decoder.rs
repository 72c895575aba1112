//! Incremental wire decoder
//!
//! The decoder never needs a whole message up front. Bytes are fed in
//! whatever chunks the transport produces; partially read headers, byte
//! strings and sequences are carried over between calls.

use bytes::BytesMut;
use std::collections::VecDeque;

use crate::{DecodeError, Value};

/// Largest byte string accepted (64MB)
pub const MAX_BULK_LEN: u64 = 64 * 1024 * 1024;
/// Largest sequence count accepted
pub const MAX_SEQ_LEN: u64 = 1024 * 1024;
/// Deepest sequence nesting accepted
pub const MAX_DEPTH: usize = 64;

// Long enough for i64::MIN
const MAX_HEADER_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Int,
    Bulk,
    Seq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for a type byte
    Lead,
    /// Reading the digits after a type byte
    Header { kind: Kind, cr: bool },
    /// Copying raw byte-string payload
    Bulk { remaining: usize },
    /// Expecting the CRLF after a byte-string payload
    Trailer { cr: bool },
}

/// A sequence whose elements are still arriving
#[derive(Debug)]
struct Partial {
    remaining: usize,
    items: Vec<Value>,
}

/// Streaming decoder producing top-level [`Value`]s in arrival order.
///
/// Completed values are queued and drained with [`next_value`]. A failed
/// [`feed`] poisons the decoder: every later call returns the same error and
/// nothing past the failure point is ever queued.
///
/// ```
/// use rivet_wire::{Value, WireDecoder};
///
/// let mut decoder = WireDecoder::new();
/// decoder.feed(b"$3\r\nfo").unwrap();
/// assert_eq!(decoder.next_value(), None);
/// decoder.feed(b"o\r\n").unwrap();
/// assert_eq!(decoder.next_value(), Some(Value::from("foo")));
/// ```
///
/// [`next_value`]: WireDecoder::next_value
/// [`feed`]: WireDecoder::feed
#[derive(Debug)]
pub struct WireDecoder {
    state: State,
    line: Vec<u8>,
    bulk: BytesMut,
    stack: Vec<Partial>,
    ready: VecDeque<Value>,
    failure: Option<DecodeError>,
}

impl Default for WireDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl WireDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Lead,
            line: Vec::with_capacity(MAX_HEADER_LEN),
            bulk: BytesMut::new(),
            stack: Vec::new(),
            ready: VecDeque::new(),
            failure: None,
        }
    }

    /// Feed the next chunk of the stream.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), DecodeError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        let mut pos = 0;
        while pos < chunk.len() {
            match self.step(&chunk[pos..]) {
                Ok(consumed) => pos += consumed,
                Err(err) => {
                    self.failure = Some(err.clone());
                    self.stack.clear();
                    self.bulk.clear();
                    self.line.clear();
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Pop the oldest fully decoded top-level value
    pub fn next_value(&mut self) -> Option<Value> {
        self.ready.pop_front()
    }

    /// The error that poisoned this decoder, if any
    pub fn failure(&self) -> Option<&DecodeError> {
        self.failure.as_ref()
    }

    /// True when no partially decoded value is buffered
    pub fn is_idle(&self) -> bool {
        self.state == State::Lead && self.stack.is_empty()
    }

    /// Consume a prefix of `input`, returning how many bytes were used.
    fn step(&mut self, input: &[u8]) -> Result<usize, DecodeError> {
        let byte = input[0];
        match self.state {
            State::Lead => {
                let kind = match byte {
                    b':' => Kind::Int,
                    b'$' => Kind::Bulk,
                    b'*' => Kind::Seq,
                    other => return Err(DecodeError::UnexpectedByte(other)),
                };
                self.line.clear();
                self.state = State::Header { kind, cr: false };
                Ok(1)
            }
            State::Header { kind, cr: false } => {
                if byte == b'\r' {
                    self.state = State::Header { kind, cr: true };
                } else if self.line.len() >= MAX_HEADER_LEN {
                    return Err(DecodeError::HeaderTooLong);
                } else {
                    self.line.push(byte);
                }
                Ok(1)
            }
            State::Header { kind, cr: true } => {
                if byte != b'\n' {
                    return Err(DecodeError::MissingCrlf);
                }
                self.finish_header(kind)?;
                Ok(1)
            }
            State::Bulk { remaining } => {
                let take = remaining.min(input.len());
                self.bulk.extend_from_slice(&input[..take]);
                self.state = if take == remaining {
                    State::Trailer { cr: false }
                } else {
                    State::Bulk { remaining: remaining - take }
                };
                Ok(take)
            }
            State::Trailer { cr: false } => {
                if byte != b'\r' {
                    return Err(DecodeError::MissingCrlf);
                }
                self.state = State::Trailer { cr: true };
                Ok(1)
            }
            State::Trailer { cr: true } => {
                if byte != b'\n' {
                    return Err(DecodeError::MissingCrlf);
                }
                let payload = self.bulk.split().freeze();
                self.complete(Value::Bytes(payload));
                Ok(1)
            }
        }
    }

    fn finish_header(&mut self, kind: Kind) -> Result<(), DecodeError> {
        match kind {
            Kind::Int => {
                let n = parse_int(&self.line)?;
                self.complete(Value::Int(n));
            }
            Kind::Bulk => {
                let len = parse_len(&self.line)?;
                if len > MAX_BULK_LEN {
                    return Err(DecodeError::BulkTooLarge(len));
                }
                self.bulk.clear();
                self.bulk.reserve((len as usize).min(64 * 1024));
                self.state = if len == 0 {
                    State::Trailer { cr: false }
                } else {
                    State::Bulk { remaining: len as usize }
                };
            }
            Kind::Seq => {
                let count = parse_len(&self.line)?;
                if count > MAX_SEQ_LEN {
                    return Err(DecodeError::SequenceTooLarge(count));
                }
                if count == 0 {
                    self.complete(Value::Seq(Vec::new()));
                } else {
                    if self.stack.len() >= MAX_DEPTH {
                        return Err(DecodeError::TooDeep(MAX_DEPTH));
                    }
                    self.stack.push(Partial {
                        remaining: count as usize,
                        items: Vec::with_capacity(count.min(1024) as usize),
                    });
                    self.state = State::Lead;
                }
            }
        }
        Ok(())
    }

    /// Attach a finished value to its parent sequence, folding up every
    /// sequence it completes; top-level values go to the ready queue.
    fn complete(&mut self, mut value: Value) {
        self.state = State::Lead;
        loop {
            let Some(top) = self.stack.last_mut() else {
                self.ready.push_back(value);
                return;
            };
            top.items.push(value);
            top.remaining -= 1;
            if top.remaining > 0 {
                return;
            }
            let items = std::mem::take(&mut top.items);
            self.stack.pop();
            value = Value::Seq(items);
        }
    }
}

fn malformed(line: &[u8]) -> DecodeError {
    DecodeError::MalformedHeader(String::from_utf8_lossy(line).into_owned())
}

fn parse_int(line: &[u8]) -> Result<i64, DecodeError> {
    let digits = line.strip_prefix(b"-").unwrap_or(line);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(malformed(line));
    }
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| malformed(line))
}

fn parse_len(line: &[u8]) -> Result<u64, DecodeError> {
    if line.is_empty() || !line.iter().all(u8::is_ascii_digit) {
        return Err(malformed(line));
    }
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| malformed(line))
}
