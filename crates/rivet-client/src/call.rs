//! Pending calls and the caller-facing result stream

use bytes::Bytes;
use futures::Stream;
use rivet_wire::{FrameError, Request, Response, Verb};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::ClientError;

/// How a call reacts to losing its connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Always resend on the next connection (reads and watches)
    Resend,
    /// Resend only when guarded by a concrete revision (writes)
    Idempotent,
}

impl RetryPolicy {
    pub fn for_verb(verb: Verb) -> Self {
        match verb {
            Verb::Set | Verb::Del => RetryPolicy::Idempotent,
            _ => RetryPolicy::Resend,
        }
    }

    /// Whether `call` may go out again after a transport failure.
    ///
    /// A write against a missing path or with clobber semantics could race
    /// another client's write made while we were disconnected, so only a
    /// positive revision guard qualifies.
    pub fn may_resend(self, call: &PendingCall) -> bool {
        match self {
            RetryPolicy::Resend => true,
            RetryPolicy::Idempotent => call.is_guarded(),
        }
    }
}

/// Terminal result of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Failed,
}

/// Lifecycle of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Unsent,
    InFlight(u32),
    AwaitingReconnect,
    Terminal(Outcome),
}

/// One logical RPC.
///
/// Holds everything needed to build the request again, plus cursor state
/// that advances with each result so a resend resumes where the last
/// transmission stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCall {
    verb: Verb,
    path: Option<String>,
    rev: Option<i64>,
    value: Option<Bytes>,
    offset: Option<i64>,
    limit: Option<i64>,
    state: CallState,
}

impl PendingCall {
    pub fn new(verb: Verb) -> Self {
        Self {
            verb,
            path: None,
            rev: None,
            value: None,
            offset: None,
            limit: None,
            state: CallState::Unsent,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_rev(mut self, rev: Option<i64>) -> Self {
        self.rev = rev;
        self
    }

    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_offset(mut self, offset: Option<i64>) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: Option<i64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn rev(&self) -> Option<i64> {
        self.rev
    }

    pub fn offset(&self) -> Option<i64> {
        self.offset
    }

    pub fn limit(&self) -> Option<i64> {
        self.limit
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Tag of the current transmission, if one is in flight
    pub fn tag(&self) -> Option<u32> {
        match self.state {
            CallState::InFlight(tag) => Some(tag),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, CallState::Terminal(_))
    }

    /// True when a concrete prior revision guards the write
    pub fn is_guarded(&self) -> bool {
        self.rev.is_some_and(|rev| rev > 0)
    }

    /// Build the wire request for a transmission under `tag`
    pub fn request(&self, tag: u32) -> Request {
        Request {
            tag,
            verb: self.verb,
            path: self.path.clone(),
            value: self.value.clone(),
            offset: self.offset,
            limit: self.limit,
            rev: self.rev,
        }
    }

    /// Record one delivered result
    pub fn advance(&mut self, response: &Response) {
        if let Some(offset) = self.offset.as_mut() {
            *offset += 1;
        }
        if let Some(limit) = self.limit.as_mut() {
            *limit -= 1;
        }
        if let Some(seen) = response.rev {
            if self.rev.map_or(true, |rev| rev < seen) {
                self.rev = Some(seen);
            }
        }
    }

    pub(crate) fn mark_sent(&mut self, tag: u32) {
        self.state = CallState::InFlight(tag);
    }

    pub(crate) fn mark_awaiting_reconnect(&mut self) {
        self.state = CallState::AwaitingReconnect;
    }

    pub(crate) fn finish(&mut self, outcome: Outcome) {
        self.state = CallState::Terminal(outcome);
    }
}

impl fmt::Display for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.verb)?;
        if let Some(path) = &self.path {
            write!(f, " {}", path)?;
        }
        if let Some(tag) = self.tag() {
            write!(f, " tag={}", tag)?;
        }
        if let Some(rev) = self.rev {
            write!(f, " rev={}", rev)?;
        }
        if let Some(offset) = self.offset {
            write!(f, " offset={}", offset)?;
        }
        if let Some(limit) = self.limit {
            write!(f, " limit={}", limit)?;
        }
        Ok(())
    }
}

/// One event on a call's result stream.
///
/// Any number of `Progress` events, then exactly one `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Progress(Response),
    Done,
    Error(ClientError),
}

/// Caller's end of a call.
///
/// Returned immediately by every verb; events arrive as the server answers.
/// Dropping the handle abandons the call.
#[derive(Debug)]
pub struct CallHandle {
    events: mpsc::UnboundedReceiver<CallEvent>,
}

impl CallHandle {
    pub(crate) fn new(events: mpsc::UnboundedReceiver<CallEvent>) -> Self {
        Self { events }
    }

    /// Next event, or `None` once the terminal event has been taken
    pub async fn next(&mut self) -> Option<CallEvent> {
        self.events.recv().await
    }

    /// Wait for a single-result call to finish and return its result
    pub async fn one(mut self) -> Result<Response, ClientError> {
        let mut first = None;
        while let Some(event) = self.next().await {
            match event {
                CallEvent::Progress(response) => {
                    if first.is_none() {
                        first = Some(response);
                    }
                }
                CallEvent::Done => break,
                CallEvent::Error(err) => return Err(err),
            }
        }
        first.ok_or(ClientError::Frame(FrameError::MissingField("result")))
    }

    /// Gather every result until the call completes
    pub async fn collect(mut self) -> Result<Vec<Response>, ClientError> {
        let mut results = Vec::new();
        while let Some(event) = self.next().await {
            match event {
                CallEvent::Progress(response) => results.push(response),
                CallEvent::Done => break,
                CallEvent::Error(err) => return Err(err),
            }
        }
        Ok(results)
    }
}

impl Stream for CallHandle {
    type Item = CallEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<CallEvent>> {
        self.events.poll_recv(cx)
    }
}
