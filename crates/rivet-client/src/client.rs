//! Public verb API and the per-call retry driver

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::call::{CallEvent, CallHandle, Outcome, PendingCall, RetryPolicy};
use crate::connection::Reply;
use crate::{
    ClientConfig, ClientError, Connection, Dialer, Logger, NoopLogger, Reconnector, Result,
    TcpDialer, Verb,
};

struct Inner {
    reconnector: Reconnector,
    log: Arc<dyn Logger>,
}

/// Client for the rivet coordination store.
///
/// Cheap to clone; clones share one connection. Every verb returns a
/// [`CallHandle`] at once and runs in its own task, so verbs must be
/// invoked from within a tokio runtime.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Connect over TCP to the first reachable address in `config`
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let dialer = Arc::new(TcpDialer::new(config.nodelay));
        Self::with_dialer(config, dialer, Arc::new(NoopLogger)).await
    }

    /// Connect using a `doozer:?ca=host:port&...` URI
    pub async fn connect_uri(uri: &str) -> Result<Self> {
        Self::connect(ClientConfig::from_uri(uri)?).await
    }

    /// Connect with explicit stream and logging collaborators
    pub async fn with_dialer(
        config: ClientConfig,
        dialer: Arc<dyn Dialer>,
        log: Arc<dyn Logger>,
    ) -> Result<Self> {
        if config.addrs.is_empty() {
            return Err(ClientError::Config("no addresses configured".to_string()));
        }
        let reconnector = Reconnector::connect(config.addrs, dialer, Arc::clone(&log)).await?;
        Ok(Self {
            inner: Arc::new(Inner { reconnector, log }),
        })
    }

    /// Address of the active connection, if any remains
    pub fn addr(&self) -> Option<String> {
        self.inner
            .reconnector
            .current()
            .ok()
            .map(|conn| conn.addr().to_string())
    }

    /// Candidates not yet tried, head first
    pub fn addrs(&self) -> Vec<String> {
        self.inner.reconnector.addrs()
    }

    /// Replace the candidate list used by later reconnects
    pub fn refresh_addrs<I, S>(&self, addrs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.reconnector.refresh_addrs(addrs)
    }

    /// Read the body and revision of the file at `path`
    pub fn get(&self, path: &str, rev: Option<i64>) -> CallHandle {
        self.call(PendingCall::new(Verb::Get).with_path(path).with_rev(rev))
    }

    /// Write `value` to `path`.
    ///
    /// `rev` is the revision the file must currently have: a positive
    /// revision, [`rev::MISSING`](crate::rev::MISSING) or
    /// [`rev::CLOBBER`](crate::rev::CLOBBER). Only the first kind is resent
    /// after a disconnect.
    pub fn set(&self, path: &str, value: impl Into<Bytes>, rev: i64) -> CallHandle {
        self.call(
            PendingCall::new(Verb::Set)
                .with_path(path)
                .with_value(value)
                .with_rev(Some(rev)),
        )
    }

    /// Delete `path`, guarded by `rev` as for [`Client::set`]
    pub fn del(&self, path: &str, rev: i64) -> CallHandle {
        self.call(PendingCall::new(Verb::Del).with_path(path).with_rev(Some(rev)))
    }

    /// List the children of the directory at `path`, one result each
    pub fn getdir(
        &self,
        path: &str,
        rev: Option<i64>,
        offset: Option<i64>,
        limit: Option<i64>,
    ) -> CallHandle {
        self.call(
            PendingCall::new(Verb::GetDir)
                .with_path(path)
                .with_rev(rev)
                .with_offset(Some(offset.unwrap_or(0)))
                .with_limit(limit),
        )
    }

    /// Every file matching `glob`, one result each
    pub fn walk(
        &self,
        glob: &str,
        rev: Option<i64>,
        offset: Option<i64>,
        limit: Option<i64>,
    ) -> CallHandle {
        self.call(
            PendingCall::new(Verb::Walk)
                .with_path(glob)
                .with_rev(rev)
                .with_offset(Some(offset.unwrap_or(0)))
                .with_limit(limit),
        )
    }

    /// Stream changes to files matching `glob` from `rev` on
    pub fn watch(&self, glob: &str, rev: Option<i64>) -> CallHandle {
        self.call(PendingCall::new(Verb::Watch).with_path(glob).with_rev(rev))
    }

    /// Current store revision
    pub fn rev(&self) -> CallHandle {
        self.call(PendingCall::new(Verb::Rev))
    }

    /// Metadata (length, revision) of `path`
    pub fn stat(&self, path: &str, rev: Option<i64>) -> CallHandle {
        self.call(PendingCall::new(Verb::Stat).with_path(path).with_rev(rev))
    }

    /// Liveness round trip
    pub fn nop(&self) -> CallHandle {
        self.call(PendingCall::new(Verb::Nop))
    }

    /// Run an arbitrary call under its verb's retry policy
    pub fn call(&self, call: PendingCall) -> CallHandle {
        let (events, rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(Arc::clone(&self.inner), call, events));
        CallHandle::new(rx)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("addr", &self.addr())
            .field("addrs", &self.addrs())
            .finish()
    }
}

enum Pumped {
    /// Resolved, or abandoned by the caller
    Finished,
    /// Lost to a transport or redirect failure
    Interrupted(ClientError),
}

/// Take a call from `Unsent` to `Terminal`, resending across reconnects as
/// its policy allows.
async fn drive(inner: Arc<Inner>, mut call: PendingCall, events: mpsc::UnboundedSender<CallEvent>) {
    let policy = RetryPolicy::for_verb(call.verb());
    let log = &inner.log;

    let mut conn = match inner.reconnector.current() {
        Ok(conn) => conn,
        Err(err) => return fail(&mut call, &events, err),
    };
    let mut resend = false;

    loop {
        if events.is_closed() {
            log.debug(format_args!("{} abandoned by caller", call));
            call.finish(Outcome::Failed);
            return;
        }

        let failure = match conn.send(&call) {
            Ok((tag, replies)) => {
                call.mark_sent(tag);
                if resend {
                    log.debug(format_args!("resend {} to {}", call, conn.addr()));
                } else {
                    log.debug(format_args!("send {} to {}", call, conn.addr()));
                }
                match pump(&mut call, &conn, tag, replies, &events).await {
                    Pumped::Finished => return,
                    Pumped::Interrupted(err) => err,
                }
            }
            Err(err) => err,
        };

        if !failure.is_retryable() {
            return fail(&mut call, &events, failure);
        }

        log.error(format_args!("{} interrupted: {}", call, failure));
        call.mark_awaiting_reconnect();

        conn = match inner.reconnector.reconnect(conn.generation()).await {
            Ok(conn) => conn,
            Err(err) => return fail(&mut call, &events, err),
        };

        if !policy.may_resend(&call) {
            return fail(&mut call, &events, ClientError::Disconnected);
        }
        resend = true;
    }
}

/// Forward one transmission's replies until it resolves or is interrupted
async fn pump(
    call: &mut PendingCall,
    conn: &Connection,
    tag: u32,
    mut replies: mpsc::UnboundedReceiver<Reply>,
    events: &mpsc::UnboundedSender<CallEvent>,
) -> Pumped {
    loop {
        let reply = tokio::select! {
            reply = replies.recv() => reply,
            _ = events.closed() => {
                conn.release(tag);
                return Pumped::Finished;
            }
        };

        match reply {
            Some(Reply::Progress(response)) => {
                call.advance(&response);
                if events.send(CallEvent::Progress(response)).is_err() {
                    conn.release(tag);
                    return Pumped::Finished;
                }
            }
            Some(Reply::Done) => {
                call.finish(Outcome::Done);
                let _ = events.send(CallEvent::Done);
                return Pumped::Finished;
            }
            Some(Reply::Error(err)) if err.is_retryable() => return Pumped::Interrupted(err),
            Some(Reply::Error(err)) => {
                fail(call, events, err);
                return Pumped::Finished;
            }
            None => {
                return Pumped::Interrupted(ClientError::Transport(format!(
                    "{}: reply channel closed",
                    conn.addr()
                )))
            }
        }
    }
}

fn fail(call: &mut PendingCall, events: &mpsc::UnboundedSender<CallEvent>, err: ClientError) {
    call.finish(Outcome::Failed);
    let _ = events.send(CallEvent::Error(err));
}
