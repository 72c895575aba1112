//! One physical stream multiplexing many tagged calls

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rivet_wire::{Response, Value, WireCodec};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::{BoxStream, ClientError, Logger, PendingCall, Result};

/// What a connection delivers to the driver of one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    Progress(Response),
    Done,
    Error(ClientError),
}

#[derive(Default)]
struct Table {
    /// Set once the connection has failed; every later send gets a copy
    closed: Option<ClientError>,
    next_tag: u32,
    calls: HashMap<u32, mpsc::UnboundedSender<Reply>>,
}

impl Table {
    /// Next tag not held by an in-flight call
    fn allocate(&mut self) -> u32 {
        loop {
            let tag = self.next_tag;
            self.next_tag = self.next_tag.wrapping_add(1);
            if !self.calls.contains_key(&tag) {
                return tag;
            }
        }
    }
}

/// A live stream to one server.
///
/// A reader task decodes inbound frames and routes them by tag; a writer
/// task serializes outbound frames. Any stream failure closes the
/// connection and fails every registered call with a transport error.
pub struct Connection {
    addr: String,
    generation: u64,
    table: Mutex<Table>,
    outbound: mpsc::UnboundedSender<Value>,
    shutdown: CancellationToken,
    log: Arc<dyn Logger>,
}

impl Connection {
    /// Start the reader and writer tasks over `stream`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(
        stream: BoxStream,
        addr: impl Into<String>,
        generation: u64,
        log: Arc<dyn Logger>,
    ) -> Arc<Self> {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let conn = Arc::new(Self {
            addr: addr.into(),
            generation,
            table: Mutex::new(Table::default()),
            outbound,
            shutdown: CancellationToken::new(),
            log,
        });

        tokio::spawn(Arc::clone(&conn).read_loop(reader));
        tokio::spawn(Arc::clone(&conn).write_loop(writer, outbound_rx));

        conn
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.table.lock().closed.is_some()
    }

    /// Number of tags currently registered
    pub fn in_flight(&self) -> usize {
        self.table.lock().calls.len()
    }

    /// Transmit `call` under a fresh tag and register for its replies
    pub(crate) fn send(
        &self,
        call: &PendingCall,
    ) -> Result<(u32, mpsc::UnboundedReceiver<Reply>)> {
        let (tx, rx) = mpsc::unbounded_channel();

        let tag = {
            let mut table = self.table.lock();
            if let Some(reason) = &table.closed {
                return Err(reason.clone());
            }
            let tag = table.allocate();
            table.calls.insert(tag, tx);
            tag
        };

        if self.outbound.send(call.request(tag).to_value()).is_err() {
            self.release(tag);
            return Err(ClientError::Transport(format!("{}: writer stopped", self.addr)));
        }

        Ok((tag, rx))
    }

    /// Forget a tag whose caller has gone away
    pub(crate) fn release(&self, tag: u32) {
        self.table.lock().calls.remove(&tag);
    }

    /// Fail every registered call and stop both tasks. Idempotent.
    pub fn close(&self, reason: ClientError) {
        let calls = {
            let mut table = self.table.lock();
            if table.closed.is_some() {
                return;
            }
            table.closed = Some(reason.clone());
            std::mem::take(&mut table.calls)
        };

        if !calls.is_empty() {
            self.log.error(format_args!(
                "connection to {} failed with {} calls in flight: {}",
                self.addr,
                calls.len(),
                reason
            ));
        }
        for (_, tx) in calls {
            let _ = tx.send(Reply::Error(reason.clone()));
        }

        self.shutdown.cancel();
    }

    fn dispatch(&self, response: Response) {
        let tag = response.tag;

        if let Some(err) = ClientError::from_response(&response) {
            let sender = self.table.lock().calls.remove(&tag);
            let redirected = matches!(err, ClientError::Redirect(_));
            match sender {
                Some(tx) => {
                    let _ = tx.send(Reply::Error(err));
                }
                None => self.unknown_tag(tag),
            }
            if redirected {
                self.close(ClientError::Transport(format!("{}: redirected", self.addr)));
            }
            return;
        }

        let mut table = self.table.lock();
        let Some(tx) = table.calls.get(&tag) else {
            drop(table);
            self.unknown_tag(tag);
            return;
        };

        let done = response.is_done();
        if response.is_valid() {
            let _ = tx.send(Reply::Progress(response));
        }
        if done {
            if let Some(tx) = table.calls.remove(&tag) {
                let _ = tx.send(Reply::Done);
            }
        }
    }

    fn unknown_tag(&self, tag: u32) {
        self.log
            .debug(format_args!("{}: dropping response for unknown tag {}", self.addr, tag));
    }

    async fn read_loop(self: Arc<Self>, reader: ReadHalf<BoxStream>) {
        let mut frames = FramedRead::new(reader, WireCodec::new());

        let reason = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                frame = frames.next() => match frame {
                    Some(Ok(value)) => match Response::from_value(&value) {
                        Ok(response) => self.dispatch(response),
                        Err(e) => break ClientError::from(e),
                    },
                    Some(Err(e)) => break ClientError::from(e),
                    None => break ClientError::Transport(format!("{}: closed by peer", self.addr)),
                },
            }
        };

        self.close(reason);
    }

    async fn write_loop(
        self: Arc<Self>,
        writer: WriteHalf<BoxStream>,
        mut outbound: mpsc::UnboundedReceiver<Value>,
    ) {
        let mut frames = FramedWrite::new(writer, WireCodec::new());

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                value = outbound.recv() => {
                    let Some(value) = value else { break };
                    if let Err(e) = frames.send(value).await {
                        self.close(ClientError::Transport(format!("{}: write failed: {}", self.addr, e)));
                        break;
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.addr)
            .field("generation", &self.generation)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoopLogger;
    use rivet_wire::{ErrorCode, Request, Verb};
    use tokio::io::DuplexStream;

    struct Peer {
        reader: FramedRead<ReadHalf<DuplexStream>, WireCodec>,
        writer: FramedWrite<WriteHalf<DuplexStream>, WireCodec>,
    }

    impl Peer {
        async fn recv(&mut self) -> Request {
            let value = self.reader.next().await.unwrap().unwrap();
            Request::from_value(&value).unwrap()
        }

        async fn reply(&mut self, response: Response) {
            self.writer.send(response.to_value()).await.unwrap();
        }
    }

    fn pair() -> (Arc<Connection>, Peer) {
        let (client, server) = tokio::io::duplex(4096);
        let conn = Connection::open(Box::new(client), "test:1", 1, Arc::new(NoopLogger));
        let (r, w) = tokio::io::split(server);
        let peer = Peer {
            reader: FramedRead::new(r, WireCodec::new()),
            writer: FramedWrite::new(w, WireCodec::new()),
        };
        (conn, peer)
    }

    #[tokio::test]
    async fn test_send_and_complete() {
        let (conn, mut peer) = pair();
        let call = PendingCall::new(Verb::Get).with_path("/a");

        let (tag, mut replies) = conn.send(&call).unwrap();
        let request = peer.recv().await;
        assert_eq!(request.tag, tag);
        assert_eq!(request.verb, Verb::Get);
        assert_eq!(request.path.as_deref(), Some("/a"));

        peer.reply(Response::valid_done(tag).with_rev(3).with_value("x")).await;

        match replies.recv().await.unwrap() {
            Reply::Progress(response) => assert_eq!(response.rev, Some(3)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(replies.recv().await.unwrap(), Reply::Done);
        assert_eq!(conn.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_tags_are_distinct() {
        let (conn, _peer) = pair();
        let call = PendingCall::new(Verb::Nop);

        let (a, _ra) = conn.send(&call).unwrap();
        let (b, _rb) = conn.send(&call).unwrap();
        let (c, _rc) = conn.send(&call).unwrap();
        assert!(a != b && b != c && a != c);
        assert_eq!(conn.in_flight(), 3);
    }

    #[test]
    fn test_allocate_skips_tags_in_use() {
        let mut table = Table {
            next_tag: u32::MAX,
            ..Default::default()
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        table.calls.insert(0, tx);

        assert_eq!(table.allocate(), u32::MAX);
        assert_eq!(table.allocate(), 1);
    }

    #[tokio::test]
    async fn test_streaming_keeps_tag_open() {
        let (conn, mut peer) = pair();
        let (tag, mut replies) = conn.send(&PendingCall::new(Verb::Watch).with_path("/**")).unwrap();
        peer.recv().await;

        peer.reply(Response::valid(tag).with_rev(1)).await;
        peer.reply(Response::valid(tag).with_rev(2)).await;

        assert!(matches!(replies.recv().await, Some(Reply::Progress(_))));
        assert!(matches!(replies.recv().await, Some(Reply::Progress(_))));
        assert_eq!(conn.in_flight(), 1);

        peer.reply(Response::done(tag)).await;
        assert_eq!(replies.recv().await, Some(Reply::Done));
        assert_eq!(conn.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_application_error_retires_tag() {
        let (conn, mut peer) = pair();
        let (tag, mut replies) = conn.send(&PendingCall::new(Verb::Get).with_path("/nope")).unwrap();
        peer.recv().await;

        peer.reply(Response::error(tag, ErrorCode::NoEnt, "/nope")).await;

        assert_eq!(
            replies.recv().await,
            Some(Reply::Error(ClientError::Server {
                code: ErrorCode::NoEnt,
                detail: "/nope".to_string()
            }))
        );
        assert_eq!(conn.in_flight(), 0);
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_redirect_closes_connection() {
        let (conn, mut peer) = pair();
        let (a, mut ra) = conn.send(&PendingCall::new(Verb::Get).with_path("/a")).unwrap();
        let (_b, mut rb) = conn.send(&PendingCall::new(Verb::Get).with_path("/b")).unwrap();
        peer.recv().await;
        peer.recv().await;

        peer.reply(Response::error(a, ErrorCode::Redirect, "10.0.0.2:8046")).await;

        assert_eq!(
            ra.recv().await,
            Some(Reply::Error(ClientError::Redirect("10.0.0.2:8046".to_string())))
        );
        assert!(matches!(rb.recv().await, Some(Reply::Error(ClientError::Transport(_)))));
        assert!(conn.is_closed());
        assert!(matches!(
            conn.send(&PendingCall::new(Verb::Nop)),
            Err(ClientError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_peer_close_fails_all_calls() {
        let (conn, peer) = pair();
        let (_, mut ra) = conn.send(&PendingCall::new(Verb::Rev)).unwrap();
        let (_, mut rb) = conn.send(&PendingCall::new(Verb::Watch).with_path("/**")).unwrap();

        drop(peer);

        for replies in [&mut ra, &mut rb] {
            match replies.recv().await {
                Some(Reply::Error(err)) => assert!(err.is_retryable()),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_decode_failure_fails_calls() {
        let (client, mut server) = tokio::io::duplex(1024);
        let conn = Connection::open(Box::new(client), "test:1", 1, Arc::new(NoopLogger));
        let (_, mut replies) = conn.send(&PendingCall::new(Verb::Rev)).unwrap();

        use tokio::io::AsyncWriteExt;
        server.write_all(b"?garbage\r\n").await.unwrap();

        assert!(matches!(
            replies.recv().await,
            Some(Reply::Error(ClientError::Decode(_)))
        ));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_unknown_tag_is_ignored() {
        let (conn, mut peer) = pair();
        let (tag, mut replies) = conn.send(&PendingCall::new(Verb::Rev)).unwrap();
        peer.recv().await;

        peer.reply(Response::valid_done(tag + 100)).await;
        peer.reply(Response::valid_done(tag).with_rev(9)).await;

        assert!(matches!(replies.recv().await, Some(Reply::Progress(r)) if r.rev == Some(9)));
        assert!(!conn.is_closed());
    }
}
