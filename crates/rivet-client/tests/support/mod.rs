//! In-memory server harness shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rivet_client::{BoxStream, Client, ClientConfig, Dialer, Logger};
use rivet_wire::{Request, Response, WireCodec};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};

const WAIT: Duration = Duration::from_secs(5);

/// Dialer handing out in-memory pipes to registered listeners
#[derive(Default)]
pub struct MockDialer {
    listeners: Mutex<HashMap<String, mpsc::UnboundedSender<DuplexStream>>>,
    delays: Mutex<HashMap<String, Duration>>,
    dials: AtomicUsize,
}

impl MockDialer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Accept connections for `addr`; dials to unregistered addresses are refused
    pub fn listen(&self, addr: &str) -> Listener {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().insert(addr.to_string(), tx);
        Listener {
            addr: addr.to_string(),
            incoming: rx,
        }
    }

    /// Make every dial to `addr` take `delay` before connecting
    pub fn delay(&self, addr: &str, delay: Duration) {
        self.delays.lock().insert(addr.to_string(), delay);
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, addr: &str) -> io::Result<BoxStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().get(addr).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let (client, server) = tokio::io::duplex(64 * 1024);
        let listener = self.listeners.lock().get(addr).cloned();
        match listener {
            Some(tx) if tx.send(server).is_ok() => Ok(Box::new(client)),
            _ => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{} refused", addr),
            )),
        }
    }
}

pub struct Listener {
    pub addr: String,
    incoming: mpsc::UnboundedReceiver<DuplexStream>,
}

impl Listener {
    pub async fn accept(&mut self) -> FakeServer {
        let stream = timeout(WAIT, self.incoming.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("dialer dropped");
        let (r, w) = tokio::io::split(stream);
        FakeServer {
            reader: FramedRead::new(r, WireCodec::new()),
            writer: FramedWrite::new(w, WireCodec::new()),
        }
    }
}

/// Server side of one connection; dropping it closes the stream
pub struct FakeServer {
    reader: FramedRead<ReadHalf<DuplexStream>, WireCodec>,
    writer: FramedWrite<WriteHalf<DuplexStream>, WireCodec>,
}

impl FakeServer {
    pub async fn recv(&mut self) -> Request {
        let value = timeout(WAIT, self.reader.next())
            .await
            .expect("timed out waiting for a request")
            .expect("client closed the stream")
            .expect("undecodable request");
        Request::from_value(&value).expect("malformed request")
    }

    /// Next request, or `None` if nothing arrives within `within`
    pub async fn recv_within(&mut self, within: Duration) -> Option<Request> {
        match timeout(within, self.reader.next()).await {
            Ok(Some(Ok(value))) => Request::from_value(&value).ok(),
            _ => None,
        }
    }

    pub async fn reply(&mut self, response: Response) {
        self.writer
            .send(response.to_value())
            .await
            .expect("client closed the stream");
    }
}

/// Logger keeping every line for later inspection
#[derive(Default)]
pub struct RecordingLogger {
    lines: Mutex<Vec<(&'static str, String)>>,
}

impl RecordingLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self, level: &str, needle: &str) -> usize {
        self.lines
            .lock()
            .iter()
            .filter(|(l, line)| *l == level && line.contains(needle))
            .count()
    }

    fn push(&self, level: &'static str, args: fmt::Arguments<'_>) {
        self.lines.lock().push((level, args.to_string()));
    }
}

impl Logger for RecordingLogger {
    fn debug(&self, args: fmt::Arguments<'_>) {
        self.push("debug", args);
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        self.push("warn", args);
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        self.push("error", args);
    }
}

/// Connect a client through `dialer` to `addrs`, in order
pub async fn connect(dialer: &Arc<MockDialer>, log: &Arc<RecordingLogger>, addrs: &[&str]) -> Client {
    let config = ClientConfig::default().addrs(addrs.iter().copied());
    Client::with_dialer(config, dialer.clone(), log.clone())
        .await
        .expect("connect")
}
