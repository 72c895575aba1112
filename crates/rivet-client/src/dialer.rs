//! Stream establishment
//!
//! The client only needs a duplex byte stream per address. Production code
//! dials TCP; tests hand out in-memory pipes.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Any duplex byte stream the client can run a connection over
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxStream = Box<dyn AsyncStream>;

/// Opens streams to `host:port` addresses
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self, addr: &str) -> io::Result<BoxStream>;
}

/// Plain TCP dialer
#[derive(Debug, Clone, Copy)]
pub struct TcpDialer {
    nodelay: bool,
}

impl TcpDialer {
    pub fn new(nodelay: bool) -> Self {
        Self { nodelay }
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &str) -> io::Result<BoxStream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(self.nodelay)?;
        Ok(Box::new(stream))
    }
}
