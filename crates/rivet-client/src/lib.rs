//! Client for the rivet coordination store
//!
//! One persistent stream carries many concurrent calls, each identified by a
//! tag. Reads and watches are resent transparently after a disconnect;
//! writes are resent only when guarded by a known revision.
//!
//! ```no_run
//! # use rivet_client::{Client, ClientConfig};
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::connect_uri("doozer:?ca=127.0.0.1:8046&ca=127.0.0.1:8047").await?;
//!
//! client.set("/hello", "world", rivet_client::rev::MISSING).one().await?;
//! let entry = client.get("/hello", None).one().await?;
//! println!("{:?} @ {:?}", entry.value, entry.rev);
//! # Ok(())
//! # }
//! ```

mod call;
mod client;
mod config;
mod connection;
mod dialer;
mod error;
mod logger;
mod reconnect;

pub use call::{CallEvent, CallHandle, CallState, Outcome, PendingCall, RetryPolicy};
pub use client::Client;
pub use config::{ClientConfig, DEFAULT_ADDR, URI_ENV};
pub use connection::Connection;
pub use dialer::{AsyncStream, BoxStream, Dialer, TcpDialer};
pub use error::{ClientError, ErrorKind, Result};
pub use logger::{Logger, NoopLogger, TracingLogger};
pub use reconnect::Reconnector;

// Re-export wire types callers see in results
pub use rivet_wire::{rev, ErrorCode, Response, Verb};
