//! Single-flight replacement of the active connection

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::{ClientError, Connection, Dialer, Logger, Result};

/// Owns the active connection and the candidate address list.
///
/// Addresses are consumed head-first and never re-added. Concurrent
/// reconnect requests for the same failed generation collapse into one
/// dial; late arrivals get whatever connection replaced it.
pub struct Reconnector {
    dialer: Arc<dyn Dialer>,
    log: Arc<dyn Logger>,
    current: Mutex<Option<Arc<Connection>>>,
    addrs: Mutex<VecDeque<String>>,
    gate: tokio::sync::Mutex<()>,
    generation: AtomicU64,
}

impl Reconnector {
    /// Dial the first reachable candidate
    pub async fn connect<I, S>(addrs: I, dialer: Arc<dyn Dialer>, log: Arc<dyn Logger>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let reconnector = Self {
            dialer,
            log,
            current: Mutex::new(None),
            addrs: Mutex::new(addrs.into_iter().map(Into::into).collect()),
            gate: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
        };

        let conn = reconnector.dial_next().await?;
        *reconnector.current.lock() = Some(conn);
        Ok(reconnector)
    }

    /// The active connection
    pub fn current(&self) -> Result<Arc<Connection>> {
        self.current.lock().clone().ok_or(ClientError::NoMoreAddrs)
    }

    /// Replace the connection of generation `failed`.
    ///
    /// Returns the current connection without dialing when `failed` has
    /// already been superseded. Fails with `NoMoreAddrs` once every
    /// candidate has been tried.
    pub async fn reconnect(&self, failed: u64) -> Result<Arc<Connection>> {
        let _gate = self.gate.lock().await;

        let stale = {
            let current = self.current.lock();
            match current.as_ref() {
                Some(conn) if conn.generation() != failed => return Ok(Arc::clone(conn)),
                Some(conn) => Some(Arc::clone(conn)),
                None => None,
            }
        };
        let Some(stale) = stale else {
            return Err(ClientError::NoMoreAddrs);
        };

        self.log.warn(format_args!("connection to {} lost, reconnecting", stale.addr()));
        stale.close(ClientError::Transport(format!("{}: replaced", stale.addr())));

        match self.dial_next().await {
            Ok(conn) => {
                *self.current.lock() = Some(Arc::clone(&conn));
                Ok(conn)
            }
            Err(err) => {
                *self.current.lock() = None;
                Err(err)
            }
        }
    }

    /// Remaining candidates, head first
    pub fn addrs(&self) -> Vec<String> {
        self.addrs.lock().iter().cloned().collect()
    }

    /// Replace the candidate list
    pub fn refresh_addrs<I, S>(&self, addrs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.addrs.lock() = addrs.into_iter().map(Into::into).collect();
    }

    /// Pop candidates until one dials
    async fn dial_next(&self) -> Result<Arc<Connection>> {
        loop {
            let Some(addr) = self.addrs.lock().pop_front() else {
                self.log.error(format_args!("no more addresses to connect to"));
                return Err(ClientError::NoMoreAddrs);
            };

            self.log.debug(format_args!("dialing {}", addr));
            match self.dialer.dial(&addr).await {
                Ok(stream) => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    return Ok(Connection::open(stream, addr, generation, Arc::clone(&self.log)));
                }
                Err(e) => {
                    self.log.warn(format_args!("dial {} failed: {}", addr, e));
                }
            }
        }
    }
}

impl Drop for Reconnector {
    fn drop(&mut self) {
        if let Some(conn) = self.current.get_mut().take() {
            conn.close(ClientError::Transport(format!("{}: client dropped", conn.addr())));
        }
    }
}
