//! Send side of one connected client.
//!
//! A [`PeerConnection`] exclusively owns the write half of a client's stream.
//! The read half belongs to the session task driving the connection (see
//! [`crate::session`]), so the only way to reach a peer from elsewhere is
//! [`PeerConnection::send`] and [`PeerConnection::close`].

use log::debug;
use shared::codec::write_frame;
use shared::Packet;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};

/// Connection id, unique for the lifetime of the server process.
pub type PeerId = u64;

pub type PeerWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Error)]
pub enum SendError {
    /// The stream was closed before this send was attempted.
    #[error("connection is closed")]
    Closed,
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}

pub struct PeerConnection {
    id: PeerId,
    username: String,
    addr: Option<SocketAddr>,
    connected_at: SystemTime,
    /// `None` once the stream has been shut down.
    writer: Mutex<Option<PeerWriter>>,
    closed: AtomicBool,
    /// Wakes sends that are stuck behind a client that stopped reading.
    closing: Notify,
}

impl PeerConnection {
    pub fn new<W>(id: PeerId, username: impl Into<String>, addr: Option<SocketAddr>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            username: username.into(),
            addr,
            connected_at: SystemTime::now(),
            writer: Mutex::new(Some(Box::new(writer))),
            closed: AtomicBool::new(false),
            closing: Notify::new(),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Writes one framed packet.
    ///
    /// Concurrent callers are serialized on the writer, so frames from two
    /// broadcasts never interleave. A failed write may leave half a frame on
    /// the wire, so the peer is closed before the error is returned.
    ///
    /// A send waiting for the writer, or blocked on a full socket buffer,
    /// gives up with [`SendError::Closed`] as soon as [`close`] is called.
    ///
    /// [`close`]: PeerConnection::close
    pub async fn send(&self, packet: &Packet) -> Result<(), SendError> {
        let closing = self.closing.notified();
        tokio::pin!(closing);
        // Registered before the flag check so a concurrent close is not missed.
        closing.as_mut().enable();

        if self.is_closed() {
            return Err(SendError::Closed);
        }

        let mut guard = tokio::select! {
            guard = self.writer.lock() => guard,
            _ = &mut closing => return Err(SendError::Closed),
        };
        let writer = guard.as_mut().ok_or(SendError::Closed)?;

        let written = tokio::select! {
            written = write_frame(writer, packet) => Some(written),
            _ = &mut closing => None,
        };
        let Some(written) = written else {
            // close() takes the writer once the guard is released.
            return Err(SendError::Closed);
        };
        if let Err(e) = written {
            self.closed.store(true, Ordering::Release);
            if let Some(mut writer) = guard.take() {
                let _ = writer.shutdown().await;
            }
            return Err(SendError::Io(e));
        }

        Ok(())
    }

    /// Shuts the stream down. Safe to call any number of times; errors are
    /// swallowed.
    ///
    /// Never waits behind a blocked send: pending sends are cancelled first.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.closing.notify_waiters();

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("Ignoring error while closing peer {}: {}", self.id, e);
            }
        }
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}
