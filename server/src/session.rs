//! Lifecycle of one client connection: handshake, read loop, teardown.
//!
//! A session goes `Connecting → Active → Closing → Closed`. While connecting
//! it waits for the username frame; once active it relays movement updates
//! through the broadcaster until the client logs out, the stream fails or the
//! server shuts down. Whatever ends the loop, the peer is unregistered and its
//! stream closed exactly here, so a failure never reaches other connections.

use crate::network::{wait_for_shutdown, ServerState};
use crate::peer::{PeerConnection, PeerId};
use log::{debug, warn};
use shared::codec::{decode, read_frame};
use shared::Packet;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("connection closed before a username was received")]
    Closed,
    #[error("no username received within {0:?}")]
    TimedOut(Duration),
    #[error("empty username")]
    EmptyUsername,
    #[error("server is shutting down")]
    Shutdown,
    #[error("could not read username: {0}")]
    Io(#[from] io::Error),
}

/// Why an active session ended.
#[derive(Debug)]
pub enum CloseReason {
    Logout,
    Disconnected,
    ReadError(io::Error),
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Logout => f.write_str("logged out"),
            CloseReason::Disconnected => f.write_str("connection closed"),
            CloseReason::ReadError(e) => write!(f, "read error: {}", e),
            CloseReason::Shutdown => f.write_str("server shutting down"),
        }
    }
}

/// Reads the username frame that opens every connection.
pub async fn read_username<R>(reader: &mut R, timeout: Option<Duration>) -> Result<String, HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let frame = match timeout {
        Some(limit) => tokio::time::timeout(limit, read_frame(reader))
            .await
            .map_err(|_| HandshakeError::TimedOut(limit))??,
        None => read_frame(reader).await?,
    };

    let body = frame.ok_or(HandshakeError::Closed)?;
    let username: String = decode(&body)?;
    let username = username.trim().to_string();
    if username.is_empty() {
        return Err(HandshakeError::EmptyUsername);
    }
    Ok(username)
}

/// Drives one accepted connection from handshake to teardown.
pub(crate) async fn run_session<R, W>(
    id: PeerId,
    mut reader: R,
    writer: W,
    addr: Option<SocketAddr>,
    state: Arc<ServerState>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut shutdown = state.shutdown.clone();
    let origin = addr
        .map(|a| a.to_string())
        .unwrap_or_else(|| format!("connection {}", id));

    let handshake = tokio::select! {
        result = read_username(&mut reader, state.config.handshake_timeout) => result,
        _ = wait_for_shutdown(&mut shutdown) => Err(HandshakeError::Shutdown),
    };
    let username = match handshake {
        Ok(username) => username,
        Err(e) => {
            state
                .events
                .emit(format!("Handshake with {} failed: {}", origin, e));
            return;
        }
    };

    let peer = Arc::new(PeerConnection::new(id, username, addr, writer));
    if !admit(&peer, &state).await {
        return;
    }

    let reason = read_loop(&peer, &mut reader, &state, &mut shutdown).await;
    if let CloseReason::ReadError(e) = &reason {
        warn!("Error reading from {}: {}", peer.username(), e);
    }

    state.registry.remove(peer.id()).await;
    peer.close().await;
    state
        .events
        .emit(format!("{} disconnected: {}", peer.username(), reason));
}

/// Announces the peer, registers it and sends it its role. Returns false if
/// the peer could not be registered.
async fn admit(peer: &Arc<PeerConnection>, state: &ServerState) -> bool {
    let username = peer.username();
    state.events.emit(format!("{} just connected.", username));

    // Announced before registering, so only the peers already present see it.
    // Existing clients read the message as the colour to draw the newcomer in.
    let notice = Packet::new_connection(username, state.config.default_role.as_str());
    state.broadcaster.broadcast(&notice).await;

    let registered_before = match state.registry.add(Arc::clone(peer)).await {
        Ok(count) => count,
        Err(e) => {
            state
                .events
                .emit(format!("Could not register {}: {}", username, e));
            peer.close().await;
            return false;
        }
    };

    // stop() may have drained the registry between the handshake and the add.
    let stopping = *state.shutdown.borrow();
    if stopping {
        state.registry.remove(peer.id()).await;
        peer.close().await;
        return false;
    }

    let role = state.config.role_for(registered_before);
    debug!("Assigning role {} to {}", role, username);
    if let Err(e) = peer.send(&Packet::new_connection(username, role)).await {
        state
            .events
            .emit(format!("Error sending role to {}: {}", username, e));
    }
    true
}

async fn read_loop<R>(
    peer: &PeerConnection,
    reader: &mut R,
    state: &ServerState,
    shutdown: &mut watch::Receiver<bool>,
) -> CloseReason
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            frame = read_frame(reader) => frame,
            _ = wait_for_shutdown(shutdown) => return CloseReason::Shutdown,
        };

        let body = match frame {
            Ok(Some(body)) => body,
            Ok(None) => return CloseReason::Disconnected,
            Err(e) => return CloseReason::ReadError(e),
        };

        // The frame boundary is intact, so an unknown kind can be skipped.
        let packet = match decode::<Packet>(&body) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Ignoring undecodable packet from {}: {}", peer.username(), e);
                continue;
            }
        };

        if dispatch(peer, packet, state).await.is_break() {
            return CloseReason::Logout;
        }
    }
}

async fn dispatch(peer: &PeerConnection, packet: Packet, state: &ServerState) -> ControlFlow<()> {
    match packet {
        Packet::Movement { keys, .. } => {
            // Relayed under the name from the handshake, not the one claimed.
            let update = Packet::movement(peer.username(), keys);
            state.broadcaster.broadcast(&update).await;
            ControlFlow::Continue(())
        }
        Packet::Logout { .. } => ControlFlow::Break(()),
        Packet::Heartbeat { .. } => ControlFlow::Continue(()),
        Packet::CollisionEvent { .. } | Packet::NewConnection { .. } => {
            debug!("No action for {} from {}", packet.kind(), peer.username());
            ControlFlow::Continue(())
        }
    }
}
