//! Listening socket, accept loop and the control surface of the server.

use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::events::EventHook;
use crate::registry::Registry;
use crate::session::run_session;
use log::{debug, error, info};
use shared::Packet;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;

/// How long `stop` waits for a peer to take its shutdown notice.
const SHUTDOWN_NOTICE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// State shared by the accept loop and every session task.
#[derive(Debug)]
pub(crate) struct ServerState {
    pub(crate) config: ServerConfig,
    pub(crate) registry: Arc<Registry>,
    pub(crate) broadcaster: Broadcaster,
    pub(crate) events: EventHook,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl ServerState {
    pub(crate) fn new(config: ServerConfig, events: EventHook, shutdown: watch::Receiver<bool>) -> Self {
        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry), events.clone(), shutdown.clone());
        Self {
            config,
            registry,
            broadcaster,
            events,
            shutdown,
        }
    }
}

/// Resolves once shutdown has been requested or the server handle is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stopping = *shutdown.borrow_and_update();
        if stopping || shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// A running relay server.
///
/// Dropping the handle without calling [`Server::stop`] still ends the accept
/// loop and every session, but peers get no shutdown notice.
pub struct Server {
    state: Arc<ServerState>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl Server {
    /// Binds the configured address and starts accepting clients in the
    /// background. A bind failure is returned to the caller and not retried.
    pub async fn start(config: ServerConfig, events: EventHook) -> Result<Self, ServerError> {
        let address = config.address();
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(source) => {
                events.emit(format!("Could not listen on {}: {}", address, source));
                return Err(ServerError::Bind { address, source });
            }
        };
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(ServerState::new(config, events, shutdown_rx));

        state
            .events
            .emit(format!("Server waiting for clients on {}", local_addr));
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&state)));

        Ok(Server {
            state,
            local_addr,
            shutdown_tx,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.state.registry)
    }

    /// Fan-out handle for server-originated packets.
    pub fn broadcaster(&self) -> Broadcaster {
        self.state.broadcaster.clone()
    }

    /// Stops accepting, tells every peer the server is going away and
    /// closes their streams.
    ///
    /// Returns only after the listening socket has been dropped, so no
    /// connection is accepted afterwards. Peers are notified concurrently and
    /// a peer that does not take its notice in time is closed anyway.
    pub async fn stop(self) {
        self.accept_task.abort();
        match self.accept_task.await {
            Err(e) if !e.is_cancelled() => error!("Accept loop ended abnormally: {}", e),
            _ => info!("Accept loop stopped"),
        }

        // Peers are notified before the session tasks are told to stop, so
        // the notice is not raced by their own teardown.
        let notice = Packet::logout("", "Server shutting down");
        let mut farewells = JoinSet::new();
        for peer in self.state.registry.drain().await {
            let notice = notice.clone();
            farewells.spawn(async move {
                match timeout(SHUTDOWN_NOTICE_TIMEOUT, peer.send(&notice)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!("Could not notify {} of shutdown: {}", peer.username(), e),
                    Err(_) => debug!("{} did not take the shutdown notice in time", peer.username()),
                }
                peer.close().await;
            });
        }
        while let Some(result) = farewells.join_next().await {
            if let Err(e) = result {
                error!("Shutdown notice task failed: {}", e);
            }
        }

        // Ends pending handshakes and any read loop still running.
        self.shutdown_tx.send_replace(true);
        self.state.events.emit("Server stopped");
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<ServerState>) {
    let mut shutdown = state.shutdown.clone();

    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => spawn_session(stream, addr, &state),
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
        }
    }
}

fn spawn_session(stream: TcpStream, addr: SocketAddr, state: &Arc<ServerState>) {
    // Ids are handed out here, in acceptance order, not after the handshake.
    let id = state.registry.allocate_id();
    debug!("Accepted connection {} from {}", id, addr);

    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle for {}: {}", addr, e);
    }

    let (reader, writer) = stream.into_split();
    tokio::spawn(run_session(id, reader, writer, Some(addr), Arc::clone(state)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::codec::{read_message, write_frame};
    use std::sync::Mutex;

    const WAIT: Duration = Duration::from_secs(2);

    fn local_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            ..ServerConfig::default()
        }
    }

    fn recording_hook() -> (EventHook, Arc<Mutex<Vec<String>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let hook = EventHook::new(move |line| sink.lock().unwrap().push(line.to_string()));
        (hook, events)
    }

    async fn join(addr: SocketAddr, name: &str) -> (TcpStream, Packet) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, name).await.unwrap();
        let role = timeout(WAIT, read_message::<_, Packet>(&mut stream))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        (stream, role)
    }

    #[tokio::test]
    async fn test_start_reports_listening() {
        let (hook, events) = recording_hook();
        let server = Server::start(local_config(), hook).await.unwrap();

        assert_ne!(server.local_addr().port(), 0);
        assert!(events.lock().unwrap()[0].starts_with("Server waiting for clients on"));
        server.stop().await;
        assert_eq!(events.lock().unwrap().last().unwrap(), "Server stopped");
    }

    #[tokio::test]
    async fn test_bind_failure_is_surfaced() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig {
            port: occupied.local_addr().unwrap().port(),
            ..ServerConfig::default()
        };
        let (hook, events) = recording_hook();

        let err = Server::start(config, hook).await.err().unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
        assert!(events.lock().unwrap()[0].starts_with("Could not listen on"));
    }

    #[tokio::test]
    async fn test_ids_follow_acceptance_order() {
        let server = Server::start(local_config(), EventHook::silent()).await.unwrap();

        let mut streams = Vec::new();
        for name in ["a", "b", "c", "d", "e"] {
            streams.push(join(server.local_addr(), name).await.0);
        }

        let registry = server.registry();
        let peers = registry.snapshot().await;
        let ids: Vec<_> = peers.iter().map(|p| p.id()).collect();
        let names: Vec<_> = peers.iter().map(|p| p.username().to_string()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        server.stop().await;
    }

    #[tokio::test]
    async fn test_stop_notifies_and_closes_peers() {
        let server = Server::start(local_config(), EventHook::silent()).await.unwrap();
        let addr = server.local_addr();
        let (mut alice, _) = join(addr, "alice").await;

        let registry = server.registry();
        server.stop().await;
        assert!(registry.is_empty().await);

        let notice = timeout(WAIT, read_message::<_, Packet>(&mut alice))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(notice, Packet::logout("", "Server shutting down"));
        let end = timeout(WAIT, read_message::<_, Packet>(&mut alice)).await.unwrap();
        assert!(matches!(end, Ok(None) | Err(_)));

        // The listening socket is gone.
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_does_not_wait_for_stalled_peer() {
        let server = Server::start(local_config(), EventHook::silent()).await.unwrap();
        let addr = server.local_addr();
        let registry = server.registry();

        // Completes the handshake, then never reads again.
        let (_stalled, _) = join(addr, "stalled").await;
        let (mut mover, _) = join(addr, "mover").await;

        // Large movement updates fill the stalled peer's socket buffer and
        // leave a broadcast blocked on its writer.
        let flood = tokio::spawn(async move {
            let update = Packet::movement("mover", "X".repeat(60_000));
            while write_frame(&mut mover, &update).await.is_ok() {}
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(registry.size().await, 2);

        timeout(Duration::from_secs(5), server.stop()).await.unwrap();
        assert!(registry.is_empty().await);
        flood.abort();
    }
}
