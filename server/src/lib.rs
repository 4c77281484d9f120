//! # State Relay Server Library
//!
//! Real-time relay for a multiplayer session. Clients hold one TCP connection
//! each, send their state updates (movement, collision events, heartbeats),
//! and the server fans every movement update out to all connected clients.
//! The server keeps no game state of its own; it is a transient relay.
//!
//! ## Core Responsibilities
//!
//! ### Connection Lifecycle
//! Each accepted connection gets a process-unique id, performs a username
//! handshake, is registered, and runs its own read loop until the client
//! logs out, the stream fails, or the server stops. Teardown always removes
//! the peer from the registry and closes its stream.
//!
//! ### Broadcast Fan-Out
//! Movement updates are re-broadcast to every registered peer, the sender
//! included. Every delivery is followed by a heartbeat probe; a peer whose
//! probe cannot be written is evicted during the same pass.
//!
//! ### Role Assignment
//! A newly registered peer is told its role directly: the first two
//! connectors get the distinguished role, everyone after gets the default.
//!
//! ## Architecture Design
//!
//! ### Task Per Connection
//! One tokio task runs the accept loop and one task runs each connection, so
//! a slow or stalled client never holds up the others or the listener.
//!
//! ### Single Shared Registry
//! The [`registry::Registry`] is the only state shared between tasks. Its
//! lock is held for membership changes and for copying a snapshot, never
//! across network writes.
//!
//! ### Length-Prefixed Framing
//! Packets travel as bincode bodies behind a 4-byte length prefix (see
//! `shared::codec`), so a packet kind unknown to this build is skipped
//! instead of desynchronising the stream.
//!
//! ## Module Organization
//!
//! - `config`: listen address, handshake timeout, role labels
//! - `events`: status-line hook for a hosting console or GUI
//! - `peer`: send side of one connection
//! - `registry`: the shared peer set and id allocation
//! - `broadcast`: fan-out with liveness probing and eviction
//! - `session`: handshake, read loop and teardown of one connection
//! - `network`: listener, accept loop, start/stop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::events::EventHook;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         port: 1500,
//!         ..ServerConfig::default()
//!     };
//!     let events = EventHook::new(|line| println!("{}", line));
//!
//!     // Binds and starts accepting clients in the background
//!     let server = Server::start(config, events).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!
//!     // Stops accepting, notifies and disconnects every client
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod config;
pub mod events;
pub mod network;
pub mod peer;
pub mod registry;
pub mod session;
