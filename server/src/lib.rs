//! # Stealth Game Server Library
//!
//! This library provides the authoritative server for a browser-based,
//! multiplayer stealth game. Players roam a top-down map collecting coins
//! while server-controlled guards patrol, spot and chase them. The server owns
//! the canonical world state; clients report their own position and receive
//! periodic snapshots of everyone else.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative World State
//! Players, guards and items live in a single [`game::GameState`] behind one
//! reader/writer lock. Every mutation (joins, leaves, position updates, coin
//! pickups, guard movement, catches) happens under the write half of that
//! lock, so two pickups of the same coin can never both succeed.
//!
//! ### Guard AI
//! Each guard runs a Patrolling / Pursuing / Searching state machine
//! ([`guard`]) and asks a bounded A* planner ([`planner`]) for a route to its
//! current goal. Plans are computed as coarse steps and expanded into one fine
//! action per movement tick. When planning keeps failing the guard walks a
//! recovery ladder: next waypoint, random escape, and finally a teleport back
//! to its first waypoint.
//!
//! ### Client Management
//! Every connection gets a bounded outbound queue ([`client_manager`]). Ticks
//! never wait on a slow client; a full queue evicts that client's oldest
//! snapshot so one-off events still get through.
//!
//! ## Architecture Design
//!
//! ### Mailbox and Ticks
//! Connections talk to the [`hub::Hub`] through a single-consumer mailbox of
//! join, leave and update requests. Next to the mailbox consumer four periodic
//! tasks run:
//! - **Broadcast** (10 ms): snapshot of all players and guards to everyone
//! - **Movement** (20 ms): one fine action per guard, catch detection
//! - **Think** (200 ms): goal selection and path planning
//! - **Respawn** (2 min): item list reloaded from the map document
//!
//! Path searches run on the blocking thread pool without holding the world
//! lock. A plan whose goal went stale in the meantime is discarded.
//!
//! ### WebSocket Transport
//! [`network`] upgrades TCP connections to WebSockets, checks the requested
//! username ([`username`]) and runs a read pump and a write pump per client.
//! Frames are JSON objects tagged by a `requesting` field (see
//! [`shared::protocol`]).
//!
//! ## Module Organization
//!
//! - `config`: tunables with their defaults
//! - `world`: map document loading, obstacle validity, moves, line of sight
//! - `planner`: bounded A* search
//! - `guard`: guard state machine and recovery ladder
//! - `game`: players, guards and items, and the transitions between them
//! - `client_manager`: outbound queues per connection
//! - `hub`: mailbox dispatcher and periodic ticks
//! - `username`: username admission
//! - `network`: listener and per-connection pumps
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::hub::Hub;
//! use server::network::serve;
//! use server::username::UsernameGate;
//! use server::world::MapData;
//! use tokio::net::TcpListener;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let map = MapData::load_or_empty(&config.hub.map_path);
//!
//!     let hub = Hub::new(&map, &config);
//!     let (mailbox, requests) = mpsc::channel(config.hub.mailbox_capacity);
//!     tokio::spawn(hub.clone().run(requests));
//!
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!     serve(listener, hub, mailbox, UsernameGate::new(&config.username)).await;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod game;
pub mod guard;
pub mod hub;
pub mod network;
pub mod planner;
pub mod username;
pub mod world;
