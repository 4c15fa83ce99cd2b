//! The simulation hub: sole owner of the game state.
//!
//! Connections talk to the hub through a single-consumer mailbox of
//! [`HubRequest`]s. Four periodic tasks run next to the mailbox consumer:
//! snapshot broadcast, guard movement, guard thinking and item respawn.
//! Every state mutation happens under the write half of one lock; outbound
//! messages are queued only after that lock has been released.

use crate::client_manager::{ClientManager, ConnectionId, OutboundSender};
use crate::config::{HubConfig, ServerConfig};
use crate::game::{GameState, Outbound};
use crate::planner::PathPlanner;
use crate::world::MapData;
use log::{debug, error, info, warn};
use shared::PlayerUpdate;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Requests accepted by the hub mailbox
#[derive(Debug)]
pub enum HubRequest {
    Join {
        conn: ConnectionId,
        username: String,
        outgoing: OutboundSender,
    },
    Leave {
        conn: ConnectionId,
    },
    Update {
        conn: ConnectionId,
        update: PlayerUpdate,
    },
}

#[derive(Clone)]
pub struct Hub {
    state: Arc<RwLock<GameState>>,
    clients: Arc<RwLock<ClientManager>>,
    planner: Arc<PathPlanner>,
    config: HubConfig,
    next_connection: Arc<AtomicU32>,
}

impl Hub {
    pub fn new(map: &MapData, config: &ServerConfig) -> Self {
        Self::with_state(GameState::new(map, config, Instant::now()), config)
    }

    pub fn with_state(state: GameState, config: &ServerConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            clients: Arc::new(RwLock::new(ClientManager::new(config.hub.max_clients))),
            planner: Arc::new(PathPlanner::new(config.planner.clone())),
            config: config.hub.clone(),
            next_connection: Arc::new(AtomicU32::new(1)),
        }
    }

    pub fn state(&self) -> &Arc<RwLock<GameState>> {
        &self.state
    }

    pub fn clients(&self) -> &Arc<RwLock<ClientManager>> {
        &self.clients
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn username_taken(&self, username: &str) -> bool {
        self.state.read().await.username_taken(username)
    }

    /// Processes one mailbox request
    pub async fn handle(&self, request: HubRequest) {
        match request {
            HubRequest::Join {
                conn,
                username,
                outgoing,
            } => {
                if !self.clients.write().await.add_client(conn, outgoing) {
                    warn!("Refusing {} on connection {}: server full", username, conn);
                    return;
                }
                let outbound = self.state.write().await.join(conn, username);
                self.dispatch(outbound).await;
            }
            HubRequest::Leave { conn } => {
                self.clients.write().await.remove_client(&conn);
                let outbound = self.state.write().await.leave(conn);
                self.dispatch(outbound).await;
            }
            HubRequest::Update { conn, update } => {
                let outbound = self.state.write().await.update_player(conn, &update);
                self.dispatch(outbound).await;
            }
        }
    }

    /// Routes messages produced by a state transition to the client queues
    pub async fn dispatch(&self, outbound: Vec<Outbound>) {
        if outbound.is_empty() {
            return;
        }

        let clients = self.clients.read().await;
        for message in outbound {
            match message {
                Outbound::To(conn, message) => {
                    clients.send_to(conn, Arc::new(message));
                }
                Outbound::Broadcast(message) => {
                    clients.broadcast(Arc::new(message));
                }
            }
        }
    }

    pub async fn broadcast_snapshot(&self, tick: u64) {
        let snapshot = self.state.read().await.snapshot(tick);
        self.clients.read().await.broadcast(Arc::new(snapshot));
    }

    pub async fn move_guards(&self) {
        let outbound = self.state.write().await.move_guards();
        self.dispatch(outbound).await;
    }

    /// One think pass. Goals are chosen under the lock, searches run on the
    /// blocking pool without it, and results are installed under it again.
    /// Guards being replanned stand still meanwhile, so a plan always starts
    /// where its guard is when it is installed.
    pub async fn think(&self) {
        let (jobs, world) = {
            let mut state = self.state.write().await;
            (state.prepare_plans(), state.world())
        };
        if jobs.is_empty() {
            return;
        }

        let planner = Arc::clone(&self.planner);
        let planned = tokio::task::spawn_blocking(move || {
            jobs.iter()
                .map(|job| job.run(&planner, &world))
                .collect::<Vec<_>>()
        })
        .await;

        match planned {
            Ok(results) => self.state.write().await.apply_plans(results, Instant::now()),
            Err(e) => error!("Guard planning task failed: {}", e),
        }
    }

    /// Re-reads the item list from the map document and announces it
    pub async fn respawn_items(&self) {
        match MapData::load_async(&self.config.map_path).await {
            Ok(map) => {
                let outbound = self.state.write().await.respawn_items(map.items);
                self.dispatch(outbound).await;
            }
            Err(e) => warn!(
                "Could not reload items from {}: {}, keeping current items",
                self.config.map_path.display(),
                e
            ),
        }
    }

    /// Starts the periodic tasks
    pub fn spawn_ticks(&self) -> Vec<JoinHandle<()>> {
        let broadcast = {
            let hub = self.clone();
            tokio::spawn(async move {
                let mut ticker = ticker(hub.config.broadcast_interval);
                let mut tick: u64 = 0;
                loop {
                    ticker.tick().await;
                    tick += 1;
                    hub.broadcast_snapshot(tick).await;
                }
            })
        };

        let movement = {
            let hub = self.clone();
            tokio::spawn(async move {
                let mut ticker = ticker(hub.config.movement_interval);
                loop {
                    ticker.tick().await;
                    hub.move_guards().await;
                }
            })
        };

        let thinking = {
            let hub = self.clone();
            tokio::spawn(async move {
                let mut ticker = ticker(hub.config.think_interval);
                loop {
                    ticker.tick().await;
                    hub.think().await;
                }
            })
        };

        let respawn = {
            let hub = self.clone();
            tokio::spawn(async move {
                let mut ticker = ticker(hub.config.respawn_interval);
                // Skip the first tick since it fires immediately
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    hub.respawn_items().await;
                }
            })
        };

        vec![broadcast, movement, thinking, respawn]
    }

    /// Consumes the mailbox until every sender is gone, running the ticks
    /// meanwhile
    pub async fn run(self, mut mailbox: mpsc::Receiver<HubRequest>) {
        let ticks = self.spawn_ticks();
        info!("Hub running");

        while let Some(request) = mailbox.recv().await {
            self.handle(request).await;
        }

        debug!("Hub mailbox closed, stopping ticks");
        for tick in ticks {
            tick.abort();
        }
    }
}

/// `interval` rejects a zero period, so periods are at least a millisecond.
fn ticker(period: Duration) -> Interval {
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}
