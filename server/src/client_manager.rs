//! Outbound queue management for connected clients
//!
//! This module handles the server-side bookkeeping of connected clients:
//! - Registering a bounded outbound queue per connection
//! - Routing messages to one client or broadcasting to all of them
//! - Enforcing the server's client capacity
//!
//! Sending never waits. When a client's queue is full the oldest queued
//! snapshot makes room for the new message, so a stalled socket cannot hold
//! up the ticks feeding every other client and one-off events such as
//! removals and catches still reach a client that fell behind.

use log::{debug, info};
use shared::ServerMessage;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::Notify;

/// Explicit per-connection identifier assigned by the transport.
pub type ConnectionId = u32;

/// Messages are shared between every queue they are broadcast to.
pub type Outgoing = Arc<ServerMessage>;

/// Snapshots are superseded by the next one, so they are evicted first.
fn is_snapshot(message: &ServerMessage) -> bool {
    matches!(message, ServerMessage::Update { .. })
}

struct QueueState {
    messages: VecDeque<Outgoing>,
    capacity: usize,
    sender_alive: bool,
    receiver_alive: bool,
}

struct Queue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Queue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Result of pushing onto an outbound queue
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Queued,
    /// Queued after evicting an older message
    Displaced(Outgoing),
    /// The receiving write pump is gone
    Closed,
}

/// Creates a bounded outbound queue. A capacity of zero is treated as one.
pub fn outbound_queue(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    let queue = Arc::new(Queue {
        state: Mutex::new(QueueState {
            messages: VecDeque::new(),
            capacity: capacity.max(1),
            sender_alive: true,
            receiver_alive: true,
        }),
        notify: Notify::new(),
    });
    (
        OutboundSender {
            queue: Arc::clone(&queue),
        },
        OutboundReceiver { queue },
    )
}

/// Hub side of a connection's outbound queue
pub struct OutboundSender {
    queue: Arc<Queue>,
}

impl OutboundSender {
    /// Queues a message without waiting. A full queue evicts its oldest
    /// snapshot, or its oldest message when it holds no snapshot.
    pub fn push(&self, message: Outgoing) -> Delivery {
        let delivery = {
            let mut state = self.queue.lock();
            if !state.receiver_alive {
                return Delivery::Closed;
            }

            let displaced = if state.messages.len() >= state.capacity {
                let index = state
                    .messages
                    .iter()
                    .position(|queued| is_snapshot(queued))
                    .unwrap_or(0);
                state.messages.remove(index)
            } else {
                None
            };
            state.messages.push_back(message);
            displaced.map_or(Delivery::Queued, Delivery::Displaced)
        };
        self.queue.notify.notify_one();
        delivery
    }
}

impl std::fmt::Debug for OutboundSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundSender")
            .field("queued", &self.queue.lock().messages.len())
            .finish()
    }
}

impl Drop for OutboundSender {
    fn drop(&mut self) {
        self.queue.lock().sender_alive = false;
        self.queue.notify.notify_one();
    }
}

/// Write pump side of a connection's outbound queue
pub struct OutboundReceiver {
    queue: Arc<Queue>,
}

impl OutboundReceiver {
    /// Waits for the next message. Returns None once the sender is gone and
    /// everything queued before that has been drained.
    pub async fn recv(&mut self) -> Option<Outgoing> {
        loop {
            match self.try_recv() {
                Ok(message) => return Some(message),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => self.queue.notify.notified().await,
            }
        }
    }

    pub fn try_recv(&mut self) -> Result<Outgoing, TryRecvError> {
        let mut state = self.queue.lock();
        match state.messages.pop_front() {
            Some(message) => Ok(message),
            None if state.sender_alive => Err(TryRecvError::Empty),
            None => Err(TryRecvError::Disconnected),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for OutboundReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundReceiver")
            .field("queued", &self.len())
            .finish()
    }
}

impl Drop for OutboundReceiver {
    fn drop(&mut self) {
        let mut state = self.queue.lock();
        state.receiver_alive = false;
        state.messages.clear();
    }
}

/// A connected client and the sending half of its outbound queue
#[derive(Debug)]
pub struct Client {
    pub id: ConnectionId,
    pub connected_at: Instant,
    outgoing: OutboundSender,
    /// Messages evicted because the queue was full
    dropped: AtomicU64,
}

impl Client {
    pub fn new(id: ConnectionId, outgoing: OutboundSender) -> Self {
        Self {
            id,
            connected_at: Instant::now(),
            outgoing,
            dropped: AtomicU64::new(0),
        }
    }

    /// Queues a message without waiting
    ///
    /// Returns false only when the write pump has already gone away. A full
    /// queue still accepts the message and evicts an older one instead.
    pub fn send(&self, message: Outgoing) -> bool {
        match self.outgoing.push(message) {
            Delivery::Queued => true,
            Delivery::Displaced(_) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    debug!("Client {} outbound queue full, {} messages dropped", self.id, dropped);
                }
                true
            }
            Delivery::Closed => false,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Manages all connected clients and their outbound queues
pub struct ClientManager {
    clients: HashMap<ConnectionId, Client>,
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            max_clients,
        }
    }

    /// Registers the outbound queue for a connection
    ///
    /// Returns false if the server is at capacity or the id is already taken.
    pub fn add_client(&mut self, id: ConnectionId, outgoing: OutboundSender) -> bool {
        if self.clients.len() >= self.max_clients || self.clients.contains_key(&id) {
            return false;
        }

        info!("Client {} connected", id);
        self.clients.insert(id, Client::new(id, outgoing));
        true
    }

    /// Removes a client from the server
    ///
    /// Dropping the sender closes the outbound queue, which stops the
    /// connection's write pump once it has drained what is left.
    pub fn remove_client(&mut self, id: &ConnectionId) -> bool {
        if let Some(client) = self.clients.remove(id) {
            info!(
                "Client {} disconnected after {:?} ({} messages dropped)",
                client.id,
                client.connected_at.elapsed(),
                client.dropped()
            );
            true
        } else {
            false
        }
    }

    pub fn send_to(&self, id: ConnectionId, message: Outgoing) -> bool {
        self.clients
            .get(&id)
            .map(|client| client.send(message))
            .unwrap_or(false)
    }

    /// Queues the same message for every client, returns how many accepted it
    pub fn broadcast(&self, message: Outgoing) -> usize {
        self.clients
            .values()
            .filter(|client| client.send(Arc::clone(&message)))
            .count()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.clients.contains_key(id)
    }

    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.max_clients
    }

    pub fn dropped(&self, id: &ConnectionId) -> Option<u64> {
        self.clients.get(id).map(Client::dropped)
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are currently connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
