//! Per-account connection registry
//!
//! Each connection gets a bounded outbound channel. Broadcasts use
//! `try_send` so one slow device cannot stall delivery to the others; a
//! full or closed channel simply misses the event.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::event::SyncEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Frame queued for a connection's write loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized event, shared between every recipient of a broadcast
    Text(Arc<str>),
}

/// Handle to one live connection
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    account_id: String,
    tx: mpsc::Sender<Outbound>,
    awaiting_ack: AtomicBool,
    closed: CancellationToken,
}

impl Connection {
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Enqueue without waiting; `false` when full or closed
    pub fn try_send(&self, frame: Outbound) -> bool {
        self.tx.try_send(frame).is_ok()
    }

    pub fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.tx.is_closed()
    }

    /// Record a heartbeat acknowledgement from the peer
    pub fn acknowledge(&self) {
        self.awaiting_ack.store(false, Ordering::Release);
    }

    pub fn awaiting_ack(&self) -> bool {
        self.awaiting_ack.load(Ordering::Acquire)
    }

    /// Resolves once the server has decided to close this connection
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// Outcome of one heartbeat cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub pinged: usize,
    pub evicted: usize,
}

#[derive(Debug)]
pub struct SyncBroadcaster {
    connections: DashMap<String, Vec<Arc<Connection>>>,
    next_id: AtomicU64,
    next_seq: AtomicU64,
    capacity: usize,
}

impl SyncBroadcaster {
    /// `capacity` bounds each connection's outbound queue
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Add a connection for `account_id`
    ///
    /// The receiver belongs to the transport's write loop.
    pub fn register(&self, account_id: &str) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.capacity);

        let connection = Arc::new(Connection {
            id,
            account_id: account_id.to_owned(),
            tx,
            awaiting_ack: AtomicBool::new(false),
            closed: CancellationToken::new(),
        });

        self.connections
            .entry(account_id.to_owned())
            .or_default()
            .push(Arc::clone(&connection));

        tracing::debug!(account_id, connection = %id, "sync connection registered");
        (connection, rx)
    }

    /// Remove a connection; returns whether it was registered
    pub fn unregister(&self, connection: &Connection) -> bool {
        let account_id = connection.account_id();

        let removed = match self.connections.get_mut(account_id) {
            Some(mut list) => {
                let before = list.len();
                list.retain(|c| c.id != connection.id);
                list.len() != before
            }
            None => false,
        };

        self.connections.remove_if(account_id, |_, list| list.is_empty());

        if removed {
            tracing::debug!(account_id, connection = %connection.id, "sync connection unregistered");
        }
        removed
    }

    /// Deliver `event` to every open connection of `account_id`
    ///
    /// Returns how many connections accepted the event. Closed connections
    /// found along the way are pruned.
    pub fn broadcast(&self, account_id: &str, event: &SyncEvent) -> Result<usize, SyncError> {
        let recipients = self.connections_for(account_id);
        if recipients.is_empty() {
            return Ok(0);
        }

        let frame = Outbound::Text(Arc::from(event.to_json()?));
        let mut delivered = 0;

        for connection in recipients {
            if !connection.is_open() {
                self.unregister(&connection);
                continue;
            }

            if connection.try_send(frame.clone()) {
                delivered += 1;
            } else {
                tracing::debug!(
                    account_id,
                    connection = %connection.id,
                    "sync connection full, event skipped"
                );
            }
        }

        Ok(delivered)
    }

    /// Run one heartbeat cycle over every registered connection
    ///
    /// A connection still waiting on the previous ping is closed and
    /// unregistered; every other connection is pinged.
    pub fn heartbeat(&self) -> HeartbeatReport {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut report = HeartbeatReport::default();

        let ping = match (SyncEvent::Heartbeat { seq }).to_json() {
            Ok(json) => Outbound::Text(Arc::from(json)),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode heartbeat");
                return report;
            }
        };

        for connection in self.all_connections() {
            if !connection.is_open() || connection.awaiting_ack.swap(true, Ordering::AcqRel) {
                connection.close();
                self.unregister(&connection);
                report.evicted += 1;
                tracing::info!(
                    account_id = connection.account_id(),
                    connection = %connection.id,
                    "closing sync connection that missed a heartbeat"
                );
                continue;
            }

            // A full queue still counts as pinged; the ack decides liveness
            let _ = connection.try_send(ping.clone());
            report.pinged += 1;
        }

        report
    }

    /// Spawn the heartbeat loop
    ///
    /// The first cycle runs one full interval after start.
    pub fn start_heartbeat(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let broadcaster = Arc::clone(self);

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = broadcaster.heartbeat();
                        if report.evicted > 0 {
                            tracing::debug!(pinged = report.pinged, evicted = report.evicted, "heartbeat cycle");
                        }
                    }
                }
            }

            broadcaster.close_all();
        })
    }

    /// Close and unregister everything, used on shutdown
    pub fn close_all(&self) {
        for connection in self.all_connections() {
            connection.close();
            self.unregister(&connection);
        }
    }

    pub fn connection_count(&self, account_id: &str) -> usize {
        self.connections.get(account_id).map_or(0, |list| list.len())
    }

    /// Total connections across all accounts
    pub fn len(&self) -> usize {
        self.connections.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn connections_for(&self, account_id: &str) -> Vec<Arc<Connection>> {
        self.connections
            .get(account_id)
            .map(|list| list.value().clone())
            .unwrap_or_default()
    }

    // DashMap guards borrow the map, so snapshot before mutating it
    fn all_connections(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect()
    }
}
