// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The stream hub.
//!
//! One loop task owns the client map and performs subscription-filtered
//! fan-out: each broadcast is serialised to JSON exactly once and the
//! shared string is pushed onto every matching client's bounded outbound
//! queue with a non-blocking send. A saturated client loses that message;
//! nobody else does.
//!
//! Registration and unregistration are channel operations handled by the
//! loop, which guarantees that a client's outbound queue is closed exactly
//! once and only after its unregistration has been processed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use kiln_core::error::{StreamError, StreamResult};
use kiln_core::message::BroadcastMsg;
use kiln_core::types::{ChamberId, MachineId};

use crate::buffer::RingBuffer;

/// Capacity of the hub's inbound broadcast channel.
const BROADCAST_CAPACITY: usize = 1000;

/// Capacity of each client's outbound queue.
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

/// How many fanned-out broadcasts the recent-message ring retains.
const RECENT_CAPACITY: usize = 512;

// =============================================================================
// Subscriptions
// =============================================================================

/// A client's identifier, unique for the lifetime of the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

#[derive(Debug, Default, Clone)]
struct MachineSub {
    /// Subscribed to every chamber of the machine.
    all: bool,
    chambers: std::collections::HashSet<ChamberId>,
}

/// What one client wants to receive.
///
/// Mutated only by that client's reader task, read by the hub loop during
/// fan-out; both sides go through the client's lock.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    machines: HashMap<MachineId, MachineSub>,
}

impl SubscriptionSet {
    /// Adds a subscription. `None` for the chamber subscribes to every
    /// chamber of the machine.
    pub fn subscribe(&mut self, machine_id: MachineId, chamber_id: Option<ChamberId>) {
        let entry = self.machines.entry(machine_id).or_default();
        match chamber_id {
            Some(chamber) if !chamber.as_str().is_empty() => {
                entry.chambers.insert(chamber);
            }
            _ => entry.all = true,
        }
    }

    /// Removes a subscription. `None` for the chamber drops the machine
    /// entirely.
    pub fn unsubscribe(&mut self, machine_id: &MachineId, chamber_id: Option<&ChamberId>) {
        match chamber_id {
            Some(chamber) if !chamber.as_str().is_empty() => {
                if let Some(entry) = self.machines.get_mut(machine_id) {
                    entry.chambers.remove(chamber);
                    if !entry.all && entry.chambers.is_empty() {
                        self.machines.remove(machine_id);
                    }
                }
            }
            _ => {
                self.machines.remove(machine_id);
            }
        }
    }

    /// Returns `true` if a broadcast from this machine/chamber matches.
    pub fn matches(&self, machine_id: &MachineId, chamber_id: &ChamberId) -> bool {
        match self.machines.get(machine_id) {
            Some(entry) => entry.all || entry.chambers.contains(chamber_id),
            None => false,
        }
    }

    /// Returns `true` if nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}

// =============================================================================
// Stats
// =============================================================================

#[derive(Debug, Default)]
struct HubCounters {
    active_clients: AtomicUsize,
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

/// A snapshot of the hub's activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStats {
    /// Currently registered clients.
    pub active_clients: usize,
    /// Messages delivered onto client queues.
    pub messages_sent: u64,
    /// Messages dropped against saturated client queues.
    pub messages_dropped: u64,
}

// =============================================================================
// StreamHub
// =============================================================================

struct HubClient {
    subs: Arc<RwLock<SubscriptionSet>>,
    out_tx: mpsc::Sender<Arc<str>>,
}

enum Control {
    Register(ClientId, HubClient),
    Unregister(ClientId),
    SendTo(ClientId, BroadcastMsg),
}

/// A registered client as seen by its socket tasks.
pub struct ClientRegistration {
    /// This client's id.
    pub id: ClientId,
    /// The subscription set, mutated by the client's reader task.
    pub subs: Arc<RwLock<SubscriptionSet>>,
    /// The outbound queue; closed by the hub after unregistration.
    pub out_rx: mpsc::Receiver<Arc<str>>,
}

/// Hub handle shared by pollers, socket handlers and diagnostics.
pub struct StreamHub {
    broadcast_tx: mpsc::Sender<BroadcastMsg>,
    control_tx: mpsc::Sender<Control>,
    counters: Arc<HubCounters>,
    recent: Arc<RwLock<RingBuffer>>,
    shutdown: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
    next_client_id: AtomicU64,
}

impl StreamHub {
    /// Creates the hub and spawns its loop task.
    pub fn start() -> Arc<Self> {
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(64);
        let counters = Arc::new(HubCounters::default());
        let recent = Arc::new(RwLock::new(RingBuffer::new(RECENT_CAPACITY)));
        let shutdown = Arc::new(Notify::new());

        let hub_loop = HubLoop {
            clients: HashMap::new(),
            broadcast_rx,
            control_rx,
            counters: counters.clone(),
            recent: recent.clone(),
            shutdown: shutdown.clone(),
        };
        let handle = tokio::spawn(hub_loop.run());

        Arc::new(Self {
            broadcast_tx,
            control_tx,
            counters,
            recent,
            shutdown,
            handle: Mutex::new(Some(handle)),
            next_client_id: AtomicU64::new(1),
        })
    }

    /// Returns the sender pollers publish broadcasts to.
    pub fn publisher(&self) -> mpsc::Sender<BroadcastMsg> {
        self.broadcast_tx.clone()
    }

    /// Publishes a broadcast without blocking; dropped if the hub's
    /// inbound channel is saturated.
    pub fn publish(&self, msg: BroadcastMsg) {
        let _ = self.broadcast_tx.try_send(msg);
    }

    /// Registers a new client and returns its registration.
    pub async fn register(&self) -> StreamResult<ClientRegistration> {
        let id = ClientId(self.next_client_id.fetch_add(1, Ordering::Relaxed));
        let subs = Arc::new(RwLock::new(SubscriptionSet::default()));
        let (out_tx, out_rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);

        self.control_tx
            .send(Control::Register(
                id,
                HubClient {
                    subs: subs.clone(),
                    out_tx,
                },
            ))
            .await
            .map_err(|_| StreamError::HubClosed)?;

        Ok(ClientRegistration { id, subs, out_rx })
    }

    /// Unregisters a client; its outbound queue closes afterwards.
    pub async fn unregister(&self, id: ClientId) {
        let _ = self.control_tx.send(Control::Unregister(id)).await;
    }

    /// Queues an error frame for a single client.
    pub async fn send_error(&self, id: ClientId, message: impl Into<String>) {
        let _ = self
            .control_tx
            .send(Control::SendTo(id, BroadcastMsg::error(message)))
            .await;
    }

    /// Returns the recent broadcasts recorded for one chamber.
    pub fn recent(&self, machine_id: &MachineId, chamber_id: &ChamberId) -> Vec<BroadcastMsg> {
        self.recent.read().recent(machine_id, chamber_id)
    }

    /// Returns a snapshot of the hub's counters.
    pub fn stats(&self) -> StreamStats {
        StreamStats {
            active_clients: self.counters.active_clients.load(Ordering::Relaxed),
            messages_sent: self.counters.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.counters.messages_dropped.load(Ordering::Relaxed),
        }
    }

    /// Stops the hub loop; client queues close as the loop drops them.
    pub async fn stop(&self) {
        self.shutdown.notify_one();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(std::time::Duration::from_secs(10), handle)
                .await
                .is_err()
            {
                warn!("stream hub did not stop in time, abandoning");
            }
        }
    }
}

// =============================================================================
// HubLoop
// =============================================================================

struct HubLoop {
    clients: HashMap<ClientId, HubClient>,
    broadcast_rx: mpsc::Receiver<BroadcastMsg>,
    control_rx: mpsc::Receiver<Control>,
    counters: Arc<HubCounters>,
    recent: Arc<RwLock<RingBuffer>>,
    shutdown: Arc<Notify>,
}

impl HubLoop {
    async fn run(mut self) {
        info!("stream hub started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => break,

                ctrl = self.control_rx.recv() => {
                    match ctrl {
                        Some(ctrl) => self.handle_control(ctrl),
                        None => break,
                    }
                }

                msg = self.broadcast_rx.recv() => {
                    match msg {
                        Some(msg) => self.fan_out(msg),
                        None => break,
                    }
                }
            }
        }

        // Dropping the client map closes every outbound queue.
        let remaining = self.clients.len();
        self.clients.clear();
        info!(clients = remaining, "stream hub stopped");
    }

    fn handle_control(&mut self, ctrl: Control) {
        match ctrl {
            Control::Register(id, client) => {
                self.clients.insert(id, client);
                let total = self.clients.len();
                self.counters.active_clients.store(total, Ordering::Relaxed);
                debug!(%id, total, "client registered");
            }
            Control::Unregister(id) => {
                // Removing the entry drops the only sender, which closes the
                // client's outbound queue exactly once.
                if self.clients.remove(&id).is_some() {
                    let total = self.clients.len();
                    self.counters.active_clients.store(total, Ordering::Relaxed);
                    debug!(%id, total, "client unregistered");
                }
            }
            Control::SendTo(id, msg) => {
                if let Some(client) = self.clients.get(&id) {
                    if let Some(text) = serialize(&msg) {
                        self.push(client, text);
                    }
                }
            }
        }
    }

    fn fan_out(&self, msg: BroadcastMsg) {
        let (machine_id, chamber_id) = match (&msg.machine_id, &msg.chamber_id) {
            (Some(m), Some(c)) => (m.clone(), c.clone()),
            _ => return,
        };

        // One JSON encoding shared across all clients.
        let text = match serialize(&msg) {
            Some(text) => text,
            None => return,
        };

        self.recent.write().push(msg);

        for client in self.clients.values() {
            let matched = client.subs.read().matches(&machine_id, &chamber_id);
            if matched {
                self.push(client, text.clone());
            }
        }
    }

    fn push(&self, client: &HubClient, text: Arc<str>) {
        match client.out_tx.try_send(text) {
            Ok(()) => {
                self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                // This client's queue is full (or its writer is gone); the
                // message is dropped for this client only.
                self.counters
                    .messages_dropped
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn serialize(msg: &BroadcastMsg) -> Option<Arc<str>> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Arc::from(json.as_str())),
        Err(e) => {
            warn!(error = %e, "failed to serialize broadcast");
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap as StdHashMap;
    use std::time::Duration;

    fn data_msg(machine: &str, chamber: &str) -> BroadcastMsg {
        BroadcastMsg::data(
            MachineId::new(machine),
            ChamberId::new(chamber),
            StdHashMap::new(),
            Utc::now(),
        )
    }

    #[test]
    fn subscription_matching() {
        let mut subs = SubscriptionSet::default();
        let m1 = MachineId::new("m1");
        let c1 = ChamberId::new("c1");
        let c2 = ChamberId::new("c2");

        assert!(!subs.matches(&m1, &c1));

        subs.subscribe(m1.clone(), Some(c1.clone()));
        assert!(subs.matches(&m1, &c1));
        assert!(!subs.matches(&m1, &c2));

        // The empty chamber is the "all chambers" sentinel.
        subs.subscribe(m1.clone(), None);
        assert!(subs.matches(&m1, &c2));

        subs.unsubscribe(&m1, None);
        assert!(!subs.matches(&m1, &c1));
        assert!(subs.is_empty());
    }

    #[test]
    fn unsubscribe_single_chamber() {
        let mut subs = SubscriptionSet::default();
        let m1 = MachineId::new("m1");
        let c1 = ChamberId::new("c1");
        let c2 = ChamberId::new("c2");

        subs.subscribe(m1.clone(), Some(c1.clone()));
        subs.subscribe(m1.clone(), Some(c2.clone()));
        subs.unsubscribe(&m1, Some(&c1));

        assert!(!subs.matches(&m1, &c1));
        assert!(subs.matches(&m1, &c2));
    }

    #[tokio::test]
    async fn delivers_only_to_matching_clients() {
        let hub = StreamHub::start();

        let mut matching = hub.register().await.unwrap();
        matching
            .subs
            .write()
            .subscribe(MachineId::new("m1"), Some(ChamberId::new("c1")));

        let mut other = hub.register().await.unwrap();
        other
            .subs
            .write()
            .subscribe(MachineId::new("m2"), None);

        hub.publish(data_msg("m1", "c1"));

        let text = tokio::time::timeout(Duration::from_secs(1), matching.out_rx.recv())
            .await
            .expect("matching client receives")
            .expect("queue open");
        assert!(text.contains("\"m1\""));

        // The non-matching client's queue stays empty.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(other.out_rx.try_recv().is_err());

        hub.stop().await;
    }

    #[tokio::test]
    async fn unregister_closes_queue_once() {
        let hub = StreamHub::start();
        let mut reg = hub.register().await.unwrap();

        hub.unregister(reg.id).await;

        // The queue closes only after the loop processed the unregister.
        let closed = tokio::time::timeout(Duration::from_secs(1), reg.out_rx.recv())
            .await
            .expect("close observed");
        assert!(closed.is_none());

        hub.stop().await;
    }

    #[tokio::test]
    async fn error_frames_reach_single_client() {
        let hub = StreamHub::start();
        let mut reg = hub.register().await.unwrap();

        hub.send_error(reg.id, "not_implemented").await;

        let text = tokio::time::timeout(Duration::from_secs(1), reg.out_rx.recv())
            .await
            .expect("frame delivered")
            .expect("queue open");
        assert!(text.contains("not_implemented"));

        hub.stop().await;
    }
}
