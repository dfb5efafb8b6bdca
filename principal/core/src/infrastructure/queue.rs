// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Per-client event queues
//
// Every connected client owns a pair of FIFO queues: `send` carries events
// from the principal to the agent, `recv` carries events pushed by the agent
// until the event processor drains them. Lookups for clients without a queue
// pair fail with `QueueError::NotFound` so callers can account for the event.
// Pairs outlive the connections using them and expire once idle.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Notify;

use crate::domain::events::Event;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue pair for client {0} already exists")]
    AlreadyExists(String),

    #[error("no queue pair for client {0}")]
    NotFound(String),
}

/// Unbounded FIFO with an async `next`.
#[derive(Default)]
pub struct EventQueue {
    items: Mutex<VecDeque<Event>>,
    notify: Notify,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, event: Event) {
        self.items.lock().push_back(event);
        self.notify.notify_one();
    }

    pub fn try_next(&self) -> Option<Event> {
        self.items.lock().pop_front()
    }

    /// Wait for the next event. Cancel safe: nothing is removed unless the
    /// future completes.
    pub async fn next(&self) -> Event {
        loop {
            let notified = self.notify.notified();
            if let Some(event) = self.try_next() {
                return event;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[derive(Clone)]
pub struct QueuePair {
    pub send: Arc<EventQueue>,
    pub recv: Arc<EventQueue>,
}

impl QueuePair {
    fn new() -> Self {
        Self {
            send: Arc::new(EventQueue::new()),
            recv: Arc::new(EventQueue::new()),
        }
    }

    fn same_as(&self, other: &QueuePair) -> bool {
        Arc::ptr_eq(&self.send, &other.send)
    }
}

struct Slot {
    pair: QueuePair,
    leases: usize,
    last_seen: Instant,
}

impl Slot {
    fn new() -> Self {
        Self {
            pair: QueuePair::new(),
            leases: 0,
            last_seen: Instant::now(),
        }
    }

    fn idle_for(&self, max_idle: Duration) -> bool {
        self.leases == 0 && self.pair.recv.is_empty() && self.last_seen.elapsed() >= max_idle
    }
}

/// A pair removed by [`SendRecvQueues::sweep_idle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredPair {
    pub client_id: String,
    /// Undelivered events dropped with the send queue
    pub dropped: usize,
}

/// Send/receive queue pairs keyed by client identity.
///
/// A client keeps its pair across reconnects: streams and polls hold a
/// [`QueueLease`] while attached, and only pairs without leases, without
/// undrained inbound events and idle for long enough are removed by
/// [`SendRecvQueues::sweep_idle`].
#[derive(Default)]
pub struct SendRecvQueues {
    slots: RwLock<HashMap<String, Slot>>,
}

impl SendRecvQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, client_id: &str) -> Result<QueuePair, QueueError> {
        let mut slots = self.slots.write();
        if slots.contains_key(client_id) {
            return Err(QueueError::AlreadyExists(client_id.to_string()));
        }
        let slot = Slot::new();
        let pair = slot.pair.clone();
        slots.insert(client_id.to_string(), slot);
        Ok(pair)
    }

    /// Existing pair for `client_id`, created on first use.
    pub fn ensure(&self, client_id: &str) -> QueuePair {
        let mut slots = self.slots.write();
        let slot = slots.entry(client_id.to_string()).or_insert_with(Slot::new);
        slot.last_seen = Instant::now();
        slot.pair.clone()
    }

    /// Attach to the pair for `client_id`, creating it on first use. The pair
    /// is exempt from idle sweeps until every lease is dropped.
    pub fn attach(self: &Arc<Self>, client_id: &str) -> QueueLease {
        let pair = {
            let mut slots = self.slots.write();
            let slot = slots.entry(client_id.to_string()).or_insert_with(Slot::new);
            slot.leases += 1;
            slot.last_seen = Instant::now();
            slot.pair.clone()
        };
        QueueLease {
            queues: Arc::clone(self),
            client_id: client_id.to_string(),
            pair,
        }
    }

    fn release(&self, client_id: &str, pair: &QueuePair) {
        let mut slots = self.slots.write();
        // The pair may have been deleted and recreated while the lease was held.
        if let Some(slot) = slots.get_mut(client_id) {
            if slot.pair.same_as(pair) {
                slot.leases = slot.leases.saturating_sub(1);
                slot.last_seen = Instant::now();
            }
        }
    }

    /// Number of live leases on the pair for `client_id`.
    pub fn attached(&self, client_id: &str) -> usize {
        self.slots.read().get(client_id).map_or(0, |slot| slot.leases)
    }

    pub fn delete(&self, client_id: &str) -> Result<(), QueueError> {
        self.slots
            .write()
            .remove(client_id)
            .map(|_| ())
            .ok_or_else(|| QueueError::NotFound(client_id.to_string()))
    }

    /// Remove pairs nobody attached to for at least `max_idle`. Pairs still
    /// holding inbound events are kept until the processor drained them.
    pub fn sweep_idle(&self, max_idle: Duration) -> Vec<ExpiredPair> {
        let mut slots = self.slots.write();
        let expired: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.idle_for(max_idle))
            .map(|(client_id, _)| client_id.clone())
            .collect();
        let mut removed: Vec<ExpiredPair> = expired
            .into_iter()
            .filter_map(|client_id| {
                let slot = slots.remove(&client_id)?;
                Some(ExpiredPair {
                    dropped: slot.pair.send.len(),
                    client_id,
                })
            })
            .collect();
        removed.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        removed
    }

    pub fn has(&self, client_id: &str) -> bool {
        self.slots.read().contains_key(client_id)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    pub fn send_queue(&self, client_id: &str) -> Result<Arc<EventQueue>, QueueError> {
        self.slots
            .read()
            .get(client_id)
            .map(|slot| slot.pair.send.clone())
            .ok_or_else(|| QueueError::NotFound(client_id.to_string()))
    }

    pub fn recv_queue(&self, client_id: &str) -> Result<Arc<EventQueue>, QueueError> {
        self.slots
            .read()
            .get(client_id)
            .map(|slot| slot.pair.recv.clone())
            .ok_or_else(|| QueueError::NotFound(client_id.to_string()))
    }
}

/// Keeps a client's queue pair attached until dropped.
pub struct QueueLease {
    queues: Arc<SendRecvQueues>,
    client_id: String,
    pair: QueuePair,
}

impl QueueLease {
    pub fn pair(&self) -> &QueuePair {
        &self.pair
    }
}

impl Drop for QueueLease {
    fn drop(&mut self) {
        self.queues.release(&self.client_id, &self.pair);
    }
}
