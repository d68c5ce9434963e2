//! In-memory broker
//!
//! Same delivery contract as the Postgres broker, minus durability across
//! process restarts. `requeue_unacked` stands in for a consumer crash.

use super::{Broker, Delivery};
use crate::error::Result;
use crate::messages::QueueName;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: i64,
    payload: serde_json::Value,
    deliveries: u32,
}

#[derive(Default)]
struct MemoryBrokerState {
    ready: HashMap<QueueName, VecDeque<StoredMessage>>,
    in_flight: HashMap<i64, (QueueName, StoredMessage)>,
    next_id: i64,
}

pub struct MemoryBroker {
    state: Mutex<MemoryBrokerState>,
    notify: Notify,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryBrokerState {
                next_id: 1,
                ..Default::default()
            }),
            notify: Notify::new(),
        }
    }

    /// Payloads waiting on a queue, oldest first, without leasing them
    pub async fn pending(&self, queue: QueueName) -> Vec<serde_json::Value> {
        let state = self.state.lock().await;
        state
            .ready
            .get(&queue)
            .map(|q| q.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Leased but unsettled messages
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    /// Return every unsettled lease to its queue, as the broker would after
    /// losing the consumer's connection.
    pub async fn requeue_unacked(&self) -> usize {
        let mut state = self.state.lock().await;
        let mut leased: Vec<(QueueName, StoredMessage)> =
            state.in_flight.drain().map(|(_, v)| v).collect();
        leased.sort_by_key(|(_, m)| std::cmp::Reverse(m.id));

        let count = leased.len();
        for (queue, message) in leased {
            state.ready.entry(queue).or_default().push_front(message);
        }
        drop(state);

        if count > 0 {
            self.notify.notify_waiters();
        }
        count
    }

    fn try_lease(state: &mut MemoryBrokerState, queue: QueueName) -> Option<Delivery> {
        let mut message = state.ready.get_mut(&queue)?.pop_front()?;
        message.deliveries += 1;
        let delivery = Delivery {
            id: message.id,
            queue,
            payload: message.payload.clone(),
            deliveries: message.deliveries,
        };
        state.in_flight.insert(message.id, (queue, message));
        Some(delivery)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, queue: QueueName, payload: serde_json::Value) -> Result<()> {
        let mut state = self.state.lock().await;
        let id = state.next_id;
        state.next_id += 1;
        state.ready.entry(queue).or_default().push_back(StoredMessage {
            id,
            payload,
            deliveries: 0,
        });
        drop(state);

        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, queue: QueueName, wait: Duration) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + wait;

        loop {
            // Register interest before checking so a publish in between is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = Self::try_lease(&mut *self.state.lock().await, queue) {
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut state = self.state.lock().await;
        if matches!(state.in_flight.get(&delivery.id), Some((_, m)) if m.deliveries == delivery.deliveries)
        {
            state.in_flight.remove(&delivery.id);
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        let mut state = self.state.lock().await;
        let held = matches!(
            state.in_flight.get(&delivery.id),
            Some((_, m)) if m.deliveries == delivery.deliveries
        );
        if held {
            if let Some((queue, message)) = state.in_flight.remove(&delivery.id) {
                state.ready.entry(queue).or_default().push_front(message);
            }
            drop(state);
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn depth(&self, queue: QueueName) -> Result<usize> {
        let state = self.state.lock().await;
        let ready = state.ready.get(&queue).map(|q| q.len()).unwrap_or(0);
        let leased = state.in_flight.values().filter(|(q, _)| *q == queue).count();
        Ok(ready + leased)
    }
}
