//! Connection registry: observer lifecycle and best-effort broadcast.
//!
//! Each observer is backed by a bounded `mpsc` channel whose receiving
//! half is drained by the transport task (the websocket loop). Sends are
//! bounded by `send_timeout`, so a stalled observer is evicted instead of
//! holding up the fan-out.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::frame::ServerFrame;

/// Opaque handle identifying one registered connection.
///
/// Handles are never reused, unlike `client_id` which may collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A live subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observer {
    #[serde(skip)]
    pub id: ConnectionId,
    pub client_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: usize,
}

struct Slot {
    info: Observer,
    tx: mpsc::Sender<String>,
}

/// Set of live observers keyed by connection handle.
///
/// Cheap to clone; clones share the same underlying set.
#[derive(Clone)]
pub struct ConnectionRegistry {
    slots: Arc<RwLock<HashMap<ConnectionId, Slot>>>,
    next_id: Arc<AtomicU64>,
    send_timeout: Duration,
    buffer: usize,
}

impl ConnectionRegistry {
    /// `buffer` is the per-observer channel capacity used by [`connect`].
    ///
    /// [`connect`]: ConnectionRegistry::connect
    pub fn new(send_timeout: Duration, buffer: usize) -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            send_timeout,
            buffer: buffer.max(1),
        }
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Create a channel of the configured capacity and register its
    /// sending half. The caller drains the receiver into the transport.
    pub async fn connect(&self, client_id: Option<String>) -> (Observer, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let observer = self.register(tx, client_id).await;
        (observer, rx)
    }

    /// Register an observer and send it a `connection_established` frame.
    ///
    /// Without a `client_id` one is generated as `client_<n>`, where `n` is
    /// the number of registered observers including this one.
    ///
    /// The welcome frame is queued before the slot becomes visible, so it
    /// is always the first frame the observer receives. A sink that cannot
    /// take it is never inserted.
    pub async fn register(&self, sink: mpsc::Sender<String>, client_id: Option<String>) -> Observer {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let now = Utc::now();

        let mut slots = self.slots.write().await;
        let client_id = client_id.unwrap_or_else(|| format!("client_{}", slots.len() + 1));
        let observer = Observer {
            id,
            client_id,
            connected_at: now,
            last_activity: now,
        };

        let welcome = ServerFrame::welcome(observer.client_id.clone()).to_json();
        if let Err(e) = sink.try_send(welcome) {
            warn!(
                client_id = %observer.client_id,
                connection = %id,
                error = %e,
                "welcome not delivered, observer dropped"
            );
            return observer;
        }
        slots.insert(
            id,
            Slot {
                info: observer.clone(),
                tx: sink,
            },
        );
        drop(slots);

        info!(client_id = %observer.client_id, connection = %id, "observer registered");
        observer
    }

    /// Remove an observer. Removing an absent handle is a no-op.
    pub async fn unregister(&self, id: ConnectionId) {
        if let Some(slot) = self.slots.write().await.remove(&id) {
            info!(client_id = %slot.info.client_id, connection = %id, "observer unregistered");
        }
    }

    /// Send one frame to one observer, evicting it on failure.
    pub async fn send_to(&self, id: ConnectionId, frame: &ServerFrame) -> bool {
        let tx = match self.slots.read().await.get(&id) {
            Some(slot) => slot.tx.clone(),
            None => return false,
        };

        let delivered = deliver(&tx, frame.to_json(), self.send_timeout).await;
        if delivered {
            if let Some(slot) = self.slots.write().await.get_mut(&id) {
                slot.info.last_activity = Utc::now();
            }
        } else {
            warn!(connection = %id, "send failed, evicting observer");
            self.unregister(id).await;
        }
        delivered
    }

    /// Deliver a frame to every registered observer concurrently.
    ///
    /// Observers whose send fails or exceeds the send timeout are evicted
    /// before this returns. Never fails.
    pub async fn broadcast(&self, frame: &ServerFrame) -> BroadcastReport {
        let targets: Vec<(ConnectionId, mpsc::Sender<String>)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(id, slot)| (*id, slot.tx.clone()))
            .collect();

        if targets.is_empty() {
            return BroadcastReport::default();
        }

        let payload = frame.to_json();
        let timeout = self.send_timeout;
        let mut sends = JoinSet::new();
        for (id, tx) in targets {
            let payload = payload.clone();
            sends.spawn(async move { (id, deliver(&tx, payload, timeout).await) });
        }

        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((id, true)) => delivered.push(id),
                Ok((id, false)) => failed.push(id),
                Err(e) => warn!(error = %e, "broadcast send task failed"),
            }
        }

        let now = Utc::now();
        let mut slots = self.slots.write().await;
        for id in &delivered {
            if let Some(slot) = slots.get_mut(id) {
                slot.info.last_activity = now;
            }
        }
        for id in &failed {
            if let Some(slot) = slots.remove(id) {
                warn!(
                    client_id = %slot.info.client_id,
                    connection = %id,
                    "evicted unresponsive observer"
                );
            }
        }

        let report = BroadcastReport {
            delivered: delivered.len(),
            evicted: failed.len(),
        };
        debug!(
            delivered = report.delivered,
            evicted = report.evicted,
            remaining = slots.len(),
            "broadcast complete"
        );
        report
    }

    pub async fn count(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Observers ordered by connection time.
    pub async fn snapshot(&self) -> Vec<Observer> {
        let mut observers: Vec<Observer> = self
            .slots
            .read()
            .await
            .values()
            .map(|slot| slot.info.clone())
            .collect();
        observers.sort_by_key(|o| o.id);
        observers
    }
}

async fn deliver(tx: &mpsc::Sender<String>, payload: String, timeout: Duration) -> bool {
    matches!(tokio::time::timeout(timeout, tx.send(payload)).await, Ok(Ok(())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::EventType;
    use serde_json::{Value, json};

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(TIMEOUT, 16)
    }

    async fn recv_json(rx: &mut mpsc::Receiver<String>) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("channel closed");
        serde_json::from_str(&text).unwrap()
    }

    fn event() -> ServerFrame {
        ServerFrame::event(EventType::ScalingDecision, &json!({"action": "scale_up"}))
    }

    #[tokio::test]
    async fn register_sends_welcome_only_to_new_observer() {
        let reg = registry();
        let (_, mut first) = reg.connect(None).await;
        assert_eq!(recv_json(&mut first).await["type"], "connection_established");

        let (second, mut second_rx) = reg.connect(Some("dash".into())).await;
        let welcome = recv_json(&mut second_rx).await;
        assert_eq!(welcome["client_id"], "dash");
        assert_eq!(second.client_id, "dash");
        assert!(first.try_recv().is_err());
    }

    #[tokio::test]
    async fn generated_client_ids_use_registration_ordinal() {
        let reg = registry();
        let (a, _a) = reg.connect(None).await;
        let (b, _b) = reg.connect(None).await;
        assert_eq!(a.client_id, "client_1");
        assert_eq!(b.client_id, "client_2");
    }

    #[tokio::test]
    async fn duplicate_client_ids_are_distinct_observers() {
        let reg = registry();
        let (a, _a) = reg.connect(Some("same".into())).await;
        let (b, _b) = reg.connect(Some("same".into())).await;
        assert_ne!(a.id, b.id);
        assert_eq!(reg.count().await, 2);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let reg = registry();
        let (obs, _rx) = reg.connect(None).await;
        reg.unregister(obs.id).await;
        reg.unregister(obs.id).await;
        assert_eq!(reg.count().await, 0);
    }

    #[tokio::test]
    async fn dead_observer_is_evicted_and_others_still_receive() {
        let reg = registry();
        let (_, mut rx1) = reg.connect(None).await;
        let (_, rx2) = reg.connect(None).await;
        let (_, mut rx3) = reg.connect(None).await;
        recv_json(&mut rx1).await;
        recv_json(&mut rx3).await;
        drop(rx2);

        let report = reg.broadcast(&event()).await;
        assert_eq!(report, BroadcastReport { delivered: 2, evicted: 1 });
        assert_eq!(reg.count().await, 2);

        for rx in [&mut rx1, &mut rx3] {
            let frame = recv_json(rx).await;
            assert_eq!(frame["type"], "scaling_event");
            assert_eq!(frame["event_type"], "scaling_decision");
        }
    }

    #[tokio::test]
    async fn observer_failing_between_broadcasts_keeps_only_first_event() {
        let reg = registry();
        let (_, mut rx1) = reg.connect(None).await;
        let (o2, mut rx2) = reg.connect(None).await;
        let (_, mut rx3) = reg.connect(None).await;
        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            assert_eq!(recv_json(rx).await["type"], "connection_established");
        }

        let first = reg.broadcast(&event()).await;
        assert_eq!(first, BroadcastReport { delivered: 3, evicted: 0 });
        let mut o2_events = Vec::new();
        while let Ok(text) = rx2.try_recv() {
            o2_events.push(serde_json::from_str::<Value>(&text).unwrap());
        }
        drop(rx2);

        let execution = ServerFrame::event(EventType::ScalingExecution, &json!({"target_instances": 6}));
        let second = reg.broadcast(&execution).await;
        assert_eq!(second, BroadcastReport { delivered: 2, evicted: 1 });

        assert_eq!(o2_events.len(), 1);
        assert_eq!(o2_events[0]["type"], "scaling_event");
        assert_eq!(o2_events[0]["event_type"], "scaling_decision");
        assert_eq!(reg.count().await, 2);
        assert!(reg.snapshot().await.iter().all(|o| o.id != o2.id));

        for rx in [&mut rx1, &mut rx3] {
            assert_eq!(recv_json(rx).await["event_type"], "scaling_decision");
            assert_eq!(recv_json(rx).await["event_type"], "scaling_execution");
        }
    }

    #[tokio::test]
    async fn count_after_broadcast_is_registered_minus_failed() {
        let reg = registry();
        let mut alive = Vec::new();
        for i in 0..5 {
            let (_, rx) = reg.connect(None).await;
            if i % 2 == 0 {
                alive.push(rx);
            }
        }
        let report = reg.broadcast(&event()).await;
        assert_eq!(report.evicted, 2);
        assert_eq!(reg.count().await, 3);
    }

    #[tokio::test]
    async fn stalled_observer_is_evicted_within_timeout() {
        let reg = registry();
        // Capacity one, filled by the welcome frame and never drained.
        let (stalled_tx, _stalled_rx) = mpsc::channel(1);
        reg.register(stalled_tx, Some("stalled".into())).await;
        let (_, mut healthy) = reg.connect(Some("healthy".into())).await;
        recv_json(&mut healthy).await;

        let started = tokio::time::Instant::now();
        let report = reg.broadcast(&event()).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(report, BroadcastReport { delivered: 1, evicted: 1 });
        assert_eq!(recv_json(&mut healthy).await["type"], "scaling_event");

        let remaining = reg.snapshot().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].client_id, "healthy");
    }

    #[tokio::test]
    async fn broadcast_to_nobody_is_a_no_op() {
        assert_eq!(registry().broadcast(&event()).await, BroadcastReport::default());
    }

    #[tokio::test]
    async fn send_to_unknown_or_closed_observer() {
        let reg = registry();
        let (obs, rx) = reg.connect(None).await;
        drop(rx);
        assert!(!reg.send_to(obs.id, &event()).await);
        assert_eq!(reg.count().await, 0);
        assert!(!reg.send_to(obs.id, &event()).await);
    }

    #[tokio::test]
    async fn delivery_refreshes_last_activity() {
        let reg = registry();
        let (obs, mut rx) = reg.connect(None).await;
        recv_json(&mut rx).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        reg.broadcast(&event()).await;

        let snap = reg.snapshot().await;
        assert_eq!(snap[0].connected_at, obs.connected_at);
        assert!(snap[0].last_activity > obs.last_activity);
    }

    #[tokio::test]
    async fn closed_sink_is_not_registered() {
        let reg = registry();
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        reg.register(tx, Some("gone".into())).await;
        assert_eq!(reg.count().await, 0);
    }

    #[tokio::test]
    async fn welcome_precedes_events_under_concurrent_broadcast() {
        let reg = ConnectionRegistry::new(TIMEOUT, 256);
        let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
        let spammer = tokio::spawn({
            let reg = reg.clone();
            async move {
                loop {
                    reg.broadcast(&event()).await;
                    tokio::task::yield_now().await;
                    if *stop_rx.borrow_and_update() {
                        break;
                    }
                }
            }
        });

        let mut receivers = Vec::new();
        for i in 0..20 {
            let (_, rx) = reg.connect(Some(format!("obs-{i}"))).await;
            receivers.push(rx);
            tokio::task::yield_now().await;
        }
        stop_tx.send(true).unwrap();
        spammer.await.unwrap();

        for rx in &mut receivers {
            assert_eq!(recv_json(rx).await["type"], "connection_established");
        }
    }

    #[tokio::test]
    async fn concurrent_register_and_broadcast() {
        let reg = ConnectionRegistry::new(TIMEOUT, 64);
        let mut joins = JoinSet::new();
        for i in 0..20 {
            let r = reg.clone();
            joins.spawn(async move { Some(r.connect(Some(format!("obs-{i}"))).await) });
            let r = reg.clone();
            joins.spawn(async move {
                r.broadcast(&event()).await;
                None
            });
        }

        let mut held = Vec::new();
        while let Some(res) = joins.join_next().await {
            if let Some(pair) = res.unwrap() {
                held.push(pair);
            }
        }

        assert_eq!(reg.count().await, 20);
        let mut ids: Vec<_> = held.iter().map(|(o, _)| o.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
    }
}
