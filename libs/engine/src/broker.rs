use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sensor_api::{MeasurementEvent, TopicKey};

use crate::error::EngineError;

// ═══════════════════════════════════════════════════════════════
//  BrokerConfig
// ═══════════════════════════════════════════════════════════════

fn default_subscriber_buffer() -> usize {
    32
}

fn default_publish_queue() -> usize {
    64
}

fn default_publish_timeout_ms() -> u64 {
    250
}

fn default_partition_by_sensor() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Per-subscriber buffer. A subscriber that lets it fill up is dropped.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    /// Capacity of the broker's own inbound event queue.
    #[serde(default = "default_publish_queue")]
    pub publish_queue: usize,
    /// How long `publish` waits on a full inbound queue before giving up.
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    /// Deliver only to subscribers whose filter equals the event's sensor.
    /// When off, every subscriber sees every event.
    #[serde(default = "default_partition_by_sensor")]
    pub partition_by_sensor: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
            publish_queue: default_publish_queue(),
            publish_timeout_ms: default_publish_timeout_ms(),
            partition_by_sensor: default_partition_by_sensor(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Subscription
// ═══════════════════════════════════════════════════════════════

pub type SubscriberId = u64;

/// Why a subscription stopped receiving events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Buffer was full when an event arrived.
    Evicted,
    /// The holder asked to leave.
    Unsubscribed,
    /// The broker stopped.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Evicted => "slow consumer dropped",
            CloseReason::Unsubscribed => "unsubscribed",
            CloseReason::Shutdown => "server shutting down",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiving end of one registered subscriber.
///
/// Dropping it unregisters the subscriber.
pub struct Subscription {
    id: SubscriberId,
    filter: TopicKey,
    rx: mpsc::Receiver<Arc<MeasurementEvent>>,
    close_rx: oneshot::Receiver<CloseReason>,
    unregister_tx: mpsc::UnboundedSender<SubscriberId>,
    unregistered: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event, or `None` once the broker has closed this subscriber and
    /// the buffered events are drained.
    pub async fn recv(&mut self) -> Option<Arc<MeasurementEvent>> {
        self.rx.recv().await
    }

    /// Why the subscription ended. Meant to be awaited after `recv`
    /// returned `None`.
    pub async fn close_reason(&mut self) -> CloseReason {
        (&mut self.close_rx).await.unwrap_or(CloseReason::Shutdown)
    }

    /// Ask the broker to drop this subscriber. Repeated calls are no-ops.
    pub fn unsubscribe(&mut self) {
        if !self.unregistered {
            self.unregistered = true;
            let _ = self.unregister_tx.send(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Broker
// ═══════════════════════════════════════════════════════════════

struct Subscriber {
    filter: TopicKey,
    tx: mpsc::Sender<Arc<MeasurementEvent>>,
    close_tx: oneshot::Sender<CloseReason>,
}

struct Register {
    id: SubscriberId,
    subscriber: Subscriber,
    ack: oneshot::Sender<()>,
}

/// Cloneable handle for registering subscribers and publishing events.
///
/// The subscriber set itself lives in the task returned by
/// [`Broker::new`]; handles only talk to it through queues.
#[derive(Clone)]
pub struct Broker {
    register_tx: mpsc::Sender<Register>,
    unregister_tx: mpsc::UnboundedSender<SubscriberId>,
    publish_tx: mpsc::Sender<Arc<MeasurementEvent>>,
    next_id: Arc<AtomicU64>,
    subscriber_buffer: usize,
    publish_timeout: Duration,
}

impl Broker {
    /// Build a handle and the loop that serves it. The loop does nothing
    /// until it is run, see [`BrokerLoop::run`].
    pub fn new(config: &BrokerConfig) -> (Self, BrokerLoop) {
        let (register_tx, register_rx) = mpsc::channel(16);
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (publish_tx, publish_rx) = mpsc::channel(config.publish_queue.max(1));
        let handle = Self {
            register_tx,
            unregister_tx,
            publish_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            subscriber_buffer: config.subscriber_buffer.max(1),
            publish_timeout: Duration::from_millis(config.publish_timeout_ms),
        };
        let broker_loop = BrokerLoop {
            register_rx,
            unregister_rx,
            publish_rx,
            partition_by_sensor: config.partition_by_sensor,
            subscribers: HashMap::new(),
        };
        (handle, broker_loop)
    }

    /// Build and spawn the broker loop on the current runtime.
    pub fn spawn(config: &BrokerConfig, token: CancellationToken) -> (Self, JoinHandle<()>) {
        let (handle, broker_loop) = Self::new(config);
        let task = tokio::spawn(broker_loop.run(token));
        (handle, task)
    }

    /// Register a subscriber with the default buffer size.
    pub async fn subscribe(&self, filter: TopicKey) -> Result<Subscription, EngineError> {
        self.subscribe_with_buffer(filter, self.subscriber_buffer).await
    }

    /// Register a subscriber. Returns once the broker has it in its set, so
    /// every event published afterwards is offered to it.
    pub async fn subscribe_with_buffer(
        &self,
        filter: TopicKey,
        buffer: usize,
    ) -> Result<Subscription, EngineError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (close_tx, close_rx) = oneshot::channel();
        let (ack_tx, ack_rx) = oneshot::channel();

        let request = Register {
            id,
            subscriber: Subscriber {
                filter: filter.clone(),
                tx,
                close_tx,
            },
            ack: ack_tx,
        };
        self.register_tx
            .send(request)
            .await
            .map_err(|_| EngineError::BrokerClosed)?;
        ack_rx.await.map_err(|_| EngineError::BrokerClosed)?;

        Ok(Subscription {
            id,
            filter,
            rx,
            close_rx,
            unregister_tx: self.unregister_tx.clone(),
            unregistered: false,
        })
    }

    /// Hand an event to the broker. Never fails: if the inbound queue stays
    /// full for the publish timeout, the event is dropped with a warning.
    pub async fn publish(&self, event: MeasurementEvent) {
        let topic = event.topic();
        let send = self.publish_tx.send(Arc::new(event));
        match tokio::time::timeout(self.publish_timeout, send).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                tracing::debug!(topic = %topic, "broker stopped, event dropped");
            }
            Err(_) => {
                tracing::warn!(
                    topic = %topic,
                    timeout_ms = self.publish_timeout.as_millis() as u64,
                    "broker queue full, event dropped"
                );
            }
        }
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("subscriber_buffer", &self.subscriber_buffer)
            .field("publish_timeout", &self.publish_timeout)
            .finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════════
//  BrokerLoop
// ═══════════════════════════════════════════════════════════════

/// The task that owns the subscriber set.
pub struct BrokerLoop {
    register_rx: mpsc::Receiver<Register>,
    unregister_rx: mpsc::UnboundedReceiver<SubscriberId>,
    publish_rx: mpsc::Receiver<Arc<MeasurementEvent>>,
    partition_by_sensor: bool,
    subscribers: HashMap<SubscriberId, Subscriber>,
}

impl BrokerLoop {
    /// Serve until `token` is cancelled or every [`Broker`] handle is gone.
    /// Remaining subscribers are closed with [`CloseReason::Shutdown`].
    pub async fn run(mut self, token: CancellationToken) {
        tracing::debug!("broker started");
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                Some(req) = self.register_rx.recv() => self.register(req),
                Some(id) = self.unregister_rx.recv() => self.close(id, CloseReason::Unsubscribed),
                event = self.publish_rx.recv() => match event {
                    Some(event) => self.dispatch(&event),
                    None => break,
                },
            }
        }

        let remaining = self.subscribers.len();
        for (_, sub) in self.subscribers.drain() {
            let _ = sub.close_tx.send(CloseReason::Shutdown);
        }
        tracing::info!(subscribers = remaining, "broker stopped");
    }

    fn register(&mut self, req: Register) {
        tracing::debug!(subscriber = req.id, filter = %req.subscriber.filter, "subscriber registered");
        self.subscribers.insert(req.id, req.subscriber);
        let _ = req.ack.send(());
    }

    fn close(&mut self, id: SubscriberId, reason: CloseReason) {
        if let Some(sub) = self.subscribers.remove(&id) {
            tracing::debug!(subscriber = id, filter = %sub.filter, reason = %reason, "subscriber removed");
            let _ = sub.close_tx.send(reason);
        }
    }

    fn dispatch(&mut self, event: &Arc<MeasurementEvent>) {
        let topic = event.topic();
        let mut evicted = Vec::new();
        let mut gone = Vec::new();

        for (&id, sub) in &self.subscribers {
            if self.partition_by_sensor && sub.filter != topic {
                continue;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => evicted.push(id),
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(id),
            }
        }

        for id in evicted {
            tracing::warn!(subscriber = id, topic = %topic, "slow consumer dropped");
            self.close(id, CloseReason::Evicted);
        }
        for id in gone {
            self.close(id, CloseReason::Unsubscribed);
        }
    }
}
