use crate::bus::{Acknowledger, Delivery, DeliveryStream, ExchangeKind, MessageBus, QueueOptions};
use crate::topology::routing_key_matches;
use async_trait::async_trait;
use convoy_core::{ConvoyError, ConvoyResult};
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tracing::{debug, warn};

/// A message accepted by an exchange, recorded for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
}

impl PublishedMessage {
    pub fn parse<T: DeserializeOwned>(&self) -> ConvoyResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[derive(Clone)]
struct Envelope {
    exchange: String,
    routing_key: String,
    body: Vec<u8>,
    redelivered: bool,
}

struct Binding {
    queue: String,
    pattern: String,
}

struct ExchangeState {
    kind: ExchangeKind,
    bindings: Vec<Binding>,
}

struct QueueState {
    messages: VecDeque<Envelope>,
    notify: Arc<Notify>,
    dead_letter_exchange: Option<String>,
    consumer: Option<String>,
}

#[derive(Default)]
struct Broker {
    exchanges: HashMap<String, ExchangeState>,
    queues: HashMap<String, QueueState>,
    published: Vec<PublishedMessage>,
}

impl Broker {
    fn route(&mut self, envelope: &Envelope) -> ConvoyResult<usize> {
        let exchange = self.exchanges.get(&envelope.exchange).ok_or_else(|| {
            ConvoyError::communication("broker", format!("no exchange '{}'", envelope.exchange))
        })?;

        let mut targets: Vec<&str> = Vec::new();
        for binding in &exchange.bindings {
            let hit = match exchange.kind {
                ExchangeKind::Direct => binding.pattern == envelope.routing_key,
                ExchangeKind::Topic => routing_key_matches(&binding.pattern, &envelope.routing_key),
            };
            if hit && !targets.contains(&binding.queue.as_str()) {
                targets.push(&binding.queue);
            }
        }
        let targets: Vec<String> = targets.into_iter().map(str::to_owned).collect();

        for name in &targets {
            if let Some(queue) = self.queues.get_mut(name) {
                queue.messages.push_back(envelope.clone());
                queue.notify.notify_one();
            }
        }
        if targets.is_empty() {
            debug!(
                exchange = %envelope.exchange,
                routing_key = %envelope.routing_key,
                "Unroutable message dropped"
            );
        }
        Ok(targets.len())
    }
}

/// In-process broker client with topic/direct routing, explicit acks,
/// requeue and dead-lettering.
///
/// Several clients can share one broker through [`InMemoryBus::handle`];
/// each has its own connection state, like separate processes would.
pub struct InMemoryBus {
    broker: Arc<Mutex<Broker>>,
    connected: Arc<AtomicBool>,
    generation: watch::Sender<u64>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    /// A fresh broker with one disconnected client.
    pub fn new() -> Self {
        Self::with_broker(Arc::new(Mutex::new(Broker::default())))
    }

    fn with_broker(broker: Arc<Mutex<Broker>>) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            broker,
            connected: Arc::new(AtomicBool::new(false)),
            generation,
        }
    }

    /// Another disconnected client on the same broker.
    pub fn handle(&self) -> Self {
        Self::with_broker(self.broker.clone())
    }

    /// Simulate losing the connection: consumers end and operations fail
    /// until `connect` is called again.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.generation.send_modify(|g| *g += 1);
    }

    /// Every message accepted so far, across all clients of this broker.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.broker.lock().published.clone()
    }

    pub fn published_to(&self, exchange: &str) -> Vec<PublishedMessage> {
        self.broker
            .lock()
            .published
            .iter()
            .filter(|m| m.exchange == exchange)
            .cloned()
            .collect()
    }

    /// Ready (undelivered) messages in `queue`.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.broker
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.messages.len())
    }

    pub fn has_consumer(&self, queue: &str) -> bool {
        self.broker
            .lock()
            .queues
            .get(queue)
            .is_some_and(|q| q.consumer.is_some())
    }

    fn ensure_connected(&self) -> ConvoyResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConvoyError::NotConnected)
        }
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn connect(&self) -> ConvoyResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> ConvoyResult<()> {
        self.ensure_connected()?;
        let mut broker = self.broker.lock();
        match broker.exchanges.get(name) {
            Some(existing) if existing.kind != kind => Err(ConvoyError::communication(
                "broker",
                format!("exchange '{name}' already declared as {:?}", existing.kind),
            )),
            Some(_) => Ok(()),
            None => {
                broker.exchanges.insert(
                    name.to_string(),
                    ExchangeState {
                        kind,
                        bindings: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> ConvoyResult<()> {
        self.ensure_connected()?;
        self.broker
            .lock()
            .queues
            .entry(name.to_string())
            .or_insert_with(|| QueueState {
                messages: VecDeque::new(),
                notify: Arc::new(Notify::new()),
                dead_letter_exchange: options.dead_letter_exchange.clone(),
                consumer: None,
            });
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> ConvoyResult<()> {
        self.ensure_connected()?;
        let mut broker = self.broker.lock();
        if !broker.queues.contains_key(queue) {
            return Err(ConvoyError::communication(
                "broker",
                format!("no queue '{queue}'"),
            ));
        }
        let state = broker.exchanges.get_mut(exchange).ok_or_else(|| {
            ConvoyError::communication("broker", format!("no exchange '{exchange}'"))
        })?;
        let exists = state
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.pattern == routing_key);
        if !exists {
            state.bindings.push(Binding {
                queue: queue.to_string(),
                pattern: routing_key.to_string(),
            });
        }
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> ConvoyResult<()> {
        self.ensure_connected()?;
        let envelope = Envelope {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: payload.to_vec(),
            redelivered: false,
        };
        let mut broker = self.broker.lock();
        broker.route(&envelope)?;
        broker.published.push(PublishedMessage {
            exchange: envelope.exchange,
            routing_key: envelope.routing_key,
            body: envelope.body,
        });
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> ConvoyResult<DeliveryStream> {
        self.ensure_connected()?;
        let notify = {
            let mut broker = self.broker.lock();
            let state = broker.queues.get_mut(queue).ok_or_else(|| {
                ConvoyError::communication("broker", format!("no queue '{queue}'"))
            })?;
            if let Some(existing) = &state.consumer {
                return Err(ConvoyError::communication(
                    "broker",
                    format!("queue '{queue}' is already consumed by '{existing}'"),
                ));
            }
            state.consumer = Some(consumer_tag.to_string());
            state.notify.clone()
        };

        let mut generation = self.generation.subscribe();
        let epoch = *generation.borrow_and_update();
        let consumer = Consumer {
            broker: self.broker.clone(),
            queue: queue.to_string(),
            notify,
            generation,
            epoch,
            connected: self.connected.clone(),
        };

        let deliveries = stream::unfold(consumer, |mut consumer| async move {
            let envelope = consumer.next_envelope().await?;
            let delivery = consumer.delivery(envelope);
            Some((Ok(delivery), consumer))
        });
        Ok(deliveries.boxed())
    }

    async fn close(&self) -> ConvoyResult<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.generation.send_modify(|g| *g += 1);
        }
        Ok(())
    }
}

struct Consumer {
    broker: Arc<Mutex<Broker>>,
    queue: String,
    notify: Arc<Notify>,
    generation: watch::Receiver<u64>,
    epoch: u64,
    connected: Arc<AtomicBool>,
}

impl Consumer {
    async fn next_envelope(&mut self) -> Option<Envelope> {
        loop {
            if *self.generation.borrow() != self.epoch {
                return None;
            }
            let next = self
                .broker
                .lock()
                .queues
                .get_mut(&self.queue)
                .and_then(|q| q.messages.pop_front());
            if next.is_some() {
                return next;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                changed = self.generation.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    fn delivery(&self, envelope: Envelope) -> Delivery {
        let acker = MemoryAcker {
            broker: self.broker.clone(),
            queue: self.queue.clone(),
            envelope: envelope.clone(),
            connected: self.connected.clone(),
        };
        Delivery::new(
            envelope.exchange,
            envelope.routing_key,
            envelope.body,
            envelope.redelivered,
            Box::new(acker),
        )
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        if let Some(queue) = self.broker.lock().queues.get_mut(&self.queue) {
            queue.consumer = None;
        }
    }
}

struct MemoryAcker {
    broker: Arc<Mutex<Broker>>,
    queue: String,
    envelope: Envelope,
    connected: Arc<AtomicBool>,
}

impl MemoryAcker {
    fn ensure_connected(&self) -> ConvoyResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConvoyError::NotConnected)
        }
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> ConvoyResult<()> {
        self.ensure_connected()
    }

    async fn nack(&self, requeue: bool) -> ConvoyResult<()> {
        self.ensure_connected()?;
        let mut broker = self.broker.lock();

        if requeue {
            if let Some(queue) = broker.queues.get_mut(&self.queue) {
                let mut envelope = self.envelope.clone();
                envelope.redelivered = true;
                queue.messages.push_front(envelope);
                queue.notify.notify_one();
            }
            return Ok(());
        }

        let dead_letter = broker
            .queues
            .get(&self.queue)
            .and_then(|q| q.dead_letter_exchange.clone());
        match dead_letter {
            Some(exchange) => {
                let envelope = Envelope {
                    exchange,
                    ..self.envelope.clone()
                };
                if let Err(e) = broker.route(&envelope) {
                    warn!(queue = %self.queue, error = %e, "Dead-letter routing failed, message dropped");
                }
            }
            None => {
                warn!(
                    queue = %self.queue,
                    routing_key = %self.envelope.routing_key,
                    "Message rejected without dead-letter exchange, dropped"
                );
            }
        }
        Ok(())
    }
}
