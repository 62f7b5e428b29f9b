use crate::bus::{Acknowledger, BusConfig, Delivery, DeliveryStream, ExchangeKind, MessageBus, QueueOptions};
use async_trait::async_trait;
use convoy_core::{ConvoyError, ConvoyResult};
use futures_util::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const PERSISTENT: u8 = 2;

struct Session {
    connection: Connection,
    channel: Channel,
    healthy: Arc<AtomicBool>,
}

/// AMQP 0-9-1 client backed by lapin.
///
/// Holds one connection and one channel with publisher confirms enabled.
/// A connection or channel error marks the session dead; it is not
/// re-established automatically.
pub struct AmqpBus {
    config: BusConfig,
    session: RwLock<Option<Session>>,
}

impl AmqpBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            session: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    fn channel(&self) -> ConvoyResult<Channel> {
        let session = self.session.read();
        match session.as_ref() {
            Some(s) if s.healthy.load(Ordering::SeqCst) && s.channel.status().connected() => {
                Ok(s.channel.clone())
            }
            _ => Err(ConvoyError::NotConnected),
        }
    }
}

fn amqp_err(e: lapin::Error) -> ConvoyError {
    ConvoyError::communication("amqp", e)
}

#[async_trait]
impl MessageBus for AmqpBus {
    async fn connect(&self) -> ConvoyResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        let connection = Connection::connect(&self.config.url, ConnectionProperties::default())
            .await
            .map_err(amqp_err)?;
        let channel = connection.create_channel().await.map_err(amqp_err)?;
        channel
            .basic_qos(self.config.prefetch_count(), BasicQosOptions::default())
            .await
            .map_err(amqp_err)?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(amqp_err)?;

        let healthy = Arc::new(AtomicBool::new(true));
        let flag = healthy.clone();
        connection.on_error(move |err| {
            error!(error = %err, "Message bus connection lost");
            flag.store(false, Ordering::SeqCst);
        });
        let flag = healthy.clone();
        channel.on_error(move |err| {
            error!(error = %err, "Message bus channel closed");
            flag.store(false, Ordering::SeqCst);
        });

        info!(prefetch = self.config.prefetch_count(), "Connected to message bus");
        *self.session.write() = Some(Session {
            connection,
            channel,
            healthy,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.channel().is_ok()
    }

    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> ConvoyResult<()> {
        let kind = match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        };
        let options = ExchangeDeclareOptions {
            durable: true,
            ..ExchangeDeclareOptions::default()
        };
        self.channel()?
            .exchange_declare(name, kind, options, FieldTable::default())
            .await
            .map_err(amqp_err)?;
        debug!(exchange = name, "Exchange declared");
        Ok(())
    }

    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> ConvoyResult<()> {
        let mut args = FieldTable::default();
        if let Some(dlx) = &options.dead_letter_exchange {
            args.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(dlx.as_str().into()),
            );
        }
        let declare = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };
        self.channel()?
            .queue_declare(name, declare, args)
            .await
            .map_err(amqp_err)?;
        debug!(queue = name, dead_letter = ?options.dead_letter_exchange, "Queue declared");
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> ConvoyResult<()> {
        self.channel()?
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(amqp_err)?;
        debug!(queue, exchange, routing_key, "Queue bound");
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> ConvoyResult<()> {
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(PERSISTENT);
        let confirmation = self
            .channel()?
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(amqp_err)?
            .await
            .map_err(amqp_err)?;

        if confirmation.is_nack() {
            return Err(ConvoyError::communication(
                "amqp",
                format!("broker rejected message for {exchange}/{routing_key}"),
            ));
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> ConvoyResult<DeliveryStream> {
        let consumer = self
            .channel()?
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(amqp_err)?;
        info!(queue, consumer_tag, "Consuming");

        let deliveries = consumer.map(|item| -> ConvoyResult<Delivery> {
            let lapin::message::Delivery {
                exchange,
                routing_key,
                redelivered,
                data,
                acker,
                ..
            } = item.map_err(amqp_err)?;
            Ok(Delivery::new(
                exchange.as_str(),
                routing_key.as_str(),
                data,
                redelivered,
                Box::new(AmqpAcker { acker }),
            ))
        });
        Ok(deliveries.boxed())
    }

    async fn close(&self) -> ConvoyResult<()> {
        let Some(session) = self.session.write().take() else {
            return Ok(());
        };
        session.healthy.store(false, Ordering::SeqCst);

        if let Err(e) = session.channel.close(200, "closing").await {
            warn!(error = %e, "Channel close failed");
        }
        session
            .connection
            .close(200, "closing")
            .await
            .map_err(amqp_err)?;
        info!("Message bus connection closed");
        Ok(())
    }
}

struct AmqpAcker {
    acker: Acker,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> ConvoyResult<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(amqp_err)
    }

    async fn nack(&self, requeue: bool) -> ConvoyResult<()> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            })
            .await
            .map_err(amqp_err)
    }
}
