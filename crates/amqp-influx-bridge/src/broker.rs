// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! AMQP broker session.
//!
//! One connection, one channel, held for the process lifetime. The session
//! declares the exchange/queue/binding, sets the prefetch window and hands
//! out deliveries as a stream of [`RawMessage`]s.
//!
//! Deliveries are auto-acknowledged: once a message is on the stream the
//! broker considers it handled. Stopping intake therefore goes through
//! [`BrokerSession::cancel_consumer`], after which the stream yields what it
//! already holds and then ends.

use crate::config::{BrokerConfig, ExchangeType};
use crate::error::BrokerError;
use futures_util::stream::{BoxStream, StreamExt};
use lapin::options::{
    BasicCancelOptions, BasicConsumeOptions, BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};

/// Reply code sent with channel.close / connection.close on shutdown.
const REPLY_SUCCESS: u16 = 200;

/// One delivery: body bytes plus the metadata worth logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub body: Vec<u8>,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
}

impl RawMessage {
    /// Message with only a body, as produced by tests and local tools.
    pub fn from_body(body: impl Into<Vec<u8>>, delivery_tag: u64) -> Self {
        Self {
            body: body.into(),
            delivery_tag,
            redelivered: false,
            exchange: String::new(),
            routing_key: String::new(),
        }
    }
}

impl From<lapin::message::Delivery> for RawMessage {
    fn from(delivery: lapin::message::Delivery) -> Self {
        Self {
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
            exchange: delivery.exchange.as_str().to_string(),
            routing_key: delivery.routing_key.as_str().to_string(),
            body: delivery.data,
        }
    }
}

/// Stream of deliveries. An `Err` item means the channel is gone.
pub type MessageStream = BoxStream<'static, Result<RawMessage, BrokerError>>;

/// An active consumer: its broker-side tag and its deliveries.
pub struct Subscription {
    pub consumer_tag: String,
    pub messages: MessageStream,
}

/// Auto-ack, non-exclusive consumer.
fn consume_options() -> BasicConsumeOptions {
    BasicConsumeOptions {
        no_ack: true,
        exclusive: false,
        ..BasicConsumeOptions::default()
    }
}

/// Prefetch applies per consumer, not to the whole channel.
fn qos_options() -> BasicQosOptions {
    BasicQosOptions { global: false }
}

/// Exchange, queue and binding to declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub exchange_type: ExchangeType,
    pub queue: String,
}

impl From<&BrokerConfig> for Topology {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            exchange: config.exchange.clone(),
            exchange_type: config.exchange_type,
            queue: config.queue.clone(),
        }
    }
}

impl Topology {
    fn exchange_options(&self) -> ExchangeDeclareOptions {
        ExchangeDeclareOptions {
            durable: true,
            ..ExchangeDeclareOptions::default()
        }
    }

    fn queue_options(&self) -> QueueDeclareOptions {
        QueueDeclareOptions {
            durable: false,
            exclusive: false,
            auto_delete: false,
            ..QueueDeclareOptions::default()
        }
    }
}

/// Live connection and channel to the broker.
pub struct BrokerSession {
    connection: Connection,
    channel: Channel,
}

impl BrokerSession {
    /// Open a connection and a channel over it.
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);

        let connection = Connection::connect(url, properties)
            .await
            .map_err(BrokerError::Connect)?;
        let channel = connection
            .create_channel()
            .await
            .map_err(BrokerError::Channel)?;

        tracing::info!(channel = channel.id(), "Connected to broker");
        Ok(Self {
            connection,
            channel,
        })
    }

    /// Declare the exchange (durable) and the queue, then bind them with an
    /// empty routing key. Safe to repeat with the same parameters.
    pub async fn declare_topology(&self, topology: &Topology) -> Result<(), BrokerError> {
        self.channel
            .exchange_declare(
                &topology.exchange,
                topology.exchange_type.into(),
                topology.exchange_options(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| BrokerError::Declare {
                what: "exchange",
                name: topology.exchange.clone(),
                source,
            })?;

        let queue = self
            .channel
            .queue_declare(
                &topology.queue,
                topology.queue_options(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| BrokerError::Declare {
                what: "queue",
                name: topology.queue.clone(),
                source,
            })?;

        self.channel
            .queue_bind(
                &topology.queue,
                &topology.exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| BrokerError::Declare {
                what: "binding",
                name: format!("{} -> {}", topology.exchange, topology.queue),
                source,
            })?;

        tracing::info!(
            exchange = %topology.exchange,
            kind = %topology.exchange_type,
            queue = %topology.queue,
            backlog = queue.message_count(),
            "Declared topology"
        );
        Ok(())
    }

    /// Limit unacknowledged deliveries in flight to this consumer.
    pub async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
        self.channel
            .basic_qos(count, qos_options())
            .await
            .map_err(BrokerError::Qos)?;
        tracing::debug!(prefetch = count, "Prefetch set");
        Ok(())
    }

    /// Start consuming `queue` with auto-acknowledge.
    ///
    /// An empty `consumer_tag` lets the broker generate one; the returned
    /// [`Subscription`] carries the tag actually in use.
    pub async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<Subscription, BrokerError> {
        let consumer = self
            .channel
            .basic_consume(queue, consumer_tag, consume_options(), FieldTable::default())
            .await
            .map_err(|source| BrokerError::Consume {
                queue: queue.to_string(),
                source,
            })?;

        let consumer_tag = consumer.tag().as_str().to_string();
        tracing::info!(queue, tag = %consumer_tag, "Consuming");
        let messages = consumer
            .map(|delivery| delivery.map(RawMessage::from).map_err(BrokerError::Delivery))
            .boxed();
        Ok(Subscription {
            consumer_tag,
            messages,
        })
    }

    /// Ask the broker to stop delivering to `consumer_tag`.
    ///
    /// Deliveries already pushed to this client stay on the stream; the
    /// stream ends once they have been taken.
    pub async fn cancel_consumer(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|source| BrokerError::Cancel {
                tag: consumer_tag.to_string(),
                source,
            })?;
        tracing::info!(tag = consumer_tag, "Consumer cancelled");
        Ok(())
    }

    /// Close the channel, then the connection. Errors are logged, not returned:
    /// there is nothing left to do with a session that fails to close.
    pub async fn close(self) {
        if let Err(e) = self.channel.close(REPLY_SUCCESS, "bye").await {
            tracing::debug!("Channel close: {}", e);
        }
        if let Err(e) = self.connection.close(REPLY_SUCCESS, "bye").await {
            tracing::debug!("Connection close: {}", e);
        }
        tracing::info!("Broker session closed");
    }
}
