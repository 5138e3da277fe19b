//! AMQP consume transport

use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicQosOptions, BasicRejectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use tracing::warn;

use mdp_common::config::MessageQueueConfig;

use super::IncomingDelivery;

/// Consumes one durable queue with manual acknowledgment and prefetch 1.
pub struct LapinConsumeTransport {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
    consumer_tag: String,
}

impl LapinConsumeTransport {
    /// Connect to the broker, open the consumer channel with prefetch 1,
    /// declare the durable queue, and register the consumer.
    pub async fn connect(config: &MessageQueueConfig) -> anyhow::Result<Self> {
        let connection =
            Connection::connect(&config.amqp_uri(), ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        // Prefetch 1: the broker withholds the next delivery until the
        // current one is settled.
        channel.basic_qos(1, BasicQosOptions::default()).await?;
        channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let consumer = channel
            .basic_consume(
                &config.queue,
                "mdp-importer",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        let consumer_tag = consumer.tag().as_str().to_string();

        Ok(Self {
            connection,
            channel,
            consumer,
            consumer_tag,
        })
    }
}

impl super::ConsumeTransport for LapinConsumeTransport {
    async fn next_delivery(&mut self) -> Option<anyhow::Result<IncomingDelivery>> {
        self.consumer.next().await.map(|result| {
            result
                .map(|delivery| IncomingDelivery {
                    consumer_tag: self.consumer_tag.clone(),
                    delivery_tag: delivery.delivery_tag,
                    redelivered: delivery.redelivered,
                    exchange: delivery.exchange.as_str().to_string(),
                    routing_key: delivery.routing_key.as_str().to_string(),
                    body: delivery.data,
                })
                .map_err(anyhow::Error::from)
        })
    }

    async fn ack(&self, delivery_tag: u64) -> anyhow::Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64) -> anyhow::Result<()> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue: false })
            .await?;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        if let Err(e) = self.channel.close(200, "shutting down").await {
            warn!("failed to close consumer channel gracefully: {e}");
        }
        self.connection.close(200, "shutting down").await?;
        Ok(())
    }
}
