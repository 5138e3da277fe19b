//! AMQP publish transport

use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{error, warn};

use mdp_common::config::MessageQueueConfig;

use super::ConfirmSignal;

/// Persistent delivery mode for published messages.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Publishes to one durable queue through the default exchange with
/// publisher confirms enabled.
///
/// Each publish is assigned the next channel sequence number; the pending
/// confirm is awaited on a spawned task that forwards the outcome to the
/// coordinator's confirm channel. A returned mandatory message arrives
/// attached to its confirm and is forwarded as a separate `Return` signal
/// before the terminal ack/nack.
pub struct LapinPublishTransport {
    connection: Connection,
    channel: Channel,
    queue: String,
    sequence: AtomicU64,
    confirm_tx: mpsc::UnboundedSender<ConfirmSignal>,
}

impl LapinPublishTransport {
    /// Connect to the broker, open the producer channel, enable confirms,
    /// and declare the durable queue.
    pub async fn connect(
        config: &MessageQueueConfig,
        confirm_tx: mpsc::UnboundedSender<ConfirmSignal>,
    ) -> anyhow::Result<Self> {
        let connection =
            Connection::connect(&config.amqp_uri(), ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel.confirm_select(ConfirmSelectOptions::default()).await?;
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

        Ok(Self {
            connection,
            channel,
            queue: config.queue.clone(),
            sequence: AtomicU64::new(0),
            confirm_tx,
        })
    }

    fn forward_confirmation(
        confirm_tx: &mpsc::UnboundedSender<ConfirmSignal>,
        sequence: u64,
        confirmation: Confirmation,
    ) {
        match confirmation {
            Confirmation::Ack(returned) => {
                if let Some(message) = returned {
                    Self::forward_return(confirm_tx, *message);
                }
                let _ = confirm_tx.send(ConfirmSignal::Ack { sequence });
            }
            Confirmation::Nack(returned) => {
                if let Some(message) = returned {
                    Self::forward_return(confirm_tx, *message);
                }
                let _ = confirm_tx.send(ConfirmSignal::Nack { sequence });
            }
            // Confirms are always selected on this channel; treat an
            // unconfirmed outcome as accepted rather than leaking the entry.
            Confirmation::NotRequested => {
                let _ = confirm_tx.send(ConfirmSignal::Ack { sequence });
            }
        }
    }

    fn forward_return(
        confirm_tx: &mpsc::UnboundedSender<ConfirmSignal>,
        message: lapin::message::BasicReturnMessage,
    ) {
        let _ = confirm_tx.send(ConfirmSignal::Return {
            exchange: message.delivery.exchange.as_str().to_string(),
            reply_code: message.reply_code,
            reply_text: message.reply_text.as_str().to_string(),
            routing_key: message.delivery.routing_key.as_str().to_string(),
        });
    }
}

impl super::PublishTransport for LapinPublishTransport {
    async fn publish(&self, body: Vec<u8>) -> anyhow::Result<u64> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        let pending = self
            .channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions {
                    mandatory: true,
                    ..Default::default()
                },
                &body,
                BasicProperties::default().with_delivery_mode(DELIVERY_MODE_PERSISTENT),
            )
            .await?;

        let confirm_tx = self.confirm_tx.clone();
        tokio::spawn(async move {
            match pending.await {
                Ok(confirmation) => {
                    Self::forward_confirmation(&confirm_tx, sequence, confirmation);
                }
                // The confirm is lost, e.g. the channel closed before the
                // broker answered. The outstanding entry is left in place.
                Err(e) => {
                    error!(
                        "confirm for sequence number '{sequence}' was lost: {e}"
                    );
                }
            }
        });

        Ok(sequence)
    }

    async fn close(&self) -> anyhow::Result<()> {
        if let Err(e) = self.channel.close(200, "shutting down").await {
            warn!("failed to close producer channel gracefully: {e}");
        }
        self.connection.close(200, "shutting down").await?;
        Ok(())
    }
}
