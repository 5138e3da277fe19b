//! Publish coordination
//!
//! The reliability layer between scrapers and the broker. Scrapers enqueue
//! envelopes through a [`PublishHandle`]; one dedicated monitor task
//! dequeues, publishes with confirms enabled, and tracks every message in an
//! outstanding table until the broker delivers a terminal signal for its
//! sequence number. Broker callbacks never touch the table directly: the
//! transport forwards acks, nacks, and returns as [`ConfirmSignal`] messages
//! consumed by the same monitor task that publishes, which keeps the table
//! single-writer and serializes publish-and-register against confirm
//! handling.

mod transport;

pub use transport::LapinPublishTransport;

use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use mdp_common::shutdown::Shutdown;
use mdp_common::store::{MonitorState, StatusStore, UnroutableMessage, UnroutableMessageStore};
use mdp_common::types::{MessageEnvelope, Status};

/// Terminal signal for a published message, forwarded by the transport.
#[derive(Debug, Clone)]
pub enum ConfirmSignal {
    /// The broker accepted the message.
    Ack { sequence: u64 },
    /// The broker refused the message.
    Nack { sequence: u64 },
    /// The broker returned the message as unroutable. Independent of the
    /// ack/nack for the same publish, and may race it.
    Return {
        exchange: String,
        reply_code: u16,
        reply_text: String,
        routing_key: String,
    },
}

/// Broker publish primitive.
///
/// `publish` sends one serialized envelope (persistent, mandatory, confirms
/// enabled) and returns the sequence number the confirm will refer to.
/// Implementations deliver the eventual [`ConfirmSignal`]s on the channel
/// handed to them at construction.
pub trait PublishTransport: Send + Sync + 'static {
    fn publish(&self, body: Vec<u8>) -> impl Future<Output = anyhow::Result<u64>> + Send;

    /// Close channel then connection, in that order.
    fn close(&self) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Cheap handle for enqueueing envelopes with the coordinator.
#[derive(Clone)]
pub struct PublishHandle {
    intake_tx: mpsc::UnboundedSender<MessageEnvelope>,
}

impl PublishHandle {
    /// Queue an envelope for publishing. Returns immediately; delivery is
    /// not guaranteed until the broker confirms it.
    pub fn enqueue(&self, envelope: MessageEnvelope) {
        let _ = self.intake_tx.send(envelope);
    }
}

/// Owns the producer-side broker channel and the outstanding-confirm table.
///
/// Per-envelope state machine: Queued -> Published(seq) -> Acked | Nacked |
/// Returned. Nothing still outstanding at shutdown is republished; an entry
/// whose confirm is permanently lost stays in the table, and the table
/// length is observable for exactly that reason.
pub struct PublishCoordinator<T: PublishTransport> {
    name: &'static str,
    transport: T,
    intake_tx: mpsc::UnboundedSender<MessageEnvelope>,
    intake_rx: Mutex<Option<mpsc::UnboundedReceiver<MessageEnvelope>>>,
    confirm_rx: Mutex<Option<mpsc::UnboundedReceiver<ConfirmSignal>>>,
    outstanding: RwLock<HashMap<u64, MessageEnvelope>>,
    status: StatusStore,
    unroutable: UnroutableMessageStore,
    state: AtomicU8,
    shutdown: Shutdown,
}

impl<T: PublishTransport> PublishCoordinator<T> {
    pub fn new(
        name: &'static str,
        transport: T,
        confirm_rx: mpsc::UnboundedReceiver<ConfirmSignal>,
        status: StatusStore,
        unroutable: UnroutableMessageStore,
        shutdown: Shutdown,
    ) -> Arc<Self> {
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            name,
            transport,
            intake_tx,
            intake_rx: Mutex::new(Some(intake_rx)),
            confirm_rx: Mutex::new(Some(confirm_rx)),
            outstanding: RwLock::new(HashMap::new()),
            status,
            unroutable,
            state: AtomicU8::new(MonitorState::NotStarted as u8),
            shutdown,
        })
    }

    pub fn handle(&self) -> PublishHandle {
        PublishHandle {
            intake_tx: self.intake_tx.clone(),
        }
    }

    /// Number of publishes still waiting for a terminal confirm.
    pub fn outstanding_len(&self) -> usize {
        self.outstanding
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn monitor_state(&self) -> MonitorState {
        match self.state.load(Ordering::SeqCst) {
            0 => MonitorState::NotStarted,
            1 => MonitorState::Running,
            _ => MonitorState::Stopped,
        }
    }

    /// Start the monitor loop. A second call while running is a no-op, as is
    /// a call after shutdown has been requested.
    pub fn start_monitor(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.shutdown.is_requested() {
            info!("service '{}' is cancelled before starting to monitor", self.name);
            return None;
        }

        if self
            .state
            .compare_exchange(
                MonitorState::NotStarted as u8,
                MonitorState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            info!("service '{}' is already monitoring data for publish", self.name);
            return None;
        }

        let mut intake_rx = match take_receiver(&self.intake_rx) {
            Some(rx) => rx,
            None => {
                self.state.store(MonitorState::Stopped as u8, Ordering::SeqCst);
                return None;
            }
        };
        let mut confirm_rx = match take_receiver(&self.confirm_rx) {
            Some(rx) => rx,
            None => {
                self.state.store(MonitorState::Stopped as u8, Ordering::SeqCst);
                return None;
            }
        };

        info!("service '{}' starts to monitor data for publish", self.name);

        let coordinator = Arc::clone(self);
        let mut shutdown = self.shutdown.clone();
        Some(tokio::spawn(async move {
            loop {
                // A closed confirm or intake channel only disables its
                // branch; the loop still exits through the shutdown signal.
                tokio::select! {
                    biased;
                    _ = shutdown.triggered() => break,
                    Some(signal) = confirm_rx.recv() => coordinator.apply_confirm(signal),
                    Some(envelope) = intake_rx.recv() => coordinator.publish_envelope(envelope).await,
                    else => break,
                }
            }

            if let Err(e) = coordinator.transport.close().await {
                error!("service '{}' failed to close broker resources: {e:#}", coordinator.name);
            }

            coordinator.state.store(MonitorState::Stopped as u8, Ordering::SeqCst);
            info!("service '{}' is signaled to stop", coordinator.name);
        }))
    }

    async fn publish_envelope(&self, envelope: MessageEnvelope) {
        let identity = envelope.service_procedure.clone();

        let body = match envelope.to_bytes() {
            Ok(body) => body,
            Err(e) => {
                let detail = format!("failed to serialize data generated by {identity}: {e}");
                error!("service '{}' {detail}", self.name);
                self.status.push(identity, Status::Error, detail);
                return;
            }
        };

        info!("service '{}' starts to publish data generated by {identity}", self.name);

        match self.transport.publish(body).await {
            Ok(sequence) => {
                self.outstanding
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(sequence, envelope);
                info!(
                    "service '{}' finished publishing data generated by {identity} with sequence number '{sequence}'",
                    self.name
                );
            }
            Err(e) => {
                let detail = format!("failed to publish data generated by {identity}: {e:#}");
                error!("service '{}' {detail}", self.name);
                self.status.push(identity, Status::Error, detail);
            }
        }
    }

    fn apply_confirm(&self, signal: ConfirmSignal) {
        match signal {
            ConfirmSignal::Ack { sequence } => {
                if let Some(envelope) = self.remove_outstanding(sequence) {
                    // A confirmed publish supersedes any earlier recorded
                    // error for the same identity.
                    self.status.clear_error(&envelope.service_procedure);
                }
            }
            ConfirmSignal::Nack { sequence } => {
                if let Some(envelope) = self.remove_outstanding(sequence) {
                    let detail = format!(
                        "failed to publish data generated by {} with sequence number '{sequence}' as it is nack-ed by the message queue",
                        envelope.service_procedure
                    );
                    error!("service '{}' {detail}", self.name);
                    self.status
                        .push(envelope.service_procedure, Status::Error, detail);
                }
            }
            ConfirmSignal::Return {
                exchange,
                reply_code,
                reply_text,
                routing_key,
            } => {
                error!(
                    "service '{}' failed to publish data due to return from broker. Exchange:{exchange} ReplyCode:{reply_code} ReplyText:{reply_text} RoutingKey:{routing_key}",
                    self.name
                );
                self.unroutable.enqueue(UnroutableMessage {
                    exchange,
                    reply_code,
                    reply_text,
                    routing_key,
                    utc_timestamp: Utc::now(),
                });
            }
        }
    }

    fn remove_outstanding(&self, sequence: u64) -> Option<MessageEnvelope> {
        self.outstanding
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&sequence)
    }
}

fn take_receiver<R>(slot: &Mutex<Option<mpsc::UnboundedReceiver<R>>>) -> Option<mpsc::UnboundedReceiver<R>> {
    slot.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
}
