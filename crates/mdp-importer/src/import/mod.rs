//! Import coordination
//!
//! One dedicated task drains the consumer channel. The channel is configured
//! with prefetch count 1, so the broker withholds delivery N+1 until
//! delivery N is acknowledged or rejected: that is the pipeline's only
//! backpressure mechanism. Once a delivery is accepted it is processed to
//! completion; the shutdown signal is only consulted between deliveries, so
//! an in-flight import is never abandoned and the broker resources close
//! only after it finishes.

mod transport;

pub use transport::LapinConsumeTransport;

use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{error, info};

use mdp_common::shutdown::Shutdown;
use mdp_common::store::{StatusStore, UnprocessableMessage, UnprocessableMessageStore};
use mdp_common::types::{DataTable, MessageEnvelope, ServiceProcedure, Status};

use crate::config::ImportMapping;
use crate::persist::ImportExecutor;

/// One broker delivery, decoupled from the client library.
#[derive(Debug, Clone)]
pub struct IncomingDelivery {
    pub consumer_tag: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
}

/// Broker consume primitive.
///
/// `next_delivery` yields deliveries one at a time (`None` when the channel
/// is gone); every delivery must be settled through `ack` or `reject`.
/// Rejection never requests redelivery.
pub trait ConsumeTransport: Send + Sync + 'static {
    fn next_delivery(
        &mut self,
    ) -> impl Future<Output = Option<anyhow::Result<IncomingDelivery>>> + Send;

    fn ack(&self, delivery_tag: u64) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Reject without requeue.
    fn reject(&self, delivery_tag: u64) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Close channel then connection, in that order.
    fn close(&self) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Owns the consumer-side broker channel and processes one delivery at a
/// time: deserialize, resolve the persistence mapping, persist, then ack or
/// reject.
///
/// Consuming `start` makes a second start unrepresentable; the coordinator
/// lives on its task until shutdown.
pub struct ImportCoordinator<T: ConsumeTransport, E: ImportExecutor> {
    name: &'static str,
    transport: T,
    executor: E,
    mappings: HashMap<ServiceProcedure, ImportMapping>,
    status: StatusStore,
    unprocessable: UnprocessableMessageStore,
    shutdown: Shutdown,
}

impl<T: ConsumeTransport, E: ImportExecutor> ImportCoordinator<T, E> {
    pub fn new(
        name: &'static str,
        transport: T,
        executor: E,
        mappings: HashMap<ServiceProcedure, ImportMapping>,
        status: StatusStore,
        unprocessable: UnprocessableMessageStore,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            name,
            transport,
            executor,
            mappings,
            status,
            unprocessable,
            shutdown,
        }
    }

    /// Start the processing loop on its own task. Awaiting the returned
    /// handle after triggering shutdown blocks until any in-flight delivery
    /// has finished and the broker resources are closed.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!("service '{}' starts to process data", self.name);

        let mut shutdown = self.shutdown.clone();
        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                received = self.transport.next_delivery() => match received {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => {
                        error!("service '{}' failed to receive delivery: {e:#}", self.name);
                        continue;
                    }
                    None => break,
                },
            };

            self.process_delivery(delivery).await;
        }

        if let Err(e) = self.transport.close().await {
            error!("service '{}' failed to close broker resources: {e:#}", self.name);
        }

        info!("service '{}' is signaled to stop", self.name);
    }

    async fn process_delivery(&self, delivery: IncomingDelivery) {
        info!(
            "service '{}' starts to process message with delivery tag '{}'",
            self.name, delivery.delivery_tag
        );

        // 1. Wire envelope. Failure is an opaque unprocessable message: it
        //    is dead-lettered, not tied to any identity.
        let envelope = match MessageEnvelope::from_bytes(&delivery.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                let detail = "failed to deserialize data to import from message";
                error!("service '{}' {detail}: {e}", self.name);
                self.reject(delivery.delivery_tag).await;
                self.unprocessable.enqueue(UnprocessableMessage {
                    consumer_tag: delivery.consumer_tag,
                    delivery_tag: delivery.delivery_tag,
                    redelivered: delivery.redelivered,
                    exchange: delivery.exchange,
                    routing_key: delivery.routing_key,
                    detail: format!("{detail}\n{e}"),
                    utc_timestamp: Utc::now(),
                });
                return;
            }
        };

        let identity = envelope.service_procedure.clone();

        // 2. Persistence mapping. A miss is a configuration problem tied to
        //    an identity, so it is recorded as an error status instead of a
        //    dead letter.
        let Some(mapping) = self.mappings.get(&identity) else {
            let detail = format!("failed to extract import mapping for {identity}");
            error!("service '{}' {detail}", self.name);
            self.reject(delivery.delivery_tag).await;
            self.status.push(identity, Status::Error, detail);
            return;
        };

        // 3. Payload.
        let table = match DataTable::from_json(&envelope.data) {
            Ok(table) => table,
            Err(e) => {
                let detail = format!("failed to deserialize data from payload\n{e}");
                error!("service '{}' {detail}", self.name);
                self.reject(delivery.delivery_tag).await;
                self.status.push(identity, Status::Error, detail);
                return;
            }
        };

        // 4. Persist.
        if let Err(e) = self
            .executor
            .execute(&mapping.stored_procedure, &mapping.parameter_name, &table)
            .await
        {
            let detail = format!("failed to save data to database\n{e}");
            error!("service '{}' {detail}", self.name);
            self.reject(delivery.delivery_tag).await;
            self.status.push(identity, Status::Error, detail);
            return;
        }

        // 5. Acknowledge.
        let detail = format!(
            "finished saving data with delivery tag '{}' for {identity}",
            delivery.delivery_tag
        );
        info!("service '{}' {detail}", self.name);
        if let Err(e) = self.transport.ack(delivery.delivery_tag).await {
            error!(
                "service '{}' failed to acknowledge delivery tag '{}': {e:#}",
                self.name, delivery.delivery_tag
            );
            return;
        }
        self.status.push(identity, Status::Success, detail);
    }

    async fn reject(&self, delivery_tag: u64) {
        if let Err(e) = self.transport.reject(delivery_tag).await {
            error!(
                "service '{}' failed to reject delivery tag '{delivery_tag}': {e:#}",
                self.name
            );
        }
    }
}
