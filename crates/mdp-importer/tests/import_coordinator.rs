//! Import coordinator behavior against a scripted consume transport

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use mdp_common::error::{PipelineError, Result};
use mdp_common::shutdown::{self, ShutdownController};
use mdp_common::store::{StatusStore, UnprocessableMessageStore};
use mdp_common::types::{Column, ColumnKind, DataTable, MessageEnvelope, ServiceProcedure};

use mdp_importer::config::ImportMapping;
use mdp_importer::import::{ConsumeTransport, ImportCoordinator, IncomingDelivery};
use mdp_importer::persist::ImportExecutor;

struct FakeTransport {
    deliveries: mpsc::UnboundedReceiver<IncomingDelivery>,
    acks: Arc<Mutex<Vec<u64>>>,
    rejects: Arc<Mutex<Vec<u64>>>,
    closed: Arc<AtomicBool>,
}

impl ConsumeTransport for FakeTransport {
    async fn next_delivery(&mut self) -> Option<anyhow::Result<IncomingDelivery>> {
        self.deliveries.recv().await.map(Ok)
    }

    async fn ack(&self, delivery_tag: u64) -> anyhow::Result<()> {
        self.acks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(delivery_tag);
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64) -> anyhow::Result<()> {
        self.rejects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(delivery_tag);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Executor scripted per test: optionally failing, optionally blocking until
/// released.
#[derive(Clone, Default)]
struct FakeExecutor {
    calls: Arc<Mutex<Vec<(String, String, DataTable)>>>,
    fail: Arc<AtomicBool>,
    block: Arc<AtomicBool>,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl ImportExecutor for FakeExecutor {
    async fn execute(
        &self,
        stored_procedure: &str,
        parameter_name: &str,
        table: &DataTable,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((
                stored_procedure.to_string(),
                parameter_name.to_string(),
                table.clone(),
            ));
        if self.block.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(PipelineError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

struct Harness {
    controller: ShutdownController,
    status: StatusStore,
    unprocessable: UnprocessableMessageStore,
    deliveries: mpsc::UnboundedSender<IncomingDelivery>,
    acks: Arc<Mutex<Vec<u64>>>,
    rejects: Arc<Mutex<Vec<u64>>>,
    closed: Arc<AtomicBool>,
    executor: FakeExecutor,
    coordinator: tokio::task::JoinHandle<()>,
}

fn harness() -> Harness {
    let (controller, signal) = shutdown::channel();
    let status = StatusStore::new("import status", signal.clone());
    let unprocessable = UnprocessableMessageStore::new("unprocessable messages", signal.clone());
    status.start_monitor();
    unprocessable.start_monitor();

    let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();
    let acks = Arc::new(Mutex::new(Vec::new()));
    let rejects = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let transport = FakeTransport {
        deliveries: deliveries_rx,
        acks: Arc::clone(&acks),
        rejects: Arc::clone(&rejects),
        closed: Arc::clone(&closed),
    };

    let executor = FakeExecutor::default();

    let mut mappings = HashMap::new();
    mappings.insert(
        ServiceProcedure::new("TickerDirectoryScrapeService", "scrape_listed"),
        ImportMapping {
            service_procedure: ServiceProcedure::new(
                "TickerDirectoryScrapeService",
                "scrape_listed",
            ),
            stored_procedure: "market.import_listed_tickers".to_string(),
            parameter_name: "tickers".to_string(),
        },
    );

    let coordinator = ImportCoordinator::new(
        "data import",
        transport,
        executor.clone(),
        mappings,
        status.clone(),
        unprocessable.clone(),
        signal,
    )
    .start();

    Harness {
        controller,
        status,
        unprocessable,
        deliveries: deliveries_tx,
        acks,
        rejects,
        closed,
        executor,
        coordinator,
    }
}

fn delivery(tag: u64, body: Vec<u8>) -> IncomingDelivery {
    IncomingDelivery {
        consumer_tag: "mdp-importer".to_string(),
        delivery_tag: tag,
        redelivered: false,
        exchange: String::new(),
        routing_key: "market-data".to_string(),
        body,
    }
}

fn sample_table() -> DataTable {
    let mut table = DataTable::new(
        "listed_tickers",
        vec![
            Column::new("symbol", ColumnKind::Text),
            Column::new("security_name", ColumnKind::Text),
        ],
    );
    table
        .push_row(vec![serde_json::json!("AAPL"), serde_json::json!("Apple Inc.")])
        .unwrap();
    table
}

fn valid_body() -> Vec<u8> {
    let envelope = MessageEnvelope::new(
        ServiceProcedure::new("TickerDirectoryScrapeService", "scrape_listed"),
        sample_table().to_json().unwrap(),
    );
    envelope.to_bytes().unwrap()
}

async fn wait_until(description: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting until {description}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn len_of(records: &Arc<Mutex<Vec<u64>>>) -> usize {
    records
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .len()
}

#[tokio::test]
async fn valid_delivery_is_persisted_and_acknowledged() {
    let h = harness();

    h.deliveries.send(delivery(1, valid_body())).unwrap();
    wait_until("the delivery is acknowledged", || len_of(&h.acks) == 1).await;
    wait_until("the success is recorded", || !h.status.successes().is_empty()).await;

    let calls = h
        .executor
        .calls
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "market.import_listed_tickers");
    assert_eq!(calls[0].1, "tickers");
    assert_eq!(calls[0].2, sample_table());

    assert_eq!(len_of(&h.rejects), 0);
    assert!(h.unprocessable.entries().is_empty());
}

#[tokio::test]
async fn malformed_message_is_rejected_and_dead_lettered_without_status() {
    let h = harness();

    h.deliveries
        .send(delivery(7, b"this is not json".to_vec()))
        .unwrap();
    wait_until("the delivery is rejected", || len_of(&h.rejects) == 1).await;
    wait_until("the dead letter is recorded", || {
        h.unprocessable.entries().len() == 1
    })
    .await;

    let entries = h.unprocessable.entries();
    assert_eq!(entries[0].1.delivery_tag, 7);
    assert_eq!(entries[0].1.consumer_tag, "mdp-importer");

    // A malformed message is opaque: no identity, no status record.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.status.get_all().is_empty());
    assert_eq!(len_of(&h.acks), 0);
}

#[tokio::test]
async fn unknown_identity_is_rejected_with_error_status_and_no_dead_letter() {
    let h = harness();

    let envelope = MessageEnvelope::new(
        ServiceProcedure::new("UnknownService", "unknown_procedure"),
        sample_table().to_json().unwrap(),
    );
    h.deliveries
        .send(delivery(3, envelope.to_bytes().unwrap()))
        .unwrap();

    wait_until("the delivery is rejected", || len_of(&h.rejects) == 1).await;
    wait_until("the error is recorded", || h.status.errors().len() == 1).await;

    let errors = h.status.errors();
    assert_eq!(
        errors[0].service_procedure,
        ServiceProcedure::new("UnknownService", "unknown_procedure")
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.unprocessable.entries().is_empty());
    assert_eq!(len_of(&h.acks), 0);
}

#[tokio::test]
async fn invalid_payload_is_rejected_with_error_status() {
    let h = harness();

    let envelope = MessageEnvelope::new(
        ServiceProcedure::new("TickerDirectoryScrapeService", "scrape_listed"),
        "not a data table",
    );
    h.deliveries
        .send(delivery(4, envelope.to_bytes().unwrap()))
        .unwrap();

    wait_until("the delivery is rejected", || len_of(&h.rejects) == 1).await;
    wait_until("the error is recorded", || h.status.errors().len() == 1).await;

    // The payload never reached the executor.
    assert!(h
        .executor
        .calls
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .is_empty());
    assert!(h.unprocessable.entries().is_empty());
}

#[tokio::test]
async fn persistence_failure_is_rejected_with_error_status() {
    let h = harness();
    h.executor.fail.store(true, Ordering::SeqCst);

    h.deliveries.send(delivery(5, valid_body())).unwrap();
    wait_until("the delivery is rejected", || len_of(&h.rejects) == 1).await;
    wait_until("the error is recorded", || h.status.errors().len() == 1).await;

    assert_eq!(len_of(&h.acks), 0);
    assert!(h.unprocessable.entries().is_empty());
}

#[tokio::test]
async fn deliveries_are_never_requeued() {
    let h = harness();

    h.deliveries
        .send(delivery(1, b"garbage".to_vec()))
        .unwrap();
    h.executor.fail.store(true, Ordering::SeqCst);
    h.deliveries.send(delivery(2, valid_body())).unwrap();

    wait_until("both deliveries are rejected", || len_of(&h.rejects) == 2).await;

    // Rejection is terminal by contract: the transport's reject never
    // requests redelivery, and nothing is re-sent here.
    assert_eq!(len_of(&h.acks), 0);
}

#[tokio::test]
async fn shutdown_waits_for_the_in_flight_delivery() {
    let h = harness();
    h.executor.block.store(true, Ordering::SeqCst);

    h.deliveries.send(delivery(9, valid_body())).unwrap();

    // Wait until the callback is mid-persist.
    tokio::time::timeout(Duration::from_secs(1), h.executor.entered.notified())
        .await
        .expect("executor should be entered");

    h.controller.trigger();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The coordinator must not return while the delivery is in flight, and
    // the broker resources must still be open.
    assert!(!h.coordinator.is_finished());
    assert!(!h.closed.load(Ordering::SeqCst));

    h.executor.release.notify_one();
    tokio::time::timeout(Duration::from_secs(1), h.coordinator)
        .await
        .expect("coordinator should stop after the delivery finishes")
        .unwrap();

    // The in-flight delivery completed and was settled before close.
    assert_eq!(len_of(&h.acks), 1);
    assert!(h.closed.load(Ordering::SeqCst));
}
