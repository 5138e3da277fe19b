//! Service procedure status store

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::latest_state::{LatestRecord, LatestStateStore};
use crate::shutdown::Shutdown;
use crate::types::{ServiceProcedure, ServiceProcedureStatus, Status};

impl LatestRecord for ServiceProcedureStatus {
    type Key = ServiceProcedure;

    fn key(&self) -> ServiceProcedure {
        self.service_procedure.clone()
    }

    fn event_time(&self) -> DateTime<Utc> {
        self.utc_timestamp
    }
}

/// Latest status per service procedure, with filtered reads by severity.
///
/// Both services own one independent instance: the scraper tracks scrape and
/// publish outcomes, the importer tracks import outcomes.
#[derive(Clone)]
pub struct StatusStore {
    inner: Arc<LatestStateStore<ServiceProcedureStatus>>,
}

impl StatusStore {
    pub fn new(name: &'static str, shutdown: Shutdown) -> Self {
        Self {
            inner: LatestStateStore::new(name, shutdown),
        }
    }

    pub fn start_monitor(&self) -> Option<JoinHandle<()>> {
        self.inner.start_monitor()
    }

    pub fn enqueue(&self, status: ServiceProcedureStatus) {
        self.inner.enqueue(status);
    }

    /// Convenience: enqueue a status stamped with the current time.
    pub fn push(
        &self,
        service_procedure: ServiceProcedure,
        status: Status,
        detail: impl Into<String>,
    ) {
        self.enqueue(ServiceProcedureStatus::now(service_procedure, status, detail));
    }

    pub fn get_all(&self) -> Vec<ServiceProcedureStatus> {
        self.inner.get_all()
    }

    pub fn successes(&self) -> Vec<ServiceProcedureStatus> {
        self.by_status(Status::Success)
    }

    pub fn warnings(&self) -> Vec<ServiceProcedureStatus> {
        self.by_status(Status::Warning)
    }

    pub fn errors(&self) -> Vec<ServiceProcedureStatus> {
        self.by_status(Status::Error)
    }

    pub fn by_status(&self, status: Status) -> Vec<ServiceProcedureStatus> {
        self.inner
            .get_all()
            .into_iter()
            .filter(|s| s.status == status)
            .collect()
    }

    /// Remove the entry for `service_procedure` iff it currently holds an
    /// error. A later publish confirm supersedes an earlier recorded error
    /// for the same identity regardless of timestamps: this is an explicit
    /// clear, not a merge.
    pub fn clear_error(&self, service_procedure: &ServiceProcedure) -> bool {
        self.inner
            .remove_if(service_procedure, |record| record.status == Status::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use std::time::Duration;

    async fn drained(store: &StatusStore, expected: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while store.get_all().len() != expected {
            if tokio::time::Instant::now() >= deadline {
                panic!("status store did not drain in time");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_by_status_filters_snapshot() {
        let (_controller, signal) = shutdown::channel();
        let store = StatusStore::new("test status", signal);
        store.start_monitor();

        store.push(
            ServiceProcedure::new("Svc", "ok"),
            Status::Success,
            "finished",
        );
        store.push(ServiceProcedure::new("Svc", "warn"), Status::Warning, "empty");
        store.push(ServiceProcedure::new("Svc", "bad"), Status::Error, "failed");
        drained(&store, 3).await;

        assert_eq!(store.successes().len(), 1);
        assert_eq!(store.warnings().len(), 1);
        assert_eq!(store.errors().len(), 1);
        assert_eq!(store.errors()[0].service_procedure.procedure, "bad");
    }

    #[tokio::test]
    async fn test_clear_error_only_removes_errors() {
        let (_controller, signal) = shutdown::channel();
        let store = StatusStore::new("test status", signal);
        store.start_monitor();

        let ok = ServiceProcedure::new("Svc", "ok");
        let bad = ServiceProcedure::new("Svc", "bad");
        store.push(ok.clone(), Status::Success, "finished");
        store.push(bad.clone(), Status::Error, "failed");
        drained(&store, 2).await;

        assert!(!store.clear_error(&ok));
        assert!(store.clear_error(&bad));
        assert!(!store.clear_error(&bad));
        assert!(store.errors().is_empty());
        assert_eq!(store.successes().len(), 1);
    }
}
