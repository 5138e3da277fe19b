//! Content-addressed dead-letter stores
//!
//! Dead letters are keyed by a SHA-256 digest of their identifying fields,
//! so repeated failures from the same source collapse onto one record that
//! an operator acknowledges by deleting its key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::latest_state::{LatestRecord, LatestStateStore};
use crate::hash;
use crate::shutdown::Shutdown;

/// A record whose store key is derived from its identifying fields.
pub trait ContentAddressed {
    /// The identifying fields, in the fixed order they are hashed.
    fn identity_fields(&self) -> Vec<String>;

    /// Lowercase hex SHA-256 over the pipe-joined identity fields.
    fn content_key(&self) -> String {
        hash::content_key(self.identity_fields())
    }
}

/// A message the broker returned as unroutable (producer side).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnroutableMessage {
    pub exchange: String,
    pub reply_code: u16,
    pub reply_text: String,
    pub routing_key: String,
    pub utc_timestamp: DateTime<Utc>,
}

impl ContentAddressed for UnroutableMessage {
    fn identity_fields(&self) -> Vec<String> {
        vec![
            self.exchange.clone(),
            self.reply_code.to_string(),
            self.reply_text.clone(),
            self.routing_key.clone(),
        ]
    }
}

impl LatestRecord for UnroutableMessage {
    type Key = String;

    fn key(&self) -> String {
        self.content_key()
    }

    fn event_time(&self) -> DateTime<Utc> {
        self.utc_timestamp
    }
}

/// A delivery whose envelope could not be deserialized (consumer side).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnprocessableMessage {
    pub consumer_tag: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub detail: String,
    pub utc_timestamp: DateTime<Utc>,
}

impl ContentAddressed for UnprocessableMessage {
    fn identity_fields(&self) -> Vec<String> {
        vec![
            self.consumer_tag.clone(),
            self.delivery_tag.to_string(),
            self.redelivered.to_string(),
            self.exchange.clone(),
            self.routing_key.clone(),
        ]
    }
}

impl LatestRecord for UnprocessableMessage {
    type Key = String;

    fn key(&self) -> String {
        self.content_key()
    }

    fn event_time(&self) -> DateTime<Utc> {
        self.utc_timestamp
    }
}

/// Latest-state store over content-addressed dead letters, with an explicit
/// delete-by-key operation for operator acknowledgment.
#[derive(Clone)]
pub struct DeadLetterStore<R: LatestRecord<Key = String>> {
    inner: Arc<LatestStateStore<R>>,
}

/// Producer-side dead letters: broker returns.
pub type UnroutableMessageStore = DeadLetterStore<UnroutableMessage>;

/// Consumer-side dead letters: undecodable deliveries.
pub type UnprocessableMessageStore = DeadLetterStore<UnprocessableMessage>;

impl<R: LatestRecord<Key = String>> DeadLetterStore<R> {
    pub fn new(name: &'static str, shutdown: Shutdown) -> Self {
        Self {
            inner: LatestStateStore::new(name, shutdown),
        }
    }

    pub fn start_monitor(&self) -> Option<JoinHandle<()>> {
        self.inner.start_monitor()
    }

    pub fn enqueue(&self, record: R) {
        self.inner.enqueue(record);
    }

    pub fn get_all(&self) -> Vec<R> {
        self.inner.get_all()
    }

    /// Key/record pairs, for surfaces that expose the delete key.
    pub fn entries(&self) -> Vec<(String, R)> {
        self.inner
            .get_all()
            .into_iter()
            .map(|record| (record.key(), record))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Delete the record stored under `key`. Returns true iff a record
    /// existed and was removed.
    pub fn delete(&self, key: &str) -> bool {
        self.inner.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use std::time::Duration;

    fn unroutable(reply_code: u16, seconds: i64) -> UnroutableMessage {
        UnroutableMessage {
            exchange: String::new(),
            reply_code,
            reply_text: "NO_ROUTE".to_string(),
            routing_key: "market-data".to_string(),
            utc_timestamp: chrono::DateTime::from_timestamp(1_700_000_000 + seconds, 0)
                .unwrap(),
        }
    }

    async fn drained(store: &UnroutableMessageStore, expected: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while store.get_all().len() != expected {
            if tokio::time::Instant::now() >= deadline {
                panic!("dead-letter store did not drain in time");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn test_identical_field_tuples_share_a_key() {
        let a = unroutable(312, 0);
        let b = unroutable(312, 60);
        assert_eq!(a.content_key(), b.content_key());
        assert_ne!(a.content_key(), unroutable(313, 0).content_key());
    }

    #[tokio::test]
    async fn test_identical_sources_collapse_to_one_record() {
        let (_controller, signal) = shutdown::channel();
        let store = UnroutableMessageStore::new("test unroutable", signal);
        store.start_monitor();

        store.enqueue(unroutable(312, 0));
        store.enqueue(unroutable(312, 60));
        drained(&store, 1).await;

        // Latest-wins: the later timestamp supersedes in place.
        let all = store.get_all();
        assert_eq!(all[0].utc_timestamp.timestamp(), 1_700_000_060);
    }

    #[tokio::test]
    async fn test_delete_semantics() {
        let (_controller, signal) = shutdown::channel();
        let store = UnroutableMessageStore::new("test unroutable", signal);
        store.start_monitor();

        let record = unroutable(312, 0);
        let key = record.content_key();
        store.enqueue(record);
        drained(&store, 1).await;

        assert!(!store.delete("not-a-key"));
        assert!(store.delete(&key));
        assert!(!store.delete(&key));
        assert!(store.is_empty());
    }

    #[test]
    fn test_unprocessable_identity_field_order() {
        let message = UnprocessableMessage {
            consumer_tag: "ctag".to_string(),
            delivery_tag: 7,
            redelivered: false,
            exchange: String::new(),
            routing_key: "market-data".to_string(),
            detail: "failed to deserialize envelope".to_string(),
            utc_timestamp: chrono::Utc::now(),
        };
        assert_eq!(
            message.content_key(),
            crate::hash::content_key(["ctag", "7", "false", "", "market-data"])
        );
    }
}
