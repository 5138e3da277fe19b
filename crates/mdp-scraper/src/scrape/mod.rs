//! Scrape services
//!
//! Each scrape procedure is a pure `source -> DataTable` conversion wrapped
//! in the same run discipline: an idempotent trigger guard, progress and
//! terminal records into the status store, and an envelope enqueued with the
//! publish coordinator on success. No scrape is ever retried automatically;
//! a failed run is recorded and waits for an external re-trigger.

pub mod constituents;
pub mod ftp;
pub mod prices;
pub mod tickers;

pub use constituents::IndexConstituentsScrapeService;
pub use prices::DailyPricesScrapeService;
pub use tickers::TickerDirectoryScrapeService;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One-at-a-time guard for a scrape procedure.
///
/// A trigger acquires the flag before spawning a run; while the returned
/// [`RunGuard`] is alive, further triggers report "already running" without
/// starting anything. The guard releases the flag on drop, so a panicking
/// run cannot wedge the procedure.
#[derive(Default)]
pub struct RunFlag {
    running: AtomicBool,
}

impl RunFlag {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard {
                flag: Arc::clone(self),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct RunGuard {
    flag: Arc<RunFlag>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.running.store(false, Ordering::SeqCst);
    }
}

/// Convert a header caption like "Security Name" into a column name.
pub(crate) fn column_name(caption: &str) -> String {
    caption.trim().to_lowercase().replace([' ', '-'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flag_is_exclusive() {
        let flag = RunFlag::new();
        let guard = flag.try_acquire();
        assert!(guard.is_some());
        assert!(flag.try_acquire().is_none());
        drop(guard);
        assert!(flag.try_acquire().is_some());
    }

    #[test]
    fn test_column_name_normalization() {
        assert_eq!(column_name("Security Name"), "security_name");
        assert_eq!(column_name("Adj Close"), "adj_close");
        assert_eq!(column_name(" Ticker "), "ticker");
    }
}
