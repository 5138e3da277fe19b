//! Daily prices scrape service
//!
//! Loads the ticker watchlist from the database, then fetches a daily price
//! history CSV per ticker. One envelope is enqueued per ticker; individual
//! ticker failures are collected and reported in the terminal status record
//! instead of aborting the run.

use chrono::{Days, NaiveDate, NaiveTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use mdp_common::db;
use mdp_common::error::{PipelineError, Result};
use mdp_common::shutdown::Shutdown;
use mdp_common::store::StatusStore;
use mdp_common::types::{Column, ColumnKind, DataTable, MessageEnvelope, ServiceProcedure, Status};

use super::RunFlag;
use crate::publish::PublishHandle;

pub const SERVICE_NAME: &str = "DailyPricesScrapeService";
pub const PROCEDURE_DAILY_PRICES: &str = "scrape_daily_prices";

/// Watchlist of tickers to scrape, with the last imported benchmark date.
const WATCHLIST_QUERY: &str =
    "SELECT ticker, benchmark_date FROM daily_price_watchlist WHERE include = TRUE ORDER BY ticker";

/// Timeout for the watchlist query, in seconds.
const WATCHLIST_QUERY_TIMEOUT_SECS: u64 = 90;

/// Fallback history start when a ticker has no benchmark date (2010-01-01).
const DEFAULT_PERIOD_START: i64 = 1_262_304_000;

/// Days of overlap refetched before the benchmark date, so late corrections
/// at the source are picked up.
const BENCHMARK_OVERLAP_DAYS: u64 = 14;

/// Expected header of the per-ticker price history CSV.
const PRICE_CSV_HEADER: [&str; 7] = ["Date", "Open", "High", "Low", "Close", "Adj Close", "Volume"];

/// Source settings for the daily prices endpoint.
#[derive(Debug, Clone)]
pub struct DailyPricesConfig {
    /// Base URL; the ticker and period query parameters are appended.
    pub base_url: String,
    /// Pause between per-ticker requests, to stay under the source's rate
    /// limits.
    pub request_delay_ms: u64,
}

#[derive(Debug, sqlx::FromRow)]
struct WatchlistRow {
    ticker: String,
    benchmark_date: Option<NaiveDate>,
}

pub struct DailyPricesScrapeService {
    config: DailyPricesConfig,
    client: reqwest::Client,
    pool: PgPool,
    publish: PublishHandle,
    status: StatusStore,
    shutdown: Shutdown,
    flag: Arc<RunFlag>,
}

impl DailyPricesScrapeService {
    pub fn new(
        config: DailyPricesConfig,
        client: reqwest::Client,
        pool: PgPool,
        publish: PublishHandle,
        status: StatusStore,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            config,
            client,
            pool,
            publish,
            status,
            shutdown,
            flag: RunFlag::new(),
        }
    }

    /// Trigger a daily prices scrape. Idempotent while a run is in progress.
    pub fn trigger_scrape_daily_prices(self: &Arc<Self>) -> &'static str {
        info!("service '{SERVICE_NAME}' procedure '{PROCEDURE_DAILY_PRICES}' is called");

        let Some(guard) = self.flag.try_acquire() else {
            info!("service '{SERVICE_NAME}' procedure '{PROCEDURE_DAILY_PRICES}' is already running");
            return "daily prices are being scraped";
        };

        let service = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            service.run().await;
        });

        "starts to scrape daily prices"
    }

    async fn run(&self) {
        let identity = ServiceProcedure::new(SERVICE_NAME, PROCEDURE_DAILY_PRICES);

        let watchlist: Vec<WatchlistRow> =
            match db::query_rows(&self.pool, WATCHLIST_QUERY, WATCHLIST_QUERY_TIMEOUT_SECS).await {
                Ok(rows) => rows,
                Err(e) => {
                    error!("service '{SERVICE_NAME}' procedure '{PROCEDURE_DAILY_PRICES}' failed: {e}");
                    self.status
                        .push(identity, Status::Error, format!("failed\n{e}"));
                    return;
                }
            };

        if watchlist.is_empty() {
            warn!(
                "service '{SERVICE_NAME}' procedure '{PROCEDURE_DAILY_PRICES}' did not scrape any data as the watchlist is empty"
            );
            self.status.push(
                identity,
                Status::Warning,
                "no tickers are configured for scraping",
            );
            return;
        }

        let total = watchlist.len();
        let mut failed: BTreeMap<String, String> = BTreeMap::new();

        for (index, row) in watchlist.iter().enumerate() {
            self.status.push(
                identity.clone(),
                Status::Information,
                format!(
                    "service '{SERVICE_NAME}' procedure '{PROCEDURE_DAILY_PRICES}' is scraping data. progress:{}/{total} errors:{}",
                    index + 1,
                    failed.len()
                ),
            );

            tokio::time::sleep(Duration::from_millis(self.config.request_delay_ms)).await;

            if self.shutdown.is_requested() {
                return;
            }

            match self.scrape_ticker(row).await {
                Ok(table) => match table.to_json() {
                    Ok(data) => self.publish.enqueue(MessageEnvelope::new(identity.clone(), data)),
                    Err(e) => {
                        failed.insert(row.ticker.clone(), e.to_string());
                    }
                },
                Err(e) => {
                    warn!(
                        "service '{SERVICE_NAME}' procedure '{PROCEDURE_DAILY_PRICES}' failed for ticker '{}': {e}",
                        row.ticker
                    );
                    failed.insert(row.ticker.clone(), e.to_string());
                }
            }
        }

        if failed.len() == total {
            let detail = format!("failed to scrape daily prices for all {total} tickers");
            error!("service '{SERVICE_NAME}' procedure '{PROCEDURE_DAILY_PRICES}' {detail}");
            self.status.push(identity, Status::Error, detail);
            return;
        }

        let mut detail = format!(
            "service '{SERVICE_NAME}' procedure '{PROCEDURE_DAILY_PRICES}' finished scraping daily prices for {} of {total} tickers",
            total - failed.len()
        );
        for (ticker, reason) in &failed {
            detail.push_str(&format!("\n{ticker}: {reason}"));
        }

        info!("service '{SERVICE_NAME}' procedure '{PROCEDURE_DAILY_PRICES}' finished scraping data");
        self.status.push(identity, Status::Success, detail);
    }

    async fn scrape_ticker(&self, row: &WatchlistRow) -> Result<DataTable> {
        let period_start = row
            .benchmark_date
            .and_then(|date| date.checked_sub_days(Days::new(BENCHMARK_OVERLAP_DAYS)))
            .map(unix_timestamp)
            .unwrap_or(DEFAULT_PERIOD_START);
        let period_end = Utc::now()
            .date_naive()
            .checked_add_days(Days::new(1))
            .map(unix_timestamp)
            .unwrap_or(i64::MAX);

        let url = format!(
            "{}/{}?period1={period_start}&period2={period_end}&interval=1d&events=history&includeAdjustedClose=true",
            self.config.base_url.trim_end_matches('/'),
            row.ticker
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::ScrapeFailed(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(PipelineError::ScrapeFailed(format!(
                "unsuccessful HTTP response {}",
                response.status()
            )));
        }

        let content = response
            .text()
            .await
            .map_err(|e| PipelineError::ScrapeFailed(format!("failed to read response body: {e}")))?;

        if content.trim().is_empty() {
            return Err(PipelineError::NoDataScraped);
        }

        parse_daily_prices(&row.ticker, &content)
    }
}

fn unix_timestamp(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

/// Parse a price history CSV into a table keyed by ticker and date.
///
/// Rows with "null" fields (days the source has no data for) are skipped.
pub(crate) fn parse_daily_prices(ticker: &str, content: &str) -> Result<DataTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| PipelineError::ScrapeFailed(format!("failed to read CSV header: {e}")))?;
    let captions: Vec<&str> = headers.iter().map(str::trim).collect();
    if captions != PRICE_CSV_HEADER {
        return Err(PipelineError::ScrapeFailed(format!(
            "unexpected price CSV header '{}'",
            captions.join(",")
        )));
    }

    let mut table = DataTable::new(
        "daily_prices",
        vec![
            Column::new("ticker", ColumnKind::Text),
            Column::new("date", ColumnKind::Date),
            Column::new("open", ColumnKind::Float),
            Column::new("high", ColumnKind::Float),
            Column::new("low", ColumnKind::Float),
            Column::new("close", ColumnKind::Float),
            Column::new("adj_close", ColumnKind::Float),
            Column::new("volume", ColumnKind::Integer),
        ],
    );

    for record in reader.records() {
        let record =
            record.map_err(|e| PipelineError::ScrapeFailed(format!("malformed CSV row: {e}")))?;

        if record.iter().any(|field| field.trim() == "null") {
            continue;
        }

        let field = |at: usize| record.get(at).unwrap_or_default().trim().to_string();
        let number = |at: usize| -> Result<f64> {
            field(at).parse().map_err(|_| {
                PipelineError::ScrapeFailed(format!(
                    "malformed numeric field '{}' for ticker '{ticker}'",
                    field(at)
                ))
            })
        };
        let volume: i64 = field(6).parse().map_err(|_| {
            PipelineError::ScrapeFailed(format!(
                "malformed volume field '{}' for ticker '{ticker}'",
                field(6)
            ))
        })?;

        table.push_row(vec![
            json!(ticker),
            json!(field(0)),
            json!(number(1)?),
            json!(number(2)?),
            json!(number(3)?),
            json!(number(4)?),
            json!(number(5)?),
            json!(volume),
        ])?;
    }

    if table.is_empty() {
        return Err(PipelineError::NoDataScraped);
    }

    Ok(table)
}
