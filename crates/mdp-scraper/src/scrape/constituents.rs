//! Index constituents scrape service
//!
//! Downloads an index holdings CSV over HTTPS and converts the equity rows
//! into a tabular dataset. The published file carries preamble lines before
//! the actual column header, and disclaimer lines after the data; both are
//! dropped during parsing.

use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use mdp_common::error::{PipelineError, Result};
use mdp_common::store::StatusStore;
use mdp_common::types::{Column, ColumnKind, DataTable, MessageEnvelope, ServiceProcedure, Status};

use super::RunFlag;
use crate::publish::PublishHandle;

pub const SERVICE_NAME: &str = "IndexConstituentsScrapeService";
pub const PROCEDURE_CONSTITUENTS: &str = "scrape_constituents";

/// Captions located in the holdings CSV header row.
const TICKER_CAPTION: &str = "Ticker";
const NAME_CAPTION: &str = "Name";
const SECTOR_CAPTION: &str = "Sector";
const ASSET_CLASS_CAPTION: &str = "Asset Class";
const EXCHANGE_CAPTION: &str = "Exchange";

/// Source settings for the index holdings CSV.
#[derive(Debug, Clone)]
pub struct IndexConstituentsConfig {
    pub url: String,
}

pub struct IndexConstituentsScrapeService {
    config: IndexConstituentsConfig,
    client: reqwest::Client,
    publish: PublishHandle,
    status: StatusStore,
    flag: Arc<RunFlag>,
}

impl IndexConstituentsScrapeService {
    pub fn new(
        config: IndexConstituentsConfig,
        client: reqwest::Client,
        publish: PublishHandle,
        status: StatusStore,
    ) -> Self {
        Self {
            config,
            client,
            publish,
            status,
            flag: RunFlag::new(),
        }
    }

    /// Trigger a constituents scrape. Idempotent while a run is in progress.
    pub fn trigger_scrape_constituents(self: &Arc<Self>) -> &'static str {
        info!("service '{SERVICE_NAME}' procedure '{PROCEDURE_CONSTITUENTS}' is called");

        let Some(guard) = self.flag.try_acquire() else {
            info!("service '{SERVICE_NAME}' procedure '{PROCEDURE_CONSTITUENTS}' is already running");
            return "index constituents are being scraped";
        };

        let service = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            service.run().await;
        });

        "starts to scrape index constituents"
    }

    async fn run(&self) {
        let identity = ServiceProcedure::new(SERVICE_NAME, PROCEDURE_CONSTITUENTS);
        self.status.push(
            identity.clone(),
            Status::Information,
            format!("service '{SERVICE_NAME}' procedure '{PROCEDURE_CONSTITUENTS}' is scraping data"),
        );

        let content = match self.fetch().await {
            Ok(content) => content,
            Err(e) => {
                error!("service '{SERVICE_NAME}' procedure '{PROCEDURE_CONSTITUENTS}' failed: {e}");
                self.status
                    .push(identity, Status::Error, format!("failed\n{e}"));
                return;
            }
        };

        let table = match parse_constituents(&content) {
            Ok(table) => table,
            Err(PipelineError::NoDataScraped) => {
                warn!("service '{SERVICE_NAME}' procedure '{PROCEDURE_CONSTITUENTS}' did not scrape any data");
                self.status
                    .push(identity, Status::Warning, "did not scrape any data");
                return;
            }
            Err(e) => {
                error!("service '{SERVICE_NAME}' procedure '{PROCEDURE_CONSTITUENTS}' failed: {e}");
                self.status
                    .push(identity, Status::Error, format!("failed\n{e}"));
                return;
            }
        };

        let data = match table.to_json() {
            Ok(data) => data,
            Err(e) => {
                error!("service '{SERVICE_NAME}' procedure '{PROCEDURE_CONSTITUENTS}' failed: {e}");
                self.status
                    .push(identity, Status::Error, format!("failed\n{e}"));
                return;
            }
        };

        self.publish.enqueue(MessageEnvelope::new(identity.clone(), data));
        self.status.push(
            identity,
            Status::Success,
            format!("service '{SERVICE_NAME}' procedure '{PROCEDURE_CONSTITUENTS}' finished scraping data"),
        );
        info!("service '{SERVICE_NAME}' procedure '{PROCEDURE_CONSTITUENTS}' finished scraping data");
    }

    async fn fetch(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.config.url)
            .send()
            .await
            .map_err(|e| PipelineError::ScrapeFailed(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::ScrapeFailed(format!(
                "unsuccessful HTTP response {status}: {body}"
            )));
        }

        response
            .text()
            .await
            .map_err(|e| PipelineError::ScrapeFailed(format!("failed to read response body: {e}")))
    }
}

/// Parse the holdings CSV into a table of equity constituents.
///
/// Locates the header row by its "Ticker" leading caption, then keeps only
/// rows whose asset class is "Equity"; anything after the data block (blank
/// or disclaimer lines) fails that filter and is dropped.
pub(crate) fn parse_constituents(content: &str) -> Result<DataTable> {
    let header_offset = content
        .lines()
        .position(|line| line.trim_start().starts_with(&format!("{TICKER_CAPTION},")))
        .ok_or_else(|| {
            PipelineError::ScrapeFailed("no column header row found in holdings CSV".to_string())
        })?;

    let data: String = content
        .lines()
        .skip(header_offset)
        .collect::<Vec<_>>()
        .join("\n");

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(data.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| PipelineError::ScrapeFailed(format!("failed to read CSV header: {e}")))?
        .clone();

    let find = |caption: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h.trim() == caption)
            .ok_or_else(|| {
                PipelineError::ScrapeFailed(format!("holdings CSV is missing column '{caption}'"))
            })
    };

    let ticker_at = find(TICKER_CAPTION)?;
    let name_at = find(NAME_CAPTION)?;
    let sector_at = find(SECTOR_CAPTION)?;
    let asset_class_at = find(ASSET_CLASS_CAPTION)?;
    let exchange_at = find(EXCHANGE_CAPTION)?;

    let mut table = DataTable::new(
        "index_constituents",
        vec![
            Column::new("ticker", ColumnKind::Text),
            Column::new("name", ColumnKind::Text),
            Column::new("sector", ColumnKind::Text),
            Column::new("exchange", ColumnKind::Text),
        ],
    );

    for record in reader.records() {
        let record =
            record.map_err(|e| PipelineError::ScrapeFailed(format!("malformed CSV row: {e}")))?;

        let field = |at: usize| record.get(at).unwrap_or_default().trim().to_string();

        if field(asset_class_at) != "Equity" || field(ticker_at).is_empty() {
            continue;
        }

        table.push_row(vec![
            json!(field(ticker_at)),
            json!(field(name_at)),
            json!(field(sector_at)),
            json!(field(exchange_at)),
        ])?;
    }

    if table.is_empty() {
        return Err(PipelineError::NoDataScraped);
    }

    Ok(table)
}
