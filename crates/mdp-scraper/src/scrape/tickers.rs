//! Ticker directory scrape service
//!
//! Downloads the exchange's pipe-delimited symbol directory files and
//! converts them into tabular datasets. Two procedures, one per directory
//! file; each validates the expected column header line and drops the file
//! creation-time trailer.

use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use mdp_common::error::{PipelineError, Result};
use mdp_common::store::StatusStore;
use mdp_common::types::{Column, ColumnKind, DataTable, MessageEnvelope, ServiceProcedure, Status};

use super::ftp::{self, FtpConfig};
use super::{column_name, RunFlag};
use crate::publish::PublishHandle;

pub const SERVICE_NAME: &str = "TickerDirectoryScrapeService";
pub const PROCEDURE_LISTED: &str = "scrape_listed";
pub const PROCEDURE_OTHER_LISTED: &str = "scrape_other_listed";

/// Expected column header line of the listed-symbols directory file.
const LISTED_HEADER: &str =
    "Symbol|Security Name|Market Category|Test Issue|Financial Status|Round Lot Size|ETF|NextShares";

/// Expected column header line of the other-listed-symbols directory file.
const OTHER_LISTED_HEADER: &str =
    "ACT Symbol|Security Name|Exchange|CQS Symbol|ETF|Round Lot Size|Test Issue|NASDAQ Symbol";

/// Trailer line prefix marking the end of directory data.
const FILE_CREATION_TIME_PREFIX: &str = "File Creation Time";

/// Source settings for the ticker directory files.
#[derive(Debug, Clone)]
pub struct TickerDirectoryConfig {
    pub ftp: FtpConfig,
    pub listed_path: String,
    pub other_listed_path: String,
}

pub struct TickerDirectoryScrapeService {
    config: TickerDirectoryConfig,
    publish: PublishHandle,
    status: StatusStore,
    listed_flag: Arc<RunFlag>,
    other_listed_flag: Arc<RunFlag>,
}

impl TickerDirectoryScrapeService {
    pub fn new(config: TickerDirectoryConfig, publish: PublishHandle, status: StatusStore) -> Self {
        Self {
            config,
            publish,
            status,
            listed_flag: RunFlag::new(),
            other_listed_flag: RunFlag::new(),
        }
    }

    /// Trigger a listed-symbols scrape. A second trigger while one run is in
    /// progress reports it without starting anything.
    pub fn trigger_scrape_listed(self: &Arc<Self>) -> &'static str {
        info!("service '{SERVICE_NAME}' procedure '{PROCEDURE_LISTED}' is called");

        let Some(guard) = self.listed_flag.try_acquire() else {
            info!("service '{SERVICE_NAME}' procedure '{PROCEDURE_LISTED}' is already running");
            return "listed symbols are being scraped";
        };

        let service = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            service
                .run(
                    PROCEDURE_LISTED,
                    service.config.listed_path.clone(),
                    LISTED_HEADER,
                    "listed_tickers",
                )
                .await;
        });

        "starts to scrape listed symbols"
    }

    /// Trigger an other-listed-symbols scrape.
    pub fn trigger_scrape_other_listed(self: &Arc<Self>) -> &'static str {
        info!("service '{SERVICE_NAME}' procedure '{PROCEDURE_OTHER_LISTED}' is called");

        let Some(guard) = self.other_listed_flag.try_acquire() else {
            info!("service '{SERVICE_NAME}' procedure '{PROCEDURE_OTHER_LISTED}' is already running");
            return "other listed symbols are being scraped";
        };

        let service = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            service
                .run(
                    PROCEDURE_OTHER_LISTED,
                    service.config.other_listed_path.clone(),
                    OTHER_LISTED_HEADER,
                    "other_listed_tickers",
                )
                .await;
        });

        "starts to scrape other listed symbols"
    }

    async fn run(&self, procedure: &'static str, path: String, expected_header: &str, table_name: &str) {
        let identity = ServiceProcedure::new(SERVICE_NAME, procedure);
        self.status.push(
            identity.clone(),
            Status::Information,
            format!("service '{SERVICE_NAME}' procedure '{procedure}' is scraping data"),
        );

        let content = match ftp::download_text(&self.config.ftp, &path).await {
            Ok(content) => content,
            Err(e) => {
                error!("service '{SERVICE_NAME}' procedure '{procedure}' failed: {e}");
                self.status
                    .push(identity, Status::Error, format!("failed\n{e}"));
                return;
            }
        };

        let table = match parse_directory(&content, expected_header, table_name) {
            Ok(table) => table,
            Err(PipelineError::NoDataScraped) => {
                warn!("service '{SERVICE_NAME}' procedure '{procedure}' did not scrape any data");
                self.status
                    .push(identity, Status::Warning, "did not scrape any data");
                return;
            }
            Err(e) => {
                error!("service '{SERVICE_NAME}' procedure '{procedure}' failed: {e}");
                self.status
                    .push(identity, Status::Error, format!("failed\n{e}"));
                return;
            }
        };

        let data = match table.to_json() {
            Ok(data) => data,
            Err(e) => {
                error!("service '{SERVICE_NAME}' procedure '{procedure}' failed: {e}");
                self.status
                    .push(identity, Status::Error, format!("failed\n{e}"));
                return;
            }
        };

        self.publish.enqueue(MessageEnvelope::new(identity.clone(), data));
        self.status.push(
            identity,
            Status::Success,
            format!("service '{SERVICE_NAME}' procedure '{procedure}' finished scraping data"),
        );
        info!("service '{SERVICE_NAME}' procedure '{procedure}' finished scraping data");
    }
}

/// Parse a pipe-delimited directory file into a table.
///
/// The first line must match the expected header exactly; the trailer line
/// starting with "File Creation Time" and blank lines are skipped. Every
/// data row must match the header arity.
pub(crate) fn parse_directory(
    content: &str,
    expected_header: &str,
    table_name: &str,
) -> Result<DataTable> {
    let mut lines = content.lines();

    let header = lines.next().ok_or(PipelineError::NoDataScraped)?;
    if header.trim_end_matches('\r').trim() != expected_header {
        return Err(PipelineError::ScrapeFailed(format!(
            "unexpected column header line '{header}'"
        )));
    }

    let columns: Vec<Column> = expected_header
        .split('|')
        .map(|caption| Column::new(column_name(caption), ColumnKind::Text))
        .collect();
    let mut table = DataTable::new(table_name, columns);

    for line in lines {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(FILE_CREATION_TIME_PREFIX) {
            continue;
        }

        let values: Vec<serde_json::Value> =
            line.split('|').map(|field| json!(field.trim())).collect();
        table.push_row(values).map_err(|_| {
            PipelineError::ScrapeFailed(format!("malformed directory row '{line}'"))
        })?;
    }

    if table.is_empty() {
        return Err(PipelineError::NoDataScraped);
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Symbol|Security Name|Market Category|Test Issue|Financial Status|Round Lot Size|ETF|NextShares\n\
        AAPL|Apple Inc. - Common Stock|Q|N|N|100|N|N\n\
        MSFT|Microsoft Corporation - Common Stock|Q|N|N|100|N|N\n\
        File Creation Time: 0806202522:30|||||||\n";

    #[test]
    fn test_parse_directory_skips_trailer() {
        let table = parse_directory(SAMPLE, LISTED_HEADER, "listed_tickers").unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.columns.len(), 8);
        assert_eq!(table.columns[0].name, "symbol");
        assert_eq!(table.columns[1].name, "security_name");
        assert_eq!(table.rows[0][0], "AAPL");
    }

    #[test]
    fn test_parse_directory_rejects_unexpected_header() {
        let content = "Wrong|Header\nAAPL|x\n";
        assert!(matches!(
            parse_directory(content, LISTED_HEADER, "listed_tickers"),
            Err(PipelineError::ScrapeFailed(_))
        ));
    }

    #[test]
    fn test_parse_directory_rejects_malformed_row() {
        let content = format!("{LISTED_HEADER}\nAAPL|only|three\n");
        assert!(matches!(
            parse_directory(&content, LISTED_HEADER, "listed_tickers"),
            Err(PipelineError::ScrapeFailed(_))
        ));
    }

    #[test]
    fn test_parse_directory_empty_is_no_data() {
        let content = format!("{LISTED_HEADER}\nFile Creation Time: 0806202522:30|||||||\n");
        assert!(matches!(
            parse_directory(&content, LISTED_HEADER, "listed_tickers"),
            Err(PipelineError::NoDataScraped)
        ));
        assert!(matches!(
            parse_directory("", LISTED_HEADER, "listed_tickers"),
            Err(PipelineError::NoDataScraped)
        ));
    }

    #[test]
    fn test_parse_directory_handles_crlf() {
        let content = format!("{LISTED_HEADER}\r\nAAPL|Apple Inc.|Q|N|N|100|N|N\r\n");
        let table = parse_directory(&content, LISTED_HEADER, "listed_tickers").unwrap();
        assert_eq!(table.rows.len(), 1);
    }
}
