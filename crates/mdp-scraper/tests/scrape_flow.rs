//! Scrape-to-publish flow against a mocked HTTP source

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mdp_common::shutdown;
use mdp_common::store::{StatusStore, UnroutableMessageStore};
use mdp_common::types::{DataTable, MessageEnvelope, Status};

use mdp_scraper::publish::{PublishCoordinator, PublishHandle, PublishTransport};
use mdp_scraper::scrape::constituents::{IndexConstituentsConfig, IndexConstituentsScrapeService};

const HOLDINGS_CSV: &str = "\
Fund Holdings as of,\"Aug 05, 2026\"\n\
\n\
Ticker,Name,Sector,Asset Class,Market Value,Exchange\n\
AAPL,APPLE INC,Information Technology,Equity,\"1,000\",NASDAQ\n\
MSFT,MICROSOFT CORP,Information Technology,Equity,\"900\",NASDAQ\n\
USD,US DOLLAR,Cash and/or Derivatives,Cash,\"10\",-\n";

struct FakeTransport {
    published: Arc<Mutex<Vec<Vec<u8>>>>,
    sequence: AtomicU64,
}

impl PublishTransport for FakeTransport {
    async fn publish(&self, body: Vec<u8>) -> anyhow::Result<u64> {
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(body);
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn publish_harness(
    signal: shutdown::Shutdown,
    status: StatusStore,
) -> (PublishHandle, Arc<Mutex<Vec<Vec<u8>>>>) {
    let unroutable = UnroutableMessageStore::new("unroutable messages", signal.clone());
    unroutable.start_monitor();

    let published = Arc::new(Mutex::new(Vec::new()));
    let transport = FakeTransport {
        published: Arc::clone(&published),
        sequence: AtomicU64::new(0),
    };
    let (_confirm_tx, confirm_rx) = mpsc::unbounded_channel();
    let coordinator =
        PublishCoordinator::new("data publish", transport, confirm_rx, status, unroutable, signal);
    let handle = coordinator.handle();
    coordinator.start_monitor();
    (handle, published)
}

async fn wait_until(description: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting until {description}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn constituents_scrape_publishes_equity_rows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/holdings.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(HOLDINGS_CSV))
        .mount(&server)
        .await;

    let (_controller, signal) = shutdown::channel();
    let status = StatusStore::new("scrape status", signal.clone());
    status.start_monitor();
    let (publish, published) = publish_harness(signal, status.clone());

    let service = Arc::new(IndexConstituentsScrapeService::new(
        IndexConstituentsConfig {
            url: format!("{}/holdings.csv", server.uri()),
        },
        reqwest::Client::new(),
        publish,
        status.clone(),
    ));

    let message = service.trigger_scrape_constituents();
    assert_eq!(message, "starts to scrape index constituents");

    wait_until("the scrape finishes", || !status.successes().is_empty()).await;
    wait_until("the dataset is published", || {
        !published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_empty()
    })
    .await;

    let body = published
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())[0]
        .clone();
    let envelope = MessageEnvelope::from_bytes(&body).unwrap();
    assert_eq!(envelope.service_procedure.service, "IndexConstituentsScrapeService");

    let table = DataTable::from_json(&envelope.data).unwrap();
    assert_eq!(table.name, "index_constituents");
    // The cash row is filtered out.
    assert_eq!(table.rows.len(), 2);
    assert_eq!(table.rows[0][0], "AAPL");
}

#[tokio::test]
async fn constituents_scrape_records_error_on_http_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/holdings.csv"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream broken"))
        .mount(&server)
        .await;

    let (_controller, signal) = shutdown::channel();
    let status = StatusStore::new("scrape status", signal.clone());
    status.start_monitor();
    let (publish, published) = publish_harness(signal, status.clone());

    let service = Arc::new(IndexConstituentsScrapeService::new(
        IndexConstituentsConfig {
            url: format!("{}/holdings.csv", server.uri()),
        },
        reqwest::Client::new(),
        publish,
        status.clone(),
    ));

    service.trigger_scrape_constituents();
    wait_until("the failure is recorded", || !status.errors().is_empty()).await;

    assert!(published
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .is_empty());
}

#[tokio::test]
async fn second_trigger_while_running_reports_already_running() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/holdings.csv"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(HOLDINGS_CSV)
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let (_controller, signal) = shutdown::channel();
    let status = StatusStore::new("scrape status", signal.clone());
    status.start_monitor();
    let (publish, _published) = publish_harness(signal, status.clone());

    let service = Arc::new(IndexConstituentsScrapeService::new(
        IndexConstituentsConfig {
            url: format!("{}/holdings.csv", server.uri()),
        },
        reqwest::Client::new(),
        publish,
        status.clone(),
    ));

    let first = service.trigger_scrape_constituents();
    assert_eq!(first, "starts to scrape index constituents");

    // The run is still waiting on the delayed response.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = service.trigger_scrape_constituents();
    assert_eq!(second, "index constituents are being scraped");

    // After the run finishes, triggering works again.
    wait_until("the first run finishes", || !status.successes().is_empty()).await;
    let third = service.trigger_scrape_constituents();
    assert_eq!(third, "starts to scrape index constituents");
}

#[tokio::test]
async fn empty_holdings_records_warning() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/holdings.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "Ticker,Name,Sector,Asset Class,Exchange\nUSD,US DOLLAR,Cash,Cash,-\n",
        ))
        .mount(&server)
        .await;

    let (_controller, signal) = shutdown::channel();
    let status = StatusStore::new("scrape status", signal.clone());
    status.start_monitor();
    let (publish, published) = publish_harness(signal, status.clone());

    let service = Arc::new(IndexConstituentsScrapeService::new(
        IndexConstituentsConfig {
            url: format!("{}/holdings.csv", server.uri()),
        },
        reqwest::Client::new(),
        publish,
        status.clone(),
    ));

    service.trigger_scrape_constituents();
    wait_until("the warning is recorded", || !status.warnings().is_empty()).await;

    assert_eq!(status.warnings()[0].status, Status::Warning);
    assert!(published
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .is_empty());
}
