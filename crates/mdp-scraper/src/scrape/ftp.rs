//! FTP download helper for directory-file sources
//!
//! The suppaftp client is synchronous, so downloads run on a blocking task.
//! One attempt per call: retry policy is deliberately external to the
//! pipeline (a failed scrape is recorded and re-triggered by an operator).

use suppaftp::FtpStream;
use tokio::task;
use tracing::debug;

use mdp_common::error::{PipelineError, Result};

/// Connection settings for an FTP source.
#[derive(Debug, Clone)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Download a file from the FTP server and decode it as UTF-8 text.
pub async fn download_text(config: &FtpConfig, path: &str) -> Result<String> {
    let config = config.clone();
    let path = path.to_string();

    task::spawn_blocking(move || download_text_sync(&config, &path))
        .await
        .map_err(|e| PipelineError::ScrapeFailed(format!("FTP download task panicked: {e}")))?
}

fn download_text_sync(config: &FtpConfig, path: &str) -> Result<String> {
    debug!("connecting to FTP server {}:{}", config.host, config.port);

    let mut ftp_stream = FtpStream::connect(format!("{}:{}", config.host, config.port))
        .map_err(|e| PipelineError::ScrapeFailed(format!("failed to connect to FTP server: {e}")))?;

    // Extended passive mode plays better with NAT and containers.
    ftp_stream.set_mode(suppaftp::Mode::ExtendedPassive);

    ftp_stream
        .login(&config.username, &config.password)
        .map_err(|e| PipelineError::ScrapeFailed(format!("failed to login to FTP server: {e}")))?;

    debug!("downloading file {path}");
    let buffer = ftp_stream
        .retr_as_buffer(path)
        .map_err(|e| PipelineError::ScrapeFailed(format!("failed to download '{path}': {e}")))?;

    if let Err(e) = ftp_stream.quit() {
        debug!("failed to quit FTP session gracefully: {e}");
    }

    String::from_utf8(buffer.into_inner())
        .map_err(|e| PipelineError::ScrapeFailed(format!("'{path}' is not valid UTF-8: {e}")))
}
