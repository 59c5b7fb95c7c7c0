//! Downloading registry archives with retries on transient failures.

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use reqwest::Client;
use std::future::Future;
use std::io::Write;
use std::time::Duration;

use super::status::{MAX_ATTEMPTS, PermanentError, RETRY_DELAY, permanent_error};

/// HTTP client for fetching package archives.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Builds a client identifying itself as pkgsync, with a per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("pkgsync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::new(client))
    }

    /// Override the pause between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Stream `url` into the writer returned by `create_writer` and return
    /// the number of bytes written.
    ///
    /// Every attempt starts over with a fresh writer. A [`PermanentError`]
    /// ends the download immediately.
    #[tracing::instrument(skip(self, create_writer))]
    pub async fn download_file<W, F>(&self, url: &str, create_writer: F) -> Result<u64>
    where
        W: Write,
        F: Fn() -> Result<W>,
    {
        self.with_retry(url, || self.download_once(url, &create_writer))
            .await
    }

    async fn download_once<W, F>(&self, url: &str, create_writer: &F) -> Result<u64>
    where
        W: Write,
        F: Fn() -> Result<W>,
    {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to request {}", url))?;

        let status = response.status();
        if !status.is_success() {
            if let Some(permanent) = permanent_error(url, status) {
                return Err(permanent.into());
            }
            bail!("{} returned HTTP {}", url, status);
        }

        let mut writer = create_writer()?;
        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("Connection lost while downloading {}", url))?
        {
            writer
                .write_all(&chunk)
                .context("Failed to write downloaded data")?;
            written += chunk.len() as u64;
        }
        writer.flush().context("Failed to flush downloaded file")?;

        debug!("Downloaded {} bytes from {}", written, url);
        Ok(written)
    }

    async fn with_retry<F, Fut, T>(&self, url: &str, attempt: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut number = 1;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if is_permanent(&e) => return Err(e),
                Err(e) if number >= MAX_ATTEMPTS => {
                    return Err(e.context(format!("Gave up on {} after {} attempts", url, number)));
                }
                Err(e) => {
                    warn!(
                        "Attempt {}/{} for {} failed: {:#}",
                        number, MAX_ATTEMPTS, url, e
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    number += 1;
                }
            }
        }
    }
}

fn is_permanent(e: &anyhow::Error) -> bool {
    e.downcast_ref::<PermanentError>().is_some()
}
