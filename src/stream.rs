//! CrowdSec Local API decision stream.
//!
//! Polls `/v1/decisions/stream` and forwards non-empty batches to the event
//! loop over a bounded channel. The first successful poll asks for the full
//! decision set (`startup=true`); later polls only receive deltas.

use anyhow::{Context, Result};
use reqwest::{Client, Url};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{CrowdsecConfig, SecureString};
use crate::decision::DecisionBatch;
use crate::error::BouncerError;
use crate::signal::ShutdownToken;

const TIMEOUT_SECS: u64 = 30;
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_MS: u64 = 2000;

/// Startup responses carry every active decision
const MAX_RESPONSE_SIZE: usize = 64 * 1024 * 1024;

pub struct DecisionStream {
    client: Client,
    endpoint: Url,
    api_key: SecureString,
    origins: Vec<String>,
    interval: Duration,
}

impl DecisionStream {
    pub fn new(config: &CrowdsecConfig, interval: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .user_agent(format!("cs-unifi-bouncer/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        let mut base = config.url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)
            .and_then(|url| url.join("v1/decisions/stream"))
            .with_context(|| format!("Invalid CrowdSec URL: {}", config.url))?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            origins: config.origins.clone(),
            interval,
        })
    }

    /// URL of one poll.
    pub fn stream_url(&self, startup: bool) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("startup", if startup { "true" } else { "false" });
            if !self.origins.is_empty() {
                query.append_pair("origins", &self.origins.join(","));
            }
        }
        url
    }

    /// Poll until cancelled.
    ///
    /// Failed polls are logged and retried on the next tick. Returns
    /// [`BouncerError::StreamHalted`] once the event loop stops receiving.
    pub async fn run(
        self,
        batches: mpsc::Sender<DecisionBatch>,
        shutdown: ShutdownToken,
    ) -> Result<(), BouncerError> {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut startup = true;

        info!("Polling decisions from {} every {:?}", self.endpoint, self.interval);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let polled = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                polled = self.poll(startup) => polled,
            };

            let batch = match polled {
                Ok(batch) => batch,
                Err(e) => {
                    warn!("Failed to poll decision stream: {:#}", e);
                    continue;
                }
            };
            startup = false;

            if batch.is_empty() {
                debug!("No new decisions");
                continue;
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                sent = batches.send(batch) => {
                    if sent.is_err() {
                        return Err(BouncerError::StreamHalted);
                    }
                }
            }
        }
    }

    /// One poll with retry and exponential backoff.
    async fn poll(&self, startup: bool) -> Result<DecisionBatch> {
        let url = self.stream_url(startup);
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = RETRY_DELAY_MS * (1 << (attempt - 1));
                debug!("Retry {} after {}ms for {}", attempt, delay, url.path());
                time::sleep(Duration::from_millis(delay)).await;
            }

            match self.fetch(url.clone()).await {
                Ok(batch) => return Ok(batch),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Unknown error")))
    }

    async fn fetch(&self, url: Url) -> Result<DecisionBatch> {
        let response = self
            .client
            .get(url)
            .header("X-Api-Key", self.api_key.as_str())
            .send()
            .await
            .context("Request to CrowdSec failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {}", status);
        }
        if let Some(length) = response.content_length() {
            if length as usize > MAX_RESPONSE_SIZE {
                anyhow::bail!(
                    "Response too large: {} bytes (max: {} bytes)",
                    length,
                    MAX_RESPONSE_SIZE
                );
            }
        }

        let body = response
            .bytes()
            .await
            .context("Failed to read response body")?;
        serde_json::from_slice(&body).context("Failed to decode decision stream")
    }
}
