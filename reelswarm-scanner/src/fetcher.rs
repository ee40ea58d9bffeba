use crate::config::ScannerConfig;
use crate::error::{Result, ScanError};
use async_trait::async_trait;
use reelswarm_core::pipeline::{FetchedPage, PageFetcher, StageResult};
use reqwest::{Client, Proxy};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
struct ProxyInfo {
    proxy: String,
}

#[derive(Debug, Default)]
pub struct ProxyStats {
    pub total_requests: AtomicU64,
    pub proxy_used: AtomicU64,
    pub proxy_failures: AtomicU64,
}

fn client_builder(config: &ScannerConfig) -> reqwest::ClientBuilder {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.timeout)
        .connect_timeout(config.timeout / 2)
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .cookie_store(true)
        .gzip(true)
        .redirect(reqwest::redirect::Policy::limited(5))
}

/// `reqwest` fetcher with retry, a fixed politeness delay and an optional
/// rotating proxy pool.
pub struct HttpFetcher {
    client: Client,
    pool_client: Client,
    config: ScannerConfig,
    next_slot: Mutex<Option<Instant>>,
    stats: ProxyStats,
}

impl HttpFetcher {
    pub fn new(config: ScannerConfig) -> Result<Self> {
        let client = client_builder(&config).build()?;
        let pool_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            pool_client,
            config,
            next_slot: Mutex::new(None),
            stats: ProxyStats::default(),
        })
    }

    pub fn stats(&self) -> &ProxyStats {
        &self.stats
    }

    /// Waits until this worker may send its next request.
    async fn throttle(&self) {
        if self.config.download_delay.is_zero() {
            return;
        }
        let wait_until = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.config.download_delay);
            slot
        };
        tokio::time::sleep_until(wait_until).await;
    }

    async fn lease_proxy(&self, pool_url: &str) -> Result<String> {
        let response = self.pool_client.get(pool_url).send().await?;
        if !response.status().is_success() {
            return Err(ScanError::ProxyPool(format!(
                "pool returned {}",
                response.status()
            )));
        }
        let info: ProxyInfo = response
            .json()
            .await
            .map_err(|e| ScanError::ProxyPool(format!("invalid proxy info: {}", e)))?;
        Ok(format!("http://{}", info.proxy))
    }

    /// A client for one request: proxied if the pool hands out a proxy,
    /// otherwise the shared direct client.
    async fn client_for_request(&self) -> Client {
        let Some(pool_url) = self.config.proxy_pool_url.as_deref() else {
            return self.client.clone();
        };

        let proxied = match self.lease_proxy(pool_url).await {
            Ok(proxy) => {
                debug!("Using proxy {}", proxy);
                Proxy::all(&proxy)
                    .and_then(|p| client_builder(&self.config).proxy(p).build())
                    .map_err(ScanError::from)
            }
            Err(e) => Err(e),
        };

        match proxied {
            Ok(client) => {
                self.stats.proxy_used.fetch_add(1, Ordering::Relaxed);
                client
            }
            Err(e) => {
                self.stats.proxy_failures.fetch_add(1, Ordering::Relaxed);
                error!("Failed to get proxy, going direct: {}", e);
                self.client.clone()
            }
        }
    }

    async fn attempt(&self, url: &str) -> Result<FetchedPage> {
        self.throttle().await;
        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);
        let client = self.client_for_request().await;

        let response = client.get(url).send().await?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(ScanError::Status {
                url: url.to_string(),
                status,
            });
        }
        let body = response.text().await?;
        Ok(FetchedPage {
            url: url.to_string(),
            status,
            body,
        })
    }

    pub async fn get(&self, url: &str) -> Result<FetchedPage> {
        let mut backoff = self.config.retry_backoff;
        let mut attempt = 0;
        loop {
            match self.attempt(url).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt < self.config.retries => {
                    attempt += 1;
                    warn!(
                        "Fetch of {} failed ({}), retry {}/{} in {:?}",
                        url, e, attempt, self.config.retries, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn log_stats(&self) {
        info!(
            "Proxy usage stats: total requests: {}, proxy used: {}, proxy failures: {}",
            self.stats.total_requests.load(Ordering::Relaxed),
            self.stats.proxy_used.load(Ordering::Relaxed),
            self.stats.proxy_failures.load(Ordering::Relaxed)
        );
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> StageResult<FetchedPage> {
        Ok(self.get(url).await?)
    }
}
