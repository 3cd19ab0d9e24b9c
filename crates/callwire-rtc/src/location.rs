//! Edge-location discovery
//!
//! Resolves the nearest edge region by probing a hint URL and reading the
//! point-of-presence header the CDN stamps on the response. Discovery is
//! best-effort: it never fails, it falls back to a fixed region instead.

use std::time::Duration;

use tokio::sync::OnceCell;

use crate::config::RtcConfig;

/// Response header carrying the CDN point-of-presence code
pub const HEADER_EDGE_POP: &str = "x-amz-cf-pop";

pub struct LocationDiscovery {
    url: String,
    max_retries: u32,
    fallback: String,
    timeout: Duration,
    client: reqwest::Client,
    // First resolved result, success or exhaustion. Tied to this instance,
    // not shared process-wide.
    cached: OnceCell<String>,
}

impl LocationDiscovery {
    pub fn new(
        url: impl Into<String>,
        max_retries: u32,
        fallback: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            max_retries,
            fallback: fallback.into(),
            timeout,
            client: reqwest::Client::new(),
            cached: OnceCell::new(),
        }
    }

    pub fn from_config(config: &RtcConfig) -> Self {
        Self::new(
            config.hint_url.clone(),
            config.discovery_max_retries,
            config.fallback_location.clone(),
            config.probe_timeout(),
        )
    }

    /// Resolve the 3-character region code for the nearest edge.
    ///
    /// Never fails; on any unrecoverable condition the fallback region is
    /// returned. The first result is memoized for the lifetime of this
    /// instance, so later calls issue no further probes.
    pub async fn discover(&self) -> String {
        self.cached.get_or_init(|| self.resolve()).await.clone()
    }

    async fn resolve(&self) -> String {
        let url = match reqwest::Url::parse(&self.url) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Invalid hint URL {}: {}", self.url, e);
                return self.fallback.clone();
            }
        };

        for attempt in 1..=self.max_retries {
            tracing::debug!("Discovering location, attempt {}", attempt);

            let response = match self
                .client
                .head(url.clone())
                .timeout(self.timeout)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!("Location probe failed: {}", e);
                    continue;
                }
            };

            if response.status() != reqwest::StatusCode::OK {
                tracing::warn!("Unexpected status from hint URL: {}", response.status());
                continue;
            }

            let pop = response
                .headers()
                .get(HEADER_EDGE_POP)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("");

            // A present-but-malformed header will not change on retry, so
            // this path short-circuits straight to the fallback. Only
            // transport failures and bad statuses are worth another attempt.
            if pop.chars().count() < 3 {
                tracing::warn!("Invalid pop header {:?}, using fallback", pop);
                return self.fallback.clone();
            }

            let location: String = pop.chars().take(3).collect();
            tracing::info!("Discovered edge location: {}", location);
            return location;
        }

        tracing::info!(
            "Failed to discover location after {} attempts, using fallback {}",
            self.max_retries,
            self.fallback
        );
        self.fallback.clone()
    }
}
