use std::time::Duration;

/// Tunables for discovery and signaling
#[derive(Debug, Clone)]
pub struct RtcConfig {
    /// URL probed for the edge-location hint header
    pub hint_url: String,
    /// Region code used when discovery fails
    pub fallback_location: String,
    /// Attempts before discovery gives up
    pub discovery_max_retries: u32,
    /// Per-probe timeout in milliseconds
    pub probe_timeout_ms: u64,
    /// Seconds between health-check requests on the signaling socket
    pub keepalive_interval_secs: u64,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            hint_url: "https://hint.callwire.dev/".to_string(),
            fallback_location: "IAD".to_string(),
            discovery_max_retries: 3,
            probe_timeout_ms: 1000,
            keepalive_interval_secs: 15,
        }
    }
}

impl RtcConfig {
    /// Load from `CALLWIRE_*` environment variables, falling back to defaults
    pub fn load() -> Self {
        let defaults = Self::default();

        let hint_url =
            std::env::var("CALLWIRE_HINT_URL").unwrap_or_else(|_| defaults.hint_url.clone());

        let fallback_location = std::env::var("CALLWIRE_FALLBACK_LOCATION")
            .unwrap_or_else(|_| defaults.fallback_location.clone());

        let discovery_max_retries = parse_env(
            "CALLWIRE_DISCOVERY_MAX_RETRIES",
            defaults.discovery_max_retries,
        );
        let probe_timeout_ms = parse_env("CALLWIRE_PROBE_TIMEOUT_MS", defaults.probe_timeout_ms);
        let keepalive_interval_secs = parse_env(
            "CALLWIRE_KEEPALIVE_INTERVAL_SECS",
            defaults.keepalive_interval_secs,
        );

        Self {
            hint_url,
            fallback_location,
            discovery_max_retries,
            probe_timeout_ms,
            keepalive_interval_secs,
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

fn parse_env<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value for {}: {:?}, using default", name, raw);
            default
        }),
        Err(_) => default,
    }
}
