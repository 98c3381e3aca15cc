//! Connectivity probe: tells genuine internet apart from a captive portal

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};

/// Default probe URL (plain HTTP so a portal can intercept it)
pub const DEFAULT_PROBE_URL: &str = "http://www.baidu.com";

/// Host the probe must resolve to when not captured
pub const DEFAULT_PROBE_HOST: &str = "baidu.com";

/// String only the real probe page contains
pub const DEFAULT_PROBE_MARKER: &str = "百度";

/// Default probe timeout in seconds, applied to connect and to read separately
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

/// Result of a single probe
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectivityResult {
    GenuineInternet,
    /// Holds the URL the request ended up at
    CapturedByPortal(String),
    NetworkError(String),
}

impl ConnectivityResult {
    pub fn is_online(&self) -> bool {
        matches!(self, ConnectivityResult::GenuineInternet)
    }
}

impl std::fmt::Display for ConnectivityResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectivityResult::GenuineInternet => write!(f, "genuine internet"),
            ConnectivityResult::CapturedByPortal(target) => {
                write!(f, "captured by portal ({})", target)
            }
            ConnectivityResult::NetworkError(cause) => write!(f, "network error: {}", cause),
        }
    }
}

/// Anything that can classify current connectivity
#[async_trait]
pub trait ConnectivityCheck: Send + Sync {
    async fn probe(&self) -> ConnectivityResult;
}

#[derive(Clone, Debug)]
pub struct ProbeConfig {
    pub url: String,
    pub expected_host: String,
    pub marker: String,
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_PROBE_URL.to_string(),
            expected_host: DEFAULT_PROBE_HOST.to_string(),
            marker: DEFAULT_PROBE_MARKER.to_string(),
            timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
        }
    }
}

/// HTTP probe against a known-good endpoint
pub struct ConnectivityProbe {
    client: reqwest::Client,
    config: ProbeConfig,
}

impl ConnectivityProbe {
    pub fn new(config: ProbeConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            // connect + read
            .timeout(config.timeout * 2)
            .build()?;
        Ok(Self { client, config })
    }

    async fn fetch(&self) -> reqwest::Result<(StatusCode, Url, String)> {
        let response = self.client.get(&self.config.url).send().await?;
        let status = response.status();
        let final_url = response.url().clone();
        let body = response.text().await?;
        Ok((status, final_url, body))
    }
}

#[async_trait]
impl ConnectivityCheck for ConnectivityProbe {
    async fn probe(&self) -> ConnectivityResult {
        tracing::debug!(
            "Probing {} (timeout {:?})",
            self.config.url,
            self.config.timeout
        );
        let result = match self.fetch().await {
            Ok((status, final_url, body)) => classify(
                status,
                &final_url,
                &body,
                &self.config.expected_host,
                &self.config.marker,
            ),
            Err(e) => ConnectivityResult::NetworkError(e.to_string()),
        };
        match &result {
            ConnectivityResult::GenuineInternet => tracing::debug!("Probe: OK"),
            ConnectivityResult::CapturedByPortal(target) => {
                tracing::info!("Probe: captured, ended up at {}", target)
            }
            ConnectivityResult::NetworkError(cause) => tracing::warn!("Probe error: {}", cause),
        }
        result
    }
}

/// 200 plus either the expected host or the marker in the body
fn classify(
    status: StatusCode,
    final_url: &Url,
    body: &str,
    expected_host: &str,
    marker: &str,
) -> ConnectivityResult {
    if status != StatusCode::OK {
        tracing::info!("Probe returned status {}", status.as_u16());
        return ConnectivityResult::CapturedByPortal(final_url.to_string());
    }
    let on_expected_host = final_url
        .host_str()
        .map(|host| host_matches(host, expected_host))
        .unwrap_or(false);
    if on_expected_host || body.contains(marker) {
        ConnectivityResult::GenuineInternet
    } else {
        ConnectivityResult::CapturedByPortal(final_url.to_string())
    }
}

fn host_matches(host: &str, expected: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let expected = expected.to_ascii_lowercase();
    host == expected || host.ends_with(&format!(".{}", expected))
}
