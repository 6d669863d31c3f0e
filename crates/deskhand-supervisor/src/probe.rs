//! Liveness probes.
//!
//! Startup is not "the process spawned" but "the service answers".
//! A [`HealthProbe`] encapsulates the answering check; the stock
//! [`HttpProbe`] treats any HTTP response at all as ready, since a
//! booting server typically refuses the connection outright.

use std::time::Duration;

use async_trait::async_trait;

/// Readiness check for a supervised task.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// One probe attempt. `true` means the service is up.
    async fn check(&self) -> bool;

    /// Human-facing address of the probed service, reported in the
    /// `Started` event so callers can open or display it.
    fn address(&self) -> String;
}

/// HTTP-based probe: issue a GET and accept any response.
///
/// Status codes are deliberately ignored. A 404 or 500 still proves
/// the server is accepting connections; only transport errors
/// (connection refused, timeout) count as not ready.
pub struct HttpProbe {
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    /// Probe `url` with a per-attempt timeout well under the poll
    /// interval, so a hung attempt cannot stretch the startup window.
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(800))
            .build()
            .unwrap_or_default();
        Self { url: url.into(), client }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn check(&self) -> bool {
        self.client.get(&self.url).send().await.is_ok()
    }

    fn address(&self) -> String {
        self.url.clone()
    }
}
