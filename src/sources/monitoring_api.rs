use async_trait::async_trait;
use serde_json::Value;

use crate::window::PollWindow;

/// Sample resolution requested from the vendor.
pub const TIME_UNIT: &str = "QUARTER_OF_AN_HOUR";

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("monitoring api returned status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Read access to the vendor monitoring API for one site.
///
/// `mode` selects the endpoint variant (`energy`, `power`, ...); it is an
/// opaque path segment as far as this service is concerned.
#[async_trait]
pub trait MonitoringApi: Send + Sync {
    async fn energy_details(&self, window: &PollWindow, mode: &str) -> Result<Value, FetchError>;
}

/// HTTPS client for the `/<site>/<mode>Details.json` endpoint.
pub struct MonitoringApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    site: String,
}

impl MonitoringApiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        site: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            site: site.into(),
        }
    }
}

#[async_trait]
impl MonitoringApi for MonitoringApiClient {
    async fn energy_details(&self, window: &PollWindow, mode: &str) -> Result<Value, FetchError> {
        let url = format!("{}{}/{}Details.json", self.base_url, self.site, mode);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("startTime", window.start_param().as_str()),
                ("endTime", window.end_param().as_str()),
                ("api_key", self.api_key.as_str()),
                ("timeUnit", TIME_UNIT),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status().as_u16()));
        }

        Ok(resp.json().await?)
    }
}
