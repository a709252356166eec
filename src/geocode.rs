use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    display_name: Option<String>,
}

/// Reverse geocoding against a Nominatim-compatible `/reverse` endpoint.
#[derive(Clone)]
pub struct Geocoder {
    client: reqwest::Client,
    url: Option<String>,
}

impl Geocoder {
    pub fn new(url: Option<String>, user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("Failed to create geocoder HTTP client")?;
        Ok(Self { client, url })
    }

    pub fn disabled() -> Self {
        Self { client: reqwest::Client::new(), url: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Human-readable address for a coordinate, or an empty string when the
    /// lookup fails for any reason. A missing address never blocks a check-in.
    pub async fn reverse(&self, lat: f64, lon: f64) -> String {
        let Some(url) = self.url.as_deref() else {
            return String::new();
        };
        match self.lookup(url, lat, lon).await {
            Ok(name) => name,
            Err(e) => {
                warn!("Reverse geocoding failed for ({}, {}): {:#}", lat, lon, e);
                String::new()
            }
        }
    }

    async fn lookup(&self, url: &str, lat: f64, lon: f64) -> Result<String> {
        let response = self
            .client
            .get(url)
            .query(&[("format", "jsonv2".to_string()), ("lat", lat.to_string()), ("lon", lon.to_string())])
            .send()
            .await
            .context("request error")?
            .error_for_status()
            .context("geocoder returned an error status")?;
        let body: ReverseResponse = response.json().await.context("JSON decode error")?;
        Ok(body.display_name.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_geocoder_returns_empty_address() {
        let g = Geocoder::disabled();
        assert!(!g.is_enabled());
        assert_eq!(g.reverse(21.0, 105.8).await, "");
    }

    #[tokio::test]
    async fn unreachable_geocoder_returns_empty_address() {
        // Port 9 (discard) on localhost is not expected to serve HTTP
        let g = Geocoder::new(Some("http://127.0.0.1:9/reverse".to_string()), "test", Duration::from_secs(2)).unwrap();
        assert_eq!(g.reverse(21.0, 105.8).await, "");
    }
}
