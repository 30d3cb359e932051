//! USD → KZT exchange-rate source (exchangerate.host).
//!
//! A single remote call with no pagination; caching and fallback live in
//! [`crate::engine::rate_cache`], not here.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const RATES_URL: &str = "https://api.exchangerate.host/latest";

#[async_trait]
pub trait RateSource: Send + Sync {
    /// Current USD → KZT rate.
    async fn fetch_usd_rate(&self) -> Result<f64>;
}

#[derive(Clone)]
pub struct ExchangeRateHostClient {
    client: Client,
    url: String,
}

impl ExchangeRateHostClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build ExchangeRateHostClient")?;
        Ok(Self {
            client,
            url: RATES_URL.to_string(),
        })
    }
}

#[async_trait]
impl RateSource for ExchangeRateHostClient {
    async fn fetch_usd_rate(&self) -> Result<f64> {
        let body: RatesResponse = self
            .client
            .get(&self.url)
            .query(&[("base", "USD"), ("symbols", "KZT")])
            .send()
            .await
            .context("GET exchange rate failed")?
            .json()
            .await
            .context("Failed to parse exchange rate response")?;

        body.rates
            .get("KZT")
            .copied()
            .filter(|rate| *rate > 0.0)
            .ok_or_else(|| anyhow!("KZT rate missing from response"))
    }
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    #[serde(default)]
    rates: HashMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parses_kzt_rate() {
        let body: RatesResponse =
            serde_json::from_str(r#"{"base":"USD","rates":{"KZT":470.35}}"#).unwrap();
        assert_eq!(body.rates.get("KZT"), Some(&470.35));
    }
}
