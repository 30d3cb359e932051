//! amoCRM v4 Leads Client
//!
//! One endpoint matters here: the paginated lead list filtered to a
//! single pipeline stage. The CRM is slow under load, so the timeout is
//! configured independently from the ad-platform client.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::models::RawLead;

/// CRM contract consumed by the lead fetcher.
#[async_trait]
pub trait CrmApi: Send + Sync {
    /// One page of leads in the given pipeline stage. Pages are 1-based;
    /// a short or empty page means the listing is exhausted.
    async fn leads_page(
        &self,
        pipeline_id: u64,
        stage_id: u64,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<RawLead>>;
}

#[derive(Clone)]
pub struct AmoCrmClient {
    client: Client,
    base_url: String,
}

impl AmoCrmClient {
    pub fn new(domain: &str, access_token: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    format!("Bearer {access_token}")
                        .parse()
                        .context("Invalid amoCRM access token")?,
                );
                headers
            })
            .build()
            .context("Failed to build AmoCrmClient")?;

        Ok(Self {
            client,
            base_url: format!("https://{domain}.amocrm.ru/api/v4"),
        })
    }
}

#[async_trait]
impl CrmApi for AmoCrmClient {
    async fn leads_page(
        &self,
        pipeline_id: u64,
        stage_id: u64,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<RawLead>> {
        let url = format!("{}/leads", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("filter[pipeline_id]", pipeline_id.to_string()),
                ("filter[statuses][0][status_id]", stage_id.to_string()),
                ("filter[statuses][0][pipeline_id]", pipeline_id.to_string()),
                ("with", "contacts".to_string()),
                ("limit", page_size.to_string()),
                ("page", page.to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("GET /leads page {page} failed"))?;

        // amoCRM answers 204 with an empty body once past the last page.
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("GET /leads page {page} {status}: {text}"));
        }

        let body: LeadsEnvelope = resp
            .json()
            .await
            .context("Failed to parse leads response")?;

        Ok(body
            .embedded
            .map(|e| e.leads)
            .unwrap_or_default())
    }
}

#[derive(Debug, Deserialize)]
struct LeadsEnvelope {
    #[serde(rename = "_embedded")]
    embedded: Option<Embedded>,
}

#[derive(Debug, Deserialize)]
struct Embedded {
    #[serde(default)]
    leads: Vec<RawLead>,
}
