//! Facebook Graph API Client
//!
//! Campaign listing, campaign-level insights and ad-level (creative)
//! video insights. Absent metric fields parse to zero, never to an error:
//! the Graph API omits fields with no delivery in the requested range.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::models::{Ad, AdInsight, Campaign, CampaignInsight, VideoFunnel};

const CAMPAIGN_FIELDS: &str = "id,name,status";
const AD_FIELDS: &str = "id,name,campaign_id";
const CAMPAIGN_INSIGHT_FIELDS: &str = "spend,impressions,clicks,reach,actions,\
video_play_actions,video_p25_watched_actions,video_p50_watched_actions,\
video_p75_watched_actions,video_p100_watched_actions,\
video_thruplay_watched_actions";
const AD_INSIGHT_FIELDS: &str = "impressions,clicks,video_play_actions,\
video_p25_watched_actions,video_p50_watched_actions,\
video_p75_watched_actions,video_p100_watched_actions,\
video_thruplay_watched_actions";

/// Ad platform contract consumed by the spend aggregator.
#[async_trait]
pub trait AdPlatform: Send + Sync {
    async fn list_campaigns(&self, account_id: &str) -> Result<Vec<Campaign>>;

    async fn campaign_insights(
        &self,
        campaign_id: &str,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<CampaignInsight>;

    /// Ads belonging to the given campaigns, in discovery order.
    async fn list_ads(&self, account_id: &str, campaign_ids: &[String]) -> Result<Vec<Ad>>;

    async fn ad_insights(
        &self,
        ad_id: &str,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<AdInsight>;
}

#[derive(Clone)]
pub struct FacebookAdsClient {
    client: Client,
    base_url: String,
    access_token: String,
    campaign_limit: u32,
}

impl FacebookAdsClient {
    pub fn new(
        base_url: String,
        access_token: String,
        timeout: Duration,
        campaign_limit: u32,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .context("Failed to build FacebookAdsClient")?;

        Ok(Self {
            client,
            base_url,
            access_token,
            campaign_limit,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let resp = self
            .client
            .get(self.url(path))
            .query(query)
            .query(&[("access_token", self.access_token.as_str())])
            .send()
            .await
            .with_context(|| format!("GET {path} failed"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("GET {path} {status}: {text}"));
        }

        resp.json::<T>()
            .await
            .with_context(|| format!("Failed to parse response of {path}"))
    }

    fn time_range(since: NaiveDate, until: NaiveDate) -> String {
        format!("{{\"since\":\"{since}\",\"until\":\"{until}\"}}")
    }
}

#[async_trait]
impl AdPlatform for FacebookAdsClient {
    async fn list_campaigns(&self, account_id: &str) -> Result<Vec<Campaign>> {
        let envelope: ListEnvelope<Campaign> = self
            .get_json(
                &format!("/{account_id}/campaigns"),
                &[
                    ("fields", CAMPAIGN_FIELDS.to_string()),
                    ("limit", self.campaign_limit.to_string()),
                ],
            )
            .await?;
        Ok(envelope.data)
    }

    async fn campaign_insights(
        &self,
        campaign_id: &str,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<CampaignInsight> {
        let envelope: ListEnvelope<InsightRow> = self
            .get_json(
                &format!("/{campaign_id}/insights"),
                &[
                    ("fields", CAMPAIGN_INSIGHT_FIELDS.to_string()),
                    ("time_range", Self::time_range(since, until)),
                    ("level", "campaign".to_string()),
                ],
            )
            .await?;

        // No delivery in the window comes back as an empty data array.
        let row = envelope.data.into_iter().next().unwrap_or_default();
        Ok(row.into_campaign_insight())
    }

    async fn list_ads(&self, account_id: &str, campaign_ids: &[String]) -> Result<Vec<Ad>> {
        let envelope: ListEnvelope<Ad> = self
            .get_json(
                &format!("/{account_id}/ads"),
                &[
                    ("fields", AD_FIELDS.to_string()),
                    ("limit", self.campaign_limit.to_string()),
                ],
            )
            .await?;

        Ok(envelope
            .data
            .into_iter()
            .filter(|ad| campaign_ids.contains(&ad.campaign_id))
            .collect())
    }

    async fn ad_insights(
        &self,
        ad_id: &str,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<AdInsight> {
        let envelope: ListEnvelope<InsightRow> = self
            .get_json(
                &format!("/{ad_id}/insights"),
                &[
                    ("fields", AD_INSIGHT_FIELDS.to_string()),
                    ("time_range", Self::time_range(since, until)),
                    ("level", "ad".to_string()),
                ],
            )
            .await?;

        let row = envelope.data.into_iter().next().unwrap_or_default();
        Ok(row.into_ad_insight())
    }
}

// ===== Wire shapes =====

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

/// Graph API serializes every number as a string and represents counters
/// as `[{action_type, value}]` arrays.
#[derive(Debug, Default, Deserialize)]
struct InsightRow {
    #[serde(default)]
    spend: Option<String>,
    #[serde(default)]
    impressions: Option<String>,
    #[serde(default)]
    clicks: Option<String>,
    #[serde(default)]
    reach: Option<String>,
    #[serde(default)]
    actions: Vec<ActionCount>,
    #[serde(default)]
    video_play_actions: Vec<ActionCount>,
    #[serde(default)]
    video_p25_watched_actions: Vec<ActionCount>,
    #[serde(default)]
    video_p50_watched_actions: Vec<ActionCount>,
    #[serde(default)]
    video_p75_watched_actions: Vec<ActionCount>,
    #[serde(default)]
    video_p100_watched_actions: Vec<ActionCount>,
    #[serde(default)]
    video_thruplay_watched_actions: Vec<ActionCount>,
}

#[derive(Debug, Deserialize)]
struct ActionCount {
    #[serde(default)]
    action_type: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

fn parse_f64(value: &Option<String>) -> f64 {
    value
        .as_deref()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn parse_u64(value: &Option<String>) -> u64 {
    value
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
}

fn first_count(actions: &[ActionCount]) -> u64 {
    actions
        .first()
        .map(|a| parse_u64(&a.value))
        .unwrap_or(0)
}

fn action_count(actions: &[ActionCount], action_type: &str) -> u64 {
    actions
        .iter()
        .filter(|a| a.action_type.as_deref() == Some(action_type))
        .map(|a| parse_u64(&a.value))
        .sum()
}

impl InsightRow {
    fn video_funnel(&self) -> VideoFunnel {
        VideoFunnel {
            plays: first_count(&self.video_play_actions),
            p25: first_count(&self.video_p25_watched_actions),
            p50: first_count(&self.video_p50_watched_actions),
            p75: first_count(&self.video_p75_watched_actions),
            p100: first_count(&self.video_p100_watched_actions),
            thruplay: first_count(&self.video_thruplay_watched_actions),
        }
    }

    fn into_campaign_insight(self) -> CampaignInsight {
        CampaignInsight {
            spend: parse_f64(&self.spend),
            impressions: parse_u64(&self.impressions),
            clicks: parse_u64(&self.clicks),
            reach: parse_u64(&self.reach),
            lead_actions: action_count(&self.actions, "lead"),
            purchase_actions: action_count(&self.actions, "purchase"),
            video: self.video_funnel(),
        }
    }

    fn into_ad_insight(self) -> AdInsight {
        AdInsight {
            impressions: parse_u64(&self.impressions),
            clicks: parse_u64(&self.clicks),
            video: self.video_funnel(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insight_row_parses_string_numbers() {
        let json = r#"{
            "spend": "123.45",
            "impressions": "10000",
            "clicks": "250",
            "actions": [
                {"action_type": "lead", "value": "12"},
                {"action_type": "purchase", "value": "3"}
            ],
            "video_play_actions": [{"action_type": "video_view", "value": "900"}],
            "video_p100_watched_actions": [{"action_type": "video_view", "value": "40"}]
        }"#;

        let row: InsightRow = serde_json::from_str(json).unwrap();
        let insight = row.into_campaign_insight();

        assert!((insight.spend - 123.45).abs() < f64::EPSILON);
        assert_eq!(insight.impressions, 10_000);
        assert_eq!(insight.clicks, 250);
        assert_eq!(insight.reach, 0);
        assert_eq!(insight.lead_actions, 12);
        assert_eq!(insight.purchase_actions, 3);
        assert_eq!(insight.video.plays, 900);
        assert_eq!(insight.video.p100, 40);
        assert_eq!(insight.video.p25, 0);
    }

    #[test]
    fn empty_data_array_means_zero_insight() {
        let envelope: ListEnvelope<InsightRow> =
            serde_json::from_str(r#"{"data": []}"#).unwrap();
        let row = envelope.data.into_iter().next().unwrap_or_default();
        let insight = row.into_campaign_insight();
        assert_eq!(insight.impressions, 0);
        assert!((insight.spend).abs() < f64::EPSILON);
    }

    #[test]
    fn time_range_formats_iso_dates() {
        let since = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let until = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(
            FacebookAdsClient::time_range(since, until),
            r#"{"since":"2024-03-01","until":"2024-03-15"}"#
        );
    }
}
