//! Shared value objects for the attribution & reconciliation engine.
//!
//! Everything here is an immutable value passed between components; no
//! struct in this module holds a client handle or mutable shared state.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ===== CRM wire types (amoCRM v4) =====

/// One raw lead as returned by the CRM lead-list endpoint. Custom fields
/// arrive as a generic id-keyed list; UTM extraction happens in the
/// lead fetcher against a fixed field-id mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLead {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created_at: i64,
    /// Unix seconds; absent or zero means "not yet closed".
    #[serde(default)]
    pub closed_at: Option<i64>,
    #[serde(default)]
    pub status_id: Option<u64>,
    #[serde(default)]
    pub custom_fields_values: Option<Vec<RawCustomField>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCustomField {
    pub field_id: u64,
    #[serde(default)]
    pub values: Vec<RawFieldValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFieldValue {
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

impl RawCustomField {
    /// First value of the field as text, if present and non-empty.
    pub fn first_text(&self) -> Option<String> {
        let value = self.values.first()?.value.as_ref()?;
        let text = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// One closed/paid CRM record with its UTM attributes flattened out.
/// Read-only downstream of the lead fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: u64,
    pub name: String,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds; zero means "not yet closed".
    pub closed_at: i64,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_content: Option<String>,
}

/// A lead plus its resolved traffic team. Attribution is a pure function
/// of the lead's fields, so two identical leads always carry the same
/// `team_id`.
#[derive(Debug, Clone, Serialize)]
pub struct AttributedLead {
    pub lead: Lead,
    /// Configured team id, the raw utm_source for unknown sources, or
    /// [`crate::engine::attribution::UNATTRIBUTED`].
    pub team_id: String,
    /// `closed_at` normalized to milliseconds (0 when not closed).
    pub closed_at_ms: i64,
}

// ===== Ad platform wire types (Facebook Graph API) =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ad {
    pub id: String,
    pub name: String,
    pub campaign_id: String,
}

/// Video-funnel counters shared by campaign- and ad-level insights.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoFunnel {
    pub plays: u64,
    pub p25: u64,
    pub p50: u64,
    pub p75: u64,
    /// 100% watched ("completions").
    pub p100: u64,
    pub thruplay: u64,
}

impl VideoFunnel {
    pub fn add(&mut self, other: &VideoFunnel) {
        self.plays += other.plays;
        self.p25 += other.p25;
        self.p50 += other.p50;
        self.p75 += other.p75;
        self.p100 += other.p100;
        self.thruplay += other.thruplay;
    }
}

/// Per-campaign metrics for a time range. All counts are non-negative;
/// absent upstream fields parse to zero, never to an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignInsight {
    /// Source currency (USD).
    pub spend: f64,
    pub impressions: u64,
    pub clicks: u64,
    pub reach: u64,
    pub lead_actions: u64,
    pub purchase_actions: u64,
    pub video: VideoFunnel,
}

/// Ad-level (creative) insight: video funnel plus enough context to rank.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdInsight {
    pub impressions: u64,
    pub clicks: u64,
    pub video: VideoFunnel,
}

/// One creative in the top-N ranking, ordered by completions.
#[derive(Debug, Clone, Serialize)]
pub struct CreativeVideoStats {
    pub ad_id: String,
    pub name: String,
    pub plays: u64,
    pub thruplay: u64,
    pub completions: u64,
    /// completions / plays, 0 when plays is 0.
    pub completion_rate: f64,
}

/// Per-campaign slice retained inside team totals; feeds the CTR
/// leaderboard.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignBreakdown {
    pub id: String,
    pub name: String,
    pub spend: f64,
    pub impressions: u64,
    pub clicks: u64,
    /// clicks / impressions, 0 when impressions is 0.
    pub ctr: f64,
}

/// Sum of campaign insights for one team in one time range.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TeamAdTotals {
    pub team_id: String,
    /// Source currency (USD).
    pub spend: f64,
    pub impressions: u64,
    pub clicks: u64,
    pub reach: u64,
    pub lead_actions: u64,
    pub purchase_actions: u64,
    pub video: VideoFunnel,
    /// clicks / impressions, 0 when impressions is 0.
    pub ctr: f64,
    pub campaigns: Vec<CampaignBreakdown>,
    /// Top 3 creatives by completion count, ties by discovery order.
    pub top_creatives: Vec<CreativeVideoStats>,
}

// ===== Exchange rate =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateOrigin {
    /// Fresh upstream fetch (or a still-valid cached one).
    Upstream,
    /// Refresh failed; serving the last known cached value.
    Stale,
    /// No cached value and the fetch failed; hard-coded constant.
    Fallback,
}

/// USD → KZT rate resolved for a report. `origin` doubles as the
/// soft-error flag: `Stale` and `Fallback` mean the refresh failed but
/// the report proceeded anyway.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeRate {
    pub date: NaiveDate,
    pub rate: f64,
    pub origin: RateOrigin,
}

// ===== Combined report =====

/// Resolved report window. Dates are local calendar days (for ad-platform
/// time ranges); the millisecond bounds are the half-open interval
/// `[start_ms, end_ms)` used for lead bucketing.
#[derive(Debug, Clone, Serialize)]
pub struct ReportWindow {
    pub since: NaiveDate,
    pub until: NaiveDate,
    pub preset: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Final per-team row of the combined report.
#[derive(Debug, Clone, Serialize)]
pub struct TeamReport {
    pub team: String,
    pub spend_usd: f64,
    pub spend_kzt: f64,
    pub revenue_kzt: f64,
    pub sales: u64,
    /// revenue_kzt / spend_kzt, 0 when spend is 0.
    pub roas: f64,
    /// spend_usd / sales, 0 when sales is 0.
    pub cpa_usd: f64,
    pub impressions: u64,
    pub clicks: u64,
    pub reach: u64,
    pub ctr: f64,
    pub cpc_usd: f64,
    pub cpm_usd: f64,
    pub video: VideoFunnel,
    pub top_creatives: Vec<CreativeVideoStats>,
}

/// Aggregate totals: plain sums of the per-team numeric fields, with the
/// ratios recomputed from those sums (never averaged from per-team
/// ratios).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportTotals {
    pub spend_usd: f64,
    pub spend_kzt: f64,
    pub revenue_kzt: f64,
    pub sales: u64,
    pub impressions: u64,
    pub clicks: u64,
    pub reach: u64,
    pub roas: f64,
    pub cpa_usd: f64,
    pub ctr: f64,
    pub cpc_usd: f64,
    pub cpm_usd: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignSalesEntry {
    pub campaign: String,
    pub sales: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignCtrEntry {
    pub team: String,
    pub campaign: String,
    pub ctr: f64,
    pub impressions: u64,
}

/// The full reconciled report returned to the caller. Computed fresh on
/// every request; never persisted by the engine itself.
#[derive(Debug, Clone, Serialize)]
pub struct CombinedReport {
    pub window: ReportWindow,
    pub exchange_rate: ExchangeRate,
    /// Sorted by `roas` descending.
    pub teams: Vec<TeamReport>,
    pub totals: ReportTotals,
    /// Top UTM campaigns by sale count (CRM data alone).
    pub top_campaigns_by_sales: Vec<CampaignSalesEntry>,
    /// Top ad campaigns by CTR, minimum-impression gated (ad data alone).
    pub top_campaigns_by_ctr: Vec<CampaignCtrEntry>,
    /// Non-fatal per-source failures ("team: reason", "crm: reason").
    pub warnings: Vec<String>,
}

// ===== CRM-only sales statistics =====

#[derive(Debug, Clone, Serialize)]
pub struct TeamSalesStats {
    pub team: String,
    pub count: u64,
    pub today: u64,
    pub yesterday: u64,
    pub last_7_days: u64,
    pub last_30_days: u64,
    pub revenue: f64,
    pub revenue_today: f64,
    pub revenue_last_7_days: f64,
    pub revenue_last_30_days: f64,
    pub campaigns_count: usize,
    pub adsets_count: usize,
    /// First 10 distinct UTM campaign names.
    pub campaigns: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SalesTotals {
    pub total: u64,
    pub today: u64,
    pub yesterday: u64,
    pub last_7_days: u64,
    pub last_30_days: u64,
    pub teams_count: usize,
    pub revenue: f64,
    pub revenue_today: f64,
    pub revenue_last_7_days: f64,
    pub revenue_last_30_days: f64,
    pub revenue_per_sale: f64,
}

/// One local calendar day of the 30-day chart.
#[derive(Debug, Clone, Serialize)]
pub struct DailySalesPoint {
    /// ISO date (local calendar day).
    pub date: String,
    pub total: u64,
    pub teams: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SalesReport {
    pub stats: SalesTotals,
    /// Sorted by total sale count descending.
    pub teams: Vec<TeamSalesStats>,
    pub chart: Vec<DailySalesPoint>,
}
