//! Combined spend/sales reconciliation.
//!
//! One report request fans out to every team's ad account concurrently,
//! fetches the paid CRM leads once, resolves the exchange rate from the
//! cache, and joins the three in memory. Source failures degrade to
//! warnings and zero rows; the build fails outright only when every ad
//! account AND the CRM are unreachable, because then there is nothing
//! left to report on.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::engine::ad_spend::AdSpendAggregator;
use crate::engine::attribution::attribute;
use crate::engine::lead_fetch::CrmLeadFetcher;
use crate::engine::rate_cache::ExchangeRateCache;
use crate::engine::windows;
use crate::engine::Clock;
use crate::models::{
    AttributedLead, CampaignCtrEntry, CampaignSalesEntry, CombinedReport, Lead, RateOrigin,
    ReportTotals, ReportWindow, TeamAdTotals, TeamReport,
};

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed preset or date in the request.
    #[error("invalid report request: {0}")]
    BadRequest(String),
    /// Every ad account and the CRM failed; no data to report on.
    #[error("all data sources failed: {0}")]
    AllSourcesFailed(String),
}

pub struct ReconciliationEngine {
    aggregator: AdSpendAggregator,
    leads: Arc<CrmLeadFetcher>,
    rates: ExchangeRateCache,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
}

impl ReconciliationEngine {
    pub fn new(
        aggregator: AdSpendAggregator,
        leads: Arc<CrmLeadFetcher>,
        rates: ExchangeRateCache,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            aggregator,
            leads,
            rates,
            clock,
            config,
        }
    }

    /// Build the combined report for a preset or an explicit day.
    pub async fn build_report(
        &self,
        preset: Option<&str>,
        date: Option<&str>,
    ) -> Result<CombinedReport, EngineError> {
        let window = windows::resolve(preset, date, self.clock.as_ref(), self.config.local_offset)
            .map_err(|err| EngineError::BadRequest(err.to_string()))?;

        let ad_side = join_all(
            self.config
                .teams
                .iter()
                .map(|team| self.aggregator.aggregate_team(team, &window)),
        );
        let crm_side = self.leads.fetch_paid_leads(self.config.amocrm_paid_stage_id);
        let (ad_results, crm_result) = tokio::join!(ad_side, crm_side);

        let mut warnings = Vec::new();
        let mut ad_failures = 0usize;
        let totals_by_team: Vec<TeamAdTotals> = self
            .config
            .teams
            .iter()
            .zip(ad_results)
            .map(|(team, result)| match result {
                Ok(totals) => totals,
                Err(err) => {
                    warn!(team = %team.team_id, "ad aggregation failed: {err:#}");
                    warnings.push(format!("{}: {err:#}", team.team_id));
                    ad_failures += 1;
                    TeamAdTotals {
                        team_id: team.team_id.clone(),
                        ..TeamAdTotals::default()
                    }
                }
            })
            .collect();

        let leads = match crm_result {
            Ok(leads) => leads,
            Err(err) => {
                if ad_failures == self.config.teams.len() {
                    return Err(EngineError::AllSourcesFailed(format!("{err:#}")));
                }
                warn!("CRM fetch failed: {err:#}");
                warnings.push(format!("crm: {err:#}"));
                Vec::new()
            }
        };

        let rate = self.rates.rate().await;
        if rate.origin != RateOrigin::Upstream {
            warnings.push(format!("exchange rate degraded ({:?})", rate.origin));
        }

        let attributed = self.attribute_in_window(leads, &window);
        let sales_by_team = count_by(&attributed, |lead| lead.team_id.clone());

        // The per-campaign breakdowns feed the CTR leaderboard and are
        // not part of the final per-team rows, so rank them first.
        let top_campaigns_by_ctr = ctr_leaderboard(
            &totals_by_team,
            self.config.ctr_min_impressions,
            self.config.leaderboard_len,
        );

        let mut teams: Vec<TeamReport> = totals_by_team
            .into_iter()
            .map(|totals| {
                let sales = sales_by_team.get(&totals.team_id).copied().unwrap_or(0);
                team_report(totals, sales, self.config.price_per_sale_kzt, rate.rate)
            })
            .collect();
        teams.sort_by(|a, b| b.roas.partial_cmp(&a.roas).unwrap_or(Ordering::Equal));

        let totals = sum_teams(&teams);
        let top_campaigns_by_sales =
            sales_leaderboard(&attributed, self.config.leaderboard_len);

        info!(
            preset = %window.preset,
            teams = teams.len(),
            sales = totals.sales,
            warnings = warnings.len(),
            "combined report built"
        );

        Ok(CombinedReport {
            window,
            exchange_rate: rate,
            teams,
            totals,
            top_campaigns_by_sales,
            top_campaigns_by_ctr,
            warnings,
        })
    }

    /// Attribute every lead, then keep only those whose close instant
    /// falls inside the half-open window.
    fn attribute_in_window(&self, leads: Vec<Lead>, window: &ReportWindow) -> Vec<AttributedLead> {
        leads
            .into_iter()
            .filter(|lead| lead.closed_at > 0)
            .map(|lead| {
                let team_id = attribute(&lead, &self.config.teams, &self.config.legacy_patterns);
                let closed_at_ms = lead.closed_at * 1000;
                AttributedLead {
                    lead,
                    team_id,
                    closed_at_ms,
                }
            })
            .filter(|lead| {
                lead.closed_at_ms >= window.start_ms && lead.closed_at_ms < window.end_ms
            })
            .collect()
    }
}

fn team_report(totals: TeamAdTotals, sales: u64, price_per_sale: f64, rate: f64) -> TeamReport {
    let spend_kzt = totals.spend * rate;
    let revenue_kzt = sales as f64 * price_per_sale;

    TeamReport {
        team: totals.team_id,
        spend_usd: totals.spend,
        spend_kzt,
        revenue_kzt,
        sales,
        roas: safe_div(revenue_kzt, spend_kzt),
        cpa_usd: safe_div(totals.spend, sales as f64),
        impressions: totals.impressions,
        clicks: totals.clicks,
        reach: totals.reach,
        ctr: totals.ctr,
        cpc_usd: safe_div(totals.spend, totals.clicks as f64),
        cpm_usd: safe_div(totals.spend * 1000.0, totals.impressions as f64),
        video: totals.video,
        top_creatives: totals.top_creatives,
    }
}

/// Plain sums with ratios recomputed from the sums; averaging per-team
/// ratios would weight small teams the same as large ones.
fn sum_teams(teams: &[TeamReport]) -> ReportTotals {
    let mut totals = ReportTotals::default();
    for team in teams {
        totals.spend_usd += team.spend_usd;
        totals.spend_kzt += team.spend_kzt;
        totals.revenue_kzt += team.revenue_kzt;
        totals.sales += team.sales;
        totals.impressions += team.impressions;
        totals.clicks += team.clicks;
        totals.reach += team.reach;
    }
    totals.roas = safe_div(totals.revenue_kzt, totals.spend_kzt);
    totals.cpa_usd = safe_div(totals.spend_usd, totals.sales as f64);
    totals.ctr = safe_div(totals.clicks as f64, totals.impressions as f64);
    totals.cpc_usd = safe_div(totals.spend_usd, totals.clicks as f64);
    totals.cpm_usd = safe_div(totals.spend_usd * 1000.0, totals.impressions as f64);
    totals
}

fn sales_leaderboard(leads: &[AttributedLead], len: usize) -> Vec<CampaignSalesEntry> {
    let counts = count_by(leads, |lead| {
        lead.lead.utm_campaign.clone().unwrap_or_default()
    });

    let mut entries: Vec<CampaignSalesEntry> = counts
        .into_iter()
        .filter(|(campaign, _)| !campaign.is_empty())
        .map(|(campaign, sales)| CampaignSalesEntry { campaign, sales })
        .collect();
    entries.sort_by(|a, b| {
        b.sales
            .cmp(&a.sales)
            .then_with(|| a.campaign.cmp(&b.campaign))
    });
    entries.truncate(len);
    entries
}

/// Campaign CTR ranking across all teams, gated by a minimum impression
/// count so a 3-impression campaign cannot top the board.
fn ctr_leaderboard(
    teams: &[TeamAdTotals],
    min_impressions: u64,
    len: usize,
) -> Vec<CampaignCtrEntry> {
    let mut entries: Vec<CampaignCtrEntry> = teams
        .iter()
        .flat_map(|team| {
            team.campaigns
                .iter()
                .filter(|c| c.impressions >= min_impressions)
                .map(|c| CampaignCtrEntry {
                    team: team.team_id.clone(),
                    campaign: c.name.clone(),
                    ctr: c.ctr,
                    impressions: c.impressions,
                })
        })
        .collect();
    entries.sort_by(|a, b| b.ctr.partial_cmp(&a.ctr).unwrap_or(Ordering::Equal));
    entries.truncate(len);
    entries
}

fn count_by<F>(leads: &[AttributedLead], key: F) -> HashMap<String, u64>
where
    F: Fn(&AttributedLead) -> String,
{
    let mut counts = HashMap::new();
    for lead in leads {
        *counts.entry(key(lead)).or_insert(0) += 1;
    }
    counts
}

fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CampaignBreakdown, VideoFunnel};

    fn totals(team: &str, spend: f64, impressions: u64, clicks: u64) -> TeamAdTotals {
        TeamAdTotals {
            team_id: team.to_string(),
            spend,
            impressions,
            clicks,
            reach: 0,
            lead_actions: 0,
            purchase_actions: 0,
            video: VideoFunnel::default(),
            ctr: if impressions == 0 {
                0.0
            } else {
                clicks as f64 / impressions as f64
            },
            campaigns: Vec::new(),
            top_creatives: Vec::new(),
        }
    }

    #[test]
    fn team_row_converts_currency_and_derives_roas() {
        // 150 USD at 470 KZT/USD against 3 sales of 5000 KZT each.
        let row = team_report(totals("Kenesary", 150.0, 50_000, 1_200), 3, 5000.0, 470.0);

        assert!((row.spend_kzt - 70_500.0).abs() < 1e-9);
        assert!((row.revenue_kzt - 15_000.0).abs() < 1e-9);
        assert!((row.roas - 15_000.0 / 70_500.0).abs() < 1e-12);
        assert!((row.cpa_usd - 50.0).abs() < 1e-9);
        assert!((row.cpc_usd - 0.125).abs() < 1e-9);
        assert!((row.cpm_usd - 3.0).abs() < 1e-9);
    }

    #[test]
    fn zero_denominators_produce_zero_ratios() {
        let row = team_report(totals("Muha", 0.0, 0, 0), 0, 5000.0, 470.0);
        assert_eq!(row.roas, 0.0);
        assert_eq!(row.cpa_usd, 0.0);
        assert_eq!(row.cpc_usd, 0.0);
        assert_eq!(row.cpm_usd, 0.0);
    }

    #[test]
    fn totals_recompute_ratios_from_sums() {
        let a = team_report(totals("A", 100.0, 10_000, 100), 10, 5000.0, 470.0);
        let b = team_report(totals("B", 300.0, 90_000, 300), 2, 5000.0, 470.0);
        let sums = sum_teams(&[a.clone(), b.clone()]);

        assert!((sums.spend_usd - 400.0).abs() < 1e-9);
        assert_eq!(sums.sales, 12);
        // Recomputed from totals, not averaged: 400 / (100k imps) * 1000.
        assert!((sums.ctr - 400.0 / 100_000.0).abs() < 1e-12);
        assert!((sums.cpm_usd - 4.0).abs() < 1e-9);
        assert!((sums.roas - sums.revenue_kzt / sums.spend_kzt).abs() < 1e-12);
        let averaged = (a.ctr + b.ctr) / 2.0;
        assert!((sums.ctr - averaged).abs() > 1e-6);
    }

    fn closed_lead(id: u64, campaign: Option<&str>, team: &str) -> AttributedLead {
        AttributedLead {
            lead: Lead {
                id,
                name: String::new(),
                created_at: 0,
                closed_at: 1,
                utm_source: None,
                utm_medium: None,
                utm_campaign: campaign.map(str::to_string),
                utm_content: None,
            },
            team_id: team.to_string(),
            closed_at_ms: 1000,
        }
    }

    #[test]
    fn sales_leaderboard_ranks_by_count_and_skips_untagged() {
        let leads = vec![
            closed_lead(1, Some("spring"), "A"),
            closed_lead(2, Some("spring"), "A"),
            closed_lead(3, Some("autumn"), "B"),
            closed_lead(4, None, "B"),
        ];

        let board = sales_leaderboard(&leads, 5);
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].campaign, "spring");
        assert_eq!(board[0].sales, 2);
        assert_eq!(board[1].campaign, "autumn");
    }

    #[test]
    fn ctr_leaderboard_gates_on_minimum_impressions() {
        let mut team = totals("A", 0.0, 0, 0);
        team.campaigns = vec![
            CampaignBreakdown {
                id: "tiny".to_string(),
                name: "tiny".to_string(),
                spend: 0.0,
                impressions: 3,
                clicks: 3,
                ctr: 1.0,
            },
            CampaignBreakdown {
                id: "real".to_string(),
                name: "real".to_string(),
                spend: 0.0,
                impressions: 20_000,
                clicks: 600,
                ctr: 0.03,
            },
        ];

        let board = ctr_leaderboard(&[team], 1000, 5);
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].campaign, "real");
        assert!((board[0].ctr - 0.03).abs() < 1e-12);
    }
}
