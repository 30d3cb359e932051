//! CRM-only sales statistics.
//!
//! A lighter projection than the combined report: no ad platform, no
//! currency conversion. One CRM fetch, attribution, then rolling and
//! calendar windows over the close timestamps plus a 30-day daily chart.
//! "Today" and "yesterday" are local calendar days in the configured
//! offset; the 7- and 30-day windows roll back from the current instant.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, FixedOffset, NaiveDate};

use crate::config::Config;
use crate::engine::attribution::attribute;
use crate::engine::lead_fetch::CrmLeadFetcher;
use crate::engine::Clock;
use crate::models::{DailySalesPoint, Lead, SalesReport, SalesTotals, TeamSalesStats};

const DAY_MS: i64 = 86_400_000;
const CHART_DAYS: i64 = 30;
const CAMPAIGN_SAMPLE: usize = 10;

pub struct SalesStatsService {
    leads: Arc<CrmLeadFetcher>,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
}

impl SalesStatsService {
    pub fn new(leads: Arc<CrmLeadFetcher>, clock: Arc<dyn Clock>, config: Arc<Config>) -> Self {
        Self {
            leads,
            clock,
            config,
        }
    }

    pub async fn build(&self) -> Result<SalesReport> {
        let leads = self
            .leads
            .fetch_paid_leads(self.config.amocrm_paid_stage_id)
            .await?;
        Ok(project(leads, self.clock.now_ms(), &self.config))
    }
}

struct TeamAccumulator {
    count: u64,
    today: u64,
    yesterday: u64,
    last_7: u64,
    last_30: u64,
    campaigns: HashSet<String>,
    adsets: HashSet<String>,
    campaign_sample: Vec<String>,
}

impl TeamAccumulator {
    fn new() -> Self {
        Self {
            count: 0,
            today: 0,
            yesterday: 0,
            last_7: 0,
            last_30: 0,
            campaigns: HashSet::new(),
            adsets: HashSet::new(),
            campaign_sample: Vec::new(),
        }
    }
}

fn project(leads: Vec<Lead>, now_ms: i64, config: &Config) -> SalesReport {
    let offset = config.local_offset;
    let price_per_sale = config.price_per_sale_kzt;
    let today = local_date(now_ms, offset);
    let yesterday = today - ChronoDuration::days(1);
    let week_start = now_ms - 7 * DAY_MS;
    let month_start = now_ms - 30 * DAY_MS;
    let chart_start = today - ChronoDuration::days(CHART_DAYS - 1);

    let mut teams: HashMap<String, TeamAccumulator> = HashMap::new();
    let mut chart: BTreeMap<NaiveDate, DailySalesPoint> = BTreeMap::new();
    for offset_days in 0..CHART_DAYS {
        let day = chart_start + ChronoDuration::days(offset_days);
        chart.insert(
            day,
            DailySalesPoint {
                date: day.to_string(),
                total: 0,
                teams: BTreeMap::new(),
            },
        );
    }

    for lead in leads {
        if lead.closed_at <= 0 {
            continue;
        }
        let closed_ms = lead.closed_at * 1000;
        if closed_ms > now_ms {
            continue;
        }
        let team_id = attribute(&lead, &config.teams, &config.legacy_patterns);
        let closed_day = local_date(closed_ms, offset);

        let acc = teams.entry(team_id.clone()).or_insert_with(TeamAccumulator::new);
        acc.count += 1;
        if closed_day == today {
            acc.today += 1;
        }
        if closed_day == yesterday {
            acc.yesterday += 1;
        }
        if closed_ms >= week_start {
            acc.last_7 += 1;
        }
        if closed_ms >= month_start {
            acc.last_30 += 1;
        }
        if let Some(campaign) = &lead.utm_campaign {
            if acc.campaigns.insert(campaign.clone())
                && acc.campaign_sample.len() < CAMPAIGN_SAMPLE
            {
                acc.campaign_sample.push(campaign.clone());
            }
        }
        if let Some(content) = &lead.utm_content {
            acc.adsets.insert(content.clone());
        }

        if let Some(point) = chart.get_mut(&closed_day) {
            point.total += 1;
            *point.teams.entry(team_id).or_insert(0) += 1;
        }
    }

    let mut team_stats: Vec<TeamSalesStats> = teams
        .into_iter()
        .map(|(team, acc)| TeamSalesStats {
            team,
            count: acc.count,
            today: acc.today,
            yesterday: acc.yesterday,
            last_7_days: acc.last_7,
            last_30_days: acc.last_30,
            revenue: acc.count as f64 * price_per_sale,
            revenue_today: acc.today as f64 * price_per_sale,
            revenue_last_7_days: acc.last_7 as f64 * price_per_sale,
            revenue_last_30_days: acc.last_30 as f64 * price_per_sale,
            campaigns_count: acc.campaigns.len(),
            adsets_count: acc.adsets.len(),
            campaigns: acc.campaign_sample,
        })
        .collect();
    team_stats.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.team.cmp(&b.team)));

    let mut stats = SalesTotals {
        teams_count: team_stats.len(),
        revenue_per_sale: price_per_sale,
        ..SalesTotals::default()
    };
    for team in &team_stats {
        stats.total += team.count;
        stats.today += team.today;
        stats.yesterday += team.yesterday;
        stats.last_7_days += team.last_7_days;
        stats.last_30_days += team.last_30_days;
    }
    stats.revenue = stats.total as f64 * price_per_sale;
    stats.revenue_today = stats.today as f64 * price_per_sale;
    stats.revenue_last_7_days = stats.last_7_days as f64 * price_per_sale;
    stats.revenue_last_30_days = stats.last_30_days as f64 * price_per_sale;

    SalesReport {
        stats,
        teams: team_stats,
        chart: chart.into_values().collect(),
    }
}

fn local_date(ms: i64, offset: FixedOffset) -> NaiveDate {
    use chrono::TimeZone;
    offset
        .timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}
