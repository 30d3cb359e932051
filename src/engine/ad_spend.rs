//! Per-team ad-spend aggregation.
//!
//! Campaign ownership is decided by name: a campaign belongs to the team
//! if its lowercased title contains any of the team's configured
//! substrings. Campaign listing is the only hard failure; individual
//! insight fetches degrade to zero rows with a warning, so one broken
//! campaign never sinks the whole team.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::clients::AdPlatform;
use crate::config::TeamConfig;
use crate::models::{
    Ad, AdInsight, CampaignBreakdown, CampaignInsight, CreativeVideoStats, ReportWindow,
    TeamAdTotals,
};

pub struct AdSpendAggregator {
    ads: Arc<dyn AdPlatform>,
    max_tracked_ads: usize,
    top_creatives: usize,
}

impl AdSpendAggregator {
    pub fn new(ads: Arc<dyn AdPlatform>, max_tracked_ads: usize, top_creatives: usize) -> Self {
        Self {
            ads,
            max_tracked_ads,
            top_creatives,
        }
    }

    /// Full ad-side totals for one team over the window. Zero matching
    /// campaigns is a valid empty result, not an error.
    pub async fn aggregate_team(
        &self,
        team: &TeamConfig,
        window: &ReportWindow,
    ) -> Result<TeamAdTotals> {
        let campaigns = self
            .ads
            .list_campaigns(&team.ad_account_id)
            .await
            .with_context(|| format!("listing campaigns for team {}", team.team_id))?;

        let owned: Vec<_> = campaigns
            .into_iter()
            .filter(|c| {
                let name = c.name.to_lowercase();
                team.campaign_patterns.iter().any(|p| name.contains(p.as_str()))
            })
            .collect();

        debug!(team = %team.team_id, campaigns = owned.len(), "matched campaigns");
        let mut totals = TeamAdTotals {
            team_id: team.team_id.clone(),
            ..TeamAdTotals::default()
        };
        if owned.is_empty() {
            return Ok(totals);
        }

        let insights = join_all(owned.iter().map(|campaign| async {
            self.ads
                .campaign_insights(&campaign.id, window.since, window.until)
                .await
        }))
        .await;

        for (campaign, insight) in owned.iter().zip(insights) {
            let insight: CampaignInsight = match insight {
                Ok(insight) => insight,
                Err(err) => {
                    warn!(
                        team = %team.team_id,
                        campaign = %campaign.name,
                        "campaign insights failed, counting as zero: {err:#}"
                    );
                    CampaignInsight::default()
                }
            };

            totals.spend += insight.spend;
            totals.impressions += insight.impressions;
            totals.clicks += insight.clicks;
            totals.reach += insight.reach;
            totals.lead_actions += insight.lead_actions;
            totals.purchase_actions += insight.purchase_actions;
            totals.video.add(&insight.video);
            totals.campaigns.push(CampaignBreakdown {
                id: campaign.id.clone(),
                name: campaign.name.clone(),
                spend: insight.spend,
                impressions: insight.impressions,
                clicks: insight.clicks,
                ctr: ratio(insight.clicks, insight.impressions),
            });
        }
        totals.ctr = ratio(totals.clicks, totals.impressions);

        let campaign_ids: Vec<String> = owned.iter().map(|c| c.id.clone()).collect();
        totals.top_creatives = self.rank_creatives(team, &campaign_ids, window).await;

        Ok(totals)
    }

    /// Creative video ranking: per-ad insights for up to `max_tracked_ads`
    /// ads, ranked by completion count. Any failure here degrades to a
    /// shorter (possibly empty) ranking.
    async fn rank_creatives(
        &self,
        team: &TeamConfig,
        campaign_ids: &[String],
        window: &ReportWindow,
    ) -> Vec<CreativeVideoStats> {
        let ads: Vec<Ad> = match self.ads.list_ads(&team.ad_account_id, campaign_ids).await {
            Ok(ads) => ads,
            Err(err) => {
                warn!(team = %team.team_id, "ad listing failed, skipping creatives: {err:#}");
                return Vec::new();
            }
        };
        let tracked = &ads[..ads.len().min(self.max_tracked_ads)];

        let insights = join_all(tracked.iter().map(|ad| async {
            self.ads.ad_insights(&ad.id, window.since, window.until).await
        }))
        .await;

        let mut creatives: Vec<CreativeVideoStats> = tracked
            .iter()
            .zip(insights)
            .filter_map(|(ad, insight)| {
                let insight: AdInsight = match insight {
                    Ok(insight) => insight,
                    Err(err) => {
                        warn!(
                            team = %team.team_id,
                            ad = %ad.name,
                            "ad insights failed, skipping creative: {err:#}"
                        );
                        return None;
                    }
                };
                Some(CreativeVideoStats {
                    ad_id: ad.id.clone(),
                    name: ad.name.clone(),
                    plays: insight.video.plays,
                    thruplay: insight.video.thruplay,
                    completions: insight.video.p100,
                    completion_rate: if insight.video.plays == 0 {
                        0.0
                    } else {
                        insight.video.p100 as f64 / insight.video.plays as f64
                    },
                })
            })
            .collect();

        // Stable sort keeps discovery order for equal completion counts.
        creatives.sort_by(|a, b| b.completions.cmp(&a.completions));
        creatives.truncate(self.top_creatives);
        creatives
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UtmRule;
    use crate::models::{Campaign, VideoFunnel};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn team() -> TeamConfig {
        TeamConfig {
            team_id: "Kenesary".to_string(),
            ad_account_id: "act_1".to_string(),
            campaign_patterns: vec!["proftest".to_string(), "kenesary".to_string()],
            utm_rule: UtmRule::SourceContains("kenji".to_string()),
        }
    }

    fn window() -> ReportWindow {
        ReportWindow {
            since: NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
            until: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            preset: "7d".to_string(),
            start_ms: 0,
            end_ms: i64::MAX,
        }
    }

    fn campaign(id: &str, name: &str) -> Campaign {
        Campaign {
            id: id.to_string(),
            name: name.to_string(),
            status: None,
        }
    }

    fn insight(spend: f64, impressions: u64, clicks: u64) -> CampaignInsight {
        CampaignInsight {
            spend,
            impressions,
            clicks,
            reach: impressions / 2,
            lead_actions: 0,
            purchase_actions: 0,
            video: VideoFunnel::default(),
        }
    }

    #[derive(Default)]
    struct FakePlatform {
        campaigns: Vec<Campaign>,
        insights: HashMap<String, CampaignInsight>,
        failing_campaigns: Vec<String>,
        ads: Vec<Ad>,
        ad_insights: HashMap<String, AdInsight>,
    }

    #[async_trait]
    impl AdPlatform for FakePlatform {
        async fn list_campaigns(&self, _account_id: &str) -> Result<Vec<Campaign>> {
            Ok(self.campaigns.clone())
        }

        async fn campaign_insights(
            &self,
            campaign_id: &str,
            _since: NaiveDate,
            _until: NaiveDate,
        ) -> Result<CampaignInsight> {
            if self.failing_campaigns.iter().any(|id| id == campaign_id) {
                return Err(anyhow!("rate limited"));
            }
            Ok(self.insights.get(campaign_id).cloned().unwrap_or_default())
        }

        async fn list_ads(&self, _account_id: &str, campaign_ids: &[String]) -> Result<Vec<Ad>> {
            Ok(self
                .ads
                .iter()
                .filter(|ad| campaign_ids.contains(&ad.campaign_id))
                .cloned()
                .collect())
        }

        async fn ad_insights(
            &self,
            ad_id: &str,
            _since: NaiveDate,
            _until: NaiveDate,
        ) -> Result<AdInsight> {
            Ok(self.ad_insights.get(ad_id).cloned().unwrap_or_default())
        }
    }

    fn aggregator(platform: FakePlatform) -> AdSpendAggregator {
        AdSpendAggregator::new(Arc::new(platform), 20, 3)
    }

    #[tokio::test]
    async fn no_matching_campaigns_yields_zero_totals() {
        let platform = FakePlatform {
            campaigns: vec![campaign("c1", "unrelated launch")],
            ..FakePlatform::default()
        };

        let totals = aggregator(platform)
            .aggregate_team(&team(), &window())
            .await
            .unwrap();

        assert_eq!(totals.team_id, "Kenesary");
        assert_eq!(totals.spend, 0.0);
        assert_eq!(totals.impressions, 0);
        assert!(totals.campaigns.is_empty());
        assert!(totals.top_creatives.is_empty());
    }

    #[tokio::test]
    async fn campaign_name_match_is_case_insensitive_or() {
        let mut insights = HashMap::new();
        insights.insert("c1".to_string(), insight(10.0, 1000, 50));
        insights.insert("c3".to_string(), insight(5.0, 500, 10));
        let platform = FakePlatform {
            campaigns: vec![
                campaign("c1", "PROFTEST march"),
                campaign("c2", "other team promo"),
                campaign("c3", "Kenesary retarget"),
            ],
            insights,
            ..FakePlatform::default()
        };

        let totals = aggregator(platform)
            .aggregate_team(&team(), &window())
            .await
            .unwrap();

        assert_eq!(totals.campaigns.len(), 2);
        assert!((totals.spend - 15.0).abs() < 1e-9);
        assert_eq!(totals.impressions, 1500);
        assert_eq!(totals.clicks, 60);
        assert!((totals.ctr - 60.0 / 1500.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn failed_campaign_counts_as_zero_but_sum_continues() {
        let mut insights = HashMap::new();
        insights.insert("a".to_string(), insight(100.0, 10_000, 200));
        insights.insert("b".to_string(), insight(50.0, 5_000, 100));
        let platform = FakePlatform {
            campaigns: vec![
                campaign("a", "proftest a"),
                campaign("bad", "proftest broken"),
                campaign("b", "proftest b"),
            ],
            insights,
            failing_campaigns: vec!["bad".to_string()],
            ..FakePlatform::default()
        };

        let totals = aggregator(platform)
            .aggregate_team(&team(), &window())
            .await
            .unwrap();

        assert!((totals.spend - 150.0).abs() < 1e-9);
        assert_eq!(totals.impressions, 15_000);
        // The broken campaign still appears, as a zero row.
        assert_eq!(totals.campaigns.len(), 3);
        let bad = totals.campaigns.iter().find(|c| c.id == "bad").unwrap();
        assert_eq!(bad.impressions, 0);
        assert_eq!(bad.spend, 0.0);
    }

    #[tokio::test]
    async fn top_creatives_rank_by_completions_with_discovery_order_ties() {
        let ad = |id: &str| Ad {
            id: id.to_string(),
            name: format!("creative {id}"),
            campaign_id: "c1".to_string(),
        };
        let video = |plays: u64, p100: u64| AdInsight {
            impressions: 0,
            clicks: 0,
            video: VideoFunnel {
                plays,
                p100,
                ..VideoFunnel::default()
            },
        };

        let mut ad_insights = HashMap::new();
        ad_insights.insert("a1".to_string(), video(100, 40));
        ad_insights.insert("a2".to_string(), video(100, 90));
        ad_insights.insert("a3".to_string(), video(100, 40));
        ad_insights.insert("a4".to_string(), video(100, 10));

        let mut insights = HashMap::new();
        insights.insert("c1".to_string(), insight(1.0, 100, 1));
        let platform = FakePlatform {
            campaigns: vec![campaign("c1", "proftest video")],
            insights,
            ads: vec![ad("a1"), ad("a2"), ad("a3"), ad("a4")],
            ad_insights,
            ..FakePlatform::default()
        };

        let totals = aggregator(platform)
            .aggregate_team(&team(), &window())
            .await
            .unwrap();

        let ids: Vec<&str> = totals
            .top_creatives
            .iter()
            .map(|c| c.ad_id.as_str())
            .collect();
        // a2 leads; a1 and a3 tie at 40 and keep discovery order.
        assert_eq!(ids, vec!["a2", "a1", "a3"]);
        assert!((totals.top_creatives[0].completion_rate - 0.9).abs() < 1e-12);
    }

    #[tokio::test]
    async fn tracked_ads_are_capped() {
        let ads: Vec<Ad> = (0..30)
            .map(|i| Ad {
                id: format!("a{i}"),
                name: format!("creative {i}"),
                campaign_id: "c1".to_string(),
            })
            .collect();
        let mut insights = HashMap::new();
        insights.insert("c1".to_string(), insight(1.0, 100, 1));
        let platform = FakePlatform {
            campaigns: vec![campaign("c1", "proftest many")],
            insights,
            ads,
            ..FakePlatform::default()
        };

        // Cap of 5: only the first five ads are eligible for ranking.
        let aggregator = AdSpendAggregator::new(Arc::new(platform), 5, 3);
        let totals = aggregator.aggregate_team(&team(), &window()).await.unwrap();

        assert_eq!(totals.top_creatives.len(), 3);
        assert!(totals
            .top_creatives
            .iter()
            .all(|c| c.ad_id.trim_start_matches('a').parse::<u32>().unwrap() < 5));
    }
}
