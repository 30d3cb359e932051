//! Process configuration.
//!
//! Everything is read once at startup from the environment (`.env` via
//! dotenv); malformed configuration is fatal here, never at request time.
//! The team table and UTM field-id mapping are static configuration, not
//! discovered dynamically.

use anyhow::{bail, Context, Result};
use chrono::FixedOffset;
use std::env;
use std::time::Duration;

/// Primary per-team UTM match rule, evaluated in configuration order.
#[derive(Debug, Clone)]
pub enum UtmRule {
    /// Lowercased utm_source contains the pattern.
    SourceContains(String),
    /// Lowercased utm_medium equals the pattern exactly.
    MediumEquals(String),
    /// Lowercased utm_campaign contains the pattern.
    CampaignContains(String),
}

/// Static configuration for one traffic team.
#[derive(Debug, Clone)]
pub struct TeamConfig {
    pub team_id: String,
    /// Ad-platform account id ("act_..." for Facebook).
    pub ad_account_id: String,
    /// Case-insensitive campaign-name substrings; a campaign matching any
    /// of them (OR) belongs to this team.
    pub campaign_patterns: Vec<String>,
    /// Primary attribution rule for this team's leads.
    pub utm_rule: UtmRule,
}

/// Secondary free-text attribution pattern; checked only after every
/// team's primary rule failed, in list order.
#[derive(Debug, Clone)]
pub struct LegacyPattern {
    pub substrings: Vec<String>,
    pub team_id: String,
}

/// Fixed CRM custom-field-id mapping for the four UTM attributes.
#[derive(Debug, Clone, Copy)]
pub struct UtmFieldIds {
    pub source: u64,
    pub medium: u64,
    pub campaign: u64,
    pub content: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,

    // Facebook Ads
    pub fb_api_base: String,
    pub fb_access_token: String,
    pub fb_timeout: Duration,
    /// Campaign-list page limit.
    pub fb_campaign_limit: u32,

    // amoCRM
    pub amocrm_domain: String,
    pub amocrm_access_token: String,
    pub amocrm_timeout: Duration,
    pub amocrm_pipeline_id: u64,
    /// Stage id of "successfully closed" (paid) leads.
    pub amocrm_paid_stage_id: u64,
    pub crm_page_size: u32,
    /// Mandatory delay between successful CRM page fetches.
    pub crm_page_delay: Duration,
    pub utm_field_ids: UtmFieldIds,

    // Exchange rate
    pub rate_timeout: Duration,

    // Report economics
    /// Fixed revenue per closed sale, KZT.
    pub price_per_sale_kzt: f64,
    /// Local calendar offset for window math (Almaty = UTC+5).
    pub local_offset: FixedOffset,

    // Aggregation bounds
    /// Cap on ad-level (creative) insight fetches per team.
    pub max_tracked_ads: usize,
    pub top_creatives: usize,
    /// Minimum impressions for the campaign CTR leaderboard.
    pub ctr_min_impressions: u64,
    pub leaderboard_len: usize,

    pub teams: Vec<TeamConfig>,
    pub legacy_patterns: Vec<LegacyPattern>,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let offset_hours: i32 = env_parse("LOCAL_UTC_OFFSET_HOURS", 5)?;
        let local_offset = FixedOffset::east_opt(offset_hours * 3600)
            .context("LOCAL_UTC_OFFSET_HOURS out of range")?;

        let config = Self {
            server_host: env_or("SERVER_HOST", "0.0.0.0"),
            server_port: env_parse("PORT", 3000)?,

            fb_api_base: env_or("FB_API_BASE", "https://graph.facebook.com/v21.0"),
            fb_access_token: env_or("FACEBOOK_ADS_TOKEN", ""),
            fb_timeout: Duration::from_secs(env_parse("FB_TIMEOUT_SECS", 15)?),
            fb_campaign_limit: env_parse("FB_CAMPAIGN_LIMIT", 100)?,

            amocrm_domain: env_or("AMOCRM_DOMAIN", "onaiagencykz"),
            amocrm_access_token: env_or("AMOCRM_ACCESS_TOKEN", ""),
            amocrm_timeout: Duration::from_secs(env_parse("AMOCRM_TIMEOUT_SECS", 60)?),
            amocrm_pipeline_id: env_parse("AMOCRM_PIPELINE_ID", 10_350_882)?,
            amocrm_paid_stage_id: env_parse("AMOCRM_PAID_STAGE_ID", 142)?,
            crm_page_size: env_parse("CRM_PAGE_SIZE", 250)?,
            crm_page_delay: Duration::from_millis(env_parse("CRM_PAGE_DELAY_MS", 200)?),
            utm_field_ids: UtmFieldIds {
                source: env_parse("UTM_FIELD_SOURCE", 625_221)?,
                medium: env_parse("UTM_FIELD_MEDIUM", 625_223)?,
                campaign: env_parse("UTM_FIELD_CAMPAIGN", 625_225)?,
                content: env_parse("UTM_FIELD_CONTENT", 625_227)?,
            },

            rate_timeout: Duration::from_secs(env_parse("RATE_TIMEOUT_SECS", 5)?),

            price_per_sale_kzt: env_parse("PRICE_PER_SALE_KZT", 5000.0)?,
            local_offset,

            max_tracked_ads: env_parse("MAX_TRACKED_ADS", 20)?,
            top_creatives: 3,
            ctr_min_impressions: env_parse("CTR_MIN_IMPRESSIONS", 1000)?,
            leaderboard_len: 5,

            teams: default_teams(),
            legacy_patterns: default_legacy_patterns(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Startup-time sanity checks; a malformed team table must never make
    /// it to request handling.
    pub fn validate(&self) -> Result<()> {
        if self.teams.is_empty() {
            bail!("no traffic teams configured");
        }
        for team in &self.teams {
            if team.team_id.is_empty() {
                bail!("team with empty id");
            }
            if !team.ad_account_id.starts_with("act_") {
                bail!(
                    "team {}: ad account id must start with \"act_\", got {:?}",
                    team.team_id,
                    team.ad_account_id
                );
            }
            if team.campaign_patterns.is_empty() {
                bail!("team {}: no campaign name patterns", team.team_id);
            }
            let pattern = match &team.utm_rule {
                UtmRule::SourceContains(p)
                | UtmRule::MediumEquals(p)
                | UtmRule::CampaignContains(p) => p,
            };
            if pattern.is_empty() {
                bail!("team {}: empty UTM pattern", team.team_id);
            }
        }
        for legacy in &self.legacy_patterns {
            if legacy.substrings.iter().any(|s| s.is_empty()) {
                bail!("legacy pattern for {}: empty substring", legacy.team_id);
            }
        }
        if self.crm_page_size == 0 {
            bail!("CRM_PAGE_SIZE must be positive");
        }
        Ok(())
    }
}

/// Production team table. Campaign patterns mirror the ad naming
/// convention (funnel name or team name inside the campaign title).
pub fn default_teams() -> Vec<TeamConfig> {
    vec![
        TeamConfig {
            team_id: "Kenesary".to_string(),
            ad_account_id: "act_964264512447589".to_string(),
            campaign_patterns: strings(&["proftest", "tripwire", "kenesary"]),
            utm_rule: UtmRule::SourceContains("kenji".to_string()),
        },
        TeamConfig {
            team_id: "Arystan".to_string(),
            ad_account_id: "act_666059476005255".to_string(),
            campaign_patterns: strings(&["proftest", "tripwire", "arystan"]),
            utm_rule: UtmRule::SourceContains("arystan".to_string()),
        },
        TeamConfig {
            team_id: "Muha".to_string(),
            ad_account_id: "act_839340528712304".to_string(),
            campaign_patterns: strings(&["proftest", "tripwire", "muha"]),
            utm_rule: UtmRule::MediumEquals("yourmarketolog".to_string()),
        },
        TeamConfig {
            team_id: "Traf4".to_string(),
            ad_account_id: "act_30779210298344970".to_string(),
            campaign_patterns: strings(&["proftest", "tripwire", "traf4"]),
            utm_rule: UtmRule::SourceContains("pb_agency".to_string()),
        },
    ]
}

/// Proftest-era page slugs that predate consistent UTM tagging. Order
/// matters: first match wins.
pub fn default_legacy_patterns() -> Vec<LegacyPattern> {
    vec![
        LegacyPattern {
            substrings: strings(&["traf4", "tf4"]),
            team_id: "Traf4".to_string(),
        },
        LegacyPattern {
            substrings: strings(&["muha"]),
            team_id: "Muha".to_string(),
        },
        LegacyPattern {
            substrings: strings(&["arystan"]),
            team_id: "Arystan".to_string(),
        },
        LegacyPattern {
            substrings: strings(&["kenesary", "kenji"]),
            team_id: "Kenesary".to_string(),
        },
    ]
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
