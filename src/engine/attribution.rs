//! UTM-based lead-to-team attribution.
//!
//! A pure, total function: every lead resolves to exactly one team id.
//! Two historical rule sets are evaluated in strict priority order: the
//! per-team UTM rules first (configuration order, first match wins), then
//! the legacy proftest-slug substrings over source + campaign + lead
//! name. Noisy UTM strings can match several teams at once, so the rule
//! order decides ties; the passes are deliberately kept separate instead
//! of merged into one scored table.

use crate::config::{LegacyPattern, TeamConfig, UtmRule};
use crate::models::Lead;

/// Sentinel team id for leads with no match and no utm_source at all.
pub const UNATTRIBUTED: &str = "unattributed";

/// Resolve the traffic team responsible for a lead.
pub fn attribute(lead: &Lead, teams: &[TeamConfig], legacy: &[LegacyPattern]) -> String {
    let source = lower(&lead.utm_source);
    let medium = lower(&lead.utm_medium);
    let campaign = lower(&lead.utm_campaign);

    // Pass 1: per-team UTM rules, first configured team wins.
    for team in teams {
        let hit = match &team.utm_rule {
            UtmRule::SourceContains(pattern) => source.contains(pattern.as_str()),
            UtmRule::MediumEquals(pattern) => medium == *pattern,
            UtmRule::CampaignContains(pattern) => campaign.contains(pattern.as_str()),
        };
        if hit {
            return team.team_id.clone();
        }
    }

    // Pass 2: legacy free-text patterns over source, campaign and the
    // lead's display name.
    let haystack = format!("{} {} {}", source, campaign, lead.name.to_lowercase());
    for rule in legacy {
        if rule.substrings.iter().any(|s| haystack.contains(s.as_str())) {
            return rule.team_id.clone();
        }
    }

    // Pass 3: unknown sources keep their raw utm_source so they stay
    // visible as their own bucket in the report.
    match &lead.utm_source {
        Some(raw) if !raw.is_empty() => raw.clone(),
        _ => UNATTRIBUTED.to_string(),
    }
}

fn lower(value: &Option<String>) -> String {
    value.as_deref().unwrap_or("").to_lowercase()
}
