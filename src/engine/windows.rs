//! Report window resolution.
//!
//! Two shapes of request: a rolling preset ("7d" / "14d" / "30d") anchored
//! at the current instant, or one explicit calendar day. Lead bucketing
//! works on the half-open millisecond interval `[start_ms, end_ms)`; the
//! calendar dates exist only for the ad-platform time_range parameter and
//! for display, and follow the configured local offset (Almaty, UTC+5).

use anyhow::{bail, Result};
use chrono::{FixedOffset, NaiveDate, TimeZone};

use crate::engine::Clock;
use crate::models::ReportWindow;

const DAY_MS: i64 = 86_400_000;

/// Resolve `preset` / `date` query inputs into a concrete window.
/// At most one may be given; neither means the 7-day preset.
pub fn resolve(
    preset: Option<&str>,
    date: Option<&str>,
    clock: &dyn Clock,
    offset: FixedOffset,
) -> Result<ReportWindow> {
    match (preset, date) {
        (Some(_), Some(_)) => bail!("preset and date are mutually exclusive"),
        (_, Some(raw)) => {
            let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|_| anyhow::anyhow!("invalid date {raw:?}, expected YYYY-MM-DD"))?;
            Ok(single_day(day, offset))
        }
        (preset, None) => rolling(preset.unwrap_or("7d"), clock, offset),
    }
}

/// Rolling window ending now: `[now - N days, now)`.
fn rolling(preset: &str, clock: &dyn Clock, offset: FixedOffset) -> Result<ReportWindow> {
    let days: i64 = match preset {
        "7d" => 7,
        "14d" => 14,
        "30d" => 30,
        other => bail!("unknown preset {other:?}"),
    };

    let end_ms = clock.now_ms();
    let start_ms = end_ms - days * DAY_MS;

    Ok(ReportWindow {
        since: local_date(start_ms, offset),
        until: local_date(end_ms, offset),
        preset: preset.to_string(),
        start_ms,
        end_ms,
    })
}

/// One local calendar day: midnight to midnight in the configured offset,
/// end exclusive.
fn single_day(day: NaiveDate, offset: FixedOffset) -> ReportWindow {
    let start = offset
        .from_local_datetime(&day.and_hms_opt(0, 0, 0).unwrap_or_default())
        .single()
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_default();

    ReportWindow {
        since: day,
        until: day,
        preset: "custom".to_string(),
        start_ms: start,
        end_ms: start + DAY_MS,
    }
}

fn local_date(ms: i64, offset: FixedOffset) -> NaiveDate {
    offset
        .timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}
