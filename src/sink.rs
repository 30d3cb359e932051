//! Report delivery.
//!
//! A finished report can be pushed somewhere after the HTTP response is
//! already on the wire; delivery runs fire-and-forget and a failure only
//! logs. [`LogSink`] is the default target and simply emits a summary
//! line, which is enough for the current consumers (the dashboard pulls,
//! nothing pushes yet).

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::models::CombinedReport;

#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn save(&self, report: &CombinedReport) -> Result<()>;
}

pub struct LogSink;

#[async_trait]
impl ReportSink for LogSink {
    async fn save(&self, report: &CombinedReport) -> Result<()> {
        info!(
            preset = %report.window.preset,
            since = %report.window.since,
            until = %report.window.until,
            spend_usd = report.totals.spend_usd,
            sales = report.totals.sales,
            roas = report.totals.roas,
            "report ready"
        );
        Ok(())
    }
}
