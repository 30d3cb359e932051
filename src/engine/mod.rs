//! Attribution & reconciliation engine.
//!
//! Stateless per request apart from the process-wide exchange-rate cache.
//! Data flows one direction: clients → fetchers → matcher → aggregator →
//! reconciliation → report value.

pub mod ad_spend;
pub mod attribution;
pub mod lead_fetch;
pub mod rate_cache;
pub mod report;
pub mod sales_stats;
pub mod windows;

use chrono::{DateTime, Utc};

/// Injected clock so window math and cache TTLs are testable without
/// real time passing.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;

    fn now_ms(&self) -> i64 {
        self.now_utc().timestamp_millis()
    }
}

/// Wall-clock implementation used by the server binary.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
