//! Exchange-rate cache.
//!
//! TTL-bound cache of the USD → KZT rate with a single-flight refresh:
//! the refresh path holds one async mutex across the upstream await, so
//! two concurrent misses can never issue two fetches; the second caller
//! blocks and then reads the freshly stored value. A failed refresh
//! degrades to the last known value, then to a hard-coded constant; it is
//! never a hard failure because ROI computation must still proceed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::warn;

use crate::clients::RateSource;
use crate::engine::Clock;
use crate::models::{ExchangeRate, RateOrigin};

/// Served when the upstream fails and nothing is cached yet.
pub const FALLBACK_USD_KZT: f64 = 470.0;

const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
struct CachedRate {
    rate: f64,
    fetched_at: DateTime<Utc>,
}

pub struct ExchangeRateCache {
    source: Arc<dyn RateSource>,
    clock: Arc<dyn Clock>,
    entry: Mutex<Option<CachedRate>>,
    ttl: Duration,
}

impl ExchangeRateCache {
    pub fn new(source: Arc<dyn RateSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            entry: Mutex::new(None),
            ttl: CACHE_TTL,
        }
    }

    #[cfg(test)]
    fn with_ttl(source: Arc<dyn RateSource>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            source,
            clock,
            entry: Mutex::new(None),
            ttl,
        }
    }

    /// Current USD → KZT rate. Infallible by contract; `origin` reports
    /// how the value was obtained.
    pub async fn rate(&self) -> ExchangeRate {
        let now = self.clock.now_utc();
        let mut entry = self.entry.lock().await;

        if let Some(cached) = entry.as_ref() {
            let age = (now - cached.fetched_at).to_std().unwrap_or_default();
            if age < self.ttl {
                return ExchangeRate {
                    date: now.date_naive(),
                    rate: cached.rate,
                    origin: RateOrigin::Upstream,
                };
            }
        }

        // Miss or expired: exactly one upstream fetch under the lock.
        match self.source.fetch_usd_rate().await {
            Ok(rate) => {
                *entry = Some(CachedRate {
                    rate,
                    fetched_at: now,
                });
                ExchangeRate {
                    date: now.date_naive(),
                    rate,
                    origin: RateOrigin::Upstream,
                }
            }
            Err(err) => {
                if let Some(cached) = entry.as_ref() {
                    warn!("exchange rate refresh failed, serving stale value: {err:#}");
                    ExchangeRate {
                        date: now.date_naive(),
                        rate: cached.rate,
                        origin: RateOrigin::Stale,
                    }
                } else {
                    warn!("exchange rate fetch failed with empty cache, using fallback: {err:#}");
                    ExchangeRate {
                        date: now.date_naive(),
                        rate: FALLBACK_USD_KZT,
                        origin: RateOrigin::Fallback,
                    }
                }
            }
        }
    }
}
