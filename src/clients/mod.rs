//! External collaborators, each behind a trait seam so the engine can be
//! driven by mocks in tests.

pub mod amocrm;
pub mod facebook;
pub mod rates;

pub use amocrm::{AmoCrmClient, CrmApi};
pub use facebook::{AdPlatform, FacebookAdsClient};
pub use rates::{ExchangeRateHostClient, RateSource};
