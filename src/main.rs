//! Traffic stats server binary: wires the clients, the reconciliation
//! engine and the HTTP router together and serves.

use std::sync::Arc;

use anyhow::{Context, Result};
use dotenv::dotenv;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trafficstats_backend::api::{create_router, AppState};
use trafficstats_backend::clients::{AmoCrmClient, ExchangeRateHostClient, FacebookAdsClient};
use trafficstats_backend::config::Config;
use trafficstats_backend::engine::ad_spend::AdSpendAggregator;
use trafficstats_backend::engine::lead_fetch::{CrmLeadFetcher, SleepDelay};
use trafficstats_backend::engine::rate_cache::ExchangeRateCache;
use trafficstats_backend::engine::report::ReconciliationEngine;
use trafficstats_backend::engine::sales_stats::SalesStatsService;
use trafficstats_backend::engine::SystemClock;
use trafficstats_backend::sink::LogSink;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    init_tracing();

    let config = Arc::new(Config::from_env().context("Invalid configuration")?);
    let clock = Arc::new(SystemClock);

    let facebook = Arc::new(FacebookAdsClient::new(
        config.fb_api_base.clone(),
        config.fb_access_token.clone(),
        config.fb_timeout,
        config.fb_campaign_limit,
    )?);
    let amocrm = Arc::new(AmoCrmClient::new(
        &config.amocrm_domain,
        &config.amocrm_access_token,
        config.amocrm_timeout,
    )?);
    let rates = Arc::new(ExchangeRateHostClient::new(config.rate_timeout)?);

    let fetcher = Arc::new(CrmLeadFetcher::new(
        amocrm,
        Arc::new(SleepDelay::new(config.crm_page_delay)),
        config.amocrm_pipeline_id,
        config.crm_page_size,
        config.utm_field_ids,
    ));
    let engine = Arc::new(ReconciliationEngine::new(
        AdSpendAggregator::new(facebook, config.max_tracked_ads, config.top_creatives),
        fetcher.clone(),
        ExchangeRateCache::new(rates, clock.clone()),
        clock.clone(),
        config.clone(),
    ));
    let sales = Arc::new(SalesStatsService::new(fetcher, clock, config.clone()));

    let app = create_router(AppState {
        engine,
        sales,
        sink: Arc::new(LogSink),
    });

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("traffic stats server listening on {addr}");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trafficstats_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
