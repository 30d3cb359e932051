//! Paginated CRM lead retrieval.
//!
//! Pages are fetched strictly sequentially: amoCRM rate-limits hard, so a
//! mandatory delay separates successful page fetches. The delay policy is
//! a trait so tests run without real sleeps. Pagination is all-or-nothing:
//! a failed page aborts the loop and discards what was accumulated.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::clients::CrmApi;
use crate::config::UtmFieldIds;
use crate::models::{Lead, RawLead};

/// Inter-page pacing policy.
#[async_trait]
pub trait PageDelay: Send + Sync {
    async fn pause(&self);
}

/// Real pacing: sleep a fixed interval between successful page fetches.
pub struct SleepDelay {
    interval: Duration,
}

impl SleepDelay {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl PageDelay for SleepDelay {
    async fn pause(&self) {
        tokio::time::sleep(self.interval).await;
    }
}

/// No-op pacing for tests.
pub struct NoDelay;

#[async_trait]
impl PageDelay for NoDelay {
    async fn pause(&self) {}
}

pub struct CrmLeadFetcher {
    crm: Arc<dyn CrmApi>,
    delay: Arc<dyn PageDelay>,
    pipeline_id: u64,
    page_size: u32,
    field_ids: UtmFieldIds,
}

impl CrmLeadFetcher {
    pub fn new(
        crm: Arc<dyn CrmApi>,
        delay: Arc<dyn PageDelay>,
        pipeline_id: u64,
        page_size: u32,
        field_ids: UtmFieldIds,
    ) -> Self {
        Self {
            crm,
            delay,
            pipeline_id,
            page_size,
            field_ids,
        }
    }

    /// All closed/paid leads in the given pipeline stage, UTM fields
    /// flattened. Stops when a page comes back short or empty.
    pub async fn fetch_paid_leads(&self, stage_id: u64) -> Result<Vec<Lead>> {
        let mut leads = Vec::new();
        let mut page: u32 = 1;

        loop {
            debug!(page, "fetching paid leads page");
            let raw = self
                .crm
                .leads_page(self.pipeline_id, stage_id, page, self.page_size)
                .await
                .with_context(|| format!("lead pagination aborted at page {page}"))?;

            let count = raw.len();
            leads.extend(raw.into_iter().map(|lead| self.flatten(lead)));

            if count < self.page_size as usize {
                break;
            }
            page += 1;
            // Mandatory between successful fetches only; a failed page
            // already aborted above.
            self.delay.pause().await;
        }

        info!(total = leads.len(), "fetched paid leads");
        Ok(leads)
    }

    /// Flatten the generic custom-field list into the four UTM
    /// attributes. Fields absent from a lead stay unset.
    fn flatten(&self, raw: RawLead) -> Lead {
        let mut lead = Lead {
            id: raw.id,
            name: raw.name,
            created_at: raw.created_at,
            closed_at: raw.closed_at.unwrap_or(0),
            utm_source: None,
            utm_medium: None,
            utm_campaign: None,
            utm_content: None,
        };

        for field in raw.custom_fields_values.unwrap_or_default() {
            let Some(value) = field.first_text() else {
                continue;
            };
            let ids = &self.field_ids;
            if field.field_id == ids.source {
                lead.utm_source = Some(value);
            } else if field.field_id == ids.medium {
                lead.utm_medium = Some(value);
            } else if field.field_id == ids.campaign {
                lead.utm_campaign = Some(value);
            } else if field.field_id == ids.content {
                lead.utm_content = Some(value);
            }
        }

        lead
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawCustomField, RawFieldValue};
    use anyhow::anyhow;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FIELD_IDS: UtmFieldIds = UtmFieldIds {
        source: 1,
        medium: 2,
        campaign: 3,
        content: 4,
    };

    fn raw_lead(id: u64, fields: Vec<(u64, &str)>) -> RawLead {
        RawLead {
            id,
            name: format!("lead {id}"),
            created_at: 1_710_000_000,
            closed_at: Some(1_710_100_000),
            status_id: Some(142),
            custom_fields_values: Some(
                fields
                    .into_iter()
                    .map(|(field_id, value)| RawCustomField {
                        field_id,
                        values: vec![RawFieldValue {
                            value: Some(serde_json::Value::String(value.to_string())),
                        }],
                    })
                    .collect(),
            ),
        }
    }

    /// Pages served in order; a `None` page yields an error.
    struct PagedCrm {
        pages: Mutex<Vec<Option<Vec<RawLead>>>>,
    }

    impl PagedCrm {
        fn new(pages: Vec<Option<Vec<RawLead>>>) -> Self {
            Self {
                pages: Mutex::new(pages),
            }
        }
    }

    #[async_trait]
    impl CrmApi for PagedCrm {
        async fn leads_page(
            &self,
            _pipeline_id: u64,
            _stage_id: u64,
            page: u32,
            _page_size: u32,
        ) -> Result<Vec<RawLead>> {
            let mut pages = self.pages.lock();
            if pages.is_empty() {
                return Ok(Vec::new());
            }
            pages
                .remove(0)
                .ok_or_else(|| anyhow!("page {page} failed"))
        }
    }

    struct CountingDelay {
        pauses: AtomicUsize,
    }

    #[async_trait]
    impl PageDelay for CountingDelay {
        async fn pause(&self) {
            self.pauses.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fetcher(crm: Arc<dyn CrmApi>, delay: Arc<dyn PageDelay>, page_size: u32) -> CrmLeadFetcher {
        CrmLeadFetcher::new(crm, delay, 10_350_882, page_size, FIELD_IDS)
    }

    #[tokio::test]
    async fn short_page_stops_pagination() {
        let full: Vec<RawLead> = (0..3).map(|i| raw_lead(i, vec![])).collect();
        let short = vec![raw_lead(99, vec![])];
        let crm = Arc::new(PagedCrm::new(vec![Some(full), Some(short)]));
        let delay = Arc::new(CountingDelay {
            pauses: AtomicUsize::new(0),
        });

        let leads = fetcher(crm, delay.clone(), 3)
            .fetch_paid_leads(142)
            .await
            .unwrap();

        assert_eq!(leads.len(), 4);
        // One delay between page 1 and page 2, none after the short page.
        assert_eq!(delay.pauses.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_first_page_yields_no_leads() {
        let crm = Arc::new(PagedCrm::new(vec![Some(vec![])]));
        let leads = fetcher(crm, Arc::new(NoDelay), 250)
            .fetch_paid_leads(142)
            .await
            .unwrap();
        assert!(leads.is_empty());
    }

    #[tokio::test]
    async fn failed_page_aborts_whole_fetch() {
        let full: Vec<RawLead> = (0..2).map(|i| raw_lead(i, vec![])).collect();
        let crm = Arc::new(PagedCrm::new(vec![Some(full), None]));

        let result = fetcher(crm, Arc::new(NoDelay), 2).fetch_paid_leads(142).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn utm_fields_flatten_by_field_id() {
        let lead = raw_lead(
            7,
            vec![(1, "kenji_fb"), (3, "march_launch"), (999, "ignored")],
        );
        let crm = Arc::new(PagedCrm::new(vec![Some(vec![lead])]));

        let leads = fetcher(crm, Arc::new(NoDelay), 250)
            .fetch_paid_leads(142)
            .await
            .unwrap();

        assert_eq!(leads[0].utm_source.as_deref(), Some("kenji_fb"));
        assert_eq!(leads[0].utm_campaign.as_deref(), Some("march_launch"));
        assert_eq!(leads[0].utm_medium, None);
        assert_eq!(leads[0].utm_content, None);
    }

    #[tokio::test]
    async fn absent_closed_at_normalizes_to_zero() {
        let mut raw = raw_lead(5, vec![]);
        raw.closed_at = None;
        let crm = Arc::new(PagedCrm::new(vec![Some(vec![raw])]));

        let leads = fetcher(crm, Arc::new(NoDelay), 250)
            .fetch_paid_leads(142)
            .await
            .unwrap();
        assert_eq!(leads[0].closed_at, 0);
    }
}
