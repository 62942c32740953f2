//! Reference scraping for finsource.
//!
//! Before the first model call, each company gets a best-effort
//! [`ReferenceContext`]: its homepage, investor-relations page, and a few
//! links that look like financial reports. The same collaborator probes
//! candidate URLs so the judge knows whether they answer.
//!
//! Scraping never fails the caller. Problems degrade to an empty (or
//! `unavailable`) context and are logged.

mod http;
pub mod links;

use async_trait::async_trait;

use finsource_shared::{CompanyTask, Reachability, ReferenceContext};

pub use http::HttpReferenceScraper;

/// Best-effort grounding lookups. Shared by all refinement loops.
#[async_trait]
pub trait ReferenceScraper: Send + Sync {
    /// Scrape grounding data for `company`. Never fails; see [`ReferenceContext::unavailable`].
    async fn scrape(&self, company: &CompanyTask) -> ReferenceContext;

    /// Probe whether `url` answers an HTTP request.
    async fn check_reachable(&self, url: &str) -> Reachability;
}

/// Scraper used when scraping is turned off: no context, nothing probed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScraper;

#[async_trait]
impl ReferenceScraper for NoopScraper {
    async fn scrape(&self, _company: &CompanyTask) -> ReferenceContext {
        ReferenceContext::default()
    }

    async fn check_reachable(&self, _url: &str) -> Reachability {
        Reachability::Unknown
    }
}
