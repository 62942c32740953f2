//! HTTP reference scraper over `reqwest` + `scraper`.
//!
//! Steps, each fail-soft:
//! 1. homepage: `https://<domain_hint>` or the best DuckDuckGo HTML result
//! 2. IR page: highest-scoring homepage link, else the first common IR path
//!    that answers
//! 3. candidate links: report-looking links on the IR page, best first

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use scraper::Html;
use tracing::{debug, info, instrument, warn};
use url::Url;

use finsource_shared::{
    CompanyTask, FinSourceError, Reachability, ReferenceContext, Result, ScraperConfig,
};

use crate::ReferenceScraper;
use crate::links::{
    COMMON_IR_PATHS, Link, extract_links, extract_search_results, ir_link_score,
    is_potential_corporate_domain, is_ssrf_target, name_overlap, normalize_url,
    report_link_score,
};

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// Maximum response size we parse (5 MB).
const MAX_RESPONSE_SIZE: u64 = 5 * 1024 * 1024;

/// DuckDuckGo's no-JavaScript results endpoint.
const DEFAULT_SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

/// Scrapes homepage, IR page, and report links for one company.
pub struct HttpReferenceScraper {
    client: Client,
    search_endpoint: String,
    max_candidate_links: usize,
    /// Allow localhost/private IPs (for tests with mock servers).
    allow_localhost: bool,
}

impl HttpReferenceScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| FinSourceError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            search_endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            max_candidate_links: config.max_candidate_links,
            allow_localhost: false,
        })
    }

    /// Use a different search endpoint (must accept `?q=`).
    pub fn with_search_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.search_endpoint = endpoint.into();
        self
    }

    /// Allow scraping localhost/private IPs (for tests).
    #[cfg(test)]
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    fn blocked(&self, url: &Url) -> bool {
        !self.allow_localhost && is_ssrf_target(url)
    }

    /// GET a page body. Errors are network or size failures.
    async fn fetch_page(&self, url: &Url) -> Result<(Url, String)> {
        if self.blocked(url) {
            return Err(FinSourceError::validation(format!("{url}: blocked host")));
        }

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| FinSourceError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FinSourceError::Network(format!("{url}: HTTP {status}")));
        }

        if let Some(len) = response.content_length() {
            if len > MAX_RESPONSE_SIZE {
                return Err(FinSourceError::validation(format!(
                    "{url}: response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"
                )));
            }
        }

        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| FinSourceError::Network(format!("{url}: failed to read body: {e}")))?;

        Ok((final_url, body))
    }

    /// GET a page and return its links, resolved against the final URL.
    async fn fetch_links(&self, url: &Url) -> Result<(Url, Vec<Link>)> {
        let (final_url, body) = self.fetch_page(url).await?;
        let links = parse_links(&body, &final_url);
        Ok((final_url, links))
    }

    /// Resolve the company homepage. `Err` means the lookup itself failed.
    async fn find_homepage(&self, company: &CompanyTask) -> Result<Option<Url>> {
        if let Some(hint) = &company.domain_hint {
            let candidate = if hint.starts_with("http://") || hint.starts_with("https://") {
                hint.clone()
            } else {
                format!("https://{}/", hint.trim_start_matches('/'))
            };
            return Url::parse(&candidate)
                .map(Some)
                .map_err(|e| FinSourceError::validation(format!("bad domain hint {hint}: {e}")));
        }

        let mut search = Url::parse(&self.search_endpoint)
            .map_err(|e| FinSourceError::config(format!("bad search endpoint: {e}")))?;
        search.query_pairs_mut().append_pair(
            "q",
            &format!("\"{}\" official website investor relations", company.name),
        );

        let (_, body) = self.fetch_page(&search).await?;
        let mut candidates: Vec<Url> = parse_search_results(&body)
            .into_iter()
            .filter(|u| is_potential_corporate_domain(u, &company.name))
            .collect();

        // Stable sort keeps search rank among equally good hosts.
        candidates.sort_by_key(|u| std::cmp::Reverse(name_overlap(u, &company.name)));

        Ok(candidates.into_iter().next().map(|mut u| {
            u.set_path("/");
            u.set_query(None);
            u.set_fragment(None);
            u
        }))
    }

    async fn find_ir_page(&self, homepage: &Url, links: &[Link]) -> Option<Url> {
        let best = links
            .iter()
            .filter(|l| !self.blocked(&l.url))
            .map(|l| (ir_link_score(l, homepage), l))
            .filter(|(score, _)| *score > 0)
            .max_by_key(|(score, _)| *score);

        if let Some((score, link)) = best {
            debug!(url = %link.url, score, "IR link found on homepage");
            return Some(link.url.clone());
        }

        for path in COMMON_IR_PATHS {
            let Ok(candidate) = homepage.join(path) else {
                continue;
            };
            if matches!(self.probe(&candidate).await, Reachability::Reachable { .. }) {
                debug!(url = %candidate, "IR page found at common path");
                return Some(candidate);
            }
        }
        None
    }

    fn candidate_links(&self, links: Vec<Link>) -> Vec<String> {
        let mut scored: Vec<(u32, String)> = links
            .into_iter()
            .filter(|l| !self.blocked(&l.url))
            .map(|l| (report_link_score(&l), normalize_url(&l.url)))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let mut seen = HashSet::new();
        scored
            .into_iter()
            .map(|(_, url)| url)
            .filter(|url| seen.insert(url.clone()))
            .take(self.max_candidate_links)
            .collect()
    }

    async fn probe(&self, url: &Url) -> Reachability {
        if self.blocked(url) {
            return Reachability::Unreachable {
                reason: "blocked host".into(),
            };
        }

        let head = self.client.head(url.as_str()).send().await;
        let response = match head {
            // Some servers reject HEAD outright; retry those with GET.
            Ok(r) if matches!(
                r.status(),
                StatusCode::METHOD_NOT_ALLOWED | StatusCode::FORBIDDEN | StatusCode::NOT_IMPLEMENTED
            ) =>
            {
                self.client.get(url.as_str()).send().await
            }
            other => other,
        };

        match response {
            Ok(r) if r.status().as_u16() < 400 => Reachability::Reachable {
                status: r.status().as_u16(),
            },
            Ok(r) => Reachability::Unreachable {
                reason: format!("HTTP {}", r.status()),
            },
            Err(e) if e.is_timeout() => Reachability::Unreachable {
                reason: "timed out".into(),
            },
            Err(e) => Reachability::Unreachable {
                reason: e.to_string(),
            },
        }
    }
}

// `Html` is not `Send`; parse in plain functions so it never lives across an await.

fn parse_links(body: &str, base: &Url) -> Vec<Link> {
    let doc = Html::parse_document(body);
    extract_links(&doc, base)
}

fn parse_search_results(body: &str) -> Vec<Url> {
    let doc = Html::parse_document(body);
    extract_search_results(&doc)
}

#[async_trait]
impl ReferenceScraper for HttpReferenceScraper {
    #[instrument(skip_all, fields(company = %company.name))]
    async fn scrape(&self, company: &CompanyTask) -> ReferenceContext {
        let homepage = match self.find_homepage(company).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                info!("no plausible homepage found");
                return ReferenceContext::default();
            }
            Err(e) => {
                warn!(error = %e, "homepage lookup failed");
                return ReferenceContext::unavailable();
            }
        };

        let (homepage, home_links) = match self.fetch_links(&homepage).await {
            Ok(page) => page,
            Err(e) => {
                warn!(url = %homepage, error = %e, "homepage fetch failed");
                return ReferenceContext::unavailable();
            }
        };

        let mut context = ReferenceContext {
            homepage: Some(homepage.to_string()),
            ..ReferenceContext::default()
        };

        let Some(ir_page) = self.find_ir_page(&homepage, &home_links).await else {
            info!(homepage = %homepage, "no IR page found");
            return context;
        };
        context.ir_page = Some(ir_page.to_string());

        match self.fetch_links(&ir_page).await {
            Ok((_, ir_links)) => {
                context.candidate_links = self.candidate_links(ir_links);
            }
            Err(e) => debug!(url = %ir_page, error = %e, "IR page fetch failed"),
        }

        info!(
            homepage = ?context.homepage,
            ir_page = ?context.ir_page,
            candidates = context.candidate_links.len(),
            "reference context scraped"
        );
        context
    }

    #[instrument(skip(self))]
    async fn check_reachable(&self, url: &str) -> Reachability {
        match Url::parse(url) {
            Ok(parsed) => self.probe(&parsed).await,
            Err(e) => Reachability::Unreachable {
                reason: format!("malformed URL: {e}"),
            },
        }
    }
}
