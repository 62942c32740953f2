//! Link extraction and scoring heuristics.
//!
//! Everything here is pure: HTML in, ranked URLs out.

use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

/// A hyperlink with its visible text, resolved against the page URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub text: String,
    pub url: Url,
}

static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

static SEARCH_RESULT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.result__a").expect("valid selector"));

static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(19[89]\d|20\d{2})\b").expect("valid regex"));

static LEGAL_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(inc|corp|corporation|ltd|limited|llc|group|holding|holdings|plc|ag|sas|spa|gmbh|co|company|incorporated|the|and|of|de|el|la|sa|nv|bv)\b",
    )
    .expect("valid regex")
});

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9]+").expect("valid regex"));

/// Hosts that show up in search results but never host a company's own site.
const NON_CORPORATE_HOSTS: &[&str] = &[
    "google.", "facebook.", "youtube.", "linkedin.", "twitter.", "amazon.", "bing.",
    "yahoo.", "instagram.", "wikipedia.", "bloomberg.", "reuters.", "ft.com", "wsj.com",
    "forbes.com", "sec.gov", "gov.uk", "europa.eu", "duckduckgo.com", "pinterest.", "reddit.",
    "tiktok.", "github.com", "gitlab.com", "marketscreener.", "macrotrends.",
];

const IR_TEXT_KEYWORDS: &[&str] = &[
    "investor relations",
    "investors",
    "investor",
    "shareholders",
    "investisseurs",
    "investoren",
];

const IR_HREF_KEYWORDS: &[&str] = &[
    "investor",
    "/ir/",
    "/ir",
    "shareholder",
    "investisseur",
    "investoren",
];

const FINANCIAL_KEYWORDS: &[&str] = &["financials", "financial information", "results", "reports"];

/// Fallback paths probed when the homepage has no recognisable IR link.
pub const COMMON_IR_PATHS: &[&str] = &[
    "investor-relations/",
    "investors/",
    "ir/",
    "investor/",
    "shareholder-information/",
];

const REPORT_KEYWORDS: &[&str] = &[
    "annual report",
    "annual-report",
    "annualreport",
    "10-k",
    "10k",
    "20-f",
    "form 10",
    "integrated report",
    "universal registration document",
    "financial statements",
    "annual results",
    "sec filings",
];

/// All `a[href]` links on a page, skipping anchors and non-navigational schemes.
pub fn extract_links(doc: &Html, base_url: &Url) -> Vec<Link> {
    let mut links = Vec::new();

    for el in doc.select(&LINK_SEL) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }

        if let Ok(mut resolved) = base_url.join(href) {
            resolved.set_fragment(None);
            links.push(Link {
                text: collapse_whitespace(&el.text().collect::<String>()),
                url: resolved,
            });
        }
    }

    links
}

/// Target URLs of a DuckDuckGo HTML results page, unwrapping its redirect links.
pub fn extract_search_results(doc: &Html) -> Vec<Url> {
    doc.select(&SEARCH_RESULT_SEL)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(decode_search_href)
        .collect()
}

fn decode_search_href(href: &str) -> Option<Url> {
    // Result links are often protocol-relative redirects: //duckduckgo.com/l/?uddg=<target>
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    let url = Url::parse(&absolute).ok()?;

    if url
        .host_str()
        .is_some_and(|h| h.ends_with("duckduckgo.com"))
    {
        let target = url
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned())?;
        return Url::parse(&target).ok();
    }

    Some(url)
}

/// Lowercased name tokens with legal suffixes and filler words removed.
pub fn tokenize_company_name(name: &str) -> Vec<String> {
    let lowered = name.to_lowercase().replace(['.', ','], "");
    let cleaned = LEGAL_SUFFIX_RE.replace_all(&lowered, " ");
    TOKEN_RE
        .find_iter(&cleaned)
        .map(|m| m.as_str().to_string())
        .filter(|t| t.len() > 1)
        .collect()
}

/// Whether `url` plausibly belongs to the company itself.
pub fn is_potential_corporate_domain(url: &Url, company_name: &str) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    if NON_CORPORATE_HOSTS.iter().any(|nd| host.contains(nd)) {
        return false;
    }

    let tokens = tokenize_company_name(company_name);
    let Some(domain_name) = host.split('.').next() else {
        return false;
    };

    let significant: Vec<&String> = tokens.iter().filter(|t| t.len() > 2).collect();
    if significant.is_empty() {
        return tokens.iter().any(|t| domain_name.contains(t.as_str()));
    }

    significant.iter().any(|t| domain_name.contains(t.as_str()))
        || significant
            .iter()
            .any(|t| t.len() > 4 && domain_name.len() >= 4 && t.starts_with(&domain_name[..4]))
}

/// How many name tokens appear in the host; used to rank search results.
pub fn name_overlap(url: &Url, company_name: &str) -> usize {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    tokenize_company_name(company_name)
        .iter()
        .filter(|t| t.len() > 2 && host.contains(t.as_str()))
        .count()
}

/// Score a homepage link as an investor-relations entry point. Zero means "not IR".
pub fn ir_link_score(link: &Link, homepage: &Url) -> u32 {
    let text = link.text.to_lowercase();
    let href = link.url.as_str().to_lowercase();

    let is_ir = IR_TEXT_KEYWORDS.iter().any(|k| text.contains(k))
        || IR_HREF_KEYWORDS.iter().any(|k| href.contains(k));
    let is_financial = FINANCIAL_KEYWORDS
        .iter()
        .any(|k| text.contains(k) || href.contains(k));

    if !is_ir && !is_financial {
        return 0;
    }

    let mut score = 1;
    if is_ir {
        score += 3;
    }
    if text.contains("investor relations") {
        score += 2;
    }
    if href.contains("investor") {
        score += 2;
    }
    if same_site(&link.url, homepage) {
        score += 1;
    }
    score
}

/// Score a link on an IR page as a candidate financial report. Zero means "not a report".
pub fn report_link_score(link: &Link) -> u32 {
    let text = link.text.to_lowercase();
    let href = link.url.as_str().to_lowercase();

    let text_hit = REPORT_KEYWORDS.iter().any(|k| text.contains(k));
    let href_hit = REPORT_KEYWORDS.iter().any(|k| href.contains(k));
    let is_pdf = link.url.path().to_lowercase().ends_with(".pdf");

    if !text_hit && !href_hit && !is_pdf {
        return 0;
    }

    let mut score = 0;
    if text_hit {
        score += 3;
    }
    if href_hit {
        score += 2;
    }
    if is_pdf {
        score += 2;
    }
    if let Some(year) = extract_year(&format!("{text} {href}")) {
        // Newer documents first; only the last few years matter.
        score += u32::try_from(year.saturating_sub(2015).clamp(0, 10)).unwrap_or(0);
    }
    score
}

/// The latest plausible year mentioned in `text`.
pub fn extract_year(text: &str) -> Option<i32> {
    YEAR_RE
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<i32>().ok())
        .max()
}

fn same_site(a: &Url, b: &Url) -> bool {
    let strip = |u: &Url| {
        u.host_str()
            .map(|h| h.trim_start_matches("www.").to_lowercase())
    };
    strip(a).zip(strip(b)).is_some_and(|(x, y)| x == y || x.ends_with(&format!(".{y}")))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize a URL for deduplication (strip fragment and query, drop trailing slash).
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    normalized.set_query(None);
    let mut s = normalized.to_string();
    if s.ends_with('/') && s.matches('/').count() > 3 {
        s.pop();
    }
    s
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
pub fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    if let Some(host) = url.host_str() {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return is_private_ip(&ip);
        }
        if host == "localhost" || host.ends_with(".local") || host.ends_with(".internal") {
            return true;
        }
    }

    false
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
