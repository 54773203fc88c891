//! Image search backend abstraction and concrete scraping implementations.

pub mod bing;
pub mod duckduckgo;
pub mod google;

use std::collections::HashSet;
use std::io::Read;
use std::time::Duration;

use regex::Regex;

use crate::http_client::{self, HttpFailureKind};

/// Raster extensions recognised in search result markup.
pub const IMAGE_EXTENSION_PATTERN: &str = r"(?:jpg|jpeg|png|gif|webp)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    DuckDuckGo,
    Bing,
    GoogleScrape,
}

impl BackendKind {
    pub fn source_name(self) -> &'static str {
        match self {
            Self::DuckDuckGo => "DuckDuckGo",
            Self::Bing => "Bing",
            Self::GoogleScrape => "GoogleScrape",
        }
    }
}

/// Capability implemented by every image search surface.
pub trait SearchBackend: Send + Sync {
    fn kind(&self) -> BackendKind;
    /// Returns at most `max_results` image URLs for `phrase`, in page order.
    fn query(&self, phrase: &str, max_results: usize, timeout: Duration)
        -> Result<Vec<String>, String>;
}

/// The three scraping backends in their fixed query order.
pub fn default_backends(http_client: &ureq::Agent) -> Vec<Box<dyn SearchBackend>> {
    vec![
        Box::new(duckduckgo::DuckDuckGoBackend::new(http_client.clone())),
        Box::new(bing::BingBackend::new(http_client.clone())),
        Box::new(google::GoogleScrapeBackend::new(http_client.clone())),
    ]
}

pub(crate) fn compile_marker(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid search marker pattern")
}

pub(crate) fn base_url_without_trailing_slash(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Fetches a search results page as text with browser-like headers.
pub(crate) fn get_html(
    http_client: &ureq::Agent,
    url: &str,
    timeout: Duration,
) -> Result<String, String> {
    let response = http_client
        .get(url)
        .set("User-Agent", http_client::session_user_agent())
        .set("Accept", http_client::HTML_ACCEPT)
        .set("Accept-Language", http_client::ACCEPT_LANGUAGE)
        .timeout(timeout)
        .call()
        .map_err(|error| match http_client::classify_ureq_failure(&error) {
            HttpFailureKind::Timeout => format!("timeout: {error}"),
            HttpFailureKind::RateLimited => format!("rate limited: {error}"),
            HttpFailureKind::Hard => format!("request failed: {error}"),
        })?;
    let mut body = String::new();
    response
        .into_reader()
        .read_to_string(&mut body)
        .map_err(|error| {
            if http_client::classify_io_timeout(&error) {
                format!("timeout: failed to read response: {error}")
            } else {
                format!("failed to read response: {error}")
            }
        })?;
    Ok(body)
}

/// Upgrades protocol-relative URLs; anything that is not http(s) afterwards is dropped.
pub(crate) fn absolutize(candidate: &str) -> Option<String> {
    let candidate = candidate.trim();
    let absolute = if candidate.starts_with("//") {
        format!("https:{candidate}")
    } else {
        candidate.to_string()
    };
    absolute.starts_with("http").then_some(absolute)
}

/// Applies each marker in turn over `body`, keeping unique URLs in match order.
pub(crate) fn collect_marked_urls<F>(
    body: &str,
    markers: &[Regex],
    max_results: usize,
    clean: F,
) -> Vec<String>
where
    F: Fn(&str) -> String,
{
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for marker in markers {
        for captures in marker.captures_iter(body) {
            if urls.len() >= max_results {
                return urls;
            }
            let Some(raw) = captures.get(1) else {
                continue;
            };
            let Some(url) = absolutize(&clean(raw.as_str())) else {
                continue;
            };
            if seen.insert(url.clone()) {
                urls.push(url);
            }
        }
    }
    urls
}
