//! Bing Images results scraper.

use std::time::Duration;

use regex::Regex;

use crate::backends::{
    base_url_without_trailing_slash, collect_marked_urls, compile_marker, get_html, BackendKind,
    SearchBackend, IMAGE_EXTENSION_PATTERN,
};

const BING_BASE_URL: &str = "https://www.bing.com";

pub struct BingBackend {
    http_client: ureq::Agent,
    base_url: String,
    markers: Vec<Regex>,
}

impl BingBackend {
    pub fn new(http_client: ureq::Agent) -> Self {
        Self::with_base_url(http_client, BING_BASE_URL)
    }

    pub fn with_base_url(http_client: ureq::Agent, base_url: &str) -> Self {
        let markers = vec![
            compile_marker(&format!(
                r#""murl":"([^"]+\.{IMAGE_EXTENSION_PATTERN})""#
            )),
            compile_marker(&format!(
                r#"src="([^"]+\.bing\.net[^"]+\.{IMAGE_EXTENSION_PATTERN})""#
            )),
        ];
        Self {
            http_client,
            base_url: base_url_without_trailing_slash(base_url),
            markers,
        }
    }

    fn search_url(&self, phrase: &str) -> String {
        format!(
            "{}/images/search?q={}&first=1",
            self.base_url,
            urlencoding::encode(phrase)
        )
    }

    /// Result metadata is embedded as entity-encoded JSON with escaped slashes.
    fn extract(&self, body: &str, max_results: usize) -> Vec<String> {
        let decoded = body.replace("&quot;", "\"").replace("&amp;", "&");
        collect_marked_urls(&decoded, &self.markers, max_results, |raw| {
            raw.replace('\\', "")
        })
    }
}

impl SearchBackend for BingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Bing
    }

    fn query(
        &self,
        phrase: &str,
        max_results: usize,
        timeout: Duration,
    ) -> Result<Vec<String>, String> {
        let body = get_html(&self.http_client, &self.search_url(phrase), timeout)?;
        Ok(self.extract(&body, max_results))
    }
}
