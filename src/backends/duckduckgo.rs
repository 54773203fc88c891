//! DuckDuckGo HTML results scraper.

use std::time::Duration;

use regex::Regex;

use crate::backends::{
    base_url_without_trailing_slash, collect_marked_urls, compile_marker, get_html, BackendKind,
    SearchBackend, IMAGE_EXTENSION_PATTERN,
};

const DUCKDUCKGO_BASE_URL: &str = "https://html.duckduckgo.com";

pub struct DuckDuckGoBackend {
    http_client: ureq::Agent,
    base_url: String,
    markers: Vec<Regex>,
}

impl DuckDuckGoBackend {
    pub fn new(http_client: ureq::Agent) -> Self {
        Self::with_base_url(http_client, DUCKDUCKGO_BASE_URL)
    }

    pub fn with_base_url(http_client: ureq::Agent, base_url: &str) -> Self {
        let markers = ["img_src", "src", "data-src"]
            .iter()
            .map(|attribute| {
                compile_marker(&format!(
                    r#"(?i)\b{attribute}="([^"]+\.{IMAGE_EXTENSION_PATTERN})""#
                ))
            })
            .collect();
        Self {
            http_client,
            base_url: base_url_without_trailing_slash(base_url),
            markers,
        }
    }

    fn search_url(&self, phrase: &str) -> String {
        format!(
            "{}/html/?q={}+images",
            self.base_url,
            urlencoding::encode(phrase)
        )
    }

    fn extract(&self, body: &str, max_results: usize) -> Vec<String> {
        collect_marked_urls(body, &self.markers, max_results, str::to_string)
    }
}

impl SearchBackend for DuckDuckGoBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::DuckDuckGo
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
