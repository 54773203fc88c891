//! Google Images results scraper. Frequently blocked; failures count as zero results.

use std::time::Duration;

use regex::Regex;

use crate::backends::{
    base_url_without_trailing_slash, collect_marked_urls, compile_marker, get_html, BackendKind,
    SearchBackend, IMAGE_EXTENSION_PATTERN,
};

const GOOGLE_BASE_URL: &str = "https://www.google.com";

pub struct GoogleScrapeBackend {
    http_client: ureq::Agent,
    base_url: String,
    markers: Vec<Regex>,
}

impl GoogleScrapeBackend {
    pub fn new(http_client: ureq::Agent) -> Self {
        Self::with_base_url(http_client, GOOGLE_BASE_URL)
    }

    pub fn with_base_url(http_client: ureq::Agent, base_url: &str) -> Self {
        Self {
            http_client,
            base_url: base_url_without_trailing_slash(base_url),
            markers: vec![compile_marker(&format!(
                r#""ou":"([^"]+\.{IMAGE_EXTENSION_PATTERN})""#
            ))],
        }
    }

    fn search_url(&self, phrase: &str) -> String {
        format!(
            "{}/search?q={}&tbm=isch",
            self.base_url,
            urlencoding::encode(phrase)
        )
    }

    fn extract(&self, body: &str, max_results: usize) -> Vec<String> {
        collect_marked_urls(body, &self.markers, max_results, str::to_string)
    }
}

impl SearchBackend for GoogleScrapeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::GoogleScrape
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
