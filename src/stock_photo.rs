//! Keyword stock-photo mode: one featured photo per item, no searching or fallback.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::deadline::Deadline;
use crate::fetcher::ImageDownloader;
use crate::protocol::{self, ItemMessage, Message, ProgressBus, RunMessage};
use crate::summary::{ItemReport, ItemResolution, RunSummary};
use crate::work_item::WorkItem;

pub const FEATURED_PHOTO_BASE_URL: &str = "https://source.unsplash.com/featured/600x600/";

pub struct StockPhotoFetcher {
    base_url: String,
    downloader: Arc<dyn ImageDownloader>,
    per_item_timeout: Duration,
    bus: ProgressBus,
}

impl StockPhotoFetcher {
    pub fn new(
        downloader: Arc<dyn ImageDownloader>,
        per_item_timeout: Duration,
        bus: ProgressBus,
    ) -> Self {
        Self::with_base_url(downloader, per_item_timeout, bus, FEATURED_PHOTO_BASE_URL)
    }

    pub fn with_base_url(
        downloader: Arc<dyn ImageDownloader>,
        per_item_timeout: Duration,
        bus: ProgressBus,
        base_url: &str,
    ) -> Self {
        Self {
            base_url: base_url.to_string(),
            downloader,
            per_item_timeout,
            bus,
        }
    }

    /// Featured-photo URL for the item's keyword phrase, spaces encoded as `+`.
    pub fn photo_url(&self, item: &WorkItem) -> String {
        let phrase = item.search_query().keyword_phrase;
        format!(
            "{}?{}",
            self.base_url,
            urlencoding::encode(&phrase).replace("%20", "+")
        )
    }

    /// Fetches the first `limit` items one after another.
    pub fn run(&self, items: &[WorkItem], limit: usize, output_folder: &Path) -> RunSummary {
        let selected = &items[..limit.min(items.len())];
        protocol::publish(
            &self.bus,
            Message::Run(RunMessage::Started {
                items: selected.len(),
                workers: 1,
                folder: output_folder.display().to_string(),
            }),
        );

        let mut reports = Vec::with_capacity(selected.len());
        for item in selected {
            protocol::publish(
                &self.bus,
                Message::Item(ItemMessage::Started {
                    filename: item.filename.clone(),
                }),
            );
            let url = self.photo_url(item);
            let deadline = Deadline::after(self.per_item_timeout);
            let outcome = self.downloader.download(
                &url,
                &item.filename,
                &item.destination_folder,
                &deadline,
            );
            let resolution = if outcome.is_success() {
                info!("✓ {} {}", item.filename, outcome.detail());
                ItemResolution::Primary {
                    detail: format!("{} from {}", outcome.detail(), url),
                }
            } else {
                warn!("✗ {}: {}", item.filename, outcome.detail());
                ItemResolution::Failed {
                    reason: outcome.detail().to_string(),
                }
            };
            reports.push(ItemReport {
                filename: item.filename.clone(),
                resolution,
            });
        }

        let summary = RunSummary::finalize(reports, output_folder);
        protocol::publish(
            &self.bus,
            Message::Run(RunMessage::Finished {
                succeeded: summary.succeeded,
                failed: summary.failed,
            }),
        );
        summary
    }
}
