//! Last-resort acquisition from a fixed category → known-good URL table.

use std::sync::Arc;

use log::debug;

use crate::config::FallbackEntry;
use crate::deadline::Deadline;
use crate::fetcher::ImageDownloader;
use crate::protocol::{self, ItemMessage, Message, ProgressBus};
use crate::work_item::WorkItem;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackOutcome {
    Recovered { key: String, url: String },
    NoMatchingKey,
    Exhausted { key: String },
}

impl FallbackOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Recovered { .. })
    }
}

pub struct FallbackResolver {
    table: Vec<FallbackEntry>,
    downloader: Arc<dyn ImageDownloader>,
    bus: ProgressBus,
}

impl FallbackResolver {
    pub fn new(
        table: Vec<FallbackEntry>,
        downloader: Arc<dyn ImageDownloader>,
        bus: ProgressBus,
    ) -> Self {
        Self {
            table,
            downloader,
            bus,
        }
    }

    /// First table entry, in configured order, whose key occurs in the filename.
    pub fn matching_entry(&self, filename: &str) -> Option<&FallbackEntry> {
        let lowered = filename.to_lowercase();
        self.table
            .iter()
            .find(|entry| lowered.contains(&entry.key.trim().to_lowercase()))
    }

    pub fn resolve(&self, item: &WorkItem, deadline: &Deadline) -> FallbackOutcome {
        let Some(entry) = self.matching_entry(&item.filename) else {
            protocol::publish(
                &self.bus,
                Message::Item(ItemMessage::FallbackNoMatch {
                    filename: item.filename.clone(),
                }),
            );
            return FallbackOutcome::NoMatchingKey;
        };
        protocol::publish(
            &self.bus,
            Message::Item(ItemMessage::FallbackStarted {
                filename: item.filename.clone(),
                key: entry.key.clone(),
            }),
        );

        for url in &entry.urls {
            let outcome =
                self.downloader
                    .download(url, &item.filename, &item.destination_folder, deadline);
            if outcome.is_success() {
                protocol::publish(
                    &self.bus,
                    Message::Item(ItemMessage::FallbackFinished {
                        filename: item.filename.clone(),
                        recovered: true,
                    }),
                );
                return FallbackOutcome::Recovered {
                    key: entry.key.clone(),
                    url: url.clone(),
                };
            }
            debug!(
                "Fallback url {} failed for {}: {}",
                url,
                item.filename,
                outcome.detail()
            );
        }

        protocol::publish(
            &self.bus,
            Message::Item(ItemMessage::FallbackFinished {
                filename: item.filename.clone(),
                recovered: false,
            }),
        );
        FallbackOutcome::Exhausted {
            key: entry.key.clone(),
        }
    }
}
