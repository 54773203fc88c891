//! Per-item acquisition: harvest candidate URLs, then try them in order.
//!
//! ```text
//! Searching ──(no URLs)──────────────────────────────► Failed(NoCandidates)
//! Searching ──► Attempting[1] ──(success)────────────► Succeeded
//!               Attempting[i] ──(failure, budget left)► Attempting[i+1]
//!               Attempting[n] ──(failure)─────────────► Failed(Exhausted)
//! any state ──(deadline spent)───────────────────────► Failed(TimedOut)
//! ```

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::deadline::Deadline;
use crate::fetcher::{DownloadOutcome, ImageDownloader};
use crate::harvester::Harvester;
use crate::protocol::{self, ItemMessage, Message, ProgressBus};
use crate::work_item::WorkItem;

/// Result of the primary acquisition path for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded {
        url: String,
        outcome: DownloadOutcome,
    },
    NoCandidates,
    Exhausted {
        attempts: usize,
    },
    TimedOut,
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn failure_reason(&self) -> Option<&'static str> {
        match self {
            Self::Succeeded { .. } => None,
            Self::NoCandidates => Some("no candidate urls"),
            Self::Exhausted { .. } => Some("all candidate downloads failed"),
            Self::TimedOut => Some("timed out"),
        }
    }
}

pub struct ItemPipeline {
    harvester: Arc<Harvester>,
    downloader: Arc<dyn ImageDownloader>,
    settings: PipelineConfig,
    max_results: usize,
    bus: ProgressBus,
}

impl ItemPipeline {
    pub fn new(
        harvester: Arc<Harvester>,
        downloader: Arc<dyn ImageDownloader>,
        settings: PipelineConfig,
        max_results: usize,
        bus: ProgressBus,
    ) -> Self {
        Self {
            harvester,
            downloader,
            settings,
            max_results,
            bus,
        }
    }

    fn emit(&self, message: ItemMessage) {
        protocol::publish(&self.bus, Message::Item(message));
    }

    fn timed_out(&self, item: &WorkItem) -> ItemOutcome {
        self.emit(ItemMessage::TimedOut {
            filename: item.filename.clone(),
        });
        ItemOutcome::TimedOut
    }

    pub fn process(&self, item: &WorkItem, deadline: &Deadline) -> ItemOutcome {
        self.emit(ItemMessage::Started {
            filename: item.filename.clone(),
        });

        let candidates = self.harvester.harvest(
            &item.filename,
            &item.search_query(),
            self.max_results,
            deadline,
        );
        if candidates.is_empty() {
            if deadline.is_expired() {
                return self.timed_out(item);
            }
            self.emit(ItemMessage::NoCandidates {
                filename: item.filename.clone(),
            });
            return ItemOutcome::NoCandidates;
        }
        self.emit(ItemMessage::CandidatesFound {
            filename: item.filename.clone(),
            count: candidates.len(),
        });

        let attempt_budget = candidates.len().min(self.settings.max_attempts);
        for (index, candidate) in candidates.iter().take(attempt_budget).enumerate() {
            let attempt = index + 1;
            if deadline.is_expired() {
                return self.timed_out(item);
            }
            self.emit(ItemMessage::AttemptStarted {
                filename: item.filename.clone(),
                attempt,
                url: candidate.url.clone(),
            });
            let outcome = self.downloader.download(
                &candidate.url,
                &item.filename,
                &item.destination_folder,
                deadline,
            );
            self.emit(ItemMessage::AttemptFinished {
                filename: item.filename.clone(),
                attempt,
                outcome: outcome.clone(),
            });
            if outcome.is_success() {
                return ItemOutcome::Succeeded {
                    url: candidate.url.clone(),
                    outcome,
                };
            }
            if attempt < attempt_budget && !deadline.sleep(self.settings.retry_delay()) {
                return self.timed_out(item);
            }
        }

        self.emit(ItemMessage::Exhausted {
            filename: item.filename.clone(),
        });
        ItemOutcome::Exhausted {
            attempts: attempt_budget,
        }
    }
}
