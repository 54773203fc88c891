//! Candidate image URL discovery across the configured search backends.

use std::collections::HashSet;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::state::NotKeyed;
use governor::{Quota, RateLimiter};
use log::debug;

use crate::backends::{BackendKind, SearchBackend};
use crate::config::HarvestConfig;
use crate::deadline::Deadline;
use crate::protocol::{self, HarvestMessage, Message, ProgressBus};
use crate::work_item::SearchQuery;

const LIMITER_POLL_INTERVAL: Duration = Duration::from_millis(25);

type BackendLimiter =
    RateLimiter<NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

/// An image URL together with the backend that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateUrl {
    pub url: String,
    pub source: BackendKind,
}

/// Queries backends in fixed order and merges their answers. Shared by all workers.
pub struct Harvester {
    backends: Vec<Box<dyn SearchBackend>>,
    limiters: Vec<Option<BackendLimiter>>,
    settings: HarvestConfig,
    bus: ProgressBus,
}

impl Harvester {
    pub fn new(
        backends: Vec<Box<dyn SearchBackend>>,
        settings: HarvestConfig,
        bus: ProgressBus,
    ) -> Self {
        let limiters = backends
            .iter()
            .map(|_| {
                Quota::with_period(Duration::from_millis(settings.backend_min_interval_ms))
                    .map(|quota| RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN)))
            })
            .collect();
        Self {
            backends,
            limiters,
            settings,
            bus,
        }
    }

    /// Polls the backend's limiter until a slot frees up or the item budget runs out.
    fn wait_for_backend_slot(&self, index: usize, deadline: &Deadline) -> bool {
        let Some(limiter) = self.limiters.get(index).and_then(Option::as_ref) else {
            return true;
        };
        loop {
            if limiter.check().is_ok() {
                return true;
            }
            if !deadline.sleep(LIMITER_POLL_INTERVAL) {
                return false;
            }
        }
    }

    /// Collects at most `max_results` unique candidate URLs, in backend answer order.
    /// Backend failures count as zero results and are never surfaced.
    pub fn harvest(
        &self,
        filename: &str,
        query: &SearchQuery,
        max_results: usize,
        deadline: &Deadline,
    ) -> Vec<CandidateUrl> {
        let variants = query.variants(&self.settings.query_suffixes, self.settings.max_query_variants);
        let mut seen = HashSet::new();
        let mut candidates: Vec<CandidateUrl> = Vec::new();
        let mut called_any_backend = false;

        'variants: for variant in variants {
            protocol::publish(
                &self.bus,
                Message::Harvest(HarvestMessage::VariantStarted {
                    filename: filename.to_string(),
                    query: variant.clone(),
                }),
            );

            for (index, backend) in self.backends.iter().enumerate() {
                if candidates.len() >= max_results {
                    break 'variants;
                }
                if called_any_backend && !deadline.sleep(self.settings.backend_delay()) {
                    break 'variants;
                }
                if !self.wait_for_backend_slot(index, deadline) {
                    protocol::publish(
                        &self.bus,
                        Message::Harvest(HarvestMessage::BackendSkipped {
                            filename: filename.to_string(),
                            backend: backend.kind(),
                        }),
                    );
                    break 'variants;
                }
                let Some(timeout) = deadline.cap(self.settings.request_timeout()) else {
                    break 'variants;
                };

                called_any_backend = true;
                match backend.query(&variant, self.settings.per_backend_results, timeout) {
                    Ok(urls) => {
                        protocol::publish(
                            &self.bus,
                            Message::Harvest(HarvestMessage::BackendAnswered {
                                filename: filename.to_string(),
                                backend: backend.kind(),
                                count: urls.len(),
                            }),
                        );
                        for url in urls {
                            if seen.insert(url.clone()) {
                                candidates.push(CandidateUrl {
                                    url,
                                    source: backend.kind(),
                                });
                            }
                        }
                    }
                    Err(reason) => {
                        debug!(
                            "{} query failed for '{}': {}",
                            backend.kind().source_name(),
                            variant,
                            reason
                        );
                        protocol::publish(
                            &self.bus,
                            Message::Harvest(HarvestMessage::BackendFailed {
                                filename: filename.to_string(),
                                backend: backend.kind(),
                                reason,
                            }),
                        );
                    }
                }
            }
        }

        candidates.truncate(max_results);
        candidates
    }
}
