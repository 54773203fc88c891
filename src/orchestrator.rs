//! Bounded worker pool driving the per-item pipeline over a batch.
//!
//! A dispatcher thread queues items with a randomized spacing, workers pull
//! from the shared queue, and the calling thread collects results, enforces
//! per-item deadlines and runs the fallback for every failed item.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::deadline::Deadline;
use crate::fallback::{FallbackOutcome, FallbackResolver};
use crate::pipeline::{ItemOutcome, ItemPipeline};
use crate::protocol::{self, ItemMessage, Message, ProgressBus, RunMessage};
use crate::summary::{ItemReport, ItemResolution, RunSummary};
use crate::work_item::WorkItem;

/// Extra time a worker gets to report its own timeout before the item is reclaimed.
const REPORT_GRACE: Duration = Duration::from_millis(500);
const IDLE_POLL: Duration = Duration::from_secs(1);

/// Runtime knobs for the pool, resolved from [`OrchestratorConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_workers: usize,
    pub per_item_timeout: Duration,
    pub dispatch_delay_min: Duration,
    pub dispatch_delay_max: Duration,
}

impl From<&OrchestratorConfig> for PoolSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_workers: config.max_workers,
            per_item_timeout: config.per_item_timeout(),
            dispatch_delay_min: Duration::from_millis(config.dispatch_delay_min_ms),
            dispatch_delay_max: Duration::from_millis(config.dispatch_delay_max_ms),
        }
    }
}

struct Job {
    index: usize,
    item: WorkItem,
}

enum WorkerReport {
    Started {
        index: usize,
        deadline: Deadline,
    },
    Finished {
        index: usize,
        outcome: ItemOutcome,
    },
    Panicked {
        index: usize,
        message: String,
    },
}

/// Why the primary path did not satisfy an item.
enum PrimaryFailure {
    Outcome(ItemOutcome),
    Panicked(String),
    Reclaimed,
    PoolStopped,
}

impl PrimaryFailure {
    fn reason(&self) -> String {
        match self {
            Self::Outcome(outcome) => outcome.failure_reason().unwrap_or("failed").to_string(),
            Self::Panicked(message) => format!("worker panicked: {message}"),
            Self::Reclaimed => "timed out".to_string(),
            Self::PoolStopped => "worker pool stopped".to_string(),
        }
    }
}

pub fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

fn reclaim_at(deadline: &Deadline) -> Instant {
    let expires_at = deadline.expires_at();
    expires_at.checked_add(REPORT_GRACE).unwrap_or(expires_at)
}

fn random_dispatch_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let millis = rand::random_range(min.as_millis() as u64..=max.as_millis() as u64);
    Duration::from_millis(millis)
}

pub struct BatchOrchestrator {
    pipeline: Arc<ItemPipeline>,
    fallback: FallbackResolver,
    settings: PoolSettings,
    bus: ProgressBus,
}

impl BatchOrchestrator {
    pub fn new(
        pipeline: Arc<ItemPipeline>,
        fallback: FallbackResolver,
        settings: PoolSettings,
        bus: ProgressBus,
    ) -> Self {
        Self {
            pipeline,
            fallback,
            settings,
            bus,
        }
    }

    /// Processes every item exactly once and reports the aggregate result.
    pub fn run(&self, items: Vec<WorkItem>, output_folder: &Path) -> RunSummary {
        let total = items.len();
        let worker_count = self.settings.max_workers.clamp(1, total.max(1));
        info!(
            "Processing {} items with {} workers into {}",
            total,
            worker_count,
            output_folder.display()
        );
        protocol::publish(
            &self.bus,
            Message::Run(RunMessage::Started {
                items: total,
                workers: worker_count,
                folder: output_folder.display().to_string(),
            }),
        );

        let reports = if total == 0 {
            Vec::new()
        } else {
            self.run_pool(items, worker_count)
        };

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

    fn run_pool(&self, items: Vec<WorkItem>, worker_count: usize) -> Vec<ItemReport> {
        let (job_sender, job_receiver) = mpsc::channel::<Job>();
        let job_receiver = Arc::new(Mutex::new(job_receiver));
        let (report_sender, report_receiver) = mpsc::channel::<WorkerReport>();

        let mut spawned = 0;
        for worker_id in 0..worker_count {
            let jobs = Arc::clone(&job_receiver);
            let reports = report_sender.clone();
            let pipeline = Arc::clone(&self.pipeline);
            let timeout = self.settings.per_item_timeout;
            let spawn_result = thread::Builder::new()
                .name(format!("imagescout-worker-{worker_id}"))
                .spawn(move || worker_loop(jobs, reports, pipeline, timeout));
            match spawn_result {
                Ok(_) => spawned += 1,
                Err(err) => warn!("Failed to spawn worker {}: {}", worker_id, err),
            }
        }
        drop(report_sender);

        let work: Vec<WorkItem> = items.clone();
        if spawned > 0 {
            let min = self.settings.dispatch_delay_min;
            let max = self.settings.dispatch_delay_max;
            let dispatch_result = thread::Builder::new()
                .name("imagescout-dispatcher".to_string())
                .spawn(move || {
                    for (index, item) in work.into_iter().enumerate() {
                        thread::sleep(random_dispatch_delay(min, max));
                        debug!("Dispatching {}", item.filename);
                        if job_sender.send(Job { index, item }).is_err() {
                            return;
                        }
                    }
                });
            if let Err(err) = dispatch_result {
                error!("Failed to spawn dispatcher: {}", err);
            }
        }

        self.collect(&items, report_receiver)
    }

    /// Waits for every item to be settled, reclaiming items whose deadline passed.
    fn collect(&self, items: &[WorkItem], reports: Receiver<WorkerReport>) -> Vec<ItemReport> {
        let mut settled = vec![false; items.len()];
        let mut remaining = items.len();
        let mut in_flight: HashMap<usize, Deadline> = HashMap::new();
        let mut results = Vec::with_capacity(items.len());

        while remaining > 0 {
            let wait = in_flight
                .values()
                .map(|deadline| reclaim_at(deadline).saturating_duration_since(Instant::now()))
                .min()
                .unwrap_or(IDLE_POLL);

            match reports.recv_timeout(wait) {
                Ok(WorkerReport::Started { index, deadline }) => {
                    if !settled[index] {
                        in_flight.insert(index, deadline);
                    }
                }
                Ok(WorkerReport::Finished { index, outcome }) => {
                    if settled[index] {
                        debug!("Ignoring late result for {}", items[index].filename);
                        continue;
                    }
                    in_flight.remove(&index);
                    settled[index] = true;
                    remaining -= 1;
                    let report = if outcome.is_success() {
                        self.primary_success(&items[index], &outcome)
                    } else {
                        self.settle_failure(&items[index], PrimaryFailure::Outcome(outcome))
                    };
                    results.push(report);
                }
                Ok(WorkerReport::Panicked { index, message }) => {
                    if settled[index] {
                        continue;
                    }
                    in_flight.remove(&index);
                    settled[index] = true;
                    remaining -= 1;
                    error!("Worker panicked on {}: {}", items[index].filename, message);
                    protocol::publish(
                        &self.bus,
                        Message::Item(ItemMessage::WorkerPanicked {
                            filename: items[index].filename.clone(),
                            message: message.clone(),
                        }),
                    );
                    results.push(
                        self.settle_failure(&items[index], PrimaryFailure::Panicked(message)),
                    );
                }
                // Only once nothing is queued, so a finished item is never reclaimed.
                Err(RecvTimeoutError::Timeout) => {
                    let now = Instant::now();
                    let expired: Vec<usize> = in_flight
                        .iter()
                        .filter(|(_, deadline)| reclaim_at(deadline) <= now)
                        .map(|(index, _)| *index)
                        .collect();
                    for index in expired {
                        if let Some(deadline) = in_flight.remove(&index) {
                            deadline.cancel();
                        }
                        settled[index] = true;
                        remaining -= 1;
                        warn!(
                            "{} exceeded its {:?} budget",
                            items[index].filename, self.settings.per_item_timeout
                        );
                        protocol::publish(
                            &self.bus,
                            Message::Item(ItemMessage::TimedOut {
                                filename: items[index].filename.clone(),
                            }),
                        );
                        results.push(self.settle_failure(&items[index], PrimaryFailure::Reclaimed));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("All workers exited with {} items unsettled", remaining);
                    for (index, item) in items.iter().enumerate() {
                        if !settled[index] {
                            settled[index] = true;
                            results.push(self.settle_failure(item, PrimaryFailure::PoolStopped));
                        }
                    }
                    break;
                }
            }
        }

        results
    }

    fn primary_success(&self, item: &WorkItem, outcome: &ItemOutcome) -> ItemReport {
        let detail = match outcome {
            ItemOutcome::Succeeded { url, outcome } => format!("{} from {}", outcome.detail(), url),
            _ => String::new(),
        };
        info!("✓ {}: {}", item.filename, detail);
        ItemReport {
            filename: item.filename.clone(),
            resolution: ItemResolution::Primary { detail },
        }
    }

    /// Runs the fallback for a failed item on the calling thread.
    fn settle_failure(&self, item: &WorkItem, failure: PrimaryFailure) -> ItemReport {
        let primary_reason = failure.reason();
        debug!(
            "Primary acquisition failed for {}: {}; trying fallback",
            item.filename, primary_reason
        );
        let deadline = Deadline::after(self.settings.per_item_timeout);
        let resolution = match self.fallback.resolve(item, &deadline) {
            FallbackOutcome::Recovered { key, url } => {
                info!("✓ {}: fallback '{}' from {}", item.filename, key, url);
                ItemResolution::Fallback { key }
            }
            FallbackOutcome::NoMatchingKey => {
                warn!("✗ {}: {}", item.filename, primary_reason);
                ItemResolution::Failed {
                    reason: primary_reason,
                }
            }
            FallbackOutcome::Exhausted { key } => {
                warn!(
                    "✗ {}: {}; fallback '{}' exhausted",
                    item.filename, primary_reason, key
                );
                ItemResolution::Failed {
                    reason: format!("{primary_reason}; fallback '{key}' exhausted"),
                }
            }
        };
        ItemReport {
            filename: item.filename.clone(),
            resolution,
        }
    }
}

fn worker_loop(
    jobs: Arc<Mutex<Receiver<Job>>>,
    reports: Sender<WorkerReport>,
    pipeline: Arc<ItemPipeline>,
    timeout: Duration,
) {
    loop {
        let next = match jobs.lock() {
            Ok(receiver) => receiver.recv(),
            Err(_) => return,
        };
        let Ok(Job { index, item }) = next else {
            return;
        };

        let deadline = Deadline::after(timeout);
        if reports
            .send(WorkerReport::Started {
                index,
                deadline: deadline.clone(),
            })
            .is_err()
        {
            return;
        }

        let run_result =
            panic::catch_unwind(AssertUnwindSafe(|| pipeline.process(&item, &deadline)));
        let report = match run_result {
            Ok(outcome) => WorkerReport::Finished { index, outcome },
            Err(payload) => WorkerReport::Panicked {
                index,
                message: panic_payload_to_string(payload.as_ref()),
            },
        };
        if reports.send(report).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::{reclaim_at, BatchOrchestrator, PoolSettings};
    use crate::backends::{BackendKind, SearchBackend};
    use crate::config::{Config, FallbackEntry, HarvestConfig, OrchestratorConfig, PipelineConfig};
    use crate::deadline::Deadline;
    use crate::fallback::FallbackResolver;
    use crate::harvester::Harvester;
    use crate::pipeline::ItemPipeline;
    use crate::summary::ItemResolution;
    use crate::test_support::{ScriptedDownloader, StaticBackend};
    use crate::work_item::work_items_for;

    const TSHIRT_PRIMARY: &str = "https://images.unsplash.com/photo-1521572163474-6864f9cf17ab";

    fn settings(per_item_timeout: Duration) -> PoolSettings {
        PoolSettings {
            max_workers: 3,
            per_item_timeout,
            dispatch_delay_min: Duration::ZERO,
            dispatch_delay_max: Duration::ZERO,
        }
    }

    fn orchestrator(
        backends: Vec<Box<dyn SearchBackend>>,
        downloader: Arc<ScriptedDownloader>,
        fallback_table: Vec<FallbackEntry>,
        pool: PoolSettings,
    ) -> BatchOrchestrator {
        let (bus, _) = tokio::sync::broadcast::channel(1024);
        let harvest_settings = HarvestConfig {
            backend_delay_ms: 0,
            backend_min_interval_ms: 0,
            ..HarvestConfig::default()
        };
        let harvester = Arc::new(Harvester::new(backends, harvest_settings, bus.clone()));
        let pipeline_settings = PipelineConfig {
            retry_delay_ms: 0,
            ..PipelineConfig::default()
        };
        let pipeline = Arc::new(ItemPipeline::new(
            harvester,
            downloader.clone(),
            pipeline_settings,
            5,
            bus.clone(),
        ));
        let fallback = FallbackResolver::new(fallback_table, downloader, bus.clone());
        BatchOrchestrator::new(pipeline, fallback, pool, bus)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_failed_search_recovers_through_category_fallback() {
        let dir = tempfile::tempdir().expect("temp dir");
        let downloader = Arc::new(ScriptedDownloader::new().succeed(TSHIRT_PRIMARY));
        let orchestrator = orchestrator(
            vec![StaticBackend::boxed(BackendKind::DuckDuckGo, &[])],
            downloader.clone(),
            Config::default().fallback,
            settings(Duration::from_secs(10)),
        );

        let summary = orchestrator.run(
            work_items_for(&names(&["tshirt-black.jpg"]), dir.path()),
            dir.path(),
        );

        assert_eq!((summary.succeeded, summary.failed), (1, 0));
        assert_eq!(
            summary.items[0].resolution,
            ItemResolution::Fallback {
                key: "tshirt".to_string()
            }
        );
        assert!(dir.path().join("tshirt-black.jpg").exists());
        assert_eq!(downloader.urls_for("tshirt-black.jpg"), vec![TSHIRT_PRIMARY]);
    }

    #[test]
    fn test_unknown_category_fails_and_writes_nothing() {
        let dir = tempfile::tempdir().expect("temp dir");
        let downloader = Arc::new(ScriptedDownloader::new());
        let orchestrator = orchestrator(
            vec![StaticBackend::boxed(BackendKind::DuckDuckGo, &[])],
            downloader.clone(),
            Config::default().fallback,
            settings(Duration::from_secs(10)),
        );

        let summary = orchestrator.run(
            work_items_for(&names(&["abc-unique-widget.jpg"]), dir.path()),
            dir.path(),
        );

        assert_eq!((summary.succeeded, summary.failed), (0, 1));
        assert!(!dir.path().join("abc-unique-widget.jpg").exists());
        assert!(downloader.calls().is_empty());
        assert!(summary.files.is_empty());
    }

    #[test]
    fn test_fallback_runs_only_for_failed_items() {
        let dir = tempfile::tempdir().expect("temp dir");
        let downloader = Arc::new(ScriptedDownloader::new().succeed_file("jeans-blue.jpg"));
        let orchestrator = orchestrator(
            vec![StaticBackend::boxed(BackendKind::Bing, &["https://x/a.jpg"])],
            downloader.clone(),
            Config::default().fallback,
            settings(Duration::from_secs(10)),
        );

        let summary = orchestrator.run(
            work_items_for(&names(&["jeans-blue.jpg", "hoodie-grey.jpg"]), dir.path()),
            dir.path(),
        );

        assert_eq!((summary.succeeded, summary.failed), (1, 1));
        assert_eq!(downloader.urls_for("jeans-blue.jpg"), vec!["https://x/a.jpg"]);
        let hoodie_urls = downloader.urls_for("hoodie-grey.jpg");
        assert_eq!(hoodie_urls[0], "https://x/a.jpg");
        assert_eq!(
            hoodie_urls[1..],
            ["https://images.unsplash.com/photo-1556821840-3a63f95609a7".to_string()]
        );
    }

    #[test]
    fn test_every_item_is_accounted_for_once() {
        let dir = tempfile::tempdir().expect("temp dir");
        let downloader = Arc::new(ScriptedDownloader::new().succeed("https://x/a.jpg"));
        let orchestrator = orchestrator(
            vec![StaticBackend::boxed(BackendKind::DuckDuckGo, &["https://x/a.jpg"])],
            downloader,
            Vec::new(),
            PoolSettings {
                max_workers: 2,
                ..settings(Duration::from_secs(10))
            },
        );
        let items = names(&["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"]);

        let summary = orchestrator.run(work_items_for(&items, dir.path()), dir.path());

        assert_eq!(summary.succeeded, 5);
        let mut reported: Vec<&str> = summary
            .items
            .iter()
            .map(|report| report.filename.as_str())
            .collect();
        reported.sort_unstable();
        assert_eq!(reported, vec!["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"]);
        assert_eq!(summary.files.len(), 5);
    }

    #[test]
    fn test_stuck_item_is_reclaimed_and_falls_back_once() {
        let dir = tempfile::tempdir().expect("temp dir");
        let downloader =
            Arc::new(ScriptedDownloader::new().stuck_for(Duration::from_millis(1500)));
        let orchestrator = orchestrator(
            vec![StaticBackend::boxed(BackendKind::DuckDuckGo, &["https://x/slow.jpg"])],
            downloader.clone(),
            vec![FallbackEntry {
                key: "scarf".to_string(),
                urls: vec!["https://fallback/scarf.jpg".to_string()],
            }],
            settings(Duration::from_millis(150)),
        );
        let started = Instant::now();

        let summary = orchestrator.run(
            work_items_for(&names(&["scarf-red.jpg"]), dir.path()),
            dir.path(),
        );

        assert_eq!(summary.items.len(), 1);
        assert_eq!(summary.failed, 1);
        match &summary.items[0].resolution {
            ItemResolution::Failed { reason } => assert!(reason.starts_with("timed out")),
            other => panic!("unexpected resolution {other:?}"),
        }
        let fallback_calls = downloader
            .urls_for("scarf-red.jpg")
            .into_iter()
            .filter(|url| url == "https://fallback/scarf.jpg")
            .count();
        assert_eq!(fallback_calls, 1);
        // Reclaimed after timeout plus grace, then one stuck fallback call.
        assert!(started.elapsed() < Duration::from_millis(2900));
    }

    #[test]
    fn test_results_queued_during_a_slow_fallback_are_not_reclaimed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let downloader = Arc::new(
            ScriptedDownloader::new()
                .succeed_file("b.jpg")
                .stall_on("b.jpg", Duration::from_millis(100))
                .succeed("https://fallback/scarf.jpg")
                .stall_on("https://fallback/scarf.jpg", Duration::from_millis(1500)),
        );
        let orchestrator = orchestrator(
            vec![StaticBackend::boxed(BackendKind::DuckDuckGo, &["https://x/a.jpg"])],
            downloader,
            vec![FallbackEntry {
                key: "scarf".to_string(),
                urls: vec!["https://fallback/scarf.jpg".to_string()],
            }],
            PoolSettings {
                max_workers: 2,
                ..settings(Duration::from_millis(300))
            },
        );

        let summary = orchestrator.run(
            work_items_for(&names(&["scarf-a.jpg", "b.jpg"]), dir.path()),
            dir.path(),
        );

        assert_eq!((summary.succeeded, summary.failed), (2, 0));
        let resolution_of = |filename: &str| {
            summary
                .items
                .iter()
                .find(|report| report.filename == filename)
                .map(|report| report.resolution.clone())
                .expect("item report")
        };
        assert!(matches!(resolution_of("b.jpg"), ItemResolution::Primary { .. }));
        assert_eq!(
            resolution_of("scarf-a.jpg"),
            ItemResolution::Fallback {
                key: "scarf".to_string()
            }
        );
    }

    #[test]
    fn test_worker_panic_fails_only_that_item() {
        let dir = tempfile::tempdir().expect("temp dir");
        let downloader = Arc::new(
            ScriptedDownloader::new()
                .succeed_file("jeans-blue.jpg")
                .panic_on_file("boom.jpg"),
        );
        let orchestrator = orchestrator(
            vec![StaticBackend::boxed(BackendKind::DuckDuckGo, &["https://x/a.jpg"])],
            downloader,
            Vec::new(),
            PoolSettings {
                max_workers: 1,
                ..settings(Duration::from_secs(10))
            },
        );

        let summary = orchestrator.run(
            work_items_for(&names(&["boom.jpg", "jeans-blue.jpg"]), dir.path()),
            dir.path(),
        );

        assert_eq!((summary.succeeded, summary.failed), (1, 1));
        let boom = summary
            .items
            .iter()
            .find(|report| report.filename == "boom.jpg")
            .expect("boom report");
        match &boom.resolution {
            ItemResolution::Failed { reason } => assert!(reason.contains("worker panicked")),
            other => panic!("unexpected resolution {other:?}"),
        }
    }

    #[test]
    fn test_huge_item_timeout_does_not_overflow_reclaim_time() {
        let config = OrchestratorConfig {
            per_item_timeout_secs: u64::MAX,
            ..OrchestratorConfig::default()
        };
        let deadline = Deadline::after(PoolSettings::from(&config).per_item_timeout);

        assert!(reclaim_at(&deadline) >= deadline.expires_at());
        assert!(!deadline.is_expired());
    }

    #[test]
    fn test_empty_batch_finishes_immediately() {
        let dir = tempfile::tempdir().expect("temp dir");
        let orchestrator = orchestrator(
            Vec::new(),
            Arc::new(ScriptedDownloader::new()),
            Vec::new(),
            settings(Duration::from_secs(10)),
        );

        let summary = orchestrator.run(Vec::new(), dir.path());

        assert_eq!((summary.succeeded, summary.failed), (0, 0));
        assert!(summary.items.is_empty());
    }
}
