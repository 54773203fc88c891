//! Progress bus consumer that turns component events into console log lines.

use log::{debug, log, warn, Level};
use tokio::sync::broadcast::{error::RecvError, Receiver};

use crate::fetcher::DownloadOutcome;
use crate::protocol::{HarvestMessage, ItemMessage, Message, RunMessage};

pub struct ProgressReporter {
    bus_consumer: Receiver<Message>,
}

impl ProgressReporter {
    pub fn new(bus_consumer: Receiver<Message>) -> Self {
        Self { bus_consumer }
    }

    /// Logs every bus message until the run finishes or the bus closes.
    pub fn run(&mut self) {
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(message) => {
                    let finished = matches!(message, Message::Run(RunMessage::Finished { .. }));
                    if let Some((level, line)) = describe(&message) {
                        log!(level, "{}", line);
                    }
                    if finished {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("ProgressReporter: bus lagged by {} messages", skipped);
                }
                Err(RecvError::Closed) => {
                    debug!("ProgressReporter: bus closed");
                    break;
                }
            }
        }
    }
}

fn describe_attempt(outcome: &DownloadOutcome) -> (Level, String) {
    match outcome {
        DownloadOutcome::AlreadyExists => (Level::Info, "already exists".to_string()),
        DownloadOutcome::Downloaded { bytes } => (
            Level::Info,
            format!("downloaded {:.1} KB", *bytes as f64 / 1024.0),
        ),
        DownloadOutcome::NotAnImage { content_type } => {
            (Level::Debug, format!("not an image ({content_type})"))
        }
        DownloadOutcome::TooSmall { bytes } => (Level::Debug, format!("too small ({bytes} B)")),
        DownloadOutcome::Failed { kind, detail } => {
            (Level::Debug, format!("failed ({kind:?}): {detail}"))
        }
    }
}

/// Console rendering for one bus message. `None` for messages not worth a line.
pub fn describe(message: &Message) -> Option<(Level, String)> {
    let described = match message {
        Message::Run(RunMessage::Started {
            items,
            workers,
            folder,
        }) => (
            Level::Info,
            format!("Starting batch of {items} items with {workers} workers into {folder}"),
        ),
        Message::Run(RunMessage::Finished { succeeded, failed }) => (
            Level::Info,
            format!("Batch finished: {succeeded} succeeded, {failed} failed"),
        ),
        Message::Harvest(HarvestMessage::VariantStarted { filename, query }) => {
            (Level::Debug, format!("[{filename}] searching: {query}"))
        }
        Message::Harvest(HarvestMessage::BackendAnswered {
            filename,
            backend,
            count,
        }) => (
            Level::Debug,
            format!("[{filename}] {} returned {count} urls", backend.source_name()),
        ),
        Message::Harvest(HarvestMessage::BackendFailed {
            filename,
            backend,
            reason,
        }) => (
            Level::Debug,
            format!("[{filename}] {} failed: {reason}", backend.source_name()),
        ),
        Message::Harvest(HarvestMessage::BackendSkipped { filename, backend }) => (
            Level::Debug,
            format!(
                "[{filename}] {} skipped, no rate limit slot before deadline",
                backend.source_name()
            ),
        ),
        Message::Item(ItemMessage::Started { filename }) => {
            (Level::Info, format!("🔍 {filename}"))
        }
        Message::Item(ItemMessage::CandidatesFound { filename, count }) => {
            (Level::Info, format!("[{filename}] found {count} candidate urls"))
        }
        Message::Item(ItemMessage::NoCandidates { filename }) => {
            (Level::Warn, format!("[{filename}] no candidate urls found"))
        }
        Message::Item(ItemMessage::AttemptStarted {
            filename,
            attempt,
            url,
        }) => (
            Level::Debug,
            format!("[{filename}] attempt {attempt}: {url}"),
        ),
        Message::Item(ItemMessage::AttemptFinished {
            filename,
            attempt,
            outcome,
        }) => {
            let (level, text) = describe_attempt(outcome);
            (level, format!("[{filename}] attempt {attempt} {text}"))
        }
        Message::Item(ItemMessage::Exhausted { filename }) => {
            (Level::Warn, format!("[{filename}] all attempts failed"))
        }
        Message::Item(ItemMessage::TimedOut { filename }) => {
            (Level::Warn, format!("[{filename}] timed out"))
        }
        Message::Item(ItemMessage::WorkerPanicked { filename, message }) => {
            (Level::Error, format!("[{filename}] worker panicked: {message}"))
        }
        Message::Item(ItemMessage::FallbackStarted { filename, key }) => (
            Level::Info,
            format!("[{filename}] trying fallback for '{key}'"),
        ),
        Message::Item(ItemMessage::FallbackNoMatch { .. }) => return None,
        Message::Item(ItemMessage::FallbackFinished {
            filename,
            recovered,
        }) => {
            if *recovered {
                (Level::Info, format!("[{filename}] fallback succeeded"))
            } else {
                (Level::Warn, format!("[{filename}] fallback failed"))
            }
        }
    };
    Some(described)
}
