//! Progress-bus protocol shared by the harvesting, fetching, and orchestration components.
//!
//! Components publish what they are doing; the progress reporter is the only
//! consumer and turns each message into a console line.

use crate::backends::BackendKind;
use crate::fetcher::DownloadOutcome;

/// Sender half of the progress bus handed to each component.
pub type ProgressBus = tokio::sync::broadcast::Sender<Message>;

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Harvest(HarvestMessage),
    Item(ItemMessage),
    Run(RunMessage),
}

#[derive(Debug, Clone)]
pub enum HarvestMessage {
    VariantStarted {
        filename: String,
        query: String,
    },
    BackendAnswered {
        filename: String,
        backend: BackendKind,
        count: usize,
    },
    BackendFailed {
        filename: String,
        backend: BackendKind,
        reason: String,
    },
    /// The shared per-backend limiter could not grant a slot before the item deadline.
    BackendSkipped {
        filename: String,
        backend: BackendKind,
    },
}

#[derive(Debug, Clone)]
pub enum ItemMessage {
    Started {
        filename: String,
    },
    CandidatesFound {
        filename: String,
        count: usize,
    },
    NoCandidates {
        filename: String,
    },
    AttemptStarted {
        filename: String,
        attempt: usize,
        url: String,
    },
    AttemptFinished {
        filename: String,
        attempt: usize,
        outcome: DownloadOutcome,
    },
    Exhausted {
        filename: String,
    },
    TimedOut {
        filename: String,
    },
    WorkerPanicked {
        filename: String,
        message: String,
    },
    FallbackStarted {
        filename: String,
        key: String,
    },
    FallbackNoMatch {
        filename: String,
    },
    FallbackFinished {
        filename: String,
        recovered: bool,
    },
}

#[derive(Debug, Clone)]
pub enum RunMessage {
    Started {
        items: usize,
        workers: usize,
        folder: String,
    },
    Finished {
        succeeded: usize,
        failed: usize,
    },
}

/// Publishes a message; a bus with no subscribers is not an error.
pub fn publish(bus: &ProgressBus, message: Message) {
    let _ = bus.send(message);
}
