//! Shared `ureq` agent, browser-like request headers, and failure classification.

use std::sync::OnceLock;
use std::time::Duration;

const BROWSER_USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

pub const HTML_ACCEPT: &str = "text/html,application/xhtml+xml";
pub const IMAGE_ACCEPT: &str = "image/webp,image/*,*/*;q=0.8";
pub const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

static SESSION_USER_AGENT: OnceLock<&'static str> = OnceLock::new();

/// User agent picked once per process so every request of a run looks alike.
pub fn session_user_agent() -> &'static str {
    SESSION_USER_AGENT
        .get_or_init(|| BROWSER_USER_AGENTS[rand::random_range(0..BROWSER_USER_AGENTS.len())])
}

pub fn build_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(5))
        .timeout_read(Duration::from_secs(15))
        .timeout_write(Duration::from_secs(15))
        .build()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpFailureKind {
    Timeout,
    RateLimited,
    Hard,
}

pub fn classify_ureq_failure(error: &ureq::Error) -> HttpFailureKind {
    match error {
        ureq::Error::Status(code, _) => match code {
            429 => HttpFailureKind::RateLimited,
            408 | 504 => HttpFailureKind::Timeout,
            _ => HttpFailureKind::Hard,
        },
        ureq::Error::Transport(transport) => {
            let lowered = transport.to_string().to_ascii_lowercase();
            if lowered.contains("timed out") || lowered.contains("timeout") {
                HttpFailureKind::Timeout
            } else {
                HttpFailureKind::Hard
            }
        }
    }
}

pub fn classify_io_timeout(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    ) || error.to_string().to_ascii_lowercase().contains("timed out")
}

/// Cuts `message` to at most `max_chars` characters on a char boundary.
pub fn truncate_detail(message: &str, max_chars: usize) -> String {
    message.chars().take(max_chars).collect()
}
