//! In-process HTTP server handing out canned responses, for network-facing tests.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::backends::{BackendKind, SearchBackend};
use crate::deadline::Deadline;
use crate::fetcher::{DownloadOutcome, FetchFailureKind, ImageDownloader};

#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub delay: Option<Duration>,
}

impl CannedResponse {
    pub fn html(body: &str) -> Self {
        Self {
            status: 200,
            content_type: Some("text/html; charset=utf-8".to_string()),
            body: body.as_bytes().to_vec(),
            delay: None,
        }
    }

    pub fn image(content_type: &str, size: usize) -> Self {
        Self {
            status: 200,
            content_type: Some(content_type.to_string()),
            body: (0..size).map(|index| (index % 251) as u8).collect(),
            delay: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: Some("text/plain".to_string()),
            body: b"error".to_vec(),
            delay: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Serves each canned response to one connection, in order.
pub struct TestServer {
    port: u16,
    requested_paths: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    pub fn serve(responses: Vec<CannedResponse>) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind test listener");
        let port = listener.local_addr().expect("local addr").port();
        let requested_paths = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requested_paths);
        thread::spawn(move || {
            for response in responses {
                let Ok((stream, _)) = listener.accept() else {
                    return;
                };
                handle_connection(stream, &response, &recorded);
            }
        });
        Self {
            port,
            requested_paths,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    pub fn requested_paths(&self) -> Vec<String> {
        self.requested_paths
            .lock()
            .map(|paths| paths.clone())
            .unwrap_or_default()
    }
}

fn handle_connection(
    mut stream: TcpStream,
    response: &CannedResponse,
    recorded: &Arc<Mutex<Vec<String>>>,
) {
    let mut request = Vec::new();
    let mut buffer = [0u8; 1024];
    while !request.windows(4).any(|window| window == b"\r\n\r\n") {
        match stream.read(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(read) => request.extend_from_slice(&buffer[..read]),
        }
    }
    let request_text = String::from_utf8_lossy(&request);
    let path = request_text
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or_default()
        .to_string();
    if let Ok(mut paths) = recorded.lock() {
        paths.push(path);
    }

    if let Some(delay) = response.delay {
        thread::sleep(delay);
    }

    let mut head = format!(
        "HTTP/1.1 {} Canned\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        response.body.len()
    );
    if let Some(content_type) = &response.content_type {
        head.push_str(&format!("Content-Type: {content_type}\r\n"));
    }
    head.push_str("\r\n");
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&response.body);
    let _ = stream.flush();
}

/// Search backend answering every query with the same URLs.
pub struct StaticBackend {
    pub kind: BackendKind,
    pub urls: Vec<String>,
}

impl StaticBackend {
    pub fn boxed(
        kind: BackendKind,
        urls: &[&str],
    ) -> Box<dyn SearchBackend> {
        Box::new(Self {
            kind,
            urls: urls.iter().map(|url| url.to_string()).collect(),
        })
    }
}

impl SearchBackend for StaticBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn query(
        &self,
        _phrase: &str,
        max_results: usize,
        _timeout: Duration,
    ) -> Result<Vec<String>, String> {
        Ok(self.urls.iter().take(max_results).cloned().collect())
    }
}

/// Downloader with per-URL scripted outcomes. Unknown URLs fail with a transport error.
/// Successful downloads write a small file so folder listings see them.
#[derive(Default)]
pub struct ScriptedDownloader {
    outcomes: HashMap<String, DownloadOutcome>,
    succeeding_files: Vec<String>,
    panicking_files: Vec<String>,
    stalls: Vec<(String, Duration)>,
    delay: Option<Duration>,
    ignore_deadline: bool,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed(mut self, url: &str) -> Self {
        self.outcomes.insert(
            url.to_string(),
            DownloadOutcome::Downloaded { bytes: 2048 },
        );
        self
    }

    pub fn respond(mut self, url: &str, outcome: DownloadOutcome) -> Self {
        self.outcomes.insert(url.to_string(), outcome);
        self
    }

    /// Any URL succeeds for this filename.
    pub fn succeed_file(mut self, filename: &str) -> Self {
        self.succeeding_files.push(filename.to_string());
        self
    }

    pub fn panic_on_file(mut self, filename: &str) -> Self {
        self.panicking_files.push(filename.to_string());
        self
    }

    /// Calls whose URL or filename equals `target` block for `delay`, ignoring the deadline.
    pub fn stall_on(mut self, target: &str, delay: Duration) -> Self {
        self.stalls.push((target.to_string(), delay));
        self
    }

    /// Every call waits this long first, cut short by the item deadline.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Like `with_delay`, but the wait ignores the item deadline.
    pub fn stuck_for(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self.ignore_deadline = true;
        self
    }

    /// `(url, filename)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn urls_for(&self, filename: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(_, called_filename)| called_filename == filename)
            .map(|(url, _)| url)
            .collect()
    }
}

impl ImageDownloader for ScriptedDownloader {
    fn download(
        &self,
        url: &str,
        filename: &str,
        folder: &Path,
        deadline: &Deadline,
    ) -> DownloadOutcome {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((url.to_string(), filename.to_string()));
        }
        if self.panicking_files.iter().any(|name| name == filename) {
            panic!("scripted downloader panic for {filename}");
        }
        for (target, delay) in &self.stalls {
            if target == url || target == filename {
                thread::sleep(*delay);
            }
        }
        if let Some(delay) = self.delay {
            if self.ignore_deadline {
                thread::sleep(delay);
            } else if !deadline.sleep(delay) {
                return DownloadOutcome::Failed {
                    kind: FetchFailureKind::Cancelled,
                    detail: "item deadline reached".to_string(),
                };
            }
        }
        let scripted = if self.succeeding_files.iter().any(|name| name == filename) {
            Some(DownloadOutcome::Downloaded { bytes: 2048 })
        } else {
            self.outcomes.get(url).cloned()
        };
        let outcome = scripted.unwrap_or_else(|| {
            DownloadOutcome::Failed {
                kind: FetchFailureKind::Transport,
                detail: "connection refused".to_string(),
            }
        });
        if let DownloadOutcome::Downloaded { bytes } = &outcome {
            let _ = std::fs::create_dir_all(folder);
            let _ = std::fs::write(folder.join(filename), vec![0u8; *bytes as usize]);
        }
        outcome
    }
}
