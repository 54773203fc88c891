//! Run-level aggregation and the human-readable final report.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use log::debug;

/// How an item ended up satisfied, or why it was not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemResolution {
    Primary { detail: String },
    Fallback { key: String },
    Failed { reason: String },
}

impl ItemResolution {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub filename: String,
    pub resolution: ItemResolution,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub name: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// One entry per work item, in completion order.
    pub items: Vec<ItemReport>,
    pub output_folder: PathBuf,
    pub files: Vec<OutputFile>,
}

impl RunSummary {
    /// Tallies the reports and snapshots the destination folder.
    pub fn finalize(items: Vec<ItemReport>, output_folder: &Path) -> Self {
        let succeeded = items
            .iter()
            .filter(|report| report.resolution.is_success())
            .count();
        let failed = items.len() - succeeded;
        let output_folder = std::fs::canonicalize(output_folder)
            .or_else(|_| std::env::current_dir().map(|cwd| cwd.join(output_folder)))
            .unwrap_or_else(|_| output_folder.to_path_buf());
        let files = list_output_folder(&output_folder);
        Self {
            succeeded,
            failed,
            items,
            output_folder,
            files,
        }
    }
}

/// Regular files in `folder` sorted by name, without in-progress download files.
pub fn list_output_folder(folder: &Path) -> Vec<OutputFile> {
    let entries = match std::fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("Failed to read output folder {}: {}", folder.display(), err);
            return Vec::new();
        }
    };
    let mut files: Vec<OutputFile> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            if !metadata.is_file() {
                return None;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(".imagescout-") {
                return None;
            }
            Some(OutputFile {
                name,
                bytes: metadata.len(),
            })
        })
        .collect();
    files.sort_by(|left, right| left.name.cmp(&right.name));
    files
}

pub fn render_summary(summary: &RunSummary) -> String {
    let rule = "=".repeat(60);
    let mut text = String::new();
    let _ = writeln!(text, "{rule}");
    let _ = writeln!(text, "FINAL SUMMARY");
    let _ = writeln!(text, "{rule}");
    let _ = writeln!(text, "✓ Downloaded: {}", summary.succeeded);
    let _ = writeln!(text, "✗ Failed: {}", summary.failed);
    let _ = writeln!(text, "📁 Folder: {}", summary.output_folder.display());

    let failures: Vec<&ItemReport> = summary
        .items
        .iter()
        .filter(|report| !report.resolution.is_success())
        .collect();
    if !failures.is_empty() {
        let _ = writeln!(text, "\nFailed items ({}):", failures.len());
        for report in failures {
            if let ItemResolution::Failed { reason } = &report.resolution {
                let _ = writeln!(text, "  • {} ({})", report.filename, reason);
            }
        }
    }

    let _ = writeln!(text, "\nFiles in folder ({}):", summary.files.len());
    for file in &summary.files {
        let _ = writeln!(
            text,
            "  • {} ({:.1} KB)",
            file.name,
            file.bytes as f64 / 1024.0
        );
    }
    text
}
