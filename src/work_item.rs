//! Units of work and the search phrases derived from them.

use std::path::{Path, PathBuf};

/// One filename to acquire an image for, plus where it should land.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub filename: String,
    pub destination_folder: PathBuf,
}

impl WorkItem {
    pub fn new(filename: impl Into<String>, destination_folder: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            destination_folder: destination_folder.into(),
        }
    }

    pub fn search_query(&self) -> SearchQuery {
        SearchQuery::from_filename(&self.filename)
    }
}

/// Builds the work list for a run, in configured order.
pub fn work_items_for(filenames: &[String], destination_folder: &Path) -> Vec<WorkItem> {
    filenames
        .iter()
        .map(|filename| WorkItem::new(filename.trim(), destination_folder))
        .collect()
}

/// Keyword phrase sent to search backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub keyword_phrase: String,
}

impl SearchQuery {
    /// `"black-tshirt_v2.jpeg"` becomes `"black tshirt v2"`.
    pub fn from_filename(filename: &str) -> Self {
        let stem = match filename.rfind('.') {
            Some(index) if index > 0 => &filename[..index],
            _ => filename,
        };
        let keyword_phrase = stem
            .replace(['-', '_'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        Self { keyword_phrase }
    }

    /// Suffixed phrases for the first `limit` non-blank suffixes.
    pub fn variants(&self, suffixes: &[String], limit: usize) -> Vec<String> {
        suffixes
            .iter()
            .map(|suffix| suffix.trim())
            .filter(|suffix| !suffix.is_empty())
            .take(limit)
            .map(|suffix| format!("{} {}", self.keyword_phrase, suffix))
            .collect()
    }
}
