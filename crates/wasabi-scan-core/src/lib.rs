// wasabi-scan-core - Shared data model for the scanner/processing pipeline
//
// FileRef, ProcessedRecord, LogEntry, the audio-file predicate and the
// derived-key naming rule all live here so every other crate in the
// workspace agrees on them without a dependency cycle.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A fully-qualified reference to an object in the store.
///
/// Immutable once constructed; `path` is always `bucket/key` and is what
/// every other component (ProgressStore, OperationLog) keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef {
    pub bucket: String,
    pub key: String,
}

impl FileRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn path(&self) -> String {
        format!("{}/{}", self.bucket, self.key)
    }
}

/// The two durable operations tracked per path in the ProgressStore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Downloaded,
    Uploaded,
}

/// A durable, append-only record: once written for a `(path, operation)`
/// pair it is never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub path: String,
    pub operation: Operation,
    pub processed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_identifier: Option<String>,
}

/// Lifecycle status of a single in-flight or completed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Processing,
    Retrying,
    Completed,
    Failed,
}

/// One entry in the OperationLog, mirrored to disk on every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub bucket: String,
    pub key: String,
    pub path: String,
    pub timestamp: DateTime<Utc>,
    pub status: LogStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_locations: Option<Vec<String>>,
}

impl LogEntry {
    pub fn processing(file: &FileRef) -> Self {
        Self {
            bucket: file.bucket.clone(),
            key: file.key.clone(),
            path: file.path(),
            timestamp: Utc::now(),
            status: LogStatus::Processing,
            error: None,
            upload_locations: None,
        }
    }
}

const AUDIO_EXTENSIONS: &[&str] = &[
    ".mp3", ".wav", ".m4a", ".aac", ".ogg", ".flac", ".wma", ".alac", ".aiff",
];

/// Whether a key names an audio file, per the fixed extension set.
///
/// Matching is done against the lower-cased key so callers don't need to
/// normalize case themselves.
pub fn is_audio_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    AUDIO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Splits `a/b/c/file.mp3` into (`a/b/c`, `file`).
fn parent_and_stem(key: &str) -> (&str, &str) {
    let (parent, basename) = match key.rfind('/') {
        Some(idx) => (&key[..idx], &key[idx + 1..]),
        None => ("", key),
    };
    let stem = match basename.rfind('.') {
        Some(idx) => &basename[..idx],
        None => basename,
    };
    (parent, stem)
}

fn derived_key(key: &str, subfolder: &str, suffix: &str, extension: &str) -> String {
    let (parent, stem) = parent_and_stem(key);
    if parent.is_empty() {
        format!("{subfolder}/{stem}{suffix}.{extension}")
    } else {
        format!("{parent}/{subfolder}/{stem}{suffix}.{extension}")
    }
}

/// Derived transcript key for a source key, per the append-form rule.
pub fn transcript_key(key: &str) -> String {
    derived_key(key, "transcripts", "_transcript", "txt")
}

/// Derived summary key for a source key. `extension` lets the
/// reconciliation variant (§3) produce `.pdf` summaries instead of `.txt`.
pub fn summary_key_with_extension(key: &str, extension: &str) -> String {
    derived_key(key, "summaries", "_summary", extension)
}

/// Derived summary key using the default `.txt` extension.
pub fn summary_key(key: &str) -> String {
    summary_key_with_extension(key, "txt")
}

/// Basename of a local path without its extension, used by the
/// reconciliation scanner to recover a correlation identifier.
pub fn file_stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|s| s.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_predicate_matches_known_extensions_case_insensitively() {
        assert!(is_audio_key("a/b/FILE.MP3"));
        assert!(is_audio_key("a/b/file.flac"));
        assert!(!is_audio_key("a/b/file.txt"));
        assert!(!is_audio_key("a/b/file"));
    }

    #[test]
    fn derived_keys_append_a_subfolder_and_rewrite_the_basename() {
        assert_eq!(
            transcript_key("a/b/c/file.mp3"),
            "a/b/c/transcripts/file_transcript.txt"
        );
        assert_eq!(
            summary_key("a/b/c/file.mp3"),
            "a/b/c/summaries/file_summary.txt"
        );
    }

    #[test]
    fn derived_keys_handle_top_level_sources() {
        assert_eq!(transcript_key("file.wav"), "transcripts/file_transcript.txt");
    }

    #[test]
    fn summary_key_with_extension_supports_the_reconciliation_pdf_variant() {
        assert_eq!(
            summary_key_with_extension("u/v/file.mp3", "pdf"),
            "u/v/summaries/file_summary.pdf"
        );
    }

    #[test]
    fn file_ref_path_joins_bucket_and_key() {
        let f = FileRef::new("b1", "a/b.mp3");
        assert_eq!(f.path(), "b1/a/b.mp3");
    }
}
