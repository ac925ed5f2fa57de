//! A `ProcessFile` implementation that shells out to an operator-supplied
//! executable instead of calling a transcription API in-process — the
//! actual transcription/summarization backend is an external collaborator
//! this crate never re-implements.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use wasabi_scan_workers::{classify, Classification};

use crate::process::{ProcessError, ProcessFile};

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path.file_stem().unwrap_or(OsStr::new("output"));
    path.with_file_name(format!("{}.{suffix}", stem.to_string_lossy()))
}

/// Runs `command args... <local_path>` and expects it to write
/// `<stem>.transcript.txt` and `<stem>.summary.txt` next to the input
/// before exiting 0. A non-zero exit is classified from stderr through
/// the same marker set the worker pool uses, so a backend that reports
/// "rate limit exceeded" on stderr gets retried rather than failed outright.
pub struct CommandProcessFile {
    command: PathBuf,
    args: Vec<String>,
}

impl CommandProcessFile {
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl ProcessFile for CommandProcessFile {
    async fn process(&self, local_path: &Path) -> Result<(Vec<u8>, Vec<u8>), ProcessError> {
        let output = Command::new(&self.command)
            .args(&self.args)
            .arg(local_path)
            .output()
            .await
            .map_err(|e| ProcessError::Fatal(format!("failed to launch processing command: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("processing command exited with {}", output.status)
            } else {
                stderr
            };
            return Err(match classify(&message) {
                Classification::Transient => ProcessError::Transient(message),
                Classification::Fatal => ProcessError::Fatal(message),
            });
        }

        let transcript_path = sibling_with_suffix(local_path, "transcript.txt");
        let summary_path = sibling_with_suffix(local_path, "summary.txt");

        let transcript = tokio::fs::read(&transcript_path)
            .await
            .map_err(|e| ProcessError::Fatal(format!("missing transcript output: {e}")))?;
        let summary = tokio::fs::read(&summary_path)
            .await
            .map_err(|e| ProcessError::Fatal(format!("missing summary output: {e}")))?;

        Ok((transcript, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_successful_command_reads_back_sibling_transcript_and_summary_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.wav");
        tokio::fs::write(&input, b"audio").await.unwrap();
        tokio::fs::write(dir.path().join("clip.transcript.txt"), b"hello")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("clip.summary.txt"), b"hi")
            .await
            .unwrap();

        let process_file = CommandProcessFile::new("true", vec![]);
        let (transcript, summary) = process_file.process(&input).await.unwrap();
        assert_eq!(transcript, b"hello");
        assert_eq!(summary, b"hi");
    }

    #[tokio::test]
    async fn a_nonzero_exit_is_classified_from_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.wav");
        tokio::fs::write(&input, b"audio").await.unwrap();

        let process_file = CommandProcessFile::new("false", vec![]);
        let err = process_file.process(&input).await.unwrap_err();
        assert!(matches!(err, ProcessError::Fatal(_)));
    }
}
