use crate::errors::DriverError;
use crate::log_retention::enforce_total_budget;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

/// Appends one JSON object per line to the driver event log.
#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
    /// Extra files that survive pruning, such as an open transcript.
    pub keep: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            keep: Vec::new(),
        }
    }

    pub fn keeping(&self, path: impl AsRef<Path>) -> Self {
        let mut logger = self.clone();
        logger.keep.push(path.as_ref().to_path_buf());
        logger
    }

    pub fn info(&self, event_type: &str, payload: Value) -> Result<(), DriverError> {
        self.append(&LogEvent {
            level: "info",
            event_type,
            payload,
        })
    }

    pub fn warn(&self, event_type: &str, payload: Value) -> Result<(), DriverError> {
        self.append(&LogEvent {
            level: "warn",
            event_type,
            payload,
        })
    }

    pub fn error(&self, event_type: &str, payload: Value) -> Result<(), DriverError> {
        self.append(&LogEvent {
            level: "error",
            event_type,
            payload,
        })
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), DriverError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| DriverError::Io(e.to_string()))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| DriverError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| DriverError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| DriverError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| DriverError::Io(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            let mut keep = self.keep.clone();
            keep.push(self.path.clone());
            let _ = enforce_total_budget(parent, self.budget_bytes, &keep)?;
        }

        Ok(())
    }
}

/// One-line result summary printed by the CLI.
pub fn summary_line(operation: &str, outcome: &str, message: &str) -> String {
    format!(
        "operation={operation} outcome={outcome} message={}",
        message.replace('\n', "\\n")
    )
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}

#[cfg(test)]
mod tests {
    use super::{summary_line, JsonlLogger, LogEvent};
    use serde_json::json;

    #[test]
    fn logger_truncates_large_payloads_and_writes_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("driver-events.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.max_payload_bytes = 20;
        logger.budget_bytes = 1024;

        logger
            .append(&LogEvent {
                level: "info",
                event_type: "expect_matched",
                payload: json!({"text": "abcdefghijklmnopqrstuvwxyz"}),
            })
            .expect("append");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("\"event_type\":\"expect_matched\""));
        assert!(text.contains("..."));
    }

    #[test]
    fn level_helpers_tag_each_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = JsonlLogger::new(dir.path().join("events.jsonl"));
        logger.warn("pattern_overlap", json!({})).expect("warn");
        logger.error("spawn_failed", json!({})).expect("error");

        let text = std::fs::read_to_string(&logger.path).expect("read");
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"level\":\"warn\""));
        assert!(lines[1].contains("\"level\":\"error\""));
    }

    #[test]
    fn kept_transcript_outlives_the_budget() {
        let dir = tempfile::tempdir().expect("tempdir");
        let transcript = dir.path().join("install.log");
        std::fs::write(&transcript, vec![b'x'; 4096]).expect("transcript");

        let mut logger = JsonlLogger::new(dir.path().join("events.jsonl"));
        logger.budget_bytes = 64;
        logger
            .keeping(&transcript)
            .info("child_exited", json!({"status": 0}))
            .expect("info");
        assert!(transcript.exists());

        logger.info("scenario_finished", json!({})).expect("info");
        assert!(!transcript.exists());
    }

    #[test]
    fn summary_line_is_deterministic() {
        let line = summary_line("install", "completed", "ok\ndone");
        assert_eq!(line, "operation=install outcome=completed message=ok\\ndone");
    }
}
