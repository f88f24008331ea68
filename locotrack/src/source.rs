//! Location source: runs the positioning command and classifies its output.
//!
//! The command (by default `termux-location`) prints one JSON object. The
//! adapter never fails: every problem is turned into an error [`Record`] so
//! the tracker stores it like any other sample.
//!
//! | command output                     | record                    |
//! |------------------------------------|---------------------------|
//! | `{"latitude": .., ...}`            | `Record::Location`        |
//! | `{"error": "..."}`                 | `Record::CommandError`    |
//! | `{"API_ERROR": "..."}`             | `Record::ApiError`        |
//! | timeout, non-zero exit, bad JSON   | `Record::CommandError`    |

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::record::{Location, Record};

/// Anything that can produce one sample per call.
pub trait LocationSource {
    /// Acquire a sample, giving up after `timeout`.
    fn acquire(&mut self, timeout: Duration) -> impl Future<Output = Record>;
}

/// Runs an external command and parses its combined output.
#[derive(Debug, Clone)]
pub struct CommandLocationSource {
    argv: Vec<String>,
}

impl CommandLocationSource {
    /// Create a source for the given argument vector (program first).
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

impl LocationSource for CommandLocationSource {
    async fn acquire(&mut self, timeout: Duration) -> Record {
        let Some((program, args)) = self.argv.split_first() else {
            return Record::command_error("location command is empty");
        };

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(program = %program, error = %e, "Failed to run location command");
                return Record::command_error(format!("failed to run {}: {}", program, e));
            }
            Err(_) => {
                warn!(program = %program, ?timeout, "Location command timed out");
                return Record::command_error(format!(
                    "location command timed out after {:?}",
                    timeout
                ));
            }
        };

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);

        if !output.status.success() {
            let text = String::from_utf8_lossy(&combined);
            warn!(status = %output.status, output = %text.trim(), "Location command failed");
            return Record::command_error(format!(
                "location command failed ({}): {}",
                output.status,
                text.trim()
            ));
        }

        let record = classify(&combined);
        debug!(kind = ?record.kind(), "Location sample acquired");
        record
    }
}

/// Turn the command's output into a record.
pub fn classify(output: &[u8]) -> Record {
    let value: Value = match serde_json::from_slice(output) {
        Ok(value) => value,
        Err(e) => {
            return Record::command_error(format!(
                "invalid JSON from location command: {} ({})",
                e,
                String::from_utf8_lossy(output).trim()
            ))
        }
    };

    let Value::Object(map) = &value else {
        return Record::command_error(format!("expected a JSON object, got: {}", value));
    };

    if let Some(message) = map.get("API_ERROR") {
        return Record::api_error(message_text(message));
    }
    if let Some(message) = map.get("error") {
        return Record::command_error(message_text(message));
    }

    match serde_json::from_value::<Location>(value) {
        Ok(location) => Record::Location(location),
        Err(e) => Record::command_error(format!("invalid location object: {}", e)),
    }
}

fn message_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
