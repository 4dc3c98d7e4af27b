use std::fs::{self, OpenOptions};
use std::io::Write;
use std::time::Instant;

use chrono::Utc;

use crate::error::{LexMatchError, Result};
use crate::jsonl::{jsonl_all_lines_invalid, parse_jsonl_tolerant};
use crate::models::RequestLogEntry;

use super::MatchingCore;

impl MatchingCore {
    /// Appends one JSONL line. Logging failures never fail the operation.
    pub(super) fn try_log_request(&self, entry: &RequestLogEntry) {
        if let Ok(serialized) = serde_json::to_string(entry)
            && let Ok(mut file) = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.request_log_path())
        {
            let mut line = serialized;
            line.push('\n');
            let _ = file.write_all(line.as_bytes());
        }
    }

    pub(super) fn log_request_status(
        &self,
        request_id: String,
        operation: &str,
        status: &str,
        started: Instant,
        details: Option<serde_json::Value>,
    ) {
        self.try_log_request(&RequestLogEntry {
            request_id,
            operation: operation.to_string(),
            status: status.to_string(),
            latency_ms: started.elapsed().as_millis(),
            created_at: Utc::now().to_rfc3339(),
            error_code: None,
            error_message: None,
            details,
        });
    }

    pub(super) fn log_request_error(
        &self,
        request_id: String,
        operation: &str,
        started: Instant,
        err: &LexMatchError,
        details: Option<serde_json::Value>,
    ) {
        self.try_log_request(&RequestLogEntry {
            request_id,
            operation: operation.to_string(),
            status: "error".to_string(),
            latency_ms: started.elapsed().as_millis(),
            created_at: Utc::now().to_rfc3339(),
            error_code: Some(err.code().to_string()),
            error_message: Some(err.to_string()),
            details,
        });
    }

    pub(super) fn log_request_warning(
        &self,
        request_id: String,
        operation: &str,
        started: Instant,
        warning_message: &str,
        details: Option<serde_json::Value>,
    ) {
        self.try_log_request(&RequestLogEntry {
            request_id,
            operation: operation.to_string(),
            status: "warning".to_string(),
            latency_ms: started.elapsed().as_millis(),
            created_at: Utc::now().to_rfc3339(),
            error_code: None,
            error_message: Some(warning_message.to_string()),
            details,
        });
    }

    /// Most recent entries first, optionally filtered by operation and status
    /// (case-insensitive).
    pub fn list_request_logs(
        &self,
        limit: usize,
        operation: Option<&str>,
        status: Option<&str>,
    ) -> Result<Vec<RequestLogEntry>> {
        let path = self.request_log_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)?;
        let operation = operation
            .map(str::trim)
            .filter(|x| !x.is_empty())
            .map(str::to_ascii_lowercase);
        let status = status
            .map(str::trim)
            .filter(|x| !x.is_empty())
            .map(str::to_ascii_lowercase);
        let parsed = parse_jsonl_tolerant::<RequestLogEntry>(&raw);
        if parsed.items.is_empty() && parsed.skipped_lines > 0 {
            return Err(jsonl_all_lines_invalid(
                "request log",
                parsed.skipped_lines,
                parsed.first_error.as_ref(),
            ));
        }

        let mut entries = Vec::new();
        for entry in parsed.items {
            if let Some(op) = operation.as_deref()
                && !entry.operation.eq_ignore_ascii_case(op)
            {
                continue;
            }
            if let Some(st) = status.as_deref()
                && !entry.status.eq_ignore_ascii_case(st)
            {
                continue;
            }
            entries.push(entry);
        }
        entries.reverse();
        entries.truncate(limit.max(1));
        Ok(entries)
    }
}
