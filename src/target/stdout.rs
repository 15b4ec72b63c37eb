use super::payload::{render_value, Payload, Target, TargetError};
use crate::tfstate::diff::{DiffStatus, ValueDiff};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::Mutex;

const HEAVY_RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";
const LIGHT_RULE: &str = "──────────────────────────────────────────────────";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    Json,
    #[default]
    Text,
}

impl OutputFormat {
    /// Anything other than `json` (any case) renders as text.
    pub fn parse(format: &str) -> Self {
        if format.eq_ignore_ascii_case("json") {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

/// One JSON line per changed resource or output.
#[derive(Debug, Serialize)]
pub struct LogEntry<'a> {
    pub timestamp: DateTime<Utc>,
    pub level: &'static str,
    pub msg: String,
    pub event_type: &'static str,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_name: Option<&'a str>,
    pub status: DiffStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<BTreeMap<&'a str, &'a ValueDiff>>,
}

pub struct StdoutTarget {
    format: OutputFormat,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl StdoutTarget {
    pub fn new(format: OutputFormat) -> Self {
        Self::with_writer(format, Box::new(io::stdout()))
    }

    pub fn with_writer(format: OutputFormat, writer: Box<dyn Write + Send>) -> Self {
        Self {
            format,
            writer: Mutex::new(writer),
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    fn emit(&self, bytes: &[u8]) -> Result<(), TargetError> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl Target for StdoutTarget {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn write(&self, payload: &Payload) -> Result<(), TargetError> {
        let rendered = match self.format {
            OutputFormat::Json => render_json_lines(payload)?,
            OutputFormat::Text => render_text(payload),
        };
        self.emit(rendered.as_bytes())
    }
}

pub fn log_entries(payload: &Payload) -> Vec<LogEntry<'_>> {
    let source = payload.source.location.clone();
    let mut entries = Vec::new();

    for diff in &payload.diffs.resource_diffs {
        let changes = (!diff.attribute_diffs.is_empty()).then(|| {
            diff.attribute_diffs
                .iter()
                .map(|(attr, change)| (attr.as_str(), change))
                .collect()
        });
        entries.push(LogEntry {
            timestamp: payload.timestamp,
            level: "info",
            msg: format!("resource {}", diff.status),
            event_type: "resource_change",
            source: source.clone(),
            resource_type: Some(diff.resource_type.as_str()),
            resource_name: Some(diff.resource_name.as_str()),
            output_name: None,
            status: diff.status,
            changes,
        });
    }

    for diff in &payload.diffs.output_diffs {
        let changes = (diff.status == DiffStatus::Changed)
            .then(|| BTreeMap::from([("value", &diff.value_diff)]));
        entries.push(LogEntry {
            timestamp: payload.timestamp,
            level: "info",
            msg: format!("output {}", diff.status),
            event_type: "output_change",
            source: source.clone(),
            resource_type: None,
            resource_name: None,
            output_name: Some(diff.output_name.as_str()),
            status: diff.status,
            changes,
        });
    }

    entries
}

fn render_json_lines(payload: &Payload) -> Result<String, TargetError> {
    let mut out = String::new();
    for entry in log_entries(payload) {
        let line = serde_json::to_string(&entry).map_err(|e| TargetError::Serialize {
            target: "stdout",
            message: e.to_string(),
        })?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

fn status_marker(status: DiffStatus) -> &'static str {
    match status {
        DiffStatus::Added => "[+]",
        DiffStatus::Removed => "[-]",
        DiffStatus::Changed => "[~]",
    }
}

pub fn render_text(payload: &Payload) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "{}", HEAVY_RULE);
    let _ = writeln!(out, "  TERRAFORM STATE CHANGES DETECTED");
    let _ = writeln!(out, "{}", HEAVY_RULE);
    let _ = writeln!(out, "  Time:    {}", payload.formatted_time());
    let _ = writeln!(out, "  Backend: {}", payload.source.backend);
    let _ = writeln!(out, "  Source:  {}", payload.source.location);
    let _ = writeln!(out, "{}", LIGHT_RULE);

    if !payload.diffs.resource_diffs.is_empty() {
        let _ = writeln!(out, "\n  RESOURCE CHANGES\n");
        for diff in &payload.diffs.resource_diffs {
            let address = match &diff.module {
                Some(module) => format!("{}.{}.{}", module, diff.resource_type, diff.resource_name),
                None => format!("{}.{}", diff.resource_type, diff.resource_name),
            };
            let _ = writeln!(
                out,
                "  {} {} ({})",
                status_marker(diff.status),
                address,
                diff.status
            );

            if diff.status == DiffStatus::Changed {
                for (attr, change) in &diff.attribute_diffs {
                    let _ = writeln!(
                        out,
                        "      {}: {} → {}",
                        attr,
                        render_value(change.before.as_ref()),
                        render_value(change.after.as_ref())
                    );
                }
            }
        }
    }

    if !payload.diffs.output_diffs.is_empty() {
        let _ = writeln!(out, "\n  OUTPUT CHANGES\n");
        for diff in &payload.diffs.output_diffs {
            let _ = writeln!(
                out,
                "  {} {} ({})",
                status_marker(diff.status),
                diff.output_name,
                diff.status
            );
            if diff.status == DiffStatus::Changed {
                let _ = writeln!(
                    out,
                    "      {} → {}",
                    render_value(diff.value_diff.before.as_ref()),
                    render_value(diff.value_diff.after.as_ref())
                );
            }
        }
    }

    let _ = writeln!(out, "\n{}", HEAVY_RULE);
    out
}
