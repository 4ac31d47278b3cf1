use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};

use crate::exec::{ExecResult, PagedResult};
use crate::pods::PodTarget;
use crate::types::ExecutionResult;

/// Append-only plain-text log of one invocation. A disabled log drops everything.
pub struct RunLog {
    file: Option<File>,
}

impl RunLog {
    pub fn disabled() -> Self {
        Self { file: None }
    }

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create run log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open run log {}", path.display()))?;
        Ok(Self { file: Some(file) })
    }

    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    pub fn run_started(&self, argv: &[String]) {
        self.write(&format!("=== run started {} : {} ===\n", now(), argv.join(" ")));
    }

    pub fn run_finished(&self, exit_code: i32) {
        self.write(&format!("=== run finished {} exit={} ===\n\n", now(), exit_code));
    }

    pub fn record_error(&self, error: &str) {
        self.write(&format!("[{}] error: {}\n", now(), error));
    }

    pub fn record_exec(&self, pod: &PodTarget, command: &str, result: &ExecResult) {
        let mut entry = format!(
            "[{}] {} $ {}\n[exit {} in {:.1}s]\n",
            now(),
            pod,
            command,
            result.exit_code,
            result.duration.as_secs_f64()
        );
        append_stream(&mut entry, "stdout", &result.stdout);
        append_stream(&mut entry, "stderr", &result.stderr);
        self.write(&entry);
    }

    /// Paged output goes to the terminal only; the entry keeps status and stderr.
    pub fn record_paged(&self, pod: &PodTarget, command: &str, result: &PagedResult) {
        let mut entry = format!(
            "[{}] {} $ {} (streamed to pager{})\n[exit {} in {:.1}s]\n",
            now(),
            pod,
            command,
            if result.truncated { ", closed early" } else { "" },
            result.exit_code,
            result.duration.as_secs_f64()
        );
        append_stream(&mut entry, "stderr", &result.stderr);
        self.write(&entry);
    }

    pub fn record_attached(&self, pod: &PodTarget, command: &str, exit_code: i32) {
        self.write(&format!(
            "[{}] {} $ {} (attached session)\n[exit {}]\n",
            now(),
            pod,
            command,
            exit_code
        ));
    }

    pub fn record_output(&self, pod: &PodTarget, title: &str, text: &str) {
        let mut entry = format!("[{}] {} {}\n", now(), pod, title);
        append_stream(&mut entry, "output", text);
        self.write(&entry);
    }

    pub fn record_result(&self, result: &ExecutionResult) {
        self.write(&format!(
            "[{}] result {} {} exit={}: {}\n",
            now(),
            result.target,
            result.outcome,
            result.exit_code,
            result.message
        ));
    }

    fn write(&self, text: &str) {
        if let Some(mut file) = self.file.as_ref() {
            if let Err(e) = file.write_all(text.as_bytes()) {
                tracing::warn!(error = %e, "failed to write run log");
            }
        }
    }
}

fn append_stream(entry: &mut String, label: &str, text: &str) {
    if text.is_empty() {
        return;
    }
    entry.push_str(&format!("--- {label} ---\n"));
    entry.push_str(text);
    if !text.ends_with('\n') {
        entry.push('\n');
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
