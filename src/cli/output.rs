//! Output handlers for CLI commands
//!
//! Every handler is an [`EventSink`], so the engine drives it directly with
//! lifecycle events while a run progresses.

use crate::workflow::{EventKind, EventSink, LifecycleEvent, NodeState, RunReport};
use serde::Serialize;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Output mode for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputMode {
    #[default]
    Console,
    Json,
    Quiet,
}

/// Output handler: a lifecycle sink plus the final report
pub trait OutputHandler: EventSink {
    /// Informational line outside the event stream
    fn info(&self, message: &str);

    /// Write the final result of a run
    fn report(&self, report: &RunReport);
}

fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

/// Human-readable progress on stderr
pub struct ConsoleHandler {
    debug: bool,
}

impl ConsoleHandler {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    fn line(event: &LifecycleEvent) -> Option<String> {
        let node = event.node_id.as_deref().unwrap_or("-");
        let took = event
            .duration_ms
            .map(|ms| format!(" ({})", format_duration(ms)))
            .unwrap_or_default();
        let error = event.error.as_deref().unwrap_or("unknown error");

        let line = match event.kind {
            EventKind::WorkflowStarted => format!("Running {}", event.run_id),
            EventKind::NodeStarted => match event.attempt {
                Some(attempt) if attempt > 1 => format!("  → {node} (attempt {attempt})"),
                _ => format!("  → {node}"),
            },
            EventKind::NodeCompleted => format!("  ✓ {node}{took}"),
            EventKind::NodeFailed => format!("  ✗ {node}{took}: {error}"),
            EventKind::NodeRetryScheduled => {
                let delay = event.retry_in_ms.map(format_duration).unwrap_or_default();
                format!("  ↻ {node} failed ({error}), retrying in {delay}")
            }
            EventKind::WorkflowCompleted
            | EventKind::WorkflowFailed
            | EventKind::WorkflowCancelled => return None,
        };
        Some(line)
    }
}

impl EventSink for ConsoleHandler {
    fn emit(&self, event: &LifecycleEvent) {
        if event.kind == EventKind::NodeStarted && !self.debug {
            return;
        }
        if let Some(line) = Self::line(event) {
            eprintln!("{line}");
        }
    }
}

impl OutputHandler for ConsoleHandler {
    fn info(&self, message: &str) {
        eprintln!("{message}");
    }

    fn report(&self, report: &RunReport) {
        let stats = &report.stats;
        let took = format_duration(report.duration_ms);
        eprintln!();
        if report.is_success() {
            eprintln!(
                "✓ Workflow '{}' completed ({} nodes in {took})",
                report.workflow, stats.completed
            );
        } else if report.is_partial() {
            eprintln!(
                "⚠ Workflow '{}' completed with {} failed node(s) ({took})",
                report.workflow, stats.failed
            );
        } else {
            let reason = report
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "cancelled".to_string());
            eprintln!("✗ Workflow '{}' {}: {reason}", report.workflow, report.state);
        }

        for node in report.nodes.iter().filter(|n| n.state == NodeState::Skipped) {
            if let Some(reason) = node.skip_reason {
                eprintln!("  - {} skipped ({})", node.id, reason);
            }
        }
    }
}

/// One JSON object per line on stdout
pub struct JsonHandler {
    // Serializes writers so concurrent lines never interleave
    out: Mutex<io::Stdout>,
}

impl JsonHandler {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(io::stdout()),
        }
    }

    fn print_json<T: Serialize>(&self, value: &T) {
        let Ok(line) = serde_json::to_string(value) else {
            return;
        };
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{line}");
        }
    }
}

impl Default for JsonHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for JsonHandler {
    fn emit(&self, event: &LifecycleEvent) {
        self.print_json(event);
    }
}

impl OutputHandler for JsonHandler {
    fn info(&self, message: &str) {
        #[derive(Serialize)]
        struct Info<'a> {
            event: &'static str,
            message: &'a str,
        }
        self.print_json(&Info {
            event: "info",
            message,
        });
    }

    fn report(&self, report: &RunReport) {
        #[derive(Serialize)]
        struct FinalReport<'a> {
            event: &'static str,
            success: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            error: Option<String>,
            #[serde(flatten)]
            report: &'a RunReport,
        }
        self.print_json(&FinalReport {
            event: "report",
            success: report.is_success(),
            error: report.error.as_ref().map(|e| e.to_string()),
            report,
        });
    }
}

/// Emits nothing; the exit code carries the outcome
pub struct QuietHandler;

impl EventSink for QuietHandler {
    fn emit(&self, _event: &LifecycleEvent) {}
}

impl OutputHandler for QuietHandler {
    fn info(&self, _message: &str) {}
    fn report(&self, _report: &RunReport) {}
}

/// Create an output handler based on mode
pub fn create_handler(mode: OutputMode, debug: bool) -> Arc<dyn OutputHandler> {
    match mode {
        OutputMode::Console => Arc::new(ConsoleHandler::new(debug)),
        OutputMode::Json => Arc::new(JsonHandler::new()),
        OutputMode::Quiet => Arc::new(QuietHandler),
    }
}
