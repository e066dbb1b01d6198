//! CLI module for dagflow
//!
//! This module provides:
//! - Command implementations (run, validate, history)
//! - Output handlers (console, JSON, quiet) that consume lifecycle events
//! - Signal handling that turns SIGINT/SIGTERM into run cancellation

pub mod commands;
pub mod output;
pub mod signals;

pub use commands::{RunArgs, parse_assignment, run_workflow, show_history, validate_workflow};
pub use output::{OutputHandler, OutputMode, create_handler};
