//! dagflow: dependency-graph workflow engine
//!
//! Nodes (tasks, conditions, loops, waits and parallel sub-workflows) run
//! once their dependencies resolve, ordered by a pluggable scheduling policy
//! and bounded by a parallelism cap and a CPU/memory/IO budget. Failed nodes
//! retry with exponential backoff; a final failure on the critical path
//! aborts the run.

pub mod cli;
pub mod config;
pub mod history;
pub mod logging;
pub mod process;
pub mod template;
pub mod workflow;
