//! Configuration types and loading for dagflow

mod loader;
mod workflow;

pub use loader::{Defaults, EngineConfig, HistoryConfig};
pub use workflow::{
    ConditionSection, LoopSection, NodeFile, ParallelSection, TaskSection, WaitSection,
    WorkflowFile,
};
