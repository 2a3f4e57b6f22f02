//! # Pipeline
//!
//! The per-module state machine and everything it threads between steps.
//!
//! - `steps` - step identifiers, canonical order and typed arguments
//! - `coordinator` - the orchestrator that runs a batch
//! - `report` - per-module outcomes, pull requests and test rows
//! - `events` - progress events for front-ends

pub mod coordinator;
pub mod events;
pub mod report;
pub mod steps;

pub use coordinator::Orchestrator;
pub use events::{SyncEvent, SyncEventKind};
pub use report::{ModuleOutcome, RunOutcome, RunReport, StepRecord, StepStatus, TestRow};
pub use steps::{ModuleArgs, RunArgs, Step, StepSet};
