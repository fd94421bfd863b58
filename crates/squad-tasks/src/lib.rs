//! # squad-tasks
//!
//! The task engine: creation, dependency bookkeeping, the status state
//! machine and the validator-gated finalization protocol.
//!
//! ## Lifecycle
//!
//! ```text
//! todo ──► ready ──► in_progress ──► in_review ──► done
//!   │        ▲            ▲              │
//!   ▼        │            └── reopened ◄─┘ (validator blocked/failed)
//! waiting ───┘
//! ```
//!
//! A `blocks` edge is satisfied when the upstream task is `done`, or, for
//! `testing`/`review` tasks, already `in_review`. Implementation work only
//! becomes `done` once every validator blocking on it is `done`.
//!
//! Waits are polling loops over the session log with an optional deadline
//! (see [`WaitOptions`]).

mod context;
pub mod engine;
pub mod graph;
pub mod model;
pub mod wait;

pub use engine::TaskEngine;
pub use model::{
    AgentSummary, AssignTask, AvailableAgent, CurrentTask, DependencySpec, DependencyView,
    Feedback, FinalizationOutcome, FinalizeResult, NewTask, StatusUpdate, TaskContext, TaskView,
    WaitState,
};
pub use wait::{resolve_poll_interval, WaitOptions};
