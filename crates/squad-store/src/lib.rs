//! Squad Store - the durable coordination medium for agentsquad
//!
//! Every command is a separate short-lived process, so nothing is shared in
//! memory. All state lives in per-session JSONL files under
//! `.agentsquad/sessions/<session>/`:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ .agentsquad/sessions/<session>/                          │
//! │   session.jsonl  agents.jsonl  tasks.jsonl   (snapshot)  │
//! │   messages.jsonl agent-runs.jsonl artifacts.jsonl        │
//! │   task-dependencies.jsonl task-status-history.jsonl      │
//! │   activity-logs.jsonl                        (record)    │
//! │   events.jsonl                               (journal)   │
//! │   agents/<agent>/ stdout.log stderr.log inbox.jsonl ...  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Snapshot collections are an event-sourced log folded to the latest record
//! per id on read. Record collections are returned as appended. Each append
//! is a single `O_APPEND` write of one line; there is no multi-record
//! transaction, and two writers updating the same id concurrently lose one
//! update (last write wins). [`SessionLock`] offers cooperative mutual
//! exclusion for the few check-then-write sequences that need it.

pub mod journal;
pub mod jsonl;
pub mod layout;
pub mod store;

pub use journal::{ActivityEntry, ActivityReporter, Journal};
pub use layout::{AgentPaths, Workspace};
pub use store::{
    project_latest_by_id, CompactStats, RecordCollection, RecordStore, SessionLock,
    SnapshotCollection,
};
