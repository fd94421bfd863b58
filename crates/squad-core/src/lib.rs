//! # squad-core
//!
//! Core types for the agentsquad coordination system.
//!
//! Agents are independently invoked worker processes. Every invocation is
//! short-lived and shares nothing in memory with its siblings: the only
//! coordination medium is the durable session log kept by `squad-store`.
//! This crate holds the vocabulary those invocations share:
//!
//! - Records persisted to the log (sessions, agents, tasks, messages, ...)
//! - The error enum with machine-readable codes
//! - Caller context resolved once at the process boundary
//! - Repository configuration (`.agentsquad/config.toml`)

pub mod config;
pub mod context;
mod error;
pub mod fail_open;
pub mod ids;
pub mod naming;
mod types;

pub use config::{
    OrchestratorConfig, ProviderConfig, ProviderProfile, SquadConfig, TaskDefaults, Transport,
    WorkingDirectoryMode, CONFIG_FILE, WORKSPACE_DIR,
};
pub use context::{CallerContext, IdentitySource};
pub use error::{Result, SquadError};
pub use types::*;
