//! # squad-agent
//!
//! Agent and message coordination for agentsquad.
//!
//! - Spawn agents bound to a configured provider, oneshot or detached
//! - Resolve agents by id or name, reconcile them with their pid files
//! - Queue messages, deliver them through the provider, record outcomes
//! - Kick off an objective by briefing a manager agent
//!
//! All state goes through `squad-store`; the [`Coordinator`] itself is a
//! thin handle that can be rebuilt per command.

pub mod agents;
mod coordinator;
pub mod messages;
pub mod orchestrator;
pub mod process;
pub mod provider;

pub use agents::{
    follow_log, parse_env_entries, AgentDetails, LogStream, SpawnAgent, StopReport,
};
pub use coordinator::Coordinator;
pub use messages::{summarize_delivery_failure, SendMessage, SendReport};
pub use orchestrator::{build_manager_prompt, Objective, ObjectiveReport};
pub use process::{Invocation, OneshotRun, StopOutcome};
pub use provider::{
    format_payload, provider_statuses, Delivery, DeliveryRequest, GenericCliProvider, Provider,
    ProviderRegistry, ProviderStatus,
};
