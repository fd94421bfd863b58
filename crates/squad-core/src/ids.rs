//! Short random identifiers (`task-1a2b3c4d`).

use uuid::Uuid;

pub const TASK: &str = "task";
pub const TASK_DEPENDENCY: &str = "taskdep";
pub const TASK_STATUS: &str = "taskstatus";
pub const MESSAGE: &str = "msg";
pub const EVENT: &str = "evt";
pub const ACTIVITY: &str = "log";
pub const AGENT_RUN: &str = "run";
pub const DELIVERY: &str = "delivery";

/// `<prefix>-<first 8 hex digits of a v4 uuid>`
pub fn new_id(prefix: &str) -> String {
    let uuid = Uuid::new_v4().to_string();
    format!("{}-{}", prefix, &uuid[..8])
}
