//! Caller identity passed explicitly into engine calls.
//!
//! Agents learn who they are through environment variables set when their
//! provider process is launched. Only the process boundary reads them, once,
//! through [`CallerContext::from_env`]; everything below takes the resolved
//! context as a parameter.

use crate::{Result, SquadError};

pub const AGENT_ID_ENV: &str = "AGENTSQUAD_AGENT_ID";
pub const SESSION_ID_ENV: &str = "AGENTSQUAD_SESSION_ID";
pub const AGENT_ROLE_ENV: &str = "AGENTSQUAD_AGENT_ROLE";
pub const TASK_ID_ENV: &str = "AGENTSQUAD_TASK_ID";
pub const WORKSPACE_ROOT_ENV: &str = "AGENTSQUAD_WORKSPACE_ROOT";

/// Where the caller's agent identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// Passed as a parameter (an operator naming an agent)
    Explicit,
    /// Read from the agent environment (the agent asking about itself)
    Environment,
    /// No agent identity at all
    Anonymous,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    pub agent_id: Option<String>,
    pub session_id: String,
    pub source: IdentitySource,
}

impl CallerContext {
    /// Human operator acting on a session.
    pub fn operator(session_id: impl Into<String>) -> Self {
        Self {
            agent_id: None,
            session_id: session_id.into(),
            source: IdentitySource::Anonymous,
        }
    }

    /// Caller that named an agent explicitly.
    pub fn agent(agent_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            session_id: session_id.into(),
            source: IdentitySource::Explicit,
        }
    }

    /// Resolve a context from explicit values, falling back to `lookup`.
    ///
    /// Explicit values always win. The session falls back to the
    /// session variable, then to `default_session`.
    pub fn resolve<F>(
        explicit_agent: Option<String>,
        explicit_session: Option<String>,
        default_session: &str,
        lookup: F,
    ) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        let (agent_id, source) = match non_empty(explicit_agent) {
            Some(agent) => (Some(agent), IdentitySource::Explicit),
            None => match non_empty(lookup(AGENT_ID_ENV)) {
                Some(agent) => (Some(agent), IdentitySource::Environment),
                None => (None, IdentitySource::Anonymous),
            },
        };

        let session_id = non_empty(explicit_session)
            .or_else(|| non_empty(lookup(SESSION_ID_ENV)))
            .unwrap_or_else(|| default_session.to_string());

        Self {
            agent_id,
            session_id,
            source,
        }
    }

    /// [`CallerContext::resolve`] against the process environment.
    pub fn from_env(
        explicit_agent: Option<String>,
        explicit_session: Option<String>,
        default_session: &str,
    ) -> Self {
        Self::resolve(explicit_agent, explicit_session, default_session, |key| {
            std::env::var(key).ok()
        })
    }

    /// The caller's agent id, or `AGENT_ID_REQUIRED`.
    pub fn require_agent(&self) -> Result<&str> {
        self.agent_id.as_deref().ok_or(SquadError::AgentIdRequired)
    }

    /// Whether a blocking call should wait.
    ///
    /// An explicit choice wins. Otherwise agents resolving themselves from
    /// their environment wait, and operators naming an agent do not.
    pub fn resolve_wait(&self, explicit: Option<bool>) -> bool {
        explicit.unwrap_or(self.source == IdentitySource::Environment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_explicit_agent_wins_over_env() {
        let ctx = CallerContext::resolve(
            Some("agent-max-dev".into()),
            None,
            "default",
            env(&[(AGENT_ID_ENV, "agent-leo-tester")]),
        );
        assert_eq!(ctx.agent_id.as_deref(), Some("agent-max-dev"));
        assert_eq!(ctx.source, IdentitySource::Explicit);
        assert!(!ctx.resolve_wait(None));
    }

    #[test]
    fn test_env_identity_waits_by_default() {
        let ctx = CallerContext::resolve(
            None,
            None,
            "default",
            env(&[(AGENT_ID_ENV, "agent-leo-tester"), (SESSION_ID_ENV, "s1")]),
        );
        assert_eq!(ctx.agent_id.as_deref(), Some("agent-leo-tester"));
        assert_eq!(ctx.session_id, "s1");
        assert!(ctx.resolve_wait(None));
        assert!(!ctx.resolve_wait(Some(false)));
    }

    #[test]
    fn test_anonymous_requires_agent() {
        let ctx = CallerContext::resolve(None, Some("s2".into()), "default", env(&[]));
        assert_eq!(ctx.session_id, "s2");
        assert_eq!(ctx.source, IdentitySource::Anonymous);
        assert_eq!(ctx.require_agent().unwrap_err().code(), "AGENT_ID_REQUIRED");
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let ctx = CallerContext::resolve(
            Some("  ".into()),
            Some(String::new()),
            "main",
            env(&[(AGENT_ID_ENV, "")]),
        );
        assert!(ctx.agent_id.is_none());
        assert_eq!(ctx.session_id, "main");
    }
}
