//! Provider abstraction (allows mocking in tests)
//!
//! A provider turns an agent plus a message into a process invocation. The
//! stock [`GenericCliProvider`] covers any command-line tool described in
//! the configuration; tests register their own implementations.

use crate::process::{self, Invocation};
use async_trait::async_trait;
use serde::Serialize;
use squad_core::context::{
    AGENT_ID_ENV, AGENT_ROLE_ENV, SESSION_ID_ENV, TASK_ID_ENV, WORKSPACE_ROOT_ENV,
};
use squad_core::fail_open::fail_open;
use squad_core::{
    Agent, DeliveryOutcome, Message, ProviderConfig, ProviderMode, Result, SquadConfig, SquadError,
    Transport, WorkingDirectoryMode,
};
use squad_store::AgentPaths;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Everything a provider needs to hand one message to one agent.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryRequest<'a> {
    pub agent: &'a Agent,
    pub config: &'a ProviderConfig,
    pub message: &'a Message,
    pub paths: &'a AgentPaths,
    pub workspace_root: &'a Path,
}

/// Outcome of a delivery plus the output lines it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub outcome: DeliveryOutcome,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Key under `[providers]` this implementation serves.
    fn id(&self) -> &str;

    /// Command line a detached agent is started with.
    fn launch(&self, agent: &Agent, config: &ProviderConfig, workspace_root: &Path) -> Invocation;

    /// Hand `request.message` to the agent.
    ///
    /// A provider process that runs and fails is a failed [`Delivery`], not an error.
    async fn deliver(&self, request: DeliveryRequest<'_>) -> Result<Delivery>;
}

/// Runs the configured command once per message.
#[derive(Debug, Clone)]
pub struct GenericCliProvider {
    id: String,
}

impl GenericCliProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl Provider for GenericCliProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn launch(&self, agent: &Agent, config: &ProviderConfig, workspace_root: &Path) -> Invocation {
        Invocation {
            command: config.command.clone(),
            args: config.args.clone(),
            cwd: resolve_cwd(agent, config, workspace_root),
            env: child_env(agent, config, workspace_root),
            stdin: None,
        }
    }

    #[instrument(skip(self, request), fields(provider = %self.id, message = %request.message.id))]
    async fn deliver(&self, request: DeliveryRequest<'_>) -> Result<Delivery> {
        let payload = format_payload(request.message);
        let mut invocation = self.launch(request.agent, request.config, request.workspace_root);

        match request.config.transport {
            Transport::Args => {
                invocation.args.extend(request.config.prompt_flag.iter().cloned());
                invocation.args.push(payload);
            }
            Transport::File => {
                let path = request.paths.payload_path(&request.message.id);
                tokio::fs::write(&path, &payload).await?;
                match &request.config.message_file_flag {
                    Some(flag) => {
                        invocation.args.push(flag.clone());
                        invocation.args.push(path.display().to_string());
                    }
                    None => invocation.args.push(payload),
                }
            }
            Transport::Stdin => invocation.stdin = Some(payload),
        }

        debug!("Delivering via {} {:?}", invocation.command, request.config.transport);
        let transport = request.config.transport;
        let run = process::run_oneshot(&invocation, &request.paths.stdout, &request.paths.stderr).await;
        if transport == Transport::File {
            let path = request.paths.payload_path(&request.message.id);
            fail_open("payload cleanup", || async move {
                tokio::fs::remove_file(&path).await?;
                Ok(())
            })
            .await;
        }
        match run {
            Ok(run) => Ok(Delivery {
                outcome: DeliveryOutcome {
                    ok: run.code == Some(0),
                    code: run.code,
                    signal: run.signal,
                    transport,
                },
                stdout_lines: run.stdout_lines,
                stderr_lines: run.stderr_lines,
            }),
            Err(SquadError::Process(reason)) => {
                warn!("{}", reason);
                Ok(Delivery {
                    outcome: DeliveryOutcome {
                        ok: false,
                        code: None,
                        signal: None,
                        transport,
                    },
                    stdout_lines: Vec::new(),
                    stderr_lines: vec![reason],
                })
            }
            Err(e) => Err(e),
        }
    }
}

/// Text handed to the provider for one message.
pub fn format_payload(message: &Message) -> String {
    format!(
        "[message]\nid: {}\nfrom: {}\nto: {}\nsession: {}\n\n{}\n",
        message.id,
        message.from.as_deref().unwrap_or("user"),
        message.to,
        message.session_id,
        message.text
    )
}

/// Working directory for the agent's provider processes.
///
/// A fixed provider `cwd` wins; a relative one is taken from the project root.
pub fn resolve_cwd(agent: &Agent, config: &ProviderConfig, workspace_root: &Path) -> PathBuf {
    match (&config.working_directory_mode, &config.cwd) {
        (WorkingDirectoryMode::Fixed, Some(cwd)) if cwd.is_absolute() => cwd.clone(),
        (WorkingDirectoryMode::Fixed, Some(cwd)) => workspace_root.join(cwd),
        _ => agent.workdir.clone(),
    }
}

/// Variables layered over the inherited environment.
///
/// Provider env, then agent env, then the agent's identity.
pub fn child_env(agent: &Agent, config: &ProviderConfig, workspace_root: &Path) -> BTreeMap<String, String> {
    let mut env = config.env.clone();
    env.extend(agent.env.iter().map(|(k, v)| (k.clone(), v.clone())));

    let root = agent
        .env
        .get(WORKSPACE_ROOT_ENV)
        .cloned()
        .unwrap_or_else(|| workspace_root.display().to_string());

    env.insert(AGENT_ID_ENV.to_string(), agent.id.clone());
    env.insert(SESSION_ID_ENV.to_string(), agent.session_id.clone());
    env.insert(AGENT_ROLE_ENV.to_string(), agent.role.clone());
    env.insert(
        TASK_ID_ENV.to_string(),
        agent.current_task_id.clone().unwrap_or_default(),
    );
    env.insert(WORKSPACE_ROOT_ENV.to_string(), root);
    env
}

/// Provider implementations keyed by id.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRegistry {
    /// A [`GenericCliProvider`] for every configured provider.
    pub fn from_config(config: &SquadConfig) -> Self {
        let mut registry = Self::default();
        for id in config.providers.keys() {
            registry.register(Arc::new(GenericCliProvider::new(id.clone())));
        }
        registry
    }

    /// Add or replace the implementation for `provider.id()`.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn get(&self, provider_id: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .get(provider_id)
            .cloned()
            .ok_or_else(|| SquadError::ProviderUnknown(provider_id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}

/// One row of `provider list`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProviderStatus {
    pub id: String,
    pub command: String,
    pub mode: ProviderMode,
    pub transport: Transport,
    pub available: bool,
}

/// Configured providers and whether their command resolves on `PATH`.
pub fn provider_statuses(config: &SquadConfig) -> Vec<ProviderStatus> {
    config
        .providers
        .iter()
        .map(|(id, provider)| ProviderStatus {
            id: id.clone(),
            command: provider.command.clone(),
            mode: provider.mode,
            transport: provider.transport,
            available: which::which(&provider.command).is_ok(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use squad_core::{AgentKind, AgentStatus, DeliveryStatus, MessageKind, SenderType};
    use squad_store::Workspace;
    use tempfile::TempDir;

    fn agent(workdir: &Path) -> Agent {
        let now = Utc::now();
        Agent {
            id: "agent-max-dev".to_string(),
            name: "max".to_string(),
            role: "dev".to_string(),
            kind: AgentKind::Worker,
            provider_id: "generic".to_string(),
            profile: None,
            session_id: "default".to_string(),
            workdir: workdir.to_path_buf(),
            goal: "ship".to_string(),
            status: AgentStatus::Idle,
            mode: ProviderMode::Oneshot,
            current_task_id: Some("task-1".to_string()),
            parent_agent_id: None,
            created_by_agent_id: None,
            env: BTreeMap::new(),
            system_prompt: None,
            launch_command: None,
            pid: None,
            last_heartbeat_at: None,
            archived_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn message(text: &str) -> Message {
        Message {
            id: "msg-1".to_string(),
            session_id: "default".to_string(),
            thread_id: None,
            from: None,
            from_type: SenderType::User,
            to: "agent-max-dev".to_string(),
            message_kind: MessageKind::Instruction,
            text: text.to_string(),
            delivery_status: DeliveryStatus::Queued,
            related_task_id: None,
            reply_to_message_id: None,
            delivery: None,
            created_at: Utc::now(),
            delivered_at: None,
            read_at: None,
        }
    }

    #[test]
    fn test_payload_format() {
        assert_eq!(
            format_payload(&message("build it")),
            "[message]\nid: msg-1\nfrom: user\nto: agent-max-dev\nsession: default\n\nbuild it\n"
        );
    }

    #[test]
    fn test_env_layering() {
        let temp = TempDir::new().unwrap();
        let mut agent = agent(temp.path());
        agent.env.insert("SHARED".into(), "agent".into());
        let mut config = ProviderConfig::oneshot("cat", vec![], Transport::Stdin);
        config.env.insert("SHARED".into(), "provider".into());
        config.env.insert("ONLY_PROVIDER".into(), "1".into());

        let env = child_env(&agent, &config, Path::new("/proj"));
        assert_eq!(env["SHARED"], "agent");
        assert_eq!(env["ONLY_PROVIDER"], "1");
        assert_eq!(env[AGENT_ID_ENV], "agent-max-dev");
        assert_eq!(env[AGENT_ROLE_ENV], "dev");
        assert_eq!(env[TASK_ID_ENV], "task-1");
        assert_eq!(env[WORKSPACE_ROOT_ENV], "/proj");
    }

    #[test]
    fn test_fixed_cwd() {
        let agent = agent(Path::new("/work"));
        let mut config = ProviderConfig::oneshot("cat", vec![], Transport::Stdin);
        assert_eq!(resolve_cwd(&agent, &config, Path::new("/proj")), PathBuf::from("/work"));

        config.working_directory_mode = WorkingDirectoryMode::Fixed;
        config.cwd = Some(PathBuf::from("sandbox"));
        assert_eq!(
            resolve_cwd(&agent, &config, Path::new("/proj")),
            PathBuf::from("/proj/sandbox")
        );
    }

    #[test]
    fn test_registry_unknown_provider() {
        let registry = ProviderRegistry::from_config(&SquadConfig::default());
        assert!(registry.get("generic").is_ok());
        let err = registry.get("gemini").err().unwrap();
        assert_eq!(err.code(), "PROVIDER_UNKNOWN");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_transports() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        let paths = ws.ensure_agent("default", "agent-max-dev").await.unwrap();
        let agent = agent(temp.path());
        let message = message("hello");
        let provider = GenericCliProvider::new("generic");

        let deliver = |config: ProviderConfig| {
            let provider = provider.clone();
            let agent = agent.clone();
            let message = message.clone();
            let paths = paths.clone();
            let root = temp.path().to_path_buf();
            async move {
                provider
                    .deliver(DeliveryRequest {
                        agent: &agent,
                        config: &config,
                        message: &message,
                        paths: &paths,
                        workspace_root: &root,
                    })
                    .await
                    .unwrap()
            }
        };

        let stdin = deliver(ProviderConfig::oneshot("cat", vec![], Transport::Stdin)).await;
        assert!(stdin.outcome.ok);
        assert_eq!(stdin.stdout_lines.last().map(String::as_str), Some("hello"));

        let mut args = ProviderConfig::oneshot("echo", vec![], Transport::Args);
        args.prompt_flag = Some("-n".to_string());
        let args = deliver(args).await;
        assert_eq!(args.outcome.transport, Transport::Args);
        assert!(args.stdout_lines[0].starts_with("[message]"));

        let mut file = ProviderConfig::oneshot("cat", vec![], Transport::File);
        file.message_file_flag = Some("--".to_string());
        let file = deliver(file).await;
        assert!(file.outcome.ok);
        assert!(!paths.payload_path("msg-1").exists());
        assert_eq!(file.stdout_lines[1], "id: msg-1");

        let failing = deliver(ProviderConfig::oneshot("false", vec![], Transport::Stdin)).await;
        assert!(!failing.outcome.ok);
        assert_eq!(failing.outcome.code, Some(1));

        let missing = deliver(ProviderConfig::oneshot("agentsquad-missing-cli", vec![], Transport::Stdin)).await;
        assert!(!missing.outcome.ok);
        assert_eq!(missing.outcome.code, None);
        assert!(missing.stderr_lines[0].contains("agentsquad-missing-cli"));
    }
}
