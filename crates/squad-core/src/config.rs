//! Configuration management for agentsquad
//!
//! Repository-level settings live in `.agentsquad/config.toml`: the default
//! session, which provider bootstraps an objective, polling defaults for the
//! blocking waits, and the table of providers agents can be spawned with.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::types::ProviderMode;
use crate::{Result, SquadError};

/// Directory holding configuration and session logs, relative to the project root.
pub const WORKSPACE_DIR: &str = ".agentsquad";

/// Configuration file name inside [`WORKSPACE_DIR`].
pub const CONFIG_FILE: &str = "config.toml";

/// Repository-level configuration
///
/// Loaded from `.agentsquad/config.toml` in the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadConfig {
    /// Session used when none is given explicitly
    #[serde(default = "default_session")]
    pub default_session: String,

    /// Objective bootstrap settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Polling defaults for blocking waits
    #[serde(default)]
    pub tasks: TaskDefaults,

    /// Providers keyed by id
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Provider used for the manager agent
    #[serde(default = "default_orchestrator_provider")]
    pub provider: String,

    /// Role given to the manager agent
    #[serde(default = "default_manager_role")]
    pub manager_role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefaults {
    /// Interval between polls while waiting on dependencies or validators
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Give up waiting after this many seconds; unset waits forever
    #[serde(default)]
    pub wait_timeout_secs: Option<u64>,
}

/// How the message payload reaches the provider process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Args,
    #[default]
    Stdin,
    File,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Args => write!(f, "args"),
            Transport::Stdin => write!(f, "stdin"),
            Transport::File => write!(f, "file"),
        }
    }
}

/// Where provider processes run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkingDirectoryMode {
    /// Use the agent's workdir
    #[default]
    Inherit,
    /// Use the provider's `cwd`
    Fixed,
}

/// Invocation settings for one provider binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub mode: ProviderMode,

    #[serde(default)]
    pub transport: Transport,

    /// Flag placed before the payload for the `args` transport
    #[serde(default)]
    pub prompt_flag: Option<String>,

    /// Flag placed before the payload path for the `file` transport
    #[serde(default)]
    pub message_file_flag: Option<String>,

    #[serde(default)]
    pub working_directory_mode: WorkingDirectoryMode,

    #[serde(default)]
    pub cwd: Option<PathBuf>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub profiles: BTreeMap<String, ProviderProfile>,
}

/// Named overlay applied on top of a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProviderProfile {
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl ProviderConfig {
    /// Plain oneshot provider running `command args...`.
    pub fn oneshot(command: impl Into<String>, args: Vec<String>, transport: Transport) -> Self {
        Self {
            command: command.into(),
            args,
            mode: ProviderMode::Oneshot,
            transport,
            prompt_flag: None,
            message_file_flag: None,
            working_directory_mode: WorkingDirectoryMode::Inherit,
            cwd: None,
            env: BTreeMap::new(),
            profiles: BTreeMap::new(),
        }
    }

    /// The launch line recorded on the agent (`command arg1 arg2`).
    pub fn launch_command(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// Default value providers
fn default_session() -> String {
    "default".to_string()
}

fn default_orchestrator_provider() -> String {
    "codex".to_string()
}

fn default_manager_role() -> String {
    "planner".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1500
}

fn default_providers() -> BTreeMap<String, ProviderConfig> {
    let mut providers = BTreeMap::new();
    providers.insert(
        "codex".to_string(),
        ProviderConfig::oneshot("codex", vec!["exec".to_string()], Transport::Args),
    );
    providers.insert(
        "generic".to_string(),
        ProviderConfig::oneshot("cat", vec![], Transport::Stdin),
    );
    providers
}

impl SquadConfig {
    /// Path of the configuration file under `root`.
    pub fn path(root: &Path) -> PathBuf {
        root.join(WORKSPACE_DIR).join(CONFIG_FILE)
    }

    /// Load configuration from `.agentsquad/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = Self::path(root);

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content).map_err(|e| {
                SquadError::Config(format!(
                    "Failed to parse {}: {}",
                    config_path.display(),
                    e
                ))
            })?
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Write default configuration to `.agentsquad/config.toml`
    ///
    /// An existing file is left untouched. Returns the config file path.
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        let config_dir = root.join(WORKSPACE_DIR);
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            return Ok(config_path);
        }

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| SquadError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Reject configurations no provider could be launched from.
    pub fn validate(&self) -> Result<()> {
        if self.default_session.trim().is_empty() {
            return Err(SquadError::Config("default_session must not be empty".to_string()));
        }

        for (id, provider) in &self.providers {
            if provider.command.trim().is_empty() {
                return Err(SquadError::Config(format!(
                    "provider \"{}\" has an empty command",
                    id
                )));
            }
        }
        Ok(())
    }

    /// Provider settings with `profile` merged in.
    ///
    /// Profile args are appended to the provider args, profile env wins over
    /// provider env, and a profile `cwd` replaces the provider one.
    pub fn resolve_provider(&self, provider_id: &str, profile: Option<&str>) -> Result<ProviderConfig> {
        let provider = self
            .providers
            .get(provider_id)
            .ok_or_else(|| SquadError::ProviderUnknown(provider_id.to_string()))?;

        let mut merged = provider.clone();
        merged.profiles.clear();

        if let Some(name) = profile {
            let overlay = provider.profiles.get(name).ok_or_else(|| SquadError::ProfileUnknown {
                provider: provider_id.to_string(),
                profile: name.to_string(),
            })?;
            merged.args.extend(overlay.args.iter().cloned());
            merged
                .env
                .extend(overlay.env.iter().map(|(k, v)| (k.clone(), v.clone())));
            if overlay.cwd.is_some() {
                merged.cwd = overlay.cwd.clone();
            }
        }

        Ok(merged)
    }
}

impl Default for SquadConfig {
    fn default() -> Self {
        Self {
            default_session: default_session(),
            orchestrator: OrchestratorConfig::default(),
            tasks: TaskDefaults::default(),
            providers: default_providers(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            provider: default_orchestrator_provider(),
            manager_role: default_manager_role(),
        }
    }
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            wait_timeout_secs: None,
        }
    }
}
