use crate::provider::{Provider, ProviderRegistry};
use squad_core::SquadConfig;
use squad_store::{ActivityReporter, Journal, RecordStore, Workspace};
use squad_tasks::TaskEngine;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Entry point for agent and message operations on one project.
///
/// Holds no session state of its own; every call re-reads the log.
#[derive(Clone)]
pub struct Coordinator {
    config: Arc<SquadConfig>,
    providers: ProviderRegistry,
    engine: TaskEngine,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("root", &self.workspace().project_root())
            .field("providers", &self.providers)
            .finish()
    }
}

impl Coordinator {
    pub fn new(root: impl Into<PathBuf>, config: SquadConfig) -> Self {
        let store = RecordStore::new(Workspace::new(root));
        let providers = ProviderRegistry::from_config(&config);
        Self {
            config: Arc::new(config),
            providers,
            engine: TaskEngine::new(Journal::new(store)),
        }
    }

    /// Forward every activity line to `reporter` as it is written.
    pub fn with_reporter(mut self, reporter: Arc<dyn ActivityReporter>) -> Self {
        let journal = self.engine.journal().clone().with_reporter(reporter);
        self.engine = TaskEngine::new(journal);
        self
    }

    /// Serve a provider id with a custom implementation.
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.register(provider);
        self
    }

    pub fn config(&self) -> &SquadConfig {
        &self.config
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn engine(&self) -> &TaskEngine {
        &self.engine
    }

    pub fn journal(&self) -> &Journal {
        self.engine.journal()
    }

    pub fn store(&self) -> &RecordStore {
        self.journal().store()
    }

    pub fn workspace(&self) -> &Workspace {
        self.store().workspace()
    }
}
