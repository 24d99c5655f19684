// Shared fixture for integration tests: an in-memory registry with a
// recording method catalog and per-test scratch space. Tests swap in the
// orchestrator they need; registries are cheap to build over the same store.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use module_registry::{
    AuthContext, BuildOrchestrator, InMemoryStore, Module, ModuleSelector, NoopMethodCatalog,
    RecordingMethodCatalog, Registry, RegistryStore, ScriptedOrchestrator,
};
use tempfile::TempDir;

pub const URL: &str = "https://github.com/devs/widget_tools";
pub const ADMIN: &str = "root";
pub const DEV: &str = "alice";

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub catalog: Arc<RecordingMethodCatalog>,
    pub scratch: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        store.approve_developer(DEV).await.unwrap();
        Self {
            store,
            catalog: Arc::new(RecordingMethodCatalog::new()),
            scratch: TempDir::new().unwrap(),
        }
    }

    pub fn registry(&self, orchestrator: Arc<dyn BuildOrchestrator>) -> Registry {
        Registry::new(
            self.store.clone(),
            orchestrator,
            self.catalog.clone(),
            AuthContext::new([ADMIN]),
            self.scratch.path().to_path_buf(),
        )
    }

    /// Registry wired with a noop catalog, for tests that only assert store
    /// state.
    pub fn quiet_registry(&self, orchestrator: Arc<dyn BuildOrchestrator>) -> Registry {
        Registry::new(
            self.store.clone(),
            orchestrator,
            Arc::new(NoopMethodCatalog),
            AuthContext::new([ADMIN]),
            self.scratch.path().to_path_buf(),
        )
    }

    pub async fn wait_terminal(&self, selector: &ModuleSelector) -> Module {
        for _ in 0..400 {
            if let Some(module) = self.store.find_module(selector).await.unwrap() {
                if module.state.registration.is_terminal() {
                    return module;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("registration never reached a terminal state");
    }

    /// Register `URL` with a build declaring the given name/version/commit
    /// and wait for the attempt to finish.
    pub async fn register_build(
        &self,
        module_name: &str,
        version: &str,
        commit: &str,
    ) -> (String, Module) {
        let registry = self.registry(Arc::new(ScriptedOrchestrator::succeeding(
            module_name,
            version,
        )));
        let id = registry
            .register_repo(URL, Some(commit.to_string()), DEV, "tok")
            .await
            .unwrap();
        let module = self.wait_terminal(&ModuleSelector::by_url(URL)).await;
        (id, module)
    }
}

pub fn by_url() -> ModuleSelector {
    ModuleSelector::by_url(URL)
}
