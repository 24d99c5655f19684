// Build Orchestrator seam. The actual checkout/build/validate pipeline is an
// external collaborator; the registry hands it a module snapshot plus a
// progress reporter and expects step transitions followed by exactly one
// terminal outcome.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::error::{RegistryError, Result};
use crate::store::{BuildLogLine, Module, ModuleSelector, RegistrationState, RegistryStore};

/// Snapshot of everything an orchestrator needs for one build attempt.
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub registration_id: String,
    pub git_url: String,
    pub commit_selector: Option<String>,
    pub username: String,
    /// Opaque credential forwarded to the build pipeline.
    pub token: String,
    /// Private scratch workspace, keyed by registration id and never reused.
    pub scratch_dir: PathBuf,
    pub module: Module,
}

/// Terminal result of a successful build: the metadata the registrar commits
/// as the new dev version.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// Name declared in the repository manifest; must match the stored name
    /// once one is fixed.
    pub module_name: String,
    pub git_commit_hash: String,
    pub version: String,
    pub module_description: String,
    pub module_language: String,
    pub narrative_methods: Vec<String>,
    pub notes: String,
    pub compilation_report: Option<serde_json::Value>,
    pub dynamic_service: bool,
}

#[async_trait]
pub trait BuildOrchestrator: Send + Sync {
    /// Perform the build, reporting step transitions through `progress`.
    /// Every error return is converted by the registrar into a terminal
    /// `error` registration state; implementations must not leave side state
    /// behind that outlives the scratch directory.
    async fn run_build(&self, job: &BuildJob, progress: &ProgressReporter)
        -> anyhow::Result<BuildOutcome>;
}

/// Reports `building:<step>` transitions and log lines for one registration
/// attempt. Each step is a CAS from the immediately preceding state, so an
/// admin forcing the module out of the build is observed as a conflict and
/// aborts the attempt.
pub struct ProgressReporter {
    store: Arc<dyn RegistryStore>,
    selector: ModuleSelector,
    registration_id: String,
    current: Mutex<RegistrationState>,
}

impl ProgressReporter {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        selector: ModuleSelector,
        registration_id: String,
        initial: RegistrationState,
    ) -> Self {
        Self {
            store,
            selector,
            registration_id,
            current: Mutex::new(initial),
        }
    }

    pub fn registration_id(&self) -> &str {
        &self.registration_id
    }

    /// The last state this attempt successfully wrote.
    pub async fn current_state(&self) -> RegistrationState {
        self.current.lock().await.clone()
    }

    /// Advance to `building:<step>`.
    pub async fn step(&self, step: &str) -> Result<()> {
        let mut current = self.current.lock().await;
        let next = RegistrationState::building(step);
        let outcome = self
            .store
            .cas_registration_state(&self.selector, &current, next.clone(), None)
            .await?;
        if !outcome.applied() {
            return Err(RegistryError::Precondition(format!(
                "registration state changed externally during step '{step}'"
            )));
        }
        self.store
            .set_build_log_state(&self.registration_id, next.clone(), None)
            .await?;
        self.log(format!("-> {step}")).await?;
        debug!(registration_id = %self.registration_id, step = %step, "build step");
        *current = next;
        Ok(())
    }

    pub async fn log(&self, line: impl Into<String>) -> Result<()> {
        self.append(line.into(), false).await
    }

    pub async fn log_error(&self, line: impl Into<String>) -> Result<()> {
        self.append(line.into(), true).await
    }

    async fn append(&self, content: String, is_error: bool) -> Result<()> {
        self.store
            .append_build_log(&self.registration_id, &[BuildLogLine { content, is_error }])
            .await
            .map_err(RegistryError::from)
    }
}

/// Placeholder orchestrator for read-only wirings (the inspection CLI); any
/// registration attempt fails immediately.
pub struct UnconfiguredOrchestrator;

#[async_trait]
impl BuildOrchestrator for UnconfiguredOrchestrator {
    async fn run_build(
        &self,
        _job: &BuildJob,
        _progress: &ProgressReporter,
    ) -> anyhow::Result<BuildOutcome> {
        anyhow::bail!("no build orchestrator is configured")
    }
}

/// Scripted orchestrator for tests: walks a fixed step list, optionally parks
/// until released (to hold a module in `building:*`), then yields a canned
/// outcome or failure.
pub struct ScriptedOrchestrator {
    pub steps: Vec<String>,
    pub module_name: String,
    pub version: String,
    /// Commit to report; defaults to the job's commit selector, then to a
    /// fixed hash.
    pub commit: Option<String>,
    pub dynamic_service: bool,
    pub fail_with: Option<String>,
    /// When set, the build parks after its steps until `notify_one`.
    pub hold: Option<Arc<Notify>>,
}

impl ScriptedOrchestrator {
    pub fn succeeding(module_name: &str, version: &str) -> Self {
        Self {
            steps: vec!["fetching_repo".to_string(), "validating".to_string()],
            module_name: module_name.to_string(),
            version: version.to_string(),
            commit: None,
            dynamic_service: false,
            fail_with: None,
            hold: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::succeeding("unused", "0.0.0")
        }
    }
}

#[async_trait]
impl BuildOrchestrator for ScriptedOrchestrator {
    async fn run_build(
        &self,
        job: &BuildJob,
        progress: &ProgressReporter,
    ) -> anyhow::Result<BuildOutcome> {
        for step in &self.steps {
            progress.step(step).await?;
        }
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }
        if let Some(message) = &self.fail_with {
            anyhow::bail!("{message}");
        }
        let commit = self
            .commit
            .clone()
            .or_else(|| job.commit_selector.clone())
            .unwrap_or_else(|| "0123456789abcdef0123456789abcdef01234567".to_string());
        progress.log(format!("built {} at {commit}", self.module_name)).await?;
        Ok(BuildOutcome {
            module_name: self.module_name.clone(),
            git_commit_hash: commit,
            version: self.version.clone(),
            module_description: format!("{} test module", self.module_name),
            module_language: "python".to_string(),
            narrative_methods: vec![],
            notes: String::new(),
            compilation_report: None,
            dynamic_service: self.dynamic_service,
        })
    }
}
