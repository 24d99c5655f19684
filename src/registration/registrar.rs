// Registration State Machine. One registration attempt per module may be in
// flight; the compare-and-swap transition on `state.registration` is the only
// exclusion mechanism. The caller-facing call returns the registration id as
// soon as the slot is reserved; the build runs as an independent task and can
// only end in `complete` or `error`.

use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use semver::Version;
use std::sync::LazyLock;
use tokio::fs;
use tracing::{error, info, warn};
use url::Url;

use super::orchestrator::{BuildJob, BuildOrchestrator, BuildOutcome, ProgressReporter};
use super::{new_registration_id, registration_timestamp};
use crate::auth::AuthContext;
use crate::error::{RegistryError, Result};
use crate::methods::MethodCatalog;
use crate::store::{
    BuildLog, BuildLogLine, Module, ModuleSelector, ModuleVersion, RegistrationState,
    RegistryStore, Tag,
};

static MODULE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9._-]*$").unwrap());

#[derive(Clone)]
pub struct Registrar {
    store: Arc<dyn RegistryStore>,
    orchestrator: Arc<dyn BuildOrchestrator>,
    catalog: Arc<dyn MethodCatalog>,
    auth: AuthContext,
    scratch_root: PathBuf,
}

impl Registrar {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        orchestrator: Arc<dyn BuildOrchestrator>,
        catalog: Arc<dyn MethodCatalog>,
        auth: AuthContext,
        scratch_root: PathBuf,
    ) -> Self {
        Self {
            store,
            orchestrator,
            catalog,
            auth,
            scratch_root,
        }
    }

    /// Start a registration attempt for `git_url`. Returns the registration
    /// id immediately; the build proceeds in the background and finishes in
    /// `complete` or `error`, never stuck in `building:*`.
    pub async fn register_repo(
        &self,
        git_url: &str,
        commit_selector: Option<String>,
        username: &str,
        token: &str,
    ) -> Result<String> {
        let git_url = git_url.trim().to_string();
        let parsed = Url::parse(&git_url)
            .map_err(|e| RegistryError::InvalidInput(format!("malformed git url '{git_url}': {e}")))?;
        if parsed.host_str().is_none() {
            return Err(RegistryError::InvalidInput(format!(
                "git url '{git_url}' has no host"
            )));
        }

        if !self.store.is_approved_developer(username).await? {
            return Err(RegistryError::NotApprovedDeveloper(username.to_string()));
        }

        let registration_id = new_registration_id();
        let timestamp = registration_timestamp(&registration_id).unwrap_or_default();
        let scratch_dir = self.scratch_root.join(format!("registration_{registration_id}"));
        fs::create_dir_all(&scratch_dir)
            .await
            .map_err(|e| RegistryError::Scratch(format!("{}: {e}", scratch_dir.display())))?;

        let selector = ModuleSelector::by_url(&git_url);
        let module = match self
            .claim_slot(&selector, &git_url, username, timestamp, &registration_id)
            .await
        {
            Ok(module) => module,
            Err(e) => {
                // The slot was never claimed; the scratch dir must not leak.
                if let Err(io) = fs::remove_dir_all(&scratch_dir).await {
                    warn!(
                        registration_id = %registration_id,
                        error = %io,
                        "could not remove scratch dir of rejected registration"
                    );
                }
                return Err(e);
            }
        };

        self.store
            .create_build_log(BuildLog {
                registration_id: registration_id.clone(),
                timestamp,
                git_url: git_url.clone(),
                module_name_lc: module.module_name_lc.clone(),
                registration: RegistrationState::WaitingToStart,
                error_message: String::new(),
                log: vec![BuildLogLine {
                    content: format!("Registration {registration_id} started for {git_url} by {username}"),
                    is_error: false,
                }],
            })
            .await?;

        let job = BuildJob {
            registration_id: registration_id.clone(),
            git_url,
            commit_selector,
            username: username.to_string(),
            token: token.to_string(),
            scratch_dir,
            module,
        };
        info!(
            registration_id = %job.registration_id,
            git_url = %job.git_url,
            username = %job.username,
            "registration accepted, build handed off"
        );
        let this = self.clone();
        tokio::spawn(async move { this.run_attempt(job).await });
        Ok(registration_id)
    }

    /// Reserve the build slot: an atomic insert for an unseen git URL, or a
    /// claim on the existing module.
    async fn claim_slot(
        &self,
        selector: &ModuleSelector,
        git_url: &str,
        username: &str,
        timestamp: i64,
        registration_id: &str,
    ) -> Result<Module> {
        match self.store.find_module(selector).await? {
            None => {
                // First registration of this URL: no owner yet, developer
                // status is the only gate. Creation and the initial
                // waiting_to_start state are one atomic insert.
                self.store
                    .create_module(git_url, username, timestamp, registration_id)
                    .await
                    .map_err(|e| match e {
                        crate::store::StoreError::Duplicate(_) => {
                            RegistryError::RegistrationInProgress(git_url.to_string())
                        }
                        other => RegistryError::from(other),
                    })
            }
            Some(existing) => {
                self.claim_existing(selector, &existing, username, registration_id)
                    .await
            }
        }
    }

    /// Reserve the build slot on an existing module: owner/admin + active
    /// checks, then a CAS from the current (terminal) registration state.
    async fn claim_existing(
        &self,
        selector: &ModuleSelector,
        existing: &Module,
        username: &str,
        registration_id: &str,
    ) -> Result<Module> {
        if !existing.is_owner(username) && !self.auth.is_admin(username) {
            return Err(RegistryError::PermissionDenied(format!(
                "user '{username}' does not own module '{}'",
                existing.display_name()
            )));
        }
        if !existing.state.active {
            return Err(RegistryError::InactiveModule(
                existing.display_name().to_string(),
            ));
        }
        let current = existing.state.registration.clone();
        if !current.is_terminal() {
            return Err(RegistryError::RegistrationInProgress(
                existing.display_name().to_string(),
            ));
        }
        let cas = self
            .store
            .cas_registration_state(
                selector,
                &current,
                RegistrationState::WaitingToStart,
                Some(""),
            )
            .await?;
        if !cas.applied() {
            // Another attempt won the slot between our read and the CAS.
            return Err(RegistryError::RegistrationInProgress(
                existing.display_name().to_string(),
            ));
        }
        self.store
            .set_active_registration(selector, registration_id)
            .await?;
        self.store
            .find_module(selector)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("module {selector}")))
    }

    /// Background body of one registration attempt. Never returns an error:
    /// every failure is funneled into a terminal `error` state plus log
    /// lines.
    async fn run_attempt(&self, job: BuildJob) {
        let progress = ProgressReporter::new(
            self.store.clone(),
            ModuleSelector::by_url(&job.git_url),
            job.registration_id.clone(),
            RegistrationState::WaitingToStart,
        );
        match self.orchestrator.run_build(&job, &progress).await {
            Ok(outcome) => {
                if let Err(e) = self.finalize(&job, &progress, outcome).await {
                    self.fail(&job, &progress, &e.to_string()).await;
                }
            }
            Err(e) => self.fail(&job, &progress, &format!("{e:#}")).await,
        }
    }

    /// Commit the build result: fix the module name (first build only),
    /// upsert the dev version, move the dev tag, notify the method catalog,
    /// and land in `complete`.
    async fn finalize(
        &self,
        job: &BuildJob,
        progress: &ProgressReporter,
        outcome: BuildOutcome,
    ) -> Result<()> {
        Version::parse(&outcome.version).map_err(|_| {
            RegistryError::InvalidInput(format!(
                "'{}' is not a valid semantic version",
                outcome.version
            ))
        })?;
        if !MODULE_NAME_RE.is_match(&outcome.module_name) {
            return Err(RegistryError::InvalidInput(format!(
                "'{}' is not a valid module name",
                outcome.module_name
            )));
        }

        let selector = ModuleSelector::by_url(&job.git_url);
        let module = self
            .store
            .find_module(&selector)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("module {selector}")))?;
        if let Some(fixed) = &module.module_name {
            if fixed != &outcome.module_name {
                return Err(RegistryError::InvalidInput(format!(
                    "module name is fixed at '{fixed}'; manifest declares '{}'",
                    outcome.module_name
                )));
            }
        }
        // Re-assert ownership of the build slot before committing anything.
        // An admin forcing the module out of the build while the orchestrator
        // ran is observed here as a CAS conflict and aborts the attempt with
        // no version data written.
        progress.step("finalizing").await?;

        self.store
            .set_module_name(&job.git_url, &outcome.module_name)
            .await?;
        let name_lc = outcome.module_name.to_lowercase();
        self.store
            .update_module_metadata(
                &selector,
                &outcome.module_description,
                &outcome.module_language,
            )
            .await?;

        let timestamp = chrono::Utc::now().timestamp_millis();
        let stored = self
            .store
            .upsert_version(ModuleVersion {
                module_name_lc: name_lc.clone(),
                git_commit_hash: outcome.git_commit_hash.clone(),
                version: outcome.version.clone(),
                timestamp,
                registration_id: job.registration_id.clone(),
                narrative_methods: outcome.narrative_methods.clone(),
                module_description: outcome.module_description.clone(),
                module_language: outcome.module_language.clone(),
                notes: outcome.notes.clone(),
                compilation_report: outcome.compilation_report.clone(),
                dynamic_service: outcome.dynamic_service,
                released: false,
                release_timestamp: None,
            })
            .await?;
        self.store
            .set_tag(&selector, Tag::Dev, Some(stored.as_ref()))
            .await?;
        self.store
            .set_build_log_module(&job.registration_id, &name_lc)
            .await?;

        if let Err(e) = self
            .catalog
            .notify_tag_push(&outcome.module_name, Tag::Dev, &outcome.git_commit_hash)
            .await
        {
            warn!(module = %outcome.module_name, error = %e, "method catalog dev push failed");
        }

        let current = progress.current_state().await;
        let cas = self
            .store
            .cas_registration_state(&selector, &current, RegistrationState::Complete, Some(""))
            .await?;
        if !cas.applied() {
            // Do not mirror `complete` into the log; it must keep agreeing
            // with the module's forced state.
            warn!(
                registration_id = %job.registration_id,
                "registration state changed externally before completion; leaving it"
            );
            return Ok(());
        }
        self.store
            .set_build_log_state(&job.registration_id, RegistrationState::Complete, Some(""))
            .await?;
        progress
            .log(format!(
                "registration complete: {} {} at {}",
                outcome.module_name, outcome.version, outcome.git_commit_hash
            ))
            .await?;
        info!(
            registration_id = %job.registration_id,
            module = %outcome.module_name,
            version = %outcome.version,
            "registration complete"
        );
        Ok(())
    }

    /// Land the attempt in a terminal `error` state. Best effort throughout;
    /// a store fault here is logged and swallowed so the task never panics.
    async fn fail(&self, job: &BuildJob, progress: &ProgressReporter, message: &str) {
        error!(
            registration_id = %job.registration_id,
            git_url = %job.git_url,
            error = %message,
            "registration failed"
        );
        if let Err(e) = progress.log_error(message.to_string()).await {
            warn!(registration_id = %job.registration_id, error = %e, "could not append failure to build log");
        }
        let selector = ModuleSelector::by_url(&job.git_url);
        let current = progress.current_state().await;
        match self
            .store
            .cas_registration_state(&selector, &current, RegistrationState::Error, Some(message))
            .await
        {
            Ok(cas) if !cas.applied() => warn!(
                registration_id = %job.registration_id,
                "registration state changed externally before failure could be recorded"
            ),
            Ok(_) => {}
            Err(e) => warn!(registration_id = %job.registration_id, error = %e, "could not record failed registration"),
        }
        if let Err(e) = self
            .store
            .set_build_log_state(&job.registration_id, RegistrationState::Error, Some(message))
            .await
        {
            warn!(registration_id = %job.registration_id, error = %e, "could not mirror failure to build log");
        }
    }
}
