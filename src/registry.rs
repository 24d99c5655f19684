// Registry facade: the operation surface consumed by the (external)
// transport layer. Wires the store, the build orchestrator, the method
// catalog, and the authorization context together and delegates to the
// registration and release workflows.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::auth::AuthContext;
use crate::error::{RegistryError, Result};
use crate::methods::MethodCatalog;
use crate::registration::build_log::{parse_build_log, raw_build_log};
use crate::registration::{
    BuildOrchestrator, LogSlice, ParsedBuildLog, Registrar,
};
use crate::release::{ReleaseDecision, ReleaseWorkflow};
use crate::resolver::{self, ResolveConstraints};
use crate::store::{
    BasicModuleInfo, BuildFilter, BuildLogSummary, Module, ModuleListFilter, ModuleSelector,
    ModuleState, ModuleVersion, RegistrationState, RegistryStore, RequestedRelease, StoreError,
    Tag,
};

/// Public projection of a module: identity, ownership, and the version bound
/// to each of the three tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub module_name: Option<String>,
    pub git_url: String,
    pub description: String,
    pub language: String,
    pub owners: Vec<String>,
    pub dev: Option<ModuleVersion>,
    pub beta: Option<ModuleVersion>,
    pub release: Option<ModuleVersion>,
}

#[derive(Debug, Clone, Default)]
pub struct GetVersionOptions {
    pub only_service_versions: bool,
    pub include_module_description: bool,
    pub include_compilation_report: bool,
}

/// A resolved version annotated with the tags currently pointing at it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionDetails {
    #[serde(flatten)]
    pub version: ModuleVersion,
    pub release_tags: Vec<String>,
}

pub struct Registry {
    store: Arc<dyn RegistryStore>,
    catalog: Arc<dyn MethodCatalog>,
    auth: AuthContext,
    registrar: Registrar,
    release: ReleaseWorkflow,
}

impl Registry {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        orchestrator: Arc<dyn BuildOrchestrator>,
        catalog: Arc<dyn MethodCatalog>,
        auth: AuthContext,
        scratch_root: PathBuf,
    ) -> Self {
        let registrar = Registrar::new(
            store.clone(),
            orchestrator,
            catalog.clone(),
            auth.clone(),
            scratch_root,
        );
        let release = ReleaseWorkflow::new(store.clone(), catalog.clone(), auth.clone());
        Self {
            store,
            catalog,
            auth,
            registrar,
            release,
        }
    }

    pub fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }

    async fn module(&self, selector: &ModuleSelector) -> Result<Module> {
        self.store
            .find_module(selector)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("module {selector}")))
    }

    async fn module_and_history(
        &self,
        selector: &ModuleSelector,
    ) -> Result<(Module, Vec<ModuleVersion>)> {
        let module = self.module(selector).await?;
        let history = self.store.list_versions(module.version_key()).await?;
        Ok((module, history))
    }

    // ---- registration ----

    pub async fn register_repo(
        &self,
        git_url: &str,
        commit_selector: Option<String>,
        username: &str,
        token: &str,
    ) -> Result<String> {
        self.registrar
            .register_repo(git_url, commit_selector, username, token)
            .await
    }

    /// Admin escape hatch for stuck builds; bypasses the CAS discipline.
    pub async fn set_registration_state(
        &self,
        selector: &ModuleSelector,
        new_state: RegistrationState,
        error_message: Option<&str>,
        admin_username: &str,
    ) -> Result<()> {
        self.auth.require_admin(admin_username)?;
        let module = self.module(selector).await?;
        self.store
            .force_registration_state(selector, new_state.clone(), error_message)
            .await?;
        // Mirror into the active attempt's log so the history explains itself.
        match self
            .store
            .set_build_log_state(&module.registration_id, new_state, error_message)
            .await
        {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    // ---- reads ----

    pub async fn is_registered(&self, selector: &ModuleSelector) -> Result<bool> {
        Ok(self.store.is_registered(selector).await?)
    }

    pub async fn get_module_state(&self, selector: &ModuleSelector) -> Result<ModuleState> {
        Ok(self.module(selector).await?.state)
    }

    pub async fn get_module_info(&self, selector: &ModuleSelector) -> Result<ModuleInfo> {
        let (module, history) = self.module_and_history(selector).await?;
        let constraints = ResolveConstraints::default();
        let resolve = |tag: Tag| -> Result<Option<ModuleVersion>> {
            resolver::resolve_version(&module, &history, Some(tag.as_str()), &constraints)
        };
        Ok(ModuleInfo {
            dev: resolve(Tag::Dev)?,
            beta: resolve(Tag::Beta)?,
            release: resolve(Tag::Release)?,
            module_name: module.module_name,
            git_url: module.git_url,
            description: module.description,
            language: module.language,
            owners: module.owners,
        })
    }

    /// Tag-first lookup with secondary equality constraints; `tag` accepts
    /// tag names only in this mode.
    pub async fn get_version_info(
        &self,
        selector: &ModuleSelector,
        tag: Option<&str>,
        timestamp: Option<i64>,
        git_commit_hash: Option<&str>,
    ) -> Result<Option<ModuleVersion>> {
        let tag = match tag {
            None => None,
            Some(s) => Some(Tag::parse(s).ok_or_else(|| {
                RegistryError::InvalidInput(format!(
                    "'{s}' is not a tag; expected dev, beta, or release"
                ))
            })?),
        };
        let (module, history) = self.module_and_history(selector).await?;
        resolver::find_version_info(&module, &history, tag, timestamp, git_commit_hash)
    }

    /// Full selector resolution (tag, exact semver, range, commit hash) with
    /// release-tag annotations.
    pub async fn get_module_version(
        &self,
        selector: &ModuleSelector,
        version_selector: Option<&str>,
        options: &GetVersionOptions,
    ) -> Result<Option<VersionDetails>> {
        let (module, history) = self.module_and_history(selector).await?;
        let constraints = ResolveConstraints {
            only_service_versions: options.only_service_versions,
        };
        let Some(mut version) =
            resolver::resolve_version(&module, &history, version_selector, &constraints)?
        else {
            return Ok(None);
        };
        if !options.include_module_description {
            version.module_description = String::new();
        }
        if !options.include_compilation_report {
            version.compilation_report = None;
        }
        let release_tags = [Tag::Release, Tag::Beta, Tag::Dev]
            .into_iter()
            .filter(|tag| {
                module
                    .current_versions
                    .get(*tag)
                    .is_some_and(|r| r.git_commit_hash == version.git_commit_hash)
            })
            .map(|tag| tag.as_str().to_string())
            .collect();
        Ok(Some(VersionDetails {
            version,
            release_tags,
        }))
    }

    /// Every version ever promoted to release, in promotion order.
    pub async fn list_released_versions(
        &self,
        selector: &ModuleSelector,
    ) -> Result<Vec<ModuleVersion>> {
        let (module, history) = self.module_and_history(selector).await?;
        module
            .release_version_list
            .iter()
            .map(|r| {
                history
                    .iter()
                    .find(|v| v.git_commit_hash == r.git_commit_hash)
                    .cloned()
                    .ok_or_else(|| {
                        RegistryError::Store(StoreError::Integrity(format!(
                            "release history of module '{}' references missing version {}",
                            module.display_name(),
                            r.git_commit_hash
                        )))
                    })
            })
            .collect()
    }

    pub async fn list_basic_module_info(
        &self,
        filter: &ModuleListFilter,
    ) -> Result<Vec<BasicModuleInfo>> {
        Ok(self.store.list_modules(filter).await?)
    }

    // ---- release workflow ----

    pub async fn push_dev_to_beta(&self, selector: &ModuleSelector, username: &str) -> Result<()> {
        self.release.push_dev_to_beta(selector, username).await
    }

    pub async fn request_release(&self, selector: &ModuleSelector, username: &str) -> Result<()> {
        self.release.request_release(selector, username).await
    }

    pub async fn list_requested_releases(&self) -> Result<Vec<RequestedRelease>> {
        Ok(self.store.list_requested_releases().await?)
    }

    pub async fn review_release_request(
        &self,
        selector: &ModuleSelector,
        decision: ReleaseDecision,
        review_message: Option<&str>,
        admin_username: &str,
    ) -> Result<()> {
        self.release
            .review_release_request(selector, decision, review_message, admin_username)
            .await
    }

    // ---- build logs ----

    pub async fn get_build_log(&self, registration_id: &str, slice: LogSlice) -> Result<String> {
        let log = self
            .store
            .get_build_log(registration_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("build log {registration_id}")))?;
        Ok(raw_build_log(&log, slice))
    }

    pub async fn get_parsed_build_log(
        &self,
        registration_id: &str,
        slice: LogSlice,
    ) -> Result<ParsedBuildLog> {
        let log = self
            .store
            .get_build_log(registration_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("build log {registration_id}")))?;
        Ok(parse_build_log(&log, slice))
    }

    pub async fn list_builds(&self, filter: &BuildFilter) -> Result<Vec<BuildLogSummary>> {
        Ok(self.store.list_build_logs(filter).await?)
    }

    // ---- administration ----

    pub async fn set_active(
        &self,
        selector: &ModuleSelector,
        active: bool,
        admin_username: &str,
    ) -> Result<()> {
        self.auth.require_admin(admin_username)?;
        let module = self.module(selector).await?;
        self.store.set_active(selector, active).await?;
        if let Err(e) = self
            .catalog
            .notify_activity(module.display_name(), active)
            .await
        {
            warn!(module = %module.display_name(), error = %e, "method catalog activity push failed");
        }
        info!(module = %module.display_name(), active, "module activity changed");
        Ok(())
    }

    /// Admin delete. Released artifacts are permanent: any module with a
    /// non-empty release slot or release history is refused regardless of
    /// caller.
    pub async fn delete_module(&self, selector: &ModuleSelector, admin_username: &str) -> Result<()> {
        self.auth.require_admin(admin_username)?;
        let module = self.module(selector).await?;
        if module.current_versions.release.is_some() || !module.release_version_list.is_empty() {
            return Err(RegistryError::Precondition(format!(
                "module '{}' has released versions and cannot be deleted",
                module.display_name()
            )));
        }
        self.store.delete_module(selector).await?;
        if let Err(e) = self.catalog.notify_delete(module.display_name()).await {
            warn!(module = %module.display_name(), error = %e, "method catalog delete push failed");
        }
        Ok(())
    }

    /// Admin migration of a repository to a new URL; the only `git_url`
    /// mutation there is.
    pub async fn migrate_git_url(
        &self,
        selector: &ModuleSelector,
        new_git_url: &str,
        admin_username: &str,
    ) -> Result<()> {
        self.auth.require_admin(admin_username)?;
        let new_git_url = new_git_url.trim();
        Url::parse(new_git_url).map_err(|e| {
            RegistryError::InvalidInput(format!("malformed git url '{new_git_url}': {e}"))
        })?;
        self.module(selector).await?;
        self.store.update_git_url(selector, new_git_url).await?;
        info!(selector = %selector, new_git_url = %new_git_url, "git url migrated");
        Ok(())
    }

    pub async fn approve_developer(&self, username: &str, admin_username: &str) -> Result<()> {
        self.auth.require_admin(admin_username)?;
        Ok(self.store.approve_developer(username).await?)
    }

    pub async fn revoke_developer(&self, username: &str, admin_username: &str) -> Result<()> {
        self.auth.require_admin(admin_username)?;
        Ok(self.store.revoke_developer(username).await?)
    }

    pub async fn is_approved_developer(&self, username: &str) -> Result<bool> {
        Ok(self.store.is_approved_developer(username).await?)
    }

    pub async fn list_approved_developers(&self) -> Result<Vec<String>> {
        Ok(self.store.list_approved_developers().await?)
    }

    /// Owners and admins may add owners.
    pub async fn add_owner(
        &self,
        selector: &ModuleSelector,
        new_owner: &str,
        username: &str,
    ) -> Result<()> {
        let module = self.module(selector).await?;
        if !module.is_owner(username) && !self.auth.is_admin(username) {
            return Err(RegistryError::PermissionDenied(format!(
                "user '{username}' does not own module '{}'",
                module.display_name()
            )));
        }
        Ok(self.store.add_owner(selector, new_owner).await?)
    }

    /// Removing the last owner is rejected: registration always requires an
    /// owner to check against.
    pub async fn remove_owner(
        &self,
        selector: &ModuleSelector,
        owner: &str,
        username: &str,
    ) -> Result<()> {
        let module = self.module(selector).await?;
        if !module.is_owner(username) && !self.auth.is_admin(username) {
            return Err(RegistryError::PermissionDenied(format!(
                "user '{username}' does not own module '{}'",
                module.display_name()
            )));
        }
        if module.owners.len() == 1 && module.is_owner(owner) {
            return Err(RegistryError::Precondition(format!(
                "cannot remove the last owner of module '{}'",
                module.display_name()
            )));
        }
        Ok(self.store.remove_owner(selector, owner).await?)
    }
}
