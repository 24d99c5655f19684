// Version Store: persistence contract for modules, versions, and build logs.
// All mutating operations are atomic per module document; the conditional
// transitions compare and write as one unit so concurrent writers can rely
// on them for exclusion.

pub mod memory;
pub mod migrations;
pub mod types;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::InMemoryStore;
pub use types::{
    BuildLog, BuildLogLine, CurrentVersions, Module, ModuleSelector, ModuleState, ModuleVersion,
    RegistrationState, ReleaseApproval, Tag, VersionRef,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("selector mismatch: {0}")]
    SelectorMismatch(String),

    #[error("store integrity error: {0}")]
    Integrity(String),

    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("snapshot schema version {found} is newer than supported version {supported}")]
    SchemaVersion { found: u32, supported: u32 },
}

/// Result of a conditional (compare-and-swap) transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    /// The persisted value no longer matched the expected value; nothing was
    /// written.
    Conflict,
}

impl CasOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, CasOutcome::Applied)
    }
}

/// Filter for module listing. The inclusion flags partition on the release
/// slot: both false returns nothing, both true ignores the slot entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleListFilter {
    pub include_released: bool,
    pub include_unreleased: bool,
    pub include_disabled: bool,
}

impl Default for ModuleListFilter {
    fn default() -> Self {
        Self {
            include_released: true,
            include_unreleased: false,
            include_disabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicModuleInfo {
    pub module_name: Option<String>,
    pub git_url: String,
}

/// A module whose release request is awaiting admin review, with the beta
/// version under consideration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestedRelease {
    pub module_name: Option<String>,
    pub git_url: String,
    pub owners: Vec<String>,
    pub beta: Option<VersionRef>,
    pub timestamp: i64,
}

/// Filter for `list_build_logs`. The `only_*` flags are mutually exclusive in
/// practice; when several are set the narrowest (`only_error`) wins.
#[derive(Debug, Clone, Default)]
pub struct BuildFilter {
    pub only_running: bool,
    pub only_complete: bool,
    pub only_error: bool,
    pub modules: Vec<ModuleSelector>,
    pub skip: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildLogSummary {
    pub registration_id: String,
    pub timestamp: i64,
    pub module_name_lc: Option<String>,
    pub git_url: String,
    pub registration: RegistrationState,
    pub error_message: String,
}

/// Persistence contract for the registry.
///
/// Selector arguments accept a module name and/or git URL; implementations
/// normalize both and must fail with [`StoreError::SelectorMismatch`] when
/// the two identify different modules.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn is_registered(&self, selector: &ModuleSelector) -> Result<bool, StoreError>;

    /// Insert a fresh module for an unseen git URL in `waiting_to_start`.
    /// Fails with [`StoreError::Duplicate`] if the URL is already registered.
    async fn create_module(
        &self,
        git_url: &str,
        owner: &str,
        timestamp: i64,
        registration_id: &str,
    ) -> Result<Module, StoreError>;

    async fn find_module(&self, selector: &ModuleSelector) -> Result<Option<Module>, StoreError>;

    /// Fix the module name declared by the first successful build. Fails if a
    /// different name is already set or the name is taken by another module.
    async fn set_module_name(&self, git_url: &str, module_name: &str) -> Result<(), StoreError>;

    /// Refresh the denormalized description/language shown in module info.
    async fn update_module_metadata(
        &self,
        selector: &ModuleSelector,
        description: &str,
        language: &str,
    ) -> Result<(), StoreError>;

    /// Record the registration id of the attempt currently owning the module.
    async fn set_active_registration(
        &self,
        selector: &ModuleSelector,
        registration_id: &str,
    ) -> Result<(), StoreError>;

    /// Insert or overwrite the version for `(module_name_lc, commit)`;
    /// re-registering a commit replaces the dev metadata in place. The
    /// released flag and release timestamp of an existing entry survive the
    /// overwrite.
    async fn upsert_version(&self, version: ModuleVersion) -> Result<ModuleVersion, StoreError>;

    async fn get_version(
        &self,
        module_key: &str,
        git_commit_hash: &str,
    ) -> Result<Option<ModuleVersion>, StoreError>;

    /// All versions ever built for a module, in registration order.
    async fn list_versions(&self, module_key: &str) -> Result<Vec<ModuleVersion>, StoreError>;

    /// Set `released` and (first time only) `release_timestamp` on a version.
    /// Zero matched records is an integrity error.
    async fn mark_version_released(
        &self,
        module_key: &str,
        git_commit_hash: &str,
        release_timestamp: i64,
    ) -> Result<(), StoreError>;

    async fn set_tag(
        &self,
        selector: &ModuleSelector,
        tag: Tag,
        version: Option<VersionRef>,
    ) -> Result<(), StoreError>;

    async fn append_release_history(
        &self,
        selector: &ModuleSelector,
        version: VersionRef,
    ) -> Result<(), StoreError>;

    /// Atomic compare-and-swap on `state.registration`. The comparison and
    /// the write happen under one lock acquisition; this is the sole
    /// mechanism preventing two simultaneous builds of a module.
    async fn cas_registration_state(
        &self,
        selector: &ModuleSelector,
        expected: &RegistrationState,
        next: RegistrationState,
        error_message: Option<&str>,
    ) -> Result<CasOutcome, StoreError>;

    /// Unconditional write of `state.registration`; admin escape hatch for
    /// stuck builds only.
    async fn force_registration_state(
        &self,
        selector: &ModuleSelector,
        next: RegistrationState,
        error_message: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Atomic compare-and-swap on `state.release_approval`. A `Some` review
    /// message overwrites the stored message; `None` clears it.
    async fn cas_release_approval(
        &self,
        selector: &ModuleSelector,
        expected: &ReleaseApproval,
        next: ReleaseApproval,
        review_message: Option<&str>,
    ) -> Result<CasOutcome, StoreError>;

    async fn set_active(&self, selector: &ModuleSelector, active: bool) -> Result<(), StoreError>;

    /// Remove a module and its versions. The caller is responsible for the
    /// released-module guard; the store only refuses unknown modules.
    async fn delete_module(&self, selector: &ModuleSelector) -> Result<(), StoreError>;

    /// The only permitted `git_url` mutation (admin migration).
    async fn update_git_url(
        &self,
        selector: &ModuleSelector,
        new_git_url: &str,
    ) -> Result<(), StoreError>;

    async fn add_owner(&self, selector: &ModuleSelector, username: &str)
        -> Result<(), StoreError>;

    async fn remove_owner(
        &self,
        selector: &ModuleSelector,
        username: &str,
    ) -> Result<(), StoreError>;

    async fn list_modules(
        &self,
        filter: &ModuleListFilter,
    ) -> Result<Vec<BasicModuleInfo>, StoreError>;

    async fn list_requested_releases(&self) -> Result<Vec<RequestedRelease>, StoreError>;

    async fn create_build_log(&self, log: BuildLog) -> Result<(), StoreError>;

    async fn append_build_log(
        &self,
        registration_id: &str,
        lines: &[BuildLogLine],
    ) -> Result<(), StoreError>;

    async fn set_build_log_state(
        &self,
        registration_id: &str,
        state: RegistrationState,
        error_message: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn set_build_log_module(
        &self,
        registration_id: &str,
        module_name_lc: &str,
    ) -> Result<(), StoreError>;

    async fn get_build_log(&self, registration_id: &str) -> Result<Option<BuildLog>, StoreError>;

    async fn list_build_logs(
        &self,
        filter: &BuildFilter,
    ) -> Result<Vec<BuildLogSummary>, StoreError>;

    async fn approve_developer(&self, username: &str) -> Result<(), StoreError>;

    async fn revoke_developer(&self, username: &str) -> Result<(), StoreError>;

    async fn is_approved_developer(&self, username: &str) -> Result<bool, StoreError>;

    async fn list_approved_developers(&self) -> Result<Vec<String>, StoreError>;
}
