// In-memory implementation of the Version Store with optional JSON snapshot
// persistence. Every mutation runs under one write-lock acquisition, which is
// what makes the conditional transitions atomic: the comparison and the write
// cannot interleave with another writer.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::migrations::{migrate_snapshot, CURRENT_SCHEMA_VERSION};
use super::types::*;
use super::{
    BasicModuleInfo, BuildFilter, BuildLogSummary, CasOutcome, ModuleListFilter, RegistryStore,
    RequestedRelease, StoreError,
};

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct Snapshot {
    schema_version: u32,
    modules: Vec<Module>,
    versions: Vec<ModuleVersion>,
    build_logs: Vec<BuildLog>,
    developers: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Modules keyed by git URL; `name_index` maps module_name_lc to the URL.
    modules: HashMap<String, Module>,
    name_index: HashMap<String, String>,
    /// Versions per module key, in registration order.
    versions: HashMap<String, Vec<ModuleVersion>>,
    build_logs: HashMap<String, BuildLog>,
    /// Creation order of build logs, for stable listing.
    build_log_order: Vec<String>,
    developers: BTreeSet<String>,
}

impl Inner {
    fn from_snapshot(snap: Snapshot) -> Self {
        let mut inner = Inner::default();
        for module in snap.modules {
            if let Some(lc) = &module.module_name_lc {
                inner.name_index.insert(lc.clone(), module.git_url.clone());
            }
            inner.modules.insert(module.git_url.clone(), module);
        }
        for version in snap.versions {
            inner
                .versions
                .entry(version.module_name_lc.clone())
                .or_default()
                .push(version);
        }
        for log in snap.build_logs {
            inner.build_log_order.push(log.registration_id.clone());
            inner.build_logs.insert(log.registration_id.clone(), log);
        }
        inner.developers = snap.developers.into_iter().collect();
        inner
    }

    fn to_snapshot(&self) -> Snapshot {
        let mut modules: Vec<Module> = self.modules.values().cloned().collect();
        modules.sort_by(|a, b| a.git_url.cmp(&b.git_url));
        let mut versions: Vec<ModuleVersion> = Vec::new();
        let mut keys: Vec<&String> = self.versions.keys().collect();
        keys.sort();
        for key in keys {
            versions.extend(self.versions[key].iter().cloned());
        }
        let build_logs = self
            .build_log_order
            .iter()
            .filter_map(|id| self.build_logs.get(id).cloned())
            .collect();
        Snapshot {
            schema_version: CURRENT_SCHEMA_VERSION,
            modules,
            versions,
            build_logs,
            developers: self.developers.iter().cloned().collect(),
        }
    }

    /// Resolve a selector to the git-URL key of a module, enforcing that a
    /// co-supplied name and URL agree.
    fn find_key(&self, selector: &ModuleSelector) -> Result<Option<String>, StoreError> {
        let sel = selector.normalized();
        match (&sel.module_name, &sel.git_url) {
            (None, None) => Err(StoreError::SelectorMismatch(
                "selector must supply a module name or a git url".to_string(),
            )),
            (Some(name), None) => Ok(self.name_index.get(name).cloned()),
            (None, Some(url)) => Ok(self.modules.contains_key(url).then(|| url.clone())),
            (Some(name), Some(url)) => match self.modules.get(url) {
                None => Ok(None),
                Some(module) => {
                    if module.module_name_lc.as_deref() == Some(name.as_str()) {
                        Ok(Some(url.clone()))
                    } else {
                        Err(StoreError::SelectorMismatch(format!(
                            "module name '{name}' does not match the module registered at {url}"
                        )))
                    }
                }
            },
        }
    }

    fn module(&self, selector: &ModuleSelector) -> Result<Option<&Module>, StoreError> {
        Ok(self.find_key(selector)?.and_then(|k| self.modules.get(&k)))
    }

    fn module_mut(&mut self, selector: &ModuleSelector) -> Result<&mut Module, StoreError> {
        let key = self
            .find_key(selector)?
            .ok_or_else(|| StoreError::NotFound(format!("module {selector}")))?;
        self.modules
            .get_mut(&key)
            .ok_or_else(|| StoreError::Integrity(format!("name index points at missing {key}")))
    }
}

/// Version Store held in memory, optionally backed by a JSON snapshot file.
/// Loading a snapshot is gated by its schema version and runs the migration
/// chain for older layouts.
#[derive(Debug)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryStore {
    /// Ephemeral store with no on-disk snapshot.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            snapshot_path: None,
        }
    }

    /// Open a snapshot-backed store; a missing file starts empty. Refuses to
    /// start when the snapshot's schema version exceeds what this build
    /// understands.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let inner = match fs::read(&path).await {
            Ok(bytes) => {
                let raw: serde_json::Value = serde_json::from_slice(&bytes)?;
                let migrated = migrate_snapshot(raw)?;
                let snap: Snapshot = serde_json::from_value(migrated)?;
                info!(
                    path = %path.display(),
                    modules = snap.modules.len(),
                    "loaded registry snapshot"
                );
                Inner::from_snapshot(snap)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no snapshot found, starting empty");
                Inner::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            inner: RwLock::new(inner),
            snapshot_path: Some(path),
        })
    }

    async fn persist(&self, inner: &Inner) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(&inner.to_snapshot())?;
        fs::write(path, bytes).await?;
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryStore for InMemoryStore {
    async fn is_registered(&self, selector: &ModuleSelector) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.find_key(selector)?.is_some())
    }

    async fn create_module(
        &self,
        git_url: &str,
        owner: &str,
        timestamp: i64,
        registration_id: &str,
    ) -> Result<Module, StoreError> {
        let git_url = git_url.trim().to_string();
        let mut inner = self.inner.write().await;
        if inner.modules.contains_key(&git_url) {
            return Err(StoreError::Duplicate(format!("git url {git_url}")));
        }
        let module = Module {
            module_name: None,
            module_name_lc: None,
            git_url: git_url.clone(),
            owners: vec![owner.to_string()],
            description: String::new(),
            language: String::new(),
            state: ModuleState::new_registration(),
            current_versions: CurrentVersions::default(),
            release_version_list: Vec::new(),
            registration_id: registration_id.to_string(),
            created_at: timestamp,
        };
        inner.modules.insert(git_url.clone(), module.clone());
        self.persist(&inner).await?;
        debug!(git_url = %git_url, owner = %owner, "created module record");
        Ok(module)
    }

    async fn find_module(&self, selector: &ModuleSelector) -> Result<Option<Module>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.module(selector)?.cloned())
    }

    async fn set_module_name(&self, git_url: &str, module_name: &str) -> Result<(), StoreError> {
        let git_url = git_url.trim();
        let name_lc = module_name.trim().to_lowercase();
        let mut inner = self.inner.write().await;
        if let Some(taken_by) = inner.name_index.get(&name_lc) {
            if taken_by != git_url {
                return Err(StoreError::Duplicate(format!("module name {module_name}")));
            }
        }
        let module = inner
            .modules
            .get_mut(git_url)
            .ok_or_else(|| StoreError::NotFound(format!("module {git_url}")))?;
        match &module.module_name {
            Some(existing) if existing != module_name => {
                return Err(StoreError::Integrity(format!(
                    "module name is fixed at '{existing}' and cannot change to '{module_name}'"
                )))
            }
            _ => {}
        }
        module.module_name = Some(module_name.trim().to_string());
        module.module_name_lc = Some(name_lc.clone());
        inner.name_index.insert(name_lc, git_url.to_string());
        self.persist(&inner).await?;
        Ok(())
    }

    async fn update_module_metadata(
        &self,
        selector: &ModuleSelector,
        description: &str,
        language: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let module = inner.module_mut(selector)?;
        module.description = description.to_string();
        module.language = language.to_string();
        self.persist(&inner).await?;
        Ok(())
    }

    async fn set_active_registration(
        &self,
        selector: &ModuleSelector,
        registration_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let module = inner.module_mut(selector)?;
        module.registration_id = registration_id.to_string();
        self.persist(&inner).await?;
        Ok(())
    }

    async fn upsert_version(&self, version: ModuleVersion) -> Result<ModuleVersion, StoreError> {
        let mut inner = self.inner.write().await;
        let entries = inner
            .versions
            .entry(version.module_name_lc.clone())
            .or_default();
        let stored = match entries
            .iter_mut()
            .find(|v| v.git_commit_hash == version.git_commit_hash)
        {
            Some(existing) => {
                // Re-registration of a known commit replaces the metadata in
                // place; the release markers survive.
                let released = existing.released;
                let release_timestamp = existing.release_timestamp;
                *existing = version;
                existing.released = released;
                existing.release_timestamp = release_timestamp;
                existing.clone()
            }
            None => {
                entries.push(version.clone());
                version
            }
        };
        self.persist(&inner).await?;
        Ok(stored)
    }

    async fn get_version(
        &self,
        module_key: &str,
        git_commit_hash: &str,
    ) -> Result<Option<ModuleVersion>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.versions.get(module_key).and_then(|entries| {
            entries
                .iter()
                .find(|v| v.git_commit_hash == git_commit_hash)
                .cloned()
        }))
    }

    async fn list_versions(&self, module_key: &str) -> Result<Vec<ModuleVersion>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.versions.get(module_key).cloned().unwrap_or_default())
    }

    async fn mark_version_released(
        &self,
        module_key: &str,
        git_commit_hash: &str,
        release_timestamp: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let version = inner
            .versions
            .get_mut(module_key)
            .and_then(|entries| {
                entries
                    .iter_mut()
                    .find(|v| v.git_commit_hash == git_commit_hash)
            })
            .ok_or_else(|| {
                StoreError::Integrity(format!(
                    "release marked for unknown version {module_key}@{git_commit_hash}"
                ))
            })?;
        version.released = true;
        if version.release_timestamp.is_none() {
            version.release_timestamp = Some(release_timestamp);
        }
        self.persist(&inner).await?;
        Ok(())
    }

    async fn set_tag(
        &self,
        selector: &ModuleSelector,
        tag: Tag,
        version: Option<VersionRef>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let module = inner.module_mut(selector)?;
        module.current_versions.set(tag, version);
        self.persist(&inner).await?;
        Ok(())
    }

    async fn append_release_history(
        &self,
        selector: &ModuleSelector,
        version: VersionRef,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let module = inner.module_mut(selector)?;
        module.release_version_list.push(version);
        module.state.released = true;
        self.persist(&inner).await?;
        Ok(())
    }

    async fn cas_registration_state(
        &self,
        selector: &ModuleSelector,
        expected: &RegistrationState,
        next: RegistrationState,
        error_message: Option<&str>,
    ) -> Result<CasOutcome, StoreError> {
        let mut inner = self.inner.write().await;
        let module = inner.module_mut(selector)?;
        if module.state.registration != *expected {
            debug!(
                module = %module.display_name(),
                expected = %expected,
                actual = %module.state.registration,
                "registration CAS conflict"
            );
            return Ok(CasOutcome::Conflict);
        }
        module.state.registration = next;
        module.state.error_message = error_message.unwrap_or_default().to_string();
        self.persist(&inner).await?;
        Ok(CasOutcome::Applied)
    }

    async fn force_registration_state(
        &self,
        selector: &ModuleSelector,
        next: RegistrationState,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let module = inner.module_mut(selector)?;
        warn!(
            module = %module.display_name(),
            from = %module.state.registration,
            to = %next,
            "forcing registration state"
        );
        module.state.registration = next;
        module.state.error_message = error_message.unwrap_or_default().to_string();
        self.persist(&inner).await?;
        Ok(())
    }

    async fn cas_release_approval(
        &self,
        selector: &ModuleSelector,
        expected: &ReleaseApproval,
        next: ReleaseApproval,
        review_message: Option<&str>,
    ) -> Result<CasOutcome, StoreError> {
        let mut inner = self.inner.write().await;
        let module = inner.module_mut(selector)?;
        if module.state.release_approval != *expected {
            return Ok(CasOutcome::Conflict);
        }
        module.state.release_approval = next;
        module.state.review_message = review_message.unwrap_or_default().to_string();
        self.persist(&inner).await?;
        Ok(CasOutcome::Applied)
    }

    async fn set_active(&self, selector: &ModuleSelector, active: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let module = inner.module_mut(selector)?;
        module.state.active = active;
        self.persist(&inner).await?;
        Ok(())
    }

    async fn delete_module(&self, selector: &ModuleSelector) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let key = inner
            .find_key(selector)?
            .ok_or_else(|| StoreError::NotFound(format!("module {selector}")))?;
        let module = inner.modules.remove(&key).ok_or_else(|| {
            StoreError::Integrity(format!("module {key} vanished during delete"))
        })?;
        if let Some(lc) = &module.module_name_lc {
            inner.name_index.remove(lc);
            inner.versions.remove(lc);
        }
        self.persist(&inner).await?;
        info!(module = %module.display_name(), "deleted module record");
        Ok(())
    }

    async fn update_git_url(
        &self,
        selector: &ModuleSelector,
        new_git_url: &str,
    ) -> Result<(), StoreError> {
        let new_git_url = new_git_url.trim().to_string();
        let mut inner = self.inner.write().await;
        if inner.modules.contains_key(&new_git_url) {
            return Err(StoreError::Duplicate(format!("git url {new_git_url}")));
        }
        let key = inner
            .find_key(selector)?
            .ok_or_else(|| StoreError::NotFound(format!("module {selector}")))?;
        let mut module = inner.modules.remove(&key).ok_or_else(|| {
            StoreError::Integrity(format!("module {key} vanished during url migration"))
        })?;
        module.git_url = new_git_url.clone();
        if let Some(lc) = &module.module_name_lc {
            inner.name_index.insert(lc.clone(), new_git_url.clone());
        }
        inner.modules.insert(new_git_url, module);
        self.persist(&inner).await?;
        Ok(())
    }

    async fn add_owner(
        &self,
        selector: &ModuleSelector,
        username: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let module = inner.module_mut(selector)?;
        if !module.is_owner(username) {
            module.owners.push(username.to_string());
        }
        self.persist(&inner).await?;
        Ok(())
    }

    async fn remove_owner(
        &self,
        selector: &ModuleSelector,
        username: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let module = inner.module_mut(selector)?;
        module.owners.retain(|o| o != username);
        self.persist(&inner).await?;
        Ok(())
    }

    async fn list_modules(
        &self,
        filter: &ModuleListFilter,
    ) -> Result<Vec<BasicModuleInfo>, StoreError> {
        // Both inclusion flags false yields nothing; both true ignores the
        // release slot entirely.
        if !filter.include_released && !filter.include_unreleased {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().await;
        let mut out: Vec<BasicModuleInfo> = inner
            .modules
            .values()
            .filter(|m| filter.include_disabled || m.state.active)
            .filter(|m| {
                if filter.include_released && filter.include_unreleased {
                    true
                } else if filter.include_released {
                    m.current_versions.release.is_some()
                } else {
                    m.current_versions.release.is_none()
                }
            })
            .map(|m| BasicModuleInfo {
                module_name: m.module_name.clone(),
                git_url: m.git_url.clone(),
            })
            .collect();
        out.sort_by(|a, b| {
            a.module_name
                .cmp(&b.module_name)
                .then_with(|| a.git_url.cmp(&b.git_url))
        });
        Ok(out)
    }

    async fn list_requested_releases(&self) -> Result<Vec<RequestedRelease>, StoreError> {
        let inner = self.inner.read().await;
        let mut out: Vec<RequestedRelease> = inner
            .modules
            .values()
            .filter(|m| m.state.release_approval == ReleaseApproval::UnderReview)
            .map(|m| RequestedRelease {
                module_name: m.module_name.clone(),
                git_url: m.git_url.clone(),
                owners: m.owners.clone(),
                beta: m.current_versions.beta.clone(),
                timestamp: m
                    .current_versions
                    .beta
                    .as_ref()
                    .map(|b| b.timestamp)
                    .unwrap_or(m.created_at),
            })
            .collect();
        out.sort_by_key(|r| r.timestamp);
        Ok(out)
    }

    async fn create_build_log(&self, log: BuildLog) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.build_logs.contains_key(&log.registration_id) {
            return Err(StoreError::Duplicate(format!(
                "registration id {}",
                log.registration_id
            )));
        }
        inner.build_log_order.push(log.registration_id.clone());
        inner.build_logs.insert(log.registration_id.clone(), log);
        self.persist(&inner).await?;
        Ok(())
    }

    async fn append_build_log(
        &self,
        registration_id: &str,
        lines: &[BuildLogLine],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let log = inner
            .build_logs
            .get_mut(registration_id)
            .ok_or_else(|| StoreError::NotFound(format!("build log {registration_id}")))?;
        log.log.extend_from_slice(lines);
        self.persist(&inner).await?;
        Ok(())
    }

    async fn set_build_log_state(
        &self,
        registration_id: &str,
        state: RegistrationState,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let log = inner
            .build_logs
            .get_mut(registration_id)
            .ok_or_else(|| StoreError::NotFound(format!("build log {registration_id}")))?;
        log.registration = state;
        if let Some(msg) = error_message {
            log.error_message = msg.to_string();
        }
        self.persist(&inner).await?;
        Ok(())
    }

    async fn set_build_log_module(
        &self,
        registration_id: &str,
        module_name_lc: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let log = inner
            .build_logs
            .get_mut(registration_id)
            .ok_or_else(|| StoreError::NotFound(format!("build log {registration_id}")))?;
        log.module_name_lc = Some(module_name_lc.to_string());
        self.persist(&inner).await?;
        Ok(())
    }

    async fn get_build_log(&self, registration_id: &str) -> Result<Option<BuildLog>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.build_logs.get(registration_id).cloned())
    }

    async fn list_build_logs(
        &self,
        filter: &BuildFilter,
    ) -> Result<Vec<BuildLogSummary>, StoreError> {
        let inner = self.inner.read().await;
        let module_match = |log: &BuildLog| -> bool {
            if filter.modules.is_empty() {
                return true;
            }
            filter.modules.iter().any(|sel| {
                let sel = sel.normalized();
                let name_ok = match (&sel.module_name, &log.module_name_lc) {
                    (Some(want), Some(have)) => want == have,
                    (Some(_), None) => false,
                    (None, _) => true,
                };
                let url_ok = match &sel.git_url {
                    Some(url) => *url == log.git_url,
                    None => true,
                };
                name_ok && url_ok && !sel.is_empty()
            })
        };
        let state_match = |log: &BuildLog| -> bool {
            if filter.only_error {
                log.registration == RegistrationState::Error
            } else if filter.only_complete {
                log.registration == RegistrationState::Complete
            } else if filter.only_running {
                !log.registration.is_terminal()
            } else {
                true
            }
        };
        let iter = inner
            .build_log_order
            .iter()
            .filter_map(|id| inner.build_logs.get(id))
            .filter(|log| state_match(log) && module_match(log))
            .skip(filter.skip);
        let summaries = |log: &BuildLog| BuildLogSummary {
            registration_id: log.registration_id.clone(),
            timestamp: log.timestamp,
            module_name_lc: log.module_name_lc.clone(),
            git_url: log.git_url.clone(),
            registration: log.registration.clone(),
            error_message: log.error_message.clone(),
        };
        Ok(match filter.limit {
            Some(limit) => iter.take(limit).map(summaries).collect(),
            None => iter.map(summaries).collect(),
        })
    }

    async fn approve_developer(&self, username: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.developers.insert(username.to_string());
        self.persist(&inner).await?;
        Ok(())
    }

    async fn revoke_developer(&self, username: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.developers.remove(username);
        self.persist(&inner).await?;
        Ok(())
    }

    async fn is_approved_developer(&self, username: &str) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.developers.contains(username))
    }

    async fn list_approved_developers(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.developers.iter().cloned().collect())
    }
}
