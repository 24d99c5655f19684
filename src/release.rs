// Release Workflow: dev → beta promotion, release requests, and admin review.
// Promotion is a copy, not a move; the release tag only ever changes through
// an approved review, and each new release's semantic version must be
// strictly greater than the previous one's.

use std::sync::Arc;

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::AuthContext;
use crate::error::{RegistryError, Result};
use crate::methods::MethodCatalog;
use crate::store::{
    CasOutcome, Module, ModuleSelector, RegistrationState, RegistryStore, ReleaseApproval,
    StoreError, Tag, VersionRef,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseDecision {
    Approved,
    Denied,
}

#[derive(Clone)]
pub struct ReleaseWorkflow {
    store: Arc<dyn RegistryStore>,
    catalog: Arc<dyn MethodCatalog>,
    auth: AuthContext,
}

impl ReleaseWorkflow {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        catalog: Arc<dyn MethodCatalog>,
        auth: AuthContext,
    ) -> Self {
        Self {
            store,
            catalog,
            auth,
        }
    }

    async fn owned_active_module(
        &self,
        selector: &ModuleSelector,
        username: &str,
    ) -> Result<Module> {
        if !self.store.is_approved_developer(username).await? {
            return Err(RegistryError::NotApprovedDeveloper(username.to_string()));
        }
        let module = self
            .store
            .find_module(selector)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("module {selector}")))?;
        if !module.is_owner(username) {
            return Err(RegistryError::PermissionDenied(format!(
                "user '{username}' does not own module '{}'",
                module.display_name()
            )));
        }
        if !module.state.active {
            return Err(RegistryError::InactiveModule(
                module.display_name().to_string(),
            ));
        }
        Ok(module)
    }

    /// Copy the dev tag verbatim into the beta slot.
    pub async fn push_dev_to_beta(
        &self,
        selector: &ModuleSelector,
        username: &str,
    ) -> Result<()> {
        let module = self.owned_active_module(selector, username).await?;
        if module.state.registration != RegistrationState::Complete {
            return Err(RegistryError::Precondition(format!(
                "module '{}' has registration state '{}', expected 'complete'",
                module.display_name(),
                module.state.registration
            )));
        }
        if module.state.release_approval == ReleaseApproval::UnderReview {
            return Err(RegistryError::Precondition(format!(
                "module '{}' has a release under review; beta is frozen",
                module.display_name()
            )));
        }
        let dev = module.current_versions.dev.clone().ok_or_else(|| {
            RegistryError::Precondition(format!(
                "module '{}' has no dev version to promote",
                module.display_name()
            ))
        })?;
        self.store
            .set_tag(selector, Tag::Beta, Some(dev.clone()))
            .await?;
        self.notify_tag_push(&module, Tag::Beta, &dev).await;
        info!(
            module = %module.display_name(),
            version = %dev.version,
            commit = %dev.git_commit_hash,
            "dev promoted to beta"
        );
        Ok(())
    }

    /// Ask for the current beta to become the release; moves approval to
    /// `under_review`. Rejections here change no state.
    pub async fn request_release(&self, selector: &ModuleSelector, username: &str) -> Result<()> {
        let module = self.owned_active_module(selector, username).await?;
        if module.state.release_approval == ReleaseApproval::UnderReview {
            return Err(RegistryError::Precondition(format!(
                "module '{}' already has a release request under review",
                module.display_name()
            )));
        }
        let beta = module.current_versions.beta.clone().ok_or_else(|| {
            RegistryError::Precondition(format!(
                "module '{}' has no beta version to release",
                module.display_name()
            ))
        })?;
        if let Some(release) = &module.current_versions.release {
            check_monotonic(&module, &beta, release)?;
        }
        let cas = self
            .store
            .cas_release_approval(
                selector,
                &module.state.release_approval,
                ReleaseApproval::UnderReview,
                None,
            )
            .await?;
        if cas == CasOutcome::Conflict {
            return Err(RegistryError::Precondition(format!(
                "release approval for module '{}' changed concurrently",
                module.display_name()
            )));
        }
        info!(
            module = %module.display_name(),
            version = %beta.version,
            "release requested, awaiting review"
        );
        Ok(())
    }

    /// Admin decision on a pending release request. On approval the beta
    /// version becomes the release atomically with respect to other
    /// workflow calls; on denial only the approval state and review message
    /// change.
    pub async fn review_release_request(
        &self,
        selector: &ModuleSelector,
        decision: ReleaseDecision,
        review_message: Option<&str>,
        admin_username: &str,
    ) -> Result<()> {
        self.auth.require_admin(admin_username)?;
        let module = self
            .store
            .find_module(selector)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("module {selector}")))?;
        if module.state.release_approval != ReleaseApproval::UnderReview {
            return Err(RegistryError::Precondition(format!(
                "module '{}' has no release request under review",
                module.display_name()
            )));
        }
        if !module.state.active {
            return Err(RegistryError::InactiveModule(
                module.display_name().to_string(),
            ));
        }

        match decision {
            ReleaseDecision::Denied => {
                let message = review_message.map(str::trim).unwrap_or_default();
                if message.is_empty() {
                    return Err(RegistryError::InvalidInput(
                        "denying a release requires a review message".to_string(),
                    ));
                }
                let cas = self
                    .store
                    .cas_release_approval(
                        selector,
                        &ReleaseApproval::UnderReview,
                        ReleaseApproval::Denied,
                        Some(message),
                    )
                    .await?;
                if cas == CasOutcome::Conflict {
                    return Err(RegistryError::Precondition(format!(
                        "release review of module '{}' was decided concurrently",
                        module.display_name()
                    )));
                }
                info!(module = %module.display_name(), "release request denied");
                Ok(())
            }
            ReleaseDecision::Approved => {
                let beta = module.current_versions.beta.clone().ok_or_else(|| {
                    RegistryError::Store(StoreError::Integrity(format!(
                        "module '{}' is under review with an empty beta slot",
                        module.display_name()
                    )))
                })?;
                // Claim the review first; only the reviewer who wins this CAS
                // publishes. A concurrent second approval lands here after
                // the precondition read and must not append a second release.
                let cas = self
                    .store
                    .cas_release_approval(
                        selector,
                        &ReleaseApproval::UnderReview,
                        ReleaseApproval::Approved,
                        None,
                    )
                    .await?;
                if cas == CasOutcome::Conflict {
                    return Err(RegistryError::Precondition(format!(
                        "release review of module '{}' was decided concurrently",
                        module.display_name()
                    )));
                }
                let release_timestamp = chrono::Utc::now().timestamp_millis();
                self.store
                    .mark_version_released(
                        module.version_key(),
                        &beta.git_commit_hash,
                        release_timestamp,
                    )
                    .await?;
                self.store
                    .set_tag(selector, Tag::Release, Some(beta.clone()))
                    .await?;
                self.store
                    .append_release_history(selector, beta.clone())
                    .await?;
                self.notify_tag_push(&module, Tag::Release, &beta).await;
                info!(
                    module = %module.display_name(),
                    version = %beta.version,
                    commit = %beta.git_commit_hash,
                    "release approved and published"
                );
                Ok(())
            }
        }
    }

    async fn notify_tag_push(&self, module: &Module, tag: Tag, vref: &VersionRef) {
        if let Err(e) = self
            .catalog
            .notify_tag_push(module.display_name(), tag, &vref.git_commit_hash)
            .await
        {
            warn!(module = %module.display_name(), tag = %tag, error = %e, "method catalog push failed");
        }
    }
}

/// The monotonic-version check: a new release must differ from the current
/// one by commit and version string, and its semantic version must be
/// strictly greater.
fn check_monotonic(module: &Module, beta: &VersionRef, release: &VersionRef) -> Result<()> {
    if beta.git_commit_hash == release.git_commit_hash {
        return Err(RegistryError::Precondition(format!(
            "beta of module '{}' is the same commit as the current release",
            module.display_name()
        )));
    }
    if beta.version == release.version {
        return Err(RegistryError::Precondition(format!(
            "beta of module '{}' carries the same version '{}' as the current release",
            module.display_name(),
            beta.version
        )));
    }
    let beta_ver = parse_stored(module, &beta.version)?;
    let release_ver = parse_stored(module, &release.version)?;
    if beta_ver <= release_ver {
        return Err(RegistryError::Precondition(format!(
            "beta version {beta_ver} of module '{}' must be strictly greater than release {release_ver}",
            module.display_name()
        )));
    }
    Ok(())
}

fn parse_stored(module: &Module, version: &str) -> Result<Version> {
    Version::parse(version).map_err(|_| {
        RegistryError::Store(StoreError::Integrity(format!(
            "module '{}' stores unparseable version '{version}'",
            module.display_name()
        )))
    })
}
