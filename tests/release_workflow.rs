// Promotion pipeline properties: dev→beta is a copy, release requests gate on
// strictly increasing semver, review is re-openable, and released modules can
// never be deleted.

mod common;

use std::sync::Arc;

use common::{by_url, Harness, ADMIN, DEV};
use module_registry::{
    CatalogEvent, RegistryError, RegistryStore, ReleaseApproval, ReleaseDecision,
    ScriptedOrchestrator, Tag,
};

#[tokio::test]
async fn full_pipeline_from_registration_to_release() {
    let h = Harness::new().await;
    let registry = h.registry(Arc::new(ScriptedOrchestrator::succeeding(
        "WidgetTools",
        "0.0.1",
    )));
    h.register_build("WidgetTools", "0.0.1", "aaa111").await;

    registry.push_dev_to_beta(&by_url(), DEV).await.unwrap();
    let module = h.store.find_module(&by_url()).await.unwrap().unwrap();
    // Promotion is a copy, not a move.
    let dev = module.current_versions.dev.clone().unwrap();
    let beta = module.current_versions.beta.clone().unwrap();
    assert_eq!(dev.git_commit_hash, "aaa111");
    assert_eq!(beta, dev);

    registry.request_release(&by_url(), DEV).await.unwrap();
    let pending = registry.list_requested_releases().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].module_name.as_deref(), Some("WidgetTools"));
    assert_eq!(pending[0].owners, vec![DEV.to_string()]);
    assert_eq!(pending[0].beta.as_ref().unwrap().version, "0.0.1");

    registry
        .review_release_request(&by_url(), ReleaseDecision::Approved, None, ADMIN)
        .await
        .unwrap();

    let module = h.store.find_module(&by_url()).await.unwrap().unwrap();
    assert_eq!(module.state.release_approval, ReleaseApproval::Approved);
    assert!(module.state.released);
    assert_eq!(
        module.current_versions.release.unwrap().git_commit_hash,
        "aaa111"
    );
    assert_eq!(module.release_version_list.len(), 1);

    let released = h
        .store
        .get_version("widgettools", "aaa111")
        .await
        .unwrap()
        .unwrap();
    assert!(released.released);
    assert!(released.release_timestamp.is_some());

    let events = h.catalog.events().await;
    assert!(events.iter().any(|e| matches!(e, CatalogEvent::TagPush { tag: Tag::Dev, .. })));
    assert!(events.iter().any(|e| matches!(e, CatalogEvent::TagPush { tag: Tag::Beta, .. })));
    assert!(events.iter().any(|e| matches!(e, CatalogEvent::TagPush { tag: Tag::Release, .. })));
}

async fn released_module(h: &Harness) -> module_registry::Registry {
    let registry = h.quiet_registry(Arc::new(ScriptedOrchestrator::succeeding(
        "WidgetTools",
        "0.0.1",
    )));
    h.register_build("WidgetTools", "0.0.1", "aaa111").await;
    registry.push_dev_to_beta(&by_url(), DEV).await.unwrap();
    registry.request_release(&by_url(), DEV).await.unwrap();
    registry
        .review_release_request(&by_url(), ReleaseDecision::Approved, None, ADMIN)
        .await
        .unwrap();
    registry
}

#[tokio::test]
async fn release_versions_must_strictly_increase() {
    let h = Harness::new().await;
    let registry = released_module(&h).await;

    // A beta at the same version string (different commit) is rejected.
    h.register_build("WidgetTools", "0.0.1", "bbb222").await;
    registry.push_dev_to_beta(&by_url(), DEV).await.unwrap();
    let err = registry.request_release(&by_url(), DEV).await.unwrap_err();
    assert!(matches!(err, RegistryError::Precondition(_)));

    // A lower semver is rejected.
    h.register_build("WidgetTools", "0.0.0", "ccc333").await;
    registry.push_dev_to_beta(&by_url(), DEV).await.unwrap();
    let err = registry.request_release(&by_url(), DEV).await.unwrap_err();
    assert!(matches!(err, RegistryError::Precondition(_)));

    // Strictly greater succeeds; after approval the history is append-only
    // and ordered.
    h.register_build("WidgetTools", "0.0.2", "ddd444").await;
    registry.push_dev_to_beta(&by_url(), DEV).await.unwrap();
    registry.request_release(&by_url(), DEV).await.unwrap();
    registry
        .review_release_request(&by_url(), ReleaseDecision::Approved, None, ADMIN)
        .await
        .unwrap();

    let module = h.store.find_module(&by_url()).await.unwrap().unwrap();
    let versions: Vec<String> = module
        .release_version_list
        .iter()
        .map(|r| r.version.clone())
        .collect();
    assert_eq!(versions, vec!["0.0.1".to_string(), "0.0.2".to_string()]);
}

#[tokio::test]
async fn denied_review_is_reopenable_with_a_qualifying_beta() {
    let h = Harness::new().await;
    let registry = h.quiet_registry(Arc::new(ScriptedOrchestrator::succeeding(
        "WidgetTools",
        "0.0.1",
    )));
    h.register_build("WidgetTools", "0.0.1", "aaa111").await;
    registry.push_dev_to_beta(&by_url(), DEV).await.unwrap();
    registry.request_release(&by_url(), DEV).await.unwrap();

    // Denial requires a review message.
    let err = registry
        .review_release_request(&by_url(), ReleaseDecision::Denied, None, ADMIN)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidInput(_)));

    registry
        .review_release_request(
            &by_url(),
            ReleaseDecision::Denied,
            Some("tests are missing"),
            ADMIN,
        )
        .await
        .unwrap();
    let module = h.store.find_module(&by_url()).await.unwrap().unwrap();
    assert_eq!(module.state.release_approval, ReleaseApproval::Denied);
    assert_eq!(module.state.review_message, "tests are missing");
    // Denial changes no version data.
    assert!(module.current_versions.release.is_none());

    // A new qualifying beta can be requested again.
    h.register_build("WidgetTools", "0.0.2", "bbb222").await;
    registry.push_dev_to_beta(&by_url(), DEV).await.unwrap();
    registry.request_release(&by_url(), DEV).await.unwrap();
    let module = h.store.find_module(&by_url()).await.unwrap().unwrap();
    assert_eq!(module.state.release_approval, ReleaseApproval::UnderReview);
}

#[tokio::test]
async fn beta_is_frozen_while_under_review() {
    let h = Harness::new().await;
    let registry = h.quiet_registry(Arc::new(ScriptedOrchestrator::succeeding(
        "WidgetTools",
        "0.0.1",
    )));
    h.register_build("WidgetTools", "0.0.1", "aaa111").await;
    registry.push_dev_to_beta(&by_url(), DEV).await.unwrap();
    registry.request_release(&by_url(), DEV).await.unwrap();

    let err = registry.push_dev_to_beta(&by_url(), DEV).await.unwrap_err();
    assert!(matches!(err, RegistryError::Precondition(_)));
    let err = registry.request_release(&by_url(), DEV).await.unwrap_err();
    assert!(matches!(err, RegistryError::Precondition(_)));
}

#[tokio::test]
async fn concurrent_approvals_publish_exactly_one_release() {
    let h = Harness::new().await;
    let registry = h.quiet_registry(Arc::new(ScriptedOrchestrator::succeeding(
        "WidgetTools",
        "0.1.0",
    )));
    h.register_build("WidgetTools", "0.1.0", "aaa111").await;
    registry.push_dev_to_beta(&by_url(), DEV).await.unwrap();
    registry.request_release(&by_url(), DEV).await.unwrap();

    // Two admins decide the same pending request; only the CAS winner may
    // publish, the other must fail without appending a second release.
    let sel = by_url();
    let first = registry.review_release_request(&sel, ReleaseDecision::Approved, None, ADMIN);
    let second = registry.review_release_request(&sel, ReleaseDecision::Approved, None, ADMIN);
    let (first, second) = futures::future::join(first, second).await;

    assert_eq!(first.is_ok() as usize + second.is_ok() as usize, 1);
    let loser = if first.is_err() { first } else { second };
    assert!(matches!(
        loser.unwrap_err(),
        RegistryError::Precondition(_)
    ));

    let module = h.store.find_module(&by_url()).await.unwrap().unwrap();
    assert_eq!(module.state.release_approval, ReleaseApproval::Approved);
    assert_eq!(module.release_version_list.len(), 1);
    assert_eq!(module.release_version_list[0].git_commit_hash, "aaa111");
}

#[tokio::test]
async fn review_requires_admin_and_a_pending_request() {
    let h = Harness::new().await;
    let registry = h.quiet_registry(Arc::new(ScriptedOrchestrator::succeeding(
        "WidgetTools",
        "0.0.1",
    )));
    h.register_build("WidgetTools", "0.0.1", "aaa111").await;

    let err = registry
        .review_release_request(&by_url(), ReleaseDecision::Approved, None, DEV)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::PermissionDenied(_)));

    let err = registry
        .review_release_request(&by_url(), ReleaseDecision::Approved, None, ADMIN)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Precondition(_)));
}

#[tokio::test]
async fn non_owner_cannot_promote() {
    let h = Harness::new().await;
    let registry = h.quiet_registry(Arc::new(ScriptedOrchestrator::succeeding(
        "WidgetTools",
        "0.0.1",
    )));
    h.register_build("WidgetTools", "0.0.1", "aaa111").await;
    h.store.approve_developer("bob").await.unwrap();

    let err = registry.push_dev_to_beta(&by_url(), "bob").await.unwrap_err();
    assert!(matches!(err, RegistryError::PermissionDenied(_)));
    let err = registry
        .push_dev_to_beta(&by_url(), "mallory")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::NotApprovedDeveloper(_)));
}

#[tokio::test]
async fn released_modules_can_never_be_deleted() {
    let h = Harness::new().await;
    let registry = released_module(&h).await;

    let err = registry.delete_module(&by_url(), ADMIN).await.unwrap_err();
    assert!(matches!(err, RegistryError::Precondition(_)));
    assert!(h.store.find_module(&by_url()).await.unwrap().is_some());
}

#[tokio::test]
async fn unreleased_modules_can_be_deleted_by_admins_only() {
    let h = Harness::new().await;
    let registry = h.registry(Arc::new(ScriptedOrchestrator::succeeding(
        "WidgetTools",
        "0.0.1",
    )));
    h.register_build("WidgetTools", "0.0.1", "aaa111").await;

    let err = registry.delete_module(&by_url(), DEV).await.unwrap_err();
    assert!(matches!(err, RegistryError::PermissionDenied(_)));

    registry.delete_module(&by_url(), ADMIN).await.unwrap();
    assert!(h.store.find_module(&by_url()).await.unwrap().is_none());
    let events = h.catalog.events().await;
    assert!(events
        .iter()
        .any(|e| matches!(e, CatalogEvent::Delete { module_name } if module_name == "WidgetTools")));
}
