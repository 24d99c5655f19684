// list_basic_module_info filter semantics: the released/unreleased flags
// partition on the release slot, both-false short-circuits to an empty list,
// and disabled modules only appear when asked for.

mod common;

use std::sync::Arc;

use common::{Harness, ADMIN, DEV};
use module_registry::{
    ModuleListFilter, ModuleSelector, Registry, ReleaseDecision, ScriptedOrchestrator,
};

const URL_RELEASED: &str = "https://github.com/devs/widget_tools";
const URL_UNRELEASED: &str = "https://github.com/devs/assembly_util";
const URL_DISABLED: &str = "https://github.com/devs/legacy_tool";

async fn register(h: &Harness, url: &str, name: &str) -> Registry {
    let registry = h.quiet_registry(Arc::new(ScriptedOrchestrator::succeeding(name, "0.1.0")));
    registry
        .register_repo(url, None, DEV, "tok")
        .await
        .unwrap();
    h.wait_terminal(&ModuleSelector::by_url(url)).await;
    registry
}

/// One released module, one unreleased, one disabled and unreleased.
async fn seeded() -> (Harness, Registry) {
    let h = Harness::new().await;

    let registry = register(&h, URL_RELEASED, "WidgetTools").await;
    let sel = ModuleSelector::by_url(URL_RELEASED);
    registry.push_dev_to_beta(&sel, DEV).await.unwrap();
    registry.request_release(&sel, DEV).await.unwrap();
    registry
        .review_release_request(&sel, ReleaseDecision::Approved, None, ADMIN)
        .await
        .unwrap();

    register(&h, URL_UNRELEASED, "AssemblyUtil").await;

    let registry = register(&h, URL_DISABLED, "LegacyTool").await;
    registry
        .set_active(&ModuleSelector::by_url(URL_DISABLED), false, ADMIN)
        .await
        .unwrap();

    (h, registry)
}

fn names(infos: &[module_registry::BasicModuleInfo]) -> Vec<&str> {
    infos
        .iter()
        .map(|i| i.module_name.as_deref().unwrap_or(&i.git_url))
        .collect()
}

#[tokio::test]
async fn default_filter_lists_only_active_released_modules() {
    let (_h, registry) = seeded().await;
    let infos = registry
        .list_basic_module_info(&ModuleListFilter::default())
        .await
        .unwrap();
    assert_eq!(names(&infos), vec!["WidgetTools"]);
}

#[tokio::test]
async fn unreleased_flag_partitions_on_the_release_slot() {
    let (_h, registry) = seeded().await;
    let filter = ModuleListFilter {
        include_released: false,
        include_unreleased: true,
        include_disabled: false,
    };
    let infos = registry.list_basic_module_info(&filter).await.unwrap();
    assert_eq!(names(&infos), vec!["AssemblyUtil"]);
}

#[tokio::test]
async fn both_inclusion_flags_list_everything_active() {
    let (_h, registry) = seeded().await;
    let filter = ModuleListFilter {
        include_released: true,
        include_unreleased: true,
        include_disabled: false,
    };
    let infos = registry.list_basic_module_info(&filter).await.unwrap();
    assert_eq!(names(&infos), vec!["AssemblyUtil", "WidgetTools"]);
}

#[tokio::test]
async fn neither_inclusion_flag_lists_nothing() {
    let (_h, registry) = seeded().await;
    let filter = ModuleListFilter {
        include_released: false,
        include_unreleased: false,
        include_disabled: true,
    };
    let infos = registry.list_basic_module_info(&filter).await.unwrap();
    assert!(infos.is_empty());
}

#[tokio::test]
async fn disabled_modules_appear_only_on_request() {
    let (_h, registry) = seeded().await;
    let filter = ModuleListFilter {
        include_released: true,
        include_unreleased: true,
        include_disabled: true,
    };
    let infos = registry.list_basic_module_info(&filter).await.unwrap();
    assert_eq!(
        names(&infos),
        vec!["AssemblyUtil", "LegacyTool", "WidgetTools"]
    );
}

#[tokio::test]
async fn listing_is_sorted_by_module_name() {
    let (_h, registry) = seeded().await;
    let filter = ModuleListFilter {
        include_released: true,
        include_unreleased: true,
        include_disabled: true,
    };
    let infos = registry.list_basic_module_info(&filter).await.unwrap();
    let mut sorted = infos.clone();
    sorted.sort_by(|a, b| a.module_name.cmp(&b.module_name));
    assert_eq!(names(&infos), names(&sorted));
}
