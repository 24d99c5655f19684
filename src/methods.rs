// Method Catalog collaborator: the external registry of method
// specifications that mirrors our tag pushes. Notifications are best-effort
// from the workflows' point of view; a catalog outage must not wedge a
// promotion.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::store::Tag;

#[async_trait]
pub trait MethodCatalog: Send + Sync {
    /// A tag now points at the given commit (dev on build success, beta and
    /// release on promotion).
    async fn notify_tag_push(
        &self,
        module_name: &str,
        tag: Tag,
        git_commit_hash: &str,
    ) -> anyhow::Result<()>;

    async fn notify_activity(&self, module_name: &str, active: bool) -> anyhow::Result<()>;

    async fn notify_delete(&self, module_name: &str) -> anyhow::Result<()>;
}

/// Wiring for deployments without a method catalog.
pub struct NoopMethodCatalog;

#[async_trait]
impl MethodCatalog for NoopMethodCatalog {
    async fn notify_tag_push(
        &self,
        module_name: &str,
        tag: Tag,
        git_commit_hash: &str,
    ) -> anyhow::Result<()> {
        debug!(module = %module_name, tag = %tag, commit = %git_commit_hash, "tag push (noop catalog)");
        Ok(())
    }

    async fn notify_activity(&self, _module_name: &str, _active: bool) -> anyhow::Result<()> {
        Ok(())
    }

    async fn notify_delete(&self, _module_name: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogEvent {
    TagPush {
        module_name: String,
        tag: Tag,
        git_commit_hash: String,
    },
    Activity {
        module_name: String,
        active: bool,
    },
    Delete {
        module_name: String,
    },
}

/// Test collaborator that records every notification in order.
#[derive(Default)]
pub struct RecordingMethodCatalog {
    events: Mutex<Vec<CatalogEvent>>,
}

impl RecordingMethodCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<CatalogEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl MethodCatalog for RecordingMethodCatalog {
    async fn notify_tag_push(
        &self,
        module_name: &str,
        tag: Tag,
        git_commit_hash: &str,
    ) -> anyhow::Result<()> {
        self.events.lock().await.push(CatalogEvent::TagPush {
            module_name: module_name.to_string(),
            tag,
            git_commit_hash: git_commit_hash.to_string(),
        });
        Ok(())
    }

    async fn notify_activity(&self, module_name: &str, active: bool) -> anyhow::Result<()> {
        self.events.lock().await.push(CatalogEvent::Activity {
            module_name: module_name.to_string(),
            active,
        });
        Ok(())
    }

    async fn notify_delete(&self, module_name: &str) -> anyhow::Result<()> {
        self.events.lock().await.push(CatalogEvent::Delete {
            module_name: module_name.to_string(),
        });
        Ok(())
    }
}
