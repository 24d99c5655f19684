// Versioned snapshot migrations. Forward-only and in place, applied in order
// at load time; the store refuses to start when the snapshot is newer than
// the running code.

use serde_json::{json, Value};
use tracing::info;

use super::StoreError;

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// One schema migration step, taking a snapshot at `from_version()` to
/// `from_version() + 1`. Steps must be idempotent over their own output.
pub trait Migration: Send + Sync {
    fn from_version(&self) -> u32;
    fn describe(&self) -> &'static str;
    fn apply(&self, snapshot: &mut Value) -> Result<(), StoreError>;
}

fn chain() -> Vec<Box<dyn Migration>> {
    vec![Box::new(ReleaseHistoryToList)]
}

/// Bring a raw snapshot document up to [`CURRENT_SCHEMA_VERSION`].
pub fn migrate_snapshot(mut snapshot: Value) -> Result<Value, StoreError> {
    let mut version = snapshot
        .get("schema_version")
        .and_then(Value::as_u64)
        .unwrap_or(1) as u32;
    if version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::SchemaVersion {
            found: version,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }
    for migration in chain() {
        if migration.from_version() == version {
            info!(
                from = version,
                to = version + 1,
                step = migration.describe(),
                "migrating registry snapshot"
            );
            migration.apply(&mut snapshot)?;
            version += 1;
            snapshot["schema_version"] = json!(version);
        }
    }
    Ok(snapshot)
}

/// v1 stored release history per module as an `old_release_versions` object
/// keyed by timestamp; v2 stores the ordered `release_version_list` array.
struct ReleaseHistoryToList;

impl Migration for ReleaseHistoryToList {
    fn from_version(&self) -> u32 {
        1
    }

    fn describe(&self) -> &'static str {
        "old_release_versions map -> release_version_list array"
    }

    fn apply(&self, snapshot: &mut Value) -> Result<(), StoreError> {
        let Some(modules) = snapshot.get_mut("modules").and_then(Value::as_array_mut) else {
            return Ok(());
        };
        for module in modules {
            let Some(obj) = module.as_object_mut() else {
                continue;
            };
            if obj.contains_key("release_version_list") {
                continue;
            }
            let mut list: Vec<(i64, Value)> = Vec::new();
            if let Some(old) = obj.remove("old_release_versions") {
                if let Some(map) = old.as_object() {
                    for (ts, entry) in map {
                        let timestamp: i64 = ts.parse().map_err(|_| {
                            StoreError::Integrity(format!(
                                "old_release_versions key '{ts}' is not a timestamp"
                            ))
                        })?;
                        let commit = entry
                            .get("commit")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        let version = entry
                            .get("version")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        list.push((
                            timestamp,
                            json!({
                                "git_commit_hash": commit,
                                "version": version,
                                "timestamp": timestamp,
                            }),
                        ));
                    }
                }
            }
            list.sort_by_key(|(ts, _)| *ts);
            obj.insert(
                "release_version_list".to_string(),
                Value::Array(list.into_iter().map(|(_, v)| v).collect()),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_schema_version_is_treated_as_v1() {
        let migrated = migrate_snapshot(json!({"modules": []})).unwrap();
        assert_eq!(migrated["schema_version"], json!(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn newer_snapshot_is_rejected() {
        let err = migrate_snapshot(json!({"schema_version": 3})).unwrap_err();
        assert!(matches!(err, StoreError::SchemaVersion { found: 3, .. }));
    }

    #[test]
    fn v1_release_map_becomes_ordered_list() {
        let snapshot = json!({
            "schema_version": 1,
            "modules": [{
                "git_url": "https://github.com/devs/widget_tools",
                "old_release_versions": {
                    "200": {"commit": "bbb", "version": "0.0.2"},
                    "100": {"commit": "aaa", "version": "0.0.1"}
                }
            }]
        });
        let migrated = migrate_snapshot(snapshot).unwrap();
        let list = &migrated["modules"][0]["release_version_list"];
        assert_eq!(list[0]["git_commit_hash"], "aaa");
        assert_eq!(list[0]["timestamp"], 100);
        assert_eq!(list[1]["git_commit_hash"], "bbb");
        assert_eq!(list[1]["version"], "0.0.2");
        assert!(migrated["modules"][0].get("old_release_versions").is_none());
    }

    #[test]
    fn migration_step_is_idempotent() {
        let snapshot = json!({
            "schema_version": 1,
            "modules": [{
                "git_url": "https://github.com/devs/widget_tools",
                "release_version_list": [{"git_commit_hash": "aaa", "version": "0.0.1", "timestamp": 100}]
            }]
        });
        let step = ReleaseHistoryToList;
        let mut value = snapshot.clone();
        step.apply(&mut value).unwrap();
        step.apply(&mut value).unwrap();
        assert_eq!(
            value["modules"][0]["release_version_list"]
                .as_array()
                .unwrap()
                .len(),
            1
        );
    }
}
