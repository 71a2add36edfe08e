//! Round-trip and lookup tests for the file-backed workflow store.

use std::collections::BTreeMap;

use tempfile::TempDir;

use stagehand::instance::{InstanceState, WorkflowInstance};
use stagehand::store::{StoreError, WorkflowStore};

fn store() -> (TempDir, WorkflowStore) {
    let dir = TempDir::new().unwrap();
    let store = WorkflowStore::open(dir.path().join(".stagehand")).unwrap();
    (dir, store)
}

/// An instance with history, variables and timestamps, as it would look
/// after a failed advance and a successful resume.
fn populated_instance(workflow: &str) -> WorkflowInstance {
    let mut instance = WorkflowInstance::new(
        workflow,
        BTreeMap::from([("remote".to_string(), "origin".to_string())]),
    );
    instance.start_execution("origin", "start", &["1".to_string()]);
    instance.set_checkpoint(2).unwrap();
    instance.finish_execution(InstanceState::Failed).unwrap();
    instance.start_execution("origin", "start", &["1".to_string()]);
    instance.finish_execution(InstanceState::Started).unwrap();
    instance
}

fn keyed_instance(workflow: &str, id: &str) -> WorkflowInstance {
    let mut instance = WorkflowInstance::new(workflow, BTreeMap::new());
    instance.id = id.to_string();
    instance.short_prefix = id[..6.min(id.len())].to_string();
    instance
}

#[test]
fn round_trips_a_populated_instance() {
    let (_dir, store) = store();
    let instance = populated_instance("release");

    store.put(&instance).unwrap();
    let loaded = store.get("release", &instance.id).unwrap().unwrap();

    assert_eq!(loaded, instance);
    assert_eq!(loaded.executions.len(), 2);
    assert!(loaded.executions[1].failed);
    assert_eq!(loaded.executions[1].checkpoint, 2);
    assert_eq!(loaded.variables["remote"], "origin");
}

#[test]
fn round_trips_an_empty_instance() {
    let (_dir, store) = store();
    let instance = WorkflowInstance::new("release", BTreeMap::new());

    store.put(&instance).unwrap();
    let loaded = store.get("release", &instance.id).unwrap().unwrap();

    assert_eq!(loaded, instance);
    assert!(loaded.latest_execution().is_none());
}

#[test]
fn put_overwrites_by_exact_id() {
    let (_dir, store) = store();
    let mut instance = populated_instance("release");

    store.put(&instance).unwrap();
    instance.cancel();
    store.put(&instance).unwrap();

    let loaded = store.get("release", &instance.id).unwrap().unwrap();
    assert_eq!(loaded, instance);
    assert!(!loaded.is_active);
}

#[test]
fn missing_instances_are_none_not_errors() {
    let (_dir, store) = store();
    assert!(store.get("release", "nope").unwrap().is_none());
    assert!(store.get_by_prefix("release", "no").unwrap().is_none());
}

#[test]
fn partitions_are_separated_by_workflow_name() {
    let (_dir, store) = store();
    let release = populated_instance("release");
    let hotfix = populated_instance("hotfix");

    store.put(&release).unwrap();
    store.put(&hotfix).unwrap();

    assert!(store.get("release", &hotfix.id).unwrap().is_none());
    assert!(store.get("hotfix", &hotfix.id).unwrap().is_some());
}

#[test]
fn prefix_lookup_returns_the_first_match_in_key_order() {
    let (_dir, store) = store();
    for id in ["100aaa", "200bbb", "300ccc"] {
        store.put(&keyed_instance("release", id)).unwrap();
    }

    let found = store.get_by_prefix("release", "2").unwrap().unwrap();
    assert_eq!(found.id, "200bbb");

    // Ambiguous prefixes resolve to the lexicographically first match.
    store.put(&keyed_instance("release", "200abc")).unwrap();
    let found = store.get_by_prefix("release", "200").unwrap().unwrap();
    assert_eq!(found.id, "200abc");
}

#[test]
fn list_filters_and_limits_in_key_order() {
    let (_dir, store) = store();
    let mut active = keyed_instance("release", "aaa111");
    active.is_active = true;
    let inactive = keyed_instance("release", "bbb222");
    store.put(&active).unwrap();
    store.put(&inactive).unwrap();

    let all = store.list("release", 0, false).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, "aaa111");

    let active_only = store.list("release", 0, true).unwrap();
    assert_eq!(active_only.len(), 1);
    assert_eq!(active_only[0].id, "aaa111");

    let limited = store.list("release", 1, false).unwrap();
    assert_eq!(limited.len(), 1);
}

#[test]
fn requesting_more_instances_than_exist_is_surfaced() {
    let (_dir, store) = store();
    store.put(&keyed_instance("release", "aaa111")).unwrap();

    let err = store.list("release", 3, false).unwrap_err();
    assert!(matches!(
        err,
        StoreError::InsufficientResults {
            requested: 3,
            available: 1,
        }
    ));
}

#[test]
fn list_all_spans_every_partition() {
    let (_dir, store) = store();
    store.put(&keyed_instance("hotfix", "aaa111")).unwrap();
    store.put(&keyed_instance("release", "bbb222")).unwrap();

    let all = store.list_all(false).unwrap();
    assert_eq!(all.len(), 2);

    let active = store.list_all(true).unwrap();
    assert!(active.is_empty());
}

#[test]
fn delete_removes_exactly_one_instance() {
    let (_dir, store) = store();
    let instance = keyed_instance("release", "aaa111");
    store.put(&instance).unwrap();

    store.delete("release", &instance.id).unwrap();
    assert!(store.get("release", &instance.id).unwrap().is_none());

    assert!(matches!(
        store.delete("release", &instance.id).unwrap_err(),
        StoreError::NotFound { .. }
    ));
    assert!(matches!(
        store.delete("ghost", "whatever").unwrap_err(),
        StoreError::NotFound { .. }
    ));
}

#[test]
fn drop_all_erases_every_partition() {
    let (_dir, store) = store();
    store.put(&keyed_instance("hotfix", "aaa111")).unwrap();
    store.put(&keyed_instance("release", "bbb222")).unwrap();

    store.drop_all().unwrap();

    assert!(store.list_all(false).unwrap().is_empty());
}

#[test]
fn unknown_schema_versions_are_rejected() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join(".stagehand");
    let store = WorkflowStore::open(&root).unwrap();

    std::fs::write(
        root.join("instances.db"),
        r#"{"schema_version": 99, "partitions": {}}"#,
    )
    .unwrap();

    assert!(matches!(
        store.get("release", "any").unwrap_err(),
        StoreError::SchemaVersion {
            expected: 1,
            found: 99,
        }
    ));
}
