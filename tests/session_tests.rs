use chrono::{Duration, Utc};
use healthcase::session::{FileSessionStore, Session, SessionError, SessionMemory, SessionStore};
use std::sync::Arc;
use tempfile::TempDir;

async fn file_memory(dir: &TempDir) -> SessionMemory {
    let store = FileSessionStore::open(dir.path().join("sessions.json")).await.unwrap();
    SessionMemory::new(Arc::new(store))
}

#[tokio::test]
async fn test_sessions_survive_reopening_the_store() {
    let dir = TempDir::new().unwrap();

    let memory = file_memory(&dir).await;
    let id = memory.create().await.unwrap();
    memory
        .update_context(&id, "standards", serde_json::json!(["hipaa", "iec_62304"]))
        .await
        .unwrap();
    memory.add_conversation_entry(&id, "user", "process srs.pdf").await.unwrap();
    memory
        .store_run_state(&id, &serde_json::json!({"overall_status": "completed"}))
        .await
        .unwrap();
    drop(memory);

    let reopened = file_memory(&dir).await;
    let summary = reopened.summary(&id).await.unwrap().expect("session persisted");
    assert_eq!(summary.conversation_count, 1);
    assert_eq!(summary.context_keys, vec!["standards".to_string()]);
    assert!(summary.has_workflow_state);

    let state: serde_json::Value = reopened.load_run_state(&id).await.unwrap().unwrap();
    assert_eq!(state["overall_status"], "completed");
    assert_eq!(
        reopened.get_context(&id, "standards").await.unwrap(),
        Some(serde_json::json!(["hipaa", "iec_62304"]))
    );
}

#[tokio::test]
async fn test_unknown_schema_version_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sessions.json");
    tokio::fs::write(&path, r#"{"schema_version": 7, "sessions": {}}"#).await.unwrap();

    match FileSessionStore::open(&path).await {
        Err(SessionError::UnsupportedSchema { found }) => assert_eq!(found, 7),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("store with unknown schema opened"),
    }
}

#[tokio::test]
async fn test_idle_sessions_expire() {
    let memory = SessionMemory::in_memory();
    let stale = memory.create().await.unwrap();
    let fresh = memory.create().await.unwrap();

    let mut session = memory.get(&stale).await.unwrap().unwrap();
    session.last_accessed = Utc::now() - Duration::hours(2);
    assert!(memory.put(&stale, session).await.unwrap());

    assert_eq!(memory.expire(Duration::minutes(60)).await.unwrap(), 1);
    assert!(memory.summary(&stale).await.unwrap().is_none());
    assert!(memory.summary(&fresh).await.unwrap().is_some());
}

#[test]
fn test_put_refuses_mismatched_ids() {
    tokio_test::block_on(async {
        let memory = SessionMemory::in_memory();
        let id = memory.create().await.unwrap();
        let session = memory.get(&id).await.unwrap().unwrap();
        assert!(!memory.put("someone-else", session).await.unwrap());
    });
}

#[tokio::test]
async fn test_list_and_delete() {
    let memory = SessionMemory::in_memory();
    let first = memory.create().await.unwrap();
    let second = memory.create().await.unwrap();

    let listed: Vec<String> = memory.list_active().await.unwrap().into_iter().map(|s| s.session_id).collect();
    assert_eq!(listed.len(), 2);
    assert!(listed.contains(&first) && listed.contains(&second));

    assert!(memory.delete(&first).await.unwrap());
    assert!(!memory.delete(&first).await.unwrap());
    assert_eq!(memory.list_active().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_write_leaves_store_unchanged() {
    let dir = TempDir::new().unwrap();
    let state_dir = dir.path().join("state");
    let path = state_dir.join("sessions.json");
    let store = FileSessionStore::open(&path).await.unwrap();

    // A plain file where the store directory should be makes every write fail.
    tokio::fs::write(&state_dir, "not a directory").await.unwrap();
    assert!(store.put("lost", Session::new("lost".to_string())).await.is_err());
    assert!(store.get("lost").await.unwrap().is_none());
    assert!(store.keys().await.unwrap().is_empty());

    tokio::fs::remove_file(&state_dir).await.unwrap();
    store.put("kept", Session::new("kept".to_string())).await.unwrap();

    let moved = state_dir.with_extension("moved");
    tokio::fs::rename(&state_dir, &moved).await.unwrap();
    tokio::fs::write(&state_dir, "not a directory").await.unwrap();
    assert!(store.update("kept", &|s: &mut Session| s.is_active = false).await.is_err());
    assert!(store.delete("kept").await.is_err());
    assert!(store.get("kept").await.unwrap().expect("still cached").is_active);

    tokio::fs::remove_file(&state_dir).await.unwrap();
    tokio::fs::rename(&moved, &state_dir).await.unwrap();
    store.put("second", Session::new("second".to_string())).await.unwrap();

    let reopened = FileSessionStore::open(&path).await.unwrap();
    assert_eq!(reopened.keys().await.unwrap(), vec!["kept".to_string(), "second".to_string()]);
    assert!(reopened.get("kept").await.unwrap().expect("persisted").is_active);
}

#[tokio::test]
async fn test_deactivated_sessions_are_not_listed() {
    let memory = SessionMemory::in_memory();
    let open = memory.create().await.unwrap();
    let closed = memory.create().await.unwrap();

    assert!(memory.deactivate(&closed).await.unwrap());
    assert!(!memory.deactivate("missing").await.unwrap());

    let listed: Vec<String> = memory.list_active().await.unwrap().into_iter().map(|s| s.session_id).collect();
    assert_eq!(listed, vec![open]);
    let summary = memory.summary(&closed).await.unwrap().expect("kept after deactivation");
    assert!(!summary.is_active);
}

#[tokio::test]
async fn test_user_and_preferences_are_persisted() {
    let dir = TempDir::new().unwrap();
    let memory = file_memory(&dir).await;
    let id = memory.create_for_user("dr.lee").await.unwrap();

    let mut first = std::collections::BTreeMap::new();
    first.insert("format".to_string(), serde_json::json!("markdown"));
    first.insert("max_tests".to_string(), serde_json::json!(4));
    assert!(memory.update_preferences(&id, first).await.unwrap());

    let mut second = std::collections::BTreeMap::new();
    second.insert("max_tests".to_string(), serde_json::json!(6));
    assert!(memory.update_preferences(&id, second).await.unwrap());
    drop(memory);

    let summary = file_memory(&dir).await.summary(&id).await.unwrap().expect("session persisted");
    assert_eq!(summary.user_id.as_deref(), Some("dr.lee"));
    assert_eq!(summary.preferences["format"], serde_json::json!("markdown"));
    assert_eq!(summary.preferences["max_tests"], serde_json::json!(6));
}
