//! 离线写入 → 重连推送的端到端测试

mod common;

use std::sync::Arc;
use std::time::Duration;

use bee_link::events::EventBus;
use bee_link::store::{OperationKind, Role, SessionStore, SyncStatus};
use bee_link::sync::SyncEngine;
use bee_link::CoreEvent;
use common::{RecordingHub, SwitchLink};

fn engine(store: &SessionStore, link: &Arc<SwitchLink>, bus: &EventBus) -> Arc<SyncEngine> {
    Arc::new(SyncEngine::new(store.clone(), link.clone(), bus.clone()))
}

#[tokio::test]
async fn test_offline_conversation_is_pushed_in_order_on_reconnect() {
    let store = SessionStore::in_memory().unwrap();
    let link = SwitchLink::offline();
    let bus = EventBus::new();
    let (_sub, mut events) = bus.subscribe_channel();
    let sync = engine(&store, &link, &bus);

    let session = store.create_session(Some("Trip notes")).unwrap();
    for text in ["pack bags", "book train", "water plants"] {
        store.add_message(&session.local_id, Role::User, text).unwrap();
    }

    assert!(!sync.sync_all().await);
    let kinds: Vec<_> = store
        .pending_operations()
        .unwrap()
        .iter()
        .map(|op| op.kind())
        .collect();
    assert_eq!(
        kinds,
        vec![
            OperationKind::CreateSession,
            OperationKind::AddMessage,
            OperationKind::AddMessage,
            OperationKind::AddMessage,
        ]
    );

    let hub = RecordingHub::new();
    link.connect(hub.clone());
    assert!(sync.sync_all().await);

    assert_eq!(
        hub.calls(),
        vec![
            "create_session:Trip notes",
            "append_message:pack bags",
            "append_message:book train",
            "append_message:water plants",
        ]
    );
    let sequences: Vec<i64> = hub.uploads.lock().iter().map(|(_, m)| m.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert_eq!(sync.get_pending_count(), 0);

    let synced = store.get_session(&session.local_id).unwrap();
    assert_eq!(synced.remote_id.as_deref(), Some("remote-1"));
    assert_eq!(synced.sync_status, SyncStatus::Synced);

    let mut last_pending = None;
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::SyncStatus { pending } = event {
            last_pending = Some(pending);
        }
    }
    assert_eq!(last_pending, Some(0));
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("bee-link.db");

    let local_id = {
        let store = SessionStore::open(&db_path).unwrap();
        let session = store.create_session(None).unwrap();
        store.add_message(&session.local_id, Role::User, "before restart").unwrap();
        session.local_id
    };

    let store = SessionStore::open(&db_path).unwrap();
    assert_eq!(store.pending_count().unwrap(), 2);
    assert_eq!(store.get_messages(&local_id).unwrap()[0].content, "before restart");

    let link = SwitchLink::offline();
    let hub = RecordingHub::new();
    link.connect(hub.clone());
    let sync = engine(&store, &link, &EventBus::new());
    assert!(sync.sync_all().await);
    assert_eq!(hub.count("create_session"), 1);
    assert_eq!(hub.count("append_message:before restart"), 1);
    assert_eq!(store.pending_count().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_sync_requests_push_each_operation_once() {
    let store = SessionStore::in_memory().unwrap();
    let link = SwitchLink::offline();
    let hub = RecordingHub::new();
    *hub.latency.lock() = Some(Duration::from_millis(40));
    link.connect(hub.clone());
    let sync = engine(&store, &link, &EventBus::new());

    let session = store.create_session(Some("Busy")).unwrap();
    for i in 0..4 {
        store.add_message(&session.local_id, Role::User, &format!("m{i}")).unwrap();
    }

    let (a, b, c) = tokio::join!(sync.sync_all(), sync.sync_all(), sync.sync_all());
    assert_eq!([a, b, c].iter().filter(|ran| **ran).count(), 1);
    assert_eq!(hub.count("create_session"), 1);
    assert_eq!(hub.count("append_message"), 4);
    assert_eq!(sync.get_pending_count(), 0);
}

#[tokio::test]
async fn test_offline_rename_pushes_latest_title() {
    let store = SessionStore::in_memory().unwrap();
    let link = SwitchLink::offline();
    let hub = RecordingHub::new();
    link.connect(hub.clone());
    let sync = engine(&store, &link, &EventBus::new());

    let session = store.create_session(Some("Draft")).unwrap();
    assert!(sync.sync_all().await);

    link.disconnect();
    store.rename_session(&session.local_id, "Holiday plan").unwrap();
    store.rename_session(&session.local_id, "Holiday plan v2").unwrap();
    assert_eq!(
        store.get_session(&session.local_id).unwrap().sync_status,
        SyncStatus::Pending
    );

    link.connect(hub.clone());
    assert!(sync.sync_all().await);
    assert_eq!(hub.sessions.lock()[0].title, "Holiday plan v2");
    assert_eq!(
        store.get_session(&session.local_id).unwrap().sync_status,
        SyncStatus::Synced
    );
}

#[tokio::test]
async fn test_remote_sessions_appear_after_pull() {
    let store = SessionStore::in_memory().unwrap();
    let link = SwitchLink::offline();
    let hub = RecordingHub::new();
    link.connect(hub.clone());
    let sync = engine(&store, &link, &EventBus::new());

    hub.create_session_for_test("From phone");
    let applied = sync.pull_remote_metadata().await.unwrap();
    assert_eq!(applied, 1);

    let sessions = store.list_sessions(false).unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].title, "From phone");
    assert_eq!(sessions[0].sync_status, SyncStatus::Synced);
}
