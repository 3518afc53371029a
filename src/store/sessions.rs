//! 会话存储：会话 / 消息 CRUD 与同步队列
//!
//! 所有写操作都经过这里；每个修改与它的同步操作在同一事务中落盘。

use std::path::Path;

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::database::Database;
use super::models::{
    format_ts, now_ts, parse_ts, Message, Role, Session, SyncOperation, SyncPayload, SyncStatus,
};
use super::StoreError;

pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// 远端会话元数据（拉取合并用）
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteMetadata {
    pub remote_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

const SESSION_COLUMNS: &str =
    "local_id, remote_id, title, created_at, last_activity, sync_status, deleted";
const MESSAGE_COLUMNS: &str = "id, session_id, role, content, seq, created_at";

struct SessionRow {
    local_id: String,
    remote_id: Option<String>,
    title: String,
    created_at: String,
    last_activity: String,
    sync_status: String,
    deleted: bool,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            local_id: row.get(0)?,
            remote_id: row.get(1)?,
            title: row.get(2)?,
            created_at: row.get(3)?,
            last_activity: row.get(4)?,
            sync_status: row.get(5)?,
            deleted: row.get::<_, i64>(6)? != 0,
        })
    }

    fn into_session(self) -> Result<Session, StoreError> {
        Ok(Session {
            local_id: self.local_id,
            remote_id: self.remote_id,
            title: self.title,
            created_at: parse_ts(&self.created_at)?,
            last_activity: parse_ts(&self.last_activity)?,
            sync_status: SyncStatus::parse(&self.sync_status)?,
            deleted: self.deleted,
        })
    }
}

struct MessageRow {
    id: String,
    session_id: String,
    role: String,
    content: String,
    seq: i64,
    created_at: String,
}

impl MessageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            role: row.get(2)?,
            content: row.get(3)?,
            seq: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_message(self) -> Result<Message, StoreError> {
        Ok(Message {
            id: self.id,
            session_id: self.session_id,
            role: Role::parse(&self.role)?,
            content: self.content,
            seq: self.seq,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

fn load_session(conn: &Connection, local_id: &str) -> Result<Option<Session>, StoreError> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE local_id = ?1");
    let row = conn
        .query_row(&sql, [local_id], SessionRow::from_row)
        .optional()?;
    row.map(SessionRow::into_session).transpose()
}

fn require_session(conn: &Connection, local_id: &str) -> Result<Session, StoreError> {
    load_session(conn, local_id)?.ok_or_else(|| StoreError::NotFound(format!("session {local_id}")))
}

fn require_live_session(conn: &Connection, local_id: &str) -> Result<Session, StoreError> {
    let session = require_session(conn, local_id)?;
    if session.deleted {
        return Err(StoreError::InvalidState(format!("session {local_id} is deleted")));
    }
    Ok(session)
}

fn enqueue(conn: &Connection, session_id: &str, payload: &SyncPayload) -> Result<i64, StoreError> {
    let json = serde_json::to_string(payload)?;
    conn.execute(
        "INSERT INTO sync_queue (kind, session_id, payload, enqueued_at) VALUES (?1, ?2, ?3, ?4)",
        params![payload.kind().as_str(), session_id, json, format_ts(&now_ts())],
    )?;
    Ok(conn.last_insert_rowid())
}

/// 已绑定远端 ID 的会话发生本地修改后标记为 pending
fn touch_pending(conn: &Connection, session: &Session) -> Result<(), StoreError> {
    if session.remote_id.is_some() {
        conn.execute(
            "UPDATE sessions SET sync_status = 'pending' WHERE local_id = ?1",
            [&session.local_id],
        )?;
    }
    Ok(())
}

/// 会话存储（单写者）
#[derive(Clone)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::in_memory()?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// 新建本地会话并入队 create_session
    pub fn create_session(&self, title: Option<&str>) -> Result<Session, StoreError> {
        let now = now_ts();
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_SESSION_TITLE)
            .to_string();
        let session = Session {
            local_id: uuid::Uuid::new_v4().to_string(),
            remote_id: None,
            title,
            created_at: now,
            last_activity: now,
            sync_status: SyncStatus::Local,
            deleted: false,
        };

        self.db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO sessions (local_id, title, created_at, last_activity, sync_status)
                 VALUES (?1, ?2, ?3, ?4, 'local')",
                params![
                    session.local_id,
                    session.title,
                    format_ts(&session.created_at),
                    format_ts(&session.last_activity)
                ],
            )?;
            enqueue(tx, &session.local_id, &SyncPayload::CreateSession)?;
            Ok(())
        })?;

        tracing::debug!(session_id = %session.local_id, "Session created");
        Ok(session)
    }

    /// 追加消息：分配会话内下一个序号，入队 add_message
    pub fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message, StoreError> {
        self.db.with_tx(|tx| {
            let session = require_live_session(tx, session_id)?;
            let seq: i64 = tx.query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE session_id = ?1",
                [session_id],
                |row| row.get(0),
            )?;
            let message = Message {
                id: uuid::Uuid::new_v4().to_string(),
                session_id: session_id.to_string(),
                role,
                content: content.to_string(),
                seq,
                created_at: now_ts(),
            };
            let created_at = format_ts(&message.created_at);

            tx.execute(
                "INSERT INTO messages (id, session_id, role, content, seq, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.id,
                    message.session_id,
                    role.as_str(),
                    message.content,
                    message.seq,
                    created_at
                ],
            )?;
            tx.execute(
                "UPDATE sessions SET last_activity = ?1 WHERE local_id = ?2",
                params![created_at, session_id],
            )?;
            touch_pending(tx, &session)?;
            enqueue(
                tx,
                session_id,
                &SyncPayload::AddMessage {
                    message_id: message.id.clone(),
                },
            )?;
            Ok(message)
        })
    }

    pub fn rename_session(&self, session_id: &str, title: &str) -> Result<(), StoreError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(StoreError::InvalidState("title must not be empty".into()));
        }
        self.db.with_tx(|tx| {
            let session = require_live_session(tx, session_id)?;
            tx.execute(
                "UPDATE sessions SET title = ?1 WHERE local_id = ?2",
                params![title, session_id],
            )?;
            touch_pending(tx, &session)?;
            enqueue(
                tx,
                session_id,
                &SyncPayload::UpdateSession {
                    title: title.to_string(),
                },
            )?;
            Ok(())
        })
    }

    /// 删除会话
    ///
    /// soft 删除只打标记并入队 delete_session，等远端确认后再清除行。
    /// soft=false 且会话从未同步过时直接物理删除（连同其排队操作）；
    /// 已同步的会话仍按软删除处理。
    pub fn delete_session(&self, session_id: &str, soft: bool) -> Result<(), StoreError> {
        self.db.with_tx(|tx| {
            let session = require_session(tx, session_id)?;
            if session.deleted {
                return Ok(());
            }

            if !soft && session.remote_id.is_none() {
                tx.execute("DELETE FROM sync_queue WHERE session_id = ?1", [session_id])?;
                tx.execute("DELETE FROM sessions WHERE local_id = ?1", [session_id])?;
                tracing::debug!(session_id, "Unsynced session removed");
                return Ok(());
            }

            tx.execute(
                "UPDATE sessions SET deleted = 1 WHERE local_id = ?1",
                [session_id],
            )?;
            touch_pending(tx, &session)?;
            enqueue(
                tx,
                session_id,
                &SyncPayload::DeleteSession {
                    remote_id: session.remote_id.clone(),
                },
            )?;
            Ok(())
        })
    }

    /// 绑定远端 ID，仅由同步引擎在远端创建/导入确认后调用
    pub fn mark_synced(&self, session_id: &str, remote_id: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE sessions SET remote_id = ?1, sync_status = 'synced' WHERE local_id = ?2",
                params![remote_id, session_id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("session {session_id}")));
            }
            Ok(())
        })
    }

    pub fn get_session(&self, session_id: &str) -> Result<Session, StoreError> {
        self.db.with_conn(|conn| require_session(conn, session_id))
    }

    pub fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<Session>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE remote_id = ?1");
            let row = conn
                .query_row(&sql, [remote_id], SessionRow::from_row)
                .optional()?;
            row.map(SessionRow::into_session).transpose()
        })
    }

    /// 按最近活动倒序
    pub fn list_sessions(&self, include_deleted: bool) -> Result<Vec<Session>, StoreError> {
        self.db.with_conn(|conn| {
            let filter = if include_deleted { "" } else { "WHERE deleted = 0" };
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions {filter} ORDER BY last_activity DESC, created_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], SessionRow::from_row)?;
            let sessions = rows
                .map(|r| r.map_err(StoreError::from).and_then(SessionRow::into_session))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(sessions)
        })
    }

    /// 按序号升序返回全部消息
    pub fn get_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ?1 ORDER BY seq ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([session_id], MessageRow::from_row)?;
            let messages = rows
                .map(|r| r.map_err(StoreError::from).and_then(MessageRow::into_message))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
    }

    /// 最近 limit 条消息，仍按序号升序
    pub fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ?1 ORDER BY seq DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![session_id, limit as i64], MessageRow::from_row)?;
            let mut messages = rows
                .map(|r| r.map_err(StoreError::from).and_then(MessageRow::into_message))
                .collect::<Result<Vec<_>, _>>()?;
            messages.reverse();
            Ok(messages)
        })
    }

    pub fn get_message(&self, message_id: &str) -> Result<Option<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
            let row = conn
                .query_row(&sql, [message_id], MessageRow::from_row)
                .optional()?;
            row.map(MessageRow::into_message).transpose()
        })
    }

    /// 全部待同步操作，按入队顺序
    pub fn pending_operations(&self) -> Result<Vec<SyncOperation>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, payload, enqueued_at, attempts, last_error
                 FROM sync_queue ORDER BY id ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?;

            let mut ops = Vec::new();
            for row in rows {
                let (id, session_id, payload, enqueued_at, attempts, last_error) = row?;
                ops.push(SyncOperation {
                    id,
                    session_id,
                    payload: serde_json::from_str(&payload)?,
                    enqueued_at: parse_ts(&enqueued_at)?,
                    attempts,
                    last_error,
                });
            }
            Ok(ops)
        })
    }

    pub fn remove_operation(&self, op_id: i64) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM sync_queue WHERE id = ?1", [op_id])?;
            Ok(removed > 0)
        })
    }

    /// 记录一次失败，操作本身留在队列里
    pub fn record_operation_failure(&self, op_id: i64, error: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE sync_queue SET attempts = attempts + 1, last_error = ?1 WHERE id = ?2",
                params![error, op_id],
            )?;
            Ok(())
        })
    }

    pub fn pending_count(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    /// 是否还有未推送的重命名
    pub fn has_pending_update(&self, session_id: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sync_queue WHERE session_id = ?1 AND kind = 'update_session'",
                [session_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// 导入远端独有的会话（不入队）
    pub fn import_remote_session(&self, remote: &RemoteMetadata) -> Result<Session, StoreError> {
        let session = Session {
            local_id: uuid::Uuid::new_v4().to_string(),
            remote_id: Some(remote.remote_id.clone()),
            title: remote.title.clone(),
            created_at: remote.created_at.trunc_subsecs(6),
            last_activity: remote.last_activity.trunc_subsecs(6),
            sync_status: SyncStatus::Synced,
            deleted: false,
        };
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (local_id, remote_id, title, created_at, last_activity, sync_status)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'synced')",
                params![
                    session.local_id,
                    session.remote_id,
                    session.title,
                    format_ts(&session.created_at),
                    format_ts(&session.last_activity)
                ],
            )?;
            Ok(())
        })?;
        tracing::debug!(session_id = %session.local_id, remote_id = %remote.remote_id, "Remote session imported");
        Ok(session)
    }

    /// 用远端元数据覆盖本地标题 / 最近活动时间（不入队）
    ///
    /// title 为 None 时保留本地标题；最近活动时间只会前移。
    pub fn apply_remote_metadata(
        &self,
        session_id: &str,
        title: Option<&str>,
        last_activity: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let session = require_session(conn, session_id)?;
            let title = title.unwrap_or(&session.title);
            let activity = session.last_activity.max(last_activity.trunc_subsecs(6));
            conn.execute(
                "UPDATE sessions SET title = ?1, last_activity = ?2 WHERE local_id = ?3",
                params![title, format_ts(&activity), session_id],
            )?;
            Ok(())
        })
    }

    /// 按队列内容重新计算已绑定会话的同步状态
    pub fn refresh_sync_status(&self, session_id: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let Some(session) = load_session(conn, session_id)? else {
                return Ok(());
            };
            if session.remote_id.is_none() {
                return Ok(());
            }
            let queued: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sync_queue WHERE session_id = ?1",
                [session_id],
                |row| row.get(0),
            )?;
            let status = if queued == 0 {
                SyncStatus::Synced
            } else {
                SyncStatus::Pending
            };
            conn.execute(
                "UPDATE sessions SET sync_status = ?1 WHERE local_id = ?2",
                params![status.as_str(), session_id],
            )?;
            Ok(())
        })
    }

    /// 物理删除会话、消息及其排队操作
    pub fn purge_session(&self, session_id: &str) -> Result<(), StoreError> {
        self.db.with_tx(|tx| {
            tx.execute("DELETE FROM sync_queue WHERE session_id = ?1", [session_id])?;
            tx.execute("DELETE FROM sessions WHERE local_id = ?1", [session_id])?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::OperationKind;

    fn store() -> SessionStore {
        SessionStore::in_memory().unwrap()
    }

    fn kinds(store: &SessionStore) -> Vec<OperationKind> {
        store
            .pending_operations()
            .unwrap()
            .iter()
            .map(|op| op.kind())
            .collect()
    }

    #[test]
    fn test_create_session_enqueues_create() {
        let store = store();
        let session = store.create_session(None).unwrap();
        assert_eq!(session.title, DEFAULT_SESSION_TITLE);
        assert_eq!(session.sync_status, SyncStatus::Local);
        assert!(session.remote_id.is_none());
        assert_eq!(kinds(&store), vec![OperationKind::CreateSession]);
        assert_eq!(store.get_session(&session.local_id).unwrap(), session);
    }

    #[test]
    fn test_returned_records_match_reloaded_rows() {
        let store = store();
        let session = store.create_session(Some("stamped")).unwrap();
        let message = store.add_message(&session.local_id, Role::User, "hi").unwrap();
        assert_eq!(store.get_messages(&session.local_id).unwrap(), vec![message.clone()]);

        let reloaded = store.get_session(&session.local_id).unwrap();
        assert_eq!(reloaded.created_at, session.created_at);
        assert_eq!(reloaded.last_activity, message.created_at);
        assert_eq!(message.created_at.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn test_message_sequence_is_gap_free_from_one() {
        let store = store();
        let a = store.create_session(Some("a")).unwrap();
        let b = store.create_session(Some("b")).unwrap();

        for i in 0..3 {
            store.add_message(&a.local_id, Role::User, &format!("a{i}")).unwrap();
            store.add_message(&b.local_id, Role::User, &format!("b{i}")).unwrap();
        }
        store.add_message(&a.local_id, Role::Assistant, "a3").unwrap();

        let messages = store.get_messages(&a.local_id).unwrap();
        let seqs: Vec<i64> = messages.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert_eq!(messages[3].content, "a3");
        assert_eq!(messages[3].role, Role::Assistant);

        let seqs: Vec<i64> = store.get_messages(&b.local_id).unwrap().iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_queue_preserves_enqueue_order() {
        let store = store();
        let s = store.create_session(Some("chat")).unwrap();
        store.add_message(&s.local_id, Role::User, "one").unwrap();
        store.rename_session(&s.local_id, "renamed").unwrap();
        store.add_message(&s.local_id, Role::User, "two").unwrap();

        assert_eq!(
            kinds(&store),
            vec![
                OperationKind::CreateSession,
                OperationKind::AddMessage,
                OperationKind::UpdateSession,
                OperationKind::AddMessage,
            ]
        );
        let ids: Vec<i64> = store.pending_operations().unwrap().iter().map(|op| op.id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert!(store.has_pending_update(&s.local_id).unwrap());
        assert_eq!(store.pending_count().unwrap(), 4);
    }

    #[test]
    fn test_soft_delete_hides_session_and_rejects_messages() {
        let store = store();
        let s = store.create_session(None).unwrap();
        store.delete_session(&s.local_id, true).unwrap();

        assert!(store.list_sessions(false).unwrap().is_empty());
        assert_eq!(store.list_sessions(true).unwrap().len(), 1);
        assert!(store.get_session(&s.local_id).unwrap().deleted);
        assert!(matches!(
            store.add_message(&s.local_id, Role::User, "late"),
            Err(StoreError::InvalidState(_))
        ));
        assert_eq!(
            kinds(&store),
            vec![OperationKind::CreateSession, OperationKind::DeleteSession]
        );

        // 重复删除是空操作
        store.delete_session(&s.local_id, true).unwrap();
        assert_eq!(store.pending_count().unwrap(), 2);
    }

    #[test]
    fn test_hard_delete_of_unsynced_session_drops_queue() {
        let store = store();
        let s = store.create_session(None).unwrap();
        store.add_message(&s.local_id, Role::User, "hi").unwrap();
        store.delete_session(&s.local_id, false).unwrap();

        assert_eq!(store.pending_count().unwrap(), 0);
        assert!(matches!(
            store.get_session(&s.local_id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_hard_delete_of_synced_session_degrades_to_soft() {
        let store = store();
        let s = store.create_session(None).unwrap();
        store.mark_synced(&s.local_id, "r-1").unwrap();
        let op = store.pending_operations().unwrap().remove(0);
        store.remove_operation(op.id).unwrap();

        store.delete_session(&s.local_id, false).unwrap();
        let session = store.get_session(&s.local_id).unwrap();
        assert!(session.deleted);
        assert_eq!(session.sync_status, SyncStatus::Pending);
        let ops = store.pending_operations().unwrap();
        assert_eq!(
            ops[0].payload,
            SyncPayload::DeleteSession {
                remote_id: Some("r-1".into())
            }
        );
    }

    #[test]
    fn test_mutation_after_sync_marks_pending_then_refresh() {
        let store = store();
        let s = store.create_session(None).unwrap();
        store.mark_synced(&s.local_id, "r-9").unwrap();
        for op in store.pending_operations().unwrap() {
            store.remove_operation(op.id).unwrap();
        }
        assert_eq!(store.get_session(&s.local_id).unwrap().sync_status, SyncStatus::Synced);

        store.add_message(&s.local_id, Role::User, "hello").unwrap();
        assert_eq!(store.get_session(&s.local_id).unwrap().sync_status, SyncStatus::Pending);

        let op = store.pending_operations().unwrap().remove(0);
        store.remove_operation(op.id).unwrap();
        store.refresh_sync_status(&s.local_id).unwrap();
        assert_eq!(store.get_session(&s.local_id).unwrap().sync_status, SyncStatus::Synced);
        assert_eq!(
            store.find_by_remote_id("r-9").unwrap().map(|s| s.local_id),
            Some(s.local_id)
        );
    }

    #[test]
    fn test_operation_failure_is_recorded() {
        let store = store();
        store.create_session(None).unwrap();
        let op = store.pending_operations().unwrap().remove(0);
        store.record_operation_failure(op.id, "HTTP 500").unwrap();
        store.record_operation_failure(op.id, "HTTP 503").unwrap();

        let op = store.pending_operations().unwrap().remove(0);
        assert_eq!(op.attempts, 2);
        assert_eq!(op.last_error.as_deref(), Some("HTTP 503"));
    }

    #[test]
    fn test_import_and_apply_remote_metadata() {
        let store = store();
        let now = Utc::now();
        let imported = store
            .import_remote_session(&RemoteMetadata {
                remote_id: "remote-a".into(),
                title: "From phone".into(),
                created_at: now,
                last_activity: now,
            })
            .unwrap();
        assert_eq!(imported.sync_status, SyncStatus::Synced);
        assert_eq!(store.pending_count().unwrap(), 0);

        let later = now + chrono::Duration::seconds(30);
        store
            .apply_remote_metadata(&imported.local_id, Some("Renamed remotely"), later)
            .unwrap();
        let session = store.get_session(&imported.local_id).unwrap();
        assert_eq!(session.title, "Renamed remotely");
        assert_eq!(session.last_activity.timestamp(), later.timestamp());

        // 更早的远端时间不会让最近活动倒退
        store.apply_remote_metadata(&imported.local_id, None, now).unwrap();
        let session = store.get_session(&imported.local_id).unwrap();
        assert_eq!(session.title, "Renamed remotely");
        assert_eq!(session.last_activity.timestamp(), later.timestamp());
    }

    #[test]
    fn test_recent_messages_keeps_ascending_order() {
        let store = store();
        let s = store.create_session(None).unwrap();
        for i in 1..=5 {
            store.add_message(&s.local_id, Role::User, &format!("m{i}")).unwrap();
        }
        let recent = store.recent_messages(&s.local_id, 2).unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m5"]);

        let message = store.get_message(&recent[0].id).unwrap().unwrap();
        assert_eq!(message.seq, 4);
    }

    #[test]
    fn test_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bee.db");
        let session_id = {
            let store = SessionStore::open(&path).unwrap();
            let s = store.create_session(Some("durable")).unwrap();
            store.add_message(&s.local_id, Role::User, "persist me").unwrap();
            s.local_id
        };

        let store = SessionStore::open(&path).unwrap();
        assert_eq!(store.get_session(&session_id).unwrap().title, "durable");
        assert_eq!(store.get_messages(&session_id).unwrap().len(), 1);
        assert_eq!(store.pending_count().unwrap(), 2);
    }

    #[test]
    fn test_errors_do_not_block_later_operations() {
        let store = store();
        assert!(matches!(
            store.add_message("missing", Role::User, "x"),
            Err(StoreError::NotFound(_))
        ));
        assert!(store.rename_session("missing", "t").is_err());
        let s = store.create_session(None).unwrap();
        assert!(store.add_message(&s.local_id, Role::User, "ok").is_ok());
    }
}
