//! SQLite-backed session store.
//!
//! The store owns the `sessions` table. Status changes go through
//! conditional updates (`... WHERE status = ?`), which makes the first
//! transition win under concurrency; later callers observe the settled row.

use super::{Session, SessionStatus};
use crate::db::{db_err, Database};
use crate::error::{Error, ErrorKind, Result};
use crate::normalize;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

/// Durable pending actions and wizard state keyed by session id.
#[derive(Clone)]
pub struct SessionStore {
    db: Database,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(db: Database, ttl_secs: i64) -> Self {
        Self {
            db,
            ttl: Duration::seconds(ttl_secs),
        }
    }

    /// Insert a new `PENDING` session and return it with its generated id.
    ///
    /// The snapshot is passed through the recursive normaliser before the
    /// insert so a non-JSON-native value can never abort the write and leave
    /// the caller without a session id.
    pub fn create(&self, user_id: i64, pending_action: Value) -> Result<Session> {
        let pending_action = normalize::normalize(pending_action);
        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let session = Session {
            session_id: session_id.clone(),
            user_id,
            pending_action,
            status: SessionStatus::Pending,
            user_response: None,
            execution_result: None,
            created_at: now,
            updated_at: now,
            expires_at: now + self.ttl,
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (session_id, user_id, pending_action, status,
                                       created_at, updated_at, expires_at)
                 VALUES (?1, ?2, ?3, 'PENDING', ?4, ?5, ?6)",
                params![
                    session.session_id,
                    session.user_id,
                    session.pending_action.to_string(),
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                    session.expires_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })?;
        info!(session_id = %session.session_id, user_id, "session created");
        Ok(session)
    }

    /// Fetch a session by id.
    pub fn get(&self, session_id: &str) -> Result<Option<Session>> {
        self.db.with_conn(|conn| {
            let raw: Option<SessionRow> = conn
                .query_row(
                    "SELECT session_id, user_id, pending_action, status, user_response,
                            execution_result, created_at, updated_at, expires_at
                     FROM sessions WHERE session_id = ?1",
                    params![session_id],
                    |row| {
                        Ok(SessionRow {
                            session_id: row.get(0)?,
                            user_id: row.get(1)?,
                            pending_action: row.get(2)?,
                            status: row.get(3)?,
                            user_response: row.get(4)?,
                            execution_result: row.get(5)?,
                            created_at: row.get(6)?,
                            updated_at: row.get(7)?,
                            expires_at: row.get(8)?,
                        })
                    },
                )
                .optional()
                .map_err(db_err)?;
            raw.map(SessionRow::into_session).transpose()
        })
    }

    /// Fetch a session or fail with `session_not_found`.
    pub fn require(&self, session_id: &str) -> Result<Session> {
        self.get(session_id)?.ok_or_else(|| {
            Error::tool(
                ErrorKind::SessionNotFound,
                "session",
                ErrorKind::SessionNotFound.user_message(),
            )
        })
    }

    /// Conditionally move a session from `from` to `to`, storing the given
    /// response/result blobs. Returns `false` when the row was not in `from`
    /// (another caller won the race or the session expired).
    pub fn try_transition(
        &self,
        session_id: &str,
        from: SessionStatus,
        to: SessionStatus,
        user_response: Option<&Value>,
        execution_result: Option<&Value>,
    ) -> Result<bool> {
        if !from.can_transition_to(to) {
            return Err(Error::internal(format!(
                "illegal session transition {} -> {}",
                from.as_str(),
                to.as_str()
            )));
        }
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions
                 SET status = ?1,
                     user_response = COALESCE(?2, user_response),
                     execution_result = COALESCE(?3, execution_result),
                     updated_at = ?4
                 WHERE session_id = ?5 AND status = ?6",
                params![
                    to.as_str(),
                    user_response.map(|v| v.to_string()),
                    execution_result.map(|v| v.to_string()),
                    Utc::now().to_rfc3339(),
                    session_id,
                    from.as_str(),
                ],
            )
            .map_err(db_err)
        })?;
        debug!(session_id, from = from.as_str(), to = to.as_str(), won = changed > 0, "session transition");
        Ok(changed > 0)
    }

    /// Replace the pending-action snapshot of a still-`PENDING` session
    /// (wizard step advancement). Returns `false` if the session settled.
    pub fn update_pending_action(&self, session_id: &str, pending_action: Value) -> Result<bool> {
        let pending_action = normalize::normalize(pending_action);
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET pending_action = ?1, updated_at = ?2
                 WHERE session_id = ?3 AND status = 'PENDING'",
                params![pending_action.to_string(), Utc::now().to_rfc3339(), session_id],
            )
            .map_err(db_err)
        })?;
        Ok(changed > 0)
    }

    /// Mark every `PENDING` session past its expiry as `EXPIRED`. The
    /// background reaper calls this; it is exposed here because the store
    /// owns the conditional bulk transition.
    pub fn expire_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET status = 'EXPIRED', updated_at = ?1
                 WHERE status = 'PENDING' AND expires_at < ?1",
                params![now.to_rfc3339()],
            )
            .map_err(db_err)
        })?;
        if expired > 0 {
            info!(expired, "sessions expired");
        }
        Ok(expired)
    }
}

struct SessionRow {
    session_id: String,
    user_id: i64,
    pending_action: String,
    status: String,
    user_response: Option<String>,
    execution_result: Option<String>,
    created_at: String,
    updated_at: String,
    expires_at: String,
}

impl SessionRow {
    fn into_session(self) -> Result<Session> {
        Ok(Session {
            session_id: self.session_id,
            user_id: self.user_id,
            pending_action: serde_json::from_str(&self.pending_action)?,
            status: SessionStatus::parse(&self.status)
                .ok_or_else(|| Error::database(format!("bad session status '{}'", self.status)))?,
            user_response: self.user_response.as_deref().map(serde_json::from_str).transpose()?,
            execution_result: self
                .execution_result
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            expires_at: parse_ts(&self.expires_at)?,
        })
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    s.parse()
        .map_err(|e| Error::database(format!("bad session timestamp '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn store() -> SessionStore {
        SessionStore::new(Database::in_memory().unwrap(), 3600)
    }

    #[test]
    fn test_create_and_get_round_trip() {
        let store = store();
        let snapshot = json!({
            "kind": "confirmation",
            "action": "remove_vehicle",
            "trip_id": 5,
            "consequences": {"booking_count": 8, "dates": ["2026-08-01", {"at": "07:30"}]},
        });
        let session = store.create(1, snapshot.clone()).unwrap();
        assert!(!session.session_id.is_empty());
        assert_eq!(session.status, SessionStatus::Pending);

        let loaded = store.require(&session.session_id).unwrap();
        assert_eq!(loaded.pending_action, snapshot);
        assert_eq!(loaded.user_id, 1);
        assert!(loaded.expires_at > loaded.created_at);
    }

    #[test]
    fn test_ids_are_opaque_and_unique() {
        let store = store();
        let a = store.create(1, json!({})).unwrap();
        let b = store.create(1, json!({})).unwrap();
        assert_ne!(a.session_id, b.session_id);
        // UUID text form.
        assert_eq!(a.session_id.len(), 36);
    }

    #[test]
    fn test_missing_session() {
        let store = store();
        assert!(store.get("no-such-id").unwrap().is_none());
        let err = store.require("no-such-id").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
    }

    #[test]
    fn test_conditional_transition_first_wins() {
        let store = store();
        let session = store.create(1, json!({"action": "cancel_trip"})).unwrap();

        let won = store
            .try_transition(&session.session_id, SessionStatus::Pending, SessionStatus::Confirmed, None, None)
            .unwrap();
        assert!(won);

        // Second claim loses: the row is no longer PENDING.
        let won_again = store
            .try_transition(&session.session_id, SessionStatus::Pending, SessionStatus::Confirmed, None, None)
            .unwrap();
        assert!(!won_again);

        let done = store
            .try_transition(
                &session.session_id,
                SessionStatus::Confirmed,
                SessionStatus::Done,
                None,
                Some(&json!({"ok": true})),
            )
            .unwrap();
        assert!(done);

        let settled = store.require(&session.session_id).unwrap();
        assert_eq!(settled.status, SessionStatus::Done);
        assert_eq!(settled.execution_result, Some(json!({"ok": true})));
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let store = store();
        let session = store.create(1, json!({})).unwrap();
        let err = store
            .try_transition(&session.session_id, SessionStatus::Pending, SessionStatus::Done, None, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalError);
    }

    #[test]
    fn test_cancel_records_user_response() {
        let store = store();
        let session = store.create(1, json!({"action": "cancel_trip"})).unwrap();
        store
            .try_transition(
                &session.session_id,
                SessionStatus::Pending,
                SessionStatus::Cancelled,
                Some(&json!({"confirmed": false})),
                None,
            )
            .unwrap();
        let settled = store.require(&session.session_id).unwrap();
        assert_eq!(settled.status, SessionStatus::Cancelled);
        assert_eq!(settled.user_response, Some(json!({"confirmed": false})));
    }

    #[test]
    fn test_update_pending_action_only_while_pending() {
        let store = store();
        let session = store.create(1, json!({"kind": "wizard", "step": 1})).unwrap();
        assert!(store
            .update_pending_action(&session.session_id, json!({"kind": "wizard", "step": 2}))
            .unwrap());

        store
            .try_transition(&session.session_id, SessionStatus::Pending, SessionStatus::Cancelled, None, None)
            .unwrap();
        assert!(!store
            .update_pending_action(&session.session_id, json!({"kind": "wizard", "step": 3}))
            .unwrap());
    }

    #[test]
    fn test_expire_due() {
        let store = SessionStore::new(Database::in_memory().unwrap(), -10);
        let session = store.create(1, json!({})).unwrap();
        let expired = store.expire_due(Utc::now()).unwrap();
        assert_eq!(expired, 1);
        let settled = store.require(&session.session_id).unwrap();
        assert_eq!(settled.status, SessionStatus::Expired);

        // Settled sessions are not re-expired.
        assert_eq!(store.expire_due(Utc::now()).unwrap(), 0);
    }

    #[test]
    fn test_deeply_nested_snapshot_round_trip() {
        let store = store();
        let snapshot = json!({
            "kind": "wizard",
            "wizard": {
                "data": {
                    "trip_date": "2026-08-02",
                    "stops": [[1, {"pos": "a"}], [2, {"pos": "b"}]],
                    "meta": {"times": ["07:30", "18:00"], "fraction": 0.25},
                }
            }
        });
        let session = store.create(1, snapshot.clone()).unwrap();
        let loaded = store.require(&session.session_id).unwrap();
        assert_eq!(loaded.pending_action, snapshot);
        assert!(loaded.is_wizard());
    }
}
