//! The confirmation protocol: the gate node that parks a risky action in
//! the session store, and the endpoint that later executes or discards it.
//!
//! The conditional status update in the store is the serialisation point:
//! of two concurrent confirm calls, exactly one claims the `PENDING` row and
//! executes; the other observes the settled row and replays its outcome.

use crate::actions::Action;
use crate::error::{ErrorKind, Result};
use crate::executor::ActionExecutorNode;
use crate::graph::{nodes, GraphNode};
use crate::report::{build_final_output, status, AgentOutput};
use crate::session::{SessionStatus, SessionStore};
use crate::state::{keys, State};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// The confirmation gate node: serialises and persists a pending action,
/// then reports with the opaque session id.
pub struct ConfirmationGateNode {
    sessions: SessionStore,
}

impl ConfirmationGateNode {
    pub fn new(sessions: SessionStore) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl GraphNode for ConfirmationGateNode {
    fn name(&self) -> &'static str {
        nodes::CONFIRMATION_GATE
    }

    async fn run(&self, mut state: State) -> Result<State> {
        let action = state.get_str(keys::ACTION).unwrap_or("unknown").to_string();
        let user_id = state.get_i64(keys::USER_ID).unwrap_or(0);

        // Everything the executor will need later, snapshotted. The store
        // runs this through the recursive normaliser before the insert.
        let mut snapshot = json!({
            "kind": "confirmation",
            "action": &action,
            "user_id": user_id,
        });
        let entries = snapshot.as_object_mut().expect("literal object");
        if let Some(trip_id) = state.get_i64(keys::TRIP_ID) {
            entries.insert("trip_id".into(), json!(trip_id));
        }
        if let Some(label) = state.get_str(keys::TRIP_LABEL) {
            entries.insert("trip_label".into(), json!(label));
        }
        if let Some(params) = state.get(keys::PARSED_PARAMS) {
            entries.insert("parsed_params".into(), params.clone());
        }
        if let Some(consequences) = state.get(keys::CONSEQUENCES) {
            entries.insert("consequences".into(), consequences.clone());
        }
        if let Some(warnings) = state.get(keys::WARNING_MESSAGES) {
            entries.insert("warning_messages".into(), warnings.clone());
        }

        let session = self.sessions.create(user_id, snapshot)?;
        info!(session_id = %session.session_id, %action, "pending action stored");

        let warnings = state
            .get_array(keys::WARNING_MESSAGES)
            .map(|w| {
                w.iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        let action_words = action.replace('_', " ");
        let subject = state
            .get_str(keys::TRIP_LABEL)
            .map(|label| format!(" on '{}'", label))
            .unwrap_or_default();
        let message = if warnings.is_empty() {
            format!("You are about to {}{}. Do you want to proceed?", action_words, subject)
        } else {
            format!(
                "You are about to {}{}. {} Do you want to proceed?",
                action_words, subject, warnings
            )
        };

        state.set(keys::PENDING_ACTION, session.pending_action.clone());
        state.set(keys::SESSION_ID, session.session_id);
        state.set(keys::STATUS, status::AWAITING_CONFIRMATION);
        state.set(keys::CONFIRMATION_REQUIRED, true);
        state.set(keys::MESSAGE, message);
        Ok(state)
    }
}

/// The auxiliary confirmation entry path: `POST /agent/confirm`.
pub struct ConfirmationEndpoint {
    sessions: SessionStore,
    executor: Arc<ActionExecutorNode>,
}

impl ConfirmationEndpoint {
    pub fn new(sessions: SessionStore, executor: Arc<ActionExecutorNode>) -> Self {
        Self { sessions, executor }
    }

    /// Handle a confirmation. Both branches are idempotent: repeating the
    /// call on a settled session replays the stored outcome unchanged.
    pub async fn handle(&self, session_id: &str, confirmed: bool, user_id: i64) -> AgentOutput {
        let session = match self.sessions.get(session_id) {
            Ok(Some(session)) => session,
            Ok(None) => {
                return failure_output(ErrorKind::SessionNotFound, ErrorKind::SessionNotFound.user_message())
            }
            Err(err) => {
                warn!(error = %err, "session lookup failed");
                return failure_output(err.kind(), err.user_message());
            }
        };

        if session.user_id != user_id {
            return failure_output(
                ErrorKind::Unauthorised,
                "That confirmation belongs to a different user.",
            );
        }
        if session.is_wizard() {
            return failure_output(
                ErrorKind::InvalidRequest,
                "That session is a guided flow; answer its current question instead.",
            );
        }

        match session.status {
            SessionStatus::Pending if !confirmed => self.cancel(&session.session_id, &session.pending_action).await,
            SessionStatus::Pending => self.execute(&session.session_id, &session.pending_action, user_id).await,
            _ => self.replay(&session),
        }
    }

    async fn cancel(&self, session_id: &str, snapshot: &Value) -> AgentOutput {
        let response = json!({"confirmed": false});
        match self
            .sessions
            .try_transition(session_id, SessionStatus::Pending, SessionStatus::Cancelled, Some(&response), None)
        {
            Ok(true) => {
                info!(session_id, "pending action cancelled");
                cancelled_output(snapshot)
            }
            Ok(false) => match self.sessions.get(session_id) {
                // Lost the race: replay whatever the winner settled on.
                Ok(Some(session)) => self.replay(&session),
                _ => failure_output(ErrorKind::SessionNotFound, ErrorKind::SessionNotFound.user_message()),
            },
            Err(err) => failure_output(err.kind(), err.user_message()),
        }
    }

    async fn execute(&self, session_id: &str, snapshot: &Value, user_id: i64) -> AgentOutput {
        let response = json!({"confirmed": true});
        let claimed = self.sessions.try_transition(
            session_id,
            SessionStatus::Pending,
            SessionStatus::Confirmed,
            Some(&response),
            None,
        );
        match claimed {
            Ok(true) => {}
            Ok(false) => {
                // The other caller won; return its outcome.
                return match self.sessions.get(session_id) {
                    Ok(Some(session)) => self.replay(&session),
                    _ => failure_output(ErrorKind::SessionNotFound, ErrorKind::SessionNotFound.user_message()),
                };
            }
            Err(err) => return failure_output(err.kind(), err.user_message()),
        }

        let mut state = state_from_snapshot(snapshot, user_id);
        if let Err(err) = self.executor.execute(&mut state) {
            state.set(keys::STATUS, status::FAILED);
            state.set_error(err.kind(), err.user_message());
        }
        let output_value = build_final_output(&state);

        let execution_result = state
            .get(keys::EXECUTION_RESULT)
            .cloned()
            .unwrap_or_else(|| json!({"ok": false, "message": "execution produced no result"}));
        let stored = json!({
            "ok": execution_result.get("ok").and_then(Value::as_bool).unwrap_or(false),
            "message": execution_result.get("message").cloned().unwrap_or(Value::Null),
            "output": output_value.clone(),
        });
        if let Err(err) = self.sessions.try_transition(
            session_id,
            SessionStatus::Confirmed,
            SessionStatus::Done,
            None,
            Some(&stored),
        ) {
            warn!(error = %err, session_id, "failed to settle session");
        }

        AgentOutput::from_value(output_value)
    }

    fn replay(&self, session: &crate::session::Session) -> AgentOutput {
        match session.status {
            SessionStatus::Done => session
                .execution_result
                .as_ref()
                .and_then(|result| result.get("output").cloned())
                .map(AgentOutput::from_value)
                .unwrap_or_else(|| {
                    failure_output(ErrorKind::SessionNotPending, ErrorKind::SessionNotPending.user_message())
                }),
            SessionStatus::Cancelled => cancelled_output(&session.pending_action),
            SessionStatus::Confirmed => AgentOutput {
                action: snapshot_action(&session.pending_action),
                trip_id: None,
                status: status::AWAITING_CONFIRMATION.into(),
                message: "That action is still being processed. Try again in a moment.".into(),
                needs_confirmation: false,
                session_id: Some(session.session_id.clone()),
                error: None,
                consequences: None,
                suggestions: None,
                options: None,
                kind: None,
                data: None,
                wizard: None,
            },
            SessionStatus::Expired => failure_output(
                ErrorKind::SessionNotPending,
                "That confirmation expired before it was answered.",
            ),
            SessionStatus::Pending => {
                failure_output(ErrorKind::InternalError, ErrorKind::InternalError.user_message())
            }
        }
    }
}

fn snapshot_action(snapshot: &Value) -> String {
    snapshot
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

/// Rebuild an executor-ready state from a pending-action snapshot.
fn state_from_snapshot(snapshot: &Value, user_id: i64) -> State {
    let mut state = State::new();
    state.set(keys::ACTION, snapshot_action(snapshot));
    state.set(keys::USER_ID, user_id);
    state.set(keys::CONFIRMED, true);
    if let Some(trip_id) = snapshot.get("trip_id").and_then(Value::as_i64) {
        state.set(keys::TRIP_ID, trip_id);
    }
    if let Some(label) = snapshot.get("trip_label").and_then(Value::as_str) {
        state.set(keys::TRIP_LABEL, label);
    }
    if let Some(params) = snapshot.get("parsed_params") {
        state.set(keys::PARSED_PARAMS, params.clone());
    }
    if let Some(consequences) = snapshot.get("consequences") {
        state.set(keys::CONSEQUENCES, consequences.clone());
    }
    state
}

fn cancelled_output(snapshot: &Value) -> AgentOutput {
    AgentOutput {
        action: snapshot_action(snapshot),
        trip_id: snapshot.get("trip_id").and_then(Value::as_i64),
        status: status::CANCELLED.into(),
        message: "Okay, I've discarded that. No changes were made.".into(),
        needs_confirmation: false,
        session_id: None,
        error: None,
        consequences: None,
        suggestions: None,
        options: None,
        kind: None,
        data: None,
        wizard: None,
    }
}

fn failure_output(kind: ErrorKind, message: impl Into<String>) -> AgentOutput {
    AgentOutput {
        action: Action::Unknown.as_str().into(),
        trip_id: None,
        status: status::FAILED.into(),
        message: message.into(),
        needs_confirmation: false,
        session_id: None,
        error: Some(kind.as_str().into()),
        consequences: None,
        suggestions: None,
        options: None,
        kind: None,
        data: None,
        wizard: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::db::tools::fixtures::{add_bookings, seeded};
    use crate::db::ToolLayer;
    use pretty_assertions::assert_eq;

    struct Fixture {
        gate: ConfirmationGateNode,
        endpoint: ConfirmationEndpoint,
        sessions: SessionStore,
        tools: Arc<ToolLayer>,
        trip_id: i64,
    }

    fn fixture() -> Fixture {
        let (tools, trip_id) = seeded();
        let tools = Arc::new(tools);
        let sessions = SessionStore::new(tools.database().clone(), 3600);
        let executor = Arc::new(ActionExecutorNode::new(tools.clone(), AgentConfig::default()));
        Fixture {
            gate: ConfirmationGateNode::new(sessions.clone()),
            endpoint: ConfirmationEndpoint::new(sessions.clone(), executor),
            sessions,
            tools,
            trip_id,
        }
    }

    async fn gated_remove_vehicle(fx: &Fixture) -> (State, String) {
        let mut state = State::new();
        state.set(keys::ACTION, "remove_vehicle");
        state.set(keys::USER_ID, 1);
        state.set(keys::TRIP_ID, fx.trip_id);
        state.set(keys::TRIP_LABEL, "Path-3 - 07:30");
        state.set(keys::NEEDS_CONFIRMATION, true);
        state.set(
            keys::WARNING_MESSAGES,
            serde_json::json!(["This trip has 8 confirmed booking(s) that would be affected."]),
        );
        state.set(
            keys::CONSEQUENCES,
            serde_json::json!({"booking_count": 8, "has_deployment": true, "live_status": "SCHEDULED"}),
        );
        let out = fx.gate.run(state).await.unwrap();
        let session_id = out.get_str(keys::SESSION_ID).unwrap().to_string();
        (out, session_id)
    }

    #[tokio::test]
    async fn test_gate_persists_and_reports() {
        let fx = fixture();
        let (out, session_id) = gated_remove_vehicle(&fx).await;

        assert_eq!(out.get_str(keys::STATUS), Some("awaiting_confirmation"));
        assert!(out.flag(keys::CONFIRMATION_REQUIRED));
        let message = out.get_str(keys::MESSAGE).unwrap();
        assert!(message.contains("remove vehicle"));
        assert!(message.contains('8'));

        let session = fx.sessions.require(&session_id).unwrap();
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.pending_action["action"], "remove_vehicle");
        assert_eq!(session.pending_action["consequences"]["booking_count"], 8);
    }

    #[tokio::test]
    async fn test_confirm_executes_and_settles() {
        let fx = fixture();
        fx.tools.assign_vehicle(fx.trip_id, 1, None, false, 1).unwrap();
        add_bookings(&fx.tools, fx.trip_id, 8);
        let (_, session_id) = gated_remove_vehicle(&fx).await;

        let output = fx.endpoint.handle(&session_id, true, 1).await;
        assert_eq!(output.status, "executed");
        assert_eq!(fx.tools.get_deployment(fx.trip_id).unwrap().unwrap().vehicle_id, None);

        let session = fx.sessions.require(&session_id).unwrap();
        assert_eq!(session.status, SessionStatus::Done);
        assert_eq!(session.execution_result.as_ref().unwrap()["ok"], true);

        // remove_vehicle audits once; the setup assignment audited once.
        let audit = fx.tools.recent_audit(10).unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].action, "remove_vehicle");
    }

    #[tokio::test]
    async fn test_decline_makes_no_changes() {
        let fx = fixture();
        fx.tools.assign_vehicle(fx.trip_id, 1, None, false, 1).unwrap();
        let (_, session_id) = gated_remove_vehicle(&fx).await;

        let output = fx.endpoint.handle(&session_id, false, 1).await;
        assert_eq!(output.status, "cancelled");
        assert!(output.message.contains("No changes were made"));

        // Deployment untouched; only the setup assignment in the audit log.
        assert_eq!(fx.tools.get_deployment(fx.trip_id).unwrap().unwrap().vehicle_id, Some(1));
        assert_eq!(fx.tools.recent_audit(10).unwrap().len(), 1);
        assert_eq!(fx.sessions.require(&session_id).unwrap().status, SessionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_confirm_is_idempotent() {
        let fx = fixture();
        fx.tools.assign_vehicle(fx.trip_id, 1, None, false, 1).unwrap();
        let (_, session_id) = gated_remove_vehicle(&fx).await;

        let first = fx.endpoint.handle(&session_id, true, 1).await;
        let second = fx.endpoint.handle(&session_id, true, 1).await;
        assert_eq!(first.status, "executed");
        assert_eq!(second.status, "executed");
        assert_eq!(first.message, second.message);

        // Exactly one mutation happened: setup assign + one removal.
        assert_eq!(fx.tools.recent_audit(10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_then_confirm_replays_cancellation() {
        let fx = fixture();
        fx.tools.assign_vehicle(fx.trip_id, 1, None, false, 1).unwrap();
        let (_, session_id) = gated_remove_vehicle(&fx).await;

        let cancelled = fx.endpoint.handle(&session_id, false, 1).await;
        assert_eq!(cancelled.status, "cancelled");

        // A late confirm does not resurrect the action.
        let late = fx.endpoint.handle(&session_id, true, 1).await;
        assert_eq!(late.status, "cancelled");
        assert_eq!(fx.tools.get_deployment(fx.trip_id).unwrap().unwrap().vehicle_id, Some(1));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let fx = fixture();
        let output = fx.endpoint.handle("no-such-session", true, 1).await;
        assert_eq!(output.error.as_deref(), Some("session_not_found"));
    }

    #[tokio::test]
    async fn test_foreign_user_rejected() {
        let fx = fixture();
        let (_, session_id) = gated_remove_vehicle(&fx).await;
        let output = fx.endpoint.handle(&session_id, true, 42).await;
        assert_eq!(output.error.as_deref(), Some("unauthorised"));
        assert_eq!(fx.sessions.require(&session_id).unwrap().status, SessionStatus::Pending);
    }

    #[tokio::test]
    async fn test_expired_session_rejected() {
        let fx = fixture();
        let (_, session_id) = gated_remove_vehicle(&fx).await;
        fx.sessions.expire_due(chrono::Utc::now() + chrono::Duration::hours(2)).unwrap();

        let output = fx.endpoint.handle(&session_id, true, 1).await;
        assert_eq!(output.error.as_deref(), Some("session_not_pending"));
    }

    #[tokio::test]
    async fn test_failed_execution_still_settles() {
        let fx = fixture();
        // No deployment exists, so the removal will fail downstream.
        let (_, session_id) = gated_remove_vehicle(&fx).await;

        let output = fx.endpoint.handle(&session_id, true, 1).await;
        assert_eq!(output.status, "failed");
        assert_eq!(output.error.as_deref(), Some("no_deployment"));

        let session = fx.sessions.require(&session_id).unwrap();
        assert_eq!(session.status, SessionStatus::Done);
        assert_eq!(session.execution_result.as_ref().unwrap()["ok"], false);

        // Replays return the same failure without retrying.
        let replay = fx.endpoint.handle(&session_id, true, 1).await;
        assert_eq!(replay.error.as_deref(), Some("no_deployment"));
    }
}
