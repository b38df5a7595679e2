//! The assembled agent: graph wiring, the message/confirm entry points, and
//! wizard-state persistence across requests.

use crate::config::AgentConfig;
use crate::confirm::{ConfirmationEndpoint, ConfirmationGateNode};
use crate::consequence::ConsequenceAnalyserNode;
use crate::db::{Database, ToolLayer};
use crate::error::{ErrorKind, Result};
use crate::executor::ActionExecutorNode;
use crate::graph::{nodes, Edge, Graph, GraphBuilder};
use crate::intent::IntentParserNode;
use crate::llm::IntentExtractor;
use crate::report::{AgentOutput, FallbackNode, ReportResultNode};
use crate::resolve::TargetResolverNode;
use crate::router::DecisionRouterNode;
use crate::session::{SessionStatus, SessionStore};
use crate::state::{keys, State};
use crate::suggest::{OfferCreationNode, SelectionProviderNode, SuggestionProviderNode};
use crate::wizard::WizardEngineNode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// `POST /agent/message` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRequest {
    pub text: String,
    pub user_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_entity_id: Option<i64>,
    #[serde(default)]
    pub current_page: String,
    #[serde(default)]
    pub from_image: bool,
}

/// `POST /agent/confirm` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub session_id: String,
    pub confirmed: bool,
    pub user_id: i64,
}

/// Response envelope for both endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub agent_output: AgentOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Text extracted from an uploaded image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrText {
    pub text: String,
    pub confidence: f64,
}

/// The OCR collaborator. It performs no database work; the UI resubmits its
/// text through the standard entry with `from_image = true`.
#[async_trait]
pub trait OcrExtractor: Send + Sync {
    async fn extract(&self, image: &[u8]) -> Result<OcrText>;
}

/// The conversational operations agent core.
pub struct OpsAgent {
    graph: Graph,
    tools: Arc<ToolLayer>,
    sessions: SessionStore,
    confirmation: ConfirmationEndpoint,
}

impl OpsAgent {
    /// Wire the standard agent graph over the given database and extractor.
    pub fn new(db: Database, extractor: IntentExtractor, config: AgentConfig) -> Result<Self> {
        let tools = Arc::new(ToolLayer::new(db.clone(), config.clone()));
        let sessions = SessionStore::new(db, config.session_ttl_secs);
        let executor = Arc::new(ActionExecutorNode::new(tools.clone(), config.clone()));

        let graph = GraphBuilder::new()
            .node(Arc::new(IntentParserNode::new(extractor)))
            .node(Arc::new(TargetResolverNode::new(tools.clone())))
            .node(Arc::new(DecisionRouterNode::new()))
            .node(Arc::new(ConsequenceAnalyserNode::new(tools.clone(), config.clone())))
            .node(Arc::new(ConfirmationGateNode::new(sessions.clone())))
            .node(Arc::new(WizardEngineNode::new(tools.clone())))
            .node(executor.clone())
            .node(Arc::new(SuggestionProviderNode::new(tools.clone())))
            .node(Arc::new(SelectionProviderNode::new(tools.clone())))
            .node(Arc::new(OfferCreationNode::new()))
            .node(Arc::new(ReportResultNode::new()))
            .node(Arc::new(FallbackNode::new()))
            .entry(nodes::PARSE_INTENT)
            .terminal(nodes::REPORT_RESULT)
            .terminal(nodes::FALLBACK)
            .fallback(nodes::FALLBACK)
            .max_iterations(config.max_iterations)
            .edge(nodes::PARSE_INTENT, Edge::when_routed(nodes::WIZARD))
            .edge(nodes::PARSE_INTENT, Edge::always(nodes::RESOLVE_TARGET))
            .edge(nodes::RESOLVE_TARGET, Edge::always(nodes::ROUTE_DECISION))
            .edge(nodes::ROUTE_DECISION, Edge::when_routed(nodes::WIZARD))
            .edge(nodes::ROUTE_DECISION, Edge::when_routed(nodes::EXECUTE_ACTION))
            .edge(nodes::ROUTE_DECISION, Edge::when_routed(nodes::ANALYSE_CONSEQUENCES))
            .edge(nodes::ROUTE_DECISION, Edge::when_routed(nodes::SUGGEST_ACTIONS))
            .edge(nodes::ROUTE_DECISION, Edge::when_routed(nodes::OFFER_SELECTION))
            .edge(nodes::ROUTE_DECISION, Edge::when_routed(nodes::OFFER_CREATION))
            .edge(nodes::ROUTE_DECISION, Edge::always(nodes::REPORT_RESULT))
            .edge(
                nodes::ANALYSE_CONSEQUENCES,
                Edge::when(nodes::CONFIRMATION_GATE, |s| s.flag(keys::NEEDS_CONFIRMATION)),
            )
            .edge(nodes::ANALYSE_CONSEQUENCES, Edge::always(nodes::EXECUTE_ACTION))
            .edge(nodes::CONFIRMATION_GATE, Edge::always(nodes::REPORT_RESULT))
            .edge(nodes::WIZARD, Edge::always(nodes::REPORT_RESULT))
            .edge(nodes::EXECUTE_ACTION, Edge::always(nodes::REPORT_RESULT))
            .edge(nodes::SUGGEST_ACTIONS, Edge::always(nodes::REPORT_RESULT))
            .edge(nodes::OFFER_SELECTION, Edge::always(nodes::REPORT_RESULT))
            .edge(nodes::OFFER_CREATION, Edge::always(nodes::REPORT_RESULT))
            .build()?;

        let confirmation = ConfirmationEndpoint::new(sessions.clone(), executor);
        Ok(Self {
            graph,
            tools,
            sessions,
            confirmation,
        })
    }

    /// The tool layer, shared with the graph nodes.
    pub fn tools(&self) -> &ToolLayer {
        &self.tools
    }

    /// The session store owned by the core.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// `POST /agent/message`: run one request through the graph.
    pub async fn handle_message(&self, request: MessageRequest) -> AgentResponse {
        let mut state = State::new();
        state.set(keys::TEXT, request.text.clone());
        state.set(keys::USER_ID, request.user_id);
        state.set(keys::CURRENT_PAGE, request.current_page.clone());
        if request.from_image {
            state.set(keys::FROM_IMAGE, true);
        }
        if let Some(selected) = request.selected_entity_id {
            state.set(keys::SELECTED_ENTITY_ID, selected);
        }

        // Load wizard state for a continuing session.
        let mut wizard_session: Option<String> = None;
        if let Some(session_id) = &request.session_id {
            state.set(keys::SESSION_ID, session_id.clone());
            match self.sessions.get(session_id) {
                Ok(Some(session))
                    if session.status == SessionStatus::Pending && session.is_wizard() =>
                {
                    Self::hydrate_wizard(&mut state, &session.pending_action);
                    wizard_session = Some(session.session_id);
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "failed to load session"),
            }
        }

        let final_state = self.graph.run(&state).await;
        let mut output = AgentOutput::from_state(&final_state);

        if let Err(err) = self.persist_wizard(&final_state, &wizard_session, request.user_id, &mut output) {
            warn!(error = %err, "failed to persist wizard state");
            output = AgentOutput::from_value(json!({
                "action": output.action,
                "status": "failed",
                "error": ErrorKind::InternalError.as_str(),
                "message": ErrorKind::InternalError.user_message(),
                "needs_confirmation": false,
            }));
        }

        let session_id = output.session_id.clone();
        AgentResponse {
            agent_output: output,
            session_id,
        }
    }

    /// `POST /agent/confirm`: settle a pending action.
    pub async fn handle_confirm(&self, request: ConfirmRequest) -> AgentResponse {
        let output = self
            .confirmation
            .handle(&request.session_id, request.confirmed, request.user_id)
            .await;
        AgentResponse {
            agent_output: output,
            session_id: None,
        }
    }

    /// `POST /agent/image`: delegate to the OCR collaborator. The core does
    /// not post-process the text.
    pub async fn extract_image_text(&self, ocr: &dyn OcrExtractor, image: &[u8]) -> Result<OcrText> {
        ocr.extract(image).await
    }

    fn hydrate_wizard(state: &mut State, snapshot: &Value) {
        let Some(wizard) = snapshot.get("wizard") else {
            return;
        };
        debug!("continuing wizard session");
        state.set(keys::WIZARD_ACTIVE, true);
        if let Some(kind) = wizard.get("type").and_then(Value::as_str) {
            state.set(keys::WIZARD_TYPE, kind);
        }
        if let Some(step) = wizard.get("step").and_then(Value::as_i64) {
            state.set(keys::WIZARD_STEP, step);
        }
        if let Some(total) = wizard.get("steps_total").and_then(Value::as_i64) {
            state.set(keys::WIZARD_STEPS_TOTAL, total);
        }
        if let Some(data) = wizard.get("data") {
            state.set(keys::WIZARD_DATA, data.clone());
        }
    }

    /// Persist, settle, or clear wizard state after a run.
    fn persist_wizard(
        &self,
        state: &State,
        existing: &Option<String>,
        user_id: i64,
        output: &mut AgentOutput,
    ) -> Result<()> {
        if state.flag(keys::WIZARD_ACTIVE) {
            let snapshot = json!({
                "kind": "wizard",
                "user_id": user_id,
                "wizard": {
                    "type": state.get_str(keys::WIZARD_TYPE),
                    "step": state.get_i64(keys::WIZARD_STEP),
                    "steps_total": state.get_i64(keys::WIZARD_STEPS_TOTAL),
                    "data": state.get(keys::WIZARD_DATA).cloned().unwrap_or_else(|| json!({})),
                },
            });
            match existing {
                Some(session_id) => {
                    self.sessions.update_pending_action(session_id, snapshot)?;
                    output.session_id = Some(session_id.clone());
                }
                None => {
                    let session = self.sessions.create(user_id, snapshot)?;
                    output.session_id = Some(session.session_id);
                }
            }
            return Ok(());
        }

        // A wizard that just finished settles its session.
        if let Some(session_id) = existing {
            if state.flag(keys::WIZARD_COMPLETED) {
                let result = state
                    .get(keys::EXECUTION_RESULT)
                    .cloned()
                    .unwrap_or_else(|| json!({"ok": true}));
                self.sessions.try_transition(
                    session_id,
                    SessionStatus::Pending,
                    SessionStatus::Confirmed,
                    None,
                    None,
                )?;
                self.sessions.try_transition(
                    session_id,
                    SessionStatus::Confirmed,
                    SessionStatus::Done,
                    None,
                    Some(&result),
                )?;
            } else if state.flag(keys::WIZARD_CANCELLED) {
                self.sessions.try_transition(
                    session_id,
                    SessionStatus::Pending,
                    SessionStatus::Cancelled,
                    Some(&json!({"cancelled": true})),
                    None,
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tools::fixtures::{add_bookings, add_trip, seeded_db};
    use crate::llm::client::testing::{FailingLlm, ScriptedLlm};
    use crate::llm::LlmClient;
    use crate::normalize;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    /// An agent over a seeded database with the given scripted LLM.
    fn agent_with(llm: Arc<dyn LlmClient>) -> (OpsAgent, i64) {
        let extractor = IntentExtractor::new(llm, 1000);
        let agent = OpsAgent::new(seeded_db(), extractor, AgentConfig::default()).unwrap();
        (agent, 1)
    }

    fn message(text: &str, page: &str) -> MessageRequest {
        MessageRequest {
            text: text.into(),
            user_id: 1,
            session_id: None,
            selected_entity_id: None,
            current_page: page.into(),
            from_image: false,
        }
    }

    // Scenario: risky removal, confirmed.
    #[tokio::test]
    async fn test_risky_remove_confirm_path() {
        let llm = Arc::new(ScriptedLlm::always(json!({
            "action": "remove_vehicle",
            "target_label": "Path-3 - 07:30",
            "confidence": 0.95,
        })));
        let (agent, trip_id) = agent_with(llm);
        agent.tools().assign_vehicle(trip_id, 1, None, false, 1).unwrap();
        add_bookings(agent.tools(), trip_id, 8);

        let first = agent
            .handle_message(message("Remove vehicle from Path-3 - 07:30", "trip_ops"))
            .await;
        let output = &first.agent_output;
        assert!(output.needs_confirmation);
        let session_id = output.session_id.clone().expect("session id");
        assert!(!session_id.is_empty());
        assert!(output.message.contains('8'));
        assert!(output.message.contains("remove vehicle"));
        let consequences = output.consequences.as_ref().unwrap();
        assert_eq!(consequences["booking_count"], 8);
        assert_eq!(consequences["has_deployment"], true);

        let session = agent.sessions().require(&session_id).unwrap();
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.pending_action["consequences"]["booking_count"], 8);
        assert_eq!(session.pending_action["consequences"]["has_deployment"], true);

        let second = agent
            .handle_confirm(ConfirmRequest {
                session_id: session_id.clone(),
                confirmed: true,
                user_id: 1,
            })
            .await;
        assert_eq!(second.agent_output.status, "executed");

        let deployment = agent.tools().get_deployment(trip_id).unwrap().unwrap();
        assert_eq!(deployment.vehicle_id, None);
        let removals: Vec<_> = agent
            .tools()
            .recent_audit(10)
            .unwrap()
            .into_iter()
            .filter(|a| a.action == "remove_vehicle")
            .collect();
        assert_eq!(removals.len(), 1);
        assert_eq!(removals[0].entity_id, trip_id);
        assert_eq!(agent.sessions().require(&session_id).unwrap().status, SessionStatus::Done);
    }

    // Scenario: risky removal, declined.
    #[tokio::test]
    async fn test_risky_remove_cancel_path() {
        let llm = Arc::new(ScriptedLlm::always(json!({
            "action": "remove_vehicle",
            "target_label": "Path-3 - 07:30",
            "confidence": 0.95,
        })));
        let (agent, trip_id) = agent_with(llm);
        agent.tools().assign_vehicle(trip_id, 1, None, false, 1).unwrap();
        add_bookings(agent.tools(), trip_id, 8);
        let audit_before = agent.tools().recent_audit(10).unwrap().len();

        let first = agent
            .handle_message(message("Remove vehicle from Path-3 - 07:30", "trip_ops"))
            .await;
        let session_id = first.agent_output.session_id.clone().unwrap();

        let second = agent
            .handle_confirm(ConfirmRequest {
                session_id: session_id.clone(),
                confirmed: false,
                user_id: 1,
            })
            .await;
        assert_eq!(second.agent_output.status, "cancelled");
        assert!(second.agent_output.message.contains("No changes were made"));

        assert_eq!(agent.tools().get_deployment(trip_id).unwrap().unwrap().vehicle_id, Some(1));
        assert_eq!(agent.tools().recent_audit(10).unwrap().len(), audit_before);
        assert_eq!(
            agent.sessions().require(&session_id).unwrap().status,
            SessionStatus::Cancelled
        );
    }

    // Scenario: ambiguous reference.
    #[tokio::test]
    async fn test_ambiguous_time_reference() {
        let llm = Arc::new(ScriptedLlm::always(json!({
            "action": "remove_vehicle",
            "target_time": "7:30",
            "confidence": 0.85,
        })));
        let (agent, _) = agent_with(llm);
        // Two trips today in the same slot.
        add_trip(agent.tools(), "Path-3 - 07:30 (today)", 0, "07:30");
        add_trip(agent.tools(), "Path-3A - 07:30 (today)", 0, "07:30");

        let response = agent
            .handle_message(message("Remove vehicle from the 7:30 trip", "trip_ops"))
            .await;
        let output = &response.agent_output;
        assert_eq!(output.error.as_deref(), Some("ambiguous_target"));
        let options = output.options.as_ref().unwrap();
        assert_eq!(options.len(), 2);
        assert!(output.message.to_lowercase().contains("which"));
        assert!(output.session_id.is_none());
        assert!(!output.needs_confirmation);
    }

    // Scenario: safe read.
    #[tokio::test]
    async fn test_safe_read_single_call() {
        let llm = Arc::new(ScriptedLlm::always(json!({
            "action": "list_all_stops",
            "confidence": 0.99,
        })));
        let (agent, _) = agent_with(llm);

        let response = agent.handle_message(message("list all stops", "config")).await;
        let output = &response.agent_output;
        assert!(!output.needs_confirmation);
        assert_eq!(output.status, "executed");
        assert_eq!(output.kind, Some(crate::report::OutputKind::Table));
        assert_eq!(output.data.as_ref().unwrap().as_array().unwrap().len(), 2);
    }

    // Scenario: page context rejection.
    #[tokio::test]
    async fn test_page_context_rejection() {
        let llm = Arc::new(ScriptedLlm::always(json!({
            "action": "assign_vehicle",
            "target_entity_id": 1,
            "confidence": 0.95,
        })));
        let (agent, trip_id) = agent_with(llm);

        let response = agent
            .handle_message(message("assign vehicle to trip 1", "config"))
            .await;
        let output = &response.agent_output;
        assert_eq!(output.error.as_deref(), Some("page_context_mismatch"));
        assert!(output.message.contains("trip-operations"));
        assert!(output.session_id.is_none());
        assert!(agent.tools().get_deployment(trip_id).unwrap().is_none());
        assert!(agent.tools().recent_audit(10).unwrap().is_empty());
    }

    // Scenario: wizard completion across requests.
    #[tokio::test]
    async fn test_wizard_completion_end_to_end() {
        let llm = Arc::new(ScriptedLlm::always(json!({
            "action": "create_trip",
            "confidence": 0.9,
        })));
        let (agent, _) = agent_with(llm);

        let first = agent.handle_message(message("create a new trip", "trip_ops")).await;
        let output = &first.agent_output;
        let wizard = output.wizard.as_ref().expect("wizard block");
        assert_eq!(wizard["active"], true);
        assert_eq!(wizard["step"], 1);
        let session_id = output.session_id.clone().expect("wizard session id");

        let date = normalize::date_str(Utc::now().date_naive() + Duration::days(2));
        let answers = ["1", "down", date.as_str(), "18:30", "Path-3 evening", "1", "2"];
        let mut last = first;
        for answer in answers {
            let mut request = message(answer, "trip_ops");
            request.session_id = Some(session_id.clone());
            last = agent.handle_message(request).await;
        }

        let wizard = last.agent_output.wizard.as_ref().unwrap();
        assert_eq!(wizard["completed"], true);
        assert_eq!(last.agent_output.status, "executed");

        let trip_id = last.agent_output.trip_id.expect("created trip id");
        let trip = agent.tools().get_trip(trip_id).unwrap().unwrap();
        assert_eq!(trip.display_name, "Path-3 evening");

        // The wizard session settled in the store.
        let session = agent.sessions().require(&session_id).unwrap();
        assert_eq!(session.status, SessionStatus::Done);
    }

    #[tokio::test]
    async fn test_wizard_state_survives_reload() {
        let llm = Arc::new(ScriptedLlm::always(json!({
            "action": "create_trip",
            "confidence": 0.9,
        })));
        let (agent, _) = agent_with(llm);

        let first = agent.handle_message(message("create a new trip", "trip_ops")).await;
        let session_id = first.agent_output.session_id.clone().unwrap();

        let mut request = message("1", "trip_ops");
        request.session_id = Some(session_id.clone());
        let second = agent.handle_message(request).await;
        let wizard = second.agent_output.wizard.as_ref().unwrap();
        assert_eq!(wizard["step"], 2);

        // The same next question comes back for a fresh load of the session.
        let session = agent.sessions().require(&session_id).unwrap();
        assert_eq!(session.pending_action["wizard"]["step"], 2);
        assert_eq!(session.pending_action["wizard"]["data"]["path_id"], 1);

        let mut replayed = message("up", "trip_ops");
        replayed.session_id = Some(session_id.clone());
        let third = agent.handle_message(replayed).await;
        assert_eq!(third.agent_output.wizard.as_ref().unwrap()["step"], 3);
    }

    #[tokio::test]
    async fn test_wizard_cancellation_settles_session() {
        let llm = Arc::new(ScriptedLlm::always(json!({
            "action": "create_trip",
            "confidence": 0.9,
        })));
        let (agent, _) = agent_with(llm);

        let first = agent.handle_message(message("create a new trip", "trip_ops")).await;
        let session_id = first.agent_output.session_id.clone().unwrap();

        let mut request = message("cancel", "trip_ops");
        request.session_id = Some(session_id.clone());
        let second = agent.handle_message(request).await;
        assert_eq!(second.agent_output.status, "cancelled");

        let session = agent.sessions().require(&session_id).unwrap();
        assert_eq!(session.status, SessionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_structured_command_round_trip_via_selection() {
        let llm = Arc::new(ScriptedLlm::always(json!({
            "action": "assign_vehicle",
            "target_label": "Path-3 - 07:30",
            "confidence": 0.9,
        })));
        let (agent, trip_id) = agent_with(llm);

        // No vehicle id supplied: the agent offers a picker.
        let offer = agent
            .handle_message(message("assign a vehicle to Path-3 - 07:30", "trip_ops"))
            .await;
        let options = offer.agent_output.options.clone().unwrap();
        assert!(!options.is_empty());
        let command = options[0].command.clone().unwrap();

        // Resending the button command resolves to the same trip and binds.
        let response = agent.handle_message(message(&command, "trip_ops")).await;
        assert_eq!(response.agent_output.status, "executed");
        assert_eq!(response.agent_output.trip_id, Some(trip_id));
        let deployment = agent.tools().get_deployment(trip_id).unwrap().unwrap();
        assert_eq!(deployment.vehicle_id, Some(options[0].id));
    }

    #[tokio::test]
    async fn test_ocr_match_offers_suggestions() {
        let llm = Arc::new(ScriptedLlm::always(json!({
            "action": "get_trip_status",
            "confidence": 0.7,
        })));
        let (agent, trip_id) = agent_with(llm);

        let mut request = message("Path-3 - 07:30  Dep 07:30  Platform 2", "trip_ops");
        request.from_image = true;
        request.selected_entity_id = Some(trip_id);
        let response = agent.handle_message(request).await;

        let suggestions = response.agent_output.suggestions.as_ref().unwrap();
        assert!(suggestions.iter().any(|s| s.action == "assign_vehicle"));
        assert_eq!(response.agent_output.trip_id, Some(trip_id));
    }

    #[tokio::test]
    async fn test_ocr_without_match_offers_creation() {
        let llm = Arc::new(ScriptedLlm::always(json!({
            "action": "get_trip_status",
            "target_label": "Night Express",
            "confidence": 0.6,
        })));
        let (agent, _) = agent_with(llm);

        let mut request = message("Night Express 23:55", "trip_ops");
        request.from_image = true;
        let response = agent.handle_message(request).await;

        let suggestions = response.agent_output.suggestions.as_ref().unwrap();
        assert_eq!(suggestions[0].action, "create_trip_wizard");
    }

    #[tokio::test]
    async fn test_llm_down_falls_back_to_regex() {
        let (agent, trip_id) = agent_with(Arc::new(FailingLlm));
        agent.tools().assign_vehicle(trip_id, 1, None, false, 1).unwrap();
        add_bookings(agent.tools(), trip_id, 3);

        let response = agent
            .handle_message(message(&format!("remove vehicle from trip {}", trip_id), "trip_ops"))
            .await;
        // The regex fallback still carries the request to the gate.
        assert!(response.agent_output.needs_confirmation);
        assert!(response.agent_output.session_id.is_some());
    }

    #[tokio::test]
    async fn test_malformed_llm_output_never_crashes() {
        for garbage in [
            "",
            "{",
            "not json at all",
            "{\"action\": 17}",
            "{\"action\": \"cancel_trip\", \"confidence\": \"NaN\"}",
            "```json\n{\"broken\": \n```",
        ] {
            let llm = Arc::new(ScriptedLlm::new([garbage.to_string()]));
            let (agent, _) = agent_with(llm);
            let response = agent.handle_message(message("do the thing", "trip_ops")).await;
            let output = &response.agent_output;
            assert!(!output.message.is_empty());
            assert!(!output.status.is_empty());
        }
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_isolated() {
        let llm = Arc::new(ScriptedLlm::always(json!({
            "action": "list_all_stops",
            "confidence": 0.99,
        })));
        let (agent, _) = agent_with(llm);
        let agent = Arc::new(agent);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let agent = agent.clone();
            handles.push(tokio::spawn(async move {
                agent.handle_message(message("list all stops", "config")).await
            }));
        }
        for handle in handles {
            let response = handle.await.unwrap();
            assert_eq!(response.agent_output.status, "executed");
        }
    }

    struct StubOcr;

    #[async_trait]
    impl OcrExtractor for StubOcr {
        async fn extract(&self, _image: &[u8]) -> Result<OcrText> {
            Ok(OcrText {
                text: "Path-3 - 07:30".into(),
                confidence: 0.91,
            })
        }
    }

    #[tokio::test]
    async fn test_image_ingest_delegates_without_db_work() {
        let llm = Arc::new(ScriptedLlm::always(json!({"action": "help", "confidence": 1.0})));
        let (agent, _) = agent_with(llm);
        let audit_before = agent.tools().recent_audit(10).unwrap().len();

        let ocr = agent.extract_image_text(&StubOcr, b"png-bytes").await.unwrap();
        assert_eq!(ocr.text, "Path-3 - 07:30");
        assert!((ocr.confidence - 0.91).abs() < f64::EPSILON);
        assert_eq!(agent.tools().recent_audit(10).unwrap().len(), audit_before);
    }

    #[tokio::test]
    async fn test_unknown_input_reports_unknown_action() {
        let llm = Arc::new(ScriptedLlm::always(json!({
            "action": "sing_a_song",
            "confidence": 0.9,
        })));
        let (agent, _) = agent_with(llm);
        let response = agent.handle_message(message("sing me a song", "trip_ops")).await;
        assert_eq!(response.agent_output.error.as_deref(), Some("unknown_action"));
        assert_eq!(response.agent_output.status, "failed");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(24))]

            // Random LLM output never escapes the crash barrier.
            #[test]
            fn prop_random_llm_output_yields_well_formed_response(raw in ".{0,200}") {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .unwrap();
                runtime.block_on(async {
                    let llm = Arc::new(ScriptedLlm::new([raw]));
                    let (agent, _) = agent_with(llm);
                    let response = agent.handle_message(message("do something", "trip_ops")).await;
                    prop_assert!(!response.agent_output.status.is_empty());
                    prop_assert!(!response.agent_output.message.is_empty());
                    Ok(())
                })?;
            }

            // Structured commands with arbitrary extra keys are tolerated.
            #[test]
            fn prop_structured_commands_with_unknown_keys(
                key in "[a-z_]{1,12}",
                value in "[a-zA-Z0-9]{1,12}",
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .unwrap();
                runtime.block_on(async {
                    let (agent, trip_id) = agent_with(Arc::new(FailingLlm));
                    let text = format!(
                        "STRUCTURED_CMD:get_trip_status|trip_id:{}|{}:{}",
                        trip_id, key, value
                    );
                    let response = agent.handle_message(message(&text, "trip_ops")).await;
                    prop_assert!(!response.agent_output.status.is_empty());
                    Ok(())
                })?;
            }
        }
    }
}
