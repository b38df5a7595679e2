//! # fleetops-core
//!
//! The core of a conversational fleet-operations agent: natural-language
//! commands (typed or OCR-extracted) become validated, audited mutations of
//! a transport-operations data model.
//!
//! ## Core Components
//!
//! - **Graph**: stateful traversal with conditional edges, an iteration
//!   bound, and a crash barrier
//! - **Tools**: typed database operations with transactional audit writes
//! - **Sessions**: durable pending actions and wizard state
//! - **Llm**: layered intent extraction (provider, failover, regex fallback)
//! - **Agent**: the assembled pipeline behind the message/confirm endpoints
//!
//! ## Example
//!
//! ```rust,ignore
//! use fleetops_core::{AgentConfig, AnthropicClient, ClientConfig, Database, IntentExtractor, MessageRequest, OpsAgent};
//! use std::sync::Arc;
//!
//! let db = Database::open("fleetops.db")?;
//! let llm = Arc::new(AnthropicClient::new(ClientConfig::new(api_key)));
//! let agent = OpsAgent::new(db, IntentExtractor::new(llm, 8_000), AgentConfig::default())?;
//!
//! let response = agent.handle_message(MessageRequest {
//!     text: "Remove vehicle from Path-3 - 07:30".into(),
//!     user_id: 1,
//!     session_id: None,
//!     selected_entity_id: None,
//!     current_page: "trip_ops".into(),
//!     from_image: false,
//! }).await;
//! ```

pub mod actions;
pub mod agent;
pub mod config;
pub mod confirm;
pub mod consequence;
pub mod db;
pub mod error;
pub mod executor;
pub mod graph;
pub mod intent;
pub mod llm;
pub mod normalize;
pub mod report;
pub mod resolve;
pub mod router;
pub mod session;
pub mod state;
pub mod suggest;
pub mod wizard;

// Re-exports for convenience
pub use actions::{normalize_action, Action, Page, WizardKind};
pub use agent::{
    AgentResponse, ConfirmRequest, MessageRequest, OcrExtractor, OcrText, OpsAgent,
};
pub use config::AgentConfig;
pub use confirm::{ConfirmationEndpoint, ConfirmationGateNode};
pub use consequence::ConsequenceAnalyserNode;
pub use db::{
    AuditRecord, Booking, BookingStatus, Database, Deployment, Direction, Driver, DriverStatus,
    LiveStatus, NewTrip, Path, PathStop, Route, Stop, ToolLayer, Trip, TripCandidate, TripStatus,
    Vehicle, VehicleStatus, VehicleType,
};
pub use error::{Error, ErrorKind, Result};
pub use executor::ActionExecutorNode;
pub use graph::{Edge, Graph, GraphBuilder, GraphNode};
pub use intent::{
    format_structured_command, parse_structured_command, IntentParserNode, StructuredCommand,
};
pub use llm::{
    AnthropicClient, ChatMessage, ChatRole, ClientConfig, CompletionRequest, CompletionResponse,
    Intent, IntentExtractor, LlmClient, OpenAiClient, ParseContext, ParsedIntent,
    RegexFallbackParser,
};
pub use report::{AgentOutput, FallbackNode, OutputKind, ReportResultNode, SelectionOption, Suggestion};
pub use resolve::TargetResolverNode;
pub use router::DecisionRouterNode;
pub use session::{Session, SessionStatus, SessionStore};
pub use state::State;
pub use suggest::{OfferCreationNode, SelectionProviderNode, SuggestionProviderNode};
pub use wizard::{steps_for, OptionsSource, StepValidator, WizardEngineNode, WizardStep};
