//! Configuration for the agent core.

use serde::{Deserialize, Serialize};

/// Configuration knobs for the agent runtime and tool layer.
///
/// None of the defaults are load-bearing for correctness; they bound
/// pathological flows and size user-facing lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum node transitions per graph run (default: 20)
    pub max_iterations: u32,
    /// Session lifetime in seconds (default: 1 hour)
    pub session_ttl_secs: i64,
    /// Trip occupancy window in minutes when no explicit end time exists (default: 60)
    pub availability_window_mins: i64,
    /// Seat capacity assumed when no vehicle is deployed (default: 40)
    pub default_capacity: i64,
    /// LLM call timeout in milliseconds per provider (default: 8s)
    pub llm_timeout_ms: u64,
    /// Below this confidence the parser asks for clarification (default: 0.5)
    pub clarify_threshold: f64,
    /// Upper bound on label/time search candidates (default: 5)
    pub max_candidates: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            session_ttl_secs: 3600,
            availability_window_mins: 60,
            default_capacity: 40,
            llm_timeout_ms: 8_000,
            clarify_threshold: 0.5,
            max_candidates: 5,
        }
    }
}

impl AgentConfig {
    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_session_ttl_secs(mut self, secs: i64) -> Self {
        self.session_ttl_secs = secs;
        self
    }

    pub fn with_availability_window_mins(mut self, mins: i64) -> Self {
        self.availability_window_mins = mins;
        self
    }

    pub fn with_default_capacity(mut self, capacity: i64) -> Self {
        self.default_capacity = capacity;
        self
    }

    pub fn with_llm_timeout_ms(mut self, ms: u64) -> Self {
        self.llm_timeout_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.max_iterations, 20);
        assert_eq!(config.session_ttl_secs, 3600);
        assert_eq!(config.availability_window_mins, 60);
    }

    #[test]
    fn test_builder() {
        let config = AgentConfig::default()
            .with_max_iterations(5)
            .with_availability_window_mins(90);
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.availability_window_mins, 90);
    }
}
