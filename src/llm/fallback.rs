//! Keyword fallback parser, used when every LLM provider is unavailable.
//!
//! A closed mapping from action to keyword patterns over the normalised
//! text. The first matching action wins, so more specific patterns are
//! registered first. Matches carry a fixed confidence of 0.8; numeric trip
//! ids are extracted, but no other parameters are ever emitted.

use super::types::Intent;
use crate::actions::Action;
use regex::Regex;
use std::sync::LazyLock;

const FALLBACK_CONFIDENCE: f64 = 0.8;

static PATTERNS: LazyLock<Vec<(Action, Regex)>> = LazyLock::new(|| {
    // Order matters: first match wins.
    let table: &[(Action, &str)] = &[
        (Action::Help, r"^(help|hi|hello|what can you do)\b"),
        (Action::GetUnassignedTrips, r"\bunassigned\b"),
        (Action::ListAllStops, r"\b(list|show|all)\b.*\bstops\b"),
        (Action::ListAllPaths, r"\b(list|show|all)\b.*\bpaths\b"),
        (Action::ListAllRoutes, r"\b(list|show|all)\b.*\broutes\b"),
        (Action::ListAllVehicles, r"\b(list|show|all)\b.*\b(vehicles|buses|cabs)\b"),
        (Action::ListAllDrivers, r"\b(list|show|all)\b.*\bdrivers\b"),
        (Action::ListAllTrips, r"\b(list|show|all)\b.*\btrips\b"),
        (Action::GetBookings, r"\bbookings?\b"),
        (
            Action::AssignVehicleAndDriver,
            r"\b(assign|deploy|put)\b.*\b(vehicle|bus|cab)\b.*\b(and|with)\b.*\bdriver\b",
        ),
        (Action::RemoveVehicle, r"\b(remove|unassign|take)\b.*\b(vehicle|bus|cab)\b"),
        (Action::RemoveDriver, r"\b(remove|unassign)\b.*\bdriver\b"),
        (Action::AssignVehicle, r"\b(assign|deploy|put|add)\b.*\b(vehicle|bus|cab)\b"),
        (Action::AssignDriver, r"\b(assign|deploy|put|set|add)\b.*\bdriver\b"),
        (Action::UpdateTripTime, r"\b(reschedule|postpone)\b|\bchange\b.*\btime\b|\bmove\b.*\bto\b"),
        (Action::DuplicateTrip, r"\b(duplicate|copy|clone)\b.*\btrip\b"),
        (Action::CancelTrip, r"\bcancel\b"),
        (Action::CreateTripWizard, r"\b(create|new|add)\b.*\btrip\b"),
        (Action::CreateStop, r"\b(create|new)\b.*\bstop\b"),
        (Action::CreatePath, r"\b(create|new)\b.*\bpath\b"),
        (Action::CreateRoute, r"\b(create|new)\b.*\broute\b"),
        (Action::GetTripStatus, r"\b(status|info|details)\b"),
        (Action::GetSuggestions, r"\bsuggest(ions)?\b"),
    ];
    table
        .iter()
        .map(|(action, pattern)| (*action, Regex::new(pattern).unwrap()))
        .collect()
});

static TRIP_ID: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\btrip\s*#?\s*(\d+)\b").unwrap(),
        Regex::new(r"#(\d+)\b").unwrap(),
    ]
});

/// Regex fallback parser for the common command surface.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexFallbackParser;

impl RegexFallbackParser {
    pub fn new() -> Self {
        Self
    }

    /// Detect an action from keywords alone, without building an intent.
    pub fn detect_action(&self, text: &str) -> Option<Action> {
        let normalised = text.trim().to_ascii_lowercase();
        PATTERNS
            .iter()
            .find(|(_, pattern)| pattern.is_match(&normalised))
            .map(|(action, _)| *action)
    }

    /// Extract an explicit numeric trip reference ("trip 42", "#42").
    pub fn extract_trip_id(&self, text: &str) -> Option<i64> {
        let normalised = text.trim().to_ascii_lowercase();
        TRIP_ID
            .iter()
            .find_map(|pattern| pattern.captures(&normalised))
            .and_then(|captures| captures.get(1))
            .and_then(|id| id.as_str().parse().ok())
    }

    /// Parse text into an intent. Unmatched text yields `unknown` with
    /// confidence 0.
    pub fn parse(&self, text: &str) -> Intent {
        match self.detect_action(text) {
            Some(action) => {
                let mut intent = Intent::of(action, FALLBACK_CONFIDENCE);
                intent.target_entity_id = self.extract_trip_id(text);
                intent
            }
            None => Intent::unknown(),
        }
    }
}
