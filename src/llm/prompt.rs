//! Prompt assembly for the intent parser.
//!
//! The system template is fixed: the closed action list, confidence
//! guidelines, context rules, and a small set of exemplars. The model is
//! told to never invent ids; the resolver treats every id it returns as a
//! claim to verify, not a fact.

use super::types::ParseContext;
use crate::actions::Action;

/// Build the fixed system prompt from the Action Registry.
pub fn build_system_prompt() -> String {
    let mut actions = String::new();
    for action in Action::all() {
        if *action == Action::Unknown || *action == Action::WizardStepInput {
            continue;
        }
        actions.push_str("  - ");
        actions.push_str(action.as_str());
        actions.push('\n');
    }

    format!(
        "You translate transport-operations commands into a single JSON object.\n\
         \n\
         Choose \"action\" from this closed list:\n{actions}\
         \n\
         Respond with ONLY one JSON object, no prose, shaped like:\n\
         {{\"action\": \"...\", \"target_label\": null, \"target_entity_id\": null,\n\
          \"target_time\": null, \"parameters\": {{}}, \"confidence\": 0.0,\n\
          \"clarify\": false, \"clarify_options\": [], \"explanation\": \"...\"}}\n\
         \n\
         Rules:\n\
         - confidence is between 0 and 1. Below 0.5, set clarify = true and\n\
           offer concrete clarify_options.\n\
         - NEVER invent ids. Leave target_entity_id null unless the user\n\
           wrote a number.\n\
         - target_time is the time the user mentioned, verbatim (e.g. \"7:30\").\n\
         - target_label is the trip name fragment the user mentioned.\n\
         - If a selected trip id is given in context, the user's \"this trip\"\n\
           refers to it.\n\
         \n\
         Examples:\n\
         \"Remove vehicle from Path-3 - 07:30\" ->\n\
         {{\"action\": \"remove_vehicle\", \"target_label\": \"Path-3 - 07:30\",\n\
          \"target_entity_id\": null, \"target_time\": null, \"parameters\": {{}},\n\
          \"confidence\": 0.95, \"clarify\": false, \"clarify_options\": [],\n\
          \"explanation\": \"explicit trip label\"}}\n\
         \"cancel trip 12\" ->\n\
         {{\"action\": \"cancel_trip\", \"target_label\": null, \"target_entity_id\": 12,\n\
          \"target_time\": null, \"parameters\": {{}}, \"confidence\": 0.97,\n\
          \"clarify\": false, \"clarify_options\": [], \"explanation\": \"numeric id\"}}\n\
         \"list all stops\" ->\n\
         {{\"action\": \"list_all_stops\", \"target_label\": null, \"target_entity_id\": null,\n\
          \"target_time\": null, \"parameters\": {{}}, \"confidence\": 0.99,\n\
          \"clarify\": false, \"clarify_options\": [], \"explanation\": \"listing\"}}\n"
    )
}

/// Build the per-request user prompt: the text plus compact context.
pub fn build_user_prompt(text: &str, context: &ParseContext) -> String {
    let mut prompt = String::new();
    prompt.push_str("Context:\n");
    prompt.push_str(&format!("  current_page: {}\n", context.current_page));
    match context.selected_entity_id {
        Some(id) => prompt.push_str(&format!("  selected_trip_id: {}\n", id)),
        None => prompt.push_str("  selected_trip_id: none\n"),
    }
    if !context.recent.is_empty() {
        prompt.push_str("  recent:\n");
        for line in &context.recent {
            prompt.push_str(&format!("    - {}\n", line));
        }
    }
    prompt.push_str("\nCommand:\n");
    prompt.push_str(text);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_lists_registry() {
        let prompt = build_system_prompt();
        assert!(prompt.contains("- cancel_trip"));
        assert!(prompt.contains("- assign_vehicle"));
        assert!(prompt.contains("- list_all_stops"));
        // Meta actions are not offered to the model.
        assert!(!prompt.contains("- unknown"));
        assert!(!prompt.contains("- wizard_step_input"));
    }

    #[test]
    fn test_user_prompt_carries_context() {
        let context = ParseContext {
            selected_entity_id: Some(5),
            current_page: "trip_ops".into(),
            recent: vec!["list all trips".into()],
        };
        let prompt = build_user_prompt("cancel this trip", &context);
        assert!(prompt.contains("selected_trip_id: 5"));
        assert!(prompt.contains("current_page: trip_ops"));
        assert!(prompt.contains("cancel this trip"));
    }
}
