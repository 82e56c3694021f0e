//! Transition edges between scenes.

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::scene::{AppInfo, hash_hex};

/// Description recorded when an action leaves the screen unchanged
pub const UNCHANGED_DESCRIPTION: &str = "Scene not change";

/// Description recorded when an action leads to an explored scene
pub const REVISIT_DESCRIPTION: &str = "Enter already explored scene";

/// Directed edge caused by one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub transition_id: String,
    pub action: Action,
    pub source: String,
    pub destination: String,
    pub source_app: AppInfo,
    pub destination_app: AppInfo,
    /// Detailed account of the UI changes
    pub description: String,
    pub summary: String,
}

/// Identity of a transition
pub fn transition_id(source: &str, action_id: &str, destination: &str) -> String {
    hash_hex(&format!("{},{},{}", source, action_id, destination))
}

impl Transition {
    pub fn new(
        action: Action,
        source: &str,
        destination: &str,
        source_app: AppInfo,
        destination_app: AppInfo,
        description: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            transition_id: transition_id(source, &action.action_id, destination),
            action,
            source: source.to_string(),
            destination: destination.to_string(),
            source_app,
            destination_app,
            description: description.into(),
            summary: summary.into(),
        }
    }

    /// Transition with a fixed description used for both text fields
    pub fn placeholder(
        action: Action,
        source: &str,
        destination: &str,
        source_app: AppInfo,
        destination_app: AppInfo,
        description: &str,
    ) -> Self {
        Self::new(action, source, destination, source_app, destination_app, description, description)
    }

    /// Text used in path prompts
    pub fn prompt_text(&self, one_sentence: bool) -> &str {
        if one_sentence { &self.summary } else { &self.description }
    }

    /// JSON document stored as `transitions/<id>.json`
    pub fn to_record(&self) -> serde_json::Value {
        serde_json::json!({
            "transition_id": self.transition_id,
            "one_sentence_summary": self.summary,
            "start_scene_id": self.source,
            "end_scene_id": self.destination,
            "start_app_info": self.source_app,
            "end_app_info": self.destination_app,
            "ui_transition": self.description,
            "action": self.action.to_record(),
        })
    }
}
