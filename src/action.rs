//! Action model: what can be done on a scene and how it is identified.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::scene::{Bounds, Widget, WidgetIndex, hash_hex};

/// Text payload of an `InputText` action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "text", rename_all = "snake_case")]
pub enum TextInput {
    /// Text is generated right before execution
    Planned,
    Resolved(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Key {
    Back,
    Enter,
    Delete,
    Home,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Landscape,
    Portrait,
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Key::Back => "back",
            Key::Enter => "enter",
            Key::Delete => "delete",
            Key::Home => "home",
        })
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        })
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Orientation::Landscape => "landscape",
            Orientation::Portrait => "portrait",
        })
    }
}

/// Kind of interaction plus its kind-specific parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ActionKind {
    Click,
    LongClick,
    InputText(TextInput),
    Press(Key),
    Swipe(Direction),
    Rotate(Orientation),
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Click => "Click",
            ActionKind::LongClick => "LongClick",
            ActionKind::InputText(_) => "InputText",
            ActionKind::Press(_) => "Press",
            ActionKind::Swipe(_) => "Swipe",
            ActionKind::Rotate(_) => "Rotate",
        }
    }

    /// Key, direction or orientation; never the text payload
    fn modifier(&self) -> Option<String> {
        match self {
            ActionKind::Press(key) => Some(key.to_string()),
            ActionKind::Swipe(direction) => Some(direction.to_string()),
            ActionKind::Rotate(orientation) => Some(orientation.to_string()),
            _ => None,
        }
    }

    pub fn targets_widget(&self) -> bool {
        matches!(
            self,
            ActionKind::Click | ActionKind::LongClick | ActionKind::InputText(_)
        )
    }
}

/// Lookup-only reference to the widget an action acts on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetTarget {
    pub index: WidgetIndex,
    pub widget_id: String,
    pub bounds: Bounds,
    pub tag: String,
    /// Single-element XML descriptor, e.g. `<Button content="Save"/>`
    pub descriptor: String,
    pub resource_id: String,
    pub hint: String,
    pub text: String,
}

impl WidgetTarget {
    pub fn from_widget(widget: &Widget) -> Self {
        Self {
            index: widget.index,
            widget_id: widget.widget_id.clone(),
            bounds: widget.props.bounds,
            tag: widget.tag().to_string(),
            descriptor: widget.prompt_xml(),
            resource_id: widget.props.short_resource_id().to_string(),
            hint: widget.props.hint.trim().to_string(),
            text: widget.props.text.trim().to_string(),
        }
    }
}

/// One interaction on a scene
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub scene_id: String,
    pub action_id: String,
    pub kind: ActionKind,
    pub target: Option<WidgetTarget>,
}

/// Identity of an action from the scene, target and kind
pub fn action_id(scene_id: &str, widget_id: Option<&str>, kind: &ActionKind) -> String {
    let modifier = kind.modifier();
    hash_hex(&format!(
        "{},{},{},{}",
        scene_id,
        widget_id.unwrap_or("None"),
        kind.name(),
        modifier.as_deref().unwrap_or("None")
    ))
}

impl Action {
    pub fn on_widget(scene_id: &str, widget: &Widget, kind: ActionKind) -> Self {
        let target = WidgetTarget::from_widget(widget);
        Self {
            scene_id: scene_id.to_string(),
            action_id: action_id(scene_id, Some(&target.widget_id), &kind),
            kind,
            target: Some(target),
        }
    }

    pub fn global(scene_id: &str, kind: ActionKind) -> Self {
        Self {
            scene_id: scene_id.to_string(),
            action_id: action_id(scene_id, None, &kind),
            kind,
            target: None,
        }
    }

    /// Actions a single widget offers
    pub fn for_widget(scene_id: &str, widget: &Widget) -> Vec<Self> {
        if widget.is_virtual {
            return Vec::new();
        }
        if widget.is_text_field() {
            return vec![
                Self::on_widget(scene_id, widget, ActionKind::InputText(TextInput::Planned)),
                Self::on_widget(scene_id, widget, ActionKind::LongClick),
            ];
        }
        let mut actions = Vec::new();
        if widget.props.clickable {
            actions.push(Self::on_widget(scene_id, widget, ActionKind::Click));
        }
        if widget.props.long_clickable {
            actions.push(Self::on_widget(scene_id, widget, ActionKind::LongClick));
        }
        actions
    }

    /// The ten widget-independent actions in their fixed order
    pub fn globals(scene_id: &str) -> Vec<Self> {
        let kinds = [
            ActionKind::Press(Key::Back),
            ActionKind::Press(Key::Enter),
            ActionKind::Press(Key::Delete),
            ActionKind::Press(Key::Home),
            ActionKind::Swipe(Direction::Up),
            ActionKind::Swipe(Direction::Down),
            ActionKind::Swipe(Direction::Left),
            ActionKind::Swipe(Direction::Right),
            ActionKind::Rotate(Orientation::Landscape),
            ActionKind::Rotate(Orientation::Portrait),
        ];
        kinds
            .into_iter()
            .map(|kind| Self::global(scene_id, kind))
            .collect()
    }

    /// Operation name used in oracle replies for global actions
    ///
    /// Returns `None` for widget-targeted actions.
    pub fn operation_name(&self) -> Option<String> {
        match &self.kind {
            ActionKind::Press(key) => Some(format!("press {}", key)),
            ActionKind::Swipe(direction) => Some(format!("swipe {}", direction)),
            ActionKind::Rotate(orientation) => Some(format!("rotate {}", orientation)),
            _ => None,
        }
    }

    pub fn is_planned_text(&self) -> bool {
        matches!(self.kind, ActionKind::InputText(TextInput::Planned))
    }

    /// Copy of a text action carrying the literal `text`; identity unchanged
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        let mut action = self.clone();
        if let ActionKind::InputText(_) = action.kind {
            action.kind = ActionKind::InputText(TextInput::Resolved(text.into()));
        }
        action
    }

    /// Natural-language description used in prompts and artifacts
    pub fn describe(&self) -> String {
        let descriptor = self
            .target
            .as_ref()
            .map(|t| t.descriptor.as_str())
            .unwrap_or("");
        match &self.kind {
            ActionKind::Press(key) => format!("press '{}' key", key),
            ActionKind::Swipe(direction) => format!("swipe {}", direction),
            ActionKind::Rotate(orientation) => format!("rotate {}", orientation),
            ActionKind::InputText(TextInput::Resolved(text)) => {
                format!("input '{}' in widget `{}`", text, descriptor)
            }
            ActionKind::InputText(TextInput::Planned) => {
                format!("input text in widget `{}`", descriptor)
            }
            ActionKind::Click => format!("click widget `{}`", descriptor),
            ActionKind::LongClick => format!("longclick widget `{}`", descriptor),
        }
    }

    pub fn to_record(&self) -> serde_json::Value {
        serde_json::json!({
            "action_id": self.action_id,
            "scene_id": self.scene_id,
            "action_type": self.kind.name(),
            "target_widget": self.target,
            "addition": match &self.kind {
                ActionKind::InputText(TextInput::Resolved(text)) => serde_json::json!(text),
                other => serde_json::json!(other.modifier()),
            },
            "action_desc": self.describe(),
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{WidgetProps, WidgetTree};

    fn tree() -> WidgetTree {
        let mut tree = WidgetTree::new();
        tree.push(
            0,
            WidgetProps::new("android.widget.EditText")
                .resource_id("com.example:id/name")
                .bounds(0, 0, 100, 50),
        );
        tree.push(
            0,
            WidgetProps::new("android.widget.Button")
                .text("OK")
                .clickable(true)
                .long_clickable(true),
        );
        tree.push(0, WidgetProps::new("android.widget.TextView").text("static"));
        tree
    }

    #[test]
    fn test_widget_actions() {
        let tree = tree();
        let edit = Action::for_widget("s", &tree[1]);
        assert_eq!(edit.len(), 2);
        assert!(edit[0].is_planned_text());
        assert_eq!(edit[1].kind, ActionKind::LongClick);

        let button = Action::for_widget("s", &tree[2]);
        assert_eq!(
            button.iter().map(|a| a.kind.clone()).collect::<Vec<_>>(),
            vec![ActionKind::Click, ActionKind::LongClick]
        );
        assert!(Action::for_widget("s", &tree[3]).is_empty());
        assert!(Action::for_widget("s", &tree[0]).is_empty());
    }

    #[test]
    fn test_action_id_ignores_text_payload() {
        let tree = tree();
        let planned = Action::on_widget("s", &tree[1], ActionKind::InputText(TextInput::Planned));
        let resolved = planned.with_text("alice");
        assert_eq!(planned.action_id, resolved.action_id);
        assert_eq!(
            resolved.kind,
            ActionKind::InputText(TextInput::Resolved("alice".to_string()))
        );
        let other = Action::on_widget(
            "s",
            &tree[1],
            ActionKind::InputText(TextInput::Resolved("bob".to_string())),
        );
        assert_eq!(other.action_id, planned.action_id);
    }

    #[test]
    fn test_action_id_distinguishes_modifiers() {
        let globals = Action::globals("s");
        assert_eq!(globals.len(), 10);
        let mut ids: Vec<&str> = globals.iter().map(|a| a.action_id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 10);
        assert_ne!(
            Action::global("a", ActionKind::Press(Key::Back)).action_id,
            Action::global("b", ActionKind::Press(Key::Back)).action_id
        );
    }

    #[test]
    fn test_describe() {
        let tree = tree();
        let click = Action::on_widget("s", &tree[2], ActionKind::Click);
        assert_eq!(click.describe(), "click widget `<Button content=\"OK\"/>`");
        let input = Action::on_widget("s", &tree[1], ActionKind::InputText(TextInput::Planned)).with_text("hi");
        assert_eq!(input.describe(), "input 'hi' in widget `<EditText content=\"name\"/>`");
        assert_eq!(Action::global("s", ActionKind::Press(Key::Back)).describe(), "press 'back' key");
        assert_eq!(
            Action::global("s", ActionKind::Swipe(Direction::Left)).operation_name().as_deref(),
            Some("swipe left")
        );
        assert_eq!(click.operation_name(), None);
    }

    #[test]
    fn test_record_contains_description() {
        let action = Action::global("s", ActionKind::Rotate(Orientation::Portrait));
        let record = action.to_record();
        assert_eq!(record["action_type"], "Rotate");
        assert_eq!(record["addition"], "portrait");
        assert_eq!(record["action_desc"], "rotate portrait");
    }
}
