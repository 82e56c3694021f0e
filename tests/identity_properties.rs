//! Integration tests for scene fingerprints and action identities

mod common;

use pretty_assertions::assert_eq;

use common::{PACKAGE, buttons, text_field};
use repro_explorer::action::{Action, ActionKind, TextInput};
use repro_explorer::refine::available_actions;
use repro_explorer::scene::{AppInfo, FingerprintMode, Scene, WidgetProps, WidgetTree, structural_part};

fn list_screen(items: &[&str], checked: usize) -> WidgetTree {
    let mut tree = WidgetTree::new();
    let list = tree.push(0, WidgetProps::new("android.widget.ListView").package(PACKAGE));
    for (i, item) in items.iter().enumerate() {
        let top = 40 * i as i32;
        tree.push(
            list,
            WidgetProps::new("android.widget.CheckBox")
                .package(PACKAGE)
                .text(*item)
                .checked(i == checked)
                .clickable(true)
                .bounds(0, top, 200, top + 40),
        );
    }
    tree
}

#[test]
fn test_identical_trees_share_fingerprint() {
    let app = AppInfo::new(PACKAGE, ".Main");
    let first = Scene::new(list_screen(&["milk", "eggs"], 0), app.clone(), FingerprintMode::Structural);
    let second = Scene::new(list_screen(&["milk", "eggs"], 0), app, FingerprintMode::Structural);
    assert_eq!(first.fingerprint, second.fingerprint);
}

#[test]
fn test_content_changes_alter_fingerprint() {
    let app = AppInfo::new(PACKAGE, ".Main");
    let base = Scene::new(list_screen(&["milk", "eggs"], 0), app.clone(), FingerprintMode::Structural);
    let renamed = Scene::new(list_screen(&["milk", "bread"], 0), app.clone(), FingerprintMode::Structural);
    let toggled = Scene::new(list_screen(&["milk", "eggs"], 1), app.clone(), FingerprintMode::Structural);
    let longer = Scene::new(list_screen(&["milk", "eggs", "tea"], 0), app, FingerprintMode::Structural);
    assert_ne!(base.fingerprint, renamed.fingerprint);
    assert_ne!(base.fingerprint, toggled.fingerprint);
    assert_ne!(base.fingerprint, longer.fingerprint);
}

#[test]
fn test_salted_fingerprints_keep_structural_part() {
    let app = AppInfo::new(PACKAGE, ".Main");
    let plain = Scene::new(list_screen(&["milk"], 0), app.clone(), FingerprintMode::Structural);
    let salted = Scene::new(list_screen(&["milk"], 0), app, FingerprintMode::Salted);
    assert_ne!(plain.fingerprint, salted.fingerprint);
    assert_eq!(structural_part(&salted.fingerprint), plain.fingerprint);
    assert_eq!(salted.structural_hash(), plain.structural_hash());
}

#[test]
fn test_action_ids_stable_across_samples() {
    let first = available_actions(&buttons(".Main", &["Save", "Cancel"]));
    let second = available_actions(&buttons(".Main", &["Save", "Cancel"]));
    let first: Vec<&str> = first.iter().map(|a| a.action_id.as_str()).collect();
    let second: Vec<&str> = second.iter().map(|a| a.action_id.as_str()).collect();
    assert_eq!(first, second);
}

#[test]
fn test_action_id_ignores_generated_text() {
    let scene = text_field(".Edit", "title");
    let planned = available_actions(&scene)
        .into_iter()
        .find(Action::is_planned_text)
        .expect("text field offers text input");
    let resolved = planned.with_text("groceries");
    assert_eq!(planned.action_id, resolved.action_id);
    assert_eq!(resolved.kind, ActionKind::InputText(TextInput::Resolved("groceries".to_string())));
}

#[test]
fn test_action_ids_unique_within_scene() {
    let actions = available_actions(&buttons(".Main", &["Save", "Cancel"]));
    let mut ids: Vec<&str> = actions.iter().map(|a| a.action_id.as_str()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), actions.len());
}
