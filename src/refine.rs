//! Two-stage narrowing of the actions tried from a scene.
//!
//! Stage A enumerates every action the widget tree offers (post-order) plus
//! the ten global actions. Stage B shows the oracle the scene with the
//! candidate widgets boxed and numbered, one batch at a time, and keeps only
//! the actions whose widget or operation it names.

use image::RgbImage;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::events::OracleExchange;
use crate::oracle::{Oracle, OracleResult, id_list, string_list};
use crate::prompt;
use crate::scene::canvas::{GREEN, annotate_indexed, annotate_labeled, concat_horizontal};
use crate::scene::{Bounds, Scene};
use crate::transition::Transition;

const BATCH_SEPARATOR: &str = "\n===================\n";

/// Stage A: widget actions in post-order, then the global actions
pub fn available_actions(scene: &Scene) -> Vec<Action> {
    let mut actions: Vec<Action> = scene
        .tree
        .post_order()
        .into_iter()
        .flat_map(|index| Action::for_widget(&scene.fingerprint, &scene.tree[index]))
        .collect();
    actions.extend(Action::globals(&scene.fingerprint));
    actions
}

/// What the oracle is told about the node being expanded
#[derive(Debug, Clone, Copy)]
pub struct RefineContext<'a> {
    pub package: &'a str,
    pub goal: &'a str,
    pub scene: &'a Scene,
    pub screenshot: &'a RgbImage,
    pub path: &'a [Transition],
}

/// Stage B result
#[derive(Debug, Clone)]
pub struct Refinement {
    /// Selected actions in Stage A order; never empty when the input wasn't
    pub actions: Vec<Action>,
    pub exchange: OracleExchange,
    /// Candidate widgets of every batch, numbered
    pub before: RgbImage,
    /// Selected widgets of every batch
    pub after: RgbImage,
    pub forced: bool,
}

/// A widget that at least one Stage A action targets
struct Candidate {
    widget_id: String,
    bounds: Bounds,
    xml: String,
}

fn unique_targets(scene: &Scene, actions: &[Action]) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    actions
        .iter()
        .filter_map(|action| action.target.as_ref())
        .filter(|target| seen.insert(target.widget_id.clone()))
        .map(|target| Candidate {
            widget_id: target.widget_id.clone(),
            bounds: target.bounds,
            xml: scene.tree.subtree_xml(target.index),
        })
        .collect()
}

/// Stage B: rank `actions` batch by batch and keep the selected ones
pub fn refine(
    oracle: &dyn Oracle,
    ctx: RefineContext<'_>,
    actions: &[Action],
    first_branch_limit: usize,
    batch_size: usize,
) -> OracleResult<Refinement> {
    let candidates = unique_targets(ctx.scene, actions);
    let batch_size = batch_size.max(1);
    let batches: Vec<&[Candidate]> = if candidates.is_empty() {
        let none: &[Candidate] = &[];
        vec![none]
    } else {
        candidates.chunks(batch_size).collect()
    };

    let mut selected_widgets: HashSet<&str> = HashSet::new();
    let mut selected_operations: HashSet<String> = HashSet::new();
    let mut prompts = Vec::new();
    let mut replies = Vec::new();
    let mut formatted = Map::new();
    let mut before_images = Vec::new();
    let mut after_images = Vec::new();

    for (batch_no, batch) in batches.iter().enumerate() {
        let bounds: Vec<Bounds> = batch.iter().map(|c| c.bounds).collect();
        let annotated = annotate_indexed(ctx.screenshot, &bounds);
        let xml: Vec<String> = batch.iter().map(|c| c.xml.clone()).collect();
        let request = prompt::refine(ctx.package, ctx.goal, ctx.path, &xml, first_branch_limit);

        debug!(scene = %ctx.scene.fingerprint, batch = batch_no + 1, widgets = batch.len(), "ranking widgets");
        let reply = oracle.rank(&request, std::slice::from_ref(&annotated))?;
        let value = oracle.extract(&reply, prompt::REFINE_SCHEMA)?;

        let mut ids = id_list(&value, prompt::REFINE_WIDGET_KEY)?;
        ids.truncate(first_branch_limit);
        let mut operations = string_list(&value, prompt::REFINE_OPERATION_KEY)?;
        operations.truncate(first_branch_limit);

        let mut chosen = Vec::new();
        for id in ids {
            match id.checked_sub(1).and_then(|i| batch.get(i)) {
                Some(candidate) => {
                    selected_widgets.insert(candidate.widget_id.as_str());
                    chosen.push((id, candidate.bounds));
                }
                None => warn!(id, batch = batch_no + 1, "oracle named an unknown widget"),
            }
        }
        selected_operations.extend(operations);

        after_images.push(annotate_labeled(ctx.screenshot, &chosen, GREEN));
        before_images.push(annotated);
        prompts.push(request);
        replies.push(reply);
        formatted.insert((batch_no + 1).to_string(), value);
    }

    let mut refined: Vec<Action> = actions
        .iter()
        .filter(|action| match (&action.target, action.operation_name()) {
            (Some(target), _) => selected_widgets.contains(target.widget_id.as_str()),
            (None, Some(operation)) => selected_operations.contains(&operation),
            (None, None) => false,
        })
        .cloned()
        .collect();

    let forced = refined.is_empty() && !actions.is_empty();
    if forced {
        warn!(scene = %ctx.scene.fingerprint, "no action selected, forcing the first one");
        refined.push(actions[0].clone());
    }
    info!(
        scene = %ctx.scene.fingerprint,
        available = actions.len(),
        refined = refined.len(),
        "refined actions"
    );

    let before_refs: Vec<&RgbImage> = before_images.iter().collect();
    let after_refs: Vec<&RgbImage> = after_images.iter().collect();
    Ok(Refinement {
        actions: refined,
        exchange: OracleExchange {
            prompt: prompts.join(BATCH_SEPARATOR),
            res: replies.join(BATCH_SEPARATOR),
            format_res: Value::Object(formatted),
        },
        before: concat_horizontal(&before_refs),
        after: concat_horizontal(&after_refs),
        forced,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionKind, Direction, Key};
    use crate::oracle::OracleError;
    use crate::scene::{AppInfo, FingerprintMode, WidgetProps, WidgetTree};
    use image::Rgb;
    use serde_json::json;
    use std::cell::RefCell;

    struct CannedOracle {
        replies: RefCell<Vec<Value>>,
        prompts: RefCell<Vec<String>>,
    }

    impl CannedOracle {
        fn new(replies: Vec<Value>) -> Self {
            Self {
                replies: RefCell::new(replies),
                prompts: RefCell::new(Vec::new()),
            }
        }
    }

    impl Oracle for CannedOracle {
        fn rank(&self, prompt: &str, _images: &[RgbImage]) -> OracleResult<String> {
            self.prompts.borrow_mut().push(prompt.to_string());
            Ok("reply".to_string())
        }

        fn extract(&self, _text: &str, _schema: &str) -> OracleResult<Value> {
            let mut replies = self.replies.borrow_mut();
            if replies.is_empty() {
                return Err(OracleError::InvalidResponse("no canned reply".to_string()));
            }
            Ok(replies.remove(0))
        }
    }

    fn scene() -> Scene {
        let mut tree = WidgetTree::new();
        let list = tree.push(0, WidgetProps::new("android.widget.LinearLayout"));
        tree.push(
            list,
            WidgetProps::new("android.widget.Button")
                .text("Add")
                .clickable(true)
                .bounds(0, 0, 100, 50),
        );
        tree.push(
            list,
            WidgetProps::new("android.widget.EditText")
                .resource_id("com.example:id/title")
                .bounds(0, 60, 100, 110),
        );
        Scene::new(tree, AppInfo::new("com.example", ".Main"), FingerprintMode::Structural)
    }

    fn ctx<'a>(scene: &'a Scene, shot: &'a RgbImage) -> RefineContext<'a> {
        RefineContext {
            package: "com.example",
            goal: "add a note",
            scene,
            screenshot: shot,
            path: &[],
        }
    }

    #[test]
    fn test_available_actions_post_order_then_globals() {
        let scene = scene();
        let actions = available_actions(&scene);
        assert_eq!(actions.len(), 3 + 10);
        assert_eq!(actions[0].kind, ActionKind::Click);
        assert!(actions[1].is_planned_text());
        assert_eq!(actions[2].kind, ActionKind::LongClick);
        assert_eq!(actions[3].kind, ActionKind::Press(Key::Back));
        assert_eq!(actions[12].operation_name().as_deref(), Some("rotate portrait"));
    }

    #[test]
    fn test_refine_keeps_selected_in_stage_a_order() {
        let scene = scene();
        let shot = RgbImage::from_pixel(200, 200, Rgb([0, 0, 0]));
        let actions = available_actions(&scene);
        let oracle = CannedOracle::new(vec![json!({
            "most_promising_widget_id_array": [2],
            "most_promising_operation_array": ["Swipe Up", "press back", "fly away"],
        })]);
        let result = refine(&oracle, ctx(&scene, &shot), &actions, 6, 100).unwrap();
        let kinds: Vec<_> = result.actions.iter().map(|a| a.kind.clone()).collect();
        assert_eq!(kinds.len(), 4);
        assert!(result.actions[0].is_planned_text());
        assert_eq!(kinds[1], ActionKind::LongClick);
        assert_eq!(kinds[2], ActionKind::Press(Key::Back));
        assert_eq!(kinds[3], ActionKind::Swipe(Direction::Up));
        assert!(!result.forced);
        assert_eq!(result.before.dimensions(), (200, 200));
    }

    #[test]
    fn test_refine_truncates_to_branch_limit() {
        let scene = scene();
        let shot = RgbImage::from_pixel(200, 200, Rgb([0, 0, 0]));
        let actions = available_actions(&scene);
        let oracle = CannedOracle::new(vec![json!({
            "most_promising_widget_id_array": [1, 2],
            "most_promising_operation_array": ["press back", "press home"],
        })]);
        let result = refine(&oracle, ctx(&scene, &shot), &actions, 1, 100).unwrap();
        let kinds: Vec<_> = result.actions.iter().map(|a| a.kind.clone()).collect();
        assert_eq!(kinds, vec![ActionKind::Click, ActionKind::Press(Key::Back)]);
    }

    #[test]
    fn test_refine_forces_first_action_when_nothing_selected() {
        let scene = scene();
        let shot = RgbImage::from_pixel(200, 200, Rgb([0, 0, 0]));
        let actions = available_actions(&scene);
        let oracle = CannedOracle::new(vec![json!({
            "most_promising_widget_id_array": [9],
            "most_promising_operation_array": [],
        })]);
        let result = refine(&oracle, ctx(&scene, &shot), &actions, 6, 100).unwrap();
        assert!(result.forced);
        assert_eq!(result.actions, vec![actions[0].clone()]);
    }

    #[test]
    fn test_refine_batches_widgets() {
        let scene = scene();
        let shot = RgbImage::from_pixel(200, 200, Rgb([0, 0, 0]));
        let actions = available_actions(&scene);
        let oracle = CannedOracle::new(vec![
            json!({"most_promising_widget_id_array": [], "most_promising_operation_array": []}),
            json!({"most_promising_widget_id_array": [1], "most_promising_operation_array": []}),
        ]);
        let result = refine(&oracle, ctx(&scene, &shot), &actions, 6, 1).unwrap();
        assert_eq!(oracle.prompts.borrow().len(), 2);
        // widget 1 of the second batch is the EditText
        assert_eq!(result.actions.len(), 2);
        assert!(result.actions[0].is_planned_text());
        assert_eq!(result.before.dimensions(), (400, 200));
        assert_eq!(result.exchange.format_res.as_object().unwrap().len(), 2);
    }
}
