//! In-memory collaborators for driving a `SearchSession` without a device.
//!
//! `World` is a scripted app: named screens, edges keyed by a readable action
//! label, and screens that crash the app when entered. `ScriptedDevice` and
//! `MemoryCheckpoints` share one world the way a real device and its
//! emulator snapshots share one phone.

#![allow(dead_code)]

use image::{Rgb, RgbImage};
use serde_json::{Value, json};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use repro_explorer::action::Action;
use repro_explorer::checkpoint::{CheckpointError, CheckpointPolicy, CheckpointResult, CheckpointStore, EMPTY};
use repro_explorer::config::ExploreSettings;
use repro_explorer::device::{Device, DeviceError, DeviceResult};
use repro_explorer::events::{self, EventLog};
use repro_explorer::oracle::{Oracle, OracleResult};
use repro_explorer::prompt;
use repro_explorer::scene::{AppInfo, FingerprintMode, Observation, Scene, WidgetProps, WidgetTree};
use repro_explorer::session::Session;

pub const PACKAGE: &str = "com.example.notes";
pub const LAUNCHER: &str = "launcher";

/// Readable label of an action: `Click:<text>` for widgets, the operation
/// name for global actions
pub fn label(action: &Action) -> String {
    match &action.target {
        Some(target) if target.text.is_empty() => {
            format!("{}:{}", action.kind.name(), target.resource_id)
        }
        Some(target) => format!("{}:{}", action.kind.name(), target.text),
        None => action.operation_name().unwrap_or_default(),
    }
}

/// Screen with one clickable button per label, stacked vertically
pub fn buttons(activity: &str, labels: &[&str]) -> Scene {
    let mut tree = WidgetTree::new();
    let frame = tree.push(0, WidgetProps::new("android.widget.FrameLayout").package(PACKAGE));
    for (i, text) in labels.iter().enumerate() {
        let top = 10 + 40 * i as i32;
        tree.push(
            frame,
            WidgetProps::new("android.widget.Button")
                .package(PACKAGE)
                .text(*text)
                .clickable(true)
                .bounds(10, top, 110, top + 30),
        );
    }
    Scene::new(tree, AppInfo::new(PACKAGE, activity), FingerprintMode::Structural)
}

/// Screen with a single text field
pub fn text_field(activity: &str, resource_id: &str) -> Scene {
    let mut tree = WidgetTree::new();
    let frame = tree.push(0, WidgetProps::new("android.widget.FrameLayout").package(PACKAGE));
    tree.push(
        frame,
        WidgetProps::new("android.widget.EditText")
            .package(PACKAGE)
            .resource_id(format!("{}:id/{}", PACKAGE, resource_id))
            .hint("Title")
            .bounds(10, 10, 110, 40),
    );
    Scene::new(tree, AppInfo::new(PACKAGE, activity), FingerprintMode::Structural)
}

/// A non-blank screenshot distinguishable by `seed`
pub fn screenshot(seed: u8) -> RgbImage {
    RgbImage::from_fn(120, 200, |x, y| Rgb([(x * 2) as u8, y as u8, seed]))
}

#[derive(Default)]
pub struct World {
    pub current: String,
    pub root: String,
    pub screens: HashMap<String, (Scene, RgbImage)>,
    /// (screen, action label) -> screen
    pub edges: HashMap<(String, String), String>,
    pub crash_screens: HashSet<String>,
    pub failing_actions: HashSet<String>,
    pub crash_log: String,
    /// (screen the action ran on, action label)
    pub executed: Vec<(String, String)>,
    pub executed_actions: Vec<Action>,
    /// checkpoint key -> screen
    pub checkpoints: BTreeMap<String, String>,
    pub failing_loads: HashSet<String>,
    pub failing_saves: HashSet<String>,
    /// Listing checkpoints fails while set
    pub failing_list: bool,
    pub loads: Vec<String>,
    pub deleted: Vec<String>,
    pub launches: u32,
}

/// Scripted app shared by the fake device and checkpoint store
#[derive(Clone)]
pub struct App(pub Rc<RefCell<World>>);

impl App {
    pub fn new(root: &str, scene: Scene) -> Self {
        let mut world = World {
            current: root.to_string(),
            root: root.to_string(),
            ..World::default()
        };
        world
            .screens
            .insert(LAUNCHER.to_string(), (buttons(".Launcher", &[]), screenshot(250)));
        world.screens.insert(root.to_string(), (scene, screenshot(0)));
        world.checkpoints.insert("default_boot".to_string(), LAUNCHER.to_string());
        world.checkpoints.insert(EMPTY.to_string(), LAUNCHER.to_string());
        Self(Rc::new(RefCell::new(world)))
    }

    pub fn screen(&self, name: &str, scene: Scene) -> &Self {
        let mut world = self.0.borrow_mut();
        let seed = (world.screens.len() * 37 % 250) as u8;
        world.screens.insert(name.to_string(), (scene, screenshot(seed)));
        drop(world);
        self
    }

    pub fn edge(&self, from: &str, action: &str, to: &str) -> &Self {
        self.0
            .borrow_mut()
            .edges
            .insert((from.to_string(), action.to_string()), to.to_string());
        self
    }

    pub fn crashes_on(&self, name: &str) -> &Self {
        self.0.borrow_mut().crash_screens.insert(name.to_string());
        self
    }

    pub fn fingerprint(&self, name: &str) -> String {
        self.0.borrow().screens[name].0.fingerprint.clone()
    }

    pub fn device(&self) -> ScriptedDevice {
        ScriptedDevice(self.clone())
    }

    pub fn checkpoints(&self) -> MemoryCheckpoints {
        MemoryCheckpoints(self.clone())
    }

    pub fn executed(&self) -> Vec<(String, String)> {
        self.0.borrow().executed.clone()
    }
}

pub struct ScriptedDevice(App);

impl Device for ScriptedDevice {
    fn sample(&mut self) -> DeviceResult<Observation> {
        let world = self.0.0.borrow();
        let (scene, screenshot) = world
            .screens
            .get(&world.current)
            .ok_or_else(|| DeviceError::ActionExecution(format!("no screen {}", world.current)))?;
        Ok(Observation {
            scene: scene.clone(),
            screenshot: screenshot.clone(),
        })
    }

    fn screenshot(&mut self) -> DeviceResult<RgbImage> {
        Ok(self.sample()?.screenshot)
    }

    fn execute(&mut self, action: &Action) -> DeviceResult<()> {
        let mut world = self.0.0.borrow_mut();
        let label = label(action);
        let current = world.current.clone();
        world.executed.push((current.clone(), label.clone()));
        world.executed_actions.push(action.clone());
        if world.failing_actions.contains(&label) {
            return Err(DeviceError::ActionExecution(format!("{} refused", label)));
        }
        if let Some(next) = world.edges.get(&(current, label)).cloned() {
            if world.crash_screens.contains(&next) {
                world.crash_log.push_str("FATAL EXCEPTION: main\njava.lang.IllegalStateException\n");
            }
            world.current = next;
        }
        Ok(())
    }

    fn read_crash_log(&mut self) -> DeviceResult<String> {
        Ok(self.0.0.borrow().crash_log.clone())
    }

    fn clear_crash_log(&mut self) -> DeviceResult<()> {
        self.0.0.borrow_mut().crash_log.clear();
        Ok(())
    }

    fn launch_app(&mut self, _package: &str) -> DeviceResult<()> {
        let mut world = self.0.0.borrow_mut();
        world.launches += 1;
        world.current = world.root.clone();
        Ok(())
    }
}

pub struct MemoryCheckpoints(App);

impl CheckpointStore for MemoryCheckpoints {
    fn save(&mut self, key: &str) -> CheckpointResult<()> {
        let mut world = self.0.0.borrow_mut();
        if world.failing_saves.contains(key) {
            return Err(CheckpointError::Save {
                key: key.to_string(),
                message: "disk full".to_string(),
            });
        }
        let current = world.current.clone();
        world.checkpoints.insert(key.to_string(), current);
        Ok(())
    }

    fn load(&mut self, key: &str) -> CheckpointResult<()> {
        let mut world = self.0.0.borrow_mut();
        world.loads.push(key.to_string());
        if world.failing_loads.contains(key) {
            return Err(CheckpointError::Load {
                key: key.to_string(),
                message: "snapshot corrupted".to_string(),
            });
        }
        match world.checkpoints.get(key).cloned() {
            Some(screen) => {
                world.current = screen;
                Ok(())
            }
            None => Err(CheckpointError::Load {
                key: key.to_string(),
                message: "no such snapshot".to_string(),
            }),
        }
    }

    fn delete(&mut self, key: &str) -> CheckpointResult<()> {
        let mut world = self.0.0.borrow_mut();
        world.checkpoints.remove(key);
        world.deleted.push(key.to_string());
        Ok(())
    }

    fn list(&mut self) -> CheckpointResult<Vec<String>> {
        let world = self.0.0.borrow();
        if world.failing_list {
            return Err(CheckpointError::List("emulator console closed".to_string()));
        }
        Ok(world.checkpoints.keys().cloned().collect())
    }
}

/// Oracle answering from per-request queues, with fixed fallbacks
///
/// Fallbacks: refinement keeps widgets 1-6 and no global operation, pruning
/// keeps path 1, validation rejects, text is `hello`.
pub struct ScriptedOracle {
    pub refine: RefCell<VecDeque<Value>>,
    pub prune: RefCell<VecDeque<Value>>,
    pub validate: RefCell<VecDeque<Value>>,
    /// Kind of every extraction request, in order
    pub requests: RefCell<Vec<&'static str>>,
    pub rank_prompts: RefCell<Vec<String>>,
    pub rank_reply: String,
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self {
            refine: RefCell::default(),
            prune: RefCell::default(),
            validate: RefCell::default(),
            requests: RefCell::default(),
            rank_prompts: RefCell::default(),
            rank_reply: "1. Open the editor\n2. Save".to_string(),
        }
    }
}

impl ScriptedOracle {
    pub fn on_refine(self, reply: Value) -> Self {
        self.refine.borrow_mut().push_back(reply);
        self
    }

    pub fn on_prune(self, reply: Value) -> Self {
        self.prune.borrow_mut().push_back(reply);
        self
    }

    pub fn on_validate(self, reply: Value) -> Self {
        self.validate.borrow_mut().push_back(reply);
        self
    }

    pub fn count(&self, kind: &str) -> usize {
        self.requests.borrow().iter().filter(|k| **k == kind).count()
    }
}

impl Oracle for ScriptedOracle {
    fn rank(&self, prompt: &str, _images: &[RgbImage]) -> OracleResult<String> {
        self.rank_prompts.borrow_mut().push(prompt.to_string());
        Ok(self.rank_reply.clone())
    }

    fn extract(&self, _text: &str, schema: &str) -> OracleResult<Value> {
        let (kind, value) = if schema == prompt::REFINE_SCHEMA {
            let reply = self.refine.borrow_mut().pop_front().unwrap_or_else(|| {
                json!({
                    "most_promising_widget_id_array": [1, 2, 3, 4, 5, 6],
                    "most_promising_operation_array": [],
                })
            });
            ("refine", reply)
        } else if schema == prompt::TEXT_SCHEMA {
            ("text", json!({"input": "hello"}))
        } else if schema == prompt::TRANSITION_SCHEMA {
            (
                "transition",
                json!({
                    "detailed_description": "A new screen opens.",
                    "one_sentence_summary": "Opens a screen.",
                }),
            )
        } else if schema == prompt::VALIDATE_SCHEMA {
            let reply = self
                .validate
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| json!({"task_achieved": false}));
            ("validate", reply)
        } else {
            let reply = self.prune.borrow_mut().pop_front().unwrap_or_else(|| {
                json!({
                    "path_id_array_with_potential": [1],
                    "path_id_array_completed": [],
                })
            });
            ("prune", reply)
        };
        self.requests.borrow_mut().push(kind);
        Ok(value)
    }
}

/// Checkpoint policy without settle delays
pub fn fast_policy() -> CheckpointPolicy {
    CheckpointPolicy::new(2, Duration::ZERO)
}

pub fn settings() -> ExploreSettings {
    ExploreSettings::defaults()
}

/// Initialized result directory and its event log
pub fn run_dir(base: &Path) -> (Session, EventLog) {
    let session = Session::in_dir(base.join("run"));
    session.init(PACKAGE).unwrap();
    let events = EventLog::open(&session.dir).unwrap();
    (session, events)
}

/// Event type names in log order
pub fn event_types(dir: &Path) -> Vec<String> {
    events::read_range(dir, 0, None, false)
        .unwrap()
        .iter()
        .map(|r| r["type"].as_str().unwrap_or_default().to_string())
        .collect()
}

/// Records of one event type
pub fn events_of(dir: &Path, kind: &str) -> Vec<Value> {
    events::read_range(dir, 0, None, false)
        .unwrap()
        .into_iter()
        .filter(|r| r["type"] == kind)
        .collect()
}
