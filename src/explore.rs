//! Checkpointed breadth-first search for a bug reproduction.
//!
//! `SearchSession` expands the frontier one level at a time. Every node is
//! expanded from its own checkpoint: each refined action is executed, the
//! result classified (unchanged, revisit, new) and the node restored before
//! the next action. Between levels the oracle prunes the frontier and any
//! path it claims complete is validated against its final screenshot. A
//! crash on a new scene ends the run immediately.

use image::RgbImage;
use serde::Deserialize;
use std::io;
use std::ops::ControlFlow;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use crate::action::Action;
use crate::artifact;
use crate::budget::Budget;
use crate::checkpoint::{CheckpointError, CheckpointPolicy, CheckpointStore};
use crate::config::{ConfigError, ExploreSettings};
use crate::device::{Device, DeviceError};
use crate::events::{Event, EventLog, EventLogError};
use crate::graph::StateGraph;
use crate::oracle::{Oracle, OracleError, string_field};
use crate::prompt;
use crate::prune::{self, Candidate};
use crate::refine::{self, RefineContext};
use crate::scene::canvas::{concat_horizontal, mark_action, mark_bounds};
use crate::scene::{Observation, Scene};
use crate::session::{DetailKind, Session};
use crate::transition::{REVISIT_DESCRIPTION, Transition, UNCHANGED_DESCRIPTION};

/// Marker of an uncaught exception in the crash log
pub const CRASH_MARKER: &str = "FATAL EXCEPTION";

/// Result type for search operations
pub type ExploreResult<T> = Result<T, ExploreError>;

/// Errors that abort a run
#[derive(Debug, thiserror::Error)]
pub enum ExploreError {
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("{0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("event log error: {0}")]
    EventLog(#[from] EventLogError),

    #[error("result directory error: {0}")]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// What is being reproduced, and in which app
#[derive(Debug, Clone)]
pub struct Goal {
    pub package: String,
    /// Natural-language steps to reproduce
    pub description: String,
}

impl Goal {
    pub fn new(package: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            description: description.into(),
        }
    }
}

/// Issue report a goal can be summarized from
#[derive(Debug, Clone, Deserialize)]
pub struct IssueReport {
    pub repo: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub comments: Vec<String>,
}

/// How a successful run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessKind {
    Crash,
    GoalConfirmed,
}

/// Terminal state of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success {
        kind: SuccessKind,
        artifacts: Vec<PathBuf>,
    },
    Failure {
        reason: String,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

/// A frontier entry: a scene reached by a recorded path
#[derive(Debug, Clone)]
pub struct ExploringNode {
    pub scene: Scene,
    pub screenshot: RgbImage,
    /// Stage A actions of the scene
    pub actions: Vec<Action>,
    pub path: Vec<Transition>,
    pub parent: Option<String>,
}

impl ExploringNode {
    pub fn fingerprint(&self) -> &str {
        &self.scene.fingerprint
    }

    fn candidate(&self) -> Candidate<'_> {
        Candidate {
            scene_id: &self.scene.fingerprint,
            path: &self.path,
            screenshot: &self.screenshot,
        }
    }
}

/// One run of the search against one device
pub struct SearchSession<'a> {
    device: &'a mut dyn Device,
    store: &'a mut dyn CheckpointStore,
    oracle: &'a dyn Oracle,
    session: Session,
    events: EventLog,
    graph: StateGraph,
    goal: Goal,
    issue: Option<IssueReport>,
    settings: ExploreSettings,
    policy: CheckpointPolicy,
    budget: Budget,
    level: u32,
}

impl<'a> SearchSession<'a> {
    pub fn new(
        device: &'a mut dyn Device,
        store: &'a mut dyn CheckpointStore,
        oracle: &'a dyn Oracle,
        session: Session,
        events: EventLog,
        goal: Goal,
        settings: ExploreSettings,
    ) -> ExploreResult<Self> {
        settings.validate()?;
        let budget = Budget::new(settings.max_duration, settings.max_transitions);
        Ok(Self {
            device,
            store,
            oracle,
            session,
            events,
            graph: StateGraph::new(),
            goal,
            issue: None,
            settings,
            policy: CheckpointPolicy::default(),
            budget,
            level: 0,
        })
    }

    pub fn checkpoint_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Summarize `issue` into the goal description before exploring
    pub fn issue(mut self, issue: IssueReport) -> Self {
        self.issue = Some(issue);
        self
    }

    pub fn budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    pub fn graph(&self) -> &StateGraph {
        &self.graph
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn goal(&self) -> &Goal {
        &self.goal
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Run to a terminal state
    ///
    /// Failures of the search itself (budgets, step limit, empty frontier)
    /// are `Ok(Outcome::Failure)`. Errors are recorded as `ExploreError`
    /// events before being returned.
    pub fn run(&mut self) -> ExploreResult<Outcome> {
        match self.explore() {
            Ok(outcome) => {
                info!(?outcome, elapsed = %self.budget.time_consumption(), "exploration finished");
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, "exploration aborted");
                if let Err(log_err) = self.events.append(Event::ExploreError {
                    reason: e.to_string(),
                }) {
                    error!(error = %log_err, "could not record exploration error");
                }
                Err(e)
            }
        }
    }

    fn explore(&mut self) -> ExploreResult<Outcome> {
        if let Some(issue) = self.issue.take() {
            self.goal.description = summarize_issue(self.oracle, &mut self.events, &issue)?;
        }
        debug!(package = %self.goal.package, goal = %self.goal.description, "goal");
        debug!(
            max_step = self.settings.max_step,
            max_transitions = self.settings.max_transitions,
            first_branch_limit = self.settings.first_branch_limit,
            second_branch_limit = self.settings.second_branch_limit,
            "limits"
        );

        self.collect_garbage(&[]);
        info!(package = %self.goal.package, "start exploring");

        let (root, actions, _) = self.record_current_scene()?;
        let root = ExploringNode {
            scene: root.scene,
            screenshot: root.screenshot,
            actions,
            path: Vec::new(),
            parent: None,
        };
        if let Err(e) = self.policy.save(self.store, root.fingerprint()) {
            warn!(scene = root.fingerprint(), error = %e, "root checkpoint not saved");
        }
        let mut frontier = vec![root];

        loop {
            self.level += 1;
            let max_step = self.settings.max_step;
            if self.level > max_step {
                return self.fail(format!("max steps reached: {}", max_step));
            }
            info!(level = self.level, nodes = frontier.len(), "exploring level");

            let mut next = Vec::new();
            for node in std::mem::take(&mut frontier) {
                if let Some(outcome) = self.expand(&node, &mut next)? {
                    return Ok(outcome);
                }
            }

            if next.is_empty() {
                return self.fail(format!("no more exploring nodes at step {}", self.level));
            }
            if self.level >= max_step {
                return self.fail(format!("max steps reached: {}", max_step));
            }

            match self.prune_level(next)? {
                ControlFlow::Continue(survivors) => frontier = survivors,
                ControlFlow::Break(outcome) => return Ok(outcome),
            }
        }
    }

    /// Execute the refined actions of `node`, pushing new scenes onto `next`
    fn expand(
        &mut self,
        node: &ExploringNode,
        next: &mut Vec<ExploringNode>,
    ) -> ExploreResult<Option<Outcome>> {
        info!(scene = node.fingerprint(), depth = node.path.len(), "entering scene");
        if node.parent.is_some() && !self.restore(node)? {
            return Ok(None);
        }
        self.emit(Event::UpdateCurrentScene {
            scene_id: node.fingerprint().to_string(),
        })?;

        let actions = self.refine(node)?;
        let last = actions.len().saturating_sub(1);

        for (i, planned) in actions.iter().enumerate() {
            let action = self.resolve_text(node, planned)?;

            if let Err(e) = self.device.execute(&action) {
                warn!(action = %action, error = %e, "action failed, recording its effect anyway");
            }

            let (observed, next_actions, is_new) = self.record_current_scene()?;
            self.emit(Event::UpdateCurrentScene {
                scene_id: observed.scene.fingerprint.clone(),
            })?;
            self.record_execution(&action, node, &observed)?;

            let transition_image = mark_action(
                &node.screenshot,
                action.target.as_ref().map(|t| &t.bounds),
                action.kind.name(),
            );

            let transition = if is_new {
                let (description, summary) = self.describe_transition(&action, node, &observed)?;
                Transition::new(
                    action,
                    node.fingerprint(),
                    &observed.scene.fingerprint,
                    node.scene.app.clone(),
                    observed.scene.app.clone(),
                    description,
                    summary,
                )
            } else {
                let description = if observed.scene.fingerprint == node.scene.fingerprint {
                    warn!(scene = %observed.scene.fingerprint, "scene not changed");
                    UNCHANGED_DESCRIPTION
                } else {
                    warn!(scene = %observed.scene.fingerprint, "scene already explored");
                    REVISIT_DESCRIPTION
                };
                Transition::placeholder(
                    action,
                    node.fingerprint(),
                    &observed.scene.fingerprint,
                    node.scene.app.clone(),
                    observed.scene.app.clone(),
                    description,
                )
            };
            let mut path = node.path.clone();
            path.push(transition.clone());
            self.record_transition(transition, &transition_image, !is_new)?;

            if self.crashed()? {
                return self.crash_success(&observed.scene.fingerprint, &path).map(Some);
            }

            if is_new {
                let child = ExploringNode {
                    scene: observed.scene,
                    screenshot: observed.screenshot,
                    actions: next_actions,
                    path,
                    parent: Some(node.fingerprint().to_string()),
                };
                if let Err(e) = self.policy.save(self.store, child.fingerprint()) {
                    warn!(
                        scene = child.fingerprint(),
                        error = %e,
                        "checkpoint not saved, the scene will be replayed from empty"
                    );
                }
                next.push(child);
            }

            let mut dropped = false;
            if i != last {
                if self.restore(node)? {
                    self.emit(Event::UpdateCurrentScene {
                        scene_id: node.fingerprint().to_string(),
                    })?;
                } else {
                    dropped = true;
                }
            }

            if let Some(reason) = self.budget.exhausted() {
                return self.fail(reason).map(Some);
            }
            if dropped {
                warn!(
                    scene = node.fingerprint(),
                    skipped = last - i,
                    "node could not be restored, dropping its remaining actions"
                );
                break;
            }
        }
        Ok(None)
    }

    /// Restore the device to `node`; `false` when even replay failed
    fn restore(&mut self, node: &ExploringNode) -> ExploreResult<bool> {
        match self.policy.restore(
            self.store,
            self.device,
            node.fingerprint(),
            &self.goal.package,
            &node.path,
        ) {
            Ok(how) => {
                debug!(scene = node.fingerprint(), ?how, "scene restored");
                Ok(true)
            }
            Err(CheckpointError::Replay(message)) => {
                error!(scene = node.fingerprint(), error = %message, "replay from empty failed");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Sample the device and register the scene if it is new
    fn record_current_scene(&mut self) -> ExploreResult<(Observation, Vec<Action>, bool)> {
        let observed = self.device.sample()?;
        let actions = refine::available_actions(&observed.scene);
        let fingerprint = observed.scene.fingerprint.clone();
        let is_new = self.graph.add_node(&fingerprint, actions.len());
        if is_new {
            self.emit(Event::AddGraphNode {
                scene_id: fingerprint,
                total_action_num: actions.len(),
            })?;
            self.session.save_scene(&observed.scene, &observed.screenshot)?;
        }
        Ok((observed, actions, is_new))
    }

    fn refine(&mut self, node: &ExploringNode) -> ExploreResult<Vec<Action>> {
        let ctx = RefineContext {
            package: &self.goal.package,
            goal: &self.goal.description,
            scene: &node.scene,
            screenshot: &node.screenshot,
            path: &node.path,
        };
        let refinement = refine::refine(
            self.oracle,
            ctx,
            &node.actions,
            self.settings.first_branch_limit,
            self.settings.widget_batch_size,
        )?;

        let ts = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        let before_image_name = format!("RefineActionWidgets_{}_0", ts);
        let after_image_name = format!("RefineActionWidgets_{}_1", ts);
        self.session.save_detail_image(&before_image_name, &refinement.before)?;
        self.session.save_detail_image(&after_image_name, &refinement.after)?;
        self.emit(Event::RefineActionWidgets {
            llm: refinement.exchange,
            scene_id: node.fingerprint().to_string(),
            before_image_name,
            after_image_name,
            predict_flag: false,
        })?;
        Ok(refinement.actions)
    }

    /// Generate the text of a planned text action; other actions pass through
    fn resolve_text(&mut self, node: &ExploringNode, action: &Action) -> ExploreResult<Action> {
        let Some(target) = action.target.as_ref().filter(|_| action.is_planned_text()) else {
            return Ok(action.clone());
        };
        let image = mark_bounds(&node.screenshot, &target.bounds);
        let request = prompt::generate_text(&self.goal.package, &self.goal.description, &node.path, target);
        let reply = self.oracle.rank(&request, std::slice::from_ref(&image))?;
        let value = self.oracle.extract(&reply, prompt::TEXT_SCHEMA)?;
        let text = string_field(&value, prompt::TEXT_KEY)?;
        info!(widget = %target.descriptor, text = %text, "generated text input");
        self.session.record_detail(
            DetailKind::GenerateText,
            &serde_json::json!({"prompt": request, "res": reply, "format_res": value}),
            Some(&image),
        )?;
        Ok(action.with_text(text))
    }

    /// Oracle description of the effect of `action`: (detailed, one sentence)
    fn describe_transition(
        &mut self,
        action: &Action,
        node: &ExploringNode,
        observed: &Observation,
    ) -> ExploreResult<(String, String)> {
        let before = match &action.target {
            Some(target) => mark_bounds(&node.screenshot, &target.bounds),
            None => node.screenshot.clone(),
        };
        let request = prompt::describe_transition(
            &action.describe(),
            action.target.is_some(),
            &node.scene.app,
            &observed.scene.app,
        );
        let images = [before, observed.screenshot.clone()];
        let reply = self.oracle.rank(&request, &images)?;
        let value = self.oracle.extract(&reply, prompt::TRANSITION_SCHEMA)?;
        let description = string_field(&value, prompt::TRANSITION_DESCRIPTION_KEY)?;
        let summary = string_field(&value, prompt::TRANSITION_SUMMARY_KEY)?;
        self.session.record_detail(
            DetailKind::ExtractTransition,
            &serde_json::json!({
                "action_id": action.action_id,
                "prompt": request,
                "res": reply,
                "format_res": value,
            }),
            Some(&concat_horizontal(&[&images[0], &images[1]])),
        )?;
        Ok((description, summary))
    }

    fn record_execution(
        &mut self,
        action: &Action,
        node: &ExploringNode,
        observed: &Observation,
    ) -> ExploreResult<()> {
        let before = mark_action(
            &node.screenshot,
            action.target.as_ref().map(|t| &t.bounds),
            action.kind.name(),
        );
        let after = mark_action(&observed.screenshot, None, "result");
        self.session.record_detail(
            DetailKind::ExecuteAction,
            &serde_json::json!({
                "action_type": action.kind.name(),
                "description": action.describe(),
            }),
            Some(&concat_horizontal(&[&before, &after])),
        )?;
        Ok(())
    }

    /// Persist a transition, add its edge and count it against the budget
    fn record_transition(
        &mut self,
        transition: Transition,
        image: &RgbImage,
        disabled: bool,
    ) -> ExploreResult<()> {
        self.session.save_transition(&transition, image)?;
        self.emit(Event::AddGraphTransition {
            transition_id: transition.transition_id.clone(),
            start_scene_id: transition.source.clone(),
            end_scene_id: transition.destination.clone(),
            level: self.level,
            reused: false,
        })?;
        if disabled {
            self.emit(Event::DisableTransition {
                transition_id: transition.transition_id.clone(),
            })?;
        }
        info!(
            transition = %transition.transition_id,
            action = %transition.action,
            from = %transition.source,
            to = %transition.destination,
            "transition recorded"
        );
        self.graph.add_edge(transition, self.level);
        self.budget.record_transition();
        Ok(())
    }

    /// Check the crash log; it is cleared only when no crash is found
    fn crashed(&mut self) -> ExploreResult<bool> {
        let log = self.device.read_crash_log()?;
        if log.contains(CRASH_MARKER) {
            return Ok(true);
        }
        self.device.clear_crash_log()?;
        Ok(false)
    }

    /// Report a crash reached by `path`, ending on `scene_id`
    fn crash_success(&mut self, scene_id: &str, path: &[Transition]) -> ExploreResult<Outcome> {
        info!(scene = scene_id, steps = path.len(), "bug reproduced, app crashed");
        self.emit(Event::TrackCrashCompletion {
            scene_id: scene_id.to_string(),
            crash_path: path.iter().map(|t| t.transition_id.clone()).collect(),
        })?;
        let artifact = self.store_artifact(scene_id, path)?;
        self.succeed(SuccessKind::Crash, vec![artifact])
    }

    /// Prune the next frontier and validate claimed completions
    fn prune_level(
        &mut self,
        next: Vec<ExploringNode>,
    ) -> ExploreResult<ControlFlow<Outcome, Vec<ExploringNode>>> {
        let candidates: Vec<Candidate<'_>> = next.iter().map(ExploringNode::candidate).collect();
        let decision = prune::prune(
            self.oracle,
            &self.goal.package,
            &self.goal.description,
            &candidates,
            self.settings.second_branch_limit,
        )?;

        self.emit(Event::FilterExploringNodes {
            llm: decision.exchange.clone(),
            total_paths: decision.total_paths(&candidates),
            achieved_paths: decision.achieved_paths(&candidates),
            removed_paths: decision.removed_paths(&candidates),
        })?;
        let removed_ids: Vec<String> = decision
            .removed
            .iter()
            .filter_map(|&i| next[i].path.last().map(|t| t.transition_id.clone()))
            .collect();
        self.emit(Event::PruneExploringTransition {
            transition_id_list: removed_ids,
        })?;

        if !decision.completed.is_empty() {
            let validation = prune::validate(
                self.oracle,
                &self.goal.package,
                &self.goal.description,
                &candidates,
                &decision.completed,
            )?;
            self.emit(Event::ValidateExploringComplete {
                llm: validation.exchange.clone(),
                achieved_paths: validation.achieved_paths(&candidates),
            })?;
            if !validation.confirmed.is_empty() {
                info!(paths = validation.confirmed.len(), "bug reproduction confirmed");
                let mut artifacts = Vec::new();
                for &i in &validation.confirmed {
                    artifacts.push(self.store_artifact(next[i].fingerprint(), &next[i].path)?);
                }
                return self.succeed(SuccessKind::GoalConfirmed, artifacts).map(ControlFlow::Break);
            }
        }

        let mut slots: Vec<Option<ExploringNode>> = next.into_iter().map(Some).collect();
        let survivors: Vec<ExploringNode> = decision
            .survivors
            .iter()
            .filter_map(|&i| slots.get_mut(i).and_then(Option::take))
            .collect();
        let keep: Vec<&str> = survivors.iter().map(ExploringNode::fingerprint).collect();
        self.collect_garbage(&keep);
        Ok(ControlFlow::Continue(survivors))
    }

    /// Checkpoint cleanup never stops the search
    fn collect_garbage(&mut self, keep: &[&str]) {
        if let Err(e) = self.policy.collect_garbage(self.store, keep) {
            warn!(error = %e, "checkpoint cleanup failed");
        }
    }

    fn store_artifact(&self, scene_id: &str, path: &[Transition]) -> ExploreResult<PathBuf> {
        Ok(artifact::store(
            &self.session,
            &self.goal.package,
            &self.goal.description,
            path,
            scene_id,
        )?)
    }

    fn succeed(&mut self, kind: SuccessKind, artifacts: Vec<PathBuf>) -> ExploreResult<Outcome> {
        self.emit(Event::ExploreSuccess {
            paths: artifacts.iter().map(|p| p.display().to_string()).collect(),
        })?;
        Ok(Outcome::Success { kind, artifacts })
    }

    fn fail(&mut self, reason: String) -> ExploreResult<Outcome> {
        error!(%reason, "failed to reproduce");
        self.emit(Event::ExploreFail {
            reason: reason.clone(),
        })?;
        Ok(Outcome::Failure { reason })
    }

    fn emit(&mut self, event: Event) -> ExploreResult<()> {
        self.events.append(event)?;
        Ok(())
    }
}

/// Condense an issue report into steps to reproduce, logged as `SummaryS2R`
pub fn summarize_issue(
    oracle: &dyn Oracle,
    events: &mut EventLog,
    issue: &IssueReport,
) -> ExploreResult<String> {
    info!(repo = %issue.repo, title = %issue.title, "summarizing steps to reproduce");
    let request = prompt::summarize_issue(&issue.repo, &issue.title, &issue.body, &issue.comments);
    let s2r = oracle.rank(&request, &[])?;
    events.append(Event::SummaryS2R {
        prompt: request,
        s2r: s2r.clone(),
    })?;
    Ok(s2r)
}
