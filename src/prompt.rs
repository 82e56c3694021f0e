//! Prompt text for every oracle request.
//!
//! Each request pairs a free-text prompt (answered by `Oracle::rank`) with a
//! TypeScript-style schema (consumed by `Oracle::extract`). Paths are shown
//! with the last three steps in full and older steps as one-sentence
//! summaries.

use crate::action::WidgetTarget;
use crate::scene::AppInfo;
use crate::transition::Transition;

/// Steps from the end of a path that are shown with the full description
pub const FULL_DETAIL_STEPS: usize = 3;

const SECTION_SEPARATOR: &str = "\n\n---\n\n";

const SHARED_GUIDANCE: &str = "\
1. App installation and first app launch are not reflected in the Exploration Path descriptions.
2. Some initialization steps are necessary before reproducing the bug, such as granting permissions, closing update dialogs, progressing through or skipping onboarding screens, or consenting to data collection prompts.
3. After a fresh installation, the app usually contains no data, so creating the necessary data specified in the Steps to Reproduce the Bug is essential.";

pub const REFINE_SCHEMA: &str = "\
{
    most_promising_widget_id_array: number[]; // An array of number containing the 'widget IDs' in **Summary of Most Promising Widgets**.
    most_promising_operation_array: string[]; // An array of string containing the 'global operations' in **Summary of Most Promising Operations**.
}";

pub const REFINE_WIDGET_KEY: &str = "most_promising_widget_id_array";
pub const REFINE_OPERATION_KEY: &str = "most_promising_operation_array";

pub const PRUNE_POTENTIAL_KEY: &str = "path_id_array_with_potential";
pub const PRUNE_COMPLETED_KEY: &str = "path_id_array_completed";

pub const VALIDATE_SCHEMA: &str = "\
{
    task_achieved: boolean; // Whether the exploring path has definitively completed the Steps to Reproduce the Bug.
}";

pub const VALIDATE_KEY: &str = "task_achieved";

pub const TEXT_SCHEMA: &str = "\
{
    input: string; // the suitable input for this EditText widget
}";

pub const TEXT_KEY: &str = "input";

pub const TRANSITION_SCHEMA: &str = "\
{
    detailed_description: string; // A detailed description of what the action does and the resulting changes in the app's UI and state
    one_sentence_summary: string; // A concise one-sentence summary that captures the primary effect or purpose of the action
}";

pub const TRANSITION_DESCRIPTION_KEY: &str = "detailed_description";
pub const TRANSITION_SUMMARY_KEY: &str = "one_sentence_summary";

/// Request to restate `text` as JSON matching `schema`
pub fn extraction(text: &str, schema: &str) -> String {
    format!(
        "{text}\n\n---\n\n\
Given the LLM response above, please extract the relevant information and present it in the following 'TypeScript definition' format:\n\
{schema}\n\
Please review the raw content thoroughly and provide a comprehensive answer.\n\
Only output the JSON object that exactly matches the specified 'TypeScript definition' description."
    )
}

/// One `- ` line per step of `path`
pub fn path_lines(path: &[Transition]) -> String {
    let len = path.len();
    path.iter()
        .enumerate()
        .map(|(i, transition)| {
            let one_sentence = len - i > FULL_DETAIL_STEPS;
            format!("- {}", transition.prompt_text(one_sentence))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn exploration_status(path: &[Transition]) -> String {
    if path.is_empty() {
        return "- We are focusing on the first step of exploring interactions with the specific interactive widgets listed below, all of which are marked in red box in the provided image along with their respective IDs.".to_string();
    }
    format!(
        "- We have previously assessed {} steps to advance towards the completion of Steps to Reproduce the Bug, outlined as follows:\n\
{}\n\
- We are preparing to analyze the next steps for interaction with specific interactive widgets listed below, all of which are marked in red box in the provided image along with their respective IDs.",
        path.len(),
        path_lines(path)
    )
}

/// Ranking request for one batch of widgets
///
/// `widgets` are XML subtrees, numbered from 1 in the order given; the same
/// numbers are drawn on the attached image.
pub fn refine(package: &str, goal: &str, path: &[Transition], widgets: &[String], limit: usize) -> String {
    let details = widgets
        .iter()
        .enumerate()
        .map(|(i, xml)| format!("ID: {}\n{}", i + 1, xml))
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR);
    format!(
        "We are exploring the correct paths to reproduce the following bug based on the given Steps to Reproduce in the Android app:

Package Name: {package}
Steps to Reproduce the Bug:
{goal}

Current Exploration Status:
{status}

Details of Interactive Widgets:
{details}

Extra Guidance:
{SHARED_GUIDANCE}
4. If completing the final reproduction step doesn't trigger the bug behavior, a press back operation might be required.

---

Request:
Carry out the following precise steps:
1. For each interactive widget detailed in the 'Details of Interactive Widgets' section, assess whether interaction with this widget could reasonably serve as a next step toward advancing progress in completing the given Steps to Reproduce the Bug.
2. Evaluate the likelihood that the following global operations could plausibly serve as next actions that help move the app state closer to bug reproduction, given the current screen state (as shown in the provided image).
    - global operations: press back, press home, press enter, press delete, swipe up, swipe down, swipe left, swipe right, rotate landscape, rotate portrait
3. Summarize the final results:
    - Summarize the widget IDs from step 1 that are likely to contribute to complete the Steps to Reproduce the Bug, titled **Summary of Most Promising Widgets**.
    - Summarize the global operations from step 2 that are likely to contribute to completing the Steps to Reproduce the Bug, titled **Summary of Most Promising Operations**.
    - If there are more than {limit} such widgets or operations, include only the top {limit} most promising ones.
    - If there is no such widget or operation, then provide at least one widget or operation that appears most likely to contribute, rather than excluding all of them.",
        status = exploration_status(path),
    )
}

/// Pruning request over every frontier path, numbered from 1
pub fn prune(package: &str, goal: &str, paths: &[&[Transition]], limit: usize) -> String {
    let listed = paths
        .iter()
        .enumerate()
        .map(|(i, path)| {
            format!(
                "**Path ID:** {id}\n**Path detail of ID {id}**:\n{}",
                path_lines(path),
                id = i + 1
            )
        })
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR);
    format!(
        "We are exploring the correct paths to reproduce the following bug by given Steps to Reproduce in the Android app:

Package Name: {package}
Steps to Reproduce the Bug:
{goal}

Current Status:
- There are {count} exploration paths in progress, each with a unique ID.

Exploration Paths with IDs:

{listed}

---

Extra Guidance:
{SHARED_GUIDANCE}
4. If certain exploration paths fall into a loop, such paths are not worth continuing to explore.

Request:
1. For each exploration path, evaluate its progress:
    - Determine whether the path should be continued, based on its potential to successfully complete the Steps to Reproduce the Bug.
    - Identify whether the path has already successfully completed the Steps to Reproduce the Bug.
2. After evaluating all exploration paths, summarize the results:
    - Provide two separate lists of path IDs:
        1. One list for paths that are worth continuing due to promising potential.
            - If multiple paths exhibit identical behavior or outcomes, retain only the one that appears most promising to complete the reproduction steps.
            - If there are more than {limit} such paths, include only the top {limit} most promising ones.
            - If there are {limit} or fewer such paths, include all of them.
            - If no paths have successfully completed the Steps to Reproduce the Bug **and** you also determine that no paths are worth continuing, then provide at least one path that appears most likely to complete the reproduction steps, rather than excluding all paths.
        2. Another list for paths that have already successfully completed the Steps to Reproduce the Bug.",
        count = paths.len(),
    )
}

pub fn prune_schema(limit: usize) -> String {
    format!(
        "{{
    {PRUNE_POTENTIAL_KEY}: number[]; // An array of path IDs with promising potential to complete the Steps to Reproduce the Bug. If there are more than {limit}, only the top {limit} most promising ones are included.
    {PRUNE_COMPLETED_KEY}: number[]; // An array of number containing the exploration path IDs that have successfully completed the Steps to Reproduce the Bug.
}}"
    )
}

/// Image-grounded completion check for a single path
pub fn validate(package: &str, goal: &str, path: &[Transition]) -> String {
    format!(
        "You are required to determine if the provided exploring path within the {package} Android app has definitively completed the Steps to Reproduce the Bug.

Steps to Reproduce the Bug:
{goal}

Exploring Path:
{lines}

Current App UI State: The attached image represents the visual state reached after executing the exploring path.

Instructions:
- Carefully analyze the exploring path steps and the current UI state shown in the image.
- Compare the UI state and any observed on-screen feedback, indicators, or confirmation messages with the explicit criteria defined by the Steps to Reproduce the Bug.
- Confirm the completion of the Steps to Reproduce the Bug only if all conditions in the Steps to Reproduce the Bug have been satisfied based on the sequence of actions in the exploring path and visible evidence in the image.",
        lines = path_lines(path),
    )
}

/// `<EditText .../>` block with whatever identifying attributes `target` has
fn edit_text_details(target: &WidgetTarget) -> Option<String> {
    let attributes: String = [
        ("resource-id", &target.resource_id),
        ("hint", &target.hint),
        ("old-text", &target.text),
    ]
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .map(|(name, value)| format!("\n\t{}='{}'", name, value))
    .collect();
    if attributes.is_empty() {
        None
    } else {
        Some(format!("EditText widget:\n<EditText{}\n/>", attributes))
    }
}

/// Request for the text to type into `target`
pub fn generate_text(package: &str, goal: &str, path: &[Transition], target: &WidgetTarget) -> String {
    let details = edit_text_details(target)
        .map(|d| format!("- {}\n", d))
        .unwrap_or_default();
    format!(
        "We are exploring the correct path to reproduce the following bug based on the given Steps to Reproduce in the Android app:
- Package Name: {package}
- Steps to Reproduce the Bug:
{goal}

Current Progress:
- Exploration Status: {status}

Next Objective:
- Our immediate goal is to generate an appropriate input for an EditText widget to advance to the next step in the bug reproduction process.

Additional Information:
- An image is provided that shows the app screen, with the target EditText widget clearly highlighted in a red box.
{details}
Request:
- Please provide a suitable input value for the highlighted EditText widget that will help bring the app state closer to successfully reproducing the reported bug.",
        status = exploration_status(path),
    )
}

/// Request to describe the effect of `action` between two screenshots
pub fn describe_transition(action: &str, has_target: bool, before: &AppInfo, after: &AppInfo) -> String {
    let highlight = if has_target {
        " and key interactive element highlighted in red box"
    } else {
        ""
    };
    format!(
        "Evaluate and analyze the UI transitions and functional changes in Android applications after specific user actions.

## Context
- Action: {action}
- Initial State:
  - App: {before_package}
  - Activity: {before_activity}
  - Image: First image shows the state of the screen before the action was performed.
- Final State:
  - App: {after_package}
  - Activity: {after_activity}
  - Image: Second image shows the state of the screen after the action was performed.

## Workflows
- Goal: Evaluate the transition caused by the action on the Android app based on the context.
- Steps:
    1. Review the initial state of the app before the action, noting the layout{highlight}.
    2. Analyze the transition state of the app after the action has been executed, identifying any changes or effects.
    3. Compare both states to identify and describe all observable UI and state changes resulting from the action.
- Expected Result:
    1. A detailed description of what the action does and the resulting changes in the app's UI and state, including:
        - Widget additions or removals
        - Visibility updates
        - Content modifications
        - Layout shifts
        - Screen navigation or App/Activity switch
    2. A concise one-sentence summary that captures the primary effect or purpose of the action.",
        before_package = before.package,
        before_activity = before.activity,
        after_package = after.package,
        after_activity = after.activity,
    )
}

/// Request to turn an issue report into reproduction steps
pub fn summarize_issue(repo: &str, title: &str, body: &str, comments: &[String]) -> String {
    let comments: String = comments
        .iter()
        .enumerate()
        .map(|(i, comment)| format!("=======Issue comment {}=======\n{}\n", i + 1, comment))
        .collect();
    format!(
        "=======Issue title=======
{repo} - {title}
=======Issue body=======
{body}
{comments}
---

Analyze the provided GitHub issue content, which includes the repository name, issue title, issue body, and any related comments. Based on this information, extract a clear, step-by-step workflow that an LLM agent should follow to manually reproduce the reported bug in the specified Android app. For each step, detail the exact user actions and specify any input values or parameters mentioned in the issue.
Present your findings as a concise, well-structured ordered list of steps that accurately reflect the bug reproduction process, using only information from the provided issue content. Avoid adding assumptions or additional details beyond what is documented.
Finally, summarize the specific and observable error in the app's user interface (such as a crash, freeze, or missing UI element) that serves as clear evidence the bug has been successfully reproduced."
    )
}
