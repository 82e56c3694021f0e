//! Markdown documents describing a reproduction path.

use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::info;

use crate::session::Session;
use crate::transition::Transition;

const ARTIFACT_BASE: &str = "achieved-path";

/// Render the reproduction document for `path` ending in `final_scene`
pub fn render(package: &str, goal: &str, path: &[Transition], final_scene: &str) -> String {
    let steps = path
        .iter()
        .enumerate()
        .map(|(i, transition)| {
            let n = i + 1;
            format!(
                "### Step {n}\n\n\
- **Action:** {}\n\
- **Transition:** {}\n\n\
<img src=\"transitions/{}.png\" alt=\"step_{n}\" style=\"display: block; margin: 0 auto; height: 512px\">",
                transition.action.describe(),
                transition.description,
                transition.transition_id,
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "## Task Overview

### App Package

{package}

### Steps to Reproduce the Bug

{goal}

## Explored Path

The length of the explored path is {len}.

{steps}

## Final Scene

<img src=\"scenes/{final_scene}.png\" alt=\"final_scene\" style=\"display: block; margin: 0 auto; height: 512px\">
",
        len = path.len(),
    )
}

/// Write the next `achieved-path-NN.md` into the run directory
pub fn store(
    session: &Session,
    package: &str,
    goal: &str,
    path: &[Transition],
    final_scene: &str,
) -> io::Result<PathBuf> {
    let file = session.unique_path(ARTIFACT_BASE, "md");
    fs::write(&file, render(package, goal, path, final_scene))?;
    info!(path = %file.display(), steps = path.len(), "stored achieved path");
    Ok(file)
}
