//! Frontier pruning and goal validation between levels.

use image::RgbImage;
use serde_json::Value;
use tracing::{info, warn};

use crate::events::{OracleExchange, PathRef};
use crate::oracle::{Oracle, OracleResult, flag_field, id_list};
use crate::prompt;
use crate::transition::Transition;

const ROUND_SEPARATOR: &str = "\n\n---\n\n";

/// A frontier path as the oracle sees it
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub scene_id: &'a str,
    pub path: &'a [Transition],
    pub screenshot: &'a RgbImage,
}

impl Candidate<'_> {
    /// Reference to this path under its 1-based prompt number
    pub fn path_ref(&self, no: usize) -> PathRef {
        PathRef {
            scene_id: self.scene_id.to_string(),
            exploring_path: self.path.iter().map(|t| t.transition_id.clone()).collect(),
            no,
        }
    }
}

/// Oracle verdict over a frontier; indexes are 0-based positions
#[derive(Debug, Clone)]
pub struct PruneDecision {
    /// Paths to keep, in the oracle's order, at most `limit`
    pub survivors: Vec<usize>,
    /// Paths the oracle claims already reproduce the bug
    pub completed: Vec<usize>,
    pub removed: Vec<usize>,
    pub exchange: OracleExchange,
}

impl PruneDecision {
    pub fn total_paths(&self, candidates: &[Candidate<'_>]) -> Vec<PathRef> {
        refs(candidates, &self.survivors)
    }

    pub fn achieved_paths(&self, candidates: &[Candidate<'_>]) -> Vec<PathRef> {
        refs(candidates, &self.completed)
    }

    pub fn removed_paths(&self, candidates: &[Candidate<'_>]) -> Vec<PathRef> {
        refs(candidates, &self.removed)
    }
}

fn refs(candidates: &[Candidate<'_>], indexes: &[usize]) -> Vec<PathRef> {
    indexes
        .iter()
        .filter_map(|&i| candidates.get(i).map(|c| c.path_ref(i + 1)))
        .collect()
}

/// Valid 0-based positions from 1-based `ids`, duplicates dropped
fn positions(ids: impl IntoIterator<Item = usize>, len: usize) -> Vec<usize> {
    let mut out: Vec<usize> = Vec::new();
    for id in ids {
        match id.checked_sub(1).filter(|&i| i < len) {
            Some(i) if !out.contains(&i) => out.push(i),
            Some(_) => {}
            None => warn!(id, paths = len, "oracle named an unknown path"),
        }
    }
    out
}

/// Ask the oracle which frontier paths to keep
///
/// Survivors never exceed `limit` and are non-empty whenever `candidates`
/// is.
pub fn prune(
    oracle: &dyn Oracle,
    package: &str,
    goal: &str,
    candidates: &[Candidate<'_>],
    limit: usize,
) -> OracleResult<PruneDecision> {
    let paths: Vec<&[Transition]> = candidates.iter().map(|c| c.path).collect();
    let request = prompt::prune(package, goal, &paths, limit);
    let reply = oracle.rank(&request, &[])?;
    let value = oracle.extract(&reply, &prompt::prune_schema(limit))?;

    let potential = id_list(&value, prompt::PRUNE_POTENTIAL_KEY)?;
    let completed_ids = id_list(&value, prompt::PRUNE_COMPLETED_KEY)?;

    let completed = positions(completed_ids.iter().copied(), candidates.len());
    let mut survivors = positions(potential.into_iter().chain(completed_ids), candidates.len());
    survivors.truncate(limit.max(1));
    if survivors.is_empty() && !candidates.is_empty() {
        warn!("oracle kept no path, keeping the first one");
        survivors.push(0);
    }
    let removed: Vec<usize> = (0..candidates.len())
        .filter(|i| !survivors.contains(i))
        .collect();

    info!(
        paths = candidates.len(),
        kept = survivors.len(),
        completed = completed.len(),
        removed = removed.len(),
        "pruned frontier"
    );
    Ok(PruneDecision {
        survivors,
        completed,
        removed,
        exchange: OracleExchange {
            prompt: request,
            res: reply,
            format_res: value,
        },
    })
}

/// Result of re-checking claimed completions one path at a time
#[derive(Debug, Clone)]
pub struct Validation {
    /// Confirmed 0-based positions
    pub confirmed: Vec<usize>,
    pub exchange: OracleExchange,
}

impl Validation {
    pub fn achieved_paths(&self, candidates: &[Candidate<'_>]) -> Vec<PathRef> {
        refs(candidates, &self.confirmed)
    }
}

/// Image-grounded confirmation of each path in `claimed`
pub fn validate(
    oracle: &dyn Oracle,
    package: &str,
    goal: &str,
    candidates: &[Candidate<'_>],
    claimed: &[usize],
) -> OracleResult<Validation> {
    let mut confirmed = Vec::new();
    let mut prompts = Vec::new();
    let mut replies = Vec::new();
    let mut formatted = Vec::new();

    for &i in claimed {
        let Some(candidate) = candidates.get(i) else {
            continue;
        };
        let request = prompt::validate(package, goal, candidate.path);
        let reply = oracle.rank(&request, std::slice::from_ref(candidate.screenshot))?;
        let value = oracle.extract(&reply, prompt::VALIDATE_SCHEMA)?;
        if flag_field(&value, prompt::VALIDATE_KEY)? {
            info!(path = i + 1, scene = candidate.scene_id, "completion confirmed");
            confirmed.push(i);
        } else {
            info!(path = i + 1, scene = candidate.scene_id, "completion rejected");
        }
        prompts.push(request);
        replies.push(reply);
        formatted.push(value);
    }

    Ok(Validation {
        confirmed,
        exchange: OracleExchange {
            prompt: prompts.join(ROUND_SEPARATOR),
            res: replies.join(ROUND_SEPARATOR),
            format_res: Value::Array(formatted),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionKind, Key};
    use crate::scene::AppInfo;
    use image::Rgb;
    use serde_json::json;
    use std::cell::RefCell;

    struct CannedOracle {
        replies: RefCell<Vec<Value>>,
        images: RefCell<Vec<usize>>,
    }

    impl CannedOracle {
        fn new(replies: Vec<Value>) -> Self {
            Self {
                replies: RefCell::new(replies),
                images: RefCell::new(Vec::new()),
            }
        }
    }

    impl Oracle for CannedOracle {
        fn rank(&self, _prompt: &str, images: &[RgbImage]) -> OracleResult<String> {
            self.images.borrow_mut().push(images.len());
            Ok(String::new())
        }

        fn extract(&self, _text: &str, _schema: &str) -> OracleResult<Value> {
            Ok(self.replies.borrow_mut().remove(0))
        }
    }

    fn paths(n: usize) -> Vec<(String, Vec<Transition>)> {
        (0..n)
            .map(|i| {
                let scene = format!("s{}", i);
                let t = Transition::new(
                    Action::global("root", ActionKind::Press(Key::Back)),
                    "root",
                    &scene,
                    AppInfo::default(),
                    AppInfo::default(),
                    "d",
                    "s",
                );
                (scene, vec![t])
            })
            .collect()
    }

    fn candidates<'a>(paths: &'a [(String, Vec<Transition>)], shot: &'a RgbImage) -> Vec<Candidate<'a>> {
        paths
            .iter()
            .map(|(scene, path)| Candidate {
                scene_id: scene,
                path,
                screenshot: shot,
            })
            .collect()
    }

    #[test]
    fn test_prune_unions_and_truncates() {
        let shot = RgbImage::from_pixel(2, 2, Rgb([0, 0, 0]));
        let paths = paths(5);
        let c = candidates(&paths, &shot);
        let oracle = CannedOracle::new(vec![json!({
            "path_id_array_with_potential": [4, 2, 4, 9],
            "path_id_array_completed": [5, 0],
        })]);
        let decision = prune(&oracle, "p", "g", &c, 2).unwrap();
        assert_eq!(decision.survivors, vec![3, 1]);
        assert_eq!(decision.completed, vec![4]);
        assert_eq!(decision.removed, vec![0, 2, 4]);
        assert_eq!(decision.total_paths(&c)[0].no, 4);
        assert_eq!(decision.removed_paths(&c).len(), 3);
    }

    #[test]
    fn test_prune_never_empties_frontier() {
        let shot = RgbImage::from_pixel(2, 2, Rgb([0, 0, 0]));
        let paths = paths(3);
        let c = candidates(&paths, &shot);
        let oracle = CannedOracle::new(vec![json!({
            "path_id_array_with_potential": [],
            "path_id_array_completed": [],
        })]);
        let decision = prune(&oracle, "p", "g", &c, 3).unwrap();
        assert_eq!(decision.survivors, vec![0]);
        assert_eq!(decision.removed, vec![1, 2]);
    }

    #[test]
    fn test_validate_checks_each_claim_with_its_image() {
        let shot = RgbImage::from_pixel(2, 2, Rgb([0, 0, 0]));
        let paths = paths(3);
        let c = candidates(&paths, &shot);
        let oracle = CannedOracle::new(vec![
            json!({"task_achieved": false}),
            json!({"task_achieved": "true"}),
        ]);
        let validation = validate(&oracle, "p", "g", &c, &[0, 2]).unwrap();
        assert_eq!(validation.confirmed, vec![2]);
        assert_eq!(*oracle.images.borrow(), vec![1, 1]);
        assert_eq!(validation.achieved_paths(&c)[0].no, 3);
        assert_eq!(validation.exchange.format_res.as_array().unwrap().len(), 2);
    }
}
