//! Append-only event log of a run.
//!
//! Two files live in the result directory:
//! - `data`: one JSON object per line, `{id, ts, type, ...payload}`
//! - `state`: `"{ts} {state}"`, replaced atomically after every append
//!
//! Readers (the visualization server, the `events` subcommand) tail `data`
//! and poll `state`; neither file is ever rewritten in place.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

pub const DATA_FILE: &str = "data";
pub const STATE_FILE: &str = "state";
const STATE_TMP_FILE: &str = "state.tmp";

/// Result type for event log operations
pub type EventLogResult<T> = Result<T, EventLogError>;

#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("malformed state file: {0:?}")]
    MalformedState(String),
}

/// Overall state of a run as seen by readers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Exploring,
    Success,
    Fail,
    Error,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Exploring => "exploring",
            RunState::Success => "success",
            RunState::Fail => "fail",
            RunState::Error => "error",
        })
    }
}

impl FromStr for RunState {
    type Err = EventLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exploring" => Ok(RunState::Exploring),
            "success" => Ok(RunState::Success),
            "fail" => Ok(RunState::Fail),
            "error" => Ok(RunState::Error),
            other => Err(EventLogError::MalformedState(other.to_string())),
        }
    }
}

/// Prompt, raw reply and structured reply of one oracle exchange
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OracleExchange {
    pub prompt: String,
    pub res: String,
    pub format_res: serde_json::Value,
}

/// A frontier path referenced by its 1-based position in a prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRef {
    pub scene_id: String,
    pub exploring_path: Vec<String>,
    pub no: usize,
}

/// Event payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    AddGraphNode {
        scene_id: String,
        total_action_num: usize,
    },
    AddGraphTransition {
        transition_id: String,
        start_scene_id: String,
        end_scene_id: String,
        level: u32,
        reused: bool,
    },
    UpdateCurrentScene {
        scene_id: String,
    },
    DisableTransition {
        transition_id: String,
    },
    PruneExploringTransition {
        transition_id_list: Vec<String>,
    },
    FilterExploringNodes {
        llm: OracleExchange,
        total_paths: Vec<PathRef>,
        achieved_paths: Vec<PathRef>,
        removed_paths: Vec<PathRef>,
    },
    ValidateExploringComplete {
        llm: OracleExchange,
        achieved_paths: Vec<PathRef>,
    },
    TrackCrashCompletion {
        scene_id: String,
        crash_path: Vec<String>,
    },
    RefineActionWidgets {
        llm: OracleExchange,
        scene_id: String,
        before_image_name: String,
        after_image_name: String,
        predict_flag: bool,
    },
    SummaryS2R {
        prompt: String,
        s2r: String,
    },
    ExploreSuccess {
        paths: Vec<String>,
    },
    ExploreFail {
        reason: String,
    },
    ExploreError {
        reason: String,
    },
}

impl Event {
    /// Run state implied by recording this event
    pub fn run_state(&self) -> RunState {
        match self {
            Event::ExploreSuccess { .. } => RunState::Success,
            Event::ExploreFail { .. } => RunState::Fail,
            Event::ExploreError { .. } => RunState::Error,
            _ => RunState::Exploring,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Event::AddGraphNode { .. } => "AddGraphNode",
            Event::AddGraphTransition { .. } => "AddGraphTransition",
            Event::UpdateCurrentScene { .. } => "UpdateCurrentScene",
            Event::DisableTransition { .. } => "DisableTransition",
            Event::PruneExploringTransition { .. } => "PruneExploringTransition",
            Event::FilterExploringNodes { .. } => "FilterExploringNodes",
            Event::ValidateExploringComplete { .. } => "ValidateExploringComplete",
            Event::TrackCrashCompletion { .. } => "TrackCrashCompletion",
            Event::RefineActionWidgets { .. } => "RefineActionWidgets",
            Event::SummaryS2R { .. } => "SummaryS2R",
            Event::ExploreSuccess { .. } => "ExploreSuccess",
            Event::ExploreFail { .. } => "ExploreFail",
            Event::ExploreError { .. } => "ExploreError",
        }
    }
}

/// One line of the `data` file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: u64,
    pub ts: i64,
    #[serde(flatten)]
    pub event: Event,
}

/// Writer side of the event log
#[derive(Debug)]
pub struct EventLog {
    dir: PathBuf,
    file: File,
    next_id: u64,
    state: RunState,
}

impl EventLog {
    /// Open (or create) the log in `dir` and mark the run as exploring
    ///
    /// Ids continue after any records already present.
    pub fn open(dir: impl AsRef<Path>) -> EventLogResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let data_path = dir.join(DATA_FILE);
        let next_id = if data_path.exists() {
            BufReader::new(File::open(&data_path)?)
                .lines()
                .map_while(Result::ok)
                .filter(|l| !l.trim().is_empty())
                .count() as u64
        } else {
            0
        };
        let file = OpenOptions::new().create(true).append(true).open(&data_path)?;
        write_state(&dir, Utc::now().timestamp(), RunState::Exploring)?;
        Ok(Self {
            dir,
            file,
            next_id,
            state: RunState::Exploring,
        })
    }

    /// Append an event and update the state file; returns the record id
    pub fn append(&mut self, event: Event) -> EventLogResult<u64> {
        let ts = Utc::now().timestamp();
        let state = event.run_state();
        let type_name = event.type_name();
        let record = EventRecord {
            id: self.next_id,
            ts,
            event,
        };
        let line = serde_json::to_string(&record)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        self.next_id += 1;
        self.state = state;
        write_state(&self.dir, ts, state)?;
        debug!(id = record.id, event = type_name, "event recorded");
        Ok(record.id)
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Number of records written so far
    pub fn len(&self) -> u64 {
        self.next_id
    }

    pub fn is_empty(&self) -> bool {
        self.next_id == 0
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Replace the state file via tmp + fsync + rename
fn write_state(dir: &Path, ts: i64, state: RunState) -> EventLogResult<()> {
    let tmp_path = dir.join(STATE_TMP_FILE);
    {
        let mut tmp = File::create(&tmp_path)?;
        write!(tmp, "{} {}", ts, state)?;
        tmp.flush()?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, dir.join(STATE_FILE))?;
    Ok(())
}

/// Read `(ts, state)` from the state file in `dir`
pub fn read_state(dir: impl AsRef<Path>) -> EventLogResult<(i64, RunState)> {
    let raw = fs::read_to_string(dir.as_ref().join(STATE_FILE))?;
    let (ts, state) = raw
        .trim()
        .split_once(' ')
        .ok_or_else(|| EventLogError::MalformedState(raw.clone()))?;
    let ts = ts
        .parse()
        .map_err(|_| EventLogError::MalformedState(raw.clone()))?;
    Ok((ts, state.parse()?))
}

/// Records with `start <= id < end` as JSON objects
///
/// With `join`, `AddGraphNode` records are merged with `scenes/<id>.json`
/// and `AddGraphTransition` records with `transitions/<id>.json` when those
/// documents exist. Record keys `id`, `ts` and `type` are never overwritten.
pub fn read_range(
    dir: impl AsRef<Path>,
    start: u64,
    end: Option<u64>,
    join: bool,
) -> EventLogResult<Vec<serde_json::Value>> {
    let dir = dir.as_ref();
    let reader = BufReader::new(File::open(dir.join(DATA_FILE))?);
    let mut out = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut record: serde_json::Value = serde_json::from_str(&line)?;
        let id = record.get("id").and_then(|v| v.as_u64()).unwrap_or(0);
        if end.is_some_and(|end| id >= end) {
            break;
        }
        if id < start {
            continue;
        }
        if join {
            join_document(dir, &mut record);
        }
        out.push(record);
    }
    Ok(out)
}

fn join_document(dir: &Path, record: &mut serde_json::Value) {
    let lookup = match record.get("type").and_then(|v| v.as_str()) {
        Some("AddGraphNode") => record
            .get("scene_id")
            .and_then(|v| v.as_str())
            .map(|id| dir.join("scenes").join(format!("{}.json", id))),
        Some("AddGraphTransition") => record
            .get("transition_id")
            .and_then(|v| v.as_str())
            .map(|id| dir.join("transitions").join(format!("{}.json", id))),
        _ => None,
    };
    let Some(path) = lookup else {
        return;
    };

    let document = match fs::read_to_string(&path)
        .map_err(EventLogError::from)
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).map_err(EventLogError::from))
    {
        Ok(doc) => doc,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot join event document");
            return;
        }
    };

    if let (Some(target), serde_json::Value::Object(doc)) = (record.as_object_mut(), document) {
        for (key, value) in doc {
            if matches!(key.as_str(), "id" | "ts" | "type") {
                continue;
            }
            target.insert(key, value);
        }
    }
}
