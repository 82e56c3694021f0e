//! Repro Explorer - bug reproduction for Android apps by UI-state search.
//!
//! This crate provides:
//! - Scene sampling and fingerprinting of Android UI hierarchies
//! - Typed actions with stable identities
//! - Checkpointed breadth-first exploration with replay fallback
//! - Vision model guided action refinement, frontier pruning and validation
//! - An append-only event log and per-run result directory
//!
//! # Example
//!
//! ```rust,no_run
//! use repro_explorer::{
//!     AdbDevice, AvdCheckpoints, ChatClient, EventLog, Goal, SearchSession, Session, config,
//! };
//!
//! let cfg = config::get();
//! let mut device = AdbDevice::new(&cfg.device, cfg.explore.fingerprint);
//! let mut store = AvdCheckpoints::new(cfg.device.adb.clone());
//! let oracle = ChatClient::new(cfg.oracle.clone());
//!
//! let session = Session::new(&cfg.session.base_dir, "com.example.notes", None);
//! session.init("com.example.notes").unwrap();
//! let events = EventLog::open(&session.dir).unwrap();
//!
//! let goal = Goal::new("com.example.notes", "1. Create a note\n2. Rotate the screen");
//! let outcome = SearchSession::new(
//!     &mut device, &mut store, &oracle, session, events, goal, cfg.explore.clone(),
//! )
//! .unwrap()
//! .run()
//! .unwrap();
//! println!("{:?}", outcome);
//! ```

pub mod action;
pub mod artifact;
pub mod budget;
pub mod checkpoint;
pub mod config;
pub mod device;
pub mod events;
pub mod explore;
pub mod graph;
pub mod oracle;
pub mod prompt;
pub mod prune;
pub mod refine;
pub mod scene;
pub mod session;
pub mod transition;

// Re-export the search entry points
pub use explore::{
    ExploreError, ExploreResult, ExploringNode, Goal, IssueReport, Outcome, SearchSession, SuccessKind,
};

// Re-export the model
pub use action::{Action, ActionKind, Direction, Key, Orientation, TextInput, WidgetTarget};
pub use scene::{AppInfo, FingerprintMode, Observation, Scene};
pub use transition::Transition;

// Re-export collaborators
pub use checkpoint::{AvdCheckpoints, CheckpointError, CheckpointPolicy, CheckpointStore};
pub use device::{AdbDevice, Device, DeviceError};
pub use oracle::{ChatClient, Oracle, OracleError};

// Re-export run bookkeeping
pub use events::{Event, EventLog, EventLogError, RunState};
pub use session::Session;
