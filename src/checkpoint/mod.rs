//! Device checkpoints and the policy for using them.
//!
//! A checkpoint store can only save and restore whole device states by key.
//! `CheckpointPolicy` layers the search's rules on top:
//! - restores are validated and retried, then fall back to replaying the
//!   node's path from the `empty` baseline
//! - garbage collection keeps retained fingerprints and the baselines

pub mod avd;

pub use avd::AvdCheckpoints;

use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::device::{Device, DeviceError};
use crate::scene::canvas::is_near_uniform;
use crate::transition::Transition;

/// Checkpoint created when the emulator first boots
pub const DEFAULT_BOOT: &str = "default_boot";

/// Checkpoint with the target app installed but never launched
pub const EMPTY: &str = "empty";

/// Checkpoints garbage collection never deletes
pub const BASELINES: [&str; 2] = [DEFAULT_BOOT, EMPTY];

pub const DEFAULT_LOAD_RETRIES: u32 = 2;

/// Pixel grid step of the post-load validity check
const VALIDITY_GRID_STEP: u32 = 50;

/// Max channel spread for a frame to count as blank
const VALIDITY_TOLERANCE: u8 = 8;

/// Result type for checkpoint operations
pub type CheckpointResult<T> = Result<T, CheckpointError>;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("unable to save checkpoint {key}: {message}")]
    Save { key: String, message: String },

    #[error("unable to load checkpoint {key}: {message}")]
    Load { key: String, message: String },

    #[error("unable to delete checkpoint {key}: {message}")]
    Delete { key: String, message: String },

    #[error("unable to list checkpoints: {0}")]
    List(String),

    #[error("replay from empty failed: {0}")]
    Replay(String),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}

/// Save/restore of whole device states by key
pub trait CheckpointStore {
    fn save(&mut self, key: &str) -> CheckpointResult<()>;

    /// Restore `key`; fails with `CheckpointError::Load`
    fn load(&mut self, key: &str) -> CheckpointResult<()>;

    fn delete(&mut self, key: &str) -> CheckpointResult<()>;

    fn list(&mut self) -> CheckpointResult<Vec<String>>;
}

/// How a node's device state was restored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restore {
    Loaded,
    Replayed,
}

/// Where the `empty` baseline came from at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Baseline {
    Loaded,
    Created,
}

/// Retry, validation and replay rules for checkpoints
#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    /// Total load attempts before replaying
    pub retries: u32,
    /// Wait after a load before validating the screen
    pub settle: Duration,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_LOAD_RETRIES,
            settle: Duration::from_secs(3),
        }
    }
}

impl CheckpointPolicy {
    pub fn new(retries: u32, settle: Duration) -> Self {
        Self {
            retries: retries.max(1),
            settle,
        }
    }

    pub fn save(&self, store: &mut dyn CheckpointStore, key: &str) -> CheckpointResult<()> {
        store.save(key)?;
        info!(checkpoint = key, "checkpoint saved");
        Ok(())
    }

    /// Load `key` and reject blank frames, retrying up to `retries` times
    pub fn load(
        &self,
        store: &mut dyn CheckpointStore,
        device: &mut dyn Device,
        key: &str,
    ) -> CheckpointResult<()> {
        let mut errors = Vec::new();
        for attempt in 1..=self.retries {
            match self.load_once(store, device, key) {
                Ok(()) => {
                    debug!(checkpoint = key, attempt, "checkpoint loaded");
                    return Ok(());
                }
                Err(e) => {
                    warn!(checkpoint = key, attempt, retries = self.retries, error = %e, "checkpoint load failed");
                    errors.push(e.to_string());
                }
            }
        }
        Err(CheckpointError::Load {
            key: key.to_string(),
            message: format!("{} attempts: {}", self.retries, errors.join("; ")),
        })
    }

    fn load_once(
        &self,
        store: &mut dyn CheckpointStore,
        device: &mut dyn Device,
        key: &str,
    ) -> CheckpointResult<()> {
        store.load(key)?;
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
        let frame = device.screenshot()?;
        if is_near_uniform(&frame, VALIDITY_GRID_STEP, VALIDITY_TOLERANCE) {
            return Err(CheckpointError::Load {
                key: key.to_string(),
                message: "blank screen after load".to_string(),
            });
        }
        Ok(())
    }

    /// Load the `empty` baseline, or build it with `prepare` and save it
    ///
    /// `prepare` runs only when the baseline is missing and should leave the
    /// app installed with its data wiped.
    pub fn ensure_baseline<F>(&self, store: &mut dyn CheckpointStore, prepare: F) -> CheckpointResult<Baseline>
    where
        F: FnOnce() -> Result<(), DeviceError>,
    {
        match store.load(EMPTY) {
            Ok(()) => {
                info!(checkpoint = EMPTY, "baseline loaded");
                Ok(Baseline::Loaded)
            }
            Err(e) => {
                warn!(checkpoint = EMPTY, error = %e, "baseline missing, creating it");
                prepare()?;
                self.save(store, EMPTY)?;
                Ok(Baseline::Created)
            }
        }
    }

    /// Bring the device to the state at the end of `path`
    ///
    /// Tries the checkpoint `key` first, then replays `path` from the
    /// `empty` baseline.
    pub fn restore(
        &self,
        store: &mut dyn CheckpointStore,
        device: &mut dyn Device,
        key: &str,
        package: &str,
        path: &[Transition],
    ) -> CheckpointResult<Restore> {
        match self.load(store, device, key) {
            Ok(()) => Ok(Restore::Loaded),
            Err(e) => {
                warn!(checkpoint = key, error = %e, "falling back to replay from empty");
                self.replay_from_empty(store, device, package, path)?;
                Ok(Restore::Replayed)
            }
        }
    }

    /// Reset to `empty`, relaunch `package` and re-execute `path`
    pub fn replay_from_empty(
        &self,
        store: &mut dyn CheckpointStore,
        device: &mut dyn Device,
        package: &str,
        path: &[Transition],
    ) -> CheckpointResult<()> {
        store
            .load(EMPTY)
            .map_err(|e| CheckpointError::Replay(e.to_string()))?;
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
        device
            .launch_app(package)
            .map_err(|e| CheckpointError::Replay(format!("launch {}: {}", package, e)))?;
        for (i, transition) in path.iter().enumerate() {
            device.execute(&transition.action).map_err(|e| {
                CheckpointError::Replay(format!("step {} ({}): {}", i + 1, transition.action, e))
            })?;
        }
        info!(steps = path.len(), "replayed path from empty");
        Ok(())
    }

    /// Delete every checkpoint except `keep` and the baselines
    ///
    /// Individual delete failures are logged and skipped. Returns the number
    /// of checkpoints deleted.
    pub fn collect_garbage(&self, store: &mut dyn CheckpointStore, keep: &[&str]) -> CheckpointResult<usize> {
        let mut deleted = 0;
        for key in store.list()? {
            if BASELINES.contains(&key.as_str()) || keep.contains(&key.as_str()) {
                continue;
            }
            match store.delete(&key) {
                Ok(()) => deleted += 1,
                Err(e) => warn!(checkpoint = %key, error = %e, "checkpoint delete failed"),
            }
        }
        info!(deleted, kept = keep.len(), "checkpoints collected");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::device::DeviceResult;
    use crate::scene::Observation;
    use image::{Rgb, RgbImage};
    use std::collections::BTreeSet;

    #[derive(Default)]
    struct MemoryStore {
        keys: BTreeSet<String>,
        failing_loads: u32,
        loads: Vec<String>,
        /// Loading a key that was never saved fails
        strict: bool,
    }

    impl CheckpointStore for MemoryStore {
        fn save(&mut self, key: &str) -> CheckpointResult<()> {
            self.keys.insert(key.to_string());
            Ok(())
        }

        fn load(&mut self, key: &str) -> CheckpointResult<()> {
            self.loads.push(key.to_string());
            if self.strict && !self.keys.contains(key) {
                return Err(CheckpointError::Load {
                    key: key.to_string(),
                    message: "no such snapshot".to_string(),
                });
            }
            if self.failing_loads > 0 && key != EMPTY {
                self.failing_loads -= 1;
                return Err(CheckpointError::Load {
                    key: key.to_string(),
                    message: "emulator busy".to_string(),
                });
            }
            Ok(())
        }

        fn delete(&mut self, key: &str) -> CheckpointResult<()> {
            self.keys.remove(key);
            Ok(())
        }

        fn list(&mut self) -> CheckpointResult<Vec<String>> {
            Ok(self.keys.iter().cloned().collect())
        }
    }

    struct FrameDevice {
        frame: RgbImage,
        launched: Vec<String>,
    }

    impl FrameDevice {
        fn busy() -> Self {
            let mut frame = RgbImage::from_pixel(200, 200, Rgb([0, 0, 0]));
            frame.put_pixel(100, 100, Rgb([255, 255, 255]));
            Self {
                frame,
                launched: Vec::new(),
            }
        }
    }

    impl Device for FrameDevice {
        fn sample(&mut self) -> DeviceResult<Observation> {
            Err(DeviceError::ActionExecution("not sampled in these tests".to_string()))
        }

        fn screenshot(&mut self) -> DeviceResult<RgbImage> {
            Ok(self.frame.clone())
        }

        fn execute(&mut self, _action: &Action) -> DeviceResult<()> {
            Ok(())
        }

        fn read_crash_log(&mut self) -> DeviceResult<String> {
            Ok(String::new())
        }

        fn clear_crash_log(&mut self) -> DeviceResult<()> {
            Ok(())
        }

        fn launch_app(&mut self, package: &str) -> DeviceResult<()> {
            self.launched.push(package.to_string());
            Ok(())
        }
    }

    fn policy() -> CheckpointPolicy {
        CheckpointPolicy::new(DEFAULT_LOAD_RETRIES, Duration::ZERO)
    }

    #[test]
    fn test_load_retries_then_succeeds() {
        let mut store = MemoryStore {
            failing_loads: 1,
            ..Default::default()
        };
        let mut device = FrameDevice::busy();
        assert_eq!(
            policy().restore(&mut store, &mut device, "s1", "com.example", &[]).unwrap(),
            Restore::Loaded
        );
        assert_eq!(store.loads, vec!["s1", "s1"]);
    }

    #[test]
    fn test_replay_after_exhausted_retries() {
        let mut store = MemoryStore {
            failing_loads: 2,
            ..Default::default()
        };
        let mut device = FrameDevice::busy();
        assert_eq!(
            policy().restore(&mut store, &mut device, "s1", "com.example", &[]).unwrap(),
            Restore::Replayed
        );
        assert_eq!(store.loads, vec!["s1", "s1", EMPTY]);
        assert_eq!(device.launched, vec!["com.example"]);
    }

    #[test]
    fn test_blank_frame_rejected() {
        let mut store = MemoryStore::default();
        let mut device = FrameDevice {
            frame: RgbImage::from_pixel(200, 200, Rgb([0, 0, 0])),
            launched: Vec::new(),
        };
        let err = policy().load(&mut store, &mut device, "s1").unwrap_err();
        assert!(matches!(err, CheckpointError::Load { .. }));
        assert_eq!(store.loads.len(), 2);
    }

    #[test]
    fn test_collect_garbage_keeps_baselines() {
        let mut store = MemoryStore::default();
        for key in [DEFAULT_BOOT, EMPTY, "a", "b", "c"] {
            store.save(key).unwrap();
        }
        let deleted = policy().collect_garbage(&mut store, &["b"]).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.list().unwrap(), vec!["b", DEFAULT_BOOT, EMPTY]);
    }

    #[test]
    fn test_missing_baseline_is_created() {
        let mut store = MemoryStore {
            strict: true,
            ..Default::default()
        };
        let mut prepared = 0;
        let baseline = policy()
            .ensure_baseline(&mut store, || {
                prepared += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(baseline, Baseline::Created);
        assert_eq!(prepared, 1);
        assert!(store.keys.contains(EMPTY));

        let mut device = FrameDevice::busy();
        policy().replay_from_empty(&mut store, &mut device, "com.example", &[]).unwrap();
        assert_eq!(device.launched, vec!["com.example"]);
    }

    #[test]
    fn test_existing_baseline_is_loaded() {
        let mut store = MemoryStore {
            strict: true,
            ..Default::default()
        };
        store.save(EMPTY).unwrap();
        let baseline = policy()
            .ensure_baseline(&mut store, || panic!("baseline already exists"))
            .unwrap();
        assert_eq!(baseline, Baseline::Loaded);
        assert_eq!(store.loads, vec![EMPTY]);
    }

    #[test]
    fn test_baseline_not_saved_when_prepare_fails() {
        let mut store = MemoryStore {
            strict: true,
            ..Default::default()
        };
        let err = policy()
            .ensure_baseline(&mut store, || Err(DeviceError::ActionExecution("install failed".to_string())))
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Device(_)));
        assert!(!store.keys.contains(EMPTY));
    }
}
