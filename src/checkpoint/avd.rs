//! Emulator snapshot store over the `adb emu avd snapshot` console.

use std::process::Command;
use tracing::{debug, error};

use super::{CheckpointError, CheckpointResult, CheckpointStore};

/// Checkpoint store backed by Android emulator snapshots
#[derive(Debug, Clone)]
pub struct AvdCheckpoints {
    adb: String,
    serial: Option<String>,
}

impl AvdCheckpoints {
    pub fn new(adb: impl Into<String>) -> Self {
        Self {
            adb: adb.into(),
            serial: None,
        }
    }

    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Run an emulator console command; `Ok` carries the combined output
    /// when the console answered `OK`, `Err` the output otherwise
    fn exec(&self, args: &[&str]) -> Result<String, String> {
        let mut cmd = Command::new(&self.adb);
        if let Some(serial) = &self.serial {
            cmd.args(["-s", serial]);
        }
        let output = cmd
            .arg("emu")
            .args(args)
            .output()
            .map_err(|e| format!("cannot run {}: {}", self.adb, e))?;
        let combined = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
        .trim()
        .to_string();
        debug!(command = %args.join(" "), output = %combined, "emulator console");
        if console_ok(&combined) {
            Ok(combined)
        } else if combined.is_empty() {
            Err("emulator did not answer".to_string())
        } else {
            Err(combined)
        }
    }

    /// First line of `avd status`
    pub fn status(&self) -> CheckpointResult<String> {
        self.exec(&["avd", "status"])
            .map(|out| out.lines().next().unwrap_or_default().to_string())
            .map_err(CheckpointError::List)
    }
}

impl CheckpointStore for AvdCheckpoints {
    fn save(&mut self, key: &str) -> CheckpointResult<()> {
        self.exec(&["avd", "snapshot", "save", key])
            .map(|_| ())
            .map_err(|message| {
                error!(checkpoint = key, error = %message, "snapshot save failed");
                CheckpointError::Save {
                    key: key.to_string(),
                    message,
                }
            })
    }

    fn load(&mut self, key: &str) -> CheckpointResult<()> {
        self.exec(&["avd", "snapshot", "load", key])
            .map(|_| ())
            .map_err(|message| CheckpointError::Load {
                key: key.to_string(),
                message,
            })
    }

    fn delete(&mut self, key: &str) -> CheckpointResult<()> {
        self.exec(&["avd", "snapshot", "delete", key])
            .map(|_| ())
            .map_err(|message| CheckpointError::Delete {
                key: key.to_string(),
                message,
            })
    }

    fn list(&mut self) -> CheckpointResult<Vec<String>> {
        let out = self
            .exec(&["avd", "snapshot", "list"])
            .map_err(CheckpointError::List)?;
        Ok(parse_snapshot_list(&out))
    }
}

/// The console's last line is `OK` on success
fn console_ok(output: &str) -> bool {
    output
        .lines()
        .last()
        .is_some_and(|line| line.trim_start().starts_with("OK"))
}

/// Snapshot tags from `avd snapshot list` output
///
/// ```text
/// List of snapshots present on all disks:
/// ID        TAG                 VM SIZE                DATE       VM CLOCK
/// --        default_boot        87M 2024-01-01 10:00:00   00:00:10.000
/// --        empty               92M 2024-01-01 10:05:00   00:01:10.000
/// OK
/// ```
fn parse_snapshot_list(output: &str) -> Vec<String> {
    let mut lines = output.lines();
    if !lines
        .next()
        .is_some_and(|l| l.starts_with("List of snapshots"))
    {
        return Vec::new();
    }
    lines
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("ID ") && !l.starts_with("OK"))
        .filter_map(|l| l.split_whitespace().nth(1))
        .map(str::to_string)
        .collect()
}
