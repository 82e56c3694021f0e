//! Device driver abstraction.
//!
//! The search drives exactly one device through this trait:
//! - `AdbDevice` talks to a real device or emulator through `adb`
//! - test fakes script scenes and transitions in memory

pub mod adb;

pub use adb::AdbDevice;

use image::RgbImage;

use crate::action::Action;
use crate::scene::Observation;
use crate::scene::hierarchy::HierarchyError;

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors raised by a device driver
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// An injected action could not be performed; the search continues
    #[error("action execution failed: {0}")]
    ActionExecution(String),

    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("hierarchy dump unusable: {0}")]
    Hierarchy(#[from] HierarchyError),

    #[error("screenshot unusable: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Narrow device contract used by the search
pub trait Device {
    /// Sample the current UI hierarchy and screenshot
    fn sample(&mut self) -> DeviceResult<Observation>;

    fn screenshot(&mut self) -> DeviceResult<RgbImage>;

    /// Perform `action` and wait for the UI to settle
    ///
    /// Text actions must carry resolved text.
    fn execute(&mut self, action: &Action) -> DeviceResult<()>;

    /// Current contents of the crash log buffer
    fn read_crash_log(&mut self) -> DeviceResult<String>;

    fn clear_crash_log(&mut self) -> DeviceResult<()>;

    /// Start the launcher activity of `package`
    fn launch_app(&mut self, package: &str) -> DeviceResult<()>;
}
