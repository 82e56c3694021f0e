//! `adb`-backed device driver.
//!
//! Every operation shells out to the `adb` binary, the same way the oracle
//! client shells out to `curl`. UI hierarchy comes from `uiautomator dump`,
//! screenshots from `screencap -p`, input from `input` and crash traces from
//! the `AndroidRuntime` logcat tag.

use image::RgbImage;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Device, DeviceError, DeviceResult};
use crate::action::{Action, ActionKind, Direction, Key, Orientation, TextInput};
use crate::config::DeviceSettings;
use crate::scene::hierarchy::{OVERLAY_PACKAGES, parse_hierarchy};
use crate::scene::{AppInfo, Bounds, FingerprintMode, Observation, Scene};

const DUMP_PATH: &str = "/sdcard/window_dump.xml";

/// Long-press duration in milliseconds
const LONG_PRESS_MS: u32 = 800;

const SWIPE_MS: u32 = 300;

/// Fraction of the screen a swipe covers
const SWIPE_SCALE: f64 = 0.9;

/// Key code of KEYCODE_ESCAPE, used to dismiss the soft keyboard
const KEYCODE_ESCAPE: u32 = 111;
const KEYCODE_MOVE_END: u32 = 123;
const KEYCODE_DEL: u32 = 67;

/// Device or emulator reachable through `adb`
#[derive(Debug, Clone)]
pub struct AdbDevice {
    adb: String,
    serial: Option<String>,
    action_delay: Duration,
    fingerprint: FingerprintMode,
}

impl AdbDevice {
    pub fn new(settings: &DeviceSettings, fingerprint: FingerprintMode) -> Self {
        Self {
            adb: settings.adb.clone(),
            serial: None,
            action_delay: settings.action_delay,
            fingerprint,
        }
    }

    /// Target a specific device serial (`adb -s`)
    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.adb);
        if let Some(serial) = &self.serial {
            cmd.args(["-s", serial]);
        }
        cmd
    }

    fn run(&self, args: &[&str]) -> DeviceResult<Vec<u8>> {
        let output = self.command().args(args).output()?;
        if !output.status.success() {
            return Err(DeviceError::Command {
                command: format!("adb {}", args.join(" ")),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    fn shell(&self, command: &str) -> DeviceResult<String> {
        let out = self.run(&["shell", command])?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Install an APK, replacing any previous install and granting permissions
    pub fn install(&self, apk: &Path) -> DeviceResult<()> {
        let apk = apk.to_string_lossy();
        info!(apk = %apk, "installing package");
        self.run(&["install", "-r", "-g", &apk])?;
        Ok(())
    }

    /// Wipe the data of `package`
    pub fn clear_app(&self, package: &str) -> DeviceResult<()> {
        self.shell(&format!("pm clear {}", package))?;
        Ok(())
    }

    /// Package and activity of the focused window
    pub fn active_app(&self) -> DeviceResult<AppInfo> {
        let dump = self.shell("dumpsys window")?;
        parse_focused_window(&dump).ok_or_else(|| DeviceError::Command {
            command: "adb shell dumpsys window".to_string(),
            message: "no focused window".to_string(),
        })
    }

    fn dump_hierarchy(&self) -> DeviceResult<String> {
        self.shell(&format!("uiautomator dump {}", DUMP_PATH))?;
        self.shell(&format!("cat {}", DUMP_PATH))
    }

    fn screen_size(&self) -> DeviceResult<(i32, i32)> {
        let out = self.shell("wm size")?;
        parse_screen_size(&out).ok_or_else(|| DeviceError::Command {
            command: "adb shell wm size".to_string(),
            message: format!("unexpected output: {}", out.trim()),
        })
    }

    fn tap(&self, bounds: &Bounds) -> DeviceResult<()> {
        let (x, y) = bounds.center();
        self.shell(&format!("input tap {} {}", x, y))?;
        Ok(())
    }

    fn long_press(&self, bounds: &Bounds) -> DeviceResult<()> {
        let (x, y) = bounds.center();
        self.shell(&format!("input swipe {x} {y} {x} {y} {}", LONG_PRESS_MS))?;
        Ok(())
    }

    fn key(&self, code: u32) -> DeviceResult<()> {
        self.shell(&format!("input keyevent {}", code))?;
        Ok(())
    }

    fn input_text(&self, bounds: &Bounds, old_text: &str, text: &str) -> DeviceResult<()> {
        self.tap(bounds)?;
        thread::sleep(Duration::from_millis(100));
        self.key(KEYCODE_MOVE_END)?;
        let deletes = vec![KEYCODE_DEL.to_string(); old_text.chars().count()];
        if !deletes.is_empty() {
            self.shell(&format!("input keyevent {}", deletes.join(" ")))?;
        }
        if !text.is_ascii() {
            warn!(text, "non-ascii text may not be typed correctly");
        }
        self.shell(&format!("input text {}", shell_quote(&text.replace(' ', "%s"))))?;
        Ok(())
    }

    fn swipe(&self, direction: Direction) -> DeviceResult<()> {
        let (w, h) = self.screen_size()?;
        let (cx, cy) = (w / 2, h / 2);
        let dx = (w as f64 * SWIPE_SCALE / 2.0) as i32;
        let dy = (h as f64 * SWIPE_SCALE / 2.0) as i32;
        let (x1, y1, x2, y2) = match direction {
            Direction::Up => (cx, cy + dy, cx, cy - dy),
            Direction::Down => (cx, cy - dy, cx, cy + dy),
            Direction::Left => (cx + dx, cy, cx - dx, cy),
            Direction::Right => (cx - dx, cy, cx + dx, cy),
        };
        self.shell(&format!("input swipe {x1} {y1} {x2} {y2} {}", SWIPE_MS))?;
        Ok(())
    }

    fn rotate(&self, orientation: Orientation) -> DeviceResult<()> {
        let rotation = match orientation {
            Orientation::Landscape => 1,
            Orientation::Portrait => 0,
        };
        self.shell("settings put system accelerometer_rotation 0")?;
        self.shell(&format!("settings put system user_rotation {}", rotation))?;
        Ok(())
    }

    fn hide_keyboard(&self) -> DeviceResult<()> {
        let state = self.shell("dumpsys input_method")?;
        if state.contains("mInputShown=true") {
            self.key(KEYCODE_ESCAPE)?;
        }
        Ok(())
    }

    fn perform(&self, action: &Action) -> DeviceResult<()> {
        let target = || {
            action
                .target
                .as_ref()
                .ok_or_else(|| DeviceError::ActionExecution(format!("{} has no target widget", action.kind.name())))
        };
        match &action.kind {
            ActionKind::Click => self.tap(&target()?.bounds),
            ActionKind::LongClick => self.long_press(&target()?.bounds),
            ActionKind::InputText(TextInput::Resolved(text)) => {
                let target = target()?;
                self.input_text(&target.bounds, &target.text, text)
            }
            ActionKind::InputText(TextInput::Planned) => Err(DeviceError::ActionExecution(
                "text input has not been generated".to_string(),
            )),
            ActionKind::Press(key) => self.key(match key {
                Key::Back => 4,
                Key::Enter => 66,
                Key::Delete => KEYCODE_DEL,
                Key::Home => 3,
            }),
            ActionKind::Swipe(direction) => self.swipe(*direction),
            ActionKind::Rotate(orientation) => self.rotate(*orientation),
        }
    }
}

impl Device for AdbDevice {
    fn sample(&mut self) -> DeviceResult<Observation> {
        let app = self.active_app()?;
        let screenshot = self.screenshot()?;
        let xml = self.dump_hierarchy()?;
        let tree = parse_hierarchy(&xml, OVERLAY_PACKAGES)?;
        let scene = Scene::new(tree, app, self.fingerprint);
        debug!(scene = %scene.fingerprint, widgets = scene.tree.len(), "sampled scene");
        Ok(Observation { scene, screenshot })
    }

    fn screenshot(&mut self) -> DeviceResult<RgbImage> {
        let png = self.run(&["exec-out", "screencap", "-p"])?;
        Ok(image::load_from_memory(&png)?.to_rgb8())
    }

    fn execute(&mut self, action: &Action) -> DeviceResult<()> {
        self.perform(action).map_err(|e| match e {
            DeviceError::ActionExecution(_) => e,
            other => DeviceError::ActionExecution(other.to_string()),
        })?;
        if let Err(e) = self.hide_keyboard() {
            debug!(error = %e, "could not query keyboard state");
        }
        info!(action = %action, id = %action.action_id, "executed action");
        thread::sleep(self.action_delay);
        Ok(())
    }

    fn read_crash_log(&mut self) -> DeviceResult<String> {
        let out = self.run(&["logcat", "-d", "AndroidRuntime:E", "*:S"])?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn clear_crash_log(&mut self) -> DeviceResult<()> {
        self.run(&["logcat", "-c"])?;
        Ok(())
    }

    fn launch_app(&mut self, package: &str) -> DeviceResult<()> {
        info!(package, "launching app");
        self.shell(&format!(
            "monkey -p {} -c android.intent.category.LAUNCHER 1",
            package
        ))?;
        thread::sleep(self.action_delay);
        Ok(())
    }
}

/// Quote `s` for the device shell
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Extract the focused window from `dumpsys window` output
///
/// Looks for `mCurrentFocus=Window{<hash> u0 <package>/<activity>}`.
fn parse_focused_window(dump: &str) -> Option<AppInfo> {
    let line = dump
        .lines()
        .find(|l| l.trim_start().starts_with("mCurrentFocus=") && l.contains('/'))?;
    let component = line.trim().trim_end_matches('}').split_whitespace().last()?;
    let (package, activity) = component.split_once('/')?;
    Some(AppInfo::new(package, activity))
}

/// Parse `Physical size: WxH` (an override size wins)
fn parse_screen_size(out: &str) -> Option<(i32, i32)> {
    let pick = |prefix: &str| {
        out.lines()
            .find_map(|l| l.trim().strip_prefix(prefix))
            .and_then(|size| size.trim().split_once('x'))
            .and_then(|(w, h)| Some((w.trim().parse().ok()?, h.trim().parse().ok()?)))
    };
    pick("Override size:").or_else(|| pick("Physical size:"))
}
