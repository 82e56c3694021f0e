//! Result directory of one exploration run.
//!
//! Layout:
//! - `data`, `state`: event log (see `events`)
//! - `scenes/<fingerprint>.{png,json}`
//! - `transitions/<id>.{png,json}`
//! - `details/`: numbered oracle/action records and refinement images
//! - `achieved-path-NN.md`: reproduction artifacts
//! - `log.txt`, `token_usage.json`

use image::RgbImage;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::scene::Scene;
use crate::scene::canvas::encode_png;
use crate::transition::Transition;

const SCENES_DIR: &str = "scenes";
const TRANSITIONS_DIR: &str = "transitions";
const DETAILS_DIR: &str = "details";

/// Kind of a numbered `details/` record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailKind {
    GenerateText,
    ExecuteAction,
    ExtractTransition,
}

impl DetailKind {
    fn name(self) -> &'static str {
        match self {
            DetailKind::GenerateText => "GenerateText",
            DetailKind::ExecuteAction => "ExecuteAction",
            DetailKind::ExtractTransition => "ExtractTransition",
        }
    }
}

/// A run's result directory
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session ID
    pub id: String,
    /// Root directory for this run
    pub dir: PathBuf,
    detail_index: u32,
}

impl Session {
    /// `<base>/<package>/<label>-<timestamp>`, or `<base>/<package>/<timestamp>`
    pub fn new(base: impl AsRef<Path>, package: &str, label: Option<&str>) -> Self {
        let timestamp = generate_timestamp_suffix();
        let id = match label {
            Some(label) => format!("{}-{}", sanitize_name(label), timestamp),
            None => timestamp,
        };
        let dir = base.as_ref().join(sanitize_name(package)).join(&id);
        Self {
            id,
            dir,
            detail_index: 0,
        }
    }

    /// Use an explicit directory
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(generate_timestamp_suffix);
        Self {
            id,
            dir,
            detail_index: 0,
        }
    }

    /// Create the directory tree and write `.session.json`
    pub fn init(&self, package: &str) -> io::Result<()> {
        for sub in [SCENES_DIR, TRANSITIONS_DIR, DETAILS_DIR] {
            fs::create_dir_all(self.dir.join(sub))?;
        }

        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_default();
        let metadata = serde_json::json!({
            "id": self.id,
            "created": chrono::Utc::now().to_rfc3339(),
            "host": host,
            "package": package,
        });

        let metadata_path = self.dir.join(".session.json");
        fs::write(metadata_path, serde_json::to_string_pretty(&metadata)?)?;

        Ok(())
    }

    pub fn scene_path(&self, fingerprint: &str, ext: &str) -> PathBuf {
        self.dir.join(SCENES_DIR).join(format!("{}.{}", fingerprint, ext))
    }

    pub fn transition_path(&self, transition_id: &str, ext: &str) -> PathBuf {
        self.dir
            .join(TRANSITIONS_DIR)
            .join(format!("{}.{}", transition_id, ext))
    }

    pub fn details_dir(&self) -> PathBuf {
        self.dir.join(DETAILS_DIR)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join("log.txt")
    }

    pub fn token_usage_path(&self) -> PathBuf {
        self.dir.join("token_usage.json")
    }

    /// Write `scenes/<fingerprint>.png` and `.json`
    pub fn save_scene(&self, scene: &Scene, screenshot: &RgbImage) -> io::Result<()> {
        write_png(&self.scene_path(&scene.fingerprint, "png"), screenshot)?;
        write_json(&self.scene_path(&scene.fingerprint, "json"), &scene.to_record())
    }

    /// Write `transitions/<id>.png` and `.json`
    pub fn save_transition(&self, transition: &Transition, image: &RgbImage) -> io::Result<()> {
        let id = &transition.transition_id;
        write_png(&self.transition_path(id, "png"), image)?;
        write_json(&self.transition_path(id, "json"), &transition.to_record())
    }

    /// Write `details/<name>.png`
    pub fn save_detail_image(&self, name: &str, image: &RgbImage) -> io::Result<PathBuf> {
        let path = self.details_dir().join(format!("{}.png", name));
        write_png(&path, image)?;
        Ok(path)
    }

    /// Write the next numbered `details/NNNN-<Kind>.json` (and `.png`)
    pub fn record_detail(
        &mut self,
        kind: DetailKind,
        record: &serde_json::Value,
        image: Option<&RgbImage>,
    ) -> io::Result<()> {
        let stem = format!("{:04}-{}", self.detail_index, kind.name());
        write_json(&self.details_dir().join(format!("{}.json", stem)), record)?;
        if let Some(image) = image {
            write_png(&self.details_dir().join(format!("{}.png", stem)), image)?;
        }
        self.detail_index += 1;
        Ok(())
    }

    /// First `<base>-NN.<ext>` in the run directory that does not exist yet
    pub fn unique_path(&self, base: &str, ext: &str) -> PathBuf {
        (1u32..)
            .map(|n| self.dir.join(format!("{}-{:02}.{}", base, n, ext)))
            .find(|path| !path.exists())
            .unwrap_or_else(|| self.dir.join(format!("{}.{}", base, ext)))
    }

    /// PNG files under `scenes/`, sorted
    pub fn list_scene_images(&self) -> io::Result<Vec<PathBuf>> {
        let mut captures = Vec::new();
        let dir = self.dir.join(SCENES_DIR);
        if dir.exists() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().map(|e| e == "png").unwrap_or(false) {
                    captures.push(path);
                }
            }
        }
        captures.sort();
        Ok(captures)
    }
}

fn write_png(path: &Path, image: &RgbImage) -> io::Result<()> {
    let bytes = encode_png(image).map_err(io::Error::other)?;
    fs::write(path, bytes)
}

fn write_json(path: &Path, value: &serde_json::Value) -> io::Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)
}

/// Generate a timestamp suffix
fn generate_timestamp_suffix() -> String {
    chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// Sanitize a name for use in filenames
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}
