//! UI scenes: widget trees, fingerprints and screenshot annotation.

pub mod canvas;
pub mod fingerprint;
pub mod hierarchy;
pub mod widget;

pub use fingerprint::{FingerprintMode, fingerprint, hash_hex, structural_hash, structural_part};
pub use widget::{Bounds, Widget, WidgetIndex, WidgetProps, WidgetTree};

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Foreground application identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub package: String,
    pub activity: String,
}

impl AppInfo {
    pub fn new(package: impl Into<String>, activity: impl Into<String>) -> Self {
        let package = package.into();
        let mut activity = activity.into();
        if activity.starts_with('.') {
            activity = format!("{}{}", package, activity);
        }
        Self { package, activity }
    }
}

/// Fingerprinted snapshot of the on-screen UI tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub fingerprint: String,
    pub tree: WidgetTree,
    pub app: AppInfo,
}

impl Scene {
    pub fn new(tree: WidgetTree, app: AppInfo, mode: FingerprintMode) -> Self {
        Self {
            fingerprint: fingerprint(&tree, mode),
            tree,
            app,
        }
    }

    /// Fingerprint without any salt suffix
    pub fn structural_hash(&self) -> &str {
        structural_part(&self.fingerprint)
    }

    /// JSON document stored as `scenes/<fingerprint>.json`
    pub fn to_record(&self) -> serde_json::Value {
        serde_json::json!({
            "scene_id": self.fingerprint,
            "app_info": self.app,
            "widget_tree": self.tree.render(),
            "widget_count": self.tree.len() - 1,
        })
    }
}

/// One device sample: the scene and the screenshot it was taken with
#[derive(Debug, Clone)]
pub struct Observation {
    pub scene: Scene,
    pub screenshot: RgbImage,
}
