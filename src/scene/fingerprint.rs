//! Scene fingerprinting.

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use super::widget::WidgetTree;

/// SHA-256 of `data` as lowercase hex
pub fn hash_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// How a scene fingerprint is derived from its structural hash
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    /// Fingerprint is the structural hash; identical screens collide
    #[default]
    Structural,
    /// Structural hash plus a random `-NNNN` suffix per sample
    Salted,
}

impl FromStr for FingerprintMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "structural" => Ok(Self::Structural),
            "salted" => Ok(Self::Salted),
            other => Err(format!("unknown fingerprint mode: {}", other)),
        }
    }
}

impl fmt::Display for FingerprintMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structural => write!(f, "structural"),
            Self::Salted => write!(f, "salted"),
        }
    }
}

/// Hash of `widget_id:child_count` for every widget in pre-order
pub fn structural_hash(tree: &WidgetTree) -> String {
    let parts: Vec<String> = tree
        .pre_order()
        .into_iter()
        .map(|i| {
            let widget = &tree[i];
            format!("{}:{}", widget.widget_id, widget.children.len())
        })
        .collect();
    hash_hex(&parts.join(","))
}

/// Compute the fingerprint of `tree` under `mode`
pub fn fingerprint(tree: &WidgetTree, mode: FingerprintMode) -> String {
    let hash = structural_hash(tree);
    match mode {
        FingerprintMode::Structural => hash,
        FingerprintMode::Salted => {
            let salt: u16 = rand::thread_rng().gen_range(1000..=9999);
            format!("{}-{}", hash, salt)
        }
    }
}

/// Structural component of a fingerprint (strips a salt suffix if present)
pub fn structural_part(fingerprint: &str) -> &str {
    fingerprint.split('-').next().unwrap_or(fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::widget::WidgetProps;

    fn tree_with_text(text: &str) -> WidgetTree {
        let mut tree = WidgetTree::new();
        let list = tree.push(0, WidgetProps::new("android.widget.ListView"));
        tree.push(list, WidgetProps::new("android.widget.TextView").text(text));
        tree
    }

    #[test]
    fn test_structural_hash_is_deterministic() {
        let a = tree_with_text("hello");
        let b = tree_with_text("hello");
        assert_eq!(structural_hash(&a), structural_hash(&b));
        assert_eq!(structural_hash(&a).len(), 64);
    }

    #[test]
    fn test_structural_hash_changes_with_content() {
        assert_ne!(
            structural_hash(&tree_with_text("hello")),
            structural_hash(&tree_with_text("world"))
        );
    }

    #[test]
    fn test_structural_hash_changes_with_shape() {
        let flat = tree_with_text("hello");
        let mut nested = tree_with_text("hello");
        nested.push(1, WidgetProps::new("android.widget.TextView").text("extra"));
        assert_ne!(structural_hash(&flat), structural_hash(&nested));
    }

    #[test]
    fn test_salted_mode_keeps_structural_part() {
        let tree = tree_with_text("hello");
        let salted = fingerprint(&tree, FingerprintMode::Salted);
        let (hash, salt) = salted.split_once('-').unwrap();
        assert_eq!(hash, structural_hash(&tree));
        let salt: u16 = salt.parse().unwrap();
        assert!((1000..=9999).contains(&salt));
        assert_eq!(structural_part(&salted), hash);
        assert_eq!(fingerprint(&tree, FingerprintMode::Structural), hash);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("Salted".parse::<FingerprintMode>(), Ok(FingerprintMode::Salted));
        assert_eq!("structural".parse::<FingerprintMode>(), Ok(FingerprintMode::Structural));
        assert!("random".parse::<FingerprintMode>().is_err());
    }
}
