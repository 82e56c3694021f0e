//! Widget arena for one sampled UI hierarchy.
//!
//! Widgets live in a flat `Vec` and refer to each other by index. Index 0 is
//! always a virtual root that holds the top-level nodes of the dump; it has
//! no content and contributes no actions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Index;

use super::fingerprint::hash_hex;

/// Index of a widget inside its `WidgetTree`
pub type WidgetIndex = usize;

/// Screen-space rectangle in device pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Parse the uiautomator form `[x1,y1][x2,y2]`
    pub fn parse(raw: &str) -> Option<Self> {
        let inner = raw.trim().strip_prefix('[')?.strip_suffix(']')?;
        let (first, second) = inner.split_once("][")?;
        let (x1, y1) = first.split_once(',')?;
        let (x2, y2) = second.split_once(',')?;
        Some(Self {
            left: x1.trim().parse().ok()?,
            top: y1.trim().parse().ok()?,
            right: x2.trim().parse().ok()?,
            bottom: y2.trim().parse().ok()?,
        })
    }

    pub fn center(&self) -> (i32, i32) {
        ((self.left + self.right) / 2, (self.top + self.bottom) / 2)
    }

    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}][{},{}]", self.left, self.top, self.right, self.bottom)
    }
}

/// Content and state attributes of one hierarchy node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetProps {
    /// Fully qualified control class, e.g. `android.widget.EditText`
    pub class: String,
    pub package: String,
    pub resource_id: String,
    pub text: String,
    pub content_desc: String,
    pub hint: String,
    pub bounds: Bounds,
    pub checked: bool,
    pub selected: bool,
    pub enabled: bool,
    pub activated: bool,
    pub clickable: bool,
    pub long_clickable: bool,
}

impl Default for WidgetProps {
    fn default() -> Self {
        Self {
            class: String::new(),
            package: String::new(),
            resource_id: String::new(),
            text: String::new(),
            content_desc: String::new(),
            hint: String::new(),
            bounds: Bounds::default(),
            checked: false,
            selected: false,
            enabled: true,
            activated: false,
            clickable: false,
            long_clickable: false,
        }
    }
}

impl WidgetProps {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            ..Default::default()
        }
    }

    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.package = package.into();
        self
    }

    pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = resource_id.into();
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn content_desc(mut self, desc: impl Into<String>) -> Self {
        self.content_desc = desc.into();
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = hint.into();
        self
    }

    pub fn bounds(mut self, left: i32, top: i32, right: i32, bottom: i32) -> Self {
        self.bounds = Bounds::new(left, top, right, bottom);
        self
    }

    pub fn clickable(mut self, clickable: bool) -> Self {
        self.clickable = clickable;
        self
    }

    pub fn long_clickable(mut self, long_clickable: bool) -> Self {
        self.long_clickable = long_clickable;
        self
    }

    pub fn checked(mut self, checked: bool) -> Self {
        self.checked = checked;
        self
    }

    /// Short control name, e.g. `EditText`
    pub fn tag(&self) -> &str {
        self.class.rsplit('.').next().unwrap_or(&self.class)
    }

    /// Resource id without the package prefix
    pub fn short_resource_id(&self) -> &str {
        self.resource_id.rsplit('/').next().unwrap_or("").trim()
    }

    /// Content-derived identity of this widget
    pub fn content_hash(&self) -> String {
        hash_hex(&format!(
            "{},{},{},{},{},{},{},{},{},{},{}",
            self.package,
            self.tag(),
            self.short_resource_id(),
            self.bounds,
            self.text.trim(),
            self.content_desc.trim(),
            self.hint.trim(),
            self.checked,
            self.selected,
            self.enabled,
            self.activated,
        ))
    }
}

/// One node of a scene's UI tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Widget {
    pub index: WidgetIndex,
    pub widget_id: String,
    pub props: WidgetProps,
    pub parent: Option<WidgetIndex>,
    pub children: Vec<WidgetIndex>,
    pub is_virtual: bool,
}

impl Widget {
    pub fn tag(&self) -> &str {
        if self.is_virtual { "ROOT" } else { self.props.tag() }
    }

    pub fn is_text_field(&self) -> bool {
        !self.is_virtual && self.props.tag() == "EditText"
    }

    pub fn is_interactive(&self) -> bool {
        !self.is_virtual && (self.is_text_field() || self.props.clickable || self.props.long_clickable)
    }

    /// `checked;text;content-desc;resource-id;hint`, empty parts skipped
    pub fn prompt_content(&self) -> String {
        let p = &self.props;
        let mut parts: Vec<&str> = Vec::new();
        if p.checked {
            parts.push("checked");
        }
        for value in [p.text.trim(), p.content_desc.trim(), p.short_resource_id(), p.hint.trim()] {
            if !value.is_empty() {
                parts.push(value);
            }
        }
        parts.join(";")
    }

    /// Single-element XML descriptor used in action descriptions
    pub fn prompt_xml(&self) -> String {
        format!("<{} content=\"{}\"/>", self.tag(), self.prompt_content())
    }

    pub fn is_empty_content(&self) -> bool {
        let p = &self.props;
        p.text.trim().is_empty()
            && p.content_desc.trim().is_empty()
            && p.short_resource_id().is_empty()
            && p.hint.trim().is_empty()
    }
}

impl fmt::Display for Widget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_virtual {
            return write!(f, "ROOT");
        }
        let text: String = self.props.text.chars().take(10).collect();
        let desc: String = self.props.content_desc.chars().take(10).collect();
        write!(
            f,
            "{}::ResourceId({})::Text({})::ContentDesc({})",
            self.tag(),
            self.props.short_resource_id(),
            text,
            desc
        )
    }
}

/// Arena-backed widget tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetTree {
    nodes: Vec<Widget>,
}

impl Default for WidgetTree {
    fn default() -> Self {
        Self::new()
    }
}

impl WidgetTree {
    /// Create a tree holding only the virtual root
    pub fn new() -> Self {
        Self {
            nodes: vec![Widget {
                index: 0,
                widget_id: "0".to_string(),
                props: WidgetProps::default(),
                parent: None,
                children: Vec::new(),
                is_virtual: true,
            }],
        }
    }

    pub fn root(&self) -> WidgetIndex {
        0
    }

    /// Append a widget under `parent` and return its index
    ///
    /// Panics if `parent` is not an index of this tree.
    pub fn push(&mut self, parent: WidgetIndex, props: WidgetProps) -> WidgetIndex {
        let index = self.nodes.len();
        let widget_id = props.content_hash();
        self.nodes.push(Widget {
            index,
            widget_id,
            props,
            parent: Some(parent),
            children: Vec::new(),
            is_virtual: false,
        });
        self.nodes[parent].children.push(index);
        index
    }

    pub fn get(&self, index: WidgetIndex) -> Option<&Widget> {
        self.nodes.get(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &Widget> {
        self.nodes.iter()
    }

    /// Indices in pre-order (parent before children, children in order)
    pub fn pre_order(&self) -> Vec<WidgetIndex> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root()];
        while let Some(index) = stack.pop() {
            out.push(index);
            stack.extend(self.nodes[index].children.iter().rev());
        }
        out
    }

    /// Indices in post-order (children before parent, children in order)
    pub fn post_order(&self) -> Vec<WidgetIndex> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root(), false)];
        while let Some((index, expanded)) = stack.pop() {
            if expanded {
                out.push(index);
                continue;
            }
            stack.push((index, true));
            for &child in self.nodes[index].children.iter().rev() {
                stack.push((child, false));
            }
        }
        out
    }

    /// XML rendering of the subtree rooted at `index` with prompt content
    pub fn subtree_xml(&self, index: WidgetIndex) -> String {
        let mut lines = Vec::new();
        let mut stack = vec![(index, 0usize, false)];
        while let Some((i, depth, closing)) = stack.pop() {
            let widget = &self.nodes[i];
            let pad = " ".repeat(depth * 4);
            if closing {
                lines.push(format!("{}</{}>", pad, widget.tag()));
                continue;
            }
            let content = widget.prompt_content();
            if widget.children.is_empty() {
                lines.push(format!("{}<{} content=\"{}\"/>", pad, widget.tag(), content));
            } else {
                lines.push(format!("{}<{} content=\"{}\">", pad, widget.tag(), content));
                stack.push((i, depth, true));
                for &child in widget.children.iter().rev() {
                    stack.push((child, depth + 1, false));
                }
            }
        }
        lines.join("\n")
    }

    /// Indented one-line-per-widget rendering used in scene records
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        let mut stack = vec![(self.root(), 0usize)];
        while let Some((i, depth)) = stack.pop() {
            lines.push(format!("{}{}", "  ".repeat(depth), self.nodes[i]));
            for &child in self.nodes[i].children.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        lines.join("\n")
    }
}

impl Index<WidgetIndex> for WidgetTree {
    type Output = Widget;

    fn index(&self, index: WidgetIndex) -> &Widget {
        &self.nodes[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> WidgetTree {
        let mut tree = WidgetTree::new();
        let frame = tree.push(0, WidgetProps::new("android.widget.FrameLayout").bounds(0, 0, 100, 200));
        tree.push(
            frame,
            WidgetProps::new("android.widget.Button")
                .text("Save")
                .resource_id("com.example:id/save")
                .clickable(true)
                .bounds(0, 0, 50, 20),
        );
        tree.push(
            frame,
            WidgetProps::new("android.widget.EditText")
                .hint("Name")
                .bounds(0, 20, 100, 40),
        );
        tree
    }

    #[test]
    fn test_bounds_parse() {
        let bounds = Bounds::parse("[0,63][1080,210]").unwrap();
        assert_eq!(bounds, Bounds::new(0, 63, 1080, 210));
        assert_eq!(bounds.center(), (540, 136));
        assert_eq!(bounds.to_string(), "[0,63][1080,210]");
        assert!(Bounds::parse("[0,63]").is_none());
        assert!(Bounds::parse("garbage").is_none());
    }

    #[test]
    fn test_orders() {
        let tree = sample_tree();
        assert_eq!(tree.pre_order(), vec![0, 1, 2, 3]);
        assert_eq!(tree.post_order(), vec![2, 3, 1, 0]);
    }

    #[test]
    fn test_prompt_content() {
        let tree = sample_tree();
        assert_eq!(tree[2].prompt_content(), "Save;save");
        assert_eq!(tree[2].prompt_xml(), "<Button content=\"Save;save\"/>");
        assert_eq!(tree[3].prompt_content(), "Name");
        assert!(tree[1].is_empty_content());
    }

    #[test]
    fn test_subtree_xml() {
        let tree = sample_tree();
        let xml = tree.subtree_xml(1);
        assert_eq!(
            xml,
            "<FrameLayout content=\"\">\n    <Button content=\"Save;save\"/>\n    <EditText content=\"Name\"/>\n</FrameLayout>"
        );
    }

    #[test]
    fn test_widget_id_depends_on_content() {
        let a = WidgetProps::new("android.widget.Button").text("OK");
        let b = WidgetProps::new("android.widget.Button").text("Cancel");
        assert_ne!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash(), a.clone().content_hash());
    }

    #[test]
    fn test_interactive_flags() {
        let tree = sample_tree();
        assert!(!tree[0].is_interactive());
        assert!(!tree[1].is_interactive());
        assert!(tree[2].is_interactive());
        assert!(tree[3].is_text_field());
    }
}
