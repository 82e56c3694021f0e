//! Parser for `uiautomator dump` hierarchy XML.
//!
//! The dump is a flat `<hierarchy>` element containing nested `<node .../>`
//! elements whose attributes carry everything a `Widget` needs. Only that
//! subset of XML is understood: elements, double- or single-quoted
//! attributes, the five predefined entities and numeric character
//! references. Comments, declarations and processing instructions are
//! skipped.

use super::widget::{Bounds, WidgetIndex, WidgetProps, WidgetTree};

/// Packages whose windows are never part of a scene
pub const OVERLAY_PACKAGES: &[&str] = &["com.android.systemui", "com.github.uiautomator"];

#[derive(Debug, thiserror::Error)]
pub enum HierarchyError {
    #[error("unterminated tag at byte {0}")]
    UnterminatedTag(usize),

    #[error("malformed attribute list: {0}")]
    Attribute(String),

    #[error("unbalanced </node> at byte {0}")]
    Unbalanced(usize),
}

pub type HierarchyResult<T> = Result<T, HierarchyError>;

/// Build a widget tree from a hierarchy dump
///
/// Nodes whose `package` is in `exclude_packages` are dropped together with
/// their subtrees.
pub fn parse_hierarchy(xml: &str, exclude_packages: &[&str]) -> HierarchyResult<WidgetTree> {
    let mut tree = WidgetTree::new();
    // `None` marks an excluded subtree
    let mut stack: Vec<Option<WidgetIndex>> = vec![Some(tree.root())];
    let mut pos = 0;

    while let Some(offset) = xml[pos..].find('<') {
        let start = pos + offset;
        let end = find_tag_end(xml, start).ok_or(HierarchyError::UnterminatedTag(start))?;
        let tag = &xml[start + 1..end];
        pos = end + 1;

        if tag.starts_with('?') || tag.starts_with('!') {
            continue;
        }
        if let Some(name) = tag.strip_prefix('/') {
            if name.trim() == "node" {
                if stack.len() <= 1 {
                    return Err(HierarchyError::Unbalanced(start));
                }
                stack.pop();
            }
            continue;
        }

        let self_closing = tag.ends_with('/');
        let body = tag.trim_end_matches('/');
        let (name, attrs) = match body.find(char::is_whitespace) {
            Some(split) => (&body[..split], &body[split..]),
            None => (body, ""),
        };
        if name != "node" {
            continue;
        }

        let attrs = parse_attributes(attrs)?;
        let props = props_from_attributes(&attrs);
        let parent = stack.last().copied().flatten();
        let index = match parent {
            Some(p) if !exclude_packages.contains(&props.package.as_str()) => Some(tree.push(p, props)),
            _ => None,
        };
        if !self_closing {
            stack.push(index);
        }
    }

    Ok(tree)
}

/// Position of the `>` closing the tag opened at `start`, skipping quoted text
fn find_tag_end(xml: &str, start: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, ch) in xml[start..].char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(ch),
            (None, '>') => return Some(start + i),
            _ => {}
        }
    }
    None
}

fn parse_attributes(raw: &str) -> HierarchyResult<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    let mut rest = raw.trim_start();
    while !rest.is_empty() {
        let eq = rest
            .find('=')
            .ok_or_else(|| HierarchyError::Attribute(rest.to_string()))?;
        let name = rest[..eq].trim().to_string();
        let after = rest[eq + 1..].trim_start();
        let quote = after
            .chars()
            .next()
            .filter(|c| *c == '"' || *c == '\'')
            .ok_or_else(|| HierarchyError::Attribute(rest.to_string()))?;
        let close = after[1..]
            .find(quote)
            .ok_or_else(|| HierarchyError::Attribute(rest.to_string()))?;
        attrs.push((name, unescape(&after[1..1 + close])));
        rest = after[close + 2..].trim_start();
    }
    Ok(attrs)
}

fn unescape(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let Some(semi) = rest.find(';') else {
            break;
        };
        let entity = &rest[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn props_from_attributes(attrs: &[(String, String)]) -> WidgetProps {
    let get = |name: &str| {
        attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };
    let flag = |name: &str, default: bool| get(name).map(|v| v == "true").unwrap_or(default);

    WidgetProps {
        class: get("class").unwrap_or_default().to_string(),
        package: get("package").unwrap_or_default().to_string(),
        resource_id: get("resource-id").unwrap_or_default().to_string(),
        text: get("text").unwrap_or_default().to_string(),
        content_desc: get("content-desc").unwrap_or_default().to_string(),
        hint: get("hint").unwrap_or_default().to_string(),
        bounds: get("bounds").and_then(Bounds::parse).unwrap_or_default(),
        checked: flag("checked", false),
        selected: flag("selected", false),
        enabled: flag("enabled", true),
        activated: flag("activated", false),
        clickable: flag("clickable", false),
        long_clickable: flag("long-clickable", false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<hierarchy rotation="0">
  <node index="0" text="" resource-id="" class="android.widget.FrameLayout" package="com.example.notes" content-desc="" checkable="false" checked="false" clickable="false" enabled="true" focusable="false" focused="false" scrollable="false" long-clickable="false" password="false" selected="false" bounds="[0,0][1080,2400]">
    <node index="0" text="Save &amp; close" resource-id="com.example.notes:id/save" class="android.widget.Button" package="com.example.notes" content-desc="" checked="false" clickable="true" enabled="true" long-clickable="false" selected="false" bounds="[10,20][300,120]" />
    <node index="1" text="" hint="Title" resource-id="com.example.notes:id/title" class="android.widget.EditText" package="com.example.notes" content-desc="" clickable="true" long-clickable="true" bounds="[10,200][1070,300]" />
  </node>
  <node index="1" text="" class="android.widget.FrameLayout" package="com.android.systemui" bounds="[0,0][1080,63]">
    <node index="0" text="12:00" class="android.widget.TextView" package="com.android.systemui" bounds="[0,0][100,63]" />
  </node>
</hierarchy>"#;

    #[test]
    fn test_parse_dump() {
        let tree = parse_hierarchy(DUMP, OVERLAY_PACKAGES).unwrap();
        assert_eq!(tree.len(), 4);
        assert_eq!(tree[0].children, vec![1]);
        assert_eq!(tree[1].children, vec![2, 3]);

        let button = &tree[2];
        assert_eq!(button.tag(), "Button");
        assert_eq!(button.props.text, "Save & close");
        assert_eq!(button.props.short_resource_id(), "save");
        assert!(button.props.clickable);
        assert_eq!(button.props.bounds, Bounds::new(10, 20, 300, 120));

        let title = &tree[3];
        assert!(title.is_text_field());
        assert_eq!(title.props.hint, "Title");
        assert!(title.props.long_clickable);
    }

    #[test]
    fn test_parse_keeps_overlays_without_exclusion() {
        let tree = parse_hierarchy(DUMP, &[]).unwrap();
        assert_eq!(tree.len(), 6);
        assert_eq!(tree[0].children.len(), 2);
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("a &lt;b&gt; &quot;c&quot;"), "a <b> \"c\"");
        assert_eq!(unescape("line&#10;break"), "line\nbreak");
        assert_eq!(unescape("&#x41;"), "A");
        assert_eq!(unescape("fish & chips"), "fish & chips");
    }

    #[test]
    fn test_rejects_broken_input() {
        assert!(parse_hierarchy("<node class=\"a\"", &[]).is_err());
        assert!(parse_hierarchy("<node class=a/>", &[]).is_err());
        assert!(parse_hierarchy("</node>", &[]).is_err());
    }
}
