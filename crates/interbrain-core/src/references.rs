//! Reading and rewriting references to other nodes inside authored content.
//!
//! Canvas files are JSON with file nodes (`nodes[].file`); Markdown uses wiki
//! links and embeds (`[[target]]`, `![[target|alias]]`). Targets are paths
//! relative to the vault root.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

use crate::error::{InterbrainError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Canvas,
    Markdown,
}

impl ContentKind {
    pub fn of(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "canvas" => Some(Self::Canvas),
            "md" | "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }
}

/// Every distinct reference in `text`, in order of first appearance.
pub fn extract_references(kind: ContentKind, text: &str) -> Result<Vec<String>> {
    let mut refs: Vec<String> = Vec::new();
    let mut push = |target: &str| {
        let target = normalize(target);
        if !target.is_empty() && !refs.iter().any(|r| r == &target) {
            refs.push(target);
        }
    };

    match kind {
        ContentKind::Canvas => {
            let canvas = parse_canvas(text)?;
            for file in canvas_files(&canvas) {
                push(file);
            }
        }
        ContentKind::Markdown => {
            for (start, end) in wiki_targets(text) {
                push(&text[start..end]);
            }
        }
    }
    Ok(refs)
}

/// Replace references found in `mapping`. Returns `None` if nothing changed.
pub fn rewrite_references(kind: ContentKind, text: &str, mapping: &HashMap<String, String>) -> Result<Option<String>> {
    match kind {
        ContentKind::Canvas => {
            let mut canvas = parse_canvas(text)?;
            let mut changed = false;
            if let Some(nodes) = canvas.get_mut("nodes").and_then(Value::as_array_mut) {
                for node in nodes {
                    let Some(file) = node.get_mut("file") else { continue };
                    let Some(current) = file.as_str() else { continue };
                    if let Some(new) = mapping.get(&normalize(current)) {
                        *file = Value::String(new.clone());
                        changed = true;
                    }
                }
            }
            if !changed {
                return Ok(None);
            }
            let mut out = serde_json::to_string_pretty(&canvas)
                .map_err(|e| InterbrainError::Internal(format!("serialize canvas: {e}")))?;
            out.push('\n');
            Ok(Some(out))
        }
        ContentKind::Markdown => {
            let mut out = String::with_capacity(text.len());
            let mut cursor = 0;
            let mut changed = false;
            for (start, end) in wiki_targets(text) {
                if let Some(new) = mapping.get(&normalize(&text[start..end])) {
                    out.push_str(&text[cursor..start]);
                    out.push_str(new);
                    cursor = end;
                    changed = true;
                }
            }
            out.push_str(&text[cursor..]);
            Ok(changed.then_some(out))
        }
    }
}

fn normalize(target: &str) -> String {
    target.trim().trim_start_matches("./").trim_start_matches('/').to_string()
}

fn parse_canvas(text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| InterbrainError::InvalidInput(format!("malformed canvas: {e}")))
}

fn canvas_files(canvas: &Value) -> impl Iterator<Item = &str> {
    canvas
        .get("nodes")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|node| node.get("file").and_then(Value::as_str))
}

/// Byte ranges of wiki-link targets, excluding `|alias` and `#heading`.
fn wiki_targets(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut offset = 0;
    while let Some(open) = text[offset..].find("[[") {
        let start = offset + open + 2;
        let Some(close) = text[start..].find("]]") else { break };
        let inner = &text[start..start + close];
        if !inner.contains('\n') {
            let len = inner.find(['|', '#']).unwrap_or(inner.len());
            let target = &inner[..len];
            let lead = target.len() - target.trim_start().len();
            let trimmed = target.trim();
            if !trimmed.is_empty() {
                ranges.push((start + lead, start + lead + trimmed.len()));
            }
        }
        offset = start + close + 2;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canvas_file_nodes() {
        let canvas = r#"{"nodes":[
            {"id":"1","type":"file","file":"Child/image.png"},
            {"id":"2","type":"text","text":"hello"},
            {"id":"3","type":"file","file":"Parent/notes.md"},
            {"id":"4","type":"file","file":"Child/image.png"}
        ],"edges":[]}"#;
        let refs = extract_references(ContentKind::Canvas, canvas).unwrap();
        assert_eq!(refs, vec!["Child/image.png", "Parent/notes.md"]);
        assert!(extract_references(ContentKind::Canvas, "{broken").is_err());
    }

    #[test]
    fn test_markdown_links_and_embeds() {
        let text = "See [[Other/idea.md|the idea]] and ![[Child/diagram.png]].\n[[Other/idea.md#Part]] [[ ]]";
        let refs = extract_references(ContentKind::Markdown, text).unwrap();
        assert_eq!(refs, vec!["Other/idea.md", "Child/diagram.png"]);
    }

    #[test]
    fn test_rewrite_keeps_alias_and_other_links() {
        let mapping: HashMap<String, String> =
            [("Child/a.png".to_string(), "Parent/Child/a.png".to_string())].into();

        let md = "![[Child/a.png|cover]] and [[Elsewhere/b.md]]";
        let out = rewrite_references(ContentKind::Markdown, md, &mapping).unwrap().unwrap();
        assert_eq!(out, "![[Parent/Child/a.png|cover]] and [[Elsewhere/b.md]]");
        assert!(rewrite_references(ContentKind::Markdown, &out, &mapping).unwrap().is_none());

        let canvas = r#"{"nodes":[{"id":"1","type":"file","file":"Child/a.png"}]}"#;
        let out = rewrite_references(ContentKind::Canvas, canvas, &mapping).unwrap().unwrap();
        assert_eq!(
            extract_references(ContentKind::Canvas, &out).unwrap(),
            vec!["Parent/Child/a.png"]
        );
    }
}
