//! The persisted document tree.
//!
//! A document is a recursive tree of [`Node`] values. Every node carries a
//! type tag; text nodes carry a literal string and an ordered list of
//! [`Mark`]s; block nodes carry an ordered list of children. The persisted
//! format is JSON:
//!
//! ```json
//! {"type": "doc", "content": [
//!   {"type": "paragraph", "content": [
//!     {"type": "text", "text": "Hello ", "marks": []},
//!     {"type": "injectable", "attrs": {"variable": "customer_name"}}
//!   ]}
//! ]}
//! ```
//!
//! Unknown node types pass through (consumers recurse into their children);
//! unknown marks are dropped with a diagnostic at lowering time.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod logic;

/// Well-known node type tags.
pub mod kinds {
    pub const DOC: &str = "doc";
    pub const PARAGRAPH: &str = "paragraph";
    pub const TEXT: &str = "text";
    pub const HEADING: &str = "heading";
    pub const BULLET_LIST: &str = "bulletList";
    pub const ORDERED_LIST: &str = "orderedList";
    pub const LIST_ITEM: &str = "listItem";
    pub const TABLE: &str = "table";
    pub const TABLE_ROW: &str = "tableRow";
    pub const TABLE_CELL: &str = "tableCell";
    pub const TABLE_HEADER: &str = "tableHeader";
    pub const CONDITIONAL: &str = "conditional";
    pub const INJECTABLE: &str = "injectable";
    pub const IMAGE: &str = "image";
    pub const PAGE_BREAK: &str = "pageBreak";
    pub const HARD_BREAK: &str = "hardBreak";
    pub const HORIZONTAL_RULE: &str = "horizontalRule";
    pub const BLOCKQUOTE: &str = "blockquote";
    pub const CODE_BLOCK: &str = "codeBlock";
}

/// Well-known mark type tags.
pub mod marks {
    pub const BOLD: &str = "bold";
    pub const ITALIC: &str = "italic";
    pub const STRIKE: &str = "strike";
    pub const UNDERLINE: &str = "underline";
    pub const CODE: &str = "code";
    pub const HIGHLIGHT: &str = "highlight";
    pub const LINK: &str = "link";
}

/// A mark applied to a text node (bold, link, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attrs: Map<String, Value>,
}

impl Mark {
    pub fn new(kind: &str) -> Mark {
        Mark {
            kind: kind.to_string(),
            attrs: Map::new(),
        }
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }
}

/// One node of the document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attrs: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<Node>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub marks: Vec<Mark>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Node {
    /// An empty block node of the given kind.
    pub fn block(kind: &str) -> Node {
        Node {
            kind: kind.to_string(),
            attrs: Map::new(),
            content: Vec::new(),
            marks: Vec::new(),
            text: None,
        }
    }

    /// A block node with children.
    pub fn with_children(kind: &str, content: Vec<Node>) -> Node {
        Node {
            content,
            ..Node::block(kind)
        }
    }

    /// A text leaf.
    pub fn text(text: &str) -> Node {
        Node {
            text: Some(text.to_string()),
            ..Node::block(kinds::TEXT)
        }
    }

    /// A text leaf carrying marks.
    pub fn marked_text(text: &str, marks: Vec<Mark>) -> Node {
        Node {
            marks,
            ..Node::text(text)
        }
    }

    pub fn with_attr(mut self, key: &str, value: Value) -> Node {
        self.attrs.insert(key.to_string(), value);
        self
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        self.attrs.get(key).and_then(Value::as_f64)
    }

    pub fn attr_bool(&self, key: &str) -> Option<bool> {
        self.attrs.get(key).and_then(Value::as_bool)
    }

    pub fn is_text(&self) -> bool {
        self.kind == kinds::TEXT
    }

    /// Depth-first walk over this node and all descendants.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Node)) {
        visit(self);
        for child in &self.content {
            child.walk(visit);
        }
    }
}

/// Parse a persisted document tree from JSON.
pub fn parse_document(raw: &str) -> Result<Node> {
    serde_json::from_str(raw).context("failed to parse content tree JSON")
}

/// Serialize a document tree to its persisted JSON form.
///
/// Output is deterministic: object keys are emitted in sorted order, so the
/// same tree always serializes to the same bytes.
pub fn to_json(node: &Node) -> Result<String> {
    serde_json::to_string(node).context("failed to serialize content tree")
}

/// Collect the set of injectable codes referenced anywhere in the tree:
/// injectable nodes, conditional rules (both sides when the right side is a
/// variable), and injectable-bound images.
pub fn referenced_variables(root: &Node) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    root.walk(&mut |node| match node.kind.as_str() {
        kinds::INJECTABLE => {
            if let Some(code) = node.attr_str("variable") {
                out.insert(code.to_string());
            }
        }
        kinds::IMAGE => {
            if let Some(code) = node.attr_str("injectable") {
                out.insert(code.to_string());
            }
        }
        kinds::CONDITIONAL => {
            if let Some(raw) = node.attrs.get("logic")
                && let Ok(group) = logic::parse(raw)
            {
                group.collect_variables(&mut out);
            }
        }
        _ => {}
    });
    out
}

/// Structural (parseability-only) validation, run on draft save.
///
/// Returns a list of human-readable problems; empty means the tree is
/// structurally sound. Full content validation against the injector
/// registry happens at publish time, outside this crate.
pub fn validate_structure(root: &Node) -> Vec<String> {
    let mut errors = Vec::new();
    check_node(root, "doc", &mut errors);
    errors
}

fn check_node(node: &Node, path: &str, errors: &mut Vec<String>) {
    match node.kind.as_str() {
        kinds::TEXT => {
            if node.text.is_none() {
                errors.push(format!("{path}: text node without text"));
            }
            if !node.content.is_empty() {
                errors.push(format!("{path}: text node with children"));
            }
        }
        kinds::BULLET_LIST | kinds::ORDERED_LIST => {
            if node.content.is_empty() {
                errors.push(format!("{path}: empty list"));
            }
            for (i, child) in node.content.iter().enumerate() {
                if child.kind != kinds::LIST_ITEM {
                    errors.push(format!(
                        "{path}/{i}: list child is {:?}, expected listItem",
                        child.kind
                    ));
                }
            }
        }
        kinds::TABLE => {
            for (i, child) in node.content.iter().enumerate() {
                if child.kind != kinds::TABLE_ROW {
                    errors.push(format!(
                        "{path}/{i}: table child is {:?}, expected tableRow",
                        child.kind
                    ));
                }
            }
        }
        kinds::TABLE_ROW => {
            for (i, child) in node.content.iter().enumerate() {
                if child.kind != kinds::TABLE_CELL && child.kind != kinds::TABLE_HEADER {
                    errors.push(format!(
                        "{path}/{i}: row child is {:?}, expected a cell",
                        child.kind
                    ));
                }
            }
        }
        kinds::CONDITIONAL => match node.attrs.get("logic") {
            None => errors.push(format!("{path}: conditional without logic")),
            Some(raw) => {
                if let Err(err) = logic::parse(raw) {
                    errors.push(format!("{path}: bad conditional logic: {err}"));
                }
            }
        },
        kinds::INJECTABLE => {
            if node.attr_str("variable").map(str::trim).unwrap_or("").is_empty() {
                errors.push(format!("{path}: injectable without a variable"));
            }
        }
        kinds::IMAGE => {
            let has_src = !node.attr_str("src").unwrap_or("").is_empty();
            let has_binding = !node.attr_str("injectable").unwrap_or("").is_empty();
            if !has_src && !has_binding {
                errors.push(format!("{path}: image without src or injectable binding"));
            }
        }
        _ => {}
    }

    for (i, child) in node.content.iter().enumerate() {
        check_node(child, &format!("{path}/{i}"), errors);
    }
}
