//! # Types
//!
//! Core domain types for platen: tenants, workspaces, document types,
//! templates and their versions, injectable values, and the caller-visible
//! error enum.
//!
//! This crate defines the fundamental data structures used throughout the
//! rendering core:
//! - [`Template`] / [`TemplateVersion`] - a named container and its
//!   lifecycle-bearing snapshots
//! - [`VersionStatus`] - the draft / scheduled / published / archived
//!   state machine states
//! - [`TypedValue`] / [`ValueType`] - the seven value shapes an injectable
//!   can produce
//! - [`Error`] - the structured error kinds surfaced to callers
//!
//! ## Serialization
//!
//! All entity types implement `Serialize` and `Deserialize` from `serde`
//! for persistence. Timestamps are `chrono::DateTime<Utc>`; identifiers are
//! stable opaque strings.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use platen_content::Node;

/// Stable opaque identifier. The core never inspects identifier contents.
pub type Id = String;

/// Injectable keys resolved by the renderer itself rather than a plugin or
/// a workspace definition.
pub const SYSTEM_KEYS: &[&str] = &[
    "current_date",
    "current_time",
    "tenant_name",
    "workspace_name",
    "document_type_name",
];

/// Returns true when `code` is a renderer-provided system key.
pub fn is_system_key(code: &str) -> bool {
    SYSTEM_KEYS.contains(&code)
}

/// Top-level isolation boundary. Exactly one tenant carries `is_system`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Id,
    /// Stable short code used in render requests (e.g. `acme`).
    pub code: String,
    pub name: String,
    /// The single system tenant owns the global fallback workspace.
    pub is_system: bool,
}

/// Operational role of a workspace within its tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceKind {
    /// Exactly one per tenant; the fallback target for unresolved lookups.
    System,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceStatus {
    Active,
    Suspended,
}

/// Operational container within a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Id,
    pub tenant_id: Id,
    /// Unique within the tenant.
    pub code: String,
    pub name: String,
    pub kind: WorkspaceKind,
    pub status: WorkspaceStatus,
}

/// Tenant-scoped code identifying a kind of document (e.g. `invoice`).
///
/// Types owned by the system tenant are readable by all tenants but mutable
/// only by their owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentType {
    pub id: Id,
    pub tenant_id: Id,
    /// Unique within the tenant.
    pub code: String,
    /// Localized display names keyed by locale tag.
    pub name: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentType {
    /// Display name for `locale`, falling back to any available name, then
    /// to the code.
    pub fn display_name(&self, locale: &str) -> &str {
        self.name
            .get(locale)
            .or_else(|| self.name.values().next())
            .map(String::as_str)
            .unwrap_or(&self.code)
    }
}

/// A named container for versions within a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: Id,
    pub workspace_id: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<Id>,
    /// Unique within the workspace (case-sensitive).
    pub title: String,
    /// At most one template per (workspace, document type).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_type_id: Option<Id>,
    pub is_public_library: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle state of a [`TemplateVersion`].
///
/// Transitions are enforced by the version lifecycle service; at most one
/// version of a template is `Published` at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionStatus {
    Draft,
    Scheduled,
    Published,
    Archived,
}

impl VersionStatus {
    /// True for states a version can never leave by ordinary edits.
    pub fn is_terminal(self) -> bool {
        matches!(self, VersionStatus::Archived)
    }
}

/// A snapshot of a template's content tree with a lifecycle status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVersion {
    pub id: Id,
    pub template_id: Id,
    /// Monotone, unique per template, starting at 1.
    pub version_number: u32,
    /// Unique per template.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The persisted document tree.
    pub content: Node,
    pub status: VersionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_publish_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Id,
}

/// What a version-level injectable binds to: a renderer system key or a
/// workspace injectable definition. Exactly one, by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectableSource {
    SystemKey(String),
    Definition(Id),
}

/// Per-version display overrides for an injectable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Chosen format token; `None` selects the plugin or type default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// An injectable recorded against a specific version at publish time.
///
/// A version may refer to a soft-deleted definition and must still render
/// using the default recorded here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInjectable {
    pub id: Id,
    pub version_id: Id,
    pub source: InjectableSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<TypedValue>,
    #[serde(default)]
    pub display: DisplayConfig,
}

/// Workspace-scoped injectable definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectableDefinition {
    pub id: Id,
    pub workspace_id: Id,
    /// Unique within the workspace among non-deleted rows.
    pub key: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub data_type: ValueType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<TypedValue>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub is_active: bool,
    /// Soft-delete flag; deleted definitions stay resolvable by id.
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: Id,
    pub workspace_id: Id,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: Id,
    pub workspace_id: Id,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    /// Subject claim from the identity provider.
    pub subject: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipRole {
    Viewer,
    Editor,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub id: Id,
    pub user_id: Id,
    pub workspace_id: Id,
    pub role: MembershipRole,
}

/// One successful render, recorded for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRecord {
    pub id: Id,
    pub template_id: Id,
    pub version_id: Id,
    pub document_type_code: String,
    pub tenant_code: String,
    pub workspace_code: String,
    pub rendered_at: DateTime<Utc>,
}

/// The seven value shapes an injectable can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    String,
    Number,
    Bool,
    Time,
    Image,
    Table,
    List,
}

/// An image value: a source (URL or local path) plus optional dimensions
/// in pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageValue {
    pub src: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

/// Column width as persisted in table attributes and column schemas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnWidth {
    Percent(f64),
    Pixels(f64),
}

impl ColumnWidth {
    /// Parses `"20%"` or `"150px"` forms. Bare numbers are pixels.
    pub fn parse(raw: &str) -> Option<ColumnWidth> {
        let raw = raw.trim();
        if let Some(pct) = raw.strip_suffix('%') {
            return pct.trim().parse().ok().map(ColumnWidth::Percent);
        }
        if let Some(px) = raw.strip_suffix("px") {
            return px.trim().parse().ok().map(ColumnWidth::Pixels);
        }
        raw.parse().ok().map(ColumnWidth::Pixels)
    }
}

/// Ordered column descriptor for TABLE values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub key: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<ColumnWidth>,
}

/// Style fragment for table headers and bodies. Merging is per-field with
/// the overriding side winning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableStyle {
    /// Background fill as a hex color without the leading `#`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    /// Text color as a hex color without the leading `#`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    /// Horizontal alignment: `left`, `center`, or `right`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub align: Option<String>,
}

impl TableStyle {
    /// Returns `self` overridden per-field by `over`.
    pub fn merged(&self, over: &TableStyle) -> TableStyle {
        TableStyle {
            fill: over.fill.clone().or_else(|| self.fill.clone()),
            color: over.color.clone().or_else(|| self.color.clone()),
            bold: over.bold.or(self.bold),
            align: over.align.clone().or_else(|| self.align.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fill.is_none() && self.color.is_none() && self.bold.is_none() && self.align.is_none()
    }
}

/// A TABLE value: columns plus rows of cell text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableValue {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "TableStyle::is_empty")]
    pub header_style: TableStyle,
    #[serde(default, skip_serializing_if = "TableStyle::is_empty")]
    pub body_style: TableStyle,
}

/// A LIST value: items plus optional bullet symbol and header line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListValue {
    pub items: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
}

/// A typed injectable value.
///
/// Serialized with an explicit tag so persisted defaults stay readable:
///
/// ```
/// use platen_types::TypedValue;
///
/// let v: TypedValue = serde_json::from_str(
///     r#"{"type":"number","value":41.5}"#,
/// ).expect("parse");
/// assert_eq!(v.as_number(), 41.5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TypedValue {
    String(String),
    Number(f64),
    Bool(bool),
    Time(DateTime<Utc>),
    Image(ImageValue),
    Table(TableValue),
    List(ListValue),
}

impl TypedValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            TypedValue::String(_) => ValueType::String,
            TypedValue::Number(_) => ValueType::Number,
            TypedValue::Bool(_) => ValueType::Bool,
            TypedValue::Time(_) => ValueType::Time,
            TypedValue::Image(_) => ValueType::Image,
            TypedValue::Table(_) => ValueType::Table,
            TypedValue::List(_) => ValueType::List,
        }
    }

    /// The zero value recorded for a failed non-critical injectable with no
    /// default.
    pub fn zero(value_type: ValueType) -> TypedValue {
        match value_type {
            ValueType::String => TypedValue::String(String::new()),
            ValueType::Number => TypedValue::Number(0.0),
            ValueType::Bool => TypedValue::Bool(false),
            ValueType::Time => TypedValue::Time(DateTime::<Utc>::UNIX_EPOCH),
            ValueType::Image => TypedValue::Image(ImageValue {
                src: String::new(),
                width: None,
                height: None,
            }),
            ValueType::Table => TypedValue::Table(TableValue::default()),
            ValueType::List => TypedValue::List(ListValue::default()),
        }
    }

    /// String representation used by conditional rules and plain text
    /// substitution.
    pub fn display_string(&self) -> String {
        match self {
            TypedValue::String(s) => s.clone(),
            TypedValue::Number(n) => format_number_plain(*n),
            TypedValue::Bool(b) => b.to_string(),
            TypedValue::Time(t) => t.to_rfc3339(),
            TypedValue::Image(img) => img.src.clone(),
            TypedValue::Table(_) => String::new(),
            TypedValue::List(list) => list.items.join(", "),
        }
    }

    /// Numeric coercion used by ordering operators. Unparseable values
    /// coerce to zero.
    pub fn as_number(&self) -> f64 {
        match self {
            TypedValue::Number(n) => *n,
            TypedValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            TypedValue::Time(t) => t.timestamp() as f64,
            TypedValue::String(s) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Emptiness as seen by the `empty` / `not_empty` operators.
    pub fn is_empty(&self) -> bool {
        match self {
            TypedValue::String(s) => s.is_empty(),
            TypedValue::Image(img) => img.src.is_empty(),
            TypedValue::Table(t) => t.rows.is_empty(),
            TypedValue::List(l) => l.items.is_empty(),
            _ => false,
        }
    }
}

/// Renders a number without a trailing `.0` for integral values.
pub fn format_number_plain(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Caller-visible error kinds for the rendering core.
///
/// The HTTP collaborator maps these onto status codes; internals may be
/// wrapped underneath [`Error::Internal`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed request, tree, or assignment.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Entity missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness or assignment conflict; carries the conflicting entity.
    #[error("conflict with \"{title}\" ({id})")]
    Conflict { id: Id, title: String },

    /// Publish-time structural or content validation failed.
    #[error("content validation failed with {} error(s)", .0.len())]
    ValidationFailed(Vec<String>),

    /// The three-tier fallback chain found no published version.
    #[error("no published template resolved for the request")]
    TemplateNotResolved,

    /// Admission deadline elapsed before a render slot freed up.
    #[error("renderer at capacity")]
    RendererBusy,

    /// Typesetter subprocess failed; carries the stderr tail.
    #[error("typesetter failed: {stderr_tail}")]
    RenderFailed { stderr_tail: String },

    /// Caller cancellation observed before completion.
    #[error("cancelled")]
    Cancelled,

    /// Anything else.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Shorthand for an [`Error::Internal`] from a message.
    pub fn internal(msg: impl Into<String>) -> Error {
        Error::Internal(anyhow::anyhow!(msg.into()))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
