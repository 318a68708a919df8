//! Lowering of document trees to Typst markup.
//!
//! [`lower`] is a pure function over the tree, the resolved injectable
//! values, the recorded defaults, and the locale. It dispatches on node
//! type, evaluates conditionals, substitutes injectable values, rewrites
//! remote image URLs to their per-render local filenames, and emits
//! markup with correct escaping. Unknown node types recurse into their
//! children; unknown marks are dropped with a diagnostic.

use std::collections::BTreeMap;

use serde_json::Value;

use platen_content::{Node, kinds, logic, marks};
use platen_images::{ImageSession, is_remote};
use platen_inject::{Injector, Registry};
use platen_types::{
    ColumnSpec, ColumnWidth, DisplayConfig, TableStyle, TableValue, TypedValue,
    format_number_plain,
};

pub mod conditions;
pub mod escape;
pub mod format;

pub use escape::{escape_text, string_literal};

/// Everything the lowerer reads. All maps are keyed by injectable code.
pub struct LowerInput<'a> {
    pub tree: &'a Node,
    /// Values produced by the dependency resolver, plus system keys and
    /// caller-supplied definition values.
    pub resolved: &'a BTreeMap<String, TypedValue>,
    /// Defaults recorded on the version's injectables.
    pub version_defaults: &'a BTreeMap<String, TypedValue>,
    /// Defaults from workspace injectable definitions.
    pub definition_defaults: &'a BTreeMap<String, TypedValue>,
    /// Per-version display overrides.
    pub display: &'a BTreeMap<String, DisplayConfig>,
    /// Labels from definitions, for the unresolved placeholder.
    pub labels: &'a BTreeMap<String, String>,
    pub registry: &'a Registry,
    pub locale: &'a str,
}

/// Lowered markup plus bookkeeping.
#[derive(Debug)]
pub struct Lowered {
    pub source: String,
    pub page_breaks: u32,
    pub diagnostics: Vec<String>,
}

/// Lower a document tree to Typst source.
pub fn lower(input: &LowerInput<'_>, images: &mut ImageSession) -> Lowered {
    let mut emitter = Emitter {
        input,
        images,
        out: String::new(),
        page_breaks: 0,
        diagnostics: Vec::new(),
    };
    emitter.run();
    Lowered {
        source: emitter.out,
        page_breaks: emitter.page_breaks,
        diagnostics: emitter.diagnostics,
    }
}

struct Emitter<'a, 'b> {
    input: &'a LowerInput<'a>,
    images: &'b mut ImageSession,
    out: String,
    page_breaks: u32,
    diagnostics: Vec<String>,
}

impl Emitter<'_, '_> {
    fn run(&mut self) {
        if self.input.tree.kind == kinds::DOC {
            for child in &self.input.tree.content {
                self.block(child);
            }
        } else {
            let root = self.input.tree;
            self.block(root);
        }
    }

    fn block(&mut self, node: &Node) {
        match node.kind.as_str() {
            kinds::PARAGRAPH => {
                let inline = self.inline_children(node);
                self.out.push_str(&inline);
                self.out.push_str("\n\n");
            }
            kinds::HEADING => {
                let level = node
                    .attr_f64("level")
                    .map(|l| l as u32)
                    .unwrap_or(1)
                    .clamp(1, 6);
                let inline = self.inline_children(node);
                self.out
                    .push_str(&format!("#heading(level: {level})[{inline}]\n\n"));
            }
            kinds::BLOCKQUOTE => {
                let inline = node
                    .content
                    .iter()
                    .map(|child| self.inline(child))
                    .collect::<Vec<_>>()
                    .join(" ");
                self.out
                    .push_str(&format!("#quote(block: true)[{inline}]\n\n"));
            }
            kinds::CODE_BLOCK => {
                let lang = node.attr_str("language").unwrap_or("");
                let text: String = node
                    .content
                    .iter()
                    .filter_map(|child| child.text.as_deref())
                    .collect();
                self.out.push_str(&format!("```{lang}\n{text}\n```\n\n"));
            }
            kinds::HORIZONTAL_RULE => self.out.push_str("#line(length: 100%)\n\n"),
            kinds::PAGE_BREAK => {
                self.page_breaks += 1;
                self.out.push_str("#pagebreak()\n\n");
            }
            kinds::BULLET_LIST | kinds::ORDERED_LIST => {
                self.list(node, 0);
                self.out.push('\n');
            }
            kinds::TABLE => self.table_node(node),
            kinds::CONDITIONAL => {
                if self.conditional_holds(node) {
                    for child in &node.content {
                        self.block(child);
                    }
                }
            }
            kinds::IMAGE => {
                let markup = self.image_node(node);
                if !markup.is_empty() {
                    self.out.push_str(&markup);
                    self.out.push_str("\n\n");
                }
            }
            kinds::INJECTABLE | kinds::TEXT => {
                let inline = self.inline(node);
                if !inline.is_empty() {
                    self.out.push_str(&inline);
                    self.out.push_str("\n\n");
                }
            }
            _ => {
                for child in &node.content {
                    self.block(child);
                }
            }
        }
    }

    fn inline_children(&mut self, node: &Node) -> String {
        node.content
            .iter()
            .map(|child| self.inline(child))
            .collect()
    }

    fn inline(&mut self, node: &Node) -> String {
        match node.kind.as_str() {
            kinds::TEXT => self.styled_text(node),
            kinds::INJECTABLE => self.injectable(node),
            kinds::IMAGE => self.image_node(node),
            kinds::HARD_BREAK => "#linebreak()".to_string(),
            kinds::CONDITIONAL => {
                if self.conditional_holds(node) {
                    self.inline_children(node)
                } else {
                    String::new()
                }
            }
            _ => self.inline_children(node),
        }
    }

    /// Marks compose outermost-first: the first mark in the list wraps
    /// everything after it. A code mark replaces body escaping with a raw
    /// span carrying the literal text.
    fn styled_text(&mut self, node: &Node) -> String {
        let raw = node.text.as_deref().unwrap_or("");
        let has_code = node.marks.iter().any(|m| m.kind == marks::CODE);

        let mut rendered = if has_code {
            format!("#raw({})", string_literal(raw))
        } else {
            escape_text(raw)
        };

        for mark in node.marks.iter().rev() {
            rendered = match mark.kind.as_str() {
                marks::CODE => rendered,
                marks::BOLD => format!("#strong[{rendered}]"),
                marks::ITALIC => format!("#emph[{rendered}]"),
                marks::STRIKE => format!("#strike[{rendered}]"),
                marks::UNDERLINE => format!("#underline[{rendered}]"),
                marks::HIGHLIGHT => format!("#highlight[{rendered}]"),
                marks::LINK => match mark.attr_str("href") {
                    Some(href) => {
                        format!("#link({})[{rendered}]", string_literal(href))
                    }
                    None => {
                        self.diagnostics
                            .push("link mark without href dropped".to_string());
                        rendered
                    }
                },
                other => {
                    self.diagnostics
                        .push(format!("unknown mark {other:?} dropped"));
                    rendered
                }
            };
        }
        rendered
    }

    /// Value lookup without node-level overrides: resolver output, then the
    /// version default, then the definition default.
    fn effective_value(&self, code: &str) -> Option<TypedValue> {
        self.input
            .resolved
            .get(code)
            .or_else(|| self.input.version_defaults.get(code))
            .or_else(|| self.input.definition_defaults.get(code))
            .cloned()
    }

    fn injectable(&mut self, node: &Node) -> String {
        let Some(code) = node.attr_str("variable") else {
            return String::new();
        };

        let display = self
            .input
            .display
            .get(code)
            .cloned()
            .unwrap_or_default();
        let injector = self.input.registry.get(code).map(|i| i.as_ref());

        let value = self
            .input
            .resolved
            .get(code)
            .cloned()
            .or_else(|| {
                node.attr_str("default")
                    .map(|d| TypedValue::String(d.to_string()))
            })
            .or_else(|| self.input.version_defaults.get(code).cloned())
            .or_else(|| self.input.definition_defaults.get(code).cloned());

        let Some(value) = value else {
            let label = display
                .label
                .as_deref()
                .or_else(|| self.input.registry.translation(code, self.input.locale))
                .or_else(|| self.input.labels.get(code).map(String::as_str))
                .unwrap_or(code);
            return format!("#emph[\\[{}\\]]", escape_text(label));
        };

        match value {
            TypedValue::Image(img) => self.image_markup(&img.src, img.width, img.height),
            TypedValue::Table(table) => self.table_value(&table, injector),
            TypedValue::List(list) => self.list_value(&list, injector),
            scalar => {
                let token = node
                    .attr_str("format")
                    .map(str::to_string)
                    .or_else(|| display.format.clone())
                    .or_else(|| injector.and_then(|i| i.formats()).map(|f| f.default));
                let prefix = node
                    .attr_str("prefix")
                    .map(str::to_string)
                    .or_else(|| display.prefix.clone())
                    .unwrap_or_default();
                let suffix = node
                    .attr_str("suffix")
                    .map(str::to_string)
                    .or_else(|| display.suffix.clone())
                    .unwrap_or_default();

                format!(
                    "{}{}{}",
                    escape_text(&prefix),
                    escape_text(&format::format_value(&scalar, token.as_deref())),
                    escape_text(&suffix),
                )
            }
        }
    }

    fn conditional_holds(&mut self, node: &Node) -> bool {
        let Some(raw) = node.attrs.get("logic") else {
            self.diagnostics
                .push("conditional without logic evaluates false".to_string());
            return false;
        };
        match logic::parse(raw) {
            Ok(group) => conditions::eval_group(&group, &|code| self.effective_value(code)),
            Err(err) => {
                self.diagnostics
                    .push(format!("conditional with bad logic evaluates false: {err}"));
                false
            }
        }
    }

    fn image_node(&mut self, node: &Node) -> String {
        let bound = node.attr_str("injectable").and_then(|code| {
            match self.effective_value(code) {
                Some(TypedValue::Image(img)) if !img.src.is_empty() => Some(img.src),
                _ => None,
            }
        });
        let src = match bound {
            Some(src) => src,
            None => node.attr_str("src").unwrap_or("").to_string(),
        };
        if src.is_empty() {
            self.diagnostics
                .push("image without a usable source skipped".to_string());
            return String::new();
        }
        self.image_markup(&src, node.attr_f64("width"), node.attr_f64("height"))
    }

    fn image_markup(&mut self, src: &str, width: Option<f64>, height: Option<f64>) -> String {
        let path = if is_remote(src) {
            self.images.local_name(src)
        } else {
            src.to_string()
        };

        let mut call = format!("#image({}", string_literal(&path));
        if let Some(w) = width {
            call.push_str(&format!(", width: {}pt", format_number_plain(w * 0.75)));
        }
        if let Some(h) = height {
            call.push_str(&format!(", height: {}pt", format_number_plain(h * 0.75)));
        }
        call.push(')');
        call
    }

    fn list(&mut self, node: &Node, depth: usize) {
        let style = node.attr_str("style");
        let ordered = node.kind == kinds::ORDERED_LIST;
        let task = !ordered && style == Some("task");

        let (marker, set_rule, reset_rule) = if ordered {
            match style {
                Some("roman") => (
                    "+",
                    Some("#set enum(numbering: \"i.\")"),
                    Some("#set enum(numbering: \"1.\")"),
                ),
                Some("letter") => (
                    "+",
                    Some("#set enum(numbering: \"a.\")"),
                    Some("#set enum(numbering: \"1.\")"),
                ),
                _ => ("+", None, None),
            }
        } else {
            match style {
                Some("dash") => (
                    "-",
                    Some("#set list(marker: [--])"),
                    Some("#set list(marker: auto)"),
                ),
                _ => ("-", None, None),
            }
        };

        if depth == 0
            && let Some(rule) = set_rule
        {
            self.out.push_str(rule);
            self.out.push('\n');
        }

        for item in &node.content {
            let mut inline_parts = Vec::new();
            let mut nested = Vec::new();
            for child in &item.content {
                if child.kind == kinds::BULLET_LIST || child.kind == kinds::ORDERED_LIST {
                    nested.push(child);
                } else {
                    inline_parts.push(self.inline(child));
                }
            }

            let checkbox = if task {
                if item.attr_bool("checked") == Some(true) {
                    "☑ "
                } else {
                    "☐ "
                }
            } else {
                ""
            };

            self.out.push_str(&format!(
                "{}{marker} {checkbox}{}\n",
                "  ".repeat(depth),
                inline_parts.join(" "),
            ));
            for sub in nested {
                self.list(sub, depth + 1);
            }
        }

        if depth == 0
            && let Some(rule) = reset_rule
        {
            self.out.push_str(rule);
            self.out.push('\n');
        }
    }

    fn table_node(&mut self, node: &Node) {
        let rows: Vec<&Node> = node
            .content
            .iter()
            .filter(|child| child.kind == kinds::TABLE_ROW)
            .collect();

        let widths: Vec<Option<ColumnWidth>> = node
            .attrs
            .get("columnWidths")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .map(|v| v.as_str().and_then(ColumnWidth::parse))
                    .collect()
            })
            .unwrap_or_default();

        let column_count = rows
            .iter()
            .map(|row| row.content.len())
            .max()
            .unwrap_or(0)
            .max(widths.len());
        if column_count == 0 {
            return;
        }

        let columns: Vec<String> = (0..column_count)
            .map(|i| column_width(widths.get(i).copied().flatten()))
            .collect();

        let header_style = parse_style(node.attrs.get("headerStyle"));
        let body_style = parse_style(node.attrs.get("bodyStyle"));

        let header = rows
            .first()
            .copied()
            .filter(|row| {
                row.content
                    .iter()
                    .any(|cell| cell.kind == kinds::TABLE_HEADER)
            })
            .map(|row| {
                row.content
                    .iter()
                    .map(|cell| self.inline_children(cell))
                    .collect::<Vec<_>>()
            });
        let body: Vec<Vec<String>> = rows
            .iter()
            .skip(if header.is_some() { 1 } else { 0 })
            .map(|row| {
                row.content
                    .iter()
                    .map(|cell| self.inline_children(cell))
                    .collect()
            })
            .collect();

        let markup = render_table(&columns, header.as_deref(), &body, &header_style, &body_style);
        self.out.push_str(&markup);
    }

    fn table_value(&mut self, table: &TableValue, injector: Option<&dyn Injector>) -> String {
        let specs: Vec<ColumnSpec> = if table.columns.is_empty() {
            injector.and_then(|i| i.column_schema()).unwrap_or_default()
        } else {
            table.columns.clone()
        };

        let column_count = specs
            .len()
            .max(table.rows.iter().map(Vec::len).max().unwrap_or(0));
        if column_count == 0 {
            return String::new();
        }

        let columns: Vec<String> = (0..column_count)
            .map(|i| column_width(specs.get(i).and_then(|s| s.width)))
            .collect();

        // Schema base style: bold headers unless the value overrides.
        let base_header = TableStyle {
            bold: Some(true),
            ..TableStyle::default()
        };
        let header_style = base_header.merged(&table.header_style);
        let body_style = TableStyle::default().merged(&table.body_style);

        let header: Option<Vec<String>> = if specs.iter().any(|s| !s.title.is_empty()) {
            Some(
                (0..column_count)
                    .map(|i| {
                        specs
                            .get(i)
                            .map(|s| escape_text(&s.title))
                            .unwrap_or_default()
                    })
                    .collect(),
            )
        } else {
            None
        };

        let body: Vec<Vec<String>> = table
            .rows
            .iter()
            .map(|row| row.iter().map(|cell| escape_text(cell)).collect())
            .collect();

        render_table(&columns, header.as_deref(), &body, &header_style, &body_style)
    }

    fn list_value(
        &mut self,
        list: &platen_types::ListValue,
        injector: Option<&dyn Injector>,
    ) -> String {
        let schema = injector.and_then(|i| i.list_schema()).unwrap_or_default();
        let symbol = list.symbol.clone().or(schema.symbol);
        let header = list.header.clone().or(schema.header);

        let mut out = String::new();
        if let Some(header) = header {
            out.push_str(&format!("#strong[{}]\n", escape_text(&header)));
        }
        if let Some(symbol) = &symbol {
            out.push_str(&format!("#set list(marker: [{}])\n", escape_text(symbol)));
        }
        for item in &list.items {
            out.push_str(&format!("- {}\n", escape_text(item)));
        }
        if symbol.is_some() {
            out.push_str("#set list(marker: auto)\n");
        }
        out
    }
}

/// Column width markup: percentages pass through, pixels convert to points
/// at ×0.75, missing widths default to `1fr`.
fn column_width(width: Option<ColumnWidth>) -> String {
    match width {
        Some(ColumnWidth::Percent(p)) => format!("{}%", format_number_plain(p)),
        Some(ColumnWidth::Pixels(px)) => format!("{}pt", format_number_plain(px * 0.75)),
        None => "1fr".to_string(),
    }
}

fn parse_style(raw: Option<&Value>) -> TableStyle {
    raw.and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

fn style_cell(content: &str, style: &TableStyle) -> String {
    let mut cell = content.to_string();
    if style.bold == Some(true) {
        cell = format!("#strong[{cell}]");
    }
    if let Some(color) = &style.color {
        cell = format!("#text(fill: rgb(\"{color}\"))[{cell}]");
    }
    format!("[{cell}]")
}

fn render_table(
    columns: &[String],
    header: Option<&[String]>,
    body: &[Vec<String>],
    header_style: &TableStyle,
    body_style: &TableStyle,
) -> String {
    let mut out = String::from("#table(\n");
    out.push_str(&format!("  columns: ({}),\n", columns.join(", ")));

    if let Some(align) = &body_style.align
        && matches!(align.as_str(), "left" | "center" | "right")
    {
        out.push_str(&format!("  align: {align},\n"));
    }

    match (&header_style.fill, &body_style.fill) {
        (Some(h), Some(b)) => out.push_str(&format!(
            "  fill: (x, y) => if y == 0 {{ rgb(\"{h}\") }} else {{ rgb(\"{b}\") }},\n"
        )),
        (Some(h), None) => out.push_str(&format!(
            "  fill: (x, y) => if y == 0 {{ rgb(\"{h}\") }} else {{ none }},\n"
        )),
        (None, Some(b)) => out.push_str(&format!("  fill: rgb(\"{b}\"),\n")),
        (None, None) => {}
    }

    if let Some(cells) = header {
        let cells: Vec<String> = cells
            .iter()
            .map(|cell| style_cell(cell, header_style))
            .collect();
        out.push_str(&format!("  table.header({}),\n", cells.join(", ")));
    }

    for row in body {
        let cells: Vec<String> = row
            .iter()
            .map(|cell| style_cell(cell, body_style))
            .collect();
        out.push_str(&format!("  {},\n", cells.join(", ")));
    }

    out.push_str(")\n\n");
    out
}
