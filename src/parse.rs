//! Template parser: markup text → AST.
//!
//! The pipeline is a fixed sequence of passes over the source:
//!
//! 1. scan expressions and tag positions on the raw text (spans come from
//!    here; the later passes rewrite the text and lose offsets),
//! 2. replace every balanced `{...}` binding with an inert placeholder so the
//!    HTML parser never sees expression syntax,
//! 3. convert self-closing component tags to open/close pairs (the HTML
//!    parser would otherwise treat `<Var />` as an open tag and swallow the
//!    following siblings as children),
//! 4. rewrite component tags to a neutral `islet-tag` element carrying the
//!    original name in a data attribute — component names would otherwise be
//!    lowercased, and names like `Table` or `TextArea` would trip the HTML
//!    parser's special element handling,
//! 5. parse with html5ever and walk the DOM back into the typed AST,
//!    restoring names, parsing expressions, and batching every diagnostic.
//!
//! Parsing either yields a full AST or the complete list of problems; it
//! never half-succeeds.

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use regex::Regex;
use std::collections::{HashMap, VecDeque};

use crate::expression;
use crate::validate::{
    check_structure, Attribute, AttributeValue, ComponentNode, Diagnostic, ExpressionNode,
    SourceSpan, TemplateAst, TemplateNode, TextNode, ERR_EXPR_SYNTAX, ERR_UNBALANCED_BRACES,
    ERR_UNKNOWN_COMPONENT,
};
use crate::vocabulary;

const MARKER_ELEMENT: &str = "islet-tag";
const MARKER_ATTR: &str = "data-islet-tag";

lazy_static! {
    /// Self-closing component tags, e.g. `<Var name="x" value="0"/>`.
    static ref SELF_CLOSING_RE: Regex =
        Regex::new(r"<([A-Z][a-zA-Z0-9]*)\s*([^>]*?)\s*/>").unwrap();

    /// Opening component tags (capitalized). Group 2 keeps the delimiter.
    static ref TAG_OPEN_RE: Regex = Regex::new(r"<([A-Z][a-zA-Z0-9]*)([\s/>])").unwrap();

    /// Closing component tags.
    static ref TAG_CLOSE_RE: Regex = Regex::new(r"</([A-Z][a-zA-Z0-9]*)\s*>").unwrap();

    /// Expression placeholder pattern.
    static ref EXPR_PLACEHOLDER_RE: Regex = Regex::new(r"__ISLET_EXPR_(\d+)__").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// LINE INDEX
// ═══════════════════════════════════════════════════════════════════════════════

/// Maps character offsets in the raw source to line/column spans.
struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, c) in source.chars().enumerate() {
            if c == '\n' {
                line_starts.push(i + 1);
            }
        }
        Self { line_starts }
    }

    fn span(&self, offset: usize, len: usize) -> SourceSpan {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        SourceSpan::new(
            line as u32 + 1,
            (offset - self.line_starts[line]) as u32 + 1,
            len as u32,
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RAW-SOURCE SCANS
// ═══════════════════════════════════════════════════════════════════════════════

/// Find the end of a balanced `{...}` group, honoring string literals inside
/// the expression. Returns the character index just past the closing brace.
fn find_balanced_brace_end(chars: &[char], start_index: usize) -> Option<usize> {
    let mut depth = 0;
    let mut i = start_index;
    let mut in_string: Option<char> = None;

    while i < chars.len() {
        let c = chars[i];

        if c == '\\' && i + 1 < chars.len() {
            i += 2;
            continue;
        }

        if let Some(quote) = in_string {
            if c == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }

        match c {
            '"' | '\'' => in_string = Some(c),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }

        i += 1;
    }

    None
}

/// One `{...}` binding found in the raw source, in document order. The nth
/// site corresponds to placeholder `__ISLET_EXPR_n__`.
struct ExprSite {
    /// Character offset of the opening brace.
    offset: usize,
    /// Expression text between the braces.
    content: String,
}

fn scan_expressions(
    source: &str,
    template: &str,
    lines: &LineIndex,
    diags: &mut Vec<Diagnostic>,
) -> Vec<ExprSite> {
    let chars: Vec<char> = source.chars().collect();
    let mut sites = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '{' {
            match find_balanced_brace_end(&chars, i) {
                Some(end) => {
                    sites.push(ExprSite {
                        offset: i,
                        content: chars[i + 1..end - 1].iter().collect(),
                    });
                    i = end;
                    continue;
                }
                None => {
                    diags.push(Diagnostic::new(
                        ERR_UNBALANCED_BRACES,
                        "unclosed '{' binding",
                        template,
                        lines.span(i, 1),
                    ));
                    // Leave the rest as literal text, matching normalization.
                    break;
                }
            }
        }
        i += 1;
    }

    sites
}

/// Character offsets of every `<Name` occurrence, queued per lowercased
/// name. The DOM walk pops these in traversal order to recover spans.
fn scan_tag_offsets(source: &str) -> HashMap<String, VecDeque<(usize, usize)>> {
    let chars: Vec<char> = source.chars().collect();
    let mut sites: HashMap<String, VecDeque<(usize, usize)>> = HashMap::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        // Bindings may contain '<'; skip them wholesale.
        if c == '{' {
            if let Some(end) = find_balanced_brace_end(&chars, i) {
                i = end;
                continue;
            }
        }
        if c == '<' && i + 1 < chars.len() && chars[i + 1].is_ascii_alphabetic() {
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && chars[end].is_ascii_alphanumeric() {
                end += 1;
            }
            let name: String = chars[start..end].iter().collect();
            sites
                .entry(name.to_ascii_lowercase())
                .or_default()
                .push_back((i, end - i));
        }
        i += 1;
    }

    sites
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEXT REWRITE PASSES
// ═══════════════════════════════════════════════════════════════════════════════

/// Replace every balanced `{...}` with `__ISLET_EXPR_n__`. Enumeration order
/// matches [`scan_expressions`] over the raw source; the passes in between
/// never add or remove braces.
fn normalize_all_expressions(html: &str) -> String {
    let chars: Vec<char> = html.chars().collect();
    let mut normalized = String::new();
    let mut expr_counter = 0;
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '{' {
            if let Some(end) = find_balanced_brace_end(&chars, i) {
                normalized.push_str(&format!("__ISLET_EXPR_{}__", expr_counter));
                expr_counter += 1;
                i = end;
                continue;
            }
        }
        normalized.push(chars[i]);
        i += 1;
    }

    normalized
}

fn convert_self_closing_components(html: &str) -> String {
    SELF_CLOSING_RE.replace_all(html, "<$1 $2></$1>").to_string()
}

/// Rewrite `<Name ...>` to `<islet-tag data-islet-tag="Name" ...>` and
/// `</Name>` to `</islet-tag>`. A neutral custom element parses identically
/// everywhere in the document, so no component name can collide with the
/// HTML parser's special elements.
fn mark_component_tags(html: &str) -> String {
    let marked = TAG_OPEN_RE.replace_all(html, |caps: &regex::Captures| {
        format!("<{} {}=\"{}\"{}", MARKER_ELEMENT, MARKER_ATTR, &caps[1], &caps[2])
    });
    TAG_CLOSE_RE
        .replace_all(&marked, format!("</{}>", MARKER_ELEMENT).as_str())
        .to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// DOM → AST
// ═══════════════════════════════════════════════════════════════════════════════

struct ParseCtx<'a> {
    template: &'a str,
    lines: LineIndex,
    expr_sites: Vec<ExprSite>,
    tag_sites: HashMap<String, VecDeque<(usize, usize)>>,
    diags: Vec<Diagnostic>,
}

impl<'a> ParseCtx<'a> {
    fn tag_span(&mut self, lower_name: &str) -> SourceSpan {
        self.tag_sites
            .get_mut(lower_name)
            .and_then(|q| q.pop_front())
            .map(|(offset, len)| self.lines.span(offset, len))
            .unwrap_or_default()
    }

    /// Parse the expression behind a placeholder index, reporting syntax
    /// errors at their true source position.
    fn parse_site(&mut self, index: usize) -> Option<expression::Expr> {
        let (offset, content) = {
            let site = self.expr_sites.get(index)?;
            (site.offset, site.content.clone())
        };
        match expression::parse(&content) {
            Ok(expr) => Some(expr),
            Err(e) => {
                let span = self.lines.span(offset + 1 + e.offset, 1);
                self.diags.push(Diagnostic::new(
                    ERR_EXPR_SYNTAX,
                    &format!("invalid expression: {}", e.message),
                    self.template,
                    span,
                ));
                None
            }
        }
    }
}

/// Turn an attribute value that may contain placeholders into a static
/// string or a bound expression. Mixed content (`"post-__ISLET_EXPR_0__"`)
/// becomes a string concatenation.
fn parse_attribute_value(raw: &str, ctx: &mut ParseCtx) -> AttributeValue {
    if !EXPR_PLACEHOLDER_RE.is_match(raw) {
        return AttributeValue::Static(raw.to_string());
    }

    let mut parts: Vec<expression::Expr> = Vec::new();
    let mut last_end = 0;
    for caps in EXPR_PLACEHOLDER_RE.captures_iter(raw) {
        let m = caps.get(0).unwrap();
        if m.start() > last_end {
            parts.push(expression::Expr::Str {
                value: raw[last_end..m.start()].to_string(),
            });
        }
        let index: usize = caps[1].parse().unwrap_or(usize::MAX);
        match ctx.parse_site(index) {
            Some(expr) => parts.push(expr),
            None => return AttributeValue::Static(raw.to_string()),
        }
        last_end = m.end();
    }
    if last_end < raw.len() {
        parts.push(expression::Expr::Str {
            value: raw[last_end..].to_string(),
        });
    }

    let mut iter = parts.into_iter();
    let first = iter.next().expect("at least one placeholder matched");
    let combined = iter.fold(first, |acc, part| expression::Expr::Binary {
        op: expression::BinOp::Add,
        lhs: Box::new(acc),
        rhs: Box::new(part),
    });
    AttributeValue::Dynamic(combined)
}

/// Split a text node around expression placeholders. Whitespace-only text is
/// discarded.
fn process_text(text: &str, span: SourceSpan, ctx: &mut ParseCtx) -> Vec<TemplateNode> {
    let mut nodes = Vec::new();
    let mut last_end = 0;

    for caps in EXPR_PLACEHOLDER_RE.captures_iter(text) {
        let m = caps.get(0).unwrap();
        if m.start() > last_end {
            let before = &text[last_end..m.start()];
            if !before.trim().is_empty() {
                nodes.push(TemplateNode::Text(TextNode {
                    value: before.to_string(),
                    span,
                }));
            }
        }
        let index: usize = caps[1].parse().unwrap_or(usize::MAX);
        let expr_span = ctx
            .expr_sites
            .get(index)
            .map(|s| ctx.lines.span(s.offset, s.content.chars().count() + 2))
            .unwrap_or(span);
        if let Some(expr) = ctx.parse_site(index) {
            nodes.push(TemplateNode::Expression(ExpressionNode {
                expr,
                span: expr_span,
            }));
        }
        last_end = m.end();
    }

    if last_end < text.len() {
        let after = &text[last_end..];
        if !after.trim().is_empty() {
            nodes.push(TemplateNode::Text(TextNode {
                value: after.to_string(),
                span,
            }));
        }
    }

    nodes
}

fn walk_dom(handle: &Handle, parent_span: SourceSpan, ctx: &mut ParseCtx) -> Vec<TemplateNode> {
    match &handle.data {
        NodeData::Document => {
            let mut nodes = Vec::new();
            for child in handle.children.borrow().iter() {
                nodes.extend(walk_dom(child, parent_span, ctx));
            }
            nodes
        }

        NodeData::Text { contents } => {
            let text = contents.borrow().to_string();
            process_text(&text, parent_span, ctx)
        }

        NodeData::Element { name, attrs, .. } => {
            let element_name = name.local.to_string();

            // html5ever synthesizes these wrappers; template sources never
            // declare a document shell, so flatten them unconditionally.
            if element_name == "html" || element_name == "head" || element_name == "body" {
                let mut nodes = Vec::new();
                for child in handle.children.borrow().iter() {
                    nodes.extend(walk_dom(child, parent_span, ctx));
                }
                return nodes;
            }

            // Recover the authored tag name: marked components carry it in
            // the marker attribute, lowercase-authored tags keep their own.
            let attributes = attrs.borrow();
            let original_name = attributes
                .iter()
                .find(|a| a.name.local.as_ref() == MARKER_ATTR)
                .map(|a| a.value.to_string())
                .unwrap_or(element_name);

            let span = ctx.tag_span(&original_name.to_ascii_lowercase());

            let spec = vocabulary::lookup(&original_name);
            if spec.is_none() {
                ctx.diags.push(Diagnostic::with_details(
                    ERR_UNKNOWN_COMPONENT,
                    &format!("<{}> is not a known component.", original_name),
                    ctx.template,
                    span,
                    Some(format!("<{}>", original_name)),
                    vec!["Check the component reference for the supported tags.".to_string()],
                ));
            }

            let mut parsed_attrs = Vec::new();
            for attr in attributes.iter() {
                let attr_name = attr.name.local.to_string();
                if attr_name == MARKER_ATTR {
                    continue;
                }
                let value = parse_attribute_value(&attr.value, ctx);
                parsed_attrs.push(Attribute {
                    name: attr_name,
                    value,
                    span,
                });
            }
            drop(attributes);

            let mut children = Vec::new();
            for child in handle.children.borrow().iter() {
                children.extend(walk_dom(child, span, ctx));
            }

            match spec {
                Some(spec) => vec![TemplateNode::Component(ComponentNode {
                    tag: spec.canonical.to_string(),
                    category: spec.category,
                    attributes: parsed_attrs,
                    children,
                    span,
                })],
                // Unknown tag: the diagnostic is already recorded; surface
                // the children so their problems are reported too.
                None => children,
            }
        }

        NodeData::Doctype { .. }
        | NodeData::Comment { .. }
        | NodeData::ProcessingInstruction { .. } => vec![],
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse template markup into an AST, or return every syntax, vocabulary and
/// structure problem found. `template` names the source in diagnostics.
pub fn parse(source: &str, template: &str) -> Result<TemplateAst, Vec<Diagnostic>> {
    let lines = LineIndex::new(source);
    let mut diags = Vec::new();

    let expr_sites = scan_expressions(source, template, &lines, &mut diags);
    let tag_sites = scan_tag_offsets(source);

    let normalized = normalize_all_expressions(source);
    let converted = convert_self_closing_components(&normalized);
    let marked = mark_component_tags(&converted);

    let dom = parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut marked.as_bytes())
        .map_err(|e| {
            vec![Diagnostic::new(
                ERR_UNBALANCED_BRACES,
                &format!("failed to read template: {}", e),
                template,
                SourceSpan::default(),
            )]
        })?;

    let mut ctx = ParseCtx {
        template,
        lines,
        expr_sites,
        tag_sites,
        diags,
    };

    let nodes = walk_dom(&dom.document, SourceSpan::default(), &mut ctx);

    let mut diags = ctx.diags;
    diags.extend(check_structure(&nodes, template));

    if diags.is_empty() {
        Ok(TemplateAst {
            template: template.to_string(),
            nodes,
            source_bytes: source.len(),
        })
    } else {
        Err(diags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_balanced_brace() {
        let chars: Vec<char> = "{hello}".chars().collect();
        assert_eq!(find_balanced_brace_end(&chars, 0), Some(7));

        let chars: Vec<char> = "{a + b}".chars().collect();
        assert_eq!(find_balanced_brace_end(&chars, 0), Some(7));

        let chars: Vec<char> = "{'brace } inside'}".chars().collect();
        assert_eq!(find_balanced_brace_end(&chars, 0), Some(18));

        let chars: Vec<char> = "{open".chars().collect();
        assert_eq!(find_balanced_brace_end(&chars, 0), None);
    }

    #[test]
    fn test_normalize_expressions() {
        let normalized = normalize_all_expressions("<Text>{count}</Text>");
        assert_eq!(normalized, "<Text>__ISLET_EXPR_0__</Text>");
    }

    #[test]
    fn test_convert_self_closing() {
        assert_eq!(
            convert_self_closing_components("<Divider />"),
            "<Divider ></Divider>"
        );
        let converted = convert_self_closing_components(
            &normalize_all_expressions("<Break when=\"{i > 2}\"/>"),
        );
        assert!(converted.contains("</Break>"));
    }

    #[test]
    fn test_mark_component_tags() {
        let marked = mark_component_tags("<Card><Text>hi</Text></Card>");
        assert_eq!(
            marked,
            "<islet-tag data-islet-tag=\"Card\"><islet-tag data-islet-tag=\"Text\">hi</islet-tag></islet-tag>"
        );
    }

    #[test]
    fn test_line_index() {
        let idx = LineIndex::new("ab\ncd\nef");
        assert_eq!(idx.span(0, 2), SourceSpan::new(1, 1, 2));
        assert_eq!(idx.span(3, 1), SourceSpan::new(2, 1, 1));
        assert_eq!(idx.span(7, 1), SourceSpan::new(3, 2, 1));
    }
}
