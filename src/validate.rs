//! AST types, diagnostics, and the limit validator.
//!
//! Everything the compiler phases exchange lives here: the template AST the
//! parser produces, the `Diagnostic` shape all compile-time errors share, and
//! the configurable resource limits enforced between parsing and island
//! detection.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::expression::Expr;
use crate::vocabulary::TagCategory;

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTIC CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_EXPR_SYNTAX: &str = "ISL-ERR-SYNTAX-001";
pub const ERR_UNBALANCED_BRACES: &str = "ISL-ERR-SYNTAX-002";
pub const ERR_UNKNOWN_COMPONENT: &str = "ISL-ERR-VOCAB-001";
pub const ERR_ORPHAN_BRANCH: &str = "ISL-ERR-STRUCT-001";
pub const ERR_ORPHAN_CASE: &str = "ISL-ERR-STRUCT-002";
pub const ERR_ORPHAN_LOOP_CONTROL: &str = "ISL-ERR-STRUCT-003";

/// The guarantee a diagnostic code protects. Shown alongside the message so
/// authors learn the rule, not just the violation.
fn guarantee(code: &str) -> &'static str {
    match code {
        ERR_EXPR_SYNTAX => "Attribute bindings contain only the closed expression grammar.",
        ERR_UNBALANCED_BRACES => "Every '{' binding has a matching '}'.",
        ERR_UNKNOWN_COMPONENT => "Every tag belongs to the versioned component vocabulary.",
        ERR_ORPHAN_BRANCH => "ElseIf and Else directly follow an If or ElseIf sibling.",
        ERR_ORPHAN_CASE => "Case and Default are direct children of a Switch.",
        ERR_ORPHAN_LOOP_CONTROL => "Break and Continue appear inside a ForEach or Repeat body.",
        _ => "Unknown rule.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOURCE SPANS & DIAGNOSTICS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpan {
    pub line: u32,
    pub column: u32,
    #[serde(default)]
    pub len: u32,
}

impl SourceSpan {
    pub fn new(line: u32, column: u32, len: u32) -> Self {
        Self { line, column, len }
    }
}

/// A compile-time problem with a location. Parsing reports every diagnostic
/// it can find in one pass rather than stopping at the first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub code: String,
    pub message: String,
    pub guarantee: String,
    pub template: String,
    pub span: SourceSpan,
    pub context: Option<String>,
    pub hints: Vec<String>,
}

impl Diagnostic {
    pub fn new(code: &str, message: &str, template: &str, span: SourceSpan) -> Self {
        Self::with_details(code, message, template, span, None, vec![])
    }

    pub fn with_details(
        code: &str,
        message: &str,
        template: &str,
        span: SourceSpan,
        context: Option<String>,
        hints: Vec<String>,
    ) -> Self {
        Diagnostic {
            code: code.to_string(),
            message: message.to_string(),
            guarantee: guarantee(code).to_string(),
            template: template.to_string(),
            span,
            context,
            hints,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEMPLATE AST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TemplateNode {
    Component(ComponentNode),
    Text(TextNode),
    Expression(ExpressionNode),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentNode {
    /// Canonical CamelCase tag name from the vocabulary.
    pub tag: String,
    pub category: TagCategory,
    pub attributes: Vec<Attribute>,
    pub children: Vec<TemplateNode>,
    #[serde(default)]
    pub span: SourceSpan,
}

impl ComponentNode {
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextNode {
    pub value: String,
    #[serde(default)]
    pub span: SourceSpan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionNode {
    pub expr: Expr,
    #[serde(default)]
    pub span: SourceSpan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Static(String),
    Dynamic(Expr),
}

impl AttributeValue {
    pub fn as_static(&self) -> Option<&str> {
        match self {
            AttributeValue::Static(s) => Some(s),
            AttributeValue::Dynamic(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub name: String,
    pub value: AttributeValue,
    #[serde(default)]
    pub span: SourceSpan,
}

/// Output of a successful parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateAst {
    pub template: String,
    pub nodes: Vec<TemplateNode>,
    pub source_bytes: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STRUCTURAL VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Rules that need tree context rather than a vocabulary lookup: conditional
/// chains, switch arms, loop controls. Returns every violation found.
pub fn check_structure(nodes: &[TemplateNode], template: &str) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    check_nodes(nodes, template, false, false, &mut diags);
    diags
}

fn check_nodes(
    nodes: &[TemplateNode],
    template: &str,
    in_loop: bool,
    in_switch: bool,
    diags: &mut Vec<Diagnostic>,
) {
    let mut prev_tag: Option<&str> = None;

    for node in nodes {
        let comp = match node {
            TemplateNode::Component(c) => c,
            // Any text or binding between branches breaks a chain.
            _ => {
                prev_tag = None;
                continue;
            }
        };

        match comp.tag.as_str() {
            "ElseIf" | "Else" => {
                if !matches!(prev_tag, Some("If") | Some("ElseIf")) {
                    diags.push(Diagnostic::with_details(
                        ERR_ORPHAN_BRANCH,
                        &format!("<{}> has no preceding <If> or <ElseIf> sibling.", comp.tag),
                        template,
                        comp.span,
                        Some(format!("<{}>", comp.tag)),
                        vec!["Place the branch immediately after the <If> it extends.".to_string()],
                    ));
                }
            }
            "Case" | "Default" => {
                if !in_switch {
                    diags.push(Diagnostic::new(
                        ERR_ORPHAN_CASE,
                        &format!("<{}> outside of a <Switch>.", comp.tag),
                        template,
                        comp.span,
                    ));
                }
            }
            "Break" | "Continue" => {
                if !in_loop {
                    diags.push(Diagnostic::new(
                        ERR_ORPHAN_LOOP_CONTROL,
                        &format!("<{}> outside of a <ForEach> or <Repeat> body.", comp.tag),
                        template,
                        comp.span,
                    ));
                }
            }
            _ => {}
        }

        let child_in_loop = in_loop || matches!(comp.tag.as_str(), "ForEach" | "Repeat");
        let child_in_switch = comp.tag == "Switch";
        check_nodes(&comp.children, template, child_in_loop, child_in_switch, diags);

        prev_tag = Some(comp.tag.as_str());
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIMITS
// ═══════════════════════════════════════════════════════════════════════════════

/// Resource ceilings for one template. These are configuration, supplied by
/// the host; the defaults mirror the platform's published quotas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Limits {
    pub max_size_bytes: usize,
    pub max_components: usize,
    pub max_islands: usize,
    pub max_computed_vars: usize,
    /// Fraction of a ceiling at which a non-blocking warning is reported.
    pub warn_ratio: f32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_size_bytes: 100 * 1024,
            max_components: 400,
            max_islands: 150,
            max_computed_vars: 75,
            warn_ratio: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LimitMetric {
    SizeBytes,
    Components,
    Islands,
    ComputedVars,
}

impl std::fmt::Display for LimitMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LimitMetric::SizeBytes => "template size (bytes)",
            LimitMetric::Components => "component count",
            LimitMetric::Islands => "interactive component count",
            LimitMetric::ComputedVars => "computed variable count",
        };
        f.write_str(name)
    }
}

/// A hard ceiling was crossed. Compilation stops; no artifact is produced.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{metric} is {actual}, over the limit of {ceiling}: {suggestion}")]
pub struct LimitExceeded {
    pub metric: LimitMetric,
    pub actual: usize,
    pub ceiling: usize,
    pub suggestion: String,
}

/// A soft threshold was crossed. Reported to the author, never blocking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitWarning {
    pub metric: LimitMetric,
    pub actual: usize,
    pub ceiling: usize,
}

fn suggestion_for(metric: LimitMetric) -> &'static str {
    match metric {
        LimitMetric::SizeBytes => "split the page into smaller templates or trim embedded text",
        LimitMetric::Components => "break the page into sections and remove unused components",
        LimitMetric::Islands => {
            "reduce the number of stateful, conditional, looping or event-bearing components"
        }
        LimitMetric::ComputedVars => "fold constant variables together or drop unused ones",
    }
}

/// What the validator measured. Also feeds the artifact's limits snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageCounts {
    pub components: usize,
    pub hydrating: usize,
    pub computed_vars: usize,
    pub size_bytes: usize,
}

/// Count components, hydration-requiring components, and statically
/// computable variable declarations across the tree.
pub fn measure(ast: &TemplateAst) -> UsageCounts {
    let mut counts = UsageCounts {
        size_bytes: ast.source_bytes,
        ..Default::default()
    };
    measure_nodes(&ast.nodes, &mut counts);
    counts
}

fn measure_nodes(nodes: &[TemplateNode], counts: &mut UsageCounts) {
    for node in nodes {
        if let TemplateNode::Component(comp) = node {
            counts.components += 1;
            if comp.category.hydrates() {
                counts.hydrating += 1;
            }
            if comp.tag == "Var" {
                let constant = match comp.attribute("value") {
                    Some(AttributeValue::Static(_)) | None => true,
                    Some(AttributeValue::Dynamic(expr)) => expr.is_constant(),
                };
                if constant {
                    counts.computed_vars += 1;
                }
            }
            measure_nodes(&comp.children, counts);
        }
    }
}

/// Enforce ceilings over a parsed template. Exactly-at-limit passes; one
/// over fails with the metric named. Soft warnings come back on success.
pub fn validate(ast: &TemplateAst, limits: &Limits) -> Result<Vec<LimitWarning>, LimitExceeded> {
    let counts = measure(ast);
    let checks = [
        (LimitMetric::SizeBytes, counts.size_bytes, limits.max_size_bytes),
        (LimitMetric::Components, counts.components, limits.max_components),
        (LimitMetric::Islands, counts.hydrating, limits.max_islands),
        (
            LimitMetric::ComputedVars,
            counts.computed_vars,
            limits.max_computed_vars,
        ),
    ];

    let mut warnings = Vec::new();
    for (metric, actual, ceiling) in checks {
        if actual > ceiling {
            return Err(LimitExceeded {
                metric,
                actual,
                ceiling,
                suggestion: suggestion_for(metric).to_string(),
            });
        }
        if actual > 0 && actual as f32 >= ceiling as f32 * limits.warn_ratio {
            warnings.push(LimitWarning {
                metric,
                actual,
                ceiling,
            });
        }
    }

    Ok(warnings)
}
