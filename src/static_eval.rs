//! Prop precomputation for islands.
//!
//! Everything knowable at compile time is computed once and stored in the
//! artifact, so the hydration runtime reads values instead of re-deriving
//! them on first paint. Expressions that need runtime data (session user,
//! fetched page content, declared variables) are kept as descriptors: the
//! partially folded expression plus the variables it still depends on.
//!
//! Precomputation is pure: the same island yields byte-identical output.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::expression::{self, Expr};
use crate::islands::Island;
use crate::validate::{AttributeValue, TemplateNode};

/// A prop the runtime must resolve while the island mounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropDescriptor {
    pub name: String,
    /// Expression with its constant subtrees already collapsed.
    pub expr: Expr,
    /// Variables the expression reads, for change tracking.
    pub deps: Vec<String>,
}

/// Interpret a bare attribute string as a literal where the text happens to
/// be one (`value="0"`, `source="[1,2,3]"`, `when="false"`); anything else
/// stays a string.
pub fn static_literal(s: &str) -> Value {
    expression::parse(s)
        .ok()
        .and_then(|e| e.fold())
        .unwrap_or_else(|| Value::String(s.to_string()))
}

/// Compile-time value of an attribute, if it has one.
pub fn attr_literal(value: Option<&AttributeValue>) -> Option<Value> {
    match value? {
        AttributeValue::Static(s) => Some(static_literal(s)),
        AttributeValue::Dynamic(e) => e.fold(),
    }
}

/// Split an island root's attributes into precomputed props and runtime
/// descriptors, preserving attribute order.
pub fn precompute_props(nodes: &[TemplateNode]) -> (Map<String, Value>, Vec<PropDescriptor>) {
    let mut props = Map::new();
    let mut descriptors = Vec::new();

    let root = match nodes.first() {
        Some(TemplateNode::Component(c)) => c,
        _ => return (props, descriptors),
    };

    for attr in &root.attributes {
        match &attr.value {
            AttributeValue::Static(s) => {
                props.insert(attr.name.clone(), static_literal(s));
            }
            AttributeValue::Dynamic(expr) => match expr.fold() {
                Some(v) => {
                    props.insert(attr.name.clone(), v);
                }
                None => descriptors.push(PropDescriptor {
                    name: attr.name.clone(),
                    expr: expr.fold_constants(),
                    deps: expr.deps(),
                }),
            },
        }
    }

    (props, descriptors)
}

/// Collapse constant subexpressions everywhere in an island subtree, so the
/// runtime never evaluates arithmetic the compiler already settled.
pub fn fold_subtree(nodes: &mut [TemplateNode]) {
    for node in nodes {
        match node {
            TemplateNode::Component(comp) => {
                for attr in &mut comp.attributes {
                    if let AttributeValue::Dynamic(expr) = &mut attr.value {
                        *expr = expr.fold_constants();
                    }
                }
                fold_subtree(&mut comp.children);
            }
            TemplateNode::Expression(e) => {
                e.expr = e.expr.fold_constants();
            }
            TemplateNode::Text(_) => {}
        }
    }
}

/// Precompute one island in place: fill its props and descriptors and fold
/// its subtree.
pub fn precompute(island: &mut Island) {
    let (props, descriptors) = precompute_props(&island.nodes);
    island.precomputed_props = props;
    island.prop_descriptors = descriptors;
    fold_subtree(&mut island.nodes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_static_literal() {
        assert_eq!(static_literal("0"), json!(0));
        assert_eq!(static_literal("[1, 2, 3]"), json!([1, 2, 3]));
        assert_eq!(static_literal("false"), json!(false));
        assert_eq!(static_literal("count"), json!("count"));
        assert_eq!(static_literal("hello world"), json!("hello world"));
    }

    #[test]
    fn test_precompute_splits_constant_and_runtime_props() {
        let source = r#"<Image src="cat.gif" width="{320 + 20}" caption="{user.handle}"/>"#;
        let ast = crate::parse::parse(source, "t").unwrap();
        let (props, descriptors) = precompute_props(&ast.nodes);

        assert_eq!(props.get("src"), Some(&json!("cat.gif")));
        assert_eq!(props.get("width"), Some(&json!(340)));
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "caption");
        assert_eq!(descriptors[0].deps, vec!["user".to_string()]);
    }

    #[test]
    fn test_precompute_is_deterministic() {
        let source = r#"<Card pad="{2 * 4}" title="{owner}"><Text>{owner}</Text></Card>"#;
        let ast = crate::parse::parse(source, "t").unwrap();
        let first = serde_json::to_vec(&precompute_props(&ast.nodes)).unwrap();
        let second = serde_json::to_vec(&precompute_props(&ast.nodes)).unwrap();
        assert_eq!(first, second);
    }
}
