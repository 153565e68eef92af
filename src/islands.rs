//! Island detection: split an AST into a static skeleton and the minimal set
//! of subtrees that need client-side hydration.
//!
//! A node is dynamic when it reads or writes a variable, binds an event,
//! branches on a non-constant condition, loops over a non-constant source, or
//! contains a descendant that does. Boundaries are pushed as deep as they can
//! go: display and layout containers with constant attributes are hoisted
//! into the skeleton and only their dynamic children become islands, so two
//! dynamic siblings under a static parent are two separate islands. State,
//! conditional, loop, event and action tags are never split from their
//! subtree.
//!
//! `If`/`ElseIf`/`Else` are sibling-coupled; a chain moves as one unit so a
//! branch can never end up split between skeleton and island.

use serde::{Deserialize, Serialize};
use serde_json::Map;
use sha2::{Digest, Sha256};

use crate::expression::{display, truthy, values_equal};
use crate::static_eval::{attr_literal, PropDescriptor};
use crate::validate::{AttributeValue, ComponentNode, TemplateAst, TemplateNode};
use crate::vocabulary::TagCategory;

/// A hydration root with its precomputed inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Island {
    /// Stable identifier derived from the structural position of the island
    /// root, so recompiling an edited template keeps the ids of untouched
    /// subtrees.
    pub id: String,
    /// Tag of the island root; the registry loads this component.
    pub component_name: String,
    /// Props whose value was known at compile time.
    #[serde(default)]
    pub precomputed_props: Map<String, serde_json::Value>,
    /// Props that need runtime data, resolved while the island mounts.
    #[serde(default)]
    pub prop_descriptors: Vec<PropDescriptor>,
    /// The island subtree. Usually one node; a conditional chain keeps all
    /// of its branches here.
    pub nodes: Vec<TemplateNode>,
    /// Marker the renderer shell uses to locate the mount point.
    pub mount_marker: String,
}

/// Static render tree with slots where islands mount.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SkeletonNode {
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
        children: Vec<SkeletonNode>,
    },
    Text {
        value: String,
    },
    IslandSlot {
        island_id: String,
    },
}

/// Result of island detection over one template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub skeleton: Vec<SkeletonNode>,
    pub islands: Vec<Island>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// DYNAMIC CLASSIFICATION
// ═══════════════════════════════════════════════════════════════════════════════

fn attr_non_constant(comp: &ComponentNode, name: &str) -> bool {
    match comp.attribute(name) {
        Some(AttributeValue::Dynamic(expr)) => !expr.is_constant(),
        _ => false,
    }
}

fn any_attr_non_constant(comp: &ComponentNode) -> bool {
    comp.attributes
        .iter()
        .any(|a| matches!(&a.value, AttributeValue::Dynamic(e) if !e.is_constant()))
}

/// Does this node, by itself, require runtime behavior?
fn is_self_dynamic(node: &TemplateNode) -> bool {
    let comp = match node {
        TemplateNode::Component(c) => c,
        TemplateNode::Text(_) => return false,
        TemplateNode::Expression(e) => return !e.expr.is_constant(),
    };

    match comp.category {
        TagCategory::State | TagCategory::Event | TagCategory::Action => true,
        TagCategory::Conditional => match comp.tag.as_str() {
            "If" | "ElseIf" => attr_non_constant(comp, "when"),
            "Switch" | "Case" => attr_non_constant(comp, "value"),
            _ => false,
        },
        TagCategory::Loop => match comp.tag.as_str() {
            "ForEach" => attr_non_constant(comp, "source"),
            "Repeat" => attr_non_constant(comp, "count"),
            // Break/Continue are imperative loop control.
            _ => true,
        },
        TagCategory::Display | TagCategory::Layout | TagCategory::Media | TagCategory::Form => {
            any_attr_non_constant(comp)
        }
    }
}

fn is_dynamic(node: &TemplateNode) -> bool {
    if is_self_dynamic(node) {
        return true;
    }
    match node {
        TemplateNode::Component(c) => c.children.iter().any(is_dynamic),
        _ => false,
    }
}

/// Containers the boundary may pass through: the element itself renders
/// statically while its dynamic children become their own islands.
fn is_pass_through(category: TagCategory) -> bool {
    matches!(
        category,
        TagCategory::Display | TagCategory::Layout | TagCategory::Media | TagCategory::Form
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATIC FOLDING INTO THE SKELETON
// ═══════════════════════════════════════════════════════════════════════════════

fn fold_attributes(comp: &ComponentNode) -> Vec<(String, String)> {
    comp.attributes
        .iter()
        .filter_map(|a| match &a.value {
            AttributeValue::Static(s) => Some((a.name.clone(), s.clone())),
            AttributeValue::Dynamic(e) => e.fold().map(|v| (a.name.clone(), display(&v))),
        })
        .collect()
}

fn fold_children(nodes: &[TemplateNode]) -> Vec<SkeletonNode> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < nodes.len() {
        let mut end = i + 1;
        if starts_chain(&nodes[i]) {
            while end < nodes.len() && extends_chain(&nodes[end]) {
                end += 1;
            }
        }
        out.extend(fold_static_group(&nodes[i..end]));
        i = end;
    }
    out
}

/// Fold a fully static group (no dynamic node anywhere beneath it) into
/// skeleton nodes. Constant conditionals and loops resolve here: the chosen
/// branch is emitted, the loop body is repeated.
fn fold_static_group(group: &[TemplateNode]) -> Vec<SkeletonNode> {
    if group.len() > 1 || matches!(group.first(), Some(TemplateNode::Component(c)) if c.tag == "If")
    {
        return fold_static_chain(group);
    }

    let node = &group[0];
    let comp = match node {
        TemplateNode::Text(t) => {
            return vec![SkeletonNode::Text {
                value: t.value.clone(),
            }]
        }
        TemplateNode::Expression(e) => {
            return e
                .expr
                .fold()
                .map(|v| vec![SkeletonNode::Text { value: display(&v) }])
                .unwrap_or_default()
        }
        TemplateNode::Component(c) => c,
    };

    match comp.tag.as_str() {
        "Switch" => fold_static_switch(comp),
        "ForEach" => {
            let count = attr_literal(comp.attribute("source"))
                .and_then(|v| v.as_array().map(|a| a.len()))
                .unwrap_or(0);
            let body = fold_children(&comp.children);
            std::iter::repeat(body).take(count).flatten().collect()
        }
        "Repeat" => {
            let count = attr_literal(comp.attribute("count"))
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize;
            let body = fold_children(&comp.children);
            std::iter::repeat(body).take(count).flatten().collect()
        }
        _ => vec![SkeletonNode::Element {
            tag: comp.tag.clone(),
            attributes: fold_attributes(comp),
            children: fold_children(&comp.children),
        }],
    }
}

fn fold_static_chain(group: &[TemplateNode]) -> Vec<SkeletonNode> {
    for node in group {
        if let TemplateNode::Component(comp) = node {
            match comp.tag.as_str() {
                "If" | "ElseIf" => {
                    let cond = attr_literal(comp.attribute("when")).unwrap_or_default();
                    if truthy(&cond) {
                        return fold_children(&comp.children);
                    }
                }
                "Else" => return fold_children(&comp.children),
                _ => {}
            }
        }
    }
    vec![]
}

fn fold_static_switch(comp: &ComponentNode) -> Vec<SkeletonNode> {
    let subject = attr_literal(comp.attribute("value")).unwrap_or_default();
    let mut default: Option<&ComponentNode> = None;
    for child in &comp.children {
        if let TemplateNode::Component(c) = child {
            match c.tag.as_str() {
                "Case" => {
                    let candidate = attr_literal(c.attribute("value")).unwrap_or_default();
                    if values_equal(&subject, &candidate) {
                        return fold_children(&c.children);
                    }
                }
                "Default" => default = Some(c),
                _ => {}
            }
        }
    }
    default
        .map(|c| fold_children(&c.children))
        .unwrap_or_default()
}

// ═══════════════════════════════════════════════════════════════════════════════
// DETECTION
// ═══════════════════════════════════════════════════════════════════════════════

fn starts_chain(node: &TemplateNode) -> bool {
    matches!(node, TemplateNode::Component(c) if c.tag == "If")
}

fn extends_chain(node: &TemplateNode) -> bool {
    matches!(node, TemplateNode::Component(c) if c.tag == "ElseIf" || c.tag == "Else")
}

fn island_id(path: &[usize], tag: &str) -> String {
    let key = format!(
        "{}|{}",
        path.iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join("."),
        tag
    );
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("isl-{}", &digest[..12])
}

fn make_island(path: &[usize], component_name: &str, nodes: Vec<TemplateNode>) -> Island {
    let id = island_id(path, component_name);
    Island {
        component_name: component_name.to_string(),
        precomputed_props: Map::new(),
        prop_descriptors: Vec::new(),
        nodes,
        mount_marker: format!("islet:{}", id),
        id,
    }
}

/// A pass-through container becomes an island anyway when a *direct* child
/// is a dynamic text binding: a bare binding is not independently mountable,
/// so its nearest component takes the boundary.
fn has_dynamic_binding_child(comp: &ComponentNode) -> bool {
    comp.children
        .iter()
        .any(|c| matches!(c, TemplateNode::Expression(e) if !e.expr.is_constant()))
}

/// Tag of the node that names a merged island: the first behavior-bearing
/// node, falling back to the leading declaration.
fn island_component_name(nodes: &[TemplateNode]) -> String {
    nodes
        .iter()
        .find_map(|n| match n {
            TemplateNode::Component(c) if c.category != TagCategory::State => {
                Some(c.tag.clone())
            }
            _ => None,
        })
        .unwrap_or_else(|| "Var".to_string())
}

fn detect_nodes(
    nodes: &[TemplateNode],
    path: &mut Vec<usize>,
    skeleton: &mut Vec<SkeletonNode>,
    islands: &mut Vec<Island>,
) {
    // Sibling Var declarations attach to the next dynamic sibling's island:
    // the state they declare is what that island's actions mutate, so they
    // must share one scope.
    let mut pending_state: Vec<TemplateNode> = Vec::new();
    let mut pending_start: Option<usize> = None;

    let flush_pending = |pending: &mut Vec<TemplateNode>,
                             start: &mut Option<usize>,
                             path: &mut Vec<usize>,
                             skeleton: &mut Vec<SkeletonNode>,
                             islands: &mut Vec<Island>| {
        if pending.is_empty() {
            return;
        }
        path.push(start.take().unwrap_or(0));
        let island = make_island(path, "Var", std::mem::take(pending));
        skeleton.push(SkeletonNode::IslandSlot {
            island_id: island.id.clone(),
        });
        islands.push(island);
        path.pop();
    };

    let mut i = 0;
    while i < nodes.len() {
        // Group a conditional chain into one unit.
        let mut end = i + 1;
        if starts_chain(&nodes[i]) {
            while end < nodes.len() && extends_chain(&nodes[end]) {
                end += 1;
            }
        }
        let group = &nodes[i..end];

        if let [TemplateNode::Component(comp)] = group {
            if comp.category == TagCategory::State {
                pending_state.push(group[0].clone());
                pending_start.get_or_insert(i);
                i = end;
                continue;
            }
        }

        if !group.iter().any(is_dynamic) {
            flush_pending(
                &mut pending_state,
                &mut pending_start,
                path,
                skeleton,
                islands,
            );
            skeleton.extend(fold_static_group(group));
            i = end;
            continue;
        }

        if !pending_state.is_empty() {
            // Merge the queued declarations into this island.
            let start = pending_start.take().unwrap_or(i);
            let mut merged = std::mem::take(&mut pending_state);
            merged.extend_from_slice(group);
            path.push(start);
            let island = make_island(path, &island_component_name(&merged), merged);
            skeleton.push(SkeletonNode::IslandSlot {
                island_id: island.id.clone(),
            });
            islands.push(island);
            path.pop();
            i = end;
            continue;
        }

        path.push(i);

        if group.len() > 1 {
            // A chain with any dynamic branch hydrates as one island.
            let island = make_island(path, "If", group.to_vec());
            skeleton.push(SkeletonNode::IslandSlot {
                island_id: island.id.clone(),
            });
            islands.push(island);
        } else {
            match &group[0] {
                TemplateNode::Expression(_) => {
                    // A naked top-level binding mounts as a text island.
                    let island = make_island(path, "Text", group.to_vec());
                    skeleton.push(SkeletonNode::IslandSlot {
                        island_id: island.id.clone(),
                    });
                    islands.push(island);
                }
                TemplateNode::Component(comp)
                    if is_pass_through(comp.category)
                        && !is_self_dynamic(&group[0])
                        && !has_dynamic_binding_child(comp) =>
                {
                    // Static shell, dynamic children: hoist the element and
                    // descend, so each dynamic child is its own island.
                    let mut children = Vec::new();
                    detect_nodes(&comp.children, path, &mut children, islands);
                    skeleton.push(SkeletonNode::Element {
                        tag: comp.tag.clone(),
                        attributes: fold_attributes(comp),
                        children,
                    });
                }
                TemplateNode::Component(comp) => {
                    let island = make_island(path, &comp.tag, group.to_vec());
                    skeleton.push(SkeletonNode::IslandSlot {
                        island_id: island.id.clone(),
                    });
                    islands.push(island);
                }
                TemplateNode::Text(_) => unreachable!("text nodes are never dynamic"),
            }
        }

        path.pop();
        i = end;
    }

    flush_pending(
        &mut pending_state,
        &mut pending_start,
        path,
        skeleton,
        islands,
    );
}

/// Walk the AST and split it into skeleton and islands. Pure and
/// deterministic: identical input produces identical output, ids included.
pub fn detect(ast: &TemplateAst) -> Detection {
    let mut skeleton = Vec::new();
    let mut islands = Vec::new();
    let mut path = Vec::new();
    detect_nodes(&ast.nodes, &mut path, &mut skeleton, &mut islands);
    Detection { skeleton, islands }
}
