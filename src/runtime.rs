//! Island hydration runtime.
//!
//! Consumes a compiled artifact plus the preloaded components and brings
//! each island to life independently: its own variable scopes, conditional
//! and loop evaluation, and event-to-action dispatch. Failure in one island
//! never touches its siblings; the broken island keeps its last-known-good
//! render (or a neutral placeholder) and the error is reported.
//!
//! The runtime is cooperative and single-threaded. Action chains run to
//! completion before anything else happens, and cross-island interference is
//! impossible by construction because islands do not share scope arenas.
//! Time is logical: the host drives `advance(ms)` from its event loop, which
//! is what fires `OnInterval` and `Delay` work. Unmounting an island cancels
//! its timers synchronously.

use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{error, warn};

use crate::artifact::CompiledTemplate;
use crate::expression::{display, truthy, values_equal, Expr};
use crate::islands::{Island, SkeletonNode};
use crate::registry::PreloadedRegistry;
use crate::scope::{EvalError, ScopeArena, ScopeId};
use crate::static_eval::static_literal;
use crate::validate::{AttributeValue, ComponentNode, TemplateNode};
use crate::vocabulary::{self, EventTrigger, TagCategory, VOCABULARY_VERSION};

#[derive(Debug, Clone, Error)]
pub enum HydrationError {
    #[error("artifact was compiled with vocabulary v{artifact}, runtime supports up to v{runtime}")]
    VocabularyMismatch { artifact: u32, runtime: u32 },
    #[error("island '{island}' needs component '{component}', which is not loaded")]
    MissingComponent { island: String, component: String },
    #[error("island '{island}': {source}")]
    Eval {
        island: String,
        #[source]
        source: EvalError,
    },
    #[error("no island with id '{0}'")]
    UnknownIsland(String),
    #[error("island '{0}' is not hydrated")]
    NotHydrated(String),
}

/// Per-island lifecycle. `Failed` means the island degraded: it keeps its
/// last successful render and stops processing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IslandState {
    Unmounted,
    Mounting,
    Hydrated,
    Failed,
}

/// Read-only data the host injects into every island's root scope at mount:
/// the session user, fetched page data, and anything else templates may
/// bind.
#[derive(Debug, Clone, Default)]
pub struct HostBindings {
    values: Map<String, Value>,
}

impl HostBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }
}

/// A rendered tree, ready for the shell to serialize or diff.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderNode {
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
        children: Vec<RenderNode>,
    },
    Text(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// ACTION CHAINS
// ═══════════════════════════════════════════════════════════════════════════════

/// One imperative step. Chains run synchronously against the owning scope.
#[derive(Debug, Clone)]
pub enum ActionStep {
    Set { target: String, value: Expr },
    Increment { target: String, by: Option<Expr> },
    Decrement { target: String, by: Option<Expr> },
    Toggle { target: String },
    Push { target: String, value: Expr },
    Pop { target: String },
    RemoveAt { target: String, index: Expr },
    Filter { target: String, keep: Expr, item_var: String },
    Clear { target: String },
    Delay { after_ms: u64, chain: Vec<ActionStep> },
    Sequence { chain: Vec<ActionStep> },
    BreakLoop { when: Option<Expr> },
    ContinueLoop { when: Option<Expr> },
}

/// Loop control signal propagated out of action execution and rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

struct Handler {
    trigger: EventTrigger,
    key: Option<String>,
    chain: Vec<ActionStep>,
    scope: ScopeId,
}

/// Timer work produced during rendering or chain execution, installed into
/// the scheduler once the pass completes.
struct PendingTimer {
    after_ms: u64,
    every: Option<u64>,
    chain: Vec<ActionStep>,
}

struct Timer {
    island: String,
    due: u64,
    every: Option<u64>,
    chain: Vec<ActionStep>,
}

#[derive(Default)]
struct Scheduler {
    now: u64,
    timers: Vec<Timer>,
}

impl Scheduler {
    fn install(&mut self, island: &str, pending: Vec<PendingTimer>) {
        for p in pending {
            self.timers.push(Timer {
                island: island.to_string(),
                due: self.now + p.after_ms,
                every: p.every,
                chain: p.chain,
            });
        }
    }

    fn cancel_island(&mut self, island: &str) {
        self.timers.retain(|t| t.island != island);
    }

    /// Pop the next timer due at or before `upto`, earliest first.
    fn pop_due(&mut self, upto: u64) -> Option<Timer> {
        let idx = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= upto)
            .min_by_key(|(_, t)| t.due)
            .map(|(i, _)| i)?;
        Some(self.timers.remove(idx))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ATTRIBUTE EVALUATION
// ═══════════════════════════════════════════════════════════════════════════════

fn eval_attr_value(
    value: &AttributeValue,
    scopes: &ScopeArena,
    scope: ScopeId,
) -> Result<Value, EvalError> {
    match value {
        AttributeValue::Static(s) => Ok(static_literal(s)),
        AttributeValue::Dynamic(e) => e.eval(scopes, scope),
    }
}

/// Attribute as a plain name (`target="count"`, `item="post"`).
fn attr_name(comp: &ComponentNode, name: &str) -> Option<String> {
    match comp.attribute(name)? {
        AttributeValue::Static(s) => Some(s.clone()),
        AttributeValue::Dynamic(_) => None,
    }
}

/// Attribute as an expression: bound attributes keep theirs, bare attribute
/// text becomes the literal it spells.
fn attr_expr(comp: &ComponentNode, name: &str) -> Option<Expr> {
    match comp.attribute(name)? {
        AttributeValue::Dynamic(e) => Some(e.clone()),
        AttributeValue::Static(s) => Some(crate::expression::literal(static_literal(s))),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN COMPILATION & EXECUTION
// ═══════════════════════════════════════════════════════════════════════════════

fn compile_step(comp: &ComponentNode) -> ActionStep {
    let target = || attr_name(comp, "target").unwrap_or_default();
    match comp.tag.as_str() {
        "Set" => ActionStep::Set {
            target: target(),
            value: attr_expr(comp, "value").unwrap_or(Expr::Null),
        },
        "Increment" => ActionStep::Increment {
            target: target(),
            by: attr_expr(comp, "by"),
        },
        "Decrement" => ActionStep::Decrement {
            target: target(),
            by: attr_expr(comp, "by"),
        },
        "Toggle" => ActionStep::Toggle { target: target() },
        "Push" => ActionStep::Push {
            target: target(),
            value: attr_expr(comp, "value").unwrap_or(Expr::Null),
        },
        "Pop" => ActionStep::Pop { target: target() },
        "RemoveAt" => ActionStep::RemoveAt {
            target: target(),
            index: attr_expr(comp, "index").unwrap_or(Expr::Number { value: 0.0 }),
        },
        "Filter" => ActionStep::Filter {
            target: target(),
            keep: attr_expr(comp, "keep").unwrap_or(Expr::Bool { value: true }),
            item_var: attr_name(comp, "item").unwrap_or_else(|| "item".to_string()),
        },
        "Clear" => ActionStep::Clear { target: target() },
        "Delay" => ActionStep::Delay {
            after_ms: attr_expr(comp, "ms")
                .and_then(|e| e.fold())
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            chain: compile_chain(&comp.children),
        },
        "Sequence" => ActionStep::Sequence {
            chain: compile_chain(&comp.children),
        },
        "Break" => ActionStep::BreakLoop {
            when: attr_expr(comp, "when"),
        },
        "Continue" => ActionStep::ContinueLoop {
            when: attr_expr(comp, "when"),
        },
        other => {
            warn!(tag = other, "ignoring non-action tag in action chain");
            ActionStep::Sequence { chain: vec![] }
        }
    }
}

/// Compile an event tag's children into an ordered chain.
fn compile_chain(children: &[TemplateNode]) -> Vec<ActionStep> {
    children
        .iter()
        .filter_map(|child| match child {
            TemplateNode::Component(c)
                if c.category == TagCategory::Action
                    || c.tag == "Break"
                    || c.tag == "Continue" =>
            {
                Some(compile_step(c))
            }
            TemplateNode::Component(c) => {
                warn!(tag = %c.tag, "ignoring non-action tag in action chain");
                None
            }
            _ => None,
        })
        .collect()
}

fn execute_chain(
    chain: &[ActionStep],
    scopes: &mut ScopeArena,
    scope: ScopeId,
    pending: &mut Vec<PendingTimer>,
) -> Result<Flow, EvalError> {
    for step in chain {
        match execute_step(step, scopes, scope, pending)? {
            Flow::Normal => {}
            flow => return Ok(flow),
        }
    }
    Ok(Flow::Normal)
}

fn execute_step(
    step: &ActionStep,
    scopes: &mut ScopeArena,
    scope: ScopeId,
    pending: &mut Vec<PendingTimer>,
) -> Result<Flow, EvalError> {
    match step {
        ActionStep::Set { target, value } => {
            let v = value.eval(scopes, scope)?;
            scopes.set(scope, target, v)?;
        }
        ActionStep::Increment { target, by } | ActionStep::Decrement { target, by } => {
            let delta = match by {
                Some(e) => e
                    .eval(scopes, scope)?
                    .as_f64()
                    .ok_or(EvalError::BadOperands { op: "by" })?,
                None => 1.0,
            };
            let delta = if matches!(step, ActionStep::Decrement { .. }) {
                -delta
            } else {
                delta
            };
            scopes.update(scope, target, |v| {
                let current = v
                    .as_f64()
                    .ok_or_else(|| EvalError::NotANumber(target.clone()))?;
                *v = crate::expression::number_value(current + delta);
                Ok(())
            })?;
        }
        ActionStep::Toggle { target } => {
            scopes.update(scope, target, |v| {
                *v = Value::Bool(!truthy(v));
                Ok(())
            })?;
        }
        ActionStep::Push { target, value } => {
            let item = value.eval(scopes, scope)?;
            scopes.update(scope, target, |v| match v {
                Value::Array(items) => {
                    items.push(item);
                    Ok(())
                }
                _ => Err(EvalError::NotAnArray(target.clone())),
            })?;
        }
        ActionStep::Pop { target } => {
            scopes.update(scope, target, |v| match v {
                Value::Array(items) => {
                    items.pop();
                    Ok(())
                }
                _ => Err(EvalError::NotAnArray(target.clone())),
            })?;
        }
        ActionStep::RemoveAt { target, index } => {
            let idx = index
                .eval(scopes, scope)?
                .as_u64()
                .ok_or(EvalError::BadOperands { op: "index" })? as usize;
            scopes.update(scope, target, |v| match v {
                Value::Array(items) => {
                    if idx < items.len() {
                        items.remove(idx);
                    }
                    Ok(())
                }
                _ => Err(EvalError::NotAnArray(target.clone())),
            })?;
        }
        ActionStep::Filter {
            target,
            keep,
            item_var,
        } => {
            let items = match scopes.get(scope, target) {
                Some(Value::Array(items)) => items.clone(),
                Some(_) => return Err(EvalError::NotAnArray(target.clone())),
                None => return Err(EvalError::UndeclaredVariable(target.clone())),
            };
            let probe = scopes.push_child(scope);
            let mut kept = Vec::with_capacity(items.len());
            for item in items {
                scopes.declare_or_replace(probe, item_var, item.clone());
                if truthy(&keep.eval(scopes, probe)?) {
                    kept.push(item);
                }
            }
            scopes.release(probe);
            scopes.set(scope, target, Value::Array(kept))?;
        }
        ActionStep::Clear { target } => {
            scopes.update(scope, target, |v| {
                *v = match v {
                    Value::Array(_) => Value::Array(vec![]),
                    Value::String(_) => Value::String(String::new()),
                    _ => Value::Null,
                };
                Ok(())
            })?;
        }
        ActionStep::Delay { after_ms, chain } => {
            pending.push(PendingTimer {
                after_ms: *after_ms,
                every: None,
                chain: chain.clone(),
            });
        }
        ActionStep::Sequence { chain } => {
            return execute_chain(chain, scopes, scope, pending);
        }
        ActionStep::BreakLoop { when } => {
            if condition_holds(when, scopes, scope)? {
                return Ok(Flow::Break);
            }
        }
        ActionStep::ContinueLoop { when } => {
            if condition_holds(when, scopes, scope)? {
                return Ok(Flow::Continue);
            }
        }
    }
    Ok(Flow::Normal)
}

fn condition_holds(
    when: &Option<Expr>,
    scopes: &ScopeArena,
    scope: ScopeId,
) -> Result<bool, EvalError> {
    match when {
        None => Ok(true),
        Some(e) => Ok(truthy(&e.eval(scopes, scope)?)),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDERING
// ═══════════════════════════════════════════════════════════════════════════════

struct RenderCtx<'a> {
    scopes: &'a mut ScopeArena,
    handlers: &'a mut Vec<Handler>,
    timers: &'a mut Vec<PendingTimer>,
    /// Precomputed + mount-resolved props for the island root, consulted on
    /// the mount pass so first paint does no redundant derivation.
    root_props: &'a Map<String, Value>,
    mount: bool,
    /// Set when a mount-time action ran; the caller re-renders once so the
    /// output reflects the final state.
    acted: bool,
}

fn eval_attr(
    comp: &ComponentNode,
    name: &str,
    scope: ScopeId,
    ctx: &RenderCtx,
    at_root: bool,
) -> Result<Option<Value>, EvalError> {
    let value = match comp.attribute(name) {
        Some(v) => v,
        None => return Ok(None),
    };
    if at_root && ctx.mount {
        if let Some(v) = ctx.root_props.get(name) {
            return Ok(Some(v.clone()));
        }
    }
    eval_attr_value(value, ctx.scopes, scope).map(Some)
}

fn eval_all_attrs(
    comp: &ComponentNode,
    scope: ScopeId,
    ctx: &RenderCtx,
    at_root: bool,
) -> Result<Vec<(String, String)>, EvalError> {
    let mut out = Vec::with_capacity(comp.attributes.len());
    for attr in &comp.attributes {
        let v = if at_root && ctx.mount {
            match ctx.root_props.get(&attr.name) {
                Some(v) => v.clone(),
                None => eval_attr_value(&attr.value, ctx.scopes, scope)?,
            }
        } else {
            eval_attr_value(&attr.value, ctx.scopes, scope)?
        };
        out.push((attr.name.clone(), display(&v)));
    }
    Ok(out)
}

fn render_nodes(
    nodes: &[TemplateNode],
    scope: ScopeId,
    ctx: &mut RenderCtx,
    at_root: bool,
) -> Result<(Vec<RenderNode>, Flow), EvalError> {
    let mut out = Vec::new();
    let mut i = 0;

    while i < nodes.len() {
        // Conditional chains are sibling-coupled; resolve them here.
        if matches!(&nodes[i], TemplateNode::Component(c) if c.tag == "If") {
            let mut end = i + 1;
            while end < nodes.len()
                && matches!(&nodes[end], TemplateNode::Component(c) if c.tag == "ElseIf" || c.tag == "Else")
            {
                end += 1;
            }
            let node_at_root = at_root && i == 0;
            for (offset, member) in nodes[i..end].iter().enumerate() {
                let comp = match member {
                    TemplateNode::Component(c) => c,
                    _ => continue,
                };
                let taken = match comp.tag.as_str() {
                    "If" | "ElseIf" => {
                        let cond = eval_attr(comp, "when", scope, ctx, node_at_root && offset == 0)?
                            .unwrap_or(Value::Null);
                        truthy(&cond)
                    }
                    _ => true, // Else
                };
                if taken {
                    let (rendered, flow) = render_nodes(&comp.children, scope, ctx, false)?;
                    out.extend(rendered);
                    if flow != Flow::Normal {
                        return Ok((out, flow));
                    }
                    break;
                }
            }
            i = end;
            continue;
        }

        let node_at_root = at_root && i == 0;
        let comp = match &nodes[i] {
            TemplateNode::Text(t) => {
                out.push(RenderNode::Text(t.value.clone()));
                i += 1;
                continue;
            }
            TemplateNode::Expression(e) => {
                out.push(RenderNode::Text(display(&e.expr.eval(ctx.scopes, scope)?)));
                i += 1;
                continue;
            }
            TemplateNode::Component(c) => c,
        };

        match comp.category {
            TagCategory::State => {
                // <Var name=".." value=".."/> declares into the current scope.
                let name = attr_name(comp, "name").unwrap_or_default();
                let value = eval_attr(comp, "value", scope, ctx, node_at_root)?
                    .unwrap_or(Value::Null);
                match ctx.scopes.declare(scope, &name, value) {
                    Ok(()) => {}
                    // A persistent frame already holds this variable from a
                    // previous render; keep its current value.
                    Err(EvalError::AlreadyDeclared(_)) if !ctx.mount => {}
                    Err(e) => return Err(e),
                }
            }

            TagCategory::Conditional => match comp.tag.as_str() {
                "Switch" => {
                    let subject = eval_attr(comp, "value", scope, ctx, node_at_root)?
                        .unwrap_or(Value::Null);
                    let (rendered, flow) = render_switch(comp, &subject, scope, ctx)?;
                    out.extend(rendered);
                    if flow != Flow::Normal {
                        return Ok((out, flow));
                    }
                }
                // Orphan branches and stray Case/Default render nothing;
                // parsing rejects them up front.
                _ => {}
            },

            TagCategory::Loop => match comp.tag.as_str() {
                "ForEach" => {
                    let source = eval_attr(comp, "source", scope, ctx, node_at_root)?
                        .unwrap_or(Value::Null);
                    let items = match source {
                        Value::Array(items) => items,
                        other => return Err(EvalError::NotIterable(display(&other))),
                    };
                    let item_var = attr_name(comp, "item").unwrap_or_else(|| "item".to_string());
                    let index_var =
                        attr_name(comp, "index").unwrap_or_else(|| "index".to_string());
                    for (idx, item) in items.into_iter().enumerate() {
                        let iteration = ctx.scopes.push_child(scope);
                        ctx.scopes.declare(iteration, &item_var, item)?;
                        ctx.scopes
                            .declare(iteration, &index_var, Value::from(idx))?;
                        let (rendered, flow) = render_nodes(&comp.children, iteration, ctx, false)?;
                        out.extend(rendered);
                        match flow {
                            Flow::Break => break,
                            Flow::Continue | Flow::Normal => continue,
                        }
                    }
                }
                "Repeat" => {
                    let count = eval_attr(comp, "count", scope, ctx, node_at_root)?
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0);
                    let index_var =
                        attr_name(comp, "index").unwrap_or_else(|| "index".to_string());
                    for idx in 0..count {
                        let iteration = ctx.scopes.push_child(scope);
                        ctx.scopes
                            .declare(iteration, &index_var, Value::from(idx))?;
                        let (rendered, flow) = render_nodes(&comp.children, iteration, ctx, false)?;
                        out.extend(rendered);
                        match flow {
                            Flow::Break => break,
                            Flow::Continue | Flow::Normal => continue,
                        }
                    }
                }
                // Break/Continue in render flow terminate the iteration.
                "Break" | "Continue" => {
                    let when = match comp.attribute("when") {
                        Some(AttributeValue::Dynamic(e)) => Some(e.clone()),
                        Some(AttributeValue::Static(s)) => {
                            Some(crate::expression::literal(static_literal(s)))
                        }
                        None => None,
                    };
                    if condition_holds(&when, ctx.scopes, scope)? {
                        let flow = if comp.tag == "Break" {
                            Flow::Break
                        } else {
                            Flow::Continue
                        };
                        return Ok((out, flow));
                    }
                }
                _ => {}
            },

            TagCategory::Event => {
                let trigger = vocabulary::event_trigger(&comp.tag)
                    .expect("event tags always map to a trigger");
                let chain = compile_chain(&comp.children);
                match trigger {
                    EventTrigger::Mount => {
                        if ctx.mount {
                            ctx.acted = true;
                            let flow = execute_chain(&chain, ctx.scopes, scope, ctx.timers)?;
                            if flow != Flow::Normal {
                                return Ok((out, flow));
                            }
                        }
                    }
                    EventTrigger::Interval => {
                        if ctx.mount {
                            let every = eval_attr(comp, "every", scope, ctx, false)?
                                .and_then(|v| v.as_u64())
                                .unwrap_or(1000);
                            ctx.timers.push(PendingTimer {
                                after_ms: every,
                                every: Some(every),
                                chain,
                            });
                        }
                    }
                    _ => {
                        ctx.handlers.push(Handler {
                            trigger,
                            key: attr_name(comp, "key"),
                            chain,
                            scope,
                        });
                    }
                }
            }

            TagCategory::Action => {
                // An action tag in direct render flow runs once, at mount.
                if ctx.mount {
                    ctx.acted = true;
                    let step = compile_step(comp);
                    let flow = execute_step(&step, ctx.scopes, scope, ctx.timers)?;
                    if flow != Flow::Normal {
                        return Ok((out, flow));
                    }
                }
            }

            TagCategory::Display | TagCategory::Layout | TagCategory::Media | TagCategory::Form => {
                let attributes = eval_all_attrs(comp, scope, ctx, node_at_root)?;
                let (children, flow) = render_nodes(&comp.children, scope, ctx, false)?;
                out.push(RenderNode::Element {
                    tag: comp.tag.clone(),
                    attributes,
                    children,
                });
                if flow != Flow::Normal {
                    return Ok((out, flow));
                }
            }
        }

        i += 1;
    }

    Ok((out, Flow::Normal))
}

fn render_switch(
    comp: &ComponentNode,
    subject: &Value,
    scope: ScopeId,
    ctx: &mut RenderCtx,
) -> Result<(Vec<RenderNode>, Flow), EvalError> {
    let mut default: Option<&ComponentNode> = None;
    for child in &comp.children {
        if let TemplateNode::Component(c) = child {
            match c.tag.as_str() {
                "Case" => {
                    let candidate =
                        eval_attr(c, "value", scope, ctx, false)?.unwrap_or(Value::Null);
                    if values_equal(subject, &candidate) {
                        return render_nodes(&c.children, scope, ctx, false);
                    }
                }
                "Default" => default = Some(c),
                _ => {}
            }
        }
    }
    match default {
        Some(c) => render_nodes(&c.children, scope, ctx, false),
        None => Ok((vec![], Flow::Normal)),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ISLAND INSTANCES
// ═══════════════════════════════════════════════════════════════════════════════

struct IslandInstance {
    island: Island,
    state: IslandState,
    scopes: ScopeArena,
    root: ScopeId,
    /// Precomputed props merged with mount-resolved descriptors.
    props: Map<String, Value>,
    handlers: Vec<Handler>,
    /// Last-known-good render.
    rendered: Vec<RenderNode>,
}

impl IslandInstance {
    fn placeholder(island: Island) -> Self {
        let mut scopes = ScopeArena::new();
        let root = scopes.push_root();
        Self {
            island,
            state: IslandState::Failed,
            scopes,
            root,
            props: Map::new(),
            handlers: Vec::new(),
            rendered: Vec::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RUNTIME
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Runtime {
    template: String,
    skeleton: Vec<SkeletonNode>,
    order: Vec<String>,
    islands: HashMap<String, IslandInstance>,
    scheduler: Scheduler,
    errors: Vec<HydrationError>,
}

impl Runtime {
    /// Hydrate every island of a compiled template. Per-island failures are
    /// contained: the island degrades and is reported in `errors()`, the
    /// rest of the page hydrates normally. The only fatal error is an
    /// artifact from a newer vocabulary.
    pub fn hydrate(
        artifact: &CompiledTemplate,
        preloaded: &PreloadedRegistry<'_>,
        host: &HostBindings,
    ) -> Result<Runtime, HydrationError> {
        if artifact.vocabulary_version > VOCABULARY_VERSION {
            return Err(HydrationError::VocabularyMismatch {
                artifact: artifact.vocabulary_version,
                runtime: VOCABULARY_VERSION,
            });
        }

        let mut runtime = Runtime {
            template: artifact.template.clone(),
            skeleton: artifact.skeleton.clone(),
            order: artifact.islands.iter().map(|i| i.id.clone()).collect(),
            islands: HashMap::new(),
            scheduler: Scheduler::default(),
            errors: Vec::new(),
        };

        for island in &artifact.islands {
            if preloaded.get(&island.component_name).is_none() {
                let err = HydrationError::MissingComponent {
                    island: island.id.clone(),
                    component: island.component_name.clone(),
                };
                error!(island = %island.id, component = %island.component_name, "island degraded: component missing");
                runtime.errors.push(err);
                runtime
                    .islands
                    .insert(island.id.clone(), IslandInstance::placeholder(island.clone()));
                continue;
            }

            match mount_island(island, host, &mut runtime.scheduler) {
                Ok(instance) => {
                    runtime.islands.insert(island.id.clone(), instance);
                }
                Err(e) => {
                    error!(island = %island.id, error = %e, "island degraded during hydration");
                    runtime.errors.push(e);
                    runtime
                        .islands
                        .insert(island.id.clone(), IslandInstance::placeholder(island.clone()));
                }
            }
        }

        Ok(runtime)
    }

    /// Deliver an event to one island. The matching handler chains run to
    /// completion, then exactly that island re-renders.
    pub fn dispatch(&mut self, island_id: &str, trigger: EventTrigger) -> Result<(), HydrationError> {
        self.dispatch_inner(island_id, trigger, None)
    }

    /// Deliver a key event; handlers with a `key` filter only match their
    /// own key.
    pub fn dispatch_key(&mut self, island_id: &str, key: &str) -> Result<(), HydrationError> {
        self.dispatch_inner(island_id, EventTrigger::Key, Some(key))
    }

    fn dispatch_inner(
        &mut self,
        island_id: &str,
        trigger: EventTrigger,
        key: Option<&str>,
    ) -> Result<(), HydrationError> {
        let instance = self
            .islands
            .get_mut(island_id)
            .ok_or_else(|| HydrationError::UnknownIsland(island_id.to_string()))?;
        if instance.state != IslandState::Hydrated {
            return Err(HydrationError::NotHydrated(island_id.to_string()));
        }

        let matching: Vec<(Vec<ActionStep>, ScopeId)> = instance
            .handlers
            .iter()
            .filter(|h| {
                h.trigger == trigger
                    && match (&h.key, key) {
                        (Some(want), Some(got)) => want == got,
                        (Some(_), None) => false,
                        (None, _) => true,
                    }
            })
            .map(|h| (h.chain.clone(), h.scope))
            .collect();

        let mut pending = Vec::new();
        for (chain, scope) in matching {
            if let Err(e) = execute_chain(&chain, &mut instance.scopes, scope, &mut pending) {
                let err = HydrationError::Eval {
                    island: island_id.to_string(),
                    source: e,
                };
                error!(island = island_id, error = %err, "action chain failed; keeping last render");
                self.errors.push(err.clone());
                return Err(err);
            }
        }
        self.scheduler.install(island_id, pending);

        self.rerender(island_id)
    }

    /// Advance logical time, firing due `OnInterval`/`Delay` work in order.
    /// Each firing re-renders its own island only.
    pub fn advance(&mut self, ms: u64) {
        let target = self.scheduler.now + ms;

        while let Some(timer) = self.scheduler.pop_due(target) {
            self.scheduler.now = timer.due;

            let instance = match self.islands.get_mut(&timer.island) {
                Some(i) if i.state == IslandState::Hydrated => i,
                // Unmounted or degraded since scheduling; drop the timer.
                _ => continue,
            };

            let island_name = timer.island.clone();
            let mut pending = Vec::new();
            let root = instance.root;
            match execute_chain(&timer.chain, &mut instance.scopes, root, &mut pending) {
                Ok(_) => {
                    self.scheduler.install(&island_name, pending);
                    if let Some(every) = timer.every {
                        self.scheduler.timers.push(Timer {
                            due: timer.due + every,
                            ..timer
                        });
                    }
                    // rerender records its own failures.
                    let _ = self.rerender(&island_name);
                }
                Err(e) => {
                    // An erroring timer is cancelled rather than retried
                    // forever; the island keeps its last render.
                    let err = HydrationError::Eval {
                        island: timer.island.clone(),
                        source: e,
                    };
                    error!(island = %timer.island, error = %err, "timer chain failed; cancelling timer");
                    self.errors.push(err);
                }
            }
        }

        self.scheduler.now = target;
    }

    /// Tear an island down: its timers stop synchronously and its scopes are
    /// destroyed.
    pub fn unmount(&mut self, island_id: &str) -> Result<(), HydrationError> {
        let instance = self
            .islands
            .get_mut(island_id)
            .ok_or_else(|| HydrationError::UnknownIsland(island_id.to_string()))?;
        self.scheduler.cancel_island(island_id);
        instance.state = IslandState::Unmounted;
        instance.scopes = ScopeArena::new();
        instance.root = instance.scopes.push_root();
        instance.handlers.clear();
        instance.rendered.clear();
        Ok(())
    }

    fn rerender(&mut self, island_id: &str) -> Result<(), HydrationError> {
        let instance = self
            .islands
            .get_mut(island_id)
            .ok_or_else(|| HydrationError::UnknownIsland(island_id.to_string()))?;

        instance.scopes.truncate_to(instance.root);
        instance.handlers.clear();

        let mut timers = Vec::new();
        let mut ctx = RenderCtx {
            scopes: &mut instance.scopes,
            handlers: &mut instance.handlers,
            timers: &mut timers,
            root_props: &instance.props,
            mount: false,
            acted: false,
        };

        match render_nodes(&instance.island.nodes, instance.root, &mut ctx, true) {
            Ok((rendered, _)) => {
                instance.rendered = rendered;
                Ok(())
            }
            Err(e) => {
                let err = HydrationError::Eval {
                    island: island_id.to_string(),
                    source: e,
                };
                error!(island = island_id, error = %err, "re-render failed; keeping last render");
                self.errors.push(err.clone());
                Err(err)
            }
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn island_state(&self, island_id: &str) -> Option<IslandState> {
        self.islands.get(island_id).map(|i| i.state)
    }

    pub fn island_ids(&self) -> &[String] {
        &self.order
    }

    /// Current rendered tree of one island.
    pub fn rendered(&self, island_id: &str) -> Option<&[RenderNode]> {
        self.islands.get(island_id).map(|i| i.rendered.as_slice())
    }

    /// Read a variable from an island's root scope.
    pub fn variable(&self, island_id: &str, name: &str) -> Option<Value> {
        let instance = self.islands.get(island_id)?;
        instance.scopes.get(instance.root, name).cloned()
    }

    /// Errors reported so far (isolated island failures included).
    pub fn errors(&self) -> &[HydrationError] {
        &self.errors
    }

    pub fn active_timer_count(&self) -> usize {
        self.scheduler.timers.len()
    }

    /// Assemble the full page: skeleton plus each island's current render.
    /// Failed or unmounted islands emit a neutral fallback element; the rest
    /// of the page is unaffected.
    pub fn render_html(&self) -> String {
        let mut out = String::new();
        for node in &self.skeleton {
            self.skeleton_html(node, &mut out);
        }
        out
    }

    fn skeleton_html(&self, node: &SkeletonNode, out: &mut String) {
        match node {
            SkeletonNode::Text { value } => out.push_str(&escape_html(value)),
            SkeletonNode::Element {
                tag,
                attributes,
                children,
            } => {
                element_open(tag, attributes, out);
                for child in children {
                    self.skeleton_html(child, out);
                }
                element_close(tag, out);
            }
            SkeletonNode::IslandSlot { island_id } => {
                if let Some(instance) = self.islands.get(island_id) {
                    if instance.state == IslandState::Hydrated {
                        out.push_str(&format!("<!--{}-->", instance.island.mount_marker));
                        for node in &instance.rendered {
                            render_node_html(node, out);
                        }
                        return;
                    }
                }
                out.push_str(&format!(
                    "<div class=\"islet-fallback\" data-island=\"{}\"></div>",
                    escape_html(island_id)
                ));
            }
        }
    }
}

fn mount_island(
    island: &Island,
    host: &HostBindings,
    scheduler: &mut Scheduler,
) -> Result<IslandInstance, HydrationError> {
    let mut scopes = ScopeArena::new();
    let root = scopes.push_root();

    // Host bindings seed the root scope: session user, fetched page data.
    for (name, value) in &host.values {
        scopes
            .declare(root, name, value.clone())
            .map_err(|e| HydrationError::Eval {
                island: island.id.clone(),
                source: e,
            })?;
    }

    // Mounting: resolve pending prop descriptors against the current store.
    let mut props = island.precomputed_props.clone();
    for descriptor in &island.prop_descriptors {
        let value = descriptor
            .expr
            .eval(&scopes, root)
            .map_err(|e| HydrationError::Eval {
                island: island.id.clone(),
                source: e,
            })?;
        props.insert(descriptor.name.clone(), value);
    }

    let mut handlers = Vec::new();
    let mut timers = Vec::new();
    let mut ctx = RenderCtx {
        scopes: &mut scopes,
        handlers: &mut handlers,
        timers: &mut timers,
        root_props: &props,
        mount: true,
        acted: false,
    };

    let (mut rendered, _) = render_nodes(&island.nodes, root, &mut ctx, true).map_err(|e| {
        HydrationError::Eval {
            island: island.id.clone(),
            source: e,
        }
    })?;

    // Mount-time actions changed state after parts of the tree rendered;
    // render again so first paint shows the settled values.
    if ctx.acted {
        ctx.scopes.truncate_to(root);
        ctx.handlers.clear();
        ctx.mount = false;
        let (settled, _) =
            render_nodes(&island.nodes, root, &mut ctx, true).map_err(|e| HydrationError::Eval {
                island: island.id.clone(),
                source: e,
            })?;
        rendered = settled;
    }

    scheduler.install(&island.id, timers);

    Ok(IslandInstance {
        island: island.clone(),
        state: IslandState::Hydrated,
        scopes,
        root,
        props,
        handlers,
        rendered,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTML ASSEMBLY
// ═══════════════════════════════════════════════════════════════════════════════

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn element_open(tag: &str, attributes: &[(String, String)], out: &mut String) {
    out.push('<');
    out.push_str(&tag.to_ascii_lowercase());
    for (name, value) in attributes {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&escape_html(value));
        out.push('"');
    }
    out.push('>');
}

fn element_close(tag: &str, out: &mut String) {
    out.push_str("</");
    out.push_str(&tag.to_ascii_lowercase());
    out.push('>');
}

fn render_node_html(node: &RenderNode, out: &mut String) {
    match node {
        RenderNode::Text(text) => out.push_str(&escape_html(text)),
        RenderNode::Element {
            tag,
            attributes,
            children,
        } => {
            element_open(tag, attributes, out);
            for child in children {
                render_node_html(child, out);
            }
            element_close(tag, out);
        }
    }
}
