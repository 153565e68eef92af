//! # Islet Compiler & Hydration Runtime
//!
//! ## Pipeline Invariants
//!
//! 1. **Closed vocabulary**: every tag in a template belongs to the
//!    versioned component table in `vocabulary`. Unknown tags are a parse
//!    error with a source span, never a pass-through.
//!
//! 2. **Batched diagnostics**: parsing reports every problem it can find in
//!    one pass. A failed compile produces no partial artifact.
//!
//! 3. **Pure compilation**: parse → validate → detect → precompute is
//!    deterministic and side-effect free. Identical source yields a
//!    byte-identical artifact, which is why artifacts cache by content hash
//!    and island ids stay stable across recompiles of unchanged input.
//!
//! 4. **Minimal islands**: only subtrees that need runtime behavior hydrate.
//!    Static siblings are hoisted into the skeleton; two dynamic siblings are
//!    two independently loadable, independently failing islands.
//!
//! 5. **Two-phase loading**: `ComponentRegistry::preload_all` settles every
//!    loader (success or failure) and returns a `PreloadedRegistry`, the only
//!    type whose reads are unambiguous. Loader failures degrade the affected
//!    island, never the page.
//!
//! 6. **Scoped state**: each island owns its variable scopes. Reads walk
//!    outward, writes land in the declaring frame, loop iterations get child
//!    frames, and nothing leaks across islands.

mod artifact;
mod expression;
mod islands;
mod parse;
mod registry;
mod runtime;
mod scope;
mod static_eval;
mod validate;
mod vocabulary;

#[cfg(test)]
mod island_tests;
#[cfg(test)]
mod limit_tests;
#[cfg(test)]
mod parse_tests;
#[cfg(test)]
mod registry_tests;

pub use artifact::{
    compile, compile_batch, compute_hash, CompileCache, CompileFailure, CompileOptions,
    CompileResult, CompiledTemplate, LimitsSnapshot,
};
pub use expression::{parse as parse_expression, BinOp, Expr, UnOp};
pub use islands::{detect, Detection, Island, SkeletonNode};
pub use parse::parse;
pub use registry::{
    loader, Component, ComponentLoadError, ComponentLoader, ComponentRegistration,
    ComponentRegistry, LoaderMetadata, PreloadReport, PreloadedRegistry,
};
pub use runtime::{
    ActionStep, HostBindings, HydrationError, IslandState, RenderNode, Runtime,
};
pub use scope::{EvalError, ScopeArena, ScopeId};
pub use static_eval::{precompute, precompute_props, PropDescriptor};
pub use validate::{
    measure, validate, Attribute, AttributeValue, ComponentNode, Diagnostic, ExpressionNode,
    LimitExceeded, LimitMetric, LimitWarning, Limits, SourceSpan, TemplateAst, TemplateNode,
    TextNode, UsageCounts,
};
pub use vocabulary::{event_trigger, lookup, EventTrigger, TagCategory, TagSpec, VOCABULARY_VERSION};
