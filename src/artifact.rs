//! Compiled template artifact and the compile pipeline.
//!
//! `compile` runs parse → limit validation → island detection → prop
//! precomputation and produces a [`CompiledTemplate`]: pure data, safe to
//! serialize, cache and ship. Compilation is deterministic and side-effect
//! free, so results are cached by content hash; identical sources share one
//! artifact regardless of who saved them.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::islands::{self, SkeletonNode};
use crate::parse;
use crate::static_eval;
use crate::validate::{self, Diagnostic, LimitExceeded, LimitWarning, Limits};
use crate::vocabulary::VOCABULARY_VERSION;

/// Usage measured at compile time, kept with the artifact so hosts can show
/// quota consumption without reparsing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitsSnapshot {
    pub component_count: usize,
    pub island_count: usize,
    pub computed_var_count: usize,
    pub size_bytes: usize,
}

/// The persisted output of compilation. Forward-compatible: readers ignore
/// unknown fields, and every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompiledTemplate {
    pub vocabulary_version: u32,
    pub template: String,
    pub skeleton: Vec<SkeletonNode>,
    pub islands: Vec<islands::Island>,
    pub limits: LimitsSnapshot,
}

impl Default for CompiledTemplate {
    fn default() -> Self {
        Self {
            vocabulary_version: VOCABULARY_VERSION,
            template: String::new(),
            skeleton: Vec::new(),
            islands: Vec::new(),
            limits: LimitsSnapshot::default(),
        }
    }
}

impl CompiledTemplate {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("artifact serialization is infallible")
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub limits: Limits,
}

#[derive(Debug, Clone)]
pub struct CompileResult {
    pub artifact: CompiledTemplate,
    pub warnings: Vec<LimitWarning>,
    pub content_hash: String,
}

/// Why compilation produced no artifact. Either the author's markup is
/// broken (every problem listed) or a resource ceiling was crossed.
#[derive(Debug, Clone, Error)]
pub enum CompileFailure {
    #[error("template has {} error(s)", .0.len())]
    Syntax(Vec<Diagnostic>),
    #[error(transparent)]
    Limit(#[from] LimitExceeded),
}

/// Content hash used as the cache key.
pub fn compute_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compile one template. No partial artifact survives a failure.
pub fn compile(
    name: &str,
    source: &str,
    options: &CompileOptions,
) -> Result<CompileResult, CompileFailure> {
    let ast = parse::parse(source, name).map_err(CompileFailure::Syntax)?;
    let warnings = validate::validate(&ast, &options.limits)?;
    let counts = validate::measure(&ast);

    let mut detection = islands::detect(&ast);
    for island in &mut detection.islands {
        static_eval::precompute(island);
    }

    let artifact = CompiledTemplate {
        vocabulary_version: VOCABULARY_VERSION,
        template: name.to_string(),
        limits: LimitsSnapshot {
            component_count: counts.components,
            island_count: detection.islands.len(),
            computed_var_count: counts.computed_vars,
            size_bytes: counts.size_bytes,
        },
        skeleton: detection.skeleton,
        islands: detection.islands,
    };

    Ok(CompileResult {
        artifact,
        warnings,
        content_hash: compute_hash(source),
    })
}

/// Compile many templates in parallel, one result per input.
pub fn compile_batch(
    items: &[(String, String)],
    options: &CompileOptions,
) -> Vec<Result<CompileResult, CompileFailure>> {
    items
        .par_iter()
        .map(|(name, source)| compile(name, source, options))
        .collect()
}

/// In-memory artifact cache keyed by source content hash. Compilation is
/// pure, so a hash hit is always valid.
#[derive(Default)]
pub struct CompileCache {
    entries: RwLock<HashMap<String, Arc<CompileResult>>>,
}

impl CompileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source: &str) -> Option<Arc<CompileResult>> {
        let hash = compute_hash(source);
        self.entries.read().ok()?.get(&hash).cloned()
    }

    pub fn get_or_compile(
        &self,
        name: &str,
        source: &str,
        options: &CompileOptions,
    ) -> Result<Arc<CompileResult>, CompileFailure> {
        let hash = compute_hash(source);
        if let Some(hit) = self.entries.read().ok().and_then(|e| e.get(&hash).cloned()) {
            return Ok(hit);
        }
        let result = Arc::new(compile(name, source, options)?);
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(hash, result.clone());
        }
        Ok(result)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash_is_stable() {
        assert_eq!(compute_hash("abc"), compute_hash("abc"));
        assert_ne!(compute_hash("abc"), compute_hash("abd"));
    }

    #[test]
    fn test_artifact_roundtrip_ignores_unknown_fields() {
        let source = r#"<Card><Text>hello</Text></Card>"#;
        let result = compile("home", source, &CompileOptions::default()).unwrap();
        let mut value: serde_json::Value =
            serde_json::from_str(&result.artifact.to_json()).unwrap();
        // A future writer adds a field this reader doesn't know about.
        value["experimentalHints"] = serde_json::json!({ "streaming": true });
        let reread = CompiledTemplate::from_json(&value.to_string()).unwrap();
        assert_eq!(reread.template, "home");
        assert_eq!(reread.vocabulary_version, VOCABULARY_VERSION);
    }

    #[test]
    fn test_cache_returns_same_artifact_for_same_source() {
        let cache = CompileCache::new();
        let source = r#"<Text>cached</Text>"#;
        let a = cache
            .get_or_compile("a", source, &CompileOptions::default())
            .unwrap();
        let b = cache
            .get_or_compile("b", source, &CompileOptions::default())
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }
}
