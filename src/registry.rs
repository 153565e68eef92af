//! Dynamic component registry with per-session cache.
//!
//! The vocabulary is large and a page's islands reference a handful of tags;
//! bundling every component into every page would defeat the point of
//! islands. Instead each component registers an async loader, and
//! `preload_all` fetches exactly the set a page needs, in parallel, with
//! all-settled semantics: one broken or slow loader never stalls the rest.
//!
//! Reading loaded components is a two-phase protocol. `preload_all` returns
//! a [`PreloadedRegistry`], the only type whose `get` is unambiguous: holding
//! one proves the preload completed. The legacy `get_loaded` entry point
//! stays for shells that thread the registry itself around; calling it
//! before preload is a contract violation that logs and returns `None`,
//! never a crash.

use futures::future::{join_all, BoxFuture};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{info, warn};

use crate::islands::Island;
use crate::vocabulary::TagCategory;

/// A loaded, hydratable component implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub name: String,
    pub category: TagCategory,
    /// Code-splitting unit this component ships in.
    pub chunk: Option<String>,
}

impl Component {
    pub fn new(name: &str, category: TagCategory) -> Self {
        Self {
            name: name.to_string(),
            category,
            chunk: None,
        }
    }

    pub fn with_chunk(mut self, chunk: &str) -> Self {
        self.chunk = Some(chunk.to_string());
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ComponentLoadError {
    #[error("component '{0}' is not registered")]
    NotRegistered(String),
    #[error("loader for '{name}' failed: {reason}")]
    LoaderFailed { name: String, reason: String },
}

pub type ComponentLoader =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Component, ComponentLoadError>> + Send + Sync>;

/// Wrap an async closure as a [`ComponentLoader`].
pub fn loader<F, Fut>(f: F) -> ComponentLoader
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Component, ComponentLoadError>> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, Result<Component, ComponentLoadError>> {
        Box::pin(f())
    })
}

#[derive(Debug, Clone, Default)]
pub struct LoaderMetadata {
    /// Overrides the component's own chunk name in manifests.
    pub chunk: Option<String>,
}

pub struct ComponentRegistration {
    pub name: String,
    pub metadata: LoaderMetadata,
    loader: ComponentLoader,
}

/// How a preload batch settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreloadReport {
    pub requested: usize,
    pub loaded: usize,
    pub failed: usize,
}

/// Name → loader table plus the per-session loaded-component cache.
///
/// An explicit object with a lifecycle, not a module-level singleton: tests
/// and concurrent render sessions each get their own.
#[derive(Default)]
pub struct ComponentRegistry {
    registrations: RwLock<Vec<ComponentRegistration>>,
    loaded: RwLock<HashMap<String, Arc<Component>>>,
    preload_done: AtomicBool,
}

fn normalize(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_loader(&self, name: &str, loader: ComponentLoader) {
        self.register_loader_with(name, loader, LoaderMetadata::default());
    }

    pub fn register_loader_with(
        &self,
        name: &str,
        loader: ComponentLoader,
        metadata: LoaderMetadata,
    ) {
        if let Ok(mut regs) = self.registrations.write() {
            regs.push(ComponentRegistration {
                name: name.to_string(),
                metadata,
                loader,
            });
        }
    }

    /// Resolve a component, invoking its loader at most once per session.
    /// Lookup is case-insensitive, first registration wins. Misses and
    /// loader failures log and return `None`; this never panics and never
    /// propagates an error to the caller.
    pub async fn load_component(&self, name: &str) -> Option<Arc<Component>> {
        let key = normalize(name);

        if let Some(hit) = self.loaded.read().ok().and_then(|l| l.get(&key).cloned()) {
            return Some(hit);
        }

        let loader = {
            let regs = self.registrations.read().ok()?;
            regs.iter()
                .find(|r| normalize(&r.name) == key)
                .map(|r| r.loader.clone())
        };

        let loader = match loader {
            Some(l) => l,
            None => {
                warn!(component = name, "component lookup miss: not registered");
                return None;
            }
        };

        match loader().await {
            Ok(component) => {
                let component = Arc::new(component);
                if let Ok(mut cache) = self.loaded.write() {
                    // First writer wins; the cache is append-only.
                    return Some(
                        cache
                            .entry(key)
                            .or_insert_with(|| component.clone())
                            .clone(),
                    );
                }
                Some(component)
            }
            Err(e) => {
                warn!(component = name, error = %e, "component load failed");
                None
            }
        }
    }

    /// Load every component the given islands reference: deduplicate names,
    /// issue all loads concurrently, and settle when each has succeeded or
    /// failed. Returns the proof-of-preload handle.
    pub async fn preload_all(&self, islands: &[Island]) -> PreloadedRegistry<'_> {
        let mut seen = HashSet::new();
        let names: Vec<&str> = islands
            .iter()
            .map(|i| i.component_name.as_str())
            .filter(|n| seen.insert(normalize(n)))
            .collect();

        let results = join_all(names.iter().map(|n| self.load_component(n))).await;

        let loaded = results.iter().filter(|r| r.is_some()).count();
        let report = PreloadReport {
            requested: names.len(),
            loaded,
            failed: names.len() - loaded,
        };
        info!(
            requested = report.requested,
            loaded = report.loaded,
            failed = report.failed,
            "component preload settled"
        );

        self.preload_done.store(true, Ordering::SeqCst);
        PreloadedRegistry {
            registry: self,
            report,
        }
    }

    /// Synchronous cache read for use after `preload_all` has completed.
    /// Calling it earlier is a caller contract violation: it logs a warning
    /// and returns `None`.
    pub fn get_loaded(&self, name: &str) -> Option<Arc<Component>> {
        if !self.preload_done.load(Ordering::SeqCst) {
            warn!(
                component = name,
                "get_loaded called before preload_all completed"
            );
            return None;
        }
        self.loaded
            .read()
            .ok()
            .and_then(|l| l.get(&normalize(name)).cloned())
    }

    /// Drop the loaded-component cache (test isolation). Registrations stay.
    pub fn clear(&self) {
        if let Ok(mut cache) = self.loaded.write() {
            cache.clear();
        }
        self.preload_done.store(false, Ordering::SeqCst);
    }
}

/// Proof that a preload completed: obtainable only from `preload_all`, so
/// its `get` has no unloaded-state ambiguity.
pub struct PreloadedRegistry<'a> {
    registry: &'a ComponentRegistry,
    report: PreloadReport,
}

impl<'a> PreloadedRegistry<'a> {
    /// Cache read. `None` means the component failed to load (already
    /// logged), in which case its island degrades to a placeholder.
    pub fn get(&self, name: &str) -> Option<Arc<Component>> {
        self.registry
            .loaded
            .read()
            .ok()
            .and_then(|l| l.get(&normalize(name)).cloned())
    }

    pub fn report(&self) -> PreloadReport {
        self.report
    }
}
