//! Variable scopes for the hydration runtime.
//!
//! Scopes form a tree: one root frame per island, one child frame per loop
//! iteration (nested loops nest frames). Frames live in an arena and refer to
//! their parent by index, so scope lifetime is explicit: a frame dies when
//! its owning loop iteration or island does, and there are no pointer cycles.
//!
//! Semantics: declare-once per frame; reads resolve through the nearest
//! enclosing frame; writes target the frame where the variable was declared.

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("variable '{0}' is not declared in any enclosing scope")]
    UndeclaredVariable(String),
    #[error("variable '{0}' is already declared in this scope")]
    AlreadyDeclared(String),
    #[error("'{0}' is not iterable")]
    NotIterable(String),
    #[error("'{0}' is not a number")]
    NotANumber(String),
    #[error("'{0}' is not an array")]
    NotAnArray(String),
    #[error("cannot read property '{property}' of {value}")]
    BadPropertyAccess { property: String, value: String },
    #[error("invalid operands for '{op}'")]
    BadOperands { op: &'static str },
}

/// Index of a frame in a [`ScopeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

#[derive(Debug, Default)]
struct Frame {
    vars: HashMap<String, Value>,
    parent: Option<usize>,
}

/// Arena of scope frames for one island.
#[derive(Debug, Default)]
pub struct ScopeArena {
    frames: Vec<Frame>,
}

impl ScopeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the island's root frame.
    pub fn push_root(&mut self) -> ScopeId {
        self.frames.push(Frame::default());
        ScopeId(self.frames.len() - 1)
    }

    /// Create a child frame (loop iteration, nested loop).
    pub fn push_child(&mut self, parent: ScopeId) -> ScopeId {
        self.frames.push(Frame {
            vars: HashMap::new(),
            parent: Some(parent.0),
        });
        ScopeId(self.frames.len() - 1)
    }

    /// Declare a variable in `scope`. Declaring the same name twice in one
    /// frame is an error; shadowing a parent declaration is not.
    pub fn declare(&mut self, scope: ScopeId, name: &str, value: Value) -> Result<(), EvalError> {
        let frame = &mut self.frames[scope.0];
        if frame.vars.contains_key(name) {
            return Err(EvalError::AlreadyDeclared(name.to_string()));
        }
        frame.vars.insert(name.to_string(), value);
        Ok(())
    }

    /// Declare, replacing a previous declaration in the same frame. Used for
    /// idempotent re-renders of `Var` tags whose frame persists.
    pub fn declare_or_replace(&mut self, scope: ScopeId, name: &str, value: Value) {
        self.frames[scope.0].vars.insert(name.to_string(), value);
    }

    /// Read a variable, walking frames outward from `scope`.
    pub fn get(&self, scope: ScopeId, name: &str) -> Option<&Value> {
        let mut current = Some(scope.0);
        while let Some(idx) = current {
            let frame = &self.frames[idx];
            if let Some(v) = frame.vars.get(name) {
                return Some(v);
            }
            current = frame.parent;
        }
        None
    }

    /// Whether `name` resolves from `scope`.
    pub fn is_declared(&self, scope: ScopeId, name: &str) -> bool {
        self.get(scope, name).is_some()
    }

    /// Write a variable. The write lands in the frame that declared the name,
    /// never implicitly in `scope` itself.
    pub fn set(&mut self, scope: ScopeId, name: &str, value: Value) -> Result<(), EvalError> {
        let mut current = Some(scope.0);
        while let Some(idx) = current {
            if self.frames[idx].vars.contains_key(name) {
                self.frames[idx].vars.insert(name.to_string(), value);
                return Ok(());
            }
            current = self.frames[idx].parent;
        }
        Err(EvalError::UndeclaredVariable(name.to_string()))
    }

    /// Mutate a declared variable in place through a closure.
    pub fn update<F>(&mut self, scope: ScopeId, name: &str, f: F) -> Result<(), EvalError>
    where
        F: FnOnce(&mut Value) -> Result<(), EvalError>,
    {
        let mut current = Some(scope.0);
        while let Some(idx) = current {
            if let Some(slot) = self.frames[idx].vars.get_mut(name) {
                return f(slot);
            }
            current = self.frames[idx].parent;
        }
        Err(EvalError::UndeclaredVariable(name.to_string()))
    }

    /// Drop every frame above `root`, keeping the root frame's variables.
    /// Called before a re-render: loop-iteration frames from the previous
    /// render die here.
    pub fn truncate_to(&mut self, root: ScopeId) {
        self.frames.truncate(root.0 + 1);
    }

    /// Clear a single frame's variables (loop-iteration teardown within a
    /// render pass).
    pub fn release(&mut self, scope: ScopeId) {
        self.frames[scope.0].vars.clear();
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_declare_and_read() {
        let mut arena = ScopeArena::new();
        let root = arena.push_root();
        arena.declare(root, "count", json!(0)).unwrap();
        assert_eq!(arena.get(root, "count"), Some(&json!(0)));
        assert!(arena.get(root, "missing").is_none());
    }

    #[test]
    fn test_declare_once_per_frame() {
        let mut arena = ScopeArena::new();
        let root = arena.push_root();
        arena.declare(root, "x", json!(1)).unwrap();
        assert_eq!(
            arena.declare(root, "x", json!(2)),
            Err(EvalError::AlreadyDeclared("x".into()))
        );
        // Shadowing in a child frame is allowed.
        let child = arena.push_child(root);
        arena.declare(child, "x", json!(2)).unwrap();
        assert_eq!(arena.get(child, "x"), Some(&json!(2)));
        assert_eq!(arena.get(root, "x"), Some(&json!(1)));
    }

    #[test]
    fn test_reads_walk_outward() {
        let mut arena = ScopeArena::new();
        let root = arena.push_root();
        arena.declare(root, "total", json!(10)).unwrap();
        let iter = arena.push_child(root);
        let inner = arena.push_child(iter);
        assert_eq!(arena.get(inner, "total"), Some(&json!(10)));
    }

    #[test]
    fn test_writes_target_declaring_frame() {
        let mut arena = ScopeArena::new();
        let root = arena.push_root();
        arena.declare(root, "count", json!(0)).unwrap();
        let iter = arena.push_child(root);
        arena.set(iter, "count", json!(5)).unwrap();
        // The write landed in root, not in the iteration frame.
        assert_eq!(arena.get(root, "count"), Some(&json!(5)));

        assert_eq!(
            arena.set(iter, "ghost", json!(1)),
            Err(EvalError::UndeclaredVariable("ghost".into()))
        );
    }

    #[test]
    fn test_iteration_frames_are_invisible_outside() {
        let mut arena = ScopeArena::new();
        let root = arena.push_root();
        let iter = arena.push_child(root);
        arena.declare(iter, "item", json!("a")).unwrap();
        assert!(arena.get(root, "item").is_none());

        arena.truncate_to(root);
        assert_eq!(arena.frame_count(), 1);
    }
}
