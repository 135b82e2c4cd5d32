//! Variable bindings for CEL evaluation.
//!
//! An `Activation` resolves identifiers to values during evaluation.
//! Bindings may be declared under qualified names (`"a.b.c"`); the
//! evaluator probes the longest declared prefix of a selection chain
//! before falling back to field accesses.

use std::collections::HashMap;
use std::sync::Arc;

use crate::value::Value;

/// Trait for resolving variable bindings during evaluation.
pub trait Activation: Send + Sync {
    /// Resolve a (possibly qualified) variable name to its value.
    ///
    /// Returns `None` if the variable is not bound here. Unbound lookups
    /// surface as `UndeclaredReference` errors only when the identifier is
    /// actually evaluated.
    fn resolve(&self, name: &str) -> Option<Value>;

    /// Whether a variable is bound, without producing its value.
    fn has(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }
}

/// A simple activation backed by a HashMap.
#[derive(Debug, Clone, Default)]
pub struct MapActivation {
    bindings: HashMap<String, Value>,
}

impl MapActivation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_iter(bindings: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            bindings: bindings.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.bindings.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.bindings.remove(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl Activation for MapActivation {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.bindings.get(name).cloned()
    }

    fn has(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }
}

/// An activation frame layered over a parent. Comprehension iteration
/// variables and `cel.bind` locals live in frames like this; frames are
/// pushed on scope entry and dropped on exit, so inner frames shadow outer
/// bindings for exactly the subtree they cover.
pub struct HierarchicalActivation<'a> {
    parent: &'a dyn Activation,
    local: HashMap<String, Value>,
}

impl<'a> HierarchicalActivation<'a> {
    pub fn new(parent: &'a dyn Activation) -> Self {
        Self {
            parent,
            local: HashMap::new(),
        }
    }

    pub fn with_binding(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.local.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.local.insert(name.into(), value.into());
    }
}

impl Activation for HierarchicalActivation<'_> {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.local
            .get(name)
            .cloned()
            .or_else(|| self.parent.resolve(name))
    }

    fn has(&self, name: &str) -> bool {
        self.local.contains_key(name) || self.parent.has(name)
    }
}

/// An activation with no bindings.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyActivation;

impl EmptyActivation {
    pub fn new() -> Self {
        Self
    }
}

impl Activation for EmptyActivation {
    fn resolve(&self, _name: &str) -> Option<Value> {
        None
    }

    fn has(&self, _name: &str) -> bool {
        false
    }
}

impl<T: Activation> Activation for Arc<T> {
    fn resolve(&self, name: &str) -> Option<Value> {
        (**self).resolve(name)
    }

    fn has(&self, name: &str) -> bool {
        (**self).has(name)
    }
}

impl<T: Activation + ?Sized> Activation for &T {
    fn resolve(&self, name: &str) -> Option<Value> {
        (**self).resolve(name)
    }

    fn has(&self, name: &str) -> bool {
        (**self).has(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_activation_basics() {
        let mut activation = MapActivation::new();
        activation.insert("x", 42i64);
        activation.insert("name", "hello");

        assert_eq!(activation.resolve("x"), Some(Value::Int(42)));
        assert_eq!(activation.resolve("name"), Some(Value::from("hello")));
        assert_eq!(activation.resolve("unknown"), None);
        assert!(activation.has("x"));
        assert!(!activation.has("unknown"));
    }

    #[test]
    fn qualified_names_are_plain_keys() {
        let mut activation = MapActivation::new();
        activation.insert("a.b.c", 1i64);
        activation.insert("a.b", 2i64);

        assert_eq!(activation.resolve("a.b.c"), Some(Value::Int(1)));
        assert_eq!(activation.resolve("a.b"), Some(Value::Int(2)));
        assert_eq!(activation.resolve("a"), None);
    }

    #[test]
    fn hierarchical_shadowing() {
        let parent = MapActivation::from_iter([
            ("x".to_string(), Value::Int(1)),
            ("y".to_string(), Value::Int(2)),
        ]);

        let child = HierarchicalActivation::new(&parent).with_binding("x", 10i64);
        assert_eq!(child.resolve("x"), Some(Value::Int(10)));
        assert_eq!(child.resolve("y"), Some(Value::Int(2)));
        assert_eq!(child.resolve("z"), None);

        let grandchild = HierarchicalActivation::new(&child).with_binding("x", 100i64);
        assert_eq!(grandchild.resolve("x"), Some(Value::Int(100)));
    }
}
