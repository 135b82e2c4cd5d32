//! Function registry and overload resolution.
//!
//! Each callable name maps to a set of overloads keyed by call style and an
//! ordered parameter-kind signature. Resolution tries an exact kind match
//! first, then overloads with `Dyn` wildcards against the runtime kinds,
//! and otherwise reports `no such overload`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::EvalError;
use crate::value::{Kind, Value};

/// A function implementation over already-evaluated arguments. For member
/// functions the receiver is the first argument.
pub type FunctionImpl = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// A single function overload.
#[derive(Clone)]
pub struct Overload {
    /// Overload identifier, e.g. `"starts_with_string"`.
    pub id: String,
    /// Whether this is a member overload (`receiver.f(args)`).
    pub is_member: bool,
    /// Parameter kinds, receiver first for member overloads. `Kind::Dyn`
    /// entries match any runtime kind.
    pub params: Vec<Kind>,
    /// Variadic overloads accept extra trailing arguments matching the last
    /// declared parameter kind.
    pub vararg: bool,
    pub implementation: FunctionImpl,
}

impl Overload {
    pub fn function<F>(id: impl Into<String>, params: Vec<Kind>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            is_member: false,
            params,
            vararg: false,
            implementation: Arc::new(f),
        }
    }

    pub fn method<F>(id: impl Into<String>, params: Vec<Kind>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            is_member: true,
            params,
            vararg: false,
            implementation: Arc::new(f),
        }
    }

    pub fn with_vararg(mut self) -> Self {
        self.vararg = true;
        self
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.implementation)(args)
    }

    fn arity_matches(&self, count: usize) -> bool {
        if self.vararg {
            count >= self.params.len()
        } else {
            count == self.params.len()
        }
    }

    fn param_kind(&self, index: usize) -> Kind {
        if index < self.params.len() {
            self.params[index]
        } else {
            // Extra variadic arguments take the last declared kind.
            *self.params.last().unwrap_or(&Kind::Dyn)
        }
    }

    /// Exact signature match: every argument kind equal to its parameter
    /// kind (`Dyn` parameters are not exact).
    fn matches_exact(&self, kinds: &[Kind]) -> bool {
        self.arity_matches(kinds.len())
            && kinds
                .iter()
                .enumerate()
                .all(|(i, k)| self.param_kind(i) == *k)
    }

    /// Structural compatibility: `Dyn` parameters accept anything.
    fn matches_dyn(&self, kinds: &[Kind]) -> bool {
        self.arity_matches(kinds.len())
            && kinds.iter().enumerate().all(|(i, k)| {
                let p = self.param_kind(i);
                p == Kind::Dyn || p == *k
            })
    }
}

impl std::fmt::Debug for Overload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Overload")
            .field("id", &self.id)
            .field("is_member", &self.is_member)
            .field("params", &self.params)
            .finish()
    }
}

/// A function with all of its overloads.
#[derive(Debug, Clone, Default)]
pub struct Function {
    pub name: String,
    pub overloads: Vec<Overload>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            overloads: Vec::new(),
        }
    }

    pub fn with_overload(mut self, overload: Overload) -> Self {
        self.overloads.push(overload);
        self
    }

    pub fn with_overloads(mut self, overloads: impl IntoIterator<Item = Overload>) -> Self {
        self.overloads.extend(overloads);
        self
    }
}

/// Registry of callable functions.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Function>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function. Overloads merge when the name already exists.
    pub fn register(&mut self, function: Function) {
        if let Some(existing) = self.functions.get_mut(&function.name) {
            existing.overloads.extend(function.overloads);
        } else {
            self.functions.insert(function.name.clone(), function);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    /// Resolve and invoke `name` for the given arguments.
    pub fn dispatch(&self, name: &str, args: &[Value], is_member: bool) -> Value {
        let function = match self.functions.get(name) {
            Some(f) => f,
            None => return Value::error(EvalError::unknown_function(name)),
        };

        let kinds: Vec<Kind> = args.iter().map(Value::kind).collect();

        for overload in &function.overloads {
            if overload.is_member == is_member && overload.matches_exact(&kinds) {
                return overload.call(args);
            }
        }
        for overload in &function.overloads {
            if overload.is_member == is_member && overload.matches_dyn(&kinds) {
                return overload.call(args);
            }
        }
        // A call written in one style may still resolve in the other when
        // the signature is unambiguous (e.g. global `matches(s, re)` vs
        // `s.matches(re)`).
        for overload in &function.overloads {
            if overload.is_member != is_member && overload.matches_exact(&kinds) {
                return overload.call(args);
            }
        }
        for overload in &function.overloads {
            if overload.is_member != is_member && overload.matches_dyn(&kinds) {
                return overload.call(args);
            }
        }

        Value::error(EvalError::no_matching_overload(&format!(
            "{}({})",
            name,
            kinds
                .iter()
                .map(|k| format!("{:?}", k).to_lowercase())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    /// Merge another registry into this one.
    pub fn merge(&mut self, other: FunctionRegistry) {
        for (_, function) in other.functions {
            self.register(function);
        }
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Function)> {
        self.functions.iter()
    }
}
