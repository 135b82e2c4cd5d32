//! Environment and compiled programs.
//!
//! `Env` collects the function registry, macro registry, proto type
//! registry, and container namespace; `Program` pairs a parsed AST with
//! those registries for repeated evaluation against different activations.

use std::sync::Arc;

use cel_parser::{MacroRegistry, ParseError, ParseOptions, SpannedExpr};
use prost_reflect::DescriptorPool;

use crate::activation::{Activation, EmptyActivation};
use crate::evaluator::{Evaluator, StepBudget};
use crate::ext;
use crate::functions::{Function, FunctionRegistry};
use crate::proto::ProtoRegistry;
use crate::stdlib;
use crate::value::Value;

/// Environment for parsing and evaluating CEL expressions.
#[derive(Clone)]
pub struct Env {
    functions: FunctionRegistry,
    macros: MacroRegistry,
    types: ProtoRegistry,
    container: String,
    strong_enums: bool,
    parse_options: ParseOptions,
}

impl Env {
    /// Environment with no functions registered. Mostly useful in tests;
    /// `with_standard_library()` is the expected entry point.
    pub fn new() -> Self {
        Self {
            functions: FunctionRegistry::new(),
            macros: MacroRegistry::standard(),
            types: ProtoRegistry::default(),
            container: String::new(),
            strong_enums: true,
            parse_options: ParseOptions::default(),
        }
    }

    /// Environment with the standard library registered.
    pub fn with_standard_library() -> Self {
        let mut env = Self::new();
        env.functions = stdlib::standard_functions();
        env
    }

    /// Register every bundled extension library (strings, math, encoders,
    /// lists, optionals).
    pub fn with_all_extensions(mut self) -> Self {
        for f in ext::strings::extension() {
            self.functions.register(f);
        }
        for f in ext::math::extension() {
            self.functions.register(f);
        }
        for f in ext::encoders::extension() {
            self.functions.register(f);
        }
        for f in ext::lists::extension() {
            self.functions.register(f);
        }
        for f in ext::optionals::extension() {
            self.functions.register(f);
        }
        self
    }

    /// Register a custom function.
    pub fn with_function(mut self, function: Function) -> Self {
        self.functions.register(function);
        self
    }

    /// Supply message and enum descriptors from the host.
    pub fn with_descriptor_pool(mut self, pool: DescriptorPool) -> Self {
        self.types = ProtoRegistry::new(pool);
        self
    }

    /// Set the container namespace for qualified name resolution.
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self
    }

    /// Surface enum values as bare integers instead of named values.
    pub fn with_legacy_enums(mut self) -> Self {
        self.strong_enums = false;
        self
    }

    pub fn with_parse_options(mut self, options: ParseOptions) -> Self {
        self.parse_options = options;
        self
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Parse a CEL expression with this environment's macros.
    pub fn parse(&self, source: &str) -> Result<SpannedExpr, ParseError> {
        cel_parser::parse_with_macros(source, self.macros.clone(), &self.parse_options)
    }

    /// Parse a source expression into a reusable program.
    pub fn program(&self, source: &str) -> Result<Program, ParseError> {
        let ast = self.parse(source)?;
        Ok(self.program_from_ast(ast))
    }

    /// Wrap an already-parsed AST into a program.
    pub fn program_from_ast(&self, ast: SpannedExpr) -> Program {
        Program {
            ast: Arc::new(ast),
            functions: Arc::new(self.functions.clone()),
            types: Arc::new(self.types.clone()),
            container: self.container.clone(),
            strong_enums: self.strong_enums,
            step_limit: None,
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::with_standard_library()
    }
}

/// A compiled CEL program, safe to evaluate concurrently against different
/// activations. Evaluation yields exactly one `Value` (possibly an error
/// value); it never panics or raises across the boundary.
#[derive(Clone)]
pub struct Program {
    ast: Arc<SpannedExpr>,
    functions: Arc<FunctionRegistry>,
    types: Arc<ProtoRegistry>,
    container: String,
    strong_enums: bool,
    step_limit: Option<u64>,
}

impl Program {
    pub fn ast(&self) -> &SpannedExpr {
        &self.ast
    }

    /// Bound the number of evaluation steps (node visits plus comprehension
    /// iterations); exceeding it yields a resource-exhaustion error.
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = Some(limit);
        self
    }

    /// Evaluate against the given variable bindings.
    pub fn eval(&self, activation: &dyn Activation) -> Value {
        let budget = self.step_limit.map(StepBudget::new);

        let mut evaluator = Evaluator::new(activation, &self.functions)
            .with_types(&self.types)
            .with_container(&self.container);
        if !self.strong_enums {
            evaluator = evaluator.with_legacy_enums();
        }
        if let Some(ref budget) = budget {
            evaluator = evaluator.with_budget(budget);
        }

        evaluator.eval(&self.ast)
    }

    /// Evaluate with no variable bindings.
    pub fn eval_empty(&self) -> Value {
        self.eval(&EmptyActivation)
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("container", &self.container)
            .field("functions", &format!("{} functions", self.functions.len()))
            .field("step_limit", &self.step_limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::MapActivation;

    #[test]
    fn program_reuse_across_activations() {
        let env = Env::with_standard_library();
        let program = env.program("x * 2").unwrap();

        let mut a = MapActivation::new();
        a.insert("x", 5i64);
        assert_eq!(program.eval(&a), Value::Int(10));

        let mut b = MapActivation::new();
        b.insert("x", 21i64);
        assert_eq!(program.eval(&b), Value::Int(42));
    }

    #[test]
    fn step_limit_stops_runaway_comprehensions() {
        let env = Env::with_standard_library();
        let program = env
            .program("[1, 2, 3, 4, 5].map(x, x * x)")
            .unwrap()
            .with_step_limit(10);
        let result = program.eval_empty();
        assert_eq!(
            result.as_error().unwrap().kind,
            crate::error::EvalErrorKind::ResourceExhausted
        );

        // The same expression fits comfortably in a larger budget.
        let program = env
            .program("[1, 2, 3, 4, 5].map(x, x * x)")
            .unwrap()
            .with_step_limit(10_000);
        assert!(!program.eval_empty().is_error());
    }

    #[test]
    fn eval_is_deterministic() {
        let env = Env::with_standard_library();
        let program = env.program("{'a': 1, 'b': 2}.exists(k, k == 'b')").unwrap();
        let first = program.eval_empty();
        for _ in 0..5 {
            assert_eq!(program.eval_empty(), first);
        }
    }
}
