//! Macro system for the CEL parser.
//!
//! Macros are syntactic transformations applied at parse time: specific call
//! shapes (like `list.all(x, cond)`) are rewritten into expanded AST nodes
//! (like `Comprehension`). Misuse of a macro (wrong argument shape, reserved
//! pseudo-function) is a parse error, not a runtime error.
//!
//! Macros are keyed by `name:arg_count:is_receiver`, so different argument
//! counts of one name can have separate definitions.

use std::collections::HashMap;

use crate::ast::{BinaryOp, Expr, ListElement, Span, Spanned, SpannedExpr, UnaryOp};

/// Accumulator variable name used in comprehension expansions. Iteration
/// variables may not take this name.
pub const ACCU_VAR: &str = "__result__";

/// Whether a macro is called as a global function or as a method on a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroStyle {
    /// Global call: `name(args...)`, including dotted names like `cel.bind`.
    Global,
    /// Receiver-style call: `receiver.name(args...)`.
    Receiver,
}

/// Expected argument count for a macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgCount {
    Exact(usize),
    /// Variable arguments with a minimum count.
    VarArg(usize),
}

impl ArgCount {
    pub fn matches(&self, count: usize) -> bool {
        match self {
            ArgCount::Exact(n) => count == *n,
            ArgCount::VarArg(min) => count >= *min,
        }
    }

    pub fn count(&self) -> usize {
        match self {
            ArgCount::Exact(n) => *n,
            ArgCount::VarArg(min) => *min,
        }
    }

    pub fn is_vararg(&self) -> bool {
        matches!(self, ArgCount::VarArg(_))
    }
}

/// Result of macro expansion.
#[derive(Debug)]
pub enum MacroExpansion {
    /// Macro expanded to this expression.
    Expanded(SpannedExpr),
    /// The call matched a macro signature but its arguments were invalid.
    Error(String),
}

/// Context handed to macro expanders for creating synthetic AST nodes.
pub struct MacroContext<'a> {
    next_id_fn: &'a mut dyn FnMut() -> i64,
}

impl<'a> MacroContext<'a> {
    pub fn new(next_id_fn: &'a mut dyn FnMut() -> i64) -> Self {
        Self { next_id_fn }
    }

    pub fn next_id(&mut self) -> i64 {
        (self.next_id_fn)()
    }

    /// Create a synthetic spanned expression.
    pub fn expr(&mut self, node: Expr, span: &Span) -> SpannedExpr {
        let id = self.next_id();
        Spanned::new(id, node, span.clone())
    }

    fn ident(&mut self, name: &str, span: &Span) -> SpannedExpr {
        self.expr(Expr::Ident(name.to_string()), span)
    }

    fn accu(&mut self, span: &Span) -> SpannedExpr {
        self.ident(ACCU_VAR, span)
    }

    fn binary(&mut self, op: BinaryOp, left: SpannedExpr, right: SpannedExpr, span: &Span) -> SpannedExpr {
        self.expr(
            Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        )
    }

    fn ternary(
        &mut self,
        cond: SpannedExpr,
        then_expr: SpannedExpr,
        else_expr: SpannedExpr,
        span: &Span,
    ) -> SpannedExpr {
        self.expr(
            Expr::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            span,
        )
    }

    fn not(&mut self, expr: SpannedExpr, span: &Span) -> SpannedExpr {
        self.expr(
            Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            },
            span,
        )
    }

    fn singleton_list(&mut self, elem: SpannedExpr, span: &Span) -> SpannedExpr {
        self.expr(
            Expr::List(vec![ListElement {
                expr: elem,
                optional: false,
            }]),
            span,
        )
    }

    fn global_call(&mut self, function: &str, args: Vec<SpannedExpr>, span: &Span) -> SpannedExpr {
        self.expr(
            Expr::Call {
                target: None,
                function: function.to_string(),
                args,
            },
            span,
        )
    }

    fn member_call(
        &mut self,
        target: SpannedExpr,
        function: &str,
        args: Vec<SpannedExpr>,
        span: &Span,
    ) -> SpannedExpr {
        self.expr(
            Expr::Call {
                target: Some(Box::new(target)),
                function: function.to_string(),
                args,
            },
            span,
        )
    }
}

/// Macro expander function type.
pub type MacroExpander = fn(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion;

/// Definition of a single macro.
#[derive(Clone)]
pub struct Macro {
    pub name: &'static str,
    pub style: MacroStyle,
    pub arg_count: ArgCount,
    pub expander: MacroExpander,
}

impl Macro {
    pub const fn new(
        name: &'static str,
        style: MacroStyle,
        arg_count: ArgCount,
        expander: MacroExpander,
    ) -> Self {
        Self {
            name,
            style,
            arg_count,
            expander,
        }
    }

    fn key(&self) -> String {
        make_key(
            self.name,
            self.arg_count.count(),
            self.style == MacroStyle::Receiver,
        )
    }
}

impl std::fmt::Debug for Macro {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Macro")
            .field("name", &self.name)
            .field("style", &self.style)
            .field("arg_count", &self.arg_count)
            .finish_non_exhaustive()
    }
}

fn make_key(name: &str, arg_count: usize, is_receiver: bool) -> String {
    format!("{}:{}:{}", name, arg_count, is_receiver)
}

/// Registry of macros with lookup by name, argument count, and style.
#[derive(Debug, Clone)]
pub struct MacroRegistry {
    macros: HashMap<String, Macro>,
    /// Minimum arg count per `name:is_receiver`, for vararg fallback lookup.
    vararg_keys: HashMap<String, usize>,
}

impl Default for MacroRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl MacroRegistry {
    pub fn new() -> Self {
        Self {
            macros: HashMap::new(),
            vararg_keys: HashMap::new(),
        }
    }

    /// Registry with the standard CEL macros plus the bindings/block and
    /// optionals extension macros.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for macro_def in STANDARD_MACROS {
            registry.register(macro_def.clone());
        }
        registry
    }

    pub fn register(&mut self, macro_def: Macro) {
        if macro_def.arg_count.is_vararg() {
            let vararg_key = format!(
                "{}:{}",
                macro_def.name,
                macro_def.style == MacroStyle::Receiver
            );
            self.vararg_keys
                .insert(vararg_key, macro_def.arg_count.count());
        }
        self.macros.insert(macro_def.key(), macro_def);
    }

    /// Look up a macro: exact `name:argc:style` first, vararg fallback second.
    pub fn lookup(&self, name: &str, arg_count: usize, is_receiver: bool) -> Option<&Macro> {
        let exact_key = make_key(name, arg_count, is_receiver);
        if let Some(m) = self.macros.get(&exact_key) {
            return Some(m);
        }

        let vararg_lookup_key = format!("{}:{}", name, is_receiver);
        if let Some(&min_args) = self.vararg_keys.get(&vararg_lookup_key) {
            if arg_count >= min_args {
                return self.macros.get(&make_key(name, min_args, is_receiver));
            }
        }

        None
    }

    pub fn contains(&self, name: &str) -> bool {
        self.macros.values().any(|m| m.name == name)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}

// ============================================================================
// Standard CEL macros
// ============================================================================

pub static STANDARD_MACROS: &[Macro] = &[
    Macro::new("has", MacroStyle::Global, ArgCount::Exact(1), expand_has),
    Macro::new("all", MacroStyle::Receiver, ArgCount::Exact(2), expand_all),
    Macro::new("all", MacroStyle::Receiver, ArgCount::Exact(3), expand_all),
    Macro::new("exists", MacroStyle::Receiver, ArgCount::Exact(2), expand_exists),
    Macro::new("exists", MacroStyle::Receiver, ArgCount::Exact(3), expand_exists),
    Macro::new("exists_one", MacroStyle::Receiver, ArgCount::Exact(2), expand_exists_one),
    Macro::new("exists_one", MacroStyle::Receiver, ArgCount::Exact(3), expand_exists_one),
    Macro::new("map", MacroStyle::Receiver, ArgCount::Exact(2), expand_map),
    Macro::new("map", MacroStyle::Receiver, ArgCount::Exact(3), expand_map),
    Macro::new("filter", MacroStyle::Receiver, ArgCount::Exact(2), expand_filter),
    // Optionals extension macros.
    Macro::new("optMap", MacroStyle::Receiver, ArgCount::Exact(2), expand_opt_map),
    Macro::new("optFlatMap", MacroStyle::Receiver, ArgCount::Exact(2), expand_opt_flat_map),
    // Bindings / block pseudo-functions.
    Macro::new("cel.bind", MacroStyle::Global, ArgCount::Exact(3), expand_bind),
    Macro::new("cel.block", MacroStyle::Global, ArgCount::Exact(2), expand_block),
    Macro::new("cel.index", MacroStyle::Global, ArgCount::Exact(1), expand_index_slot),
    // Reserved for expanded forms only; user code may not call these.
    Macro::new("cel.iterVar", MacroStyle::Global, ArgCount::VarArg(0), expand_reserved),
    Macro::new("cel.accuVar", MacroStyle::Global, ArgCount::VarArg(0), expand_reserved),
];

// === Helpers ===

/// Extract an iteration variable name, rejecting non-identifiers and the
/// accumulator name.
fn iter_var(expr: &SpannedExpr) -> Result<String, String> {
    match &expr.node {
        Expr::Ident(name) => {
            if name == ACCU_VAR {
                Err(format!(
                    "iteration variable may not shadow the accumulator '{}'",
                    ACCU_VAR
                ))
            } else {
                Ok(name.clone())
            }
        }
        _ => Err("iteration variable must be a simple identifier".to_string()),
    }
}

struct ComprehensionParts {
    iter_var: String,
    iter_var2: String,
    range: SpannedExpr,
    accu_init: SpannedExpr,
    loop_condition: SpannedExpr,
    loop_step: SpannedExpr,
    result: SpannedExpr,
}

fn comprehension(ctx: &mut MacroContext, span: Span, parts: ComprehensionParts) -> MacroExpansion {
    let id = ctx.next_id();
    MacroExpansion::Expanded(Spanned::new(
        id,
        Expr::Comprehension {
            iter_var: parts.iter_var,
            iter_var2: parts.iter_var2,
            iter_range: Box::new(parts.range),
            accu_var: ACCU_VAR.to_string(),
            accu_init: Box::new(parts.accu_init),
            loop_condition: Box::new(parts.loop_condition),
            loop_step: Box::new(parts.loop_step),
            result: Box::new(parts.result),
        },
        span,
    ))
}

/// Split macro args into (iter_var, iter_var2, body) for the 2- and 3-arg
/// forms of `all`/`exists`/`exists_one`.
fn split_iter_args(args: &[SpannedExpr]) -> Result<(String, String, SpannedExpr), String> {
    match args.len() {
        2 => Ok((iter_var(&args[0])?, String::new(), args[1].clone())),
        3 => {
            let v1 = iter_var(&args[0])?;
            let v2 = iter_var(&args[1])?;
            if v1 == v2 {
                return Err("iteration variables must be distinct".to_string());
            }
            Ok((v1, v2, args[2].clone()))
        }
        _ => unreachable!("registry enforces arity"),
    }
}

// === has() ===

/// `has(m.f)` becomes a test-only field selection.
fn expand_has(
    ctx: &mut MacroContext,
    span: Span,
    _receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    let arg = args.into_iter().next().expect("arity checked");
    match arg.node {
        Expr::Select {
            operand,
            field,
            test_only: false,
            optional: false,
        } => {
            let id = ctx.next_id();
            MacroExpansion::Expanded(Spanned::new(
                id,
                Expr::Select {
                    operand,
                    field,
                    test_only: true,
                    optional: false,
                },
                span,
            ))
        }
        _ => MacroExpansion::Error(
            "invalid argument to has() macro: field selection required".to_string(),
        ),
    }
}

// === all / exists / exists_one ===

fn expand_all(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    let receiver = receiver.expect("receiver macro");
    let (iter_var, iter_var2, pred) = match split_iter_args(&args) {
        Ok(p) => p,
        Err(e) => return MacroExpansion::Error(e),
    };

    let accu_init = ctx.expr(Expr::Bool(true), &span);
    let loop_condition = ctx.accu(&span);
    let accu_ref = ctx.accu(&span);
    let loop_step = ctx.binary(BinaryOp::And, accu_ref, pred, &span);
    let result = ctx.accu(&span);

    comprehension(
        ctx,
        span,
        ComprehensionParts {
            iter_var,
            iter_var2,
            range: receiver,
            accu_init,
            loop_condition,
            loop_step,
            result,
        },
    )
}

fn expand_exists(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    let receiver = receiver.expect("receiver macro");
    let (iter_var, iter_var2, pred) = match split_iter_args(&args) {
        Ok(p) => p,
        Err(e) => return MacroExpansion::Error(e),
    };

    let accu_init = ctx.expr(Expr::Bool(false), &span);
    let accu_ref_cond = ctx.accu(&span);
    let loop_condition = ctx.not(accu_ref_cond, &span);
    let accu_ref = ctx.accu(&span);
    let loop_step = ctx.binary(BinaryOp::Or, accu_ref, pred, &span);
    let result = ctx.accu(&span);

    comprehension(
        ctx,
        span,
        ComprehensionParts {
            iter_var,
            iter_var2,
            range: receiver,
            accu_init,
            loop_condition,
            loop_step,
            result,
        },
    )
}

/// `exists_one` counts matches and never short-circuits: an error on any
/// element invalidates the whole result.
fn expand_exists_one(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    let receiver = receiver.expect("receiver macro");
    let (iter_var, iter_var2, pred) = match split_iter_args(&args) {
        Ok(p) => p,
        Err(e) => return MacroExpansion::Error(e),
    };

    let accu_init = ctx.expr(Expr::Int(0), &span);
    let loop_condition = ctx.expr(Expr::Bool(true), &span);

    let accu_ref = ctx.accu(&span);
    let one = ctx.expr(Expr::Int(1), &span);
    let increment = ctx.binary(BinaryOp::Add, accu_ref, one, &span);
    let accu_ref_else = ctx.accu(&span);
    let loop_step = ctx.ternary(pred, increment, accu_ref_else, &span);

    let accu_ref_result = ctx.accu(&span);
    let one_result = ctx.expr(Expr::Int(1), &span);
    let result = ctx.binary(BinaryOp::Eq, accu_ref_result, one_result, &span);

    comprehension(
        ctx,
        span,
        ComprehensionParts {
            iter_var,
            iter_var2,
            range: receiver,
            accu_init,
            loop_condition,
            loop_step,
            result,
        },
    )
}

// === map / filter ===

fn expand_map(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    let receiver = receiver.expect("receiver macro");
    let var = match iter_var(&args[0]) {
        Ok(v) => v,
        Err(e) => return MacroExpansion::Error(e),
    };
    let (filter_cond, transform) = match args.len() {
        2 => (None, args[1].clone()),
        3 => (Some(args[1].clone()), args[2].clone()),
        _ => unreachable!("registry enforces arity"),
    };

    let accu_init = ctx.expr(Expr::List(vec![]), &span);
    let loop_condition = ctx.expr(Expr::Bool(true), &span);

    let transformed = ctx.singleton_list(transform, &span);
    let accu_ref = ctx.accu(&span);
    let append = ctx.binary(BinaryOp::Add, accu_ref, transformed, &span);

    let loop_step = match filter_cond {
        Some(filter) => {
            let accu_ref_else = ctx.accu(&span);
            ctx.ternary(filter, append, accu_ref_else, &span)
        }
        None => append,
    };

    let result = ctx.accu(&span);

    comprehension(
        ctx,
        span,
        ComprehensionParts {
            iter_var: var,
            iter_var2: String::new(),
            range: receiver,
            accu_init,
            loop_condition,
            loop_step,
            result,
        },
    )
}

fn expand_filter(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    let receiver = receiver.expect("receiver macro");
    let var = match iter_var(&args[0]) {
        Ok(v) => v,
        Err(e) => return MacroExpansion::Error(e),
    };
    let pred = args[1].clone();

    let accu_init = ctx.expr(Expr::List(vec![]), &span);
    let loop_condition = ctx.expr(Expr::Bool(true), &span);

    let elem = ctx.ident(&var, &span);
    let elem_list = ctx.singleton_list(elem, &span);
    let accu_ref = ctx.accu(&span);
    let append = ctx.binary(BinaryOp::Add, accu_ref, elem_list, &span);
    let accu_ref_else = ctx.accu(&span);
    let loop_step = ctx.ternary(pred, append, accu_ref_else, &span);

    let result = ctx.accu(&span);

    comprehension(
        ctx,
        span,
        ComprehensionParts {
            iter_var: var,
            iter_var2: String::new(),
            range: receiver,
            accu_init,
            loop_condition,
            loop_step,
            result,
        },
    )
}

// === optMap / optFlatMap ===

/// `opt.optMap(v, e)` becomes
/// `opt.hasValue() ? optional.of(cel.bind(v, opt.value(), e)) : optional.none()`.
fn expand_opt_map(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    expand_opt_chain(ctx, span, receiver, args, true)
}

/// `opt.optFlatMap(v, e)` is the same but without the `optional.of` wrap;
/// the body must itself produce an optional.
fn expand_opt_flat_map(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    expand_opt_chain(ctx, span, receiver, args, false)
}

fn expand_opt_chain(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
    wrap: bool,
) -> MacroExpansion {
    let receiver = receiver.expect("receiver macro");
    let var = match iter_var(&args[0]) {
        Ok(v) => v,
        Err(e) => return MacroExpansion::Error(e),
    };
    let body = args[1].clone();

    let has_value = ctx.member_call(receiver.clone(), "hasValue", vec![], &span);
    let value = ctx.member_call(receiver, "value", vec![], &span);
    let bound = ctx.expr(
        Expr::Bind {
            var_name: var,
            init: Box::new(value),
            body: Box::new(body),
        },
        &span,
    );
    let then_expr = if wrap {
        ctx.global_call("optional.of", vec![bound], &span)
    } else {
        bound
    };
    let else_expr = ctx.global_call("optional.none", vec![], &span);

    MacroExpansion::Expanded(ctx.ternary(has_value, then_expr, else_expr, &span))
}

// === cel.bind / cel.block / cel.index ===

fn expand_bind(
    ctx: &mut MacroContext,
    span: Span,
    _receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    let mut args = args.into_iter();
    let var = args.next().expect("arity checked");
    let init = args.next().expect("arity checked");
    let body = args.next().expect("arity checked");

    let var_name = match var.node {
        Expr::Ident(name) => name,
        _ => {
            return MacroExpansion::Error(
                "cel.bind() variable name must be a simple identifier".to_string(),
            )
        }
    };

    let id = ctx.next_id();
    MacroExpansion::Expanded(Spanned::new(
        id,
        Expr::Bind {
            var_name,
            init: Box::new(init),
            body: Box::new(body),
        },
        span,
    ))
}

fn expand_block(
    ctx: &mut MacroContext,
    span: Span,
    _receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    let mut args = args.into_iter();
    let bindings_expr = args.next().expect("arity checked");
    let result = args.next().expect("arity checked");

    let bindings = match bindings_expr.node {
        Expr::List(elements) => {
            if elements.iter().any(|e| e.optional) {
                return MacroExpansion::Error(
                    "cel.block() bindings may not be optional elements".to_string(),
                );
            }
            elements.into_iter().map(|e| e.expr).collect()
        }
        _ => {
            return MacroExpansion::Error(
                "cel.block() requires a list literal of bindings".to_string(),
            )
        }
    };

    let id = ctx.next_id();
    MacroExpansion::Expanded(Spanned::new(
        id,
        Expr::Block {
            bindings,
            result: Box::new(result),
        },
        span,
    ))
}

fn expand_index_slot(
    ctx: &mut MacroContext,
    span: Span,
    _receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    let arg = args.into_iter().next().expect("arity checked");
    match arg.node {
        Expr::Int(n) if n >= 0 => {
            let id = ctx.next_id();
            MacroExpansion::Expanded(Spanned::new(id, Expr::IndexedSlot(n as usize), span))
        }
        _ => MacroExpansion::Error(
            "cel.index() requires a non-negative int literal".to_string(),
        ),
    }
}

fn expand_reserved(
    _ctx: &mut MacroContext,
    _span: Span,
    _receiver: Option<SpannedExpr>,
    _args: Vec<SpannedExpr>,
) -> MacroExpansion {
    MacroExpansion::Error("function reserved for macro expansion".to_string())
}
