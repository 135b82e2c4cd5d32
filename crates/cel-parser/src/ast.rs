//! CEL abstract syntax tree definitions.

/// Source span for error reporting, as byte offsets into the source string.
pub type Span = std::ops::Range<usize>;

/// AST node with source location and unique ID.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    /// Unique identifier for this node (1-indexed, assigned during parsing).
    pub id: i64,
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(id: i64, node: T, span: Span) -> Self {
        Self { id, node, span }
    }
}

/// A spanned expression.
pub type SpannedExpr = Spanned<Expr>;

/// A list element, optionally guarded (`[?e]`).
#[derive(Debug, Clone, PartialEq)]
pub struct ListElement {
    pub expr: SpannedExpr,
    pub optional: bool,
}

/// A map entry, optionally guarded (`{?k: v}`).
#[derive(Debug, Clone, PartialEq)]
pub struct MapEntry {
    pub key: SpannedExpr,
    pub value: SpannedExpr,
    pub optional: bool,
}

/// A struct field, optionally guarded (`Msg{?f: v}`).
#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    pub name: String,
    pub value: SpannedExpr,
    pub optional: bool,
}

/// CEL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    // Literals
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),

    /// Identifier, resolved through the container.
    Ident(String),
    /// Root-scoped identifier (`.name`), resolved in the root scope only.
    RootIdent(String),

    List(Vec<ListElement>),
    Map(Vec<MapEntry>),

    Unary {
        op: UnaryOp,
        expr: Box<SpannedExpr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<SpannedExpr>,
        right: Box<SpannedExpr>,
    },
    Ternary {
        cond: Box<SpannedExpr>,
        then_expr: Box<SpannedExpr>,
        else_expr: Box<SpannedExpr>,
    },

    /// Field selection: `operand.field` / `operand.?field` / `has(operand.field)`.
    ///
    /// `test_only` and `optional` are mutually exclusive; `has()` expands to a
    /// test-only select, `.?` to an optional one.
    Select {
        operand: Box<SpannedExpr>,
        field: String,
        test_only: bool,
        optional: bool,
    },
    /// Index access: `operand[key]` / `operand[?key]`.
    Index {
        operand: Box<SpannedExpr>,
        index: Box<SpannedExpr>,
        optional: bool,
    },
    /// Function call, global (`f(args)`) or receiver-style (`target.f(args)`).
    Call {
        target: Option<Box<SpannedExpr>>,
        function: String,
        args: Vec<SpannedExpr>,
    },
    /// Message literal: `pkg.Msg{field: value, ...}`. A leading dot on the
    /// type name pins resolution to the root scope.
    Struct {
        type_name: String,
        fields: Vec<StructField>,
    },

    /// Comprehension produced by macro expansion.
    ///
    /// Semantics:
    /// ```text
    /// let accu_var = accu_init
    /// for (iter_var[, iter_var2] in iter_range) {
    ///     if (!loop_condition) { break }
    ///     accu_var = loop_step
    /// }
    /// return result
    /// ```
    Comprehension {
        iter_var: String,
        /// Second iteration variable (two-variable macro forms), empty if unset.
        iter_var2: String,
        iter_range: Box<SpannedExpr>,
        accu_var: String,
        accu_init: Box<SpannedExpr>,
        loop_condition: Box<SpannedExpr>,
        loop_step: Box<SpannedExpr>,
        result: Box<SpannedExpr>,
    },

    /// Local binding produced by `cel.bind(v, init, body)` and the
    /// optional-chaining macros.
    Bind {
        var_name: String,
        init: Box<SpannedExpr>,
        body: Box<SpannedExpr>,
    },

    /// Slot list produced by `cel.block([...], result)`. Slots are evaluated
    /// lazily, at most once each, and may reference earlier slots.
    Block {
        bindings: Vec<SpannedExpr>,
        result: Box<SpannedExpr>,
    },
    /// Reference to a block slot, produced by `cel.index(n)`.
    IndexedSlot(usize),
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation (`-`)
    Neg,
    /// Logical negation (`!`)
    Not,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    In,

    And,
    Or,
}

impl BinaryOp {
    /// Operator name as used in overload diagnostics (`_+_`, `_&&_`, ...).
    pub fn display_name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "_+_",
            BinaryOp::Sub => "_-_",
            BinaryOp::Mul => "_*_",
            BinaryOp::Div => "_/_",
            BinaryOp::Mod => "_%_",
            BinaryOp::Eq => "_==_",
            BinaryOp::Ne => "_!=_",
            BinaryOp::Lt => "_<_",
            BinaryOp::Le => "_<=_",
            BinaryOp::Gt => "_>_",
            BinaryOp::Ge => "_>=_",
            BinaryOp::In => "_in_",
            BinaryOp::And => "_&&_",
            BinaryOp::Or => "_||_",
        }
    }
}
