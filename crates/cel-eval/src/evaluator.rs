//! Tree-walking evaluator for CEL expressions.
//!
//! The evaluator walks the macro-expanded AST against an activation, a
//! function registry, and a proto type registry. All evaluation state lives
//! in the activation chain, the recursion stack, and a shared step budget;
//! the AST and registries are never mutated.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::sync::{Arc, OnceLock};

use cel_parser::{BinaryOp, Expr, ListElement, MapEntry, SpannedExpr, StructField, UnaryOp};

use crate::activation::{Activation, HierarchicalActivation};
use crate::error::EvalError;
use crate::functions::FunctionRegistry;
use crate::proto::{self, ProtoRegistry};
use crate::value::{
    Duration, MapKey, OptionalValue, Timestamp, TypeValue, Value, ValueMap,
};

/// Shared step counter for bounding evaluation cost. Each AST node visit
/// and each comprehension iteration counts one step.
#[derive(Debug)]
pub struct StepBudget {
    limit: u64,
    used: Cell<u64>,
}

impl StepBudget {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: Cell::new(0),
        }
    }

    pub fn used(&self) -> u64 {
        self.used.get()
    }

    fn charge(&self) -> Result<(), EvalError> {
        let used = self.used.get() + 1;
        self.used.set(used);
        if used > self.limit {
            Err(EvalError::resource_exhausted(self.limit))
        } else {
            Ok(())
        }
    }
}

/// Lazily evaluated `cel.block` slots. Each slot is forced at most once,
/// in the activation scope of the block entry.
struct BlockCtx<'a> {
    bindings: &'a [SpannedExpr],
    activation: &'a dyn Activation,
    memo: RefCell<Vec<Option<Value>>>,
}

fn empty_registry() -> &'static ProtoRegistry {
    static EMPTY: OnceLock<ProtoRegistry> = OnceLock::new();
    EMPTY.get_or_init(ProtoRegistry::default)
}

/// The CEL expression evaluator.
#[derive(Clone, Copy)]
pub struct Evaluator<'a> {
    activation: &'a dyn Activation,
    functions: &'a FunctionRegistry,
    types: &'a ProtoRegistry,
    container: &'a str,
    strong_enums: bool,
    budget: Option<&'a StepBudget>,
    block: Option<&'a BlockCtx<'a>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(activation: &'a dyn Activation, functions: &'a FunctionRegistry) -> Self {
        Self {
            activation,
            functions,
            types: empty_registry(),
            container: "",
            strong_enums: true,
            budget: None,
            block: None,
        }
    }

    pub fn with_types(mut self, types: &'a ProtoRegistry) -> Self {
        self.types = types;
        self
    }

    pub fn with_container(mut self, container: &'a str) -> Self {
        self.container = container;
        self
    }

    /// Surface enum values as bare integers instead of named enum values.
    pub fn with_legacy_enums(mut self) -> Self {
        self.strong_enums = false;
        self
    }

    pub fn with_budget(mut self, budget: &'a StepBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Evaluate an expression to a value or a propagated error.
    pub fn eval(&self, expr: &SpannedExpr) -> Value {
        self.eval_expr(expr)
    }

    fn scoped<'b>(&self, activation: &'b dyn Activation) -> Evaluator<'b>
    where
        'a: 'b,
    {
        Evaluator {
            activation,
            functions: self.functions,
            types: self.types,
            container: self.container,
            strong_enums: self.strong_enums,
            budget: self.budget,
            block: self.block,
        }
    }

    fn eval_expr(&self, expr: &SpannedExpr) -> Value {
        if let Some(budget) = self.budget {
            if let Err(e) = budget.charge() {
                return Value::error(e);
            }
        }

        match &expr.node {
            Expr::Null => Value::Null,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Int(i) => Value::Int(*i),
            Expr::UInt(u) => Value::UInt(*u),
            Expr::Double(d) => Value::Double(*d),
            Expr::String(s) => Value::String(Arc::from(s.as_str())),
            Expr::Bytes(b) => Value::Bytes(Arc::from(b.as_slice())),

            Expr::Ident(name) => self.eval_ident(name, false),
            Expr::RootIdent(name) => self.eval_ident(name, true),

            Expr::List(elements) => self.eval_list(elements),
            Expr::Map(entries) => self.eval_map(entries),

            Expr::Unary { op, expr } => self.eval_unary(*op, expr),
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right),
            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
            } => self.eval_ternary(cond, then_expr, else_expr),

            Expr::Select {
                operand,
                field,
                test_only,
                optional,
            } => {
                if *test_only {
                    self.eval_presence_test(operand, field)
                } else {
                    self.eval_select(expr, operand, field, *optional)
                }
            }
            Expr::Index {
                operand,
                index,
                optional,
            } => self.eval_index(operand, index, *optional),
            Expr::Call {
                target,
                function,
                args,
            } => self.eval_call(target.as_deref(), function, args),
            Expr::Struct { type_name, fields } => self.eval_struct(type_name, fields),

            Expr::Comprehension {
                iter_var,
                iter_var2,
                iter_range,
                accu_var,
                accu_init,
                loop_condition,
                loop_step,
                result,
            } => self.eval_comprehension(
                iter_var,
                iter_var2,
                iter_range,
                accu_var,
                accu_init,
                loop_condition,
                loop_step,
                result,
            ),

            Expr::Bind {
                var_name,
                init,
                body,
            } => self.eval_bind(var_name, init, body),

            Expr::Block { bindings, result } => self.eval_block(bindings, result),
            Expr::IndexedSlot(n) => self.eval_slot(*n),
        }
    }

    // === Identifier & qualified-name resolution ===

    /// Candidate qualified names for `name` under the container, longest
    /// prefix first, per C++ namespace resolution rules.
    fn container_candidates(&self, name: &str, root: bool) -> Vec<String> {
        if root || self.container.is_empty() {
            return vec![name.to_string()];
        }
        let mut out = Vec::new();
        let mut prefix = self.container;
        loop {
            out.push(format!("{}.{}", prefix, name));
            match prefix.rfind('.') {
                Some(idx) => prefix = &prefix[..idx],
                None => break,
            }
        }
        out.push(name.to_string());
        out
    }

    fn eval_ident(&self, name: &str, root: bool) -> Value {
        for candidate in self.container_candidates(name, root) {
            if let Some(value) = self.activation.resolve(&candidate) {
                return value;
            }
        }

        if !root {
            if let Some(t) = type_constant(name) {
                return t;
            }
        }

        let qualified = if root { format!(".{}", name) } else { name.to_string() };
        if let Some(t) = self.resolve_type_name(&qualified) {
            return t;
        }

        Value::error(EvalError::undeclared_reference(name))
    }

    /// A message or enum type name used as a value reifies to a type value.
    fn resolve_type_name(&self, name: &str) -> Option<Value> {
        if let Some(desc) = self.types.resolve_message(name, self.container) {
            return Some(Value::Type(TypeValue::new(desc.full_name().to_string())));
        }
        if let Some(desc) = self.types.resolve_enum(name, self.container) {
            return Some(Value::Type(TypeValue::new(desc.full_name().to_string())));
        }
        None
    }

    /// If `expr` is a pure identifier chain, return (dotted name, is_root).
    fn qualified_chain(expr: &SpannedExpr) -> Option<(String, bool)> {
        match &expr.node {
            Expr::Ident(name) => Some((name.clone(), false)),
            Expr::RootIdent(name) => Some((name.clone(), true)),
            Expr::Select {
                operand,
                field,
                test_only: false,
                optional: false,
            } => {
                let (prefix, root) = Self::qualified_chain(operand)?;
                Some((format!("{}.{}", prefix, field), root))
            }
            _ => None,
        }
    }

    fn eval_select(
        &self,
        full: &SpannedExpr,
        operand: &SpannedExpr,
        field: &str,
        optional: bool,
    ) -> Value {
        // Longest-prefix resolution: `a.b.c` prefers a binding for "a.b.c"
        // over selecting `c` from `a.b`.
        if !optional {
            if let Some((qualified, root)) = Self::qualified_chain(full) {
                for candidate in self.container_candidates(&qualified, root) {
                    if let Some(value) = self.activation.resolve(&candidate) {
                        return value;
                    }
                }
                if let Some(v) = self.resolve_enum_constant(&qualified, root) {
                    return v;
                }
                let name = if root {
                    format!(".{}", qualified)
                } else {
                    qualified
                };
                if let Some(t) = self.resolve_type_name(&name) {
                    return t;
                }
            }
        }

        let value = self.eval_expr(operand);
        if value.is_error() {
            return value;
        }
        self.access_field(&value, field, optional)
    }

    /// Resolve `pkg.Enum.VALUE` chains to enum values.
    fn resolve_enum_constant(&self, qualified: &str, root: bool) -> Option<Value> {
        let (type_part, member) = qualified.rsplit_once('.')?;
        let name = if root {
            format!(".{}", type_part)
        } else {
            type_part.to_string()
        };
        let desc = self.types.resolve_enum(&name, self.container)?;
        let value = desc.get_value_by_name(member)?;
        Some(if self.strong_enums {
            Value::Enum(proto::EnumValue::new(desc.full_name().to_string(), value.number()))
        } else {
            Value::Int(value.number() as i64)
        })
    }

    fn access_field(&self, value: &Value, field: &str, optional: bool) -> Value {
        match value {
            Value::Optional(OptionalValue::None) if optional => Value::optional_none(),
            Value::Optional(OptionalValue::Some(inner)) if optional => {
                self.access_field(inner, field, true)
            }
            Value::Map(map) => {
                let key = MapKey::String(Arc::from(field));
                match map.get(&key) {
                    Some(v) => {
                        if optional {
                            Value::optional_some(v.clone())
                        } else {
                            v.clone()
                        }
                    }
                    None => {
                        if optional {
                            Value::optional_none()
                        } else {
                            Value::error(EvalError::no_such_key(field))
                        }
                    }
                }
            }
            Value::Message(m) => {
                if optional {
                    match proto::message_has_field(m, field) {
                        Value::Bool(true) => {
                            let v = proto::message_field(self.types, m, field, self.strong_enums);
                            if v.is_error() {
                                v
                            } else {
                                Value::optional_some(v)
                            }
                        }
                        Value::Bool(false) => Value::optional_none(),
                        err => err,
                    }
                } else {
                    proto::message_field(self.types, m, field, self.strong_enums)
                }
            }
            other => Value::error(EvalError::new(
                crate::error::EvalErrorKind::NoMatchingOverload,
                format!("type '{}' does not support field selection", other.type_name()),
            )),
        }
    }

    /// `has(e.f)`: key membership for maps, field presence for messages.
    fn eval_presence_test(&self, operand: &SpannedExpr, field: &str) -> Value {
        let value = self.eval_expr(operand);
        match &value {
            Value::Error(_) => value,
            Value::Map(map) => {
                let key = MapKey::String(Arc::from(field));
                Value::Bool(map.contains_key(&key))
            }
            Value::Message(m) => proto::message_has_field(m, field),
            Value::Optional(OptionalValue::None) => Value::Bool(false),
            Value::Optional(OptionalValue::Some(inner)) => match inner.as_ref() {
                Value::Map(map) => {
                    let key = MapKey::String(Arc::from(field));
                    Value::Bool(map.contains_key(&key))
                }
                Value::Message(m) => proto::message_has_field(m, field),
                other => Value::error(EvalError::new(
                    crate::error::EvalErrorKind::NoMatchingOverload,
                    format!("type '{}' does not support presence tests", other.type_name()),
                )),
            },
            other => Value::error(EvalError::new(
                crate::error::EvalErrorKind::NoMatchingOverload,
                format!("type '{}' does not support presence tests", other.type_name()),
            )),
        }
    }

    // === Collections ===

    fn eval_list(&self, elements: &[ListElement]) -> Value {
        let mut values = Vec::with_capacity(elements.len());

        for elem in elements {
            let value = self.eval_expr(&elem.expr);
            if value.is_error() {
                return value;
            }

            if elem.optional {
                match value {
                    Value::Optional(OptionalValue::Some(v)) => values.push(*v),
                    Value::Optional(OptionalValue::None) => {}
                    other => {
                        return Value::error(EvalError::invalid_argument(format!(
                            "optional list element must be an optional, got '{}'",
                            other.type_name()
                        )))
                    }
                }
            } else {
                values.push(value);
            }
        }

        Value::from(values)
    }

    fn eval_map(&self, entries: &[MapEntry]) -> Value {
        let mut map = ValueMap::new();

        for entry in entries {
            let key_value = self.eval_expr(&entry.key);
            if key_value.is_error() {
                return key_value;
            }
            let key = match MapKey::for_insert(&key_value) {
                Ok(k) => k,
                Err(e) => return Value::error(e),
            };

            let value = self.eval_expr(&entry.value);
            if value.is_error() {
                return value;
            }

            let value = if entry.optional {
                match value {
                    Value::Optional(OptionalValue::Some(v)) => *v,
                    Value::Optional(OptionalValue::None) => continue,
                    other => {
                        return Value::error(EvalError::invalid_argument(format!(
                            "optional map entry must be an optional, got '{}'",
                            other.type_name()
                        )))
                    }
                }
            } else {
                value
            };

            // Duplicate keys are detected with the same heterogeneous
            // equality used by `==`, so `{0: 1, 0u: 2}` is repeated.
            if map.contains_key(&key) {
                return Value::error(EvalError::repeated_map_key(&format!("{}", key_value)));
            }
            map.insert(key, value);
        }

        Value::Map(Arc::new(map))
    }

    // === Operators ===

    fn eval_unary(&self, op: UnaryOp, expr: &SpannedExpr) -> Value {
        let value = self.eval_expr(expr);
        if value.is_error() {
            return value;
        }

        match op {
            UnaryOp::Neg => match value {
                Value::Int(i) => i
                    .checked_neg()
                    .map(Value::Int)
                    .unwrap_or_else(|| Value::error(EvalError::overflow("integer negation"))),
                Value::Double(d) => Value::Double(-d),
                other => Value::error(EvalError::no_matching_overload(&format!(
                    "-_({})",
                    other.type_name()
                ))),
            },
            UnaryOp::Not => match value {
                Value::Bool(b) => Value::Bool(!b),
                other => Value::error(EvalError::no_matching_overload(&format!(
                    "!_({})",
                    other.type_name()
                ))),
            },
        }
    }

    fn eval_binary(&self, op: BinaryOp, left: &SpannedExpr, right: &SpannedExpr) -> Value {
        match op {
            BinaryOp::And => return self.eval_and(left, right),
            BinaryOp::Or => return self.eval_or(left, right),
            _ => {}
        }

        let left_val = self.eval_expr(left);
        if left_val.is_error() {
            return left_val;
        }
        let right_val = self.eval_expr(right);
        if right_val.is_error() {
            return right_val;
        }

        match op {
            BinaryOp::Add => self.eval_add(left_val, right_val),
            BinaryOp::Sub => self.eval_sub(left_val, right_val),
            BinaryOp::Mul => self.eval_mul(left_val, right_val),
            BinaryOp::Div => self.eval_div(left_val, right_val),
            BinaryOp::Mod => self.eval_mod(left_val, right_val),
            BinaryOp::Eq => Value::Bool(left_val.equals(&right_val)),
            BinaryOp::Ne => Value::Bool(!left_val.equals(&right_val)),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                self.eval_relation(op, left_val, right_val)
            }
            BinaryOp::In => self.eval_in(left_val, right_val),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }

    /// `&&`: a result-forcing `false` on either side wins and masks the
    /// other side's error; otherwise errors propagate. The right operand is
    /// only evaluated when the left doesn't decide the result.
    fn eval_and(&self, left: &SpannedExpr, right: &SpannedExpr) -> Value {
        let lv = self.eval_expr(left);
        if matches!(lv, Value::Bool(false)) {
            return Value::Bool(false);
        }

        let rv = self.eval_expr(right);
        if matches!(rv, Value::Bool(false)) {
            return Value::Bool(false);
        }

        match (&lv, &rv) {
            (Value::Bool(true), Value::Bool(true)) => Value::Bool(true),
            (Value::Error(_), _) => lv,
            (Value::Bool(true), Value::Error(_)) => rv,
            (Value::Bool(true), other) | (other, _) => Value::error(
                EvalError::no_matching_overload(&format!("_&&_({})", other.type_name())),
            ),
        }
    }

    /// `||`: dual of `&&` with `true` as the forcing value.
    fn eval_or(&self, left: &SpannedExpr, right: &SpannedExpr) -> Value {
        let lv = self.eval_expr(left);
        if matches!(lv, Value::Bool(true)) {
            return Value::Bool(true);
        }

        let rv = self.eval_expr(right);
        if matches!(rv, Value::Bool(true)) {
            return Value::Bool(true);
        }

        match (&lv, &rv) {
            (Value::Bool(false), Value::Bool(false)) => Value::Bool(false),
            (Value::Error(_), _) => lv,
            (Value::Bool(false), Value::Error(_)) => rv,
            (Value::Bool(false), other) | (other, _) => Value::error(
                EvalError::no_matching_overload(&format!("_||_({})", other.type_name())),
            ),
        }
    }

    fn eval_ternary(
        &self,
        cond: &SpannedExpr,
        then_expr: &SpannedExpr,
        else_expr: &SpannedExpr,
    ) -> Value {
        let cond_val = self.eval_expr(cond);
        match cond_val {
            Value::Bool(true) => self.eval_expr(then_expr),
            Value::Bool(false) => self.eval_expr(else_expr),
            Value::Error(_) => cond_val,
            other => Value::error(EvalError::no_matching_overload(&format!(
                "_?_:_({})",
                other.type_name()
            ))),
        }
    }

    fn eval_add(&self, left: Value, right: Value) -> Value {
        match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_add(*b)
                .map(Value::Int)
                .unwrap_or_else(|| Value::error(EvalError::overflow("integer addition"))),
            (Value::UInt(a), Value::UInt(b)) => a
                .checked_add(*b)
                .map(Value::UInt)
                .unwrap_or_else(|| Value::error(EvalError::overflow("unsigned addition"))),
            (Value::Double(a), Value::Double(b)) => Value::Double(a + b),
            (Value::String(a), Value::String(b)) => {
                let mut out = String::with_capacity(a.len() + b.len());
                out.push_str(a);
                out.push_str(b);
                Value::string(out)
            }
            (Value::Bytes(a), Value::Bytes(b)) => {
                let mut out = Vec::with_capacity(a.len() + b.len());
                out.extend_from_slice(a);
                out.extend_from_slice(b);
                Value::from(out)
            }
            (Value::List(a), Value::List(b)) => {
                let mut out = Vec::with_capacity(a.len() + b.len());
                out.extend(a.iter().cloned());
                out.extend(b.iter().cloned());
                Value::from(out)
            }
            (Value::Timestamp(t), Value::Duration(d))
            | (Value::Duration(d), Value::Timestamp(t)) => {
                timestamp_from_nanos(ts_nanos(t) + d.to_nanos())
            }
            (Value::Duration(a), Value::Duration(b)) => {
                duration_from_nanos(a.to_nanos() + b.to_nanos())
            }
            _ => Value::error(EvalError::no_matching_overload("_+_")),
        }
    }

    fn eval_sub(&self, left: Value, right: Value) -> Value {
        match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_sub(*b)
                .map(Value::Int)
                .unwrap_or_else(|| Value::error(EvalError::overflow("integer subtraction"))),
            (Value::UInt(a), Value::UInt(b)) => a
                .checked_sub(*b)
                .map(Value::UInt)
                .unwrap_or_else(|| Value::error(EvalError::overflow("unsigned subtraction"))),
            (Value::Double(a), Value::Double(b)) => Value::Double(a - b),
            (Value::Timestamp(a), Value::Timestamp(b)) => {
                duration_from_nanos(ts_nanos(a) - ts_nanos(b))
            }
            (Value::Timestamp(t), Value::Duration(d)) => {
                timestamp_from_nanos(ts_nanos(t) - d.to_nanos())
            }
            (Value::Duration(a), Value::Duration(b)) => {
                duration_from_nanos(a.to_nanos() - b.to_nanos())
            }
            _ => Value::error(EvalError::no_matching_overload("_-_")),
        }
    }

    fn eval_mul(&self, left: Value, right: Value) -> Value {
        match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_mul(*b)
                .map(Value::Int)
                .unwrap_or_else(|| Value::error(EvalError::overflow("integer multiplication"))),
            (Value::UInt(a), Value::UInt(b)) => a
                .checked_mul(*b)
                .map(Value::UInt)
                .unwrap_or_else(|| Value::error(EvalError::overflow("unsigned multiplication"))),
            (Value::Double(a), Value::Double(b)) => Value::Double(a * b),
            _ => Value::error(EvalError::no_matching_overload("_*_")),
        }
    }

    fn eval_div(&self, left: Value, right: Value) -> Value {
        match (&left, &right) {
            (Value::Int(_), Value::Int(0)) => Value::error(EvalError::division_by_zero()),
            (Value::Int(a), Value::Int(b)) => a
                .checked_div(*b)
                .map(Value::Int)
                .unwrap_or_else(|| Value::error(EvalError::overflow("integer division"))),
            (Value::UInt(_), Value::UInt(0)) => Value::error(EvalError::division_by_zero()),
            (Value::UInt(a), Value::UInt(b)) => Value::UInt(a / b),
            (Value::Double(a), Value::Double(b)) => Value::Double(a / b),
            _ => Value::error(EvalError::no_matching_overload("_/_")),
        }
    }

    fn eval_mod(&self, left: Value, right: Value) -> Value {
        match (&left, &right) {
            (Value::Int(_), Value::Int(0)) => Value::error(EvalError::modulo_by_zero()),
            (Value::Int(a), Value::Int(b)) => a
                .checked_rem(*b)
                .map(Value::Int)
                .unwrap_or_else(|| Value::error(EvalError::overflow("integer modulo"))),
            (Value::UInt(_), Value::UInt(0)) => Value::error(EvalError::modulo_by_zero()),
            (Value::UInt(a), Value::UInt(b)) => Value::UInt(a % b),
            _ => Value::error(EvalError::no_matching_overload("_%_")),
        }
    }

    /// Relational operators. A NaN inside the numeric tower makes every
    /// relation false; kinds outside the comparable set raise an overload
    /// error.
    fn eval_relation(&self, op: BinaryOp, left: Value, right: Value) -> Value {
        match left.compare(&right) {
            Some(ord) => Value::Bool(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                BinaryOp::Ge => ord != Ordering::Less,
                _ => unreachable!(),
            }),
            None if left.is_numeric() && right.is_numeric() => Value::Bool(false),
            None => Value::error(EvalError::no_matching_overload(op.display_name())),
        }
    }

    /// `in` membership uses equality semantics: a non-matching kind is
    /// simply not a member, never an error.
    fn eval_in(&self, left: Value, right: Value) -> Value {
        match &right {
            Value::List(list) => Value::Bool(list.iter().any(|elem| left.equals(elem))),
            Value::Map(map) => match MapKey::for_lookup(&left) {
                Some(key) => Value::Bool(map.contains_key(&key)),
                None => Value::Bool(false),
            },
            _ => Value::error(EvalError::no_matching_overload("_in_")),
        }
    }

    // === Index access ===

    fn eval_index(&self, operand: &SpannedExpr, index: &SpannedExpr, optional: bool) -> Value {
        let value = self.eval_expr(operand);
        if value.is_error() {
            return value;
        }
        let index_val = self.eval_expr(index);
        if index_val.is_error() {
            return index_val;
        }
        self.access_index(&value, &index_val, optional)
    }

    fn access_index(&self, value: &Value, index: &Value, optional: bool) -> Value {
        match value {
            Value::Optional(OptionalValue::None) if optional => Value::optional_none(),
            Value::Optional(OptionalValue::Some(inner)) if optional => {
                self.access_index(inner, index, true)
            }
            Value::List(list) => {
                let idx = match index {
                    Value::Int(i) => *i,
                    Value::UInt(u) => match i64::try_from(*u) {
                        Ok(i) => i,
                        Err(_) => {
                            return Value::error(EvalError::new(
                                crate::error::EvalErrorKind::IndexOutOfRange,
                                format!("index {} out of range for size {}", u, list.len()),
                            ))
                        }
                    },
                    Value::Double(d) => match crate::numeric::double_as_integer(*d) {
                        Some(n) if i64::try_from(n).is_ok() => n as i64,
                        _ => {
                            return Value::error(EvalError::invalid_argument(
                                "list index must be an integer",
                            ))
                        }
                    },
                    other => {
                        return Value::error(EvalError::no_matching_overload(&format!(
                            "_[_]({})",
                            other.type_name()
                        )))
                    }
                };

                if idx < 0 || idx as usize >= list.len() {
                    if optional {
                        Value::optional_none()
                    } else {
                        Value::error(EvalError::index_out_of_range(idx, list.len()))
                    }
                } else {
                    let result = list[idx as usize].clone();
                    if optional {
                        Value::optional_some(result)
                    } else {
                        result
                    }
                }
            }
            Value::Map(map) => {
                let key = MapKey::for_lookup(index);
                match key.as_ref().and_then(|k| map.get(k)) {
                    Some(v) => {
                        if optional {
                            Value::optional_some(v.clone())
                        } else {
                            v.clone()
                        }
                    }
                    None => {
                        if optional {
                            Value::optional_none()
                        } else {
                            Value::error(EvalError::no_such_key(&format!("{}", index)))
                        }
                    }
                }
            }
            other => Value::error(EvalError::no_matching_overload(&format!(
                "_[_] on '{}'",
                other.type_name()
            ))),
        }
    }

    // === Calls ===

    fn eval_call(&self, target: Option<&SpannedExpr>, function: &str, args: &[SpannedExpr]) -> Value {
        // Namespaced global functions (`math.greatest`, `base64.encode`)
        // parse as receiver calls on an identifier chain; resolve those
        // against the registry before treating the chain as a value.
        if let Some(t) = target {
            if let Some((chain, root)) = Self::qualified_chain(t) {
                let dotted = format!("{}.{}", chain, function);
                for candidate in self.container_candidates(&dotted, root) {
                    if self.functions.contains(&candidate) {
                        return self.dispatch_call(&candidate, None, args);
                    }
                }
            }
            return self.dispatch_call(function, Some(t), args);
        }

        for candidate in self.container_candidates(function, false) {
            if self.functions.contains(&candidate) {
                return self.dispatch_call(&candidate, None, args);
            }
        }
        self.dispatch_call(function, None, args)
    }

    fn dispatch_call(
        &self,
        function: &str,
        target: Option<&SpannedExpr>,
        args: &[SpannedExpr],
    ) -> Value {
        let is_member = target.is_some();
        let mut values = Vec::with_capacity(args.len() + 1);

        if let Some(t) = target {
            let receiver = self.eval_expr(t);
            if receiver.is_error() {
                return receiver;
            }
            values.push(receiver);
        }
        for arg in args {
            let v = self.eval_expr(arg);
            if v.is_error() {
                return v;
            }
            values.push(v);
        }

        self.functions.dispatch(function, &values, is_member)
    }

    // === Message construction ===

    fn eval_struct(&self, type_name: &str, fields: &[StructField]) -> Value {
        let descriptor = match self.types.resolve_message(type_name, self.container) {
            Some(d) => d,
            None => {
                return Value::error(EvalError::undeclared_reference(type_name));
            }
        };

        let mut evaluated = Vec::with_capacity(fields.len());
        for field in fields {
            let value = self.eval_expr(&field.value);
            if value.is_error() {
                return value;
            }
            evaluated.push((field.name.clone(), value, field.optional));
        }

        proto::construct_message(self.types, &descriptor, evaluated, self.strong_enums)
    }

    // === Comprehensions, bind, block ===

    #[allow(clippy::too_many_arguments)]
    fn eval_comprehension(
        &self,
        iter_var: &str,
        iter_var2: &str,
        iter_range: &SpannedExpr,
        accu_var: &str,
        accu_init: &SpannedExpr,
        loop_condition: &SpannedExpr,
        loop_step: &SpannedExpr,
        result: &SpannedExpr,
    ) -> Value {
        let range = self.eval_expr(iter_range);
        if range.is_error() {
            return range;
        }

        let mut accu = self.eval_expr(accu_init);
        if accu.is_error() {
            return accu;
        }

        // Comprehension entries: for lists the single-variable form binds
        // the element and the two-variable form binds (index, element); for
        // maps, (key) and (key, value).
        let entries: Vec<(Value, Value)> = match &range {
            Value::List(list) => list
                .iter()
                .enumerate()
                .map(|(i, elem)| {
                    if iter_var2.is_empty() {
                        (elem.clone(), Value::Null)
                    } else {
                        (Value::Int(i as i64), elem.clone())
                    }
                })
                .collect(),
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| (k.to_value(), v.clone()))
                .collect(),
            other => {
                return Value::error(EvalError::no_matching_overload(&format!(
                    "cannot iterate over '{}'",
                    other.type_name()
                )))
            }
        };

        for (first, second) in entries {
            if let Some(budget) = self.budget {
                if let Err(e) = budget.charge() {
                    return Value::error(e);
                }
            }

            let mut frame =
                HierarchicalActivation::new(self.activation).with_binding(accu_var, accu.clone());
            frame.insert(iter_var, first);
            if !iter_var2.is_empty() {
                frame.insert(iter_var2, second);
            }

            let iter_eval = self.scoped(&frame);

            // Strict-false loop guard: only a literal false stops the loop.
            // An errored accumulator keeps iterating, because a later
            // `||`/`&&` step may still absorb the error with a forcing
            // true/false element.
            let cond = iter_eval.eval_expr(loop_condition);
            if matches!(cond, Value::Bool(false)) {
                break;
            }

            accu = iter_eval.eval_expr(loop_step);
        }

        let result_frame =
            HierarchicalActivation::new(self.activation).with_binding(accu_var, accu);
        self.scoped(&result_frame).eval_expr(result)
    }

    fn eval_bind(&self, var_name: &str, init: &SpannedExpr, body: &SpannedExpr) -> Value {
        let init_val = self.eval_expr(init);
        if init_val.is_error() {
            return init_val;
        }

        let frame = HierarchicalActivation::new(self.activation).with_binding(var_name, init_val);
        self.scoped(&frame).eval_expr(body)
    }

    fn eval_block(&self, bindings: &[SpannedExpr], result: &SpannedExpr) -> Value {
        let ctx = BlockCtx {
            bindings,
            activation: self.activation,
            memo: RefCell::new(vec![None; bindings.len()]),
        };
        let child = Evaluator {
            activation: self.activation,
            functions: self.functions,
            types: self.types,
            container: self.container,
            strong_enums: self.strong_enums,
            budget: self.budget,
            block: Some(&ctx),
        };
        child.eval_expr(result)
    }

    fn eval_slot(&self, n: usize) -> Value {
        let ctx = match self.block {
            Some(ctx) => ctx,
            None => {
                return Value::error(EvalError::internal(
                    "cel.index() used outside cel.block()",
                ))
            }
        };

        let cached = ctx.memo.borrow().get(n).cloned();
        match cached {
            None => Value::error(EvalError::invalid_argument(format!(
                "cel.index({}) out of range for {} bindings",
                n,
                ctx.bindings.len()
            ))),
            Some(Some(v)) => v,
            Some(None) => {
                // Force the slot in the block-entry scope; later slots may
                // reference earlier ones through the same context.
                let slot_eval = Evaluator {
                    activation: ctx.activation,
                    functions: self.functions,
                    types: self.types,
                    container: self.container,
                    strong_enums: self.strong_enums,
                    budget: self.budget,
                    block: Some(ctx),
                };
                let v = slot_eval.eval_expr(&ctx.bindings[n]);
                ctx.memo.borrow_mut()[n] = Some(v.clone());
                v
            }
        }
    }
}

fn ts_nanos(ts: &Timestamp) -> i128 {
    ts.seconds as i128 * 1_000_000_000 + ts.nanos as i128
}

fn timestamp_from_nanos(total: i128) -> Value {
    // rem_euclid keeps nanos in 0..1e9, the Timestamp normal form.
    let seconds = total.div_euclid(1_000_000_000);
    let nanos = total.rem_euclid(1_000_000_000);
    match i64::try_from(seconds) {
        Ok(seconds) => {
            let ts = Timestamp::new(seconds, nanos as i32);
            if ts.is_valid() {
                Value::Timestamp(ts)
            } else {
                Value::error(EvalError::range(
                    "timestamp out of range: must be between year 0001 and 9999",
                ))
            }
        }
        Err(_) => Value::error(EvalError::overflow("timestamp arithmetic")),
    }
}

fn duration_from_nanos(total: i128) -> Value {
    match Duration::from_nanos(total) {
        Some(d) => Value::Duration(d),
        None => Value::error(EvalError::range(
            "duration out of range: must be within 10000 years",
        )),
    }
}

/// Built-in type identifiers usable as values.
fn type_constant(name: &str) -> Option<Value> {
    let type_name = match name {
        "bool" => "bool",
        "int" => "int",
        "uint" => "uint",
        "double" => "double",
        "string" => "string",
        "bytes" => "bytes",
        "list" => "list",
        "map" => "map",
        "null_type" => "null_type",
        "type" => "type",
        "dyn" => "dyn",
        _ => return None,
    };
    Some(Value::Type(TypeValue::new(type_name)))
}
