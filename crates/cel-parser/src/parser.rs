//! CEL parser - hand-written recursive descent with inline macro expansion.

use crate::ast::{
    BinaryOp, Expr, ListElement, MapEntry, Span, Spanned, SpannedExpr, StructField, UnaryOp,
};
use crate::lexer::{SpannedToken, Token};
use crate::macros::{MacroContext, MacroExpansion, MacroRegistry};
use crate::{ParseError, ParseOptions};

/// The largest magnitude a negated int literal may carry (`-2^63`).
const INT_MIN_MAGNITUDE: u64 = 9_223_372_036_854_775_808;

/// Recursive descent parser for CEL expressions.
pub struct Parser<'a> {
    tokens: &'a [SpannedToken],
    pos: usize,
    /// Counter for generating unique node IDs (starts at 1).
    next_id: i64,
    /// Current expression nesting depth, bounded by `max_depth`.
    depth: usize,
    max_depth: usize,
    macros: MacroRegistry,
}

impl<'a> Parser<'a> {
    /// Create a parser over the given token stream with standard macros.
    pub fn new(tokens: &'a [SpannedToken]) -> Self {
        Self::with_options(tokens, MacroRegistry::standard(), &ParseOptions::default())
    }

    /// Create a parser with a custom macro registry and options.
    pub fn with_options(
        tokens: &'a [SpannedToken],
        macros: MacroRegistry,
        options: &ParseOptions,
    ) -> Self {
        Self {
            tokens,
            pos: 0,
            next_id: 1,
            depth: 0,
            max_depth: options.max_recursion_depth,
            macros,
        }
    }

    fn next_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // === Cursor utilities ===

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    pub(crate) fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| s.clone())
            .unwrap_or_else(|| self.eof_span())
    }

    fn eof_span(&self) -> Span {
        let end = self.tokens.last().map(|(_, s)| s.end).unwrap_or(0);
        end..end
    }

    fn advance(&mut self) -> Option<&SpannedToken> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn match_token(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<Span, ParseError> {
        if self.check(token) {
            let span = self.peek_span();
            self.advance();
            Ok(span)
        } else {
            Err(self.error_here(format!(
                "expected '{}', found {}",
                token,
                describe(self.peek())
            )))
        }
    }

    fn error_here(&self, message: String) -> ParseError {
        ParseError {
            message,
            span: self.peek_span(),
        }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            Err(self.error_here(format!(
                "expression nesting exceeds the limit of {}",
                self.max_depth
            )))
        } else {
            Ok(())
        }
    }

    fn exit(&mut self) {
        self.depth -= 1;
    }

    // === Expression parsing ===

    /// Parse an expression (entry point).
    pub fn parse_expr(&mut self) -> Result<SpannedExpr, ParseError> {
        self.enter()?;
        let result = self.parse_ternary();
        self.exit();
        result
    }

    /// conditional: or ('?' or ':' expr)?  -- right-associative.
    fn parse_ternary(&mut self) -> Result<SpannedExpr, ParseError> {
        let cond = self.parse_or()?;

        if self.match_token(&Token::Question) {
            let then_expr = self.parse_or()?;
            self.expect(&Token::Colon)?;
            let else_expr = self.parse_expr()?;
            let span = cond.span.start..else_expr.span.end;

            Ok(Spanned::new(
                self.next_id(),
                Expr::Ternary {
                    cond: Box::new(cond),
                    then_expr: Box::new(then_expr),
                    else_expr: Box::new(else_expr),
                },
                span,
            ))
        } else {
            Ok(cond)
        }
    }

    fn parse_or(&mut self) -> Result<SpannedExpr, ParseError> {
        let mut left = self.parse_and()?;

        while self.match_token(&Token::Or) {
            let right = self.parse_and()?;
            left = self.binary(BinaryOp::Or, left, right);
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<SpannedExpr, ParseError> {
        let mut left = self.parse_relation()?;

        while self.match_token(&Token::And) {
            let right = self.parse_relation()?;
            left = self.binary(BinaryOp::And, left, right);
        }

        Ok(left)
    }

    fn parse_relation(&mut self) -> Result<SpannedExpr, ParseError> {
        let mut left = self.parse_addition()?;

        while let Some(op) = self.peek_relop() {
            self.advance();
            let right = self.parse_addition()?;
            left = self.binary(op, left, right);
        }

        Ok(left)
    }

    fn peek_relop(&self) -> Option<BinaryOp> {
        match self.peek()? {
            Token::EqEq => Some(BinaryOp::Eq),
            Token::Ne => Some(BinaryOp::Ne),
            Token::Lt => Some(BinaryOp::Lt),
            Token::Le => Some(BinaryOp::Le),
            Token::Gt => Some(BinaryOp::Gt),
            Token::Ge => Some(BinaryOp::Ge),
            Token::In => Some(BinaryOp::In),
            _ => None,
        }
    }

    fn parse_addition(&mut self) -> Result<SpannedExpr, ParseError> {
        let mut left = self.parse_mult()?;

        loop {
            let op = if self.match_token(&Token::Plus) {
                BinaryOp::Add
            } else if self.match_token(&Token::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };

            let right = self.parse_mult()?;
            left = self.binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_mult(&mut self) -> Result<SpannedExpr, ParseError> {
        let mut left = self.parse_unary()?;

        loop {
            let op = if self.match_token(&Token::Star) {
                BinaryOp::Mul
            } else if self.match_token(&Token::Slash) {
                BinaryOp::Div
            } else if self.match_token(&Token::Percent) {
                BinaryOp::Mod
            } else {
                break;
            };

            let right = self.parse_unary()?;
            left = self.binary(op, left, right);
        }

        Ok(left)
    }

    fn binary(&mut self, op: BinaryOp, left: SpannedExpr, right: SpannedExpr) -> SpannedExpr {
        let span = left.span.start..right.span.end;
        Spanned::new(
            self.next_id(),
            Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        )
    }

    fn parse_unary(&mut self) -> Result<SpannedExpr, ParseError> {
        self.enter()?;
        let result = self.parse_unary_inner();
        self.exit();
        result
    }

    fn parse_unary_inner(&mut self) -> Result<SpannedExpr, ParseError> {
        let start = self.peek_span().start;

        if self.match_token(&Token::Minus) {
            // `-` directly on an int literal folds into the literal so that
            // -9223372036854775808 remains representable.
            if let Some(Token::Int(magnitude)) = self.peek() {
                let magnitude = *magnitude;
                if magnitude > INT_MIN_MAGNITUDE {
                    return Err(self.error_here("integer literal is out of range".to_string()));
                }
                let end = self.peek_span().end;
                self.advance();
                let value = (magnitude as i128).wrapping_neg() as i64;
                return Ok(Spanned::new(self.next_id(), Expr::Int(value), start..end));
            }

            let expr = self.parse_unary()?;
            let span = start..expr.span.end;
            Ok(Spanned::new(
                self.next_id(),
                Expr::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(expr),
                },
                span,
            ))
        } else if self.match_token(&Token::Not) {
            let expr = self.parse_unary()?;
            let span = start..expr.span.end;
            Ok(Spanned::new(
                self.next_id(),
                Expr::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(expr),
                },
                span,
            ))
        } else {
            self.parse_postfix()
        }
    }

    /// Postfix chains: `.field`, `.?field`, `[index]`, `[?index]`, calls,
    /// and `Type{...}` struct literals.
    fn parse_postfix(&mut self) -> Result<SpannedExpr, ParseError> {
        let mut expr = self.parse_atom()?;

        loop {
            if self.check(&Token::LParen) {
                expr = self.parse_call(expr)?;
            } else if self.check(&Token::LBracket) {
                expr = self.parse_index(expr)?;
            } else if self.check(&Token::Dot) {
                expr = self.parse_member(expr)?;
            } else if self.check(&Token::LBrace) && qualified_type_name(&expr).is_some() {
                expr = self.parse_struct_init(expr)?;
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// Parse a call on `callee`, expanding macros where one matches.
    fn parse_call(&mut self, callee: SpannedExpr) -> Result<SpannedExpr, ParseError> {
        let start = callee.span.start;
        self.expect(&Token::LParen)?;

        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            args.push(self.parse_expr()?);
            while self.match_token(&Token::Comma) {
                if self.check(&Token::RParen) {
                    break; // trailing comma
                }
                args.push(self.parse_expr()?);
            }
        }

        let end_span = self.expect(&Token::RParen)?;
        let span = start..end_span.end;

        let (target, function) = match callee.node {
            Expr::Ident(name) => (None, name),
            Expr::RootIdent(name) => (None, name),
            Expr::Select {
                operand,
                field,
                test_only: false,
                optional: false,
            } => (Some(operand), field),
            _ => {
                return Err(ParseError {
                    message: "expression is not callable".to_string(),
                    span: callee.span,
                })
            }
        };

        if let Some(expanded) = self.try_macro_expansion(&target, &function, &span, &args)? {
            return Ok(expanded);
        }

        Ok(Spanned::new(
            self.next_id(),
            Expr::Call {
                target,
                function,
                args,
            },
            span,
        ))
    }

    /// Try to expand the call as a macro. Qualified pseudo-functions such as
    /// `cel.bind` are matched by the full dotted name of the target chain.
    fn try_macro_expansion(
        &mut self,
        target: &Option<Box<SpannedExpr>>,
        function: &str,
        span: &Span,
        args: &[SpannedExpr],
    ) -> Result<Option<SpannedExpr>, ParseError> {
        let (name, receiver) = match target {
            None => (function.to_string(), None),
            Some(t) => {
                if let Some(prefix) = qualified_type_name(t) {
                    let dotted = format!("{}.{}", prefix, function);
                    if self.macros.lookup(&dotted, args.len(), false).is_some() {
                        (dotted, None)
                    } else {
                        (function.to_string(), Some(t.as_ref().clone()))
                    }
                } else {
                    (function.to_string(), Some(t.as_ref().clone()))
                }
            }
        };

        let macro_def = match self.macros.lookup(&name, args.len(), receiver.is_some()) {
            Some(m) => m,
            None => return Ok(None),
        };
        let expander = macro_def.expander;

        let mut next_id_fn = || {
            let id = self.next_id;
            self.next_id += 1;
            id
        };
        let mut ctx = MacroContext::new(&mut next_id_fn);

        match expander(&mut ctx, span.clone(), receiver, args.to_vec()) {
            MacroExpansion::Expanded(expr) => Ok(Some(expr)),
            MacroExpansion::Error(message) => Err(ParseError {
                message,
                span: span.clone(),
            }),
        }
    }

    fn parse_index(&mut self, base: SpannedExpr) -> Result<SpannedExpr, ParseError> {
        let start = base.span.start;
        self.expect(&Token::LBracket)?;
        let optional = self.match_token(&Token::Question);
        let index = self.parse_expr()?;
        let end_span = self.expect(&Token::RBracket)?;

        Ok(Spanned::new(
            self.next_id(),
            Expr::Index {
                operand: Box::new(base),
                index: Box::new(index),
                optional,
            },
            start..end_span.end,
        ))
    }

    fn parse_member(&mut self, base: SpannedExpr) -> Result<SpannedExpr, ParseError> {
        let start = base.span.start;
        self.expect(&Token::Dot)?;
        let optional = self.match_token(&Token::Question);

        let token = self.peek().cloned();
        let (field, end) = match token {
            Some(Token::Ident(name)) => {
                let end = self.peek_span().end;
                self.advance();
                (name, end)
            }
            other => {
                return Err(self.error_here(format!(
                    "expected identifier after '.', found {}",
                    describe(other.as_ref())
                )));
            }
        };

        Ok(Spanned::new(
            self.next_id(),
            Expr::Select {
                operand: Box::new(base),
                field,
                test_only: false,
                optional,
            },
            start..end,
        ))
    }

    /// Struct initialization: `Type{field: value, ...}` with optional
    /// `?field:` entries.
    fn parse_struct_init(&mut self, type_expr: SpannedExpr) -> Result<SpannedExpr, ParseError> {
        let type_name = qualified_type_name(&type_expr).expect("checked by caller");
        let start = type_expr.span.start;
        self.expect(&Token::LBrace)?;

        let mut fields = Vec::new();
        if !self.check(&Token::RBrace) {
            fields.push(self.parse_struct_field()?);
            while self.match_token(&Token::Comma) {
                if self.check(&Token::RBrace) {
                    break; // trailing comma
                }
                fields.push(self.parse_struct_field()?);
            }
        }

        let end_span = self.expect(&Token::RBrace)?;

        Ok(Spanned::new(
            self.next_id(),
            Expr::Struct { type_name, fields },
            start..end_span.end,
        ))
    }

    fn parse_struct_field(&mut self) -> Result<StructField, ParseError> {
        let optional = self.match_token(&Token::Question);
        let token = self.peek().cloned();
        let name = match token {
            Some(Token::Ident(name)) => {
                self.advance();
                name
            }
            other => {
                return Err(self.error_here(format!(
                    "expected field name, found {}",
                    describe(other.as_ref())
                )));
            }
        };

        self.expect(&Token::Colon)?;
        let value = self.parse_expr()?;

        Ok(StructField {
            name,
            value,
            optional,
        })
    }

    fn parse_atom(&mut self) -> Result<SpannedExpr, ParseError> {
        let span = self.peek_span();
        let token = self.peek().cloned();

        match token {
            Some(Token::Int(magnitude)) => {
                if magnitude > i64::MAX as u64 {
                    return Err(self.error_here("integer literal is out of range".to_string()));
                }
                self.advance();
                Ok(Spanned::new(
                    self.next_id(),
                    Expr::Int(magnitude as i64),
                    span,
                ))
            }
            Some(Token::UInt(n)) => {
                self.advance();
                Ok(Spanned::new(self.next_id(), Expr::UInt(n), span))
            }
            Some(Token::Double(n)) => {
                self.advance();
                Ok(Spanned::new(self.next_id(), Expr::Double(n), span))
            }
            Some(Token::String(s)) => {
                self.advance();
                Ok(Spanned::new(self.next_id(), Expr::String(s), span))
            }
            Some(Token::Bytes(b)) => {
                self.advance();
                Ok(Spanned::new(self.next_id(), Expr::Bytes(b), span))
            }
            Some(Token::True) => {
                self.advance();
                Ok(Spanned::new(self.next_id(), Expr::Bool(true), span))
            }
            Some(Token::False) => {
                self.advance();
                Ok(Spanned::new(self.next_id(), Expr::Bool(false), span))
            }
            Some(Token::Null) => {
                self.advance();
                Ok(Spanned::new(self.next_id(), Expr::Null, span))
            }

            Some(Token::Ident(name)) => {
                self.advance();
                Ok(Spanned::new(self.next_id(), Expr::Ident(name), span))
            }

            Some(Token::Reserved(word)) => Err(self.error_here(format!(
                "'{}' is a reserved word and cannot be used as an identifier",
                word
            ))),

            // Root-scoped identifier: .name
            Some(Token::Dot) => {
                self.advance();
                let next = self.peek().cloned();
                match next {
                    Some(Token::Ident(name)) => {
                        let end = self.peek_span().end;
                        self.advance();
                        Ok(Spanned::new(
                            self.next_id(),
                            Expr::RootIdent(name),
                            span.start..end,
                        ))
                    }
                    _ => Err(self.error_here("expected identifier after '.'".to_string())),
                }
            }

            Some(Token::LParen) => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }

            Some(Token::LBracket) => self.parse_list(),
            Some(Token::LBrace) => self.parse_map(),

            Some(token) => Err(self.error_here(format!("unexpected token '{}'", token))),

            None => Err(ParseError {
                message: "unexpected end of input".to_string(),
                span: self.eof_span(),
            }),
        }
    }

    /// List literal: `[e, ?e, ...]`.
    fn parse_list(&mut self) -> Result<SpannedExpr, ParseError> {
        let start = self.peek_span().start;
        self.expect(&Token::LBracket)?;

        let mut elements = Vec::new();
        if !self.check(&Token::RBracket) {
            elements.push(self.parse_list_element()?);
            while self.match_token(&Token::Comma) {
                if self.check(&Token::RBracket) {
                    break; // trailing comma
                }
                elements.push(self.parse_list_element()?);
            }
        }

        let end_span = self.expect(&Token::RBracket)?;

        Ok(Spanned::new(
            self.next_id(),
            Expr::List(elements),
            start..end_span.end,
        ))
    }

    fn parse_list_element(&mut self) -> Result<ListElement, ParseError> {
        let optional = self.match_token(&Token::Question);
        let expr = self.parse_expr()?;
        Ok(ListElement { expr, optional })
    }

    /// Map literal: `{k: v, ?k: v, ...}`.
    fn parse_map(&mut self) -> Result<SpannedExpr, ParseError> {
        let start = self.peek_span().start;
        self.expect(&Token::LBrace)?;

        let mut entries = Vec::new();
        if !self.check(&Token::RBrace) {
            entries.push(self.parse_map_entry()?);
            while self.match_token(&Token::Comma) {
                if self.check(&Token::RBrace) {
                    break; // trailing comma
                }
                entries.push(self.parse_map_entry()?);
            }
        }

        let end_span = self.expect(&Token::RBrace)?;

        Ok(Spanned::new(
            self.next_id(),
            Expr::Map(entries),
            start..end_span.end,
        ))
    }

    fn parse_map_entry(&mut self) -> Result<MapEntry, ParseError> {
        let optional = self.match_token(&Token::Question);
        let key = self.parse_expr()?;
        self.expect(&Token::Colon)?;
        let value = self.parse_expr()?;
        Ok(MapEntry {
            key,
            value,
            optional,
        })
    }
}

/// If `expr` is a plain identifier chain usable as a type or namespace name
/// (`a.b.C`, `.a.b.C`), return its dotted form.
pub(crate) fn qualified_type_name(expr: &SpannedExpr) -> Option<String> {
    match &expr.node {
        Expr::Ident(name) => Some(name.clone()),
        Expr::RootIdent(name) => Some(format!(".{}", name)),
        Expr::Select {
            operand,
            field,
            test_only: false,
            optional: false,
        } => {
            let prefix = qualified_type_name(operand)?;
            Some(format!("{}.{}", prefix, field))
        }
        _ => None,
    }
}

fn describe(token: Option<&Token>) -> String {
    match token {
        Some(t) => format!("'{}'", t),
        None => "end of input".to_string(),
    }
}
