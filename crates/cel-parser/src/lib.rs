//! CEL (Common Expression Language) parser.
//!
//! Turns CEL source text into an expression tree with macros already
//! expanded. The pipeline is lexer → recursive-descent parser → inline
//! macro expansion; the output AST is immutable and consumed by the
//! evaluator crate.

pub mod ast;
mod lexer;
pub mod macros;
mod parser;

pub use ast::{
    BinaryOp, Expr, ListElement, MapEntry, Span, Spanned, SpannedExpr, StructField, UnaryOp,
};
pub use lexer::{lex, LexError, SpannedToken, Token};
pub use macros::{
    ArgCount, Macro, MacroContext, MacroExpander, MacroExpansion, MacroRegistry, MacroStyle,
    ACCU_VAR,
};
pub use parser::Parser;

/// A parse error with source location.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}..{}",
            self.message, self.span.start, self.span.end
        )
    }
}

impl std::error::Error for ParseError {}

/// Options controlling the parser.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Recursion guard for nested expressions. Conformance requires at least
    /// 12 levels of nesting and 32-way flat sequences; the default leaves
    /// ample headroom while keeping pathological inputs off the stack.
    pub max_recursion_depth: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_recursion_depth: 250,
        }
    }
}

/// Parse a CEL expression with the standard macros and default options.
pub fn parse(source: &str) -> Result<SpannedExpr, ParseError> {
    parse_with_macros(source, MacroRegistry::standard(), &ParseOptions::default())
}

/// Parse a CEL expression with a custom macro registry and options.
pub fn parse_with_macros(
    source: &str,
    macros: MacroRegistry,
    options: &ParseOptions,
) -> Result<SpannedExpr, ParseError> {
    let tokens = lexer::lex(source).map_err(|e| ParseError {
        message: e.message,
        span: e.span,
    })?;

    if tokens.is_empty() {
        return Err(ParseError {
            message: "empty expression".to_string(),
            span: 0..0,
        });
    }

    let mut parser = Parser::with_options(&tokens, macros, options);
    let ast = parser.parse_expr()?;

    if !parser.at_end() {
        return Err(ParseError {
            message: "unexpected tokens after expression".to_string(),
            span: parser.peek_span(),
        });
    }

    Ok(ast)
}
