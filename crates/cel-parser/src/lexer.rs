//! CEL lexer using logos.

use logos::Logos;

/// A span in the source input (byte offsets).
pub type Span = std::ops::Range<usize>;

/// A token with its source span.
pub type SpannedToken = (Token, Span);

/// Lexer error with span information. Lexical errors are terminal; there is
/// no partial-token recovery.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

/// CEL tokens.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r\f\x0B]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    // === Numeric literals ===
    // Unsigned: 123u, 0x1Fu
    #[regex(r"[0-9]+[uU]", lex_decimal_uint)]
    #[regex(r"0[xX][0-9a-fA-F]+[uU]", lex_hex_uint)]
    UInt(u64),

    // Signed integers carry their decimal magnitude; the parser applies the
    // sign and range-checks, so `-9223372036854775808` stays representable.
    #[regex(r"[0-9]+", lex_decimal_int, priority = 3)]
    #[regex(r"0[xX][0-9a-fA-F]+", lex_hex_int)]
    Int(u64),

    // Doubles: 1.5, 1.5e10, 1e10, .5
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", lex_double, priority = 4)]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", lex_double, priority = 4)]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", lex_double)]
    Double(f64),

    // === String literals ===
    // The opener regex captures the optional raw prefix and the quote form;
    // the callback scans the body and bumps past the terminator.
    #[regex(r#"[rR]?("""|'''|"|')"#, lex_string)]
    String(String),

    // === Bytes literals ===
    #[regex(r#"([bB][rR]?|[rR][bB])("""|'''|"|')"#, lex_bytes)]
    Bytes(Vec<u8>),

    // === Keywords ===
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,
    #[token("in")]
    In,

    // === Reserved words ===
    #[token("as", |_| "as".to_string())]
    #[token("break", |_| "break".to_string())]
    #[token("const", |_| "const".to_string())]
    #[token("continue", |_| "continue".to_string())]
    #[token("else", |_| "else".to_string())]
    #[token("for", |_| "for".to_string())]
    #[token("function", |_| "function".to_string())]
    #[token("if", |_| "if".to_string())]
    #[token("import", |_| "import".to_string())]
    #[token("let", |_| "let".to_string())]
    #[token("loop", |_| "loop".to_string())]
    #[token("package", |_| "package".to_string())]
    #[token("namespace", |_| "namespace".to_string())]
    #[token("return", |_| "return".to_string())]
    #[token("var", |_| "var".to_string())]
    #[token("void", |_| "void".to_string())]
    #[token("while", |_| "while".to_string())]
    Reserved(String),

    // === Identifier ===
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string(), priority = 0)]
    Ident(String),

    // === Operators ===
    #[token("==")]
    EqEq,
    #[token("!=")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("&&")]
    And,
    #[token("||")]
    Or,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("!")]
    Not,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,

    // === Delimiters ===
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Int(n) => write!(f, "{}", n),
            Token::UInt(n) => write!(f, "{}u", n),
            Token::Double(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "\"{}\"", s),
            Token::Bytes(b) => write!(f, "b\"{}\"", String::from_utf8_lossy(b)),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Null => write!(f, "null"),
            Token::In => write!(f, "in"),
            Token::Reserved(s) => write!(f, "{}", s),
            Token::Ident(s) => write!(f, "{}", s),
            Token::EqEq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::Le => write!(f, "<="),
            Token::Ge => write!(f, ">="),
            Token::And => write!(f, "&&"),
            Token::Or => write!(f, "||"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::Not => write!(f, "!"),
            Token::Question => write!(f, "?"),
            Token::Colon => write!(f, ":"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Dot => write!(f, "."),
            Token::Comma => write!(f, ","),
        }
    }
}

// === Numeric callbacks ===

fn lex_decimal_int(lex: &mut logos::Lexer<Token>) -> Option<u64> {
    lex.slice().parse().ok()
}

fn lex_hex_int(lex: &mut logos::Lexer<Token>) -> Option<u64> {
    u64::from_str_radix(&lex.slice()[2..], 16).ok()
}

fn lex_decimal_uint(lex: &mut logos::Lexer<Token>) -> Option<u64> {
    let s = lex.slice();
    s[..s.len() - 1].parse().ok()
}

fn lex_hex_uint(lex: &mut logos::Lexer<Token>) -> Option<u64> {
    let s = lex.slice();
    u64::from_str_radix(&s[2..s.len() - 1], 16).ok()
}

fn lex_double(lex: &mut logos::Lexer<Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

// === String/bytes callbacks ===

fn lex_string(lex: &mut logos::Lexer<Token>) -> Option<String> {
    let opener = lex.slice();
    let raw = opener.starts_with(['r', 'R']);
    let term = if raw { &opener[1..] } else { opener };
    let (bytes, consumed) = scan_body(lex.remainder(), term, raw, false)?;
    lex.bump(consumed);
    // scan_body pushes whole chars in string mode, so this cannot fail.
    String::from_utf8(bytes).ok()
}

fn lex_bytes(lex: &mut logos::Lexer<Token>) -> Option<Vec<u8>> {
    let opener = lex.slice();
    let raw = opener[..2].contains(['r', 'R']);
    let term = opener.trim_start_matches(['b', 'B', 'r', 'R']);
    let (bytes, consumed) = scan_body(lex.remainder(), term, raw, true)?;
    lex.bump(consumed);
    Some(bytes)
}

/// Scan a string/bytes body up to `term`, decoding escapes unless `raw`.
///
/// In bytes mode `\xHH` and octal escapes denote single bytes and may form
/// invalid UTF-8; in string mode they denote code points. `\u`/`\U` escapes
/// are only legal in string mode. Returns the decoded bytes and the number
/// of input bytes consumed (including the terminator).
fn scan_body(input: &str, term: &str, raw: bool, bytes_mode: bool) -> Option<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if input[i..].starts_with(term) {
            return Some((out, i + term.len()));
        }
        if c == '\\' && !raw {
            let (_, esc) = chars.next()?;
            match esc {
                '\\' => out.push(b'\\'),
                '/' => out.push(b'/'),
                '"' => out.push(b'"'),
                '\'' => out.push(b'\''),
                '`' => out.push(b'`'),
                '?' => out.push(b'?'),
                'a' => out.push(0x07),
                'b' => out.push(0x08),
                'f' => out.push(0x0C),
                'n' => out.push(b'\n'),
                'r' => out.push(b'\r'),
                't' => out.push(b'\t'),
                'v' => out.push(0x0B),
                'x' | 'X' => {
                    let val = take_hex(&mut chars, 2)?;
                    if bytes_mode {
                        out.push(val as u8);
                    } else {
                        push_char(&mut out, char::from_u32(val)?);
                    }
                }
                'u' => {
                    if bytes_mode {
                        return None;
                    }
                    let val = take_hex(&mut chars, 4)?;
                    push_char(&mut out, char::from_u32(val)?);
                }
                'U' => {
                    if bytes_mode {
                        return None;
                    }
                    let val = take_hex(&mut chars, 8)?;
                    push_char(&mut out, char::from_u32(val)?);
                }
                d @ '0'..='3' => {
                    let val = take_octal(&mut chars, d)?;
                    if bytes_mode {
                        out.push(val);
                    } else {
                        push_char(&mut out, char::from_u32(val as u32)?);
                    }
                }
                _ => return None,
            }
        } else if c == '\n' && term.len() == 1 {
            // Newlines only inside triple-quoted literals.
            return None;
        } else {
            push_char(&mut out, c);
        }
    }

    None // unterminated literal
}

fn push_char(out: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

fn take_hex(chars: &mut std::iter::Peekable<std::str::CharIndices>, n: usize) -> Option<u32> {
    let mut val: u32 = 0;
    for _ in 0..n {
        let (_, c) = chars.next()?;
        val = val.checked_mul(16)? + c.to_digit(16)?;
    }
    Some(val)
}

fn take_octal(chars: &mut std::iter::Peekable<std::str::CharIndices>, first: char) -> Option<u8> {
    let mut val = first.to_digit(8)? as u32;
    for _ in 0..2 {
        let (_, c) = chars.next()?;
        val = val * 8 + c.to_digit(8)?;
    }
    u8::try_from(val).ok()
}

// === Public lexer API ===

/// Tokenize the input string.
pub fn lex(input: &str) -> Result<Vec<SpannedToken>, LexError> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(input);

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(_) => {
                return Err(LexError {
                    message: format!("invalid token '{}'", &input[span.clone()]),
                    span,
                })
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_tokens(input: &str) -> Vec<Token> {
        lex(input).unwrap().into_iter().map(|(tok, _)| tok).collect()
    }

    #[test]
    fn lex_integers() {
        assert_eq!(lex_tokens("123"), vec![Token::Int(123)]);
        assert_eq!(lex_tokens("0"), vec![Token::Int(0)]);
        assert_eq!(lex_tokens("0x1F"), vec![Token::Int(31)]);
        assert_eq!(lex_tokens("0XAB"), vec![Token::Int(171)]);
        // Magnitude beyond i64::MAX lexes; the parser decides validity.
        assert_eq!(
            lex_tokens("9223372036854775808"),
            vec![Token::Int(9223372036854775808)]
        );
    }

    #[test]
    fn lex_unsigned_integers() {
        assert_eq!(lex_tokens("123u"), vec![Token::UInt(123)]);
        assert_eq!(lex_tokens("123U"), vec![Token::UInt(123)]);
        assert_eq!(lex_tokens("0x1Fu"), vec![Token::UInt(31)]);
        assert_eq!(
            lex_tokens("18446744073709551615u"),
            vec![Token::UInt(u64::MAX)]
        );
    }

    #[test]
    fn lex_doubles() {
        assert_eq!(lex_tokens("1.5"), vec![Token::Double(1.5)]);
        assert_eq!(lex_tokens("1e10"), vec![Token::Double(1e10)]);
        assert_eq!(lex_tokens("1.5e-3"), vec![Token::Double(1.5e-3)]);
        assert_eq!(lex_tokens(".5"), vec![Token::Double(0.5)]);
    }

    #[test]
    fn lex_strings() {
        assert_eq!(
            lex_tokens(r#""hello""#),
            vec![Token::String("hello".to_string())]
        );
        assert_eq!(
            lex_tokens("'world'"),
            vec![Token::String("world".to_string())]
        );
        assert_eq!(
            lex_tokens(r#""hello\nworld""#),
            vec![Token::String("hello\nworld".to_string())]
        );
    }

    #[test]
    fn lex_raw_strings() {
        assert_eq!(
            lex_tokens(r#"r"hello\n""#),
            vec![Token::String(r"hello\n".to_string())]
        );
        assert_eq!(
            lex_tokens(r"R'hello\n'"),
            vec![Token::String(r"hello\n".to_string())]
        );
    }

    #[test]
    fn lex_triple_strings() {
        assert_eq!(
            lex_tokens("\"\"\"multi\nline\"\"\""),
            vec![Token::String("multi\nline".to_string())]
        );
        // Escapes are still processed inside triple quotes.
        assert_eq!(
            lex_tokens(r#"'''a\tb'''"#),
            vec![Token::String("a\tb".to_string())]
        );
        assert_eq!(
            lex_tokens(r#"r'''a\tb'''"#),
            vec![Token::String(r"a\tb".to_string())]
        );
    }

    #[test]
    fn lex_bytes_literals() {
        assert_eq!(
            lex_tokens(r#"b"hello""#),
            vec![Token::Bytes(b"hello".to_vec())]
        );
        // \xFF is a raw byte in bytes literals, not a code point.
        assert_eq!(
            lex_tokens(r#"b"\xff""#),
            vec![Token::Bytes(vec![0xFF])]
        );
        assert_eq!(
            lex_tokens(r#"b"\377""#),
            vec![Token::Bytes(vec![0xFF])]
        );
        // Non-ASCII literal text contributes its UTF-8 encoding.
        assert_eq!(
            lex_tokens("b'ÿ'"),
            vec![Token::Bytes(vec![0xC3, 0xBF])]
        );
        // Raw bytes keep backslashes verbatim.
        assert_eq!(
            lex_tokens(r#"rb"\xff""#),
            vec![Token::Bytes(b"\\xff".to_vec())]
        );
    }

    #[test]
    fn lex_bytes_rejects_unicode_escape() {
        assert!(lex(r#"b"\u0041""#).is_err());
    }

    #[test]
    fn lex_unterminated_string_is_error() {
        assert!(lex(r#""abc"#).is_err());
        assert!(lex("\"ab\ncd\"").is_err());
    }

    #[test]
    fn lex_keywords_and_reserved() {
        assert_eq!(lex_tokens("true"), vec![Token::True]);
        assert_eq!(lex_tokens("false"), vec![Token::False]);
        assert_eq!(lex_tokens("null"), vec![Token::Null]);
        assert_eq!(lex_tokens("in"), vec![Token::In]);
        assert_eq!(lex_tokens("if"), vec![Token::Reserved("if".to_string())]);
        assert_eq!(lex_tokens("let"), vec![Token::Reserved("let".to_string())]);
    }

    #[test]
    fn lex_identifiers() {
        assert_eq!(lex_tokens("foo"), vec![Token::Ident("foo".to_string())]);
        assert_eq!(lex_tokens("_bar"), vec![Token::Ident("_bar".to_string())]);
        assert_eq!(
            lex_tokens("baz123"),
            vec![Token::Ident("baz123".to_string())]
        );
    }

    #[test]
    fn lex_operators() {
        assert_eq!(
            lex_tokens("== != < <= > >= && || ! ? :"),
            vec![
                Token::EqEq,
                Token::Ne,
                Token::Lt,
                Token::Le,
                Token::Gt,
                Token::Ge,
                Token::And,
                Token::Or,
                Token::Not,
                Token::Question,
                Token::Colon
            ]
        );
    }

    #[test]
    fn lex_unicode_escapes() {
        assert_eq!(
            lex_tokens(r#""\u0041""#),
            vec![Token::String("A".to_string())]
        );
        assert_eq!(
            lex_tokens(r#""\U0001F600""#),
            vec![Token::String("😀".to_string())]
        );
        assert_eq!(
            lex_tokens(r#""\x41""#),
            vec![Token::String("A".to_string())]
        );
        assert_eq!(
            lex_tokens(r#""\101""#),
            vec![Token::String("A".to_string())]
        );
    }

    #[test]
    fn lex_with_comments() {
        assert_eq!(
            lex_tokens("a // comment\n+ b"),
            vec![
                Token::Ident("a".to_string()),
                Token::Plus,
                Token::Ident("b".to_string())
            ]
        );
    }

    #[test]
    fn lex_expression() {
        assert_eq!(
            lex_tokens("a + b * 2"),
            vec![
                Token::Ident("a".to_string()),
                Token::Plus,
                Token::Ident("b".to_string()),
                Token::Star,
                Token::Int(2)
            ]
        );
    }
}
