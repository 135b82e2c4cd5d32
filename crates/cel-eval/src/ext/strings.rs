//! Strings extension: manipulation helpers beyond the standard library,
//! plus `format` and `strings.quote`. All indexes are code points, not
//! bytes.

use crate::error::EvalError;
use crate::functions::{Function, Overload};
use crate::stdlib::format_double;
use crate::time::{format_duration, format_timestamp};
use crate::value::{Kind, Value};

// ==================== Code point helpers ====================

fn cp_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of a code point index; `Some(s.len())` at exactly the end.
fn cp_to_byte(s: &str, cp: usize) -> Option<usize> {
    if cp == 0 {
        return Some(0);
    }
    s.char_indices()
        .nth(cp)
        .map(|(b, _)| b)
        .or_else(|| (cp == cp_len(s)).then_some(s.len()))
}

fn byte_to_cp(s: &str, byte: usize) -> usize {
    s[..byte].chars().count()
}

// ==================== Registration ====================

/// Functions contributed by the strings extension.
pub fn extension() -> Vec<Function> {
    vec![
        Function::new("charAt").with_overload(Overload::method(
            "string_char_at",
            vec![Kind::String, Kind::Int],
            char_at,
        )),
        Function::new("indexOf")
            .with_overload(Overload::method(
                "string_index_of",
                vec![Kind::String, Kind::String],
                |args| index_of(args, 0),
            ))
            .with_overload(Overload::method(
                "string_index_of_offset",
                vec![Kind::String, Kind::String, Kind::Int],
                |args| match &args[2] {
                    Value::Int(offset) => index_of(args, *offset),
                    _ => Value::error(EvalError::no_matching_overload("indexOf")),
                },
            )),
        Function::new("lastIndexOf")
            .with_overload(Overload::method(
                "string_last_index_of",
                vec![Kind::String, Kind::String],
                |args| last_index_of(args, i64::MAX),
            ))
            .with_overload(Overload::method(
                "string_last_index_of_offset",
                vec![Kind::String, Kind::String, Kind::Int],
                |args| match &args[2] {
                    Value::Int(offset) => last_index_of(args, *offset),
                    _ => Value::error(EvalError::no_matching_overload("lastIndexOf")),
                },
            )),
        Function::new("lowerAscii").with_overload(Overload::method(
            "string_lower_ascii",
            vec![Kind::String],
            |args| string_map(args, |s| s.to_ascii_lowercase()),
        )),
        Function::new("upperAscii").with_overload(Overload::method(
            "string_upper_ascii",
            vec![Kind::String],
            |args| string_map(args, |s| s.to_ascii_uppercase()),
        )),
        Function::new("trim").with_overload(Overload::method(
            "string_trim",
            vec![Kind::String],
            |args| string_map(args, |s| s.trim().to_string()),
        )),
        Function::new("reverse").with_overload(Overload::method(
            "string_reverse",
            vec![Kind::String],
            |args| string_map(args, |s| s.chars().rev().collect()),
        )),
        Function::new("replace")
            .with_overload(Overload::method(
                "string_replace",
                vec![Kind::String, Kind::String, Kind::String],
                |args| replace(args, -1),
            ))
            .with_overload(Overload::method(
                "string_replace_count",
                vec![Kind::String, Kind::String, Kind::String, Kind::Int],
                |args| match &args[3] {
                    Value::Int(count) => replace(args, *count),
                    _ => Value::error(EvalError::no_matching_overload("replace")),
                },
            )),
        Function::new("split")
            .with_overload(Overload::method(
                "string_split",
                vec![Kind::String, Kind::String],
                |args| split(args, -1),
            ))
            .with_overload(Overload::method(
                "string_split_limit",
                vec![Kind::String, Kind::String, Kind::Int],
                |args| match &args[2] {
                    Value::Int(limit) => split(args, *limit),
                    _ => Value::error(EvalError::no_matching_overload("split")),
                },
            )),
        Function::new("substring")
            .with_overload(Overload::method(
                "string_substring",
                vec![Kind::String, Kind::Int],
                |args| match (&args[0], &args[1]) {
                    (Value::String(s), Value::Int(start)) => {
                        substring(s, *start, cp_len(s) as i64)
                    }
                    _ => Value::error(EvalError::no_matching_overload("substring")),
                },
            ))
            .with_overload(Overload::method(
                "string_substring_range",
                vec![Kind::String, Kind::Int, Kind::Int],
                |args| match (&args[0], &args[1], &args[2]) {
                    (Value::String(s), Value::Int(start), Value::Int(end)) => {
                        substring(s, *start, *end)
                    }
                    _ => Value::error(EvalError::no_matching_overload("substring")),
                },
            )),
        Function::new("join")
            .with_overload(Overload::method("list_join", vec![Kind::List], |args| {
                join(args, "")
            }))
            .with_overload(Overload::method(
                "list_join_separator",
                vec![Kind::List, Kind::String],
                |args| match &args[1] {
                    Value::String(sep) => join(args, sep),
                    _ => Value::error(EvalError::no_matching_overload("join")),
                },
            )),
        Function::new("strings.quote").with_overload(Overload::function(
            "strings_quote",
            vec![Kind::String],
            |args| match &args[0] {
                Value::String(s) => Value::string(quote(s)),
                _ => Value::error(EvalError::no_matching_overload("strings.quote")),
            },
        )),
        Function::new("format").with_overload(Overload::method(
            "string_format",
            vec![Kind::String, Kind::List],
            format,
        )),
    ]
}

// ==================== Implementations ====================

fn string_map(args: &[Value], f: impl Fn(&str) -> String) -> Value {
    match &args[0] {
        Value::String(s) => Value::string(f(s)),
        other => Value::error(EvalError::no_matching_overload(&format!(
            "string function over '{}'",
            other.type_name()
        ))),
    }
}

/// `charAt(i)`: the character at code point `i`, or the empty string at
/// exactly the end of the string.
fn char_at(args: &[Value]) -> Value {
    let (s, i) = match (&args[0], &args[1]) {
        (Value::String(s), Value::Int(i)) => (s, *i),
        _ => return Value::error(EvalError::no_matching_overload("charAt")),
    };
    let len = cp_len(s) as i64;
    if i < 0 || i > len {
        return Value::error(EvalError::index_out_of_range(i, len as usize));
    }
    if i == len {
        return Value::from("");
    }
    Value::string(s.chars().nth(i as usize).unwrap().to_string())
}

fn index_of(args: &[Value], offset: i64) -> Value {
    let (s, sub) = match (&args[0], &args[1]) {
        (Value::String(s), Value::String(sub)) => (s, sub),
        _ => return Value::error(EvalError::no_matching_overload("indexOf")),
    };
    let len = cp_len(s) as i64;
    if offset < 0 || offset > len {
        return Value::error(EvalError::index_out_of_range(offset, len as usize));
    }
    let byte_off = cp_to_byte(s, offset as usize).unwrap();
    match s[byte_off..].find(sub.as_ref()) {
        Some(pos) => Value::Int(byte_to_cp(s, byte_off + pos) as i64),
        None => Value::Int(-1),
    }
}

/// Last occurrence whose start is at or before `offset`.
fn last_index_of(args: &[Value], offset: i64) -> Value {
    let (s, sub) = match (&args[0], &args[1]) {
        (Value::String(s), Value::String(sub)) => (s, sub),
        _ => return Value::error(EvalError::no_matching_overload("lastIndexOf")),
    };
    let len = cp_len(s) as i64;
    if offset != i64::MAX && (offset < 0 || offset > len) {
        return Value::error(EvalError::index_out_of_range(offset, len as usize));
    }

    let mut best: i64 = -1;
    let mut search_from = 0usize;
    while let Some(pos) = s[search_from..].find(sub.as_ref()) {
        let match_start = search_from + pos;
        let cp = byte_to_cp(s, match_start) as i64;
        if cp > offset.min(len) {
            break;
        }
        best = cp;
        // Advance past one code point so overlapping matches are found
        // without splitting a UTF-8 boundary.
        match s[match_start..].chars().next() {
            Some(c) => search_from = match_start + c.len_utf8(),
            None => break,
        }
    }
    Value::Int(best)
}

fn replace(args: &[Value], count: i64) -> Value {
    let (s, old, new) = match (&args[0], &args[1], &args[2]) {
        (Value::String(s), Value::String(old), Value::String(new)) => (s, old, new),
        _ => return Value::error(EvalError::no_matching_overload("replace")),
    };
    let result = if count < 0 {
        s.replace(old.as_ref(), new)
    } else {
        s.replacen(old.as_ref(), new, count as usize)
    };
    Value::string(result)
}

/// Go-style SplitN: a negative limit keeps every part, zero produces an
/// empty list, and a positive limit caps the part count with the remainder
/// left intact. An empty separator splits between code points.
fn split(args: &[Value], limit: i64) -> Value {
    let (s, sep) = match (&args[0], &args[1]) {
        (Value::String(s), Value::String(sep)) => (s, sep),
        _ => return Value::error(EvalError::no_matching_overload("split")),
    };

    if limit == 0 {
        return Value::from(Vec::<Value>::new());
    }

    let parts: Vec<String> = if sep.is_empty() {
        let chars: Vec<String> = s.chars().map(|c| c.to_string()).collect();
        if limit > 0 && chars.len() > limit as usize {
            let mut head: Vec<String> = chars[..limit as usize - 1].to_vec();
            head.push(chars[limit as usize - 1..].concat());
            head
        } else {
            chars
        }
    } else if limit > 0 {
        s.splitn(limit as usize, sep.as_ref())
            .map(str::to_string)
            .collect()
    } else {
        s.split(sep.as_ref()).map(str::to_string).collect()
    };

    Value::from(parts.into_iter().map(Value::from).collect::<Vec<_>>())
}

fn substring(s: &str, start: i64, end: i64) -> Value {
    let len = cp_len(s) as i64;
    if start < 0 || end < 0 || start > len || end > len {
        return Value::error(EvalError::index_out_of_range(start.max(end), len as usize));
    }
    if start > end {
        return Value::error(EvalError::invalid_argument(
            "substring start must not exceed end",
        ));
    }
    let b_start = cp_to_byte(s, start as usize).unwrap();
    let b_end = cp_to_byte(s, end as usize).unwrap();
    Value::string(&s[b_start..b_end])
}

fn join(args: &[Value], sep: &str) -> Value {
    let list = match &args[0] {
        Value::List(l) => l,
        _ => return Value::error(EvalError::no_matching_overload("join")),
    };
    let mut parts = Vec::with_capacity(list.len());
    for item in list.iter() {
        match item {
            Value::String(s) => parts.push(s.to_string()),
            other => {
                return Value::error(EvalError::no_matching_overload(&format!(
                    "join over list containing '{}'",
                    other.type_name()
                )))
            }
        }
    }
    Value::string(parts.join(sep))
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x07' => out.push_str("\\a"),
            '\x08' => out.push_str("\\b"),
            '\x0C' => out.push_str("\\f"),
            '\x0B' => out.push_str("\\v"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// ==================== format ====================

enum FormatClause {
    Literal(String),
    Verb { verb: char, precision: Option<usize> },
}

fn parse_format_string(fmt: &str) -> Result<Vec<FormatClause>, String> {
    let mut clauses = Vec::new();
    let mut chars = fmt.chars().peekable();
    let mut literal = String::new();

    while let Some(c) = chars.next() {
        if c != '%' {
            literal.push(c);
            continue;
        }
        match chars.peek() {
            Some('%') => {
                chars.next();
                literal.push('%');
            }
            Some(_) => {
                if !literal.is_empty() {
                    clauses.push(FormatClause::Literal(std::mem::take(&mut literal)));
                }
                let precision = if chars.peek() == Some(&'.') {
                    chars.next();
                    let mut digits = String::new();
                    while let Some(d) = chars.peek() {
                        if d.is_ascii_digit() {
                            digits.push(*d);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    Some(digits.parse::<usize>().map_err(|_| "invalid precision")?)
                } else {
                    None
                };
                let verb = chars.next().ok_or("format string ends with '%'")?;
                match verb {
                    's' | 'd' | 'f' | 'e' | 'b' | 'o' | 'x' | 'X' => {
                        clauses.push(FormatClause::Verb { verb, precision });
                    }
                    other => {
                        return Err(format!("unrecognized formatting clause '{}'", other));
                    }
                }
            }
            None => return Err("format string ends with '%'".to_string()),
        }
    }

    if !literal.is_empty() {
        clauses.push(FormatClause::Literal(literal));
    }
    Ok(clauses)
}

fn format(args: &[Value]) -> Value {
    let (fmt, format_args) = match (&args[0], &args[1]) {
        (Value::String(fmt), Value::List(list)) => (fmt, list),
        _ => return Value::error(EvalError::no_matching_overload("format")),
    };

    let clauses = match parse_format_string(fmt) {
        Ok(c) => c,
        Err(e) => return Value::error(EvalError::invalid_argument(e)),
    };

    let mut out = String::new();
    let mut next_arg = 0usize;
    for clause in clauses {
        match clause {
            FormatClause::Literal(lit) => out.push_str(&lit),
            FormatClause::Verb { verb, precision } => {
                let arg = match format_args.get(next_arg) {
                    Some(a) => a,
                    None => {
                        return Value::error(EvalError::invalid_argument(
                            "not enough arguments for format string",
                        ))
                    }
                };
                next_arg += 1;
                match format_verb(verb, precision, arg) {
                    Ok(s) => out.push_str(&s),
                    Err(e) => return Value::error(EvalError::invalid_argument(e)),
                }
            }
        }
    }

    if next_arg != format_args.len() {
        return Value::error(EvalError::invalid_argument(
            "too many arguments for format string",
        ));
    }

    Value::string(out)
}

fn format_verb(verb: char, precision: Option<usize>, arg: &Value) -> Result<String, String> {
    match verb {
        's' => format_as_string(arg),
        'd' => match arg {
            Value::Int(i) => Ok(i.to_string()),
            Value::UInt(u) => Ok(u.to_string()),
            other => Err(format!("%d expects an integer, got {}", other.type_name())),
        },
        'f' => {
            let p = precision.unwrap_or(6);
            match arg {
                Value::Double(d) => Ok(format!("{:.*}", p, d)),
                Value::Int(i) => Ok(format!("{:.*}", p, *i as f64)),
                Value::UInt(u) => Ok(format!("{:.*}", p, *u as f64)),
                other => Err(format!("%f expects a number, got {}", other.type_name())),
            }
        }
        'e' => {
            let p = precision.unwrap_or(6);
            match arg {
                Value::Double(d) => Ok(scientific(*d, p)),
                Value::Int(i) => Ok(scientific(*i as f64, p)),
                Value::UInt(u) => Ok(scientific(*u as f64, p)),
                other => Err(format!("%e expects a number, got {}", other.type_name())),
            }
        }
        'b' => match arg {
            Value::Int(i) => Ok(signed_radix(*i, 2)),
            Value::UInt(u) => Ok(format!("{:b}", u)),
            Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
            other => Err(format!("%b expects an integer, got {}", other.type_name())),
        },
        'o' => match arg {
            Value::Int(i) => Ok(signed_radix(*i, 8)),
            Value::UInt(u) => Ok(format!("{:o}", u)),
            other => Err(format!("%o expects an integer, got {}", other.type_name())),
        },
        'x' | 'X' => {
            let lower = verb == 'x';
            match arg {
                Value::Int(i) => {
                    let s = signed_radix(*i, 16);
                    Ok(if lower { s } else { s.to_uppercase() })
                }
                Value::UInt(u) => Ok(if lower {
                    format!("{:x}", u)
                } else {
                    format!("{:X}", u)
                }),
                Value::String(s) => {
                    let hex: String = s
                        .as_bytes()
                        .iter()
                        .map(|b| format!("{:02x}", b))
                        .collect();
                    Ok(if lower { hex } else { hex.to_uppercase() })
                }
                Value::Bytes(b) => {
                    let hex: String = b.iter().map(|x| format!("{:02x}", x)).collect();
                    Ok(if lower { hex } else { hex.to_uppercase() })
                }
                other => Err(format!(
                    "%x expects an integer, string, or bytes, got {}",
                    other.type_name()
                )),
            }
        }
        _ => unreachable!("verbs validated during parsing"),
    }
}

/// Negative values format as sign + magnitude, not two's complement.
fn signed_radix(i: i64, radix: u32) -> String {
    let mag = i.unsigned_abs();
    let body = match radix {
        2 => format!("{:b}", mag),
        8 => format!("{:o}", mag),
        _ => format!("{:x}", mag),
    };
    if i < 0 {
        format!("-{}", body)
    } else {
        body
    }
}

/// Go-style scientific notation: `1.052033e+01`.
fn scientific(d: f64, precision: usize) -> String {
    if d.is_nan() {
        return "NaN".to_string();
    }
    if d.is_infinite() {
        return if d > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }
    let raw = format!("{:.*e}", precision, d);
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            format!("{}e{}{:02}", mantissa, if exp < 0 { "-" } else { "+" }, exp.abs())
        }
        None => raw,
    }
}

fn format_as_string(value: &Value) -> Result<String, String> {
    match value {
        Value::Null => Ok("null".to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::UInt(u) => Ok(u.to_string()),
        Value::Double(d) => Ok(format_double(*d)),
        Value::String(s) => Ok(s.to_string()),
        Value::Bytes(b) => Ok(String::from_utf8_lossy(b).to_string()),
        Value::Timestamp(ts) => Ok(format_timestamp(ts)),
        Value::Duration(d) => Ok(format_duration(d)),
        Value::Type(t) => Ok(t.name.to_string()),
        Value::List(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items.iter() {
                parts.push(format_as_string(item)?);
            }
            Ok(format!("[{}]", parts.join(", ")))
        }
        Value::Map(m) => {
            let mut parts = Vec::with_capacity(m.len());
            for (k, v) in m.iter() {
                parts.push(format!(
                    "{}: {}",
                    format_as_string(&k.to_value())?,
                    format_as_string(v)?
                ));
            }
            Ok(format!("{{{}}}", parts.join(", ")))
        }
        other => Err(format!("%s cannot format {}", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;

    fn registry() -> FunctionRegistry {
        let mut r = FunctionRegistry::new();
        for f in extension() {
            r.register(f);
        }
        r
    }

    fn s(v: &str) -> Value {
        Value::from(v)
    }

    #[test]
    fn char_at_bounds() {
        let r = registry();
        assert_eq!(r.dispatch("charAt", &[s("tacocat"), Value::Int(3)], true), s("o"));
        assert_eq!(r.dispatch("charAt", &[s("tacocat"), Value::Int(7)], true), s(""));
        assert!(r
            .dispatch("charAt", &[s("tacocat"), Value::Int(-1)], true)
            .is_error());
    }

    #[test]
    fn index_of_with_offset() {
        let r = registry();
        assert_eq!(
            r.dispatch("indexOf", &[s("hello mellow"), s("ello")], true),
            Value::Int(1)
        );
        assert_eq!(
            r.dispatch(
                "indexOf",
                &[s("hello mellow"), s("ello"), Value::Int(2)],
                true
            ),
            Value::Int(7)
        );
        assert_eq!(
            r.dispatch("indexOf", &[s("hello"), s("x")], true),
            Value::Int(-1)
        );
    }

    #[test]
    fn last_index_of() {
        let r = registry();
        assert_eq!(
            r.dispatch("lastIndexOf", &[s("hello mellow"), s("ello")], true),
            Value::Int(7)
        );
        assert_eq!(
            r.dispatch(
                "lastIndexOf",
                &[s("hello mellow"), s("ello"), Value::Int(6)],
                true
            ),
            Value::Int(1)
        );
    }

    #[test]
    fn substring_codepoints() {
        let r = registry();
        assert_eq!(
            r.dispatch("substring", &[s("tacocat"), Value::Int(4)], true),
            s("cat")
        );
        assert_eq!(
            r.dispatch(
                "substring",
                &[s("tacocat"), Value::Int(0), Value::Int(4)],
                true
            ),
            s("taco")
        );
        // Non-ASCII: indexes count code points.
        assert_eq!(
            r.dispatch(
                "substring",
                &[s("ta©o©αT"), Value::Int(2), Value::Int(6)],
                true
            ),
            s("©o©α")
        );
        assert!(r
            .dispatch("substring", &[s("abc"), Value::Int(2), Value::Int(1)], true)
            .is_error());
    }

    #[test]
    fn split_with_limits() {
        let r = registry();
        let parts = r.dispatch("split", &[s("hello hello hello"), s(" ")], true);
        assert_eq!(parts, Value::from(vec![s("hello"), s("hello"), s("hello")]));

        assert_eq!(
            r.dispatch("split", &[s("hello hello"), s(" "), Value::Int(0)], true),
            Value::from(Vec::<Value>::new())
        );
        assert_eq!(
            r.dispatch("split", &[s("hello hello"), s(" "), Value::Int(1)], true),
            Value::from(vec![s("hello hello")])
        );
    }

    #[test]
    fn replace_with_count() {
        let r = registry();
        assert_eq!(
            r.dispatch("replace", &[s("aaa"), s("a"), s("b")], true),
            s("bbb")
        );
        assert_eq!(
            r.dispatch(
                "replace",
                &[s("aaa"), s("a"), s("b"), Value::Int(2)],
                true
            ),
            s("bba")
        );
        assert_eq!(
            r.dispatch(
                "replace",
                &[s("aaa"), s("a"), s("b"), Value::Int(0)],
                true
            ),
            s("aaa")
        );
    }

    #[test]
    fn join_requires_strings() {
        let r = registry();
        assert_eq!(
            r.dispatch(
                "join",
                &[Value::from(vec![s("a"), s("b")]), s("-")],
                true
            ),
            s("a-b")
        );
        assert!(r
            .dispatch("join", &[Value::from(vec![Value::Int(1)])], true)
            .is_error());
    }

    #[test]
    fn quote_escapes() {
        assert_eq!(quote("ab\ncd"), "\"ab\\ncd\"");
        assert_eq!(quote(r#"say "hi""#), r#""say \"hi\"""#);
    }

    #[test]
    fn format_basic_verbs() {
        let r = registry();
        let fmt = |f: &str, args: Vec<Value>| {
            r.dispatch("format", &[s(f), Value::from(args)], true)
        };

        assert_eq!(fmt("%s/%d", vec![s("a"), Value::Int(7)]), s("a/7"));
        assert_eq!(fmt("%.2f", vec![Value::Double(1.2345)]), s("1.23"));
        assert_eq!(fmt("%x", vec![Value::Int(255)]), s("ff"));
        assert_eq!(fmt("%x", vec![Value::Int(-30)]), s("-1e"));
        assert_eq!(fmt("%X", vec![Value::UInt(255)]), s("FF"));
        assert_eq!(fmt("%b", vec![Value::Int(5)]), s("101"));
        assert_eq!(fmt("%o", vec![Value::Int(8)]), s("10"));
        assert_eq!(fmt("100%%", vec![]), s("100%"));
        assert_eq!(fmt("%e", vec![Value::Double(10.52033)]), s("1.052033e+01"));
    }

    #[test]
    fn format_argument_mismatch() {
        let r = registry();
        assert!(r
            .dispatch("format", &[s("%d"), Value::from(Vec::<Value>::new())], true)
            .is_error());
        assert!(r
            .dispatch(
                "format",
                &[s("none"), Value::from(vec![Value::Int(1)])],
                true
            )
            .is_error());
        assert!(r
            .dispatch(
                "format",
                &[s("%d"), Value::from(vec![s("nope")])],
                true
            )
            .is_error());
    }
}
