//! Conversions between host values and the interpreter's representations.
//!
//! Two paths exist. The string path renders values into the interpreter's
//! list syntax (`merge`) and parses it back (`split_list`, `split`). The
//! typed path (`to_typed` / `from_typed`) converts by declared type tag with
//! no string round-trip; unrecognized tags wrap opaquely and re-inject the
//! original native object unchanged on the way back.

use crate::error::BridgeError;
use crate::value::{Obj, TypedValue, Value};

/// Recursion cap for [`flatten`].
pub const MAX_NESTING_DEPTH: usize = 1000;

// ─────────────────────────────────────────────────────────────────────────────
// String path: list quoting and splitting
// ─────────────────────────────────────────────────────────────────────────────

fn is_special(b: u8) -> bool {
    matches!(
        b,
        b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c | b';' | b'"' | b'\\' | b'{' | b'}' | b'['
            | b']' | b'$'
    )
}

fn braces_balanced(s: &str) -> bool {
    let mut depth: i32 = 0;
    for b in s.bytes() {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Append one element to `out` with list-safe quoting.
///
/// Plain words pass through, anything with embedded specials is brace-quoted
/// when possible, and backslash-escaped otherwise. The empty element renders
/// as `{}`.
fn quote_element(s: &str, out: &mut String) {
    if s.is_empty() {
        out.push_str("{}");
        return;
    }
    if !s.bytes().any(is_special) && !s.starts_with('#') {
        out.push_str(s);
        return;
    }
    if !s.contains('\\') && braces_balanced(s) {
        out.push('{');
        out.push_str(s);
        out.push('}');
        return;
    }
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\x0b' => out.push_str("\\v"),
            '\x0c' => out.push_str("\\f"),
            c if c.is_ascii() && is_special(c as u8) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
}

fn join_elements(elems: &[String]) -> String {
    let mut out = String::new();
    for (i, e) in elems.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        quote_element(e, &mut out);
    }
    out
}

/// Render a sequence of values as one interpreter list string.
///
/// `merge(&[])` yields the empty string; a single element yields its quoted
/// form alone. Nested lists become brace-quoted sub-lists.
pub fn merge(values: &[Value]) -> Result<String, BridgeError> {
    let elems = values
        .iter()
        .map(value_string_form)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(join_elements(&elems))
}

/// The interpreter-facing string form of a host value.
pub(crate) fn value_string_form(v: &Value) -> Result<String, BridgeError> {
    Ok(match v {
        Value::Nil => String::new(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Double(d) => d.to_string(),
        Value::Str(s) => s.clone(),
        Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        Value::List(items) => merge(items)?,
        Value::Obj(o) => o.string_form().to_string(),
    })
}

fn backslash_subst(b: u8) -> u8 {
    match b {
        b'n' => b'\n',
        b't' => b'\t',
        b'r' => b'\r',
        b'v' => 0x0b,
        b'f' => 0x0c,
        other => other,
    }
}

fn finish_element(buf: Vec<u8>) -> String {
    String::from_utf8_lossy(&buf).into_owned()
}

fn parse_braced(b: &[u8], start: usize) -> Result<(String, usize), String> {
    let mut buf = Vec::new();
    let mut depth = 1usize;
    let mut i = start + 1;
    while i < b.len() {
        match b[i] {
            b'\\' if i + 1 < b.len() => {
                // Braces take their content literally; keep the escape.
                buf.push(b[i]);
                buf.push(b[i + 1]);
                i += 2;
            }
            b'{' => {
                depth += 1;
                buf.push(b'{');
                i += 1;
            }
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    i += 1;
                    if i < b.len() && !b[i].is_ascii_whitespace() {
                        return Err(
                            "list element in braces followed by data instead of space".to_string()
                        );
                    }
                    return Ok((finish_element(buf), i));
                }
                buf.push(b'}');
                i += 1;
            }
            c => {
                buf.push(c);
                i += 1;
            }
        }
    }
    Err("unmatched open brace in list".to_string())
}

fn parse_quoted(b: &[u8], start: usize) -> Result<(String, usize), String> {
    let mut buf = Vec::new();
    let mut i = start + 1;
    while i < b.len() {
        match b[i] {
            b'\\' if i + 1 < b.len() => {
                buf.push(backslash_subst(b[i + 1]));
                i += 2;
            }
            b'"' => {
                i += 1;
                if i < b.len() && !b[i].is_ascii_whitespace() {
                    return Err(
                        "list element in quotes followed by data instead of space".to_string()
                    );
                }
                return Ok((finish_element(buf), i));
            }
            c => {
                buf.push(c);
                i += 1;
            }
        }
    }
    Err("unmatched open quote in list".to_string())
}

fn parse_bare(b: &[u8], start: usize) -> (String, usize) {
    let mut buf = Vec::new();
    let mut i = start;
    while i < b.len() && !b[i].is_ascii_whitespace() {
        if b[i] == b'\\' && i + 1 < b.len() {
            buf.push(backslash_subst(b[i + 1]));
            i += 2;
        } else {
            buf.push(b[i]);
            i += 1;
        }
    }
    (finish_element(buf), i)
}

fn parse_list(s: &str) -> Result<Vec<String>, String> {
    let b = s.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < b.len() {
        while i < b.len() && b[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= b.len() {
            break;
        }
        let (elem, next) = match b[i] {
            b'{' => parse_braced(b, i)?,
            b'"' => parse_quoted(b, i)?,
            _ => parse_bare(b, i),
        };
        out.push(elem);
        i = next;
    }
    Ok(out)
}

/// Split a string into its top-level list elements.
///
/// Fails with the interpreter's diagnostic when the string is not a
/// well-formed list.
pub fn split_list(s: &str) -> Result<Vec<String>, BridgeError> {
    parse_list(s).map_err(BridgeError::Target)
}

/// Recursively split a string into nested lists.
///
/// A string that does not parse as a list comes back as itself; splitting
/// never fails. Single-element lists collapse to that element's text.
pub fn split(s: &str) -> Value {
    match parse_list(s) {
        Err(_) => Value::Str(s.to_string()),
        Ok(items) => match items.len() {
            0 => Value::Str(String::new()),
            1 => Value::Str(items.into_iter().next().unwrap_or_default()),
            _ => Value::List(items.iter().map(|e| split(e)).collect()),
        },
    }
}

/// [`split`] lifted over composite values: lists recurse element-wise, and
/// strings that parse as multi-element lists are split; everything else is
/// returned unchanged.
pub fn split_value(v: &Value) -> Value {
    match v {
        Value::List(items) => Value::List(items.iter().map(split_value).collect()),
        Value::Str(s) => match parse_list(s) {
            Ok(items) if items.len() > 1 => split(s),
            _ => v.clone(),
        },
        other => other.clone(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Flattening
// ─────────────────────────────────────────────────────────────────────────────

/// Flatten nested lists into one flat vector of non-list values.
///
/// `Nil` elements are dropped. Recursion is capped at
/// [`MAX_NESTING_DEPTH`]; exceeding the cap is an error rather than a stack
/// overflow.
pub fn flatten(v: &Value) -> Result<Vec<Value>, BridgeError> {
    match v {
        Value::List(items) => {
            let mut out = Vec::new();
            flatten_into(items, &mut out, 0)?;
            Ok(out)
        }
        _ => Err(BridgeError::UnsupportedValue(
            "argument must be a sequence".to_string(),
        )),
    }
}

fn flatten_into(items: &[Value], out: &mut Vec<Value>, depth: usize) -> Result<(), BridgeError> {
    if depth >= MAX_NESTING_DEPTH {
        return Err(BridgeError::TooDeeplyNested);
    }
    for item in items {
        match item {
            Value::Nil => {}
            Value::List(inner) => flatten_into(inner, out, depth + 1)?,
            other => out.push(other.clone()),
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Scalar parsers (the interpreter's own literal syntax)
// ─────────────────────────────────────────────────────────────────────────────

fn offending(v: &Value) -> String {
    value_string_form(v).unwrap_or_default()
}

/// Coerce to an integer; already-typed integers pass through untouched.
pub fn get_int(v: &Value) -> Result<i64, BridgeError> {
    match v {
        Value::Int(i) => Ok(*i),
        Value::Str(s) => parse_int(s),
        other => Err(BridgeError::BadInteger(offending(other))),
    }
}

fn parse_int(s: &str) -> Result<i64, BridgeError> {
    let t = s.trim();
    let bad = || BridgeError::BadInteger(s.to_string());
    let (neg, digits) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let magnitude = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16).map_err(|_| bad())?
    } else if digits.len() > 1 && digits.starts_with('0') {
        // Leading zero means octal.
        i64::from_str_radix(&digits[1..], 8).map_err(|_| bad())?
    } else {
        digits.parse::<i64>().map_err(|_| bad())?
    };
    Ok(if neg { -magnitude } else { magnitude })
}

/// Coerce to a float; already-typed doubles pass through untouched.
pub fn get_double(v: &Value) -> Result<f64, BridgeError> {
    match v {
        Value::Double(d) => Ok(*d),
        Value::Int(i) => Ok(*i as f64),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| BridgeError::BadDouble(s.clone())),
        other => Err(BridgeError::BadDouble(offending(other))),
    }
}

/// Coerce to a boolean, accepting the interpreter's boolean words.
pub fn get_boolean(v: &Value) -> Result<bool, BridgeError> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::Int(i) => Ok(*i != 0),
        Value::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
            "0" | "false" | "no" | "off" => Ok(false),
            "1" | "true" | "yes" | "on" => Ok(true),
            _ => Err(BridgeError::BadBoolean(s.clone())),
        },
        other => Err(BridgeError::BadBoolean(offending(other))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed path
// ─────────────────────────────────────────────────────────────────────────────

/// Convert a host value into the interpreter's typed representation.
///
/// A wrapped [`Obj`] re-injects its underlying interpreter value unchanged.
pub fn to_typed(v: &Value) -> Result<TypedValue, BridgeError> {
    Ok(match v {
        Value::Nil => TypedValue::Text(String::new()),
        Value::Bool(b) => TypedValue::Bool(*b),
        Value::Int(i) => TypedValue::Int(*i),
        Value::Double(d) => TypedValue::Double(*d),
        Value::Str(s) => TypedValue::Text(s.clone()),
        Value::Bytes(b) => TypedValue::Bytes(b.clone()),
        Value::List(items) => TypedValue::List(
            items
                .iter()
                .map(to_typed)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Obj(o) => o.value().clone(),
    })
}

/// Convert an argument vector, honoring the `Nil` truncation rule: the
/// vector ends at the first `Nil` element.
pub fn to_typed_args(args: &[Value]) -> Result<Vec<TypedValue>, BridgeError> {
    let mut out = Vec::with_capacity(args.len());
    for v in args {
        if matches!(v, Value::Nil) {
            break;
        }
        out.push(to_typed(v)?);
    }
    Ok(out)
}

/// Convert an interpreter value to a host value by type tag.
///
/// Lists convert element-by-element; unrecognized tags come back as a
/// wrapped [`Obj`] so the native object survives a round trip.
pub fn from_typed(tv: &TypedValue) -> Value {
    match tv {
        TypedValue::Bool(b) => Value::Bool(*b),
        TypedValue::Int(i) => Value::Int(*i),
        TypedValue::Double(d) => Value::Double(*d),
        TypedValue::Bytes(b) => Value::Bytes(b.clone()),
        TypedValue::Text(s) => Value::Str(s.clone()),
        TypedValue::List(items) => Value::List(items.iter().map(from_typed).collect()),
        TypedValue::Opaque(o) => Value::Obj(Obj::new(TypedValue::Opaque(o.clone()))),
    }
}

/// Convert an interpreter result for the host, per the session's result
/// mode. With typed results off, everything collapses to its string form
/// (byte arrays keep the decode-or-raw heuristic).
pub fn result_to_value(tv: TypedValue, want_objects: bool) -> Value {
    if want_objects {
        from_typed(&tv)
    } else {
        match tv {
            TypedValue::Bytes(b) => text_from_bytes(&b),
            other => Value::Str(other.string_form()),
        }
    }
}

/// Decode result bytes for the host: 7-bit-clean bytes are plain text,
/// anything else is decoded as UTF-8 with raw bytes as the fallback.
pub fn text_from_bytes(bytes: &[u8]) -> Value {
    if bytes.is_ascii() {
        return Value::Str(String::from_utf8_lossy(bytes).into_owned());
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => Value::Str(s.to_string()),
        Err(_) => Value::Bytes(bytes.to_vec()),
    }
}

/// The string form of a typed value (lists render with full quoting).
pub(crate) fn string_form(tv: &TypedValue) -> String {
    match tv {
        TypedValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        TypedValue::Int(i) => i.to_string(),
        TypedValue::Double(d) => d.to_string(),
        TypedValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        TypedValue::Text(s) => s.clone(),
        TypedValue::List(items) => {
            let elems: Vec<String> = items.iter().map(string_form).collect();
            join_elements(&elems)
        }
        TypedValue::Opaque(o) => o.display(),
    }
}
