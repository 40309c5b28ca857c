//! RFC 6570 URI template expansion (level 4)
//!
//! Supports every operator (`+ # . / ; ? &`), the prefix modifier `:n` and
//! the explode modifier `*`. Undefined variables (absent, null, empty list,
//! empty object) are omitted entirely, along with their operator prefix
//! when no variable of the expression is defined.

use serde_json::{Map, Value};

use crate::parameters::filters::scalar_text;

/// Per-operator expansion rules (RFC 6570, appendix A)
#[derive(Debug, Clone, Copy)]
struct Operator {
    first: &'static str,
    sep: &'static str,
    named: bool,
    ifemp: &'static str,
    allow_reserved: bool,
}

impl Operator {
    fn parse(c: char) -> Option<Self> {
        let (first, sep, named, ifemp, allow_reserved) = match c {
            '+' => ("", ",", false, "", true),
            '#' => ("#", ",", false, "", true),
            '.' => (".", ".", false, "", false),
            '/' => ("/", "/", false, "", false),
            ';' => (";", ";", true, "", false),
            '?' => ("?", "&", true, "=", false),
            '&' => ("&", "&", true, "=", false),
            _ => return None,
        };
        Some(Self { first, sep, named, ifemp, allow_reserved })
    }

    const SIMPLE: Self = Self { first: "", sep: ",", named: false, ifemp: "", allow_reserved: false };
}

#[derive(Debug)]
struct VarSpec<'a> {
    name: &'a str,
    prefix: Option<usize>,
    explode: bool,
}

fn parse_varspec(spec: &str) -> VarSpec<'_> {
    if let Some(name) = spec.strip_suffix('*') {
        return VarSpec { name, prefix: None, explode: true };
    }
    if let Some((name, len)) = spec.split_once(':') {
        if let Ok(len) = len.parse::<usize>() {
            return VarSpec { name, prefix: Some(len), explode: false };
        }
    }
    VarSpec { name: spec, prefix: None, explode: false }
}

/// Split an expression body into its operator and variable specs
fn parse_expression(body: &str) -> (Operator, impl Iterator<Item = VarSpec<'_>>) {
    let mut chars = body.chars();
    let (operator, rest) = match chars.next().and_then(Operator::parse) {
        Some(op) => (op, chars.as_str()),
        None => (Operator::SIMPLE, body),
    };
    let specs = rest.split(',').map(str::trim).filter(|s| !s.is_empty()).map(parse_varspec);
    (operator, specs)
}

enum Segment<'a> {
    Literal(&'a str),
    Expression(&'a str),
}

/// Walk a template, reporting literal text and each `{...}` body in order.
/// An unterminated brace is treated as literal text.
fn walk<'a>(template: &'a str, mut visit: impl FnMut(Segment<'a>)) {
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        visit(Segment::Literal(&rest[..open]));
        visit(Segment::Expression(&rest[open + 1..open + close]));
        rest = &rest[open + close + 1..];
    }
    visit(Segment::Literal(rest));
}

/// Names of every variable referenced by `template`, in order
pub fn variable_names(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    walk(template, |segment| {
        if let Segment::Expression(body) = segment {
            let (_, specs) = parse_expression(body);
            for spec in specs {
                if !names.iter().any(|n| n == spec.name) {
                    names.push(spec.name.to_string());
                }
            }
        }
    });
    names
}

/// Expand `template` with `variables`
pub fn expand(template: &str, variables: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    walk(template, |segment| match segment {
        Segment::Literal(text) => out.push_str(text),
        Segment::Expression(body) => expand_expression(body, variables, &mut out),
    });
    out
}

fn expand_expression(body: &str, variables: &Map<String, Value>, out: &mut String) {
    let (op, specs) = parse_expression(body);
    let mut first = true;

    for spec in specs {
        let Some(value) = variables.get(spec.name).filter(|v| is_defined(v)) else {
            continue;
        };
        out.push_str(if first { op.first } else { op.sep });
        first = false;

        match value {
            Value::Array(items) => expand_list(&op, &spec, items, out),
            Value::Object(map) => expand_map(&op, &spec, map, out),
            scalar => {
                let mut text = scalar_text(scalar).unwrap_or_default();
                if let Some(len) = spec.prefix {
                    text = text.chars().take(len).collect();
                }
                push_named(&op, spec.name, &text, out);
            }
        }
    }
}

fn is_defined(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

fn push_named(op: &Operator, name: &str, text: &str, out: &mut String) {
    if op.named {
        out.push_str(name);
        if text.is_empty() {
            out.push_str(op.ifemp);
            return;
        }
        out.push('=');
    }
    out.push_str(&encode(text, op.allow_reserved));
}

fn expand_list(op: &Operator, spec: &VarSpec<'_>, items: &[Value], out: &mut String) {
    let texts = items.iter().map(|item| scalar_text(item).unwrap_or_else(|| item.to_string()));
    if spec.explode {
        for (i, text) in texts.enumerate() {
            if i > 0 {
                out.push_str(op.sep);
            }
            push_named(op, spec.name, &text, out);
        }
    } else {
        let joined: Vec<String> = texts.map(|t| encode(&t, op.allow_reserved)).collect();
        if op.named {
            out.push_str(spec.name);
            out.push('=');
        }
        out.push_str(&joined.join(","));
    }
}

fn expand_map(op: &Operator, spec: &VarSpec<'_>, map: &Map<String, Value>, out: &mut String) {
    let pairs = map.iter().map(|(k, v)| {
        let text = scalar_text(v).unwrap_or_else(|| v.to_string());
        (encode(k, op.allow_reserved), encode(&text, op.allow_reserved))
    });
    if spec.explode {
        for (i, (key, value)) in pairs.enumerate() {
            if i > 0 {
                out.push_str(op.sep);
            }
            out.push_str(&key);
            out.push('=');
            out.push_str(&value);
        }
    } else {
        let joined: Vec<String> = pairs.flat_map(|(k, v)| [k, v]).collect();
        if op.named {
            out.push_str(spec.name);
            out.push('=');
        }
        out.push_str(&joined.join(","));
    }
}

const RESERVED: &str = ":/?#[]@!$&'()*+,;=";

/// Percent-encode `text`; with `allow_reserved`, reserved characters and
/// existing percent-encoded triplets pass through
fn encode(text: &str, allow_reserved: bool) -> String {
    if !allow_reserved {
        return urlencoding::encode(text).into_owned();
    }

    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    for (i, c) in text.char_indices() {
        let is_triplet = c == '%'
            && bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit)
            && bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit);
        if c.is_ascii_alphanumeric() || "-._~".contains(c) || RESERVED.contains(c) || is_triplet {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            out.push_str(&urlencoding::encode(c.encode_utf8(&mut buf)));
        }
    }
    out
}
