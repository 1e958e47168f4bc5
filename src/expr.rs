//! `${...}` expressions over JSON values
//!
//! A string that consists of a single expression evaluates to the
//! referenced value with its type intact, so `condition = "${fact.is_qvm}"`
//! yields a boolean. Anything else is rendered into a string. `$${` is a
//! literal `${`.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("unterminated expression in {0:?}")]
    Unterminated(String),

    #[error("invalid reference ${{{0}}}")]
    InvalidReference(String),

    #[error("${{{reference}}}: {missing} is not defined")]
    Undefined { reference: String, missing: String },

    #[error("${{{0}}} is null")]
    Null(String),

    #[error("${{{0}}} cannot be interpolated into a string")]
    NotScalar(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A parsed reference such as `out.db.postgres.install`
pub type Reference = Vec<String>;

#[derive(Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Reference(Reference),
}

fn parse(input: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = input;

    while let Some(idx) = rest.find('$') {
        literal.push_str(&rest[..idx]);
        let after = &rest[idx..];

        if let Some(tail) = after.strip_prefix("$${") {
            literal.push_str("${");
            rest = tail;
        } else if let Some(tail) = after.strip_prefix("${") {
            let end = tail
                .find('}')
                .ok_or_else(|| Error::Unterminated(input.to_string()))?;
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Reference(parse_reference(&tail[..end])?));
            rest = &tail[end + 1..];
        } else {
            literal.push('$');
            rest = &after[1..];
        }
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn parse_reference(expr: &str) -> Result<Reference> {
    let expr = expr.trim();
    let parts: Reference = expr.split('.').map(str::to_string).collect();

    let valid = parts.iter().all(|p| {
        !p.is_empty()
            && p.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    });
    if !valid {
        return Err(Error::InvalidReference(expr.to_string()));
    }
    Ok(parts)
}

/// Every reference inside `value`, in document order
pub fn references(value: &Value) -> Result<Vec<Reference>> {
    let mut refs = Vec::new();
    collect(value, &mut refs)?;
    Ok(refs)
}

fn collect(value: &Value, refs: &mut Vec<Reference>) -> Result<()> {
    match value {
        Value::String(s) => {
            for segment in parse(s)? {
                if let Segment::Reference(r) = segment {
                    refs.push(r);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, refs)?;
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect(item, refs)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Hosts whose outputs `value` reads through `out.<host>`, excluding `this`
pub fn output_hosts(value: &Value) -> Result<Vec<String>> {
    let mut hosts: Vec<String> = Vec::new();
    for r in references(value)? {
        if r.len() >= 2 && r[0] == "out" && r[1] != "this" && !hosts.contains(&r[1]) {
            hosts.push(r[1].clone());
        }
    }
    Ok(hosts)
}

/// Resolve every expression in `value` against `ctx`
pub fn evaluate(value: &Value, ctx: &Value) -> Result<Value> {
    match value {
        Value::String(s) => evaluate_str(s, ctx),
        Value::Array(items) => items
            .iter()
            .map(|item| evaluate(item, ctx))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), evaluate(item, ctx)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn evaluate_str(input: &str, ctx: &Value) -> Result<Value> {
    let mut segments = parse(input)?;

    if let [Segment::Reference(r)] = segments.as_slice() {
        return lookup(ctx, r).cloned();
    }

    let mut rendered = String::new();
    for segment in segments.drain(..) {
        match segment {
            Segment::Literal(s) => rendered.push_str(&s),
            Segment::Reference(r) => rendered.push_str(&render(&r, lookup(ctx, &r)?)?),
        }
    }
    Ok(Value::String(rendered))
}

fn lookup<'a>(ctx: &'a Value, reference: &[String]) -> Result<&'a Value> {
    let mut current = ctx;
    for (idx, part) in reference.iter().enumerate() {
        let next = match current {
            Value::Object(map) => map.get(part),
            Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| Error::Undefined {
            reference: reference.join("."),
            missing: reference[..=idx].join("."),
        })?;
    }
    Ok(current)
}

fn render(reference: &[String], value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Err(Error::Null(reference.join("."))),
        Value::Array(_) | Value::Object(_) => Err(Error::NotScalar(reference.join("."))),
    }
}
