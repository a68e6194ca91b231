//! The closed table of functions and methods a program can call.
//!
//! Anything not listed here does not resolve. Methods are dispatched on the
//! receiver type; the string and collection helpers are also callable as
//! plain functions with the receiver first (`lower(s)`, `get(d, "k")`).

use std::cmp::Ordering;
use std::collections::HashSet;
use std::rc::Rc;

use url::Url;

use super::SandboxError;
use super::dom::DomNode;
use super::eval::Budget;
use super::ops::{binary, contains, dict_from_pairs, dict_key, iterate, size_cost};
use super::parser::BinOp;
use super::value::{Dict, Exception, Shared, Value, runtime, type_error};

pub const FUNCTIONS: &[&str] = &[
    // scalars and collections
    "len", "str", "repr", "int", "float", "bool", "list", "tuple", "set", "dict", "range", "min", "max", "sum", "abs",
    "round", "sorted", "reversed", "any", "all", "enumerate", "zip", "isinstance", "map", "filter", "print",
    // receiver-first helpers
    "lower", "upper", "strip", "split", "join", "replace", "startswith", "endswith", "contains", "append", "get",
    "keys", "values", "items",
    // exceptions
    "Exception", "ValueError", "TypeError", "IndexError", "KeyError", "AttributeError", "RuntimeError",
    // document access
    "parse", "select", "select_one", "text", "attr", "html", "urljoin",
];

pub const EXCEPTIONS: &[&str] =
    &["Exception", "ValueError", "TypeError", "IndexError", "KeyError", "AttributeError", "RuntimeError"];

/// Functions that forward to the method of their first argument.
const RECEIVER_FIRST: &[&str] =
    &["lower", "upper", "strip", "split", "join", "replace", "startswith", "endswith", "append", "get", "keys", "values", "items"];

pub fn lookup(name: &str) -> Option<&'static str> {
    FUNCTIONS.iter().copied().find(|f| *f == name)
}

pub fn is_exception_kind(name: &str) -> bool {
    EXCEPTIONS.contains(&name)
}

/// Arguments of one call, consumed as the callee validates them.
struct Args {
    name: String,
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
}

impl Args {
    fn new(name: &str, positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self { name: name.to_string(), positional, keywords }
    }

    fn keyword(&mut self, key: &str) -> Option<Value> {
        let pos = self.keywords.iter().position(|(k, _)| k == key)?;
        Some(self.keywords.remove(pos).1)
    }

    /// Reject leftover keywords and check the positional count.
    fn expect(&self, min: usize, max: usize) -> Result<(), SandboxError> {
        if let Some((key, _)) = self.keywords.first() {
            return Err(type_error(format!("{}() got an unexpected keyword argument '{key}'", self.name)));
        }
        let n = self.positional.len();
        if n < min || n > max {
            let expected = if min == max { min.to_string() } else { format!("{min} to {max}") };
            return Err(type_error(format!("{}() takes {expected} arguments ({n} given)", self.name)));
        }
        Ok(())
    }

    fn at(&self, i: usize) -> Value {
        self.positional.get(i).cloned().unwrap_or(Value::None)
    }

    fn opt(&self, i: usize) -> Option<Value> {
        self.positional.get(i).cloned().filter(|v| !matches!(v, Value::None))
    }

    fn str_at(&self, i: usize, what: &str) -> Result<Rc<str>, SandboxError> {
        self.at(i).expect_str(what)
    }
}

pub fn call(
    name: &str, args: Vec<Value>, kwargs: Vec<(String, Value)>, budget: &mut Budget,
) -> Result<Value, SandboxError> {
    budget.charge(1)?;

    if RECEIVER_FIRST.contains(&name) {
        let mut args = args;
        if args.is_empty() {
            return Err(type_error(format!("{name}() missing required argument")));
        }
        let receiver = args.remove(0);
        return call_method(&receiver, name, args, kwargs, budget);
    }

    let mut a = Args::new(name, args, kwargs);
    match name {
        "len" => {
            a.expect(1, 1)?;
            length(&a.at(0)).map(|n| Value::Int(n as i64))
        }
        "str" => {
            a.expect(0, 1)?;
            if a.positional.is_empty() {
                return Ok(Value::str(""));
            }
            a.at(0).display(budget).map(Value::str)
        }
        "repr" => {
            a.expect(1, 1)?;
            a.at(0).repr(budget).map(Value::str)
        }
        "int" => {
            a.expect(0, 1)?;
            to_int(&a.at(0))
        }
        "float" => {
            a.expect(0, 1)?;
            to_float(&a.at(0))
        }
        "bool" => {
            a.expect(0, 1)?;
            Ok(Value::Bool(a.at(0).truthy()))
        }
        "list" | "tuple" => {
            a.expect(0, 1)?;
            match a.opt(0) {
                Some(v) => Ok(Value::list(iterate(&v, budget)?)),
                None => Ok(Value::list(Vec::new())),
            }
        }
        "set" => {
            a.expect(0, 1)?;
            let items = match a.opt(0) {
                Some(v) => iterate(&v, budget)?,
                None => Vec::new(),
            };
            let mut seen = HashSet::new();
            let mut unique = Vec::new();
            for item in items {
                if seen.insert(item.repr(budget)?) {
                    unique.push(item);
                }
            }
            Ok(Value::list(unique))
        }
        "dict" => {
            let keywords = std::mem::take(&mut a.keywords);
            a.expect(0, 1)?;
            let mut dict = match a.opt(0) {
                Some(Value::Dict(d)) => d.borrow().clone(),
                Some(other) => dict_from_pairs(iterate(&other, budget)?)?,
                None => Dict::new(),
            };
            for (k, v) in keywords {
                dict.insert(Rc::from(k), v);
            }
            Ok(Value::dict(dict))
        }
        "range" => {
            a.expect(1, 3)?;
            range(&a, budget)
        }
        "min" | "max" => min_max(a, budget),
        "sum" => {
            let start = a.keyword("start");
            a.expect(1, 2)?;
            let mut total = start.or_else(|| a.opt(1)).unwrap_or(Value::Int(0));
            for item in iterate(&a.at(0), budget)? {
                total = binary(BinOp::Add, &total, &item, budget)?;
            }
            Ok(total)
        }
        "abs" => {
            a.expect(1, 1)?;
            match a.at(0) {
                Value::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(|| runtime("OverflowError", "abs overflow")),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                Value::Bool(b) => Ok(Value::Int(i64::from(b))),
                other => Err(type_error(format!("bad operand type for abs(): '{}'", other.type_name()))),
            }
        }
        "round" => {
            a.expect(1, 2)?;
            round(&a.at(0), a.opt(1))
        }
        "sorted" => {
            let key = a.keyword("key");
            let reverse = a.keyword("reverse").is_some_and(|v| v.truthy());
            a.expect(1, 1)?;
            let items = iterate(&a.at(0), budget)?;
            sort_values(items, key, reverse, budget).map(Value::list)
        }
        "reversed" => {
            a.expect(1, 1)?;
            let mut items = iterate(&a.at(0), budget)?;
            items.reverse();
            Ok(Value::list(items))
        }
        "any" => {
            a.expect(1, 1)?;
            Ok(Value::Bool(iterate(&a.at(0), budget)?.iter().any(Value::truthy)))
        }
        "all" => {
            a.expect(1, 1)?;
            Ok(Value::Bool(iterate(&a.at(0), budget)?.iter().all(Value::truthy)))
        }
        "enumerate" => {
            let start = a.keyword("start");
            a.expect(1, 2)?;
            let start = start.or_else(|| a.opt(1)).map_or(Ok(0), |v| v.expect_int("start"))?;
            let items = iterate(&a.at(0), budget)?;
            Ok(Value::list(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::list(vec![Value::Int(start.saturating_add(i as i64)), v]))
                    .collect(),
            ))
        }
        "zip" => {
            a.expect(0, usize::MAX)?;
            let columns = a.positional.iter().map(|v| iterate(v, budget)).collect::<Result<Vec<_>, _>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::list(
                (0..rows).map(|i| Value::list(columns.iter().map(|c| c[i].clone()).collect())).collect(),
            ))
        }
        "isinstance" => {
            a.expect(2, 2)?;
            isinstance(&a.at(0), &a.at(1), 0).map(Value::Bool)
        }
        "map" => {
            a.expect(2, 2)?;
            let func = callable(&a.at(0))?;
            let mut out = Vec::new();
            for item in iterate(&a.at(1), budget)? {
                out.push(call(func, vec![item], Vec::new(), budget)?);
            }
            Ok(Value::list(out))
        }
        "filter" => {
            a.expect(2, 2)?;
            let func = match a.at(0) {
                Value::None => None,
                other => Some(callable(&other)?),
            };
            let mut out = Vec::new();
            for item in iterate(&a.at(1), budget)? {
                let keep = match func {
                    Some(f) => call(f, vec![item.clone()], Vec::new(), budget)?.truthy(),
                    None => item.truthy(),
                };
                if keep {
                    out.push(item);
                }
            }
            Ok(Value::list(out))
        }
        "print" => {
            let line = a.positional.iter().map(|v| v.display(budget)).collect::<Result<Vec<_>, _>>()?.join(" ");
            tracing::trace!(output = %line, "extraction program print");
            Ok(Value::None)
        }
        "contains" => {
            a.expect(2, 2)?;
            contains(&a.at(0), &a.at(1), budget).map(Value::Bool)
        }
        kind if is_exception_kind(kind) => {
            let message =
                a.positional.iter().map(|v| v.display(budget)).collect::<Result<Vec<_>, _>>()?.join(", ");
            Ok(Value::Exception(Rc::new(Exception { kind: kind.to_string(), message })))
        }
        "parse" => {
            a.expect(1, 1)?;
            let html = a.str_at(0, "parse() argument")?;
            budget.charge(size_cost(html.len()))?;
            Ok(Value::Node(DomNode::parse(&html)))
        }
        "select" => {
            let limit = a.keyword("limit");
            a.expect(2, 3)?;
            let node = as_node(&a.at(0), budget)?;
            let css = a.str_at(1, "selector")?;
            let limit = limit.or_else(|| a.opt(2)).map(|v| v.expect_int("limit")).transpose()?;
            select(&node, &css, limit, budget)
        }
        "select_one" => {
            a.expect(2, 2)?;
            let node = as_node(&a.at(0), budget)?;
            let css = a.str_at(1, "selector")?;
            select_one(&node, &css, budget)
        }
        "text" => {
            a.expect(1, 1)?;
            match a.at(0) {
                Value::Node(node) => Ok(Value::str(node.text())),
                Value::None => Ok(Value::str("")),
                Value::Str(s) => Ok(Value::Str(s)),
                other => other.display(budget).map(Value::str),
            }
        }
        "attr" => {
            a.expect(2, 3)?;
            let name = a.str_at(1, "attribute name")?;
            match a.at(0) {
                Value::Node(node) => Ok(node.attr(&name).map(Value::str).unwrap_or_else(|| a.at(2))),
                Value::None => Ok(a.at(2)),
                other => Err(type_error(format!("attr() expects a node, not {}", other.type_name()))),
            }
        }
        "html" => {
            a.expect(1, 1)?;
            match a.at(0) {
                Value::Node(node) => Ok(Value::str(node.html())),
                Value::None => Ok(Value::str("")),
                other => Err(type_error(format!("html() expects a node, not {}", other.type_name()))),
            }
        }
        "urljoin" => {
            a.expect(2, 2)?;
            let base = a.str_at(0, "base")?;
            let reference = a.str_at(1, "url")?;
            Ok(Value::str(urljoin(&base, &reference)))
        }
        other => Err(SandboxError::CapabilityDenied(format!("'{other}' is not an available function"))),
    }
}

/// Resolve `reference` against `base` the way a browser would.
///
/// An unparsable base leaves the reference unchanged.
pub fn urljoin(base: &str, reference: &str) -> String {
    match Url::parse(base).and_then(|b| b.join(reference.trim())) {
        Ok(url) => url.to_string(),
        Err(_) => reference.to_string(),
    }
}

fn callable(value: &Value) -> Result<&'static str, SandboxError> {
    match value {
        Value::Builtin(name) => Ok(*name),
        other => Err(type_error(format!("'{}' object is not callable", other.type_name()))),
    }
}

fn length(value: &Value) -> Result<usize, SandboxError> {
    match value {
        Value::Str(s) => Ok(s.chars().count()),
        Value::List(items) => Ok(items.borrow().len()),
        Value::Dict(dict) => Ok(dict.borrow().len()),
        other => Err(type_error(format!("object of type '{}' has no len()", other.type_name()))),
    }
}

fn to_int(value: &Value) -> Result<Value, SandboxError> {
    match value {
        Value::None => Ok(Value::Int(0)),
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(f) => {
            if !f.is_finite() || f.abs() >= 9.2e18 {
                return Err(runtime("OverflowError", format!("cannot convert float {f} to integer")));
            }
            Ok(Value::Int(f.trunc() as i64))
        }
        Value::Str(s) => {
            let trimmed = s.trim().replace('_', "");
            trimmed
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| runtime("ValueError", format!("invalid literal for int() with base 10: '{s}'")))
        }
        other => Err(type_error(format!("int() argument must be a string or a number, not '{}'", other.type_name()))),
    }
}

fn to_float(value: &Value) -> Result<Value, SandboxError> {
    match value {
        Value::None => Ok(Value::Float(0.0)),
        Value::Str(s) => s
            .trim()
            .replace('_', "")
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| runtime("ValueError", format!("could not convert string to float: '{s}'"))),
        other => other
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| type_error(format!("float() argument must be a string or a number, not '{}'", other.type_name()))),
    }
}

fn round(value: &Value, digits: Option<Value>) -> Result<Value, SandboxError> {
    let f = value
        .as_f64()
        .ok_or_else(|| type_error(format!("type {} doesn't define __round__", value.type_name())))?;
    match digits {
        None => match value {
            Value::Int(i) => Ok(Value::Int(*i)),
            _ => to_int(&Value::Float(f.round_ties_even())),
        },
        Some(d) => {
            let d = d.expect_int("ndigits")?.clamp(-15, 15) as i32;
            let scale = 10f64.powi(d);
            Ok(Value::Float((f * scale).round_ties_even() / scale))
        }
    }
}

fn range(a: &Args, budget: &mut Budget) -> Result<Value, SandboxError> {
    let ints = a.positional.iter().map(|v| v.expect_int("range() argument")).collect::<Result<Vec<_>, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(type_error("range expected at most 3 arguments")),
    };
    if step == 0 {
        return Err(runtime("ValueError", "range() arg 3 must not be zero"));
    }

    let span = if step > 0 { i128::from(stop) - i128::from(start) } else { i128::from(start) - i128::from(stop) };
    let step_abs = i128::from(step).abs();
    let len = if span <= 0 { 0 } else { (span + step_abs - 1) / step_abs };
    let len = u64::try_from(len).unwrap_or(u64::MAX);

    budget.charge(len)?;

    let mut out = Vec::with_capacity(len as usize);
    let mut current = start;
    for _ in 0..len {
        out.push(Value::Int(current));
        current = current.saturating_add(step);
    }
    Ok(Value::list(out))
}

fn min_max(mut a: Args, budget: &mut Budget) -> Result<Value, SandboxError> {
    let want = if a.name == "min" { Ordering::Less } else { Ordering::Greater };
    let key = a.keyword("key");
    let default = a.keyword("default");
    a.expect(1, usize::MAX)?;

    let items = if a.positional.len() == 1 { iterate(&a.positional[0], budget)? } else { a.positional.clone() };
    let key = key.filter(|k| !matches!(k, Value::None)).map(|k| callable(&k)).transpose()?;

    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let rank = match key {
            Some(f) => call(f, vec![item.clone()], Vec::new(), budget)?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_rank, _)) => rank.compare(best_rank, budget)? == want,
        };
        if replace {
            best = Some((rank, item));
        }
    }

    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(runtime("ValueError", format!("{}() arg is an empty sequence", a.name))),
    }
}

fn sort_values(
    items: Vec<Value>, key: Option<Value>, reverse: bool, budget: &mut Budget,
) -> Result<Vec<Value>, SandboxError> {
    let n = items.len() as u64;
    budget.charge(n.saturating_mul(u64::from(64 - n.leading_zeros())))?;

    let key = key.filter(|k| !matches!(k, Value::None)).map(|k| callable(&k)).transpose()?;
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let rank = match key {
            Some(f) => call(f, vec![item.clone()], Vec::new(), budget)?,
            None => item.clone(),
        };
        keyed.push((rank, item));
    }

    let mut failure = None;
    keyed.sort_by(|(a, _), (b, _)| match a.compare(b, budget) {
        Ok(order) if reverse => order.reverse(),
        Ok(order) => order,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }
    Ok(keyed.into_iter().map(|(_, item)| item).collect())
}

fn isinstance(value: &Value, class: &Value, depth: usize) -> Result<bool, SandboxError> {
    match class {
        Value::List(_) if depth > 8 => Err(type_error("isinstance() arg 2 nests too deeply")),
        Value::List(classes) => {
            for class in classes.borrow().iter() {
                if isinstance(value, class, depth + 1)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Builtin(name) => Ok(match (*name, value) {
            ("str", Value::Str(_)) => true,
            ("int", Value::Int(_) | Value::Bool(_)) => true,
            ("float", Value::Float(_)) => true,
            ("bool", Value::Bool(_)) => true,
            ("list" | "tuple", Value::List(_)) => true,
            ("dict", Value::Dict(_)) => true,
            ("Exception", Value::Exception(_)) => true,
            (kind, Value::Exception(e)) => e.kind == kind,
            (kind, _) if lookup(kind).is_some() => false,
            _ => return Err(type_error("isinstance() arg 2 must be a type")),
        }),
        _ => Err(type_error("isinstance() arg 2 must be a type or tuple of types")),
    }
}

fn as_node(value: &Value, budget: &mut Budget) -> Result<Rc<DomNode>, SandboxError> {
    match value {
        Value::Node(node) => Ok(Rc::clone(node)),
        Value::Str(html) => {
            budget.charge(size_cost(html.len()))?;
            Ok(DomNode::parse(html))
        }
        other => Err(type_error(format!("expected a node or markup, not {}", other.type_name()))),
    }
}

fn select(node: &DomNode, css: &str, limit: Option<i64>, budget: &mut Budget) -> Result<Value, SandboxError> {
    budget.charge(node.select_cost())?;
    let limit = limit.filter(|l| *l >= 0).map(|l| l as usize);
    let found = node.select(css, limit)?;
    budget.charge(found.len() as u64)?;
    Ok(Value::list(found.into_iter().map(Value::Node).collect()))
}

fn select_one(node: &DomNode, css: &str, budget: &mut Budget) -> Result<Value, SandboxError> {
    budget.charge(node.select_cost())?;
    Ok(node.select_one(css)?.map_or(Value::None, Value::Node))
}

/// `find` / `find_all` arguments as a CSS selector.
fn find_selector(a: &mut Args) -> Result<String, SandboxError> {
    let class = a.keyword("class_");
    let id = a.keyword("id");
    let tag = a.opt(0).map(|t| t.expect_str("tag name")).transpose()?;

    let mut css = tag.as_deref().unwrap_or("").trim().to_string();
    if let Some(class) = class {
        for part in class.expect_str("class_")?.split_whitespace() {
            css.push('.');
            css.push_str(part);
        }
    }
    if let Some(id) = id {
        css.push('#');
        css.push_str(id.expect_str("id")?.trim());
    }
    if css.is_empty() {
        css.push('*');
    }
    Ok(css)
}

/// Attribute access: `node.text`, `node.name`, `node.attrs`, `error.message`.
pub fn attribute(value: &Value, name: &str) -> Result<Value, SandboxError> {
    if name.starts_with("__") {
        return Err(SandboxError::CapabilityDenied(format!("access to '{name}' is not available")));
    }
    match (value, name) {
        (Value::Node(node), "text" | "string") => Ok(Value::str(node.text())),
        (Value::Node(node), "name") => Ok(Value::str(node.tag())),
        (Value::Node(node), "attrs") => {
            let mut dict = Dict::new();
            for (k, v) in node.attrs() {
                dict.insert(Rc::from(k), Value::str(v));
            }
            Ok(Value::dict(dict))
        }
        (Value::Exception(e), "message") => Ok(Value::str(&e.message)),
        (Value::Exception(e), "args") => Ok(Value::list(vec![Value::str(&e.message)])),
        _ => Err(runtime("AttributeError", format!("'{}' object has no attribute '{name}'", value.type_name()))),
    }
}

pub fn call_method(
    receiver: &Value, name: &str, args: Vec<Value>, kwargs: Vec<(String, Value)>, budget: &mut Budget,
) -> Result<Value, SandboxError> {
    if name.starts_with("__") {
        return Err(SandboxError::CapabilityDenied(format!("access to '{name}' is not available")));
    }
    budget.charge(1)?;

    let a = Args::new(name, args, kwargs);
    match receiver {
        Value::Str(s) => str_method(s, a, budget),
        Value::List(items) => list_method(items, a, budget),
        Value::Dict(dict) => dict_method(dict, a),
        Value::Node(node) => node_method(node, a, budget),
        other => Err(no_method(other, name)),
    }
}

fn no_method(receiver: &Value, name: &str) -> SandboxError {
    runtime("AttributeError", format!("'{}' object has no attribute '{name}'", receiver.type_name()))
}

fn str_method(s: &Rc<str>, mut a: Args, budget: &mut Budget) -> Result<Value, SandboxError> {
    budget.charge(size_cost(s.len()))?;
    let name = a.name.clone();
    match name.as_str() {
        "lower" => {
            a.expect(0, 0)?;
            Ok(Value::str(s.to_lowercase()))
        }
        "upper" => {
            a.expect(0, 0)?;
            Ok(Value::str(s.to_uppercase()))
        }
        "strip" | "lstrip" | "rstrip" => {
            a.expect(0, 1)?;
            let chars = a.opt(0).map(|c| c.expect_str("strip chars")).transpose()?;
            let matcher = |c: char| match &chars {
                Some(set) => set.contains(c),
                None => c.is_whitespace(),
            };
            let out = match name.as_str() {
                "lstrip" => s.trim_start_matches(matcher),
                "rstrip" => s.trim_end_matches(matcher),
                _ => s.trim_matches(matcher),
            };
            Ok(Value::str(out))
        }
        "split" => {
            let sep = a.keyword("sep");
            let maxsplit = a.keyword("maxsplit");
            a.expect(0, 2)?;
            let sep = sep.or_else(|| a.opt(0)).map(|v| v.expect_str("separator")).transpose()?;
            let maxsplit = maxsplit.or_else(|| a.opt(1)).map_or(Ok(-1), |v| v.expect_int("maxsplit"))?;
            split(s, sep.as_deref(), maxsplit).map(|parts| Value::list(parts.into_iter().map(Value::str).collect()))
        }
        "join" => {
            a.expect(1, 1)?;
            let parts = iterate(&a.at(0), budget)?;
            let mut total = s.len().saturating_mul(parts.len().saturating_sub(1));
            for (i, part) in parts.iter().enumerate() {
                let Value::Str(part) = part else {
                    return Err(type_error(format!(
                        "sequence item {i}: expected str instance, {} found",
                        part.type_name()
                    )));
                };
                total = total.saturating_add(part.len());
            }
            budget.charge(size_cost(total))?;

            let mut out = String::with_capacity(total);
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    out.push_str(s);
                }
                out.push_str(part.as_str().unwrap_or_default());
            }
            Ok(Value::str(out))
        }
        "replace" => {
            a.expect(2, 3)?;
            let old = a.str_at(0, "old")?;
            let new = a.str_at(1, "new")?;
            let count = a.opt(2).map(|c| c.expect_int("count")).transpose()?.and_then(|c| usize::try_from(c).ok());
            let hits = if old.is_empty() { s.chars().count() + 1 } else { s.matches(&*old).count() };
            let hits = count.map_or(hits, |c| c.min(hits));
            budget.charge(size_cost(s.len().saturating_add(hits.saturating_mul(new.len()))))?;

            let out = match count {
                Some(count) => s.replacen(&*old, &new, count),
                None => s.replace(&*old, &new),
            };
            Ok(Value::str(out))
        }
        "startswith" | "endswith" => {
            a.expect(1, 1)?;
            let candidates = match a.at(0) {
                Value::List(items) => items.borrow().clone(),
                other => vec![other],
            };
            for candidate in candidates {
                let candidate = candidate.expect_str(&name)?;
                let hit = if name == "startswith" { s.starts_with(&*candidate) } else { s.ends_with(&*candidate) };
                if hit {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "find" => {
            a.expect(1, 1)?;
            let needle = a.str_at(0, "substring")?;
            Ok(Value::Int(s.find(&*needle).map_or(-1, |byte| s[..byte].chars().count() as i64)))
        }
        "count" => {
            a.expect(1, 1)?;
            let needle = a.str_at(0, "substring")?;
            if needle.is_empty() {
                return Ok(Value::Int(s.chars().count() as i64 + 1));
            }
            Ok(Value::Int(s.matches(&*needle).count() as i64))
        }
        "isdigit" => {
            a.expect(0, 0)?;
            Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())))
        }
        "title" => {
            a.expect(0, 0)?;
            Ok(Value::str(title_case(s)))
        }
        _ => Err(no_method(&Value::Str(Rc::clone(s)), &name)),
    }
}

fn split(s: &str, sep: Option<&str>, maxsplit: i64) -> Result<Vec<String>, SandboxError> {
    let limit = usize::try_from(maxsplit).ok();
    match sep {
        Some("") => Err(runtime("ValueError", "empty separator")),
        Some(sep) => Ok(match limit {
            Some(n) => s.splitn(n + 1, sep).map(str::to_string).collect(),
            None => s.split(sep).map(str::to_string).collect(),
        }),
        None => {
            let Some(limit) = limit else {
                return Ok(s.split_whitespace().map(str::to_string).collect());
            };
            let mut parts = Vec::new();
            let mut rest = s.trim_start();
            while !rest.is_empty() {
                if parts.len() == limit {
                    parts.push(rest.to_string());
                    break;
                }
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                parts.push(rest[..end].to_string());
                rest = rest[end..].trim_start();
            }
            Ok(parts)
        }
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut boundary = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if boundary {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            boundary = false;
        } else {
            out.push(c);
            boundary = true;
        }
    }
    out
}

fn list_method(
    items: &Rc<Shared<Vec<Value>>>, mut a: Args, budget: &mut Budget,
) -> Result<Value, SandboxError> {
    let name = a.name.clone();
    match name.as_str() {
        "append" => {
            a.expect(1, 1)?;
            items.borrow_mut().push(a.at(0));
            Ok(Value::None)
        }
        "extend" => {
            a.expect(1, 1)?;
            let more = iterate(&a.at(0), budget)?;
            items.borrow_mut().extend(more);
            Ok(Value::None)
        }
        "insert" => {
            a.expect(2, 2)?;
            let mut items = items.borrow_mut();
            let len = items.len() as i64;
            let at = a.at(0).expect_int("index")?;
            let at = if at < 0 { (at + len).max(0) } else { at.min(len) };
            items.insert(at as usize, a.at(1));
            Ok(Value::None)
        }
        "pop" => {
            a.expect(0, 1)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(runtime("IndexError", "pop from empty list"));
            }
            let len = items.len() as i64;
            let at = a.opt(0).map_or(Ok(-1), |v| v.expect_int("index"))?;
            let at = if at < 0 { at + len } else { at };
            if !(0..len).contains(&at) {
                return Err(runtime("IndexError", "pop index out of range"));
            }
            Ok(items.remove(at as usize))
        }
        "index" => {
            a.expect(1, 1)?;
            let needle = a.at(0);
            for (i, v) in items.borrow().iter().enumerate() {
                if v.equals_within(&needle, budget)? {
                    return Ok(Value::Int(i as i64));
                }
            }
            Err(runtime("ValueError", format!("{} is not in list", needle.to_repr())))
        }
        "count" => {
            a.expect(1, 1)?;
            let needle = a.at(0);
            let mut hits = 0;
            for v in items.borrow().iter() {
                if v.equals_within(&needle, budget)? {
                    hits += 1;
                }
            }
            Ok(Value::Int(hits))
        }
        "sort" => {
            let key = a.keyword("key");
            let reverse = a.keyword("reverse").is_some_and(|v| v.truthy());
            a.expect(0, 0)?;
            let current = items.borrow().clone();
            let sorted = sort_values(current, key, reverse, budget)?;
            *items.borrow_mut() = sorted;
            Ok(Value::None)
        }
        "reverse" => {
            a.expect(0, 0)?;
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        _ => Err(no_method(&Value::List(Rc::clone(items)), &name)),
    }
}

fn dict_method(dict: &Rc<Shared<Dict>>, mut a: Args) -> Result<Value, SandboxError> {
    let name = a.name.clone();
    match name.as_str() {
        "get" => {
            a.expect(1, 2)?;
            let found = a.at(0).as_str().and_then(|key| dict.borrow().get(key).cloned());
            Ok(found.unwrap_or_else(|| a.at(1)))
        }
        "keys" => {
            a.expect(0, 0)?;
            Ok(Value::list(dict.borrow().keys().map(|k| Value::Str(Rc::clone(k))).collect()))
        }
        "values" => {
            a.expect(0, 0)?;
            Ok(Value::list(dict.borrow().iter().map(|(_, v)| v.clone()).collect()))
        }
        "items" => {
            a.expect(0, 0)?;
            Ok(Value::list(
                dict.borrow().iter().map(|(k, v)| Value::list(vec![Value::Str(Rc::clone(k)), v.clone()])).collect(),
            ))
        }
        "update" => {
            let keywords = std::mem::take(&mut a.keywords);
            a.expect(0, 1)?;
            let mut incoming = match a.opt(0) {
                Some(Value::Dict(other)) => other.borrow().clone(),
                Some(other) => dict_from_pairs(match other {
                    Value::List(items) => items.borrow().clone(),
                    v => return Err(type_error(format!("'{}' object is not iterable", v.type_name()))),
                })?,
                None => Dict::new(),
            };
            for (k, v) in keywords {
                incoming.insert(Rc::from(k), v);
            }
            let mut target = dict.borrow_mut();
            for (k, v) in incoming.iter() {
                target.insert(Rc::clone(k), v.clone());
            }
            Ok(Value::None)
        }
        "setdefault" => {
            a.expect(1, 2)?;
            let key = dict_key(&a.at(0))?;
            let mut target = dict.borrow_mut();
            if let Some(existing) = target.get(&key) {
                return Ok(existing.clone());
            }
            let value = a.at(1);
            target.insert(key, value.clone());
            Ok(value)
        }
        "pop" => {
            a.expect(1, 2)?;
            let key = dict_key(&a.at(0))?;
            let removed = dict.borrow_mut().remove(&key);
            match (removed, a.positional.len()) {
                (Some(v), _) => Ok(v),
                (None, 2) => Ok(a.at(1)),
                (None, _) => Err(runtime("KeyError", a.at(0).to_repr())),
            }
        }
        _ => Err(no_method(&Value::Dict(Rc::clone(dict)), &name)),
    }
}

fn node_method(node: &Rc<DomNode>, mut a: Args, budget: &mut Budget) -> Result<Value, SandboxError> {
    let name = a.name.clone();
    match name.as_str() {
        "select" => {
            let limit = a.keyword("limit");
            a.expect(1, 2)?;
            let css = a.str_at(0, "selector")?;
            let limit = limit.or_else(|| a.opt(1)).map(|v| v.expect_int("limit")).transpose()?;
            select(node, &css, limit, budget)
        }
        "select_one" => {
            a.expect(1, 1)?;
            let css = a.str_at(0, "selector")?;
            select_one(node, &css, budget)
        }
        "find" => {
            let css = find_selector(&mut a)?;
            a.expect(0, 1)?;
            select_one(node, &css, budget)
        }
        "find_all" => {
            let limit = a.keyword("limit");
            let css = find_selector(&mut a)?;
            a.expect(0, 1)?;
            let limit = limit.map(|v| v.expect_int("limit")).transpose()?;
            select(node, &css, limit, budget)
        }
        "get" | "attr" => {
            a.expect(1, 2)?;
            let attr = a.str_at(0, "attribute name")?;
            Ok(node.attr(&attr).map(Value::str).unwrap_or_else(|| a.at(1)))
        }
        "get_text" | "text" => {
            // separator and strip are accepted; text is always whitespace-collapsed
            a.keyword("separator");
            a.keyword("strip");
            a.expect(0, 1)?;
            Ok(Value::str(node.text()))
        }
        "html" => {
            a.expect(0, 0)?;
            Ok(Value::str(node.html()))
        }
        _ => Err(no_method(&Value::Node(Rc::clone(node)), &name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(name: &str, args: Vec<Value>) -> Result<Value, SandboxError> {
        call(name, args, Vec::new(), &mut Budget::new(100_000))
    }

    fn strs(value: &Value) -> Vec<String> {
        let Value::List(items) = value else { panic!("not a list: {value:?}") };
        items.borrow().iter().map(Value::to_display).collect()
    }

    #[test]
    fn test_unknown_function_denied() {
        assert!(matches!(run("open", vec![Value::str("/etc/passwd")]), Err(SandboxError::CapabilityDenied(_))));
        assert!(lookup("eval").is_none());
        assert!(lookup("__import__").is_none());
    }

    #[test]
    fn test_conversions() {
        assert!(run("int", vec![Value::str(" 42 ")]).unwrap().equals(&Value::Int(42)));
        assert!(run("int", vec![Value::Float(-2.7)]).unwrap().equals(&Value::Int(-2)));
        assert!(run("float", vec![Value::str("1.5")]).unwrap().equals(&Value::Float(1.5)));
        let err = run("int", vec![Value::str("abc")]).unwrap_err();
        assert!(matches!(err, SandboxError::Runtime { kind, .. } if kind == "ValueError"));
    }

    #[test]
    fn test_range_is_charged_before_allocating() {
        let mut budget = Budget::new(1_000);
        let err = call("range", vec![Value::Int(1_000_000_000)], Vec::new(), &mut budget).unwrap_err();
        assert!(matches!(err, SandboxError::BudgetExhausted(1_000)));
    }

    #[test]
    fn test_range_steps() {
        let out = run("range", vec![Value::Int(10), Value::Int(0), Value::Int(-3)]).unwrap();
        assert_eq!(strs(&out), vec!["10", "7", "4", "1"]);
    }

    #[test]
    fn test_sorted_with_key_and_reverse() {
        let words = Value::list(vec![Value::str("ccc"), Value::str("a"), Value::str("bb")]);
        let kwargs = vec![("key".to_string(), Value::Builtin("len")), ("reverse".to_string(), Value::Bool(true))];
        let out = call("sorted", vec![words], kwargs, &mut Budget::new(1_000)).unwrap();
        assert_eq!(strs(&out), vec!["ccc", "bb", "a"]);
    }

    #[test]
    fn test_min_max() {
        let nums = Value::list(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        assert!(run("min", vec![nums.clone()]).unwrap().equals(&Value::Int(1)));
        assert!(run("max", vec![nums]).unwrap().equals(&Value::Int(3)));
        assert!(run("max", vec![Value::list(vec![])]).is_err());
    }

    #[test]
    fn test_receiver_first_helpers() {
        assert_eq!(run("lower", vec![Value::str("ABC")]).unwrap().as_str(), Some("abc"));
        let joined = run("join", vec![Value::str(", "), Value::list(vec![Value::str("a"), Value::str("b")])]).unwrap();
        assert_eq!(joined.as_str(), Some("a, b"));
        let parts = run("split", vec![Value::str("a,b,,c"), Value::str(",")]).unwrap();
        assert_eq!(strs(&parts), vec!["a", "b", "", "c"]);
    }

    #[test]
    fn test_replace_counts() {
        let call_replace =
            |args: Vec<Value>| call_method(&Value::str("a-b-c"), "replace", args, vec![], &mut Budget::new(100));
        let once = call_replace(vec![Value::str("-"), Value::str("+"), Value::Int(1)]).unwrap();
        assert_eq!(once.as_str(), Some("a+b-c"));
        let all = call_replace(vec![Value::str("-"), Value::str("")]).unwrap();
        assert_eq!(all.as_str(), Some("abc"));
        let around = call_replace(vec![Value::str(""), Value::str(".")]).unwrap();
        assert_eq!(around.as_str(), Some(".a.-.b.-.c."));
    }

    #[test]
    fn test_join_charges_full_output() {
        let part = Value::str("x".repeat(64_000));
        let parts = Value::list(vec![part; 10]);
        let mut budget = Budget::new(5_000);
        let err = call_method(&Value::str(""), "join", vec![parts], vec![], &mut budget).unwrap_err();
        assert_eq!(err, SandboxError::BudgetExhausted(5_000));
    }

    #[test]
    fn test_split_whitespace_with_maxsplit() {
        assert_eq!(split("  a b  c ", None, 1).unwrap(), vec!["a", "b  c "]);
        assert_eq!(split("a b c", None, -1).unwrap(), vec!["a", "b", "c"]);
        assert!(split("abc", Some(""), -1).is_err());
    }

    #[test]
    fn test_urljoin() {
        assert_eq!(urljoin("https://example.com/a/b", "../c"), "https://example.com/c");
        assert_eq!(urljoin("https://example.com/a/", "https://other.org/x"), "https://other.org/x");
        assert_eq!(urljoin("not a url", "/x"), "/x");
    }

    #[test]
    fn test_document_helpers() {
        let doc = run("parse", vec![Value::str(r#"<div><a class="x" href="/p">Post</a></div>"#)]).unwrap();
        let link = run("select_one", vec![doc.clone(), Value::str("a.x")]).unwrap();
        assert_eq!(run("text", vec![link.clone()]).unwrap().as_str(), Some("Post"));
        assert_eq!(run("attr", vec![link.clone(), Value::str("href")]).unwrap().as_str(), Some("/p"));
        assert!(matches!(run("attr", vec![link, Value::str("title")]).unwrap(), Value::None));
        let none = run("select_one", vec![doc, Value::str("span")]).unwrap();
        assert!(matches!(none, Value::None));
    }

    #[test]
    fn test_find_all_with_class() {
        let doc = run("parse", vec![Value::str(r#"<p class="a b">1</p><p class="a">2</p><p>3</p>"#)]).unwrap();
        let found = call_method(
            &doc,
            "find_all",
            vec![Value::str("p")],
            vec![("class_".to_string(), Value::str("a"))],
            &mut Budget::new(1_000),
        )
        .unwrap();
        assert_eq!(strs(&found).len(), 2);
    }

    #[test]
    fn test_dunder_method_denied() {
        let err = call_method(&Value::str("x"), "__class__", vec![], vec![], &mut Budget::new(10)).unwrap_err();
        assert!(matches!(err, SandboxError::CapabilityDenied(_)));
    }

    #[test]
    fn test_exception_constructor() {
        let Value::Exception(e) = run("ValueError", vec![Value::str("bad")]).unwrap() else { panic!() };
        assert_eq!(e.kind, "ValueError");
        assert_eq!(e.message, "bad");
    }

    #[test]
    fn test_isinstance() {
        assert!(run("isinstance", vec![Value::Bool(true), Value::Builtin("int")]).unwrap().truthy());
        let classes = Value::list(vec![Value::Builtin("list"), Value::Builtin("dict")]);
        assert!(run("isinstance", vec![Value::dict(Dict::new()), classes]).unwrap().truthy());
        assert!(!run("isinstance", vec![Value::str("x"), Value::Builtin("int")]).unwrap().truthy());
    }
}
