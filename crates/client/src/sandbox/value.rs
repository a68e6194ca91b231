//! Runtime values of the extraction language.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt::Write as _;
use std::ops::Deref;
use std::rc::Rc;

use serde_json::{Map, Number, Value as Json};

use super::SandboxError;
use super::dom::DomNode;
use super::eval::Budget;
use super::ops::size_cost;

/// Deeper nesting is cut off when printing or converting.
const MAX_NESTING: usize = 64;

/// Steps allowed for the uncharged text used in messages.
const PREVIEW_STEPS: u64 = 4_096;

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<Shared<Vec<Value>>>),
    Dict(Rc<Shared<Dict>>),
    Node(Rc<DomNode>),
    Builtin(&'static str),
    Exception(Rc<Exception>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    pub kind: String,
    pub message: String,
}

/// Insertion-ordered string-keyed mapping.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(Rc<str>, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| &**k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn insert(&mut self, key: Rc<str>, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| &**k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Rc<str>> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Rc<str>, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

/// Storage that can hold further values.
pub trait Contents {
    /// Remove every element, keeping the values.
    fn take_values(&mut self) -> Vec<Value>;
}

impl Contents for Vec<Value> {
    fn take_values(&mut self) -> Vec<Value> {
        std::mem::take(self)
    }
}

impl Contents for Dict {
    fn take_values(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.entries).into_iter().map(|(_, v)| v).collect()
    }
}

/// Interior-mutable container shared between values.
///
/// Dropping the last handle releases nested containers from a work list,
/// so arbitrarily deep nesting never recurses once per level.
#[derive(Debug)]
pub struct Shared<T: Contents>(RefCell<T>);

impl<T: Contents> Shared<T> {
    pub fn new(inner: T) -> Self {
        Self(RefCell::new(inner))
    }
}

impl<T: Contents> Deref for Shared<T> {
    type Target = RefCell<T>;

    fn deref(&self) -> &RefCell<T> {
        &self.0
    }
}

impl<T: Contents> Drop for Shared<T> {
    fn drop(&mut self) {
        let mut pending = self.0.get_mut().take_values();
        while let Some(value) = pending.pop() {
            match value {
                Value::List(items) => {
                    if let Some(mut items) = Rc::into_inner(items) {
                        pending.append(items.0.get_mut());
                    }
                }
                Value::Dict(dict) => {
                    if let Some(mut dict) = Rc::into_inner(dict) {
                        pending.extend(dict.0.get_mut().take_values());
                    }
                }
                _ => {}
            }
        }
    }
}

pub fn runtime(kind: &str, message: impl Into<String>) -> SandboxError {
    SandboxError::Runtime { kind: kind.to_string(), message: message.into() }
}

pub fn type_error(message: impl Into<String>) -> SandboxError {
    runtime("TypeError", message)
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(Shared::new(items)))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Rc::new(Shared::new(dict)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Node(_) => "Node",
            Value::Builtin(_) => "builtin_function",
            Value::Exception(_) => "Exception",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Dict(dict) => !dict.borrow().is_empty(),
            Value::Node(_) | Value::Builtin(_) | Value::Exception(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn expect_str(&self, what: &str) -> Result<Rc<str>, SandboxError> {
        match self {
            Value::Str(s) => Ok(Rc::clone(s)),
            other => Err(type_error(format!("{what} must be str, not {}", other.type_name()))),
        }
    }

    pub fn expect_int(&self, what: &str) -> Result<i64, SandboxError> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(i64::from(*b)),
            other => Err(type_error(format!("{what} must be int, not {}", other.type_name()))),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Bool(_))
    }

    /// Text as produced by `str(value)`, charged against `budget` as it grows.
    pub fn display(&self, budget: &mut Budget) -> Result<String, SandboxError> {
        let mut out = String::new();
        self.write_text(&mut out, 0, false, budget)?;
        Ok(out)
    }

    /// Text as produced by `repr(value)`, charged against `budget` as it grows.
    pub fn repr(&self, budget: &mut Budget) -> Result<String, SandboxError> {
        let mut out = String::new();
        self.write_text(&mut out, 0, true, budget)?;
        Ok(out)
    }

    /// Uncharged `str(value)`; cut short past a fixed allowance.
    #[cfg(test)]
    pub fn to_display(&self) -> String {
        self.preview(false)
    }

    /// Uncharged `repr(value)` for messages; cut short past a fixed allowance.
    pub fn to_repr(&self) -> String {
        self.preview(true)
    }

    fn preview(&self, quoted: bool) -> String {
        let mut out = String::new();
        if self.write_text(&mut out, 0, quoted, &mut Budget::new(PREVIEW_STEPS)).is_err() {
            out.push_str("...");
        }
        out
    }

    fn write_text(
        &self, out: &mut String, depth: usize, quoted: bool, budget: &mut Budget,
    ) -> Result<(), SandboxError> {
        budget.charge(1)?;
        if depth > MAX_NESTING {
            out.push_str("...");
            return Ok(());
        }
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::Str(s) if quoted => {
                budget.charge(size_cost(s.len().saturating_mul(2)))?;
                let _ = write!(out, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"));
            }
            Value::Str(s) => {
                budget.charge(size_cost(s.len()))?;
                out.push_str(s);
            }
            Value::List(items) => {
                out.push('[');
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_text(out, depth + 1, true, budget)?;
                }
                out.push(']');
            }
            Value::Dict(dict) => {
                out.push('{');
                for (i, (k, v)) in dict.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    budget.charge(size_cost(k.len()))?;
                    let _ = write!(out, "'{k}': ");
                    v.write_text(out, depth + 1, true, budget)?;
                }
                out.push('}');
            }
            Value::Node(node) => {
                let html = node.html();
                budget.charge(size_cost(html.len()))?;
                out.push_str(&html);
            }
            Value::Builtin(name) => {
                let _ = write!(out, "<built-in function {name}>");
            }
            Value::Exception(e) if quoted => {
                budget.charge(size_cost(e.message.len()))?;
                let _ = write!(out, "{}('{}')", e.kind, e.message);
            }
            Value::Exception(e) => {
                budget.charge(size_cost(e.message.len()))?;
                out.push_str(&e.message);
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn equals(&self, other: &Value) -> bool {
        self.equals_within(other, &mut Budget::new(PREVIEW_STEPS)).unwrap_or(false)
    }

    /// Structural equality; numbers compare across int/float.
    pub fn equals_within(&self, other: &Value, budget: &mut Budget) -> Result<bool, SandboxError> {
        self.equals_at(other, 0, budget)
    }

    fn equals_at(&self, other: &Value, depth: usize, budget: &mut Budget) -> Result<bool, SandboxError> {
        budget.charge(1)?;
        if depth > MAX_NESTING {
            return Err(too_deep("comparison"));
        }
        Ok(match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => a.as_f64() == b.as_f64(),
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (x, y) in a.iter().zip(b.iter()) {
                    if !x.equals_at(y, depth + 1, budget)? {
                        return Ok(false);
                    }
                }
                true
            }
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (k, v) in a.iter() {
                    match b.get(k) {
                        Some(other) if v.equals_at(other, depth + 1, budget)? => {}
                        _ => return Ok(false),
                    }
                }
                true
            }
            (Value::Node(a), Value::Node(b)) => a.same_element(b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => a == b,
            _ => false,
        })
    }

    /// Identity as used by `is`: singletons by value, containers by reference.
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Node(a), Value::Node(b)) => Rc::ptr_eq(a, b),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Int(_) | Value::Float(_), _) if other.is_number() => self.as_f64() == other.as_f64(),
            _ => false,
        }
    }

    /// Ordering used by `<`, `sorted`, `min` and `max`.
    pub fn compare(&self, other: &Value, budget: &mut Budget) -> Result<Ordering, SandboxError> {
        self.compare_at(other, 0, budget)
    }

    fn compare_at(&self, other: &Value, depth: usize, budget: &mut Budget) -> Result<Ordering, SandboxError> {
        budget.charge(1)?;
        if depth > MAX_NESTING {
            return Err(too_deep("comparison"));
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (a, b) if a.is_number() && b.is_number() => {
                let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                a.partial_cmp(&b).ok_or_else(|| runtime("ValueError", "cannot order NaN"))
            }
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare_at(y, depth + 1, budget)? {
                        Ordering::Equal => continue,
                        other => return Ok(other),
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            (a, b) => Err(type_error(format!(
                "'<' not supported between instances of '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    /// Convert into JSON, the shape returned from a run.
    ///
    /// Nesting past the display limit becomes `null`.
    pub fn to_json(&self, budget: &mut Budget) -> Result<Json, SandboxError> {
        self.to_json_at(0, budget)
    }

    fn to_json_at(&self, depth: usize, budget: &mut Budget) -> Result<Json, SandboxError> {
        budget.charge(1)?;
        if depth > MAX_NESTING {
            return Ok(Json::Null);
        }
        Ok(match self {
            Value::None | Value::Builtin(_) => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => Number::from_f64(*f).map_or(Json::Null, Json::Number),
            Value::Str(s) => {
                budget.charge(size_cost(s.len()))?;
                Json::String(s.to_string())
            }
            Value::List(items) => {
                let items = items.borrow();
                let mut out = Vec::with_capacity(items.len());
                for item in items.iter() {
                    out.push(item.to_json_at(depth + 1, budget)?);
                }
                Json::Array(out)
            }
            Value::Dict(dict) => {
                let mut map = Map::new();
                for (k, v) in dict.borrow().iter() {
                    budget.charge(size_cost(k.len()))?;
                    map.insert(k.to_string(), v.to_json_at(depth + 1, budget)?);
                }
                Json::Object(map)
            }
            Value::Node(node) => {
                let text = node.text();
                budget.charge(size_cost(text.len()))?;
                Json::String(text)
            }
            Value::Exception(e) => Json::String(e.message.clone()),
        })
    }
}

fn too_deep(what: &str) -> SandboxError {
    runtime("RecursionError", format!("maximum nesting depth exceeded in {what}"))
}

/// Python-style float text: integral values keep a trailing `.0`.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::None.truthy());
        assert!(!Value::str("").truthy());
        assert!(Value::str("x").truthy());
        assert!(!Value::list(vec![]).truthy());
        assert!(!Value::Int(0).truthy());
        assert!(Value::Float(0.5).truthy());
    }

    #[test]
    fn test_display_and_repr() {
        let list = Value::list(vec![Value::Int(1), Value::str("a"), Value::None, Value::Float(2.0)]);
        assert_eq!(list.to_display(), "[1, 'a', None, 2.0]");
        assert_eq!(Value::str("a").to_display(), "a");
        assert_eq!(Value::str("a").to_repr(), "'a'");
    }

    #[test]
    fn test_numeric_equality_across_types() {
        assert!(Value::Int(1).equals(&Value::Float(1.0)));
        assert!(Value::Bool(true).equals(&Value::Int(1)));
        assert!(!Value::str("1").equals(&Value::Int(1)));
    }

    #[test]
    fn test_dict_preserves_insertion_order() {
        let mut dict = Dict::new();
        dict.insert(Rc::from("b"), Value::Int(1));
        dict.insert(Rc::from("a"), Value::Int(2));
        dict.insert(Rc::from("b"), Value::Int(3));
        let keys: Vec<_> = dict.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert!(dict.get("b").is_some_and(|v| v.equals(&Value::Int(3))));
    }

    #[test]
    fn test_to_json() {
        let mut dict = Dict::new();
        dict.insert(Rc::from("title"), Value::str("Hello"));
        dict.insert(Rc::from("count"), Value::Int(2));
        dict.insert(Rc::from("ratio"), Value::Float(f64::NAN));
        let json = Value::dict(dict).to_json(&mut Budget::new(100)).unwrap();
        assert_eq!(json, serde_json::json!({"title": "Hello", "count": 2, "ratio": null}));
    }

    fn cyclic() -> Value {
        let list = Value::list(vec![]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
            items.borrow_mut().push(list.clone());
        }
        list
    }

    #[test]
    fn test_self_referential_list_is_bounded() {
        let list = cyclic();
        assert!(list.to_display().ends_with("..."));
        let err = list.to_json(&mut Budget::new(10_000)).unwrap_err();
        assert_eq!(err, SandboxError::BudgetExhausted(10_000));
        let err = list.compare(&list, &mut Budget::new(10_000)).unwrap_err();
        assert!(matches!(err, SandboxError::Runtime { kind, .. } if kind == "RecursionError"));
        if let Value::List(items) = &list {
            items.borrow_mut().clear();
        }
    }

    #[test]
    fn test_shared_nesting_is_charged() {
        let mut value = Value::list(vec![Value::str("x".repeat(1_000))]);
        for _ in 0..40 {
            value = Value::list(vec![value.clone(), value]);
        }
        let mut budget = Budget::new(50_000);
        assert_eq!(value.display(&mut budget).unwrap_err(), SandboxError::BudgetExhausted(50_000));
        let other = value.clone();
        assert!(value.equals_within(&other, &mut Budget::new(10)).unwrap());
    }

    #[test]
    fn test_compare_mixed_types_is_type_error() {
        let err = Value::Int(1).compare(&Value::str("a"), &mut Budget::new(10)).unwrap_err();
        assert!(matches!(err, SandboxError::Runtime { kind, .. } if kind == "TypeError"));
    }
}
