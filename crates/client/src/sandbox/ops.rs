//! Operators, subscripts and membership.

use std::fmt::Write as _;
use std::rc::Rc;

use super::SandboxError;
use super::eval::Budget;
use super::parser::{BinOp, CmpOp};
use super::value::{Dict, Value, runtime, type_error};

fn int_of(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn overflow() -> SandboxError {
    runtime("OverflowError", "integer result out of range")
}

fn zero_division() -> SandboxError {
    runtime("ZeroDivisionError", "division by zero")
}

fn symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
    }
}

fn unsupported(op: BinOp, left: &Value, right: &Value) -> SandboxError {
    type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        symbol(op),
        left.type_name(),
        right.type_name()
    ))
}

/// Steps charged for producing `len` bytes or items.
pub fn size_cost(len: usize) -> u64 {
    (len / 64) as u64 + 1
}

pub fn binary(op: BinOp, left: &Value, right: &Value, budget: &mut Budget) -> Result<Value, SandboxError> {
    if let (Some(a), Some(b)) = (int_of(left), int_of(right)) {
        return int_binary(op, a, b);
    }
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        return float_binary(op, a, b);
    }

    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            budget.charge(size_cost(a.len() + b.len()))?;
            let mut joined = String::with_capacity(a.len() + b.len());
            joined.push_str(a);
            joined.push_str(b);
            Ok(Value::str(joined))
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let (a, b) = (a.borrow(), b.borrow());
            budget.charge(a.len().saturating_add(b.len()) as u64)?;
            let mut items = Vec::with_capacity(a.len() + b.len());
            items.extend(a.iter().cloned());
            items.extend(b.iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if int_of(n).is_some() => {
            let times = usize::try_from(int_of(n).unwrap_or(0)).unwrap_or(0);
            budget.charge(size_cost(s.len().saturating_mul(times)))?;
            Ok(Value::str(s.repeat(times)))
        }
        (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items)) if int_of(n).is_some() => {
            let times = usize::try_from(int_of(n).unwrap_or(0)).unwrap_or(0);
            let items = items.borrow();
            budget.charge(items.len().saturating_mul(times) as u64)?;
            let mut out = Vec::with_capacity(items.len() * times);
            for _ in 0..times {
                out.extend(items.iter().cloned());
            }
            Ok(Value::list(out))
        }
        (BinOp::Mod, Value::Str(fmt), args) => {
            budget.charge(size_cost(fmt.len()))?;
            percent_format(fmt, args, budget).map(Value::str)
        }
        _ => Err(unsupported(op, left, right)),
    }
}

fn int_binary(op: BinOp, a: i64, b: i64) -> Result<Value, SandboxError> {
    let result = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::Div => {
            if b == 0 {
                return Err(zero_division());
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(zero_division());
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q }
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(runtime("ZeroDivisionError", "integer modulo by zero"));
            }
            let r = a.checked_rem(b).ok_or_else(overflow)?;
            if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }
        }
        BinOp::Pow => {
            if b < 0 {
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
    };
    Ok(Value::Int(result))
}

fn float_binary(op: BinOp, a: f64, b: f64) -> Result<Value, SandboxError> {
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(runtime("ZeroDivisionError", "float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(runtime("ZeroDivisionError", "float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(runtime("ZeroDivisionError", "float modulo"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }
        }
        BinOp::Pow => a.powf(b),
    };
    Ok(Value::Float(result))
}

/// `%`-style string formatting: `%s`, `%r`, `%d`, `%f` (with optional
/// precision) and `%%`.
fn percent_format(fmt: &str, args: &Value, budget: &mut Budget) -> Result<String, SandboxError> {
    let args: Vec<Value> = match args {
        Value::List(items) => items.borrow().clone(),
        other => vec![other.clone()],
    };
    let mut args = args.into_iter();
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }
            precision = digits.parse::<usize>().ok();
        }

        let Some(spec) = chars.next() else {
            return Err(runtime("ValueError", "incomplete format"));
        };
        if spec == '%' {
            out.push('%');
            continue;
        }

        let arg = args.next().ok_or_else(|| type_error("not enough arguments for format string"))?;
        match spec {
            's' => out.push_str(&arg.display(budget)?),
            'r' => out.push_str(&arg.repr(budget)?),
            'd' | 'i' => match (&arg, arg.as_f64()) {
                (Value::Float(f), _) => {
                    let _ = write!(out, "{}", f.trunc() as i64);
                }
                (_, Some(_)) => {
                    let _ = write!(out, "{}", int_of(&arg).unwrap_or(0));
                }
                _ => return Err(type_error(format!("%d format: a number is required, not {}", arg.type_name()))),
            },
            'f' => {
                let f = arg
                    .as_f64()
                    .ok_or_else(|| type_error(format!("must be real number, not {}", arg.type_name())))?;
                let _ = write!(out, "{:.*}", precision.unwrap_or(6), f);
            }
            other => return Err(runtime("ValueError", format!("unsupported format character '{other}'"))),
        }
    }

    if args.next().is_some() {
        return Err(type_error("not all arguments converted during string formatting"));
    }
    Ok(out)
}

pub fn compare(op: CmpOp, left: &Value, right: &Value, budget: &mut Budget) -> Result<bool, SandboxError> {
    Ok(match op {
        CmpOp::Eq => left.equals_within(right, budget)?,
        CmpOp::Ne => !left.equals_within(right, budget)?,
        CmpOp::Lt => left.compare(right, budget)?.is_lt(),
        CmpOp::Le => left.compare(right, budget)?.is_le(),
        CmpOp::Gt => left.compare(right, budget)?.is_gt(),
        CmpOp::Ge => left.compare(right, budget)?.is_ge(),
        CmpOp::In => contains(right, left, budget)?,
        CmpOp::NotIn => !contains(right, left, budget)?,
        CmpOp::Is => left.identical(right),
        CmpOp::IsNot => !left.identical(right),
    })
}

/// `item in container`.
pub fn contains(container: &Value, item: &Value, budget: &mut Budget) -> Result<bool, SandboxError> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(&**needle)),
            other => Err(type_error(format!("'in <string>' requires string as left operand, not {}", other.type_name()))),
        },
        Value::List(items) => {
            for v in items.borrow().iter() {
                if v.equals_within(item, budget)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Dict(dict) => Ok(item.as_str().is_some_and(|key| dict.borrow().contains_key(key))),
        other => Err(type_error(format!("argument of type '{}' is not iterable", other.type_name()))),
    }
}

pub fn dict_key(key: &Value) -> Result<Rc<str>, SandboxError> {
    match key {
        Value::Str(s) => Ok(Rc::clone(s)),
        Value::Int(i) => Ok(Rc::from(i.to_string())),
        other => Err(type_error(format!("dict keys must be str, not {}", other.type_name()))),
    }
}

fn position(index: &Value, len: usize, what: &str) -> Result<usize, SandboxError> {
    let i = int_of(index)
        .ok_or_else(|| type_error(format!("{what} indices must be integers, not {}", index.type_name())))?;
    let len = len as i64;
    let i = if i < 0 { i + len } else { i };
    if (0..len).contains(&i) {
        Ok(i as usize)
    } else {
        Err(runtime("IndexError", format!("{what} index out of range")))
    }
}

pub fn index(obj: &Value, idx: &Value) -> Result<Value, SandboxError> {
    match obj {
        Value::List(items) => {
            let items = items.borrow();
            let i = position(idx, items.len(), "list")?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let count = s.chars().count();
            let i = position(idx, count, "string")?;
            Ok(s.chars().nth(i).map(|c| Value::str(c.to_string())).unwrap_or(Value::None))
        }
        Value::Dict(dict) => {
            let key = dict_key(idx)?;
            dict.borrow().get(&key).cloned().ok_or_else(|| runtime("KeyError", idx.to_repr()))
        }
        Value::Node(node) => {
            let name = idx.expect_str("attribute name")?;
            node.attr(&name).map(Value::str).ok_or_else(|| runtime("KeyError", idx.to_repr()))
        }
        other => Err(type_error(format!("'{}' object is not subscriptable", other.type_name()))),
    }
}

pub fn set_index(obj: &Value, idx: &Value, value: Value) -> Result<(), SandboxError> {
    match obj {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let i = position(idx, items.len(), "list assignment")?;
            items[i] = value;
            Ok(())
        }
        Value::Dict(dict) => {
            let key = dict_key(idx)?;
            dict.borrow_mut().insert(key, value);
            Ok(())
        }
        other => Err(type_error(format!("'{}' object does not support item assignment", other.type_name()))),
    }
}

fn bound(value: &Value, what: &str) -> Result<Option<i64>, SandboxError> {
    match value {
        Value::None => Ok(None),
        other => int_of(other)
            .map(Some)
            .ok_or_else(|| type_error(format!("slice {what} must be an integer or None"))),
    }
}

/// Positions selected by `[start:stop:step]` on a sequence of `len` items.
fn slice_positions(len: usize, start: &Value, stop: &Value, step: &Value) -> Result<Vec<usize>, SandboxError> {
    let step = bound(step, "step")?.unwrap_or(1);
    if step == 0 {
        return Err(runtime("ValueError", "slice step cannot be zero"));
    }
    let len = len as i64;
    let clamp = |v: i64, lo: i64, hi: i64| v.clamp(lo, hi);
    let resolve = |v: i64| if v < 0 { v + len } else { v };

    let mut out = Vec::new();
    if step > 0 {
        let start = bound(start, "start")?.map_or(0, |v| clamp(resolve(v), 0, len));
        let stop = bound(stop, "stop")?.map_or(len, |v| clamp(resolve(v), 0, len));
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            let Some(next) = i.checked_add(step) else { break };
            i = next;
        }
    } else {
        let start = bound(start, "start")?.map_or(len - 1, |v| clamp(resolve(v), -1, len - 1));
        let stop = bound(stop, "stop")?.map_or(-1, |v| clamp(resolve(v), -1, len - 1));
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            let Some(next) = i.checked_add(step) else { break };
            i = next;
        }
    }
    Ok(out)
}

pub fn slice(obj: &Value, start: &Value, stop: &Value, step: &Value, budget: &mut Budget) -> Result<Value, SandboxError> {
    match obj {
        Value::List(items) => {
            let items = items.borrow();
            let positions = slice_positions(items.len(), start, stop, step)?;
            budget.charge(positions.len() as u64)?;
            Ok(Value::list(positions.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let positions = slice_positions(chars.len(), start, stop, step)?;
            budget.charge(size_cost(positions.len()))?;
            Ok(Value::str(positions.into_iter().map(|i| chars[i]).collect::<String>()))
        }
        other => Err(type_error(format!("'{}' object is not subscriptable", other.type_name()))),
    }
}

/// Items visited by `for` and by builtins taking an iterable.
pub fn iterate(value: &Value, budget: &mut Budget) -> Result<Vec<Value>, SandboxError> {
    let len = match value {
        Value::List(items) => items.borrow().len(),
        Value::Str(s) => s.chars().count(),
        Value::Dict(dict) => dict.borrow().len(),
        other => return Err(type_error(format!("'{}' object is not iterable", other.type_name()))),
    };
    budget.charge(len as u64)?;

    Ok(match value {
        Value::List(items) => items.borrow().clone(),
        Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
        Value::Dict(dict) => dict.borrow().keys().map(|k| Value::Str(Rc::clone(k))).collect(),
        _ => Vec::new(),
    })
}

pub fn negate(value: &Value) -> Result<Value, SandboxError> {
    match value {
        Value::Float(f) => Ok(Value::Float(-f)),
        other => match int_of(other) {
            Some(i) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
            None => Err(type_error(format!("bad operand type for unary -: '{}'", other.type_name()))),
        },
    }
}

/// Fresh dict from `(key, value)` pairs.
pub fn dict_from_pairs(pairs: Vec<Value>) -> Result<Dict, SandboxError> {
    let mut dict = Dict::new();
    for pair in pairs {
        let Value::List(pair) = pair else {
            return Err(type_error("dict() sequence elements must be pairs"));
        };
        let pair = pair.borrow();
        if pair.len() != 2 {
            return Err(runtime("ValueError", format!("dict() sequence element has length {}; 2 is required", pair.len())));
        }
        dict.insert(dict_key(&pair[0])?, pair[1].clone());
    }
    Ok(dict)
}
