//! Tree-walking evaluator.

use std::collections::HashMap;
use std::rc::Rc;

use super::SandboxError;
use super::builtins;
use super::ops;
use super::parser::{BinOp, Comprehension, Expr, Handler, Literal, Stmt, StmtKind, Target};
use super::value::{Contents, Dict, Exception, Value, runtime, type_error};

/// Evaluation steps left for one run.
#[derive(Debug, Clone)]
pub struct Budget {
    limit: u64,
    used: u64,
}

impl Budget {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    pub fn charge(&mut self, steps: u64) -> Result<(), SandboxError> {
        self.used = self.used.saturating_add(steps);
        if self.used > self.limit { Err(SandboxError::BudgetExhausted(self.limit)) } else { Ok(()) }
    }

    pub fn used(&self) -> u64 {
        self.used.min(self.limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

#[derive(Debug)]
pub struct Interpreter {
    pub budget: Budget,
    locals: HashMap<String, Value>,
    inputs: HashMap<&'static str, Value>,
    /// Exceptions being handled, innermost last; bare `raise` re-raises the top.
    handling: Vec<Exception>,
}

impl Drop for Interpreter {
    /// Empties every container the run can still reach, so lists that
    /// contain themselves are freed and deep nesting drops without recursion.
    fn drop(&mut self) {
        let mut pending: Vec<Value> = self.locals.drain().map(|(_, v)| v).collect();
        while let Some(value) = pending.pop() {
            match value {
                Value::List(items) => {
                    if let Ok(mut items) = items.try_borrow_mut() {
                        pending.append(&mut items);
                    }
                }
                Value::Dict(dict) => {
                    if let Ok(mut dict) = dict.try_borrow_mut() {
                        pending.extend(dict.take_values());
                    }
                }
                _ => {}
            }
        }
    }
}

/// Whether a `try` may intercept this error.
fn catchable(err: &SandboxError) -> Option<Exception> {
    match err {
        SandboxError::Raised { kind, message } | SandboxError::Runtime { kind, message } => {
            Some(Exception { kind: kind.clone(), message: message.clone() })
        }
        _ => None,
    }
}

fn handler_matches(handler: &Handler, kind: &str) -> bool {
    handler.kinds.is_empty() || handler.kinds.iter().any(|k| k == kind || k == "Exception" || k == "BaseException")
}

impl Interpreter {
    pub fn new(budget: Budget, html_content: &str, base_url: &str) -> Self {
        let inputs = HashMap::from([("html_content", Value::str(html_content)), ("base_url", Value::str(base_url))]);
        Self { budget, locals: HashMap::new(), inputs, handling: Vec::new() }
    }

    pub fn local(&self, name: &str) -> Option<&Value> {
        self.locals.get(name)
    }

    pub fn run(&mut self, program: &[Stmt]) -> Result<(), SandboxError> {
        self.exec_block(program).map(|_| ())
    }

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow, SandboxError> {
        for stmt in body {
            let flow = self.exec(stmt)?;
            if flow != Flow::Normal {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, SandboxError> {
        self.budget.charge(1)?;

        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::If { branches, orelse } => {
                for (test, body) in branches {
                    if self.eval(test)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::For { target, iter, body } => {
                let items = self.eval(iter)?;
                for item in ops::iterate(&items, &mut self.budget)? {
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                    }
                }
            }
            StmtKind::Try { body, handlers, orelse, finally } => return self.exec_try(body, handlers, orelse, finally),
            StmtKind::Raise(value) => return Err(self.raise(value.as_ref())?),
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self, body: &[Stmt], handlers: &[Handler], orelse: &[Stmt], finally: &[Stmt],
    ) -> Result<Flow, SandboxError> {
        let outcome = match self.exec_block(body) {
            Ok(Flow::Normal) => self.exec_block(orelse),
            Ok(flow) => Ok(flow),
            Err(err) => match catchable(&err) {
                Some(exception) => match handlers.iter().find(|h| handler_matches(h, &exception.kind)) {
                    Some(handler) => {
                        if let Some(name) = &handler.name {
                            self.locals.insert(name.clone(), Value::Exception(Rc::new(exception.clone())));
                        }
                        self.handling.push(exception);
                        let result = self.exec_block(&handler.body);
                        self.handling.pop();
                        result
                    }
                    None => Err(err),
                },
                None => return Err(err),
            },
        };

        if finally.is_empty() {
            return outcome;
        }
        if let Err(err) = &outcome
            && catchable(err).is_none()
        {
            return outcome;
        }
        match self.exec_block(finally)? {
            Flow::Normal => outcome,
            flow => Ok(flow),
        }
    }

    /// The error a `raise` statement produces.
    fn raise(&mut self, value: Option<&Expr>) -> Result<SandboxError, SandboxError> {
        let Some(expr) = value else {
            return Ok(match self.handling.last() {
                Some(e) => SandboxError::Raised { kind: e.kind.clone(), message: e.message.clone() },
                None => runtime("RuntimeError", "No active exception to reraise"),
            });
        };

        Ok(match self.eval(expr)? {
            Value::Exception(e) => SandboxError::Raised { kind: e.kind.clone(), message: e.message.clone() },
            Value::Builtin(kind) if builtins::is_exception_kind(kind) => {
                SandboxError::Raised { kind: kind.to_string(), message: String::new() }
            }
            Value::Str(message) => SandboxError::Raised { kind: "Exception".to_string(), message: message.to_string() },
            other => type_error(format!("exceptions must derive from Exception, not {}", other.type_name())),
        })
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<(), SandboxError> {
        match target {
            Target::Name(name) => {
                self.locals.insert(name.clone(), value);
            }
            Target::Index { obj, index } => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                ops::set_index(&obj, &index, value)?;
            }
            Target::Unpack(targets) => {
                let items = ops::iterate(&value, &mut self.budget)?;
                if items.len() != targets.len() {
                    let message = if items.len() < targets.len() {
                        format!("not enough values to unpack (expected {}, got {})", targets.len(), items.len())
                    } else {
                        format!("too many values to unpack (expected {})", targets.len())
                    };
                    return Err(runtime("ValueError", message));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
            }
        }
        Ok(())
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> Result<(), SandboxError> {
        let (current, obj, index) = match target {
            Target::Name(name) => (self.lookup(name)?, None, None),
            Target::Index { obj, index } => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                (ops::index(&obj, &index)?, Some(obj), Some(index))
            }
            Target::Unpack(_) => return Err(type_error("illegal target for augmented assignment")),
        };
        let rhs = self.eval(value)?;

        // list += iterable extends in place
        if let (BinOp::Add, Value::List(items)) = (op, &current) {
            let more = ops::iterate(&rhs, &mut self.budget)?;
            items.borrow_mut().extend(more);
            return Ok(());
        }

        let updated = ops::binary(op, &current, &rhs, &mut self.budget)?;
        match (target, obj, index) {
            (Target::Name(name), _, _) => {
                self.locals.insert(name.clone(), updated);
                Ok(())
            }
            (_, Some(obj), Some(index)) => ops::set_index(&obj, &index, updated),
            _ => Ok(()),
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, SandboxError> {
        if name.starts_with("__") {
            return Err(SandboxError::CapabilityDenied(format!("access to '{name}' is not available")));
        }
        if let Some(value) = self.locals.get(name).or_else(|| self.inputs.get(name)) {
            return Ok(value.clone());
        }
        match builtins::lookup(name) {
            Some(builtin) => Ok(Value::Builtin(builtin)),
            None => Err(runtime("NameError", format!("name '{name}' is not defined"))),
        }
    }

    /// The builtin a call to `name` invokes.
    ///
    /// Names outside the builtin table are refused before any argument is
    /// evaluated.
    fn callee(&self, name: &str) -> Result<&'static str, SandboxError> {
        if name.starts_with("__") {
            return Err(SandboxError::CapabilityDenied(format!("access to '{name}' is not available")));
        }
        match self.locals.get(name).or_else(|| self.inputs.get(name)) {
            Some(Value::Builtin(builtin)) => Ok(*builtin),
            Some(other) => Err(type_error(format!("'{}' object is not callable", other.type_name()))),
            None => builtins::lookup(name)
                .ok_or_else(|| SandboxError::CapabilityDenied(format!("'{name}' is not an available function"))),
        }
    }

    fn eval_args(
        &mut self, args: &[Expr], kwargs: &[(String, Expr)],
    ) -> Result<(Vec<Value>, Vec<(String, Value)>), SandboxError> {
        let args = args.iter().map(|a| self.eval(a)).collect::<Result<Vec<_>, _>>()?;
        let kwargs = kwargs
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.eval(v)?)))
            .collect::<Result<Vec<_>, SandboxError>>()?;
        Ok((args, kwargs))
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Value, SandboxError> {
        self.budget.charge(1)?;

        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::Str(Rc::clone(s)),
            }),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => {
                let items = items.iter().map(|e| self.eval(e)).collect::<Result<Vec<_>, _>>()?;
                Ok(Value::list(items))
            }
            Expr::Dict(entries) => {
                let mut dict = Dict::new();
                for (k, v) in entries {
                    let key = ops::dict_key(&self.eval(k)?)?;
                    let value = self.eval(v)?;
                    dict.insert(key, value);
                }
                Ok(Value::dict(dict))
            }
            Expr::Neg(operand) => ops::negate(&self.eval(operand)?),
            Expr::Not(operand) => Ok(Value::Bool(!self.eval(operand)?.truthy())),
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                ops::binary(*op, &left, &right, &mut self.budget)
            }
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() { self.eval(right) } else { Ok(left) }
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() { Ok(left) } else { self.eval(right) }
            }
            Expr::Compare { left, rest } => {
                let mut left = self.eval(left)?;
                for (op, right) in rest {
                    let right = self.eval(right)?;
                    if !ops::compare(*op, &left, &right, &mut self.budget)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::Conditional { test, then, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Call { func, args, kwargs } => {
                let builtin = self.callee(func)?;
                let (args, kwargs) = self.eval_args(args, kwargs)?;
                builtins::call(builtin, args, kwargs, &mut self.budget)
            }
            Expr::Method { recv, name, args, kwargs } => {
                if name.starts_with("__") {
                    return Err(SandboxError::CapabilityDenied(format!("access to '{name}' is not available")));
                }
                let receiver = self.eval(recv)?;
                let (args, kwargs) = self.eval_args(args, kwargs)?;
                builtins::call_method(&receiver, name, args, kwargs, &mut self.budget)
            }
            Expr::Attribute { recv, name } => {
                if name.starts_with("__") {
                    return Err(SandboxError::CapabilityDenied(format!("access to '{name}' is not available")));
                }
                builtins::attribute(&self.eval(recv)?, name)
            }
            Expr::Index { obj, index } => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                ops::index(&obj, &index)
            }
            Expr::Slice { obj, start, stop, step } => {
                let obj = self.eval(obj)?;
                let start = self.eval_optional(start.as_deref())?;
                let stop = self.eval_optional(stop.as_deref())?;
                let step = self.eval_optional(step.as_deref())?;
                ops::slice(&obj, &start, &stop, &step, &mut self.budget)
            }
            Expr::ListComp { elt, clauses } => {
                let mut out = Vec::new();
                self.comprehend(clauses, &mut |me| {
                    out.push(me.eval(elt)?);
                    Ok(())
                })?;
                Ok(Value::list(out))
            }
            Expr::DictComp { key, value, clauses } => {
                let mut dict = Dict::new();
                self.comprehend(clauses, &mut |me| {
                    let k = ops::dict_key(&me.eval(key)?)?;
                    let v = me.eval(value)?;
                    dict.insert(k, v);
                    Ok(())
                })?;
                Ok(Value::dict(dict))
            }
        }
    }

    fn eval_optional(&mut self, expr: Option<&Expr>) -> Result<Value, SandboxError> {
        match expr {
            Some(expr) => self.eval(expr),
            None => Ok(Value::None),
        }
    }

    /// Run `emit` once per combination the comprehension clauses admit.
    fn comprehend(
        &mut self, clauses: &[Comprehension], emit: &mut dyn FnMut(&mut Self) -> Result<(), SandboxError>,
    ) -> Result<(), SandboxError> {
        let Some((clause, rest)) = clauses.split_first() else {
            return emit(self);
        };

        let iterable = self.eval(&clause.iter)?;
        'items: for item in ops::iterate(&iterable, &mut self.budget)? {
            self.assign(&clause.target, item)?;
            for condition in &clause.conditions {
                if !self.eval(condition)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehend(rest, emit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::parser::parse_program;

    fn run(src: &str) -> Result<Interpreter, SandboxError> {
        let program = parse_program(src)?;
        let mut interp = Interpreter::new(Budget::new(100_000), "<p>hi</p>", "https://example.com/");
        interp.run(&program)?;
        Ok(interp)
    }

    fn get(src: &str, name: &str) -> String {
        let interp = run(src).unwrap();
        interp.local(name).map(Value::to_repr).unwrap_or_else(|| panic!("{name} not bound"))
    }

    #[test]
    fn test_arithmetic_and_strings() {
        assert_eq!(get("x = 1 + 2 * 3 - 4 // 3", "x"), "6");
        assert_eq!(get("x = 'a' + str(1) * 1", "x"), "'a1'");
        assert_eq!(get("x = 7 / 2", "x"), "3.5");
        assert_eq!(get("x = 2 ** 10", "x"), "1024");
    }

    #[test]
    fn test_for_with_break_and_continue() {
        let src = "total = 0\nfor i in range(10):\n    if i % 2 == 0:\n        continue\n    if i > 7:\n        break\n    total += i\n";
        assert_eq!(get(src, "total"), "16");
    }

    #[test]
    fn test_tuple_unpacking_in_for() {
        let src = "out = []\nfor i, word in enumerate(['a', 'b']):\n    out.append(str(i) + word)\n";
        assert_eq!(get(src, "out"), "['0a', '1b']");
    }

    #[test]
    fn test_comprehensions() {
        assert_eq!(get("x = [i * i for i in range(5) if i % 2]", "x"), "[1, 9]");
        assert_eq!(get("x = {k: v for k, v in [['a', 1], ['b', 2]]}", "x"), "{'a': 1, 'b': 2}");
        assert_eq!(get("x = [a + b for a in ['x', 'y'] for b in ['1', '2']]", "x"), "['x1', 'x2', 'y1', 'y2']");
    }

    #[test]
    fn test_try_except_catches_runtime_errors() {
        let src = "try:\n    x = {}['missing']\nexcept KeyError as e:\n    x = 'caught ' + str(e)\n";
        assert_eq!(get(src, "x"), r"'caught \'missing\''");
    }

    #[test]
    fn test_try_except_catches_raise() {
        let src = "try:\n    raise ValueError('bad input')\nexcept Exception as e:\n    x = e.message\n";
        assert_eq!(get(src, "x"), "'bad input'");
    }

    #[test]
    fn test_unmatched_handler_propagates() {
        let err = run("try:\n    raise ValueError('x')\nexcept KeyError:\n    pass\n").unwrap_err();
        assert!(matches!(err, SandboxError::Raised { kind, .. } if kind == "ValueError"));
    }

    #[test]
    fn test_finally_runs() {
        let src = "log = []\ntry:\n    log.append(1)\nfinally:\n    log.append(2)\n";
        assert_eq!(get(src, "log"), "[1, 2]");
    }

    #[test]
    fn test_bare_reraise() {
        let err = run("try:\n    raise KeyError('k')\nexcept KeyError:\n    raise\n").unwrap_err();
        assert!(matches!(err, SandboxError::Raised { kind, .. } if kind == "KeyError"));
    }

    #[test]
    fn test_raise_string_message() {
        let err = run("raise 'no items found'").unwrap_err();
        assert!(matches!(err, SandboxError::Raised { message, .. } if message == "no items found"));
    }

    #[test]
    fn test_budget_cannot_be_caught() {
        let src = "try:\n    for i in range(1000000):\n        x = i\nexcept Exception:\n    x = 0\n";
        assert!(matches!(run(src), Err(SandboxError::BudgetExhausted(_))));
    }

    #[test]
    fn test_unknown_call_denied_before_arguments() {
        let interp_err = run("x = open(undefined_name)").unwrap_err();
        assert!(matches!(interp_err, SandboxError::CapabilityDenied(_)));
    }

    #[test]
    fn test_dunder_access_denied() {
        for src in ["x = ''.__class__", "x = __builtins__", "x = [].__len__()", "x = __import__('os')"] {
            assert!(matches!(run(src), Err(SandboxError::CapabilityDenied(_))), "{src}");
        }
    }

    #[test]
    fn test_undefined_name_is_name_error() {
        let err = run("x = missing").unwrap_err();
        assert!(matches!(err, SandboxError::Runtime { kind, .. } if kind == "NameError"));
    }

    #[test]
    fn test_inputs_are_bound() {
        assert_eq!(get("x = base_url", "x"), "'https://example.com/'");
        assert_eq!(get("x = text(parse(html_content).select_one('p'))", "x"), "'hi'");
    }

    #[test]
    fn test_builtin_alias_is_callable() {
        assert_eq!(get("f = len\nx = f('abc')", "x"), "3");
        assert!(matches!(run("f = 1\nx = f()"), Err(SandboxError::Runtime { .. })));
    }

    #[test]
    fn test_chained_comparison() {
        assert_eq!(get("x = 1 < 2 < 3", "x"), "True");
        assert_eq!(get("x = 1 < 3 < 2", "x"), "False");
        assert_eq!(get("x = 'a' not in 'xyz' and None is None", "x"), "True");
    }

    #[test]
    fn test_short_circuit_returns_operand() {
        assert_eq!(get("x = '' or 'default'", "x"), "'default'");
        assert_eq!(get("x = 0 and missing_name", "x"), "0");
    }

    #[test]
    fn test_self_containing_list_is_released() {
        let interp = run("a = []\na.append(a)\nd = {'self': a}\na.append(d)").unwrap();
        let Some(Value::List(a)) = interp.local("a") else { panic!("a not bound") };
        let weak = Rc::downgrade(a);
        drop(interp);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_deep_runtime_nesting_drops() {
        assert_eq!(get("a = []\nfor i in range(3):\n    a = [a]", "a"), "[[[[]]]]");
        let src = "a = []\nfor i in range(50000):\n    a = [a]\nfor i in range(50000):\n    a = {'next': a}\na = None";
        let program = parse_program(src).unwrap();
        let mut interp = Interpreter::new(Budget::new(1_000_000), "", "https://example.com/");
        interp.run(&program).unwrap();
        assert_eq!(interp.local("a").map(Value::to_repr).as_deref(), Some("None"));
    }

    #[test]
    fn test_equality_on_cycles_is_recursion_error() {
        let err = run("a = []\na.append(a)\nb = []\nb.append(b)\nx = a == b").unwrap_err();
        assert!(matches!(err, SandboxError::Runtime { kind, .. } if kind == "RecursionError"));
    }

    #[test]
    fn test_augmented_index_assignment() {
        assert_eq!(get("d = {'n': 1}\nd['n'] += 2", "d"), "{'n': 3}");
        assert_eq!(get("xs = [1]\nys = xs\nxs += [2]", "ys"), "[1, 2]");
    }
}
