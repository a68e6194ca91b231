//! Recursive-descent parser producing the program AST.

use std::rc::Rc;

use super::SandboxError;
use super::lexer::{Tok, Token, tokenize};

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub line: usize,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    /// `a = b = value`: every target receives the same value.
    Assign { targets: Vec<Target>, value: Expr },
    AugAssign { target: Target, op: BinOp, value: Expr },
    If { branches: Vec<(Expr, Vec<Stmt>)>, orelse: Vec<Stmt> },
    For { target: Target, iter: Expr, body: Vec<Stmt> },
    Try { body: Vec<Stmt>, handlers: Vec<Handler>, orelse: Vec<Stmt>, finally: Vec<Stmt> },
    Raise(Option<Expr>),
    Pass,
    Break,
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Handler {
    /// Exception kinds matched; empty matches everything.
    pub kinds: Vec<String>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Index { obj: Box<Expr>, index: Box<Expr> },
    Unpack(Vec<Target>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub target: Target,
    pub iter: Expr,
    pub conditions: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Name(String),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr> },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare { left: Box<Expr>, rest: Vec<(CmpOp, Expr)> },
    Conditional { test: Box<Expr>, then: Box<Expr>, orelse: Box<Expr> },
    Call { func: String, args: Vec<Expr>, kwargs: Vec<(String, Expr)> },
    Method { recv: Box<Expr>, name: String, args: Vec<Expr>, kwargs: Vec<(String, Expr)> },
    Attribute { recv: Box<Expr>, name: String },
    Index { obj: Box<Expr>, index: Box<Expr> },
    Slice { obj: Box<Expr>, start: Option<Box<Expr>>, stop: Option<Box<Expr>>, step: Option<Box<Expr>> },
    ListComp { elt: Box<Expr>, clauses: Vec<Comprehension> },
    DictComp { key: Box<Expr>, value: Box<Expr>, clauses: Vec<Comprehension> },
}

/// Deepest nesting of blocks, sub-expressions and operator chains a program may use.
const MAX_DEPTH: usize = 100;

/// Statements the language deliberately lacks.
const UNSUPPORTED: &[&str] =
    &["while", "def", "lambda", "class", "return", "with", "yield", "async", "await", "global", "nonlocal", "del"];

pub fn parse_program(src: &str) -> Result<Vec<Stmt>, SandboxError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0, loops: 0, depth: 0 };
    let mut body = Vec::new();
    while !parser.at(&Tok::Eof) {
        if parser.eat(&Tok::Newline) {
            continue;
        }
        body.push(parser.statement()?);
    }
    Ok(body)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Enclosing `for` statements at the current position.
    loops: usize,
    /// Open nesting levels; every level is one more frame when evaluating.
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        self.tokens.get(self.pos).map_or(&Tok::Eof, |t| &t.tok)
    }

    fn peek_next(&self) -> &Tok {
        self.tokens.get(self.pos + 1).map_or(&Tok::Eof, |t| &t.tok)
    }

    fn line(&self) -> usize {
        self.tokens.get(self.pos).or_else(|| self.tokens.last()).map_or(1, |t| t.line)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == word)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.at_keyword(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> SandboxError {
        SandboxError::Syntax { line: self.line(), message: message.into() }
    }

    fn descend(&mut self) -> Result<(), SandboxError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(format!("program nests deeper than {MAX_DEPTH} levels")));
        }
        Ok(())
    }

    /// Run `production` one nesting level down.
    fn nested<T>(&mut self, production: fn(&mut Self) -> Result<T, SandboxError>) -> Result<T, SandboxError> {
        self.descend()?;
        let out = production(self);
        self.depth -= 1;
        out
    }

    fn expect_op(&mut self, op: &str) -> Result<(), SandboxError> {
        if self.eat_op(op) { Ok(()) } else { Err(self.error(format!("expected '{op}', found {}", describe(self.peek())))) }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<(), SandboxError> {
        if self.eat_keyword(word) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{word}', found {}", describe(self.peek()))))
        }
    }

    fn identifier(&mut self) -> Result<String, SandboxError> {
        match self.peek() {
            Tok::Name(name) if !is_keyword(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected a name, found {}", describe(other)))),
        }
    }

    fn end_of_statement(&mut self) -> Result<(), SandboxError> {
        if self.eat(&Tok::Newline) || self.at(&Tok::Eof) || self.at(&Tok::Dedent) {
            Ok(())
        } else {
            Err(self.error(format!("unexpected {}", describe(self.peek()))))
        }
    }

    fn statement(&mut self) -> Result<Stmt, SandboxError> {
        self.nested(Self::statement_at_level)
    }

    fn statement_at_level(&mut self) -> Result<Stmt, SandboxError> {
        let line = self.line();
        let word = match self.peek() {
            Tok::Name(n) => Some(n.clone()),
            Tok::Indent => return Err(self.error("unexpected indent")),
            _ => None,
        };

        let kind = match word.as_deref() {
            Some("import" | "from") => {
                return Err(SandboxError::CapabilityDenied(format!("module imports are not available (line {line})")));
            }
            Some(w) if UNSUPPORTED.contains(&w) => {
                return Err(self.error(format!("'{w}' is not supported")));
            }
            Some("if") => {
                self.advance();
                self.if_statement()?
            }
            Some("for") => {
                self.advance();
                let target = self.target_list()?;
                self.expect_keyword("in")?;
                let iter = self.expression_list()?;
                self.loops += 1;
                let body = self.block();
                self.loops -= 1;
                let body = body?;
                if self.at_keyword("else") {
                    return Err(self.error("'for ... else' is not supported"));
                }
                StmtKind::For { target, iter, body }
            }
            Some("try") => {
                self.advance();
                self.try_statement()?
            }
            Some("raise") => {
                self.advance();
                let value = if self.at(&Tok::Newline) || self.at(&Tok::Eof) { None } else { Some(self.expression()?) };
                if self.eat_keyword("from") {
                    self.expression()?;
                }
                self.end_of_statement()?;
                StmtKind::Raise(value)
            }
            Some("pass") => {
                self.advance();
                self.end_of_statement()?;
                StmtKind::Pass
            }
            Some(w @ ("break" | "continue")) if self.loops == 0 => {
                return Err(self.error(format!("'{w}' outside loop")));
            }
            Some("break") => {
                self.advance();
                self.end_of_statement()?;
                StmtKind::Break
            }
            Some("continue") => {
                self.advance();
                self.end_of_statement()?;
                StmtKind::Continue
            }
            _ => self.simple_statement()?,
        };
        Ok(Stmt { line, kind })
    }

    fn simple_statement(&mut self) -> Result<StmtKind, SandboxError> {
        let first = self.expression_list()?;

        if let Tok::Op(op) = self.peek() {
            let aug = match *op {
                "+=" => Some(BinOp::Add),
                "-=" => Some(BinOp::Sub),
                "*=" => Some(BinOp::Mul),
                "/=" => Some(BinOp::Div),
                "//=" => Some(BinOp::FloorDiv),
                "%=" => Some(BinOp::Mod),
                "**=" => Some(BinOp::Pow),
                _ => None,
            };
            if let Some(op) = aug {
                self.advance();
                let target = self.to_target(first)?;
                if matches!(target, Target::Unpack(_)) {
                    return Err(self.error("illegal target for augmented assignment"));
                }
                let value = self.expression_list()?;
                self.end_of_statement()?;
                return Ok(StmtKind::AugAssign { target, op, value });
            }
        }

        if !self.at_op("=") {
            self.end_of_statement()?;
            return Ok(StmtKind::Expr(first));
        }

        let mut exprs = vec![first];
        while self.eat_op("=") {
            exprs.push(self.expression_list()?);
        }
        self.end_of_statement()?;

        let value = exprs.pop().ok_or_else(|| self.error("missing assignment value"))?;
        let targets = exprs.into_iter().map(|e| self.to_target(e)).collect::<Result<Vec<_>, _>>()?;
        Ok(StmtKind::Assign { targets, value })
    }

    fn to_target(&self, expr: Expr) -> Result<Target, SandboxError> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Index { obj, index } => Ok(Target::Index { obj, index }),
            Expr::List(items) => {
                Ok(Target::Unpack(items.into_iter().map(|e| self.to_target(e)).collect::<Result<Vec<_>, _>>()?))
            }
            Expr::Attribute { name, .. } => Err(self.error(format!("cannot assign to attribute '{name}'"))),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    fn if_statement(&mut self) -> Result<StmtKind, SandboxError> {
        let test = self.expression()?;
        let body = self.block()?;
        let mut branches = vec![(test, body)];
        let mut orelse = Vec::new();

        loop {
            if self.eat_keyword("elif") {
                let test = self.expression()?;
                let body = self.block()?;
                branches.push((test, body));
            } else if self.eat_keyword("else") {
                orelse = self.block()?;
                break;
            } else {
                break;
            }
        }
        Ok(StmtKind::If { branches, orelse })
    }

    fn try_statement(&mut self) -> Result<StmtKind, SandboxError> {
        let body = self.block()?;
        let mut handlers = Vec::new();

        while self.eat_keyword("except") {
            let mut kinds = Vec::new();
            let mut name = None;
            if !self.at_op(":") {
                if self.eat_op("(") {
                    loop {
                        kinds.push(self.identifier()?);
                        if !self.eat_op(",") || self.at_op(")") {
                            break;
                        }
                    }
                    self.expect_op(")")?;
                } else {
                    kinds.push(self.identifier()?);
                }
                if self.eat_keyword("as") {
                    name = Some(self.identifier()?);
                }
            }
            let body = self.block()?;
            handlers.push(Handler { kinds, name, body });
        }

        let orelse = if !handlers.is_empty() && self.eat_keyword("else") { self.block()? } else { Vec::new() };
        let finally = if self.eat_keyword("finally") { self.block()? } else { Vec::new() };

        if handlers.is_empty() && finally.is_empty() {
            return Err(self.error("'try' needs an 'except' or 'finally' clause"));
        }
        Ok(StmtKind::Try { body, handlers, orelse, finally })
    }

    /// `:` followed by either an indented suite or a single inline statement.
    fn block(&mut self) -> Result<Vec<Stmt>, SandboxError> {
        self.expect_op(":")?;

        if !self.eat(&Tok::Newline) {
            return Ok(vec![self.statement()?]);
        }
        if !self.eat(&Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }

        let mut body = Vec::new();
        while !self.eat(&Tok::Dedent) {
            if self.at(&Tok::Eof) {
                break;
            }
            if self.eat(&Tok::Newline) {
                continue;
            }
            body.push(self.statement()?);
        }
        Ok(body)
    }

    /// Bare `for` targets: `a`, `a, b`, `(a, b)`.
    fn target_list(&mut self) -> Result<Target, SandboxError> {
        let mut targets = vec![self.single_target()?];
        while self.eat_op(",") {
            if self.at_keyword("in") {
                break;
            }
            targets.push(self.single_target()?);
        }
        if targets.len() == 1 {
            Ok(targets.remove(0))
        } else {
            Ok(Target::Unpack(targets))
        }
    }

    fn single_target(&mut self) -> Result<Target, SandboxError> {
        if self.eat_op("(") || self.eat_op("[") {
            let target = self.target_list()?;
            if !self.eat_op(")") {
                self.expect_op("]")?;
            }
            return Ok(match target {
                Target::Unpack(t) => Target::Unpack(t),
                other => Target::Unpack(vec![other]),
            });
        }
        Ok(Target::Name(self.identifier()?))
    }

    /// One or more comma-separated expressions; a bare tuple becomes a list.
    fn expression_list(&mut self) -> Result<Expr, SandboxError> {
        let first = self.expression()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at(&Tok::Newline) || self.at(&Tok::Eof) || self.at_op("=") || self.at_op(":") {
                break;
            }
            items.push(self.expression()?);
        }
        Ok(Expr::List(items))
    }

    fn expression(&mut self) -> Result<Expr, SandboxError> {
        self.nested(Self::conditional)
    }

    fn conditional(&mut self) -> Result<Expr, SandboxError> {
        if self.at_keyword("lambda") {
            return Err(self.error("'lambda' is not supported"));
        }
        let body = self.or_expr()?;
        if self.eat_keyword("if") {
            let test = self.or_expr()?;
            self.expect_keyword("else")?;
            let orelse = self.expression()?;
            return Ok(Expr::Conditional { test: Box::new(test), then: Box::new(body), orelse: Box::new(orelse) });
        }
        Ok(body)
    }

    fn or_expr(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.and_expr()?;
        let mut links = 0;
        while self.eat_keyword("or") {
            self.descend()?;
            links += 1;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.not_expr()?;
        let mut links = 0;
        while self.eat_keyword("and") {
            self.descend()?;
            links += 1;
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, SandboxError> {
        if self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.nested(Self::not_expr)?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SandboxError> {
        let left = self.arith()?;
        let mut rest = Vec::new();

        loop {
            let op = match self.peek() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::Ne,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::Le,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::Ge,
                Tok::Name(n) if n == "in" => CmpOp::In,
                Tok::Name(n) if n == "is" => {
                    if matches!(self.peek_next(), Tok::Name(next) if next == "not") {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                Tok::Name(n) if n == "not" && matches!(self.peek_next(), Tok::Name(next) if next == "in") => {
                    self.advance();
                    CmpOp::NotIn
                }
                _ => break,
            };
            self.advance();
            rest.push((op, self.arith()?));
        }

        if rest.is_empty() { Ok(left) } else { Ok(Expr::Compare { left: Box::new(left), rest }) }
    }

    fn arith(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.term()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Tok::Op("+") => BinOp::Add,
                Tok::Op("-") => BinOp::Sub,
                _ => break,
            };
            self.advance();
            self.descend()?;
            links += 1;
            let right = self.term()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        self.depth -= links;
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.unary()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Tok::Op("*") => BinOp::Mul,
                Tok::Op("/") => BinOp::Div,
                Tok::Op("//") => BinOp::FloorDiv,
                Tok::Op("%") => BinOp::Mod,
                _ => break,
            };
            self.advance();
            self.descend()?;
            links += 1;
            let right = self.unary()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        self.depth -= links;
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, SandboxError> {
        if self.eat_op("-") {
            return Ok(Expr::Neg(Box::new(self.nested(Self::unary)?)));
        }
        if self.eat_op("+") {
            return self.nested(Self::unary);
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, SandboxError> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            let exponent = self.nested(Self::unary)?;
            return Ok(Expr::Binary { op: BinOp::Pow, left: Box::new(base), right: Box::new(exponent) });
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, SandboxError> {
        let mut expr = self.atom()?;
        let mut links = 0;
        loop {
            if self.at_op("(") || self.at_op(".") || self.at_op("[") {
                self.descend()?;
                links += 1;
            }
            if self.at_op("(") {
                let Expr::Name(func) = expr else {
                    return Err(self.error("only named functions can be called"));
                };
                self.advance();
                let (args, kwargs) = self.call_arguments()?;
                expr = Expr::Call { func, args, kwargs };
            } else if self.eat_op(".") {
                let name = self.attribute_name()?;
                if self.eat_op("(") {
                    let (args, kwargs) = self.call_arguments()?;
                    expr = Expr::Method { recv: Box::new(expr), name, args, kwargs };
                } else {
                    expr = Expr::Attribute { recv: Box::new(expr), name };
                }
            } else if self.eat_op("[") {
                expr = self.subscript(expr)?;
            } else {
                break;
            }
        }
        self.depth -= links;
        Ok(expr)
    }

    fn attribute_name(&mut self) -> Result<String, SandboxError> {
        match self.advance() {
            Tok::Name(name) => Ok(name),
            other => Err(self.error(format!("expected an attribute name, found {}", describe(&other)))),
        }
    }

    fn subscript(&mut self, obj: Expr) -> Result<Expr, SandboxError> {
        let mut parts: [Option<Box<Expr>>; 3] = [None, None, None];
        let mut colons = 0;

        loop {
            if self.eat_op("]") {
                break;
            }
            if self.eat_op(":") {
                colons += 1;
                if colons > 2 {
                    return Err(self.error("too many ':' in subscript"));
                }
                continue;
            }
            if parts[colons].is_some() {
                return Err(self.error("expected ':' or ']' in subscript"));
            }
            parts[colons] = Some(Box::new(self.expression_list()?));
        }

        let [start, stop, step] = parts;
        if colons == 0 {
            let index = start.ok_or_else(|| self.error("empty subscript"))?;
            return Ok(Expr::Index { obj: Box::new(obj), index });
        }
        Ok(Expr::Slice { obj: Box::new(obj), start, stop, step })
    }

    fn call_arguments(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), SandboxError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();

        while !self.eat_op(")") {
            if self.at_op("*") || self.at_op("**") {
                return Err(self.error("argument unpacking is not supported"));
            }

            let keyword = match (self.peek(), self.peek_next()) {
                (Tok::Name(name), Tok::Op("=")) => Some(name.clone()),
                _ => None,
            };
            if let Some(name) = keyword {
                self.advance();
                self.advance();
                kwargs.push((name, self.expression()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let arg = self.expression()?;
                if self.at_keyword("for") {
                    let clauses = self.comprehension_clauses()?;
                    args.push(Expr::ListComp { elt: Box::new(arg), clauses });
                } else {
                    args.push(arg);
                }
            }

            if !self.eat_op(",") {
                self.expect_op(")")?;
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn comprehension_clauses(&mut self) -> Result<Vec<Comprehension>, SandboxError> {
        let mut clauses = Vec::new();
        while self.eat_keyword("for") {
            let target = self.target_list()?;
            self.expect_keyword("in")?;
            let iter = self.or_expr()?;
            let mut conditions = Vec::new();
            while self.eat_keyword("if") {
                conditions.push(self.or_expr()?);
            }
            clauses.push(Comprehension { target, iter, conditions });
        }
        Ok(clauses)
    }

    fn atom(&mut self) -> Result<Expr, SandboxError> {
        match self.advance() {
            Tok::Int(i) => Ok(Expr::Literal(Literal::Int(i))),
            Tok::Float(f) => Ok(Expr::Literal(Literal::Float(f))),
            Tok::Str(s) => {
                let mut s = s;
                while let Tok::Str(next) = self.peek() {
                    s.push_str(next);
                    self.advance();
                }
                Ok(Expr::Literal(Literal::Str(Rc::from(s))))
            }
            Tok::Name(name) => match name.as_str() {
                "None" => Ok(Expr::Literal(Literal::None)),
                "True" => Ok(Expr::Literal(Literal::Bool(true))),
                "False" => Ok(Expr::Literal(Literal::Bool(false))),
                "import" | "from" => Err(SandboxError::CapabilityDenied("module imports are not available".into())),
                w if UNSUPPORTED.contains(&w) => Err(self.error(format!("'{w}' is not supported"))),
                w if is_keyword(w) => Err(self.error(format!("unexpected keyword '{w}'"))),
                _ => Ok(Expr::Name(name)),
            },
            Tok::Op("(") => self.parenthesized(),
            Tok::Op("[") => self.list_display(),
            Tok::Op("{") => self.dict_display(),
            other => Err(self.error(format!("unexpected {}", describe(&other)))),
        }
    }

    fn parenthesized(&mut self) -> Result<Expr, SandboxError> {
        if self.eat_op(")") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.expression()?;
        if self.at_keyword("for") {
            let clauses = self.comprehension_clauses()?;
            self.expect_op(")")?;
            return Ok(Expr::ListComp { elt: Box::new(first), clauses });
        }
        if self.eat_op(")") {
            return Ok(first);
        }

        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op(")") {
                break;
            }
            items.push(self.expression()?);
        }
        self.expect_op(")")?;
        Ok(Expr::List(items))
    }

    fn list_display(&mut self) -> Result<Expr, SandboxError> {
        if self.eat_op("]") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.expression()?;
        if self.at_keyword("for") {
            let clauses = self.comprehension_clauses()?;
            self.expect_op("]")?;
            return Ok(Expr::ListComp { elt: Box::new(first), clauses });
        }

        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op("]") {
                break;
            }
            items.push(self.expression()?);
        }
        self.expect_op("]")?;
        Ok(Expr::List(items))
    }

    fn dict_display(&mut self) -> Result<Expr, SandboxError> {
        if self.eat_op("}") {
            return Ok(Expr::Dict(Vec::new()));
        }
        let key = self.expression()?;
        if !self.eat_op(":") {
            return Err(self.error("set literals are not supported"));
        }
        let value = self.expression()?;
        if self.at_keyword("for") {
            let clauses = self.comprehension_clauses()?;
            self.expect_op("}")?;
            return Ok(Expr::DictComp { key: Box::new(key), value: Box::new(value), clauses });
        }

        let mut entries = vec![(key, value)];
        while self.eat_op(",") {
            if self.at_op("}") {
                break;
            }
            let key = self.expression()?;
            self.expect_op(":")?;
            let value = self.expression()?;
            entries.push((key, value));
        }
        self.expect_op("}")?;
        Ok(Expr::Dict(entries))
    }
}

fn is_keyword(word: &str) -> bool {
    matches!(
        word,
        "if" | "elif"
            | "else"
            | "for"
            | "in"
            | "not"
            | "and"
            | "or"
            | "is"
            | "try"
            | "except"
            | "finally"
            | "raise"
            | "pass"
            | "break"
            | "continue"
            | "as"
            | "import"
            | "from"
            | "None"
            | "True"
            | "False"
    ) || UNSUPPORTED.contains(&word)
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Name(n) => format!("'{n}'"),
        Tok::Int(i) => i.to_string(),
        Tok::Float(f) => f.to_string(),
        Tok::Str(_) => "string".to_string(),
        Tok::Op(op) => format!("'{op}'"),
        Tok::Newline => "end of line".to_string(),
        Tok::Indent => "indent".to_string(),
        Tok::Dedent => "dedent".to_string(),
        Tok::Eof => "end of program".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(src: &str) -> StmtKind {
        let mut program = parse_program(src).unwrap();
        assert_eq!(program.len(), 1, "{program:?}");
        program.remove(0).kind
    }

    #[test]
    fn test_assignment_targets() {
        let StmtKind::Assign { targets, .. } = single("a = b = 1") else { panic!() };
        assert_eq!(targets, vec![Target::Name("a".into()), Target::Name("b".into())]);

        let StmtKind::Assign { targets, .. } = single("x, y = 1, 2") else { panic!() };
        assert!(matches!(&targets[0], Target::Unpack(t) if t.len() == 2));

        assert!(matches!(single("d['k'] = 1"), StmtKind::Assign { .. }));
    }

    #[test]
    fn test_precedence() {
        let StmtKind::Expr(expr) = single("1 + 2 * 3") else { panic!() };
        let Expr::Binary { op: BinOp::Add, right, .. } = expr else { panic!() };
        assert!(matches!(*right, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_chained_comparison_and_not_in() {
        let StmtKind::Expr(Expr::Compare { rest, .. }) = single("a < b <= c") else { panic!() };
        assert_eq!(rest.len(), 2);

        let StmtKind::Expr(Expr::Compare { rest, .. }) = single("a not in b") else { panic!() };
        assert_eq!(rest[0].0, CmpOp::NotIn);

        let StmtKind::Expr(Expr::Compare { rest, .. }) = single("a is not None") else { panic!() };
        assert_eq!(rest[0].0, CmpOp::IsNot);
    }

    #[test]
    fn test_if_elif_else() {
        let StmtKind::If { branches, orelse } = single("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n")
        else {
            panic!()
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(orelse.len(), 1);
    }

    #[test]
    fn test_try_handlers() {
        let src = "try:\n    x = 1\nexcept (KeyError, IndexError) as e:\n    pass\nexcept:\n    pass\nfinally:\n    y = 2\n";
        let StmtKind::Try { handlers, finally, .. } = single(src) else { panic!() };
        assert_eq!(handlers[0].kinds, vec!["KeyError".to_string(), "IndexError".to_string()]);
        assert_eq!(handlers[0].name.as_deref(), Some("e"));
        assert!(handlers[1].kinds.is_empty());
        assert_eq!(finally.len(), 1);
    }

    #[test]
    fn test_method_call_and_slice() {
        let StmtKind::Expr(Expr::Method { name, args, .. }) = single("s.strip()") else { panic!() };
        assert_eq!(name, "strip");
        assert!(args.is_empty());

        assert!(matches!(single("x[1:]"), StmtKind::Expr(Expr::Slice { stop: None, .. })));
        assert!(matches!(single("x[::-1]"), StmtKind::Expr(Expr::Slice { start: None, step: Some(_), .. })));
    }

    #[test]
    fn test_comprehensions() {
        assert!(matches!(single("[x for x in y if x]"), StmtKind::Expr(Expr::ListComp { .. })));
        assert!(matches!(single("{k: v for k, v in pairs}"), StmtKind::Expr(Expr::DictComp { .. })));
        let StmtKind::Expr(Expr::Call { args, .. }) = single("any(x for x in y)") else { panic!() };
        assert!(matches!(args[0], Expr::ListComp { .. }));
    }

    #[test]
    fn test_keyword_arguments() {
        let StmtKind::Expr(Expr::Call { kwargs, .. }) = single("sorted(xs, reverse=True)") else { panic!() };
        assert_eq!(kwargs[0].0, "reverse");
    }

    #[test]
    fn test_import_is_capability_denied() {
        assert!(matches!(parse_program("import os"), Err(SandboxError::CapabilityDenied(_))));
        assert!(matches!(parse_program("x = 1\nfrom os import path"), Err(SandboxError::CapabilityDenied(_))));
    }

    #[test]
    fn test_unsupported_constructs() {
        for src in ["while True:\n    pass", "def f():\n    pass", "f = lambda x: x", "class A:\n    pass"] {
            assert!(matches!(parse_program(src), Err(SandboxError::Syntax { .. })), "{src}");
        }
    }

    #[test]
    fn test_break_outside_loop() {
        assert!(matches!(parse_program("break"), Err(SandboxError::Syntax { .. })));
        assert!(parse_program("for x in y:\n    if x:\n        break\n").is_ok());
    }

    #[test]
    fn test_only_named_calls() {
        assert!(matches!(parse_program("x[0](1)"), Err(SandboxError::Syntax { .. })));
    }

    fn too_deep(src: &str) -> bool {
        matches!(parse_program(src), Err(SandboxError::Syntax { message, .. }) if message.contains("nests deeper"))
    }

    #[test]
    fn test_deep_nesting_is_syntax_error() {
        let parens = format!("parsed = {}1{}", "(".repeat(1000), ")".repeat(1000));
        assert!(too_deep(&parens));
        assert!(too_deep(&format!("parsed = {}1{}", "[".repeat(500), "]".repeat(500))));
        assert!(too_deep(&format!("parsed = {}1", "-".repeat(5000))));
        assert!(too_deep(&format!("parsed = {}True", "not ".repeat(5000))));
        assert!(too_deep(&format!("parsed = 1{}", " + 1".repeat(5000))));
        assert!(too_deep(&format!("parsed = s{}", ".strip()".repeat(5000))));
        assert!(too_deep(&format!("{}pass", "if x: ".repeat(500))));

        let mut nested_blocks: String = (0..200).map(|level| format!("{}if x:\n", "    ".repeat(level))).collect();
        nested_blocks.push_str(&format!("{}pass\n", "    ".repeat(200)));
        assert!(too_deep(&nested_blocks));
    }

    #[test]
    fn test_ordinary_nesting_parses() {
        assert!(parse_program(&format!("parsed = {}1{}", "(".repeat(40), ")".repeat(40))).is_ok());
        assert!(parse_program(&format!("parsed = 1{}", " + 1".repeat(60))).is_ok());
        assert!(parse_program("parsed = doc.select_one('h1').get_text().strip().lower()[0:10]").is_ok());
    }

    #[test]
    fn test_implicit_string_concatenation() {
        let StmtKind::Expr(Expr::Literal(Literal::Str(s))) = single("'a' 'b'") else { panic!() };
        assert_eq!(&*s, "ab");
    }
}
