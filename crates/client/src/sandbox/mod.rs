//! Execution sandbox for model-written extraction programs.
//!
//! Programs are written in a small indentation-based rule language and run
//! by a tree-walking interpreter. Nothing outside a fixed builtin table
//! resolves: there are no imports, no attribute reflection and no function
//! definitions, and `for` only walks sequences that already exist. Every
//! statement, expression and builtin is charged against a step budget, so a
//! run ends with a value or an error in bounded time.
//!
//! A program reads the inputs `html_content` and `base_url` and must bind its
//! result to [`OUTPUT_VARIABLE`].
//!
//! ```text
//! doc = parse(html_content)
//! items = []
//! for row in doc.select("li.post"):
//!     link = row.select_one("a")
//!     if link is None:
//!         continue
//!     items.append({"title": text(link), "url": urljoin(base_url, attr(link, "href"))})
//! parsed = {"type": "list", "title": text(doc.select_one("h1")), "items": items}
//! ```

mod builtins;
mod dom;
mod eval;
mod lexer;
mod ops;
mod parser;
mod value;

use pagesift_core::Error;
use serde_json::Value as Json;

use eval::{Budget, Interpreter};

/// Name the program must bind its result to.
pub const OUTPUT_VARIABLE: &str = "parsed";

/// Sandbox failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SandboxError {
    #[error("syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// The program reached for something outside the builtin table.
    #[error("capability denied: {0}")]
    CapabilityDenied(String),

    /// The program raised an exception of its own.
    #[error("{kind}: {message}")]
    Raised { kind: String, message: String },

    /// A builtin or operator faulted.
    #[error("{kind}: {message}")]
    Runtime { kind: String, message: String },

    #[error("step budget of {0} exhausted")]
    BudgetExhausted(u64),

    #[error("program did not bind `{0}`")]
    MissingOutput(String),
}

impl From<SandboxError> for Error {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::MissingOutput(name) => Error::SandboxMissingOutput(name),
            other => Error::SandboxExecution(other.to_string()),
        }
    }
}

/// Read-only inputs of one run.
#[derive(Debug, Clone)]
pub struct Bindings<'a> {
    pub html_content: &'a str,
    pub base_url: &'a str,
}

/// Runs extraction programs under a step budget.
#[derive(Debug, Clone, Copy)]
pub struct Sandbox {
    step_budget: u64,
}

impl Sandbox {
    pub fn new(step_budget: u64) -> Self {
        Self { step_budget }
    }

    pub fn step_budget(&self) -> u64 {
        self.step_budget
    }

    /// Execute `program` and return the value bound to [`OUTPUT_VARIABLE`].
    ///
    /// The value is returned as-is; checking its shape is the caller's job.
    pub fn run(&self, program: &str, bindings: &Bindings<'_>) -> Result<Json, SandboxError> {
        let ast = parser::parse_program(program)?;
        let mut interpreter = Interpreter::new(Budget::new(self.step_budget), bindings.html_content, bindings.base_url);

        let result = interpreter.run(&ast);
        tracing::debug!(
            steps = interpreter.budget.used(),
            budget = self.step_budget,
            ok = result.is_ok(),
            "extraction program finished"
        );
        result?;

        let output = interpreter
            .local(OUTPUT_VARIABLE)
            .cloned()
            .ok_or_else(|| SandboxError::MissingOutput(OUTPUT_VARIABLE.to_string()))?;
        output.to_json(&mut interpreter.budget)
    }
}
