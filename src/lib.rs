//! parenlang - a small parenthesized expression language
//!
//! Source text flows through three stages:
//!
//! 1. [`tokenize`] scans characters into a stream of [`Token`]s. With the `threaded`
//!    feature (on by default) the lexer runs on its own thread and hands tokens to the
//!    parser over a bounded channel.
//! 2. [`parse`] folds the tokens into an n-ary [`Tree`]. The root is a container whose
//!    children are the top-level forms, in source order.
//! 3. [`evaluate`] rewrites a tree against an [`Environment`] until it is fully reduced.
//!
//! ```text
//! (: fact (lambda (list n) (cmp (= n 0) 1 (* n (fact (- n 1))))))
//! (fact 5)                // 120
//! (/ 1 0)                 // division by zero error
//! (lazy (: x (+ 1 2)))    // binds x to 3 rather than to (+ 1 2)
//! ```
//!
//! ## Semantics in brief
//!
//! - Numbers are `f64`. Booleans parse to `1` and `0`; `cmp` takes the then-branch only
//!   for a condition equal to `1`.
//! - Assignment binds in the current frame and, by default, stores its right-hand side
//!   unevaluated. Each use of the name evaluates a fresh copy in the defining frame.
//! - Lambdas capture the free variables bound at their creation, so later rebinding of
//!   those names is not observed by the closure.
//! - Evaluating a sequence container is fail-soft: every child is tried, and failures
//!   are reported together in [`Error::PartialEvaluation`] alongside the residual tree.
//!
//! ## Modules
//!
//! - `token`: token kinds and the keyword table
//! - `lexer`: character-level tokenizer and the token stream
//! - `tree`: the n-ary tree shared by parser and evaluator
//! - `parser`: token stream to tree
//! - `environment`: chained binding frames
//! - `builtinops`: operator registry with arity rules
//! - `evaluator`: tree rewriting
//! - `session`: persistent environment for driving the pipeline over several inputs

use std::fmt;

/// Maximum list nesting accepted by the parser
pub const MAX_PARSE_DEPTH: usize = 64;

/// Maximum evaluation depth to prevent stack overflow in recursive evaluation.
/// A lambda application costs about three levels (body, branch, argument), so this
/// allows self-recursion a few hundred calls deep.
pub const MAX_EVAL_DEPTH: usize = 1024;

/// Tokens buffered between the lexer thread and the parser
pub const TOKEN_CHANNEL_CAPACITY: usize = 64;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// The tokenizer rejected the input (bad number, unterminated literal, stray paren)
    Lexical,
    /// Invalid or unexpected syntax (bad tokens, malformed expressions)
    InvalidSyntax,
    /// Input ended before every list was closed
    Incomplete,
    /// List nesting exceeded [`MAX_PARSE_DEPTH`]
    TooDeeplyNested,
    /// Valid language syntax that is intentionally not supported in this implementation
    Unsupported,
    /// Implementation-imposed limit exceeded (integer overflow etc.)
    ImplementationLimit,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token, if identifiable
    pub found: Option<String>,
    /// Byte offset of the problem in the input
    pub offset: Option<usize>,
    /// 1-based line and column, filled in by [`ParseError::attach_source`]
    pub line_col: Option<(usize, usize)>,
}

impl ParseError {
    /// Create a ParseError without source context
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        offset: Option<usize>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context: None,
            found,
            offset,
            line_col: None,
        }
    }

    /// Create a simple ParseError with a kind and message but no position
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError at a byte offset, optionally naming the offending token
    pub fn at(
        kind: ParseErrorKind,
        message: impl Into<String>,
        offset: usize,
        found: Option<String>,
    ) -> Self {
        Self::new(kind, message, Some(offset), found)
    }

    /// Create a ParseError with context extracted from input at a given offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        offset: usize,
    ) -> Self {
        Self::at(kind, message, offset, None).attach_source(input)
    }

    /// Fill in the context snippet and line/column from the source text.
    /// Errors without an offset are returned unchanged.
    pub fn attach_source(mut self, input: &str) -> Self {
        const MAX_CONTEXT: usize = 100;

        let Some(offset) = self.offset else {
            return self;
        };
        self.line_col = Some(crate::token::line_col(input, offset));

        let char_offset = input
            .char_indices()
            .take_while(|&(i, _)| i < offset)
            .count();
        let context_start = char_offset.saturating_sub(20);
        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.chars().count() < input.chars().count() {
            display_context.push_str("[...]");
        }

        self.context = Some(display_context.replace('\n', "\\n").replace('\r', ""));
        self
    }
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    ParseError(ParseError),
    EvalError(String),
    TypeError(String),
    UnboundVariable(String),
    ArityError {
        expected: usize,
        got: usize,
        expression: Option<String>, // Optional expression context
    },
    /// `/` or `%` with a zero divisor; carries the offending expression
    DivisionByZero(String),
    /// Some children of a sequence container failed. `residual` holds the reduced
    /// children, with failed ones left in their unevaluated form.
    PartialEvaluation {
        residual: Box<Tree>,
        errors: Vec<Error>,
    },
}

impl Error {
    /// Create an ArityError without expression context
    pub fn arity_error(expected: usize, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityError with expression context
    pub fn arity_error_with_expr(expected: usize, got: usize, expression: String) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression),
        }
    }

    /// The first underlying error, looking through partial evaluation reports
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::PartialEvaluation { errors, .. } => {
                errors.first().map_or(self, Error::root_cause)
            }
            other => other,
        }
    }

    /// Attach source context to parse errors; other errors are returned unchanged
    pub fn with_source(self, input: &str) -> Self {
        match self {
            Error::ParseError(e) => Error::ParseError(e.attach_source(input)),
            other => other,
        }
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::ParseError(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ParseError(e) => {
                write!(f, "ParseError: {}", e.message)?;
                if let Some((line, col)) = e.line_col {
                    write!(f, " (line {line}, column {col})")?;
                }
                if let Some(found) = &e.found {
                    write!(f, "\nFound: {found}")?;
                }
                if let Some(context) = &e.context {
                    write!(f, "\nContext: {context}")?;
                }
                Ok(())
            }
            Error::EvalError(msg) => write!(f, "EvaluationError: {msg}"),
            Error::TypeError(msg) => write!(f, "Type error: {msg}"),
            Error::UnboundVariable(var) => write!(f, "Unbound variable: {var}"),
            Error::ArityError {
                expected,
                got,
                expression,
            } => match expression {
                Some(expr) => write!(
                    f,
                    "ArityError: expression {expr}: expected {expected} arguments, got {got}"
                ),
                None => write!(
                    f,
                    "ArityError: function expected {expected} arguments but got {got}"
                ),
            },
            Error::DivisionByZero(expr) => write!(f, "Division by zero: {expr}"),
            Error::PartialEvaluation { residual, errors } => {
                write!(
                    f,
                    "PartialEvaluation: {} error(s), residual {residual}",
                    errors.len()
                )?;
                for error in errors {
                    write!(f, "\n  {error}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for Error {}

pub mod builtinops;
pub mod environment;
pub mod evaluator;
pub mod lexer;
pub mod parser;
pub mod session;
pub mod token;
pub mod tree;

pub use environment::{BindingMode, Environment};
pub use evaluator::evaluate;
pub use lexer::{LexerConfig, TokenStream, tokenize, tokenize_with_config};
pub use parser::{Parser, parse, parse_str};
pub use session::{Session, SessionConfig};
pub use token::{Keyword, Token, TokenKind};
pub use tree::{Node, Tree};

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;

    #[test]
    fn test_attach_source_context() {
        let input = "(: x 1)\n(+ x 2";
        let error = ParseError::with_context(ParseErrorKind::Incomplete, "unclosed list", input, 8);
        assert_eq!(error.line_col, Some((2, 1)));
        assert_eq!(error.context.as_deref(), Some("(: x 1)\\n(+ x 2"));

        let long = format!("({} @)", "+ ".repeat(40));
        let error = ParseError::at(ParseErrorKind::Lexical, "bad", 60, Some("@".into()))
            .attach_source(&long);
        let context = error.context.unwrap();
        assert!(context.starts_with("[...]"));
        assert!(context.len() <= 100 + 10);
    }

    #[test]
    fn test_attach_source_without_offset_is_unchanged() {
        let error = ParseError::from_message(ParseErrorKind::InvalidSyntax, "empty");
        assert_eq!(error.clone().attach_source("(+ 1 2)"), error);
    }

    #[test]
    fn test_error_display() {
        let test_cases = vec![
            (Error::UnboundVariable("x".into()), "Unbound variable: x"),
            (Error::TypeError("bad".into()), "Type error: bad"),
            (Error::EvalError("oops".into()), "EvaluationError: oops"),
            (
                Error::arity_error(2, 3),
                "ArityError: function expected 2 arguments but got 3",
            ),
            (
                Error::arity_error_with_expr(1, 0, "(sq)".into()),
                "ArityError: expression (sq): expected 1 arguments, got 0",
            ),
            (
                Error::DivisionByZero("(/ 1 0)".into()),
                "Division by zero: (/ 1 0)",
            ),
            (
                Error::ParseError(ParseError {
                    line_col: Some((1, 8)),
                    ..ParseError::from_message(ParseErrorKind::Incomplete, "unclosed list")
                }),
                "ParseError: unclosed list (line 1, column 8)",
            ),
        ];

        for (i, (error, expected)) in test_cases.iter().enumerate() {
            assert_eq!(error.to_string(), *expected, "Display test #{}", i + 1);
        }
    }

    #[test]
    fn test_root_cause_looks_through_partial_evaluation() {
        let inner = Error::DivisionByZero("(/ 1 0)".into());
        let error = Error::PartialEvaluation {
            residual: Box::new(Tree::default()),
            errors: vec![
                Error::PartialEvaluation {
                    residual: Box::new(Tree::default()),
                    errors: vec![inner.clone()],
                },
                Error::UnboundVariable("y".into()),
            ],
        };
        assert_eq!(error.root_cause(), &inner);
        assert_eq!(inner.root_cause(), &inner);
    }

    #[test]
    fn test_with_source_only_touches_parse_errors() {
        let error = Error::from(ParseError::at(ParseErrorKind::Lexical, "bad", 2, None));
        match error.with_source("(+ @)") {
            Error::ParseError(e) => assert_eq!(e.line_col, Some((1, 3))),
            other => panic!("unexpected {other:?}"),
        }
        let error = Error::TypeError("t".into());
        assert_eq!(error.clone().with_source("(+ @)"), error);
    }
}
