//! Built-in operations registry.
//!
//! Every keyword maps to exactly one [`BuiltinOp`] that records how the evaluator runs it
//! and how many children it accepts.
//!
//! ## Special forms vs primitives
//!
//! - **Special forms** receive the whole unevaluated form together with the environment
//!   and control evaluation of their children themselves (`:`, `lambda`, calls, `cmp`,
//!   `list`, `lazy`, `eval`, `print`, `time`).
//! - **Arithmetic** primitives are binary `f64` operations. The evaluator reduces every
//!   child to a number and folds the operation strictly left to right, so `(- 10 3 2)` is
//!   `(10 - 3) - 2` and `(- 5)` is `5`.
//! - **Comparisons** take exactly two numbers and produce `1` or `0`.
//!
//! ## Error handling
//!
//! - `/` and `%` with a zero divisor are [`Error::DivisionByZero`], never an IEEE infinity.
//! - `&`, `|` and `^` require integral operands in the `i64` range.
//! - Arity is checked against the registry before an operation runs.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::Error;
use crate::environment::Environment;
use crate::evaluator::{
    eval_assign, eval_call, eval_cmp, eval_eval, eval_lambda, eval_lazy, eval_list, eval_print,
    eval_time,
};
use crate::token::Keyword;
use crate::tree::Tree;

/// Signature shared by all special forms: the form itself, the current frame, and the
/// current evaluation depth.
pub type SpecialFormFn = fn(&Tree, &Environment, usize) -> Result<Tree, Error>;

/// Represents the implementation of a keyword
#[derive(Clone, Copy)]
pub enum OpKind {
    /// Controls evaluation of its own children
    SpecialForm(SpecialFormFn),
    /// Binary numeric step, folded over the evaluated children
    Arithmetic(fn(f64, f64) -> Result<f64, Error>),
    /// Binary numeric predicate
    Comparison(fn(f64, f64) -> bool),
}

impl std::fmt::Debug for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::SpecialForm(_) => write!(f, "SpecialForm(<fn>)"),
            OpKind::Arithmetic(_) => write!(f, "Arithmetic(<fn>)"),
            OpKind::Comparison(_) => write!(f, "Comparison(<fn>)"),
        }
    }
}

/// Accepted child counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly n children
    Exact(usize),
    /// At least n children
    AtLeast(usize),
    /// Between min and max children (inclusive)
    Range(usize, usize),
    /// Any number of children
    Any,
}

impl Arity {
    pub fn validate(self, got: usize) -> Result<(), Error> {
        match self {
            Arity::Exact(n) if got != n => Err(Error::arity_error(n, got)),
            Arity::AtLeast(n) if got < n => Err(Error::arity_error(n, got)),
            Arity::Range(min, _) if got < min => Err(Error::arity_error(min, got)),
            Arity::Range(_, max) if got > max => Err(Error::arity_error(max, got)),
            _ => Ok(()),
        }
    }
}

/// Definition of a built-in operation
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    pub keyword: Keyword,
    pub op_kind: OpKind,
    pub arity: Arity,
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        self.keyword == other.keyword
    }
}

impl BuiltinOp {
    #[cfg_attr(not(test), expect(dead_code))]
    pub(crate) fn is_special_form(&self) -> bool {
        matches!(self.op_kind, OpKind::SpecialForm(_))
    }

    /// Check the number of children, naming `form` in the error
    pub(crate) fn validate_arity(&self, form: &Tree) -> Result<(), Error> {
        match self.arity.validate(form.children.len()) {
            Err(Error::ArityError { expected, got, .. }) => Err(Error::arity_error_with_expr(
                expected,
                got,
                form.to_string(),
            )),
            other => other,
        }
    }
}

//
// Primitive implementations
//

fn builtin_add(a: f64, b: f64) -> Result<f64, Error> {
    Ok(a + b)
}

fn builtin_sub(a: f64, b: f64) -> Result<f64, Error> {
    Ok(a - b)
}

fn builtin_mul(a: f64, b: f64) -> Result<f64, Error> {
    Ok(a * b)
}

fn builtin_div(a: f64, b: f64) -> Result<f64, Error> {
    if b == 0.0 {
        return Err(Error::DivisionByZero(format!("{a} / {b}")));
    }
    Ok(a / b)
}

fn builtin_mod(a: f64, b: f64) -> Result<f64, Error> {
    if b == 0.0 {
        return Err(Error::DivisionByZero(format!("{a} % {b}")));
    }
    Ok(a % b)
}

/// Integral value of a bitwise operand
fn to_integer(n: f64) -> Result<i64, Error> {
    // 2^63 is exactly representable; anything at or above it overflows i64
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if n.fract() != 0.0 || !(-LIMIT..LIMIT).contains(&n) {
        return Err(Error::TypeError(format!(
            "bitwise operands must be integers, got {n}"
        )));
    }
    Ok(n as i64)
}

// Macro to generate bitwise primitives over integral operands
macro_rules! bitwise_op {
    ($name:ident, $op:tt) => {
        fn $name(a: f64, b: f64) -> Result<f64, Error> {
            let result = to_integer(a)? $op to_integer(b)?;
            Ok(result as f64)
        }
    };
}

bitwise_op!(builtin_and, &);
bitwise_op!(builtin_or, |);
bitwise_op!(builtin_xor, ^);

// Macro to generate numeric comparison functions
macro_rules! numeric_comparison {
    ($name:ident, $op:tt) => {
        fn $name(a: f64, b: f64) -> bool {
            a $op b
        }
    };
}

numeric_comparison!(builtin_eq, ==);
numeric_comparison!(builtin_lt, <);
numeric_comparison!(builtin_gt, >);
numeric_comparison!(builtin_ge, >=);
numeric_comparison!(builtin_le, <=);

/// Global registry of all built-in operations.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    let special = |keyword, f: SpecialFormFn, arity| BuiltinOp {
        keyword,
        op_kind: OpKind::SpecialForm(f),
        arity,
    };
    let arithmetic = |keyword, f: fn(f64, f64) -> Result<f64, Error>| BuiltinOp {
        keyword,
        op_kind: OpKind::Arithmetic(f),
        // (+) has no sensible value in a strictly numeric fold
        arity: Arity::AtLeast(1),
    };
    let comparison = |keyword, f: fn(f64, f64) -> bool| BuiltinOp {
        keyword,
        op_kind: OpKind::Comparison(f),
        arity: Arity::Exact(2),
    };

    vec![
        // Binding and functions
        special(Keyword::Assign, eval_assign, Arity::Exact(2)),
        // Parameters and body, plus the capture list once it is a closure
        special(Keyword::Function, eval_lambda, Arity::Range(2, 3)),
        // Argument count is checked against the callee's parameters
        special(Keyword::Call, eval_call, Arity::Any),
        // Control flow and evaluation
        special(Keyword::Cmp, eval_cmp, Arity::Exact(3)),
        special(Keyword::List, eval_list, Arity::Any),
        special(Keyword::Lazy, eval_lazy, Arity::Exact(1)),
        special(Keyword::Eval, eval_eval, Arity::Exact(1)),
        // Arithmetic
        arithmetic(Keyword::Add, builtin_add),
        arithmetic(Keyword::Sub, builtin_sub),
        arithmetic(Keyword::Mul, builtin_mul),
        arithmetic(Keyword::Div, builtin_div),
        arithmetic(Keyword::Mod, builtin_mod),
        arithmetic(Keyword::And, builtin_and),
        arithmetic(Keyword::Or, builtin_or),
        arithmetic(Keyword::Xor, builtin_xor),
        // Comparison
        comparison(Keyword::Eq, builtin_eq),
        comparison(Keyword::Lt, builtin_lt),
        comparison(Keyword::Gt, builtin_gt),
        comparison(Keyword::Ge, builtin_ge),
        comparison(Keyword::Le, builtin_le),
        // Output and clock
        special(Keyword::Print, eval_print, Arity::Any),
        special(Keyword::Time, eval_time, Arity::Exact(0)),
    ]
});

static BUILTIN_BY_KEYWORD: LazyLock<HashMap<Keyword, &'static BuiltinOp>> = LazyLock::new(|| {
    let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
    ops.iter().map(|op| (op.keyword, op)).collect()
});

/// All builtin operations
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Find the operation implementing `keyword`
pub fn find_op(keyword: Keyword) -> Option<&'static BuiltinOp> {
    BUILTIN_BY_KEYWORD.get(&keyword).copied()
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::tree::{form, num};

    fn call_arithmetic(keyword: Keyword, a: f64, b: f64) -> Result<f64, Error> {
        match find_op(keyword).unwrap().op_kind {
            OpKind::Arithmetic(f) => f(a, b),
            other => panic!("expected arithmetic builtin for {keyword}, got {other:?}"),
        }
    }

    fn call_comparison(keyword: Keyword, a: f64, b: f64) -> bool {
        match find_op(keyword).unwrap().op_kind {
            OpKind::Comparison(f) => f(a, b),
            other => panic!("expected comparison builtin for {keyword}, got {other:?}"),
        }
    }

    #[test]
    fn test_builtin_ops_registry() {
        // Every keyword has exactly one operation
        let all_keywords = [
            Keyword::Assign,
            Keyword::Function,
            Keyword::Call,
            Keyword::List,
            Keyword::Lazy,
            Keyword::Eval,
            Keyword::Add,
            Keyword::Sub,
            Keyword::Mul,
            Keyword::Div,
            Keyword::Mod,
            Keyword::And,
            Keyword::Or,
            Keyword::Xor,
            Keyword::Cmp,
            Keyword::Eq,
            Keyword::Lt,
            Keyword::Gt,
            Keyword::Ge,
            Keyword::Le,
            Keyword::Print,
            Keyword::Time,
        ];
        assert_eq!(get_builtin_ops().len(), all_keywords.len());
        for keyword in all_keywords {
            let op = find_op(keyword).unwrap();
            assert_eq!(op.keyword, keyword);
            assert_eq!(op.is_special_form(), !keyword.is_arithmetic() && !keyword.is_comparison());
        }

        assert_eq!(find_op(Keyword::Cmp).unwrap().arity, Arity::Exact(3));
        assert_eq!(find_op(Keyword::Add).unwrap().arity, Arity::AtLeast(1));
        assert_eq!(find_op(Keyword::Lt).unwrap().arity, Arity::Exact(2));
        assert_eq!(find_op(Keyword::Function).unwrap().arity, Arity::Range(2, 3));
        assert_eq!(find_op(Keyword::Time).unwrap().arity, Arity::Exact(0));
        assert!(std::ptr::eq(
            find_op(Keyword::Eq).unwrap(),
            &get_builtin_ops()[15]
        ));
    }

    #[test]
    fn test_arity_validation() {
        let test_cases = vec![
            (Arity::Exact(2), 2, Ok(())),
            (Arity::Exact(2), 1, Err(Error::arity_error(2, 1))),
            (Arity::Exact(2), 3, Err(Error::arity_error(2, 3))),
            (Arity::AtLeast(1), 1, Ok(())),
            (Arity::AtLeast(1), 9, Ok(())),
            (Arity::AtLeast(1), 0, Err(Error::arity_error(1, 0))),
            (Arity::Range(2, 3), 2, Ok(())),
            (Arity::Range(2, 3), 3, Ok(())),
            (Arity::Range(2, 3), 1, Err(Error::arity_error(2, 1))),
            (Arity::Range(2, 3), 4, Err(Error::arity_error(3, 4))),
            (Arity::Any, 0, Ok(())),
        ];

        for (i, (arity, got, expected)) in test_cases.into_iter().enumerate() {
            assert_eq!(arity.validate(got), expected, "Arity test #{}", i + 1);
        }
    }

    #[test]
    fn test_validate_arity_names_form() {
        let op = find_op(Keyword::Cmp).unwrap();
        let bad = form(Keyword::Cmp, [num(1), num(2)]);
        assert_eq!(
            op.validate_arity(&bad),
            Err(Error::arity_error_with_expr(3, 2, "(cmp 1 2)".into()))
        );
    }

    #[test]
    fn test_arithmetic_implementations() {
        let test_cases = vec![
            (Keyword::Add, 1.0, 2.0, Some(3.0)),
            (Keyword::Add, 0.5, 0.25, Some(0.75)),
            (Keyword::Sub, 5.0, 7.0, Some(-2.0)),
            (Keyword::Mul, 3.0, 4.0, Some(12.0)),
            (Keyword::Div, 10.0, 4.0, Some(2.5)),
            (Keyword::Div, 10.0, 0.0, None),
            (Keyword::Div, 0.0, 0.0, None),
            (Keyword::Mod, 7.0, 3.0, Some(1.0)),
            (Keyword::Mod, -7.0, 3.0, Some(-1.0)),
            (Keyword::Mod, 7.0, 0.0, None),
            (Keyword::And, 12.0, 10.0, Some(8.0)),
            (Keyword::Or, 12.0, 3.0, Some(15.0)),
            (Keyword::Xor, 6.0, 3.0, Some(5.0)),
            (Keyword::And, -1.0, 255.0, Some(255.0)),
            (Keyword::And, 1.5, 1.0, None),
            (Keyword::Or, 1.0, f64::INFINITY, None),
            (Keyword::Xor, 1e300, 1.0, None),
        ];

        for (i, (keyword, a, b, expected)) in test_cases.into_iter().enumerate() {
            let result = call_arithmetic(keyword, a, b);
            match expected {
                Some(value) => assert_eq!(
                    result,
                    Ok(value),
                    "Arithmetic test #{}: ({keyword} {a} {b})",
                    i + 1
                ),
                None => assert!(
                    result.is_err(),
                    "Arithmetic test #{}: ({keyword} {a} {b}) should fail",
                    i + 1
                ),
            }
        }

        assert!(matches!(
            call_arithmetic(Keyword::Div, 1.0, 0.0),
            Err(Error::DivisionByZero(_))
        ));
        assert!(matches!(
            call_arithmetic(Keyword::Xor, 0.5, 1.0),
            Err(Error::TypeError(_))
        ));
    }

    #[test]
    fn test_comparison_implementations() {
        let test_cases = vec![
            (Keyword::Eq, 1.0, 1.0, true),
            (Keyword::Eq, 1.0, 2.0, false),
            (Keyword::Lt, 1.0, 2.0, true),
            (Keyword::Lt, 2.0, 2.0, false),
            (Keyword::Gt, 3.0, 2.0, true),
            (Keyword::Ge, 2.0, 2.0, true),
            (Keyword::Ge, 1.0, 2.0, false),
            (Keyword::Le, 2.0, 2.0, true),
            (Keyword::Le, 3.0, 2.0, false),
        ];

        for (i, (keyword, a, b, expected)) in test_cases.into_iter().enumerate() {
            assert_eq!(
                call_comparison(keyword, a, b),
                expected,
                "Comparison test #{}: ({keyword} {a} {b})",
                i + 1
            );
        }
    }
}
