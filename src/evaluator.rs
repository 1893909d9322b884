//! Tree-rewriting evaluator.
//!
//! [`evaluate`] takes a tree and an environment and returns a new, reduced tree. Input
//! trees are never mutated: bound definitions are deep-copied at every use and rewritten
//! in the frame that defines them.
//!
//! Keyword forms are dispatched through the registry in [`crate::builtinops`]. Special
//! forms control the evaluation of their own children; arithmetic and comparison
//! primitives see only fully reduced numbers.

use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};

use crate::builtinops::{OpKind, find_op};
use crate::environment::{BindingMode, Environment};
use crate::lexer::tokenize;
use crate::parser::Parser;
use crate::token::Keyword;
use crate::tree::{Node, Tree};
use crate::{Error, MAX_EVAL_DEPTH};

/// Evaluate a tree (public API)
pub fn evaluate(tree: &Tree, env: &Environment) -> Result<Tree, Error> {
    eval_with_depth_tracking(tree, env, 0)
}

/// Evaluate a tree with depth tracking to prevent stack overflow
fn eval_with_depth_tracking(tree: &Tree, env: &Environment, depth: usize) -> Result<Tree, Error> {
    if depth >= MAX_EVAL_DEPTH {
        warn!("evaluation depth limit {MAX_EVAL_DEPTH} reached");
        return Err(Error::EvalError(format!(
            "Evaluation depth limit exceeded (max: {MAX_EVAL_DEPTH})"
        )));
    }

    match &tree.node {
        None => eval_container(tree, env, depth),

        Some(Node::Number(_) | Node::Text(_)) if tree.children.is_empty() => Ok(tree.clone()),
        Some(Node::Number(_) | Node::Text(_)) => Err(Error::EvalError(format!(
            "Literal cannot have children: {tree}"
        ))),

        Some(Node::Variable { name, .. }) => eval_variable(name, env, depth),

        Some(Node::Keyword { op, .. }) => {
            let builtin = find_op(*op)
                .ok_or_else(|| Error::EvalError(format!("No implementation for '{op}'")))?;
            builtin.validate_arity(tree)?;
            match builtin.op_kind {
                OpKind::SpecialForm(special_form) => special_form(tree, env, depth),
                OpKind::Arithmetic(step) => eval_arithmetic(tree, step, env, depth),
                OpKind::Comparison(predicate) => eval_comparison(tree, predicate, env, depth),
            }
            .map_err(|err| add_context(err, tree))
        }
    }
}

/// Helper function to add expression context to errors
fn add_context(error: Error, tree: &Tree) -> Error {
    with_note(error, "Context", format_args!("while evaluating: {tree}"))
}

/// Append a labelled note to evaluation and type errors. Only the innermost note with a
/// given label is kept; other errors carry their own context.
fn with_note(error: Error, label: &str, note: std::fmt::Arguments<'_>) -> Error {
    let annotate = |msg: String| {
        let marker = format!("\n  {label}: ");
        if msg.contains(&marker) {
            msg
        } else {
            format!("{msg}{marker}{note}")
        }
    };
    match error {
        Error::EvalError(msg) => Error::EvalError(annotate(msg)),
        Error::TypeError(msg) => Error::TypeError(annotate(msg)),
        other => other,
    }
}

/// Helper function to evaluate a list of child expressions with depth tracking
fn eval_args(args: &[Tree], env: &Environment, depth: usize) -> Result<Vec<Tree>, Error> {
    args.iter()
        .map(|arg| eval_with_depth_tracking(arg, env, depth + 1))
        .collect()
}

/// Evaluate every child of a sequence container, keeping failed children unevaluated
fn eval_container(tree: &Tree, env: &Environment, depth: usize) -> Result<Tree, Error> {
    if tree.children.is_empty() {
        return Err(Error::EvalError(
            "Cannot evaluate empty container".to_owned(),
        ));
    }

    let mut residual = Tree::container(Vec::with_capacity(tree.children.len()));
    let mut errors = Vec::new();
    for child in &tree.children {
        match eval_with_depth_tracking(child, env, depth + 1) {
            Ok(value) => residual.children.push(value),
            Err(err) => {
                debug!("keeping {child} unevaluated: {err}");
                residual.children.push(child.deep_copy());
                errors.push(err);
            }
        }
    }

    if errors.is_empty() {
        Ok(residual)
    } else {
        Err(Error::PartialEvaluation {
            residual: Box::new(residual),
            errors,
        })
    }
}

/// Reduce a fresh copy of the binding of `name` in the frame that defines it
fn eval_variable(name: &str, env: &Environment, depth: usize) -> Result<Tree, Error> {
    let (definition, defining) = env
        .lookup_binding(name)
        .ok_or_else(|| Error::UnboundVariable(name.to_owned()))?;
    eval_with_depth_tracking(&definition, &defining, depth + 1)
}

/// Evaluate assignment special form
pub(crate) fn eval_assign(form: &Tree, env: &Environment, depth: usize) -> Result<Tree, Error> {
    let [target, value] = form.children.as_slice() else {
        return Err(Error::arity_error(2, form.children.len()));
    };
    let Some(name) = target.variable_name() else {
        return Err(Error::TypeError(format!(
            "Assignment target must be a variable, got {target}"
        )));
    };

    let stored = if value.keyword() == Some(Keyword::Function) {
        make_closure(value, env, Some(name))?
    } else if env.binding_mode() == BindingMode::Eager {
        eval_with_depth_tracking(value, env, depth + 1)?
    } else {
        value.deep_copy()
    };

    env.bind(name, stored.clone());
    Ok(Tree::leaf(Node::Variable {
        name: name.to_owned(),
        cache: Some(Box::new(stored)),
    }))
}

/// Evaluate lambda special form
pub(crate) fn eval_lambda(form: &Tree, env: &Environment, _depth: usize) -> Result<Tree, Error> {
    make_closure(form, env, None)
}

/// Names declared by a `(list p1 p2 ...)` parameter form
fn parameter_names(params: &Tree) -> Result<Vec<&str>, Error> {
    if params.keyword() != Some(Keyword::List) {
        return Err(Error::TypeError(format!(
            "Lambda parameters must be a list form, got {params}"
        )));
    }

    let mut names: Vec<&str> = Vec::with_capacity(params.children.len());
    for param in &params.children {
        let Some(name) = param.variable_name() else {
            return Err(Error::TypeError(format!(
                "Lambda parameters must be variables, got {param}"
            )));
        };
        if names.contains(&name) {
            return Err(Error::EvalError(format!(
                "Duplicate parameter name: {name}"
            )));
        }
        names.push(name);
    }
    Ok(names)
}

/// Turn `(lambda params body)` into `(lambda params body (list (: v t) ...))`, capturing
/// every free variable of the body that is currently bound. `exclude` names the binding
/// being defined so that recursion resolves to the live definition.
fn make_closure(lambda: &Tree, env: &Environment, exclude: Option<&str>) -> Result<Tree, Error> {
    match lambda.children.as_slice() {
        [params, _, captures] => {
            parameter_names(params)?;
            captured_bindings(captures)?;
            Ok(lambda.deep_copy())
        }
        [params, body] => {
            let names = parameter_names(params)?;
            let mut captures = Tree::leaf(Node::keyword(Keyword::List));
            for free in body.referenced_names() {
                if names.contains(&free.as_str()) || exclude == Some(free.as_str()) {
                    continue;
                }
                if let Some(value) = env.lookup(&free) {
                    captures.push(Tree::with_children(
                        Node::keyword(Keyword::Assign),
                        vec![Tree::leaf(Node::variable(free)), value],
                    ));
                }
            }
            debug!("closure captures {}", captures.children.len());
            Ok(Tree::with_children(
                Node::keyword(Keyword::Function),
                vec![params.deep_copy(), body.deep_copy(), captures],
            ))
        }
        children => Err(Error::arity_error_with_expr(
            2,
            children.len(),
            lambda.to_string(),
        )),
    }
}

/// Entries of a closure's `(list (: v t) ...)` capture list
fn captured_bindings(captures: &Tree) -> Result<Vec<(&str, &Tree)>, Error> {
    if captures.keyword() != Some(Keyword::List) {
        return Err(Error::TypeError(format!(
            "Closure captures must be a list form, got {captures}"
        )));
    }

    captures
        .children
        .iter()
        .map(|capture| match capture.children.as_slice() {
            [variable, value] if capture.keyword() == Some(Keyword::Assign) => variable
                .variable_name()
                .map(|name| (name, value))
                .ok_or_else(|| {
                    Error::TypeError(format!("Captured name must be a variable, got {variable}"))
                }),
            _ => Err(Error::TypeError(format!(
                "Closure capture must be an assignment, got {capture}"
            ))),
        })
        .collect()
}

/// Apply a named lambda to arguments evaluated in the caller's frame
pub(crate) fn eval_call(form: &Tree, env: &Environment, depth: usize) -> Result<Tree, Error> {
    let Some(Node::Keyword {
        name: Some(name), ..
    }) = &form.node
    else {
        return Err(Error::EvalError(format!("Call without a callee: {form}")));
    };

    let (definition, defining) = env
        .lookup_binding(name)
        .ok_or_else(|| Error::UnboundVariable(name.clone()))?;
    let callee = eval_with_depth_tracking(&definition, &defining, depth + 1)?;

    let (params, body, captures) = match (callee.keyword(), callee.children.as_slice()) {
        (Some(Keyword::Function), [params, body, captures]) => (params, body, Some(captures)),
        (Some(Keyword::Function), [params, body]) => (params, body, None),
        _ => {
            return Err(Error::TypeError(format!(
                "Cannot apply non-function: {name} = {callee}"
            )));
        }
    };

    let params = parameter_names(params)?;
    if params.len() != form.children.len() {
        return Err(Error::arity_error_with_expr(
            params.len(),
            form.children.len(),
            form.to_string(),
        ));
    }

    let args = eval_args(&form.children, env, depth)?;

    // Captures get a frame of their own so that captured definitions never see the
    // callee's parameters.
    let closure_frame = Environment::with_parent(&defining);
    if let Some(captures) = captures {
        for (captured, value) in captured_bindings(captures)? {
            closure_frame.bind(captured, value.deep_copy());
        }
    }
    let frame = Environment::with_parent(&closure_frame);
    for (param, arg) in params.into_iter().zip(args) {
        frame.bind(param, arg);
    }

    debug!("apply {name} to {} argument(s)", form.children.len());
    eval_with_depth_tracking(body, &frame, depth + 1)
        .map_err(|err| with_note(err, "In lambda", format_args!("{name}")))
}

/// Evaluate cmp special form. Only a condition equal to 1 selects the then-branch.
pub(crate) fn eval_cmp(form: &Tree, env: &Environment, depth: usize) -> Result<Tree, Error> {
    let [condition, then_branch, else_branch] = form.children.as_slice() else {
        return Err(Error::arity_error(3, form.children.len()));
    };

    let value = eval_with_depth_tracking(condition, env, depth + 1)?;
    match value.number() {
        Some(n) if n == 1.0 => eval_with_depth_tracking(then_branch, env, depth + 1),
        Some(_) => eval_with_depth_tracking(else_branch, env, depth + 1),
        None => Err(Error::TypeError(format!(
            "cmp condition must be a number, got {value}"
        ))),
    }
}

/// Evaluate list special form: children are reduced, the form is kept
pub(crate) fn eval_list(form: &Tree, env: &Environment, depth: usize) -> Result<Tree, Error> {
    Ok(Tree::with_children(
        Node::keyword(Keyword::List),
        eval_args(&form.children, env, depth)?,
    ))
}

/// Evaluate the body with eager assignment in the current frame
pub(crate) fn eval_lazy(form: &Tree, env: &Environment, depth: usize) -> Result<Tree, Error> {
    let [body] = form.children.as_slice() else {
        return Err(Error::arity_error(1, form.children.len()));
    };

    let previous = env.set_binding_mode(BindingMode::Eager);
    let result = eval_with_depth_tracking(body, env, depth + 1);
    env.set_binding_mode(previous);
    result
}

/// Evaluate eval special form: run a text value as source in the current frame
pub(crate) fn eval_eval(form: &Tree, env: &Environment, depth: usize) -> Result<Tree, Error> {
    let [source] = form.children.as_slice() else {
        return Err(Error::arity_error(1, form.children.len()));
    };

    let value = eval_with_depth_tracking(source, env, depth + 1)?;
    match value.text() {
        Some(text) => eval_source(text, env, depth + 1),
        None => Err(Error::TypeError(format!(
            "eval requires text, got {value}"
        ))),
    }
}

/// Evaluate print special form: write the reduced children on one line and return the
/// form with its children reduced
pub(crate) fn eval_print(form: &Tree, env: &Environment, depth: usize) -> Result<Tree, Error> {
    let values = eval_args(&form.children, env, depth)?;
    let mut out = io::stdout().lock();
    writeln!(out, "{}", print_line(&values))
        .map_err(|err| Error::EvalError(format!("print failed: {err}")))?;
    Ok(Tree::with_children(Node::keyword(Keyword::Print), values))
}

/// Concatenate printed values. Text is written without quotes.
fn print_line(values: &[Tree]) -> String {
    values
        .iter()
        .map(|value| match value.text() {
            Some(text) => text.to_owned(),
            None => value.to_string(),
        })
        .collect()
}

/// Evaluate time special form: seconds since the Unix epoch
pub(crate) fn eval_time(_form: &Tree, _env: &Environment, _depth: usize) -> Result<Tree, Error> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| Error::EvalError(format!("clock before Unix epoch: {err}")))?;
    Ok(Tree::leaf(Node::Number(elapsed.as_secs_f64())))
}

/// Tokenize, parse and evaluate `text` form by form, returning the last result.
/// Evaluation stops at the first error.
pub(crate) fn eval_source(text: &str, env: &Environment, depth: usize) -> Result<Tree, Error> {
    let mut last = None;
    for form in Parser::new(tokenize(text)) {
        let form = form.map_err(|e| e.with_source(text))?.into_single();
        last = Some(eval_with_depth_tracking(&form, env, depth)?);
    }
    last.ok_or_else(|| Error::EvalError("No forms to evaluate".to_owned()))
}

/// Reduce every child to a number
fn eval_numbers(form: &Tree, env: &Environment, depth: usize) -> Result<Vec<f64>, Error> {
    eval_args(&form.children, env, depth)?
        .iter()
        .map(|value| {
            value.number().ok_or_else(|| {
                Error::TypeError(format!(
                    "'{}' requires numeric operands, got {value}",
                    form.keyword().map_or("?", Keyword::spelling)
                ))
            })
        })
        .collect()
}

/// Fold an arithmetic step strictly left to right
fn eval_arithmetic(
    form: &Tree,
    step: fn(f64, f64) -> Result<f64, Error>,
    env: &Environment,
    depth: usize,
) -> Result<Tree, Error> {
    let numbers = eval_numbers(form, env, depth)?;
    let Some((&first, rest)) = numbers.split_first() else {
        return Err(Error::arity_error_with_expr(1, 0, form.to_string()));
    };

    let result = rest
        .iter()
        .try_fold(first, |acc, &n| step(acc, n))
        .map_err(|err| match err {
            Error::DivisionByZero(_) => Error::DivisionByZero(form.to_string()),
            other => other,
        })?;
    Ok(Tree::leaf(Node::Number(result)))
}

fn eval_comparison(
    form: &Tree,
    predicate: fn(f64, f64) -> bool,
    env: &Environment,
    depth: usize,
) -> Result<Tree, Error> {
    match eval_numbers(form, env, depth)?.as_slice() {
        &[a, b] => Ok(Tree::leaf(Node::Number(if predicate(a, b) {
            1.0
        } else {
            0.0
        }))),
        other => Err(Error::arity_error_with_expr(
            2,
            other.len(),
            form.to_string(),
        )),
    }
}
