//! A long-lived top-level environment for running source text through the pipeline.

use log::debug;

use crate::environment::{BindingMode, Environment};
use crate::evaluator::eval_source;
use crate::lexer::{LexerConfig, tokenize_with_config};
use crate::token::Token;
use crate::tree::Tree;
use crate::Error;

/// Session options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionConfig {
    /// Initial binding mode of the top-level frame
    pub binding_mode: BindingMode,
    /// Keep whitespace and comment tokens in [`Session::tokens`]
    pub keep_trivia: bool,
}

/// Owns the top-level frame. Bindings persist across calls to [`Session::eval_str`].
#[derive(Debug, Default)]
pub struct Session {
    env: Environment,
    config: SessionConfig,
}

impl Session {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let env = Environment::new();
        env.set_binding_mode(config.binding_mode);
        Session { env, config }
    }

    /// Tokenize, parse and evaluate `text` one top-level form at a time.
    ///
    /// Returns the value of the last form. Evaluation stops at the first failing form;
    /// bindings made by earlier forms are kept.
    pub fn eval_str(&self, text: &str) -> Result<Tree, Error> {
        debug!("session eval {} byte(s)", text.len());
        eval_source(text, &self.env, 0)
    }

    /// Tokens of `text` as the session's lexer configuration sees them
    pub fn tokens(&self, text: &str) -> Vec<Token> {
        tokenize_with_config(
            text,
            LexerConfig {
                keep_trivia: self.config.keep_trivia,
            },
        )
        .collect()
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// All top-level bindings, sorted by name
    pub fn bindings(&self) -> Vec<(String, Tree)> {
        self.env.bindings()
    }

    pub fn binding_mode(&self) -> BindingMode {
        self.env.binding_mode()
    }

    pub fn set_binding_mode(&mut self, mode: BindingMode) {
        self.config.binding_mode = mode;
        self.env.set_binding_mode(mode);
    }

    pub fn config(&self) -> SessionConfig {
        self.config
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::token::TokenKind;
    use crate::tree::num;

    #[test]
    fn test_bindings_persist_across_inputs() {
        let session = Session::new();
        session.eval_str("(: x 5)").unwrap();
        assert_eq!(session.eval_str("(* x 2)").unwrap(), num(10));

        let names: Vec<String> = session.bindings().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["x"]);
    }

    #[test]
    fn test_eval_str_returns_last_form() {
        let session = Session::new();
        assert_eq!(
            session.eval_str("(: a 2)\n(: b 3)\n(* a b)").unwrap(),
            num(6)
        );
    }

    #[test]
    fn test_failing_form_keeps_earlier_bindings() {
        let session = Session::new();
        let result = session.eval_str("(: a 1) (/ a 0) (: b 2)");
        assert_eq!(result, Err(Error::DivisionByZero("(/ a 0)".into())));
        assert!(session.environment().is_bound("a"));
        assert!(!session.environment().is_bound("b"));
    }

    #[test]
    fn test_parse_errors_carry_source_position() {
        let session = Session::new();
        match session.eval_str("(+ 1 2)\n(+ 1") {
            Err(Error::ParseError(e)) => assert_eq!(e.line_col, Some((2, 5))),
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_eager_session() {
        let mut session = Session::with_config(SessionConfig {
            binding_mode: BindingMode::Eager,
            keep_trivia: false,
        });
        session.eval_str("(: a 1) (: b (+ a 1)) (: a 10)").unwrap();
        assert_eq!(session.eval_str("(+ b 0)").unwrap(), num(2));

        session.set_binding_mode(BindingMode::Deferred);
        assert_eq!(session.binding_mode(), BindingMode::Deferred);
        session.eval_str("(: c (+ a 1)) (: a 20)").unwrap();
        assert_eq!(session.eval_str("(+ c 0)").unwrap(), num(21));
    }

    #[test]
    fn test_tokens_follow_trivia_config() {
        let plain = Session::new();
        assert!(!plain.tokens("(+ 1 2)").iter().any(|t| t.kind == TokenKind::Space));

        let verbose = Session::with_config(SessionConfig {
            keep_trivia: true,
            ..SessionConfig::default()
        });
        assert!(verbose.tokens("(+ 1 2)").iter().any(|t| t.kind == TokenKind::Space));
        assert!(verbose.config().keep_trivia);
    }
}
