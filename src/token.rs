//! Token model shared by the lexer and the parser.
//!
//! A [`Token`] is a `(kind, offset, text)` triple. Kinds fall into structural tokens
//! (list delimiters, end of input, error), keywords, literals, identifiers and trivia.
//! Keyword recognition is driven by a single static table, indexed once through a
//! `LazyLock` so that lookups are constant time.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Operators and special forms.
///
/// Every keyword except [`Keyword::Call`] has a spelling in the keyword table. `Call`
/// is produced by the parser when a list starts with a plain identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    /// `:` binds a name
    Assign,
    /// `lambda` creates a function value
    Function,
    /// Application of a named lambda
    Call,
    /// `list` evaluates to itself, elementwise reduced
    List,
    /// `lazy` evaluates its body with eager assignment
    Lazy,
    /// `eval` parses and evaluates a text value
    Eval,
    /// `print` writes its reduced children to standard output
    Print,
    /// `time` reads the wall clock
    Time,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    /// `cmp` is the conditional
    Cmp,
    Eq,
    Lt,
    Gt,
    Ge,
    Le,
}

/// Spelling of every keyword that can appear in source text.
const KEYWORD_TABLE: &[(&str, Keyword)] = &[
    (":", Keyword::Assign),
    ("lambda", Keyword::Function),
    ("list", Keyword::List),
    ("lazy", Keyword::Lazy),
    ("eval", Keyword::Eval),
    ("print", Keyword::Print),
    ("time", Keyword::Time),
    ("+", Keyword::Add),
    ("-", Keyword::Sub),
    ("*", Keyword::Mul),
    ("/", Keyword::Div),
    ("%", Keyword::Mod),
    ("&", Keyword::And),
    ("|", Keyword::Or),
    ("^", Keyword::Xor),
    ("cmp", Keyword::Cmp),
    ("=", Keyword::Eq),
    ("<", Keyword::Lt),
    (">", Keyword::Gt),
    (">=", Keyword::Ge),
    ("<=", Keyword::Le),
];

static KEYWORDS_BY_SPELLING: LazyLock<HashMap<&'static str, Keyword>> =
    LazyLock::new(|| KEYWORD_TABLE.iter().copied().collect());

static SPELLINGS_BY_KEYWORD: LazyLock<HashMap<Keyword, &'static str>> = LazyLock::new(|| {
    KEYWORD_TABLE
        .iter()
        .map(|&(spelling, keyword)| (keyword, spelling))
        .collect()
});

impl Keyword {
    /// Find the keyword spelled `word`, if any
    pub fn lookup(word: &str) -> Option<Keyword> {
        KEYWORDS_BY_SPELLING.get(word).copied()
    }

    /// Source spelling. `Call` has none; its callee name is printed instead.
    pub fn spelling(self) -> &'static str {
        SPELLINGS_BY_KEYWORD.get(&self).copied().unwrap_or("call")
    }

    /// Numeric folds: `+ - * / % & | ^`
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            Keyword::Add
                | Keyword::Sub
                | Keyword::Mul
                | Keyword::Div
                | Keyword::Mod
                | Keyword::And
                | Keyword::Or
                | Keyword::Xor
        )
    }

    /// Binary predicates yielding 1 or 0: `= < > >= <=`
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Keyword::Eq | Keyword::Lt | Keyword::Gt | Keyword::Ge | Keyword::Le
        )
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.spelling())
    }
}

/// Whether `word` is a reserved keyword spelling
pub fn is_keyword(word: &str) -> bool {
    KEYWORDS_BY_SPELLING.contains_key(word)
}

/// Token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Lexical failure; the token text is the message. Always the last token.
    Error,
    /// End of input. Always the last token of a successful scan.
    Eof,
    BeginList,
    EndList,
    Keyword(Keyword),
    /// `true` or `false`
    Bool,
    /// `'c'`
    Char,
    /// `1+2i`
    Complex,
    Number,
    /// `"text"` with escapes
    String,
    /// `` `text` `` without escapes
    RawString,
    Variable,
    Comment,
    Newline,
    Space,
}

impl TokenKind {
    /// Literal constants the parser turns into leaves
    pub fn is_constant(self) -> bool {
        matches!(
            self,
            TokenKind::Bool
                | TokenKind::Char
                | TokenKind::Complex
                | TokenKind::Number
                | TokenKind::String
                | TokenKind::RawString
        )
    }

    /// Whitespace, newlines and comments
    pub fn is_trivia(self) -> bool {
        matches!(
            self,
            TokenKind::Comment | TokenKind::Newline | TokenKind::Space
        )
    }

    /// Tokens after which the stream is closed
    pub fn is_terminal(self) -> bool {
        matches!(self, TokenKind::Eof | TokenKind::Error)
    }
}

/// A scanned token.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character in the input
    pub offset: usize,
    /// Source text, or the message for [`TokenKind::Error`]
    pub text: String,
}

impl Token {
    pub fn new(kind: TokenKind, offset: usize, text: impl Into<String>) -> Self {
        Token {
            kind,
            offset,
            text: text.into(),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Eof => write!(f, "EOF"),
            TokenKind::Error => write!(f, "{}", self.text),
            _ if self.text.chars().count() > 10 => {
                let head: String = self.text.chars().take(10).collect();
                write!(f, "{head:?}...")
            }
            _ => write!(f, "{:?}", self.text),
        }
    }
}

/// 1-based line and column (in characters) of a byte offset.
///
/// Offsets past the end of `input` report the position just after the last character.
pub fn line_col(input: &str, offset: usize) -> (usize, usize) {
    let mut end = offset.min(input.len());
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    let before = &input[..end];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    let column = before[line_start..].chars().count() + 1;
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_table_lookup() {
        let test_cases = vec![
            (":", Some(Keyword::Assign)),
            ("lambda", Some(Keyword::Function)),
            ("list", Some(Keyword::List)),
            ("lazy", Some(Keyword::Lazy)),
            ("eval", Some(Keyword::Eval)),
            ("print", Some(Keyword::Print)),
            ("time", Some(Keyword::Time)),
            ("cmp", Some(Keyword::Cmp)),
            ("+", Some(Keyword::Add)),
            ("%", Some(Keyword::Mod)),
            ("^", Some(Keyword::Xor)),
            (">=", Some(Keyword::Ge)),
            ("<=", Some(Keyword::Le)),
            ("call", None),
            ("fact", None),
            ("", None),
            ("=>", None),
        ];

        for (i, (word, expected)) in test_cases.iter().enumerate() {
            assert_eq!(
                Keyword::lookup(word),
                *expected,
                "Keyword test #{}: lookup of {word:?}",
                i + 1
            );
            assert_eq!(is_keyword(word), expected.is_some());
        }
    }

    #[test]
    fn test_keyword_spelling_round_trip() {
        for &(spelling, keyword) in KEYWORD_TABLE {
            assert_eq!(keyword.spelling(), spelling);
            assert_eq!(Keyword::lookup(keyword.spelling()), Some(keyword));
        }
        assert_eq!(Keyword::Call.spelling(), "call");
    }

    #[test]
    fn test_keyword_categories() {
        assert!(Keyword::Add.is_arithmetic());
        assert!(Keyword::Xor.is_arithmetic());
        assert!(!Keyword::Cmp.is_arithmetic());
        assert!(Keyword::Le.is_comparison());
        assert!(!Keyword::Assign.is_comparison());
        assert!(!Keyword::Call.is_arithmetic() && !Keyword::Call.is_comparison());
    }

    #[test]
    fn test_token_kind_predicates() {
        assert!(TokenKind::RawString.is_constant());
        assert!(TokenKind::Complex.is_constant());
        assert!(!TokenKind::Variable.is_constant());
        assert!(TokenKind::Comment.is_trivia());
        assert!(!TokenKind::EndList.is_trivia());
        assert!(TokenKind::Error.is_terminal());
        assert!(TokenKind::Eof.is_terminal());
        assert!(!TokenKind::Keyword(Keyword::Add).is_terminal());
    }

    #[test]
    fn test_token_display() {
        assert_eq!(Token::new(TokenKind::Eof, 3, "").to_string(), "EOF");
        assert_eq!(
            Token::new(TokenKind::Error, 0, "unclosed comment").to_string(),
            "unclosed comment"
        );
        assert_eq!(Token::new(TokenKind::Number, 0, "42").to_string(), "\"42\"");
        assert_eq!(
            Token::new(TokenKind::String, 0, "\"a long string literal\"").to_string(),
            "\"\\\"a long st\"..."
        );
    }

    #[test]
    fn test_line_col() {
        let input = "(: x 1)\n(+ x\n   2)";
        assert_eq!(line_col(input, 0), (1, 1));
        assert_eq!(line_col(input, 3), (1, 4));
        assert_eq!(line_col(input, 8), (2, 1));
        assert_eq!(line_col(input, 16), (3, 4));
        assert_eq!(line_col(input, 1000), (3, 6));
        // Multi-byte characters count as one column
        assert_eq!(line_col("(é x)", 4), (1, 4));
    }
}
