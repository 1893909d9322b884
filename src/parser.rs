//! Token stream to tree.
//!
//! The parser reads tokens with a single token of pushback. Each top-level list becomes
//! one child of the program container. While a list is open, the insertion point for new
//! children is found by walking the last-child chain from the root as many levels as
//! there are open lists, so the parser never needs parent pointers.

use log::debug;

use crate::lexer::tokenize;
use crate::token::{Token, TokenKind};
use crate::tree::{Node, Tree};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Between forms: only `(` or end of input
    TopLevel,
    /// Just after `(`: the next token decides the kind of list
    ListHead,
    /// Collecting children of the innermost open list
    InsideForm,
}

/// Incremental parser yielding one top-level form at a time.
///
/// Each item is a container holding the single parsed form. Iteration stops after the
/// first error.
pub struct Parser<I> {
    tokens: I,
    pushback: Option<Token>,
    /// End of the last token read, reported for a missing end of input
    end_offset: usize,
    finished: bool,
}

impl<I: Iterator<Item = Token>> Parser<I> {
    pub fn new<T>(tokens: T) -> Self
    where
        T: IntoIterator<Item = Token, IntoIter = I>,
    {
        Parser {
            tokens: tokens.into_iter(),
            pushback: None,
            end_offset: 0,
            finished: false,
        }
    }

    /// Next non-trivia token. A stream that runs dry reads as end of input.
    fn next_token(&mut self) -> Token {
        if let Some(token) = self.pushback.take() {
            return token;
        }
        loop {
            match self.tokens.next() {
                Some(token) if token.kind.is_trivia() => {}
                Some(token) => {
                    self.end_offset = token.offset + token.text.len();
                    return token;
                }
                None => return Token::new(TokenKind::Eof, self.end_offset, ""),
            }
        }
    }

    fn backup(&mut self, token: Token) {
        self.pushback = Some(token);
    }

    /// Parse one top-level form. Returns `None` at a clean end of input.
    fn parse_form(&mut self) -> Result<Option<Tree>, Error> {
        let mut root = Tree::default();
        let mut depth = 0;
        let mut state = State::TopLevel;

        loop {
            let token = self.next_token();
            if token.kind == TokenKind::Error {
                return Err(
                    ParseError::at(ParseErrorKind::Lexical, token.text, token.offset, None).into(),
                );
            }

            match state {
                State::TopLevel => match token.kind {
                    TokenKind::Eof => return Ok(None),
                    TokenKind::BeginList => state = State::ListHead,
                    _ => {
                        return Err(unexpected(&token, "expected '(' at top level"));
                    }
                },

                State::ListHead => {
                    let node = match token.kind {
                        TokenKind::Keyword(op) => Some(Node::keyword(op)),
                        TokenKind::Variable => Some(Node::call(token.text)),
                        TokenKind::EndList => {
                            return Err(ParseError::at(
                                ParseErrorKind::InvalidSyntax,
                                "empty list",
                                token.offset,
                                Some("()".into()),
                            )
                            .into());
                        }
                        TokenKind::Eof => return Err(incomplete(&token, depth + 1)),
                        _ => {
                            self.backup(token);
                            None
                        }
                    };

                    depth += 1;
                    if depth > MAX_PARSE_DEPTH {
                        return Err(ParseError::from_message(
                            ParseErrorKind::TooDeeplyNested,
                            format!("lists nested deeper than {MAX_PARSE_DEPTH} levels"),
                        )
                        .into());
                    }
                    insertion_point(&mut root, depth - 1)?.push(Tree {
                        node,
                        children: Vec::new(),
                    });
                    state = State::InsideForm;
                }

                State::InsideForm => match token.kind {
                    TokenKind::BeginList => state = State::ListHead,
                    TokenKind::EndList => {
                        depth -= 1;
                        if depth == 0 {
                            debug!("parsed form {root}");
                            return Ok(Some(root));
                        }
                    }
                    TokenKind::Eof => return Err(incomplete(&token, depth)),
                    TokenKind::Variable => {
                        insertion_point(&mut root, depth)?.append(Node::variable(token.text));
                    }
                    kind if kind.is_constant() => {
                        let node = literal(&token)?;
                        insertion_point(&mut root, depth)?.append(node);
                    }
                    _ => {
                        return Err(unexpected(&token, "keyword is only valid at the head of a list"));
                    }
                },
            }
        }
    }
}

impl<I: Iterator<Item = Token>> Iterator for Parser<I> {
    type Item = Result<Tree, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.parse_form() {
            Ok(Some(form)) => Some(Ok(form)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn insertion_point(root: &mut Tree, depth: usize) -> Result<&mut Tree, Error> {
    root.walk_mut(depth).ok_or_else(|| {
        ParseError::from_message(
            ParseErrorKind::InvalidSyntax,
            format!("no open list at depth {depth}"),
        )
        .into()
    })
}

fn unexpected(token: &Token, message: &str) -> Error {
    ParseError::at(
        ParseErrorKind::InvalidSyntax,
        message,
        token.offset,
        Some(token.to_string()),
    )
    .into()
}

fn incomplete(token: &Token, open: usize) -> Error {
    ParseError::at(
        ParseErrorKind::Incomplete,
        format!("unexpected end of input with {open} unclosed list(s)"),
        token.offset,
        Some(token.to_string()),
    )
    .into()
}

/// Parse a whole token stream into a program container, one child per top-level list.
pub fn parse(tokens: impl IntoIterator<Item = Token>) -> Result<Tree, Error> {
    let mut program = Tree::default();
    for form in Parser::new(tokens) {
        program.children.extend(form?.children);
    }
    if program.children.is_empty() {
        return Err(ParseError::from_message(ParseErrorKind::InvalidSyntax, "empty input").into());
    }
    Ok(program)
}

/// Tokenize and parse `text`, attaching source context to any parse error
pub fn parse_str(text: &str) -> Result<Tree, Error> {
    parse(tokenize(text)).map_err(|e| e.with_source(text))
}

/// Convert a literal token to a leaf node
fn literal(token: &Token) -> Result<Node, Error> {
    let text = token.text.as_str();
    let fail = |kind: ParseErrorKind, message: String| -> Error {
        ParseError::at(kind, message, token.offset, Some(token.to_string())).into()
    };

    match token.kind {
        TokenKind::Bool => Ok(Node::Number(if text == "true" { 1.0 } else { 0.0 })),
        TokenKind::Complex => Err(fail(
            ParseErrorKind::Unsupported,
            format!("complex literal {text} is not supported"),
        )),
        TokenKind::Number if text.ends_with('i') => Err(fail(
            ParseErrorKind::Unsupported,
            format!("imaginary literal {text} is not supported"),
        )),
        TokenKind::Number => parse_number(text).map(Node::Number).map_err(|(kind, msg)| fail(kind, msg)),
        TokenKind::String => unescape(strip(text, '"'))
            .map(Node::Text)
            .map_err(|msg| fail(ParseErrorKind::InvalidSyntax, msg)),
        TokenKind::RawString => Ok(Node::Text(strip(text, '`').to_owned())),
        TokenKind::Char => {
            let decoded =
                unescape(strip(text, '\'')).map_err(|msg| fail(ParseErrorKind::InvalidSyntax, msg))?;
            if decoded.chars().count() == 1 {
                Ok(Node::Text(decoded))
            } else {
                Err(fail(
                    ParseErrorKind::InvalidSyntax,
                    format!("character literal {text} must hold exactly one character"),
                ))
            }
        }
        kind => Err(fail(
            ParseErrorKind::InvalidSyntax,
            format!("{kind:?} token is not a literal"),
        )),
    }
}

/// Strip one delimiter from each end of a quoted literal
fn strip(text: &str, quote: char) -> &str {
    let text = text.strip_prefix(quote).unwrap_or(text);
    text.strip_suffix(quote).unwrap_or(text)
}

fn parse_number(text: &str) -> Result<f64, (ParseErrorKind, String)> {
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        let n = i64::from_str_radix(hex, 16).map_err(|_| {
            (
                ParseErrorKind::ImplementationLimit,
                format!("hex literal {text} is out of range"),
            )
        })?;
        let value = n as f64;
        return Ok(if negative { -value } else { value });
    }

    text.parse::<f64>().map_err(|_| {
        (
            ParseErrorKind::InvalidSyntax,
            format!("invalid number {text}"),
        )
    })
}

/// Decode backslash escapes
fn unescape(body: &str) -> Result<String, String> {
    let mut result = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some('0') => result.push('\0'),
            Some('\\') => result.push('\\'),
            Some('"') => result.push('"'),
            Some('\'') => result.push('\''),
            Some(other) => return Err(format!("unknown escape sequence \\{other}")),
            None => return Err("incomplete escape sequence".into()),
        }
    }
    Ok(result)
}
