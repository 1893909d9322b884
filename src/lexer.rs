//! Character-level tokenizer.
//!
//! [`Lexer`] is a state machine over byte positions in the input. Each state consumes
//! some input, queues at most a few tokens, and names the next state. Keywords are only
//! recognized as the first word of a freshly opened list; any other leading word is
//! backtracked over and lexed as an ordinary element. The lexer tracks parenthesis
//! depth itself so it knows when a list closes and scanning returns to the outer level.
//!
//! Lexical failures produce a single [`TokenKind::Error`] token carrying the message,
//! after which the stream ends. Running out of input inside a list is not lexical: the
//! lexer emits [`TokenKind::Eof`] and leaves the unbalanced list to the parser.
//!
//! [`tokenize`] wraps a lexer in a [`TokenStream`]. With the `threaded` feature the
//! lexer runs on its own thread and hands tokens over a bounded channel.

use std::collections::VecDeque;

use log::trace;
use nom::{
    IResult, Parser,
    branch::alt,
    character::complete::{char, digit0, digit1, hex_digit1, one_of},
    combinator::{opt, recognize},
};

use crate::token::{Keyword, Token, TokenKind, is_keyword};

/// Lexer options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LexerConfig {
    /// Emit `Space`, `Newline` and `Comment` tokens instead of dropping them
    pub keep_trivia: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    OutsideList,
    ListDelimiter,
    CheckKeyword,
    Keyword,
    InsideList,
    Whitespace,
    Identifier,
    Number,
    Quote,
    RawQuote,
    Char,
    Comment,
    Done,
}

/// Pull-based tokenizer over a borrowed input string.
pub struct Lexer<'a> {
    input: &'a str,
    config: LexerConfig,
    state: State,
    /// Start of the token being scanned
    start: usize,
    /// Current position
    pos: usize,
    /// Width of the last character read, for `backup`
    width: usize,
    paren_depth: usize,
    pending: VecDeque<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self::with_config(input, LexerConfig::default())
    }

    pub fn with_config(input: &'a str, config: LexerConfig) -> Self {
        Lexer {
            input,
            config,
            state: State::OutsideList,
            start: 0,
            pos: 0,
            width: 0,
            paren_depth: 0,
            pending: VecDeque::new(),
        }
    }

    fn next_char(&mut self) -> Option<char> {
        match self.input[self.pos..].chars().next() {
            Some(c) => {
                self.width = c.len_utf8();
                self.pos += self.width;
                Some(c)
            }
            None => {
                self.width = 0;
                None
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    /// Step back over the last character read. Only valid once per `next_char`.
    fn backup(&mut self) {
        self.pos -= self.width;
        self.width = 0;
    }

    fn emit(&mut self, kind: TokenKind) {
        let token = Token::new(kind, self.start, &self.input[self.start..self.pos]);
        trace!("token {kind:?} {token} at {}", token.offset);
        self.pending.push_back(token);
        self.start = self.pos;
    }

    fn ignore(&mut self) {
        self.start = self.pos;
    }

    /// Emit pending trivia if configured to, otherwise drop it
    fn trivia(&mut self, kind: TokenKind) {
        if self.start == self.pos {
            return;
        }
        if self.config.keep_trivia {
            self.emit(kind);
        } else {
            self.ignore();
        }
    }

    /// Queue a terminal error token and stop scanning
    fn error(&mut self, offset: usize, message: String) -> State {
        trace!("lexical error at {offset}: {message}");
        self.pending
            .push_back(Token::new(TokenKind::Error, offset, message));
        State::Done
    }

    /// State to return to after a token, based on paren depth
    fn resume(&self) -> State {
        if self.paren_depth == 0 {
            State::OutsideList
        } else {
            State::InsideList
        }
    }

    fn step(&mut self, state: State) -> State {
        match state {
            State::OutsideList => self.lex_outside_list(),
            State::ListDelimiter => self.lex_list_delimiter(),
            State::CheckKeyword => self.check_keyword(),
            State::Keyword => self.lex_keyword(),
            State::InsideList => self.lex_inside_list(),
            State::Whitespace => self.lex_whitespace(),
            State::Identifier => self.lex_identifier(),
            State::Number => self.lex_number(),
            State::Quote => self.lex_quote(),
            State::RawQuote => self.lex_raw_quote(),
            State::Char => self.lex_char(),
            State::Comment => self.lex_comment(),
            State::Done => State::Done,
        }
    }

    /// Scan between top-level lists, where only whitespace and comments may appear.
    fn lex_outside_list(&mut self) -> State {
        loop {
            match self.next_char() {
                None => {
                    self.trivia(TokenKind::Space);
                    self.emit(TokenKind::Eof);
                    return State::Done;
                }
                Some(c) if is_space(c) || is_end_of_line(c) => {}
                Some('(') => {
                    self.backup();
                    self.trivia(TokenKind::Space);
                    return State::ListDelimiter;
                }
                Some('/') if matches!(self.peek(), Some('/' | '*')) => {
                    self.backup();
                    self.trivia(TokenKind::Space);
                    self.next_char();
                    return State::Comment;
                }
                Some(')') => {
                    let offset = self.pos - 1;
                    return self.error(offset, "unexpected right paren ')'".into());
                }
                Some(c) => {
                    let offset = self.pos - self.width;
                    return self.error(offset, format!("unexpected nonlist item: {c:?}"));
                }
            }
        }
    }

    fn lex_list_delimiter(&mut self) -> State {
        match self.next_char() {
            Some('(') => {
                self.paren_depth += 1;
                self.emit(TokenKind::BeginList);
                State::CheckKeyword
            }
            Some(')') => {
                if self.paren_depth == 0 {
                    let offset = self.start;
                    return self.error(offset, "unexpected right paren ')'".into());
                }
                self.paren_depth -= 1;
                self.emit(TokenKind::EndList);
                self.resume()
            }
            other => {
                let offset = self.start;
                self.error(offset, format!("unexpected nonlist item: {}", describe(other)))
            }
        }
    }

    /// The first word of a list may be a keyword. Anything else is rescanned as an element.
    fn check_keyword(&mut self) -> State {
        loop {
            while matches!(self.peek(), Some(c) if is_space(c) || is_end_of_line(c)) {
                self.next_char();
            }
            self.trivia(TokenKind::Space);

            if self.peek() != Some('/') {
                break;
            }
            self.next_char();
            if !matches!(self.peek(), Some('/' | '*')) {
                self.backup();
                break;
            }
            if let Some(failed) = self.skip_comment() {
                return failed;
            }
        }

        while matches!(self.peek(), Some(c) if !is_word_break(c)) {
            self.next_char();
        }
        if is_keyword(&self.input[self.start..self.pos]) {
            State::Keyword
        } else {
            self.pos = self.start;
            self.width = 0;
            State::InsideList
        }
    }

    fn lex_keyword(&mut self) -> State {
        let word = &self.input[self.start..self.pos];
        match Keyword::lookup(word) {
            Some(keyword) => {
                self.emit(TokenKind::Keyword(keyword));
                State::InsideList
            }
            None => {
                let offset = self.start;
                self.error(offset, format!("unexpected inoperative list: {word:?}"))
            }
        }
    }

    fn lex_inside_list(&mut self) -> State {
        match self.next_char() {
            // The parser reports the unclosed list.
            None => {
                self.emit(TokenKind::Eof);
                State::Done
            }
            Some(c) if is_space(c) => State::Whitespace,
            Some(c) if is_end_of_line(c) => {
                self.trivia(TokenKind::Newline);
                State::InsideList
            }
            Some('(' | ')') => {
                self.backup();
                State::ListDelimiter
            }
            Some('/') => State::Comment,
            Some('"') => State::Quote,
            Some('`') => State::RawQuote,
            Some('\'') => State::Char,
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => {
                self.backup();
                State::Number
            }
            Some(c) if is_alphanumeric(c) => {
                self.backup();
                State::Identifier
            }
            Some(c) => {
                let offset = self.start;
                self.error(offset, format!("unrecognized character in list: {c:?}"))
            }
        }
    }

    /// One space has already been consumed
    fn lex_whitespace(&mut self) -> State {
        while matches!(self.peek(), Some(c) if is_space(c)) {
            self.next_char();
        }
        self.trivia(TokenKind::Space);
        State::InsideList
    }

    fn lex_identifier(&mut self) -> State {
        while matches!(self.peek(), Some(c) if is_alphanumeric(c)) {
            self.next_char();
        }
        match &self.input[self.start..self.pos] {
            "true" | "false" => self.emit(TokenKind::Bool),
            _ => self.emit(TokenKind::Variable),
        }
        State::InsideList
    }

    /// Decimal, hex, float or imaginary, optionally followed by a signed imaginary part.
    fn lex_number(&mut self) -> State {
        let Some(len) = scan_number(&self.input[self.start..]) else {
            return self.bad_number();
        };
        self.pos = self.start + len;

        if matches!(self.peek(), Some('+' | '-')) {
            // Complex: 1+2i. No spaces, must end in 'i'.
            match scan_number(&self.input[self.pos..]) {
                Some(tail) if self.input[self.pos..self.pos + tail].ends_with('i') => {
                    self.pos += tail;
                    self.emit(TokenKind::Complex);
                }
                Some(tail) => {
                    self.pos += tail;
                    return self.bad_number();
                }
                None => {
                    self.next_char();
                    return self.bad_number();
                }
            }
        } else {
            self.emit(TokenKind::Number);
        }
        State::InsideList
    }

    fn bad_number(&mut self) -> State {
        while matches!(self.peek(), Some(c) if is_alphanumeric(c) || c == '.' || c == '+' || c == '-')
        {
            self.next_char();
        }
        let offset = self.start;
        let text = &self.input[self.start..self.pos];
        self.error(offset, format!("bad number syntax: {text:?}"))
    }

    /// The opening quote has already been consumed
    fn lex_quote(&mut self) -> State {
        loop {
            match self.next_char() {
                Some('\\') => {
                    if matches!(self.next_char(), None | Some('\n')) {
                        let offset = self.start;
                        return self.error(offset, "unterminated quoted string".into());
                    }
                }
                None | Some('\n') => {
                    let offset = self.start;
                    return self.error(offset, "unterminated quoted string".into());
                }
                Some('"') => break,
                Some(_) => {}
            }
        }
        self.emit(TokenKind::String);
        State::InsideList
    }

    fn lex_raw_quote(&mut self) -> State {
        loop {
            match self.next_char() {
                None | Some('\n') => {
                    let offset = self.start;
                    return self.error(offset, "unterminated raw quoted string".into());
                }
                Some('`') => break,
                Some(_) => {}
            }
        }
        self.emit(TokenKind::RawString);
        State::InsideList
    }

    /// Syntax of the character itself is checked by the parser
    fn lex_char(&mut self) -> State {
        loop {
            match self.next_char() {
                Some('\\') => {
                    if matches!(self.next_char(), None | Some('\n')) {
                        let offset = self.start;
                        return self.error(offset, "unterminated character constant".into());
                    }
                }
                None | Some('\n') => {
                    let offset = self.start;
                    return self.error(offset, "unterminated character constant".into());
                }
                Some('\'') => break,
                Some(_) => {}
            }
        }
        self.emit(TokenKind::Char);
        State::InsideList
    }

    /// The leading '/' has already been consumed
    fn lex_comment(&mut self) -> State {
        match self.skip_comment() {
            Some(failed) => failed,
            None => self.resume(),
        }
    }

    /// Scan the rest of a comment whose leading `/` is already consumed. Returns the
    /// error state if the comment is malformed.
    fn skip_comment(&mut self) -> Option<State> {
        match self.next_char() {
            Some('/') => {
                while matches!(self.peek(), Some(c) if !is_end_of_line(c)) {
                    self.next_char();
                }
            }
            Some('*') => loop {
                match self.next_char() {
                    None => {
                        let offset = self.start;
                        return Some(self.error(offset, "unterminated comment".into()));
                    }
                    Some('*') if self.peek() == Some('/') => {
                        self.next_char();
                        break;
                    }
                    Some(_) => {}
                }
            },
            other => {
                let offset = self.start;
                return Some(self.error(
                    offset,
                    format!("unexpected noncomment in list: {}", describe(other)),
                ));
            }
        }
        self.trivia(TokenKind::Comment);
        None
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Some(token);
            }
            if self.state == State::Done {
                return None;
            }
            self.state = self.step(self.state);
        }
    }
}

fn number_literal(input: &str) -> IResult<&str, &str> {
    recognize((
        opt(one_of("+-")),
        alt((hex_literal, decimal_literal)),
        opt(char('i')),
    ))
    .parse(input)
}

fn hex_literal(input: &str) -> IResult<&str, &str> {
    recognize((char('0'), one_of("xX"), hex_digit1)).parse(input)
}

fn decimal_literal(input: &str) -> IResult<&str, &str> {
    recognize((
        alt((
            recognize((digit1, opt((char('.'), digit0)))),
            recognize((char('.'), digit1)),
        )),
        opt((one_of("eE"), opt(one_of("+-")), digit1)),
    ))
    .parse(input)
}

/// Length of the number literal at the start of `input`.
/// The literal must not run straight into an alphanumeric character.
fn scan_number(input: &str) -> Option<usize> {
    let (rest, literal) = number_literal(input).ok()?;
    match rest.chars().next() {
        Some(c) if is_alphanumeric(c) => None,
        _ => Some(literal.len()),
    }
}

fn is_space(c: char) -> bool {
    c == ' ' || c == '\t'
}

fn is_end_of_line(c: char) -> bool {
    c == '\r' || c == '\n'
}

fn is_alphanumeric(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

fn is_word_break(c: char) -> bool {
    is_space(c) || is_end_of_line(c) || c == '(' || c == ')'
}

fn describe(c: Option<char>) -> String {
    match c {
        Some(c) => format!("{c:?}"),
        None => "end of input".into(),
    }
}

/// Ordered tokens from [`tokenize`].
///
/// Yields tokens up to and including the terminal `Eof` or `Error` token.
pub struct TokenStream<'a> {
    source: Source<'a>,
}

enum Source<'a> {
    Inline(Lexer<'a>),
    #[cfg(feature = "threaded")]
    Channel {
        receiver: crossbeam_channel::Receiver<Token>,
        _input: std::marker::PhantomData<&'a str>,
    },
}

impl Iterator for TokenStream<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        match &mut self.source {
            Source::Inline(lexer) => lexer.next(),
            #[cfg(feature = "threaded")]
            Source::Channel { receiver, .. } => receiver.recv().ok(),
        }
    }
}

/// Tokenize `text` with the default configuration
pub fn tokenize(text: &str) -> TokenStream<'_> {
    tokenize_with_config(text, LexerConfig::default())
}

/// Tokenize `text`, streaming tokens from a lexer thread when the `threaded` feature is on.
pub fn tokenize_with_config(text: &str, config: LexerConfig) -> TokenStream<'_> {
    #[cfg(feature = "threaded")]
    match spawn_lexer(text.to_owned(), config) {
        Ok(receiver) => {
            return TokenStream {
                source: Source::Channel {
                    receiver,
                    _input: std::marker::PhantomData,
                },
            };
        }
        Err(err) => log::warn!("could not start lexer thread, lexing inline: {err}"),
    }

    TokenStream {
        source: Source::Inline(Lexer::with_config(text, config)),
    }
}

/// Run a lexer on its own thread. The thread stops when the input is exhausted or the
/// receiving side is dropped.
#[cfg(feature = "threaded")]
fn spawn_lexer(
    input: String,
    config: LexerConfig,
) -> std::io::Result<crossbeam_channel::Receiver<Token>> {
    let (sender, receiver) = crossbeam_channel::bounded(crate::TOKEN_CHANNEL_CAPACITY);
    std::thread::Builder::new()
        .name("lexer".into())
        .spawn(move || {
            for token in Lexer::with_config(&input, config) {
                if sender.send(token).is_err() {
                    trace!("token stream dropped, lexer thread stopping");
                    break;
                }
            }
        })?;
    Ok(receiver)
}
