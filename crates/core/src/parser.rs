//! Concrete parser: token stream to CST.
//!
//! Each production is an explicit state machine over the token vector.
//! Inside bracketed forms end-of-line tokens are ignored; at the top level
//! they delimit alias, import, module, namespace, and comment productions.
//! The first unexpected token is reported through the sink in the caret
//! format and the top-level parse fails.

use crate::concrete::{ConcreteElement, ConcreteKind};
use crate::error::{Diagnostic, DiagnosticSink, Error};
use crate::token::{Lexeme, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AliasState {
    Ready,
    Keyword,
    First,
    Second,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommentState {
    Ready,
    Comment,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocState {
    Ready,
    Marker,
    Between,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportState {
    Ready,
    Keyword,
    Identifier,
    Dot,
    Namespace,
    From,
    As,
    Alias,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathState {
    Ready,
    Keyword,
    Identifier,
    Dot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleState {
    Ready,
    InBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternState {
    Ready,
    HasElement,
    Binding,
    HasRepeatingElement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepetitionState {
    Ready,
    HasLowerBound,
    Comma,
    HasBothBounds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchState {
    Ready,
    InHead,
    HasDiscriminant,
    HasHead,
    InBody,
    HasElement,
    Binding,
    HasBoundElement,
    HasRepeatingElement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageState {
    Ready,
    SingleIdentifier,
    Binding,
    ListReady,
    InList,
    ListIdentifier,
    ListBinding,
}

/// True for lexemes that can begin a pattern element.
fn starts_pattern_element(lexeme: Lexeme) -> bool {
    matches!(
        lexeme,
        Lexeme::Identifier
            | Lexeme::BinaryLiteral
            | Lexeme::BinaryPattern
            | Lexeme::DecimalLiteral
            | Lexeme::HexadecimalLiteral
            | Lexeme::HexadecimalPattern
            | Lexeme::OctalLiteral
            | Lexeme::OctalPattern
            | Lexeme::StringLiteral
    )
}

/// True for lexemes that end a pattern element and belong to the caller.
fn ends_pattern_element(lexeme: Lexeme) -> bool {
    matches!(
        lexeme,
        Lexeme::Match
            | Lexeme::BitwiseOr
            | Lexeme::OpenParen
            | Lexeme::CloseParen
            | Lexeme::Decode
            | Lexeme::Encode
            | Lexeme::Storage
            | Lexeme::Validate
            | Lexeme::CloseCurly
    ) || starts_pattern_element(lexeme)
}

/// Lexemes permitted as match case keys.
fn is_match_key(lexeme: Lexeme) -> bool {
    matches!(
        lexeme,
        Lexeme::Identifier
            | Lexeme::BinaryLiteral
            | Lexeme::DecimalLiteral
            | Lexeme::HexadecimalLiteral
            | Lexeme::OctalLiteral
            | Lexeme::StringLiteral
    )
}

/// Lexemes permitted as repetition bounds.
fn is_bound(lexeme: Lexeme) -> bool {
    matches!(
        lexeme,
        Lexeme::Identifier
            | Lexeme::BinaryLiteral
            | Lexeme::OctalLiteral
            | Lexeme::DecimalLiteral
            | Lexeme::HexadecimalLiteral
    )
}

/// Tokens allowed inside an s-expression besides parentheses.
fn allowed_in_sexpr(lexeme: Lexeme) -> bool {
    lexeme == Lexeme::Dot
        || lexeme == Lexeme::BitwiseNot
        || lexeme == Lexeme::StringLiteral
        || lexeme.is_operator()
        || lexeme.is_numeric(false)
}

pub struct Parser<'t, 'd> {
    tokens: &'t [Token],
    pos: usize,
    sink: &'d mut dyn DiagnosticSink,
}

/// Parse a token vector into a CST root.
pub fn parse(
    tokens: &[Token],
    sink: &mut dyn DiagnosticSink,
) -> Result<ConcreteElement, Error> {
    Parser {
        tokens,
        pos: 0,
        sink,
    }
    .parse_root()
}

impl<'t, 'd> Parser<'t, 'd> {
    fn parse_root(&mut self) -> Result<ConcreteElement, Error> {
        let mut roots = Vec::new();

        while self.pos < self.tokens.len() {
            match self.tokens[self.pos].lexeme() {
                Lexeme::EndOfLine => self.pos += 1,
                Lexeme::Alias => roots.push(self.parse_alias()?),
                Lexeme::Comment => roots.push(self.parse_comment_run()?),
                Lexeme::DocStart | Lexeme::DocEnd => roots.push(self.parse_documentation()?),
                Lexeme::Identifier => roots.push(self.parse_rule()?),
                Lexeme::Import => roots.push(self.parse_import()?),
                Lexeme::Module => roots.push(self.parse_path(Lexeme::Module, ConcreteKind::Module)?),
                Lexeme::Namespace => {
                    roots.push(self.parse_path(Lexeme::Namespace, ConcreteKind::Namespace)?)
                }
                _ => return Err(self.fail_here()),
            }
        }

        Ok(ConcreteElement::compound(ConcreteKind::Root, roots))
    }

    // -- helpers ------------------------------------------------

    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn leaf_here(&self) -> ConcreteElement {
        ConcreteElement::leaf(self.current().clone())
    }

    /// Clone tokens `[start, end)` into leaves.
    fn leaves(&self, start: usize, end: usize) -> Vec<ConcreteElement> {
        self.tokens[start..end]
            .iter()
            .cloned()
            .map(ConcreteElement::leaf)
            .collect()
    }

    /// Same, but dropping end-of-line tokens.
    fn leaves_no_eol(&self, start: usize, end: usize) -> Vec<ConcreteElement> {
        self.tokens[start..end]
            .iter()
            .filter(|t| !t.is(Lexeme::EndOfLine))
            .cloned()
            .map(ConcreteElement::leaf)
            .collect()
    }

    fn fail_here(&mut self) -> Error {
        let token = &self.tokens[self.pos];
        self.sink.report(Diagnostic::unexpected_token(token));
        Error::syntax(token)
    }

    fn fail_eof(&mut self) -> Error {
        let token = self
            .tokens
            .last()
            .expect("token stream cannot be empty mid-production");
        self.sink
            .report(Diagnostic::error(token, "Unexpected end of input"));
        Error::syntax(token)
    }

    // -- top-level productions ----------------------------------

    /// `@alias <identifier> <identifier>` terminated by end of line. The
    /// end-of-line token itself is left for the caller.
    fn parse_alias(&mut self) -> Result<ConcreteElement, Error> {
        let start = self.pos;
        let mut state = AliasState::Ready;

        while self.pos < self.tokens.len() {
            let token = self.current();
            state = match state {
                AliasState::Ready if token.is(Lexeme::Alias) => AliasState::Keyword,
                AliasState::Keyword if token.is(Lexeme::Identifier) => AliasState::First,
                AliasState::First if token.is(Lexeme::Identifier) => AliasState::Second,
                AliasState::Second if token.is(Lexeme::EndOfLine) => {
                    return Ok(ConcreteElement::compound(
                        ConcreteKind::Alias,
                        self.leaves(start, self.pos),
                    ));
                }
                _ => return Err(self.fail_here()),
            };
            self.pos += 1;
        }

        Err(self.fail_eof())
    }

    /// Consecutive single-line comments separated only by line ends merge
    /// into one comment node.
    fn parse_comment_run(&mut self) -> Result<ConcreteElement, Error> {
        let start = self.pos;
        let mut state = CommentState::Ready;

        while self.pos < self.tokens.len() {
            let token = self.current();
            state = match state {
                CommentState::Ready if token.is(Lexeme::Comment) => CommentState::Comment,
                CommentState::Comment if token.is(Lexeme::EndOfLine) => CommentState::Complete,
                CommentState::Complete => {
                    if token.is(Lexeme::Comment) {
                        CommentState::Comment
                    } else {
                        return Ok(ConcreteElement::compound(
                            ConcreteKind::Comment,
                            self.leaves_no_eol(start, self.pos),
                        ));
                    }
                }
                _ => return Err(self.fail_here()),
            };
            self.pos += 1;
        }

        if state == CommentState::Complete {
            return Ok(ConcreteElement::compound(
                ConcreteKind::Comment,
                self.leaves_no_eol(start, self.pos),
            ));
        }

        Err(self.fail_eof())
    }

    /// `#++` through the matching `#--`, comment lines between.
    fn parse_documentation(&mut self) -> Result<ConcreteElement, Error> {
        let start = self.pos;
        let mut state = DocState::Ready;

        while self.pos < self.tokens.len() {
            let token = self.current();
            state = match state {
                DocState::Ready if token.is(Lexeme::DocStart) => DocState::Marker,
                DocState::Marker if token.is(Lexeme::EndOfLine) => DocState::Between,
                DocState::Between => {
                    if token.is(Lexeme::Comment) {
                        DocState::Marker
                    } else if token.is(Lexeme::DocEnd) {
                        self.pos += 1;
                        return Ok(ConcreteElement::compound(
                            ConcreteKind::Documentation,
                            self.leaves_no_eol(start, self.pos),
                        ));
                    } else {
                        DocState::Between
                    }
                }
                _ => return Err(self.fail_here()),
            };
            self.pos += 1;
        }

        if state == DocState::Between {
            return Ok(ConcreteElement::compound(
                ConcreteKind::Documentation,
                self.leaves_no_eol(start, self.pos),
            ));
        }

        Err(self.fail_eof())
    }

    /// `@import <identifier> [from <identifier>] [as <identifier>]`. The
    /// words `from` and `as` are plain identifiers recognised by text.
    fn parse_import(&mut self) -> Result<ConcreteElement, Error> {
        let start = self.pos;
        let mut state = ImportState::Ready;

        while self.pos < self.tokens.len() {
            let token = self.current();
            state = match state {
                ImportState::Ready if token.is(Lexeme::Import) => ImportState::Keyword,
                ImportState::Keyword if token.is(Lexeme::Identifier) => ImportState::Identifier,
                ImportState::Identifier | ImportState::Namespace => {
                    if token.is(Lexeme::Dot) {
                        ImportState::Dot
                    } else if token.is(Lexeme::EndOfLine) {
                        return Ok(ConcreteElement::compound(
                            ConcreteKind::Import,
                            self.leaves(start, self.pos),
                        ));
                    } else if state == ImportState::Identifier && token.text() == "from" {
                        ImportState::From
                    } else if token.text() == "as" {
                        ImportState::As
                    } else {
                        return Err(self.fail_here());
                    }
                }
                ImportState::From | ImportState::Dot if token.is(Lexeme::Identifier) => {
                    ImportState::Namespace
                }
                ImportState::As if token.is(Lexeme::Identifier) => ImportState::Alias,
                ImportState::Alias if token.is(Lexeme::EndOfLine) => {
                    return Ok(ConcreteElement::compound(
                        ConcreteKind::Import,
                        self.leaves(start, self.pos),
                    ));
                }
                _ => return Err(self.fail_here()),
            };
            self.pos += 1;
        }

        Err(self.fail_eof())
    }

    /// `@module`/`@namespace` followed by a dotted identifier.
    fn parse_path(&mut self, keyword: Lexeme, kind: ConcreteKind) -> Result<ConcreteElement, Error> {
        let start = self.pos;
        let mut state = PathState::Ready;

        while self.pos < self.tokens.len() {
            let token = self.current();
            state = match state {
                PathState::Ready if token.is(keyword) => PathState::Keyword,
                PathState::Keyword if token.is(Lexeme::Identifier) => PathState::Identifier,
                PathState::Identifier => {
                    if token.is(Lexeme::Dot) {
                        PathState::Dot
                    } else if token.is(Lexeme::EndOfLine) {
                        return Ok(ConcreteElement::compound(kind, self.leaves(start, self.pos)));
                    } else {
                        return Err(self.fail_here());
                    }
                }
                PathState::Dot if token.is(Lexeme::Identifier) => PathState::Identifier,
                _ => return Err(self.fail_here()),
            };
            self.pos += 1;
        }

        Err(self.fail_eof())
    }

    // -- rules --------------------------------------------------

    /// `<identifier> { <sections> }`.
    fn parse_rule(&mut self) -> Result<ConcreteElement, Error> {
        let mut parts = vec![self.leaf_here()];
        self.pos += 1;
        let mut state = RuleState::Ready;

        while self.pos < self.tokens.len() {
            let token = self.current();
            match state {
                RuleState::Ready => {
                    if token.is(Lexeme::OpenCurly) {
                        parts.push(self.leaf_here());
                        state = RuleState::InBody;
                    } else if !token.is(Lexeme::EndOfLine) {
                        return Err(self.fail_here());
                    }
                    self.pos += 1;
                }
                RuleState::InBody => match token.lexeme() {
                    Lexeme::EndOfLine => self.pos += 1,
                    Lexeme::CloseCurly => {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        return Ok(ConcreteElement::compound(ConcreteKind::Rule, parts));
                    }
                    Lexeme::Pattern => parts.push(self.parse_rule_pattern()?),
                    Lexeme::Storage => parts.push(self.parse_rule_storage()?),
                    Lexeme::Encode => parts.push(self.parse_code_section(ConcreteKind::Encode)?),
                    Lexeme::Decode => parts.push(self.parse_code_section(ConcreteKind::Decode)?),
                    Lexeme::Validate => {
                        parts.push(self.parse_code_section(ConcreteKind::Validate)?)
                    }
                    _ => return Err(self.fail_here()),
                },
            }
        }

        Err(self.fail_eof())
    }

    /// `pattern:` followed by `|`-separated alternatives. Returns with the
    /// cursor on the token that ended the section.
    fn parse_rule_pattern(&mut self) -> Result<ConcreteElement, Error> {
        let mut parts = vec![self.leaf_here()];
        self.pos += 1;
        let mut state = PatternState::Ready;

        while self.pos < self.tokens.len() {
            let token = self.current();
            if token.is(Lexeme::EndOfLine) {
                self.pos += 1;
                continue;
            }

            match state {
                PatternState::Ready => {
                    if starts_pattern_element(token.lexeme())
                        || token.is(Lexeme::OpenParen)
                        || token.is(Lexeme::Match)
                    {
                        parts.push(self.parse_pattern_element()?);
                        state = PatternState::HasElement;
                    } else {
                        return Err(self.fail_here());
                    }
                }
                PatternState::HasElement => match token.lexeme() {
                    Lexeme::BitwiseOr => {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        state = PatternState::Ready;
                    }
                    Lexeme::Decode
                    | Lexeme::Encode
                    | Lexeme::Storage
                    | Lexeme::Validate
                    | Lexeme::CloseCurly => {
                        return Ok(ConcreteElement::compound(ConcreteKind::Pattern, parts));
                    }
                    lexeme if starts_pattern_element(lexeme)
                        || lexeme == Lexeme::OpenParen
                        || lexeme == Lexeme::Match =>
                    {
                        parts.push(self.parse_pattern_element()?);
                    }
                    _ => return Err(self.fail_here()),
                },
                _ => unreachable!("pattern section uses only Ready/HasElement"),
            }
        }

        Err(self.fail_eof())
    }

    /// One pattern element: a base (literal token, list, or match form),
    /// optionally wrapped by repetition and binding. Returns with the
    /// cursor on the first token that does not belong to the element.
    fn parse_pattern_element(&mut self) -> Result<ConcreteElement, Error> {
        let mut base: Option<ConcreteElement> = None;
        let mut bind: Option<ConcreteElement> = None;
        let mut state = PatternState::Ready;

        while self.pos < self.tokens.len() {
            let token = self.current();
            if token.is(Lexeme::EndOfLine) {
                self.pos += 1;
                continue;
            }

            match state {
                PatternState::Ready => match token.lexeme() {
                    lexeme if starts_pattern_element(lexeme) => {
                        base = Some(self.leaf_here());
                        self.pos += 1;
                        state = PatternState::HasElement;
                    }
                    Lexeme::OpenParen => {
                        base = Some(self.parse_pattern_list()?);
                        state = PatternState::HasElement;
                    }
                    Lexeme::Match => {
                        base = Some(self.parse_match()?);
                        state = PatternState::HasElement;
                    }
                    _ => return Err(self.fail_here()),
                },
                PatternState::HasElement | PatternState::HasRepeatingElement => {
                    match token.lexeme() {
                        Lexeme::Bind => {
                            bind = Some(self.leaf_here());
                            self.pos += 1;
                            state = PatternState::Binding;
                        }
                        Lexeme::OpenCurly if state == PatternState::HasElement => {
                            let inner = base.take().expect("element base before repetition");
                            base = Some(self.parse_repetition(inner)?);
                            state = PatternState::HasRepeatingElement;
                        }
                        lexeme if ends_pattern_element(lexeme) => {
                            return Ok(base.take().expect("element base before terminator"));
                        }
                        _ => return Err(self.fail_here()),
                    }
                }
                PatternState::Binding => {
                    if token.is(Lexeme::Identifier) {
                        let bound = ConcreteElement::compound(
                            ConcreteKind::Bound,
                            vec![
                                base.take().expect("element base before binding"),
                                bind.take().expect("bind token before binding name"),
                                self.leaf_here(),
                            ],
                        );
                        self.pos += 1;
                        return Ok(bound);
                    }
                    return Err(self.fail_here());
                }
            }
        }

        Err(self.fail_eof())
    }

    /// Parenthesised list of pattern elements.
    fn parse_pattern_list(&mut self) -> Result<ConcreteElement, Error> {
        let mut parts = vec![self.leaf_here()];
        self.pos += 1;
        let mut state = PatternState::Ready;

        while self.pos < self.tokens.len() {
            let token = self.current();
            if token.is(Lexeme::EndOfLine) {
                self.pos += 1;
                continue;
            }

            match state {
                PatternState::Ready => {
                    if starts_pattern_element(token.lexeme())
                        || token.is(Lexeme::OpenParen)
                        || token.is(Lexeme::Match)
                    {
                        parts.push(self.parse_pattern_element()?);
                        state = PatternState::HasElement;
                    } else {
                        return Err(self.fail_here());
                    }
                }
                PatternState::HasElement => match token.lexeme() {
                    Lexeme::CloseParen => {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        return Ok(ConcreteElement::compound(ConcreteKind::List, parts));
                    }
                    lexeme if starts_pattern_element(lexeme)
                        || lexeme == Lexeme::OpenParen
                        || lexeme == Lexeme::Match =>
                    {
                        parts.push(self.parse_pattern_element()?);
                    }
                    _ => return Err(self.fail_here()),
                },
                _ => unreachable!("pattern list uses only Ready/HasElement"),
            }
        }

        Err(self.fail_eof())
    }

    /// `{min}` / `{min,max}` / `{?}` / `{*}` / `{+}` wrapping `element`.
    fn parse_repetition(
        &mut self,
        element: ConcreteElement,
    ) -> Result<ConcreteElement, Error> {
        let mut parts = vec![element, self.leaf_here()];
        self.pos += 1;
        let mut state = RepetitionState::Ready;

        while self.pos < self.tokens.len() {
            let token = self.current();
            if token.is(Lexeme::EndOfLine) {
                self.pos += 1;
                continue;
            }

            match state {
                RepetitionState::Ready => match token.lexeme() {
                    lexeme if is_bound(lexeme) => {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        state = RepetitionState::HasLowerBound;
                    }
                    Lexeme::Plus | Lexeme::Query | Lexeme::Times => {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        state = RepetitionState::HasBothBounds;
                    }
                    _ => return Err(self.fail_here()),
                },
                RepetitionState::HasLowerBound => match token.lexeme() {
                    Lexeme::Comma => {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        state = RepetitionState::Comma;
                    }
                    Lexeme::CloseCurly => {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        return Ok(ConcreteElement::compound(ConcreteKind::Repetition, parts));
                    }
                    _ => return Err(self.fail_here()),
                },
                RepetitionState::Comma => match token.lexeme() {
                    Lexeme::Plus | Lexeme::Times => {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        state = RepetitionState::HasBothBounds;
                    }
                    lexeme if is_bound(lexeme) => {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        state = RepetitionState::HasBothBounds;
                    }
                    _ => return Err(self.fail_here()),
                },
                RepetitionState::HasBothBounds => {
                    if token.is(Lexeme::CloseCurly) {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        return Ok(ConcreteElement::compound(ConcreteKind::Repetition, parts));
                    }
                    return Err(self.fail_here());
                }
            }
        }

        Err(self.fail_eof())
    }

    /// `@match (<identifier>) { <key> => <identifier> ... }`.
    fn parse_match(&mut self) -> Result<ConcreteElement, Error> {
        let mut parts = vec![self.leaf_here()];
        self.pos += 1;
        let mut state = MatchState::Ready;

        while self.pos < self.tokens.len() {
            let token = self.current();
            if token.is(Lexeme::EndOfLine) {
                self.pos += 1;
                continue;
            }

            match state {
                MatchState::Ready => {
                    if token.is(Lexeme::OpenParen) {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        state = MatchState::InHead;
                    } else {
                        return Err(self.fail_here());
                    }
                }
                MatchState::InHead => {
                    if token.is(Lexeme::Identifier) {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        state = MatchState::HasDiscriminant;
                    } else {
                        return Err(self.fail_here());
                    }
                }
                MatchState::HasDiscriminant => match token.lexeme() {
                    Lexeme::CloseParen => {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        state = MatchState::HasHead;
                    }
                    Lexeme::Dot => {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        state = MatchState::InHead;
                    }
                    _ => return Err(self.fail_here()),
                },
                MatchState::HasHead => {
                    if token.is(Lexeme::OpenCurly) {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        state = MatchState::InBody;
                    } else {
                        return Err(self.fail_here());
                    }
                }
                MatchState::InBody => match token.lexeme() {
                    lexeme if is_match_key(lexeme) => {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        state = MatchState::HasElement;
                    }
                    Lexeme::CloseCurly => {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        return Ok(ConcreteElement::compound(ConcreteKind::Match, parts));
                    }
                    _ => return Err(self.fail_here()),
                },
                MatchState::HasElement => {
                    if token.is(Lexeme::Bind) {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        state = MatchState::Binding;
                    } else {
                        return Err(self.fail_here());
                    }
                }
                MatchState::Binding => {
                    if token.is(Lexeme::Identifier) {
                        let value = self.leaf_here();
                        let bind = parts.pop().expect("bind token on the stack");
                        let key = parts.pop().expect("case key on the stack");
                        parts.push(ConcreteElement::compound(
                            ConcreteKind::Bound,
                            vec![key, bind, value],
                        ));
                        self.pos += 1;
                        state = MatchState::HasBoundElement;
                    } else {
                        return Err(self.fail_here());
                    }
                }
                MatchState::HasBoundElement | MatchState::HasRepeatingElement => {
                    match token.lexeme() {
                        lexeme if is_match_key(lexeme) => {
                            parts.push(self.leaf_here());
                            self.pos += 1;
                            state = MatchState::HasElement;
                        }
                        Lexeme::CloseCurly => {
                            parts.push(self.leaf_here());
                            self.pos += 1;
                            return Ok(ConcreteElement::compound(ConcreteKind::Match, parts));
                        }
                        Lexeme::OpenCurly if state == MatchState::HasBoundElement => {
                            let inner = parts.pop().expect("bound case before repetition");
                            parts.push(self.parse_repetition(inner)?);
                            state = MatchState::HasRepeatingElement;
                        }
                        _ => return Err(self.fail_here()),
                    }
                }
            }
        }

        Err(self.fail_eof())
    }

    /// `storage:` with a single field or a bracketed field list. Fields
    /// are identifier tokens, optionally bound to a type via `=>`.
    fn parse_rule_storage(&mut self) -> Result<ConcreteElement, Error> {
        let mut parts = vec![self.leaf_here()];
        self.pos += 1;
        let mut state = StorageState::Ready;

        while self.pos < self.tokens.len() {
            let token = self.current();
            if token.is(Lexeme::EndOfLine) {
                self.pos += 1;
                continue;
            }

            match state {
                StorageState::Ready => match token.lexeme() {
                    Lexeme::OpenSquare => {
                        self.pos += 1;
                        state = StorageState::ListReady;
                    }
                    Lexeme::Identifier => {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        state = StorageState::SingleIdentifier;
                    }
                    _ => return Err(self.fail_here()),
                },
                StorageState::SingleIdentifier => match token.lexeme() {
                    Lexeme::Bind => {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        state = StorageState::Binding;
                    }
                    Lexeme::Decode
                    | Lexeme::Encode
                    | Lexeme::Pattern
                    | Lexeme::Validate
                    | Lexeme::CloseCurly => {
                        return Ok(ConcreteElement::compound(ConcreteKind::Storage, parts));
                    }
                    _ => return Err(self.fail_here()),
                },
                StorageState::Binding => {
                    if token.is(Lexeme::Identifier) {
                        self.compact_storage_binding(&mut parts);
                        self.pos += 1;
                        return Ok(ConcreteElement::compound(ConcreteKind::Storage, parts));
                    }
                    return Err(self.fail_here());
                }
                StorageState::ListReady => {
                    if token.is(Lexeme::Identifier) {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        state = StorageState::ListIdentifier;
                    } else {
                        return Err(self.fail_here());
                    }
                }
                StorageState::ListIdentifier => match token.lexeme() {
                    Lexeme::Identifier => {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                    }
                    Lexeme::Bind => {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        state = StorageState::ListBinding;
                    }
                    Lexeme::CloseSquare => {
                        self.pos += 1;
                        return Ok(ConcreteElement::compound(ConcreteKind::Storage, parts));
                    }
                    _ => return Err(self.fail_here()),
                },
                StorageState::ListBinding => {
                    if token.is(Lexeme::Identifier) {
                        self.compact_storage_binding(&mut parts);
                        self.pos += 1;
                        state = StorageState::InList;
                    } else {
                        return Err(self.fail_here());
                    }
                }
                StorageState::InList => match token.lexeme() {
                    Lexeme::Identifier => {
                        parts.push(self.leaf_here());
                        self.pos += 1;
                        state = StorageState::ListIdentifier;
                    }
                    Lexeme::CloseSquare => {
                        self.pos += 1;
                        return Ok(ConcreteElement::compound(ConcreteKind::Storage, parts));
                    }
                    _ => return Err(self.fail_here()),
                },
            }
        }

        Err(self.fail_eof())
    }

    /// Fold the trailing `name =>` plus the current type identifier into a
    /// `Bound` node.
    fn compact_storage_binding(&mut self, parts: &mut Vec<ConcreteElement>) {
        let value = self.leaf_here();
        let bind = parts.pop().expect("bind token on the stack");
        let name = parts.pop().expect("field name on the stack");
        parts.push(ConcreteElement::compound(
            ConcreteKind::Bound,
            vec![name, bind, value],
        ));
    }

    /// `encode:`/`decode:`/`validate:` followed by one s-expression.
    fn parse_code_section(&mut self, kind: ConcreteKind) -> Result<ConcreteElement, Error> {
        let keyword = self.leaf_here();
        self.pos += 1;
        let sexpr = self.parse_sexpr()?;
        Ok(ConcreteElement::compound(kind, vec![keyword, sexpr]))
    }

    /// A strictly parenthesised s-expression; children come from a closed
    /// whitelist of tokens plus nested s-expressions.
    fn parse_sexpr(&mut self) -> Result<ConcreteElement, Error> {
        while self.pos < self.tokens.len() && self.current().is(Lexeme::EndOfLine) {
            self.pos += 1;
        }

        if self.pos >= self.tokens.len() {
            return Err(self.fail_eof());
        }
        if !self.current().is(Lexeme::OpenParen) {
            return Err(self.fail_here());
        }

        let mut parts = vec![self.leaf_here()];
        self.pos += 1;

        while self.pos < self.tokens.len() {
            let token = self.current();
            match token.lexeme() {
                Lexeme::EndOfLine => self.pos += 1,
                Lexeme::CloseParen => {
                    parts.push(self.leaf_here());
                    self.pos += 1;
                    return Ok(ConcreteElement::compound(ConcreteKind::SExpr, parts));
                }
                Lexeme::OpenParen => parts.push(self.parse_sexpr()?),
                lexeme if allowed_in_sexpr(lexeme) => {
                    parts.push(self.leaf_here());
                    self.pos += 1;
                }
                _ => return Err(self.fail_here()),
            }
        }

        Err(self.fail_eof())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BufferSink;
    use crate::tokenizer::tokenize;

    fn parse_ok(source: &str) -> ConcreteElement {
        let tokens = tokenize(source, "test.nyx");
        let mut sink = BufferSink::new();
        match parse(&tokens, &mut sink) {
            Ok(root) => root,
            Err(e) => panic!(
                "parse failed: {:?}, diagnostics: {:?}",
                e,
                sink.diagnostics
                    .iter()
                    .map(|d| d.message.clone())
                    .collect::<Vec<_>>()
            ),
        }
    }

    fn parse_err(source: &str) -> BufferSink {
        let tokens = tokenize(source, "test.nyx");
        let mut sink = BufferSink::new();
        assert!(parse(&tokens, &mut sink).is_err(), "expected parse failure");
        sink
    }

    #[test]
    fn empty_source_gives_empty_root() {
        let root = parse_ok("\n\n");
        assert!(root.is_kind(ConcreteKind::Root));
        assert!(root.children().is_empty());
    }

    #[test]
    fn namespace_keeps_every_token() {
        let root = parse_ok("@namespace a.b\n");
        let ns = &root.children()[0];
        assert!(ns.is_kind(ConcreteKind::Namespace));
        // @namespace a . b
        assert_eq!(ns.children().len(), 4);
        assert!(ns.children()[2].is_lexeme(Lexeme::Dot));
    }

    #[test]
    fn alias_production() {
        let root = parse_ok("@alias original renamed\n");
        let alias = &root.children()[0];
        assert!(alias.is_kind(ConcreteKind::Alias));
        assert_eq!(alias.children().len(), 3);
    }

    #[test]
    fn import_variants() {
        for (source, expect) in [
            ("@import mod\n", 2),
            ("@import mod as m\n", 4),
            ("@import elem from mod\n", 4),
            ("@import elem from mod as e\n", 6),
            ("@import deep.mod\n", 4),
        ] {
            let root = parse_ok(source);
            let import = &root.children()[0];
            assert!(import.is_kind(ConcreteKind::Import), "{}", source);
            assert_eq!(import.children().len(), expect, "{}", source);
        }
    }

    #[test]
    fn comment_runs_merge() {
        let root = parse_ok("# one\n# two\n\n# separate\n");
        assert_eq!(root.children().len(), 2);
        assert!(root.children()[0].is_kind(ConcreteKind::Comment));
        assert_eq!(root.children()[0].children().len(), 2);
        assert_eq!(root.children()[1].children().len(), 1);
    }

    #[test]
    fn documentation_block() {
        let root = parse_ok("#++\n# docs line\n#--\n");
        let doc = &root.children()[0];
        assert!(doc.is_kind(ConcreteKind::Documentation));
        assert_eq!(doc.children().len(), 3);
    }

    #[test]
    fn rule_with_literal_pattern() {
        let root = parse_ok("r {\n  pattern: 0x41\n}\n");
        let rule = &root.children()[0];
        assert!(rule.is_kind(ConcreteKind::Rule));
        // name { pattern }
        assert_eq!(rule.children().len(), 4);
        let pattern = &rule.children()[2];
        assert!(pattern.is_kind(ConcreteKind::Pattern));
        assert_eq!(pattern.children().len(), 2);
    }

    #[test]
    fn pattern_alternatives_keep_or_tokens() {
        let root = parse_ok("r { pattern: 0x41 | 0x42 | sub }\n");
        let pattern = &root.children()[0].children()[2];
        // pattern: elem | elem | elem
        assert_eq!(pattern.children().len(), 6);
        assert!(pattern.children()[2].is_lexeme(Lexeme::BitwiseOr));
    }

    #[test]
    fn repetition_and_binding_nest() {
        let root = parse_ok("r { pattern: 0x41{2,4} => field }\n");
        let pattern = &root.children()[0].children()[2];
        let bound = &pattern.children()[1];
        assert!(bound.is_kind(ConcreteKind::Bound));
        let rep = &bound.children()[0];
        assert!(rep.is_kind(ConcreteKind::Repetition));
        // elem { 2 , 4 }
        assert_eq!(rep.children().len(), 6);
    }

    #[test]
    fn shorthand_repetition() {
        for shorthand in ["?", "*", "+"] {
            let source = format!("r {{ pattern: 0x41{{{}}} }}\n", shorthand);
            let root = parse_ok(&source);
            let rep = &root.children()[0].children()[2].children()[1];
            assert!(rep.is_kind(ConcreteKind::Repetition), "{}", shorthand);
            assert_eq!(rep.children().len(), 4, "{}", shorthand);
        }
    }

    #[test]
    fn nested_list_pattern() {
        let root = parse_ok("r { pattern: (0x41 0x42){3} }\n");
        let rep = &root.children()[0].children()[2].children()[1];
        assert!(rep.is_kind(ConcreteKind::Repetition));
        let list = &rep.children()[0];
        assert!(list.is_kind(ConcreteKind::List));
        // ( elem elem )
        assert_eq!(list.children().len(), 4);
    }

    #[test]
    fn match_form() {
        let root = parse_ok("r { pattern: @match (kind) { 1 => alpha 2 => beta } => out }\n");
        let bound = &root.children()[0].children()[2].children()[1];
        assert!(bound.is_kind(ConcreteKind::Bound));
        let matched = &bound.children()[0];
        assert!(matched.is_kind(ConcreteKind::Match));
        let cases: Vec<_> = matched
            .children()
            .iter()
            .filter(|c| c.is_kind(ConcreteKind::Bound))
            .collect();
        assert_eq!(cases.len(), 2);
    }

    #[test]
    fn storage_single_and_list() {
        let root = parse_ok("r { pattern: 0x00 storage: field }\n");
        let storage = &root.children()[0].children()[3];
        assert!(storage.is_kind(ConcreteKind::Storage));
        assert_eq!(storage.children().len(), 2);

        let root = parse_ok("r { pattern: 0x00 storage: [a b => u8 c] }\n");
        let storage = &root.children()[0].children()[3];
        assert_eq!(storage.children().len(), 4);
        assert!(storage.children()[2].is_kind(ConcreteKind::Bound));
    }

    #[test]
    fn code_sections_hold_sexprs() {
        let root = parse_ok("r { pattern: 0x00 encode: (+ a 1) decode: (a) validate: (== a 5) }\n");
        let rule = &root.children()[0];
        let kinds: Vec<_> = rule.children().iter().filter_map(|c| c.kind()).collect();
        assert!(kinds.contains(&ConcreteKind::Encode));
        assert!(kinds.contains(&ConcreteKind::Decode));
        assert!(kinds.contains(&ConcreteKind::Validate));
    }

    #[test]
    fn nested_sexpr() {
        let root = parse_ok("r { pattern: 0x00 encode: (+ (<< a 2) 1) }\n");
        let encode = root.children()[0]
            .children()
            .iter()
            .find(|c| c.is_kind(ConcreteKind::Encode))
            .unwrap();
        let sexpr = &encode.children()[1];
        assert!(sexpr.is_kind(ConcreteKind::SExpr));
        assert!(sexpr
            .children()
            .iter()
            .any(|c| c.is_kind(ConcreteKind::SExpr)));
    }

    #[test]
    fn sexpr_rejects_keywords() {
        let sink = parse_err("r { pattern: 0x00 encode: (pattern: a) }\n");
        assert!(sink.errors().count() >= 1);
    }

    #[test]
    fn unexpected_token_diagnostic_shape() {
        let sink = parse_err("@alias one 0x41\n");
        let diag = sink.errors().next().unwrap();
        assert_eq!(diag.message, "Unexpected Token '0x41'");
        assert_eq!(diag.file, "test.nyx");
        assert_eq!(diag.line, 1);
        assert_eq!(diag.column, 11);
        let rendered = diag.to_string();
        assert!(rendered.contains("@alias one 0x41"));
        assert!(rendered.contains("           ^"));
    }

    #[test]
    fn rule_body_spans_lines() {
        let root = parse_ok("r\n{\n  pattern: 0x41\n           0x42\n}\n");
        let pattern = &root.children()[0].children()[2];
        // pattern: elem elem
        assert_eq!(pattern.children().len(), 3);
    }

    #[test]
    fn match_allows_empty_body() {
        // rejected later by the lowerer, not by the parser
        let root = parse_ok("r { pattern: @match (k) { } }\n");
        let matched = &root.children()[0].children()[2].children()[1];
        assert!(matched.is_kind(ConcreteKind::Match));
    }
}
