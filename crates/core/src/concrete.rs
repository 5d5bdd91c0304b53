//! Concrete syntax tree.
//!
//! The CST is a faithful reshaping of the token stream: every token the
//! parser consumed appears in some leaf, grouped under typed compound
//! nodes. Nothing is normalised here; that is the lowerer's job.

use crate::token::{Lexeme, Token};
use std::fmt;

/// Kind tag for compound CST nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcreteKind {
    Alias,
    Bound,
    Comment,
    Decode,
    Documentation,
    Encode,
    Identifier,
    Import,
    List,
    Match,
    Module,
    Namespace,
    Pattern,
    Repetition,
    Root,
    Rule,
    SExpr,
    Storage,
    Validate,
}

/// One CST node: a leaf holding a single token, or a compound node with an
/// ordered child sequence.
#[derive(Debug, Clone)]
pub enum ConcreteElement {
    Token(Token),
    Compound {
        kind: ConcreteKind,
        children: Vec<ConcreteElement>,
    },
}

impl ConcreteElement {
    pub fn leaf(token: Token) -> Self {
        ConcreteElement::Token(token)
    }

    pub fn compound(kind: ConcreteKind, children: Vec<ConcreteElement>) -> Self {
        ConcreteElement::Compound { kind, children }
    }

    pub fn is_kind(&self, kind: ConcreteKind) -> bool {
        matches!(self, ConcreteElement::Compound { kind: k, .. } if *k == kind)
    }

    pub fn kind(&self) -> Option<ConcreteKind> {
        match self {
            ConcreteElement::Token(_) => None,
            ConcreteElement::Compound { kind, .. } => Some(*kind),
        }
    }

    /// Lexeme query. Compound nodes answer with their first child, so a
    /// pattern element node can be asked what token it starts with.
    pub fn is_lexeme(&self, lexeme: Lexeme) -> bool {
        match self {
            ConcreteElement::Token(token) => token.is(lexeme),
            ConcreteElement::Compound { children, .. } => children
                .first()
                .map(|c| c.is_lexeme(lexeme))
                .unwrap_or(false),
        }
    }

    /// The token of a leaf node.
    pub fn token(&self) -> Option<&Token> {
        match self {
            ConcreteElement::Token(token) => Some(token),
            ConcreteElement::Compound { .. } => None,
        }
    }

    /// Children of a compound node; leaves have none.
    pub fn children(&self) -> &[ConcreteElement] {
        match self {
            ConcreteElement::Token(_) => &[],
            ConcreteElement::Compound { children, .. } => children,
        }
    }

    /// Leftmost token, used for location inheritance.
    pub fn first_token(&self) -> Option<&Token> {
        match self {
            ConcreteElement::Token(token) => Some(token),
            ConcreteElement::Compound { children, .. } => {
                children.iter().find_map(|c| c.first_token())
            }
        }
    }
}

impl fmt::Display for ConcreteElement {
    /// Space-joined token texts, one line per top-level node under a root.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcreteElement::Token(token) => f.write_str(token.text()),
            ConcreteElement::Compound { kind, children } => {
                let separator = if *kind == ConcreteKind::Root { "\n" } else { " " };
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(separator)?;
                    }
                    write!(f, "{}", child)?;
                }
                Ok(())
            }
        }
    }
}
