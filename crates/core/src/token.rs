//! Tokens and the closed lexeme tag set.

use std::fmt;
use std::rc::Rc;

/// Syntactic category of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Lexeme {
    /// Not really a lexeme; something the tokenizer could not classify.
    Invalid,
    // Single-character punctuation and operators.
    Assignment,
    BitwiseAnd,
    BitwiseNot,
    BitwiseOr,
    BitwiseXor,
    CloseAngle,
    CloseCurly,
    CloseParen,
    CloseSquare,
    Comma,
    Division,
    Dot,
    EndOfLine,
    LogicalNot,
    Minus,
    Modulo,
    OpenAngle,
    OpenCurly,
    OpenParen,
    OpenSquare,
    Plus,
    Query,
    Times,
    // Keywords, compound operators, and literals.
    Alias,
    AndAssignment,
    BinaryLiteral,
    BinaryPattern,
    Bind,
    Comment,
    DecimalLiteral,
    Decode,
    DivAssignment,
    DocEnd,
    DocStart,
    Encode,
    Equality,
    FloatLiteral,
    GreaterThanOrEqual,
    HexadecimalLiteral,
    HexadecimalPattern,
    Identifier,
    Import,
    Inequality,
    LeftShift,
    LessThanOrEqual,
    LogicalAnd,
    LogicalOr,
    LogicalXor,
    Match,
    MinusAssignment,
    Module,
    ModuloAssignment,
    Namespace,
    OctalLiteral,
    OctalPattern,
    OrAssignment,
    Pattern,
    PlusAssignment,
    RightShift,
    Storage,
    StringLiteral,
    TimesAssignment,
    Validate,
    XorAssignment,
}

impl Lexeme {
    /// Stable name used in serialized code snippets.
    pub fn name(self) -> &'static str {
        match self {
            Lexeme::Invalid => "<INVALID>",
            Lexeme::Assignment => "Assignment",
            Lexeme::BitwiseAnd => "BitwiseAnd",
            Lexeme::BitwiseNot => "BitwiseNot",
            Lexeme::BitwiseOr => "BitwiseOr",
            Lexeme::BitwiseXor => "BitwiseXor",
            Lexeme::CloseAngle => "CloseAngle",
            Lexeme::CloseCurly => "CloseCurly",
            Lexeme::CloseParen => "CloseParen",
            Lexeme::CloseSquare => "CloseSquare",
            Lexeme::Comma => "Comma",
            Lexeme::Division => "Division",
            Lexeme::Dot => "Dot",
            Lexeme::EndOfLine => "EndOfLine",
            Lexeme::LogicalNot => "LogicalNot",
            Lexeme::Minus => "Minus",
            Lexeme::Modulo => "Modulo",
            Lexeme::OpenAngle => "OpenAngle",
            Lexeme::OpenCurly => "OpenCurly",
            Lexeme::OpenParen => "OpenParen",
            Lexeme::OpenSquare => "OpenSquare",
            Lexeme::Plus => "Plus",
            Lexeme::Query => "Query",
            Lexeme::Times => "Times",
            Lexeme::Alias => "Alias",
            Lexeme::AndAssignment => "AndAssignment",
            Lexeme::BinaryLiteral => "BinaryLiteral",
            Lexeme::BinaryPattern => "BinaryPattern",
            Lexeme::Bind => "Bind",
            Lexeme::Comment => "Comment",
            Lexeme::DecimalLiteral => "DecimalLiteral",
            Lexeme::Decode => "Decode",
            Lexeme::DivAssignment => "DivAssignment",
            Lexeme::DocEnd => "DocEnd",
            Lexeme::DocStart => "DocStart",
            Lexeme::Encode => "Encode",
            Lexeme::Equality => "Equality",
            Lexeme::FloatLiteral => "FloatLiteral",
            Lexeme::GreaterThanOrEqual => "GreaterThanOrEqual",
            Lexeme::HexadecimalLiteral => "HexadecimalLiteral",
            Lexeme::HexadecimalPattern => "HexadecimalPattern",
            Lexeme::Identifier => "Identifier",
            Lexeme::Import => "Import",
            Lexeme::Inequality => "Inequality",
            Lexeme::LeftShift => "LeftShift",
            Lexeme::LessThanOrEqual => "LessThanOrEqual",
            Lexeme::LogicalAnd => "LogicalAnd",
            Lexeme::LogicalOr => "LogicalOr",
            Lexeme::LogicalXor => "LogicalXor",
            Lexeme::Match => "Match",
            Lexeme::MinusAssignment => "MinusAssignment",
            Lexeme::Module => "Module",
            Lexeme::ModuloAssignment => "ModuloAssignment",
            Lexeme::Namespace => "Namespace",
            Lexeme::OctalLiteral => "OctalLiteral",
            Lexeme::OctalPattern => "OctalPattern",
            Lexeme::OrAssignment => "OrAssignment",
            Lexeme::Pattern => "Pattern",
            Lexeme::PlusAssignment => "PlusAssignment",
            Lexeme::RightShift => "RightShift",
            Lexeme::Storage => "Storage",
            Lexeme::StringLiteral => "StringLiteral",
            Lexeme::TimesAssignment => "TimesAssignment",
            Lexeme::Validate => "Validate",
            Lexeme::XorAssignment => "XorAssignment",
        }
    }

    /// True for numeric literal lexemes. Wildcard pattern lexemes count
    /// only when `pattern` is set.
    pub fn is_numeric(self, pattern: bool) -> bool {
        match self {
            Lexeme::OctalPattern | Lexeme::BinaryPattern | Lexeme::HexadecimalPattern => pattern,
            Lexeme::FloatLiteral
            | Lexeme::OctalLiteral
            | Lexeme::BinaryLiteral
            | Lexeme::DecimalLiteral
            | Lexeme::HexadecimalLiteral => true,
            _ => false,
        }
    }

    /// True for lexemes that may appear as operators inside s-expressions.
    pub fn is_operator(self) -> bool {
        matches!(
            self,
            Lexeme::Assignment
                | Lexeme::BitwiseAnd
                | Lexeme::BitwiseNot
                | Lexeme::BitwiseOr
                | Lexeme::BitwiseXor
                | Lexeme::CloseAngle
                | Lexeme::Division
                | Lexeme::LogicalNot
                | Lexeme::Minus
                | Lexeme::Modulo
                | Lexeme::OpenAngle
                | Lexeme::Plus
                | Lexeme::Times
                | Lexeme::AndAssignment
                | Lexeme::DivAssignment
                | Lexeme::Equality
                | Lexeme::GreaterThanOrEqual
                | Lexeme::Identifier
                | Lexeme::Inequality
                | Lexeme::LeftShift
                | Lexeme::LessThanOrEqual
                | Lexeme::LogicalAnd
                | Lexeme::LogicalOr
                | Lexeme::LogicalXor
                | Lexeme::MinusAssignment
                | Lexeme::ModuloAssignment
                | Lexeme::OrAssignment
                | Lexeme::PlusAssignment
                | Lexeme::RightShift
                | Lexeme::TimesAssignment
                | Lexeme::XorAssignment
        )
    }
}

/// Keyword and operator table. Anything the tokenizer scans as a keyword,
/// section label, or operator run is looked up here; misses are `Invalid`.
pub fn keyword(text: &str) -> Option<Lexeme> {
    let lexeme = match text {
        "@alias" => Lexeme::Alias,
        "&=" => Lexeme::AndAssignment,
        "=" => Lexeme::Assignment,
        "=>" => Lexeme::Bind,
        "&" => Lexeme::BitwiseAnd,
        "~" => Lexeme::BitwiseNot,
        "|" => Lexeme::BitwiseOr,
        "^" => Lexeme::BitwiseXor,
        "decode:" => Lexeme::Decode,
        "/=" => Lexeme::DivAssignment,
        "/" => Lexeme::Division,
        "encode:" => Lexeme::Encode,
        "==" => Lexeme::Equality,
        ">" => Lexeme::CloseAngle,
        ">=" => Lexeme::GreaterThanOrEqual,
        "@import" => Lexeme::Import,
        "!=" => Lexeme::Inequality,
        "<<" => Lexeme::LeftShift,
        "<" => Lexeme::OpenAngle,
        "<=" => Lexeme::LessThanOrEqual,
        "&&" => Lexeme::LogicalAnd,
        "!" => Lexeme::LogicalNot,
        "||" => Lexeme::LogicalOr,
        "^^" => Lexeme::LogicalXor,
        "@match" => Lexeme::Match,
        "-" => Lexeme::Minus,
        "-=" => Lexeme::MinusAssignment,
        "@module" => Lexeme::Module,
        "%" => Lexeme::Modulo,
        "%=" => Lexeme::ModuloAssignment,
        "@namespace" => Lexeme::Namespace,
        "|=" => Lexeme::OrAssignment,
        "pattern:" => Lexeme::Pattern,
        "+" => Lexeme::Plus,
        "+=" => Lexeme::PlusAssignment,
        ">>" => Lexeme::RightShift,
        "storage:" => Lexeme::Storage,
        "*" => Lexeme::Times,
        "*=" => Lexeme::TimesAssignment,
        "validate:" => Lexeme::Validate,
        "^=" => Lexeme::XorAssignment,
        _ => return None,
    };
    Some(lexeme)
}

/// One token of source text.
///
/// The file name and the full source line are shared between every token
/// of the same line so diagnostics can reproduce the line without holding
/// the whole file.
#[derive(Debug, Clone)]
pub struct Token {
    text: String,
    file: Rc<String>,
    line: Rc<String>,
    number: u32,
    column: u32,
    lexeme: Lexeme,
}

impl Token {
    pub fn new(
        text: String,
        file: Rc<String>,
        line: Rc<String>,
        number: u32,
        column: u32,
        lexeme: Lexeme,
    ) -> Self {
        Token {
            text,
            file,
            line,
            number,
            column,
            lexeme,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn file_name(&self) -> &str {
        &self.file
    }

    /// Full text of the line this token came from.
    pub fn full_line(&self) -> &str {
        &self.line
    }

    /// 1-based line number.
    pub fn line_number(&self) -> u32 {
        self.number
    }

    /// 0-based column of the first character.
    pub fn column_number(&self) -> u32 {
        self.column
    }

    pub fn lexeme(&self) -> Lexeme {
        self.lexeme
    }

    pub fn is(&self, lexeme: Lexeme) -> bool {
        self.lexeme == lexeme
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_table_covers_sections_and_operators() {
        assert_eq!(keyword("@namespace"), Some(Lexeme::Namespace));
        assert_eq!(keyword("@module"), Some(Lexeme::Module));
        assert_eq!(keyword("@import"), Some(Lexeme::Import));
        assert_eq!(keyword("@alias"), Some(Lexeme::Alias));
        assert_eq!(keyword("@match"), Some(Lexeme::Match));
        assert_eq!(keyword("pattern:"), Some(Lexeme::Pattern));
        assert_eq!(keyword("storage:"), Some(Lexeme::Storage));
        assert_eq!(keyword("encode:"), Some(Lexeme::Encode));
        assert_eq!(keyword("decode:"), Some(Lexeme::Decode));
        assert_eq!(keyword("validate:"), Some(Lexeme::Validate));
        assert_eq!(keyword("=>"), Some(Lexeme::Bind));
        assert_eq!(keyword("^^"), Some(Lexeme::LogicalXor));
        assert_eq!(keyword("+="), Some(Lexeme::PlusAssignment));
        assert_eq!(keyword("not-a-keyword"), None);
    }

    #[test]
    fn numeric_predicate_gates_patterns() {
        assert!(Lexeme::DecimalLiteral.is_numeric(false));
        assert!(Lexeme::FloatLiteral.is_numeric(false));
        assert!(!Lexeme::BinaryPattern.is_numeric(false));
        assert!(Lexeme::BinaryPattern.is_numeric(true));
        assert!(!Lexeme::Identifier.is_numeric(true));
    }

    #[test]
    fn operator_predicate() {
        assert!(Lexeme::Plus.is_operator());
        assert!(Lexeme::LeftShift.is_operator());
        assert!(Lexeme::Identifier.is_operator());
        assert!(!Lexeme::OpenParen.is_operator());
        assert!(!Lexeme::Pattern.is_operator());
    }
}
