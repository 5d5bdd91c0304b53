//! Line-oriented tokenizer for `.nyx` sources.
//!
//! The tokenizer never aborts the stream: unrecognisable input is emitted
//! as `Invalid` tokens and the caller decides whether to proceed. Every
//! physical line produces exactly one synthetic `EndOfLine` token, even
//! when the final newline is missing from the file.

use crate::token::{keyword, Lexeme, Token};
use std::rc::Rc;

/// Characters that terminate a number token in addition to whitespace.
const DELIMITERS: &[u8] = b"!#/%*-+()[]{},~=<>&|^@\"'";

fn is_delimiter(c: u8) -> bool {
    DELIMITERS.contains(&c)
}

fn terminates_number(c: u8) -> bool {
    c.is_ascii_whitespace() || is_delimiter(c)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumberState {
    Start,
    Sign,
    Zero,
    Decimal,
    Octal,
    OctalPattern,
    BinaryStart,
    Binary,
    BinaryPattern,
    HexadecimalStart,
    Hexadecimal,
    HexadecimalPattern,
    FractionStart,
    Fraction,
    Exponent,
    Error,
}

/// Streaming tokenizer over one source file.
pub struct Tokenizer<'a> {
    remaining: std::str::Lines<'a>,
    file: Rc<String>,
    line: Option<Rc<String>>,
    number: u32,
    column: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str, file: &str) -> Self {
        let mut tokenizer = Tokenizer {
            remaining: source.lines(),
            file: Rc::new(file.to_owned()),
            line: None,
            number: 0,
            column: 0,
        };
        tokenizer.read_line();
        tokenizer
    }

    fn read_line(&mut self) -> bool {
        match self.remaining.next() {
            Some(text) => {
                self.line = Some(Rc::new(text.to_owned()));
                self.column = 0;
                self.number += 1;
                true
            }
            None => {
                self.line = None;
                false
            }
        }
    }

    fn emit(&mut self, lexeme: Lexeme, length: usize) -> Token {
        let line = self.line.as_ref().expect("emit without a current line");
        let text = line[self.column..self.column + length].to_owned();
        let token = Token::new(
            text,
            Rc::clone(&self.file),
            Rc::clone(line),
            self.number,
            self.column as u32,
            lexeme,
        );
        self.column += length;
        token
    }

    /// Emit a token whose lexeme comes from the keyword table; misses are
    /// `Invalid`.
    fn emit_keyword(&mut self, length: usize) -> Token {
        let line = self.line.as_ref().expect("emit without a current line");
        let lexeme = keyword(&line[self.column..self.column + length]).unwrap_or(Lexeme::Invalid);
        self.emit(lexeme, length)
    }

    /// Produce the next token, or `None` once the source is exhausted.
    pub fn next_token(&mut self) -> Option<Token> {
        while let Some(line) = self.line.clone() {
            let bytes = line.as_bytes();
            let len = bytes.len();

            // skip leading whitespace
            while self.column < len && bytes[self.column].is_ascii_whitespace() {
                self.column += 1;
            }

            // a consumed line always yields an end of line token
            if self.column >= len {
                let token = self.emit(Lexeme::EndOfLine, 0);
                self.read_line();
                return Some(token);
            }

            let c = bytes[self.column];
            return Some(match c {
                b'~' => self.emit(Lexeme::BitwiseNot, 1),
                b',' => self.emit(Lexeme::Comma, 1),
                b'?' => self.emit(Lexeme::Query, 1),
                b'{' => self.emit(Lexeme::OpenCurly, 1),
                b'}' => self.emit(Lexeme::CloseCurly, 1),
                b'[' => self.emit(Lexeme::OpenSquare, 1),
                b']' => self.emit(Lexeme::CloseSquare, 1),
                b'(' => self.emit(Lexeme::OpenParen, 1),
                b')' => self.emit(Lexeme::CloseParen, 1),

                b'#' => self.scan_comment(bytes),
                b'@' => self.scan_keyword(bytes),
                b'"' | b'\'' => self.scan_string(bytes),

                b'.' => {
                    if self.column + 1 < len && bytes[self.column + 1].is_ascii_digit() {
                        self.scan_number(bytes)
                    } else {
                        self.emit(Lexeme::Dot, 1)
                    }
                }
                b'-' | b'+' => {
                    let next = self.column + 1;
                    if next < len && (bytes[next].is_ascii_digit() || bytes[next] == b'.') {
                        self.scan_number(bytes)
                    } else {
                        self.scan_operator(bytes)
                    }
                }

                b'^' | b'*' | b'/' | b'%' | b'!' | b'=' | b'&' | b'|' | b'<' | b'>' => {
                    self.scan_operator(bytes)
                }

                c if c.is_ascii_digit() => self.scan_number(bytes),
                c if c == b'_' || c.is_ascii_alphabetic() => self.scan_identifier(bytes),

                _ => {
                    // consume one whole character so we never split UTF-8
                    let width = line[self.column..]
                        .chars()
                        .next()
                        .map_or(1, char::len_utf8);
                    self.emit(Lexeme::Invalid, width)
                }
            });
        }

        None
    }

    fn scan_comment(&mut self, bytes: &[u8]) -> Token {
        let len = bytes.len();
        if len - self.column >= 3 {
            if bytes[self.column + 1] == b'+' && bytes[self.column + 2] == b'+' {
                return self.emit(Lexeme::DocStart, len - self.column);
            }
            if bytes[self.column + 1] == b'-' && bytes[self.column + 2] == b'-' {
                return self.emit(Lexeme::DocEnd, len - self.column);
            }
        }

        self.emit(Lexeme::Comment, len - self.column)
    }

    fn scan_keyword(&mut self, bytes: &[u8]) -> Token {
        let len = bytes.len();
        let mut end = self.column + 1;
        while end < len && bytes[end].is_ascii_alphabetic() {
            end += 1;
        }

        self.emit_keyword(end - self.column)
    }

    fn scan_identifier(&mut self, bytes: &[u8]) -> Token {
        let len = bytes.len();
        let mut end = self.column + 1;
        while end < len && (bytes[end] == b'_' || bytes[end].is_ascii_alphanumeric() || bytes[end] == b'-')
        {
            end += 1;
        }

        // a trailing colon makes this a section label
        if end < len && bytes[end] == b':' {
            return self.emit_keyword(end - self.column + 1);
        }

        self.emit(Lexeme::Identifier, end - self.column)
    }

    fn scan_string(&mut self, bytes: &[u8]) -> Token {
        let len = bytes.len();
        let quote = bytes[self.column];
        for end in self.column + 1..len {
            if bytes[end] == quote {
                return self.emit(Lexeme::StringLiteral, end - self.column + 1);
            }
        }

        // unterminated string literal
        self.emit(Lexeme::Invalid, len - self.column)
    }

    fn scan_operator(&mut self, bytes: &[u8]) -> Token {
        let len = bytes.len();
        let c = bytes[self.column];
        match c {
            // stand alone, doubled up, or equals-suffixed
            b'+' | b'-' | b'&' | b'|' | b'^' | b'<' | b'>' => {
                let mut end = self.column + 1;
                if end < len && (bytes[end] == c || bytes[end] == b'=') {
                    end += 1;
                }
                self.emit_keyword(end - self.column)
            }

            // stand alone or equals-suffixed
            b'!' | b'*' | b'/' | b'%' => {
                let mut end = self.column + 1;
                if end < len && bytes[end] == b'=' {
                    end += 1;
                }
                self.emit_keyword(end - self.column)
            }

            b'=' => {
                let mut end = self.column + 1;
                if end < len && (bytes[end] == b'=' || bytes[end] == b'>') {
                    end += 1;
                }
                self.emit_keyword(end - self.column)
            }

            _ => self.emit(Lexeme::Invalid, 1),
        }
    }

    fn scan_number(&mut self, bytes: &[u8]) -> Token {
        use NumberState::*;

        let len = bytes.len();
        let mut state = Start;
        let mut end = self.column;

        while end < len {
            let c = bytes[end];
            let term = terminates_number(c);

            state = match state {
                Start => match c {
                    b'+' | b'-' => Sign,
                    b'0' => Zero,
                    b'1'..=b'9' => Decimal,
                    _ => Error,
                },

                Sign => match c {
                    b'0' => Zero,
                    b'1'..=b'9' => Decimal,
                    _ => Error,
                },

                Zero => match c {
                    b'B' | b'b' => BinaryStart,
                    b'X' | b'x' => HexadecimalStart,
                    b'0'..=b'7' => Octal,
                    b'*' => OctalPattern,
                    b'.' => FractionStart,
                    _ if term => return self.emit(Lexeme::DecimalLiteral, end - self.column),
                    _ => Error,
                },

                Decimal => match c {
                    b'0'..=b'9' => Decimal,
                    b'.' => FractionStart,
                    b'E' | b'e' => Exponent,
                    _ if term => return self.emit(Lexeme::DecimalLiteral, end - self.column),
                    _ => Error,
                },

                Octal => match c {
                    b'0'..=b'7' => Octal,
                    b'*' => OctalPattern,
                    _ if term => return self.emit(Lexeme::OctalLiteral, end - self.column),
                    _ => Error,
                },

                OctalPattern => match c {
                    b'0'..=b'7' | b'*' => OctalPattern,
                    _ if term => return self.emit(Lexeme::OctalPattern, end - self.column),
                    _ => Error,
                },

                BinaryStart => match c {
                    b'0' | b'1' => Binary,
                    b'*' => BinaryPattern,
                    _ => Error,
                },

                Binary => match c {
                    b'0' | b'1' => Binary,
                    b'*' => BinaryPattern,
                    _ if term => return self.emit(Lexeme::BinaryLiteral, end - self.column),
                    _ => Error,
                },

                BinaryPattern => match c {
                    b'0' | b'1' | b'*' => BinaryPattern,
                    _ if term => return self.emit(Lexeme::BinaryPattern, end - self.column),
                    _ => Error,
                },

                HexadecimalStart => match c {
                    _ if c.is_ascii_hexdigit() => Hexadecimal,
                    b'*' => HexadecimalPattern,
                    _ => Error,
                },

                Hexadecimal => match c {
                    _ if c.is_ascii_hexdigit() => Hexadecimal,
                    b'*' => HexadecimalPattern,
                    _ if term => {
                        return self.emit(Lexeme::HexadecimalLiteral, end - self.column)
                    }
                    _ => Error,
                },

                HexadecimalPattern => match c {
                    _ if c.is_ascii_hexdigit() || c == b'*' => HexadecimalPattern,
                    _ if term => {
                        return self.emit(Lexeme::HexadecimalPattern, end - self.column)
                    }
                    _ => Error,
                },

                FractionStart => match c {
                    b'0'..=b'9' => Fraction,
                    _ => Error,
                },

                Fraction => match c {
                    b'0'..=b'9' => Fraction,
                    b'E' | b'e' => Exponent,
                    _ if term => return self.emit(Lexeme::FloatLiteral, end - self.column),
                    _ => Error,
                },

                Exponent => match c {
                    b'0'..=b'9' => Exponent,
                    _ if term => return self.emit(Lexeme::FloatLiteral, end - self.column),
                    _ => Error,
                },

                Error => Error,
            };

            // the error state still consumes up to the next delimiter
            if state == Error && term {
                return self.emit(Lexeme::Invalid, end - self.column);
            }

            end += 1;
        }

        // ran out of input, classify by the final state
        let length = len - self.column;
        match state {
            Zero | Decimal => self.emit(Lexeme::DecimalLiteral, length),
            Octal => self.emit(Lexeme::OctalLiteral, length),
            OctalPattern => self.emit(Lexeme::OctalPattern, length),
            Binary => self.emit(Lexeme::BinaryLiteral, length),
            BinaryPattern => self.emit(Lexeme::BinaryPattern, length),
            Hexadecimal => self.emit(Lexeme::HexadecimalLiteral, length),
            HexadecimalPattern => self.emit(Lexeme::HexadecimalPattern, length),
            Fraction | Exponent => self.emit(Lexeme::FloatLiteral, length),
            _ => self.emit(Lexeme::Invalid, length),
        }
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        self.next_token()
    }
}

/// Tokenize a whole source in one call.
pub fn tokenize(source: &str, file: &str) -> Vec<Token> {
    Tokenizer::new(source, file).collect()
}
