//! The scanner turns source text into a token stream.
//!
//! Newlines are significant (they terminate statements), so they come out
//! as `Eol` tokens rather than being skipped with the rest of the
//! whitespace. `#` starts a comment running to the end of the line.
//! Identifiers start with a Unicode letter or `_`, may contain digits, and
//! may end in one or more `$` (the convention for implementation-detail
//! symbols such as `init$`). Integer literals accept `_` as a group
//! separator.

use std::iter::Peekable;
use std::str::Chars;

use merle_core::error::{syntax_error, Result, RuntimeError};

use crate::token::{Lexeme, Token};

pub struct Scanner<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Scanner::new(source).scan_all()
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Scanner<'a> {
        Scanner {
            chars: source.chars().peekable(),
            line: 1,
        }
    }

    fn error(&self, message: impl Into<String>) -> RuntimeError {
        syntax_error(message.into()).with_line(self.line)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn advance(&mut self) -> Option<char> {
        self.chars.next()
    }

    fn accept(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn scan_all(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.read_token()?;
            let done = token.is(Lexeme::Eot);
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn read_token(&mut self) -> Result<Token> {
        loop {
            let c = match self.peek() {
                Some(c) => c,
                None => return Ok(Token::new(Lexeme::Eot, "EOT", self.line)),
            };
            match c {
                ' ' | '\t' | '\r' | '\u{b}' | '\u{c}' => {
                    self.advance();
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                '\n' => {
                    let token = Token::new(Lexeme::Eol, "EOL", self.line);
                    self.advance();
                    self.line += 1;
                    return Ok(token);
                }
                _ => break,
            }
        }

        let c = self.peek().unwrap();
        if c.is_alphabetic() || c == '_' {
            return Ok(self.read_word());
        }
        if c.is_ascii_digit() {
            return self.read_number();
        }

        let line = self.line;
        self.advance();
        let simple = |lexeme: Lexeme| Ok(Token::new(lexeme, lexeme.name(), line));
        match c {
            '"' => self.read_string(),
            '(' => simple(Lexeme::LParen),
            ')' => simple(Lexeme::RParen),
            '{' => simple(Lexeme::LCurl),
            '}' => simple(Lexeme::RCurl),
            '[' => simple(Lexeme::LSquare),
            ']' => simple(Lexeme::RSquare),
            ',' => simple(Lexeme::Comma),
            ':' => simple(Lexeme::Colon),
            ';' => simple(Lexeme::Semicolon),
            '.' => simple(Lexeme::Dot),
            '@' => simple(Lexeme::At),
            '+' => simple(Lexeme::OpPlus),
            '-' => simple(Lexeme::OpMinus),
            '*' => simple(Lexeme::OpStar),
            '/' => simple(Lexeme::OpSlash),
            '^' => simple(Lexeme::OpPower),
            '%' => simple(Lexeme::OpMod),
            '&' => simple(Lexeme::OpConcat),
            '=' => {
                if self.accept('=') {
                    simple(Lexeme::OpEqual)
                } else {
                    simple(Lexeme::OpAssign)
                }
            }
            '!' => {
                if self.accept('=') {
                    simple(Lexeme::OpNotEqual)
                } else {
                    Err(self.error("Invalid token '!' (did you mean 'not' or '!=' ?)"))
                }
            }
            '<' => {
                if self.accept('=') {
                    if self.accept('>') {
                        simple(Lexeme::OpCompare)
                    } else {
                        simple(Lexeme::OpLessEqual)
                    }
                } else {
                    simple(Lexeme::OpLessThan)
                }
            }
            '>' => {
                if self.accept('=') {
                    simple(Lexeme::OpGreaterEqual)
                } else {
                    simple(Lexeme::OpGreaterThan)
                }
            }
            other => Err(self.error(format!("Invalid character '{}'", other))),
        }
    }

    fn read_word(&mut self) -> Token {
        let line = self.line;
        let mut spelling = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                spelling.push(c);
                self.advance();
            } else {
                break;
            }
        }
        // Trailing '$' marks special symbols.
        while self.peek() == Some('$') {
            spelling.push('$');
            self.advance();
        }
        match Lexeme::keyword(&spelling) {
            Some(lexeme) => Token::new(lexeme, spelling, line),
            None => Token::new(Lexeme::Identifier, spelling, line),
        }
    }

    fn read_digits(&mut self, spelling: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                spelling.push(c);
                self.advance();
            } else if c == '_' {
                // Group separator, not part of the value.
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_number(&mut self) -> Result<Token> {
        let line = self.line;
        let mut spelling = String::new();
        self.read_digits(&mut spelling);
        // A dot only makes this a float if a digit follows; `1.to` is an
        // integer followed by a field access.
        let mut is_float = false;
        if self.peek() == Some('.') {
            let mut lookahead = self.chars.clone();
            lookahead.next();
            if lookahead.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                is_float = true;
                spelling.push('.');
                self.advance();
                self.read_digits(&mut spelling);
            }
        }
        // Optional exponent: 1e9, 2.5E-3.
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mut lookahead = self.chars.clone();
            lookahead.next();
            let next = lookahead.peek().copied();
            let digits_follow = match next {
                Some('+') | Some('-') => {
                    lookahead.next();
                    lookahead.peek().map(|c| c.is_ascii_digit()).unwrap_or(false)
                }
                Some(c) => c.is_ascii_digit(),
                None => false,
            };
            if digits_follow {
                is_float = true;
                spelling.push('e');
                self.advance();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    spelling.push(self.advance().unwrap());
                }
                self.read_digits(&mut spelling);
            }
        }
        let lexeme = if is_float {
            Lexeme::FloatLiteral
        } else {
            Lexeme::IntegerLiteral
        };
        Ok(Token::new(lexeme, spelling, line))
    }

    fn read_string(&mut self) -> Result<Token> {
        let line = self.line;
        let mut spelling = String::new();
        loop {
            let c = match self.advance() {
                Some(c) => c,
                None => return Err(self.error("Unterminated string literal")),
            };
            match c {
                '"' => return Ok(Token::new(Lexeme::StringLiteral, spelling, line)),
                '\n' => {
                    self.line += 1;
                    spelling.push('\n');
                }
                '\\' => {
                    let escape = match self.advance() {
                        Some(e) => e,
                        None => return Err(self.error("Unterminated string literal")),
                    };
                    match escape {
                        'n' => spelling.push('\n'),
                        't' => spelling.push('\t'),
                        'r' => spelling.push('\r'),
                        '\\' => spelling.push('\\'),
                        '\'' => spelling.push('\''),
                        '"' => spelling.push('"'),
                        'v' => spelling.push('\u{b}'),
                        'a' => spelling.push('\u{7}'),
                        'b' => spelling.push('\u{8}'),
                        'f' => spelling.push('\u{c}'),
                        other => {
                            // Not a recognised escape: keep it verbatim.
                            spelling.push('\\');
                            spelling.push(other);
                        }
                    }
                }
                other => spelling.push(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lexemes(source: &str) -> Vec<Lexeme> {
        tokenize(source).unwrap().iter().map(|t| t.lexeme).collect()
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            lexemes("var x = foo"),
            vec![
                Lexeme::Var,
                Lexeme::Identifier,
                Lexeme::OpAssign,
                Lexeme::Identifier,
                Lexeme::Eot
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let tokens = tokenize("1_000 3.14 2").unwrap();
        assert_eq!(tokens[0].lexeme, Lexeme::IntegerLiteral);
        assert_eq!(tokens[0].spelling, "1000");
        assert_eq!(tokens[1].lexeme, Lexeme::FloatLiteral);
        assert_eq!(tokens[1].spelling, "3.14");
        assert_eq!(tokens[2].lexeme, Lexeme::IntegerLiteral);
    }

    #[test]
    fn test_exponents() {
        let tokens = tokenize("1e9 2.5E-3 7e xe2").unwrap();
        assert_eq!(tokens[0].lexeme, Lexeme::FloatLiteral);
        assert_eq!(tokens[0].spelling, "1e9");
        assert_eq!(tokens[1].lexeme, Lexeme::FloatLiteral);
        assert_eq!(tokens[1].spelling, "2.5e-3");
        // "7e" is an integer followed by an identifier.
        assert_eq!(tokens[2].lexeme, Lexeme::IntegerLiteral);
        assert_eq!(tokens[3].lexeme, Lexeme::Identifier);
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            lexemes("a <= b <=> c != d"),
            vec![
                Lexeme::Identifier,
                Lexeme::OpLessEqual,
                Lexeme::Identifier,
                Lexeme::OpCompare,
                Lexeme::Identifier,
                Lexeme::OpNotEqual,
                Lexeme::Identifier,
                Lexeme::Eot
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        let tokens = tokenize("\"a\\tb\\n\"").unwrap();
        assert_eq!(tokens[0].spelling, "a\tb\n");
        assert!(tokenize("\"unterminated").is_err());
    }

    #[test]
    fn test_comments_and_lines() {
        let tokens = tokenize("a # comment\nb").unwrap();
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].lexeme, Lexeme::Eol);
        assert_eq!(tokens[2].line, 2);
    }

    #[test]
    fn test_special_suffix() {
        let tokens = tokenize("init$").unwrap();
        assert_eq!(tokens[0].lexeme, Lexeme::Identifier);
        assert_eq!(tokens[0].spelling, "init$");
    }

    #[test]
    fn test_bang_alone_is_an_error() {
        assert!(tokenize("a ! b").is_err());
    }
}
