//! Lexer for the query expression language.

use std::iter::Peekable;
use std::str::CharIndices;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    /// `$Name`
    Var(String),

    Comma,
    OrOr,
    Pipe,
    Bang,
    Question,
    Star,
    Dot,
    LParen,
    RParen,
    LBracket,
    RBracket,

    Eof,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "`{s}`"),
            Token::Var(s) => write!(f, "`${s}`"),
            Token::Comma => write!(f, "`,`"),
            Token::OrOr => write!(f, "`||`"),
            Token::Pipe => write!(f, "`|`"),
            Token::Bang => write!(f, "`!`"),
            Token::Question => write!(f, "`?`"),
            Token::Star => write!(f, "`*`"),
            Token::Dot => write!(f, "`.`"),
            Token::LParen => write!(f, "`(`"),
            Token::RParen => write!(f, "`)`"),
            Token::LBracket => write!(f, "`[`"),
            Token::RBracket => write!(f, "`]`"),
            Token::Eof => write!(f, "end of input"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{line}:{col}: {message}")]
pub struct LexError {
    pub line: usize,
    pub col: usize,
    pub message: String,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

pub struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
            line: 1,
            col: 1,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<SpannedToken>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.token == Token::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    /// Byte offset of the next character.
    fn offset(&mut self) -> usize {
        self.chars.peek().map_or(self.input.len(), |&(i, _)| i)
    }

    fn advance(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek_char().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn word(&mut self) -> String {
        let start = self.offset();
        while self.peek_char().is_some_and(is_word_char) {
            self.advance();
        }
        let end = self.offset();
        self.input[start..end].to_owned()
    }

    fn next_token(&mut self) -> Result<SpannedToken, LexError> {
        self.skip_whitespace();

        let line = self.line;
        let col = self.col;
        let error = |message: String| LexError { line, col, message };

        let Some(c) = self.peek_char() else {
            return Ok(SpannedToken {
                token: Token::Eof,
                line,
                col,
            });
        };

        let punct = match c {
            ',' => Some(Token::Comma),
            '!' => Some(Token::Bang),
            '?' => Some(Token::Question),
            '*' => Some(Token::Star),
            '.' => Some(Token::Dot),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            _ => None,
        };
        if let Some(token) = punct {
            self.advance();
            return Ok(SpannedToken { token, line, col });
        }

        if c == '|' {
            self.advance();
            let token = if self.peek_char() == Some('|') {
                self.advance();
                Token::OrOr
            } else {
                Token::Pipe
            };
            return Ok(SpannedToken { token, line, col });
        }

        if c == '$' {
            self.advance();
            let name = self.word();
            if name.is_empty() {
                return Err(error("expected variable name after `$`".to_owned()));
            }
            return Ok(SpannedToken {
                token: Token::Var(name),
                line,
                col,
            });
        }

        if is_word_char(c) {
            let word = self.word();
            return Ok(SpannedToken {
                token: Token::Ident(word),
                line,
                col,
            });
        }

        Err(error(format!("unexpected character: '{c}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_lex_operators() {
        assert_eq!(
            tokens("!A, ?B || C"),
            vec![
                Token::Bang,
                Token::Ident("A".into()),
                Token::Comma,
                Token::Question,
                Token::Ident("B".into()),
                Token::OrOr,
                Token::Ident("C".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_pair_with_source() {
        assert_eq!(
            tokens("ChildOf($This, *)"),
            vec![
                Token::Ident("ChildOf".into()),
                Token::LParen,
                Token::Var("This".into()),
                Token::Comma,
                Token::Star,
                Token::RParen,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_traversal_pipe() {
        assert_eq!(
            tokens("(self|up)"),
            vec![
                Token::LParen,
                Token::Ident("self".into()),
                Token::Pipe,
                Token::Ident("up".into()),
                Token::RParen,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_tracks_position() {
        let toks = Lexer::new("A,\n  B").tokenize().unwrap();
        assert_eq!((toks[2].line, toks[2].col), (2, 3));
    }

    #[test]
    fn test_lex_rejects_unknown_character() {
        let err = Lexer::new("Position & Velocity").tokenize().unwrap_err();
        assert_eq!((err.line, err.col), (1, 10));
        assert!(err.message.contains('&'));
    }

    #[test]
    fn test_lex_unicode_names() {
        assert_eq!(
            tokens("Größe, Vélocité"),
            vec![
                Token::Ident("Größe".into()),
                Token::Comma,
                Token::Ident("Vélocité".into()),
                Token::Eof,
            ]
        );
        let toks = Lexer::new("Größe, X").tokenize().unwrap();
        assert_eq!(toks[2].col, 8);
    }

    #[test]
    fn test_lex_reports_multibyte_character() {
        let err = Lexer::new("Position → Velocity").tokenize().unwrap_err();
        assert_eq!((err.line, err.col), (1, 10));
        assert!(err.message.contains('→'));
    }

    #[test]
    fn test_lex_rejects_bare_dollar() {
        assert!(Lexer::new("Position($)").tokenize().is_err());
    }
}
