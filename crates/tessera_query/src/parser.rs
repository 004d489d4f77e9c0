/// Recursive-descent parser for query expressions.
///
/// ```text
/// query  := term ((',' | '||') term)*
/// term   := ('[' inout ']')? ('!' | '?')? ( '(' ref ',' ref ')' src? | ref src? )
/// src    := '(' source (',' ref)? ')'
/// source := ('$This' | ref | trav) ('|' trav)*
/// trav   := 'self' | 'up'
/// ref    := ident ('.' ident)* | '*'
/// inout  := 'in' | 'out' | 'inout' | 'none'
/// ```
///
/// In source position a bare `self` or `up` is always a traversal keyword.
/// A path that starts with one of them (`up.Engine`) is a ref, so an entity
/// with a keyword name is reachable as an explicit source only through a
/// path below it.
use thiserror::Error;

use crate::ast::{FieldExpr, QueryExpr, RefExpr, TermExpr};
use crate::lexer::{LexError, Lexer, SpannedToken, Token};
use crate::term::{InOut, Oper, Traversal};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{line}:{col}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub col: usize,
    pub message: String,
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        Self {
            line: e.line,
            col: e.col,
            message: e.message,
        }
    }
}

/// Modifiers written in front of a term.
struct Prefix {
    inout: InOut,
    oper: Oper,
    explicit: bool,
}

pub struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl Parser {
    pub fn parse(input: &str) -> Result<QueryExpr, ParseError> {
        let mut lexer = Lexer::new(input);
        let tokens = lexer.tokenize()?;
        let mut parser = Self { tokens, pos: 0 };
        parser.parse_query()
    }

    // -- Helpers --

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn current_span(&self) -> (usize, usize) {
        let t = &self.tokens[self.pos];
        (t.line, t.col)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].token.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: String) -> ParseError {
        let (line, col) = self.current_span();
        ParseError { line, col, message }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ParseError> {
        if self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {expected}, got {}", self.peek())))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.peek().clone() {
            Token::Ident(s) => {
                self.advance();
                Ok(s)
            }
            other => Err(self.error(format!("expected identifier, got {other}"))),
        }
    }

    fn at(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.at(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn peek_next(&self) -> &Token {
        let next = (self.pos + 1).min(self.tokens.len() - 1);
        &self.tokens[next].token
    }

    fn at_traversal(&self) -> bool {
        matches!(self.peek(), Token::Ident(s) if s == "self" || s == "up")
            && *self.peek_next() != Token::Dot
    }

    // -- Grammar --

    fn parse_query(&mut self) -> Result<QueryExpr, ParseError> {
        let mut fields = Vec::new();
        if self.at(&Token::Eof) {
            return Ok(QueryExpr { fields });
        }
        loop {
            fields.push(self.parse_field()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            if self.at(&Token::Eof) {
                break;
            }
            return Err(self.error(format!("expected `,` or end of input, got {}", self.peek())));
        }
        Ok(QueryExpr { fields })
    }

    fn parse_field(&mut self) -> Result<FieldExpr, ParseError> {
        let prefix = self.parse_prefix()?;
        let mut terms = vec![self.parse_term()?];
        while self.at(&Token::OrOr) {
            self.advance();
            let (line, col) = self.current_span();
            let alt = self.parse_prefix()?;
            if alt.explicit {
                return Err(ParseError {
                    line,
                    col,
                    message: "operators are not allowed on `||` alternatives".to_owned(),
                });
            }
            terms.push(self.parse_term()?);
        }
        if terms.len() > 1 && prefix.oper != Oper::And {
            return Err(self.error("`!` and `?` cannot be combined with `||`".to_owned()));
        }
        Ok(FieldExpr {
            oper: prefix.oper,
            inout: prefix.inout,
            terms,
        })
    }

    fn parse_prefix(&mut self) -> Result<Prefix, ParseError> {
        let mut explicit = false;
        let inout = if self.eat(&Token::LBracket) {
            explicit = true;
            let word = self.expect_ident()?;
            let inout = match word.as_str() {
                "in" => InOut::In,
                "out" => InOut::Out,
                "inout" => InOut::InOut,
                "none" => InOut::None,
                other => {
                    return Err(self.error(format!("unknown access mode `{other}`")));
                }
            };
            self.expect(&Token::RBracket)?;
            inout
        } else {
            InOut::Default
        };
        let oper = if self.eat(&Token::Bang) {
            explicit = true;
            Oper::Not
        } else if self.eat(&Token::Question) {
            explicit = true;
            Oper::Optional
        } else {
            Oper::And
        };
        Ok(Prefix {
            inout,
            oper,
            explicit,
        })
    }

    fn parse_term(&mut self) -> Result<TermExpr, ParseError> {
        let (line, col) = self.current_span();
        let mut term = TermExpr {
            first: RefExpr::Wildcard,
            second: None,
            source: RefExpr::This,
            traversal: Traversal::SelfOnly,
            line,
            col,
        };

        if self.eat(&Token::LParen) {
            term.first = self.parse_ref()?;
            self.expect(&Token::Comma)?;
            term.second = Some(self.parse_ref()?);
            self.expect(&Token::RParen)?;
            if self.at(&Token::LParen) {
                let (line, col) = self.current_span();
                if self.parse_source(&mut term)?.is_some() {
                    return Err(ParseError {
                        line,
                        col,
                        message: "pair target given twice".to_owned(),
                    });
                }
            }
        } else {
            term.first = self.parse_ref()?;
            if self.at(&Token::LParen) {
                term.second = self.parse_source(&mut term)?;
            }
        }
        Ok(term)
    }

    /// Parses `(source | trav..., second?)`, filling in source and traversal.
    /// Returns the pair target if one was written.
    fn parse_source(&mut self, term: &mut TermExpr) -> Result<Option<RefExpr>, ParseError> {
        self.expect(&Token::LParen)?;

        let mut self_ = false;
        let mut up = false;
        if self.at_traversal() {
            self.parse_traversal(&mut self_, &mut up)?;
        } else {
            term.source = match self.peek().clone() {
                Token::Var(_) => self.parse_var()?,
                Token::Star => {
                    return Err(self.error("a wildcard cannot be a term source".to_owned()));
                }
                _ => self.parse_ref()?,
            };
        }
        while self.eat(&Token::Pipe) {
            if !self.at_traversal() {
                return Err(self.error(format!("expected `self` or `up`, got {}", self.peek())));
            }
            self.parse_traversal(&mut self_, &mut up)?;
        }
        term.traversal = match (self_, up) {
            (_, false) => Traversal::SelfOnly,
            (false, true) => Traversal::Up,
            (true, true) => Traversal::SelfUp,
        };

        let second = if self.eat(&Token::Comma) {
            Some(self.parse_ref()?)
        } else {
            None
        };
        self.expect(&Token::RParen)?;
        Ok(second)
    }

    fn parse_traversal(&mut self, self_: &mut bool, up: &mut bool) -> Result<(), ParseError> {
        match self.expect_ident()?.as_str() {
            "self" => *self_ = true,
            "up" => *up = true,
            other => return Err(self.error(format!("unknown traversal `{other}`"))),
        }
        Ok(())
    }

    fn parse_var(&mut self) -> Result<RefExpr, ParseError> {
        let (line, col) = self.current_span();
        match self.advance() {
            Token::Var(name) if name == "This" => Ok(RefExpr::This),
            Token::Var(name) => Err(ParseError {
                line,
                col,
                message: format!("unsupported variable `${name}`"),
            }),
            other => Err(ParseError {
                line,
                col,
                message: format!("expected variable, got {other}"),
            }),
        }
    }

    fn parse_ref(&mut self) -> Result<RefExpr, ParseError> {
        if self.eat(&Token::Star) {
            return Ok(RefExpr::Wildcard);
        }
        if let Token::Var(_) = self.peek() {
            let (line, col) = self.current_span();
            return Err(ParseError {
                line,
                col,
                message: "variables are only allowed as term source".to_owned(),
            });
        }
        let mut path = self.expect_ident()?;
        while self.eat(&Token::Dot) {
            path.push('.');
            path.push_str(&self.expect_ident()?);
        }
        Ok(RefExpr::Name(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> RefExpr {
        RefExpr::Name(s.to_owned())
    }

    #[test]
    fn test_parse_simple_list() {
        let q = Parser::parse("Position, Velocity").unwrap();
        assert_eq!(q.fields.len(), 2);
        assert_eq!(q.fields[0].terms[0].first, name("Position"));
        assert_eq!(q.fields[1].oper, Oper::And);
    }

    #[test]
    fn test_parse_empty_query() {
        assert!(Parser::parse("   ").unwrap().fields.is_empty());
    }

    #[test]
    fn test_parse_optional_and_not() {
        let q = Parser::parse("Position, ?Velocity, !Frozen").unwrap();
        assert_eq!(q.fields[1].oper, Oper::Optional);
        assert_eq!(q.fields[2].oper, Oper::Not);
    }

    #[test]
    fn test_parse_or_chain_is_one_field() {
        let q = Parser::parse("Position, Velocity || Speed").unwrap();
        assert_eq!(q.fields.len(), 2);
        let chain = &q.fields[1].terms;
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].first, name("Speed"));
    }

    #[test]
    fn test_parse_access_modes() {
        let q = Parser::parse("[in] Position, [out] Velocity, [none] Tag").unwrap();
        assert_eq!(q.fields[0].inout, InOut::In);
        assert_eq!(q.fields[1].inout, InOut::Out);
        assert_eq!(q.fields[2].inout, InOut::None);
    }

    #[test]
    fn test_parse_pair_forms_are_equivalent() {
        let a = Parser::parse("(ChildOf, Sun)").unwrap();
        let b = Parser::parse("ChildOf($This, Sun)").unwrap();
        let (ta, tb) = (&a.fields[0].terms[0], &b.fields[0].terms[0]);
        assert_eq!(ta.first, tb.first);
        assert_eq!(ta.second, tb.second);
        assert_eq!(ta.source, tb.source);
        assert_eq!(ta.second, Some(name("Sun")));
    }

    #[test]
    fn test_parse_wildcard_and_dotted_path() {
        let q = Parser::parse("(ChildOf, *), (Likes, Sun.Earth)").unwrap();
        assert_eq!(q.fields[0].terms[0].second, Some(RefExpr::Wildcard));
        assert_eq!(q.fields[1].terms[0].second, Some(name("Sun.Earth")));
    }

    #[test]
    fn test_parse_sources_and_traversal() {
        let q = Parser::parse("Position(Game), Mass(self|up), Speed(up), (IsA, Ship)($This|self)")
            .unwrap();
        assert_eq!(q.fields[0].terms[0].source, name("Game"));
        assert_eq!(q.fields[1].terms[0].traversal, Traversal::SelfUp);
        assert_eq!(q.fields[1].terms[0].source, RefExpr::This);
        assert_eq!(q.fields[2].terms[0].traversal, Traversal::Up);
        assert_eq!(q.fields[3].terms[0].traversal, Traversal::SelfOnly);
    }

    #[test]
    fn test_keyword_paths_are_sources() {
        let q = Parser::parse("Position(up.Engine), Mass(self.Hull|up), Speed(up)").unwrap();
        assert_eq!(q.fields[0].terms[0].source, name("up.Engine"));
        assert_eq!(q.fields[0].terms[0].traversal, Traversal::SelfOnly);
        assert_eq!(q.fields[1].terms[0].source, name("self.Hull"));
        assert_eq!(q.fields[1].terms[0].traversal, Traversal::Up);
        assert_eq!(q.fields[2].terms[0].source, RefExpr::This);
        assert_eq!(q.fields[2].terms[0].traversal, Traversal::Up);
    }

    #[test]
    fn test_parse_errors_carry_position() {
        let err = Parser::parse("Position,\n  ,Velocity").unwrap_err();
        assert_eq!((err.line, err.col), (2, 3));

        let err = Parser::parse("Position Velocity").unwrap_err();
        assert_eq!((err.line, err.col), (1, 10));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        for input in [
            "Position,",
            "(ChildOf Sun)",
            "[write] Position",
            "A || ?B",
            "?A || B",
            "Position($Other)",
            "(ChildOf, Sun)($This, Earth)",
            "Position(*)",
            "Position(self|sideways)",
            "($This, Sun)",
        ] {
            assert!(Parser::parse(input).is_err(), "accepted {input:?}");
        }
    }
}
