use std::fmt;

use super::ast::{
    ActionStatement, EntityStatement, Expression, InfixOp, RelationStatement,
    RelationTypeStatement, SchemaAst,
};
use super::lexer::Lexer;
use super::token::{Position, Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    UnexpectedToken,
    ExpectedIdentifier,
    ExpectedLBrace,
    ExpectedRBrace,
    ExpectedAssign,
    ExpectedRParen,
    ExpectedExpression,
    IllegalCharacter,
}

impl ParseErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseErrorKind::UnexpectedToken => "unexpected_token",
            ParseErrorKind::ExpectedIdentifier => "expected_identifier",
            ParseErrorKind::ExpectedLBrace => "expected_lbrace",
            ParseErrorKind::ExpectedRBrace => "expected_rbrace",
            ParseErrorKind::ExpectedAssign => "expected_assign",
            ParseErrorKind::ExpectedRParen => "expected_rparen",
            ParseErrorKind::ExpectedExpression => "expected_expression",
            ParseErrorKind::IllegalCharacter => "illegal_character",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at {position}, found '{found}'")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub position: Position,
    pub found: String,
}

impl ParseError {
    fn at(kind: ParseErrorKind, token: &Token) -> Self {
        Self {
            kind,
            position: token.position,
            found: token.kind.to_string(),
        }
    }
}

/// Operator binding powers: `or` < `and` < `.`; `not` is prefix-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Or,
    And,
    Path,
}

fn precedence_of(kind: &TokenKind) -> Precedence {
    match kind {
        TokenKind::Or => Precedence::Or,
        TokenKind::And => Precedence::And,
        TokenKind::Dot => Precedence::Path,
        _ => Precedence::Lowest,
    }
}

/// Recursive-descent parser with Pratt expression parsing.
pub struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
}

impl Parser {
    pub fn new(input: &str) -> Self {
        Self {
            tokens: Lexer::new(input).tokenize(),
            cursor: 0,
        }
    }

    pub fn parse(mut self) -> Result<SchemaAst, ParseError> {
        let mut statements = Vec::new();
        while self.current().kind != TokenKind::Eof {
            statements.push(self.parse_entity_statement()?);
        }
        Ok(SchemaAst { statements })
    }

    fn current(&self) -> &Token {
        &self.tokens[self.cursor]
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.cursor].clone();
        if self.cursor < self.tokens.len() - 1 {
            self.cursor += 1;
        }
        token
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.current().kind.clone() {
            TokenKind::Ident(name) => {
                self.bump();
                Ok(name)
            }
            TokenKind::Illegal(_) => Err(ParseError::at(
                ParseErrorKind::IllegalCharacter,
                self.current(),
            )),
            _ => Err(ParseError::at(
                ParseErrorKind::ExpectedIdentifier,
                self.current(),
            )),
        }
    }

    fn expect(&mut self, kind: TokenKind, error: ParseErrorKind) -> Result<(), ParseError> {
        if self.current().kind == kind {
            self.bump();
            Ok(())
        } else {
            Err(ParseError::at(error, self.current()))
        }
    }

    fn take_option(&mut self) -> Option<String> {
        if let TokenKind::Option(value) = self.current().kind.clone() {
            self.bump();
            Some(value)
        } else {
            None
        }
    }

    fn parse_entity_statement(&mut self) -> Result<EntityStatement, ParseError> {
        self.expect(TokenKind::Entity, ParseErrorKind::UnexpectedToken)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::LBrace, ParseErrorKind::ExpectedLBrace)?;

        let mut relations = Vec::new();
        let mut actions = Vec::new();
        loop {
            match self.current().kind.clone() {
                TokenKind::Relation => relations.push(self.parse_relation_statement()?),
                TokenKind::Action => actions.push(self.parse_action_statement()?),
                TokenKind::RBrace => break,
                _ => {
                    return Err(ParseError::at(
                        ParseErrorKind::ExpectedRBrace,
                        self.current(),
                    ));
                }
            }
        }
        self.bump();
        let option = self.take_option();

        Ok(EntityStatement {
            name,
            relations,
            actions,
            option,
        })
    }

    fn parse_relation_statement(&mut self) -> Result<RelationStatement, ParseError> {
        self.bump();
        let name = self.expect_ident()?;

        let mut types = Vec::new();
        loop {
            match self.current().kind.clone() {
                TokenKind::Sign | TokenKind::Ident(_) => {
                    types.push(self.parse_relation_type()?);
                }
                _ => break,
            }
        }
        let option = self.take_option();

        Ok(RelationStatement {
            name,
            types,
            option,
        })
    }

    fn parse_relation_type(&mut self) -> Result<RelationTypeStatement, ParseError> {
        let signed = if self.current().kind == TokenKind::Sign {
            self.bump();
            true
        } else {
            false
        };
        let entity = self.expect_ident()?;
        let relation = if self.current().kind == TokenKind::Hash {
            self.bump();
            Some(self.expect_ident()?)
        } else {
            None
        };

        Ok(RelationTypeStatement {
            signed,
            entity,
            relation,
        })
    }

    fn parse_action_statement(&mut self) -> Result<ActionStatement, ParseError> {
        self.bump();
        let name = self.expect_ident()?;
        self.expect(TokenKind::Assign, ParseErrorKind::ExpectedAssign)?;
        let expression = self.parse_expression(Precedence::Lowest)?;

        Ok(ActionStatement { name, expression })
    }

    fn parse_expression(&mut self, min: Precedence) -> Result<Expression, ParseError> {
        let mut left = self.parse_prefix()?;

        while precedence_of(&self.current().kind) > min {
            let op_token = self.bump();
            left = match op_token.kind {
                TokenKind::Or => {
                    let right = self.parse_expression(Precedence::Or)?;
                    Expression::infix(InfixOp::Or, left, right)
                }
                TokenKind::And => {
                    let right = self.parse_expression(Precedence::And)?;
                    Expression::infix(InfixOp::And, left, right)
                }
                TokenKind::Dot => {
                    // The expression tree is binary: `rel.action` only.
                    let Expression::Identifier { name: relation } = left else {
                        return Err(ParseError::at(ParseErrorKind::UnexpectedToken, &op_token));
                    };
                    let action = self.expect_ident()?;
                    Expression::path(relation, action)
                }
                _ => unreachable!("precedence_of only admits infix operators"),
            };
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expression, ParseError> {
        match self.current().kind.clone() {
            TokenKind::Ident(name) => {
                self.bump();
                Ok(Expression::ident(name))
            }
            TokenKind::Not => {
                self.bump();
                // The operand is a single path or parenthesized group;
                // `and`/`or` bind outside the `not`.
                let operand = self.parse_expression(Precedence::And)?;
                Ok(Expression::not(operand))
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.parse_expression(Precedence::Lowest)?;
                self.expect(TokenKind::RParen, ParseErrorKind::ExpectedRParen)?;
                Ok(inner)
            }
            TokenKind::Illegal(_) => Err(ParseError::at(
                ParseErrorKind::IllegalCharacter,
                self.current(),
            )),
            _ => Err(ParseError::at(
                ParseErrorKind::ExpectedExpression,
                self.current(),
            )),
        }
    }
}

/// Parses schema DSL text into its AST.
pub fn parse_schema(input: &str) -> Result<SchemaAst, ParseError> {
    Parser::new(input).parse()
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
