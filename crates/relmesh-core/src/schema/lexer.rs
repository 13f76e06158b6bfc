use super::token::{Position, Token, TokenKind};

/// Hand-written lexer for the schema DSL.
///
/// Whitespace (including newlines) and `//` line comments are skipped.
/// Unknown bytes become `Illegal` tokens rather than aborting, so the parser
/// can report the position.
pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_trivia();
        let position = self.position();

        let Some(c) = self.advance() else {
            return Token::new(TokenKind::Eof, position);
        };

        let kind = match c {
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '=' => TokenKind::Assign,
            '@' => TokenKind::Sign,
            '#' => TokenKind::Hash,
            '.' => TokenKind::Dot,
            ',' => TokenKind::Comma,
            '`' => self.read_option(),
            c if is_ident_start(c) => {
                let ident = self.read_ident(c);
                TokenKind::from_ident(&ident)
            }
            other => TokenKind::Illegal(other),
        };

        Token::new(kind, position)
    }

    /// Drains the remaining input into a token vector ending with `Eof`.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return tokens;
            }
        }
    }

    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.chars.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') => {
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    if lookahead.peek() == Some(&'/') {
                        while let Some(&c) = self.chars.peek() {
                            if c == '\n' {
                                break;
                            }
                            self.advance();
                        }
                    } else {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn read_ident(&mut self, first: char) -> String {
        let mut ident = String::new();
        ident.push(first);
        while let Some(&c) = self.chars.peek() {
            if is_ident_continue(c) {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }
        ident
    }

    fn read_option(&mut self) -> TokenKind {
        let mut value = String::new();
        loop {
            match self.advance() {
                Some('`') => return TokenKind::Option(value),
                Some(c) => value.push(c),
                // Unterminated option: the open back-tick is the offender.
                None => return TokenKind::Illegal('`'),
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
