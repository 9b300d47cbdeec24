use crate::error::CompileError;

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Ident(String),
    IntLit(i64),
    StringLit(String),
    Symbol(Symbol),
    Eof,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Symbol {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Eq,
    EqEq,
    NotEq,
    Plus,
    Pipe,
}

#[derive(Clone, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: usize,
}

pub struct Lexer<'a> {
    bytes: &'a [u8],
    idx: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            bytes: src.as_bytes(),
            idx: 0,
        }
    }

    pub fn lex_all(mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = matches!(tok.kind, TokenKind::Eof);
            tokens.push(tok);
            if is_eof {
                return Ok(tokens);
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.idx).copied()
    }

    fn next_token(&mut self) -> Result<Token, CompileError> {
        while matches!(self.peek(), Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n')) {
            self.idx += 1;
        }
        let pos = self.idx;
        let Some(b) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                pos,
            });
        };
        let kind = match b {
            b'(' => self.symbol(Symbol::LParen),
            b')' => self.symbol(Symbol::RParen),
            b'[' => self.symbol(Symbol::LBracket),
            b']' => self.symbol(Symbol::RBracket),
            b',' => self.symbol(Symbol::Comma),
            b'.' => self.symbol(Symbol::Dot),
            b'+' => self.symbol(Symbol::Plus),
            b'|' => self.symbol(Symbol::Pipe),
            b'=' => {
                self.idx += 1;
                if self.peek() == Some(b'=') {
                    self.idx += 1;
                    TokenKind::Symbol(Symbol::EqEq)
                } else {
                    TokenKind::Symbol(Symbol::Eq)
                }
            }
            b'!' => {
                self.idx += 1;
                if self.peek() == Some(b'=') {
                    self.idx += 1;
                    TokenKind::Symbol(Symbol::NotEq)
                } else {
                    return Err(CompileError::new("expected '=' after '!'", 0));
                }
            }
            b'"' | b'\'' => self.string(b)?,
            b'0'..=b'9' => self.number()?,
            b'_' | b'a'..=b'z' | b'A'..=b'Z' => self.ident(),
            other => {
                return Err(CompileError::new(
                    format!("unexpected character '{}' in expression", other as char),
                    0,
                ))
            }
        };
        Ok(Token { kind, pos })
    }

    fn symbol(&mut self, sym: Symbol) -> TokenKind {
        self.idx += 1;
        TokenKind::Symbol(sym)
    }

    fn ident(&mut self) -> TokenKind {
        let start = self.idx;
        while matches!(self.peek(), Some(b'_' | b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9')) {
            self.idx += 1;
        }
        let text = std::str::from_utf8(&self.bytes[start..self.idx])
            .unwrap_or_default()
            .to_string();
        TokenKind::Ident(text)
    }

    fn number(&mut self) -> Result<TokenKind, CompileError> {
        let start = self.idx;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.idx += 1;
        }
        let text = std::str::from_utf8(&self.bytes[start..self.idx]).unwrap_or_default();
        let value = text
            .parse::<i64>()
            .map_err(|_| CompileError::new(format!("integer literal '{}' out of range", text), 0))?;
        Ok(TokenKind::IntLit(value))
    }

    fn string(&mut self, quote: u8) -> Result<TokenKind, CompileError> {
        self.idx += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(CompileError::new("unterminated string literal", 0)),
                Some(b) if b == quote => {
                    self.idx += 1;
                    return Ok(TokenKind::StringLit(out));
                }
                Some(b'\\') => {
                    self.idx += 1;
                    let esc = self
                        .peek()
                        .ok_or_else(|| CompileError::new("unterminated string literal", 0))?;
                    out.push(match esc {
                        b'n' => '\n',
                        b't' => '\t',
                        b'\\' => '\\',
                        b'\'' => '\'',
                        b'"' => '"',
                        other => {
                            return Err(CompileError::new(
                                format!("unknown escape '\\{}'", other as char),
                                0,
                            ))
                        }
                    });
                    self.idx += 1;
                }
                Some(_) => {
                    // consume one full utf-8 scalar so multibyte text survives
                    let rest = std::str::from_utf8(&self.bytes[self.idx..])
                        .map_err(|_| CompileError::new("invalid utf-8 in string literal", 0))?;
                    let ch = rest.chars().next().unwrap_or('\u{fffd}');
                    out.push(ch);
                    self.idx += ch.len_utf8();
                }
            }
        }
    }
}
