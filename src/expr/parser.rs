use crate::error::CompileError;
use crate::expr::lexer::{Lexer, Symbol, Token, TokenKind};
use crate::expr::{BinOp, CodeBlock, CodeStmt, Expr};

pub struct Parser {
    tokens: Vec<Token>,
    idx: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, idx: 0 }
    }

    fn peek(&self) -> &TokenKind {
        self.tokens
            .get(self.idx)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn bump(&mut self) -> TokenKind {
        let kind = self
            .tokens
            .get(self.idx)
            .map(|t| t.kind.clone())
            .unwrap_or(TokenKind::Eof);
        self.idx += 1;
        kind
    }

    fn eat_symbol(&mut self, sym: Symbol) -> bool {
        if *self.peek() == TokenKind::Symbol(sym) {
            self.idx += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, sym: Symbol, what: &str) -> Result<(), CompileError> {
        if self.eat_symbol(sym) {
            Ok(())
        } else {
            Err(CompileError::new(
                format!("expected {} in expression", what),
                0,
            ))
        }
    }

    pub fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    pub fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            TokenKind::Symbol(Symbol::EqEq) => Some(BinOp::Eq),
            TokenKind::Symbol(Symbol::NotEq) => Some(BinOp::NotEq),
            _ => None,
        };
        match op {
            None => Ok(left),
            Some(op) => {
                self.idx += 1;
                let right = self.parse_additive()?;
                Ok(Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.parse_postfix()?;
        while self.eat_symbol(Symbol::Plus) {
            let right = self.parse_postfix()?;
            expr = Expr::Binary {
                op: BinOp::Add,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_symbol(Symbol::Dot) {
                match self.bump() {
                    TokenKind::Ident(name) => {
                        expr = Expr::Attr {
                            base: Box::new(expr),
                            name,
                        };
                    }
                    _ => return Err(CompileError::new("expected name after '.'", 0)),
                }
            } else if self.eat_symbol(Symbol::LParen) {
                let (args, kwargs) = self.parse_call_args()?;
                expr = Expr::Call {
                    target: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.eat_symbol(Symbol::LBracket) {
                let key = self.parse_expr()?;
                self.expect_symbol(Symbol::RBracket, "']'")?;
                expr = Expr::Index {
                    base: Box::new(expr),
                    key: Box::new(key),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), CompileError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if self.eat_symbol(Symbol::RParen) {
            return Ok((args, kwargs));
        }
        loop {
            // `name=expr` is a keyword argument; a lone `name` is positional
            if let TokenKind::Ident(name) = self.peek().clone() {
                if self.tokens.get(self.idx + 1).map(|t| &t.kind)
                    == Some(&TokenKind::Symbol(Symbol::Eq))
                {
                    self.idx += 2;
                    let value = self.parse_expr()?;
                    kwargs.push((name, value));
                    if self.eat_symbol(Symbol::Comma) {
                        continue;
                    }
                    self.expect_symbol(Symbol::RParen, "')'")?;
                    return Ok((args, kwargs));
                }
            }
            if !kwargs.is_empty() {
                return Err(CompileError::new(
                    "positional argument follows keyword argument",
                    0,
                ));
            }
            args.push(self.parse_expr()?);
            if self.eat_symbol(Symbol::Comma) {
                continue;
            }
            self.expect_symbol(Symbol::RParen, "')'")?;
            return Ok((args, kwargs));
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        match self.bump() {
            TokenKind::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                _ => Ok(Expr::Name(name)),
            },
            TokenKind::IntLit(value) => Ok(Expr::Int(value)),
            TokenKind::StringLit(value) => Ok(Expr::Str(value)),
            TokenKind::Symbol(Symbol::LParen) => {
                let inner = self.parse_expr()?;
                self.expect_symbol(Symbol::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Symbol(Symbol::LBracket) => {
                let mut items = Vec::new();
                if self.eat_symbol(Symbol::RBracket) {
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.parse_expr()?);
                    if self.eat_symbol(Symbol::Comma) {
                        continue;
                    }
                    self.expect_symbol(Symbol::RBracket, "']'")?;
                    return Ok(Expr::List(items));
                }
            }
            TokenKind::Eof => Err(CompileError::new("unexpected end of expression", 0)),
            other => Err(CompileError::new(
                format!("unexpected token {:?} in expression", other),
                0,
            )),
        }
    }
}

/// Parse a single expression, requiring all input to be consumed.
pub fn parse_expr_text(src: &str) -> Result<Expr, CompileError> {
    let tokens = Lexer::new(src).lex_all()?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expr()?;
    if !parser.at_eof() {
        return Err(CompileError::new(
            format!("trailing input in expression '{}'", src.trim()),
            0,
        ));
    }
    Ok(expr)
}

/// Parse `expr | filter | filter(arg)` into the expression plus its escapes.
pub fn parse_expr_with_escapes(src: &str) -> Result<(Expr, Vec<Expr>), CompileError> {
    let tokens = Lexer::new(src).lex_all()?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expr()?;
    let mut escapes = Vec::new();
    while parser.eat_symbol(Symbol::Pipe) {
        escapes.push(parser.parse_expr()?);
    }
    if !parser.at_eof() {
        return Err(CompileError::new(
            format!("trailing input in expression '{}'", src.trim()),
            0,
        ));
    }
    Ok((expr, escapes))
}

/// Parse an embedded code block: assignment and expression statements
/// separated by newlines or semicolons.
pub fn parse_code_text(src: &str) -> Result<CodeBlock, CompileError> {
    let mut stmts = Vec::new();
    for raw in src.split(|c| c == '\n' || c == ';') {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tokens = Lexer::new(line).lex_all()?;
        let assign_target = match (tokens.first().map(|t| &t.kind), tokens.get(1).map(|t| &t.kind)) {
            (Some(TokenKind::Ident(name)), Some(TokenKind::Symbol(Symbol::Eq))) => {
                Some(name.clone())
            }
            _ => None,
        };
        let mut parser = Parser::new(tokens);
        let stmt = match assign_target {
            Some(name) => {
                parser.idx += 2;
                CodeStmt::Assign {
                    name,
                    value: parser.parse_expr()?,
                }
            }
            None => CodeStmt::Expr(parser.parse_expr()?),
        };
        if !parser.at_eof() {
            return Err(CompileError::new(
                format!("trailing input in code statement '{}'", line),
                0,
            ));
        }
        stmts.push(stmt);
    }
    Ok(CodeBlock {
        stmts,
        source: src.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_attr_call_chain() {
        let expr = parse_expr_text("caller.context['caller'].body()").expect("parse");
        match expr {
            Expr::Call { target, args, .. } => {
                assert!(args.is_empty());
                assert!(matches!(*target, Expr::Attr { .. }));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn parses_escapes() {
        let (expr, escapes) = parse_expr_with_escapes("x | h | myfilter(y)").expect("parse");
        assert!(matches!(expr, Expr::Name(ref n) if n == "x"));
        assert_eq!(escapes.len(), 2);
        assert!(matches!(escapes[1], Expr::Call { .. }));
    }

    #[test]
    fn parses_code_block() {
        let block = parse_code_text("x = 1\ny = x + 2; z = 'hé'").expect("parse");
        assert_eq!(block.stmts.len(), 3);
        assert!(matches!(block.stmts[0], CodeStmt::Assign { ref name, .. } if name == "x"));
    }

    #[test]
    fn rejects_positional_after_keyword() {
        assert!(parse_expr_text("foo(a=1, b)").is_err());
    }
}
