use crate::ast::*;
use crate::lexer::Token;

pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("Parse error at token {position}: {message}")]
pub struct ParseError {
    pub code: &'static str,
    pub position: usize,
    pub span: Span,
    pub message: String,
}

type Result<T> = std::result::Result<T, ParseError>;

/// Binding power, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Assign,
    Conditional,
    Or,
    And,
    Equals,
    LessGreater,
    Sum,
    Product,
    Prefix,
    Postfix,
    Call,
}

fn infix_precedence(token: &Token) -> Precedence {
    match token {
        Token::Assign => Precedence::Assign,
        Token::Question => Precedence::Conditional,
        Token::Or => Precedence::Or,
        Token::And => Precedence::And,
        Token::Eq | Token::NotEq => Precedence::Equals,
        Token::Lt | Token::Gt => Precedence::LessGreater,
        Token::Plus | Token::Minus => Precedence::Sum,
        Token::Asterisk | Token::Slash => Precedence::Product,
        Token::Increment | Token::Decrement => Precedence::Postfix,
        Token::LParen | Token::LBracket => Precedence::Call,
        _ => Precedence::Lowest,
    }
}

fn infix_op(token: &Token) -> Option<InfixOp> {
    Some(match token {
        Token::Plus => InfixOp::Add,
        Token::Minus => InfixOp::Subtract,
        Token::Asterisk => InfixOp::Multiply,
        Token::Slash => InfixOp::Divide,
        Token::Lt => InfixOp::LessThan,
        Token::Gt => InfixOp::GreaterThan,
        Token::Eq => InfixOp::Equals,
        Token::NotEq => InfixOp::NotEquals,
        Token::And => InfixOp::And,
        Token::Or => InfixOp::Or,
        _ => return None,
    })
}

impl Parser {
    pub fn new(tokens: Vec<(Token, Span)>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    /// Span of the next token; at EOF, an empty span just past the last token.
    fn peek_span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some((_, span)) => *span,
            None => self
                .tokens
                .last()
                .map(|(_, s)| Span::new(s.end, s.end))
                .unwrap_or(Span::UNKNOWN),
        }
    }

    /// Span of the previously consumed token.
    fn prev_span(&self) -> Span {
        if self.pos > 0 {
            self.tokens[self.pos - 1].1
        } else {
            Span::UNKNOWN
        }
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<Span> {
        match self.peek() {
            Some(tok) if tok == expected => {
                let span = self.peek_span();
                self.advance();
                Ok(span)
            }
            Some(tok) => Err(self.error(
                "MK-P003",
                format!("expected {}, got {}", expected.describe(), tok.describe()),
            )),
            None => Err(self.error("MK-P004", format!("expected {}, got EOF", expected.describe()))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            Some(tok) => Err(self.error("MK-P005", format!("expected identifier, got {}", tok.describe()))),
            None => Err(self.error("MK-P006", "expected identifier, got EOF".into())),
        }
    }

    fn error(&self, code: &'static str, message: String) -> ParseError {
        ParseError {
            code,
            position: self.pos,
            span: self.peek_span(),
            message,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    // ---- Top-level parsing ----

    pub fn parse_program(&mut self) -> (Program, Vec<ParseError>) {
        let mut statements = Vec::new();
        let mut errors: Vec<ParseError> = Vec::new();
        const MAX_ERRORS: usize = 20;

        while !self.at_end() {
            if errors.len() >= MAX_ERRORS {
                break;
            }
            let start = self.pos;
            match self.parse_stmt() {
                Ok(stmt) => statements.push(stmt),
                Err(e) => {
                    errors.push(e);
                    self.sync_to_stmt_boundary(start);
                }
            }
        }

        (Program { statements, source: None }, errors)
    }

    /// Rewind to the failed statement's first token, then skip to just past the
    /// next top-level `;` or up to the next `let`/`return`. Brace depth is
    /// tracked so nested blocks are skipped whole.
    fn sync_to_stmt_boundary(&mut self, start: usize) {
        self.pos = start;
        let mut depth: usize = 0;

        while let Some(tok) = self.peek() {
            match tok {
                Token::LBrace => depth += 1,
                Token::RBrace => depth = depth.saturating_sub(1),
                Token::Semicolon if depth == 0 => {
                    self.advance();
                    return;
                }
                Token::Let | Token::Return if depth == 0 && self.pos > start => return,
                _ => {}
            }
            self.advance();
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        match self.peek() {
            Some(Token::Let) => self.parse_let(),
            Some(Token::Return) => self.parse_return(),
            _ => {
                let expr = self.parse_expr(Precedence::Lowest)?;
                self.eat(&Token::Semicolon);
                Ok(Stmt::Expr(expr))
            }
        }
    }

    /// `let name = value;`
    fn parse_let(&mut self) -> Result<Stmt> {
        let start = self.expect(&Token::Let)?;
        let name = self.expect_ident()?;
        self.expect(&Token::Assign)?;
        let mut value = self.parse_expr(Precedence::Lowest)?;
        if let Expr::Function { name: fn_name @ None, .. } = &mut value.node {
            *fn_name = Some(name.clone());
        }
        self.eat(&Token::Semicolon);
        Ok(Stmt::Let {
            name,
            value,
            span: start.merge(self.prev_span()),
        })
    }

    /// `return;` or `return value;`
    fn parse_return(&mut self) -> Result<Stmt> {
        let start = self.expect(&Token::Return)?;
        let value = match self.peek() {
            None | Some(Token::Semicolon) | Some(Token::RBrace) => None,
            Some(_) => Some(self.parse_expr(Precedence::Lowest)?),
        };
        self.eat(&Token::Semicolon);
        Ok(Stmt::Return {
            value,
            span: start.merge(self.prev_span()),
        })
    }

    /// `{ stmt* }`
    fn parse_block(&mut self) -> Result<Block> {
        self.expect(&Token::LBrace)?;
        let mut statements = Vec::new();
        while !matches!(self.peek(), None | Some(Token::RBrace)) {
            statements.push(self.parse_stmt()?);
        }
        self.expect(&Token::RBrace)?;
        Ok(Block { statements })
    }

    // ---- Expressions ----

    fn parse_expr(&mut self, precedence: Precedence) -> Result<ExprNode> {
        let mut left = self.parse_prefix()?;

        while let Some(tok) = self.peek() {
            if precedence >= infix_precedence(tok) {
                break;
            }
            left = self.parse_infix(left)?;
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<ExprNode> {
        let start = self.peek_span();
        let Some(tok) = self.peek().cloned() else {
            return Err(self.error("MK-P002", "expected expression, got EOF".into()));
        };

        let expr = match tok {
            Token::Ident(name) => {
                self.advance();
                Expr::Ident(name)
            }
            Token::Int(n) => {
                self.advance();
                Expr::Integer(n)
            }
            Token::Double(n) => {
                self.advance();
                Expr::Double(n)
            }
            Token::Str(s) => {
                self.advance();
                Expr::Str(s)
            }
            Token::True | Token::False => {
                self.advance();
                Expr::Boolean(tok == Token::True)
            }
            Token::Null => {
                self.advance();
                Expr::Null
            }
            Token::Minus | Token::Bang | Token::Increment | Token::Decrement => {
                self.advance();
                let op = match tok {
                    Token::Minus => PrefixOp::Minus,
                    Token::Bang => PrefixOp::Bang,
                    Token::Increment => PrefixOp::Increment,
                    _ => PrefixOp::Decrement,
                };
                let operand = self.parse_expr(Precedence::Prefix)?;
                Expr::Prefix { op, operand: Box::new(operand) }
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr(Precedence::Lowest)?;
                self.expect(&Token::RParen)?;
                // Grouping keeps the inner node but widens its span to the parens
                return Ok(Spanned::new(inner.node, start.merge(self.prev_span())));
            }
            Token::If => self.parse_if()?,
            Token::While => self.parse_while()?,
            Token::Function => self.parse_function()?,
            Token::LBracket => {
                self.advance();
                Expr::Array(self.parse_expr_list(&Token::RBracket)?)
            }
            Token::LBrace => self.parse_map()?,
            other => {
                return Err(self.error("MK-P001", format!("expected expression, got {}", other.describe())));
            }
        };

        Ok(Spanned::new(expr, start.merge(self.prev_span())))
    }

    fn parse_infix(&mut self, left: ExprNode) -> Result<ExprNode> {
        let start = left.span;
        let tok = match self.advance() {
            Some(tok) => tok.clone(),
            None => return Ok(left),
        };

        let expr = match tok {
            Token::Assign => {
                if !matches!(left.node, Expr::Ident(_) | Expr::Index { .. }) {
                    return Err(ParseError {
                        code: "MK-P007",
                        position: self.pos - 1,
                        span: left.span,
                        message: format!("invalid assignment target: {}", left),
                    });
                }
                let value = self.parse_expr(Precedence::Lowest)?;
                Expr::Assign { target: Box::new(left), value: Box::new(value) }
            }
            Token::Question => {
                let consequence = self.parse_expr(Precedence::Lowest)?;
                self.expect(&Token::Colon)?;
                let alternative = self.parse_expr(Precedence::Assign)?;
                Expr::Conditional {
                    condition: Box::new(left),
                    consequence: Box::new(consequence),
                    alternative: Box::new(alternative),
                }
            }
            Token::Increment | Token::Decrement => {
                let op = if tok == Token::Increment { PostfixOp::Increment } else { PostfixOp::Decrement };
                Expr::Postfix { op, operand: Box::new(left) }
            }
            Token::LParen => {
                let args = self.parse_expr_list(&Token::RParen)?;
                Expr::Call { function: Box::new(left), args }
            }
            Token::LBracket => {
                let index = self.parse_expr(Precedence::Lowest)?;
                self.expect(&Token::RBracket)?;
                Expr::Index { left: Box::new(left), index: Box::new(index) }
            }
            other => {
                let Some(op) = infix_op(&other) else {
                    return Err(self.error("MK-P008", format!("unexpected {} after expression", other.describe())));
                };
                let right = self.parse_expr(infix_precedence(&other))?;
                Expr::Infix { op, left: Box::new(left), right: Box::new(right) }
            }
        };

        Ok(Spanned::new(expr, start.merge(self.prev_span())))
    }

    /// Comma-separated expressions up to and including `end`.
    fn parse_expr_list(&mut self, end: &Token) -> Result<Vec<ExprNode>> {
        let mut items = Vec::new();
        if self.eat(end) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr(Precedence::Lowest)?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(end)?;
        Ok(items)
    }

    /// `if cond { ... } else { ... }`
    fn parse_if(&mut self) -> Result<Expr> {
        self.expect(&Token::If)?;
        let condition = self.parse_expr(Precedence::Lowest)?;
        let consequence = self.parse_block()?;
        let alternative = if self.eat(&Token::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(Expr::If { condition: Box::new(condition), consequence, alternative })
    }

    /// `while cond { ... }`
    fn parse_while(&mut self) -> Result<Expr> {
        self.expect(&Token::While)?;
        let condition = self.parse_expr(Precedence::Lowest)?;
        let body = self.parse_block()?;
        Ok(Expr::While { condition: Box::new(condition), body })
    }

    /// `fn(a, b) { ... }`
    fn parse_function(&mut self) -> Result<Expr> {
        self.expect(&Token::Function)?;
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                params.push(self.expect_ident()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RParen)?;
        }
        let body = self.parse_block()?;
        Ok(Expr::Function { name: None, params, body })
    }

    /// `{k: v, ...}`
    fn parse_map(&mut self) -> Result<Expr> {
        self.expect(&Token::LBrace)?;
        let mut pairs = Vec::new();
        while !self.eat(&Token::RBrace) {
            let key = self.parse_expr(Precedence::Lowest)?;
            self.expect(&Token::Colon)?;
            let value = self.parse_expr(Precedence::Lowest)?;
            pairs.push((key, value));
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RBrace)?;
                break;
            }
        }
        Ok(Expr::Map(pairs))
    }
}

/// Parse a token stream, collecting up to 20 errors with statement-level recovery.
pub fn parse(tokens: Vec<(Token, Span)>) -> (Program, Vec<ParseError>) {
    let mut parser = Parser::new(tokens);
    parser.parse_program()
}
