//! Recursive-descent parser for PyHDL
//!
//! Consumes the structured token stream from the lexer and builds the AST.
//! Precedence mirrors Python: ternary < `or` < `and` < `not` < comparison
//! < `|` < `^` < `&` < shifts < additive < multiplicative < unary < `**`
//! < postfix (call / attribute / subscript).

use crate::ast::*;
use crate::lexer::{Token, TokenWithPos};
use crate::ParseError;

/// Parser state over the token stream
pub struct Parser {
    tokens: Vec<TokenWithPos>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<TokenWithPos>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Parse a complete source file
    pub fn parse_source_file(mut self) -> Result<SourceFile, ParseError> {
        let mut body = Vec::new();
        while self.peek().is_some() {
            body.extend(self.parse_statement()?);
        }
        Ok(SourceFile { body })
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Parse one logical line or compound statement.
    ///
    /// Returns a `Vec` because a simple-statement line may carry several
    /// `;`-separated statements.
    fn parse_statement(&mut self) -> Result<Vec<Stmt>, ParseError> {
        match self.peek() {
            Some(Token::Class) => Ok(vec![self.parse_class()?]),
            Some(Token::If) => {
                self.bump();
                Ok(vec![self.parse_if_tail()?])
            }
            Some(Token::For) => Ok(vec![self.parse_for()?]),
            Some(Token::Match) => Ok(vec![self.parse_match()?]),
            Some(Token::Import) | Some(Token::From) => {
                self.skip_line();
                Ok(vec![Stmt::Import])
            }
            _ => self.parse_simple_line(),
        }
    }

    /// `;`-separated simple statements terminated by a newline
    fn parse_simple_line(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        loop {
            stmts.push(self.parse_simple_stmt()?);
            if self.at(&Token::Semicolon) {
                self.bump();
                if self.at(&Token::Newline) {
                    self.bump();
                    break;
                }
                continue;
            }
            self.expect(&Token::Newline, "newline")?;
            break;
        }
        Ok(stmts)
    }

    /// One simple statement: `pass`, assignment, or a bare expression
    fn parse_simple_stmt(&mut self) -> Result<Stmt, ParseError> {
        if self.at(&Token::Pass) {
            self.bump();
            return Ok(Stmt::Pass);
        }
        let line = self.line();
        let expr = self.parse_expr()?;
        if self.at(&Token::Assign) {
            self.bump();
            let value = self.parse_expr()?;
            return Ok(Stmt::Assign(Assign {
                target: expr,
                value,
                line,
            }));
        }
        Ok(Stmt::Expr(expr))
    }

    /// `class Name(Base, ...):` suite
    fn parse_class(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.expect(&Token::Class, "`class`")?;
        let name = self.expect_ident()?;
        let mut bases = Vec::new();
        if self.at(&Token::LParen) {
            self.bump();
            while !self.at(&Token::RParen) {
                bases.push(self.expect_ident()?);
                if self.at(&Token::Comma) {
                    self.bump();
                }
            }
            self.expect(&Token::RParen, "`)`")?;
        }
        let body = self.parse_suite()?;
        Ok(Stmt::ClassDef(ClassDef {
            name,
            bases,
            body,
            line,
        }))
    }

    /// Condition and suite after the `if`/`elif` keyword has been consumed
    fn parse_if_tail(&mut self) -> Result<Stmt, ParseError> {
        let test = self.parse_expr()?;
        let body = self.parse_suite()?;
        let orelse = match self.peek() {
            Some(Token::Elif) => {
                self.bump();
                vec![self.parse_if_tail()?]
            }
            Some(Token::Else) => {
                self.bump();
                self.parse_suite()?
            }
            _ => Vec::new(),
        };
        Ok(Stmt::If(If { test, body, orelse }))
    }

    /// `for name in iterable:` suite
    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.expect(&Token::For, "`for`")?;
        let target = self.expect_ident()?;
        self.expect(&Token::In, "`in`")?;
        let iter = self.parse_expr()?;
        let body = self.parse_suite()?;
        Ok(Stmt::For(For {
            target,
            iter,
            body,
            line,
        }))
    }

    /// `match subject:` with an indented block of `case` arms
    fn parse_match(&mut self) -> Result<Stmt, ParseError> {
        self.expect(&Token::Match, "`match`")?;
        let subject = self.parse_expr()?;
        self.expect(&Token::Colon, "`:`")?;
        self.expect(&Token::Newline, "newline")?;
        self.expect(&Token::Indent, "indented block")?;
        let mut arms = Vec::new();
        while self.at(&Token::Case) {
            self.bump();
            let pattern = match self.parse_expr()? {
                Expr::Name(n) if n == "_" => Pattern::Wildcard,
                expr => Pattern::Value(expr),
            };
            let body = self.parse_suite()?;
            arms.push(MatchArm { pattern, body });
        }
        if arms.is_empty() {
            return Err(self.error("expected at least one `case` arm"));
        }
        self.expect(&Token::Dedent, "dedent")?;
        Ok(Stmt::Match(Match { subject, arms }))
    }

    /// A `:`-introduced suite: an indented block, or statements on the
    /// same line
    fn parse_suite(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(&Token::Colon, "`:`")?;
        if self.at(&Token::Newline) {
            self.bump();
            self.expect(&Token::Indent, "indented block")?;
            let mut stmts = Vec::new();
            while !self.at(&Token::Dedent) {
                if self.peek().is_none() {
                    return Err(self.error("unexpected end of input in block"));
                }
                stmts.extend(self.parse_statement()?);
            }
            self.bump();
            Ok(stmts)
        } else {
            // Inline suite; a trailing compound statement consumes its
            // own terminator
            let mut stmts = Vec::new();
            loop {
                match self.peek() {
                    Some(Token::If) | Some(Token::For) | Some(Token::Match) => {
                        stmts.extend(self.parse_statement()?);
                        break;
                    }
                    _ => {}
                }
                stmts.push(self.parse_simple_stmt()?);
                if self.at(&Token::Semicolon) {
                    self.bump();
                    if self.at(&Token::Newline) {
                        self.bump();
                        break;
                    }
                    continue;
                }
                self.expect(&Token::Newline, "newline")?;
                break;
            }
            Ok(stmts)
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let value = self.parse_or()?;
        if self.at(&Token::If) {
            self.bump();
            let test = self.parse_or()?;
            self.expect(&Token::Else, "`else`")?;
            let orelse = self.parse_expr()?;
            return Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(value),
                orelse: Box::new(orelse),
            });
        }
        Ok(value)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_and()?;
        if !self.at(&Token::Or) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.at(&Token::Or) {
            self.bump();
            values.push(self.parse_and()?);
        }
        Ok(Expr::BoolOp {
            op: BoolOp::Or,
            values,
        })
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_not()?;
        if !self.at(&Token::And) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.at(&Token::And) {
            self.bump();
            values.push(self.parse_not()?);
        }
        Ok(Expr::BoolOp {
            op: BoolOp::And,
            values,
        })
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.at(&Token::Not) {
            self.bump();
            let operand = self.parse_not()?;
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_bitor()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => CmpOp::Eq,
                Some(Token::NotEq) => CmpOp::Ne,
                Some(Token::Lt) => CmpOp::Lt,
                Some(Token::Le) => CmpOp::Le,
                Some(Token::Gt) => CmpOp::Gt,
                Some(Token::Ge) => CmpOp::Ge,
                _ => break,
            };
            self.bump();
            let right = self.parse_bitor()?;
            left = Expr::Compare {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_bitor(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_bitxor()?;
        while self.at(&Token::Pipe) {
            self.bump();
            let right = self.parse_bitxor()?;
            left = binop(left, BinOp::BitOr, right);
        }
        Ok(left)
    }

    fn parse_bitxor(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_bitand()?;
        while self.at(&Token::Caret) {
            self.bump();
            let right = self.parse_bitand()?;
            left = binop(left, BinOp::BitXor, right);
        }
        Ok(left)
    }

    fn parse_bitand(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_shift()?;
        while self.at(&Token::Ampersand) {
            self.bump();
            let right = self.parse_shift()?;
            left = binop(left, BinOp::BitAnd, right);
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_arith()?;
        loop {
            let op = match self.peek() {
                Some(Token::Shl) => BinOp::Shl,
                Some(Token::Shr) => BinOp::Shr,
                _ => break,
            };
            self.bump();
            let right = self.parse_arith()?;
            left = binop(left, op, right);
        }
        Ok(left)
    }

    fn parse_arith(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let right = self.parse_term()?;
            left = binop(left, op, right);
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.bump();
            let right = self.parse_factor()?;
            left = binop(left, op, right);
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            Some(Token::Tilde) => Some(UnaryOp::Invert),
            Some(Token::Minus) => Some(UnaryOp::Neg),
            Some(Token::Plus) => Some(UnaryOp::Pos),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let operand = self.parse_factor()?;
            return Ok(Expr::UnaryOp {
                op,
                operand: Box::new(operand),
            });
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_postfix()?;
        if self.at(&Token::DoubleStar) {
            self.bump();
            // Right-associative, binds tighter than unary on the right
            let exp = self.parse_factor()?;
            return Ok(binop(base, BinOp::Pow, exp));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek() {
                Some(Token::LParen) => {
                    self.bump();
                    let (args, kwargs) = self.parse_call_args()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                    };
                }
                Some(Token::Dot) => {
                    self.bump();
                    let attr = self.expect_ident()?;
                    expr = Expr::Attribute {
                        value: Box::new(expr),
                        attr,
                    };
                }
                Some(Token::LBracket) => {
                    self.bump();
                    let first = self.parse_expr()?;
                    let index = if self.at(&Token::Colon) {
                        self.bump();
                        let second = self.parse_expr()?;
                        Index::Slice {
                            hi: Box::new(first),
                            lo: Box::new(second),
                        }
                    } else {
                        Index::Single(Box::new(first))
                    };
                    self.expect(&Token::RBracket, "`]`")?;
                    expr = Expr::Subscript {
                        value: Box::new(expr),
                        index,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), ParseError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !self.at(&Token::RParen) {
            let is_kwarg = matches!(self.peek(), Some(Token::Identifier(_)))
                && self.peek_nth(1) == Some(&Token::Assign);
            if is_kwarg {
                let name = self.expect_ident()?;
                self.expect(&Token::Assign, "`=`")?;
                let value = self.parse_expr()?;
                kwargs.push((name, value));
            } else {
                args.push(self.parse_expr()?);
            }
            if self.at(&Token::Comma) {
                self.bump();
            } else {
                break;
            }
        }
        self.expect(&Token::RParen, "`)`")?;
        Ok((args, kwargs))
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseError> {
        match self.peek().cloned() {
            Some(Token::Int(v)) => {
                self.bump();
                Ok(Expr::Int(v))
            }
            Some(Token::Identifier(name)) => {
                self.bump();
                Ok(Expr::Name(name))
            }
            Some(Token::LParen) => {
                self.bump();
                let first = self.parse_expr()?;
                if self.at(&Token::Comma) {
                    let mut elts = vec![first];
                    while self.at(&Token::Comma) {
                        self.bump();
                        if self.at(&Token::RParen) {
                            break;
                        }
                        elts.push(self.parse_expr()?);
                    }
                    self.expect(&Token::RParen, "`)`")?;
                    Ok(Expr::Tuple(elts))
                } else {
                    self.expect(&Token::RParen, "`)`")?;
                    Ok(first)
                }
            }
            other => Err(self.error(&format!(
                "expected an expression, found {}",
                describe(other.as_ref())
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Cursor helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|t| &t.token)
    }

    fn at(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn bump(&mut self) -> Option<&TokenWithPos> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn error(&self, message: &str) -> ParseError {
        ParseError {
            line: self.line(),
            message: message.to_string(),
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), ParseError> {
        if self.at(token) {
            self.bump();
            Ok(())
        } else {
            Err(self.error(&format!(
                "expected {}, found {}",
                what,
                describe(self.peek())
            )))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.peek().cloned() {
            Some(Token::Identifier(name)) => {
                self.bump();
                Ok(name)
            }
            other => Err(self.error(&format!(
                "expected an identifier, found {}",
                describe(other.as_ref())
            ))),
        }
    }

    /// Consume everything up to and including the next newline
    fn skip_line(&mut self) {
        while let Some(tok) = self.bump() {
            if tok.token == Token::Newline {
                break;
            }
        }
    }
}

fn binop(left: Expr, op: BinOp, right: Expr) -> Expr {
    Expr::BinOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

/// Human-readable token name for error messages
fn describe(token: Option<&Token>) -> String {
    match token {
        None => "end of input".to_string(),
        Some(Token::Identifier(name)) => format!("`{}`", name),
        Some(Token::Int(v)) => format!("`{}`", v),
        Some(Token::Newline) => "end of line".to_string(),
        Some(Token::Indent) => "indented block".to_string(),
        Some(Token::Dedent) => "dedent".to_string(),
        Some(other) => format!("`{:?}`", other),
    }
}
