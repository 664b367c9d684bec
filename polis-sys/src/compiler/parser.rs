use crate::compiler::ast::{BinaryOp, Block, Expr, LValueHop, LambdaBody, Stmt};
use crate::compiler::scanner::{ScanResult, ScanToken};
use crate::trace;

use crate::compiler::parser::ParserErrorType::{*};
use crate::compiler::scanner::ScanToken::{*};

/// Parses a scanned token stream into a syntax tree. Aborts on the first
/// error: a policy program is small enough that recovery buys nothing.
pub fn parse(scan_result: ScanResult) -> Result<Block, ParserError> {
    let mut parser: Parser = Parser {
        tokens: scan_result.tokens,
        pos: 0,
        lineno: 0,
        depth: 0,
    };
    parser.parse_program()
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ParserError {
    pub error: ParserErrorType,
    pub lineno: usize,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ParserErrorType {
    UnexpectedEoF,
    UnexpectedEoFExpecting(ScanToken),
    UnexpectedToken(ScanToken),

    Expecting(ScanToken, ScanToken),

    ExpectedExpressionTerminal(ScanToken),
    ExpectedIdentifier(ScanToken),
    ExpectedCommaOrEndOfArguments(ScanToken),
    ExpectedCommaOrEndOfList(ScanToken),
    ExpectedCommaOrEndOfDict(ScanToken),
    ExpectedDictKey(ScanToken),
}

struct Parser {
    tokens: Vec<ScanToken>,
    pos: usize,

    lineno: usize,

    /// Nesting depth of `( [ {` delimiters. Newlines are statement
    /// separators at depth zero and transparent inside delimiters.
    depth: u32,
}

impl Parser {
    fn parse_program(&mut self) -> Result<Block, ParserError> {
        trace::trace_parser!("rule <program>");
        let block = self.parse_statements()?;
        match self.peek() {
            None => Ok(block),
            Some(_) => {
                let token = self.advance().unwrap();
                Err(self.error(UnexpectedToken(token)))
            }
        }
    }

    fn parse_statements(&mut self) -> Result<Block, ParserError> {
        trace::trace_parser!("rule <statements>");
        let mut statements: Vec<Stmt> = Vec::new();
        loop {
            self.skip_new_lines();
            match self.peek() {
                None | Some(KeywordEnd | KeywordElif | KeywordElse) => break,
                _ => statements.push(self.parse_statement()?),
            }
        }
        Ok(Block(statements))
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParserError> {
        trace::trace_parser!("rule <statement>");
        match self.peek() {
            Some(KeywordPrint) => {
                self.advance();
                Ok(Stmt::Print(self.parse_expression()?))
            }
            Some(KeywordReturn) => {
                self.advance();
                if self.at_statement_end() {
                    Ok(Stmt::Return(None))
                } else {
                    Ok(Stmt::Return(Some(self.parse_expression()?)))
                }
            }
            Some(KeywordIf) => self.parse_if(),
            Some(KeywordFor) => self.parse_for(),
            Some(KeywordDef) => self.parse_def(),
            Some(Identifier(_)) => self.parse_assignment_or_expression(),
            _ => Ok(Stmt::Expr(self.parse_expression()?)),
        }
    }

    fn parse_assignment_or_expression(&mut self) -> Result<Stmt, ParserError> {
        if matches!(self.peek2(), Some(Equals)) {
            let name = self.expect_identifier()?;
            self.advance(); // '='
            let value = self.parse_expression()?;
            return Ok(Stmt::Assign(name, value));
        }

        // `name.hop[key] := value` needs unbounded lookahead to tell apart
        // from a postfix expression statement, so try it and roll back.
        let mark = self.mark();
        match self.try_parse_lvalue_assign() {
            Ok(Some(statement)) => Ok(statement),
            _ => {
                self.reset(mark);
                Ok(Stmt::Expr(self.parse_expression()?))
            }
        }
    }

    fn try_parse_lvalue_assign(&mut self) -> Result<Option<Stmt>, ParserError> {
        let name = self.expect_identifier()?;
        let mut hops: Vec<LValueHop> = Vec::new();
        loop {
            if self.accept(&Dot) {
                match self.advance() {
                    Some(Identifier(attr)) => hops.push(LValueHop::Attr(attr)),
                    _ => return Ok(None),
                }
            } else if matches!(self.peek(), Some(OpenSquareBracket)) {
                self.advance();
                self.depth += 1;
                let key = self.parse_expression()?;
                self.expect(CloseSquareBracket)?;
                self.depth -= 1;
                hops.push(LValueHop::Index(key));
            } else {
                break;
            }
        }
        if !hops.is_empty() && self.accept(&ColonEquals) {
            let value = self.parse_expression()?;
            return Ok(Some(Stmt::LValueAssign(name, hops, value)));
        }
        Ok(None)
    }

    fn parse_if(&mut self) -> Result<Stmt, ParserError> {
        trace::trace_parser!("rule <if>");
        self.advance(); // 'if'
        let mut arms: Vec<(Expr, Block)> = Vec::new();

        let condition = self.parse_expression()?;
        self.accept(&Colon);
        arms.push((condition, self.parse_statements()?));

        while self.accept(&KeywordElif) {
            let condition = self.parse_expression()?;
            self.accept(&Colon);
            arms.push((condition, self.parse_statements()?));
        }

        let else_block = if self.accept(&KeywordElse) {
            self.accept(&Colon);
            Some(self.parse_statements()?)
        } else {
            None
        };

        self.expect(KeywordEnd)?;
        Ok(Stmt::If(arms, else_block))
    }

    fn parse_for(&mut self) -> Result<Stmt, ParserError> {
        trace::trace_parser!("rule <for>");
        self.advance(); // 'for'
        let name = self.expect_identifier()?;
        self.expect(KeywordIn)?;
        let iterable = self.parse_expression()?;
        self.accept(&Colon);
        let body = self.parse_statements()?;
        self.expect(KeywordEnd)?;
        Ok(Stmt::For(name, iterable, body))
    }

    fn parse_def(&mut self) -> Result<Stmt, ParserError> {
        trace::trace_parser!("rule <def>");
        self.advance(); // 'def'
        let name = self.expect_identifier()?;
        self.expect(OpenParen)?;
        self.depth += 1;
        let params = self.parse_parameters()?;
        self.depth -= 1;
        let body = self.parse_statements()?;
        self.expect(KeywordEnd)?;
        Ok(Stmt::Def(name, params, body))
    }

    /// Parameter list after a consumed `(`, consuming the closing `)`.
    fn parse_parameters(&mut self) -> Result<Vec<String>, ParserError> {
        let mut params: Vec<String> = Vec::new();
        if self.accept(&CloseParen) {
            return Ok(params);
        }
        loop {
            params.push(self.expect_identifier()?);
            if self.accept(&Comma) {
                continue;
            }
            self.expect(CloseParen)?;
            break;
        }
        Ok(params)
    }

    // ===== Expressions ===== //

    fn parse_expression(&mut self) -> Result<Expr, ParserError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.parse_and()?;
        while self.accept(&KeywordOr) {
            let rhs = self.parse_and()?;
            expr = Expr::Or(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.parse_not()?;
        while self.accept(&KeywordAnd) {
            let rhs = self.parse_not()?;
            expr = Expr::And(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_not(&mut self) -> Result<Expr, ParserError> {
        if self.accept(&KeywordNot) {
            let operand = self.parse_not()?;
            return Ok(Expr::Not(Box::new(operand)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.parse_arith()?;
        loop {
            let op = match self.peek() {
                Some(DoubleEquals) => BinaryOp::Equal,
                Some(NotEquals) => BinaryOp::NotEqual,
                Some(GreaterThan) => BinaryOp::GreaterThan,
                Some(LessThan) => BinaryOp::LessThan,
                Some(GreaterThanEquals) => BinaryOp::GreaterThanEqual,
                Some(LessThanEquals) => BinaryOp::LessThanEqual,
                Some(KeywordIn) => BinaryOp::In,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_arith()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_arith(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Plus) => BinaryOp::Add,
                Some(Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Some(Mul) => BinaryOp::Mul,
                Some(Div) => BinaryOp::Div,
                Some(Mod) => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_factor()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Expr, ParserError> {
        if self.accept(&Minus) {
            let operand = self.parse_factor()?;
            return Ok(Expr::Neg(Box::new(operand)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek() {
                Some(OpenParen) => {
                    self.advance();
                    self.depth += 1;
                    let args = self.parse_call_arguments()?;
                    self.depth -= 1;
                    expr = Expr::Call(Box::new(expr), args);
                }
                Some(OpenSquareBracket) => {
                    self.advance();
                    self.depth += 1;
                    let key = self.parse_expression()?;
                    self.expect(CloseSquareBracket)?;
                    self.depth -= 1;
                    expr = Expr::Index(Box::new(expr), Box::new(key));
                }
                Some(Dot) => {
                    self.advance();
                    let name = self.expect_identifier()?;
                    expr = Expr::Attr(Box::new(expr), name);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Argument list after a consumed `(`, consuming the closing `)`.
    fn parse_call_arguments(&mut self) -> Result<Vec<Expr>, ParserError> {
        let mut args: Vec<Expr> = Vec::new();
        if self.accept(&CloseParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression()?);
            if self.accept(&Comma) {
                continue;
            }
            match self.advance() {
                Some(CloseParen) => break,
                Some(t) => return Err(self.error(ExpectedCommaOrEndOfArguments(t))),
                None => return Err(self.error(UnexpectedEoF)),
            }
        }
        Ok(args)
    }

    fn parse_atom(&mut self) -> Result<Expr, ParserError> {
        match self.peek() {
            Some(Identifier(_)) => {
                if matches!(self.peek2(), Some(Arrow)) {
                    let name = self.expect_identifier()?;
                    self.advance(); // '=>'
                    let body = self.parse_expression()?;
                    return Ok(Expr::Lambda(vec![name], LambdaBody::Expr(Box::new(body))));
                }
                Ok(Expr::Name(self.expect_identifier()?))
            }
            Some(OpenParen) => self.parse_parens(),
            Some(OpenSquareBracket) => self.parse_list_literal(),
            Some(OpenBrace) => self.parse_dict_literal(),
            _ => match self.advance() {
                Some(Int(i)) => Ok(Expr::Int(i)),
                Some(StringLiteral(s)) => Ok(Expr::Str(s)),
                Some(KeywordTrue) => Ok(Expr::True),
                Some(KeywordFalse) => Ok(Expr::False),
                Some(KeywordNil) => Ok(Expr::Nil),
                Some(t) => Err(self.error(ExpectedExpressionTerminal(t))),
                None => Err(self.error(UnexpectedEoF)),
            },
        }
    }

    /// Either a parenthesized expression or a `(params) =>` lambda; decided
    /// by attempting the lambda head and rolling back on a mismatch.
    fn parse_parens(&mut self) -> Result<Expr, ParserError> {
        let mark = self.mark();
        if let Some(params) = self.try_parse_lambda_parameters() {
            return self.parse_lambda_body(params);
        }
        self.reset(mark);

        self.advance(); // '('
        self.depth += 1;
        let expr = self.parse_expression()?;
        self.expect(CloseParen)?;
        self.depth -= 1;
        Ok(expr)
    }

    fn try_parse_lambda_parameters(&mut self) -> Option<Vec<String>> {
        self.advance(); // '('
        let mut params: Vec<String> = Vec::new();
        if !self.accept(&CloseParen) {
            loop {
                match self.advance() {
                    Some(Identifier(name)) => params.push(name),
                    _ => return None,
                }
                if self.accept(&Comma) {
                    continue;
                }
                if self.accept(&CloseParen) {
                    break;
                }
                return None;
            }
        }
        if self.accept(&Arrow) {
            Some(params)
        } else {
            None
        }
    }

    /// A newline after `=>` starts a block body terminated by `end`;
    /// anything else is a single-expression body.
    fn parse_lambda_body(&mut self, params: Vec<String>) -> Result<Expr, ParserError> {
        if matches!(self.raw_peek(), Some(NewLine)) {
            let block = self.parse_statements()?;
            self.expect(KeywordEnd)?;
            Ok(Expr::Lambda(params, LambdaBody::Block(block)))
        } else {
            let body = self.parse_expression()?;
            Ok(Expr::Lambda(params, LambdaBody::Expr(Box::new(body))))
        }
    }

    fn parse_list_literal(&mut self) -> Result<Expr, ParserError> {
        self.advance(); // '['
        self.depth += 1;
        let mut items: Vec<Expr> = Vec::new();
        if !self.accept(&CloseSquareBracket) {
            loop {
                items.push(self.parse_expression()?);
                if self.accept(&Comma) {
                    continue;
                }
                match self.advance() {
                    Some(CloseSquareBracket) => break,
                    Some(t) => return Err(self.error(ExpectedCommaOrEndOfList(t))),
                    None => return Err(self.error(UnexpectedEoF)),
                }
            }
        }
        self.depth -= 1;
        Ok(Expr::List(items))
    }

    fn parse_dict_literal(&mut self) -> Result<Expr, ParserError> {
        self.advance(); // '{'
        self.depth += 1;
        let mut pairs: Vec<(String, Expr)> = Vec::new();
        if !self.accept(&CloseBrace) {
            loop {
                let key = match self.advance() {
                    Some(Identifier(name)) => name,
                    Some(StringLiteral(s)) => s,
                    Some(t) => return Err(self.error(ExpectedDictKey(t))),
                    None => return Err(self.error(UnexpectedEoF)),
                };
                self.expect(Colon)?;
                let value = self.parse_expression()?;
                pairs.push((key, value));
                if self.accept(&Comma) {
                    continue;
                }
                match self.advance() {
                    Some(CloseBrace) => break,
                    Some(t) => return Err(self.error(ExpectedCommaOrEndOfDict(t))),
                    None => return Err(self.error(UnexpectedEoF)),
                }
            }
        }
        self.depth -= 1;
        Ok(Expr::Dict(pairs))
    }

    // ===== Cursor helpers ===== //

    fn mark(&self) -> (usize, usize, u32) {
        (self.pos, self.lineno, self.depth)
    }

    fn reset(&mut self, mark: (usize, usize, u32)) {
        self.pos = mark.0;
        self.lineno = mark.1;
        self.depth = mark.2;
    }

    fn raw_peek(&self) -> Option<&ScanToken> {
        self.tokens.get(self.pos)
    }

    /// Inside delimiters, newlines are consumed transparently.
    fn skip_ignored(&mut self) {
        if self.depth > 0 {
            self.skip_new_lines();
        }
    }

    fn skip_new_lines(&mut self) {
        while matches!(self.tokens.get(self.pos), Some(NewLine)) {
            self.pos += 1;
            self.lineno += 1;
        }
    }

    fn peek(&mut self) -> Option<&ScanToken> {
        self.skip_ignored();
        self.tokens.get(self.pos)
    }

    fn peek2(&mut self) -> Option<&ScanToken> {
        self.skip_ignored();
        self.tokens.get(self.pos + 1)
    }

    fn advance(&mut self) -> Option<ScanToken> {
        self.skip_ignored();
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            if matches!(token, Some(NewLine)) {
                self.lineno += 1;
            }
            self.pos += 1;
        }
        token
    }

    fn accept(&mut self, token: &ScanToken) -> bool {
        if self.peek() == Some(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: ScanToken) -> Result<(), ParserError> {
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(self.error(Expecting(expected, t))),
            None => Err(self.error(UnexpectedEoFExpecting(expected))),
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParserError> {
        match self.advance() {
            Some(Identifier(name)) => Ok(name),
            Some(t) => Err(self.error(ExpectedIdentifier(t))),
            None => Err(self.error(UnexpectedEoF)),
        }
    }

    fn at_statement_end(&mut self) -> bool {
        matches!(
            self.raw_peek(),
            None | Some(NewLine | KeywordEnd | KeywordElif | KeywordElse)
        )
    }

    fn error(&self, error: ParserErrorType) -> ParserError {
        ParserError { error, lineno: self.lineno }
    }
}
