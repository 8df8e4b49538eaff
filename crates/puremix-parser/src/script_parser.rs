//! Parser for guest scripts.
//!
//! Recursive descent over `script_lexer` tokens. Statements follow the
//! usual JavaScript shapes; semicolons are optional where a line break,
//! a closing brace or the end of input ends the statement. Expression
//! precedence, lowest to highest:
//!
//! ```text
//! assignment → ?: → ?? → || → && → equality → relational → + - → * / %
//!   → unary → postfix → call/member → primary
//! ```

use std::rc::Rc;

use crate::script_ast::*;
use crate::script_lexer::{line_column, ScriptLexer, TemplateChunk, Token, TokenKind, TokenValue};
use crate::ParseError;
use puremix_lexer::MAX_NESTING;

/// Guest script parser.
pub struct ScriptParser {
    tokens: Vec<Token>,
    pos: usize,
    /// Whole script, for error positions.
    source: Rc<[char]>,
    /// Char offset of this token stream inside `source`.
    offset: usize,
    /// Open statement, expression and pattern frames.
    depth: usize,
}

impl ScriptParser {
    /// Create a parser over the given tokens of `source`.
    pub fn new(tokens: Vec<Token>, source: &str) -> Self {
        Self {
            tokens,
            pos: 0,
            source: source.chars().collect(),
            offset: 0,
            depth: 0,
        }
    }

    /// Parse a script into a statement list.
    pub fn parse(source: &str) -> Result<Program, ParseError> {
        let tokens = ScriptLexer::tokenize(source)?;
        let mut parser = ScriptParser::new(tokens, source);
        parser.parse_program()
    }

    /// Parse a script that must be exactly one expression.
    pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
        let tokens = ScriptLexer::tokenize(source)?;
        let mut parser = ScriptParser::new(tokens, source);
        let expr = parser.parse_assignment()?;
        if parser.check(TokenKind::Semicolon) {
            parser.advance();
        }
        if !parser.check(TokenKind::Eof) {
            return Err(parser.unexpected());
        }
        Ok(expr)
    }

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut body = Vec::new();
        while !self.check(TokenKind::Eof) {
            body.push(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        self.nested(Self::parse_statement_inner)
    }

    fn parse_statement_inner(&mut self) -> Result<Stmt, ParseError> {
        match self.peek().kind {
            TokenKind::LBrace => Ok(Stmt::Block(self.parse_block()?)),
            TokenKind::Let | TokenKind::Const | TokenKind::Var => {
                let stmt = self.parse_declaration()?;
                self.consume_semicolon()?;
                Ok(stmt)
            }
            TokenKind::Function => {
                self.advance();
                let def = self.parse_function_rest()?;
                if def.name.is_none() {
                    return Err(self.error("Function statements require a name".into()));
                }
                Ok(Stmt::Function(Rc::new(def)))
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.parse_expression_inner()?)
                };
                self.consume_semicolon()?;
                Ok(Stmt::Return(value))
            }
            TokenKind::If => self.parse_if(),
            TokenKind::For => self.parse_for(),
            TokenKind::While => {
                self.advance();
                let test = self.parse_paren_expression()?;
                let body = Box::new(self.parse_statement()?);
                Ok(Stmt::While { test, body })
            }
            TokenKind::Do => {
                self.advance();
                let body = Box::new(self.parse_statement()?);
                self.expect(TokenKind::While, "Expected 'while' after do body")?;
                let test = self.parse_paren_expression()?;
                if self.check(TokenKind::Semicolon) {
                    self.advance();
                }
                Ok(Stmt::DoWhile { body, test })
            }
            TokenKind::Break => {
                self.advance();
                self.consume_semicolon()?;
                Ok(Stmt::Break)
            }
            TokenKind::Continue => {
                self.advance();
                self.consume_semicolon()?;
                Ok(Stmt::Continue)
            }
            TokenKind::Switch => self.parse_switch(),
            TokenKind::Throw => {
                self.advance();
                if self.peek().newline_before {
                    return Err(self.error("Illegal newline after throw".into()));
                }
                let value = self.parse_expression_inner()?;
                self.consume_semicolon()?;
                Ok(Stmt::Throw(value))
            }
            TokenKind::Try => self.parse_try(),
            TokenKind::Semicolon => {
                self.advance();
                Ok(Stmt::Empty)
            }
            _ => {
                let expr = self.parse_expression_inner()?;
                self.consume_semicolon()?;
                Ok(Stmt::Expression(expr))
            }
        }
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::LBrace, "Expected '{'")?;
        let mut body = Vec::new();
        while !self.check(TokenKind::RBrace) {
            if self.check(TokenKind::Eof) {
                return Err(self.error("Expected '}' to close block".into()));
            }
            body.push(self.parse_statement()?);
        }
        self.advance(); // consume `}`
        Ok(body)
    }

    /// `let|const|var declarator, ...` (without the trailing semicolon).
    fn parse_declaration(&mut self) -> Result<Stmt, ParseError> {
        let kind = self.decl_kind()?;
        let first = self.parse_binding_pattern()?;
        self.parse_declarators(kind, first)
    }

    fn parse_declarators(
        &mut self,
        kind: DeclKind,
        first: Pattern,
    ) -> Result<Stmt, ParseError> {
        let mut declarators = Vec::new();
        let mut target = first;

        loop {
            let init = if self.check(TokenKind::Eq) {
                self.advance();
                Some(self.parse_assignment()?)
            } else {
                None
            };

            if init.is_none() {
                if kind == DeclKind::Const {
                    return Err(self.error("Missing initializer in const declaration".into()));
                }
                if !matches!(target, Pattern::Identifier(_)) {
                    return Err(self.error("Destructuring declaration requires an initializer".into()));
                }
            }

            declarators.push(Declarator { target, init });

            if !self.check(TokenKind::Comma) {
                break;
            }
            self.advance();
            target = self.parse_binding_pattern()?;
        }

        Ok(Stmt::Declaration { kind, declarators })
    }

    fn decl_kind(&mut self) -> Result<DeclKind, ParseError> {
        let kind = match self.peek().kind {
            TokenKind::Let => DeclKind::Let,
            TokenKind::Const => DeclKind::Const,
            TokenKind::Var => DeclKind::Var,
            _ => return Err(self.unexpected()),
        };
        self.advance();
        Ok(kind)
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        self.advance(); // consume `if`
        let test = self.parse_paren_expression()?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.check(TokenKind::Else) {
            self.advance();
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            consequent,
            alternate,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        self.advance(); // consume `for`
        self.expect(TokenKind::LParen, "Expected '(' after 'for'")?;

        let init = match self.peek().kind {
            TokenKind::Let | TokenKind::Const | TokenKind::Var => {
                let kind = self.decl_kind()?;
                let target = self.parse_binding_pattern()?;
                if let Some(stmt) = self.parse_for_each(Some(kind), &target)? {
                    return Ok(stmt);
                }
                Some(Box::new(self.parse_declarators(kind, target)?))
            }
            TokenKind::Semicolon => None,
            TokenKind::Identifier
                if matches!(self.peek_at(1).kind, TokenKind::In)
                    || self.peek_at(1).value == TokenValue::Identifier("of".into()) =>
            {
                let target = Pattern::Identifier(self.expect_identifier()?);
                if let Some(stmt) = self.parse_for_each(None, &target)? {
                    return Ok(stmt);
                }
                return Err(self.unexpected());
            }
            _ => Some(Box::new(Stmt::Expression(self.parse_expression_inner()?))),
        };

        self.expect(TokenKind::Semicolon, "Expected ';' after for-loop initializer")?;
        let test = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression_inner()?)
        };
        self.expect(TokenKind::Semicolon, "Expected ';' after for-loop condition")?;
        let update = if self.check(TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expression_inner()?)
        };
        self.expect(TokenKind::RParen, "Expected ')' after for-loop clauses")?;
        let body = Box::new(self.parse_statement()?);

        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    /// The rest of `for (target of iterable)` / `for (target in object)`,
    /// if the cursor is at `of` or `in`.
    fn parse_for_each(
        &mut self,
        kind: Option<DeclKind>,
        target: &Pattern,
    ) -> Result<Option<Stmt>, ParseError> {
        let is_of = self.peek().kind == TokenKind::Identifier
            && self.peek().value == TokenValue::Identifier("of".into());
        let is_in = self.check(TokenKind::In);
        if !is_of && !is_in {
            return Ok(None);
        }
        self.advance();

        let source = self.parse_expression_inner()?;
        self.expect(TokenKind::RParen, "Expected ')' after for-loop head")?;
        let body = Box::new(self.parse_statement()?);
        let target = target.clone();

        Ok(Some(if is_of {
            Stmt::ForOf {
                kind,
                target,
                iterable: source,
                body,
            }
        } else {
            Stmt::ForIn {
                kind,
                target,
                object: source,
                body,
            }
        }))
    }

    fn parse_switch(&mut self) -> Result<Stmt, ParseError> {
        self.advance(); // consume `switch`
        let discriminant = self.parse_paren_expression()?;
        self.expect(TokenKind::LBrace, "Expected '{' after switch head")?;

        let mut cases: Vec<SwitchCase> = Vec::new();
        while !self.check(TokenKind::RBrace) {
            let test = match self.peek().kind {
                TokenKind::Case => {
                    self.advance();
                    Some(self.parse_expression_inner()?)
                }
                TokenKind::Default => {
                    self.advance();
                    None
                }
                _ => return Err(self.error(format!(
                    "Expected 'case' or 'default', got '{}'",
                    self.token_text()
                ))),
            };
            self.expect(TokenKind::Colon, "Expected ':' after case")?;

            let mut body = Vec::new();
            while !matches!(
                self.peek().kind,
                TokenKind::Case | TokenKind::Default | TokenKind::RBrace | TokenKind::Eof
            ) {
                body.push(self.parse_statement()?);
            }
            cases.push(SwitchCase { test, body });
        }
        self.advance(); // consume `}`

        Ok(Stmt::Switch {
            discriminant,
            cases,
        })
    }

    fn parse_try(&mut self) -> Result<Stmt, ParseError> {
        self.advance(); // consume `try`
        let block = self.parse_block()?;

        let mut param = None;
        let mut handler = None;
        if self.check(TokenKind::Catch) {
            self.advance();
            if self.check(TokenKind::LParen) {
                self.advance();
                param = Some(self.parse_binding_pattern()?);
                self.expect(TokenKind::RParen, "Expected ')' after catch parameter")?;
            }
            handler = Some(self.parse_block()?);
        }

        let finalizer = if self.check(TokenKind::Finally) {
            self.advance();
            Some(self.parse_block()?)
        } else {
            None
        };

        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("Missing catch or finally after try".into()));
        }

        Ok(Stmt::Try {
            block,
            param,
            handler,
            finalizer,
        })
    }

    // =========================================================================
    // Patterns
    // =========================================================================

    fn parse_binding_pattern(&mut self) -> Result<Pattern, ParseError> {
        self.nested(Self::parse_binding_pattern_inner)
    }

    fn parse_binding_pattern_inner(&mut self) -> Result<Pattern, ParseError> {
        match self.peek().kind {
            TokenKind::Identifier => Ok(Pattern::Identifier(self.expect_identifier()?)),
            TokenKind::LBrace => self.parse_object_pattern(),
            TokenKind::LBracket => self.parse_array_pattern(),
            _ => Err(self.error(format!(
                "Expected binding name, got '{}'",
                self.token_text()
            ))),
        }
    }

    fn parse_binding_element(&mut self) -> Result<PatternElement, ParseError> {
        let target = self.parse_binding_pattern()?;
        let default = if self.check(TokenKind::Eq) {
            self.advance();
            Some(self.parse_assignment()?)
        } else {
            None
        };
        Ok(PatternElement { target, default })
    }

    fn parse_object_pattern(&mut self) -> Result<Pattern, ParseError> {
        self.advance(); // consume `{`
        let mut properties = Vec::new();
        let mut rest = None;

        while !self.check(TokenKind::RBrace) {
            if self.check(TokenKind::Ellipsis) {
                self.advance();
                rest = Some(self.expect_identifier()?);
                break;
            }

            let key = self.expect_property_key()?;
            let value = if self.check(TokenKind::Colon) {
                self.advance();
                self.parse_binding_element()?
            } else {
                let default = if self.check(TokenKind::Eq) {
                    self.advance();
                    Some(self.parse_assignment()?)
                } else {
                    None
                };
                PatternElement {
                    target: Pattern::Identifier(key.clone()),
                    default,
                }
            };
            properties.push(PatternProperty { key, value });

            if !self.check(TokenKind::Comma) {
                break;
            }
            self.advance();
        }

        self.expect(TokenKind::RBrace, "Expected '}' to close object pattern")?;
        Ok(Pattern::Object { properties, rest })
    }

    fn parse_array_pattern(&mut self) -> Result<Pattern, ParseError> {
        self.advance(); // consume `[`
        let mut elements = Vec::new();
        let mut rest = None;

        while !self.check(TokenKind::RBracket) {
            if self.check(TokenKind::Comma) {
                self.advance();
                elements.push(None);
                continue;
            }
            if self.check(TokenKind::Ellipsis) {
                self.advance();
                rest = Some(self.expect_identifier()?);
                break;
            }
            elements.push(Some(self.parse_binding_element()?));
            if !self.check(TokenKind::Comma) {
                break;
            }
            self.advance();
        }

        self.expect(TokenKind::RBracket, "Expected ']' to close array pattern")?;
        Ok(Pattern::Array { elements, rest })
    }

    // =========================================================================
    // Functions
    // =========================================================================

    /// After `function`: optional name, parameters and block body.
    fn parse_function_rest(&mut self) -> Result<FunctionDef, ParseError> {
        let name = if self.check(TokenKind::Identifier) {
            Some(self.expect_identifier()?)
        } else {
            None
        };
        let (params, rest) = self.parse_params()?;
        let body = FunctionBody::Block(self.parse_block()?);
        Ok(FunctionDef {
            name,
            params,
            rest,
            body,
            is_arrow: false,
        })
    }

    /// `(a, b = 1, { c }, ...rest)`
    fn parse_params(&mut self) -> Result<(Vec<PatternElement>, Option<String>), ParseError> {
        self.expect(TokenKind::LParen, "Expected '(' before parameters")?;
        let mut params = Vec::new();
        let mut rest = None;

        while !self.check(TokenKind::RParen) {
            if self.check(TokenKind::Ellipsis) {
                self.advance();
                rest = Some(self.expect_identifier()?);
                break;
            }
            params.push(self.parse_binding_element()?);
            if !self.check(TokenKind::Comma) {
                break;
            }
            self.advance();
        }

        self.expect(TokenKind::RParen, "Expected ')' after parameters")?;
        Ok((params, rest))
    }

    fn parse_arrow_body(
        &mut self,
        params: Vec<PatternElement>,
        rest: Option<String>,
    ) -> Result<Expr, ParseError> {
        self.expect(TokenKind::Arrow, "Expected '=>'")?;
        let body = if self.check(TokenKind::LBrace) {
            FunctionBody::Block(self.parse_block()?)
        } else {
            FunctionBody::Expression(Box::new(self.parse_assignment()?))
        };
        Ok(Expr::Function(Rc::new(FunctionDef {
            name: None,
            params,
            rest,
            body,
            is_arrow: true,
        })))
    }

    /// At `(`: does the matching `)` precede `=>`?
    fn is_arrow_ahead(&self) -> bool {
        let mut depth = 0usize;
        for (i, token) in self.tokens.iter().enumerate().skip(self.pos) {
            match token.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return self
                            .tokens
                            .get(i + 1)
                            .is_some_and(|t| t.kind == TokenKind::Arrow);
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
        }
        false
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn parse_expression_inner(&mut self) -> Result<Expr, ParseError> {
        self.parse_assignment()
    }

    fn parse_paren_expression(&mut self) -> Result<Expr, ParseError> {
        self.expect(TokenKind::LParen, "Expected '('")?;
        let expr = self.parse_expression_inner()?;
        self.expect(TokenKind::RParen, "Expected ')'")?;
        Ok(expr)
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        self.nested(Self::parse_assignment_inner)
    }

    fn parse_assignment_inner(&mut self) -> Result<Expr, ParseError> {
        if self.check(TokenKind::Identifier) && self.peek_at(1).kind == TokenKind::Arrow {
            let name = self.expect_identifier()?;
            let param = PatternElement {
                target: Pattern::Identifier(name),
                default: None,
            };
            return self.parse_arrow_body(vec![param], None);
        }
        if self.check(TokenKind::LParen) && self.is_arrow_ahead() {
            let (params, rest) = self.parse_params()?;
            return self.parse_arrow_body(params, rest);
        }

        let target = self.parse_conditional()?;

        let op = match self.peek().kind {
            TokenKind::Eq => AssignOp::Assign,
            TokenKind::PlusEq => AssignOp::Add,
            TokenKind::MinusEq => AssignOp::Sub,
            TokenKind::StarEq => AssignOp::Mul,
            TokenKind::SlashEq => AssignOp::Div,
            TokenKind::PercentEq => AssignOp::Rem,
            _ => return Ok(target),
        };

        if !is_assignable(&target) {
            return Err(self.error("Invalid assignment target".into()));
        }
        self.advance();
        let value = self.parse_assignment()?;

        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let test = self.parse_nullish()?;
        if !self.check(TokenKind::Question) {
            return Ok(test);
        }
        self.advance();
        let consequent = self.parse_assignment()?;
        self.expect(TokenKind::Colon, "Expected ':' in conditional expression")?;
        let alternate = self.parse_assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn parse_nullish(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_or()?;
        while self.check(TokenKind::QuestionQuestion) {
            self.advance();
            let right = self.parse_or()?;
            left = logical(LogicalOp::Nullish, left, right);
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.check(TokenKind::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = logical(LogicalOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality()?;
        while self.check(TokenKind::And) {
            self.advance();
            let right = self.parse_equality()?;
            left = logical(LogicalOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::NotEq,
                TokenKind::StrictEq => BinaryOp::StrictEq,
                TokenKind::StrictNotEq => BinaryOp::StrictNotEq,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_relational()?;
            left = binary(op, left, right);
        }
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Lte => BinaryOp::Lte,
                TokenKind::Gte => BinaryOp::Gte,
                TokenKind::In => BinaryOp::In,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek().kind {
            TokenKind::Not => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Typeof => UnaryOp::Typeof,
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let op = if self.check(TokenKind::PlusPlus) {
                    UpdateOp::Increment
                } else {
                    UpdateOp::Decrement
                };
                self.advance();
                let target = self.nested(Self::parse_unary)?;
                if !is_assignable(&target) {
                    return Err(self.error("Invalid update target".into()));
                }
                return Ok(Expr::Update {
                    op,
                    prefix: true,
                    target: Box::new(target),
                });
            }
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.nested(Self::parse_unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_call_member()?;

        let op = match self.peek().kind {
            TokenKind::PlusPlus if !self.peek().newline_before => UpdateOp::Increment,
            TokenKind::MinusMinus if !self.peek().newline_before => UpdateOp::Decrement,
            _ => return Ok(expr),
        };
        if !is_assignable(&expr) {
            return Err(self.error("Invalid update target".into()));
        }
        self.advance();
        Ok(Expr::Update {
            op,
            prefix: false,
            target: Box::new(expr),
        })
    }

    fn parse_call_member(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.peek().kind {
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_property_name()?;
                    expr = member(expr, MemberProperty::Static(name), false);
                }
                TokenKind::OptionalChain => {
                    self.advance();
                    expr = match self.peek().kind {
                        TokenKind::LParen => Expr::Call {
                            callee: Box::new(expr),
                            arguments: self.parse_arguments()?,
                            optional: true,
                        },
                        TokenKind::LBracket => {
                            let index = self.parse_index()?;
                            member(expr, MemberProperty::Computed(Box::new(index)), true)
                        }
                        _ => {
                            let name = self.expect_property_name()?;
                            member(expr, MemberProperty::Static(name), true)
                        }
                    };
                }
                TokenKind::LBracket => {
                    let index = self.parse_index()?;
                    expr = member(expr, MemberProperty::Computed(Box::new(index)), false);
                }
                TokenKind::LParen => {
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        arguments: self.parse_arguments()?,
                        optional: false,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_index(&mut self) -> Result<Expr, ParseError> {
        self.advance(); // consume `[`
        let index = self.parse_expression_inner()?;
        self.expect(TokenKind::RBracket, "Expected ']' after index")?;
        Ok(index)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Element>, ParseError> {
        self.advance(); // consume `(`
        let mut arguments = Vec::new();
        while !self.check(TokenKind::RParen) {
            arguments.push(self.parse_element()?);
            if !self.check(TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(TokenKind::RParen, "Expected ')' after arguments")?;
        Ok(arguments)
    }

    fn parse_element(&mut self) -> Result<Element, ParseError> {
        if self.check(TokenKind::Ellipsis) {
            self.advance();
            Ok(Element::Spread(self.parse_assignment()?))
        } else {
            Ok(Element::Item(self.parse_assignment()?))
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();

        let expr = match (token.kind, token.value) {
            (TokenKind::Number, TokenValue::Number(n)) => Expr::Number(n),
            (TokenKind::String, TokenValue::String(s)) => Expr::String(s),
            (TokenKind::Boolean, TokenValue::Boolean(b)) => Expr::Boolean(b),
            (TokenKind::Null, _) => Expr::Null,
            (TokenKind::Undefined, _) => Expr::Undefined,
            (TokenKind::Identifier, TokenValue::Identifier(name)) => Expr::Identifier(name),
            (TokenKind::Template, TokenValue::Template(chunks)) => {
                Expr::Template(self.parse_template(chunks)?)
            }
            (TokenKind::LParen, _) => {
                self.advance();
                let inner = self.parse_expression_inner()?;
                self.expect(TokenKind::RParen, "Expected ')' after expression")?;
                return Ok(inner);
            }
            (TokenKind::LBracket, _) => return self.parse_array_literal(),
            (TokenKind::LBrace, _) => return self.parse_object_literal(),
            (TokenKind::Function, _) => {
                self.advance();
                let def = self.parse_function_rest()?;
                return Ok(Expr::Function(Rc::new(def)));
            }
            (TokenKind::New, _) => {
                return Err(self.error("'new' is not supported".into()));
            }
            (TokenKind::Eof, _) => {
                return Err(self.error("Unexpected end of script".into()));
            }
            _ => return Err(self.unexpected()),
        };

        self.advance();
        Ok(expr)
    }

    fn parse_array_literal(&mut self) -> Result<Expr, ParseError> {
        self.advance(); // consume `[`
        let mut elements = Vec::new();
        while !self.check(TokenKind::RBracket) {
            elements.push(self.parse_element()?);
            if !self.check(TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(TokenKind::RBracket, "Expected ']' to close array")?;
        Ok(Expr::Array(elements))
    }

    fn parse_object_literal(&mut self) -> Result<Expr, ParseError> {
        self.advance(); // consume `{`
        let mut properties = Vec::new();

        while !self.check(TokenKind::RBrace) {
            if self.check(TokenKind::Ellipsis) {
                self.advance();
                properties.push(Property::Spread(self.parse_assignment()?));
            } else if self.check(TokenKind::LBracket) {
                let key = self.parse_index()?;
                self.expect(TokenKind::Colon, "Expected ':' after computed key")?;
                let value = self.parse_assignment()?;
                properties.push(Property::KeyValue(PropertyKey::Computed(key), value));
            } else {
                let shorthand_ok = self.check(TokenKind::Identifier);
                let key = self.expect_property_key()?;
                match self.peek().kind {
                    TokenKind::Colon => {
                        self.advance();
                        let value = self.parse_assignment()?;
                        properties.push(Property::KeyValue(PropertyKey::Static(key), value));
                    }
                    TokenKind::LParen => {
                        let (params, rest) = self.parse_params()?;
                        let body = FunctionBody::Block(self.parse_block()?);
                        let def = FunctionDef {
                            name: Some(key.clone()),
                            params,
                            rest,
                            body,
                            is_arrow: false,
                        };
                        properties.push(Property::KeyValue(
                            PropertyKey::Static(key),
                            Expr::Function(Rc::new(def)),
                        ));
                    }
                    _ if shorthand_ok => properties.push(Property::Shorthand(key)),
                    _ => return Err(self.error(format!("Expected ':' after key '{key}'"))),
                }
            }

            if !self.check(TokenKind::Comma) {
                break;
            }
            self.advance();
        }

        self.expect(TokenKind::RBrace, "Expected '}' to close object")?;
        Ok(Expr::Object(properties))
    }

    fn parse_template(&self, chunks: Vec<TemplateChunk>) -> Result<Vec<TemplatePart>, ParseError> {
        chunks
            .into_iter()
            .map(|chunk| match chunk {
                TemplateChunk::Text(text) => Ok(TemplatePart::Text(text)),
                TemplateChunk::Source(source, offset) => {
                    let tokens = ScriptLexer::tokenize(&source)?;
                    let mut inner = ScriptParser {
                        tokens,
                        pos: 0,
                        source: Rc::clone(&self.source),
                        offset: self.offset + offset,
                        depth: self.depth,
                    };
                    let expr = inner.parse_expression_inner()?;
                    if !inner.check(TokenKind::Eof) {
                        return Err(inner.unexpected());
                    }
                    Ok(TemplatePart::Expr(expr))
                }
            })
            .collect()
    }

    // =========================================================================
    // Token navigation helpers
    // =========================================================================

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    /// The stream always ends with `Eof`; looking past it yields `Eof`.
    fn peek_at(&self, ahead: usize) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + ahead).min(last)]
    }

    fn advance(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> Result<(), ParseError> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("{message}, got '{}'", self.token_text())))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        match (&self.peek().kind, &self.peek().value) {
            (TokenKind::Identifier, TokenValue::Identifier(name)) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(format!(
                "Expected identifier, got '{}'",
                self.token_text()
            ))),
        }
    }

    /// Names after `.`: identifiers and reserved words alike.
    fn expect_property_name(&mut self) -> Result<String, ParseError> {
        let name = match &self.peek().value {
            TokenValue::Identifier(name) => name.clone(),
            TokenValue::Boolean(b) => b.to_string(),
            _ => {
                return Err(self.error(format!(
                    "Expected property name, got '{}'",
                    self.token_text()
                )))
            }
        };
        self.advance();
        Ok(name)
    }

    /// Object keys: names, strings and numbers.
    fn expect_property_key(&mut self) -> Result<String, ParseError> {
        let key = match &self.peek().value {
            TokenValue::String(s) => s.clone(),
            TokenValue::Number(n) => format_key(*n),
            _ => return self.expect_property_name(),
        };
        self.advance();
        Ok(key)
    }

    /// A statement may end here without a semicolon.
    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
        ) || self.peek().newline_before
    }

    fn consume_semicolon(&mut self) -> Result<(), ParseError> {
        if self.check(TokenKind::Semicolon) {
            self.advance();
            Ok(())
        } else if self.at_statement_end() {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn token_text(&self) -> String {
        let span = self.peek().span;
        if span.start == span.end {
            return "end of script".into();
        }
        let start = self.offset + span.start;
        let end = (self.offset + span.end).min(self.source.len());
        self.source[start.min(end)..end].iter().collect()
    }

    /// Run `parse` one nesting level down, failing past [`MAX_NESTING`].
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!("Nested deeper than {MAX_NESTING} levels")));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn unexpected(&self) -> ParseError {
        self.error(format!("Unexpected token '{}'", self.token_text()))
    }

    fn error(&self, message: String) -> ParseError {
        let (line, column) = line_column(&self.source, self.offset + self.peek().span.start);
        ParseError {
            message,
            line,
            column,
        }
    }
}

fn is_assignable(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Identifier(_) | Expr::Member { optional: false, .. }
    )
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    Expr::Logical {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn member(object: Expr, property: MemberProperty, optional: bool) -> Expr {
    Expr::Member {
        object: Box::new(object),
        property,
        optional,
    }
}

fn format_key(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Vec<Stmt> {
        ScriptParser::parse(source).unwrap().body
    }

    fn expr(source: &str) -> Expr {
        ScriptParser::parse_expression(source).unwrap()
    }

    fn ident(name: &str) -> Expr {
        Expr::Identifier(name.into())
    }

    // =========================================================================
    // Declarations
    // =========================================================================

    #[test]
    fn test_const_declaration() {
        assert_eq!(
            parse("const total = 5;"),
            vec![Stmt::Declaration {
                kind: DeclKind::Const,
                declarators: vec![Declarator {
                    target: Pattern::Identifier("total".into()),
                    init: Some(Expr::Number(5.0)),
                }],
            }]
        );
    }

    #[test]
    fn test_multiple_declarators_without_semicolons() {
        let body = parse("let a = 1, b\nlet c = 3");
        assert_eq!(body.len(), 2);
        let Stmt::Declaration { declarators, .. } = &body[0] else {
            panic!("Expected Declaration");
        };
        assert_eq!(declarators.len(), 2);
        assert_eq!(declarators[1].init, None);
    }

    #[test]
    fn test_const_requires_initializer() {
        let err = ScriptParser::parse("const x;").unwrap_err();
        assert!(err.message.contains("Missing initializer"));
    }

    #[test]
    fn test_object_destructuring() {
        let body = parse("const { name, age: years = 0, ...rest } = user");
        let Stmt::Declaration { declarators, .. } = &body[0] else {
            panic!("Expected Declaration");
        };
        let Pattern::Object { properties, rest } = &declarators[0].target else {
            panic!("Expected object pattern");
        };
        assert_eq!(properties[0].key, "name");
        assert_eq!(properties[1].key, "age");
        assert_eq!(
            properties[1].value.target,
            Pattern::Identifier("years".into())
        );
        assert_eq!(properties[1].value.default, Some(Expr::Number(0.0)));
        assert_eq!(rest.as_deref(), Some("rest"));
    }

    #[test]
    fn test_array_destructuring() {
        let body = parse("let [first, , third, ...others] = list;");
        let Stmt::Declaration { declarators, .. } = &body[0] else {
            panic!("Expected Declaration");
        };
        assert_eq!(
            declarators[0].target.names(),
            vec!["first", "third", "others"]
        );
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    #[test]
    fn test_if_else_chain() {
        let body = parse("if (a) { x = 1 } else if (b) x = 2; else { x = 3 }");
        let Stmt::If { alternate, .. } = &body[0] else {
            panic!("Expected If");
        };
        assert!(matches!(
            alternate.as_deref(),
            Some(Stmt::If {
                alternate: Some(_),
                ..
            })
        ));
    }

    #[test]
    fn test_classic_for() {
        let body = parse("for (let i = 0; i < 3; i++) { sum += i }");
        let Stmt::For {
            init, test, update, ..
        } = &body[0]
        else {
            panic!("Expected For");
        };
        assert!(matches!(init.as_deref(), Some(Stmt::Declaration { .. })));
        assert!(test.is_some());
        assert!(matches!(
            update,
            Some(Expr::Update {
                prefix: false,
                ..
            })
        ));
    }

    #[test]
    fn test_for_of_and_for_in() {
        let body = parse("for (const item of items) total += item.price\nfor (k in obj) {}");
        assert!(matches!(
            &body[0],
            Stmt::ForOf {
                kind: Some(DeclKind::Const),
                ..
            }
        ));
        assert!(matches!(&body[1], Stmt::ForIn { kind: None, .. }));
    }

    #[test]
    fn test_while_and_do_while() {
        let body = parse("while (n > 0) n--; do { n++ } while (n < 3)");
        assert!(matches!(body[0], Stmt::While { .. }));
        assert!(matches!(body[1], Stmt::DoWhile { .. }));
    }

    #[test]
    fn test_switch() {
        let body = parse("switch (x) { case 1: y = 'a'; break; case 2: default: y = 'z' }");
        let Stmt::Switch { cases, .. } = &body[0] else {
            panic!("Expected Switch");
        };
        assert_eq!(cases.len(), 3);
        assert_eq!(cases[0].body.len(), 2);
        assert!(cases[1].body.is_empty());
        assert_eq!(cases[2].test, None);
    }

    #[test]
    fn test_try_catch_finally() {
        let body = parse("try { risky() } catch (e) { log(e) } finally { done = true }");
        let Stmt::Try {
            param,
            handler,
            finalizer,
            ..
        } = &body[0]
        else {
            panic!("Expected Try");
        };
        assert_eq!(param, &Some(Pattern::Identifier("e".into())));
        assert!(handler.is_some());
        assert!(finalizer.is_some());
    }

    #[test]
    fn test_return_newline_ends_statement() {
        let body = parse("function f() { return\n 1 }");
        let Stmt::Function(def) = &body[0] else {
            panic!("Expected Function");
        };
        let FunctionBody::Block(stmts) = &def.body else {
            panic!("Expected block body");
        };
        assert_eq!(stmts[0], Stmt::Return(None));
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    #[test]
    fn test_precedence() {
        assert_eq!(
            expr("a + b * c"),
            binary(BinaryOp::Add, ident("a"), binary(BinaryOp::Mul, ident("b"), ident("c")))
        );
    }

    #[test]
    fn test_nullish_and_ternary() {
        let Expr::Conditional { test, .. } = expr("a ?? b ? 1 : 2") else {
            panic!("Expected Conditional");
        };
        assert!(matches!(
            *test,
            Expr::Logical {
                op: LogicalOp::Nullish,
                ..
            }
        ));
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let Expr::Assign { value, .. } = expr("a = b = 1") else {
            panic!("Expected Assign");
        };
        assert!(matches!(*value, Expr::Assign { .. }));
    }

    #[test]
    fn test_nesting_limit() {
        let too_deep = |source: String| ScriptParser::parse(&source).unwrap_err().message;
        let message = "Nested deeper than 64 levels";

        assert_eq!(too_deep(format!("{}x{}", "(".repeat(1000), ")".repeat(1000))), message);
        assert_eq!(too_deep(format!("{}x", "!".repeat(1000))), message);
        assert_eq!(too_deep(format!("{}x", "++".repeat(1000))), message);
        assert_eq!(too_deep(format!("{}x();", "if (a) ".repeat(1000))), message);
        assert_eq!(too_deep(format!("{}{}", "{".repeat(1000), "}".repeat(1000))), message);
        assert_eq!(
            too_deep(format!("let {}x{} = y;", "[".repeat(1000), "]".repeat(1000))),
            message
        );

        let mut template = String::from("x");
        for _ in 0..40 {
            template = format!("`${{({template})}}`");
        }
        assert_eq!(too_deep(template), message);

        assert!(ScriptParser::parse(&format!("{}x{}", "(".repeat(30), ")".repeat(30))).is_ok());
        assert!(ScriptParser::parse_expression(&format!("{}x", "!".repeat(30))).is_ok());
    }

    #[test]
    fn test_invalid_assignment_target() {
        assert!(ScriptParser::parse("1 = a").is_err());
    }

    #[test]
    fn test_arrow_functions() {
        let Expr::Function(def) = expr("(acc, { price }) => acc + price") else {
            panic!("Expected Function");
        };
        assert!(def.is_arrow);
        assert_eq!(def.params.len(), 2);
        assert!(matches!(def.body, FunctionBody::Expression(_)));

        let Expr::Call { arguments, .. } = expr("items.map(i => { return i * 2 })") else {
            panic!("Expected Call");
        };
        assert!(matches!(&arguments[0], Element::Item(Expr::Function(_))));
    }

    #[test]
    fn test_grouping_is_not_arrow() {
        assert_eq!(
            expr("(a + b) * c"),
            binary(BinaryOp::Mul, binary(BinaryOp::Add, ident("a"), ident("b")), ident("c"))
        );
    }

    #[test]
    fn test_optional_chain() {
        let Expr::Member {
            object, optional, ..
        } = expr("user?.profile.name")
        else {
            panic!("Expected Member");
        };
        assert!(!optional);
        assert!(matches!(*object, Expr::Member { optional: true, .. }));
    }

    #[test]
    fn test_object_literal_forms() {
        let Expr::Object(properties) = expr("{ a: 1, b, 'c-d': 2, [key]: 3, ...rest, f(x) { return x } }")
        else {
            panic!("Expected Object");
        };
        assert_eq!(properties.len(), 6);
        assert_eq!(properties[1], Property::Shorthand("b".into()));
        assert!(matches!(
            &properties[2],
            Property::KeyValue(PropertyKey::Static(k), _) if k == "c-d"
        ));
        assert!(matches!(&properties[4], Property::Spread(_)));
    }

    #[test]
    fn test_template_literal_parts() {
        assert_eq!(
            expr("`Total: ${a + 1}`"),
            Expr::Template(vec![
                TemplatePart::Text("Total: ".into()),
                TemplatePart::Expr(binary(BinaryOp::Add, ident("a"), Expr::Number(1.0))),
            ])
        );
    }

    #[test]
    fn test_keyword_property_names() {
        assert_eq!(
            expr("config.default"),
            member(ident("config"), MemberProperty::Static("default".into()), false)
        );
    }

    #[test]
    fn test_typeof_and_update() {
        assert!(matches!(
            expr("typeof x"),
            Expr::Unary {
                op: UnaryOp::Typeof,
                ..
            }
        ));
        assert!(matches!(
            expr("++count"),
            Expr::Update {
                prefix: true,
                ..
            }
        ));
    }

    #[test]
    fn test_new_is_rejected() {
        let err = ScriptParser::parse("const d = new Date()").unwrap_err();
        assert!(err.message.contains("'new' is not supported"));
    }

    #[test]
    fn test_error_position_multiline() {
        let err = ScriptParser::parse("let a = 1;\nlet = 2;").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 5);
    }

    #[test]
    fn test_error_position_inside_template() {
        let err = ScriptParser::parse("x = `a ${ ) }`").unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(err.column, 11);
    }
}
