//! Template expression parser.
//!
//! Parses a stream of template tokens (from `puremix-lexer`) into a
//! `Program` node. Recursive descent, one pass, with a fixed precedence
//! ladder (lowest to highest):
//!
//! ```text
//! ternary → || → && → === !== → + - → * / → ! - → member/call → primary
//! ```
//!
//! HTML in expression position (ternary branches, `&&` right-hand sides,
//! arrow-function bodies) is collected as raw tokens into an opaque
//! `HtmlElement` node instead of being parsed as an expression tree.

use crate::ast::{BinaryOp, LogicalOp, Node, NodeKind, UnaryOp};
use crate::ParseError;
use puremix_lexer::{
    is_void_element, join_tokens, Position, Scanner, Token, TokenKind, MAX_NESTING,
};

const ARRAY_TRANSFORMS: &[&str] = &["map", "filter", "forEach", "reduce"];

/// Template expression parser.
///
/// Converts a flat token stream into a tree of `Node`s.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Open `parse_ternary` / prefix-operator frames.
    depth: usize,
}

impl Parser {
    /// Create a new parser for the given tokens.
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if !matches!(tokens.last(), Some(t) if t.kind == TokenKind::Eof) {
            let end = tokens
                .last()
                .map(|t| Position::new(t.position.line, t.position.column, t.end()))
                .unwrap_or_default();
            tokens.push(Token::new(TokenKind::Eof, "", end));
        }
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Tokenize and parse template source into a program AST.
    pub fn parse(source: &str) -> Result<Node, ParseError> {
        let tokens = Scanner::tokenize(source)?;
        Parser::parse_tokens(tokens)
    }

    /// Parse an already tokenized stream.
    pub fn parse_tokens(tokens: Vec<Token>) -> Result<Node, ParseError> {
        let mut parser = Parser::new(tokens);
        parser.parse_program()
    }

    /// Parse the whole stream as a sequence of markup, text and spans.
    fn parse_program(&mut self) -> Result<Node, ParseError> {
        let position = self.peek().position;
        let mut nodes = Vec::new();

        while !self.is_at_end() {
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::HtmlTag { .. } => {
                    self.advance();
                    nodes.push(Node::new(NodeKind::HtmlElement(token.text), token.position));
                }
                TokenKind::Text => {
                    self.advance();
                    nodes.push(Node::new(NodeKind::Text(token.text), token.position));
                }
                TokenKind::CodeBlock(source) => {
                    self.advance();
                    nodes.push(Node::new(
                        NodeKind::CodeBlock(source.clone()),
                        token.position,
                    ));
                }
                TokenKind::LBrace => {
                    nodes.push(self.parse_braced()?);
                }
                TokenKind::Semicolon => {
                    self.advance();
                }
                _ => {
                    nodes.push(self.parse_ternary()?);
                }
            }
        }

        Ok(Node::new(NodeKind::Program(nodes), position))
    }

    /// Parse `{ expr }`. An empty span evaluates to nothing.
    fn parse_braced(&mut self) -> Result<Node, ParseError> {
        let position = self.peek().position;
        self.advance(); // consume `{`

        let inner = if self.check(&TokenKind::RBrace) {
            Node::new(NodeKind::Undefined, position)
        } else {
            self.parse_ternary()?
        };

        while self.check(&TokenKind::Semicolon) {
            self.advance();
        }
        self.expect(&TokenKind::RBrace, "Expected '}' to close expression")?;

        Ok(Node::new(NodeKind::Expression(Box::new(inner)), position))
    }

    // =========================================================================
    // Precedence ladder
    // =========================================================================

    /// `condition ? consequent : alternate`. Branches may be HTML; nested
    /// ternaries pair each `:` with the nearest unmatched `?` by recursion.
    fn parse_ternary(&mut self) -> Result<Node, ParseError> {
        self.enter()?;
        let node = self.parse_ternary_inner();
        self.depth -= 1;
        node
    }

    fn parse_ternary_inner(&mut self) -> Result<Node, ParseError> {
        let position = self.peek().position;
        let condition = self.parse_or()?;

        if !self.check(&TokenKind::Question) {
            return Ok(condition);
        }
        self.advance(); // consume `?`

        let consequent = self.parse_branch()?;
        self.expect(&TokenKind::Colon, "Expected ':' in conditional expression")?;
        let alternate = self.parse_branch()?;

        Ok(Node::new(
            NodeKind::Conditional {
                condition: Box::new(condition),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            position,
        ))
    }

    fn parse_branch(&mut self) -> Result<Node, ParseError> {
        if self.peek().is_html_tag() {
            self.parse_html_run()
        } else {
            self.parse_ternary()
        }
    }

    fn parse_or(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_and()?;
        while self.check(&TokenKind::Or) {
            let position = self.peek().position;
            self.advance();
            let right = self.parse_and()?;
            left = Node::new(
                NodeKind::Logical {
                    left: Box::new(left),
                    op: LogicalOp::Or,
                    right: Box::new(right),
                },
                position,
            );
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_equality()?;
        while self.check(&TokenKind::And) {
            let position = self.peek().position;
            self.advance();
            let right = self.parse_equality()?;
            left = Node::new(
                NodeKind::Logical {
                    left: Box::new(left),
                    op: LogicalOp::And,
                    right: Box::new(right),
                },
                position,
            );
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::StrictEq => BinaryOp::StrictEq,
                TokenKind::StrictNotEq => BinaryOp::StrictNeq,
                _ => break,
            };
            left = self.binary_tail(left, op, Self::parse_additive)?;
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            left = self.binary_tail(left, op, Self::parse_multiplicative)?;
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => break,
            };
            left = self.binary_tail(left, op, Self::parse_unary)?;
        }
        Ok(left)
    }

    fn binary_tail(
        &mut self,
        left: Node,
        op: BinaryOp,
        operand: fn(&mut Self) -> Result<Node, ParseError>,
    ) -> Result<Node, ParseError> {
        let position = self.peek().position;
        self.advance(); // consume operator
        let right = operand(self)?;
        Ok(Node::new(
            NodeKind::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
            position,
        ))
    }

    fn parse_unary(&mut self) -> Result<Node, ParseError> {
        let op = match self.peek().kind {
            TokenKind::Not => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.parse_member_chain(),
        };
        let position = self.peek().position;
        self.advance();
        self.enter()?;
        let operand = self.parse_unary();
        self.depth -= 1;
        let operand = operand?;
        Ok(Node::new(
            NodeKind::Unary {
                op,
                operand: Box::new(operand),
            },
            position,
        ))
    }

    /// `primary ( .name | [expr] | (args) | .map(cb) )*`
    fn parse_member_chain(&mut self) -> Result<Node, ParseError> {
        let chain_start = self.pos;
        let mut expr = self.parse_primary()?;

        loop {
            match self.peek().kind {
                TokenKind::Dot => {
                    self.advance(); // consume `.`
                    let position = self.peek().position;
                    let name = self.expect_property_name()?;

                    if self.check(&TokenKind::LParen) && ARRAY_TRANSFORMS.contains(&name.as_str()) {
                        expr = self.parse_array_transform(expr, &name, position)?;
                    } else {
                        expr = Node::new(
                            NodeKind::MemberAccess {
                                object: Box::new(expr),
                                property: Box::new(Node::new(NodeKind::Identifier(name), position)),
                                computed: false,
                            },
                            position,
                        );
                    }
                }
                TokenKind::LBracket => {
                    let position = self.peek().position;
                    self.advance(); // consume `[`
                    let index = self.parse_ternary()?;
                    self.expect(&TokenKind::RBracket, "Expected ']' after index")?;
                    expr = Node::new(
                        NodeKind::MemberAccess {
                            object: Box::new(expr),
                            property: Box::new(index),
                            computed: true,
                        },
                        position,
                    );
                }
                TokenKind::LParen => {
                    let position = self.peek().position;
                    let arguments = self.parse_arguments()?;
                    let source = join_tokens(&self.tokens[chain_start..self.pos]);
                    expr = Node::new(
                        NodeKind::Call {
                            callee: Box::new(expr),
                            arguments,
                            source,
                        },
                        position,
                    );
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    /// `.map(cb)`, `.filter(cb)`, `.forEach(cb)`, `.reduce(cb, init?)`
    fn parse_array_transform(
        &mut self,
        array: Node,
        method: &str,
        position: Position,
    ) -> Result<Node, ParseError> {
        self.advance(); // consume `(`
        let callback = self.parse_callback()?;

        let initial = if method == "reduce" && self.check(&TokenKind::Comma) {
            self.advance();
            Some(Box::new(self.parse_ternary()?))
        } else {
            None
        };

        self.expect(
            &TokenKind::RParen,
            &format!("Expected ')' to close .{method}() call"),
        )?;

        let array = Box::new(array);
        let callback = Box::new(callback);
        let kind = match method {
            "filter" => NodeKind::ArrayFilter { array, callback },
            "reduce" => NodeKind::ArrayReduce {
                array,
                callback,
                initial,
            },
            _ => NodeKind::ArrayMap { array, callback },
        };
        Ok(Node::new(kind, position))
    }

    /// A callback argument: an arrow function, or any other expression.
    fn parse_callback(&mut self) -> Result<Node, ParseError> {
        let position = self.peek().position;

        let Some(params) = self.arrow_params() else {
            return self.parse_ternary();
        };

        let body = if self.peek().is_html_tag() {
            self.parse_html_until_close_paren()?
        } else {
            self.parse_ternary()?
        };

        Ok(Node::new(
            NodeKind::ArrowFunction {
                params,
                body: Box::new(body),
            },
            position,
        ))
    }

    /// Recognize `x =>` or `(a, b) =>` at the cursor. Consumes the
    /// parameter list and arrow on success; otherwise resets to where it
    /// started.
    fn arrow_params(&mut self) -> Option<Vec<String>> {
        let start = self.pos;

        if let TokenKind::Identifier(name) = &self.peek().kind {
            let name = name.clone();
            self.advance();
            if self.check(&TokenKind::Arrow) {
                self.advance();
                return Some(vec![name]);
            }
            self.pos = start;
            return None;
        }

        if !self.check(&TokenKind::LParen) {
            return None;
        }
        self.advance();

        let mut params = Vec::new();
        while let TokenKind::Identifier(name) = &self.peek().kind {
            params.push(name.clone());
            self.advance();
            if self.check(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }

        if self.check(&TokenKind::RParen) {
            self.advance();
            if self.check(&TokenKind::Arrow) {
                self.advance();
                return Some(params);
            }
        }

        self.pos = start;
        None
    }

    fn parse_arguments(&mut self) -> Result<Vec<Node>, ParseError> {
        self.advance(); // consume `(`
        let mut arguments = Vec::new();

        if self.check(&TokenKind::RParen) {
            self.advance();
            return Ok(arguments);
        }

        loop {
            arguments.push(self.parse_callback()?);
            if self.check(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }

        self.expect(&TokenKind::RParen, "Expected ')' after arguments")?;
        Ok(arguments)
    }

    fn parse_primary(&mut self) -> Result<Node, ParseError> {
        let token = self.peek().clone();
        let position = token.position;

        let kind = match token.kind {
            TokenKind::String(s) => NodeKind::String(s),
            TokenKind::TemplateLiteral(_) => NodeKind::TemplateLiteral(token.text),
            TokenKind::Number(n) => NodeKind::Number(n),
            TokenKind::Boolean(b) => NodeKind::Boolean(b),
            TokenKind::Null => NodeKind::Null,
            TokenKind::Identifier(name) if name == "undefined" => NodeKind::Undefined,
            TokenKind::Identifier(name) => NodeKind::Identifier(name),
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_ternary()?;
                self.expect(&TokenKind::RParen, "Expected ')' after expression")?;
                return Ok(inner);
            }
            TokenKind::HtmlTag { .. } => return self.parse_html_run(),
            TokenKind::Eof => {
                return Err(self.error("Unexpected end of expression".into()));
            }
            _ => {
                return Err(self.error(format!("Unexpected token '{}'", token.text)));
            }
        };

        self.advance();
        Ok(Node::new(kind, position))
    }

    // =========================================================================
    // HTML collection
    // =========================================================================

    /// Collect balanced markup (one or more sibling elements with their
    /// content, including nested spans) into one opaque node.
    fn parse_html_run(&mut self) -> Result<Node, ParseError> {
        let start = self.pos;
        let position = self.peek().position;
        let mut depth = 0usize;

        loop {
            match &self.peek().kind {
                TokenKind::HtmlTag {
                    name,
                    closing,
                    self_closing,
                } => {
                    if *closing {
                        depth = depth.saturating_sub(1);
                    } else if !*self_closing && !name.starts_with('!') && !is_void_element(name) {
                        depth += 1;
                    }
                    self.advance();
                }
                TokenKind::Eof => break,
                _ if depth > 0 => self.advance(),
                _ => break,
            }
        }

        if depth > 0 {
            return Err(self.error("Unclosed HTML element in expression".into()));
        }

        let markup = join_tokens(&self.tokens[start..self.pos]);
        Ok(Node::new(NodeKind::HtmlElement(markup), position))
    }

    /// Arrow bodies that start with markup run to the call's closing `)`.
    fn parse_html_until_close_paren(&mut self) -> Result<Node, ParseError> {
        let start = self.pos;
        let position = self.peek().position;
        let mut depth = 0usize;

        loop {
            match self.peek().kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen if depth == 0 => break,
                TokenKind::RParen => depth -= 1,
                TokenKind::Eof => {
                    return Err(self.error("Expected ')' after arrow function body".into()));
                }
                _ => {}
            }
            self.advance();
        }

        let markup = join_tokens(&self.tokens[start..self.pos]);
        Ok(Node::new(NodeKind::HtmlElement(markup.trim_end().to_string()), position))
    }

    // =========================================================================
    // Token navigation helpers
    // =========================================================================

    /// The token stream always ends with `Eof`, and the cursor never moves
    /// past it.
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            self.pos += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn expect(&mut self, kind: &TokenKind, message: &str) -> Result<(), ParseError> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("{message}, got '{}'", self.peek().text)))
        }
    }

    /// Property names may be any identifier-like token (`x.null`, `x.true`).
    fn expect_property_name(&mut self) -> Result<String, ParseError> {
        let token = self.peek();
        match &token.kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            TokenKind::Boolean(_) | TokenKind::Null => {
                let name = token.text.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(format!(
                "Expected property name after '.', got '{}'",
                token.text
            ))),
        }
    }

    /// Count one level of nesting, failing once it passes [`MAX_NESTING`].
    fn enter(&mut self) -> Result<(), ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!(
                "Expression nested deeper than {MAX_NESTING} levels"
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn error(&self, message: String) -> ParseError {
        let token = self.peek();
        ParseError {
            message,
            line: token.position.line,
            column: token.position.column,
        }
    }
}
