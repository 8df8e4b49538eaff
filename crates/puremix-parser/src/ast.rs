//! Abstract Syntax Tree for template expressions.
//!
//! A node owns its children exclusively; the tree has no back-references.
//! HTML inside an expression (a ternary branch, an arrow-function body) is
//! kept as an opaque `HtmlElement` holding the raw markup, which the
//! evaluator renders by re-entering the template driver.

use puremix_lexer::Position;

/// A template AST node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub meta: Metadata,
}

impl Node {
    pub fn new(kind: NodeKind, position: Position) -> Self {
        Self {
            kind,
            meta: Metadata {
                position,
                ..Metadata::default()
            },
        }
    }

    /// Direct children in evaluation order.
    pub fn children(&self) -> Vec<&Node> {
        match &self.kind {
            NodeKind::Program(nodes) => nodes.iter().collect(),
            NodeKind::Expression(inner) => vec![inner.as_ref()],
            NodeKind::MemberAccess {
                object, property, ..
            } => vec![object.as_ref(), property.as_ref()],
            NodeKind::Conditional {
                condition,
                consequent,
                alternate,
            } => vec![condition.as_ref(), consequent.as_ref(), alternate.as_ref()],
            NodeKind::Binary { left, right, .. } | NodeKind::Logical { left, right, .. } => {
                vec![left.as_ref(), right.as_ref()]
            }
            NodeKind::Unary { operand, .. } => vec![operand.as_ref()],
            NodeKind::Call {
                callee, arguments, ..
            } => std::iter::once(callee.as_ref()).chain(arguments).collect(),
            NodeKind::ArrayMap { array, callback } | NodeKind::ArrayFilter { array, callback } => {
                vec![array.as_ref(), callback.as_ref()]
            }
            NodeKind::ArrayReduce {
                array,
                callback,
                initial,
            } => {
                let mut out: Vec<&Node> = vec![array.as_ref(), callback.as_ref()];
                if let Some(initial) = initial {
                    out.push(initial.as_ref());
                }
                out
            }
            NodeKind::ArrowFunction { body, .. } => vec![body.as_ref()],
            _ => Vec::new(),
        }
    }

    /// Mutable direct children, same order as `children`.
    pub fn children_mut(&mut self) -> Vec<&mut Node> {
        match &mut self.kind {
            NodeKind::Program(nodes) => nodes.iter_mut().collect(),
            NodeKind::Expression(inner) => vec![inner.as_mut()],
            NodeKind::MemberAccess {
                object, property, ..
            } => vec![object.as_mut(), property.as_mut()],
            NodeKind::Conditional {
                condition,
                consequent,
                alternate,
            } => vec![condition.as_mut(), consequent.as_mut(), alternate.as_mut()],
            NodeKind::Binary { left, right, .. } | NodeKind::Logical { left, right, .. } => {
                vec![left.as_mut(), right.as_mut()]
            }
            NodeKind::Unary { operand, .. } => vec![operand.as_mut()],
            NodeKind::Call {
                callee, arguments, ..
            } => std::iter::once(callee.as_mut()).chain(arguments.iter_mut()).collect(),
            NodeKind::ArrayMap { array, callback } | NodeKind::ArrayFilter { array, callback } => {
                vec![array.as_mut(), callback.as_mut()]
            }
            NodeKind::ArrayReduce {
                array,
                callback,
                initial,
            } => {
                let mut out: Vec<&mut Node> = vec![array.as_mut(), callback.as_mut()];
                if let Some(initial) = initial {
                    out.push(initial.as_mut());
                }
                out
            }
            NodeKind::ArrowFunction { body, .. } => vec![body.as_mut()],
            _ => Vec::new(),
        }
    }

    /// Total number of nodes in this subtree.
    pub fn count(&self) -> usize {
        1 + self.children().iter().map(|c| c.count()).sum::<usize>()
    }
}

/// Annotations filled in by the parser (position) and the semantic pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Metadata {
    pub position: Position,
    pub scope: Option<Scope>,
    pub data_type: Option<DataType>,
    pub context_id: Option<usize>,
}

/// Which bindings a node is evaluated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// The cumulative template context.
    Template,
    /// A derived per-element context inside an array-transform callback.
    Callback { params: Vec<String> },
}

/// Coarse result type, used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Html,
    Text,
    Number,
    Array,
    Value,
}

/// Node variants.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Root: the sequence of markup, text and spans in the token stream.
    Program(Vec<Node>),

    /// Raw markup: a tag at program level, or a whole HTML fragment inside
    /// an expression. May itself contain `{...}` spans.
    HtmlElement(String),

    /// Free text.
    Text(String),

    /// A `{...}` expression span.
    Expression(Box<Node>),

    /// A `{...}` span classified as statements; holds the inner source.
    CodeBlock(String),

    /// Identifier: `user`, `items`
    Identifier(String),

    /// Member access: `user.name`, `items[0]`
    MemberAccess {
        object: Box<Node>,
        property: Box<Node>,
        computed: bool,
    },

    /// Ternary: `active ? 'on' : 'off'`
    Conditional {
        condition: Box<Node>,
        consequent: Box<Node>,
        alternate: Box<Node>,
    },

    /// Binary operation: `a === b`, `price * qty`
    Binary {
        left: Box<Node>,
        op: BinaryOp,
        right: Box<Node>,
    },

    /// Short-circuit operation: `a && b`, `a || b`
    Logical {
        left: Box<Node>,
        op: LogicalOp,
        right: Box<Node>,
    },

    /// Unary operation: `!active`, `-n`
    Unary { op: UnaryOp, operand: Box<Node> },

    /// Function or method call. `source` is the call's own text, handed to
    /// the script evaluator.
    Call {
        callee: Box<Node>,
        arguments: Vec<Node>,
        source: String,
    },

    /// `items.map(cb)` / `items.forEach(cb)`
    ArrayMap { array: Box<Node>, callback: Box<Node> },

    /// `items.filter(cb)`
    ArrayFilter { array: Box<Node>, callback: Box<Node> },

    /// `items.reduce(cb, initial)`
    ArrayReduce {
        array: Box<Node>,
        callback: Box<Node>,
        initial: Option<Box<Node>>,
    },

    /// Callback: `i => <li>{i.name}</li>`, `(acc, i) => acc + i.n`
    ArrowFunction { params: Vec<String>, body: Box<Node> },

    /// Backtick string, kept raw (with backticks) for the script evaluator.
    TemplateLiteral(String),

    // Literals
    String(String),
    Number(f64),
    Boolean(bool),
    Null,
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    StrictEq,
    StrictNeq,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}
