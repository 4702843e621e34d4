use std::fmt;

use serde::{Deserialize, Serialize};

pub mod source_map;
pub use source_map::SourceMap;

// ---- Span infrastructure ----

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const UNKNOWN: Span = Span { start: 0, end: 0 };

    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Wraps a node with its source span. Transparent to serde (serializes as inner node only).
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Spanned { node, span }
    }

    pub fn unknown(node: T) -> Self {
        Spanned { node, span: Span::UNKNOWN }
    }
}

impl<T> std::ops::Deref for Spanned<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.node
    }
}

impl<T: fmt::Display> fmt::Display for Spanned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.node.fmt(f)
    }
}

impl<T: Serialize> Serialize for Spanned<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.node.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Spanned<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(|node| Spanned { node, span: Span::UNKNOWN })
    }
}

// ---- Core AST types ----

pub type ExprNode = Spanned<Expr>;

/// Statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `let name = value;`
    Let {
        name: String,
        value: ExprNode,
        #[serde(skip)]
        span: Span,
    },

    /// `return;` or `return value;`
    Return {
        value: Option<ExprNode>,
        #[serde(skip)]
        span: Span,
    },

    /// Expression evaluated for its value, which is then discarded
    Expr(ExprNode),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Let { span, .. } | Stmt::Return { span, .. } => *span,
            Stmt::Expr(expr) => expr.span,
        }
    }
}

/// `{ stmt; stmt; ... }`: body of if/while/fn
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    pub statements: Vec<Stmt>,
}

/// Expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Ident(String),
    Integer(i64),
    Double(f64),
    Str(String),
    Boolean(bool),
    Null,

    /// `-x`, `!x`, `++x`, `--x`
    Prefix { op: PrefixOp, operand: Box<ExprNode> },

    /// `x++`, `x--`
    Postfix { op: PostfixOp, operand: Box<ExprNode> },

    Infix {
        op: InfixOp,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },

    /// `condition ? consequence : alternative`
    Conditional {
        condition: Box<ExprNode>,
        consequence: Box<ExprNode>,
        alternative: Box<ExprNode>,
    },

    If {
        condition: Box<ExprNode>,
        consequence: Block,
        alternative: Option<Block>,
    },

    While { condition: Box<ExprNode>, body: Block },

    /// `fn(params) { body }`; `name` is set when bound by `let name = fn ...`
    Function {
        name: Option<String>,
        params: Vec<String>,
        body: Block,
    },

    Call {
        function: Box<ExprNode>,
        args: Vec<ExprNode>,
    },

    /// `target = value` where target is an identifier or an index expression
    Assign {
        target: Box<ExprNode>,
        value: Box<ExprNode>,
    },

    Array(Vec<ExprNode>),

    Map(Vec<(ExprNode, ExprNode)>),

    Index {
        left: Box<ExprNode>,
        index: Box<ExprNode>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrefixOp {
    Minus,
    Bang,
    Increment,
    Decrement,
}

impl PrefixOp {
    pub fn as_str(self) -> &'static str {
        match self {
            PrefixOp::Minus => "-",
            PrefixOp::Bang => "!",
            PrefixOp::Increment => "++",
            PrefixOp::Decrement => "--",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostfixOp {
    Increment,
    Decrement,
}

impl PostfixOp {
    pub fn as_str(self) -> &'static str {
        match self {
            PostfixOp::Increment => "++",
            PostfixOp::Decrement => "--",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfixOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    LessThan,
    GreaterThan,
    Equals,
    NotEquals,
    And,
    Or,
}

impl InfixOp {
    pub fn as_str(self) -> &'static str {
        match self {
            InfixOp::Add => "+",
            InfixOp::Subtract => "-",
            InfixOp::Multiply => "*",
            InfixOp::Divide => "/",
            InfixOp::LessThan => "<",
            InfixOp::GreaterThan => ">",
            InfixOp::Equals => "==",
            InfixOp::NotEquals => "!=",
            InfixOp::And => "&&",
            InfixOp::Or => "||",
        }
    }
}

/// A complete program is a list of statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
    #[serde(skip)]
    pub source: Option<String>,
}

// ---- Printable form ----
//
// Fully parenthesized, so parser tests can check precedence by string compare.

impl fmt::Display for PrefixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PostfixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for InfixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Ident(name) => write!(f, "{}", name),
            Expr::Integer(n) => write!(f, "{}", n),
            Expr::Double(n) => write!(f, "{:?}", n),
            Expr::Str(s) => write!(f, "{:?}", s),
            Expr::Boolean(b) => write!(f, "{}", b),
            Expr::Null => write!(f, "null"),
            Expr::Prefix { op, operand } => write!(f, "({}{})", op, operand),
            Expr::Postfix { op, operand } => write!(f, "({}{})", operand, op),
            Expr::Infix { op, left, right } => write!(f, "({} {} {})", left, op, right),
            Expr::Conditional { condition, consequence, alternative } => {
                write!(f, "({} ? {} : {})", condition, consequence, alternative)
            }
            Expr::If { condition, consequence, alternative } => {
                write!(f, "if {} {}", condition, consequence)?;
                if let Some(alt) = alternative {
                    write!(f, " else {}", alt)?;
                }
                Ok(())
            }
            Expr::While { condition, body } => write!(f, "while {} {}", condition, body),
            Expr::Function { name, params, body } => {
                write!(f, "fn")?;
                if let Some(name) = name {
                    write!(f, "<{}>", name)?;
                }
                write!(f, "(")?;
                write_list(f, params)?;
                write!(f, ") {}", body)
            }
            Expr::Call { function, args } => {
                write!(f, "{}(", function)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Expr::Assign { target, value } => write!(f, "({} = {})", target, value),
            Expr::Array(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
            Expr::Map(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Expr::Index { left, index } => write!(f, "({}[{}])", left, index),
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Let { name, value, .. } => write!(f, "let {} = {};", name, value),
            Stmt::Return { value: Some(v), .. } => write!(f, "return {};", v),
            Stmt::Return { value: None, .. } => write!(f, "return;"),
            Stmt::Expr(expr) => write!(f, "{}", expr),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for stmt in &self.statements {
            write!(f, " {}", stmt)?;
        }
        write!(f, " }}")
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stmt) in self.statements.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", stmt)?;
        }
        Ok(())
    }
}
