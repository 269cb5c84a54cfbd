//! Parse tree for policy source, before name resolution.

use crate::error::Location;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
        }
    }
}

/// Selector after the root of a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// `.name` or `["name"]`
    Field(String),
    /// `[3]`
    Index(usize),
}

/// A dotted/indexed name such as `input.user.roles[0]` or `data.pkg.rule`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub root: String,
    pub selectors: Vec<Selector>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(Value),
    Ref(Reference),
    Exists(Reference),
    List(Vec<Expr>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

/// `name := expr` or `name { e1; e2 }` (the latter parsed as a conjunction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDef {
    pub name: String,
    pub body: Expr,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleAst {
    /// Package path segments, e.g. `["diaz", "rego"]`.
    pub package: Vec<String>,
    pub package_loc: Location,
    pub rules: Vec<RuleDef>,
}
