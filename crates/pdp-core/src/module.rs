//! Compiled policy: immutable, shareable across threads via `Arc`.

use std::collections::BTreeMap;

use crate::ast::{BinaryOp, UnaryOp};
use crate::error::Location;
use crate::value::{FactPath, Value};

/// Resolved expression tree. Every name has been bound to either a fact path
/// or a rule of the same namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Literal(Value),
    /// The whole input document when the path is empty.
    FactRef(FactPath),
    RuleRef(String),
    Exists(FactPath),
    List(Vec<Node>),
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub name: String,
    pub body: Node,
    pub location: Location,
    /// Worst-case evaluation stack starting at this rule.
    pub bound: StackBound,
}

/// Upper bound on the interpreter stack needed to evaluate a rule: rule
/// frames and nested nodes along the deepest chain of rule references.
///
/// Computed at compile time and ignores short-circuiting, so it never
/// under-estimates. Rules in a reference cycle share one bound covering every
/// member of the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackBound {
    pub rules: usize,
    pub nodes: usize,
}

/// All rules of one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    name: String,
    rules: BTreeMap<String, Rule>,
}

impl Namespace {
    pub(crate) fn new(name: String, rules: BTreeMap<String, Rule>) -> Self {
        Self { name, rules }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name)
    }

    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Read-only collection of namespaces. Never mutated after compilation; a
/// reload builds a new one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PolicyModule {
    namespaces: BTreeMap<String, Namespace>,
}

impl PolicyModule {
    pub(crate) fn from_namespaces(namespaces: BTreeMap<String, Namespace>) -> Self {
        Self { namespaces }
    }

    pub fn namespace(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.get(name)
    }

    pub fn rule(&self, namespace: &str, rule: &str) -> Option<&Rule> {
        self.namespace(namespace)?.rule(rule)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.values()
    }

    pub fn rule_count(&self) -> usize {
        self.namespaces.values().map(Namespace::len).sum()
    }
}
