//! Expression-tree interpreter.
//!
//! Invariants:
//! - no coercion: every operator checks its operand types;
//! - `and`/`or` short-circuit left to right, so a skipped operand can never
//!   raise an error;
//! - the entry rule's compile-time [`StackBound`] is checked against the
//!   limits before anything runs, so depth failures do not depend on what
//!   the memo already holds and recursion can never outgrow the bound;
//! - rule references consult the session memo first and are tracked on an
//!   explicit per-call stack for cycle detection;
//! - the cancellation signal is checked before every rule descent and every
//!   binary node.
//!
//! [`StackBound`]: crate::module::StackBound

use crate::ast::{BinaryOp, UnaryOp};
use crate::error::{EvalError, EvalErrorKind};
use crate::module::{Namespace, Node};
use crate::session::Session;
use crate::value::{FactPath, Lookup, Value};

/// Most nested expression nodes one evaluation may stack up, summed over the
/// chain of rules it can enter.
pub const MAX_NESTED_NODES: usize = 512;

/// Evaluate `namespace.rule` within `session`.
pub fn evaluate(session: &Session, namespace: &str, rule: &str) -> Result<Value, EvalError> {
    session.enter_evaluation()?;

    let module = session.module();
    let ns = module.namespace(namespace).ok_or_else(|| {
        EvalError::at(
            EvalErrorKind::UndefinedRule,
            format!("{namespace}.{rule}"),
            format!("unknown namespace `{namespace}`"),
        )
    })?;
    let root = ns.rule(rule).ok_or_else(|| {
        EvalError::at(
            EvalErrorKind::UndefinedRule,
            format!("{namespace}.{rule}"),
            format!("unknown rule `{rule}`"),
        )
    })?;

    let max_depth = session.limits().max_depth;
    if root.bound.rules > max_depth {
        return Err(EvalError::at(
            EvalErrorKind::DepthExceeded,
            format!("{namespace}.{rule}"),
            format!(
                "rule chain can reach {} rules deep, limit is {max_depth}",
                root.bound.rules
            ),
        ));
    }
    if root.bound.nodes > MAX_NESTED_NODES {
        return Err(EvalError::at(
            EvalErrorKind::DepthExceeded,
            format!("{namespace}.{rule}"),
            format!(
                "rule chain can nest {} expressions, limit is {MAX_NESTED_NODES}",
                root.bound.nodes
            ),
        ));
    }

    Evaluator {
        session,
        ns,
        stack: Vec::new(),
    }
    .rule(rule)
}

struct Evaluator<'s> {
    session: &'s Session,
    ns: &'s Namespace,
    /// Rules currently being evaluated on this call path.
    stack: Vec<&'s str>,
}

impl<'s> Evaluator<'s> {
    fn rule(&mut self, name: &str) -> Result<Value, EvalError> {
        self.session.signal().check()?;

        if let Some(v) = self.session.memo_get(self.ns.name(), name) {
            return Ok(v);
        }

        let ns = self.ns;
        let rule = ns.rule(name).ok_or_else(|| {
            EvalError::at(
                EvalErrorKind::UndefinedRule,
                format!("{}.{name}", ns.name()),
                format!("unknown rule `{name}`"),
            )
        })?;

        if let Some(pos) = self.stack.iter().position(|r| *r == rule.name) {
            let mut chain: Vec<&str> = self.stack[pos..].to_vec();
            chain.push(rule.name.as_str());
            return Err(EvalError::at(
                EvalErrorKind::CyclicReference,
                chain.join(" -> "),
                format!("rule `{name}` depends on itself"),
            ));
        }

        self.stack.push(rule.name.as_str());
        let result = self.node(&rule.body);
        self.stack.pop();

        let value = result?;
        self.session.memo_put(ns.name(), name, &value);
        Ok(value)
    }

    fn node(&mut self, node: &Node) -> Result<Value, EvalError> {
        match node {
            Node::Literal(v) => Ok(v.clone()),
            Node::FactRef(path) => self.fact(path),
            Node::Exists(path) => self.exists(path),
            Node::RuleRef(name) => self.rule(name),
            Node::List(items) => items
                .iter()
                .map(|n| self.node(n))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Seq),
            Node::Unary {
                op: UnaryOp::Not,
                operand,
            } => {
                let v = self.node(operand)?;
                let b = self.boolean("not", operand, &v)?;
                Ok(Value::Bool(!b))
            }
            Node::Binary { op, lhs, rhs } => {
                self.session.signal().check()?;
                self.binary(*op, lhs, rhs)
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, lhs: &Node, rhs: &Node) -> Result<Value, EvalError> {
        match op {
            BinaryOp::And => {
                let l = self.node(lhs)?;
                if !self.boolean("and", lhs, &l)? {
                    return Ok(Value::Bool(false));
                }
                let r = self.node(rhs)?;
                Ok(Value::Bool(self.boolean("and", rhs, &r)?))
            }
            BinaryOp::Or => {
                let l = self.node(lhs)?;
                if self.boolean("or", lhs, &l)? {
                    return Ok(Value::Bool(true));
                }
                let r = self.node(rhs)?;
                Ok(Value::Bool(self.boolean("or", rhs, &r)?))
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                let l = self.node(lhs)?;
                let r = self.node(rhs)?;
                if !l.same_type(&r) {
                    return Err(self.mismatch(op, (lhs, &l), (rhs, &r)));
                }
                let eq = l == r;
                Ok(Value::Bool(if op == BinaryOp::Eq { eq } else { !eq }))
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let l = self.node(lhs)?;
                let r = self.node(rhs)?;
                let ord = match (&l, &r) {
                    (Value::Int(a), Value::Int(b)) => a.cmp(b),
                    (Value::Str(a), Value::Str(b)) => a.cmp(b),
                    _ => return Err(self.mismatch(op, (lhs, &l), (rhs, &r))),
                };
                Ok(Value::Bool(match op {
                    BinaryOp::Lt => ord.is_lt(),
                    BinaryOp::Le => ord.is_le(),
                    BinaryOp::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                }))
            }
            BinaryOp::In => {
                let needle = self.node(lhs)?;
                let haystack = self.node(rhs)?;
                match (&needle, &haystack) {
                    (_, Value::Seq(items)) => Ok(Value::Bool(items.contains(&needle))),
                    (Value::Str(key), Value::Doc(doc)) => Ok(Value::Bool(doc.contains_key(key))),
                    _ => Err(self.mismatch(op, (lhs, &needle), (rhs, &haystack))),
                }
            }
        }
    }

    fn fact(&self, path: &FactPath) -> Result<Value, EvalError> {
        let facts = self.session.facts();
        if path.is_root() {
            return Ok(Value::Doc(facts.clone()));
        }
        match facts.lookup(path) {
            Lookup::Found(v) => Ok(v.clone()),
            Lookup::Missing => Err(EvalError::at(
                EvalErrorKind::MissingBinding,
                path.to_string(),
                "fact is not bound",
            )),
            Lookup::NotTraversable { found, .. } => Err(EvalError::at(
                EvalErrorKind::TypeMismatch,
                path.to_string(),
                format!("cannot select into a {found}"),
            )),
        }
    }

    fn exists(&self, path: &FactPath) -> Result<Value, EvalError> {
        if path.is_root() {
            return Ok(Value::Bool(true));
        }
        match self.session.facts().lookup(path) {
            Lookup::Found(_) => Ok(Value::Bool(true)),
            Lookup::Missing => Ok(Value::Bool(false)),
            Lookup::NotTraversable { found, .. } => Err(EvalError::at(
                EvalErrorKind::TypeMismatch,
                path.to_string(),
                format!("cannot select into a {found}"),
            )),
        }
    }

    /// Fact path or rule an operand's value came from.
    fn origin(&self, node: &Node) -> Option<String> {
        match node {
            Node::FactRef(path) | Node::Exists(path) => Some(path.to_string()),
            Node::RuleRef(name) => Some(format!("{}.{name}", self.ns.name())),
            _ => None,
        }
    }

    fn boolean(&self, op: &str, node: &Node, v: &Value) -> Result<bool, EvalError> {
        v.as_bool().ok_or_else(|| EvalError {
            kind: EvalErrorKind::TypeMismatch,
            path: self.origin(node),
            message: format!("`{op}` expects boolean operands, got {}", v.type_name()),
        })
    }

    fn mismatch(&self, op: BinaryOp, lhs: (&Node, &Value), rhs: (&Node, &Value)) -> EvalError {
        EvalError {
            kind: EvalErrorKind::TypeMismatch,
            path: self.origin(lhs.0).or_else(|| self.origin(rhs.0)),
            message: format!(
                "`{}` cannot compare {} with {}",
                op.symbol(),
                lhs.1.type_name(),
                rhs.1.type_name()
            ),
        }
    }
}
