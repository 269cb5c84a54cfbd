//! Policy compiler: source text -> [`PolicyModule`].
//!
//! Steps:
//! 1. Parse (syntax, unsupported constructs, nesting bound).
//! 2. Index rule names; a name defined twice is rejected.
//! 3. Resolve every reference to a fact path or a sibling rule.
//! 4. Bound the evaluation stack of every rule over the reference graph.
//!
//! Compilation is all-or-nothing and has no side effects.

use std::collections::{BTreeMap, HashMap};

use crate::ast::{Expr, ModuleAst, Reference, Selector};
use crate::error::{CompileError, CompileErrorKind, Location};
use crate::module::{Namespace, Node, PolicyModule, Rule, StackBound};
use crate::parser::parse_module;
use crate::value::{FactPath, PathSegment};

/// Root name for fact paths.
pub const INPUT_ROOT: &str = "input";
/// Root name for fully qualified rule references.
pub const DATA_ROOT: &str = "data";

/// Compile a single source (one package).
pub fn compile(source: &str) -> Result<PolicyModule, CompileError> {
    compile_all([source])
}

/// Compile several sources, one package each, into one module.
pub fn compile_all<'a, I>(sources: I) -> Result<PolicyModule, CompileError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut namespaces: BTreeMap<String, Namespace> = BTreeMap::new();
    for source in sources {
        let ast = parse_module(source)?;
        let loc = ast.package_loc;
        let ns = compile_namespace(ast)?;
        if namespaces.contains_key(ns.name()) {
            return Err(CompileError::new(
                CompileErrorKind::DuplicateNamespace,
                loc,
                format!("package `{}` is defined by more than one source", ns.name()),
            ));
        }
        namespaces.insert(ns.name().to_string(), ns);
    }

    let module = PolicyModule::from_namespaces(namespaces);
    tracing::debug!(
        namespaces = module.namespaces().count(),
        rules = module.rule_count(),
        "policy compiled"
    );
    Ok(module)
}

fn compile_namespace(ast: ModuleAst) -> Result<Namespace, CompileError> {
    let name = ast.package.join(".");

    let mut defined: HashMap<&str, Location> = HashMap::with_capacity(ast.rules.len());
    for rule in &ast.rules {
        if let Some(first) = defined.insert(rule.name.as_str(), rule.loc) {
            return Err(CompileError::new(
                CompileErrorKind::DuplicateRule,
                rule.loc,
                format!("rule `{}` already defined at {first}", rule.name),
            ));
        }
    }

    let resolver = Resolver {
        package: &ast.package,
        package_name: &name,
        defined: &defined,
    };

    let mut rules = BTreeMap::new();
    for def in &ast.rules {
        let body = resolver.resolve(&def.body)?;
        rules.insert(
            def.name.clone(),
            Rule {
                name: def.name.clone(),
                body,
                location: def.loc,
                bound: StackBound::default(),
            },
        );
    }

    let bounds = stack_bounds(&rules);
    for (rule, bound) in rules.values_mut().zip(bounds) {
        rule.bound = bound;
    }

    Ok(Namespace::new(name, rules))
}

/// Nodes on the longest root-to-leaf path of a body.
fn node_depth(node: &Node) -> usize {
    match node {
        Node::Literal(_) | Node::FactRef(_) | Node::RuleRef(_) | Node::Exists(_) => 1,
        Node::List(items) => 1 + items.iter().map(node_depth).max().unwrap_or(0),
        Node::Unary { operand, .. } => 1 + node_depth(operand),
        Node::Binary { lhs, rhs, .. } => 1 + node_depth(lhs).max(node_depth(rhs)),
    }
}

fn rule_refs<'a>(node: &'a Node, out: &mut Vec<&'a str>) {
    match node {
        Node::RuleRef(name) => out.push(name),
        Node::List(items) => items.iter().for_each(|n| rule_refs(n, out)),
        Node::Unary { operand, .. } => rule_refs(operand, out),
        Node::Binary { lhs, rhs, .. } => {
            rule_refs(lhs, out);
            rule_refs(rhs, out);
        }
        Node::Literal(_) | Node::FactRef(_) | Node::Exists(_) => {}
    }
}

/// [`StackBound`] for every rule, in map order.
///
/// Strongly connected components of the reference graph are found with an
/// iterative Tarjan walk. Components come out in reverse topological order,
/// so every component outside the current one is already bounded.
fn stack_bounds(rules: &BTreeMap<String, Rule>) -> Vec<StackBound> {
    const UNVISITED: usize = usize::MAX;

    let index_of: HashMap<&str, usize> = rules
        .keys()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();
    let edges: Vec<Vec<usize>> = rules
        .values()
        .map(|rule| {
            let mut refs = Vec::new();
            rule_refs(&rule.body, &mut refs);
            let mut targets: Vec<usize> = refs
                .into_iter()
                .filter_map(|name| index_of.get(name).copied())
                .collect();
            targets.sort_unstable();
            targets.dedup();
            targets
        })
        .collect();
    let depth: Vec<usize> = rules.values().map(|r| node_depth(&r.body)).collect();

    let n = edges.len();
    let mut bounds = vec![StackBound::default(); n];
    let mut bounded = vec![false; n];
    let mut index = vec![UNVISITED; n];
    let mut low = vec![0; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0;

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        index[root] = next_index;
        low[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;
        let mut work: Vec<(usize, usize)> = vec![(root, 0)];

        while let Some(&(v, edge)) = work.last() {
            if let Some(&w) = edges[v].get(edge) {
                if let Some(frame) = work.last_mut() {
                    frame.1 += 1;
                }
                if index[w] == UNVISITED {
                    index[w] = next_index;
                    low[w] = next_index;
                    next_index += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    work.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
                continue;
            }

            work.pop();
            if let Some(&(parent, _)) = work.last() {
                low[parent] = low[parent].min(low[v]);
            }
            if low[v] != index[v] {
                continue;
            }

            let mut members = Vec::new();
            while let Some(w) = stack.pop() {
                on_stack[w] = false;
                members.push(w);
                if w == v {
                    break;
                }
            }
            let mut below = StackBound::default();
            let mut nodes = 0usize;
            for &m in &members {
                nodes = nodes.saturating_add(depth[m]);
                for &w in edges[m].iter().filter(|w| bounded[**w]) {
                    below.rules = below.rules.max(bounds[w].rules);
                    below.nodes = below.nodes.max(bounds[w].nodes);
                }
            }
            let bound = StackBound {
                rules: members.len().saturating_add(below.rules),
                nodes: nodes.saturating_add(below.nodes),
            };
            for m in members {
                bounds[m] = bound;
                bounded[m] = true;
            }
        }
    }
    bounds
}

struct Resolver<'a> {
    package: &'a [String],
    package_name: &'a str,
    defined: &'a HashMap<&'a str, Location>,
}

impl Resolver<'_> {
    fn resolve(&self, expr: &Expr) -> Result<Node, CompileError> {
        Ok(match expr {
            Expr::Literal(v) => Node::Literal(v.clone()),
            Expr::Ref(r) => self.reference(r)?,
            Expr::Exists(r) => {
                if r.root != INPUT_ROOT {
                    return Err(CompileError::unsupported(
                        r.loc,
                        format!("exists() only applies to input paths, found `{}`", render(r)),
                    ));
                }
                Node::Exists(fact_path(r))
            }
            Expr::List(items) => Node::List(
                items
                    .iter()
                    .map(|e| self.resolve(e))
                    .collect::<Result<_, _>>()?,
            ),
            Expr::Unary { op, operand } => Node::Unary {
                op: *op,
                operand: Box::new(self.resolve(operand)?),
            },
            Expr::Binary { op, lhs, rhs } => Node::Binary {
                op: *op,
                lhs: Box::new(self.resolve(lhs)?),
                rhs: Box::new(self.resolve(rhs)?),
            },
        })
    }

    fn reference(&self, r: &Reference) -> Result<Node, CompileError> {
        if r.root == INPUT_ROOT {
            return Ok(Node::FactRef(fact_path(r)));
        }
        if r.root == DATA_ROOT {
            return self.qualified_rule(r);
        }
        if self.defined.contains_key(r.root.as_str()) {
            if !r.selectors.is_empty() {
                return Err(CompileError::unsupported(
                    r.loc,
                    format!("selecting into rule values is not supported: `{}`", render(r)),
                ));
            }
            return Ok(Node::RuleRef(r.root.clone()));
        }
        Err(CompileError::new(
            CompileErrorKind::UnresolvedReference,
            r.loc,
            format!(
                "`{}` is neither an input path nor a rule of package `{}`",
                render(r),
                self.package_name
            ),
        ))
    }

    /// `data.<package>.<rule>`; only the current package is reachable.
    fn qualified_rule(&self, r: &Reference) -> Result<Node, CompileError> {
        let unresolved = |msg: String| {
            CompileError::new(CompileErrorKind::UnresolvedReference, r.loc, msg)
        };

        let n = self.package.len();
        let prefix_matches = r.selectors.len() > n
            && r
                .selectors
                .iter()
                .zip(self.package)
                .all(|(s, p)| matches!(s, Selector::Field(f) if f == p));
        if !prefix_matches {
            return Err(unresolved(format!(
                "`{}` does not refer to a rule of package `{}`",
                render(r),
                self.package_name
            )));
        }

        let rule = match r.selectors.get(n) {
            Some(Selector::Field(name)) if self.defined.contains_key(name.as_str()) => name,
            _ => {
                return Err(unresolved(format!(
                    "`{}` does not name a rule of package `{}`",
                    render(r),
                    self.package_name
                )))
            }
        };
        if r.selectors.len() > n + 1 {
            return Err(CompileError::unsupported(
                r.loc,
                format!("selecting into rule values is not supported: `{}`", render(r)),
            ));
        }
        Ok(Node::RuleRef(rule.clone()))
    }
}

fn fact_path(r: &Reference) -> FactPath {
    FactPath::new(
        r.selectors
            .iter()
            .map(|s| match s {
                Selector::Field(f) => PathSegment::Key(f.clone()),
                Selector::Index(i) => PathSegment::Index(*i),
            })
            .collect(),
    )
}

fn render(r: &Reference) -> String {
    let mut s = r.root.clone();
    for sel in &r.selectors {
        match sel {
            Selector::Field(f) => {
                s.push('.');
                s.push_str(f);
            }
            Selector::Index(i) => s.push_str(&format!("[{i}]")),
        }
    }
    s
}
