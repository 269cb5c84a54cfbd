//! Policy source parser: text -> [`ModuleAst`], built on `winnow`.
//!
//! Precedence, loosest first: `or`, `and`, `not`, comparison (non-chaining),
//! operand. Newlines end a rule unless they follow a binary operator or sit
//! inside `(...)` / `[...]`.

use winnow::ascii::Caseless;
use winnow::combinator::alt;
use winnow::error::ContextError;
use winnow::prelude::*;
use winnow::token::{any, one_of, take_while};

use crate::ast::{BinaryOp, Expr, ModuleAst, Reference, RuleDef, Selector, UnaryOp};
use crate::error::{CompileError, Location};
use crate::value::Value;

/// Maximum expression nesting accepted by [`parse_module`].
pub const DEFAULT_MAX_NESTING: usize = 128;

/// Rego keywords outside the supported subset.
const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "import", "default", "some", "every", "with", "else", "contains",
];

/// Words that can never start an operand.
const RESERVED: &[&str] = &["package", "if", "in"];

type PResult<T> = Result<T, CompileError>;

/// Parse one policy module.
pub fn parse_module(src: &str) -> PResult<ModuleAst> {
    parse_module_with_limit(src, DEFAULT_MAX_NESTING)
}

pub fn parse_module_with_limit(src: &str, max_nesting: usize) -> PResult<ModuleAst> {
    let mut input = src;
    Grammar {
        src,
        grouping: 0,
        nesting: 0,
        max_nesting,
    }
    .module(&mut input)
}

// ---- lexical pieces ----

/// Run `parser`; on failure the input is restored.
fn attempt<'s, O, P>(input: &mut &'s str, mut parser: P) -> Option<O>
where
    P: Parser<&'s str, O, ContextError>,
{
    let checkpoint = *input;
    match parser.parse_next(input) {
        Ok(out) => Some(out),
        Err(_) => {
            *input = checkpoint;
            None
        }
    }
}

fn is_word_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn word<'s>(input: &mut &'s str) -> Option<&'s str> {
    attempt(
        input,
        (one_of(is_word_start), take_while(0.., is_word_char)).take(),
    )
}

fn peek_word(input: &str) -> Option<&str> {
    let mut rest = input;
    word(&mut rest)
}

/// Case-insensitive keyword that is not the prefix of a longer word.
fn keyword(input: &mut &str, kw: &'static str) -> bool {
    let checkpoint = *input;
    if attempt(input, Caseless(kw)).is_some() && !input.starts_with(is_word_char) {
        return true;
    }
    *input = checkpoint;
    false
}

fn symbol(input: &mut &str, s: &'static str) -> bool {
    attempt(input, s).is_some()
}

fn is_operand_keyword(w: &str) -> bool {
    RESERVED.contains(&w) || ["and", "or", "not"].iter().any(|k| w.eq_ignore_ascii_case(k))
}

/// Short description of what sits at the front of `input`, for messages.
fn found(input: &str) -> String {
    match input.chars().next() {
        None => "end of input".into(),
        Some('\n') => "end of line".into(),
        Some(c) if is_word_char(c) => {
            let w: String = input.chars().take_while(|c| is_word_char(*c)).collect();
            format!("`{w}`")
        }
        Some(c) => format!("`{c}`"),
    }
}

struct Grammar<'s> {
    src: &'s str,
    /// Open `(`/`[` groups; newlines are insignificant while > 0.
    grouping: usize,
    nesting: usize,
    max_nesting: usize,
}

impl<'s> Grammar<'s> {
    // ---- plumbing ----

    fn loc(&self, input: &str) -> Location {
        let offset = self.src.len().saturating_sub(input.len());
        let consumed = self.src.get(..offset).unwrap_or_default();
        let line = consumed.matches('\n').count() + 1;
        let col = consumed
            .rsplit('\n')
            .next()
            .map_or(0, |l| l.chars().count())
            + 1;
        Location::new(line, col)
    }

    fn expected(&self, input: &str, what: &str) -> CompileError {
        CompileError::syntax(
            self.loc(input),
            format!("expected {what}, found {}", found(input)),
        )
    }

    /// Blanks and `#` comments; newlines too while inside a group.
    fn skip(&self, input: &mut &'s str) {
        loop {
            let _ = attempt(
                input,
                take_while(0.., |c: char| c == ' ' || c == '\t' || c == '\r'),
            );
            if input.starts_with('#') {
                let _ = attempt(input, take_while(1.., |c: char| c != '\n'));
                continue;
            }
            if self.grouping > 0 && symbol(input, "\n") {
                continue;
            }
            break;
        }
    }

    fn skip_lines(&self, input: &mut &'s str) {
        loop {
            self.skip(input);
            if !symbol(input, "\n") {
                break;
            }
        }
    }

    fn skip_separators(&self, input: &mut &'s str) {
        loop {
            self.skip(input);
            if attempt(input, alt(('\n', ';'))).is_none() {
                break;
            }
        }
    }

    fn descend(&mut self, loc: Location) -> PResult<()> {
        self.nesting += 1;
        if self.nesting > self.max_nesting {
            return Err(CompileError::syntax(
                loc,
                format!("expression nesting exceeds {}", self.max_nesting),
            ));
        }
        Ok(())
    }

    fn end_of_statement(&self, input: &mut &'s str) -> PResult<()> {
        self.skip(input);
        if input.is_empty() || attempt(input, alt(('\n', ';'))).is_some() {
            Ok(())
        } else {
            Err(self.expected(input, "end of line"))
        }
    }

    fn close(&self, input: &mut &'s str, delim: &'static str) -> PResult<()> {
        self.skip(input);
        if symbol(input, delim) {
            Ok(())
        } else {
            Err(self.expected(input, &format!("`{delim}`")))
        }
    }

    // ---- statements ----

    fn module(mut self, input: &mut &'s str) -> PResult<ModuleAst> {
        self.skip_separators(input);
        let package_loc = self.loc(input);
        match peek_word(input) {
            Some("package") => {
                let _ = word(input);
            }
            Some(w) if UNSUPPORTED_KEYWORDS.contains(&w) => {
                return Err(CompileError::unsupported(
                    package_loc,
                    format!("`{w}` is not supported"),
                ))
            }
            _ => return Err(self.expected(input, "`package` declaration")),
        }
        self.skip(input);
        let package = self.dotted_name(input)?;
        self.end_of_statement(input)?;

        let mut rules = Vec::new();
        loop {
            self.skip_separators(input);
            if input.is_empty() {
                break;
            }
            if peek_word(input) == Some("package") {
                return Err(CompileError::syntax(
                    self.loc(input),
                    "only one package declaration is allowed per source",
                ));
            }
            rules.push(self.rule(input)?);
        }

        Ok(ModuleAst {
            package,
            package_loc,
            rules,
        })
    }

    fn dotted_name(&self, input: &mut &'s str) -> PResult<Vec<String>> {
        let mut parts = Vec::new();
        loop {
            match word(input) {
                Some(w) => parts.push(w.to_string()),
                None => return Err(self.expected(input, "package name")),
            }
            if !symbol(input, ".") {
                return Ok(parts);
            }
        }
    }

    fn rule(&mut self, input: &mut &'s str) -> PResult<RuleDef> {
        let loc = self.loc(input);
        let Some(name) = word(input) else {
            return Err(self.expected(input, "rule name"));
        };
        if UNSUPPORTED_KEYWORDS.contains(&name) {
            return Err(CompileError::unsupported(
                loc,
                format!("`{name}` is not supported"),
            ));
        }

        self.skip(input);
        let next = self.loc(input);
        let body = if symbol(input, ":=") || (!input.starts_with("==") && symbol(input, "=")) {
            self.skip_lines(input);
            let body = self.expr(input)?;
            self.end_of_statement(input)?;
            body
        } else if peek_word(input) == Some("if") {
            let _ = word(input);
            self.skip(input);
            self.block(input)?
        } else if input.starts_with('{') {
            self.block(input)?
        } else if input.starts_with('(') {
            return Err(CompileError::unsupported(
                next,
                format!("function rule `{name}(...)` is not supported"),
            ));
        } else if input.starts_with('[') {
            return Err(CompileError::unsupported(
                next,
                format!("partial rule `{name}[...]` is not supported"),
            ));
        } else if let Some(w) = peek_word(input).filter(|w| UNSUPPORTED_KEYWORDS.contains(w)) {
            return Err(CompileError::unsupported(
                next,
                format!("`{w}` is not supported"),
            ));
        } else {
            return Err(self.expected(input, "`:=`, `if` or `{` after rule name"));
        };

        Ok(RuleDef {
            name: name.to_string(),
            body,
            loc,
        })
    }

    /// `{ e1 <sep> e2 ... }` -> `e1 and e2 and ...`
    fn block(&mut self, input: &mut &'s str) -> PResult<Expr> {
        let open = self.loc(input);
        if !symbol(input, "{") {
            return Err(self.expected(input, "`{`"));
        }
        let mut terms = Vec::new();
        loop {
            self.skip_separators(input);
            if symbol(input, "}") {
                break;
            }
            if input.is_empty() {
                return Err(CompileError::syntax(open, "unterminated rule body"));
            }
            if terms.len() >= self.max_nesting {
                return Err(CompileError::syntax(
                    self.loc(input),
                    format!("rule body exceeds {} expressions", self.max_nesting),
                ));
            }
            terms.push(self.expr(input)?);

            self.skip(input);
            if symbol(input, "}") {
                break;
            }
            if attempt(input, alt(('\n', ';'))).is_none() {
                return Err(self.expected(input, "`;`, newline or `}`"));
            }
        }
        self.end_of_statement(input)?;

        terms
            .into_iter()
            .reduce(|lhs, rhs| Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            })
            .ok_or_else(|| CompileError::syntax(open, "empty rule body"))
    }

    // ---- expressions ----

    fn expr(&mut self, input: &mut &'s str) -> PResult<Expr> {
        self.or_expr(input)
    }

    fn or_expr(&mut self, input: &mut &'s str) -> PResult<Expr> {
        let base = self.nesting;
        let mut lhs = self.and_expr(input)?;
        loop {
            self.skip(input);
            let loc = self.loc(input);
            if !(keyword(input, "or") || symbol(input, "||")) {
                break;
            }
            self.skip_lines(input);
            self.descend(loc)?;
            let rhs = self.and_expr(input)?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.nesting = base;
        Ok(lhs)
    }

    fn and_expr(&mut self, input: &mut &'s str) -> PResult<Expr> {
        let base = self.nesting;
        let mut lhs = self.not_expr(input)?;
        loop {
            self.skip(input);
            let loc = self.loc(input);
            if !(keyword(input, "and") || symbol(input, "&&")) {
                break;
            }
            self.skip_lines(input);
            self.descend(loc)?;
            let rhs = self.not_expr(input)?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.nesting = base;
        Ok(lhs)
    }

    fn not_expr(&mut self, input: &mut &'s str) -> PResult<Expr> {
        self.skip(input);
        let loc = self.loc(input);
        if keyword(input, "not") || (!input.starts_with("!=") && symbol(input, "!")) {
            self.descend(loc)?;
            let operand = self.not_expr(input)?;
            self.nesting -= 1;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.cmp_expr(input)
    }

    fn cmp_expr(&mut self, input: &mut &'s str) -> PResult<Expr> {
        let lhs = self.operand(input)?;
        let Some(op) = self.comparison_op(input)? else {
            return Ok(lhs);
        };
        self.skip_lines(input);
        let rhs = self.operand(input)?;

        self.skip(input);
        let loc = self.loc(input);
        if self.comparison_op(input)?.is_some() {
            return Err(CompileError::syntax(
                loc,
                "comparison operators cannot be chained",
            ));
        }

        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    /// Consume a comparison operator if one follows. Operators outside the
    /// supported subset are rejected here rather than left for the caller.
    fn comparison_op(&self, input: &mut &'s str) -> PResult<Option<BinaryOp>> {
        self.skip(input);
        let loc = self.loc(input);
        let op = attempt(
            input,
            alt((
                "==".value(BinaryOp::Eq),
                "!=".value(BinaryOp::Ne),
                "<=".value(BinaryOp::Le),
                ">=".value(BinaryOp::Ge),
                "<".value(BinaryOp::Lt),
                ">".value(BinaryOp::Gt),
            )),
        );
        if op.is_some() {
            return Ok(op);
        }
        if peek_word(input) == Some("in") {
            let _ = word(input);
            return Ok(Some(BinaryOp::In));
        }
        if input.starts_with(":=") || input.starts_with('=') {
            return Err(CompileError::unsupported(
                loc,
                "unification and local assignment are not supported; use `==`",
            ));
        }
        if let Some(c) = input.chars().next().filter(|c| "+-*/%".contains(*c)) {
            return Err(CompileError::unsupported(
                loc,
                format!("arithmetic operator `{c}` is not supported"),
            ));
        }
        if (input.starts_with('|') && !input.starts_with("||"))
            || (input.starts_with('&') && !input.starts_with("&&"))
        {
            return Err(CompileError::unsupported(
                loc,
                "set operators are not supported",
            ));
        }
        Ok(None)
    }

    fn operand(&mut self, input: &mut &'s str) -> PResult<Expr> {
        self.skip(input);
        let loc = self.loc(input);

        if symbol(input, "-") {
            if !input.starts_with(|c: char| c.is_ascii_digit()) {
                return Err(CompileError::unsupported(
                    loc,
                    "unary minus only applies to integer literals",
                ));
            }
            return Ok(Expr::Literal(Value::Int(self.integer(input, loc, true)?)));
        }
        if input.starts_with(|c: char| c.is_ascii_digit()) {
            return Ok(Expr::Literal(Value::Int(self.integer(input, loc, false)?)));
        }
        if input.starts_with('"') {
            return Ok(Expr::Literal(Value::Str(self.string(input)?)));
        }
        if symbol(input, "(") {
            self.descend(loc)?;
            self.grouping += 1;
            let inner = self.expr(input)?;
            self.close(input, ")")?;
            self.grouping -= 1;
            self.nesting -= 1;
            return Ok(inner);
        }
        if symbol(input, "[") {
            self.descend(loc)?;
            self.grouping += 1;
            let items = self.list_items(input)?;
            self.grouping -= 1;
            self.nesting -= 1;
            return Ok(Expr::List(items));
        }

        let Some(name) = word(input) else {
            return Err(self.expected(input, "expression"));
        };
        match name {
            "true" => return Ok(Expr::Literal(Value::Bool(true))),
            "false" => return Ok(Expr::Literal(Value::Bool(false))),
            _ => {}
        }

        let after_name = *input;
        self.skip(input);
        if input.starts_with('(') {
            return self.call(name, loc, input);
        }
        *input = after_name;

        if UNSUPPORTED_KEYWORDS.contains(&name) {
            return Err(CompileError::unsupported(
                loc,
                format!("`{name}` is not supported"),
            ));
        }
        if is_operand_keyword(name) {
            return Err(CompileError::syntax(
                loc,
                format!("expected expression, found `{name}`"),
            ));
        }
        Ok(Expr::Ref(self.reference(name, loc, input)?))
    }

    fn list_items(&mut self, input: &mut &'s str) -> PResult<Vec<Expr>> {
        let mut items = Vec::new();
        loop {
            self.skip(input);
            if symbol(input, "]") {
                return Ok(items);
            }
            items.push(self.expr(input)?);
            self.skip(input);
            if symbol(input, "]") {
                return Ok(items);
            }
            if !symbol(input, ",") {
                return Err(self.expected(input, "`,` or `]`"));
            }
        }
    }

    fn call(&mut self, name: &str, loc: Location, input: &mut &'s str) -> PResult<Expr> {
        if name != "exists" {
            return Err(CompileError::unsupported(
                loc,
                format!("function call `{name}(...)` is not supported"),
            ));
        }
        let _ = symbol(input, "(");
        self.grouping += 1;
        self.skip(input);
        let arg = self.loc(input);
        let root = match peek_word(input) {
            Some(w) if !is_operand_keyword(w) => word(input),
            _ => None,
        };
        let Some(root) = root else {
            return Err(CompileError::syntax(
                arg,
                format!("exists() expects a reference, found {}", found(input)),
            ));
        };
        let reference = self.reference(root, arg, input)?;
        self.close(input, ")")?;
        self.grouping -= 1;
        Ok(Expr::Exists(reference))
    }

    /// `root(.field | [int] | ["key"])*`; field names keep their spelling.
    fn reference(&self, root: &str, loc: Location, input: &mut &'s str) -> PResult<Reference> {
        let mut selectors = Vec::new();
        loop {
            if symbol(input, ".") {
                match word(input) {
                    Some(field) => selectors.push(Selector::Field(field.to_string())),
                    None => return Err(self.expected(input, "field name after `.`")),
                }
            } else if symbol(input, "[") {
                self.skip(input);
                let at = self.loc(input);
                let selector = if input.starts_with(|c: char| c.is_ascii_digit()) {
                    let i = self.integer(input, at, false)?;
                    usize::try_from(i)
                        .map(Selector::Index)
                        .map_err(|_| CompileError::syntax(at, "index out of range"))?
                } else if input.starts_with('"') {
                    Selector::Field(self.string(input)?)
                } else {
                    return Err(CompileError::unsupported(
                        at,
                        "only literal keys and indices are supported inside `[...]`",
                    ));
                };
                self.close(input, "]")?;
                selectors.push(selector);
            } else {
                break;
            }
        }
        Ok(Reference {
            root: root.to_string(),
            selectors,
            loc,
        })
    }

    // ---- literals ----

    fn integer(&self, input: &mut &'s str, loc: Location, negative: bool) -> PResult<i64> {
        let digits = attempt(
            input,
            take_while(1.., |c: char| c.is_ascii_digit() || c == '_'),
        )
        .unwrap_or_default();
        if input.starts_with('.') {
            return Err(CompileError::unsupported(
                loc,
                "floating point literals are not supported",
            ));
        }
        let mut text: String = digits.chars().filter(|c| *c != '_').collect();
        if negative {
            text.insert(0, '-');
        }
        text.parse::<i64>()
            .map_err(|_| CompileError::syntax(loc, format!("integer literal {text} out of range")))
    }

    fn string(&self, input: &mut &'s str) -> PResult<String> {
        let start = self.loc(input);
        let _ = symbol(input, "\"");
        let mut out = String::new();
        loop {
            if let Some(chunk) = attempt(
                input,
                take_while(1.., |c: char| c != '"' && c != '\\' && c != '\n'),
            ) {
                out.push_str(chunk);
            }
            match attempt(input, any) {
                Some('"') => return Ok(out),
                Some('\\') => {
                    let esc = self.loc(input);
                    match attempt(input, any) {
                        Some('"') => out.push('"'),
                        Some('\\') => out.push('\\'),
                        Some('n') => out.push('\n'),
                        Some('t') => out.push('\t'),
                        Some(other) => {
                            return Err(CompileError::syntax(
                                esc,
                                format!("unknown escape sequence \\{other}"),
                            ))
                        }
                        None => {
                            return Err(CompileError::syntax(start, "unterminated string literal"))
                        }
                    }
                }
                _ => return Err(CompileError::syntax(start, "unterminated string literal")),
            }
        }
    }
}
