// Purpose: Define the parse-tree node types the compiler consumes.
// Inputs/Outputs: Produced by an external template parser (or test builders);
//   consumed by sema and codegen. Nodes expose read/write identifier sets.
// Invariants: Nodes are immutable after construction except the def root
//   marker, which codegen sets in a single pre-pass.
// Gotchas: Expression text is parsed eagerly here, so constructor errors are
//   compile errors carrying the node's template line.

use std::cell::Cell;
use std::collections::BTreeSet;
use std::rc::Rc;

use crate::error::CompileError;
use crate::expr::{self, CodeBlock, Expr};
use crate::filters;

/// Root of one template document.
#[derive(Clone, Debug, Default)]
pub struct TemplateNode {
    pub nodes: Vec<Node>,
}

impl TemplateNode {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }
}

#[derive(Clone, Debug)]
pub enum Node {
    Text(TextNode),
    Expression(ExpressionNode),
    Code(CodeNode),
    If(IfNode),
    For(ForNode),
    Def(Rc<DefTag>),
    Namespace(Rc<NamespaceTag>),
    Call(Rc<CallTag>),
    Inherit(InheritTag),
    Include(IncludeNode),
}

impl Node {
    pub fn text(content: impl Into<String>, line: usize) -> Node {
        Node::Text(TextNode {
            content: content.into(),
            line,
        })
    }

    /// Interpolation expression, e.g. `x | h | myfilter`.
    pub fn expression(code: &str, line: usize) -> Result<Node, CompileError> {
        Ok(Node::Expression(ExpressionNode::parse(code, line)?))
    }

    /// Embedded code block (`ismodule` marks template-module-level blocks).
    pub fn code(source: &str, ismodule: bool, line: usize) -> Result<Node, CompileError> {
        let block = expr::parse_code_text(source).map_err(|e| at(e, line))?;
        Ok(Node::Code(CodeNode {
            block,
            ismodule,
            line,
        }))
    }

    pub fn include(uri: &str, line: usize) -> Result<Node, CompileError> {
        Ok(Node::Include(IncludeNode {
            uri: parse_at(uri, line)?,
            line,
        }))
    }

    pub fn inherit(uri: &str, line: usize) -> Result<Node, CompileError> {
        Ok(Node::Inherit(InheritTag {
            uri: parse_at(uri, line)?,
            line,
        }))
    }

    pub fn line(&self) -> usize {
        match self {
            Node::Text(n) => n.line,
            Node::Expression(n) => n.line,
            Node::Code(n) => n.line,
            Node::If(n) => n.line,
            Node::For(n) => n.line,
            Node::Def(n) => n.line,
            Node::Namespace(n) => n.line,
            Node::Call(n) => n.line,
            Node::Inherit(n) => n.line,
            Node::Include(n) => n.line,
        }
    }
}

fn at(err: CompileError, line: usize) -> CompileError {
    CompileError::new(err.message, line)
}

fn parse_at(src: &str, line: usize) -> Result<Expr, CompileError> {
    expr::parse_expr_text(src).map_err(|e| at(e, line))
}

#[derive(Clone, Debug)]
pub struct TextNode {
    pub content: String,
    pub line: usize,
}

#[derive(Clone, Debug)]
pub struct ExpressionNode {
    pub expr: Expr,
    pub escapes: Vec<Expr>,
    pub line: usize,
}

impl ExpressionNode {
    pub fn parse(code: &str, line: usize) -> Result<Self, CompileError> {
        let (expr, escapes) = expr::parse_expr_with_escapes(code).map_err(|e| at(e, line))?;
        Ok(Self {
            expr,
            escapes,
            line,
        })
    }

    pub fn reads(&self) -> BTreeSet<String> {
        let mut out = self.expr.reads();
        for escape in &self.escapes {
            // built-in escape names always resolve to the filter library
            if let Expr::Name(name) = escape {
                if filters::is_builtin(name) {
                    continue;
                }
            }
            escape.collect_reads(&mut out);
        }
        out
    }
}

#[derive(Clone, Debug)]
pub struct CodeNode {
    pub block: CodeBlock,
    pub ismodule: bool,
    pub line: usize,
}

#[derive(Clone, Debug)]
pub struct IfArm {
    pub cond: Expr,
    pub nodes: Vec<Node>,
    pub line: usize,
}

/// Structured control node covering if/elif/else chains.
#[derive(Clone, Debug)]
pub struct IfNode {
    pub arms: Vec<IfArm>,
    pub else_nodes: Vec<Node>,
    pub line: usize,
}

impl IfNode {
    pub fn new(cond: &str, nodes: Vec<Node>, line: usize) -> Result<Self, CompileError> {
        Ok(Self {
            arms: vec![IfArm {
                cond: parse_at(cond, line)?,
                nodes,
                line,
            }],
            else_nodes: Vec::new(),
            line,
        })
    }

    pub fn with_elif(
        mut self,
        cond: &str,
        nodes: Vec<Node>,
        line: usize,
    ) -> Result<Self, CompileError> {
        self.arms.push(IfArm {
            cond: parse_at(cond, line)?,
            nodes,
            line,
        });
        Ok(self)
    }

    pub fn with_else(mut self, nodes: Vec<Node>) -> Self {
        self.else_nodes = nodes;
        self
    }

    pub fn node(self) -> Node {
        Node::If(self)
    }

    pub fn cond_reads(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for arm in &self.arms {
            arm.cond.collect_reads(&mut out);
        }
        out
    }
}

#[derive(Clone, Debug)]
pub struct ForNode {
    pub var: String,
    pub iter: Expr,
    pub nodes: Vec<Node>,
    pub line: usize,
}

impl ForNode {
    pub fn new(var: &str, iter: &str, nodes: Vec<Node>, line: usize) -> Result<Self, CompileError> {
        Ok(Self {
            var: var.to_string(),
            iter: parse_at(iter, line)?,
            nodes,
            line,
        })
    }

    pub fn node(self) -> Node {
        Node::For(self)
    }
}

#[derive(Clone, Debug)]
pub struct ParamDecl {
    pub name: String,
    pub default: Option<Expr>,
}

impl ParamDecl {
    /// Parse `name` or `name=default-expr`.
    pub fn parse(src: &str) -> Result<Self, CompileError> {
        match src.split_once('=') {
            None => Ok(Self {
                name: src.trim().to_string(),
                default: None,
            }),
            Some((name, default)) => Ok(Self {
                name: name.trim().to_string(),
                default: Some(expr::parse_expr_text(default)?),
            }),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DefTag {
    pub name: String,
    pub params: Vec<ParamDecl>,
    pub buffered: bool,
    pub filters: Vec<Expr>,
    pub nodes: Vec<Node>,
    pub line: usize,
    root: Cell<bool>,
}

impl DefTag {
    pub fn new(
        name: &str,
        params: &[&str],
        nodes: Vec<Node>,
        line: usize,
    ) -> Result<Self, CompileError> {
        let params = params
            .iter()
            .map(|p| ParamDecl::parse(p).map_err(|e| at(e, line)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: name.to_string(),
            params,
            buffered: false,
            filters: Vec::new(),
            nodes,
            line,
            root: Cell::new(false),
        })
    }

    pub fn buffered(mut self) -> Self {
        self.buffered = true;
        self
    }

    pub fn with_filter(mut self, filter: &str) -> Result<Self, CompileError> {
        self.filters
            .push(expr::parse_expr_text(filter).map_err(|e| at(e, self.line))?);
        Ok(self)
    }

    pub fn node(self) -> Node {
        Node::Def(Rc::new(self))
    }

    pub fn is_root(&self) -> bool {
        self.root.get()
    }

    pub(crate) fn mark_root(&self, root: bool) {
        self.root.set(root);
    }

    pub fn param_names(&self) -> BTreeSet<String> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }

    /// Identifiers this def needs from its enclosing scope: parameter-default
    /// reads plus body reads not satisfied inside the def.
    pub fn reads(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for param in &self.params {
            if let Some(default) = &param.default {
                default.collect_reads(&mut out);
            }
        }
        let mut bound = self.param_names();
        bound.insert(self.name.clone());
        // writes anywhere in the body shadow for the whole scope, so they
        // are gathered before any read is classified
        collect_body_writes(&self.nodes, &mut bound);
        collect_body_reads(&self.nodes, &mut bound, &mut out);
        out.remove("context");
        out
    }
}

fn add_unbound(reads: BTreeSet<String>, bound: &BTreeSet<String>, out: &mut BTreeSet<String>) {
    for name in reads {
        if !bound.contains(&name) {
            out.insert(name);
        }
    }
}

fn collect_body_writes(nodes: &[Node], bound: &mut BTreeSet<String>) {
    for node in nodes {
        match node {
            Node::Code(n) if !n.ismodule => bound.extend(n.block.writes()),
            Node::If(n) => {
                for arm in &n.arms {
                    collect_body_writes(&arm.nodes, bound);
                }
                collect_body_writes(&n.else_nodes, bound);
            }
            Node::For(n) => {
                bound.insert(n.var.clone());
                collect_body_writes(&n.nodes, bound);
            }
            Node::Def(d) => {
                bound.insert(d.name.clone());
            }
            Node::Namespace(n) => {
                bound.insert(n.name.clone());
            }
            Node::Call(c) => collect_body_writes(&c.nodes, bound),
            _ => {}
        }
    }
}

fn collect_body_reads(nodes: &[Node], bound: &mut BTreeSet<String>, out: &mut BTreeSet<String>) {
    for node in nodes {
        match node {
            Node::Text(_) => {}
            Node::Expression(n) => add_unbound(n.reads(), bound, out),
            Node::Code(n) => {
                if !n.ismodule {
                    add_unbound(n.block.reads(), bound, out);
                }
            }
            Node::If(n) => {
                add_unbound(n.cond_reads(), bound, out);
                for arm in &n.arms {
                    collect_body_reads(&arm.nodes, bound, out);
                }
                collect_body_reads(&n.else_nodes, bound, out);
            }
            Node::For(n) => {
                add_unbound(n.iter.reads(), bound, out);
                collect_body_reads(&n.nodes, bound, out);
            }
            Node::Def(d) => add_unbound(d.reads(), bound, out),
            Node::Namespace(_) => {}
            Node::Call(c) => {
                add_unbound(c.target.reads(), bound, out);
                collect_body_reads(&c.nodes, bound, out);
            }
            Node::Inherit(n) => add_unbound(n.uri.reads(), bound, out),
            Node::Include(n) => add_unbound(n.uri.reads(), bound, out),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ImportSpec {
    Names(Vec<String>),
    Star,
}

impl ImportSpec {
    /// Parse the `import` attribute: `*` or a comma-separated name list.
    pub fn parse(src: &str) -> Self {
        if src.trim() == "*" {
            ImportSpec::Star
        } else {
            ImportSpec::Names(
                src.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            )
        }
    }
}

#[derive(Clone, Debug)]
pub struct NamespaceTag {
    pub name: String,
    pub uri: Option<Expr>,
    pub import: Option<ImportSpec>,
    pub inheritable: bool,
    pub nodes: Vec<Node>,
    pub line: usize,
}

impl NamespaceTag {
    pub fn new(name: &str, nodes: Vec<Node>, line: usize) -> Self {
        Self {
            name: name.to_string(),
            uri: None,
            import: None,
            inheritable: false,
            nodes,
            line,
        }
    }

    pub fn with_file(mut self, uri: &str) -> Result<Self, CompileError> {
        self.uri = Some(parse_at(uri, self.line)?);
        Ok(self)
    }

    pub fn with_import(mut self, spec: &str) -> Self {
        self.import = Some(ImportSpec::parse(spec));
        self
    }

    pub fn inheritable(mut self) -> Self {
        self.inheritable = true;
        self
    }

    pub fn node(self) -> Node {
        Node::Namespace(Rc::new(self))
    }
}

#[derive(Clone, Debug)]
pub struct CallTag {
    pub target: Expr,
    pub nodes: Vec<Node>,
    pub line: usize,
}

impl CallTag {
    pub fn new(target: &str, nodes: Vec<Node>, line: usize) -> Result<Self, CompileError> {
        Ok(Self {
            target: parse_at(target, line)?,
            nodes,
            line,
        })
    }

    pub fn node(self) -> Node {
        Node::Call(Rc::new(self))
    }
}

#[derive(Clone, Debug)]
pub struct InheritTag {
    pub uri: Expr,
    pub line: usize,
}

#[derive(Clone, Debug)]
pub struct IncludeNode {
    pub uri: Expr,
    pub line: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expression_reads_exclude_builtin_escapes() {
        let node = ExpressionNode::parse("x | h | myfilter", 1).expect("parse");
        let reads: Vec<_> = node.reads().into_iter().collect();
        assert_eq!(reads, vec!["myfilter", "x"]);
    }

    #[test]
    fn def_reads_propagate_body_and_defaults() {
        let body = vec![
            Node::expression("greeting + name", 2).expect("expr"),
            Node::code("name = 'shadowed later, still local'", false, 3).expect("code"),
        ];
        let def = DefTag::new("foo", &["name=default_name"], body, 1).expect("def");
        let reads: Vec<_> = def.reads().into_iter().collect();
        // `name` is a parameter and a local write; never escapes the def
        assert_eq!(reads, vec!["default_name", "greeting"]);
    }

    #[test]
    fn def_reads_exclude_names_assigned_later_in_the_body() {
        // the read comes first, but the assignment makes the name local to
        // the def's whole scope, so it never escapes as an enclosing read
        let body = vec![
            Node::expression("x", 2).expect("expr"),
            Node::code("x = 'assigned below the read'", false, 3).expect("code"),
        ];
        let def = DefTag::new("foo", &[], body, 1).expect("def");
        assert!(def.reads().is_empty());
    }

    #[test]
    fn nested_def_reads_reach_grandparent_through_one_level() {
        let inner = DefTag::new("inner", &[], vec![Node::expression("outer_var", 3).expect("e")], 2)
            .expect("def")
            .node();
        let outer = DefTag::new("outer", &[], vec![inner], 1).expect("def");
        let reads: Vec<_> = outer.reads().into_iter().collect();
        assert_eq!(reads, vec!["outer_var"]);
    }
}
