// Purpose: Walk the parse tree and emit render units with their bindings.
// Inputs/Outputs: Consumes the template root plus per-scope Identifiers
//   records; produces the CompiledTemplate artifact.
// Invariants: The prologue binds exactly undeclared minus locally_declared
//   minus argument_declared, in name order; defs check before namespaces,
//   namespaces before context fetches.
// Gotchas: Call tag bodies compile with defs excluded; the defs become
//   separate callables alongside the body unit.

use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::CompileError;
use crate::expr::CodeBlock;
use crate::sema::{Identifiers, ScopeNode};
use crate::tree::{CallTag, DefTag, NamespaceTag, Node, TemplateNode};

use super::{Binding, CompiledTemplate, InheritDecl, NamespaceDecl, Op, RenderUnit};

pub(crate) struct Emitter<'a> {
    root: &'a TemplateNode,
    ns_names: BTreeSet<String>,
}

impl<'a> Emitter<'a> {
    pub(crate) fn new(root: &'a TemplateNode) -> Self {
        Self {
            root,
            ns_names: BTreeSet::new(),
        }
    }

    pub(crate) fn compile(mut self) -> Result<CompiledTemplate, CompileError> {
        for node in &self.root.nodes {
            if let Node::Def(def) = node {
                def.mark_root(true);
            }
        }

        let mut ns_tags: Vec<Rc<NamespaceTag>> = Vec::new();
        let mut module_code: Vec<CodeBlock> = Vec::new();
        let mut inherit: Option<InheritDecl> = None;
        collect_decls(&self.root.nodes, &mut ns_tags, &mut module_code, &mut inherit)?;
        for tag in &ns_tags {
            if !self.ns_names.insert(tag.name.clone()) {
                return Err(CompileError::new(
                    format!("namespace '{}' declared twice", tag.name),
                    tag.line,
                ));
            }
        }

        let mut base = Identifiers::root();
        for block in &module_code {
            base = base.branch(ScopeNode::ModuleCode(block));
        }

        let mut namespaces = Vec::with_capacity(ns_tags.len());
        for tag in &ns_tags {
            namespaces.push(self.namespace_decl(tag, &base)?);
        }

        let main_ids = base.branch(ScopeNode::Template(self.root));
        let mut main = self.unit("body", &[], &self.root.nodes, &main_ids, true)?;
        main.exposed_locals = main_ids.locally_assigned.iter().cloned().collect();

        let mut defs = Vec::with_capacity(main_ids.topleveldefs.len());
        for def in &main_ids.topleveldefs {
            let ids = main_ids.branch(ScopeNode::Def(def));
            defs.push(Arc::new(self.def_unit(def, &ids)?));
        }

        Ok(CompiledTemplate {
            main: Arc::new(main),
            defs,
            namespaces,
            inherit,
            module_code,
        })
    }

    fn namespace_decl(
        &self,
        tag: &Rc<NamespaceTag>,
        base: &Identifiers,
    ) -> Result<NamespaceDecl, CompileError> {
        let scope = base.branch(ScopeNode::Namespace(tag));
        let mut defs = Vec::new();
        for node in &tag.nodes {
            if let Node::Def(def) = node {
                let ids = scope.branch(ScopeNode::Def(def));
                defs.push(Arc::new(self.def_unit(def, &ids)?));
            }
        }
        Ok(NamespaceDecl {
            name: tag.name.clone(),
            uri: tag.uri.clone(),
            import: tag.import.clone(),
            inheritable: tag.inheritable,
            defs,
            line: tag.line,
        })
    }

    fn def_unit(&self, def: &Rc<DefTag>, ids: &Identifiers) -> Result<RenderUnit, CompileError> {
        let mut unit = self.unit(&def.name, &def.params, &def.nodes, ids, true)?;
        unit.buffered = def.buffered;
        unit.filters = def.filters.clone();
        unit.line = def.line;
        Ok(unit)
    }

    fn unit(
        &self,
        name: &str,
        params: &[crate::tree::ParamDecl],
        nodes: &[Node],
        ids: &Identifiers,
        include_defs: bool,
    ) -> Result<RenderUnit, CompileError> {
        Ok(RenderUnit {
            name: name.to_string(),
            params: params.to_vec(),
            buffered: false,
            filters: Vec::new(),
            prologue: self.prologue(ids)?,
            locals: ids.locally_declared.iter().cloned().collect(),
            ops: self.compile_ops(nodes, ids, include_defs)?,
            exposed_locals: Vec::new(),
            line: nodes.first().map(Node::line).unwrap_or(0),
        })
    }

    fn prologue(&self, ids: &Identifiers) -> Result<Vec<Binding>, CompileError> {
        let mut bindings = Vec::new();
        for name in &ids.undeclared {
            if ids.locally_declared.contains(name) || ids.argument_declared.contains(name) {
                continue;
            }
            let binding = if let Some(def) = ids.find_def(name) {
                if def.is_root() {
                    Binding::DefForward { name: name.clone() }
                } else {
                    let child = ids.branch(ScopeNode::Def(def));
                    Binding::Closure {
                        name: name.clone(),
                        unit: Arc::new(self.def_unit(def, &child)?),
                    }
                }
            } else if self.ns_names.contains(name) {
                Binding::Namespace { name: name.clone() }
            } else {
                Binding::ContextGet { name: name.clone() }
            };
            bindings.push(binding);
        }
        Ok(bindings)
    }

    fn compile_ops(
        &self,
        nodes: &[Node],
        ids: &Identifiers,
        include_defs: bool,
    ) -> Result<Vec<Op>, CompileError> {
        let mut ops = Vec::new();
        for node in nodes {
            match node {
                Node::Text(n) => ops.push(Op::WriteText(n.content.clone())),
                Node::Expression(n) => ops.push(Op::WriteExpr {
                    expr: n.expr.clone(),
                    escapes: n.escapes.clone(),
                    line: n.line,
                }),
                Node::Code(n) => {
                    if !n.ismodule {
                        ops.push(Op::Code {
                            block: n.block.clone(),
                            line: n.line,
                        });
                    }
                }
                Node::If(n) => {
                    let mut arms = Vec::with_capacity(n.arms.len());
                    for arm in &n.arms {
                        arms.push((
                            arm.cond.clone(),
                            self.compile_ops(&arm.nodes, ids, include_defs)?,
                        ));
                    }
                    ops.push(Op::If {
                        arms,
                        else_ops: self.compile_ops(&n.else_nodes, ids, include_defs)?,
                        line: n.line,
                    });
                }
                Node::For(n) => ops.push(Op::For {
                    var: n.var.clone(),
                    iter: n.iter.clone(),
                    ops: self.compile_ops(&n.nodes, ids, include_defs)?,
                    line: n.line,
                }),
                Node::Def(def) => {
                    // root defs are module-level callables, not body ops
                    if include_defs && !def.is_root() {
                        let child = ids.branch(ScopeNode::Def(def));
                        ops.push(Op::CloseOver {
                            name: def.name.clone(),
                            unit: Arc::new(self.def_unit(def, &child)?),
                        });
                    }
                }
                Node::Namespace(_) | Node::Inherit(_) => {}
                Node::Call(call) => ops.push(self.content_call(call, ids)?),
                Node::Include(n) => ops.push(Op::Include {
                    uri: n.uri.clone(),
                    line: n.line,
                }),
            }
        }
        Ok(ops)
    }

    fn content_call(&self, call: &Rc<CallTag>, ids: &Identifiers) -> Result<Op, CompileError> {
        let body_ids = ids.branch(ScopeNode::CallBody(call));
        let body = self.unit("body", &[], &call.nodes, &body_ids, false)?;
        let def_scope = ids.branch(ScopeNode::CallScope(call));
        let mut defs = Vec::new();
        for node in &call.nodes {
            if let Node::Def(def) = node {
                let child = def_scope.branch(ScopeNode::Def(def));
                defs.push(Arc::new(self.def_unit(def, &child)?));
            }
        }
        Ok(Op::ContentCall {
            target: call.target.clone(),
            body: Arc::new(body),
            defs,
            line: call.line,
        })
    }
}

fn collect_decls(
    nodes: &[Node],
    ns_tags: &mut Vec<Rc<NamespaceTag>>,
    module_code: &mut Vec<CodeBlock>,
    inherit: &mut Option<InheritDecl>,
) -> Result<(), CompileError> {
    for node in nodes {
        match node {
            Node::Namespace(tag) => ns_tags.push(tag.clone()),
            Node::Code(code) if code.ismodule => module_code.push(code.block.clone()),
            Node::Inherit(tag) => {
                if inherit.is_some() {
                    return Err(CompileError::new(
                        "a template may declare at most one inherit tag",
                        tag.line,
                    ));
                }
                *inherit = Some(InheritDecl {
                    uri: tag.uri.clone(),
                    line: tag.line,
                });
            }
            Node::Def(def) => {
                collect_decls(&def.nodes, ns_tags, module_code, inherit)?;
            }
            Node::If(n) => {
                for arm in &n.arms {
                    collect_decls(&arm.nodes, ns_tags, module_code, inherit)?;
                }
                collect_decls(&n.else_nodes, ns_tags, module_code, inherit)?;
            }
            Node::For(n) => collect_decls(&n.nodes, ns_tags, module_code, inherit)?,
            Node::Call(c) => collect_decls(&c.nodes, ns_tags, module_code, inherit)?,
            _ => {}
        }
    }
    Ok(())
}
