// Purpose: Classify every identifier a template scope references.
// Inputs/Outputs: Consumes parse-tree nodes plus the enclosing scope's
//   record; produces one Identifiers record per scope for codegen.
// Invariants: declared and undeclared stay disjoint; a name assigned
//   anywhere in a scope never resolves from the context in that scope
//   (codegen subtracts locally_declared when emitting bindings).
// Gotchas: A def scope descends exactly one level into its own body; nested
//   defs contribute only their name and propagated reads.

use std::collections::BTreeSet;
use std::rc::Rc;

use crate::expr::CodeBlock;
use crate::tree::{CallTag, DefTag, NamespaceTag, Node, TemplateNode};

/// The scope-bearing construct an `Identifiers` record is built for.
#[derive(Clone, Copy)]
pub enum ScopeNode<'a> {
    /// Template main body.
    Template(&'a TemplateNode),
    /// A def tag, descending one level into its body.
    Def(&'a Rc<DefTag>),
    /// A namespace tag; its inline defs register as closures.
    Namespace(&'a Rc<NamespaceTag>),
    /// A call tag's body unit; nested defs register as closures.
    CallScope(&'a Rc<CallTag>),
    /// A call tag's body statements only, defs excluded.
    CallBody(&'a Rc<CallTag>),
    /// A module-level code block; its writes are declared template-wide.
    ModuleCode(&'a CodeBlock),
}

/// One scope's identifier classification.
#[derive(Clone, Debug, Default)]
pub struct Identifiers {
    /// Names visible from the enclosing scope.
    pub declared: BTreeSet<String>,
    /// Names referenced but not bound here; fetched from the context.
    pub undeclared: BTreeSet<String>,
    /// Names assigned somewhere in this scope.
    pub locally_declared: BTreeSet<String>,
    /// Names assigned via embedded code blocks; exposed to forwarded defs.
    pub locally_assigned: BTreeSet<String>,
    /// Names bound by the callable's parameter list.
    pub argument_declared: BTreeSet<String>,
    /// Defs declared at template root, independently callable.
    pub topleveldefs: Vec<Rc<DefTag>>,
    /// Defs nested in this scope, closing over it.
    pub closuredefs: Vec<Rc<DefTag>>,
}

impl Identifiers {
    pub fn root() -> Self {
        Self::default()
    }

    /// Build the record for a nested scope with `self` as its parent.
    pub fn branch(&self, scope: ScopeNode<'_>) -> Identifiers {
        let mut next = Identifiers {
            declared: self
                .declared
                .iter()
                .cloned()
                .chain(self.closuredefs.iter().map(|d| d.name.clone()))
                .chain(self.locally_declared.iter().cloned())
                .collect(),
            topleveldefs: self.topleveldefs.clone(),
            ..Identifiers::default()
        };
        next.visit_scope(scope);
        next.undeclared = next
            .undeclared
            .difference(&next.declared)
            .cloned()
            .collect();
        debug_assert!(next.declared.is_disjoint(&next.undeclared));
        next
    }

    /// All defs callable from this scope.
    pub fn defs(&self) -> impl Iterator<Item = &Rc<DefTag>> {
        self.topleveldefs.iter().chain(self.closuredefs.iter())
    }

    pub fn find_def(&self, name: &str) -> Option<&Rc<DefTag>> {
        self.defs().find(|d| d.name == name)
    }

    fn visit_scope(&mut self, scope: ScopeNode<'_>) {
        match scope {
            ScopeNode::Template(root) => self.visit_nodes(&root.nodes, true),
            ScopeNode::Def(def) => self.visit_def(def, true, true),
            ScopeNode::Namespace(ns) => self.visit_nodes(&ns.nodes, true),
            ScopeNode::CallScope(call) => self.visit_nodes(&call.nodes, true),
            ScopeNode::CallBody(call) => self.visit_nodes(&call.nodes, false),
            ScopeNode::ModuleCode(block) => {
                for name in block.writes() {
                    self.locally_declared.insert(name);
                }
            }
        }
    }

    fn visit_nodes(&mut self, nodes: &[Node], include_defs: bool) {
        for node in nodes {
            self.visit_node(node, include_defs);
        }
    }

    fn visit_node(&mut self, node: &Node, include_defs: bool) {
        match node {
            Node::Text(_) => {}
            Node::Expression(n) => self.check_declared(n.reads(), BTreeSet::new()),
            Node::Code(n) => {
                if !n.ismodule {
                    self.check_declared(n.block.reads(), n.block.writes());
                    self.locally_assigned.extend(n.block.writes());
                }
            }
            Node::If(n) => {
                self.check_declared(n.cond_reads(), BTreeSet::new());
                for arm in &n.arms {
                    self.visit_nodes(&arm.nodes, include_defs);
                }
                self.visit_nodes(&n.else_nodes, include_defs);
            }
            Node::For(n) => {
                let mut writes = BTreeSet::new();
                writes.insert(n.var.clone());
                self.check_declared(n.iter.reads(), writes);
                self.visit_nodes(&n.nodes, include_defs);
            }
            Node::Def(d) => self.visit_def(d, include_defs, false),
            // the namespace tag owns its body; its name stays undeclared so
            // the binding pass resolves it against the declarations
            Node::Namespace(_) => {}
            Node::Call(c) => {
                // the call body is its own unit; only the target reads here
                self.check_declared(c.target.reads(), BTreeSet::new());
            }
            Node::Inherit(n) => self.check_declared(n.uri.reads(), BTreeSet::new()),
            Node::Include(n) => self.check_declared(n.uri.reads(), BTreeSet::new()),
        }
    }

    fn visit_def(&mut self, def: &Rc<DefTag>, include_defs: bool, own: bool) {
        if !include_defs {
            return;
        }
        if !own {
            if def.is_root() {
                if !self.topleveldefs.iter().any(|d| d.name == def.name) {
                    self.topleveldefs.push(def.clone());
                }
            } else if !self.closuredefs.iter().any(|d| d.name == def.name) {
                self.closuredefs.push(def.clone());
            }
        }
        self.check_declared(def.reads(), BTreeSet::new());
        if own {
            for name in def.param_names() {
                self.argument_declared.insert(name);
            }
            // descend one level into the body; nested defs contribute only
            // their propagated reads via DefTag::reads
            self.visit_nodes(&def.nodes, true);
        }
    }

    fn check_declared(&mut self, reads: BTreeSet<String>, writes: BTreeSet<String>) {
        for name in reads {
            if name != "context"
                && !self.declared.contains(&name)
                && !self.locally_declared.contains(&name)
                && !self.argument_declared.contains(&name)
            {
                self.undeclared.insert(name);
            }
        }
        for name in writes {
            self.locally_declared.insert(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{DefTag, ForNode, Node, TemplateNode};

    #[test]
    fn assignment_anywhere_shadows_for_the_whole_scope() {
        // read happens before the assignment; the name still never binds
        // from the context because codegen subtracts locally_declared
        let root = TemplateNode::new(vec![
            Node::expression("x", 1).expect("expr"),
            Node::code("x = 'assigned later'", false, 2).expect("code"),
        ]);
        let ids = Identifiers::root().branch(ScopeNode::Template(&root));
        assert!(ids.undeclared.contains("x"));
        assert!(ids.locally_declared.contains("x"));
        let to_bind: Vec<_> = ids.undeclared.difference(&ids.locally_declared).collect();
        assert!(to_bind.is_empty());
    }

    #[test]
    fn top_level_and_nested_defs_classify_separately() {
        let inner = DefTag::new("inner", &[], vec![Node::expression("y", 3).expect("e")], 2)
            .expect("def")
            .node();
        let outer = Rc::new(DefTag::new("outer", &[], vec![inner], 1).expect("def"));
        outer.mark_root(true);
        let root = TemplateNode::new(vec![Node::Def(outer.clone())]);

        let ids = Identifiers::root().branch(ScopeNode::Template(&root));
        assert_eq!(ids.topleveldefs.len(), 1);
        assert!(ids.closuredefs.is_empty());
        // inner's read propagates one level through outer
        assert!(ids.undeclared.contains("y"));

        let def_ids = ids.branch(ScopeNode::Def(&outer));
        assert_eq!(def_ids.closuredefs.len(), 1);
        assert_eq!(def_ids.closuredefs[0].name, "inner");
        assert!(def_ids.undeclared.contains("y"));
    }

    #[test]
    fn context_is_exempt_from_undeclared() {
        let root = TemplateNode::new(vec![
            Node::expression("context.get('x')", 1).expect("expr")
        ]);
        let ids = Identifiers::root().branch(ScopeNode::Template(&root));
        assert!(ids.undeclared.is_empty());
    }

    #[test]
    fn for_loop_var_is_locally_declared() {
        let body = vec![Node::expression("item + suffix", 2).expect("expr")];
        let root = TemplateNode::new(vec![ForNode::new("item", "items", body, 1)
            .expect("for")
            .node()]);
        let ids = Identifiers::root().branch(ScopeNode::Template(&root));
        assert!(ids.locally_declared.contains("item"));
        assert!(ids.undeclared.contains("items"));
        assert!(ids.undeclared.contains("suffix"));
        assert!(!ids.undeclared.contains("item"));
    }

    #[test]
    fn parent_locals_become_declared_in_child_scope() {
        let def = Rc::new(
            DefTag::new("show", &[], vec![Node::expression("greeting", 3).expect("e")], 2)
                .expect("def"),
        );
        def.mark_root(true);
        let root = TemplateNode::new(vec![
            Node::code("greeting = 'hi'", false, 1).expect("code"),
            Node::Def(def.clone()),
        ]);
        let ids = Identifiers::root().branch(ScopeNode::Template(&root));
        assert!(ids.locally_assigned.contains("greeting"));
        let def_ids = ids.branch(ScopeNode::Def(&def));
        assert!(def_ids.declared.contains("greeting"));
        assert!(!def_ids.undeclared.contains("greeting"));
    }

    #[test]
    fn argument_defaults_propagate_but_params_do_not() {
        let def = Rc::new(DefTag::new("foo", &["a=base_value"], vec![], 1).expect("def"));
        def.mark_root(true);
        let root = TemplateNode::new(vec![Node::Def(def.clone())]);
        let ids = Identifiers::root().branch(ScopeNode::Template(&root));
        assert!(ids.undeclared.contains("base_value"));
        assert!(!ids.undeclared.contains("a"));

        let def_ids = ids.branch(ScopeNode::Def(&def));
        assert!(def_ids.argument_declared.contains("a"));
        assert!(!def_ids.undeclared.contains("a"));
    }

    #[test]
    fn module_code_declares_template_wide() {
        let root = TemplateNode::new(vec![
            Node::code("version = '1.0'", true, 1).expect("code"),
            Node::expression("version", 2).expect("expr"),
        ]);
        let mut base = Identifiers::root();
        for node in &root.nodes {
            if let Node::Code(code) = node {
                if code.ismodule {
                    base = base.branch(ScopeNode::ModuleCode(&code.block));
                }
            }
        }
        let ids = base.branch(ScopeNode::Template(&root));
        assert!(ids.declared.contains("version"));
        assert!(!ids.undeclared.contains("version"));
    }
}
