// Purpose: Compile parse trees into executable render artifacts.
// Inputs/Outputs: Consumes a TemplateNode plus scope records from sema;
//   produces a CompiledTemplate of render units, bindings and declarations.
// Invariants: Artifacts are immutable plain data, shareable across threads;
//   prologue bindings are emitted in deterministic name order.
// Gotchas: Defs and namespaces never become runtime ops; they surface as
//   prologue bindings and template-level declarations.

use std::sync::Arc;

use crate::error::CompileError;
use crate::expr::{CodeBlock, Expr};
use crate::tree::{ImportSpec, ParamDecl, TemplateNode};

mod emitter;

use self::emitter::Emitter;

/// One compiled callable body: the template main body, a def, or a call
/// tag's body unit.
#[derive(Debug)]
pub struct RenderUnit {
    pub name: String,
    pub params: Vec<ParamDecl>,
    /// Buffered units return their output instead of streaming it.
    pub buffered: bool,
    /// Filter expressions applied to buffered output, declared order.
    pub filters: Vec<Expr>,
    /// Name bindings established before the body runs.
    pub prologue: Vec<Binding>,
    /// Names assigned somewhere in this unit's scope. They are locals for
    /// the whole scope; a read before the assignment never reaches the
    /// context.
    pub locals: Vec<String>,
    pub ops: Vec<Op>,
    /// Names this unit assigns via code blocks and exports to forwarded
    /// defs as live locals. Populated for the main body only.
    pub exposed_locals: Vec<String>,
    pub line: usize,
}

/// How one undeclared name gets bound when a unit is entered.
#[derive(Debug)]
pub enum Binding {
    /// The name is a top-level def of the owning template; resolved against
    /// that template's compiled artifact at call time.
    DefForward { name: String },
    /// The name is a def nested in this unit; binds a closure over the
    /// current activation.
    Closure { name: String, unit: Arc<RenderUnit> },
    /// The name is a namespace declared by the owning template.
    Namespace { name: String },
    /// Plain context fetch; absent names bind the undefined sentinel.
    ContextGet { name: String },
}

#[derive(Debug)]
pub enum Op {
    WriteText(String),
    WriteExpr {
        expr: Expr,
        escapes: Vec<Expr>,
        line: usize,
    },
    Code {
        block: CodeBlock,
        line: usize,
    },
    If {
        arms: Vec<(Expr, Vec<Op>)>,
        else_ops: Vec<Op>,
        line: usize,
    },
    For {
        var: String,
        iter: Expr,
        ops: Vec<Op>,
        line: usize,
    },
    /// Rebind a nested def at its declaration point (it may already be
    /// hoisted by a prologue Closure binding).
    CloseOver {
        name: String,
        unit: Arc<RenderUnit>,
    },
    /// Invoke a callable with the tag body packaged as its `caller`.
    ContentCall {
        target: Expr,
        body: Arc<RenderUnit>,
        defs: Vec<Arc<RenderUnit>>,
        line: usize,
    },
    Include {
        uri: Expr,
        line: usize,
    },
}

/// A namespace declaration hoisted out of the template body.
#[derive(Debug)]
pub struct NamespaceDecl {
    pub name: String,
    pub uri: Option<Expr>,
    pub import: Option<ImportSpec>,
    pub inheritable: bool,
    /// Defs declared inline in the tag body.
    pub defs: Vec<Arc<RenderUnit>>,
    pub line: usize,
}

#[derive(Clone, Debug)]
pub struct InheritDecl {
    pub uri: Expr,
    pub line: usize,
}

/// The full compiled form of one template document.
#[derive(Debug)]
pub struct CompiledTemplate {
    pub main: Arc<RenderUnit>,
    /// Top-level defs, independently callable by name.
    pub defs: Vec<Arc<RenderUnit>>,
    pub namespaces: Vec<NamespaceDecl>,
    pub inherit: Option<InheritDecl>,
    /// Module-level code blocks, run once per render into the module frame.
    pub module_code: Vec<CodeBlock>,
}

impl CompiledTemplate {
    pub fn def(&self, name: &str) -> Option<&Arc<RenderUnit>> {
        self.defs.iter().find(|u| u.name == name)
    }

    pub fn namespace(&self, name: &str) -> Option<&NamespaceDecl> {
        self.namespaces.iter().find(|n| n.name == name)
    }
}

pub fn compile(root: &TemplateNode) -> Result<CompiledTemplate, CompileError> {
    Emitter::new(root).compile()
}
