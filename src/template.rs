// Purpose: The compiled template handle: immutable artifact plus identity
//   and collection back-reference.
// Inputs/Outputs: Built from a parse tree; render methods drive the runtime
//   and return text or a render error.
// Invariants: A Template is immutable shared data, safe to render from many
//   threads at once; per-render state lives entirely in the runtime.
// Gotchas: The lookup back-reference is weak; a template outliving its
//   collection can no longer resolve inheritance, namespaces or includes.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::codegen::{self, CompiledTemplate};
use crate::error::{CompileError, RenderError};
use crate::lookup::TemplateLookup;
use crate::runtime::{self, context::Bag};
use crate::tree::TemplateNode;

type ErrorHandler = Box<dyn Fn(&RenderError) -> Option<String> + Send + Sync>;

pub struct Template {
    pub uri: String,
    pub filename: Option<PathBuf>,
    pub compiled: Arc<CompiledTemplate>,
    pub(crate) last_modified: Option<SystemTime>,
    lookup: RwLock<Weak<TemplateLookup>>,
    error_handler: Option<ErrorHandler>,
}

impl Template {
    pub fn from_tree(uri: &str, root: &TemplateNode) -> Result<Template, CompileError> {
        Ok(Template {
            uri: uri.to_string(),
            filename: None,
            compiled: Arc::new(codegen::compile(root)?),
            last_modified: None,
            lookup: RwLock::new(Weak::new()),
            error_handler: None,
        })
    }

    /// Install a handler consulted when a render fails. Returning recovered
    /// output swallows the error; returning None re-raises it unchanged.
    pub fn with_error_handler(
        mut self,
        handler: impl Fn(&RenderError) -> Option<String> + Send + Sync + 'static,
    ) -> Template {
        self.error_handler = Some(Box::new(handler));
        self
    }

    pub(crate) fn set_lookup(&self, lookup: &Arc<TemplateLookup>) {
        *self.lookup.write() = Arc::downgrade(lookup);
    }

    pub(crate) fn lookup(&self) -> Option<Arc<TemplateLookup>> {
        self.lookup.read().upgrade()
    }

    /// Render the full document, following the inheritance chain.
    pub fn render(self: &Arc<Self>, data: Bag) -> Result<String, RenderError> {
        match runtime::render(self, data) {
            Ok(out) => Ok(out),
            Err(err) => match self.error_handler.as_ref().and_then(|h| h(&err)) {
                Some(recovered) => Ok(recovered),
                None => Err(err),
            },
        }
    }

    /// Render one top-level def without the surrounding document.
    pub fn render_def(self: &Arc<Self>, name: &str, data: Bag) -> Result<String, RenderError> {
        runtime::render_def(self, name, data)
    }

    pub fn has_def(&self, name: &str) -> bool {
        self.compiled.def(name).is_some()
    }
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("uri", &self.uri)
            .field("filename", &self.filename)
            .finish()
    }
}
