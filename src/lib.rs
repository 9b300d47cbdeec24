// Purpose: Define crate-level module surface for the template compiler and
//   runtime components.
// Inputs/Outputs: Re-exports the types embedders need: templates, lookups,
//   values and errors.
// Invariants: Public module boundaries should remain stable for callers.
// Gotchas: Compiled templates are thread-shared; runtime values are
//   render-local and never cross threads.

pub mod codegen;
pub mod error;
pub mod expr;
pub mod filters;
pub mod lookup;
pub mod runtime;
pub mod sema;
pub mod template;
pub mod tree;
pub mod value;

pub use error::{CompileError, RenderError};
pub use lookup::{TemplateLookup, TemplateParser};
pub use runtime::context::Bag;
pub use template::Template;
pub use value::{Args, Value};
