// Purpose: Define the dynamic value type render units traffic in.
// Inputs/Outputs: Values flow between context bags, frames, namespaces and
//   host-provided functions; stringification feeds the output buffer.
// Invariants: The Undefined sentinel fails only when used as a value
//   (stringified, called, branched on), never when merely bound.
// Gotchas: Values are render-local and Rc-based; compiled artifacts they
//   reference (render units, templates) are Arc-shared and immutable.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::codegen::RenderUnit;
use crate::error::RenderError;
use crate::runtime::context::{Frame, SharedBag};
use crate::runtime::namespace::NsId;
use crate::template::Template;

pub type HostFn = Rc<dyn Fn(&Args) -> Result<Value, RenderError>>;

/// Call arguments: positional plus `name=value` keywords, in written order.
#[derive(Clone, Debug, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub named: Vec<(String, Value)>,
}

impl Args {
    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            named: Vec::new(),
        }
    }

    pub fn named(&self, name: &str) -> Option<&Value> {
        self.named
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// A render unit bound to the environment it was declared in.
pub struct BoundUnit {
    pub unit: Arc<RenderUnit>,
    /// Template whose module scope owns the unit; drives def-forward and
    /// namespace resolution inside the callee.
    pub template: Option<Arc<Template>>,
    /// Context name bag the callee runs against (shared, not snapshotted).
    pub data: SharedBag,
    /// Enclosing activation frame for closures; None for module-level units.
    pub frame: Option<Rc<Frame>>,
    /// For main-unit def forwards: names assigned by embedded code blocks,
    /// read live out of the main activation's frame at call time.
    pub expose: Option<ExposedLocals>,
}

pub struct ExposedLocals {
    pub frame: Rc<Frame>,
    pub names: Vec<String>,
}

#[derive(Clone)]
pub enum Value {
    Undefined,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
    List(Rc<Vec<Value>>),
    Func(HostFn),
    Bound(Rc<BoundUnit>),
    Namespace(NsId),
    /// Read-only view of a captured context bag (`caller.context`).
    Bag(SharedBag),
}

impl Value {
    pub fn str(text: impl AsRef<str>) -> Value {
        Value::Str(Rc::from(text.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(items))
    }

    pub fn func(f: impl Fn(&Args) -> Result<Value, RenderError> + 'static) -> Value {
        Value::Func(Rc::new(f))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Text written into the output buffer; using Undefined here fails loudly.
    pub fn render_string(&self) -> Result<String, RenderError> {
        match self {
            Value::Undefined => Err(RenderError::undefined()),
            Value::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Str(s) => Ok(s.to_string()),
            Value::List(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items.iter() {
                    parts.push(item.render_string()?);
                }
                Ok(format!("[{}]", parts.join(", ")))
            }
            Value::Func(_) | Value::Bound(_) => Ok("<callable>".to_string()),
            Value::Namespace(_) => Ok("<namespace>".to_string()),
            Value::Bag(_) => Ok("<context>".to_string()),
        }
    }

    /// Branch condition; branching on Undefined is a use and fails loudly.
    pub fn truthy(&self) -> Result<bool, RenderError> {
        match self {
            Value::Undefined => Err(RenderError::undefined()),
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::Str(s) => Ok(!s.is_empty()),
            Value::List(items) => Ok(!items.is_empty()),
            Value::Func(_) | Value::Bound(_) | Value::Namespace(_) | Value::Bag(_) => Ok(true),
        }
    }

    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Undefined, Value::Undefined) => true,
            (Value::Namespace(a), Value::Namespace(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.loose_eq(y))
            }
            _ => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Func(_) => "function",
            Value::Bound(_) => "render unit",
            Value::Namespace(_) => "namespace",
            Value::Bag(_) => "context",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::List(items) => write!(f, "List({:?})", items),
            Value::Func(_) => write!(f, "Func(..)"),
            Value::Bound(b) => write!(f, "Bound({})", b.unit.name),
            Value::Namespace(id) => write!(f, "Namespace(#{})", id),
            Value::Bag(_) => write!(f, "Bag(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_fails_only_when_used() {
        let v = Value::Undefined;
        assert!(v.is_undefined());
        assert!(matches!(
            v.render_string(),
            Err(RenderError::UndefinedValue { .. })
        ));
        assert!(matches!(v.truthy(), Err(RenderError::UndefinedValue { .. })));
    }

    #[test]
    fn unicode_round_trips_through_render_string() {
        let text = "« S’il vous plaît… dessine-moi un mouton! »";
        assert_eq!(Value::str(text).render_string().expect("string"), text);
    }

    #[test]
    fn loose_eq_compares_structurally() {
        assert!(Value::str("a").loose_eq(&Value::str("a")));
        assert!(!Value::Int(1).loose_eq(&Value::str("1")));
        let a = Value::list(vec![Value::Int(1), Value::str("x")]);
        let b = Value::list(vec![Value::Int(1), Value::str("x")]);
        assert!(a.loose_eq(&b));
    }
}
