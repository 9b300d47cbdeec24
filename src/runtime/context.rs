// Purpose: Hold per-render mutable state: output buffers, name bags,
//   activation frames and the caller stack.
// Inputs/Outputs: Created once per render call; threaded mutably through
//   the op interpreter; finish() yields the rendered text.
// Invariants: The buffer stack never empties below one entry; every pushed
//   buffer is popped before an error propagates.
// Gotchas: Bags are shared by handle, so a name set after a namespace
//   captures the bag is still visible through that namespace.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::runtime::namespace::{NsArena, NsId};
use crate::template::Template;
use crate::value::Value;

/// Context name bag: the data a render call sees by name.
pub type Bag = FxHashMap<String, Value>;

/// A bag shared by handle between contexts and the namespaces that
/// captured them.
pub type SharedBag = Rc<RefCell<Bag>>;

pub fn shared_bag(bag: Bag) -> SharedBag {
    Rc::new(RefCell::new(bag))
}

/// Fork a bag: the copy starts with the original's entries but later
/// writes stay private to the fork.
pub fn fork_bag(bag: &SharedBag) -> SharedBag {
    Rc::new(RefCell::new(bag.borrow().clone()))
}

pub fn bag_get(bag: &SharedBag, name: &str) -> Option<Value> {
    bag.borrow().get(name).cloned()
}

pub fn bag_set(bag: &SharedBag, name: &str, value: Value) {
    bag.borrow_mut().insert(name.to_string(), value);
}

/// Remove the inheritance control names before handing a bag to an
/// unrelated template, so it sets up its own chain.
pub fn clean_inheritance_tokens(bag: &SharedBag) -> SharedBag {
    let fork = fork_bag(bag);
    {
        let mut data = fork.borrow_mut();
        for token in ["self", "parent", "next", "local"] {
            data.remove(token);
        }
    }
    fork
}

/// One activation's local variables, chained to the scope it closed over.
pub struct Frame {
    vars: RefCell<Bag>,
    parent: Option<Rc<Frame>>,
}

impl Frame {
    pub fn root() -> Rc<Frame> {
        Rc::new(Frame {
            vars: RefCell::new(Bag::default()),
            parent: None,
        })
    }

    pub fn child(parent: &Rc<Frame>) -> Rc<Frame> {
        Rc::new(Frame {
            vars: RefCell::new(Bag::default()),
            parent: Some(parent.clone()),
        })
    }

    /// Look a name up through the frame chain.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    /// Look a name up in this frame only.
    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.vars.borrow().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }
}

/// Mutable state for one render call.
pub struct RenderState {
    buffers: Vec<String>,
    /// Caller namespaces for content calls; top is the innermost call.
    pub caller_stack: Vec<Value>,
    pub arena: NsArena,
    /// Module frames, one per template touched by this render, keyed by
    /// the template's allocation address.
    module_frames: FxHashMap<usize, Rc<Frame>>,
    /// Namespaces already built for a (template, name) pair.
    ns_cache: FxHashMap<(usize, String), NsId>,
}

impl RenderState {
    pub fn new() -> Self {
        Self {
            buffers: vec![String::new()],
            caller_stack: Vec::new(),
            arena: NsArena::default(),
            module_frames: FxHashMap::default(),
            ns_cache: FxHashMap::default(),
        }
    }

    pub fn write(&mut self, text: &str) {
        if let Some(buf) = self.buffers.last_mut() {
            buf.push_str(text);
        }
    }

    pub fn push_buffer(&mut self) {
        self.buffers.push(String::new());
    }

    pub fn pop_buffer(&mut self) -> String {
        // the base buffer stays; a mismatched pop is a bug upstream
        if self.buffers.len() > 1 {
            self.buffers.pop().unwrap_or_default()
        } else {
            String::new()
        }
    }

    pub fn finish(mut self) -> String {
        self.buffers.drain(..).collect()
    }

    pub fn caller_top(&self) -> Value {
        self.caller_stack.last().cloned().unwrap_or(Value::Undefined)
    }

    fn template_key(template: &Arc<Template>) -> usize {
        Arc::as_ptr(template) as usize
    }

    pub fn module_frame(&self, template: &Arc<Template>) -> Option<Rc<Frame>> {
        self.module_frames.get(&Self::template_key(template)).cloned()
    }

    pub fn set_module_frame(&mut self, template: &Arc<Template>, frame: Rc<Frame>) {
        self.module_frames.insert(Self::template_key(template), frame);
    }

    pub fn cached_namespace(&self, template: &Arc<Template>, name: &str) -> Option<NsId> {
        self.ns_cache
            .get(&(Self::template_key(template), name.to_string()))
            .copied()
    }

    pub fn cache_namespace(&mut self, template: &Arc<Template>, name: &str, id: NsId) {
        self.ns_cache
            .insert((Self::template_key(template), name.to_string()), id);
    }
}

impl Default for RenderState {
    fn default() -> Self {
        Self::new()
    }
}
