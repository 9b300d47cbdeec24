// Purpose: Namespaces: named bundles of callables backed by a template,
//   inline defs, or both, with single-parent member delegation.
// Inputs/Outputs: Built during render setup, held in a per-render arena
//   and passed around as NsId handles inside Values.
// Invariants: Member lookup walks the inherits chain exactly once, most
//   derived first; 'context' and 'body' never delegate.
// Gotchas: A namespace holds the bag it was built against, not a snapshot;
//   later writes through the same bag handle are visible to members.

use std::rc::Rc;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::codegen::RenderUnit;
use crate::error::RenderError;
use crate::runtime::context::{Frame, SharedBag};
use crate::template::Template;
use crate::value::{BoundUnit, Value};

/// Handle into the per-render namespace arena.
pub type NsId = usize;

#[derive(Default)]
pub struct NsArena {
    spaces: Vec<Namespace>,
}

impl NsArena {
    pub fn alloc(&mut self, ns: Namespace) -> NsId {
        self.spaces.push(ns);
        self.spaces.len() - 1
    }

    pub fn get(&self, id: NsId) -> &Namespace {
        &self.spaces[id]
    }

    pub fn set_inherits(&mut self, id: NsId, parent: NsId) {
        self.spaces[id].inherits = Some(parent);
    }

    pub fn add_callable(&mut self, id: NsId, name: &str, value: Value) {
        self.spaces[id].callables.insert(name.to_string(), value);
    }
}

pub struct Namespace {
    pub name: String,
    callables: FxHashMap<String, Value>,
    template: Option<Arc<Template>>,
    module_frame: Option<Rc<Frame>>,
    bag: SharedBag,
    /// Next namespace to consult for members not found here.
    pub inherits: Option<NsId>,
}

impl Namespace {
    /// Namespace over a template: members are its top-level defs plus
    /// `body` for the main unit.
    pub fn for_template(
        name: impl Into<String>,
        template: Arc<Template>,
        module_frame: Option<Rc<Frame>>,
        bag: SharedBag,
    ) -> Namespace {
        Namespace {
            name: name.into(),
            callables: FxHashMap::default(),
            template: Some(template),
            module_frame,
            bag,
            inherits: None,
        }
    }

    /// Namespace over explicit callables only (caller bundles, inline tags).
    pub fn inline(name: impl Into<String>, callables: FxHashMap<String, Value>, bag: SharedBag) -> Namespace {
        Namespace {
            name: name.into(),
            callables,
            template: None,
            module_frame: None,
            bag,
            inherits: None,
        }
    }

    pub fn add_callable(&mut self, name: impl Into<String>, value: Value) {
        self.callables.insert(name.into(), value);
    }

    pub fn bag(&self) -> &SharedBag {
        &self.bag
    }

    pub fn template(&self) -> Option<&Arc<Template>> {
        self.template.as_ref()
    }

    /// Bind one of this template's units against the namespace environment.
    pub fn bind_unit(&self, unit: &Arc<RenderUnit>) -> Value {
        Value::Bound(Rc::new(BoundUnit {
            unit: unit.clone(),
            template: self.template.clone(),
            data: self.bag.clone(),
            frame: self.module_frame.clone(),
            expose: None,
        }))
    }

    fn own_member(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.callables.get(name) {
            return Some(value.clone());
        }
        let template = self.template.as_ref()?;
        if name == "body" {
            return Some(self.bind_unit(&template.compiled.main));
        }
        template.compiled.def(name).map(|unit| self.bind_unit(unit))
    }

    fn member_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.callables.keys().cloned().collect();
        if let Some(template) = &self.template {
            names.push("body".to_string());
            names.extend(template.compiled.defs.iter().map(|u| u.name.clone()));
        }
        names
    }

    /// All names star-import should bind from this namespace.
    pub fn export_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.callables.keys().cloned().collect();
        if let Some(template) = &self.template {
            names.extend(template.compiled.defs.iter().map(|u| u.name.clone()));
        }
        names.sort();
        names.dedup();
        names
    }
}

/// Resolve a member through the namespace and its inherits chain.
pub fn resolve_member(arena: &NsArena, id: NsId, name: &str) -> Result<Value, RenderError> {
    let ns = arena.get(id);
    if name == "context" {
        return Ok(Value::Bag(ns.bag.clone()));
    }
    let mut current = Some(id);
    while let Some(cur) = current {
        let space = arena.get(cur);
        if let Some(value) = space.own_member(name) {
            return Ok(value);
        }
        current = space.inherits;
    }
    let mut candidates = Vec::new();
    let mut current = Some(id);
    while let Some(cur) = current {
        let space = arena.get(cur);
        candidates.extend(space.member_names());
        current = space.inherits;
    }
    Err(RenderError::NoSuchMember {
        namespace: ns.name.clone(),
        member: name.to_string(),
        hint: closest(name, &candidates),
    })
}

/// Best near-miss candidate for a failed member lookup.
pub fn closest(name: &str, candidates: &[String]) -> Option<String> {
    candidates
        .iter()
        .map(|c| (strsim::normalized_levenshtein(name, c), c))
        .filter(|(score, _)| *score >= 0.6)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, c)| c.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::context::{shared_bag, Bag};

    fn inline_ns(name: &str, members: &[&str]) -> Namespace {
        let mut callables = FxHashMap::default();
        for m in members {
            callables.insert(m.to_string(), Value::func(|_| Ok(Value::str("ok"))));
        }
        Namespace::inline(name, callables, shared_bag(Bag::default()))
    }

    #[test]
    fn member_lookup_walks_inherits_chain() {
        let mut arena = NsArena::default();
        let parent = arena.alloc(inline_ns("parent", &["shared", "only_parent"]));
        let child = arena.alloc(inline_ns("child", &["shared"]));
        arena.set_inherits(child, parent);

        assert!(resolve_member(&arena, child, "only_parent").is_ok());
        // the derived namespace wins for names both define
        assert!(resolve_member(&arena, child, "shared").is_ok());
        let err = resolve_member(&arena, child, "missing").expect_err("miss");
        assert!(matches!(err, RenderError::NoSuchMember { .. }));
    }

    #[test]
    fn missing_member_suggests_near_miss() {
        let mut arena = NsArena::default();
        let id = arena.alloc(inline_ns("comp", &["greeting"]));
        match resolve_member(&arena, id, "greetng") {
            Err(RenderError::NoSuchMember { hint, .. }) => {
                assert_eq!(hint.as_deref(), Some("greeting"));
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn context_member_returns_captured_bag() {
        let bag = shared_bag(Bag::default());
        bag.borrow_mut().insert("k".to_string(), Value::Int(9));
        let mut arena = NsArena::default();
        let id = arena.alloc(Namespace::inline("caller", FxHashMap::default(), bag));
        match resolve_member(&arena, id, "context").expect("context") {
            Value::Bag(b) => assert!(b.borrow().contains_key("k")),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
