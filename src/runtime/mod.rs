// Purpose: Orchestrate rendering: inheritance chains, namespace generation,
//   includes, and the entry points templates call into.
// Inputs/Outputs: Takes a compiled template plus a data bag; drives the op
//   interpreter and returns the rendered text.
// Invariants: Rendering an inheriting template starts at the base-most
//   template; 'self' stays the most derived namespace in every fork.
// Gotchas: Module code runs once per template per render, into a module
//   frame shared by all of that template's units.

pub mod context;
mod exec;
pub mod namespace;

use std::rc::Rc;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::RenderError;
use crate::template::Template;
use crate::tree::ImportSpec;
use crate::value::{Args, BoundUnit, Value};

use self::context::{
    bag_get, bag_set, clean_inheritance_tokens, fork_bag, shared_bag, Bag, Frame, RenderState,
    SharedBag,
};
use self::exec::{call_bound, eval_expr, exec_code, Env};
use self::namespace::{closest, resolve_member, Namespace, NsId};
use crate::codegen::NamespaceDecl;

/// Render a template's full document, following its inheritance chain.
pub fn render(template: &Arc<Template>, data: Bag) -> Result<String, RenderError> {
    let mut state = RenderState::new();
    let bag = shared_bag(data);
    exec_template_body(&mut state, template, bag)?;
    Ok(state.finish())
}

/// Render a single top-level def of a template, skipping the main body
/// and any inheritance.
pub fn render_def(template: &Arc<Template>, name: &str, data: Bag) -> Result<String, RenderError> {
    let unit = template.compiled.def(name).cloned().ok_or_else(|| {
        let candidates: Vec<String> = template
            .compiled
            .defs
            .iter()
            .map(|u| u.name.clone())
            .collect();
        RenderError::NoSuchMember {
            namespace: template.uri.clone(),
            member: name.to_string(),
            hint: closest(name, &candidates),
        }
    })?;
    let mut state = RenderState::new();
    let bag = shared_bag(data);
    let module_frame = ensure_module_frame(&mut state, template)?;
    install_self(&mut state, template, &bag, Some(module_frame.clone()));
    generate_namespaces(&mut state, template, &bag)?;
    let bound = BoundUnit {
        unit,
        template: Some(template.clone()),
        data: bag,
        frame: Some(module_frame),
        expose: None,
    };
    let value = call_bound(&mut state, &bound, &Args::default())?;
    let mut out = state.finish();
    // buffered defs return their content rather than streaming it
    if let Value::Str(text) = value {
        out.push_str(&text);
    }
    Ok(out)
}

/// Set up and run one template document into the current buffer.
pub(crate) fn exec_template_body(
    state: &mut RenderState,
    template: &Arc<Template>,
    bag: SharedBag,
) -> Result<(), RenderError> {
    let (base, base_bag) = setup_template(state, template, bag)?;
    let module_frame = ensure_module_frame(state, &base)?;
    let bound = BoundUnit {
        unit: base.compiled.main.clone(),
        template: Some(base.clone()),
        data: base_bag,
        frame: Some(module_frame),
        expose: None,
    };
    call_bound(state, &bound, &Args::default())?;
    Ok(())
}

fn install_self(
    state: &mut RenderState,
    template: &Arc<Template>,
    bag: &SharedBag,
    module_frame: Option<Rc<Frame>>,
) -> NsId {
    let id = state.arena.alloc(Namespace::for_template(
        format!("self:{}", template.uri),
        template.clone(),
        module_frame,
        bag.clone(),
    ));
    bag_set(bag, "self", Value::Namespace(id));
    bag_set(bag, "local", Value::Namespace(id));
    id
}

/// Walk the inheritance chain downward, attaching one namespace per
/// template, and return the base-most template with its context bag.
fn setup_template(
    state: &mut RenderState,
    template: &Arc<Template>,
    bag: SharedBag,
) -> Result<(Arc<Template>, SharedBag), RenderError> {
    let module_frame = ensure_module_frame(state, template)?;
    let self_id = install_self(state, template, &bag, Some(module_frame));
    generate_namespaces(state, template, &bag)?;

    let mut current = template.clone();
    let mut current_bag = bag;
    while let Some(decl) = current.compiled.inherit.clone() {
        let frame = ensure_module_frame(state, &current)?;
        let env = Env {
            template: Some(current.clone()),
            bag: current_bag.clone(),
            frame,
        };
        let uri = eval_expr(state, &env, &decl.uri)
            .and_then(|v| v.render_string())
            .map_err(|e| e.at_line(decl.line))?;
        let parent = lookup_template(&current, &uri)?;
        let parent_frame = ensure_module_frame(state, &parent)?;

        // bottom of the chain built so far
        let mut tail = self_id;
        while let Some(next) = state.arena.get(tail).inherits {
            tail = next;
        }
        let lcl = fork_bag(&current_bag);
        bag_set(&lcl, "next", Value::Namespace(tail));
        let parent_id = state.arena.alloc(Namespace::for_template(
            format!("self:{}", parent.uri),
            parent.clone(),
            Some(parent_frame),
            lcl.clone(),
        ));
        state.arena.set_inherits(tail, parent_id);
        bag_set(&current_bag, "parent", Value::Namespace(parent_id));
        bag_set(&lcl, "local", Value::Namespace(parent_id));
        generate_namespaces(state, &parent, &lcl)?;
        current = parent;
        current_bag = lcl;
    }
    Ok((current, current_bag))
}

/// Run a template's module-level code once per render.
fn ensure_module_frame(
    state: &mut RenderState,
    template: &Arc<Template>,
) -> Result<Rc<Frame>, RenderError> {
    if let Some(frame) = state.module_frame(template) {
        return Ok(frame);
    }
    let frame = Frame::root();
    state.set_module_frame(template, frame.clone());
    let env = Env {
        template: Some(template.clone()),
        bag: shared_bag(Bag::default()),
        frame: frame.clone(),
    };
    for block in &template.compiled.module_code {
        exec_code(state, &env, block)?;
    }
    Ok(frame)
}

/// Build every namespace a template declares against the given bag,
/// applying imports into the bag.
fn generate_namespaces(
    state: &mut RenderState,
    template: &Arc<Template>,
    bag: &SharedBag,
) -> Result<(), RenderError> {
    for decl in &template.compiled.namespaces {
        if state.cached_namespace(template, &decl.name).is_none() {
            build_namespace(state, template, decl, bag)?;
        }
    }
    Ok(())
}

fn build_namespace(
    state: &mut RenderState,
    template: &Arc<Template>,
    decl: &NamespaceDecl,
    bag: &SharedBag,
) -> Result<NsId, RenderError> {
    let cleaned = clean_inheritance_tokens(bag);
    let module_frame = ensure_module_frame(state, template)?;
    let mut ns = match &decl.uri {
        Some(uri_expr) => {
            let env = Env {
                template: Some(template.clone()),
                bag: bag.clone(),
                frame: module_frame.clone(),
            };
            let uri = eval_expr(state, &env, uri_expr)
                .and_then(|v| v.render_string())
                .map_err(|e| e.at_line(decl.line))?;
            let target = lookup_template(template, &uri)?;
            let target_frame = ensure_module_frame(state, &target)?;
            Namespace::for_template(decl.name.clone(), target, Some(target_frame), cleaned.clone())
        }
        None => Namespace::inline(decl.name.clone(), FxHashMap::default(), cleaned.clone()),
    };
    for unit in &decl.defs {
        ns.add_callable(
            unit.name.clone(),
            Value::Bound(Rc::new(BoundUnit {
                unit: unit.clone(),
                template: Some(template.clone()),
                data: cleaned.clone(),
                frame: Some(module_frame.clone()),
                expose: None,
            })),
        );
    }
    let id = state.arena.alloc(ns);
    state.cache_namespace(template, &decl.name, id);
    if decl.inheritable {
        // hang the namespace off 'self' so inheriting templates reach it
        if let Some(Value::Namespace(self_id)) = bag_get(bag, "self") {
            state
                .arena
                .add_callable(self_id, &decl.name, Value::Namespace(id));
        }
    }
    if let Some(import) = &decl.import {
        let names = match import {
            ImportSpec::Star => state.arena.get(id).export_names(),
            ImportSpec::Names(names) => names.clone(),
        };
        for name in &names {
            let value = resolve_member(&state.arena, id, name)?;
            bag_set(bag, name, value);
        }
    }
    Ok(id)
}

/// Resolve a namespace binding for a unit entering execution.
pub(crate) fn namespace_for(
    state: &mut RenderState,
    env: &Env,
    name: &str,
) -> Result<Value, RenderError> {
    let template = env.template.clone().ok_or_else(|| {
        RenderError::eval(format!("no namespace '{}' in scope", name))
    })?;
    if let Some(id) = state.cached_namespace(&template, name) {
        return Ok(Value::Namespace(id));
    }
    let decl = template.compiled.namespace(name).ok_or_else(|| {
        RenderError::eval(format!("template declares no namespace '{}'", name))
    })?;
    build_namespace(state, &template, decl, &env.bag).map(Value::Namespace)
}

/// Render another template inline, with inheritance control names cleaned
/// so the included document sets up its own chain.
pub(crate) fn include_file(
    state: &mut RenderState,
    env: &Env,
    uri: &str,
) -> Result<(), RenderError> {
    let calling = env.template.clone().ok_or_else(|| {
        RenderError::Lookup(format!("no template in scope to include '{}'", uri))
    })?;
    let target = lookup_template(&calling, uri)?;
    let bag = clean_inheritance_tokens(&env.bag);
    exec_template_body(state, &target, bag)
}

fn lookup_template(calling: &Arc<Template>, uri: &str) -> Result<Arc<Template>, RenderError> {
    let lookup = calling.lookup().ok_or_else(|| {
        RenderError::Lookup(format!(
            "template '{}' has no collection to resolve '{}'",
            calling.uri, uri
        ))
    })?;
    lookup
        .get_template_relative(uri, &calling.uri)
        .map_err(|e| RenderError::Lookup(format!("{:#}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileError;
    use crate::lookup::{TemplateLookup, TemplateParser};
    use crate::tree::{CallTag, DefTag, ForNode, IfNode, NamespaceTag, Node, TemplateNode};
    use crate::value::Value;

    struct NoParser;

    impl TemplateParser for NoParser {
        fn parse(&self, _source: &str, uri: &str) -> Result<TemplateNode, CompileError> {
            Err(CompileError::new(format!("no parser for '{}'", uri), 0))
        }
    }

    fn lookup() -> Arc<TemplateLookup> {
        TemplateLookup::new(Vec::new(), Arc::new(NoParser))
    }

    fn template(nodes: Vec<Node>) -> Arc<Template> {
        Arc::new(Template::from_tree("/memory", &TemplateNode::new(nodes)).expect("compile"))
    }

    fn data(pairs: &[(&str, Value)]) -> Bag {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn renders_text_and_expressions() {
        let t = template(vec![
            Node::text("hello ", 1),
            Node::expression("name", 1).expect("e"),
        ]);
        let out = render(&t, data(&[("name", Value::str("world"))])).expect("render");
        assert_eq!(out, "hello world");
    }

    #[test]
    fn undefined_name_fails_with_line() {
        let t = template(vec![Node::text("x\n", 1), Node::expression("ghost", 2).expect("e")]);
        match render(&t, Bag::default()) {
            Err(RenderError::UndefinedValue { line }) => assert_eq!(line, Some(2)),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn forwarded_def_sees_body_locals_assigned_later() {
        // the def reads a name the main body assigns after declaring it
        let def = DefTag::new(
            "a",
            &[],
            vec![Node::text("hi im ", 1), Node::expression("foo", 1).expect("e")],
            1,
        )
        .expect("def");
        let t = template(vec![
            def.node(),
            Node::code("foo = 'foo'", false, 2).expect("code"),
            Node::expression("a()", 3).expect("e"),
        ]);
        assert_eq!(render(&t, Bag::default()).expect("render"), "hi im foo");
    }

    #[test]
    fn assignment_shadows_context_for_the_whole_scope() {
        // the first read happens above the assignment; the name is still a
        // local, so the context value must never leak into the output
        let t = template(vec![
            Node::expression("x", 1).expect("e"),
            Node::code("x = 'local'", false, 2).expect("code"),
            Node::expression("x", 3).expect("e"),
        ]);
        match render(&t, data(&[("x", Value::str("from-context"))])) {
            Err(RenderError::UndefinedValue { line }) => assert_eq!(line, Some(1)),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }

        // once assigned, the local wins over the context value
        let t = template(vec![
            Node::code("x = 'local'", false, 1).expect("code"),
            Node::expression("x", 2).expect("e"),
        ]);
        let out = render(&t, data(&[("x", Value::str("from-context"))])).expect("render");
        assert_eq!(out, "local");
    }

    #[test]
    fn closure_def_reads_enclosing_locals() {
        let inner = DefTag::new("inner", &[], vec![Node::expression("x", 3).expect("e")], 2)
            .expect("def")
            .node();
        let outer = DefTag::new(
            "outer",
            &[],
            vec![
                Node::code("x = 'captured'", false, 2).expect("code"),
                inner,
                Node::expression("inner()", 4).expect("e"),
            ],
            1,
        )
        .expect("def");
        let t = template(vec![outer.node(), Node::expression("outer()", 5).expect("e")]);
        assert_eq!(render(&t, Bag::default()).expect("render"), "captured");
    }

    #[test]
    fn def_arguments_and_defaults() {
        let def = DefTag::new(
            "greet",
            &["name", "suffix='!'"],
            vec![
                Node::text("hi ", 1),
                Node::expression("name + suffix", 1).expect("e"),
            ],
            1,
        )
        .expect("def");
        let t = template(vec![
            def.node(),
            Node::expression("greet('ed')", 2).expect("e"),
            Node::text(" ", 2),
            Node::expression("greet('jim', suffix='?')", 3).expect("e"),
        ]);
        assert_eq!(render(&t, Bag::default()).expect("render"), "hi ed! hi jim?");
    }

    #[test]
    fn missing_argument_is_an_error() {
        let def = DefTag::new("greet", &["name"], vec![Node::expression("name", 1).expect("e")], 1)
            .expect("def");
        let t = template(vec![def.node(), Node::expression("greet()", 2).expect("e")]);
        assert!(render(&t, Bag::default()).is_err());
    }

    #[test]
    fn control_flow_renders_branches_and_loops() {
        let body = vec![Node::expression("item", 2).expect("e"), Node::text(",", 2)];
        let t = template(vec![
            ForNode::new("item", "items", body, 1).expect("for").node(),
            IfNode::new("flag", vec![Node::text("yes", 4)], 3)
                .expect("if")
                .with_else(vec![Node::text("no", 5)])
                .node(),
        ]);
        let out = render(
            &t,
            data(&[
                (
                    "items",
                    Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
                ),
                ("flag", Value::Bool(false)),
            ]),
        )
        .expect("render");
        assert_eq!(out, "1,2,3,no");
    }

    #[test]
    fn builtin_escape_applies_in_declared_order() {
        let t = template(vec![Node::expression("markup | h", 1).expect("e")]);
        let out = render(&t, data(&[("markup", Value::str("<b>"))])).expect("render");
        assert_eq!(out, "&lt;b&gt;");
    }

    #[test]
    fn custom_filter_is_called_with_rendered_text() {
        let t = template(vec![Node::expression("word | shout", 1).expect("e")]);
        let shout = Value::func(|args| {
            let text = args.positional[0].render_string()?;
            Ok(Value::str(text.to_uppercase()))
        });
        let out = render(&t, data(&[("word", Value::str("quiet")), ("shout", shout)]))
            .expect("render");
        assert_eq!(out, "QUIET");
    }

    #[test]
    fn buffered_def_with_filter_wraps_its_output() {
        let def = DefTag::new("tag", &[], vec![Node::text("  padded  ", 1)], 1)
            .expect("def")
            .buffered()
            .with_filter("trim")
            .expect("filter");
        let t = template(vec![def.node(), Node::expression("tag()", 2).expect("e")]);
        assert_eq!(render(&t, Bag::default()).expect("render"), "padded");
    }

    #[test]
    fn stacked_filters_apply_in_declared_order() {
        // html first, then url: the url escape must see the html entities,
        // so the declared order is observable in the output
        let def = DefTag::new("tag", &[], vec![Node::text("<b>", 1)], 1)
            .expect("def")
            .buffered()
            .with_filter("h")
            .expect("filter")
            .with_filter("u")
            .expect("filter");
        let t = template(vec![def.node(), Node::expression("tag()", 2).expect("e")]);
        assert_eq!(
            render(&t, Bag::default()).expect("render"),
            "%26lt%3Bb%26gt%3B"
        );
    }

    #[test]
    fn content_call_runs_body_through_callee() {
        let layout = DefTag::new(
            "layout",
            &[],
            vec![
                Node::text("[", 1),
                Node::expression("caller.body()", 1).expect("e"),
                Node::text("]", 1),
            ],
            1,
        )
        .expect("def");
        let call = CallTag::new("layout()", vec![Node::text("content", 3)], 2).expect("call");
        let t = template(vec![layout.node(), call.node()]);
        assert_eq!(render(&t, Bag::default()).expect("render"), "[content]");
    }

    #[test]
    fn content_call_defs_are_reachable_through_caller() {
        let grid = DefTag::new(
            "grid",
            &[],
            vec![
                Node::expression("caller.cell()", 1).expect("e"),
                Node::text("/", 1),
                Node::expression("caller.body()", 1).expect("e"),
            ],
            1,
        )
        .expect("def");
        let cell = DefTag::new("cell", &[], vec![Node::text("c", 3)], 3)
            .expect("def")
            .node();
        let call = CallTag::new("grid()", vec![cell, Node::text("b", 4)], 2).expect("call");
        let t = template(vec![grid.node(), call.node()]);
        assert_eq!(render(&t, Bag::default()).expect("render"), "c/b");
    }

    #[test]
    fn content_call_body_accepts_keyword_arguments() {
        let foo = DefTag::new(
            "foo",
            &[],
            vec![
                Node::text("hi im foo ", 1),
                Node::expression("caller.body(y=5)", 1).expect("e"),
            ],
            1,
        )
        .expect("def");
        let call = CallTag::new(
            "foo()",
            vec![Node::text("y is ", 3), Node::expression("y", 3).expect("e")],
            2,
        )
        .expect("call");
        let t = template(vec![foo.node(), call.node()]);
        assert_eq!(render(&t, Bag::default()).expect("render"), "hi im foo y is 5");
    }

    #[test]
    fn nested_content_calls_reach_outer_caller_through_context() {
        // the inner bundle's context carries the caller active where the
        // inner call was made, reachable as caller.context['caller']
        let a_inner_call = CallTag::new(
            "b()",
            vec![Node::text("ab:", 2), Node::expression("caller.body()", 2).expect("e")],
            2,
        )
        .expect("call");
        let a = DefTag::new(
            "a",
            &[],
            vec![Node::text("A.", 1), a_inner_call.node()],
            1,
        )
        .expect("def");
        let b = DefTag::new(
            "b",
            &[],
            vec![
                Node::text("B:", 3),
                Node::expression("caller.body()", 3).expect("e"),
                Node::text("|prev:", 3),
                Node::expression("caller.context['caller'].body()", 3).expect("e"),
            ],
            3,
        )
        .expect("def");
        let outer_call = CallTag::new("a()", vec![Node::text("main", 4)], 4).expect("call");
        let t = template(vec![a.node(), b.node(), outer_call.node()]);
        assert_eq!(
            render(&t, Bag::default()).expect("render"),
            "A.B:ab:main|prev:main"
        );
    }

    #[test]
    fn file_namespace_resolves_defs_from_other_template() {
        let lookup = lookup();
        let comp_def = DefTag::new(
            "greet",
            &["who"],
            vec![Node::text("hey ", 1), Node::expression("who", 1).expect("e")],
            1,
        )
        .expect("def");
        lookup
            .put_tree("/comp.tmpl", &TemplateNode::new(vec![comp_def.node()]))
            .expect("put comp");
        let ns = NamespaceTag::new("comp", vec![], 1)
            .with_file("'comp.tmpl'")
            .expect("ns")
            .node();
        let main = TemplateNode::new(vec![
            ns,
            Node::expression("comp.greet('you')", 2).expect("e"),
        ]);
        let t = lookup.put_tree("/main.tmpl", &main).expect("put main");
        assert_eq!(render(&t, Bag::default()).expect("render"), "hey you");
    }

    #[test]
    fn missing_namespace_member_reports_suggestion() {
        let lookup = lookup();
        let comp_def =
            DefTag::new("greeting", &[], vec![Node::text("hi", 1)], 1).expect("def");
        lookup
            .put_tree("/comp.tmpl", &TemplateNode::new(vec![comp_def.node()]))
            .expect("put comp");
        let ns = NamespaceTag::new("comp", vec![], 1)
            .with_file("'comp.tmpl'")
            .expect("ns")
            .node();
        let main = TemplateNode::new(vec![ns, Node::expression("comp.greetng()", 2).expect("e")]);
        let t = lookup.put_tree("/main.tmpl", &main).expect("put main");
        match render(&t, Bag::default()) {
            Err(RenderError::NoSuchMember { member, hint, .. }) => {
                assert_eq!(member, "greetng");
                assert_eq!(hint.as_deref(), Some("greeting"));
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn star_import_binds_exports_into_context() {
        let lookup = lookup();
        let comp_def = DefTag::new("shared", &[], vec![Node::text("imported", 1)], 1)
            .expect("def");
        lookup
            .put_tree("/lib.tmpl", &TemplateNode::new(vec![comp_def.node()]))
            .expect("put lib");
        let ns = NamespaceTag::new("lib", vec![], 1)
            .with_file("'lib.tmpl'")
            .expect("ns")
            .with_import("*")
            .node();
        let main = TemplateNode::new(vec![ns, Node::expression("shared()", 2).expect("e")]);
        let t = lookup.put_tree("/main.tmpl", &main).expect("put main");
        assert_eq!(render(&t, Bag::default()).expect("render"), "imported");
    }

    #[test]
    fn inline_namespace_defs_are_members() {
        let helper = DefTag::new("tick", &[], vec![Node::text("*", 2)], 2)
            .expect("def")
            .node();
        let ns = NamespaceTag::new("marks", vec![helper], 1).node();
        let t = template(vec![ns, Node::expression("marks.tick()", 3).expect("e")]);
        assert_eq!(render(&t, Bag::default()).expect("render"), "*");
    }

    #[test]
    fn three_level_inheritance_renders_from_the_base() {
        let lookup = lookup();

        let base_title =
            DefTag::new("title", &[], vec![Node::text("base-title", 1)], 1).expect("def");
        let base = TemplateNode::new(vec![
            base_title.node(),
            Node::text("header(", 2),
            Node::expression("self.title()", 2).expect("e"),
            Node::text(")|", 2),
            Node::expression("next.body()", 3).expect("e"),
            Node::text("|footer", 4),
        ]);
        lookup.put_tree("/base.tmpl", &base).expect("put base");

        let mid_title =
            DefTag::new("title", &[], vec![Node::text("mid-title", 2)], 2).expect("def");
        let mid = TemplateNode::new(vec![
            Node::inherit("'base.tmpl'", 1).expect("i"),
            mid_title.node(),
            Node::text("mid[", 3),
            Node::expression("next.body()", 3).expect("e"),
            Node::text("]", 3),
        ]);
        lookup.put_tree("/mid.tmpl", &mid).expect("put mid");

        let leaf = TemplateNode::new(vec![
            Node::inherit("'mid.tmpl'", 1).expect("i"),
            Node::text("leaf", 2),
        ]);
        let t = lookup.put_tree("/leaf.tmpl", &leaf).expect("put leaf");

        // base runs first; self.title() picks the most derived override
        let out = render(&t, Bag::default()).expect("render");
        assert_eq!(out, "header(mid-title)|mid[leaf]|footer");
    }

    #[test]
    fn parent_namespace_reaches_one_level_up() {
        let lookup = lookup();
        let base_title =
            DefTag::new("title", &[], vec![Node::text("base-title", 1)], 1).expect("def");
        let base = TemplateNode::new(vec![
            base_title.node(),
            Node::expression("next.body()", 2).expect("e"),
        ]);
        lookup.put_tree("/base.tmpl", &base).expect("put base");

        let child_title =
            DefTag::new("title", &[], vec![Node::text("child-title", 2)], 2).expect("def");
        let child = TemplateNode::new(vec![
            Node::inherit("'base.tmpl'", 1).expect("i"),
            child_title.node(),
            Node::expression("self.title()", 3).expect("e"),
            Node::text("/", 3),
            Node::expression("parent.title()", 3).expect("e"),
        ]);
        let t = lookup.put_tree("/child.tmpl", &child).expect("put child");
        assert_eq!(
            render(&t, Bag::default()).expect("render"),
            "child-title/base-title"
        );
    }

    #[test]
    fn include_renders_inline_with_cleaned_inheritance() {
        let lookup = lookup();
        let partial = TemplateNode::new(vec![
            Node::text("<partial:", 1),
            Node::expression("who", 1).expect("e"),
            Node::text(">", 1),
        ]);
        lookup.put_tree("/partial.tmpl", &partial).expect("put partial");
        let main = TemplateNode::new(vec![
            Node::text("before ", 1),
            Node::include("'partial.tmpl'", 2).expect("inc"),
            Node::text(" after", 3),
        ]);
        let t = lookup.put_tree("/main.tmpl", &main).expect("put main");
        let out = render(&t, data(&[("who", Value::str("me"))])).expect("render");
        assert_eq!(out, "before <partial:me> after");
    }

    #[test]
    fn module_code_runs_once_into_module_scope() {
        let t = template(vec![
            Node::code("banner = 'v1'", true, 1).expect("code"),
            Node::expression("banner", 2).expect("e"),
            Node::text("/", 2),
            Node::expression("banner", 3).expect("e"),
        ]);
        assert_eq!(render(&t, Bag::default()).expect("render"), "v1/v1");
    }

    #[test]
    fn render_def_runs_one_def_standalone() {
        let def = DefTag::new(
            "row",
            &[],
            vec![Node::text("row:", 1), Node::expression("x", 1).expect("e")],
            1,
        )
        .expect("def");
        let t = template(vec![def.node(), Node::text("main body", 2)]);
        let out = render_def(&t, "row", data(&[("x", Value::Int(7))])).expect("render");
        assert_eq!(out, "row:7");
        assert!(render_def(&t, "rwo", Bag::default()).is_err());
    }

    #[test]
    fn buffer_stack_unwinds_when_a_buffered_def_fails() {
        let def = DefTag::new("boom", &[], vec![Node::expression("ghost", 1).expect("e")], 1)
            .expect("def")
            .buffered();
        let t = template(vec![
            Node::text("kept", 1),
            def.node(),
            Node::expression("boom()", 2).expect("e"),
        ]);
        assert!(render(&t, Bag::default()).is_err());
    }
}
