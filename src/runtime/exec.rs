// Purpose: Interpret compiled render units: bindings, ops, expressions.
// Inputs/Outputs: Walks Op/Expr trees against an Env (template, bag, frame)
//   and mutable render state; output goes to the state's buffer stack.
// Invariants: Every buffer pushed for a buffered unit is popped before an
//   error leaves the unit; the caller stack is popped the same way.
// Gotchas: Name resolution order is frame chain, then bag, then the caller
//   stack for `caller` only, then the undefined sentinel.

use std::rc::Rc;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::codegen::{Binding, Op, RenderUnit};
use crate::error::RenderError;
use crate::expr::{BinOp, CodeBlock, CodeStmt, Expr};
use crate::filters;
use crate::runtime::context::{bag_get, bag_set, fork_bag, Frame, RenderState, SharedBag};
use crate::runtime::namespace::{resolve_member, Namespace};
use crate::template::Template;
use crate::value::{Args, BoundUnit, ExposedLocals, Value};

/// The environment one unit body executes in.
pub(crate) struct Env {
    pub template: Option<Arc<Template>>,
    pub bag: SharedBag,
    pub frame: Rc<Frame>,
}

impl Env {
    fn at(&self, frame: Rc<Frame>) -> Env {
        Env {
            template: self.template.clone(),
            bag: self.bag.clone(),
            frame,
        }
    }
}

fn resolve_name(state: &RenderState, env: &Env, name: &str) -> Value {
    if let Some(value) = env.frame.get(name) {
        return value;
    }
    if let Some(value) = bag_get(&env.bag, name) {
        return value;
    }
    if name == "caller" {
        return state.caller_top();
    }
    if name == "context" {
        return Value::Bag(env.bag.clone());
    }
    Value::Undefined
}

/// Invoke a bound unit: fresh activation frame, parameters, prologue, body.
pub(crate) fn call_bound(
    state: &mut RenderState,
    bound: &BoundUnit,
    args: &Args,
) -> Result<Value, RenderError> {
    let base = bound.frame.clone().unwrap_or_else(Frame::root);
    let frame = Frame::child(&base);
    let bag = match &bound.expose {
        // forwarded defs see the forwarding body's assigned locals, read
        // at call time so later assignments are included
        Some(expose) => {
            let fork = fork_bag(&bound.data);
            for name in &expose.names {
                // the sentinel marks a local not yet assigned; only real
                // assignments are exposed
                match expose.frame.get_local(name) {
                    Some(value) if !value.is_undefined() => bag_set(&fork, name, value),
                    _ => {}
                }
            }
            fork
        }
        None => bound.data.clone(),
    };
    let env = Env {
        template: bound.template.clone(),
        bag,
        frame,
    };
    for (i, param) in bound.unit.params.iter().enumerate() {
        let value = if let Some(value) = args.positional.get(i) {
            value.clone()
        } else if let Some(value) = args.named(&param.name) {
            value.clone()
        } else if let Some(default) = &param.default {
            // defaults evaluate in the declaring environment
            eval_expr(state, &env.at(base.clone()), default)?
        } else {
            return Err(RenderError::eval(format!(
                "'{}' missing required argument '{}'",
                bound.unit.name, param.name
            )));
        };
        env.frame.set(&param.name, value);
    }
    // extra keyword arguments bind as locals and win over context gets
    for (name, value) in &args.named {
        if !bound.unit.params.iter().any(|p| p.name == *name) {
            env.frame.set(name, value.clone());
        }
    }
    run_unit(state, &env, &bound.unit)
}

fn run_unit(
    state: &mut RenderState,
    env: &Env,
    unit: &Arc<RenderUnit>,
) -> Result<Value, RenderError> {
    // a name assigned anywhere in the scope is a local for the whole scope;
    // pre-binding the sentinel keeps reads before the assignment from
    // reaching the context bag
    for name in &unit.locals {
        if env.frame.get_local(name).is_none() {
            env.frame.set(name, Value::Undefined);
        }
    }
    apply_prologue(state, env, unit)?;
    if !unit.buffered && unit.filters.is_empty() {
        exec_ops(state, env, &unit.ops)?;
        return Ok(Value::str(""));
    }
    state.push_buffer();
    let result = exec_ops(state, env, &unit.ops);
    let content = state.pop_buffer();
    result?;
    let mut text = content;
    for filter in &unit.filters {
        text = apply_filter(state, env, filter, text).map_err(|e| e.at_line(unit.line))?;
    }
    if unit.buffered {
        Ok(Value::str(text))
    } else {
        state.write(&text);
        Ok(Value::str(""))
    }
}

fn apply_prologue(
    state: &mut RenderState,
    env: &Env,
    unit: &Arc<RenderUnit>,
) -> Result<(), RenderError> {
    for binding in &unit.prologue {
        match binding {
            Binding::DefForward { name } => {
                let template = env.template.clone().ok_or_else(|| {
                    RenderError::eval(format!("no template to forward def '{}'", name))
                })?;
                let forwarded = template.compiled.def(name).cloned().ok_or_else(|| {
                    RenderError::eval(format!("unknown def '{}'", name))
                })?;
                let expose = if unit.exposed_locals.is_empty() {
                    None
                } else {
                    Some(ExposedLocals {
                        frame: env.frame.clone(),
                        names: unit.exposed_locals.clone(),
                    })
                };
                let module_frame = state.module_frame(&template);
                env.frame.set(
                    name,
                    Value::Bound(Rc::new(BoundUnit {
                        unit: forwarded,
                        template: Some(template),
                        data: env.bag.clone(),
                        frame: module_frame,
                        expose,
                    })),
                );
            }
            Binding::Closure { name, unit: closed } => {
                env.frame.set(name, closure_value(env, closed));
            }
            Binding::Namespace { name } => {
                let value = crate::runtime::namespace_for(state, env, name)?;
                env.frame.set(name, value);
            }
            Binding::ContextGet { name } => {
                // keyword extras already in the frame take priority
                if env.frame.get_local(name).is_some() {
                    continue;
                }
                let value = bag_get(&env.bag, name).unwrap_or_else(|| {
                    if name == "caller" {
                        state.caller_top()
                    } else {
                        Value::Undefined
                    }
                });
                env.frame.set(name, value);
            }
        }
    }
    Ok(())
}

fn closure_value(env: &Env, unit: &Arc<RenderUnit>) -> Value {
    Value::Bound(Rc::new(BoundUnit {
        unit: unit.clone(),
        template: env.template.clone(),
        data: env.bag.clone(),
        frame: Some(env.frame.clone()),
        expose: None,
    }))
}

pub(crate) fn exec_ops(state: &mut RenderState, env: &Env, ops: &[Op]) -> Result<(), RenderError> {
    for op in ops {
        exec_op(state, env, op)?;
    }
    Ok(())
}

fn exec_op(state: &mut RenderState, env: &Env, op: &Op) -> Result<(), RenderError> {
    match op {
        Op::WriteText(text) => {
            state.write(text);
            Ok(())
        }
        Op::WriteExpr {
            expr,
            escapes,
            line,
        } => {
            let value = eval_expr(state, env, expr).map_err(|e| e.at_line(*line))?;
            let mut text = value.render_string().map_err(|e| e.at_line(*line))?;
            for escape in escapes {
                text = apply_filter(state, env, escape, text).map_err(|e| e.at_line(*line))?;
            }
            state.write(&text);
            Ok(())
        }
        Op::Code { block, line } => exec_code(state, env, block).map_err(|e| e.at_line(*line)),
        Op::If {
            arms,
            else_ops,
            line,
        } => {
            for (cond, ops) in arms {
                let hit = eval_expr(state, env, cond)
                    .and_then(|v| v.truthy())
                    .map_err(|e| e.at_line(*line))?;
                if hit {
                    return exec_ops(state, env, ops);
                }
            }
            exec_ops(state, env, else_ops)
        }
        Op::For {
            var,
            iter,
            ops,
            line,
        } => {
            let value = eval_expr(state, env, iter).map_err(|e| e.at_line(*line))?;
            let items = match value {
                Value::List(items) => items,
                other => {
                    return Err(RenderError::eval(format!(
                        "value of type {} is not iterable",
                        other.type_name()
                    ))
                    .at_line(*line))
                }
            };
            for item in items.iter() {
                env.frame.set(var, item.clone());
                exec_ops(state, env, ops)?;
            }
            Ok(())
        }
        Op::CloseOver { name, unit } => {
            env.frame.set(name, closure_value(env, unit));
            Ok(())
        }
        Op::ContentCall {
            target,
            body,
            defs,
            line,
        } => content_call(state, env, target, body, defs, *line),
        Op::Include { uri, line } => {
            let uri = eval_expr(state, env, uri)
                .and_then(|v| v.render_string())
                .map_err(|e| e.at_line(*line))?;
            crate::runtime::include_file(state, env, &uri).map_err(|e| e.at_line(*line))
        }
    }
}

pub(crate) fn exec_code(
    state: &mut RenderState,
    env: &Env,
    block: &CodeBlock,
) -> Result<(), RenderError> {
    for stmt in &block.stmts {
        match stmt {
            CodeStmt::Assign { name, value } => {
                let value = eval_expr(state, env, value)?;
                env.frame.set(name, value);
            }
            CodeStmt::Expr(expr) => {
                eval_expr(state, env, expr)?;
            }
        }
    }
    Ok(())
}

fn content_call(
    state: &mut RenderState,
    env: &Env,
    target: &Expr,
    body: &Arc<RenderUnit>,
    defs: &[Arc<RenderUnit>],
    line: usize,
) -> Result<(), RenderError> {
    let fork = fork_bag(&env.bag);
    // the bundle's context carries the caller active at this point, so the
    // body units see their definition-site caller, one level out
    bag_set(&fork, "caller", state.caller_top());
    let mut ns = Namespace::inline("caller", FxHashMap::default(), fork.clone());
    for unit in std::iter::once(body).chain(defs.iter()) {
        ns.add_callable(
            unit.name.clone(),
            Value::Bound(Rc::new(BoundUnit {
                unit: unit.clone(),
                template: env.template.clone(),
                data: fork.clone(),
                frame: Some(env.frame.clone()),
                expose: None,
            })),
        );
    }
    let id = state.arena.alloc(ns);
    state.caller_stack.push(Value::Namespace(id));
    let result = eval_expr(state, env, target);
    state.caller_stack.pop();
    let text = result
        .and_then(|v| v.render_string())
        .map_err(|e| e.at_line(line))?;
    state.write(&text);
    Ok(())
}

fn apply_filter(
    state: &mut RenderState,
    env: &Env,
    filter: &Expr,
    text: String,
) -> Result<String, RenderError> {
    if let Expr::Name(name) = filter {
        if let Some(out) = filters::apply_builtin(name, &text) {
            return Ok(out);
        }
    }
    let callee = eval_expr(state, env, filter)?;
    let out = call_value(state, &callee, &Args::positional(vec![Value::str(text)]))?;
    out.render_string()
}

pub(crate) fn eval_expr(
    state: &mut RenderState,
    env: &Env,
    expr: &Expr,
) -> Result<Value, RenderError> {
    match expr {
        Expr::Str(s) => Ok(Value::str(s)),
        Expr::Int(i) => Ok(Value::Int(*i)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_expr(state, env, item)?);
            }
            Ok(Value::list(out))
        }
        Expr::Name(name) => Ok(resolve_name(state, env, name)),
        Expr::Attr { base, name } => {
            let base = eval_expr(state, env, base)?;
            attr_value(state, &base, name)
        }
        Expr::Index { base, key } => {
            let base = eval_expr(state, env, base)?;
            let key = eval_expr(state, env, key)?;
            index_value(&base, &key)
        }
        Expr::Call {
            target,
            args,
            kwargs,
        } => {
            let callee = eval_expr(state, env, target)?;
            let mut call_args = Args::default();
            for arg in args {
                call_args.positional.push(eval_expr(state, env, arg)?);
            }
            for (name, value) in kwargs {
                call_args
                    .named
                    .push((name.clone(), eval_expr(state, env, value)?));
            }
            call_value(state, &callee, &call_args)
        }
        Expr::Binary { op, left, right } => {
            let left = eval_expr(state, env, left)?;
            let right = eval_expr(state, env, right)?;
            binary_value(*op, &left, &right)
        }
    }
}

fn attr_value(state: &mut RenderState, base: &Value, name: &str) -> Result<Value, RenderError> {
    match base {
        Value::Namespace(id) => resolve_member(&state.arena, *id, name),
        Value::Bag(bag) => match name {
            "get" => {
                let bag = bag.clone();
                Ok(Value::func(move |args: &Args| {
                    let key = match args.positional.first() {
                        Some(Value::Str(key)) => key.clone(),
                        _ => return Err(RenderError::eval("context.get takes a string key")),
                    };
                    Ok(bag_get(&bag, &key)
                        .or_else(|| args.positional.get(1).cloned())
                        .unwrap_or(Value::Undefined))
                }))
            }
            _ => Err(RenderError::eval(format!(
                "context has no attribute '{}'",
                name
            ))),
        },
        other => Err(RenderError::eval(format!(
            "value of type {} has no attribute '{}'",
            other.type_name(),
            name
        ))),
    }
}

fn index_value(base: &Value, key: &Value) -> Result<Value, RenderError> {
    match (base, key) {
        (Value::List(items), Value::Int(i)) => {
            let idx = usize::try_from(*i)
                .ok()
                .filter(|idx| *idx < items.len())
                .ok_or_else(|| {
                    RenderError::eval(format!("index {} out of range for list of {}", i, items.len()))
                })?;
            Ok(items[idx].clone())
        }
        (Value::Bag(bag), Value::Str(name)) => {
            Ok(bag_get(bag, name).unwrap_or(Value::Undefined))
        }
        (base, key) => Err(RenderError::eval(format!(
            "cannot index {} with {}",
            base.type_name(),
            key.type_name()
        ))),
    }
}

pub(crate) fn call_value(
    state: &mut RenderState,
    callee: &Value,
    args: &Args,
) -> Result<Value, RenderError> {
    match callee {
        Value::Func(f) => f(args),
        Value::Bound(bound) => call_bound(state, bound, args),
        Value::Undefined => Err(RenderError::undefined()),
        other => Err(RenderError::NotCallable(other.type_name().to_string())),
    }
}

fn binary_value(op: BinOp, left: &Value, right: &Value) -> Result<Value, RenderError> {
    match op {
        BinOp::Eq => Ok(Value::Bool(left.loose_eq(right))),
        BinOp::NotEq => Ok(Value::Bool(!left.loose_eq(right))),
        BinOp::Add => match (left, right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::str(format!("{}{}", a, b))),
            (Value::List(a), Value::List(b)) => {
                let mut out = a.as_ref().clone();
                out.extend(b.iter().cloned());
                Ok(Value::list(out))
            }
            (a, b) => Err(RenderError::eval(format!(
                "cannot add {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}
