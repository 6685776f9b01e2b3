//! Tree-walking evaluation of cell bodies.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use quote::ToTokens;
use rustc_hash::{FxHashMap, FxHashSet};
use syn::parse::ParseStream;
use syn::punctuated::Punctuated;
use syn::{
    BinOp, Block, Expr, ExprCall, ExprForLoop, ExprLit, ExprMethodCall, ExprRange, ExprStruct,
    Fields, Item, Lit, Local, Macro, Member, Pat, RangeLimits, Stmt, Token, UnOp,
};

use super::function::{
    FunctionParts, ItemSource, ScriptFunction, cached_expr, cached_item, cached_pat,
};
use crate::error::CellError;
use crate::execute::RunContext;
use crate::graph::syntax_error;
use crate::inspect::{FormatOptions, Quote, format};
use crate::value::{Function, Produced, Value};

/// Deepest nesting of function calls before evaluation gives up.
const MAX_DEPTH: usize = 48;

/// Largest range materialized into an array.
const MAX_RANGE: f64 = 1_000_000.0;

/// Built-ins that only make sense as the initializer of a top-level `let`.
const BINDING_BUILTINS: &[&str] = &["delay", "reject", "interval", "mutable"];

/// Names of the runtime-provided values, as configured.
#[derive(Debug, Clone)]
pub(crate) struct Builtins {
    pub(crate) echo: String,
    pub(crate) invalidation: String,
}

/// Non-local exits.
pub(crate) enum Control {
    Break(Option<String>, Value),
    Continue(Option<String>),
    Return(Value),
    Error(CellError),
}

impl From<CellError> for Control {
    fn from(error: CellError) -> Self {
        Self::Error(error)
    }
}

type Eval<T> = Result<T, Control>;

fn fail<T>(message: impl Display) -> Eval<T> {
    Err(Control::Error(CellError::runtime(message)))
}

fn single_ident(path: &syn::Path) -> Option<String> {
    path.get_ident().map(|i| i.to_string())
}

fn label_name(label: Option<&syn::Label>) -> Option<String> {
    label.map(|l| l.name.ident.to_string())
}

/// Whether a `break`/`continue` with `target` applies to the loop labelled `own`.
fn targets(target: &Option<String>, own: &Option<String>) -> bool {
    target.is_none() || target == own
}

fn unwrap_pat(pat: &Pat) -> &Pat {
    match pat {
        Pat::Type(t) => unwrap_pat(&t.pat),
        Pat::Paren(p) => unwrap_pat(&p.pat),
        Pat::Reference(r) => unwrap_pat(&r.pat),
        other => other,
    }
}

fn index_of(index: &Value, len: usize) -> Eval<usize> {
    match index {
        Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 && (*n as usize) < len => Ok(*n as usize),
        Value::Number(n) => fail(format!("index {n} out of bounds for length {len}")),
        other => fail(format!("cannot index with {}", other.type_name())),
    }
}

fn millis(value: Option<&Value>) -> Eval<u64> {
    match value {
        Some(Value::Number(n)) if n.is_finite() && *n >= 0.0 => Ok(*n as u64),
        Some(other) => fail(format!("expected milliseconds, found {}", other.type_name())),
        None => fail("expected milliseconds"),
    }
}

pub(crate) struct Evaluator<'c, 'a> {
    ctx: Option<&'c mut RunContext<'a>>,
    builtins: Arc<Builtins>,
    scopes: Vec<FxHashMap<String, Value>>,
    captured: Arc<FxHashMap<String, Value>>,
    items: Arc<[ItemSource]>,
    depth: usize,
}

impl Evaluator<'static, 'static> {
    /// An evaluator for calls made outside of a running cell, such as
    /// disposal callbacks and mutable updates.
    pub(crate) fn standalone(builtins: Arc<Builtins>) -> Self {
        Self::build(None, builtins)
    }
}

impl<'c, 'a> Evaluator<'c, 'a> {
    pub(crate) fn new(ctx: &'c mut RunContext<'a>, builtins: Arc<Builtins>) -> Self {
        Self::build(Some(ctx), builtins)
    }

    fn build(ctx: Option<&'c mut RunContext<'a>>, builtins: Arc<Builtins>) -> Self {
        Self {
            ctx,
            builtins,
            scopes: vec![FxHashMap::default()],
            captured: Arc::new(FxHashMap::default()),
            items: Arc::from(Vec::new()),
            depth: 0,
        }
    }

    /// Run the top-level statements of a cell and define its declared names.
    pub(crate) fn run_cell(&mut self, stmts: &[Stmt], declared: &[String]) -> Result<(), CellError> {
        let mut bound = FxHashSet::default();
        match self.run_top_level(stmts, &mut bound) {
            Ok(()) | Err(Control::Return(_)) => {}
            Err(Control::Error(e)) => return Err(e),
            Err(Control::Break(..)) => return Err(CellError::runtime("`break` outside of a loop")),
            Err(Control::Continue(_)) => {
                return Err(CellError::runtime("`continue` outside of a loop"));
            }
        }

        let Some(ctx) = self.ctx.as_deref_mut() else {
            return Ok(());
        };
        for name in declared {
            if bound.contains(name) {
                continue;
            }
            let value = self.scopes[0].get(name).cloned().unwrap_or(Value::Undefined);
            ctx.define(name.clone(), value);
        }
        Ok(())
    }

    fn run_top_level(&mut self, stmts: &[Stmt], bound: &mut FxHashSet<String>) -> Eval<()> {
        self.hoist_items(stmts)?;
        for stmt in stmts {
            if let Stmt::Local(local) = stmt
                && let Some(names) = self.binding_builtin(local)?
            {
                bound.extend(names);
                continue;
            }
            self.exec_stmt(stmt)?;
        }
        Ok(())
    }

    /// `let x = delay(..)` and friends define asynchronous values.
    fn binding_builtin(&mut self, local: &Local) -> Eval<Option<Vec<String>>> {
        let Some(init) = &local.init else {
            return Ok(None);
        };
        let Expr::Call(call) = &*init.expr else {
            return Ok(None);
        };
        let Some(func) = self.builtin_call(call) else {
            return Ok(None);
        };
        if !BINDING_BUILTINS.contains(&func.as_str()) {
            return Ok(None);
        }
        let args = self.eval_args(&call.args)?;

        if func == "mutable" {
            return self.bind_mutable(&local.pat, args).map(Some);
        }

        let Pat::Ident(ident) = unwrap_pat(&local.pat) else {
            return fail(format!("`{func}(..)` must be bound to a single name"));
        };
        let name = ident.ident.to_string();
        let produced = match func.as_str() {
            "delay" => {
                let ms = millis(args.first())?;
                let value = args.get(1).cloned().unwrap_or(Value::Undefined);
                Produced::promise(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(value)
                })
            }
            "reject" => {
                let ms = millis(args.first())?;
                let message = args.get(1).map(|v| v.to_string()).unwrap_or_default();
                Produced::promise(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Err(Value::error("Error", message))
                })
            }
            _ => {
                let ms = millis(args.first())?;
                let count = match args.get(1) {
                    Some(_) => millis(args.get(1))?,
                    None => u64::MAX,
                };
                Produced::generator(futures::stream::unfold(0u64, move |i| async move {
                    if i >= count {
                        return None;
                    }
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Some((Ok(Value::Number(i as f64)), i + 1))
                }))
            }
        };
        self.ctx_mut(&func)?.define(name.clone(), produced);
        self.bind(&name, Value::Undefined);
        Ok(Some(vec![name]))
    }

    /// `let (value, set, get) = mutable(initial)`; the setter and getter are optional.
    fn bind_mutable(&mut self, pat: &Pat, args: Vec<Value>) -> Eval<Vec<String>> {
        let mut names: Vec<Option<String>> = match unwrap_pat(pat) {
            Pat::Ident(ident) => vec![Some(ident.ident.to_string())],
            Pat::Tuple(tuple) if !tuple.elems.is_empty() && tuple.elems.len() <= 3 => tuple
                .elems
                .iter()
                .map(|p| match unwrap_pat(p) {
                    Pat::Ident(ident) => Ok(Some(ident.ident.to_string())),
                    Pat::Wild(_) => Ok(None),
                    _ => Err(()),
                })
                .collect::<Result<_, _>>()
                .or_else(|_| fail("`mutable(..)` binds names, `_` or a tuple of them"))?,
            _ => return fail("`mutable(..)` binds a name or a `(value, set, get)` tuple"),
        };
        names.resize(3, None);
        let Some(value_name) = names[0].clone() else {
            return fail("the first name bound by `mutable(..)` cannot be `_`");
        };

        let initial = args.into_iter().next().unwrap_or(Value::Undefined);
        let ctx = self.ctx_mut("mutable")?;
        let handle = ctx.define_mutable(value_name.clone(), initial.clone());
        let mut defined = vec![value_name.clone()];
        let mut locals = vec![(value_name, initial)];
        if let Some(setter) = names[1].clone() {
            let f = Value::Function(handle.setter());
            ctx.define(setter.clone(), f.clone());
            locals.push((setter.clone(), f));
            defined.push(setter);
        }
        if let Some(getter) = names[2].clone() {
            let f = Value::Function(handle.getter());
            ctx.define(getter.clone(), f.clone());
            locals.push((getter.clone(), f));
            defined.push(getter);
        }
        for (name, value) in locals {
            self.bind(&name, value);
        }
        Ok(defined)
    }

    fn ctx_mut(&mut self, what: &str) -> Eval<&mut RunContext<'a>> {
        match self.ctx.as_deref_mut() {
            Some(ctx) => Ok(ctx),
            None => fail(format!("`{what}` is only available while a cell runs")),
        }
    }

    // Scopes

    fn bind(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    fn assign(&mut self, name: &str, value: Value) -> Eval<()> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                *slot = value;
                return Ok(());
            }
        }
        fail(format!("cannot assign to `{name}`: not a local variable"))
    }

    /// Whether `name` refers to something other than a built-in.
    fn shadowed(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.contains_key(name))
            || self.captured.contains_key(name)
            || self.ctx.as_ref().is_some_and(|ctx| ctx.get(name).is_some())
    }

    fn lookup(&mut self, name: &str) -> Eval<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.get(name) {
                return Ok(value.clone());
            }
        }
        if let Some(value) = self.captured.get(name) {
            return Ok(value.clone());
        }
        if let Some(value) = self.ctx.as_ref().and_then(|ctx| ctx.get(name)) {
            return Ok(value.clone());
        }
        if let Some(item) = self.items.iter().find(|i| i.name == name).cloned() {
            let item = cached_item(&item.source)?;
            if let Some((_, value)) = self.item_value(&item)? {
                return Ok(value);
            }
        }
        match name {
            "None" => Ok(Value::Null),
            _ if name == self.builtins.echo || name == self.builtins.invalidation => {
                fail(format!("`{name}` can only be called"))
            }
            _ => fail(format!("{name} is not defined")),
        }
    }

    /// Everything a function defined here can see.
    fn capture_env(&self, with_locals: bool) -> Arc<FxHashMap<String, Value>> {
        let mut env = (*self.captured).clone();
        if let Some(ctx) = &self.ctx {
            env.extend(ctx.inputs().iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if with_locals {
            for scope in &self.scopes {
                env.extend(scope.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        Arc::new(env)
    }

    // Items

    fn hoist_items(&mut self, stmts: &[Stmt]) -> Eval<()> {
        let sources: Vec<ItemSource> = stmts
            .iter()
            .filter_map(|stmt| match stmt {
                Stmt::Item(item) => item_name(item).map(|name| ItemSource {
                    name,
                    source: item.to_token_stream().to_string(),
                }),
                _ => None,
            })
            .collect();
        if sources.is_empty() {
            return Ok(());
        }
        let mut items = self.items.to_vec();
        items.extend(sources);
        self.items = Arc::from(items);

        for stmt in stmts {
            if let Stmt::Item(item) = stmt
                && let Some((name, value)) = self.item_value(item)?
            {
                self.bind(&name, value);
            }
        }
        Ok(())
    }

    fn item_value(&mut self, item: &Item) -> Eval<Option<(String, Value)>> {
        match item {
            Item::Fn(f) => {
                let name = f.sig.ident.to_string();
                let params = f
                    .sig
                    .inputs
                    .iter()
                    .map(|arg| match arg {
                        syn::FnArg::Typed(pt) => Ok(pt.pat.to_token_stream().to_string()),
                        syn::FnArg::Receiver(_) => Err(()),
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .or_else(|_| fail(format!("`{name}` cannot take `self`")))?;
                let function = ScriptFunction::create(
                    FunctionParts {
                        name: Some(name.clone()),
                        params,
                        body: f.block.to_token_stream().to_string(),
                        captured: self.capture_env(false),
                        items: self.items.clone(),
                        is_item: true,
                    },
                    self.builtins.clone(),
                );
                Ok(Some((name, Value::Function(function))))
            }
            Item::Struct(s) => {
                let class = s.ident.to_string();
                let fields: Vec<String> = match &s.fields {
                    Fields::Named(named) => named
                        .named
                        .iter()
                        .filter_map(|f| f.ident.as_ref().map(|i| i.to_string()))
                        .collect(),
                    Fields::Unnamed(unnamed) => {
                        (0..unnamed.unnamed.len()).map(|i| i.to_string()).collect()
                    }
                    Fields::Unit => Vec::new(),
                };
                let name = class.clone();
                let constructor = Function::native(class.clone(), move |args| {
                    let mut args = args.into_iter();
                    Ok(Value::Instance {
                        class: class.clone(),
                        fields: fields
                            .iter()
                            .map(|f| (f.clone(), args.next().unwrap_or(Value::Undefined)))
                            .collect(),
                    })
                });
                Ok(Some((name, Value::Function(constructor))))
            }
            Item::Const(c) => Ok(Some((c.ident.to_string(), self.eval(&c.expr)?))),
            Item::Static(s) => Ok(Some((s.ident.to_string(), self.eval(&s.expr)?))),
            Item::Use(_) => Ok(None),
            other => fail(format!(
                "unsupported item: {}",
                other.to_token_stream().to_string()
            )),
        }
    }

    // Statements

    fn exec_stmts(&mut self, stmts: &[Stmt]) -> Eval<Value> {
        self.hoist_items(stmts)?;
        let mut last = Value::Undefined;
        for stmt in stmts {
            last = self.exec_stmt(stmt)?;
        }
        Ok(last)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Eval<Value> {
        match stmt {
            Stmt::Local(local) => {
                if local.init.as_ref().is_some_and(|i| i.diverge.is_some()) {
                    return fail("`let ... else` is not supported");
                }
                let value = match &local.init {
                    Some(init) => self.eval(&init.expr)?,
                    None => Value::Undefined,
                };
                self.bind_pattern(&local.pat, value)?;
                Ok(Value::Undefined)
            }
            Stmt::Item(_) => Ok(Value::Undefined),
            Stmt::Expr(expr, semi) => {
                let value = self.eval(expr)?;
                Ok(if semi.is_some() { Value::Undefined } else { value })
            }
            Stmt::Macro(m) => {
                self.eval_macro(&m.mac)?;
                Ok(Value::Undefined)
            }
        }
    }

    fn bind_pattern(&mut self, pat: &Pat, value: Value) -> Eval<()> {
        match unwrap_pat(pat) {
            Pat::Ident(ident) => {
                self.bind(&ident.ident.to_string(), value);
                Ok(())
            }
            Pat::Wild(_) => Ok(()),
            Pat::Tuple(tuple) => self.bind_elements(tuple.elems.iter(), value),
            Pat::Slice(slice) => self.bind_elements(slice.elems.iter(), value),
            Pat::TupleStruct(ts) => self.bind_elements(ts.elems.iter(), value),
            Pat::Struct(ps) => {
                for field in &ps.fields {
                    let Member::Named(name) = &field.member else {
                        return fail("tuple fields are not supported in struct patterns");
                    };
                    let item = value.field(&name.to_string()).unwrap_or(Value::Undefined);
                    self.bind_pattern(&field.pat, item)?;
                }
                Ok(())
            }
            other => fail(format!(
                "unsupported pattern: {}",
                other.to_token_stream().to_string()
            )),
        }
    }

    fn bind_elements<'p>(
        &mut self,
        pats: impl Iterator<Item = &'p Pat>,
        value: Value,
    ) -> Eval<()> {
        let Value::Array(items) = value else {
            return fail(format!("cannot destructure {}", value.type_name()));
        };
        let pats: Vec<&Pat> = pats.collect();
        let rest = pats.iter().position(|p| matches!(p, Pat::Rest(_)));
        for (i, pat) in pats.iter().enumerate() {
            let item = match rest {
                Some(r) if i == r => continue,
                Some(r) if i > r => {
                    let from_end = pats.len() - i;
                    items.len().checked_sub(from_end).and_then(|j| items.get(j))
                }
                _ => items.get(i),
            };
            self.bind_pattern(pat, item.cloned().unwrap_or(Value::Undefined))?;
        }
        Ok(())
    }

    // Expressions

    fn eval(&mut self, expr: &Expr) -> Eval<Value> {
        match expr {
            Expr::Lit(lit) => literal(lit),
            Expr::Path(p) => match single_ident(&p.path) {
                Some(name) => self.lookup(&name),
                None => fail(format!(
                    "unsupported path: {}",
                    p.path.to_token_stream().to_string()
                )),
            },
            Expr::Paren(p) => self.eval(&p.expr),
            Expr::Group(g) => self.eval(&g.expr),
            Expr::Reference(r) => self.eval(&r.expr),
            Expr::Cast(c) => {
                let value = self.eval(&c.expr)?;
                let integer = matches!(
                    c.ty.to_token_stream().to_string().as_str(),
                    "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32"
                        | "u64" | "u128" | "usize"
                );
                Ok(match value {
                    Value::Number(n) if integer => Value::Number(n.trunc()),
                    other => other,
                })
            }
            Expr::Unary(u) => {
                let value = self.eval(&u.expr)?;
                match (&u.op, value) {
                    (UnOp::Neg(_), Value::Number(n)) => Ok(Value::Number(-n)),
                    (UnOp::Not(_), v) => Ok(Value::Bool(!v.is_truthy())),
                    (UnOp::Deref(_), v) => Ok(v),
                    (_, v) => fail(format!("cannot negate {}", v.type_name())),
                }
            }
            Expr::Binary(b) => self.eval_binary(b),
            Expr::Assign(a) => {
                let value = self.eval(&a.right)?;
                let name = self.place(&a.left)?;
                self.assign(&name, value)?;
                Ok(Value::Undefined)
            }
            Expr::Block(b) => self.eval_block(&b.block),
            Expr::If(i) => {
                if matches!(&*i.cond, Expr::Let(_)) {
                    return fail("`if let` is not supported");
                }
                if self.eval(&i.cond)?.is_truthy() {
                    self.eval_block(&i.then_branch)
                } else if let Some((_, otherwise)) = &i.else_branch {
                    self.eval(otherwise)
                } else {
                    Ok(Value::Undefined)
                }
            }
            Expr::While(w) => {
                if matches!(&*w.cond, Expr::Let(_)) {
                    return fail("`while let` is not supported");
                }
                let own = label_name(w.label.as_ref());
                while self.eval(&w.cond)?.is_truthy() {
                    match self.eval_block(&w.body) {
                        Ok(_) => {}
                        Err(Control::Break(target, _)) if targets(&target, &own) => break,
                        Err(Control::Continue(target)) if targets(&target, &own) => {}
                        Err(other) => return Err(other),
                    }
                }
                Ok(Value::Undefined)
            }
            Expr::Loop(l) => {
                let own = label_name(l.label.as_ref());
                loop {
                    match self.eval_block(&l.body) {
                        Ok(_) => {}
                        Err(Control::Break(target, value)) if targets(&target, &own) => {
                            return Ok(value);
                        }
                        Err(Control::Continue(target)) if targets(&target, &own) => {}
                        Err(other) => return Err(other),
                    }
                }
            }
            Expr::ForLoop(f) => self.eval_for(f),
            Expr::Break(b) => {
                let value = match &b.expr {
                    Some(e) => self.eval(e)?,
                    None => Value::Undefined,
                };
                Err(Control::Break(b.label.as_ref().map(|l| l.ident.to_string()), value))
            }
            Expr::Continue(c) => Err(Control::Continue(
                c.label.as_ref().map(|l| l.ident.to_string()),
            )),
            Expr::Return(r) => {
                let value = match &r.expr {
                    Some(e) => self.eval(e)?,
                    None => Value::Undefined,
                };
                Err(Control::Return(value))
            }
            Expr::Array(a) => Ok(Value::Array(self.eval_args(&a.elems)?)),
            Expr::Tuple(t) if t.elems.is_empty() => Ok(Value::Undefined),
            Expr::Tuple(t) => Ok(Value::Array(self.eval_args(&t.elems)?)),
            Expr::Repeat(r) => self.eval_repeat(&r.expr, &r.len),
            Expr::Range(r) => Ok(Value::Array(
                self.range_bounds(r)?.map(Value::Number).collect(),
            )),
            Expr::Index(i) => {
                let base = self.eval(&i.expr)?;
                let index = self.eval(&i.index)?;
                match &base {
                    Value::Array(items) => Ok(items[index_of(&index, items.len())?].clone()),
                    Value::Object(_) | Value::Instance { .. } => match index.as_str() {
                        Some(key) => Ok(base.field(key).unwrap_or(Value::Undefined)),
                        None => fail(format!("cannot index object with {}", index.type_name())),
                    },
                    Value::Map(entries) => Ok(entries
                        .iter()
                        .find(|(k, _)| *k == index)
                        .map(|(_, v)| v.clone())
                        .unwrap_or(Value::Undefined)),
                    other => fail(format!("cannot index into {}", other.type_name())),
                }
            }
            Expr::Field(f) => {
                let base = self.eval(&f.base)?;
                match &f.member {
                    Member::Named(name) => {
                        let name = name.to_string();
                        match base.field(&name) {
                            Some(value) => Ok(value),
                            None => fail(format!("no field `{name}` on {}", base.type_name())),
                        }
                    }
                    Member::Unnamed(index) => match &base {
                        Value::Array(items) => {
                            let i = index.index as usize;
                            match items.get(i) {
                                Some(v) => Ok(v.clone()),
                                None => fail(format!("no field `{i}` on array")),
                            }
                        }
                        other => other
                            .field(&index.index.to_string())
                            .map_or_else(|| fail(format!("no field on {}", other.type_name())), Ok),
                    },
                }
            }
            Expr::Struct(s) => self.eval_struct(s),
            Expr::Closure(c) => {
                let params = c
                    .inputs
                    .iter()
                    .map(|p| match p {
                        Pat::Type(typed) => typed.pat.to_token_stream().to_string(),
                        other => other.to_token_stream().to_string(),
                    })
                    .collect();
                Ok(Value::Function(ScriptFunction::create(
                    FunctionParts {
                        name: None,
                        params,
                        body: c.body.to_token_stream().to_string(),
                        captured: self.capture_env(true),
                        items: self.items.clone(),
                        is_item: false,
                    },
                    self.builtins.clone(),
                )))
            }
            Expr::Call(call) => self.eval_call(call),
            Expr::MethodCall(m) => self.eval_method_call(m),
            Expr::Macro(m) => self.eval_macro(&m.mac),
            other => fail(format!(
                "unsupported expression: {}",
                other.to_token_stream().to_string()
            )),
        }
    }

    fn eval_args<'e>(
        &mut self,
        args: impl IntoIterator<Item = &'e Expr>,
    ) -> Eval<Vec<Value>> {
        args.into_iter().map(|a| self.eval(a)).collect()
    }

    fn eval_repeat(&mut self, value: &Expr, len: &Expr) -> Eval<Value> {
        let value = self.eval(value)?;
        let len = match self.eval(len)? {
            Value::Number(n) if n >= 0.0 && n <= MAX_RANGE => n as usize,
            other => return fail(format!("invalid repeat length: {other}")),
        };
        Ok(Value::Array(vec![value; len]))
    }

    fn eval_block(&mut self, block: &Block) -> Eval<Value> {
        let items = self.items.clone();
        self.scopes.push(FxHashMap::default());
        let result = self.exec_stmts(&block.stmts);
        self.scopes.pop();
        self.items = items;
        result
    }

    /// The local name an assignment writes to.
    fn place(&self, target: &Expr) -> Eval<String> {
        match target {
            Expr::Path(p) => match single_ident(&p.path) {
                Some(name) => Ok(name),
                None => fail("can only assign to local variables"),
            },
            Expr::Paren(p) => self.place(&p.expr),
            Expr::Unary(u) if matches!(u.op, UnOp::Deref(_)) => self.place(&u.expr),
            _ => fail("can only assign to local variables"),
        }
    }

    fn eval_binary(&mut self, b: &syn::ExprBinary) -> Eval<Value> {
        match b.op {
            BinOp::And(_) => {
                let left = self.eval(&b.left)?;
                if !left.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                return Ok(Value::Bool(self.eval(&b.right)?.is_truthy()));
            }
            BinOp::Or(_) => {
                let left = self.eval(&b.left)?;
                if left.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                return Ok(Value::Bool(self.eval(&b.right)?.is_truthy()));
            }
            _ => {}
        }

        let compound = match b.op {
            BinOp::AddAssign(_) => Some("+"),
            BinOp::SubAssign(_) => Some("-"),
            BinOp::MulAssign(_) => Some("*"),
            BinOp::DivAssign(_) => Some("/"),
            BinOp::RemAssign(_) => Some("%"),
            _ => None,
        };
        if let Some(op) = compound {
            let name = self.place(&b.left)?;
            let current = self.lookup(&name)?;
            let right = self.eval(&b.right)?;
            let value = binary(op, current, right)?;
            self.assign(&name, value)?;
            return Ok(Value::Undefined);
        }

        let op = match b.op {
            BinOp::Add(_) => "+",
            BinOp::Sub(_) => "-",
            BinOp::Mul(_) => "*",
            BinOp::Div(_) => "/",
            BinOp::Rem(_) => "%",
            BinOp::Eq(_) => "==",
            BinOp::Ne(_) => "!=",
            BinOp::Lt(_) => "<",
            BinOp::Le(_) => "<=",
            BinOp::Gt(_) => ">",
            BinOp::Ge(_) => ">=",
            _ => {
                return fail(format!(
                    "unsupported operator `{}`",
                    b.op.to_token_stream().to_string()
                ));
            }
        };
        let left = self.eval(&b.left)?;
        let right = self.eval(&b.right)?;
        binary(op, left, right)
    }

    fn range_bounds(&mut self, r: &ExprRange) -> Eval<impl Iterator<Item = f64> + use<>> {
        let bound = |this: &mut Self, e: &Option<Box<Expr>>| -> Eval<f64> {
            match e {
                Some(e) => match this.eval(e)? {
                    Value::Number(n) if n.is_finite() => Ok(n),
                    other => fail(format!("range bounds must be numbers, found {}", other.type_name())),
                },
                None => fail("open-ended ranges are not supported"),
            }
        };
        let start = bound(self, &r.start)?;
        let mut end = bound(self, &r.end)?;
        if matches!(r.limits, RangeLimits::Closed(_)) {
            end += 1.0;
        }
        if end - start > MAX_RANGE {
            return fail(format!("range {start}..{end} is too large"));
        }
        let count = (end - start).ceil().max(0.0) as usize;
        Ok((0..count).map(move |i| start + i as f64))
    }

    fn eval_for(&mut self, f: &ExprForLoop) -> Eval<Value> {
        let own = label_name(f.label.as_ref());
        let items: Vec<Value> = match &*f.expr {
            Expr::Range(r) => self.range_bounds(r)?.map(Value::Number).collect(),
            other => match self.eval(other)? {
                Value::Array(items) | Value::Set(items) => items,
                Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                Value::Map(entries) => entries
                    .into_iter()
                    .map(|(k, v)| Value::Array(vec![k, v]))
                    .collect(),
                Value::Object(fields) => fields
                    .into_iter()
                    .map(|(k, v)| Value::Array(vec![Value::String(k), v]))
                    .collect(),
                other => return fail(format!("cannot iterate over {}", other.type_name())),
            },
        };

        for item in items {
            self.scopes.push(FxHashMap::default());
            let result = self
                .bind_pattern(&f.pat, item)
                .and_then(|()| self.eval_block(&f.body));
            self.scopes.pop();
            match result {
                Ok(_) => {}
                Err(Control::Break(target, _)) if targets(&target, &own) => break,
                Err(Control::Continue(target)) if targets(&target, &own) => {}
                Err(other) => return Err(other),
            }
        }
        Ok(Value::Undefined)
    }

    fn eval_struct(&mut self, s: &ExprStruct) -> Eval<Value> {
        let class = s
            .path
            .segments
            .last()
            .map(|seg| seg.ident.to_string())
            .unwrap_or_default();
        let mut fields: Vec<(String, Value)> = match &s.rest {
            Some(rest) => match self.eval(rest)? {
                Value::Object(fields) | Value::Instance { fields, .. } => fields,
                other => return fail(format!("cannot spread {}", other.type_name())),
            },
            None => Vec::new(),
        };
        for field in &s.fields {
            let name = match &field.member {
                Member::Named(ident) => ident.to_string(),
                Member::Unnamed(index) => index.index.to_string(),
            };
            let value = self.eval(&field.expr)?;
            match fields.iter_mut().find(|(k, _)| *k == name) {
                Some(slot) => slot.1 = value,
                None => fields.push((name, value)),
            }
        }
        Ok(if class == "Object" {
            Value::Object(fields)
        } else {
            Value::Instance { class, fields }
        })
    }

    /// Name of the built-in a call targets, if it is not shadowed.
    fn builtin_call(&self, call: &ExprCall) -> Option<String> {
        let Expr::Path(p) = &*call.func else {
            return None;
        };
        let name = single_ident(&p.path)?;
        (!self.shadowed(&name)).then_some(name)
    }

    fn is_builtin(&self, expr: &Expr, name: &str) -> bool {
        matches!(expr, Expr::Path(p) if p.path.is_ident(name)) && !self.shadowed(name)
    }

    fn eval_call(&mut self, call: &ExprCall) -> Eval<Value> {
        if let Some(name) = self.builtin_call(call) {
            if name == self.builtins.echo {
                let args = self.eval_args(&call.args)?;
                return Ok(self.ctx_mut(&name)?.echo_all(args));
            }
            match name.as_str() {
                "import" => {
                    let specs = self
                        .eval_args(&call.args)?
                        .into_iter()
                        .map(|v| match v {
                            Value::String(s) => Ok(s),
                            other => fail(format!("import expects strings, found {}", other.type_name())),
                        })
                        .collect::<Eval<Vec<String>>>()?;
                    let specs: Vec<&str> = specs.iter().map(String::as_str).collect();
                    return Ok(self.ctx_mut("import")?.import(&specs)?);
                }
                "Some" | "Ok" => {
                    let mut args = self.eval_args(&call.args)?;
                    return Ok(if args.is_empty() { Value::Undefined } else { args.remove(0) });
                }
                n if BINDING_BUILTINS.contains(&n) => {
                    return fail(format!("`{n}(..)` can only initialize a top-level `let`"));
                }
                _ => {}
            }
        }

        // echo.key(k)(value)
        if let Expr::MethodCall(m) = &*call.func
            && m.method == "key"
            && self.is_builtin(&m.receiver, &self.builtins.echo.clone())
        {
            let key = match m.args.first() {
                Some(k) => self.eval(k)?.to_string(),
                None => return fail("`key` expects a row key"),
            };
            let mut args = self.eval_args(&call.args)?;
            let value = if args.is_empty() { Value::Undefined } else { args.remove(0) };
            return Ok(self.ctx_mut("echo")?.key(key).echo(value));
        }

        let function = self.eval(&call.func)?;
        let args = self.eval_args(&call.args)?;
        self.call_value(function, args)
    }

    fn eval_method_call(&mut self, m: &ExprMethodCall) -> Eval<Value> {
        let method = m.method.to_string();
        let echo = self.builtins.echo.clone();
        let invalidation = self.builtins.invalidation.clone();

        if self.is_builtin(&m.receiver, &echo) {
            return match method.as_str() {
                "clear" => {
                    self.ctx_mut(&echo)?.clear();
                    Ok(Value::Undefined)
                }
                "dispose" => self.register_disposal(m, &echo),
                "key" => fail(format!("`{echo}.key(k)` must be called with a value")),
                _ => fail(format!("no method `{method}` on `{echo}`")),
            };
        }
        if self.is_builtin(&m.receiver, &invalidation) {
            return match method.as_str() {
                "then" => self.register_disposal(m, &invalidation),
                _ => fail(format!("no method `{method}` on `{invalidation}`")),
            };
        }

        let receiver = self.eval(&m.receiver)?;
        let args = self.eval_args(&m.args)?;
        self.call_method(receiver, &method, args)
    }

    fn register_disposal(&mut self, m: &ExprMethodCall, what: &str) -> Eval<Value> {
        let callback = match m.args.first() {
            Some(arg) => self.eval(arg)?,
            None => return fail(format!("`{what}.{}` expects a function", m.method)),
        };
        let Value::Function(callback) = callback else {
            return fail(format!(
                "`{what}.{}` expects a function, found {}",
                m.method,
                callback.type_name()
            ));
        };
        self.ctx_mut(what)?
            .invalidation()
            .try_on_dispose(move || callback.call(Vec::new()).map(|_| ()).map_err(|e| e.to_string()));
        Ok(Value::Undefined)
    }

    fn call_method(&mut self, receiver: Value, method: &str, args: Vec<Value>) -> Eval<Value> {
        let number_arg = |args: &[Value]| match args.first() {
            Some(Value::Number(n)) => Ok(*n),
            _ => fail(format!("`{method}` expects a number")),
        };
        match (method, &receiver) {
            ("len", Value::Array(items) | Value::Set(items)) => Ok(Value::from(items.len())),
            ("len", Value::String(s)) => Ok(Value::from(s.chars().count())),
            ("len", Value::Object(fields)) => Ok(Value::from(fields.len())),
            ("len", Value::Map(entries)) => Ok(Value::from(entries.len())),
            ("is_empty", _) => match self.call_method(receiver.clone(), "len", args)? {
                Value::Number(n) => Ok(Value::Bool(n == 0.0)),
                other => Ok(other),
            },
            ("push", Value::Array(items)) => {
                let mut items = items.clone();
                items.extend(args);
                Ok(Value::Array(items))
            }
            ("contains", Value::Array(items)) => {
                Ok(Value::Bool(args.first().is_some_and(|a| items.contains(a))))
            }
            ("contains", Value::String(s)) => Ok(Value::Bool(
                args.first().is_some_and(|a| s.contains(&a.to_string())),
            )),
            ("to_string", v) => Ok(Value::String(v.to_string())),
            ("clone" | "iter" | "into_iter" | "to_vec" | "to_owned", v) => Ok(v.clone()),
            ("floor", Value::Number(n)) => Ok(Value::Number(n.floor())),
            ("ceil", Value::Number(n)) => Ok(Value::Number(n.ceil())),
            ("round", Value::Number(n)) => Ok(Value::Number(n.round())),
            ("abs", Value::Number(n)) => Ok(Value::Number(n.abs())),
            ("sqrt", Value::Number(n)) => Ok(Value::Number(n.sqrt())),
            ("min", Value::Number(n)) => Ok(Value::Number(n.min(number_arg(&args)?))),
            ("max", Value::Number(n)) => Ok(Value::Number(n.max(number_arg(&args)?))),
            ("powi" | "powf", Value::Number(n)) => Ok(Value::Number(n.powf(number_arg(&args)?))),
            (_, Value::Object(_) | Value::Instance { .. }) => match receiver.field(method) {
                Some(f @ Value::Function(_)) => self.call_value(f, args),
                _ => fail(format!("no method `{method}` on {}", receiver.type_name())),
            },
            _ => fail(format!("no method `{method}` on {}", receiver.type_name())),
        }
    }

    fn call_value(&mut self, function: Value, args: Vec<Value>) -> Eval<Value> {
        let Value::Function(function) = function else {
            return fail(format!("{} is not a function", function.type_name()));
        };
        if let Some(script) = function.callable().as_any().downcast_ref::<ScriptFunction>() {
            return Ok(self.call_script(script, args)?);
        }
        function
            .call(args)
            .map_err(|thrown| Control::Error(CellError::runtime(thrown)))
    }

    /// Call a script function with this evaluator's context.
    pub(crate) fn call_script(
        &mut self,
        function: &ScriptFunction,
        args: Vec<Value>,
    ) -> Result<Value, CellError> {
        if self.depth >= MAX_DEPTH {
            return Err(CellError::runtime("maximum call depth exceeded"));
        }
        let body = cached_expr(&function.body)?;

        let scopes = std::mem::replace(&mut self.scopes, vec![FxHashMap::default()]);
        let captured = std::mem::replace(&mut self.captured, function.captured.clone());
        let items = std::mem::replace(&mut self.items, function.items.clone());
        self.depth += 1;

        let result = self.invoke(function, args, &body);

        self.depth -= 1;
        self.scopes = scopes;
        self.captured = captured;
        self.items = items;

        match result {
            Ok(value) | Err(Control::Return(value)) => Ok(value),
            Err(Control::Error(e)) => Err(e),
            Err(Control::Break(..)) => Err(CellError::runtime("`break` outside of a loop")),
            Err(Control::Continue(_)) => Err(CellError::runtime("`continue` outside of a loop")),
        }
    }

    fn invoke(&mut self, function: &ScriptFunction, args: Vec<Value>, body: &Expr) -> Eval<Value> {
        if function.is_item
            && let (Some(name), Some(me)) = (&function.name, function.as_function())
        {
            self.bind(name, Value::Function(me));
        }
        let mut args = args.into_iter();
        for param in &function.params {
            let pat = cached_pat(param)?;
            self.bind_pattern(&pat, args.next().unwrap_or(Value::Undefined))?;
        }
        self.eval(body)
    }

    // Macros

    fn eval_macro(&mut self, mac: &Macro) -> Eval<Value> {
        let name = mac
            .path
            .segments
            .last()
            .map(|s| s.ident.to_string())
            .unwrap_or_default();
        match name.as_str() {
            "vec" => {
                let repeat = |input: ParseStream| -> syn::Result<(Expr, Expr)> {
                    let value = input.parse()?;
                    input.parse::<Token![;]>()?;
                    Ok((value, input.parse()?))
                };
                if let Ok((value, len)) = mac.parse_body_with(repeat) {
                    return self.eval_repeat(&value, &len);
                }
                let args = mac
                    .parse_body_with(Punctuated::<Expr, Token![,]>::parse_terminated)
                    .map_err(|e| Control::Error(syntax_error(&e)))?;
                Ok(Value::Array(self.eval_args(&args)?))
            }
            "format" => Ok(Value::String(self.format_args(mac)?)),
            "println" | "print" => {
                let text = self.format_args(mac)?;
                self.ctx_mut(&name)?.echo(Value::String(text));
                Ok(Value::Undefined)
            }
            "panic" => {
                let text = self.format_args(mac)?;
                fail(text)
            }
            _ => fail(format!("unsupported macro `{name}!`")),
        }
    }

    fn format_args(&mut self, mac: &Macro) -> Eval<String> {
        let args = mac
            .parse_body_with(Punctuated::<Expr, Token![,]>::parse_terminated)
            .map_err(|e| Control::Error(syntax_error(&e)))?;
        let mut args = args.iter();
        let template = match args.next() {
            Some(Expr::Lit(ExprLit { lit: Lit::Str(s), .. })) => s.value(),
            None => return Ok(String::new()),
            Some(_) => return fail("format string must be a string literal"),
        };

        let mut positional = Vec::new();
        let mut named = FxHashMap::default();
        for arg in args {
            if let Expr::Assign(a) = arg
                && let Expr::Path(p) = &*a.left
                && let Some(name) = single_ident(&p.path)
            {
                let value = self.eval(&a.right)?;
                named.insert(name, value);
            } else {
                positional.push(self.eval(arg)?);
            }
        }
        self.render_template(&template, &positional, &named)
    }

    fn render_template(
        &mut self,
        template: &str,
        positional: &[Value],
        named: &FxHashMap<String, Value>,
    ) -> Eval<String> {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();
        let mut next = 0;
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut spec = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => spec.push(ch),
                            None => return fail("unterminated `{` in format string"),
                        }
                    }
                    let (arg, style) = spec.split_once(':').unwrap_or((spec.as_str(), ""));
                    let arg = arg.trim();
                    let value = if arg.is_empty() {
                        next += 1;
                        positional.get(next - 1).cloned()
                    } else if let Ok(i) = arg.parse::<usize>() {
                        positional.get(i).cloned()
                    } else if let Some(value) = named.get(arg) {
                        Some(value.clone())
                    } else {
                        Some(self.lookup(arg)?)
                    };
                    let Some(value) = value else {
                        return fail(format!("missing format argument for `{{{spec}}}`"));
                    };
                    out.push_str(&render_arg(&value, style));
                }
                c => out.push(c),
            }
        }
        Ok(out)
    }
}

fn item_name(item: &Item) -> Option<String> {
    match item {
        Item::Fn(f) => Some(f.sig.ident.to_string()),
        Item::Struct(s) => Some(s.ident.to_string()),
        Item::Const(c) => Some(c.ident.to_string()),
        Item::Static(s) => Some(s.ident.to_string()),
        _ => None,
    }
}

fn literal(lit: &ExprLit) -> Eval<Value> {
    match &lit.lit {
        Lit::Int(i) => i
            .base10_parse::<f64>()
            .map(Value::Number)
            .map_err(|e| Control::Error(syntax_error(&e))),
        Lit::Float(f) => f
            .base10_parse::<f64>()
            .map(Value::Number)
            .map_err(|e| Control::Error(syntax_error(&e))),
        Lit::Str(s) => Ok(Value::String(s.value())),
        Lit::Char(c) => Ok(Value::String(c.value().to_string())),
        Lit::Bool(b) => Ok(Value::Bool(b.value)),
        other => fail(format!(
            "unsupported literal: {}",
            other.to_token_stream().to_string()
        )),
    }
}

fn binary(op: &str, left: Value, right: Value) -> Eval<Value> {
    use Value::{Number, String as Str};
    let value = match (op, &left, &right) {
        ("+", Number(a), Number(b)) => Number(a + b),
        ("-", Number(a), Number(b)) => Number(a - b),
        ("*", Number(a), Number(b)) => Number(a * b),
        ("/", Number(a), Number(b)) => Number(a / b),
        ("%", Number(a), Number(b)) => Number(a % b),
        ("+", Str(_), _) | ("+", _, Str(_)) => Str(format!("{left}{right}")),
        ("==", _, _) => Value::Bool(left == right),
        ("!=", _, _) => Value::Bool(left != right),
        ("<", Number(a), Number(b)) => Value::Bool(a < b),
        ("<=", Number(a), Number(b)) => Value::Bool(a <= b),
        (">", Number(a), Number(b)) => Value::Bool(a > b),
        (">=", Number(a), Number(b)) => Value::Bool(a >= b),
        ("<", Str(a), Str(b)) => Value::Bool(a < b),
        ("<=", Str(a), Str(b)) => Value::Bool(a <= b),
        (">", Str(a), Str(b)) => Value::Bool(a > b),
        (">=", Str(a), Str(b)) => Value::Bool(a >= b),
        _ => {
            return fail(format!(
                "cannot apply `{op}` to {} and {}",
                left.type_name(),
                right.type_name()
            ));
        }
    };
    Ok(value)
}

fn render_arg(value: &Value, style: &str) -> String {
    if style.contains('?') {
        let options = FormatOptions {
            quote: Quote::Double,
            ..FormatOptions::unlimited()
        };
        return format(value, &options);
    }
    if let Some(precision) = style.strip_prefix('.').and_then(|p| p.parse::<usize>().ok())
        && let Value::Number(n) = value
    {
        return format!("{n:.precision$}");
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use crate::config::RuntimeConfig;
    use crate::error::CellError;
    use crate::execute::Notebook;
    use crate::graph::{CellId, CellSource, CellStatus};
    use crate::interp::Interpreter;

    fn notebook(cells: &[&str]) -> Notebook {
        let mut notebook = Notebook::new(RuntimeConfig::default(), Interpreter::default());
        let cells = cells
            .iter()
            .enumerate()
            .map(|(i, text)| CellSource::new(CellId::new(i), *text))
            .collect();
        notebook.apply_edit(cells).unwrap();
        notebook.drain();
        notebook
    }

    /// Display outputs of a single cell.
    fn outputs(source: &str) -> Vec<String> {
        notebook(&[source]).views().remove(0).outputs
    }

    fn single_error(source: &str) -> CellError {
        let notebook = notebook(&[source]);
        let id = CellId::new(0);
        assert_eq!(notebook.status(id), Some(CellStatus::Error));
        notebook.error(id).cloned().unwrap()
    }

    #[test]
    fn test_arithmetic_and_strings() {
        assert_eq!(
            outputs(r#"echo(1 + 2 * 3, 7 % 4, "a" + 1, -(2 - 5));"#),
            vec!["7", "3", "\"a1\"", "3"]
        );
    }

    #[test]
    fn test_loops_and_locals() {
        let source = r#"
            let mut total = 0;
            for i in 0..5 { total += i; }
            let mut n = 0;
            while n < 3 { n += 1; }
            let found = loop { break 42; };
            echo(total, n, found);
        "#;
        assert_eq!(outputs(source), vec!["10", "3", "42"]);
    }

    #[test]
    fn test_labelled_break() {
        let source = r#"
            let mut hits = 0;
            'outer: for i in 0..3 {
                for j in 0..3 {
                    if j == 2 { continue 'outer; }
                    if i == 2 { break 'outer; }
                    hits += 1;
                }
            }
            echo(hits);
        "#;
        assert_eq!(outputs(source), vec!["4"]);
    }

    #[test]
    fn test_functions_and_closures() {
        let source = r#"
            fn fact(n: f64) -> f64 { if n <= 1.0 { 1.0 } else { n * fact(n - 1.0) } }
            let offset = 10;
            let add = |x| x + offset;
            echo(fact(5), add(1));
        "#;
        assert_eq!(outputs(source), vec!["120", "11"]);
    }

    #[test]
    fn test_fn_items_call_siblings() {
        let source = r#"
            fn double(x: f64) -> f64 { x * 2.0 }
            fn quad(x: f64) -> f64 { double(double(x)) }
            echo(quad(3));
        "#;
        assert_eq!(outputs(source), vec!["12"]);
    }

    #[test]
    fn test_destructuring_and_structs() {
        let source = r#"
            struct Point { x: f64, y: f64 }
            let (a, [b, .., c]) = (1, [2, 3, 4, 5]);
            let p = Point { x: a, y: c };
            let q = Point(b, 0);
            let o = Object { name: "n" };
            echo(p, q.x, o, p.y);
        "#;
        assert_eq!(
            outputs(source),
            vec!["Point {x: 1, y: 5}", "2", "{name: \"n\"}", "5"]
        );
    }

    #[test]
    fn test_format_macros() {
        let source = r#"
            let name = "rill";
            let xs = vec![1, 2];
            println!("{name} has {} items: {:?} {{ok}} {:.2}", xs.len(), xs, 1.0 / 3.0);
            echo(format!("{0}-{0}", "a"));
        "#;
        assert_eq!(
            outputs(source),
            vec!["\"rill has 2 items: [1, 2] {ok} 0.33\"", "\"a-a\""]
        );
    }

    #[test]
    fn test_methods() {
        let source = r#"
            let xs = [1, 2].push(3);
            let zeros = vec![0; 2];
            let half = |x: f64| x / 2.0;
            echo(xs, xs.len(), "héllo".len(), 2.5.floor(), 3.to_string(), zeros, half(5));
        "#;
        assert_eq!(
            outputs(source),
            vec!["[1, 2, 3]", "3", "5", "2", "\"3\"", "[0, 0]", "2.5"]
        );
    }

    #[test]
    fn test_keyed_echo_and_clear() {
        let source = r#"
            echo("dropped");
            echo.clear();
            for i in 0..3 { echo.key("i")(i); }
            echo("kept");
        "#;
        let view = notebook(&[source]).views().remove(0);
        assert_eq!(view.outputs, vec!["\"kept\""]);
        assert_eq!(view.table.as_deref(), Some("i │ 0 │ 1 │ 2"));
    }

    #[test]
    fn test_top_level_names_are_defined() {
        let notebook = notebook(&["let (a, b) = (1, [2]); fn f() {}", "echo(a, b);"]);
        let views = notebook.views();
        assert_eq!(views[0].declared, vec!["a", "b", "f"]);
        assert_eq!(views[1].outputs, vec!["1", "[2]"]);
    }

    #[test]
    fn test_undefined_name() {
        let error = single_error("echo(missing_value);");
        assert_eq!(
            error,
            CellError::Runtime {
                message: "missing_value is not defined".into()
            }
        );
    }

    #[test]
    fn test_type_errors() {
        let error = single_error("let x = [1] - 2;");
        assert!(error.to_string().contains("cannot apply `-` to array and number"));

        let error = single_error("let x = [1, 2][5];");
        assert!(error.to_string().contains("out of bounds"));
    }

    #[test]
    fn test_binding_builtins_need_a_top_level_let() {
        let error = single_error("echo(delay(10, 1));");
        assert!(error.to_string().contains("top-level `let`"));
    }

    #[test]
    fn test_unbounded_recursion_is_an_error() {
        let error = single_error("fn f(n: f64) -> f64 { f(n + 1.0) } let x = f(0);");
        assert!(error.to_string().contains("maximum call depth"));
    }

    #[test]
    fn test_cells_split_from_source() {
        let mut notebook = Notebook::new(RuntimeConfig::default(), Interpreter::default());
        notebook
            .set_source("let base = 2;\n\nlet scaled = [1, 2, 3].push(base);\n\necho(scaled.len() * base);\n")
            .unwrap();
        notebook.drain();
        let views = notebook.views();
        assert_eq!(views.len(), 3);
        assert_eq!(views[2].outputs, vec!["8"]);
        assert_eq!(views[1].values[0].value.as_deref(), Some("[1, 2, 3, 2]"));
    }
}
