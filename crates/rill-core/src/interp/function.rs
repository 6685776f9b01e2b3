//! Functions defined in cell source, and the parse cache they run from.
//!
//! Syntax trees are not `Send`, so functions keep their source text and are
//! re-parsed on demand through a per-thread cache.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Weak};
use std::thread::LocalKey;

use rustc_hash::FxHashMap;
use syn::parse::Parser;
use syn::{Block, Expr, Item, Pat, Stmt};

use super::eval::{Builtins, Evaluator};
use crate::error::CellError;
use crate::graph::syntax_error;
use crate::value::{Callable, Function, Value};

const CACHE_LIMIT: usize = 1024;

type Cache<T> = RefCell<FxHashMap<String, Rc<T>>>;

thread_local! {
    static STMTS: Cache<Vec<Stmt>> = RefCell::new(FxHashMap::default());
    static EXPRS: Cache<Expr> = RefCell::new(FxHashMap::default());
    static PATS: Cache<Pat> = RefCell::new(FxHashMap::default());
    static ITEMS: Cache<Item> = RefCell::new(FxHashMap::default());
}

fn cached<T>(
    cache: &'static LocalKey<Cache<T>>,
    source: &str,
    parse: impl FnOnce(&str) -> syn::Result<T>,
) -> Result<Rc<T>, CellError> {
    if let Some(hit) = cache.with(|c| c.borrow().get(source).cloned()) {
        return Ok(hit);
    }
    let parsed = Rc::new(parse(source).map_err(|e| syntax_error(&e))?);
    cache.with(|c| {
        let mut c = c.borrow_mut();
        if c.len() >= CACHE_LIMIT {
            c.clear();
        }
        c.insert(source.to_string(), parsed.clone());
    });
    Ok(parsed)
}

pub(crate) fn cached_stmts(source: &str) -> Result<Rc<Vec<Stmt>>, CellError> {
    cached(&STMTS, source, |s| Block::parse_within.parse_str(s))
}

pub(crate) fn cached_expr(source: &str) -> Result<Rc<Expr>, CellError> {
    cached(&EXPRS, source, syn::parse_str::<Expr>)
}

pub(crate) fn cached_pat(source: &str) -> Result<Rc<Pat>, CellError> {
    cached(&PATS, source, |s| Pat::parse_single.parse_str(s))
}

pub(crate) fn cached_item(source: &str) -> Result<Rc<Item>, CellError> {
    cached(&ITEMS, source, syn::parse_str::<Item>)
}

/// A named item visible to functions defined next to it.
#[derive(Debug, Clone)]
pub(crate) struct ItemSource {
    pub(crate) name: String,
    pub(crate) source: String,
}

/// A closure or `fn` item.
pub(crate) struct ScriptFunction {
    pub(crate) name: Option<String>,
    /// Parameter patterns, as source.
    pub(crate) params: Vec<String>,
    /// Body expression, as source.
    pub(crate) body: String,
    /// Names visible where the function was defined.
    pub(crate) captured: Arc<FxHashMap<String, Value>>,
    /// Items declared alongside the function.
    pub(crate) items: Arc<[ItemSource]>,
    pub(crate) builtins: Arc<Builtins>,
    /// `fn` items see themselves by name.
    pub(crate) is_item: bool,
    me: Weak<ScriptFunction>,
}

pub(crate) struct FunctionParts {
    pub(crate) name: Option<String>,
    pub(crate) params: Vec<String>,
    pub(crate) body: String,
    pub(crate) captured: Arc<FxHashMap<String, Value>>,
    pub(crate) items: Arc<[ItemSource]>,
    pub(crate) is_item: bool,
}

impl ScriptFunction {
    pub(crate) fn create(parts: FunctionParts, builtins: Arc<Builtins>) -> Function {
        let name = parts.name.clone();
        let function = Arc::new_cyclic(|me| ScriptFunction {
            name: parts.name,
            params: parts.params,
            body: parts.body,
            captured: parts.captured,
            items: parts.items,
            builtins,
            is_item: parts.is_item,
            me: me.clone(),
        });
        Function::new(name, function)
    }

    /// This function as a value.
    pub(crate) fn as_function(&self) -> Option<Function> {
        let me: Arc<dyn Callable> = self.me.upgrade()?;
        Some(Function::new(self.name.clone(), me))
    }
}

impl Callable for ScriptFunction {
    fn call(&self, args: Vec<Value>) -> Result<Value, Value> {
        let mut evaluator = Evaluator::standalone(self.builtins.clone());
        evaluator.call_script(self, args).map_err(|error| match error {
            CellError::Runtime { message } => Value::error("Error", message),
            other => Value::error("Error", other.to_string()),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
