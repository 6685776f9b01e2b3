//! Name analysis for cell source using syn.
//!
//! A cell is a sequence of Rust statements. Its declared names are the
//! bindings it introduces at top level (`let` patterns and items); its free
//! names are the identifiers it reads that no enclosing scope inside the cell
//! binds. Runtime-provided names (the echo function, the invalidation token
//! and implicit globals) never count as free.

use std::collections::BTreeSet;

use rustc_hash::FxHashSet;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::visit::{self, Visit};
use syn::{
    BinOp, Block, Expr, ExprClosure, ExprForLoop, ExprIf, ExprWhile, GenericParam, Generics, Item,
    Macro, Pat, Signature, Stmt, Token, UseTree,
};

use super::types::CellNames;
use crate::config::RuntimeConfig;
use crate::error::CellError;

/// Extracts declared and free names from cell source.
#[derive(Debug, Clone)]
pub struct NameAnalyzer {
    /// Names supplied by the runtime rather than by other cells.
    provided: FxHashSet<String>,
}

impl NameAnalyzer {
    /// Create an analyzer that excludes the runtime-provided names of `config`.
    pub fn new(config: &RuntimeConfig) -> Self {
        let mut provided: FxHashSet<String> = crate::config::PRELUDE_GLOBALS
            .iter()
            .map(|s| s.to_string())
            .collect();
        provided.insert(config.echo_name.clone());
        provided.insert(config.invalidation_name.clone());
        provided.extend(config.extra_globals.iter().cloned());
        Self { provided }
    }

    /// Analyze one cell's source.
    pub fn analyze(&self, source: &str) -> Result<CellNames, CellError> {
        let stmts = parse_stmts(source)?;
        Ok(self.analyze_stmts(&stmts))
    }

    /// Analyze already-parsed statements.
    pub fn analyze_stmts(&self, stmts: &[Stmt]) -> CellNames {
        let declared = declared_names(stmts);

        // `let` names bind as they appear; a read before that is free
        let mut visitor = FreeNames {
            scopes: vec![FxHashSet::default()],
            free: BTreeSet::new(),
            provided: &self.provided,
        };
        visitor.visit_stmts(stmts);

        CellNames {
            declared,
            free: visitor.free.into_iter().collect(),
        }
    }
}

/// Parse cell source as a statement list.
pub(crate) fn parse_stmts(source: &str) -> Result<Vec<Stmt>, CellError> {
    Block::parse_within
        .parse_str(source)
        .map_err(|e| syntax_error(&e))
}

pub(crate) fn syntax_error(err: &syn::Error) -> CellError {
    let start = err.span().start();
    CellError::Syntax {
        message: err.to_string(),
        line: start.line,
        column: start.column,
    }
}

/// Top-level names in declaration order, without duplicates.
fn declared_names(stmts: &[Stmt]) -> Vec<String> {
    let mut names = Vec::new();
    for stmt in stmts {
        match stmt {
            Stmt::Local(local) => pat_names(&local.pat, &mut names),
            Stmt::Item(item) => item_names(item, &mut names),
            _ => {}
        }
    }

    let mut seen = FxHashSet::default();
    names.retain(|n| seen.insert(n.clone()));
    names
}

/// Collect the identifiers a pattern binds.
pub(crate) fn pat_names(pat: &Pat, out: &mut Vec<String>) {
    match pat {
        Pat::Ident(p) => {
            out.push(p.ident.to_string());
            if let Some((_, sub)) = &p.subpat {
                pat_names(sub, out);
            }
        }
        Pat::Tuple(t) => t.elems.iter().for_each(|p| pat_names(p, out)),
        Pat::TupleStruct(t) => t.elems.iter().for_each(|p| pat_names(p, out)),
        Pat::Slice(s) => s.elems.iter().for_each(|p| pat_names(p, out)),
        Pat::Struct(s) => s.fields.iter().for_each(|f| pat_names(&f.pat, out)),
        Pat::Or(o) => o.cases.iter().for_each(|p| pat_names(p, out)),
        Pat::Reference(r) => pat_names(&r.pat, out),
        Pat::Type(t) => pat_names(&t.pat, out),
        Pat::Paren(p) => pat_names(&p.pat, out),
        _ => {}
    }
}

fn item_names(item: &Item, out: &mut Vec<String>) {
    match item {
        Item::Fn(f) => out.push(f.sig.ident.to_string()),
        Item::Const(c) => out.push(c.ident.to_string()),
        Item::Static(s) => out.push(s.ident.to_string()),
        Item::Struct(s) => out.push(s.ident.to_string()),
        Item::Enum(e) => out.push(e.ident.to_string()),
        Item::Union(u) => out.push(u.ident.to_string()),
        Item::Type(t) => out.push(t.ident.to_string()),
        Item::Trait(t) => out.push(t.ident.to_string()),
        Item::Mod(m) => out.push(m.ident.to_string()),
        Item::Macro(m) => {
            if let Some(ident) = &m.ident {
                out.push(ident.to_string());
            }
        }
        Item::Use(u) => use_names(&u.tree, out),
        _ => {}
    }
}

fn use_names(tree: &UseTree, out: &mut Vec<String>) {
    match tree {
        UseTree::Path(p) => use_names(&p.tree, out),
        UseTree::Name(n) if n.ident != "self" => out.push(n.ident.to_string()),
        UseTree::Rename(r) => out.push(r.rename.to_string()),
        UseTree::Group(g) => g.items.iter().for_each(|t| use_names(t, out)),
        _ => {}
    }
}

fn generic_names(generics: &Generics) -> Vec<String> {
    generics
        .params
        .iter()
        .filter_map(|p| match p {
            GenericParam::Type(t) => Some(t.ident.to_string()),
            GenericParam::Const(c) => Some(c.ident.to_string()),
            GenericParam::Lifetime(_) => None,
        })
        .collect()
}

/// Scope-aware collector of free identifiers.
struct FreeNames<'a> {
    scopes: Vec<FxHashSet<String>>,
    free: BTreeSet<String>,
    provided: &'a FxHashSet<String>,
}

impl FreeNames<'_> {
    fn is_bound(&self, name: &str) -> bool {
        self.scopes.iter().rev().any(|s| s.contains(name))
    }

    fn reference(&mut self, name: String) {
        if !self.is_bound(&name) && !self.provided.contains(&name) {
            self.free.insert(name);
        }
    }

    fn bind(&mut self, names: impl IntoIterator<Item = String>) {
        if let Some(top) = self.scopes.last_mut() {
            top.extend(names);
        }
    }

    fn scoped(&mut self, names: Vec<String>, f: impl FnOnce(&mut Self)) {
        self.scopes.push(names.into_iter().collect());
        f(self);
        self.scopes.pop();
    }

    /// Visit statements in the current scope; items are hoisted.
    fn visit_stmts(&mut self, stmts: &[Stmt]) {
        let mut hoisted = Vec::new();
        for stmt in stmts {
            if let Stmt::Item(item) = stmt {
                item_names(item, &mut hoisted);
            }
        }
        self.bind(hoisted);

        for stmt in stmts {
            match stmt {
                Stmt::Local(local) => {
                    // The initializer sees the scope before the new bindings.
                    if let Some(init) = &local.init {
                        self.visit_expr(&init.expr);
                        if let Some((_, diverge)) = &init.diverge {
                            self.visit_expr(diverge);
                        }
                    }
                    self.visit_pat(&local.pat);
                    let mut names = Vec::new();
                    pat_names(&local.pat, &mut names);
                    self.bind(names);
                }
                other => self.visit_stmt(other),
            }
        }
    }

    /// Visit an `if`/`while` condition and return the names its `let`s bind.
    fn visit_condition(&mut self, cond: &Expr) -> Vec<String> {
        match cond {
            Expr::Let(l) => {
                self.visit_expr(&l.expr);
                self.visit_pat(&l.pat);
                let mut names = Vec::new();
                pat_names(&l.pat, &mut names);
                names
            }
            Expr::Binary(b) if matches!(b.op, BinOp::And(_)) => {
                let mut names = self.visit_condition(&b.left);
                self.scopes.push(names.iter().cloned().collect());
                let right = self.visit_condition(&b.right);
                self.scopes.pop();
                names.extend(right);
                names
            }
            other => {
                self.visit_expr(other);
                Vec::new()
            }
        }
    }

    fn visit_fn(&mut self, sig: &Signature, block: &Block) {
        let mut names = generic_names(&sig.generics);
        names.push(sig.ident.to_string());
        for input in &sig.inputs {
            if let syn::FnArg::Typed(pt) = input {
                pat_names(&pt.pat, &mut names);
            }
        }
        self.scoped(names, |v| {
            for input in &sig.inputs {
                if let syn::FnArg::Typed(pt) = input {
                    v.visit_type(&pt.ty);
                }
            }
            v.visit_return_type(&sig.output);
            v.visit_block(block);
        });
    }

    fn visit_macro_args(&mut self, mac: &Macro) {
        let exprs = mac.parse_body_with(Punctuated::<Expr, Token![,]>::parse_terminated);
        match exprs {
            Ok(exprs) => {
                for (i, expr) in exprs.iter().enumerate() {
                    if i == 0
                        && let Expr::Lit(syn::ExprLit {
                            lit: syn::Lit::Str(s),
                            ..
                        }) = expr
                    {
                        for name in inline_captures(&s.value()) {
                            self.reference(name);
                        }
                    }
                    self.visit_expr(expr);
                }
            }
            Err(_) => {
                // `vec![value; count]`
                let repeat = mac.parse_body_with(|input: syn::parse::ParseStream<'_>| {
                    let value: Expr = input.parse()?;
                    input.parse::<Token![;]>()?;
                    let count: Expr = input.parse()?;
                    Ok((value, count))
                });
                if let Ok((value, count)) = repeat {
                    self.visit_expr(&value);
                    self.visit_expr(&count);
                }
            }
        }
    }
}

/// Identifiers captured inline by a format string (`"{name}"`, `"{name:?}"`).
pub(crate) fn inline_captures(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '{' {
            continue;
        }
        if chars.peek() == Some(&'{') {
            chars.next();
            continue;
        }
        let mut name = String::new();
        while let Some(&next) = chars.peek() {
            if next == '}' || next == ':' {
                break;
            }
            name.push(next);
            chars.next();
        }
        let is_ident = name
            .chars()
            .next()
            .is_some_and(|f| f.is_alphabetic() || f == '_')
            && name.chars().all(|ch| ch.is_alphanumeric() || ch == '_');
        if is_ident {
            names.push(name);
        }
    }
    names
}

impl<'ast> Visit<'ast> for FreeNames<'_> {
    fn visit_block(&mut self, block: &'ast Block) {
        self.scoped(Vec::new(), |v| v.visit_stmts(&block.stmts));
    }

    fn visit_path(&mut self, path: &'ast syn::Path) {
        if path.leading_colon.is_none()
            && let Some(first) = path.segments.first()
        {
            self.reference(first.ident.to_string());
        }
        for segment in &path.segments {
            self.visit_path_arguments(&segment.arguments);
        }
    }

    fn visit_expr_closure(&mut self, closure: &'ast ExprClosure) {
        let mut names = Vec::new();
        for input in &closure.inputs {
            pat_names(input, &mut names);
        }
        self.scoped(names, |v| {
            for input in &closure.inputs {
                v.visit_pat(input);
            }
            v.visit_return_type(&closure.output);
            v.visit_expr(&closure.body);
        });
    }

    fn visit_expr_for_loop(&mut self, for_loop: &'ast ExprForLoop) {
        self.visit_expr(&for_loop.expr);
        let mut names = Vec::new();
        pat_names(&for_loop.pat, &mut names);
        self.scoped(names, |v| {
            v.visit_pat(&for_loop.pat);
            v.visit_block(&for_loop.body);
        });
    }

    fn visit_expr_if(&mut self, expr_if: &'ast ExprIf) {
        self.scopes.push(FxHashSet::default());
        let names = self.visit_condition(&expr_if.cond);
        self.bind(names);
        self.visit_block(&expr_if.then_branch);
        self.scopes.pop();
        if let Some((_, else_branch)) = &expr_if.else_branch {
            self.visit_expr(else_branch);
        }
    }

    fn visit_expr_while(&mut self, expr_while: &'ast ExprWhile) {
        self.scopes.push(FxHashSet::default());
        let names = self.visit_condition(&expr_while.cond);
        self.bind(names);
        self.visit_block(&expr_while.body);
        self.scopes.pop();
    }

    fn visit_arm(&mut self, arm: &'ast syn::Arm) {
        let mut names = Vec::new();
        pat_names(&arm.pat, &mut names);
        self.scoped(names, |v| {
            v.visit_pat(&arm.pat);
            if let Some((_, guard)) = &arm.guard {
                v.visit_expr(guard);
            }
            v.visit_expr(&arm.body);
        });
    }

    fn visit_item(&mut self, item: &'ast Item) {
        let generics = match item {
            Item::Fn(f) => {
                self.visit_fn(&f.sig, &f.block);
                return;
            }
            Item::Struct(s) => Some(&s.generics),
            Item::Enum(e) => Some(&e.generics),
            Item::Union(u) => Some(&u.generics),
            Item::Type(t) => Some(&t.generics),
            Item::Trait(t) => Some(&t.generics),
            Item::Impl(i) => Some(&i.generics),
            _ => None,
        };
        let names = generics.map(generic_names).unwrap_or_default();
        self.scoped(names, |v| visit::visit_item(v, item));
    }

    fn visit_impl_item_fn(&mut self, f: &'ast syn::ImplItemFn) {
        self.visit_fn(&f.sig, &f.block);
    }

    fn visit_use_tree(&mut self, tree: &'ast UseTree) {
        // `use a::b;` reads the path root.
        if let UseTree::Path(p) = tree {
            self.reference(p.ident.to_string());
        }
    }

    fn visit_macro(&mut self, mac: &'ast Macro) {
        self.visit_macro_args(mac);
    }

    fn visit_attribute(&mut self, _attr: &'ast syn::Attribute) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(source: &str) -> CellNames {
        NameAnalyzer::new(&RuntimeConfig::default())
            .analyze(source)
            .unwrap()
    }

    #[test]
    fn test_let_declares_and_reads() {
        let names = analyze("let b = a + 1;");
        assert_eq!(names.declared, vec!["b"]);
        assert_eq!(names.free, vec!["a"]);
    }

    #[test]
    fn test_destructuring_declares_in_order() {
        let names = analyze("let (count, set_count, get_count) = mutable(0);");
        assert_eq!(names.declared, vec!["count", "set_count", "get_count"]);
        assert!(names.free.is_empty());
    }

    #[test]
    fn test_items_are_declared() {
        let names = analyze(
            r#"
            fn double(x: f64) -> f64 { x * factor }
            struct Point { x: f64, y: f64 }
            const LIMIT: f64 = 10.0;
            "#,
        );
        assert_eq!(names.declared, vec!["double", "Point", "LIMIT"]);
        assert_eq!(names.free, vec!["factor"]);
    }

    #[test]
    fn test_nested_scopes_shadow_free_references() {
        let names = analyze(
            r#"
            let total = {
                let data = 3.0;
                data * scale
            };
            echo(data);
            "#,
        );
        assert_eq!(names.declared, vec!["total"]);
        // the inner `data` does not leak; the later read is free
        assert_eq!(names.free, vec!["data", "scale"]);
    }

    #[test]
    fn test_closure_params_are_bound() {
        let names = analyze("let f = |x| x + offset;");
        assert_eq!(names.free, vec!["offset"]);
    }

    #[test]
    fn test_for_loop_pattern_is_bound() {
        let names = analyze("for i in 0..n { echo.key(\"i\")(i); }");
        assert!(names.declared.is_empty());
        assert_eq!(names.free, vec!["n"]);
    }

    #[test]
    fn test_initializer_sees_outer_binding() {
        // `let x = x` inside a block reads the outer `x`
        let names = analyze("let y = { let x = x + 1; x };");
        assert_eq!(names.free, vec!["x"]);
    }

    #[test]
    fn test_runtime_provided_names_are_not_free() {
        let names = analyze(
            r#"
            echo(Some(1));
            invalidation.then(|| echo("bye"));
            let v: Vec<f64> = vec![1.0; n];
            "#,
        );
        assert_eq!(names.free, vec!["n"]);
    }

    #[test]
    fn test_extra_globals() {
        let config = RuntimeConfig {
            extra_globals: vec!["window".to_string()],
            ..RuntimeConfig::default()
        };
        let names = NameAnalyzer::new(&config)
            .analyze("echo(window + other);")
            .unwrap();
        assert_eq!(names.free, vec!["other"]);
    }

    #[test]
    fn test_macro_arguments_and_inline_captures() {
        let names = analyze(r#"println!("{label}: {}", value);"#);
        assert_eq!(names.free, vec!["label", "value"]);
    }

    #[test]
    fn test_struct_paths_are_references() {
        let names = analyze("let p = Point { x: 1.0, y };");
        assert_eq!(names.declared, vec!["p"]);
        assert_eq!(names.free, vec!["Point", "y"]);
    }

    #[test]
    fn test_if_let_binds_in_then_branch_only() {
        let names = analyze("if let Ok(v) = parse(s) { echo(v); } else { echo(v); }");
        assert_eq!(names.free, vec!["parse", "s", "v"]);
    }

    #[test]
    fn test_fn_params_and_generics() {
        let names = analyze("fn first<T: Clone>(items: Vec<T>) -> T { items[0].clone() }");
        assert_eq!(names.declared, vec!["first"]);
        assert!(names.free.is_empty());
    }

    #[test]
    fn test_own_declarations_are_not_free() {
        let names = analyze("let a = 1; let b = a * 2;");
        assert_eq!(names.declared, vec!["a", "b"]);
        assert!(names.free.is_empty());
    }

    #[test]
    fn test_self_reference_is_free() {
        let names = analyze("let a = a + 1;");
        assert_eq!(names.declared, vec!["a"]);
        assert_eq!(names.free, vec!["a"]);

        let names = analyze("let b = a; let a = 1;");
        assert_eq!(names.declared, vec!["b", "a"]);
        assert_eq!(names.free, vec!["a"]);
    }

    #[test]
    fn test_items_are_hoisted() {
        let names = analyze("let x = double(2.0); fn double(v: f64) -> f64 { v * 2.0 }");
        assert!(names.free.is_empty());
    }

    #[test]
    fn test_syntax_error() {
        let err = NameAnalyzer::new(&RuntimeConfig::default())
            .analyze("let = ;")
            .unwrap_err();
        assert!(matches!(err, CellError::Syntax { line: 1, .. }));
    }

    #[test]
    fn test_empty_source() {
        let names = analyze("   ");
        assert!(names.declared.is_empty());
        assert!(names.free.is_empty());
    }

    #[test]
    fn test_inline_captures() {
        assert_eq!(inline_captures("{a} {{b}} {c:?} {0} {}"), vec!["a", "c"]);
    }
}
