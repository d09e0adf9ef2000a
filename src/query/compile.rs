//! Lowering of expression trees into wire terms.
//!
//! [`compile`] walks an [`Expr`] with a [`Context`]. Option-setter nodes emit
//! nothing themselves; they update a copy of the context for their inner
//! expression only. A handful of term types get their arguments rewritten:
//! tables gain a database, mutations gain write options, and trailing
//! positional arguments of some terms become keyword arguments.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};

use super::expr::{Expr, Kind, Literal, ScopedOption, ANY_ARITY};
use super::ops::TableSpec;
use super::term_type::TermType;
use crate::datum;
use crate::error::{Error, Result};
use crate::wire::{Term, WireDatum};

/// Process-wide source of function parameter numbers.
static NEXT_VAR_ID: AtomicI64 = AtomicI64::new(1);

/// Ambient options for one compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    /// Database used for tables given without one
    pub database_name: String,
    pub use_outdated: bool,
    pub atomic: bool,
    pub upsert: bool,
    pub return_values: bool,
    pub durability: Option<String>,
    pub left_bound: Option<String>,
    pub right_bound: Option<String>,
    pub time_format: Option<String>,
}

impl Context {
    /// A fresh context for `database`. Writes are atomic by default.
    pub fn new(database: &str) -> Self {
        Self {
            database_name: database.to_string(),
            use_outdated: false,
            atomic: true,
            upsert: false,
            return_values: false,
            durability: None,
            left_bound: None,
            right_bound: None,
            time_format: None,
        }
    }

    fn apply(&mut self, option: &ScopedOption) {
        match option {
            ScopedOption::UseOutdated(b) => self.use_outdated = *b,
            ScopedOption::Durability(s) => self.durability = Some(s.clone()),
            ScopedOption::Atomic(b) => self.atomic = *b,
            ScopedOption::ReturnValues(b) => self.return_values = *b,
            ScopedOption::LeftBound(s) => self.left_bound = Some(s.clone()),
            ScopedOption::RightBound(s) => self.right_bound = Some(s.clone()),
            ScopedOption::Upsert(b) => self.upsert = *b,
            ScopedOption::TimeFormat(s) => self.time_format = Some(s.clone()),
        }
    }
}

/// Compile a query root into its term and the START query's global optargs.
pub fn build_query(ctx: &Context, expr: &Expr) -> Result<(Term, Vec<(String, Term)>)> {
    let term = compile(ctx, expr)?;

    let mut global_optargs = Vec::new();
    if let Some(format) = root_time_format(expr) {
        global_optargs.push((
            "time_format".to_string(),
            Term::datum(WireDatum::Str(format)),
        ));
    }
    Ok((term, global_optargs))
}

/// The innermost `time_format` set on the chain of option setters at the
/// root of `expr`.
pub fn root_time_format(expr: &Expr) -> Option<String> {
    let mut found = None;
    let mut node = expr;
    while let Kind::Option(option) = node.kind() {
        if let ScopedOption::TimeFormat(format) = option {
            found = Some(format.clone());
        }
        match node.args().first() {
            Some(inner) => node = inner,
            None => break,
        }
    }
    found
}

/// Lower `expr` into a wire term.
pub fn compile(ctx: &Context, expr: &Expr) -> Result<Term> {
    match expr.kind() {
        Kind::Literal(lit) => compile_literal(ctx, lit, 0),
        Kind::ImplicitVar => Ok(Term::new(TermType::ImplicitVar)),
        Kind::Func { arity } => {
            let body = expr
                .args()
                .first()
                .ok_or_else(|| Error::bad_client("function node without a body"))?;
            compile_func(ctx, body, *arity)
        }
        Kind::Option(option) => {
            let inner = expr
                .args()
                .first()
                .ok_or_else(|| Error::bad_client("option setter without an expression"))?;
            let mut scoped = ctx.clone();
            scoped.apply(option);
            compile(&scoped, inner)
        }
        Kind::TableCreate(spec) => compile_table_create(ctx, expr, spec),
        Kind::Term(tt) => compile_term(ctx, expr, *tt),
    }
}

fn compile_literal(ctx: &Context, lit: &Literal, depth: usize) -> Result<Term> {
    if depth > datum::MAX_NESTING_DEPTH {
        return Err(Error::Unmarshalable(format!(
            "value nesting exceeds {} levels",
            datum::MAX_NESTING_DEPTH
        )));
    }

    match lit {
        Literal::Datum(d) => datum::marshal_at(d, depth),
        Literal::Array(items) => {
            let mut args = Vec::with_capacity(items.len());
            for item in items {
                args.push(compile_nested(ctx, item, depth)?);
            }
            Ok(Term::with_args(TermType::MakeArray, args))
        }
        Literal::Object(map) => {
            let mut term = Term::new(TermType::MakeObj);
            for (key, value) in map {
                term.optargs
                    .push((key.clone(), compile_nested(ctx, value, depth)?));
            }
            Ok(term)
        }
        Literal::Func(_) => Err(Error::bad_client(
            "a function cannot be used as a value here",
        )),
        Literal::Unmarshalable(msg) => Err(Error::Unmarshalable(msg.clone())),
    }
}

/// Elements of a literal container: nested literals count towards the
/// depth limit, callables become functions and anything else compiles
/// normally.
fn compile_nested(ctx: &Context, item: &Expr, depth: usize) -> Result<Term> {
    match item.kind() {
        Kind::Literal(Literal::Func(_)) => compile_func(ctx, item, ANY_ARITY),
        Kind::Literal(lit) => compile_literal(ctx, lit, depth + 1),
        _ => compile(ctx, item),
    }
}

fn compile_args(ctx: &Context, expr: &Expr) -> Result<Vec<Term>> {
    expr.args()
        .iter()
        .map(|arg| match arg.kind() {
            Kind::Literal(Literal::Func(_)) => compile_func(ctx, arg, ANY_ARITY),
            _ => compile(ctx, arg),
        })
        .collect()
}

fn compile_term(ctx: &Context, expr: &Expr, tt: TermType) -> Result<Term> {
    let mut term = Term::with_args(tt, compile_args(ctx, expr)?);

    match tt {
        TermType::Table => {
            if term.args.len() == 1 {
                term.args.insert(0, database_term(ctx));
            }
            if ctx.use_outdated {
                term.set_optarg("use_outdated", bool_term(true));
            }
        }
        TermType::TableDrop => {
            if term.args.len() == 1 {
                term.args.insert(0, database_term(ctx));
            }
        }
        TermType::TableList => {
            if term.args.is_empty() {
                term.args.push(database_term(ctx));
            }
        }
        TermType::Insert => {
            require_table_receiver(&term)?;
            attach_write_options(ctx, &mut term);
            if ctx.upsert {
                term.set_optarg("upsert", bool_term(true));
            }
        }
        TermType::Update | TermType::Replace => {
            attach_write_options(ctx, &mut term);
            if !ctx.atomic {
                term.set_optarg("non_atomic", bool_term(true));
            }
        }
        TermType::Delete => attach_write_options(ctx, &mut term),
        TermType::Between => {
            attach_bounds(ctx, &mut term);
            promote_trailing(&mut term, 3, "index");
        }
        TermType::During => attach_bounds(ctx, &mut term),
        TermType::Reduce => promote_trailing(&mut term, 2, "base"),
        TermType::GroupedMapReduce => promote_trailing(&mut term, 4, "base"),
        TermType::EqJoin => promote_trailing(&mut term, 3, "index"),
        TermType::GetAll => {
            require_table_receiver(&term)?;
            promote_trailing(&mut term, 2, "index");
        }
        TermType::Get
        | TermType::IndexCreate
        | TermType::IndexDrop
        | TermType::IndexList
        | TermType::IndexStatus
        | TermType::IndexWait
        | TermType::Sync => require_table_receiver(&term)?,
        _ => {}
    }

    for (key, value) in expr.optargs() {
        term.set_optarg(key, compile(ctx, value)?);
    }
    Ok(term)
}

fn compile_table_create(ctx: &Context, expr: &Expr, spec: &TableSpec) -> Result<Term> {
    if spec.name.is_empty() {
        return Err(Error::bad_client("table_create requires a table name"));
    }

    let database = match expr.args().first() {
        Some(db) => compile(ctx, db)?,
        None => database_term(ctx),
    };
    let mut term = Term::with_args(
        TermType::TableCreate,
        vec![database, string_term(&spec.name)],
    );

    let non_empty = |s: &Option<String>| s.as_deref().filter(|v| !v.is_empty()).map(string_term);
    if let Some(pk) = non_empty(&spec.primary_key) {
        term.set_optarg("primary_key", pk);
    }
    if let Some(dc) = non_empty(&spec.datacenter) {
        term.set_optarg("datacenter", dc);
    }
    if let Some(size) = spec.cache_size.filter(|s| *s > 0) {
        term.set_optarg("cache_size", Term::datum(WireDatum::Num(size as f64)));
    }
    if let Some(durability) = non_empty(&spec.durability) {
        term.set_optarg("durability", durability);
    }
    Ok(term)
}

// ============================================================================
// Functions
// ============================================================================

/// Allocate `count` fresh parameter numbers.
fn fresh_vars(count: usize) -> Vec<i64> {
    (0..count)
        .map(|_| NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed))
        .collect()
}

fn func_term(vars: &[i64], body: Term) -> Term {
    let params = vars
        .iter()
        .map(|v| Term::datum(WireDatum::Num(*v as f64)))
        .collect();
    Term::with_args(
        TermType::Func,
        vec![Term::with_args(TermType::MakeArray, params), body],
    )
}

fn compile_func(ctx: &Context, body: &Expr, arity: i32) -> Result<Term> {
    if let Some(func) = body.as_func() {
        let taken = func.arity();
        if arity != ANY_ARITY && taken as i32 != arity {
            return Err(Error::bad_client(format!(
                "expected a function of {} parameter(s), got one of {}",
                arity, taken
            )));
        }

        let vars = fresh_vars(taken);
        let params: Vec<Expr> = vars.iter().map(|v| Expr::var(*v)).collect();
        let produced = catch_unwind(AssertUnwindSafe(|| func.call(&params))).map_err(|payload| {
            Error::Internal {
                message: panic_message(payload.as_ref()),
                query: String::new(),
            }
        })??;
        return Ok(func_term(&vars, compile(ctx, &produced)?));
    }

    let term = compile(ctx, body)?;
    if !contains_implicit_var(&term) && is_passthrough(&term) {
        return Ok(term);
    }
    let vars = fresh_vars(arity.max(1) as usize);
    Ok(func_term(&vars, term))
}

/// Whether `term` references the implicit row anywhere below it.
pub fn contains_implicit_var(term: &Term) -> bool {
    term.term_type == TermType::ImplicitVar
        || term.args.iter().any(contains_implicit_var)
        || term.optargs.iter().any(|(_, t)| contains_implicit_var(t))
}

/// Terms usable as a function argument without a `FUNC` wrapper: literal
/// values, JavaScript and functions.
fn is_passthrough(term: &Term) -> bool {
    matches!(term.term_type, TermType::Javascript | TermType::Func) || is_pure_literal(term)
}

fn is_pure_literal(term: &Term) -> bool {
    match term.term_type {
        TermType::Datum => true,
        TermType::MakeArray => term.args.iter().all(is_pure_literal),
        TermType::MakeObj => term.optargs.iter().all(|(_, t)| is_pure_literal(t)),
        _ => false,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "function panicked".to_string()
    }
}

// ============================================================================
// Rewrites
// ============================================================================

fn string_term(s: &str) -> Term {
    Term::datum(WireDatum::Str(s.to_string()))
}

fn bool_term(b: bool) -> Term {
    Term::datum(WireDatum::Bool(b))
}

fn database_term(ctx: &Context) -> Term {
    Term::with_args(TermType::Db, vec![string_term(&ctx.database_name)])
}

fn attach_write_options(ctx: &Context, term: &mut Term) {
    if let Some(ref durability) = ctx.durability {
        term.set_optarg("durability", string_term(durability));
    }
    if ctx.return_values {
        term.set_optarg("return_vals", bool_term(true));
    }
}

fn attach_bounds(ctx: &Context, term: &mut Term) {
    if let Some(ref bound) = ctx.left_bound {
        term.set_optarg("left_bound", string_term(bound));
    }
    if let Some(ref bound) = ctx.right_bound {
        term.set_optarg("right_bound", string_term(bound));
    }
}

/// Move the last positional argument to optarg `key` when there are more
/// than `base_len` positional arguments.
fn promote_trailing(term: &mut Term, base_len: usize, key: &str) {
    if term.args.len() > base_len {
        if let Some(last) = term.args.pop() {
            term.set_optarg(key, last);
        }
    }
}

fn require_table_receiver(term: &Term) -> Result<()> {
    match term.args.first() {
        Some(receiver)
            if matches!(receiver.term_type, TermType::Table | TermType::Var | TermType::Funcall) =>
        {
            Ok(())
        }
        _ => Err(Error::bad_client(format!(
            "{} requires a table receiver",
            term.term_type.method_name()
        ))),
    }
}
