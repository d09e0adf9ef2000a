//! The immutable expression tree.
//!
//! An [`Expr`] is a cheap handle (`Arc`) to a node holding a kind and an
//! ordered list of argument expressions. Builders never mutate a node; they
//! allocate a new one that points at its inputs.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeZone};
use serde::Serialize;
use smallvec::SmallVec;

use super::ops::TableSpec;
use super::term_type::TermType;
use crate::datum::Datum;
use crate::error::{Error, Result};

/// Arity hint meaning "any number of parameters".
pub const ANY_ARITY: i32 = -1;

// ============================================================================
// Callables
// ============================================================================

type Nullary = dyn Fn() -> Expr + Send + Sync;
type Unary = dyn Fn(Expr) -> Expr + Send + Sync;
type Binary = dyn Fn(Expr, Expr) -> Expr + Send + Sync;

/// A native callable captured into an expression.
///
/// The compiler invokes it once with parameter placeholders and lowers the
/// returned expression into a `FUNC` term.
#[derive(Clone)]
pub enum Func {
    Nullary(Arc<Nullary>),
    Unary(Arc<Unary>),
    Binary(Arc<Binary>),
}

impl Func {
    /// Number of parameters the callable takes.
    pub fn arity(&self) -> usize {
        match self {
            Func::Nullary(_) => 0,
            Func::Unary(_) => 1,
            Func::Binary(_) => 2,
        }
    }

    /// Invoke with `params`, which must hold exactly `arity()` expressions.
    pub(crate) fn call(&self, params: &[Expr]) -> Result<Expr> {
        match (self, params) {
            (Func::Nullary(f), []) => Ok(f()),
            (Func::Unary(f), [a]) => Ok(f(a.clone())),
            (Func::Binary(f), [a, b]) => Ok(f(a.clone(), b.clone())),
            _ => Err(Error::bad_client(format!(
                "function of {} parameter(s) called with {}",
                self.arity(),
                params.len()
            ))),
        }
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Func/{}", self.arity())
    }
}

/// Capture a callable taking no parameters.
pub fn func0<F, R>(f: F) -> Func
where
    F: Fn() -> R + Send + Sync + 'static,
    R: Into<Expr>,
{
    Func::Nullary(Arc::new(move || f().into()))
}

/// Capture a callable taking one parameter.
pub fn func1<F, R>(f: F) -> Func
where
    F: Fn(Expr) -> R + Send + Sync + 'static,
    R: Into<Expr>,
{
    Func::Unary(Arc::new(move |a| f(a).into()))
}

/// Capture a callable taking two parameters.
pub fn func2<F, R>(f: F) -> Func
where
    F: Fn(Expr, Expr) -> R + Send + Sync + 'static,
    R: Into<Expr>,
{
    Func::Binary(Arc::new(move |a, b| f(a, b).into()))
}

// ============================================================================
// Node
// ============================================================================

/// Options an option-setter node scopes over its inner expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopedOption {
    UseOutdated(bool),
    Durability(String),
    Atomic(bool),
    ReturnValues(bool),
    LeftBound(String),
    RightBound(String),
    Upsert(bool),
    TimeFormat(String),
}

impl ScopedOption {
    /// Builder method name, used when rendering.
    pub fn method_name(&self) -> &'static str {
        match self {
            ScopedOption::UseOutdated(_) => "use_outdated",
            ScopedOption::Durability(_) => "durability",
            ScopedOption::Atomic(_) => "atomic",
            ScopedOption::ReturnValues(_) => "return_values",
            ScopedOption::LeftBound(_) => "left_bound",
            ScopedOption::RightBound(_) => "right_bound",
            ScopedOption::Upsert(_) => "upsert",
            ScopedOption::TimeFormat(_) => "time_format",
        }
    }
}

/// Native literal payloads.
#[derive(Debug, Clone)]
pub(crate) enum Literal {
    Datum(Datum),
    Array(Vec<Expr>),
    Object(BTreeMap<String, Expr>),
    Func(Func),
    /// A native value that failed to serialize; reported at compile time.
    Unmarshalable(String),
}

#[derive(Debug, Clone)]
pub(crate) enum Kind {
    Literal(Literal),
    /// The implicit row of the innermost one-parameter function.
    ImplicitVar,
    /// Wraps `args[0]` as a function body with an arity hint.
    Func { arity: i32 },
    /// Scopes an option over `args[0]`.
    Option(ScopedOption),
    /// `args` holds the optional database receiver.
    TableCreate(TableSpec),
    Term(TermType),
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) kind: Kind,
    pub(crate) args: SmallVec<[Expr; 4]>,
    /// Extra keyword arguments attached at construction (e.g. `js` timeout)
    pub(crate) optargs: Vec<(&'static str, Expr)>,
    /// Whether `args[0]` is the receiver of a method chain
    pub(crate) chained: bool,
}

/// A query expression.
///
/// Cloning is cheap and shares the underlying tree.
#[derive(Clone)]
pub struct Expr(pub(crate) Arc<Node>);

impl Expr {
    pub(crate) fn from_node(kind: Kind, args: SmallVec<[Expr; 4]>, chained: bool) -> Self {
        Expr(Arc::new(Node {
            kind,
            args,
            optargs: Vec::new(),
            chained,
        }))
    }

    /// A term whose arguments follow no receiver, e.g. `r.db("x")`.
    pub(crate) fn nullary<I>(term_type: TermType, args: I) -> Self
    where
        I: IntoIterator<Item = Expr>,
    {
        Self::from_node(Kind::Term(term_type), args.into_iter().collect(), false)
    }

    /// A term whose first argument is `receiver`, e.g. `x.add(y)`.
    pub(crate) fn nary<I>(term_type: TermType, receiver: &Expr, args: I) -> Self
    where
        I: IntoIterator<Item = Expr>,
    {
        let mut all: SmallVec<[Expr; 4]> = SmallVec::new();
        all.push(receiver.clone());
        all.extend(args);
        Self::from_node(Kind::Term(term_type), all, true)
    }

    /// Copy of this node with an extra keyword argument.
    pub(crate) fn with_optarg(&self, key: &'static str, value: Expr) -> Self {
        let mut optargs = self.0.optargs.clone();
        optargs.retain(|(k, _)| *k != key);
        optargs.push((key, value));
        Expr(Arc::new(Node {
            kind: self.0.kind.clone(),
            args: self.0.args.clone(),
            optargs,
            chained: self.0.chained,
        }))
    }

    pub(crate) fn literal(lit: Literal) -> Self {
        Self::from_node(Kind::Literal(lit), SmallVec::new(), false)
    }

    /// The implicit row sentinel.
    pub fn row() -> Self {
        Self::from_node(Kind::ImplicitVar, SmallVec::new(), false)
    }

    /// A reference to function parameter `id`.
    pub(crate) fn var(id: i64) -> Self {
        Self::nullary(TermType::Var, [Expr::from(id)])
    }

    /// Wrap `body` as a function argument expecting `arity` parameters.
    pub(crate) fn func_arg(body: Expr, arity: i32) -> Self {
        let mut args = SmallVec::new();
        args.push(body);
        Self::from_node(Kind::Func { arity }, args, false)
    }

    /// Like [`Expr::func_arg`], but only for callables; other values pass
    /// through. Used by `order_by`, where plain attribute names are common.
    pub(crate) fn func_arg_if_callable(body: Expr, arity: i32) -> Self {
        if body.as_func().is_some() {
            Self::func_arg(body, arity)
        } else {
            body
        }
    }

    pub(crate) fn scoped(&self, option: ScopedOption) -> Self {
        let mut args = SmallVec::new();
        args.push(self.clone());
        Self::from_node(Kind::Option(option), args, true)
    }

    /// Build an expression from any `serde` value.
    ///
    /// A value that cannot be represented (for example a map with
    /// non-string keys) yields an expression that fails to compile with
    /// `Error::Unmarshalable`.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Self {
        match Datum::from_serialize(value) {
            Ok(datum) => Expr::from(datum),
            Err(e) => Expr::literal(Literal::Unmarshalable(e.to_string())),
        }
    }

    #[inline]
    pub(crate) fn kind(&self) -> &Kind {
        &self.0.kind
    }

    #[inline]
    pub(crate) fn args(&self) -> &[Expr] {
        &self.0.args
    }

    #[inline]
    pub(crate) fn optargs(&self) -> &[(&'static str, Expr)] {
        &self.0.optargs
    }

    #[inline]
    pub(crate) fn is_chained(&self) -> bool {
        self.0.chained
    }

    pub(crate) fn as_func(&self) -> Option<&Func> {
        match self.kind() {
            Kind::Literal(Literal::Func(f)) => Some(f),
            _ => None,
        }
    }

    pub(crate) fn is_literal(&self) -> bool {
        matches!(self.kind(), Kind::Literal(_))
    }

    /// The wire term type this node lowers to, if it is a plain term.
    pub fn term_type(&self) -> Option<TermType> {
        match self.kind() {
            Kind::Term(tt) => Some(*tt),
            Kind::ImplicitVar => Some(TermType::ImplicitVar),
            Kind::TableCreate(_) => Some(TermType::TableCreate),
            _ => None,
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ============================================================================
// Native conversions
// ============================================================================

impl From<Datum> for Expr {
    fn from(v: Datum) -> Self {
        Expr::literal(Literal::Datum(v))
    }
}

impl From<&Expr> for Expr {
    fn from(v: &Expr) -> Self {
        v.clone()
    }
}

impl From<Func> for Expr {
    fn from(v: Func) -> Self {
        Expr::literal(Literal::Func(v))
    }
}

impl From<()> for Expr {
    fn from(_: ()) -> Self {
        Expr::from(Datum::Null)
    }
}

macro_rules! expr_from_datum {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Expr {
                fn from(v: $t) -> Self {
                    Expr::from(Datum::from(v))
                }
            }
        )*
    };
}

expr_from_datum!(
    bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, &str, String,
    serde_json::Value
);

impl From<&String> for Expr {
    fn from(v: &String) -> Self {
        Expr::from(v.as_str())
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for Expr {
    fn from(v: DateTime<Tz>) -> Self {
        Expr::from(Datum::from(v))
    }
}

impl<T: Into<Expr>> From<Option<T>> for Expr {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Expr::from(Datum::Null),
        }
    }
}

impl<T: Into<Expr>> From<Vec<T>> for Expr {
    fn from(v: Vec<T>) -> Self {
        Expr::literal(Literal::Array(v.into_iter().map(Into::into).collect()))
    }
}

impl<T: Into<Expr>, const N: usize> From<[T; N]> for Expr {
    fn from(v: [T; N]) -> Self {
        Expr::literal(Literal::Array(v.into_iter().map(Into::into).collect()))
    }
}

impl<K: Into<String>, T: Into<Expr>> From<BTreeMap<K, T>> for Expr {
    fn from(v: BTreeMap<K, T>) -> Self {
        Expr::literal(Literal::Object(
            v.into_iter().map(|(k, e)| (k.into(), e.into())).collect(),
        ))
    }
}

impl<K: Into<String>, T: Into<Expr>> From<HashMap<K, T>> for Expr {
    fn from(v: HashMap<K, T>) -> Self {
        Expr::literal(Literal::Object(
            v.into_iter().map(|(k, e)| (k.into(), e.into())).collect(),
        ))
    }
}

/// Build an object expression whose values may be expressions.
///
/// ```ignore
/// let doc = obj! { "name" => "ada", "age" => row().attr("age").add(1) };
/// ```
#[macro_export]
macro_rules! obj {
    () => {
        $crate::Expr::from(::std::collections::BTreeMap::<String, $crate::Expr>::new())
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = ::std::collections::BTreeMap::<String, $crate::Expr>::new();
        $( map.insert(::std::string::String::from($key), $crate::Expr::from($value)); )+
        $crate::Expr::from(map)
    }};
}

/// Build an array expression from heterogeneous values.
#[macro_export]
macro_rules! arr {
    () => {
        $crate::Expr::from(::std::vec::Vec::<$crate::Expr>::new())
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Expr::from(::std::vec![$($crate::Expr::from($value)),+])
    };
}
