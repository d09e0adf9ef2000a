//! Query expressions and their compilation to wire terms.
//!
//! Architecture:
//! - `term_type`: the closed enumeration of wire term types
//! - `expr`: the immutable expression tree and native conversions
//! - `ops`: chainable operators, option setters and free constructors
//! - `compile`: lowering of expressions into terms under a context
//! - `fmt`: rendering of expressions and terms for diagnostics

pub mod compile;
pub mod expr;
mod fmt;
pub mod ops;
pub mod term_type;


pub use compile::{build_query, compile, contains_implicit_var, Context};
pub use expr::{func0, func1, func2, Expr, Func, ScopedOption, ANY_ARITY};
pub use ops::TableSpec;
pub use term_type::TermType;
