//! Human-readable rendering of expression and term trees.
//!
//! Expressions print as builder chains (`r.table("t").filter({...})`),
//! terms print as schema names (`FILTER(TABLE(DB("test"), "t"), ...)`).

use std::fmt::{self, Display, Formatter, Write};

use super::expr::{Expr, Kind, Literal, ScopedOption};
use super::term_type::TermType;
use crate::wire::{Term, WireDatum};

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_expr(f, self)
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_term(f, self)
    }
}

impl Display for WireDatum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            WireDatum::Null => f.write_str("null"),
            WireDatum::Bool(b) => write!(f, "{}", b),
            WireDatum::Num(n) => write_number(f, *n),
            WireDatum::Str(s) => write!(f, "{:?}", s),
            WireDatum::Array(items) => {
                f.write_char('[')?;
                write_list(f, items.iter(), |f, d| write!(f, "{}", d))?;
                f.write_char(']')
            }
            WireDatum::Object(pairs) => {
                f.write_char('{')?;
                write_list(f, pairs.iter(), |f, (k, v)| write!(f, "{:?}: {}", k, v))?;
                f.write_char('}')
            }
        }
    }
}

fn write_number(f: &mut Formatter<'_>, n: f64) -> fmt::Result {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{}", n)
    }
}

fn write_list<I, T, F>(f: &mut Formatter<'_>, items: I, mut each: F) -> fmt::Result
where
    I: Iterator<Item = T>,
    F: FnMut(&mut Formatter<'_>, T) -> fmt::Result,
{
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        each(f, item)?;
    }
    Ok(())
}

// ============================================================================
// Expressions
// ============================================================================

fn write_expr(f: &mut Formatter<'_>, expr: &Expr) -> fmt::Result {
    match expr.kind() {
        Kind::Literal(lit) => write_literal(f, lit),
        Kind::ImplicitVar => f.write_str("r.row"),
        Kind::Func { .. } => match expr.args().first() {
            Some(body) => write_expr(f, body),
            None => f.write_str("func()"),
        },
        Kind::Option(option) => {
            if let Some(inner) = expr.args().first() {
                write_receiver(f, inner)?;
            }
            write!(f, ".{}(", option.method_name())?;
            write_option_value(f, option)?;
            f.write_char(')')
        }
        Kind::TableCreate(spec) => {
            match expr.args().first() {
                Some(db) => write_receiver(f, db)?,
                None => f.write_char('r')?,
            }
            write!(f, ".table_create({:?}", spec.name)?;
            if let Some(ref pk) = spec.primary_key {
                write!(f, ", primary_key={:?}", pk)?;
            }
            if let Some(ref dc) = spec.datacenter {
                write!(f, ", datacenter={:?}", dc)?;
            }
            if let Some(size) = spec.cache_size {
                write!(f, ", cache_size={}", size)?;
            }
            if let Some(ref durability) = spec.durability {
                write!(f, ", durability={:?}", durability)?;
            }
            f.write_char(')')
        }
        Kind::Term(TermType::Var) => {
            f.write_str("var_")?;
            match expr.args().first() {
                Some(id) => write_expr(f, id),
                None => Ok(()),
            }
        }
        Kind::Term(TermType::Funcall) if expr.args().len() == 2 => {
            write_receiver(f, &expr.args()[1])?;
            f.write_str(".do_(")?;
            write_expr(f, &expr.args()[0])?;
            f.write_char(')')
        }
        Kind::Term(tt) => {
            let args = expr.args();
            let rest = if expr.is_chained() && !args.is_empty() {
                write_receiver(f, &args[0])?;
                &args[1..]
            } else {
                f.write_char('r')?;
                args
            };
            write!(f, ".{}(", tt.method_name())?;
            write_list(f, rest.iter(), write_expr)?;
            if !expr.optargs().is_empty() {
                if !rest.is_empty() {
                    f.write_str(", ")?;
                }
                write_list(f, expr.optargs().iter(), |f, (k, v)| {
                    write!(f, "{}=", k)?;
                    write_expr(f, v)
                })?;
            }
            f.write_char(')')
        }
    }
}

/// Receivers that are bare literals print as `r.expr(...)` so the chain
/// reads as a valid builder call.
fn write_receiver(f: &mut Formatter<'_>, receiver: &Expr) -> fmt::Result {
    if receiver.is_literal() {
        f.write_str("r.expr(")?;
        write_expr(f, receiver)?;
        f.write_char(')')
    } else {
        write_expr(f, receiver)
    }
}

fn write_literal(f: &mut Formatter<'_>, lit: &Literal) -> fmt::Result {
    match lit {
        Literal::Datum(d) => write!(f, "{}", d),
        Literal::Array(items) => {
            f.write_char('[')?;
            write_list(f, items.iter(), write_expr)?;
            f.write_char(']')
        }
        Literal::Object(map) => {
            f.write_char('{')?;
            write_list(f, map.iter(), |f, (k, v)| {
                write!(f, "{:?}: ", k)?;
                write_expr(f, v)
            })?;
            f.write_char('}')
        }
        Literal::Func(func) => write!(f, "func/{}", func.arity()),
        Literal::Unmarshalable(_) => f.write_str("<unmarshalable>"),
    }
}

fn write_option_value(f: &mut Formatter<'_>, option: &ScopedOption) -> fmt::Result {
    match option {
        ScopedOption::UseOutdated(b)
        | ScopedOption::Atomic(b)
        | ScopedOption::Upsert(b) => write!(f, "{}", b),
        ScopedOption::ReturnValues(_) => Ok(()),
        ScopedOption::Durability(s)
        | ScopedOption::LeftBound(s)
        | ScopedOption::RightBound(s)
        | ScopedOption::TimeFormat(s) => write!(f, "{:?}", s),
    }
}

// ============================================================================
// Terms
// ============================================================================

fn write_term(f: &mut Formatter<'_>, term: &Term) -> fmt::Result {
    if term.term_type == TermType::Datum {
        return match term.datum {
            Some(ref d) => write!(f, "{}", d),
            None => f.write_str("null"),
        };
    }

    write!(f, "{}(", term.term_type.wire_name())?;
    write_list(f, term.args.iter(), write_term)?;
    if !term.optargs.is_empty() {
        if !term.args.is_empty() {
            f.write_str(", ")?;
        }
        write_list(f, term.optargs.iter(), |f, (k, v)| {
            write!(f, "{}=", k)?;
            write_term(f, v)
        })?;
    }
    f.write_char(')')
}
