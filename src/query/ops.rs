//! Chainable operators on [`Expr`].
//!
//! Every method returns a new expression whose first argument is the
//! receiver. Functional arguments (filters, mappings, reductions, join
//! predicates) are wrapped with an arity hint the compiler checks against
//! captured callables.

use std::collections::BTreeMap;

use super::expr::{Expr, ScopedOption, ANY_ARITY};
use super::term_type::TermType;

macro_rules! unary_ops {
    ($($(#[$meta:meta])* $name:ident => $tt:ident;)*) => {
        $(
            $(#[$meta])*
            pub fn $name(&self) -> Expr {
                Expr::nary(TermType::$tt, self, [])
            }
        )*
    };
}

macro_rules! binary_ops {
    ($($(#[$meta:meta])* $name:ident => $tt:ident;)*) => {
        $(
            $(#[$meta])*
            pub fn $name(&self, other: impl Into<Expr>) -> Expr {
                Expr::nary(TermType::$tt, self, [other.into()])
            }
        )*
    };
}

macro_rules! variadic_ops {
    ($($(#[$meta:meta])* $name:ident => $tt:ident;)*) => {
        $(
            $(#[$meta])*
            pub fn $name<I, T>(&self, items: I) -> Expr
            where
                I: IntoIterator<Item = T>,
                T: Into<Expr>,
            {
                Expr::nary(TermType::$tt, self, items.into_iter().map(Into::into))
            }
        )*
    };
}

macro_rules! func_ops {
    ($($(#[$meta:meta])* $name:ident => $tt:ident / $arity:expr;)*) => {
        $(
            $(#[$meta])*
            pub fn $name(&self, f: impl Into<Expr>) -> Expr {
                Expr::nary(TermType::$tt, self, [Expr::func_arg(f.into(), $arity)])
            }
        )*
    };
}

// ============================================================================
// Operators
// ============================================================================

impl Expr {
    unary_ops! {
        not => Not;
        count => Count;
        distinct => Distinct;
        is_empty => IsEmpty;
        keys => Keys;
        type_of => TypeOf;
        info => Info;
        zip => Zip;
        upcase => Upcase;
        downcase => Downcase;
        /// Delete the selected documents.
        delete => Delete;
        to_iso8601 => ToIso8601;
        to_epoch_time => ToEpochTime;
        date => Date;
        time_of_day => TimeOfDay;
        timezone => Timezone;
        year => Year;
        month => Month;
        day => Day;
        day_of_week => DayOfWeek;
        day_of_year => DayOfYear;
        hours => Hours;
        minutes => Minutes;
        seconds => Seconds;
        sync => Sync;
        index_list => IndexList;
        table_list => TableList;
    }

    binary_ops! {
        eq => Eq;
        ne => Ne;
        lt => Lt;
        le => Le;
        gt => Gt;
        ge => Ge;
        add => Add;
        sub => Sub;
        mul => Mul;
        div => Div;
        modulo => Mod;
        /// Logical or.
        or => Any;
        /// Logical and.
        and => All;
        append => Append;
        prepend => Prepend;
        difference => Difference;
        set_insert => SetInsert;
        set_intersection => SetIntersection;
        set_union => SetUnion;
        set_difference => SetDifference;
        skip => Skip;
        limit => Limit;
        /// Field access, `doc("name")` in other drivers.
        attr => GetField;
        nth => Nth;
        merge => Merge;
        coerce_to => CoerceTo;
        default => Default;
        match_ => Match;
        sample => Sample;
        in_timezone => InTimezone;
        /// Point lookup by primary key; the receiver must be a table.
        get => Get;
        insert => Insert;
        delete_at => DeleteAt;
        index_drop => IndexDrop;
        table => Table;
        table_drop => TableDrop;
    }

    variadic_ops! {
        has_fields => HasFields;
        with_fields => WithFields;
        pluck => Pluck;
        without => Without;
        contains => Contains;
        union => Union;
        index_status => IndexStatus;
        index_wait => IndexWait;
    }

    func_ops! {
        filter => Filter / 1;
        map => Map / 1;
        concat_map => ConcatMap / 1;
        for_each => ForEach / 1;
        /// Update with an object or a one-parameter function.
        update => Update / 1;
        replace => Replace / 1;
        indexes_of => IndexesOf / 1;
    }

    /// Sub-sequence `[start, end)`.
    pub fn slice(&self, start: impl Into<Expr>, end: impl Into<Expr>) -> Expr {
        Expr::nary(TermType::Slice, self, [start.into(), end.into()])
    }

    pub fn insert_at(&self, index: impl Into<Expr>, value: impl Into<Expr>) -> Expr {
        Expr::nary(TermType::InsertAt, self, [index.into(), value.into()])
    }

    pub fn change_at(&self, index: impl Into<Expr>, value: impl Into<Expr>) -> Expr {
        Expr::nary(TermType::ChangeAt, self, [index.into(), value.into()])
    }

    pub fn splice_at(&self, index: impl Into<Expr>, values: impl Into<Expr>) -> Expr {
        Expr::nary(TermType::SpliceAt, self, [index.into(), values.into()])
    }

    /// Remove the elements in `[start, end)`.
    pub fn delete_at_range(&self, start: impl Into<Expr>, end: impl Into<Expr>) -> Expr {
        Expr::nary(TermType::DeleteAt, self, [start.into(), end.into()])
    }

    /// Rows of a table whose primary key lies between `lower` and `upper`.
    pub fn between(&self, lower: impl Into<Expr>, upper: impl Into<Expr>) -> Expr {
        Expr::nary(TermType::Between, self, [lower.into(), upper.into()])
    }

    /// Like [`Expr::between`], over a secondary index.
    pub fn between_index(
        &self,
        lower: impl Into<Expr>,
        upper: impl Into<Expr>,
        index: &str,
    ) -> Expr {
        Expr::nary(
            TermType::Between,
            self,
            [lower.into(), upper.into(), Expr::from(index)],
        )
    }

    /// Whether a time lies between `start` and `end`.
    pub fn during(&self, start: impl Into<Expr>, end: impl Into<Expr>) -> Expr {
        Expr::nary(TermType::During, self, [start.into(), end.into()])
    }

    /// Lookup by secondary key on the primary index.
    pub fn get_all(&self, key: impl Into<Expr>) -> Expr {
        Expr::nary(TermType::GetAll, self, [key.into()])
    }

    pub fn get_all_index(&self, key: impl Into<Expr>, index: &str) -> Expr {
        Expr::nary(TermType::GetAll, self, [key.into(), Expr::from(index)])
    }

    /// Fold the sequence with a two-parameter function.
    pub fn reduce(&self, f: impl Into<Expr>) -> Expr {
        Expr::nary(TermType::Reduce, self, [Expr::func_arg(f.into(), 2)])
    }

    pub fn reduce_with_base(&self, f: impl Into<Expr>, base: impl Into<Expr>) -> Expr {
        Expr::nary(
            TermType::Reduce,
            self,
            [Expr::func_arg(f.into(), 2), base.into()],
        )
    }

    pub fn grouped_map_reduce(
        &self,
        grouping: impl Into<Expr>,
        mapping: impl Into<Expr>,
        reduction: impl Into<Expr>,
    ) -> Expr {
        Expr::nary(
            TermType::GroupedMapReduce,
            self,
            [
                Expr::func_arg(grouping.into(), 1),
                Expr::func_arg(mapping.into(), 1),
                Expr::func_arg(reduction.into(), 2),
            ],
        )
    }

    pub fn grouped_map_reduce_with_base(
        &self,
        grouping: impl Into<Expr>,
        mapping: impl Into<Expr>,
        reduction: impl Into<Expr>,
        base: impl Into<Expr>,
    ) -> Expr {
        Expr::nary(
            TermType::GroupedMapReduce,
            self,
            [
                Expr::func_arg(grouping.into(), 1),
                Expr::func_arg(mapping.into(), 1),
                Expr::func_arg(reduction.into(), 2),
                base.into(),
            ],
        )
    }

    /// Group by one or more attributes and apply a reduction object built
    /// by [`count`], [`sum`] or [`avg`].
    pub fn group_by<I, S>(&self, attrs: I, reduction: impl Into<Expr>) -> Expr
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let attrs: Vec<Expr> = attrs.into_iter().map(|a| Expr::from(a.into())).collect();
        Expr::nary(
            TermType::GroupBy,
            self,
            [Expr::from(attrs), reduction.into()],
        )
    }

    /// Order by attribute names, [`asc`]/[`desc`] markers or functions.
    pub fn order_by<I, T>(&self, keys: I) -> Expr
    where
        I: IntoIterator<Item = T>,
        T: Into<Expr>,
    {
        Expr::nary(
            TermType::OrderBy,
            self,
            keys.into_iter()
                .map(|k| Expr::func_arg_if_callable(k.into(), 1)),
        )
    }

    pub fn inner_join(&self, other: impl Into<Expr>, predicate: impl Into<Expr>) -> Expr {
        Expr::nary(
            TermType::InnerJoin,
            self,
            [other.into(), Expr::func_arg(predicate.into(), 2)],
        )
    }

    pub fn outer_join(&self, other: impl Into<Expr>, predicate: impl Into<Expr>) -> Expr {
        Expr::nary(
            TermType::OuterJoin,
            self,
            [other.into(), Expr::func_arg(predicate.into(), 2)],
        )
    }

    /// Join on `attr` of the receiver against the primary key of `table`.
    pub fn eq_join(&self, attr: impl Into<Expr>, table: impl Into<Expr>) -> Expr {
        Expr::nary(TermType::EqJoin, self, [attr.into(), table.into()])
    }

    pub fn eq_join_index(&self, attr: impl Into<Expr>, table: impl Into<Expr>, index: &str) -> Expr {
        Expr::nary(
            TermType::EqJoin,
            self,
            [attr.into(), table.into(), Expr::from(index)],
        )
    }

    /// Call `f` with the receiver as its argument.
    pub fn do_(&self, f: impl Into<Expr>) -> Expr {
        let func = Expr::func_arg(f.into(), ANY_ARITY);
        Expr::from_node(
            super::expr::Kind::Term(TermType::Funcall),
            [func, self.clone()].into_iter().collect(),
            true,
        )
    }

    /// Create a secondary index on a table, keyed by the named attribute.
    pub fn index_create(&self, name: &str) -> Expr {
        Expr::nary(TermType::IndexCreate, self, [Expr::from(name)])
    }

    /// Create a secondary index computed by a one-parameter function.
    pub fn index_create_with(&self, name: &str, f: impl Into<Expr>) -> Expr {
        Expr::nary(
            TermType::IndexCreate,
            self,
            [Expr::from(name), Expr::func_arg(f.into(), 1)],
        )
    }

    /// Create a table in the receiver database.
    pub fn table_create(&self, spec: impl Into<TableSpec>) -> Expr {
        Expr::from_node(
            super::expr::Kind::TableCreate(spec.into()),
            [self.clone()].into_iter().collect(),
            true,
        )
    }

    // ------------------------------------------------------------------------
    // Option setters
    // ------------------------------------------------------------------------

    /// Allow reads from out-of-date replicas for tables in this subtree.
    pub fn use_outdated(&self, enabled: bool) -> Expr {
        self.scoped(ScopedOption::UseOutdated(enabled))
    }

    /// `"soft"` or `"hard"` durability for writes in this subtree.
    pub fn durability(&self, durability: &str) -> Expr {
        self.scoped(ScopedOption::Durability(durability.to_string()))
    }

    /// Whether updates and replaces in this subtree must be atomic.
    pub fn atomic(&self, atomic: bool) -> Expr {
        self.scoped(ScopedOption::Atomic(atomic))
    }

    /// Ask single-document writes to return the old and new values.
    pub fn return_values(&self) -> Expr {
        self.scoped(ScopedOption::ReturnValues(true))
    }

    /// `"open"` or `"closed"` lower bound for ranges in this subtree.
    pub fn left_bound(&self, bound: &str) -> Expr {
        self.scoped(ScopedOption::LeftBound(bound.to_string()))
    }

    /// `"open"` or `"closed"` upper bound for ranges in this subtree.
    pub fn right_bound(&self, bound: &str) -> Expr {
        self.scoped(ScopedOption::RightBound(bound.to_string()))
    }

    /// Let inserts in this subtree overwrite existing documents.
    pub fn upsert(&self, upsert: bool) -> Expr {
        self.scoped(ScopedOption::Upsert(upsert))
    }

    /// `"native"` (default) or `"raw"`. Only honored on the outermost chain
    /// of a query; with `"raw"` times are returned as pseudo-type objects.
    pub fn time_format(&self, format: &str) -> Expr {
        self.scoped(ScopedOption::TimeFormat(format.to_string()))
    }
}

// ============================================================================
// Table Spec
// ============================================================================

/// Attributes of a table to create.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSpec {
    pub name: String,
    pub primary_key: Option<String>,
    pub datacenter: Option<String>,
    pub cache_size: Option<i64>,
    pub durability: Option<String>,
}

impl TableSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn primary_key(mut self, key: &str) -> Self {
        self.primary_key = Some(key.to_string());
        self
    }

    pub fn datacenter(mut self, datacenter: &str) -> Self {
        self.datacenter = Some(datacenter.to_string());
        self
    }

    pub fn cache_size(mut self, bytes: i64) -> Self {
        self.cache_size = Some(bytes);
        self
    }

    pub fn durability(mut self, durability: &str) -> Self {
        self.durability = Some(durability.to_string());
        self
    }
}

impl From<&str> for TableSpec {
    fn from(name: &str) -> Self {
        TableSpec::new(name)
    }
}

impl From<String> for TableSpec {
    fn from(name: String) -> Self {
        TableSpec::new(&name)
    }
}

// ============================================================================
// Free constructors
// ============================================================================

/// Wrap a native value.
pub fn expr(value: impl Into<Expr>) -> Expr {
    value.into()
}

/// The implicit row of the surrounding one-parameter function.
pub fn row() -> Expr {
    Expr::row()
}

pub fn db(name: &str) -> Expr {
    Expr::nullary(TermType::Db, [Expr::from(name)])
}

/// A table in the session's default database.
pub fn table(name: &str) -> Expr {
    Expr::nullary(TermType::Table, [Expr::from(name)])
}

pub fn db_create(name: &str) -> Expr {
    Expr::nullary(TermType::DbCreate, [Expr::from(name)])
}

pub fn db_drop(name: &str) -> Expr {
    Expr::nullary(TermType::DbDrop, [Expr::from(name)])
}

pub fn db_list() -> Expr {
    Expr::nullary(TermType::DbList, [])
}

/// Create a table in the session's default database.
pub fn table_create(spec: impl Into<TableSpec>) -> Expr {
    Expr::from_node(
        super::expr::Kind::TableCreate(spec.into()),
        Default::default(),
        false,
    )
}

pub fn table_drop(name: &str) -> Expr {
    Expr::nullary(TermType::TableDrop, [Expr::from(name)])
}

pub fn table_list() -> Expr {
    Expr::nullary(TermType::TableList, [])
}

/// Server-side JavaScript.
pub fn js(body: &str) -> Expr {
    Expr::nullary(TermType::Javascript, [Expr::from(body)])
}

/// Server-side JavaScript with an evaluation timeout in seconds.
pub fn js_with_timeout(body: &str, timeout_secs: f64) -> Expr {
    js(body).with_optarg("timeout", Expr::from(timeout_secs))
}

/// Parse a JSON string on the server.
pub fn json(text: &str) -> Expr {
    Expr::nullary(TermType::Json, [Expr::from(text)])
}

/// Raise a runtime error with `message`.
pub fn error(message: &str) -> Expr {
    Expr::nullary(TermType::Error, [Expr::from(message)])
}

pub fn branch(
    test: impl Into<Expr>,
    then_branch: impl Into<Expr>,
    else_branch: impl Into<Expr>,
) -> Expr {
    Expr::nullary(
        TermType::Branch,
        [test.into(), then_branch.into(), else_branch.into()],
    )
}

/// Replace rather than merge a nested object in `update`.
pub fn literal(value: impl Into<Expr>) -> Expr {
    Expr::nullary(TermType::Literal, [value.into()])
}

/// Ascending order marker for `order_by`.
pub fn asc(key: impl Into<Expr>) -> Expr {
    Expr::nullary(TermType::Asc, [Expr::func_arg_if_callable(key.into(), 1)])
}

/// Descending order marker for `order_by`.
pub fn desc(key: impl Into<Expr>) -> Expr {
    Expr::nullary(TermType::Desc, [Expr::func_arg_if_callable(key.into(), 1)])
}

pub fn now() -> Expr {
    Expr::nullary(TermType::Now, [])
}

/// A date at midnight in `timezone` (e.g. `"Z"`, `"-07:00"`).
pub fn time(year: i32, month: u32, day: u32, timezone: &str) -> Expr {
    Expr::nullary(
        TermType::Time,
        [
            Expr::from(year),
            Expr::from(month),
            Expr::from(day),
            Expr::from(timezone),
        ],
    )
}

/// A full timestamp; `second` may be fractional.
#[allow(clippy::too_many_arguments)]
pub fn time_hms(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: f64,
    timezone: &str,
) -> Expr {
    Expr::nullary(
        TermType::Time,
        [
            Expr::from(year),
            Expr::from(month),
            Expr::from(day),
            Expr::from(hour),
            Expr::from(minute),
            Expr::from(second),
            Expr::from(timezone),
        ],
    )
}

pub fn epoch_time(seconds: impl Into<Expr>) -> Expr {
    Expr::nullary(TermType::EpochTime, [seconds.into()])
}

pub fn iso8601(text: &str) -> Expr {
    Expr::nullary(TermType::Iso8601, [Expr::from(text)])
}

/// Parse an ISO 8601 string lacking an offset in `timezone`.
pub fn iso8601_in(text: &str, timezone: &str) -> Expr {
    iso8601(text).with_optarg("default_timezone", Expr::from(timezone))
}

macro_rules! constant_terms {
    ($($name:ident => $tt:ident),* $(,)?) => {
        $(
            pub fn $name() -> Expr {
                Expr::nullary(TermType::$tt, [])
            }
        )*
    };
}

constant_terms! {
    monday => Monday, tuesday => Tuesday, wednesday => Wednesday,
    thursday => Thursday, friday => Friday, saturday => Saturday, sunday => Sunday,
    january => January, february => February, march => March, april => April,
    may => May, june => June, july => July, august => August,
    september => September, october => October, november => November,
    december => December,
}

// ============================================================================
// Group-by reductions
// ============================================================================

/// Count the rows of each group.
pub fn count() -> Expr {
    reduction("COUNT", Expr::from(true))
}

/// Sum `attr` over each group.
pub fn sum(attr: &str) -> Expr {
    reduction("SUM", Expr::from(attr))
}

/// Average `attr` over each group.
pub fn avg(attr: &str) -> Expr {
    reduction("AVG", Expr::from(attr))
}

fn reduction(kind: &str, value: Expr) -> Expr {
    let mut map = BTreeMap::new();
    map.insert(kind.to_string(), value);
    Expr::from(map)
}
