//! The closed enumeration of wire term types.
//!
//! Numbering follows the ql2 schema spoken by the server. Every variant
//! carries two names: the schema name (used when printing wire terms) and
//! the builder name (used when rendering expressions as method chains).

macro_rules! term_types {
    ($($variant:ident = $value:literal => $wire:literal, $method:literal;)*) => {
        /// Wire term type tag.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(i32)]
        pub enum TermType {
            $($variant = $value,)*
        }

        impl TermType {
            /// Every term type, in schema order.
            pub const ALL: &'static [TermType] = &[$(TermType::$variant,)*];

            /// Look up a term type by its wire number.
            pub fn from_i32(value: i32) -> Option<Self> {
                match value {
                    $($value => Some(TermType::$variant),)*
                    _ => None,
                }
            }

            /// The wire number of this term type.
            #[inline]
            pub fn as_i32(self) -> i32 {
                self as i32
            }

            /// Schema name, e.g. `GET_FIELD`.
            pub fn wire_name(self) -> &'static str {
                match self {
                    $(TermType::$variant => $wire,)*
                }
            }

            /// Builder method name, e.g. `attr`.
            pub fn method_name(self) -> &'static str {
                match self {
                    $(TermType::$variant => $method,)*
                }
            }
        }
    };
}

term_types! {
    Datum = 1 => "DATUM", "expr";
    MakeArray = 2 => "MAKE_ARRAY", "array";
    MakeObj = 3 => "MAKE_OBJ", "object";
    Var = 10 => "VAR", "var";
    Javascript = 11 => "JAVASCRIPT", "js";
    Error = 12 => "ERROR", "error";
    ImplicitVar = 13 => "IMPLICIT_VAR", "row";
    Db = 14 => "DB", "db";
    Table = 15 => "TABLE", "table";
    Get = 16 => "GET", "get";
    GetAll = 78 => "GET_ALL", "get_all";
    Eq = 17 => "EQ", "eq";
    Ne = 18 => "NE", "ne";
    Lt = 19 => "LT", "lt";
    Le = 20 => "LE", "le";
    Gt = 21 => "GT", "gt";
    Ge = 22 => "GE", "ge";
    Not = 23 => "NOT", "not";
    Add = 24 => "ADD", "add";
    Sub = 25 => "SUB", "sub";
    Mul = 26 => "MUL", "mul";
    Div = 27 => "DIV", "div";
    Mod = 28 => "MOD", "modulo";
    Append = 29 => "APPEND", "append";
    Prepend = 80 => "PREPEND", "prepend";
    Difference = 95 => "DIFFERENCE", "difference";
    SetInsert = 88 => "SET_INSERT", "set_insert";
    SetIntersection = 89 => "SET_INTERSECTION", "set_intersection";
    SetUnion = 90 => "SET_UNION", "set_union";
    SetDifference = 91 => "SET_DIFFERENCE", "set_difference";
    Slice = 30 => "SLICE", "slice";
    Skip = 70 => "SKIP", "skip";
    Limit = 71 => "LIMIT", "limit";
    IndexesOf = 87 => "INDEXES_OF", "indexes_of";
    Contains = 93 => "CONTAINS", "contains";
    GetField = 31 => "GET_FIELD", "attr";
    Keys = 94 => "KEYS", "keys";
    HasFields = 32 => "HAS_FIELDS", "has_fields";
    WithFields = 96 => "WITH_FIELDS", "with_fields";
    Pluck = 33 => "PLUCK", "pluck";
    Without = 34 => "WITHOUT", "without";
    Merge = 35 => "MERGE", "merge";
    Between = 36 => "BETWEEN", "between";
    Reduce = 37 => "REDUCE", "reduce";
    Map = 38 => "MAP", "map";
    Filter = 39 => "FILTER", "filter";
    ConcatMap = 40 => "CONCATMAP", "concat_map";
    OrderBy = 41 => "ORDERBY", "order_by";
    Distinct = 42 => "DISTINCT", "distinct";
    Count = 43 => "COUNT", "count";
    IsEmpty = 86 => "IS_EMPTY", "is_empty";
    Union = 44 => "UNION", "union";
    Nth = 45 => "NTH", "nth";
    GroupedMapReduce = 46 => "GROUPED_MAP_REDUCE", "grouped_map_reduce";
    GroupBy = 47 => "GROUPBY", "group_by";
    InnerJoin = 48 => "INNER_JOIN", "inner_join";
    OuterJoin = 49 => "OUTER_JOIN", "outer_join";
    EqJoin = 50 => "EQ_JOIN", "eq_join";
    Zip = 72 => "ZIP", "zip";
    InsertAt = 82 => "INSERT_AT", "insert_at";
    DeleteAt = 83 => "DELETE_AT", "delete_at";
    ChangeAt = 84 => "CHANGE_AT", "change_at";
    SpliceAt = 85 => "SPLICE_AT", "splice_at";
    CoerceTo = 51 => "COERCE_TO", "coerce_to";
    TypeOf = 52 => "TYPEOF", "type_of";
    Update = 53 => "UPDATE", "update";
    Delete = 54 => "DELETE", "delete";
    Replace = 55 => "REPLACE", "replace";
    Insert = 56 => "INSERT", "insert";
    DbCreate = 57 => "DB_CREATE", "db_create";
    DbDrop = 58 => "DB_DROP", "db_drop";
    DbList = 59 => "DB_LIST", "db_list";
    TableCreate = 60 => "TABLE_CREATE", "table_create";
    TableDrop = 61 => "TABLE_DROP", "table_drop";
    TableList = 62 => "TABLE_LIST", "table_list";
    Sync = 138 => "SYNC", "sync";
    IndexCreate = 75 => "INDEX_CREATE", "index_create";
    IndexDrop = 76 => "INDEX_DROP", "index_drop";
    IndexList = 77 => "INDEX_LIST", "index_list";
    IndexStatus = 139 => "INDEX_STATUS", "index_status";
    IndexWait = 140 => "INDEX_WAIT", "index_wait";
    Funcall = 64 => "FUNCALL", "do_";
    Branch = 65 => "BRANCH", "branch";
    Any = 66 => "ANY", "or";
    All = 67 => "ALL", "and";
    ForEach = 68 => "FOREACH", "for_each";
    Func = 69 => "FUNC", "func";
    Asc = 73 => "ASC", "asc";
    Desc = 74 => "DESC", "desc";
    Info = 79 => "INFO", "info";
    Match = 97 => "MATCH", "match_";
    Upcase = 141 => "UPCASE", "upcase";
    Downcase = 142 => "DOWNCASE", "downcase";
    Sample = 81 => "SAMPLE", "sample";
    Default = 92 => "DEFAULT", "default";
    Json = 98 => "JSON", "json";
    Iso8601 = 99 => "ISO8601", "iso8601";
    ToIso8601 = 100 => "TO_ISO8601", "to_iso8601";
    EpochTime = 101 => "EPOCH_TIME", "epoch_time";
    ToEpochTime = 102 => "TO_EPOCH_TIME", "to_epoch_time";
    Now = 103 => "NOW", "now";
    InTimezone = 104 => "IN_TIMEZONE", "in_timezone";
    During = 105 => "DURING", "during";
    Date = 106 => "DATE", "date";
    TimeOfDay = 126 => "TIME_OF_DAY", "time_of_day";
    Timezone = 127 => "TIMEZONE", "timezone";
    Year = 128 => "YEAR", "year";
    Month = 129 => "MONTH", "month";
    Day = 130 => "DAY", "day";
    DayOfWeek = 131 => "DAY_OF_WEEK", "day_of_week";
    DayOfYear = 132 => "DAY_OF_YEAR", "day_of_year";
    Hours = 133 => "HOURS", "hours";
    Minutes = 134 => "MINUTES", "minutes";
    Seconds = 135 => "SECONDS", "seconds";
    Time = 136 => "TIME", "time";
    Monday = 107 => "MONDAY", "monday";
    Tuesday = 108 => "TUESDAY", "tuesday";
    Wednesday = 109 => "WEDNESDAY", "wednesday";
    Thursday = 110 => "THURSDAY", "thursday";
    Friday = 111 => "FRIDAY", "friday";
    Saturday = 112 => "SATURDAY", "saturday";
    Sunday = 113 => "SUNDAY", "sunday";
    January = 114 => "JANUARY", "january";
    February = 115 => "FEBRUARY", "february";
    March = 116 => "MARCH", "march";
    April = 117 => "APRIL", "april";
    May = 118 => "MAY", "may";
    June = 119 => "JUNE", "june";
    July = 120 => "JULY", "july";
    August = 121 => "AUGUST", "august";
    September = 122 => "SEPTEMBER", "september";
    October = 123 => "OCTOBER", "october";
    November = 124 => "NOVEMBER", "november";
    December = 125 => "DECEMBER", "december";
    Literal = 137 => "LITERAL", "literal";
}

impl std::fmt::Display for TermType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}
