//! Native datum values and their conversion to and from the wire tree.
//!
//! `marshal` lowers a native [`Datum`] into a term (`DATUM` leaves for
//! scalars, `MAKE_ARRAY` / `MAKE_OBJ` for composites). `unmarshal` lifts a
//! response datum back into a native value, reconstructing timestamps from
//! the reserved `$reql_type$` pseudo-type.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::query::TermType;
use crate::wire::{Term, WireDatum};

/// Maximum nesting of arrays and objects accepted by `marshal`.
pub const MAX_NESTING_DEPTH: usize = 20;

/// Reserved key marking a pseudo-type object.
pub const REQL_TYPE_KEY: &str = "$reql_type$";

const TIME_TYPE: &str = "TIME";
const EPOCH_TIME_KEY: &str = "epoch_time";
const TIMEZONE_KEY: &str = "timezone";

/// A native query value.
///
/// All numbers are doubles; integers widen on the way in.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Datum {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Datum>),
    Object(BTreeMap<String, Datum>),
    Time(DateTime<FixedOffset>),
}

impl Datum {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Datum]> {
        match self {
            Datum::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Datum>> {
        match self {
            Datum::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            Datum::Time(t) => Some(t),
            _ => None,
        }
    }

    /// Field lookup on an object datum.
    pub fn get(&self, key: &str) -> Option<&Datum> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Convert to a JSON value. Times become RFC 3339 strings and integral
    /// numbers become JSON integers so they deserialize into integer types.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Datum::Null => JsonValue::Null,
            Datum::Bool(b) => JsonValue::Bool(*b),
            Datum::Number(n) => number_to_json(*n),
            Datum::String(s) => JsonValue::String(s.clone()),
            Datum::Array(items) => JsonValue::Array(items.iter().map(Datum::to_json).collect()),
            Datum::Object(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Datum::Time(t) => JsonValue::String(t.to_rfc3339()),
        }
    }

    /// Build a datum from a JSON value.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Datum::Null,
            JsonValue::Bool(b) => Datum::Bool(b),
            JsonValue::Number(n) => Datum::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Datum::String(s),
            JsonValue::Array(items) => Datum::Array(items.into_iter().map(Datum::from_json).collect()),
            JsonValue::Object(map) => Datum::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Datum::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Deserialize this datum into any `serde` type.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.to_json()).map_err(|e| Error::Scan(e.to_string()))
    }

    /// Serialize any `serde` type into a datum.
    ///
    /// Fails with `Unmarshalable` for values JSON cannot represent, such as
    /// maps with non-string keys.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Datum::from_json)
            .map_err(|e| Error::Unmarshalable(e.to_string()))
    }
}

fn number_to_json(n: f64) -> JsonValue {
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        JsonValue::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Serialize for Datum {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Datum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        JsonValue::deserialize(deserializer).map(Datum::from_json)
    }
}

macro_rules! datum_from_number {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Datum {
                fn from(v: $t) -> Self {
                    Datum::Number(v as f64)
                }
            }
        )*
    };
}

datum_from_number!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl From<bool> for Datum {
    fn from(v: bool) -> Self {
        Datum::Bool(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::String(v.to_string())
    }
}

impl From<String> for Datum {
    fn from(v: String) -> Self {
        Datum::String(v)
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for Datum {
    fn from(v: DateTime<Tz>) -> Self {
        Datum::Time(v.fixed_offset())
    }
}

impl From<JsonValue> for Datum {
    fn from(v: JsonValue) -> Self {
        Datum::from_json(v)
    }
}

impl From<Vec<Datum>> for Datum {
    fn from(v: Vec<Datum>) -> Self {
        Datum::Array(v)
    }
}

impl From<BTreeMap<String, Datum>> for Datum {
    fn from(v: BTreeMap<String, Datum>) -> Self {
        Datum::Object(v)
    }
}

// ============================================================================
// Marshal
// ============================================================================

/// Lower a native datum into a term tree.
pub fn marshal(datum: &Datum) -> Result<Term> {
    marshal_at(datum, 0)
}

pub(crate) fn marshal_at(datum: &Datum, depth: usize) -> Result<Term> {
    if depth > MAX_NESTING_DEPTH {
        return Err(Error::Unmarshalable(format!(
            "value nesting exceeds {} levels",
            MAX_NESTING_DEPTH
        )));
    }

    match datum {
        Datum::Null => Ok(Term::datum(WireDatum::Null)),
        Datum::Bool(b) => Ok(Term::datum(WireDatum::Bool(*b))),
        Datum::Number(n) => Ok(Term::datum(WireDatum::Num(*n))),
        Datum::String(s) => Ok(Term::datum(WireDatum::Str(s.clone()))),
        Datum::Array(items) => {
            let args = items
                .iter()
                .map(|item| marshal_at(item, depth + 1))
                .collect::<Result<Vec<_>>>()?;
            Ok(Term::with_args(TermType::MakeArray, args))
        }
        Datum::Object(map) => {
            let mut term = Term::new(TermType::MakeObj);
            for (key, value) in map {
                term.optargs.push((key.clone(), marshal_at(value, depth + 1)?));
            }
            Ok(term)
        }
        Datum::Time(t) => Ok(time_term(t)),
    }
}

/// The `MAKE_OBJ` pseudo-type object for a timestamp.
pub(crate) fn time_term(t: &DateTime<FixedOffset>) -> Term {
    let epoch = t.timestamp() as f64 + t.timestamp_subsec_nanos() as f64 / 1e9;
    let mut term = Term::new(TermType::MakeObj);
    term.optargs.push((
        REQL_TYPE_KEY.to_string(),
        Term::datum(WireDatum::Str(TIME_TYPE.to_string())),
    ));
    term.optargs
        .push((EPOCH_TIME_KEY.to_string(), Term::datum(WireDatum::Num(epoch))));
    term.optargs.push((
        TIMEZONE_KEY.to_string(),
        Term::datum(WireDatum::Str(format_offset(t.offset()))),
    ));
    term
}

/// Render an offset as `+HH:MM` / `-HH:MM`.
pub fn format_offset(offset: &FixedOffset) -> String {
    let secs = offset.local_minus_utc();
    let sign = if secs < 0 { '-' } else { '+' };
    let secs = secs.abs();
    format!("{}{:02}:{:02}", sign, secs / 3600, (secs % 3600) / 60)
}

/// Parse `+HH:MM`, `-HH:MM`, `+HHMM`, `+HH` or `Z`.
pub fn parse_offset(tz: &str) -> Option<FixedOffset> {
    if tz == "Z" || tz == "z" {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match tz.as_bytes().first()? {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    if minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

// ============================================================================
// Unmarshal
// ============================================================================

/// Lift a response datum into a native value, reconstructing timestamps.
pub fn unmarshal(wire: &WireDatum) -> Result<Datum> {
    unmarshal_with(wire, true)
}

/// Like [`unmarshal`], optionally leaving pseudo-type objects untouched.
pub fn unmarshal_with(wire: &WireDatum, convert_times: bool) -> Result<Datum> {
    match wire {
        WireDatum::Null => Ok(Datum::Null),
        WireDatum::Bool(b) => Ok(Datum::Bool(*b)),
        WireDatum::Num(n) => Ok(Datum::Number(*n)),
        WireDatum::Str(s) => Ok(Datum::String(s.clone())),
        WireDatum::Array(items) => items
            .iter()
            .map(|item| unmarshal_with(item, convert_times))
            .collect::<Result<Vec<_>>>()
            .map(Datum::Array),
        WireDatum::Object(pairs) => {
            let mut map = BTreeMap::new();
            for (key, value) in pairs {
                map.insert(key.clone(), unmarshal_with(value, convert_times)?);
            }
            if convert_times {
                lift_pseudo_type(map)
            } else {
                Ok(Datum::Object(map))
            }
        }
    }
}

/// Inverse of [`marshal`]: lift a literal term tree into a native value.
///
/// Only `DATUM`, `MAKE_ARRAY` and `MAKE_OBJ` terms are literal.
pub fn unmarshal_term(term: &Term) -> Result<Datum> {
    match term.term_type {
        TermType::Datum => match term.datum {
            Some(ref wire) => unmarshal(wire),
            None => Err(Error::Unmarshalable("DATUM term without a value".to_string())),
        },
        TermType::MakeArray => term
            .args
            .iter()
            .map(unmarshal_term)
            .collect::<Result<Vec<_>>>()
            .map(Datum::Array),
        TermType::MakeObj => {
            let mut map = BTreeMap::new();
            for (key, value) in &term.optargs {
                map.insert(key.clone(), unmarshal_term(value)?);
            }
            lift_pseudo_type(map)
        }
        other => Err(Error::Unmarshalable(format!(
            "{} term is not a literal",
            other
        ))),
    }
}

fn lift_pseudo_type(map: BTreeMap<String, Datum>) -> Result<Datum> {
    match map.get(REQL_TYPE_KEY).and_then(Datum::as_str) {
        Some(TIME_TYPE) => parse_time_object(&map).map(Datum::Time),
        _ => Ok(Datum::Object(map)),
    }
}

fn parse_time_object(map: &BTreeMap<String, Datum>) -> Result<DateTime<FixedOffset>> {
    let epoch = map
        .get(EPOCH_TIME_KEY)
        .and_then(Datum::as_f64)
        .ok_or_else(|| Error::Unmarshalable("TIME object without epoch_time".to_string()))?;
    let offset = match map.get(TIMEZONE_KEY).and_then(Datum::as_str) {
        Some(tz) => parse_offset(tz)
            .ok_or_else(|| Error::Unmarshalable(format!("invalid timezone {:?}", tz)))?,
        None => FixedOffset::east_opt(0)
            .ok_or_else(|| Error::Unmarshalable("invalid UTC offset".to_string()))?,
    };

    if !epoch.is_finite() {
        return Err(Error::Unmarshalable(format!("epoch_time {} out of range", epoch)));
    }

    // Whole seconds are split off first so the fraction keeps its precision;
    // microseconds are the finest step an f64 epoch carries reliably.
    let mut secs = epoch.floor() as i64;
    let mut micros = ((epoch - epoch.floor()) * 1e6).round() as u32;
    if micros >= 1_000_000 {
        secs += 1;
        micros -= 1_000_000;
    }
    let utc: DateTime<Utc> = DateTime::from_timestamp(secs, micros * 1000)
        .ok_or_else(|| Error::Unmarshalable(format!("epoch_time {} out of range", epoch)))?;
    Ok(utc.with_timezone(&offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_time() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(-7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2013, 6, 14, 9, 30, 15)
            .unwrap()
            + chrono::Duration::milliseconds(250)
    }

    #[test]
    fn test_scalar_marshal_produces_datum_terms() {
        let term = marshal(&Datum::from(7)).unwrap();
        assert_eq!(term.term_type, TermType::Datum);
        assert_eq!(term.datum, Some(WireDatum::Num(7.0)));

        let term = marshal(&Datum::Null).unwrap();
        assert_eq!(term.datum, Some(WireDatum::Null));
    }

    #[test]
    fn test_composites_marshal_to_make_terms() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Datum::from(vec![Datum::from(1), Datum::from("x")]));
        let term = marshal(&Datum::Object(map)).unwrap();

        assert_eq!(term.term_type, TermType::MakeObj);
        let inner = term.optarg("a").unwrap();
        assert_eq!(inner.term_type, TermType::MakeArray);
        assert_eq!(inner.args.len(), 2);
    }

    #[test]
    fn test_literal_round_trip() {
        let value = Datum::from_json(serde_json::json!({
            "name": "ada",
            "age": 36,
            "tags": ["x", null, true, 1.5],
            "nested": {"deep": {"deeper": []}}
        }));

        let back = unmarshal_term(&marshal(&value).unwrap()).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_time_marshal_shape() {
        let term = marshal(&Datum::Time(sample_time())).unwrap();

        assert_eq!(term.term_type, TermType::MakeObj);
        assert_eq!(
            term.optarg(REQL_TYPE_KEY).and_then(|t| t.datum.clone()),
            Some(WireDatum::Str("TIME".to_string()))
        );
        assert_eq!(
            term.optarg("timezone").and_then(|t| t.datum.clone()),
            Some(WireDatum::Str("-07:00".to_string()))
        );
        assert_eq!(
            term.optarg("epoch_time").and_then(|t| t.datum.clone()),
            Some(WireDatum::Num(1371227415.25))
        );
    }

    #[test]
    fn test_time_round_trip_keeps_instant_and_offset() {
        let original = sample_time();
        let back = unmarshal_term(&marshal(&Datum::Time(original)).unwrap()).unwrap();

        let t = back.as_time().unwrap();
        assert_eq!(*t, original);
        assert_eq!(t.offset(), original.offset());
    }

    #[test]
    fn test_time_round_trip_keeps_microseconds() {
        let original = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2013, 6, 14, 9, 30, 15)
            .unwrap()
            + chrono::Duration::microseconds(123_456);
        let back = unmarshal_term(&marshal(&Datum::Time(original)).unwrap()).unwrap();

        let t = back.as_time().unwrap();
        assert_eq!(*t, original);
        assert_eq!(t.timestamp_subsec_micros(), 123_456);
        assert_eq!(t.offset(), original.offset());
    }

    #[test]
    fn test_time_before_epoch_round_trip() {
        let original = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(1969, 12, 31, 23, 59, 58)
            .unwrap()
            + chrono::Duration::microseconds(750_001);
        let back = unmarshal_term(&marshal(&Datum::Time(original)).unwrap()).unwrap();

        assert_eq!(*back.as_time().unwrap(), original);
    }

    #[test]
    fn test_unmarshal_wire_time_object() {
        let wire = WireDatum::Object(vec![
            ("$reql_type$".to_string(), WireDatum::Str("TIME".to_string())),
            ("epoch_time".to_string(), WireDatum::Num(0.0)),
            ("timezone".to_string(), WireDatum::Str("+05:30".to_string())),
        ]);

        let datum = unmarshal(&wire).unwrap();
        let t = datum.as_time().unwrap();
        assert_eq!(t.timestamp(), 0);
        assert_eq!(t.offset().local_minus_utc(), 5 * 3600 + 30 * 60);

        let raw = unmarshal_with(&wire, false).unwrap();
        assert!(raw.get(REQL_TYPE_KEY).is_some());
    }

    #[test]
    fn test_depth_limit() {
        let mut value = Datum::from(1);
        for _ in 0..=MAX_NESTING_DEPTH {
            value = Datum::Array(vec![value]);
        }
        assert!(matches!(marshal(&value), Err(Error::Unmarshalable(_))));

        let mut shallow = Datum::from(1);
        for _ in 0..MAX_NESTING_DEPTH {
            shallow = Datum::Array(vec![shallow]);
        }
        assert!(marshal(&shallow).is_ok());
    }

    #[test]
    fn test_non_string_keys_are_unmarshalable() {
        let mut map = std::collections::HashMap::new();
        map.insert((1, 2), "tuple key");
        assert!(matches!(
            Datum::from_serialize(&map),
            Err(Error::Unmarshalable(_))
        ));
    }

    #[test]
    fn test_deserialize_into_integers() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Row {
            id: i64,
            num: u32,
        }

        let datum = Datum::from_json(serde_json::json!({"id": 3, "num": 17}));
        let row: Row = datum.deserialize_into().unwrap();
        assert_eq!(row, Row { id: 3, num: 17 });
    }

    #[test]
    fn test_offset_parsing() {
        assert_eq!(parse_offset("Z").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_offset("-08:00").unwrap().local_minus_utc(), -8 * 3600);
        assert_eq!(parse_offset("+0130").unwrap().local_minus_utc(), 5400);
        assert!(parse_offset("08:00").is_none());
        assert!(parse_offset("+8").is_none());
        assert_eq!(format_offset(&FixedOffset::east_opt(-5400).unwrap()), "-01:30");
    }
}
