//! ReQL wire protocol message encoding and decoding.
//!
//! Every message after the handshake is framed as a little-endian `u32`
//! length followed by a protobuf payload (ql2 schema, protocol V0_1).
//! Messages are encoded straight into `BytesMut` without generated code.

use bytes::{Buf, BufMut, BytesMut};

use super::error::{WireError, WireResult};
use crate::query::TermType;

// ============================================================================
// Protocol Constants
// ============================================================================

/// Handshake magic for protocol V0_1, written little-endian on connect.
pub const PROTOCOL_MAGIC: u32 = 0x3f61_ba36;

/// Upper bound accepted for a single frame payload.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Deepest datum or term nesting accepted when decoding.
pub const MAX_DECODE_DEPTH: usize = 256;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

// Query fields
const QUERY_TYPE: u32 = 1;
const QUERY_TERM: u32 = 2;
const QUERY_TOKEN: u32 = 3;
const QUERY_GLOBAL_OPTARGS: u32 = 6;

// Response fields
const RESPONSE_TYPE: u32 = 1;
const RESPONSE_TOKEN: u32 = 2;
const RESPONSE_DATUM: u32 = 3;
const RESPONSE_BACKTRACE: u32 = 4;

// Backtrace / Frame fields
const BACKTRACE_FRAMES: u32 = 1;
const FRAME_TYPE: u32 = 1;
const FRAME_POS: u32 = 2;
const FRAME_OPT: u32 = 3;
const FRAME_TYPE_POS: u64 = 1;
const FRAME_TYPE_OPT: u64 = 2;

// Datum fields
const DATUM_TYPE: u32 = 1;
const DATUM_BOOL: u32 = 2;
const DATUM_NUM: u32 = 3;
const DATUM_STR: u32 = 4;
const DATUM_ARRAY: u32 = 5;
const DATUM_OBJECT: u32 = 6;

const R_NULL: u64 = 1;
const R_BOOL: u64 = 2;
const R_NUM: u64 = 3;
const R_STR: u64 = 4;
const R_ARRAY: u64 = 5;
const R_OBJECT: u64 = 6;

// Term fields
const TERM_TYPE: u32 = 1;
const TERM_DATUM: u32 = 2;
const TERM_ARGS: u32 = 3;
const TERM_OPTARGS: u32 = 4;

// AssocPair fields (shared by Query, Datum and Term)
const PAIR_KEY: u32 = 1;
const PAIR_VAL: u32 = 2;

/// Query kinds sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Start = 1,
    Continue = 2,
    Stop = 3,
}

impl QueryType {
    fn from_u64(v: u64) -> WireResult<Self> {
        match v {
            1 => Ok(QueryType::Start),
            2 => Ok(QueryType::Continue),
            3 => Ok(QueryType::Stop),
            _ => Err(WireError::Protocol(format!("Unknown query type: {}", v))),
        }
    }
}

/// Response kinds sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    SuccessAtom = 1,
    SuccessSequence = 2,
    SuccessPartial = 3,
    ClientError = 16,
    CompileError = 17,
    RuntimeError = 18,
}

impl ResponseType {
    fn from_u64(v: u64) -> WireResult<Self> {
        match v {
            1 => Ok(ResponseType::SuccessAtom),
            2 => Ok(ResponseType::SuccessSequence),
            3 => Ok(ResponseType::SuccessPartial),
            16 => Ok(ResponseType::ClientError),
            17 => Ok(ResponseType::CompileError),
            18 => Ok(ResponseType::RuntimeError),
            _ => Err(WireError::Protocol(format!("Unknown response type: {}", v))),
        }
    }

    /// Whether this response reports a failure.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            ResponseType::ClientError | ResponseType::CompileError | ResponseType::RuntimeError
        )
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Trait for protobuf messages exchanged with the server.
pub trait Message: Sized {
    /// Append the protobuf encoding of this message to `buf`.
    fn encode_to(&self, buf: &mut BytesMut);

    /// Decode a message from a complete protobuf payload.
    fn decode(data: &[u8]) -> WireResult<Self>;

    /// Encode this message into a fresh buffer.
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode_to(&mut buf);
        buf
    }
}

/// A leaf datum as it appears on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum WireDatum {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Array(Vec<WireDatum>),
    Object(Vec<(String, WireDatum)>),
}

impl WireDatum {
    /// The string payload, if this is a string datum.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireDatum::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl Message for WireDatum {
    fn encode_to(&self, buf: &mut BytesMut) {
        match self {
            WireDatum::Null => put_varint_field(buf, DATUM_TYPE, R_NULL),
            WireDatum::Bool(b) => {
                put_varint_field(buf, DATUM_TYPE, R_BOOL);
                put_varint_field(buf, DATUM_BOOL, *b as u64);
            }
            WireDatum::Num(n) => {
                put_varint_field(buf, DATUM_TYPE, R_NUM);
                put_key(buf, DATUM_NUM, WIRE_FIXED64);
                buf.put_f64_le(*n);
            }
            WireDatum::Str(s) => {
                put_varint_field(buf, DATUM_TYPE, R_STR);
                put_bytes_field(buf, DATUM_STR, s.as_bytes());
            }
            WireDatum::Array(items) => {
                put_varint_field(buf, DATUM_TYPE, R_ARRAY);
                for item in items {
                    put_message_field(buf, DATUM_ARRAY, item);
                }
            }
            WireDatum::Object(pairs) => {
                put_varint_field(buf, DATUM_TYPE, R_OBJECT);
                for (key, val) in pairs {
                    put_nested(buf, DATUM_OBJECT, |pair| {
                        put_bytes_field(pair, PAIR_KEY, key.as_bytes());
                        put_message_field(pair, PAIR_VAL, val);
                    });
                }
            }
        }
    }

    fn decode(data: &[u8]) -> WireResult<Self> {
        Self::decode_at(data, 0)
    }
}

impl WireDatum {
    fn decode_at(data: &[u8], depth: usize) -> WireResult<Self> {
        check_depth(depth)?;
        let mut buf = data;
        let mut datum_type = None;
        let mut r_bool = false;
        let mut r_num = 0.0;
        let mut r_str = String::new();
        let mut r_array = Vec::new();
        let mut r_object = Vec::new();

        while !buf.is_empty() {
            let (field, wire_type) = decode_tag(&mut buf)?;
            match (field, wire_type) {
                (DATUM_TYPE, WIRE_VARINT) => datum_type = Some(decode_varint(&mut buf)?),
                (DATUM_BOOL, WIRE_VARINT) => r_bool = decode_varint(&mut buf)? != 0,
                (DATUM_NUM, WIRE_FIXED64) => r_num = decode_f64(&mut buf)?,
                (DATUM_STR, WIRE_LEN) => r_str = decode_string(&mut buf)?,
                (DATUM_ARRAY, WIRE_LEN) => {
                    r_array.push(WireDatum::decode_at(decode_len_delimited(&mut buf)?, depth + 1)?)
                }
                (DATUM_OBJECT, WIRE_LEN) => {
                    let (key, val) = decode_pair(decode_len_delimited(&mut buf)?, |d| {
                        WireDatum::decode_at(d, depth + 1)
                    })?;
                    r_object.push((key, val));
                }
                _ => skip_field(&mut buf, wire_type)?,
            }
        }

        match datum_type {
            Some(R_NULL) => Ok(WireDatum::Null),
            Some(R_BOOL) => Ok(WireDatum::Bool(r_bool)),
            Some(R_NUM) => Ok(WireDatum::Num(r_num)),
            Some(R_STR) => Ok(WireDatum::Str(r_str)),
            Some(R_ARRAY) => Ok(WireDatum::Array(r_array)),
            Some(R_OBJECT) => Ok(WireDatum::Object(r_object)),
            Some(other) => Err(WireError::Protocol(format!(
                "Unknown datum type: {}",
                other
            ))),
            None => Err(WireError::Protocol("Datum without a type".to_string())),
        }
    }
}

/// A node of the lowered query tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub term_type: TermType,
    /// Only set when `term_type` is `DATUM`.
    pub datum: Option<WireDatum>,
    pub args: Vec<Term>,
    pub optargs: Vec<(String, Term)>,
}

impl Term {
    /// A bare term of the given type.
    pub fn new(term_type: TermType) -> Self {
        Self {
            term_type,
            datum: None,
            args: Vec::new(),
            optargs: Vec::new(),
        }
    }

    /// A term with positional arguments.
    pub fn with_args(term_type: TermType, args: Vec<Term>) -> Self {
        Self {
            term_type,
            datum: None,
            args,
            optargs: Vec::new(),
        }
    }

    /// A `DATUM` leaf.
    pub fn datum(datum: WireDatum) -> Self {
        Self {
            term_type: TermType::Datum,
            datum: Some(datum),
            args: Vec::new(),
            optargs: Vec::new(),
        }
    }

    /// Append an opt-arg, replacing any previous value for the same key.
    pub fn set_optarg(&mut self, key: &str, value: Term) {
        if let Some(slot) = self.optargs.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.optargs.push((key.to_string(), value));
        }
    }

    /// Look up an opt-arg by key.
    pub fn optarg(&self, key: &str) -> Option<&Term> {
        self.optargs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

impl Message for Term {
    fn encode_to(&self, buf: &mut BytesMut) {
        put_varint_field(buf, TERM_TYPE, self.term_type.as_i32() as u64);
        if let Some(ref datum) = self.datum {
            put_message_field(buf, TERM_DATUM, datum);
        }
        for arg in &self.args {
            put_message_field(buf, TERM_ARGS, arg);
        }
        for (key, val) in &self.optargs {
            put_nested(buf, TERM_OPTARGS, |pair| {
                put_bytes_field(pair, PAIR_KEY, key.as_bytes());
                put_message_field(pair, PAIR_VAL, val);
            });
        }
    }

    fn decode(data: &[u8]) -> WireResult<Self> {
        Self::decode_at(data, 0)
    }
}

impl Term {
    fn decode_at(data: &[u8], depth: usize) -> WireResult<Self> {
        check_depth(depth)?;
        let mut buf = data;
        let mut term_type = None;
        let mut datum = None;
        let mut args = Vec::new();
        let mut optargs = Vec::new();

        while !buf.is_empty() {
            let (field, wire_type) = decode_tag(&mut buf)?;
            match (field, wire_type) {
                (TERM_TYPE, WIRE_VARINT) => {
                    let raw = decode_varint(&mut buf)? as i32;
                    term_type = Some(TermType::from_i32(raw).ok_or_else(|| {
                        WireError::Protocol(format!("Unknown term type: {}", raw))
                    })?);
                }
                (TERM_DATUM, WIRE_LEN) => {
                    datum = Some(WireDatum::decode_at(decode_len_delimited(&mut buf)?, depth + 1)?)
                }
                (TERM_ARGS, WIRE_LEN) => {
                    args.push(Term::decode_at(decode_len_delimited(&mut buf)?, depth + 1)?)
                }
                (TERM_OPTARGS, WIRE_LEN) => optargs.push(decode_pair(
                    decode_len_delimited(&mut buf)?,
                    |d| Term::decode_at(d, depth + 1),
                )?),
                _ => skip_field(&mut buf, wire_type)?,
            }
        }

        let term_type =
            term_type.ok_or_else(|| WireError::Protocol("Term without a type".to_string()))?;
        Ok(Term {
            term_type,
            datum,
            args,
            optargs,
        })
    }
}

/// A query frame payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub query_type: QueryType,
    pub token: i64,
    pub term: Option<Term>,
    pub global_optargs: Vec<(String, Term)>,
}

impl Query {
    /// Start a new query.
    pub fn start(token: i64, term: Term, global_optargs: Vec<(String, Term)>) -> Self {
        Self {
            query_type: QueryType::Start,
            token,
            term: Some(term),
            global_optargs,
        }
    }

    /// Ask for the next batch of an open stream.
    pub fn continue_stream(token: i64) -> Self {
        Self {
            query_type: QueryType::Continue,
            token,
            term: None,
            global_optargs: Vec::new(),
        }
    }

    /// Abandon an open stream.
    pub fn stop(token: i64) -> Self {
        Self {
            query_type: QueryType::Stop,
            token,
            term: None,
            global_optargs: Vec::new(),
        }
    }
}

impl Message for Query {
    fn encode_to(&self, buf: &mut BytesMut) {
        put_varint_field(buf, QUERY_TYPE, self.query_type as u64);
        if let Some(ref term) = self.term {
            put_message_field(buf, QUERY_TERM, term);
        }
        put_varint_field(buf, QUERY_TOKEN, self.token as u64);
        for (key, val) in &self.global_optargs {
            put_nested(buf, QUERY_GLOBAL_OPTARGS, |pair| {
                put_bytes_field(pair, PAIR_KEY, key.as_bytes());
                put_message_field(pair, PAIR_VAL, val);
            });
        }
    }

    fn decode(data: &[u8]) -> WireResult<Self> {
        let mut buf = data;
        let mut query_type = None;
        let mut token = 0i64;
        let mut term = None;
        let mut global_optargs = Vec::new();

        while !buf.is_empty() {
            let (field, wire_type) = decode_tag(&mut buf)?;
            match (field, wire_type) {
                (QUERY_TYPE, WIRE_VARINT) => {
                    query_type = Some(QueryType::from_u64(decode_varint(&mut buf)?)?)
                }
                (QUERY_TERM, WIRE_LEN) => term = Some(Term::decode(decode_len_delimited(&mut buf)?)?),
                (QUERY_TOKEN, WIRE_VARINT) => token = decode_varint(&mut buf)? as i64,
                (QUERY_GLOBAL_OPTARGS, WIRE_LEN) => global_optargs
                    .push(decode_pair(decode_len_delimited(&mut buf)?, Term::decode)?),
                _ => skip_field(&mut buf, wire_type)?,
            }
        }

        Ok(Query {
            query_type: query_type
                .ok_or_else(|| WireError::Protocol("Query without a type".to_string()))?,
            token,
            term,
            global_optargs,
        })
    }
}

/// One step of the path from the query root to a failing sub-term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Positional argument index.
    Pos(i64),
    /// Opt-arg key.
    Opt(String),
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frame::Pos(pos) => write!(f, "{}", pos),
            Frame::Opt(opt) => write!(f, "{}", opt),
        }
    }
}

impl Message for Frame {
    fn encode_to(&self, buf: &mut BytesMut) {
        match self {
            Frame::Pos(pos) => {
                put_varint_field(buf, FRAME_TYPE, FRAME_TYPE_POS);
                put_varint_field(buf, FRAME_POS, *pos as u64);
            }
            Frame::Opt(opt) => {
                put_varint_field(buf, FRAME_TYPE, FRAME_TYPE_OPT);
                put_bytes_field(buf, FRAME_OPT, opt.as_bytes());
            }
        }
    }

    fn decode(data: &[u8]) -> WireResult<Self> {
        let mut buf = data;
        let mut frame_type = FRAME_TYPE_POS;
        let mut pos = 0i64;
        let mut opt = String::new();

        while !buf.is_empty() {
            let (field, wire_type) = decode_tag(&mut buf)?;
            match (field, wire_type) {
                (FRAME_TYPE, WIRE_VARINT) => frame_type = decode_varint(&mut buf)?,
                (FRAME_POS, WIRE_VARINT) => pos = decode_varint(&mut buf)? as i64,
                (FRAME_OPT, WIRE_LEN) => opt = decode_string(&mut buf)?,
                _ => skip_field(&mut buf, wire_type)?,
            }
        }

        match frame_type {
            FRAME_TYPE_POS => Ok(Frame::Pos(pos)),
            FRAME_TYPE_OPT => Ok(Frame::Opt(opt)),
            other => Err(WireError::Protocol(format!(
                "Unknown frame type: {}",
                other
            ))),
        }
    }
}

/// A response frame payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub response_type: ResponseType,
    pub token: i64,
    pub datums: Vec<WireDatum>,
    pub backtrace: Vec<Frame>,
}

impl Response {
    /// A response with no backtrace.
    pub fn new(response_type: ResponseType, token: i64, datums: Vec<WireDatum>) -> Self {
        Self {
            response_type,
            token,
            datums,
            backtrace: Vec::new(),
        }
    }

    /// The error text carried by an error response (its first datum).
    pub fn error_message(&self) -> String {
        self.datums
            .first()
            .and_then(WireDatum::as_str)
            .unwrap_or("unknown error")
            .to_string()
    }
}

impl Message for Response {
    fn encode_to(&self, buf: &mut BytesMut) {
        put_varint_field(buf, RESPONSE_TYPE, self.response_type as u64);
        put_varint_field(buf, RESPONSE_TOKEN, self.token as u64);
        for datum in &self.datums {
            put_message_field(buf, RESPONSE_DATUM, datum);
        }
        if !self.backtrace.is_empty() {
            put_nested(buf, RESPONSE_BACKTRACE, |bt| {
                for frame in &self.backtrace {
                    put_message_field(bt, BACKTRACE_FRAMES, frame);
                }
            });
        }
    }

    fn decode(data: &[u8]) -> WireResult<Self> {
        let mut buf = data;
        let mut response_type = None;
        let mut token = 0i64;
        let mut datums = Vec::new();
        let mut backtrace = Vec::new();

        while !buf.is_empty() {
            let (field, wire_type) = decode_tag(&mut buf)?;
            match (field, wire_type) {
                (RESPONSE_TYPE, WIRE_VARINT) => {
                    response_type = Some(ResponseType::from_u64(decode_varint(&mut buf)?)?)
                }
                (RESPONSE_TOKEN, WIRE_VARINT) => token = decode_varint(&mut buf)? as i64,
                (RESPONSE_DATUM, WIRE_LEN) => {
                    datums.push(WireDatum::decode(decode_len_delimited(&mut buf)?)?)
                }
                (RESPONSE_BACKTRACE, WIRE_LEN) => {
                    let mut bt = decode_len_delimited(&mut buf)?;
                    while !bt.is_empty() {
                        let (field, wire_type) = decode_tag(&mut bt)?;
                        if field == BACKTRACE_FRAMES && wire_type == WIRE_LEN {
                            backtrace.push(Frame::decode(decode_len_delimited(&mut bt)?)?);
                        } else {
                            skip_field(&mut bt, wire_type)?;
                        }
                    }
                }
                _ => skip_field(&mut buf, wire_type)?,
            }
        }

        Ok(Response {
            response_type: response_type
                .ok_or_else(|| WireError::Protocol("Response without a type".to_string()))?,
            token,
            datums,
            backtrace,
        })
    }
}

// ============================================================================
// Framing
// ============================================================================

/// Encode a message as `len(u32 LE) || payload`.
pub fn frame<M: Message>(msg: &M) -> BytesMut {
    let payload = msg.encode();
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32_le(payload.len() as u32);
    buf.extend_from_slice(&payload);
    buf
}

/// Split one complete frame off the front of `buf`, if present.
///
/// Returns `Ok(None)` when more bytes are needed.
pub fn split_frame(buf: &mut BytesMut) -> WireResult<Option<BytesMut>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::Protocol(format!(
            "Frame length {} exceeds limit",
            len
        )));
    }
    if buf.len() < 4 + len {
        return Ok(None);
    }
    buf.advance(4);
    Ok(Some(buf.split_to(len)))
}

// ============================================================================
// Varint / field helpers
// ============================================================================

#[inline]
fn encode_varint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            break;
        } else {
            buf.put_u8(byte | 0x80);
        }
    }
}

#[inline]
fn put_key(buf: &mut BytesMut, field: u32, wire_type: u8) {
    encode_varint(buf, ((field as u64) << 3) | wire_type as u64);
}

fn put_varint_field(buf: &mut BytesMut, field: u32, value: u64) {
    put_key(buf, field, WIRE_VARINT);
    encode_varint(buf, value);
}

fn put_bytes_field(buf: &mut BytesMut, field: u32, bytes: &[u8]) {
    put_key(buf, field, WIRE_LEN);
    encode_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn put_nested<F: FnOnce(&mut BytesMut)>(buf: &mut BytesMut, field: u32, write: F) {
    let mut inner = BytesMut::new();
    write(&mut inner);
    put_bytes_field(buf, field, &inner);
}

fn put_message_field<M: Message>(buf: &mut BytesMut, field: u32, msg: &M) {
    put_nested(buf, field, |inner| msg.encode_to(inner));
}

fn decode_varint(buf: &mut &[u8]) -> WireResult<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;

    loop {
        if buf.is_empty() {
            return Err(WireError::Protocol(
                "Unexpected end of data in varint".to_string(),
            ));
        }

        let byte = buf[0];
        *buf = &buf[1..];

        result |= ((byte & 0x7F) as u64) << shift;

        if byte & 0x80 == 0 {
            return Ok(result);
        }

        shift += 7;
        if shift >= 64 {
            return Err(WireError::Protocol("Varint too long".to_string()));
        }
    }
}

fn check_depth(depth: usize) -> WireResult<()> {
    if depth > MAX_DECODE_DEPTH {
        return Err(WireError::Protocol(format!(
            "Nesting deeper than {} levels",
            MAX_DECODE_DEPTH
        )));
    }
    Ok(())
}

fn decode_tag(buf: &mut &[u8]) -> WireResult<(u32, u8)> {
    let tag = decode_varint(buf)?;
    Ok(((tag >> 3) as u32, (tag & 0x07) as u8))
}

fn decode_len_delimited<'a>(buf: &mut &'a [u8]) -> WireResult<&'a [u8]> {
    let len = decode_varint(buf)? as usize;
    if buf.len() < len {
        return Err(WireError::Protocol(
            "Truncated length-delimited field".to_string(),
        ));
    }
    let data: &'a [u8] = *buf;
    let (head, tail) = data.split_at(len);
    *buf = tail;
    Ok(head)
}

fn decode_string(buf: &mut &[u8]) -> WireResult<String> {
    let bytes = decode_len_delimited(buf)?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| WireError::Protocol(format!("Invalid UTF-8 in string field: {}", e)))
}

fn decode_f64(buf: &mut &[u8]) -> WireResult<f64> {
    if buf.len() < 8 {
        return Err(WireError::Protocol("Unexpected end of data".to_string()));
    }
    Ok(buf.get_f64_le())
}

fn decode_pair<T, F>(data: &[u8], decode_val: F) -> WireResult<(String, T)>
where
    F: Fn(&[u8]) -> WireResult<T>,
{
    let mut buf = data;
    let mut key = None;
    let mut val = None;

    while !buf.is_empty() {
        let (field, wire_type) = decode_tag(&mut buf)?;
        match (field, wire_type) {
            (PAIR_KEY, WIRE_LEN) => key = Some(decode_string(&mut buf)?),
            (PAIR_VAL, WIRE_LEN) => val = Some(decode_val(decode_len_delimited(&mut buf)?)?),
            _ => skip_field(&mut buf, wire_type)?,
        }
    }

    match (key, val) {
        (Some(key), Some(val)) => Ok((key, val)),
        _ => Err(WireError::Protocol("Incomplete key/value pair".to_string())),
    }
}

fn skip_field(buf: &mut &[u8], wire_type: u8) -> WireResult<()> {
    match wire_type {
        WIRE_VARINT => {
            decode_varint(buf)?;
        }
        WIRE_FIXED64 => {
            if buf.len() < 8 {
                return Err(WireError::Protocol("Unexpected end of data".to_string()));
            }
            *buf = &buf[8..];
        }
        WIRE_LEN => {
            decode_len_delimited(buf)?;
        }
        WIRE_FIXED32 => {
            if buf.len() < 4 {
                return Err(WireError::Protocol("Unexpected end of data".to_string()));
            }
            *buf = &buf[4..];
        }
        _ => {
            return Err(WireError::Protocol(format!(
                "Unknown wire type: {}",
                wire_type
            )));
        }
    }
    Ok(())
}
