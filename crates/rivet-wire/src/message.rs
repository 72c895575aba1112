//! Request and response records
//!
//! Both directions use one top-level sequence of alternating field numbers
//! and values: `[:1, :tag, :2, :verb, :4, $path, ...]`. Absent fields are
//! simply not written, and unknown field numbers are skipped on decode.
//!
//! The verb, field and error numbering below is the server's protocol
//! contract and must be kept in step with the deployed service.

use bytes::Bytes;
use std::fmt;

use crate::{FrameError, Value};

/// Request field numbers
pub mod req {
    pub const TAG: i64 = 1;
    pub const VERB: i64 = 2;
    pub const PATH: i64 = 4;
    pub const VALUE: i64 = 5;
    pub const OFFSET: i64 = 7;
    pub const LIMIT: i64 = 8;
    pub const REV: i64 = 9;
}

/// Response field numbers
pub mod resp {
    pub const TAG: i64 = 1;
    pub const FLAGS: i64 = 2;
    pub const REV: i64 = 3;
    pub const PATH: i64 = 5;
    pub const VALUE: i64 = 6;
    pub const LEN: i64 = 8;
    pub const ERR_CODE: i64 = 100;
    pub const ERR_DETAIL: i64 = 101;
}

/// Response flag bits
pub mod flags {
    /// The response carries a result
    pub const VALID: u32 = 1;
    /// No further responses will arrive for this tag
    pub const DONE: u32 = 2;
}

/// Revision sentinels for SET and DEL
pub mod rev {
    /// Succeed only if the path does not exist yet
    pub const MISSING: i64 = 0;
    /// Overwrite unconditionally
    pub const CLOBBER: i64 = -1;
}

/// Verb codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Set,
    Del,
    Rev,
    Watch,
    Nop,
    Walk,
    GetDir,
    Stat,
}

impl Verb {
    pub fn code(self) -> i64 {
        match self {
            Verb::Get => 1,
            Verb::Set => 2,
            Verb::Del => 3,
            Verb::Rev => 5,
            Verb::Watch => 6,
            Verb::Nop => 7,
            Verb::Walk => 9,
            Verb::GetDir => 14,
            Verb::Stat => 16,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Set => "SET",
            Verb::Del => "DEL",
            Verb::Rev => "REV",
            Verb::Watch => "WATCH",
            Verb::Nop => "NOP",
            Verb::Walk => "WALK",
            Verb::GetDir => "GETDIR",
            Verb::Stat => "STAT",
        }
    }
}

impl TryFrom<i64> for Verb {
    type Error = FrameError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Verb::Get),
            2 => Ok(Verb::Set),
            3 => Ok(Verb::Del),
            5 => Ok(Verb::Rev),
            6 => Ok(Verb::Watch),
            7 => Ok(Verb::Nop),
            9 => Ok(Verb::Walk),
            14 => Ok(Verb::GetDir),
            16 => Ok(Verb::Stat),
            _ => Err(FrameError::UnknownVerb(code)),
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Server error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    TagInUse,
    UnknownVerb,
    /// The contacted node is not authoritative
    Redirect,
    TooLate,
    RevMismatch,
    BadPath,
    MissingArg,
    NotDir,
    IsDir,
    NoEnt,
    Other,
    Unknown(i64),
}

impl ErrorCode {
    pub fn code(self) -> i64 {
        match self {
            ErrorCode::TagInUse => 1,
            ErrorCode::UnknownVerb => 2,
            ErrorCode::Redirect => 3,
            ErrorCode::TooLate => 4,
            ErrorCode::RevMismatch => 5,
            ErrorCode::BadPath => 6,
            ErrorCode::MissingArg => 7,
            ErrorCode::NotDir => 20,
            ErrorCode::IsDir => 21,
            ErrorCode::NoEnt => 22,
            ErrorCode::Other => 127,
            ErrorCode::Unknown(n) => n,
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        match code {
            1 => ErrorCode::TagInUse,
            2 => ErrorCode::UnknownVerb,
            3 => ErrorCode::Redirect,
            4 => ErrorCode::TooLate,
            5 => ErrorCode::RevMismatch,
            6 => ErrorCode::BadPath,
            7 => ErrorCode::MissingArg,
            20 => ErrorCode::NotDir,
            21 => ErrorCode::IsDir,
            22 => ErrorCode::NoEnt,
            127 => ErrorCode::Other,
            n => ErrorCode::Unknown(n),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::TagInUse => f.write_str("TAG_IN_USE"),
            ErrorCode::UnknownVerb => f.write_str("UNKNOWN_VERB"),
            ErrorCode::Redirect => f.write_str("REDIRECT"),
            ErrorCode::TooLate => f.write_str("TOO_LATE"),
            ErrorCode::RevMismatch => f.write_str("REV_MISMATCH"),
            ErrorCode::BadPath => f.write_str("BAD_PATH"),
            ErrorCode::MissingArg => f.write_str("MISSING_ARG"),
            ErrorCode::NotDir => f.write_str("NOTDIR"),
            ErrorCode::IsDir => f.write_str("ISDIR"),
            ErrorCode::NoEnt => f.write_str("NOENT"),
            ErrorCode::Other => f.write_str("OTHER"),
            ErrorCode::Unknown(n) => write!(f, "UNKNOWN({})", n),
        }
    }
}

/// One request frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub tag: u32,
    pub verb: Verb,
    pub path: Option<String>,
    pub value: Option<Bytes>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
    pub rev: Option<i64>,
}

impl Request {
    pub fn new(tag: u32, verb: Verb) -> Self {
        Self {
            tag,
            verb,
            path: None,
            value: None,
            offset: None,
            limit: None,
            rev: None,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut fields = Vec::with_capacity(14);
        push(&mut fields, req::TAG, Value::Int(self.tag as i64));
        push(&mut fields, req::VERB, Value::Int(self.verb.code()));
        if let Some(path) = &self.path {
            push(&mut fields, req::PATH, Value::from(path.as_str()));
        }
        if let Some(value) = &self.value {
            push(&mut fields, req::VALUE, Value::Bytes(value.clone()));
        }
        if let Some(offset) = self.offset {
            push(&mut fields, req::OFFSET, Value::Int(offset));
        }
        if let Some(limit) = self.limit {
            push(&mut fields, req::LIMIT, Value::Int(limit));
        }
        if let Some(rev) = self.rev {
            push(&mut fields, req::REV, Value::Int(rev));
        }
        Value::Seq(fields)
    }

    /// Parse a request frame (server side and test harnesses)
    pub fn from_value(value: &Value) -> Result<Self, FrameError> {
        let mut tag = None;
        let mut verb = None;
        let mut request = Request::new(0, Verb::Nop);

        for (field, v) in fields(value)? {
            match field {
                req::TAG => tag = Some(int_u32(field, v)?),
                req::VERB => verb = Some(Verb::try_from(int(field, v)?)?),
                req::PATH => request.path = Some(string(field, v)?),
                req::VALUE => request.value = Some(bytes(field, v)?),
                req::OFFSET => request.offset = Some(int(field, v)?),
                req::LIMIT => request.limit = Some(int(field, v)?),
                req::REV => request.rev = Some(int(field, v)?),
                _ => {}
            }
        }

        request.tag = tag.ok_or(FrameError::MissingField("tag"))?;
        request.verb = verb.ok_or(FrameError::MissingField("verb"))?;
        Ok(request)
    }
}

/// One response frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub tag: u32,
    pub flags: u32,
    pub rev: Option<i64>,
    pub path: Option<String>,
    pub value: Option<Bytes>,
    pub len: Option<i64>,
    pub err_code: Option<ErrorCode>,
    pub err_detail: Option<String>,
}

impl Response {
    /// A `VALID` result that keeps the tag open
    pub fn valid(tag: u32) -> Self {
        Self {
            tag,
            flags: flags::VALID,
            ..Default::default()
        }
    }

    /// A terminal `VALID|DONE` result
    pub fn valid_done(tag: u32) -> Self {
        Self {
            tag,
            flags: flags::VALID | flags::DONE,
            ..Default::default()
        }
    }

    /// A bare `DONE` marker with no result
    pub fn done(tag: u32) -> Self {
        Self {
            tag,
            flags: flags::DONE,
            ..Default::default()
        }
    }

    pub fn error(tag: u32, code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            tag,
            flags: flags::DONE,
            err_code: Some(code),
            err_detail: Some(detail.into()),
            ..Default::default()
        }
    }

    pub fn with_rev(mut self, rev: i64) -> Self {
        self.rev = Some(rev);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_len(mut self, len: i64) -> Self {
        self.len = Some(len);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.flags & flags::VALID != 0
    }

    pub fn is_done(&self) -> bool {
        self.flags & flags::DONE != 0
    }

    pub fn is_error(&self) -> bool {
        self.err_code.is_some()
    }

    pub fn is_redirect(&self) -> bool {
        self.err_code == Some(ErrorCode::Redirect)
    }

    pub fn to_value(&self) -> Value {
        let mut fields = Vec::with_capacity(16);
        push(&mut fields, resp::TAG, Value::Int(self.tag as i64));
        push(&mut fields, resp::FLAGS, Value::Int(self.flags as i64));
        if let Some(rev) = self.rev {
            push(&mut fields, resp::REV, Value::Int(rev));
        }
        if let Some(path) = &self.path {
            push(&mut fields, resp::PATH, Value::from(path.as_str()));
        }
        if let Some(value) = &self.value {
            push(&mut fields, resp::VALUE, Value::Bytes(value.clone()));
        }
        if let Some(len) = self.len {
            push(&mut fields, resp::LEN, Value::Int(len));
        }
        if let Some(code) = self.err_code {
            push(&mut fields, resp::ERR_CODE, Value::Int(code.code()));
        }
        if let Some(detail) = &self.err_detail {
            push(&mut fields, resp::ERR_DETAIL, Value::from(detail.as_str()));
        }
        Value::Seq(fields)
    }

    pub fn from_value(value: &Value) -> Result<Self, FrameError> {
        let mut tag = None;
        let mut response = Response::default();

        for (field, v) in fields(value)? {
            match field {
                resp::TAG => tag = Some(int_u32(field, v)?),
                resp::FLAGS => response.flags = int_u32(field, v)?,
                resp::REV => response.rev = Some(int(field, v)?),
                resp::PATH => response.path = Some(string(field, v)?),
                resp::VALUE => response.value = Some(bytes(field, v)?),
                resp::LEN => response.len = Some(int(field, v)?),
                resp::ERR_CODE => response.err_code = Some(ErrorCode::from(int(field, v)?)),
                resp::ERR_DETAIL => response.err_detail = Some(string(field, v)?),
                _ => {}
            }
        }

        response.tag = tag.ok_or(FrameError::MissingField("tag"))?;
        Ok(response)
    }
}

fn push(fields: &mut Vec<Value>, field: i64, value: Value) {
    fields.push(Value::Int(field));
    fields.push(value);
}

/// Split a frame into `(field number, value)` pairs
fn fields(value: &Value) -> Result<Vec<(i64, &Value)>, FrameError> {
    let items = value.as_seq().ok_or(FrameError::NotASequence)?;
    if items.len() % 2 != 0 {
        return Err(FrameError::OddLength(items.len()));
    }
    items
        .chunks(2)
        .enumerate()
        .map(|(i, pair)| {
            let field = pair[0].as_int().ok_or(FrameError::FieldNotInt(i * 2))?;
            Ok((field, &pair[1]))
        })
        .collect()
}

fn int(field: i64, value: &Value) -> Result<i64, FrameError> {
    value.as_int().ok_or(FrameError::WrongType { field, expected: "int" })
}

fn int_u32(field: i64, value: &Value) -> Result<u32, FrameError> {
    u32::try_from(int(field, value)?).map_err(|_| FrameError::OutOfRange(field))
}

fn bytes(field: i64, value: &Value) -> Result<Bytes, FrameError> {
    value
        .as_bytes()
        .cloned()
        .ok_or(FrameError::WrongType { field, expected: "bytes" })
}

fn string(field: i64, value: &Value) -> Result<String, FrameError> {
    let b = bytes(field, value)?;
    String::from_utf8(b.to_vec()).map_err(|_| FrameError::InvalidUtf8(field))
}
