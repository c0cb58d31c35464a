use std::borrow::Cow;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::types::{ColumnSize, DbType};

/// A value travelling between generated code and a [`Connection`](crate::Connection).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short rendering for logs. Long text and binary payloads are truncated.
    pub fn to_log_string(&self) -> String {
        match self {
            Value::Null => "NULL".to_owned(),
            Value::Bool(v) => v.to_string(),
            Value::I16(v) => v.to_string(),
            Value::I32(v) => v.to_string(),
            Value::I64(v) => v.to_string(),
            Value::F32(v) => v.to_string(),
            Value::F64(v) => v.to_string(),
            Value::Decimal(v) => v.to_string(),
            Value::Text(v) if v.chars().count() > 64 => {
                format!("{}..", v.chars().take(64).collect::<String>())
            }
            Value::Text(v) => v.clone(),
            Value::Bytes(v) => format!("<{} bytes>", v.len()),
            Value::Uuid(v) => v.to_string(),
            Value::Date(v) => v.to_string(),
            Value::Time(v) => v.to_string(),
            Value::DateTime(v) => v.to_string(),
            Value::DateTimeUtc(v) => v.to_rfc3339(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "bool",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::DateTime(_) => "datetime",
            Value::DateTimeUtc(_) => "datetime with time zone",
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Value::$variant(value.into())
            }
        })+
    };
}

value_from! {
    bool => Bool,
    i8 => I16,
    u8 => I16,
    i16 => I16,
    u16 => I32,
    i32 => I32,
    u32 => I64,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    Decimal => Decimal,
    String => Text,
    Vec<u8> => Bytes,
    Uuid => Uuid,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
    DateTime<Utc> => DateTimeUtc,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Conversion out of a [`Value`] read from a row.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, String>;
}

fn mismatch<T>(expected: &str, value: &Value) -> Result<T, String> {
    Err(format!("expected {}, found {}", expected, value.kind()))
}

macro_rules! int_from_value {
    ($($ty:ty),+) => {
        $(impl FromValue for $ty {
            fn from_value(value: Value) -> Result<Self, String> {
                let wide: i64 = match value {
                    Value::I16(v) => v.into(),
                    Value::I32(v) => v.into(),
                    Value::I64(v) => v,
                    Value::Bool(v) => v.into(),
                    ref other => return mismatch(stringify!($ty), other),
                };
                <$ty>::try_from(wide).map_err(|_| format!("{} out of range for {}", wide, stringify!($ty)))
            }
        })+
    };
}

int_from_value!(i8, u8, i16, u16, i32, u32, i64, u64);

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Bool(v) => Ok(v),
            Value::I16(v) => Ok(v != 0),
            Value::I32(v) => Ok(v != 0),
            ref other => mismatch("bool", other),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::F32(v) => Ok(v),
            Value::F64(v) => Ok(v as f32),
            ref other => mismatch("f32", other),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::F64(v) => Ok(v),
            Value::F32(v) => Ok(v.into()),
            Value::I32(v) => Ok(v.into()),
            ref other => mismatch("f64", other),
        }
    }
}

impl FromValue for Decimal {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Decimal(v) => Ok(v),
            Value::I16(v) => Ok(v.into()),
            Value::I32(v) => Ok(v.into()),
            Value::I64(v) => Ok(v.into()),
            ref other => mismatch("decimal", other),
        }
    }
}

macro_rules! exact_from_value {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(impl FromValue for $ty {
            fn from_value(value: Value) -> Result<Self, String> {
                match value {
                    Value::$variant(v) => Ok(v),
                    ref other => mismatch(stringify!($ty), other),
                }
            }
        })+
    };
}

exact_from_value! {
    String => Text,
    Vec<u8> => Bytes,
    Uuid => Uuid,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
    DateTime<Utc> => DateTimeUtc,
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Static description of a parameter: name and dialect type facets.
///
/// Generated code holds one `ParamSpec` constant per property and binds values
/// through [`ParamSpec::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub db_type: DbType,
    pub size: Option<ColumnSize>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
}

impl ParamSpec {
    pub const fn new(name: &'static str, db_type: DbType) -> Self {
        Self {
            name,
            db_type,
            size: None,
            precision: None,
            scale: None,
        }
    }

    pub const fn with_size(mut self, size: ColumnSize) -> Self {
        self.size = Some(size);
        self
    }

    pub const fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn bind(&self, value: impl Into<Value>) -> Param {
        Param {
            name: Cow::Borrowed(self.name),
            db_type: self.db_type,
            size: self.size,
            precision: self.precision,
            scale: self.scale,
            value: value.into(),
        }
    }
}

/// A typed, bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Parameter name without dialect prefix.
    pub name: Cow<'static, str>,
    pub db_type: DbType,
    pub size: Option<ColumnSize>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub value: Value,
}

impl Param {
    /// Renames the parameter, keeping its type facets and value.
    pub fn renamed(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }
}
