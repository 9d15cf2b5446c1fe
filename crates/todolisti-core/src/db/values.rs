//! Conversions between domain values and libSQL columns

use std::str::FromStr;

use chrono::{DateTime, Utc};
use libsql::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::util::to_millis;

pub fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

pub fn opt_text<S: AsRef<str>>(value: Option<S>) -> Value {
    value.map_or(Value::Null, |value| Value::Text(value.as_ref().to_string()))
}

pub fn integer(value: i64) -> Value {
    Value::Integer(value)
}

pub fn flag(value: bool) -> Value {
    Value::Integer(i64::from(value))
}

pub fn millis(at: &DateTime<Utc>) -> Value {
    Value::Integer(to_millis(at))
}

pub fn opt_millis(at: Option<&DateTime<Utc>>) -> Value {
    at.map_or(Value::Null, |at| Value::Integer(to_millis(at)))
}

pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    Ok(Value::Text(serde_json::to_string(value)?))
}

pub fn opt_json<T: Serialize>(value: Option<&T>) -> Result<Value> {
    value.map_or(Ok(Value::Null), json)
}

/// Parse an id column, reporting corrupt rows as database errors
pub fn parse_id<T: FromStr>(raw: &str, column: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::Database(format!("invalid {column} in store: {raw}")))
}

pub fn parse_opt_id<T: FromStr>(raw: Option<String>, column: &str) -> Result<Option<T>> {
    raw.map(|raw| parse_id(&raw, column)).transpose()
}

/// Parse an enum column stored as text
pub fn parse_enum<T: FromStr>(raw: &str, column: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::Database(format!("invalid {column} in store: {raw}")))
}

pub fn parse_opt_json<T: DeserializeOwned>(raw: Option<String>) -> Result<Option<T>> {
    raw.map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(Error::from)
}
