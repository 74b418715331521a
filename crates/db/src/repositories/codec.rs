//! Column encodings shared by the SQL repositories.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Serialize};

use super::RepositoryError;

/// Fixed-width RFC 3339 so that string comparison in SQL orders by time.
pub(crate) fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn encode_optional_timestamp(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(encode_timestamp)
}

pub(crate) fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value).map(|ts| ts.with_timezone(&Utc)).map_err(|err| {
        RepositoryError::Decode(format!("invalid {field} timestamp '{value}': {err}"))
    })
}

pub(crate) fn parse_optional_timestamp(
    field: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|raw| parse_timestamp(field, &raw)).transpose()
}

pub(crate) fn encode_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_day(field: &str, value: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|err| RepositoryError::Decode(format!("invalid {field} date '{value}': {err}")))
}

pub(crate) fn parse_decimal(field: &str, value: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value)
        .map_err(|err| RepositoryError::Decode(format!("invalid {field} amount '{value}': {err}")))
}

pub(crate) fn parse_optional_decimal(
    field: &str,
    value: Option<String>,
) -> Result<Option<Decimal>, RepositoryError> {
    value.map(|raw| parse_decimal(field, &raw)).transpose()
}

pub(crate) fn encode_json<T: Serialize + ?Sized>(
    field: &str,
    value: &T,
) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|err| RepositoryError::Decode(format!("cannot encode {field}: {err}")))
}

pub(crate) fn parse_json<T: DeserializeOwned>(field: &str, value: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(value)
        .map_err(|err| RepositoryError::Decode(format!("invalid {field} json: {err}")))
}

pub(crate) fn to_u32(field: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{field} out of range: {value}")))
}

pub(crate) fn to_u64(field: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{field} out of range: {value}")))
}

pub(crate) fn decode_enum<T>(
    field: &str,
    value: &str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<T, RepositoryError> {
    parse(value).ok_or_else(|| RepositoryError::Decode(format!("unknown {field} '{value}'")))
}

const NANOS_SCALE: u32 = 9;

/// Cost in billionths of the billing currency, for exact integer aggregation.
pub(crate) fn cost_to_nanos(cost: Decimal) -> Result<i64, RepositoryError> {
    let mut scaled = cost.round_dp(NANOS_SCALE);
    scaled.rescale(NANOS_SCALE);
    i64::try_from(scaled.mantissa())
        .map_err(|_| RepositoryError::Decode(format!("cost out of range: {cost}")))
}

pub(crate) fn cost_from_nanos(nanos: i64) -> Decimal {
    Decimal::new(nanos, NANOS_SCALE).normalize()
}
