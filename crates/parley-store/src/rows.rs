//! Column decoding helpers shared by the per-table modules.
//!
//! Parse failures are surfaced as `FromSqlConversionFailure` so that they flow
//! through rusqlite's own row-mapping error path.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use parley_shared::models::ProfileSnapshot;
use parley_shared::ProfileId;
use rusqlite::types::Type;
use rusqlite::Row;
use uuid::Uuid;

/// Fixed-width RFC 3339 so text comparison matches time order.
pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn id_col<T: From<Uuid>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map(T::from)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_id_col<T: From<Uuid>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        Uuid::parse_str(&s)
            .map(T::from)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn parse_ts(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw, idx)
}

pub(crate) fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_ts(&s, idx)).transpose()
}

pub(crate) fn enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Build a profile snapshot from `username, display_name, avatar_url` columns
/// starting at `first`, as produced by a `LEFT JOIN profiles`. A removed
/// profile yields a placeholder so the row stays renderable.
pub(crate) fn snapshot_cols(
    row: &Row<'_>,
    id: ProfileId,
    first: usize,
) -> rusqlite::Result<ProfileSnapshot> {
    let username: Option<String> = row.get(first)?;
    let display_name: Option<String> = row.get(first + 1)?;
    let username = username.unwrap_or_else(|| crate::DELETED_USERNAME.to_string());
    Ok(ProfileSnapshot {
        id,
        display_name: display_name.unwrap_or_else(|| username.clone()),
        username,
        avatar_url: row.get(first + 2)?,
    })
}
