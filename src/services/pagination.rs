//! Opaque keyset cursors.
//!
//! A cursor is base64url (no padding) of
//! `{"v":1,"sort":..,"order":..,"value":..,"id":..}` and only resumes the
//! exact sort dimension and direction it was issued for.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::ServiceError;

const CURSOR_VERSION: u8 = 1;

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SortField {
    #[default]
    Date,
    Likes,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Primary sort value of the last row on a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortKey {
    Date(DateTime<Utc>),
    Likes(i64),
}

impl SortKey {
    pub fn field(&self) -> SortField {
        match self {
            SortKey::Date(_) => SortField::Date,
            SortKey::Likes(_) => SortField::Likes,
        }
    }
}

/// Decoded resume position: continue strictly after `(key, id)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cursor {
    pub key: SortKey,
    pub id: Uuid,
    pub order: SortOrder,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CursorToken {
    v: u8,
    sort: SortField,
    order: SortOrder,
    value: Value,
    id: Uuid,
}

impl Cursor {
    pub fn new(key: SortKey, id: Uuid, order: SortOrder) -> Self {
        Self { key, id, order }
    }

    pub fn encode(&self) -> Result<String, ServiceError> {
        let value = match self.key {
            SortKey::Date(ts) => Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
            SortKey::Likes(n) => Value::from(n),
        };
        let token = CursorToken {
            v: CURSOR_VERSION,
            sort: self.key.field(),
            order: self.order,
            value,
            id: self.id,
        };
        let json = serde_json::to_vec(&token)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decodes a cursor issued for the same sort and order. Anything else,
    /// including tampered or foreign tokens, is `InvalidCursor`.
    pub fn decode(raw: &str, sort: SortField, order: SortOrder) -> Result<Self, ServiceError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.trim())
            .map_err(|_| ServiceError::InvalidCursor)?;
        let token: CursorToken =
            serde_json::from_slice(&bytes).map_err(|_| ServiceError::InvalidCursor)?;

        if token.v != CURSOR_VERSION || token.sort != sort || token.order != order {
            return Err(ServiceError::InvalidCursor);
        }

        let key = match (token.sort, &token.value) {
            (SortField::Date, Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|ts| SortKey::Date(ts.with_timezone(&Utc)))
                .map_err(|_| ServiceError::InvalidCursor)?,
            (SortField::Likes, Value::Number(n)) => {
                SortKey::Likes(n.as_i64().ok_or(ServiceError::InvalidCursor)?)
            }
            _ => return Err(ServiceError::InvalidCursor),
        };

        Ok(Self {
            key,
            id: token.id,
            order,
        })
    }
}

/// One page of results plus the cursor for the next one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Clamps a requested page size into `1..=max`, falling back to `default`.
pub fn clamp_page_size(requested: Option<u64>, default: u64, max: u64) -> u64 {
    requested.unwrap_or(default).clamp(1, max.max(1))
}

/// Splits an over-fetched result (`page_size + 1` rows) into a page.
pub fn paginate<T, F>(
    mut rows: Vec<T>,
    page_size: u64,
    cursor_of: F,
) -> Result<Page<T>, ServiceError>
where
    F: Fn(&T) -> Cursor,
{
    let limit = usize::try_from(page_size).unwrap_or(usize::MAX);
    if rows.len() <= limit {
        return Ok(Page {
            items: rows,
            next_cursor: None,
        });
    }
    rows.truncate(limit);
    let next_cursor = match rows.last() {
        Some(last) => Some(cursor_of(last).encode()?),
        None => None,
    };
    Ok(Page {
        items: rows,
        next_cursor,
    })
}
