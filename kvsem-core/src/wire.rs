//! Consul-compatible JSON shapes for the session and KV endpoints.
//! Shared by the HTTP client and the local server so both speak the same
//! dialect.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::StoreError;
use crate::types::{KvEntry, SessionBehavior, SessionInfo, SessionRequest};

/// Consul refuses session TTLs above a day
pub const MAX_SESSION_TTL: Duration = Duration::from_secs(86_400);

/// Longer lock delays are clamped, as Consul does
pub const MAX_LOCK_DELAY: Duration = Duration::from_secs(60);

/// A key as returned by `GET /v1/kv/<key>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KvPairJson {
    pub key: String,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
    #[serde(default)]
    pub lock_index: u64,
    #[serde(default)]
    pub flags: u64,
    /// Base64; `null` for empty values
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl From<&KvEntry> for KvPairJson {
    fn from(entry: &KvEntry) -> Self {
        Self {
            key: entry.key.clone(),
            create_index: entry.create_index,
            modify_index: entry.modify_index,
            lock_index: entry.lock_index,
            flags: 0,
            value: if entry.value.is_empty() {
                None
            } else {
                Some(STANDARD.encode(&entry.value))
            },
            session: entry.session.clone(),
        }
    }
}

impl TryFrom<KvPairJson> for KvEntry {
    type Error = StoreError;

    fn try_from(pair: KvPairJson) -> Result<Self, Self::Error> {
        let value = match pair.value {
            Some(encoded) => STANDARD.decode(encoded.as_bytes()).map_err(|e| {
                StoreError::Protocol(format!("value of '{}' is not base64: {}", pair.key, e))
            })?,
            None => Vec::new(),
        };

        Ok(KvEntry {
            key: pair.key,
            value,
            create_index: pair.create_index,
            modify_index: pair.modify_index,
            lock_index: pair.lock_index,
            session: pair.session.filter(|s| !s.is_empty()),
        })
    }
}

/// Body of `PUT /v1/session/create`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionCreateJson {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_delay: Option<String>,
    #[serde(rename = "TTL", default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<SessionBehavior>,
}

impl From<&SessionRequest> for SessionCreateJson {
    fn from(request: &SessionRequest) -> Self {
        Self {
            name: request.name.clone(),
            lock_delay: Some(format_duration(request.lock_delay)),
            ttl: (!request.ttl.is_zero()).then(|| format_duration(request.ttl)),
            behavior: Some(request.behavior),
        }
    }
}

impl TryFrom<SessionCreateJson> for SessionRequest {
    type Error = StoreError;

    fn try_from(body: SessionCreateJson) -> Result<Self, Self::Error> {
        let ttl = match body.ttl.as_deref() {
            Some(ttl) => parse_duration(ttl)?,
            None => Duration::ZERO,
        };
        if ttl > MAX_SESSION_TTL {
            return Err(StoreError::Protocol(format!(
                "session TTL {} exceeds {}",
                format_duration(ttl),
                format_duration(MAX_SESSION_TTL)
            )));
        }
        // Consul's default lock delay
        let lock_delay = match body.lock_delay.as_deref() {
            Some(delay) => parse_duration(delay)?,
            None => Duration::from_secs(15),
        };

        Ok(SessionRequest {
            name: body.name,
            lock_delay: lock_delay.min(MAX_LOCK_DELAY),
            ttl,
            behavior: body.behavior.unwrap_or(SessionBehavior::Release),
        })
    }
}

/// Response of `PUT /v1/session/create`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdJson {
    #[serde(rename = "ID")]
    pub id: String,
}

/// Element of `/v1/session/info`, `/v1/session/list` and renew responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionInfoJson {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub behavior: SessionBehavior,
    /// Nanoseconds
    pub lock_delay: u64,
    #[serde(rename = "TTL")]
    pub ttl: String,
}

impl From<&SessionInfo> for SessionInfoJson {
    fn from(info: &SessionInfo) -> Self {
        Self {
            id: info.id.clone(),
            name: info.name.clone(),
            behavior: info.behavior,
            lock_delay: info.lock_delay_ms.saturating_mul(1_000_000),
            ttl: if info.ttl_ms == 0 {
                String::new()
            } else {
                format_duration(Duration::from_millis(info.ttl_ms))
            },
        }
    }
}

/// Formats as whole seconds (`"15s"`) when possible, milliseconds otherwise.
pub fn format_duration(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Parses `"500ms"`, `"15s"`, `"2m"`, `"1h"`. A bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, StoreError> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);

    let amount: u64 = digits
        .parse()
        .map_err(|_| StoreError::Protocol(format!("invalid duration '{}'", s)))?;

    let secs = |factor: u64| {
        amount
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| StoreError::Protocol(format!("duration '{}' out of range", s)))
    };

    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "" | "s" => secs(1),
        "m" => secs(60),
        "h" => secs(3600),
        _ => Err(StoreError::Protocol(format!(
            "invalid duration unit '{}' in '{}'",
            unit, s
        ))),
    }
}
