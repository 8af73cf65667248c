//! Zipkin v2 span model.
//!
//! Serializes to the JSON shape the Zipkin `/api/v2/spans` endpoint accepts:
//! camelCase keys, lowercase hex ids, microsecond timestamps, and absent
//! fields left out entirely.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// An id string was not 16 or 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid hex id: {0:?}")]
pub struct ParseIdError(String);

/// 64 or 128-bit trace id. Printed as 16 hex chars when the high half is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(pub u128);

/// 64-bit span id, always printed as 16 hex chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(pub u64);

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >> 64 == 0 {
            write!(f, "{:016x}", self.0)
        } else {
            write!(f, "{:032x}", self.0)
        }
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

impl FromStr for TraceId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !matches!(s.len(), 16 | 32) || !is_lower_hex(s) {
            return Err(ParseIdError(s.to_owned()));
        }
        u128::from_str_radix(s, 16)
            .map(TraceId)
            .map_err(|_| ParseIdError(s.to_owned()))
    }
}

impl FromStr for SpanId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 || !is_lower_hex(s) {
            return Err(ParseIdError(s.to_owned()));
        }
        u64::from_str_radix(s, 16)
            .map(SpanId)
            .map_err(|_| ParseIdError(s.to_owned()))
    }
}

macro_rules! hex_id_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_id_serde!(TraceId);
hex_id_serde!(SpanId);

impl From<u128> for TraceId {
    fn from(id: u128) -> Self {
        Self(id)
    }
}

impl From<u64> for TraceId {
    fn from(id: u64) -> Self {
        Self(u128::from(id))
    }
}

impl From<u64> for SpanId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// RPC role of the span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanKind {
    Client,
    Server,
    Producer,
    Consumer,
}

/// Network context of a node in the trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl Endpoint {
    pub fn service(name: impl Into<String>) -> Self {
        Self {
            service_name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// A timestamped event inside a span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Epoch microseconds.
    pub timestamp: u64,
    pub value: String,
}

/// One operation in a trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub trace_id: TraceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<SpanId>,
    pub id: SpanId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<SpanKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Epoch microseconds of the start of the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// Microseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_endpoint: Option<Endpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// Current wall-clock time in epoch microseconds.
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_micros() as u64)
}

impl Span {
    /// Starts a span now.
    pub fn new(trace_id: impl Into<TraceId>, id: impl Into<SpanId>, name: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            parent_id: None,
            id: id.into(),
            kind: None,
            name: Some(name.into()),
            timestamp: Some(now_micros()),
            duration: None,
            local_endpoint: None,
            remote_endpoint: None,
            annotations: Vec::new(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<SpanId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_local_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.local_endpoint = Some(endpoint);
        self
    }

    pub fn with_remote_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.remote_endpoint = Some(endpoint);
        self
    }

    pub fn with_timestamp(mut self, micros: u64) -> Self {
        self.timestamp = Some(micros);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Records an event at the current time.
    pub fn annotate(&mut self, value: impl Into<String>) {
        self.annotations.push(Annotation {
            timestamp: now_micros(),
            value: value.into(),
        });
    }

    /// Sets the duration from the start timestamp to now.
    ///
    /// Zipkin treats a zero duration as absent, so the result is at least 1.
    pub fn finish(&mut self) {
        self.finish_at(now_micros());
    }

    pub fn finish_at(&mut self, end_micros: u64) {
        if let Some(start) = self.timestamp {
            self.duration = Some(end_micros.saturating_sub(start).max(1));
        }
    }
}
