//! # Replies
//!
//! Purpose: Typed access to one decoded response body, plus the status
//! token vocabulary and the composite-key helper.
//!
//! ## Design Principles
//! 1. **Order Is Data**: A reply is an ordered block sequence; hash-style
//!    replies pair even/odd positions.
//! 2. **Lenient Accessors**: Numeric and boolean accessors return zero
//!    values on parse failure instead of erroring.
//! 3. **Borrow-Friendly API**: `Reply` derefs to `[String]`.

use std::collections::HashMap;
use std::ops::Deref;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::proto::Arg;

/// Success status token.
pub const STATUS_OK: &str = "ok";
/// Key-missing status token.
pub const STATUS_NOT_FOUND: &str = "not_found";
/// Generic server error status token.
pub const STATUS_ERROR: &str = "error";
/// Operation failure status token.
pub const STATUS_FAIL: &str = "fail";
/// Malformed-request status token.
pub const STATUS_CLIENT_ERROR: &str = "client_error";

/// Result of one command exchange.
pub type Outcome = Result<Reply>;

/// One decoded response body with the status token stripped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply(pub Vec<String>);

impl Reply {
    /// First payload block, or the empty string.
    pub fn first(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or("")
    }

    /// First block parsed as a signed integer, zero on failure.
    pub fn int(&self) -> i64 {
        self.first().parse().unwrap_or(0)
    }

    /// First block parsed as an unsigned integer, zero on failure.
    pub fn uint(&self) -> u64 {
        self.first().parse().unwrap_or(0)
    }

    /// First block parsed as a float, zero on failure.
    pub fn float(&self) -> f64 {
        self.first().parse().unwrap_or(0.0)
    }

    /// First block parsed as a strict boolean token, false on failure.
    pub fn bool(&self) -> bool {
        parse_bool(self.first()).unwrap_or(false)
    }

    /// All payload blocks in order.
    pub fn list(&self) -> &[String] {
        &self.0
    }

    /// Even/odd positions paired up as hash entries.
    pub fn hash(&self) -> Vec<Entry> {
        self.0
            .chunks_exact(2)
            .map(|pair| Entry {
                key: pair[0].clone(),
                value: pair[1].clone(),
            })
            .collect()
    }

    /// Even/odd positions collected into a map.
    pub fn map(&self) -> HashMap<String, String> {
        self.0
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect()
    }

    /// Deserializes the first block as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(self.first())
            .map_err(|err| Error::Argument(format!("reply is not valid json: {err}")))
    }
}

impl Deref for Reply {
    type Target = [String];

    fn deref(&self) -> &[String] {
        &self.0
    }
}

/// One key/value pair from a hash-style reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
}

impl Entry {
    /// Deserializes the entry value as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.value)
            .map_err(|err| Error::Argument(format!("entry value is not valid json: {err}")))
    }
}

/// Parses the strict boolean token vocabulary.
pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Builds a composite key from heterogeneous components: each component is
/// stringified and trimmed, empty components are skipped, and the rest are
/// joined with `:`. Repeated strings are joined with `_` first.
pub fn make_key(parts: &[Arg]) -> String {
    let mut rendered = Vec::with_capacity(parts.len());
    for part in parts {
        let s = match part {
            Arg::Str(s) => s.trim().to_string(),
            Arg::Bytes(b) => String::from_utf8_lossy(b).trim().to_string(),
            Arg::Repeated(items) => items.join("_"),
            Arg::Int(v) => v.to_string(),
            Arg::Uint(v) => v.to_string(),
            Arg::Float(v) => format!("{v:.6}"),
            Arg::Bool(v) => (if *v { "1" } else { "0" }).to_string(),
            Arg::Null | Arg::Opaque(_) => String::new(),
        };
        if !s.is_empty() {
            rendered.push(s);
        }
    }
    rendered.join(":")
}
