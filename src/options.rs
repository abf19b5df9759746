//! Per-call execution options.
//!
//! Every field defaults to what the backing driver does on its own, so a
//! default [`ExecutionOptions`] behaves exactly like a plain driver call:
//! untraced, driver-default consistency and page size, not idempotent,
//! default retry policy, no serial consistency and no paging state.
//!
//! The options map to and from a JSON document with camelCase keys.
//! Fields at their default are left out of the document.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Fetch size sentinel meaning "use the driver default".
pub const DEFAULT_FETCH_SIZE: i32 = -1;

/// What [`DEFAULT_FETCH_SIZE`] resolves to when a statement is built.
pub const DRIVER_DEFAULT_PAGE_SIZE: i32 = 5000;

/// Consistency level of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    LocalOne,
    Serial,
    LocalSerial,
}

/// Consistency level of the Paxos phase of conditional updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SerialConsistency {
    Serial,
    LocalSerial,
}

/// Named retry strategies a request can run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryPolicy {
    /// Timeout-aware retry at the same consistency.
    #[default]
    Default,
    /// Retry at a lower consistency when fewer replicas answer.
    Downgrading,
    /// Never retry.
    Fallthrough,
}

impl Consistency {
    pub const ALL: [Consistency; 11] = [
        Consistency::Any,
        Consistency::One,
        Consistency::Two,
        Consistency::Three,
        Consistency::Quorum,
        Consistency::All,
        Consistency::LocalQuorum,
        Consistency::EachQuorum,
        Consistency::LocalOne,
        Consistency::Serial,
        Consistency::LocalSerial,
    ];

    /// The upper snake case name used in documents and logs.
    pub fn name(self) -> &'static str {
        match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
            Consistency::LocalOne => "LOCAL_ONE",
            Consistency::Serial => "SERIAL",
            Consistency::LocalSerial => "LOCAL_SERIAL",
        }
    }

    /// Whether the level only involves the local datacenter.
    pub fn is_dc_local(self) -> bool {
        matches!(
            self,
            Consistency::LocalQuorum | Consistency::LocalOne | Consistency::LocalSerial
        )
    }
}

impl SerialConsistency {
    pub fn name(self) -> &'static str {
        match self {
            SerialConsistency::Serial => "SERIAL",
            SerialConsistency::LocalSerial => "LOCAL_SERIAL",
        }
    }
}

impl RetryPolicy {
    pub fn name(self) -> &'static str {
        match self {
            RetryPolicy::Default => "DEFAULT",
            RetryPolicy::Downgrading => "DOWNGRADING",
            RetryPolicy::Fallthrough => "FALLTHROUGH",
        }
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for SerialConsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Consistency {
    type Err = ClientError;

    fn from_str(s: &str) -> ClientResult<Self> {
        Consistency::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| ClientError::programming(format!("Unknown consistency level: '{}'", s)))
    }
}

impl FromStr for SerialConsistency {
    type Err = ClientError;

    fn from_str(s: &str) -> ClientResult<Self> {
        match s {
            "SERIAL" => Ok(SerialConsistency::Serial),
            "LOCAL_SERIAL" => Ok(SerialConsistency::LocalSerial),
            _ => Err(ClientError::programming(format!(
                "Unknown serial consistency level: '{}'",
                s
            ))),
        }
    }
}

impl FromStr for RetryPolicy {
    type Err = ClientError;

    fn from_str(s: &str) -> ClientResult<Self> {
        match s {
            "DEFAULT" => Ok(RetryPolicy::Default),
            "DOWNGRADING" => Ok(RetryPolicy::Downgrading),
            "FALLTHROUGH" => Ok(RetryPolicy::Fallthrough),
            _ => Err(ClientError::programming(format!(
                "Unknown retry policy: '{}'. Expected: DEFAULT, DOWNGRADING or FALLTHROUGH",
                s
            ))),
        }
    }
}

/// Opaque continuation token for a paged result.
///
/// Only valid for a statement of the same shape as the one that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PagingState(String);

impl PagingState {
    /// Wrap raw driver paging bytes.
    pub fn from_bytes(raw: &[u8]) -> Self {
        Self(STANDARD.encode(raw))
    }

    /// The raw driver paging bytes.
    pub fn to_bytes(&self) -> ClientResult<Vec<u8>> {
        STANDARD
            .decode(&self.0)
            .map_err(|e| ClientError::programming(format!("Malformed paging state: {}", e)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PagingState {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PagingState {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for PagingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_default_fetch_size(n: &i32) -> bool {
    *n == DEFAULT_FETCH_SIZE
}

fn is_default_retry(p: &RetryPolicy) -> bool {
    *p == RetryPolicy::Default
}

/// Execution options for a single query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionOptions {
    #[serde(skip_serializing_if = "is_false")]
    pub tracing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistency_level: Option<Consistency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_consistency_level: Option<SerialConsistency>,
    /// Client-side write timestamp in microseconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "is_default_fetch_size")]
    pub fetch_size: i32,
    #[serde(skip_serializing_if = "is_false")]
    pub idempotent: bool,
    #[serde(skip_serializing_if = "is_default_retry")]
    pub retry_policy: RetryPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paging_state: Option<PagingState>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            tracing: false,
            consistency_level: None,
            serial_consistency_level: None,
            timestamp: None,
            fetch_size: DEFAULT_FETCH_SIZE,
            idempotent: false,
            retry_policy: RetryPolicy::Default,
            paging_state: None,
        }
    }
}

impl ExecutionOptions {
    /// Options equal to a plain driver call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a server-side trace of the query.
    pub fn tracing(mut self, tracing: bool) -> Self {
        self.tracing = tracing;
        self
    }

    pub fn consistency_level(mut self, level: Consistency) -> Self {
        self.consistency_level = Some(level);
        self
    }

    pub fn serial_consistency_level(mut self, level: SerialConsistency) -> Self {
        self.serial_consistency_level = Some(level);
        self
    }

    /// Set the write timestamp (microseconds since the epoch).
    pub fn timestamp(mut self, micros: i64) -> Self {
        self.timestamp = Some(micros);
        self
    }

    /// Set the page size. [`DEFAULT_FETCH_SIZE`] restores the driver default.
    pub fn fetch_size(mut self, size: i32) -> Self {
        self.fetch_size = size;
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Resume from the token of a previous page of the same statement.
    pub fn paging_state(mut self, state: PagingState) -> Self {
        self.paging_state = Some(state);
        self
    }

    /// Drop the paging token, restarting from the first page.
    pub fn clear_paging_state(mut self) -> Self {
        self.paging_state = None;
        self
    }

    /// Map the options to a JSON document. Defaults are omitted.
    pub fn to_json(&self) -> serde_json::Value {
        // Every field is a plain scalar, serialization cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Rebuild options from a JSON document. Missing keys take defaults,
    /// unknown enum names are rejected.
    pub fn from_json(value: &serde_json::Value) -> ClientResult<Self> {
        Ok(Self::deserialize(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_defaults_mirror_driver() {
        let options = ExecutionOptions::default();
        assert!(!options.tracing);
        assert_eq!(options.consistency_level, None);
        assert_eq!(options.serial_consistency_level, None);
        assert_eq!(options.timestamp, None);
        assert_eq!(options.fetch_size, DEFAULT_FETCH_SIZE);
        assert!(!options.idempotent);
        assert_eq!(options.retry_policy, RetryPolicy::Default);
        assert_eq!(options.paging_state, None);
    }

    #[test]
    fn test_default_options_map_to_empty_document() {
        assert_eq!(ExecutionOptions::default().to_json(), json!({}));
    }

    #[test]
    fn test_explicit_fields_round_trip() {
        let options = ExecutionOptions::new()
            .tracing(true)
            .consistency_level(Consistency::LocalQuorum)
            .serial_consistency_level(SerialConsistency::LocalSerial)
            .timestamp(1_700_000_000_000_000)
            .fetch_size(10)
            .idempotent(true)
            .retry_policy(RetryPolicy::Downgrading)
            .paging_state(PagingState::from_bytes(b"page-2"));

        let doc = options.to_json();
        assert_eq!(
            doc,
            json!({
                "tracing": true,
                "consistencyLevel": "LOCAL_QUORUM",
                "serialConsistencyLevel": "LOCAL_SERIAL",
                "timestamp": 1_700_000_000_000_000i64,
                "fetchSize": 10,
                "idempotent": true,
                "retryPolicy": "DOWNGRADING",
                "pagingState": "cGFnZS0y",
            })
        );
        assert_eq!(ExecutionOptions::from_json(&doc).unwrap(), options);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let options = ExecutionOptions::from_json(&json!({ "fetchSize": 3 })).unwrap();
        assert_eq!(options, ExecutionOptions::new().fetch_size(3));
        assert_eq!(options.to_json(), json!({ "fetchSize": 3 }));
    }

    #[test]
    fn test_unknown_retry_policy_is_programming_error() {
        let err = ExecutionOptions::from_json(&json!({ "retryPolicy": "AGGRESSIVE" })).unwrap_err();
        assert!(matches!(err, ClientError::Programming(_)));

        let err = "AGGRESSIVE".parse::<RetryPolicy>().unwrap_err();
        assert!(err.to_string().contains("Unknown retry policy"));
    }

    #[test]
    fn test_enum_names_parse() {
        for level in Consistency::ALL {
            assert_eq!(level.name().parse::<Consistency>().unwrap(), level);
        }
        assert_eq!(
            "LOCAL_SERIAL".parse::<SerialConsistency>().unwrap(),
            SerialConsistency::LocalSerial
        );
        assert_eq!("FALLTHROUGH".parse::<RetryPolicy>().unwrap(), RetryPolicy::Fallthrough);
        assert!("local_quorum".parse::<Consistency>().is_err());
    }

    #[test]
    fn test_paging_state_bytes() {
        let state = PagingState::from_bytes(&[0, 1, 2, 255]);
        assert_eq!(state.to_bytes().unwrap(), vec![0, 1, 2, 255]);
        assert!(PagingState::from("not base64!").to_bytes().is_err());
    }
}
