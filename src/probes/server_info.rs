//! Decoding of the server-info document an instance serves at its root.
//!
//! Two incompatible shapes exist. The current one nests its fields under a
//! block named after the service (`{"cobalt": {...}, "git": {...}}`); the
//! legacy one is flat (`{"version": "7.2-dev", "startTime": "123"}`). The
//! presence of the nested block is the only discriminant.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("server info is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server info is not a JSON object")]
    NotAnObject,

    #[error("server info has no `{0}` block and no version field")]
    MissingVersion(String),
}

/// A decoded server-info document.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerInfo {
    Legacy(LegacyInfo),
    Current(CurrentInfo),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegacyInfo {
    /// Version with any `-dev` marker removed.
    pub version: String,
    pub commit: Option<String>,
    pub branch: Option<String>,
    pub start_time: StartTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CurrentInfo {
    pub version: Option<String>,
    pub start_time: StartTime,
    pub git: Option<GitInfo>,
    /// Bot-challenge site key, present when the instance gates its API.
    pub challenge_site_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GitInfo {
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub remote: Option<String>,
}

/// A reported process start time.
#[derive(Debug, Clone, PartialEq)]
pub enum StartTime {
    Missing,
    Valid(u64),
    /// Present but not a non-negative integer; carries the raw value.
    Invalid(String),
}

impl StartTime {
    fn from_value(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => StartTime::Missing,
            Some(Value::Number(n)) => match n.as_u64() {
                Some(t) => StartTime::Valid(t),
                None => StartTime::Invalid(n.to_string()),
            },
            Some(Value::String(s)) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
                match s.parse() {
                    Ok(t) => StartTime::Valid(t),
                    Err(_) => StartTime::Invalid(s.clone()),
                }
            }
            Some(other) => StartTime::Invalid(scalar(other).unwrap_or_else(|| other.to_string())),
        }
    }

    /// Epoch value to record; anything but a valid time becomes 0.
    pub fn epoch(&self) -> u64 {
        match self {
            StartTime::Valid(t) => *t,
            _ => 0,
        }
    }
}

impl ServerInfo {
    /// Decode a server-info body. `identity_key` names the nested block of
    /// the current variant.
    pub fn parse(body: &str, identity_key: &str) -> Result<Self, ProbeError> {
        let root: Value = serde_json::from_str(body)?;
        let obj = root.as_object().ok_or(ProbeError::NotAnObject)?;

        if let Some(block) = obj.get(identity_key).and_then(Value::as_object) {
            return Ok(ServerInfo::Current(CurrentInfo::from_parts(
                block,
                obj.get("git").and_then(Value::as_object),
            )));
        }

        let version = obj
            .get("version")
            .and_then(scalar)
            .ok_or_else(|| ProbeError::MissingVersion(identity_key.to_string()))?;

        Ok(ServerInfo::Legacy(LegacyInfo {
            version: version.replace("-dev", ""),
            commit: obj.get("commit").and_then(scalar),
            branch: obj.get("branch").and_then(scalar),
            start_time: StartTime::from_value(obj.get("startTime")),
        }))
    }
}

impl CurrentInfo {
    fn from_parts(block: &Map<String, Value>, git: Option<&Map<String, Value>>) -> Self {
        let git = git.map(|g| GitInfo {
            branch: g.get("branch").and_then(scalar),
            commit: g
                .get("commit")
                .and_then(scalar)
                .map(|c| c.chars().take(6).collect()),
            remote: g.get("remote").and_then(scalar),
        });
        Self {
            version: block.get("version").and_then(scalar),
            start_time: StartTime::from_value(block.get("startTime")),
            git,
            challenge_site_key: block.get("turnstileSitekey").and_then(scalar),
        }
    }
}

/// Render a JSON scalar as text; objects, arrays and null yield `None`.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
