//! Client configuration.
//!
//! ```toml
//! contact_points = ["10.0.0.1", "10.0.0.2:9043"]
//! keyspace = "metrics"
//! ```
//!
//! The same keys are accepted as a JSON document.

use std::fmt;
use std::path::{Path, PathBuf};

use nom::{
    IResult,
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, digit1},
    combinator::{all_consuming, map_res, opt},
    sequence::{delimited, preceded},
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ClientError, ClientResult};

/// Port used when a contact point does not name one.
pub const DEFAULT_PORT: u16 = 9042;

/// Configuration document of a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `"host[:port]"` entries. Entries that are not strings are dropped
    /// while reading the document.
    #[serde(deserialize_with = "lenient_contact_points")]
    pub contact_points: Vec<String>,
    /// Keyspace the session starts in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyspace: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ContactPointEntry {
    Text(String),
    Other(serde_json::Value),
}

fn lenient_contact_points<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Vec::<ContactPointEntry>::deserialize(deserializer)?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry {
            ContactPointEntry::Text(point) => Some(point),
            ContactPointEntry::Other(value) => {
                tracing::warn!(contact_point = %value, "skipping contact point that is not a string");
                None
            }
        })
        .collect())
}

/// A parsed contact point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContactPoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for ContactPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Validated cluster definition handed to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterOptions {
    pub contact_points: Vec<ContactPoint>,
    pub keyspace: Option<String>,
}

impl ClientConfig {
    pub fn new<I, S>(contact_points: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            contact_points: contact_points.into_iter().map(Into::into).collect(),
            keyspace: None,
        }
    }

    pub fn keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    /// Read the JSON form of the configuration.
    pub fn from_json(value: &serde_json::Value) -> ClientResult<Self> {
        Self::deserialize(value).map_err(|e| ClientError::config(e.to_string()))
    }

    /// Read the TOML form of the configuration.
    pub fn from_toml_str(input: &str) -> ClientResult<Self> {
        toml::from_str(input).map_err(|e| ClientError::config(e.to_string()))
    }

    /// Load a TOML configuration file.
    pub fn load(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// `<config dir>/<app>/config.toml`, if the platform has a config dir.
    pub fn default_path(app: &str) -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(app).join("config.toml"))
    }

    /// Validate into a cluster definition.
    ///
    /// Malformed contact points are skipped; if none is left the
    /// configuration is rejected.
    pub fn cluster_options(&self) -> ClientResult<ClusterOptions> {
        let mut contact_points = Vec::with_capacity(self.contact_points.len());
        for raw in &self.contact_points {
            match parse_contact_point(raw) {
                Ok(point) => contact_points.push(point),
                Err(e) => tracing::warn!(contact_point = %raw, "skipping contact point: {}", e),
            }
        }

        if contact_points.is_empty() {
            return Err(ClientError::config("None of the given contact points is valid"));
        }

        let keyspace = match &self.keyspace {
            Some(ks) if ks.trim().is_empty() => {
                return Err(ClientError::config("Keyspace must not be blank"));
            }
            other => other.clone(),
        };

        Ok(ClusterOptions {
            contact_points,
            keyspace,
        })
    }
}

/// Parse `host`, `host:port` or `[v6-address]:port`.
pub fn parse_contact_point(input: &str) -> ClientResult<ContactPoint> {
    match all_consuming(contact_point)(input.trim()) {
        Ok((_, (host, port))) => Ok(ContactPoint {
            host: host.to_string(),
            port: port.unwrap_or(DEFAULT_PORT),
        }),
        Err(_) => Err(ClientError::config(format!(
            "Malformed contact point: '{}'",
            input
        ))),
    }
}

fn contact_point(input: &str) -> IResult<&str, (&str, Option<u16>)> {
    let (input, host) = alt((bracketed_host, plain_host))(input)?;
    let (input, port) = opt(preceded(char(':'), port))(input)?;
    Ok((input, (host, port)))
}

fn bracketed_host(input: &str) -> IResult<&str, &str> {
    delimited(
        char('['),
        take_while1(|c: char| c.is_ascii_hexdigit() || c == ':' || c == '.'),
        char(']'),
    )(input)
}

fn plain_host(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '.' || c == '-' || c == '_')(input)
}

fn port(input: &str) -> IResult<&str, u16> {
    map_res(digit1, str::parse::<u16>)(input)
}
