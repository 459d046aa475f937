//! Decisions received from the CrowdSec Local API decision stream.

use serde::{Deserialize, Deserializer};
use std::fmt;

/// The only decision type the bouncer acts on.
pub const BAN: &str = "ban";

/// Address family of a decision value.
///
/// IPv6 is recognized by the presence of a colon in the textual form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub const ALL: [AddressFamily; 2] = [AddressFamily::V4, AddressFamily::V6];

    /// Classify an address string.
    pub fn of(address: &str) -> Self {
        if address.contains(':') {
            AddressFamily::V6
        } else {
            AddressFamily::V4
        }
    }

    /// Label used in remote object names ("ipv4" / "ipv6").
    pub fn label(&self) -> &'static str {
        match self {
            AddressFamily::V4 => "ipv4",
            AddressFamily::V6 => "ipv6",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => f.write_str("IPv4"),
            AddressFamily::V6 => f.write_str("IPv6"),
        }
    }
}

/// A single ban/unban instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Decision {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    pub scenario: String,
    pub duration: String,
    pub scope: String,
    pub origin: String,
}

impl Decision {
    pub fn is_ban(&self) -> bool {
        self.kind == BAN
    }

    #[cfg(test)]
    pub(crate) fn ban(value: &str) -> Self {
        Self {
            kind: BAN.to_string(),
            value: value.to_string(),
            scenario: "crowdsecurity/ssh-bf".to_string(),
            duration: "4h".to_string(),
            scope: "Ip".to_string(),
            origin: "crowdsec".to_string(),
        }
    }
}

/// One poll of the decision stream.
///
/// The Local API sends `null` instead of an empty list; both read as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DecisionBatch {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub new: Vec<Decision>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub deleted: Vec<Decision>,
}

impl DecisionBatch {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.deleted.is_empty()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Decision>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Decision>>::deserialize(deserializer)?.unwrap_or_default())
}
