// ============================================================================
// Delivery Guarantees & Topics
// ============================================================================
//
// AtMostOnce:  acknowledge BEFORE processing. A failure after that point
//              never causes redelivery.
// AtLeastOnce: acknowledge only AFTER processing succeeded. Failed messages
//              are redelivered by the transport, up to the retry ceiling.
//
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Acknowledgement policy of a consumer, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryType {
    AtMostOnce,
    AtLeastOnce,
}

impl DeliveryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryType::AtMostOnce => "at_most_once",
            DeliveryType::AtLeastOnce => "at_least_once",
        }
    }
}

impl fmt::Display for DeliveryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown delivery type: {0:?}")]
pub struct UnknownDeliveryType(pub String);

impl FromStr for DeliveryType {
    type Err = UnknownDeliveryType;

    /// Accepts snake_case, kebab-case and CamelCase spellings, case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "atmostonce" => Ok(DeliveryType::AtMostOnce),
            "atleastonce" => Ok(DeliveryType::AtLeastOnce),
            _ => Err(UnknownDeliveryType(s.to_string())),
        }
    }
}

/// Name of a topic (and of the subscription attached to it)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Self(name)
    }
}
