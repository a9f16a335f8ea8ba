// ============================================================================
// Kafka Settings
// ============================================================================
//
// Connection settings for the optional Kafka transport. Credentials are read
// as-is; acquiring or refreshing them is the deployment's business.
//
// ============================================================================

use crate::constants::{DEFAULT_KAFKA_BROKERS, DEFAULT_KAFKA_SESSION_TIMEOUT_MS};
use crate::{env_lookup, non_empty};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KafkaSettings {
    /// Comma-separated list of Kafka brokers (e.g., "kafka1:9092,kafka2:9092")
    pub brokers: String,
    /// SSL/TLS enabled
    pub ssl_enabled: bool,
    /// SASL mechanism (e.g., "SCRAM-SHA-256", "PLAIN")
    pub sasl_mechanism: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    /// Path to CA certificate file (for self-signed certificates)
    pub ssl_ca_location: Option<String>,
    pub session_timeout_ms: u32,
}

impl KafkaSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            brokers: non_empty(&lookup, "KAFKA_BROKERS")
                .unwrap_or_else(|| DEFAULT_KAFKA_BROKERS.to_string()),
            ssl_enabled: non_empty(&lookup, "KAFKA_SSL_ENABLED")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(false),
            sasl_mechanism: non_empty(&lookup, "KAFKA_SASL_MECHANISM"),
            sasl_username: non_empty(&lookup, "KAFKA_SASL_USERNAME"),
            sasl_password: non_empty(&lookup, "KAFKA_SASL_PASSWORD"),
            ssl_ca_location: non_empty(&lookup, "KAFKA_SSL_CA_LOCATION"),
            session_timeout_ms: non_empty(&lookup, "KAFKA_SESSION_TIMEOUT_MS")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(DEFAULT_KAFKA_SESSION_TIMEOUT_MS),
        }
    }

    /// SASL mechanism, username and password, if all three are set
    pub fn sasl(&self) -> Option<(&str, &str, &str)> {
        match (&self.sasl_mechanism, &self.sasl_username, &self.sasl_password) {
            (Some(mechanism), Some(username), Some(password)) => {
                Some((mechanism.as_str(), username.as_str(), password.as_str()))
            }
            _ => None,
        }
    }
}
