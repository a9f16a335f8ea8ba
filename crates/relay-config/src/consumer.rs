// ============================================================================
// Consumer Settings
// ============================================================================

use relay_types::{DeliveryType, Topic};

use crate::constants::{DEFAULT_MAX_RETRIES, DEFAULT_RUST_LOG};
use crate::{env_lookup, non_empty};

/// Consumer settings read from the environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Project owning the subscriptions (RELAY_PROJECT)
    pub project: String,
    /// Region of the subscriptions (RELAY_REGION)
    pub region: String,
    /// Comma-separated subscription names (RELAY_TOPICS)
    pub topics: Vec<Topic>,
    /// RELAY_DELIVERY, defaults to at_least_once.
    /// `None` when the variable holds an unrecognized value.
    pub delivery: Option<DeliveryType>,
    /// Retry ceiling (RELAY_MAX_RETRIES)
    pub max_retries: u32,
    /// Log filter directive (RUST_LOG)
    pub rust_log: String,
}

impl ConsumerSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    /// Build settings from an arbitrary key lookup (environment, file, map)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let topics = non_empty(&lookup, "RELAY_TOPICS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(Topic::from)
                    .collect()
            })
            .unwrap_or_default();

        let delivery = match non_empty(&lookup, "RELAY_DELIVERY") {
            Some(raw) => raw.parse().ok(),
            None => Some(DeliveryType::AtLeastOnce),
        };

        Self {
            project: non_empty(&lookup, "RELAY_PROJECT").unwrap_or_default(),
            region: non_empty(&lookup, "RELAY_REGION").unwrap_or_default(),
            topics,
            delivery,
            max_retries: non_empty(&lookup, "RELAY_MAX_RETRIES")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(DEFAULT_MAX_RETRIES),
            rust_log: non_empty(&lookup, "RUST_LOG")
                .unwrap_or_else(|| DEFAULT_RUST_LOG.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let settings = ConsumerSettings::from_lookup(|_| None);

        assert!(settings.project.is_empty());
        assert!(settings.region.is_empty());
        assert!(settings.topics.is_empty());
        assert_eq!(settings.delivery, Some(DeliveryType::AtLeastOnce));
        assert_eq!(settings.max_retries, 2);
        assert_eq!(settings.rust_log, "info");
    }

    #[test]
    fn test_topics_are_split_and_trimmed() {
        let settings = ConsumerSettings::from_lookup(lookup_from(&[(
            "RELAY_TOPICS",
            " spans, logs ,,metrics ",
        )]));

        assert_eq!(
            settings.topics,
            vec![Topic::from("spans"), Topic::from("logs"), Topic::from("metrics")]
        );
    }

    #[test]
    fn test_unrecognized_delivery_is_none() {
        let settings =
            ConsumerSettings::from_lookup(lookup_from(&[("RELAY_DELIVERY", "exactly_once")]));
        assert_eq!(settings.delivery, None);

        let settings =
            ConsumerSettings::from_lookup(lookup_from(&[("RELAY_DELIVERY", "at-most-once")]));
        assert_eq!(settings.delivery, Some(DeliveryType::AtMostOnce));
    }

    #[test]
    fn test_malformed_max_retries_falls_back() {
        let settings =
            ConsumerSettings::from_lookup(lookup_from(&[("RELAY_MAX_RETRIES", "many")]));
        assert_eq!(settings.max_retries, DEFAULT_MAX_RETRIES);

        let settings = ConsumerSettings::from_lookup(lookup_from(&[("RELAY_MAX_RETRIES", "5")]));
        assert_eq!(settings.max_retries, 5);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("RELAY_PROJECT", "acme");
        std::env::set_var("RELAY_REGION", "europe-west1");
        std::env::set_var("RELAY_TOPICS", "spans");

        let settings = ConsumerSettings::from_env();

        std::env::remove_var("RELAY_PROJECT");
        std::env::remove_var("RELAY_REGION");
        std::env::remove_var("RELAY_TOPICS");

        assert_eq!(settings.project, "acme");
        assert_eq!(settings.region, "europe-west1");
        assert_eq!(settings.topics, vec![Topic::from("spans")]);
    }
}
