//! Registry configuration.

use std::time::Duration;

use docodm_core::{OdmError, OdmResult};

pub const ENV_COLLECTION_SUFFIX: &str = "ODM_COLLECTION_SUFFIX";
pub const ENV_STORE_TIMEOUT_MS: &str = "ODM_STORE_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OdmConfig {
    /// Appended to the model name to form its default collection name.
    pub collection_suffix: String,
    /// Deadline applied to every store call; `None` waits indefinitely.
    pub store_timeout: Option<Duration>,
}

impl Default for OdmConfig {
    fn default() -> Self {
        Self {
            collection_suffix: "s".to_string(),
            store_timeout: None,
        }
    }
}

impl OdmConfig {
    pub fn with_collection_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.collection_suffix = suffix.into();
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = Some(timeout);
        self
    }

    /// Defaults overridden by `ODM_COLLECTION_SUFFIX` and
    /// `ODM_STORE_TIMEOUT_MS` when set.
    pub fn from_env() -> OdmResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> OdmResult<Self> {
        let mut config = Self::default();
        if let Some(suffix) = lookup(ENV_COLLECTION_SUFFIX) {
            config.collection_suffix = suffix;
        }
        if let Some(raw) = lookup(ENV_STORE_TIMEOUT_MS) {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                OdmError::invalid_value(ENV_STORE_TIMEOUT_MS, format!("'{raw}' is not a number of milliseconds"))
            })?;
            config.store_timeout = (millis > 0).then(|| Duration::from_millis(millis));
        }
        Ok(config)
    }

    /// Collection used for a model that does not name its own.
    pub fn collection_for(&self, model_name: &str) -> String {
        format!("{model_name}{}", self.collection_suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_pluralize_with_s() {
        let config = OdmConfig::default();
        assert_eq!(config.collection_for("person"), "persons");
        assert_eq!(config.store_timeout, None);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = OdmConfig::from_lookup(lookup(&[
            (ENV_COLLECTION_SUFFIX, "_docs"),
            (ENV_STORE_TIMEOUT_MS, "250"),
        ]))
        .unwrap();
        assert_eq!(config.collection_for("person"), "person_docs");
        assert_eq!(config.store_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn zero_timeout_means_none() {
        let config = OdmConfig::from_lookup(lookup(&[(ENV_STORE_TIMEOUT_MS, "0")])).unwrap();
        assert_eq!(config.store_timeout, None);
    }

    #[test]
    fn malformed_timeout_is_rejected() {
        let err = OdmConfig::from_lookup(lookup(&[(ENV_STORE_TIMEOUT_MS, "soon")])).unwrap_err();
        assert!(matches!(err, OdmError::InvalidValue { .. }));
    }

    #[test]
    fn builders_override_fields() {
        let config = OdmConfig::default()
            .with_collection_suffix("")
            .with_store_timeout(Duration::from_secs(1));
        assert_eq!(config.collection_for("news"), "news");
        assert_eq!(config.store_timeout, Some(Duration::from_secs(1)));
    }
}
