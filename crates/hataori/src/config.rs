//! Engine configuration.

use hataori_core::FlowError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;

/// Environment variable overriding [`EngineConfig::max_cascade_steps`].
pub const MAX_CASCADE_STEPS_VAR: &str = "HATAORI_MAX_CASCADE_STEPS";
/// Environment variable overriding [`EngineConfig::queue_capacity`].
pub const QUEUE_CAPACITY_VAR: &str = "HATAORI_QUEUE_CAPACITY";

static DOTENV_LOADED: OnceLock<()> = OnceLock::new();

/// Configuration for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on cascade steps inside a single transition.
    pub max_cascade_steps: usize,
    /// Buffer size of [`ChannelQueue`](crate::ChannelQueue).
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cascade_steps: 10_000,
            queue_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Loads `.env` once, then applies overrides from the environment on top of
    /// the defaults.
    pub fn from_env() -> Result<Self, FlowError> {
        DOTENV_LOADED.get_or_init(|| {
            // a missing .env file is fine
            let _ = dotenvy::dotenv();
        });
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, FlowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup(MAX_CASCADE_STEPS_VAR) {
            config.max_cascade_steps = parse_var(MAX_CASCADE_STEPS_VAR, &value)?;
        }
        if let Some(value) = lookup(QUEUE_CAPACITY_VAR) {
            config.queue_capacity = parse_var(QUEUE_CAPACITY_VAR, &value)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Sets the cascade bound.
    pub fn with_max_cascade_steps(mut self, steps: usize) -> Self {
        self.max_cascade_steps = steps;
        self
    }

    /// Sets the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Rejects zero bounds.
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.max_cascade_steps == 0 {
            return Err(FlowError::Configuration(
                "max_cascade_steps must be greater than zero".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(FlowError::Configuration(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T, FlowError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        FlowError::Configuration(format!("{} has invalid value '{}': {}", key, value, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).expect("defaults are valid");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_cascade_steps, 10_000);
        assert_eq!(config.queue_capacity, 1024);
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            (MAX_CASCADE_STEPS_VAR, "50"),
            (QUEUE_CAPACITY_VAR, " 8 "),
        ]))
        .expect("valid overrides");
        assert_eq!(config.max_cascade_steps, 50);
        assert_eq!(config.queue_capacity, 8);
    }

    #[test]
    fn test_invalid_values() {
        let result = EngineConfig::from_lookup(lookup(&[(MAX_CASCADE_STEPS_VAR, "lots")]));
        assert!(matches!(result, Err(FlowError::Configuration(_))));

        let result = EngineConfig::from_lookup(lookup(&[(QUEUE_CAPACITY_VAR, "0")]));
        assert!(matches!(result, Err(FlowError::Configuration(_))));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"max_cascade_steps": 3}"#).expect("valid json");
        assert_eq!(config.max_cascade_steps, 3);
        assert_eq!(config.queue_capacity, 1024);
    }
}
