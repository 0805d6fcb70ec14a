//! Interpreter limits for an [`Instance`](crate::Instance).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parser::limits::MAX_MEMORY_PAGES;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to decode configuration: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Resource limits applied while executing code in an instance.
///
/// Missing fields take their default when loaded from JSON, so `{}` is a
/// valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Maximum number of nested call frames
    pub max_call_depth: usize,
    /// Maximum number of operand stack slots across all frames
    pub max_value_stack: usize,
    /// Ceiling on linear memory size, in pages, below any declared maximum
    pub max_memory_pages: u32,
    /// Instruction budget; `None` runs without metering
    pub fuel: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_call_depth: 1024,
            max_value_stack: 1 << 20,
            max_memory_pages: MAX_MEMORY_PAGES,
            fuel: None,
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Config, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.check().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    pub fn with_fuel(mut self, fuel: u64) -> Config {
        self.fuel = Some(fuel);
        self
    }

    pub(crate) fn check(&self) -> Result<(), &'static str> {
        if self.max_call_depth == 0 {
            return Err("max_call_depth must be at least 1");
        }
        if self.max_value_stack == 0 {
            return Err("max_value_stack must be at least 1");
        }
        if self.max_memory_pages > MAX_MEMORY_PAGES {
            return Err("max_memory_pages exceeds the 32-bit address space");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(Config::from_json("{}").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_json() {
        let config = Config::from_json(r#"{"max_call_depth": 16, "fuel": 1000}"#).unwrap();
        assert_eq!(config.max_call_depth, 16);
        assert_eq!(config.fuel, Some(1000));
        assert_eq!(config.max_value_stack, Config::default().max_value_stack);
    }

    #[test]
    fn test_round_trip() {
        let config = Config { max_memory_pages: 4, ..Config::default() }.with_fuel(7);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(Config::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(Config::from_json(r#"{"max_call_depth": 0}"#), Err(ConfigError::Invalid(_))));
        assert!(matches!(Config::from_json(r#"{"max_memory_pages": 65537}"#), Err(ConfigError::Invalid(_))));
        assert!(matches!(Config::from_json(r#"{"stack": 1}"#), Err(ConfigError::Decode(_))));
        assert!(matches!(Config::from_json("[1, 2]"), Err(ConfigError::Decode(_))));
    }
}
