use serde::Deserialize;

use crate::error::{Error, Result};

/// Number of passes the engine runs when nothing else is configured.
pub const DEFAULT_MAX_PASSES: usize = 5;

/// Tunables for a [`Decoder`](crate::Decoder) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Upper bound on detect-and-rewrite passes. The loop may stop earlier
    /// once the buffer stabilizes.
    pub max_passes: usize,
}

impl DecoderConfig {
    /// Creates a configuration with the given pass budget.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `max_passes` is zero.
    pub fn new(max_passes: usize) -> Result<Self> {
        let config = Self { max_passes };
        config.validate()?;
        Ok(config)
    }

    /// Checks a configuration that was built by hand or deserialized.
    pub fn validate(&self) -> Result<()> {
        if self.max_passes == 0 {
            return Err(Error::InvalidConfig("max_passes must be at least 1"));
        }
        Ok(())
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        assert_eq!(DecoderConfig::default().max_passes, 5);
        assert!(DecoderConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_passes() {
        let err = DecoderConfig::new(0).unwrap_err();
        assert_eq!(err, Error::InvalidConfig("max_passes must be at least 1"));
    }

    #[test]
    fn test_deserialize() {
        let config: DecoderConfig = serde_json::from_str(r#"{"max_passes": 2}"#).unwrap();
        assert_eq!(config.max_passes, 2);

        let config: DecoderConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, DecoderConfig::default());
    }
}
