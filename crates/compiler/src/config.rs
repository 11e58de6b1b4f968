//! Compiler configuration.

use serde::{Deserialize, Serialize};

use crate::error::CompileError;

/// Knobs for a [`Compiler`](crate::Compiler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Cap on distinct cindexes during dependency expansion.
    pub max_cindexes: usize,
    /// Run `NnetComputation::check()` on every compiled computation.
    pub check_computation: bool,
    /// Record which cindexes each matrix row holds.
    pub output_debug_info: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            max_cindexes: 1 << 22,
            check_computation: true,
            output_debug_info: true,
        }
    }
}

impl CompilerConfig {
    /// Set the cindex cap.
    pub fn with_max_cindexes(mut self, max: usize) -> Self {
        self.max_cindexes = max;
        self
    }

    pub fn with_check_computation(mut self, check: bool) -> Self {
        self.check_computation = check;
        self
    }

    pub fn with_debug_info(mut self, debug_info: bool) -> Self {
        self.output_debug_info = debug_info;
        self
    }

    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, CompileError> {
        let config: Self = serde_json::from_str(json).map_err(|e| CompileError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CompileError> {
        if self.max_cindexes == 0 {
            return Err(CompileError::InvalidConfig {
                reason: "max_cindexes must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_fills_defaults() {
        let config = CompilerConfig::from_json(r#"{"max_cindexes": 500}"#).unwrap();
        assert_eq!(config.max_cindexes, 500);
        assert!(config.check_computation);
        assert!(config.output_debug_info);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            CompilerConfig::from_json("{not json"),
            Err(CompileError::InvalidConfig { .. })
        ));
        assert!(matches!(
            CompilerConfig::from_json(r#"{"max_cindexes": 0}"#),
            Err(CompileError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_builder_setters() {
        let config = CompilerConfig::default()
            .with_max_cindexes(10)
            .with_check_computation(false)
            .with_debug_info(false);
        assert_eq!(config.max_cindexes, 10);
        assert!(!config.check_computation);
        assert!(!config.output_debug_info);
    }
}
