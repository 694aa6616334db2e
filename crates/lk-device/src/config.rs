//! Runtime configuration for the orchestration layer.

use std::fmt;
use std::str::FromStr;

use lk_tensor::Activation;

use crate::error::{LinearError, Result};

pub const ENV_STRATEGY: &str = "LK_MATMUL_STRATEGY";
pub const ENV_ACTIVATION: &str = "LK_ACTIVATION";
pub const ENV_MIXED_PRECISION: &str = "LK_MIXED_PRECISION";

/// How the matrix product of a linear layer is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MatmulStrategy {
    /// The crate's own shared-memory tiled kernel.
    #[default]
    Tiled,
    /// A caller-supplied vendor BLAS context.
    Vendor,
}

impl fmt::Display for MatmulStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatmulStrategy::Tiled => write!(f, "tiled"),
            MatmulStrategy::Vendor => write!(f, "vendor"),
        }
    }
}

impl FromStr for MatmulStrategy {
    type Err = LinearError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tiled" | "custom" => Ok(MatmulStrategy::Tiled),
            "vendor" | "blas" => Ok(MatmulStrategy::Vendor),
            other => Err(LinearError::Config(format!(
                "unknown matmul strategy '{}'",
                other
            ))),
        }
    }
}

/// Settings for [`crate::Orchestrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinearConfig {
    pub strategy: MatmulStrategy,
    pub activation: Activation,
    /// Allow the f16 fused kernel for softmax layers, whether they come
    /// through `linear` with a softmax activation or `linear_softmax`.
    pub mixed_precision: bool,
}

impl LinearConfig {
    pub fn with_strategy(mut self, strategy: MatmulStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_mixed_precision(mut self, enabled: bool) -> Self {
        self.mixed_precision = enabled;
        self
    }

    /// Defaults overridden by `LK_MATMUL_STRATEGY`, `LK_ACTIVATION` and
    /// `LK_MIXED_PRECISION` when set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = LinearConfig::default();
        if let Some(v) = lookup(ENV_STRATEGY) {
            config.strategy = v.parse()?;
        }
        if let Some(v) = lookup(ENV_ACTIVATION) {
            config.activation = v.parse()?;
        }
        if let Some(v) = lookup(ENV_MIXED_PRECISION) {
            config.mixed_precision = parse_flag(ENV_MIXED_PRECISION, &v)?;
        }
        Ok(config)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(LinearError::Config(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = LinearConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, LinearConfig::default());
        assert_eq!(config.strategy, MatmulStrategy::Tiled);
        assert_eq!(config.activation, Activation::Identity);
        assert!(!config.mixed_precision);
    }

    #[test]
    fn test_env_overrides() {
        let config = LinearConfig::from_lookup(lookup(&[
            (ENV_STRATEGY, "Vendor"),
            (ENV_ACTIVATION, "softmax"),
            (ENV_MIXED_PRECISION, "1"),
        ]))
        .unwrap();
        assert_eq!(
            config,
            LinearConfig::default()
                .with_strategy(MatmulStrategy::Vendor)
                .with_activation(Activation::Softmax)
                .with_mixed_precision(true)
        );
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(LinearConfig::from_lookup(lookup(&[(ENV_STRATEGY, "gpu")])).is_err());
        assert!(LinearConfig::from_lookup(lookup(&[(ENV_MIXED_PRECISION, "maybe")])).is_err());
        assert!(matches!(
            LinearConfig::from_lookup(lookup(&[(ENV_ACTIVATION, "relu")])),
            Err(LinearError::Tensor(_))
        ));
    }
}
