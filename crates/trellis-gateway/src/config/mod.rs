//! Configuration types for the gateway.

mod listen;
mod rules;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use listen::{ListenConfig, MetricsConfig};
pub use rules::{FieldPredicate, IpFilterConfig, PathConfig, RuleConfig};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: ListenConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Server-wide allow/block filter, evaluated before any rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_filter: Option<IpFilterConfig>,

    /// Route cache capacity. 0 disables the cache.
    #[serde(default)]
    pub cache_size: u32,

    /// Append the client IP to `X-Forwarded-For` before handoff.
    #[serde(default)]
    pub x_forwarded_for: bool,

    /// Name of an external pre-handler wrapping every matched pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_filter: Option<String>,

    /// Ordered host rules; evaluation is first-match-wins.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.paths.is_empty() {
                anyhow::bail!("rule {} has no paths", i);
            }
            for path in &rule.paths {
                if path.backend.is_empty() {
                    anyhow::bail!(
                        "rule {}: every path must name a backend (path: {:?}, prefix: {:?})",
                        i,
                        path.path,
                        path.path_prefix
                    );
                }
            }
        }
        Ok(())
    }
}
