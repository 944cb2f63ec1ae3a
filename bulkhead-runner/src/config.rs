//! Configuration loading from bulkhead.toml
//!
//! Bulkhead configuration can be specified in a `bulkhead.toml` file in the
//! project root. The configuration is discovered by walking up from the
//! current directory. CLI flags override whatever the file says.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Bulkhead configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BulkheadConfig {
    /// Runner configuration
    #[serde(default)]
    pub runner: RunnerSection,
    /// Output configuration
    #[serde(default)]
    pub output: OutputSection,
}

/// Where each test body runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationPolicy {
    /// Run every test in the runner's own process (no isolation)
    InProcess,
    /// Spawn a fresh child process for each test (default)
    #[default]
    PerTest,
    /// Reuse one child for consecutive tests, respawning after a crash
    PerRun,
}

impl IsolationPolicy {
    /// Whether this policy runs tests in child processes
    pub fn is_isolated(self) -> bool {
        !matches!(self, IsolationPolicy::InProcess)
    }

    /// Name as written in configuration
    pub fn as_str(self) -> &'static str {
        match self {
            IsolationPolicy::InProcess => "in-process",
            IsolationPolicy::PerTest => "per-test",
            IsolationPolicy::PerRun => "per-run",
        }
    }
}

impl fmt::Display for IsolationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IsolationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in-process" | "none" => Ok(IsolationPolicy::InProcess),
            "per-test" | "process" => Ok(IsolationPolicy::PerTest),
            "per-run" => Ok(IsolationPolicy::PerRun),
            other => Err(format!("Unknown isolation policy: {}", other)),
        }
    }
}

/// `[runner]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSection {
    /// Isolation policy: "in-process", "per-test", or "per-run"
    #[serde(default)]
    pub isolation: IsolationPolicy,
    /// Per-test time budget (e.g., "60s", "5m"); "0s" disables
    #[serde(default = "default_timeout")]
    pub timeout: String,
    /// Number of tests run concurrently in separate children
    #[serde(default)]
    pub jobs: Option<usize>,
    /// Capture stdout/stderr of each test
    #[serde(default = "default_capture")]
    pub capture: bool,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            isolation: IsolationPolicy::default(),
            timeout: default_timeout(),
            jobs: None,
            capture: default_capture(),
        }
    }
}

fn default_timeout() -> String {
    "60s".to_string()
}
fn default_capture() -> bool {
    true
}

/// `[output]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSection {
    /// Default output format: "human" or "json"
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            format: default_format(),
        }
    }
}

fn default_format() -> String {
    "human".to_string()
}

impl BulkheadConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Try to discover and load configuration by walking up from current directory
    pub fn discover() -> Option<Self> {
        let mut dir = std::env::current_dir().ok()?;
        loop {
            let config_path = dir.join("bulkhead.toml");
            if config_path.exists() {
                return match Self::load(&config_path) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        tracing::warn!("ignoring {}: {}", config_path.display(), e);
                        None
                    }
                };
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Per-test budget from `[runner] timeout`; `None` when disabled
    pub fn timeout(&self) -> anyhow::Result<Option<Duration>> {
        let budget = Duration::from_nanos(Self::parse_duration(&self.runner.timeout)?);
        Ok((!budget.is_zero()).then_some(budget))
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        r#"# Bulkhead Configuration

[runner]
# Isolation policy: "in-process", "per-test", or "per-run"
isolation = "per-test"
# Per-test time budget; "0s" disables
timeout = "60s"
# Number of tests run concurrently in separate children (uncomment to enable)
# jobs = 4
# Capture stdout/stderr of each test
capture = true

[output]
# Default output format: human or json
format = "human"
"#
        .to_string()
    }

    /// Parse duration string (e.g., "3s", "500ms", "2m") to nanoseconds
    pub fn parse_duration(s: &str) -> anyhow::Result<u64> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
        if value < 0.0 {
            return Err(anyhow::anyhow!("Negative duration: {}", s));
        }

        let multiplier: u64 = match unit_part.to_lowercase().as_str() {
            "ns" => 1,
            "us" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" | "min" => 60_000_000_000,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Ok((value * multiplier as f64) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BulkheadConfig::default();
        assert_eq!(config.runner.isolation, IsolationPolicy::PerTest);
        assert_eq!(config.runner.timeout, "60s");
        assert!(config.runner.capture);
        assert_eq!(config.output.format, "human");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(BulkheadConfig::parse_duration("3s").unwrap(), 3_000_000_000);
        assert_eq!(BulkheadConfig::parse_duration("500ms").unwrap(), 500_000_000);
        assert_eq!(BulkheadConfig::parse_duration("100us").unwrap(), 100_000);
        assert_eq!(BulkheadConfig::parse_duration("1000ns").unwrap(), 1000);
        assert_eq!(BulkheadConfig::parse_duration("2m").unwrap(), 120_000_000_000);
        assert_eq!(BulkheadConfig::parse_duration("1.5s").unwrap(), 1_500_000_000);
        assert_eq!(BulkheadConfig::parse_duration("10").unwrap(), 10_000_000_000);
        assert!(BulkheadConfig::parse_duration("5 parsecs").is_err());
        assert!(BulkheadConfig::parse_duration("").is_err());
    }

    #[test]
    fn test_zero_timeout_disables() {
        let mut config = BulkheadConfig::default();
        assert_eq!(config.timeout().unwrap(), Some(Duration::from_secs(60)));
        config.runner.timeout = "0s".to_string();
        assert_eq!(config.timeout().unwrap(), None);
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [runner]
            isolation = "per-run"
            jobs = 4
        "#;

        let config: BulkheadConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.runner.isolation, IsolationPolicy::PerRun);
        assert_eq!(config.runner.jobs, Some(4));
        // Defaults should still apply
        assert_eq!(config.runner.timeout, "60s");
        assert_eq!(config.output.format, "human");
    }

    #[test]
    fn test_default_toml_round_trips() {
        let config: BulkheadConfig = toml::from_str(&BulkheadConfig::default_toml()).unwrap();
        assert_eq!(config.runner.isolation, IsolationPolicy::PerTest);

        let written = toml::to_string(&config).unwrap();
        let reread: BulkheadConfig = toml::from_str(&written).unwrap();
        assert_eq!(reread.runner.timeout, config.runner.timeout);
        assert_eq!(reread.runner.capture, config.runner.capture);
    }

    #[test]
    fn test_isolation_names() {
        for policy in [
            IsolationPolicy::InProcess,
            IsolationPolicy::PerTest,
            IsolationPolicy::PerRun,
        ] {
            assert_eq!(policy.as_str().parse::<IsolationPolicy>(), Ok(policy));
        }
        assert!(!IsolationPolicy::InProcess.is_isolated());
        assert!(IsolationPolicy::PerRun.is_isolated());
    }
}
