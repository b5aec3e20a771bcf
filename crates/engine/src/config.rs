//! Engine configuration
//!
//! Configuration is validated once, when a strategy is built. An invalid
//! pool size or strategy name is a startup error, never a task error.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;

/// Default conversion deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Pooling topology
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// One throwaway worker process per task
    #[default]
    DedicatedProcess,
    /// N standalone worker processes shared across tasks
    ProcessPool,
    /// N pages multiplexed inside one shared worker process
    #[serde(alias = "chrome-pool")]
    PagePool,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DedicatedProcess => write!(f, "dedicated-process"),
            Self::ProcessPool => write!(f, "process-pool"),
            Self::PagePool => write!(f, "page-pool"),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "dedicated-process" => Ok(Self::DedicatedProcess),
            "process-pool" => Ok(Self::ProcessPool),
            "page-pool" | "chrome-pool" => Ok(Self::PagePool),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Parameters used to start a worker process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchOptions {
    /// Extra command line arguments; accepts an array or a comma separated string
    #[serde(default, deserialize_with = "string_or_list")]
    pub args: Vec<String>,

    /// Custom worker executable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<String>,
}

impl LaunchOptions {
    /// Parse a comma separated argument list
    pub fn parse_args(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Pooling topology
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Pool size for pooled topologies
    #[serde(default = "default_number_of_workers")]
    pub number_of_workers: usize,

    /// Conversion deadline
    #[serde(default = "default_timeout", with = "duration_millis")]
    pub timeout: Duration,

    /// Worker launch parameters
    #[serde(default)]
    pub launch_options: LaunchOptions,
}

fn default_number_of_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            number_of_workers: default_number_of_workers(),
            timeout: DEFAULT_TIMEOUT,
            launch_options: LaunchOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration for the given topology
    pub fn new(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `RENDERPOOL_STRATEGY`: `dedicated-process`, `process-pool` or `page-pool`
    /// - `RENDERPOOL_WORKERS`: pool size (default: available parallelism)
    /// - `RENDERPOOL_TIMEOUT_MS`: conversion deadline in milliseconds
    /// - `RENDERPOOL_LAUNCH_ARGS`: comma separated worker arguments
    /// - `RENDERPOOL_EXECUTABLE`: custom worker executable
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::from_env_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse environment variables without validating the result
    ///
    /// For callers that layer further overrides before validating once.
    pub fn from_env_unvalidated() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("RENDERPOOL_STRATEGY") {
            config.strategy = raw.parse()?;
        }

        if let Ok(raw) = std::env::var("RENDERPOOL_WORKERS") {
            config.number_of_workers = raw.trim().parse().map_err(|e| ConfigError::Env {
                var: "RENDERPOOL_WORKERS".to_string(),
                message: format!("{}", e),
            })?;
        }

        if let Ok(raw) = std::env::var("RENDERPOOL_TIMEOUT_MS") {
            let millis: u64 = raw.trim().parse().map_err(|e| ConfigError::Env {
                var: "RENDERPOOL_TIMEOUT_MS".to_string(),
                message: format!("{}", e),
            })?;
            config.timeout = Duration::from_millis(millis);
        }

        if let Ok(raw) = std::env::var("RENDERPOOL_LAUNCH_ARGS") {
            config.launch_options.args = LaunchOptions::parse_args(&raw);
        }

        config.launch_options.executable_path = std::env::var("RENDERPOOL_EXECUTABLE").ok();

        Ok(config)
    }

    /// Set the topology
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the pool size
    pub fn with_number_of_workers(mut self, n: usize) -> Self {
        self.number_of_workers = n;
        self
    }

    /// Set the conversion deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set worker launch parameters
    pub fn with_launch_options(mut self, options: LaunchOptions) -> Self {
        self.launch_options = options;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.number_of_workers < 1 {
            return Err(ConfigError::InvalidPoolSize(self.number_of_workers));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
    }

    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::One(raw) => LaunchOptions::parse_args(&raw),
        StringOrList::Many(list) => list,
    })
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }

    /// Optional variant
    pub mod option {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            duration
                .map(|d| d.as_millis() as u64)
                .serialize(serializer)
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.strategy, StrategyKind::DedicatedProcess);
        assert!(config.number_of_workers >= 1);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.launch_options.args.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new(StrategyKind::PagePool)
            .with_number_of_workers(4)
            .with_timeout(Duration::from_millis(1500))
            .with_launch_options(LaunchOptions {
                args: vec!["--no-sandbox".to_string()],
                executable_path: None,
            });

        assert_eq!(config.strategy, StrategyKind::PagePool);
        assert_eq!(config.number_of_workers, 4);
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.launch_options.args, vec!["--no-sandbox"]);
    }

    #[test]
    fn test_validation_rejects_empty_pool() {
        let config = EngineConfig::default().with_number_of_workers(0);
        assert_eq!(config.validate(), Err(ConfigError::InvalidPoolSize(0)));
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let config = EngineConfig::default().with_timeout(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::InvalidTimeout));
    }

    // Only test in this crate touching RENDERPOOL_* variables
    #[test]
    fn test_from_env() {
        std::env::set_var("RENDERPOOL_STRATEGY", "process-pool");
        std::env::set_var("RENDERPOOL_TIMEOUT_MS", "2500");
        std::env::set_var("RENDERPOOL_LAUNCH_ARGS", "--no-sandbox,--mute-audio");

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.strategy, StrategyKind::ProcessPool);
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.launch_options.args, vec!["--no-sandbox", "--mute-audio"]);

        std::env::set_var("RENDERPOOL_WORKERS", "0");
        assert_eq!(
            EngineConfig::from_env(),
            Err(ConfigError::InvalidPoolSize(0))
        );
        let raw = EngineConfig::from_env_unvalidated().unwrap();
        assert_eq!(raw.number_of_workers, 0);

        std::env::set_var("RENDERPOOL_WORKERS", "many");
        assert!(matches!(
            EngineConfig::from_env_unvalidated(),
            Err(ConfigError::Env { .. })
        ));

        for var in [
            "RENDERPOOL_STRATEGY",
            "RENDERPOOL_TIMEOUT_MS",
            "RENDERPOOL_LAUNCH_ARGS",
            "RENDERPOOL_WORKERS",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(
            "dedicated-process".parse::<StrategyKind>(),
            Ok(StrategyKind::DedicatedProcess)
        );
        assert_eq!(
            "process-pool".parse::<StrategyKind>(),
            Ok(StrategyKind::ProcessPool)
        );
        assert_eq!("page-pool".parse::<StrategyKind>(), Ok(StrategyKind::PagePool));
        assert_eq!("chrome-pool".parse::<StrategyKind>(), Ok(StrategyKind::PagePool));
        assert!(matches!(
            "in-process".parse::<StrategyKind>(),
            Err(ConfigError::UnknownStrategy(name)) if name == "in-process"
        ));
        assert_eq!(StrategyKind::PagePool.to_string(), "page-pool");
    }

    #[test]
    fn test_deserialize_from_json() {
        let config: EngineConfig = serde_json::from_str(
            r#"{
                "strategy": "chrome-pool",
                "numberOfWorkers": 3,
                "timeout": 5000,
                "launchOptions": { "args": "--no-sandbox, --disable-gpu" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.strategy, StrategyKind::PagePool);
        assert_eq!(config.number_of_workers, 3);
        assert_eq!(config.timeout, Duration::from_millis(5000));
        assert_eq!(
            config.launch_options.args,
            vec!["--no-sandbox", "--disable-gpu"]
        );
    }

    #[test]
    fn test_launch_args_as_array() {
        let options: LaunchOptions =
            serde_json::from_str(r#"{ "args": ["--a", "--b"] }"#).unwrap();
        assert_eq!(options.args, vec!["--a", "--b"]);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = EngineConfig::new(StrategyKind::ProcessPool)
            .with_number_of_workers(2)
            .with_timeout(Duration::from_millis(750));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"process-pool\""));
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }
}
