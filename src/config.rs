//! Engine configuration
//!
//! Configuration can be built programmatically, loaded from a JSON file or
//! read from environment variables:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `MEMTAB_MAX_TABLES` | Maximum number of live tables | 8192 |
//! | `MEMTAB_SPIN_COUNT` | Lock spin intensity (none .. extremely_high) | normal |
//! | `MEMTAB_COUNTER_SHARDS` | Cells per decentralized memory counter | 64 |
//! | `MEMTAB_DECENTRALIZED_COUNTERS` | Default counter mode for new tables | true |
//! | `MEMTAB_SCAN_BUDGET` | Tables visited per enumeration step | 1000 |
//! | `MEMTAB_REALLOC_ALWAYS_MOVES` | Force reallocations to move ("true"/"false") | false |

use crate::types::{DEFAULT_MAX_TABLES, DEFAULT_SCAN_BUDGET, MAX_TABLES_ENV};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Upper bound for the number of cells in a decentralized counter
pub const MAX_COUNTER_SHARDS: usize = 1024;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration file is not valid JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// A value is out of range or unparsable
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Lock spin intensity
///
/// Only affects how long table locks busy-wait before parking the thread;
/// never observable through the table API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpinCount {
    None,
    VeryLow,
    Low,
    #[default]
    Normal,
    High,
    VeryHigh,
    ExtremelyHigh,
}

impl SpinCount {
    /// Number of busy-wait attempts before blocking
    pub fn spin_iterations(&self) -> u32 {
        match self {
            SpinCount::None => 0,
            SpinCount::VeryLow => 100,
            SpinCount::Low => 200,
            SpinCount::Normal => 1000,
            SpinCount::High => 2000,
            SpinCount::VeryHigh => 15000,
            SpinCount::ExtremelyHigh => 50000,
        }
    }
}

impl FromStr for SpinCount {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "none" | "0" => Ok(SpinCount::None),
            "very_low" => Ok(SpinCount::VeryLow),
            "low" => Ok(SpinCount::Low),
            "normal" => Ok(SpinCount::Normal),
            "high" => Ok(SpinCount::High),
            "very_high" => Ok(SpinCount::VeryHigh),
            "extremely_high" => Ok(SpinCount::ExtremelyHigh),
            _ => Err(ConfigError::InvalidValue {
                key: "spin_count",
                value: s.to_string(),
            }),
        }
    }
}

/// Table engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of live tables
    pub max_tables: usize,
    /// Lock spin intensity
    pub spin_count: SpinCount,
    /// Cells per decentralized memory counter
    pub counter_shards: usize,
    /// Whether new tables use decentralized counters unless told otherwise
    pub decentralized_counters: bool,
    /// Tables visited per enumeration step
    pub scan_budget: usize,
    /// Always move blocks on reallocation
    pub realloc_always_moves: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tables: DEFAULT_MAX_TABLES,
            spin_count: SpinCount::Normal,
            counter_shards: 64,
            decentralized_counters: true,
            scan_budget: DEFAULT_SCAN_BUDGET,
            realloc_always_moves: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(val) = env_parse::<usize>(MAX_TABLES_ENV, "max_tables")? {
            config.max_tables = val;
        }
        if let Ok(val) = env::var("MEMTAB_SPIN_COUNT") {
            config.spin_count = val.parse()?;
        }
        if let Some(val) = env_parse::<usize>("MEMTAB_COUNTER_SHARDS", "counter_shards")? {
            config.counter_shards = val;
        }
        if let Some(val) = env_bool("MEMTAB_DECENTRALIZED_COUNTERS", "decentralized_counters")? {
            config.decentralized_counters = val;
        }
        if let Some(val) = env_parse::<usize>("MEMTAB_SCAN_BUDGET", "scan_budget")? {
            config.scan_budget = val;
        }
        if let Some(val) = env_bool("MEMTAB_REALLOC_ALWAYS_MOVES", "realloc_always_moves")? {
            config.realloc_always_moves = val;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_tables == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_tables",
                value: self.max_tables.to_string(),
            });
        }
        if self.counter_shards == 0 || self.counter_shards > MAX_COUNTER_SHARDS {
            return Err(ConfigError::InvalidValue {
                key: "counter_shards",
                value: self.counter_shards.to_string(),
            });
        }
        if self.scan_budget == 0 {
            return Err(ConfigError::InvalidValue {
                key: "scan_budget",
                value: self.scan_budget.to_string(),
            });
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(name: &str, key: &'static str) -> ConfigResult<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        Err(_) => Ok(None),
    }
}

fn env_bool(name: &str, key: &'static str) -> ConfigResult<Option<bool>> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue { key, value: raw }),
        },
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::{Mutex, const_mutex};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const ENV_VARS: [&str; 6] = [
        MAX_TABLES_ENV,
        "MEMTAB_SPIN_COUNT",
        "MEMTAB_COUNTER_SHARDS",
        "MEMTAB_DECENTRALIZED_COUNTERS",
        "MEMTAB_SCAN_BUDGET",
        "MEMTAB_REALLOC_ALWAYS_MOVES",
    ];

    // The process environment is shared by every test thread
    static ENV_LOCK: Mutex<()> = const_mutex(());

    fn clear_env() {
        // SAFETY: environment access in this module is serialized by
        // ENV_LOCK and no other test reads these variables.
        unsafe {
            for name in ENV_VARS {
                env::remove_var(name);
            }
        }
    }

    fn with_env<R>(vars: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
        let _guard = ENV_LOCK.lock();
        clear_env();
        for (name, value) in vars {
            // SAFETY: see clear_env.
            unsafe { env::set_var(name, value) };
        }
        let result = f();
        clear_env();
        result
    }

    #[test]
    fn test_from_env_defaults() {
        let config = with_env(&[], EngineConfig::from_env).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_from_env_overrides() {
        let config = with_env(
            &[
                (MAX_TABLES_ENV, "32"),
                ("MEMTAB_SPIN_COUNT", "very-high"),
                ("MEMTAB_COUNTER_SHARDS", " 8 "),
                ("MEMTAB_DECENTRALIZED_COUNTERS", "off"),
                ("MEMTAB_SCAN_BUDGET", "5"),
                ("MEMTAB_REALLOC_ALWAYS_MOVES", "Yes"),
            ],
            EngineConfig::from_env,
        )
        .unwrap();

        assert_eq!(config.max_tables, 32);
        assert_eq!(config.spin_count, SpinCount::VeryHigh);
        assert_eq!(config.counter_shards, 8);
        assert!(!config.decentralized_counters);
        assert_eq!(config.scan_budget, 5);
        assert!(config.realloc_always_moves);
    }

    #[test]
    fn test_from_env_rejects_bad_values() {
        let cases = [
            ("MEMTAB_SPIN_COUNT", "bogus", "spin_count"),
            (MAX_TABLES_ENV, "many", "max_tables"),
            (MAX_TABLES_ENV, "0", "max_tables"),
            ("MEMTAB_COUNTER_SHARDS", "4096", "counter_shards"),
            ("MEMTAB_DECENTRALIZED_COUNTERS", "maybe", "decentralized_counters"),
        ];
        for (name, value, expected) in cases {
            match with_env(&[(name, value)], EngineConfig::from_env) {
                Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, expected),
                other => panic!("{}={} gave {:?}", name, value, other),
            }
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.max_tables, DEFAULT_MAX_TABLES);
        assert_eq!(config.spin_count, SpinCount::Normal);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_spin_count_parse() {
        assert_eq!("none".parse::<SpinCount>().unwrap(), SpinCount::None);
        assert_eq!("very-low".parse::<SpinCount>().unwrap(), SpinCount::VeryLow);
        assert_eq!(
            "EXTREMELY_HIGH".parse::<SpinCount>().unwrap(),
            SpinCount::ExtremelyHigh
        );
        assert!("sometimes".parse::<SpinCount>().is_err());
    }

    #[test]
    fn test_spin_iterations_monotonic() {
        let levels = [
            SpinCount::None,
            SpinCount::VeryLow,
            SpinCount::Low,
            SpinCount::Normal,
            SpinCount::High,
            SpinCount::VeryHigh,
            SpinCount::ExtremelyHigh,
        ];
        for pair in levels.windows(2) {
            assert!(pair[0].spin_iterations() < pair[1].spin_iterations());
        }
    }

    #[test]
    fn test_from_json_file_partial() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "max_tables": 16, "spin_count": "high" }}"#).unwrap();

        let config = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.max_tables, 16);
        assert_eq!(config.spin_count, SpinCount::High);
        assert_eq!(config.scan_budget, DEFAULT_SCAN_BUDGET);
    }

    #[test]
    fn test_from_json_file_rejects_zero_shards() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "counter_shards": 0 }}"#).unwrap();

        let result = EngineConfig::from_json_file(file.path());
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                key: "counter_shards",
                ..
            })
        ));
    }

    #[test]
    fn test_from_json_file_missing() {
        let result = EngineConfig::from_json_file("/nonexistent/memtab.json");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
