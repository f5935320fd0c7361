//! Strongly-typed configuration for the fixture page.
//!
//! The defaults reproduce the literals baked into the fixture scripts (element
//! ids, the default result message, and the two timer delays). Values can also
//! be loaded from environment variables (with optional `.env` support) or
//! merged with explicit overrides.

use std::env;
use std::num::ParseIntError;
use std::time::Duration;

use dotenvy::dotenv;
use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::{Serialize, Serializer};
use serde::{Deserialize as DeriveDeserialize, Serialize as DeriveSerialize};
use thiserror::Error;

/// Identifier of the paragraph that displays results.
pub const DEFAULT_RESULT_ID: &str = "result";
/// Identifier of the node that receives the delayed link.
pub const DEFAULT_DELAYED_TARGET_ID: &str = "wait_for";
/// Message written by `reset`.
pub const DEFAULT_MESSAGE: &str = "No results yet.";
/// Value the delayed link passes to `result`.
pub const DEFAULT_DELAYED_LINK_VALUE: &str = "delayed_link";
/// Delay before `on_ready` injects the delayed link.
pub const DEFAULT_READY_DELAY_MS: u64 = 5_000;
/// Fallback delay for `make_element_stale` when no timeout is given.
pub const DEFAULT_STALE_TIMEOUT_MS: u64 = 500;
/// Default overall budget for `wait_for` retries.
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 15_000;
/// Default pause between `wait_for` attempts.
pub const DEFAULT_WAIT_CHECK_EVERY_MS: u64 = 200;

/// Verbosity level for fixture logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Minimal,
    Medium,
    Detailed,
}

impl Verbosity {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Verbosity::Minimal => 0,
            Verbosity::Medium => 1,
            Verbosity::Detailed => 2,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Verbosity::Minimal),
            1 => Some(Verbosity::Medium),
            2 => Some(Verbosity::Detailed),
            _ => None,
        }
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::Medium
    }
}

impl Serialize for Verbosity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Verbosity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        Verbosity::from_u8(value).ok_or_else(|| {
            DeError::custom(format!(
                "invalid verbosity value {value}; expected 0, 1, or 2"
            ))
        })
    }
}

/// Configuration values for a fixture page and its mutator.
#[derive(Debug, Clone, PartialEq, Eq, DeriveSerialize, DeriveDeserialize)]
#[serde(default)]
pub struct FixtureConfig {
    #[serde(alias = "resultId")]
    pub result_id: String,
    #[serde(alias = "delayedTargetId")]
    pub delayed_target_id: String,
    #[serde(alias = "defaultMessage")]
    pub default_message: String,
    #[serde(alias = "delayedLinkValue")]
    pub delayed_link_value: String,
    #[serde(alias = "readyDelayMs")]
    pub ready_delay_ms: u64,
    #[serde(alias = "staleTimeoutMs")]
    pub stale_timeout_ms: u64,
    #[serde(alias = "waitTimeoutMs")]
    pub wait_timeout_ms: u64,
    #[serde(alias = "waitCheckEveryMs")]
    pub wait_check_every_ms: u64,
    pub verbose: Verbosity,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        FixtureConfig {
            result_id: DEFAULT_RESULT_ID.to_string(),
            delayed_target_id: DEFAULT_DELAYED_TARGET_ID.to_string(),
            default_message: DEFAULT_MESSAGE.to_string(),
            delayed_link_value: DEFAULT_DELAYED_LINK_VALUE.to_string(),
            ready_delay_ms: DEFAULT_READY_DELAY_MS,
            stale_timeout_ms: DEFAULT_STALE_TIMEOUT_MS,
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            wait_check_every_ms: DEFAULT_WAIT_CHECK_EVERY_MS,
            verbose: Verbosity::default(),
        }
    }
}

impl FixtureConfig {
    /// Construct a configuration by reading `FIXTURE_*` environment variables,
    /// after loading a `.env` file if present.
    pub fn from_env() -> Result<Self, FixtureConfigError> {
        let _ = dotenv();
        let mut config = FixtureConfig::default();

        if let Some(value) = env_var("FIXTURE_RESULT_ID") {
            config.result_id = value;
        }

        if let Some(value) = env_var("FIXTURE_DELAYED_TARGET_ID") {
            config.delayed_target_id = value;
        }

        // The message is shown verbatim, so it is read without trimming.
        if let Ok(value) = env::var("FIXTURE_DEFAULT_MESSAGE") {
            if !value.is_empty() {
                config.default_message = value;
            }
        }

        if let Some(value) = env_var("FIXTURE_DELAYED_LINK_VALUE") {
            config.delayed_link_value = value;
        }

        if let Some(value) = env_var("FIXTURE_READY_DELAY_MS") {
            config.ready_delay_ms = parse_u64("FIXTURE_READY_DELAY_MS", &value)?;
        }

        if let Some(value) = env_var("FIXTURE_STALE_TIMEOUT_MS") {
            config.stale_timeout_ms = parse_u64("FIXTURE_STALE_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = env_var("FIXTURE_WAIT_TIMEOUT_MS") {
            config.wait_timeout_ms = parse_u64("FIXTURE_WAIT_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = env_var("FIXTURE_WAIT_CHECK_EVERY_MS") {
            config.wait_check_every_ms = parse_u64("FIXTURE_WAIT_CHECK_EVERY_MS", &value)?;
        }

        if let Some(value) = env_var("FIXTURE_VERBOSE") {
            let parsed = parse_u8("FIXTURE_VERBOSE", &value)?;
            config.verbose = Verbosity::from_u8(parsed).ok_or_else(|| {
                FixtureConfigError::InvalidEnumVariant {
                    field: "FIXTURE_VERBOSE",
                    value: parsed.to_string(),
                }
            })?;
        }

        Ok(config)
    }

    pub fn ready_delay(&self) -> Duration {
        Duration::from_millis(self.ready_delay_ms)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn wait_check_every(&self) -> Duration {
        Duration::from_millis(self.wait_check_every_ms)
    }

    /// Create a new configuration with explicit field overrides applied.
    pub fn with_overrides(&self, overrides: FixtureConfigOverrides) -> FixtureConfig {
        let mut next = self.clone();

        if let Some(value) = overrides.result_id {
            next.result_id = value;
        }
        if let Some(value) = overrides.delayed_target_id {
            next.delayed_target_id = value;
        }
        if let Some(value) = overrides.default_message {
            next.default_message = value;
        }
        if let Some(value) = overrides.delayed_link_value {
            next.delayed_link_value = value;
        }
        if let Some(value) = overrides.ready_delay_ms {
            next.ready_delay_ms = value;
        }
        if let Some(value) = overrides.stale_timeout_ms {
            next.stale_timeout_ms = value;
        }
        if let Some(value) = overrides.wait_timeout_ms {
            next.wait_timeout_ms = value;
        }
        if let Some(value) = overrides.wait_check_every_ms {
            next.wait_check_every_ms = value;
        }
        if let Some(value) = overrides.verbose {
            next.verbose = value;
        }

        next
    }
}

/// Field-level overrides for [`FixtureConfig::with_overrides`].
#[derive(Debug, Default, Clone)]
pub struct FixtureConfigOverrides {
    pub result_id: Option<String>,
    pub delayed_target_id: Option<String>,
    pub default_message: Option<String>,
    pub delayed_link_value: Option<String>,
    pub ready_delay_ms: Option<u64>,
    pub stale_timeout_ms: Option<u64>,
    pub wait_timeout_ms: Option<u64>,
    pub wait_check_every_ms: Option<u64>,
    pub verbose: Option<Verbosity>,
}

impl FixtureConfigOverrides {
    /// Builder-style helper to set the `ready_delay_ms` override.
    pub fn ready_delay_ms(mut self, value: u64) -> Self {
        self.ready_delay_ms = Some(value);
        self
    }

    /// Builder-style helper to set the `verbose` override.
    pub fn verbose(mut self, value: Verbosity) -> Self {
        self.verbose = Some(value);
        self
    }
}

/// Errors that can arise while constructing a [`FixtureConfig`].
#[derive(Debug, Error)]
pub enum FixtureConfigError {
    #[error("invalid value '{value}' for {field}")]
    InvalidEnumVariant { field: &'static str, value: String },
    #[error("invalid number '{value}' for {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

fn env_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_u8(field: &'static str, value: &str) -> Result<u8, FixtureConfigError> {
    value
        .trim()
        .parse::<u8>()
        .map_err(|source| FixtureConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, FixtureConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|source| FixtureConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const FIXTURE_VARS: &[&str] = &[
        "FIXTURE_RESULT_ID",
        "FIXTURE_DELAYED_TARGET_ID",
        "FIXTURE_DEFAULT_MESSAGE",
        "FIXTURE_DELAYED_LINK_VALUE",
        "FIXTURE_READY_DELAY_MS",
        "FIXTURE_STALE_TIMEOUT_MS",
        "FIXTURE_WAIT_TIMEOUT_MS",
        "FIXTURE_WAIT_CHECK_EVERY_MS",
        "FIXTURE_VERBOSE",
    ];

    #[derive(Debug)]
    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        /// Clears every `FIXTURE_*` variable, then applies `vars`.
        fn new(vars: &[(&str, &str)]) -> Self {
            let saved = FIXTURE_VARS
                .iter()
                .map(|key| {
                    let original = env::var(key).ok();
                    unsafe {
                        env::remove_var(key);
                    }
                    ((*key).to_string(), original)
                })
                .collect();
            for (key, value) in vars {
                unsafe {
                    env::set_var(key, value);
                }
            }
            EnvGuard { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => unsafe {
                        env::set_var(&key, v);
                    },
                    None => unsafe {
                        env::remove_var(&key);
                    },
                }
            }
        }
    }

    #[test]
    fn defaults_match_fixture_literals() {
        let config = FixtureConfig::default();
        assert_eq!(config.result_id, "result");
        assert_eq!(config.delayed_target_id, "wait_for");
        assert_eq!(config.default_message, "No results yet.");
        assert_eq!(config.delayed_link_value, "delayed_link");
        assert_eq!(config.ready_delay(), Duration::from_millis(5_000));
        assert_eq!(config.stale_timeout(), Duration::from_millis(500));
        assert_eq!(config.wait_timeout(), Duration::from_secs(15));
        assert_eq!(config.wait_check_every(), Duration::from_millis(200));
        assert_eq!(config.verbose, Verbosity::Medium);
    }

    #[test]
    #[serial]
    fn from_env_parses_values() {
        let _guard = EnvGuard::new(&[
            ("FIXTURE_RESULT_ID", "output"),
            ("FIXTURE_DELAYED_TARGET_ID", " later "),
            ("FIXTURE_DEFAULT_MESSAGE", "Nothing here "),
            ("FIXTURE_READY_DELAY_MS", "250"),
            ("FIXTURE_STALE_TIMEOUT_MS", "75"),
            ("FIXTURE_WAIT_TIMEOUT_MS", "1000"),
            ("FIXTURE_WAIT_CHECK_EVERY_MS", "50"),
            ("FIXTURE_VERBOSE", "2"),
        ]);

        let config = FixtureConfig::from_env().expect("config from env");
        assert_eq!(config.result_id, "output");
        assert_eq!(config.delayed_target_id, "later");
        assert_eq!(config.default_message, "Nothing here ");
        assert_eq!(config.delayed_link_value, "delayed_link");
        assert_eq!(config.ready_delay_ms, 250);
        assert_eq!(config.stale_timeout_ms, 75);
        assert_eq!(config.wait_timeout_ms, 1_000);
        assert_eq!(config.wait_check_every_ms, 50);
        assert_eq!(config.verbose, Verbosity::Detailed);
    }

    #[test]
    #[serial]
    fn from_env_rejects_bad_numbers() {
        let _guard = EnvGuard::new(&[("FIXTURE_READY_DELAY_MS", "soon")]);
        let err = FixtureConfig::from_env().expect_err("invalid delay");
        assert!(matches!(
            err,
            FixtureConfigError::InvalidNumber {
                field: "FIXTURE_READY_DELAY_MS",
                ..
            }
        ));
    }

    #[test]
    #[serial]
    fn from_env_rejects_unknown_verbosity() {
        let _guard = EnvGuard::new(&[("FIXTURE_VERBOSE", "7")]);
        let err = FixtureConfig::from_env().expect_err("invalid verbosity");
        assert_eq!(err.to_string(), "invalid value '7' for FIXTURE_VERBOSE");
    }

    #[test]
    fn overrides_apply_only_given_fields() {
        let base = FixtureConfig::default();
        let overrides = FixtureConfigOverrides::default()
            .ready_delay_ms(10)
            .verbose(Verbosity::Minimal);
        let overrides = FixtureConfigOverrides {
            result_id: Some("out".into()),
            ..overrides
        };

        let updated = base.with_overrides(overrides);
        assert_eq!(updated.ready_delay_ms, 10);
        assert_eq!(updated.verbose, Verbosity::Minimal);
        assert_eq!(updated.result_id, "out");
        assert_eq!(updated.stale_timeout_ms, DEFAULT_STALE_TIMEOUT_MS);
    }

    #[test]
    fn deserializes_camel_case_aliases() {
        let config: FixtureConfig = serde_json::from_value(serde_json::json!({
            "resultId": "out",
            "staleTimeoutMs": 42,
            "verbose": 0
        }))
        .expect("deserialize");
        assert_eq!(config.result_id, "out");
        assert_eq!(config.stale_timeout_ms, 42);
        assert_eq!(config.verbose, Verbosity::Minimal);
        assert_eq!(config.ready_delay_ms, DEFAULT_READY_DELAY_MS);

        let bad = serde_json::from_value::<FixtureConfig>(serde_json::json!({ "verbose": 9 }));
        assert!(bad.is_err());
    }
}
