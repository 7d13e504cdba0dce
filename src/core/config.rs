//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Runtime settings, read once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub json_dir: PathBuf,
    pub providers_file: Option<PathBuf>,
    /// Library root; `SFX_DIR` in the environment
    #[serde(alias = "dir")]
    pub sfx_dir: Option<PathBuf>,
    pub max_retries: u32,
    pub retry_base_secs: u64,
    pub retry_step_secs: u64,
    pub rate_limit_delay_ms: u64,
    pub poll_interval_secs: u64,
    pub max_poll_attempts: u32,
    pub output_tokens_per_entry: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            json_dir: PathBuf::from("./json"),
            providers_file: None,
            sfx_dir: None,
            max_retries: 3,
            retry_base_secs: 2,
            retry_step_secs: 2,
            rate_limit_delay_ms: 4,
            poll_interval_secs: 30,
            max_poll_attempts: 2880,
            output_tokens_per_entry: 20,
        }
    }
}

impl AppSettings {
    /// Defaults overlaid with `SFX_*` environment variables
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(config::Environment::with_prefix("SFX").try_parsing(true))
    }

    fn load_from(environment: config::Environment) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let settings = config::Config::builder()
            .set_default("json_dir", defaults.json_dir.display().to_string())?
            .set_default("max_retries", i64::from(defaults.max_retries))?
            .set_default("retry_base_secs", defaults.retry_base_secs as i64)?
            .set_default("retry_step_secs", defaults.retry_step_secs as i64)?
            .set_default("rate_limit_delay_ms", defaults.rate_limit_delay_ms as i64)?
            .set_default("poll_interval_secs", defaults.poll_interval_secs as i64)?
            .set_default("max_poll_attempts", i64::from(defaults.max_poll_attempts))?
            .set_default("output_tokens_per_entry", defaults.output_tokens_per_entry as i64)?
            .add_source(environment)
            .build()?;

        let loaded: Self = settings.try_deserialize()?;
        loaded.validate()?;
        debug!("Loaded settings: {:?}", loaded);
        Ok(loaded)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_retries == 0 {
            return Err(anyhow::anyhow!("max_retries must be greater than 0"));
        }

        if self.poll_interval_secs == 0 {
            warn!("poll_interval_secs is 0, batch status will be polled without pause");
        }

        if self.max_poll_attempts == 0 {
            return Err(anyhow::anyhow!("max_poll_attempts must be greater than 0"));
        }

        Ok(())
    }

    pub fn mapping_path(&self) -> PathBuf {
        self.json_dir.join("mapping.json")
    }

    pub fn structure_path(&self) -> PathBuf {
        self.json_dir.join("structure.json")
    }

    pub fn group_path(&self) -> PathBuf {
        self.json_dir.join("group.json")
    }

    pub fn providers_path(&self) -> PathBuf {
        self.providers_file
            .clone()
            .unwrap_or_else(|| self.json_dir.join("providers.json"))
    }

    /// Root directory of the audio library, explicit argument first
    pub fn library_dir(&self, explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| self.sfx_dir.clone())
            .ok_or_else(|| anyhow::anyhow!("No library directory given; pass --dir or set SFX_DIR"))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(self.retry_base_secs),
            step: Duration::from_secs(self.retry_step_secs),
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_attempts: self.max_poll_attempts,
        }
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }
}

/// Linear backoff between attempts of one call
///
/// The number of attempts is chosen per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub step: Duration,
}

impl RetryPolicy {
    /// Delay after the failed attempt `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay + self.step * attempt
    }

    /// No waiting between attempts
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            step: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        AppSettings::default().retry_policy()
    }
}

/// Bounded wait on a remote batch job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        AppSettings::default().poll_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let settings = AppSettings::default();
        assert_eq!(settings.mapping_path(), PathBuf::from("./json/mapping.json"));
        assert_eq!(settings.providers_path(), PathBuf::from("./json/providers.json"));
    }

    #[test]
    fn test_retry_delay_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(6));
    }

    #[test]
    fn test_default_poll_window_is_one_day() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval * policy.max_attempts, Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_config_validation_rejects_zero_retries() {
        let settings = AppSettings {
            max_retries: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    fn environment(vars: &[(&str, &str)]) -> config::Environment {
        let source = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix("SFX").try_parsing(true).source(Some(source))
    }

    #[test]
    fn test_sfx_dir_variable_sets_library_root() {
        let settings = AppSettings::load_from(environment(&[("SFX_DIR", "/lib/sfx")])).unwrap();
        assert_eq!(settings.sfx_dir, Some(PathBuf::from("/lib/sfx")));
        assert_eq!(settings.library_dir(None).unwrap(), PathBuf::from("/lib/sfx"));
    }

    #[test]
    fn test_environment_overrides_defaults() {
        let settings = AppSettings::load_from(environment(&[
            ("SFX_JSON_DIR", "/data/json"),
            ("SFX_MAX_RETRIES", "5"),
        ]))
        .unwrap();
        assert_eq!(settings.json_dir, PathBuf::from("/data/json"));
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.sfx_dir, None);
        assert_eq!(settings.poll_interval_secs, 30);
    }

    #[test]
    fn test_library_dir_prefers_explicit() {
        let settings = AppSettings {
            sfx_dir: Some(PathBuf::from("/env/dir")),
            ..Default::default()
        };
        assert_eq!(
            settings.library_dir(Some(Path::new("/cli/dir"))).unwrap(),
            PathBuf::from("/cli/dir")
        );
        assert_eq!(settings.library_dir(None).unwrap(), PathBuf::from("/env/dir"));
        assert!(AppSettings::default().library_dir(None).is_err());
    }
}
