use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;

pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
pub const DEFAULT_TARGET_COUNT: u32 = 50;

/// Tuning constants for one harvest. The defaults were tuned against the
/// Spotify web player; other sites will want their own values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestConfig {
    /// Pixels advanced per scroll action.
    pub scroll_step_px: u32,
    /// Pause after a scroll (or consent click) before the next read.
    pub settle: Duration,
    /// Upper bound on waiting for the first rows to mount.
    pub initial_load_timeout: Duration,
    pub initial_poll_interval: Duration,
    /// Hard ceiling on scroll actions per harvest.
    pub max_scroll_attempts: u32,
    /// Soft exit once this many consecutive cycles accept nothing new.
    pub no_progress_threshold: u32,
    /// Soft exit once this many consecutive passes come back stale.
    pub stale_threshold: u32,
    /// Immediate re-reads of a stale frame before it counts against `stale_threshold`.
    pub stale_retries_per_pass: u32,
    /// Container re-locations allowed inside one scroll action.
    pub max_relocations: u32,
    /// Full restarts of a failed list before giving up on it.
    pub list_retries: u32,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            scroll_step_px: 1200,
            settle: Duration::from_millis(200),
            initial_load_timeout: Duration::from_secs(25),
            initial_poll_interval: Duration::from_millis(250),
            max_scroll_attempts: 80,
            no_progress_threshold: 8,
            stale_threshold: 5,
            stale_retries_per_pass: 3,
            max_relocations: 2,
            list_retries: 1,
        }
    }
}

impl HarvestConfig {
    /// Defaults overridden by `HARVEST_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = parse_var(&lookup, "HARVEST_SCROLL_STEP_PX")? {
            self.scroll_step_px = v;
        }
        if let Some(ms) = parse_var(&lookup, "HARVEST_SETTLE_MS")? {
            self.settle = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "HARVEST_INITIAL_LOAD_TIMEOUT_MS")? {
            self.initial_load_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "HARVEST_POLL_INTERVAL_MS")? {
            self.initial_poll_interval = Duration::from_millis(ms);
        }
        if let Some(v) = parse_var(&lookup, "HARVEST_MAX_SCROLL_ATTEMPTS")? {
            self.max_scroll_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "HARVEST_NO_PROGRESS_THRESHOLD")? {
            self.no_progress_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "HARVEST_STALE_THRESHOLD")? {
            self.stale_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "HARVEST_STALE_RETRIES")? {
            self.stale_retries_per_pass = v;
        }
        if let Some(v) = parse_var(&lookup, "HARVEST_MAX_RELOCATIONS")? {
            self.max_relocations = v;
        }
        if let Some(v) = parse_var(&lookup, "HARVEST_LIST_RETRIES")? {
            self.list_retries = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scroll_step_px == 0 {
            bail!("HARVEST_SCROLL_STEP_PX must be greater than zero");
        }
        if self.max_scroll_attempts == 0 {
            bail!("HARVEST_MAX_SCROLL_ATTEMPTS must be greater than zero");
        }
        if self.stale_threshold == 0 {
            bail!("HARVEST_STALE_THRESHOLD must be greater than zero");
        }
        if self.initial_poll_interval.is_zero() && !self.initial_load_timeout.is_zero() {
            bail!("HARVEST_POLL_INTERVAL_MS must be greater than zero");
        }
        Ok(())
    }
}

/// Process configuration for the `chart-harvest` binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub webdriver_url: String,
    pub headless: bool,
    pub chrome_profile_dir: Option<String>,
    pub chrome_bin: Option<String>,
    /// List ids or URLs to harvest, in order.
    pub lists: Vec<String>,
    /// `None` means "use the count the page advertises".
    pub target_count: Option<u32>,
    pub harvest: HarvestConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config = Self {
            webdriver_url: lookup("WEBDRIVER_URL")
                .unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string()),
            headless: parse_var(&lookup, "HARVEST_HEADLESS")?.unwrap_or(true),
            chrome_profile_dir: lookup("CHROME_PROFILE_DIR").filter(|s| !s.is_empty()),
            chrome_bin: lookup("CHROME_BIN").filter(|s| !s.is_empty()),
            lists: lookup("HARVEST_LISTS")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            target_count: parse_var(&lookup, "HARVEST_TARGET_COUNT")?,
            harvest: HarvestConfig::default().with_overrides(&lookup)?,
        };

        if config.target_count == Some(0) {
            bail!("HARVEST_TARGET_COUNT must be greater than zero");
        }
        Ok(config)
    }

    pub fn log_summary(&self) {
        info!(
            webdriver_url = self.webdriver_url.as_str(),
            headless = self.headless,
            chrome_profile = self.chrome_profile_dir.is_some(),
            lists = self.lists.len(),
            target_count = ?self.target_count,
            max_scroll_attempts = self.harvest.max_scroll_attempts,
            settle_ms = self.harvest.settle.as_millis() as u64,
            "Harvest configuration loaded"
        );
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.webdriver_url, DEFAULT_WEBDRIVER_URL);
        assert!(config.headless);
        assert!(config.lists.is_empty());
        assert_eq!(config.target_count, None);
        assert_eq!(config.harvest, HarvestConfig::default());
    }

    #[test]
    fn lists_are_split_and_trimmed() {
        let config =
            AppConfig::from_lookup(lookup(&[("HARVEST_LISTS", " a , ,b,c ")])).unwrap();
        assert_eq!(config.lists, vec!["a", "b", "c"]);
    }

    #[test]
    fn harvest_overrides_apply() {
        let config = AppConfig::from_lookup(lookup(&[
            ("HARVEST_SETTLE_MS", "350"),
            ("HARVEST_NO_PROGRESS_THRESHOLD", "3"),
            ("HARVEST_HEADLESS", "false"),
        ]))
        .unwrap();
        assert_eq!(config.harvest.settle, Duration::from_millis(350));
        assert_eq!(config.harvest.no_progress_threshold, 3);
        assert!(!config.headless);
    }

    #[test]
    fn invalid_numbers_are_errors() {
        let err = AppConfig::from_lookup(lookup(&[("HARVEST_MAX_SCROLL_ATTEMPTS", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("HARVEST_MAX_SCROLL_ATTEMPTS"));
    }

    #[test]
    fn zero_step_is_rejected() {
        assert!(AppConfig::from_lookup(lookup(&[("HARVEST_SCROLL_STEP_PX", "0")])).is_err());
    }

    #[test]
    fn zero_target_is_rejected() {
        assert!(AppConfig::from_lookup(lookup(&[("HARVEST_TARGET_COUNT", "0")])).is_err());
    }
}
