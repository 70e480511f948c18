//! Application Configuration Settings
//!
//! Configuration types loaded once at startup from environment variables
//! (with `.env` defaults applied by the binary) and validated as a whole:
//! every failing field is reported, not just the first.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;

/// Workbook extensions the sink can produce.
pub const ALLOWED_WORKBOOK_EXTENSIONS: &[&str] = &["xlsx"];

const PLACEHOLDER_USER: &str = "REPLACE_WITH_YOUR_USERNAME";
const PLACEHOLDER_PASSWORD: &str = "REPLACE_WITH_YOUR_PASSWORD";
const PLACEHOLDER_ACCOUNT: &str = "REPLACE_WITH_YOUR_ACCOUNT";

/// Excel's limit on sheet name length.
const MAX_SHEET_NAME_LEN: usize = 31;

// =============================================================================
// Profile
// =============================================================================

/// Broker environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    /// Production market data.
    #[default]
    Live,
    /// Primary's reMarkets sandbox.
    Remarket,
}

impl Profile {
    /// Parse a profile name (case-insensitive).
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "LIVE" => Some(Self::Live),
            "REMARKET" | "REMARKETS" => Some(Self::Remarket),
            _ => None,
        }
    }

    /// Profile name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "LIVE",
            Self::Remarket => "REMARKET",
        }
    }

    /// REST base URL used when none is configured.
    #[must_use]
    pub const fn default_api_url(&self) -> &'static str {
        match self {
            Self::Live => "https://api.cocos.xoms.com.ar/",
            Self::Remarket => "https://api.remarkets.primary.com.ar/",
        }
    }

    /// WebSocket URL used when none is configured.
    #[must_use]
    pub const fn default_ws_url(&self) -> &'static str {
        match self {
            Self::Live => "wss://api.cocos.xoms.com.ar/",
            Self::Remarket => "wss://api.remarkets.primary.com.ar/",
        }
    }
}

// =============================================================================
// Settings Groups
// =============================================================================

/// Broker login.
#[derive(Clone)]
pub struct Credentials {
    user: String,
    password: String,
    account: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(user: String, password: String, account: String) -> Self {
        Self {
            user,
            password,
            account,
        }
    }

    /// Username.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Trading account.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("account", &"[REDACTED]")
            .finish()
    }
}

/// Broker endpoints and login.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Selected profile.
    pub profile: Profile,
    /// REST base URL, always ending in `/`.
    pub api_url: String,
    /// WebSocket URL.
    pub ws_url: String,
    /// Login.
    pub credentials: Credentials,
}

/// WebSocket session resilience.
#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    /// Waits between consecutive reconnect attempts; the last entry repeats.
    pub delays: Vec<Duration>,
    /// Maximum consecutive attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
    /// Session is considered dead after this long without a frame.
    pub idle_timeout: Duration,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delays: [1, 2, 4, 8, 16, 30].map(Duration::from_secs).to_vec(),
            max_attempts: 0,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Output workbook.
#[derive(Debug, Clone)]
pub struct WorkbookSettings {
    /// File name.
    pub file_name: String,
    /// Directory holding the file.
    pub directory: PathBuf,
    /// Sheet receiving the quote board.
    pub homebroker_sheet: String,
    /// Sheet mirroring the listed tickers.
    pub tickers_sheet: String,
}

impl WorkbookSettings {
    /// Full path of the workbook.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

/// Process-level settings.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// CSV file listing raw tickers by instrument class.
    pub tickers_file: PathBuf,
    /// Time between bulk flushes.
    pub flush_interval: Duration,
    /// Directory for the instrument directory cache.
    pub instrument_cache_dir: PathBuf,
    /// Instrument cache freshness.
    pub instrument_cache_ttl: Duration,
    /// Check symbols against the instrument directory before subscribing.
    pub validate_symbols: bool,
    /// Status HTTP port (0 = disabled).
    pub status_port: u16,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            tickers_file: PathBuf::from("tickers.csv"),
            flush_interval: Duration::from_millis(2_000),
            instrument_cache_dir: PathBuf::from("data/cache"),
            instrument_cache_ttl: Duration::from_secs(30 * 60),
            validate_symbols: true,
            status_port: 0,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Broker endpoints and login.
    pub broker: BrokerSettings,
    /// Session resilience.
    pub reconnect: ReconnectSettings,
    /// Output workbook.
    pub workbook: WorkbookSettings,
    /// Process-level settings.
    pub runtime: RuntimeSettings,
}

impl AppConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns every validation failure found.
    pub fn from_env() -> Result<Self, ConfigErrors> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variables.
    ///
    /// # Errors
    ///
    /// Returns every validation failure found.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigErrors>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = EnvReader::new(lookup);

        let profile = match env.get("PYROFEX_ENVIRONMENT") {
            None => Profile::default(),
            Some(value) => Profile::from_str_case_insensitive(&value).unwrap_or_else(|| {
                env.fail(ConfigError::InvalidValue {
                    key: "PYROFEX_ENVIRONMENT",
                    value,
                    expected: "LIVE or REMARKET",
                });
                Profile::default()
            }),
        };

        let api_url = env.url("PYROFEX_API_URL", profile.default_api_url(), "https");
        let ws_url = env.url("PYROFEX_WS_URL", profile.default_ws_url(), "wss");

        let credentials = Credentials::new(
            env.credential("PYROFEX_USER", PLACEHOLDER_USER),
            env.credential("PYROFEX_PASSWORD", PLACEHOLDER_PASSWORD),
            env.credential("PYROFEX_ACCOUNT", PLACEHOLDER_ACCOUNT),
        );

        let reconnect_defaults = ReconnectSettings::default();
        let reconnect = ReconnectSettings {
            delays: env.delays("PYROFEX_RECONNECT_DELAYS_SECS", reconnect_defaults.delays),
            max_attempts: env.parse(
                "PYROFEX_MAX_RECONNECT_ATTEMPTS",
                reconnect_defaults.max_attempts,
                "a non-negative integer",
            ),
            idle_timeout: env.positive_secs(
                "PYROFEX_IDLE_TIMEOUT_SECS",
                reconnect_defaults.idle_timeout,
            ),
        };

        let workbook = WorkbookSettings {
            file_name: env.workbook_file("EXCEL_FILE", "EPGB OC-DI - Python.xlsx"),
            directory: env.directory("EXCEL_PATH", "./"),
            homebroker_sheet: env.sheet_name("SHEET_HOMEBROKER", "HomeBroker"),
            tickers_sheet: env.sheet_name("SHEET_TICKERS", "Tickers"),
        };
        if workbook.homebroker_sheet.eq_ignore_ascii_case(&workbook.tickers_sheet) {
            env.fail(ConfigError::InvalidSheetName {
                key: "SHEET_TICKERS",
                reason: "must differ from SHEET_HOMEBROKER".to_string(),
            });
        }

        let runtime_defaults = RuntimeSettings::default();
        let flush_ms: u64 = env.parse(
            "FLUSH_INTERVAL_MS",
            u64::try_from(runtime_defaults.flush_interval.as_millis()).unwrap_or(2_000),
            "milliseconds",
        );
        if flush_ms < 100 {
            env.fail(ConfigError::InvalidValue {
                key: "FLUSH_INTERVAL_MS",
                value: flush_ms.to_string(),
                expected: "at least 100",
            });
        }
        let ttl_minutes: u64 = env.parse("INSTRUMENT_CACHE_TTL_MINUTES", 30, "minutes");

        let runtime = RuntimeSettings {
            tickers_file: env
                .get("TICKERS_FILE")
                .map_or(runtime_defaults.tickers_file, PathBuf::from),
            flush_interval: Duration::from_millis(flush_ms),
            instrument_cache_dir: env
                .get("INSTRUMENT_CACHE_DIR")
                .map_or(runtime_defaults.instrument_cache_dir, PathBuf::from),
            instrument_cache_ttl: Duration::from_secs(ttl_minutes.saturating_mul(60)),
            validate_symbols: env.bool("VALIDATE_SYMBOLS", runtime_defaults.validate_symbols),
            status_port: env.parse("STATUS_PORT", runtime_defaults.status_port, "a port number"),
        };

        env.finish()?;

        Ok(Self {
            broker: BrokerSettings {
                profile,
                api_url,
                ws_url,
                credentials,
            },
            reconnect,
            workbook,
            runtime,
        })
    }
}

// =============================================================================
// Errors
// =============================================================================

/// A single configuration failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Value could not be parsed or is out of range.
    #[error("{key}: invalid value '{value}' (expected {expected})")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Offending value.
        value: String,
        /// What was expected.
        expected: &'static str,
    },

    /// URL uses the wrong scheme or has no host.
    #[error("{key}: '{value}' must be a {scheme}:// URL")]
    InsecureUrl {
        /// Variable name.
        key: &'static str,
        /// Offending value.
        value: String,
        /// Required scheme.
        scheme: &'static str,
    },

    /// Variable is set to an empty value.
    #[error("{0} cannot be empty")]
    EmptyValue(&'static str),

    /// Credential still holds its template placeholder.
    #[error("{0} still has its placeholder value; set your broker credentials")]
    Placeholder(&'static str),

    /// Workbook extension is not supported.
    #[error("{key}: '{file}' must have one of the extensions {allowed:?}")]
    UnsupportedExtension {
        /// Variable name.
        key: &'static str,
        /// Offending file name.
        file: String,
        /// Supported extensions.
        allowed: &'static [&'static str],
    },

    /// Directory does not exist.
    #[error("{key}: directory '{path}' does not exist")]
    MissingDirectory {
        /// Variable name.
        key: &'static str,
        /// Offending path.
        path: String,
    },

    /// Sheet name is not acceptable to Excel.
    #[error("{key}: {reason}")]
    InvalidSheetName {
        /// Variable name.
        key: &'static str,
        /// Why the name was rejected.
        reason: String,
    },
}

/// Every configuration failure found in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigErrors(Vec<ConfigError>);

impl ConfigErrors {
    /// Individual failures.
    pub fn iter(&self) -> impl Iterator<Item = &ConfigError> {
        self.0.iter()
    }

    /// Number of failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no failures.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} configuration error(s)", self.0.len())?;
        for error in &self.0 {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

// =============================================================================
// Environment Reader
// =============================================================================

/// Reads variables and accumulates failures instead of stopping at the first.
struct EnvReader<F> {
    lookup: F,
    errors: Vec<ConfigError>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    const fn new(lookup: F) -> Self {
        Self {
            lookup,
            errors: Vec::new(),
        }
    }

    fn fail(&mut self, error: ConfigError) {
        self.errors.push(error);
    }

    fn finish(self) -> Result<(), ConfigErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigErrors(self.errors))
        }
    }

    /// Trimmed value, `None` when unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).map(|v| v.trim().to_string())
    }

    fn non_empty(&mut self, key: &'static str, default: &str) -> String {
        match self.get(key) {
            None => default.to_string(),
            Some(value) if value.is_empty() => {
                self.fail(ConfigError::EmptyValue(key));
                default.to_string()
            }
            Some(value) => value,
        }
    }

    fn parse<T>(&mut self, key: &'static str, default: T, expected: &'static str) -> T
    where
        T: FromStr,
    {
        let Some(value) = self.get(key) else {
            return default;
        };
        value.parse().unwrap_or_else(|_| {
            self.fail(ConfigError::InvalidValue {
                key,
                value,
                expected,
            });
            default
        })
    }

    fn bool(&mut self, key: &'static str, default: bool) -> bool {
        let Some(value) = self.get(key) else {
            return default;
        };
        match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                self.fail(ConfigError::InvalidValue {
                    key,
                    value,
                    expected: "true or false",
                });
                default
            }
        }
    }

    fn positive_secs(&mut self, key: &'static str, default: Duration) -> Duration {
        let secs: u64 = self.parse(key, default.as_secs(), "seconds");
        if secs == 0 {
            self.fail(ConfigError::InvalidValue {
                key,
                value: secs.to_string(),
                expected: "a positive number of seconds",
            });
            return default;
        }
        Duration::from_secs(secs)
    }

    fn url(&mut self, key: &'static str, default: &str, scheme: &'static str) -> String {
        let raw = self.non_empty(key, default);
        let parsed = Url::parse(&raw)
            .ok()
            .filter(|url| url.scheme() == scheme && url.host_str().is_some());

        let Some(mut url) = parsed else {
            self.fail(ConfigError::InsecureUrl {
                key,
                value: raw,
                scheme,
            });
            return default.to_string();
        };

        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        url.into()
    }

    fn credential(&mut self, key: &'static str, placeholder: &str) -> String {
        match self.get(key) {
            Some(value) if value.is_empty() => {
                self.fail(ConfigError::EmptyValue(key));
                value
            }
            Some(value) if value != placeholder => value,
            _ => {
                self.fail(ConfigError::Placeholder(key));
                placeholder.to_string()
            }
        }
    }

    fn delays(&mut self, key: &'static str, default: Vec<Duration>) -> Vec<Duration> {
        let Some(value) = self.get(key) else {
            return default;
        };
        let parsed: Option<Vec<Duration>> = value
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs)
            })
            .collect();

        match parsed {
            Some(delays) if !delays.is_empty() => delays,
            _ => {
                self.fail(ConfigError::InvalidValue {
                    key,
                    value,
                    expected: "comma-separated positive seconds, e.g. 1,2,4,8",
                });
                default
            }
        }
    }

    fn workbook_file(&mut self, key: &'static str, default: &str) -> String {
        let file = self.non_empty(key, default);
        let extension = Path::new(&file)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        if !extension.is_some_and(|e| ALLOWED_WORKBOOK_EXTENSIONS.contains(&e.as_str())) {
            self.fail(ConfigError::UnsupportedExtension {
                key,
                file: file.clone(),
                allowed: ALLOWED_WORKBOOK_EXTENSIONS,
            });
        }
        file
    }

    fn directory(&mut self, key: &'static str, default: &str) -> PathBuf {
        let path = PathBuf::from(self.non_empty(key, default));
        if !path.is_dir() {
            self.fail(ConfigError::MissingDirectory {
                key,
                path: path.display().to_string(),
            });
        }
        path
    }

    fn sheet_name(&mut self, key: &'static str, default: &str) -> String {
        let name = self.non_empty(key, default);
        let reason = if name.chars().count() > MAX_SHEET_NAME_LEN {
            Some(format!("sheet name '{name}' is longer than {MAX_SHEET_NAME_LEN} characters"))
        } else if let Some(c) = name.chars().find(|c| "[]:*?/\\".contains(*c)) {
            Some(format!("sheet name '{name}' contains '{c}'"))
        } else if name.starts_with('\'') || name.ends_with('\'') {
            Some(format!("sheet name '{name}' cannot start or end with an apostrophe"))
        } else {
            None
        };

        if let Some(reason) = reason {
            self.fail(ConfigError::InvalidSheetName { key, reason });
        }
        name
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn valid_env() -> HashMap<&'static str, String> {
        HashMap::from([
            ("PYROFEX_USER", "trader".to_string()),
            ("PYROFEX_PASSWORD", "s3cret".to_string()),
            ("PYROFEX_ACCOUNT", "12345".to_string()),
        ])
    }

    fn load(env: &HashMap<&'static str, String>) -> Result<AppConfig, ConfigErrors> {
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_with_credentials() {
        let config = load(&valid_env()).unwrap();

        assert_eq!(config.broker.profile, Profile::Live);
        assert_eq!(config.broker.api_url, "https://api.cocos.xoms.com.ar/");
        assert_eq!(config.broker.ws_url, "wss://api.cocos.xoms.com.ar/");
        assert_eq!(config.workbook.file_name, "EPGB OC-DI - Python.xlsx");
        assert_eq!(config.workbook.homebroker_sheet, "HomeBroker");
        assert_eq!(config.workbook.tickers_sheet, "Tickers");
        assert_eq!(config.runtime.flush_interval, Duration::from_secs(2));
        assert_eq!(config.runtime.instrument_cache_ttl, Duration::from_secs(1800));
        assert_eq!(config.reconnect.delays.len(), 6);
        assert_eq!(config.reconnect.max_attempts, 0);
    }

    #[test]
    fn remarket_profile_picks_sandbox_urls() {
        let mut env = valid_env();
        env.insert("PYROFEX_ENVIRONMENT", "remarket".to_string());
        let config = load(&env).unwrap();

        assert_eq!(config.broker.profile, Profile::Remarket);
        assert!(config.broker.api_url.contains("remarkets"));
    }

    #[test]
    fn placeholders_are_rejected() {
        let errors = load(&HashMap::new()).unwrap_err();
        let placeholders: Vec<_> = errors
            .iter()
            .filter(|e| matches!(e, ConfigError::Placeholder(_)))
            .collect();
        assert_eq!(placeholders.len(), 3);
    }

    #[test]
    fn collects_every_failure() {
        let mut env = valid_env();
        env.insert("PYROFEX_ENVIRONMENT", "paper".to_string());
        env.insert("PYROFEX_API_URL", "http://insecure.example/".to_string());
        env.insert("PYROFEX_WS_URL", "ws://insecure.example/".to_string());
        env.insert("PYROFEX_PASSWORD", String::new());
        env.insert("EXCEL_FILE", "book.xlsb".to_string());
        env.insert("SHEET_HOMEBROKER", "Bad/Name".to_string());
        env.insert("FLUSH_INTERVAL_MS", "fast".to_string());
        env.insert("PYROFEX_RECONNECT_DELAYS_SECS", "1,0,4".to_string());

        let errors = load(&env).unwrap_err();
        assert_eq!(errors.len(), 8, "{errors}");

        let text = errors.to_string();
        assert!(text.contains("PYROFEX_ENVIRONMENT"));
        assert!(text.contains("https://"));
        assert!(text.contains("wss://"));
        assert!(text.contains("PYROFEX_PASSWORD cannot be empty"));
        assert!(text.contains("book.xlsb"));
        assert!(text.contains("Bad/Name"));
    }

    #[test]
    fn missing_workbook_directory() {
        let mut env = valid_env();
        env.insert("EXCEL_PATH", "/definitely/not/here".to_string());
        let errors = load(&env).unwrap_err();
        assert!(matches!(
            errors.iter().next(),
            Some(ConfigError::MissingDirectory { key: "EXCEL_PATH", .. })
        ));
    }

    #[test]
    fn same_sheet_names_rejected() {
        let mut env = valid_env();
        env.insert("SHEET_TICKERS", "homebroker".to_string());
        assert!(load(&env).is_err());
    }

    #[test]
    fn api_url_gets_trailing_slash() {
        let mut env = valid_env();
        env.insert("PYROFEX_API_URL", "https://broker.example/api".to_string());
        let config = load(&env).unwrap();
        assert_eq!(config.broker.api_url, "https://broker.example/api/");
    }

    #[test]
    fn custom_reconnect_delays() {
        let mut env = valid_env();
        env.insert("PYROFEX_RECONNECT_DELAYS_SECS", "2, 5, 10".to_string());
        env.insert("PYROFEX_MAX_RECONNECT_ATTEMPTS", "7".to_string());
        let config = load(&env).unwrap();
        assert_eq!(
            config.reconnect.delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10)
            ]
        );
        assert_eq!(config.reconnect.max_attempts, 7);
    }

    #[test]
    fn profile_parsing() {
        assert_eq!(Profile::from_str_case_insensitive("live"), Some(Profile::Live));
        assert_eq!(Profile::from_str_case_insensitive("REMARKET"), Some(Profile::Remarket));
        assert_eq!(Profile::from_str_case_insensitive("paper"), None);
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = Credentials::new("user1".into(), "secret456".into(), "acct789".into());
        let debug = format!("{creds:?}");
        assert!(debug.contains("user1"));
        assert!(!debug.contains("secret456"));
        assert!(!debug.contains("acct789"));
        assert!(debug.contains("[REDACTED]"));
    }
}
