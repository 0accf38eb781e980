//! Configuration management for nickreg

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default per-account nick quota
pub const DEFAULT_MAX_PER_ACCOUNT: usize = 5;

/// Default maximum nick length
pub const DEFAULT_NICK_MAX_LEN: usize = 30;

/// Default expiry window
pub const DEFAULT_EXPIRE_TIME: &str = "21d";

/// Default expiry sweep interval (seconds)
pub const DEFAULT_SWEEP_INTERVAL: u64 = 3600;

/// Who may issue registrations
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationMode {
    /// Only services (remote servers) may register
    #[default]
    Services,

    /// Privileged users may register
    Opers,

    /// Any user may register their own nick
    Users,
}

impl std::str::FromStr for RegistrationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "services" => Ok(RegistrationMode::Services),
            "opers" => Ok(RegistrationMode::Opers),
            "users" => Ok(RegistrationMode::Users),
            other => Err(Error::InvalidConfig(format!(
                "registration mode must be one of: services, opers, users (got '{}')",
                other
            ))),
        }
    }
}

/// Local server identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server name, as peers know it
    pub name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            name: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "nickreg.local".to_string()),
        }
    }
}

/// Registration policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Who may register
    #[serde(default)]
    pub mode: RegistrationMode,

    /// Nicks an account may hold before further registrations are refused
    #[serde(default = "default_max_per_account")]
    pub max_per_account: usize,

    /// Longest acceptable nick
    #[serde(default = "default_nick_max_len")]
    pub nick_max_len: usize,
}

fn default_max_per_account() -> usize {
    DEFAULT_MAX_PER_ACCOUNT
}

fn default_nick_max_len() -> usize {
    DEFAULT_NICK_MAX_LEN
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        RegistrationConfig {
            mode: RegistrationMode::default(),
            max_per_account: DEFAULT_MAX_PER_ACCOUNT,
            nick_max_len: DEFAULT_NICK_MAX_LEN,
        }
    }
}

/// Expiry of unused registrations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryConfig {
    /// How long a nick may go unused before it is purged ("21d", "1w2d", "0" disables)
    #[serde(default = "default_expire_time")]
    pub expire_time: String,

    /// Sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_expire_time() -> String {
    DEFAULT_EXPIRE_TIME.to_string()
}

fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        ExpiryConfig {
            expire_time: default_expire_time(),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl ExpiryConfig {
    /// Parsed expiry window
    pub fn window(&self) -> Result<Duration> {
        parse_duration(&self.expire_time)
    }

    /// Sweep interval
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter directive (trace, debug, info, warn, error, or an env-filter string)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Config version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Server identity
    #[serde(default)]
    pub server: ServerConfig,

    /// Registration policy
    #[serde(default)]
    pub registration: RegistrationConfig,

    /// Expiry
    #[serde(default)]
    pub expiry: ExpiryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Config {
            version: default_version(),
            server: ServerConfig::default(),
            registration: RegistrationConfig::default(),
            expiry: ExpiryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nickreg")
            .join("config.yaml")
    }

    /// Load configuration from a file (YAML or JSON), with environment variable
    /// substitution and overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        // Perform environment variable substitution
        let content = Self::substitute_env_vars(&content);

        let mut config: Config = if is_yaml(path_ref) {
            serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse YAML config: {}", e)))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)))?
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `NICKREG_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(name) = std::env::var("NICKREG_SERVER_NAME") {
            let name = name.trim().to_string();
            if !name.is_empty() {
                self.server.name = name;
            }
        }

        if let Ok(mode) = std::env::var("NICKREG_MODE") {
            self.registration.mode = mode.parse()?;
        }

        if let Ok(max) = std::env::var("NICKREG_MAX_PER_ACCOUNT") {
            self.registration.max_per_account = max.trim().parse().map_err(|_| {
                Error::InvalidConfig("Invalid NICKREG_MAX_PER_ACCOUNT".to_string())
            })?;
        }

        if let Ok(expire) = std::env::var("NICKREG_EXPIRE_TIME") {
            self.expiry.expire_time = expire.trim().to_string();
        }

        Ok(())
    }

    /// Substitute environment variables in config content.
    /// Supports ${VAR_NAME} syntax; unset variables are left as-is.
    fn substitute_env_vars(content: &str) -> String {
        let mut result = content.to_string();

        let re = match regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
            Ok(re) => re,
            Err(_) => return result,
        };

        for cap in re.captures_iter(content) {
            let full_match = &cap[0];
            let var_name = &cap[1];

            if let Ok(value) = std::env::var(var_name) {
                result = result.replace(full_match, &value);
            }
        }

        result
    }

    /// Save configuration to a file (format determined by extension)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        let content = if is_yaml(path_ref) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };

        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(path_ref, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let name = &self.server.name;
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(Error::InvalidConfig(format!(
                "server name must be non-empty and contain no whitespace (got '{}')",
                name
            )));
        }

        if self.registration.max_per_account == 0 {
            return Err(Error::InvalidConfig(
                "max_per_account must be greater than 0".to_string(),
            ));
        }

        if self.registration.nick_max_len == 0 {
            return Err(Error::InvalidConfig(
                "nick_max_len must be greater than 0".to_string(),
            ));
        }

        self.expiry.window()?;

        if self.expiry.sweep_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "sweep_interval_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Parse a duration such as `90`, `45s`, `1h30m`, `21d` or `1w2d`.
///
/// A bare number is seconds. Units: s, m, h, d, w, y (365 days); case-insensitive.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidConfig("empty duration".to_string()));
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit: u64 = match c.to_ascii_lowercase() {
            's' => 1,
            'm' => 60,
            'h' => 60 * 60,
            'd' => 24 * 60 * 60,
            'w' => 7 * 24 * 60 * 60,
            'y' => 365 * 24 * 60 * 60,
            _ => {
                return Err(Error::InvalidConfig(format!(
                    "invalid duration '{}': unknown unit '{}'",
                    input, c
                )))
            }
        };
        if digits.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "invalid duration '{}': unit '{}' without a number",
                input, c
            )));
        }
        total = total.saturating_add(parse_count(input, &digits)?.saturating_mul(unit));
        digits.clear();
    }
    if !digits.is_empty() {
        total = total.saturating_add(parse_count(input, &digits)?);
    }

    Ok(Duration::from_secs(total))
}

fn parse_count(input: &str, digits: &str) -> Result<u64> {
    digits
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("invalid duration '{}'", input)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("21d").unwrap(), Duration::from_secs(21 * 86400));
        assert_eq!(parse_duration("1w2d").unwrap(), Duration::from_secs(9 * 86400));
        assert_eq!(parse_duration("2D").unwrap(), Duration::from_secs(2 * 86400));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("d").is_err());
        assert!(parse_duration("3x").is_err());
        assert!(parse_duration("1h 30m").is_err());
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("users".parse::<RegistrationMode>().unwrap(), RegistrationMode::Users);
        assert_eq!("OPERS".parse::<RegistrationMode>().unwrap(), RegistrationMode::Opers);
        assert!("everyone".parse::<RegistrationMode>().is_err());
    }

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.registration.mode, RegistrationMode::Services);
        assert_eq!(config.registration.max_per_account, 5);
        assert_eq!(config.expiry.window().unwrap(), Duration::from_secs(21 * 86400));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.server.name = "has space".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.registration.max_per_account = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.expiry.expire_time = "soon".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = Config::default();
        config.server.name = "hub.example.net".to_string();
        config.registration.mode = RegistrationMode::Users;
        config.registration.max_per_account = 3;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.server.name, "hub.example.net");
        assert_eq!(loaded.registration.mode, RegistrationMode::Users);
        assert_eq!(loaded.registration.max_per_account, 3);
    }

    #[test]
    fn test_json_partial_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "server": { "name": "leaf.example.net" }, "registration": { "mode": "opers" } }"#,
        )
        .unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.registration.mode, RegistrationMode::Opers);
        assert_eq!(loaded.registration.nick_max_len, DEFAULT_NICK_MAX_LEN);
        assert_eq!(loaded.expiry.expire_time, DEFAULT_EXPIRE_TIME);
    }

    #[test]
    fn test_env_substitution() {
        std::env::set_var("NICKREG_TEST_SUBST_NAME", "subst.example.net");
        let content = "server:\n  name: ${NICKREG_TEST_SUBST_NAME}\n  other: ${NICKREG_TEST_UNSET_VAR}\n";
        let result = Config::substitute_env_vars(content);
        assert!(result.contains("name: subst.example.net"));
        assert!(result.contains("${NICKREG_TEST_UNSET_VAR}"));
    }
}
