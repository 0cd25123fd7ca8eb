use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validator::is_version_token;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub slack: SlackConfig,
    pub upstream: UpstreamConfig,
    pub monitor: MonitorConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub bot_token: SecretString,
    pub api_base_url: String,
    pub prefixes: Vec<String>,
    pub status_channel: String,
    pub schema_channel: String,
    pub ping_channels: Vec<String>,
    pub send_startup_message: bool,
    pub max_payload_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    pub tranquility_url: String,
    pub serenity_url: String,
    pub github_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub lookup_timeout_secs: u64,
    pub max_concurrent_lookups: usize,
    pub max_type_ids: usize,
}

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub version: String,
    pub refresh_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub slack_bot_token: Option<String>,
    pub slack_api_base_url: Option<String>,
    pub tranquility_url: Option<String>,
    pub serenity_url: Option<String>,
    pub monitor_enabled: Option<bool>,
    pub server_port: Option<u16>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            slack: SlackConfig {
                bot_token: String::new().into(),
                api_base_url: "https://slack.com/api".to_string(),
                prefixes: vec!["!esi".to_string(), "!ESI".to_string()],
                status_channel: String::new(),
                schema_channel: String::new(),
                ping_channels: Vec::new(),
                send_startup_message: false,
                max_payload_bytes: 38_000,
            },
            upstream: UpstreamConfig {
                tranquility_url: "https://esi.evetech.net".to_string(),
                serenity_url: "https://esi.evepc.163.com".to_string(),
                github_url: "https://api.github.com".to_string(),
                user_agent: "esibot (+https://github.com/esi/esi-issues)".to_string(),
                timeout_secs: 30,
                lookup_timeout_secs: 5,
                max_concurrent_lookups: 32,
                max_type_ids: 10,
            },
            monitor: MonitorConfig {
                enabled: true,
                version: "latest".to_string(),
                refresh_interval_secs: 60,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 5000,
                graceful_shutdown_secs: 5,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Json },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("esibot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(slack) = patch.slack {
            if let Some(bot_token_value) = slack.bot_token {
                self.slack.bot_token = bot_token_value.into();
            }
            if let Some(api_base_url) = slack.api_base_url {
                self.slack.api_base_url = api_base_url;
            }
            if let Some(prefixes) = slack.prefixes {
                self.slack.prefixes = prefixes;
            }
            if let Some(status_channel) = slack.status_channel {
                self.slack.status_channel = status_channel;
            }
            if let Some(schema_channel) = slack.schema_channel {
                self.slack.schema_channel = schema_channel;
            }
            if let Some(ping_channels) = slack.ping_channels {
                self.slack.ping_channels = ping_channels;
            }
            if let Some(send_startup_message) = slack.send_startup_message {
                self.slack.send_startup_message = send_startup_message;
            }
            if let Some(max_payload_bytes) = slack.max_payload_bytes {
                self.slack.max_payload_bytes = max_payload_bytes;
            }
        }

        if let Some(upstream) = patch.upstream {
            if let Some(tranquility_url) = upstream.tranquility_url {
                self.upstream.tranquility_url = tranquility_url;
            }
            if let Some(serenity_url) = upstream.serenity_url {
                self.upstream.serenity_url = serenity_url;
            }
            if let Some(github_url) = upstream.github_url {
                self.upstream.github_url = github_url;
            }
            if let Some(user_agent) = upstream.user_agent {
                self.upstream.user_agent = user_agent;
            }
            if let Some(timeout_secs) = upstream.timeout_secs {
                self.upstream.timeout_secs = timeout_secs;
            }
            if let Some(lookup_timeout_secs) = upstream.lookup_timeout_secs {
                self.upstream.lookup_timeout_secs = lookup_timeout_secs;
            }
            if let Some(max_concurrent_lookups) = upstream.max_concurrent_lookups {
                self.upstream.max_concurrent_lookups = max_concurrent_lookups;
            }
            if let Some(max_type_ids) = upstream.max_type_ids {
                self.upstream.max_type_ids = max_type_ids;
            }
        }

        if let Some(monitor) = patch.monitor {
            if let Some(enabled) = monitor.enabled {
                self.monitor.enabled = enabled;
            }
            if let Some(version) = monitor.version {
                self.monitor.version = version;
            }
            if let Some(refresh_interval_secs) = monitor.refresh_interval_secs {
                self.monitor.refresh_interval_secs = refresh_interval_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("ESIBOT_SLACK_BOT_TOKEN") {
            self.slack.bot_token = value.into();
        }
        if let Some(value) = read_env("ESIBOT_SLACK_API_BASE_URL") {
            self.slack.api_base_url = value;
        }
        if let Some(value) = read_env("ESIBOT_SLACK_PREFIXES") {
            self.slack.prefixes = parse_list(&value);
        }
        if let Some(value) = read_env("ESIBOT_SLACK_STATUS_CHANNEL") {
            self.slack.status_channel = value;
        }
        if let Some(value) = read_env("ESIBOT_SLACK_SCHEMA_CHANNEL") {
            self.slack.schema_channel = value;
        }
        if let Some(value) = read_env("ESIBOT_SLACK_PING_CHANNELS") {
            self.slack.ping_channels = parse_list(&value);
        }
        if let Some(value) = read_env("ESIBOT_SLACK_SEND_STARTUP_MESSAGE") {
            self.slack.send_startup_message =
                parse_bool("ESIBOT_SLACK_SEND_STARTUP_MESSAGE", &value)?;
        }
        if let Some(value) = read_env("ESIBOT_SLACK_MAX_PAYLOAD_BYTES") {
            self.slack.max_payload_bytes = parse_usize("ESIBOT_SLACK_MAX_PAYLOAD_BYTES", &value)?;
        }

        if let Some(value) = read_env("ESIBOT_UPSTREAM_TRANQUILITY_URL") {
            self.upstream.tranquility_url = value;
        }
        if let Some(value) = read_env("ESIBOT_UPSTREAM_SERENITY_URL") {
            self.upstream.serenity_url = value;
        }
        if let Some(value) = read_env("ESIBOT_UPSTREAM_GITHUB_URL") {
            self.upstream.github_url = value;
        }
        if let Some(value) = read_env("ESIBOT_UPSTREAM_USER_AGENT") {
            self.upstream.user_agent = value;
        }
        if let Some(value) = read_env("ESIBOT_UPSTREAM_TIMEOUT_SECS") {
            self.upstream.timeout_secs = parse_u64("ESIBOT_UPSTREAM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("ESIBOT_UPSTREAM_LOOKUP_TIMEOUT_SECS") {
            self.upstream.lookup_timeout_secs =
                parse_u64("ESIBOT_UPSTREAM_LOOKUP_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("ESIBOT_UPSTREAM_MAX_CONCURRENT_LOOKUPS") {
            self.upstream.max_concurrent_lookups =
                parse_usize("ESIBOT_UPSTREAM_MAX_CONCURRENT_LOOKUPS", &value)?;
        }
        if let Some(value) = read_env("ESIBOT_UPSTREAM_MAX_TYPE_IDS") {
            self.upstream.max_type_ids = parse_usize("ESIBOT_UPSTREAM_MAX_TYPE_IDS", &value)?;
        }

        if let Some(value) = read_env("ESIBOT_MONITOR_ENABLED") {
            self.monitor.enabled = parse_bool("ESIBOT_MONITOR_ENABLED", &value)?;
        }
        if let Some(value) = read_env("ESIBOT_MONITOR_VERSION") {
            self.monitor.version = value;
        }
        if let Some(value) = read_env("ESIBOT_MONITOR_REFRESH_INTERVAL_SECS") {
            self.monitor.refresh_interval_secs =
                parse_u64("ESIBOT_MONITOR_REFRESH_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("ESIBOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        let port = read_env("ESIBOT_SERVER_PORT").or_else(|| read_env("API_PORT"));
        if let Some(value) = port {
            self.server.port = parse_u16("ESIBOT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("ESIBOT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("ESIBOT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("ESIBOT_LOGGING_LEVEL").or_else(|| read_env("LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        if let Some(value) = read_env("ESIBOT_LOGGING_FORMAT") {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(slack_bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = slack_bot_token.into();
        }
        if let Some(slack_api_base_url) = overrides.slack_api_base_url {
            self.slack.api_base_url = slack_api_base_url;
        }
        if let Some(tranquility_url) = overrides.tranquility_url {
            self.upstream.tranquility_url = tranquility_url;
        }
        if let Some(serenity_url) = overrides.serenity_url {
            self.upstream.serenity_url = serenity_url;
        }
        if let Some(monitor_enabled) = overrides.monitor_enabled {
            self.monitor.enabled = monitor_enabled;
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_slack(&self.slack)?;
        validate_upstream(&self.upstream)?;
        validate_monitor(&self.monitor)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("esibot.toml"), PathBuf::from("config/esibot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let bot_token = slack.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.bot_token is required. Get it from https://api.slack.com/apps > Your App > OAuth & Permissions > Bot User OAuth Token".to_string()
        ));
    }
    if !bot_token.starts_with("xoxb-") {
        return Err(ConfigError::Validation(
            "slack.bot_token must start with `xoxb-`. Get it from https://api.slack.com/apps"
                .to_string(),
        ));
    }

    validate_url("slack.api_base_url", &slack.api_base_url)?;

    if slack.prefixes.is_empty() {
        return Err(ConfigError::Validation(
            "slack.prefixes must list at least one command prefix (e.g. `!esi`)".to_string(),
        ));
    }
    if slack.prefixes.iter().any(|prefix| prefix.is_empty() || prefix.contains(char::is_whitespace))
    {
        return Err(ConfigError::Validation(
            "slack.prefixes entries must be non-empty and contain no whitespace".to_string(),
        ));
    }

    if slack.max_payload_bytes < 256 {
        return Err(ConfigError::Validation(
            "slack.max_payload_bytes must be at least 256".to_string(),
        ));
    }

    Ok(())
}

fn validate_upstream(upstream: &UpstreamConfig) -> Result<(), ConfigError> {
    validate_url("upstream.tranquility_url", &upstream.tranquility_url)?;
    validate_url("upstream.serenity_url", &upstream.serenity_url)?;
    validate_url("upstream.github_url", &upstream.github_url)?;

    if upstream.timeout_secs == 0 || upstream.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "upstream.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if upstream.lookup_timeout_secs == 0 || upstream.lookup_timeout_secs > upstream.timeout_secs {
        return Err(ConfigError::Validation(
            "upstream.lookup_timeout_secs must be in range 1..=upstream.timeout_secs".to_string(),
        ));
    }
    if upstream.max_concurrent_lookups == 0 {
        return Err(ConfigError::Validation(
            "upstream.max_concurrent_lookups must be greater than zero".to_string(),
        ));
    }
    if upstream.max_type_ids == 0 || upstream.max_type_ids > 50 {
        return Err(ConfigError::Validation(
            "upstream.max_type_ids must be in range 1..=50".to_string(),
        ));
    }

    Ok(())
}

fn validate_monitor(monitor: &MonitorConfig) -> Result<(), ConfigError> {
    if !is_version_token(&monitor.version) {
        return Err(ConfigError::Validation(format!(
            "monitor.version `{}` is not a known ESI version",
            monitor.version
        )));
    }
    if monitor.refresh_interval_secs < 10 {
        return Err(ConfigError::Validation(
            "monitor.refresh_interval_secs must be at least 10".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_url(key: &str, value: &str) -> Result<(), ConfigError> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{key} must start with http:// or https://"
        )));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    slack: Option<SlackPatch>,
    upstream: Option<UpstreamPatch>,
    monitor: Option<MonitorPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    bot_token: Option<String>,
    api_base_url: Option<String>,
    prefixes: Option<Vec<String>>,
    status_channel: Option<String>,
    schema_channel: Option<String>,
    ping_channels: Option<Vec<String>>,
    send_startup_message: Option<bool>,
    max_payload_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct UpstreamPatch {
    tranquility_url: Option<String>,
    serenity_url: Option<String>,
    github_url: Option<String>,
    user_agent: Option<String>,
    timeout_secs: Option<u64>,
    lookup_timeout_secs: Option<u64>,
    max_concurrent_lookups: Option<usize>,
    max_type_ids: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct MonitorPatch {
    enabled: Option<bool>,
    version: Option<String>,
    refresh_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
