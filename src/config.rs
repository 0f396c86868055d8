//! Layered configuration: config file -> environment variables -> CLI flags, in that
//! priority order, validated once at startup.

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::workspace::WorkspaceLimits;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Tunables that drive `WorkspaceLimits` (spec §5's concurrency model) plus the memory
/// feature flag (spec §6: "a feature flag to disable memory").
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub llm_concurrency: usize,
    pub db_concurrency: usize,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub llm_timeout_secs: u64,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub query_timeout_secs: u64,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub default_deadline_secs: u64,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub pagination_ttl_secs: u64,
    pub memory_enabled: bool,
}

impl EngineConfig {
    pub fn workspace_limits(&self) -> WorkspaceLimits {
        WorkspaceLimits {
            llm_concurrency: self.llm_concurrency,
            db_concurrency: self.db_concurrency,
            llm_timeout: Duration::from_secs(self.llm_timeout_secs),
            query_timeout: Duration::from_secs(self.query_timeout_secs),
            pagination_ttl: Duration::from_secs(self.pagination_ttl_secs),
        }
    }

    pub fn default_deadline(&self) -> Duration {
        Duration::from_secs(self.default_deadline_secs)
    }
}

/// Command line argument overrides (highest priority).
#[derive(Parser, Debug, Clone)]
#[command(name = "aqe")]
#[command(version, about = "Analytical Query Engine")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// LLM gateway base URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub llm_api_base: Option<String>,

    /// LLM gateway API key (overrides config file)
    #[arg(long, value_name = "KEY")]
    pub llm_api_key: Option<String>,

    /// Logging level (overrides config file, e.g., "info,analytical_query_engine=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Default per-request deadline (overrides config file, e.g., "30s", "2m")
    #[arg(long, value_name = "DURATION")]
    pub default_deadline: Option<String>,

    /// Disable vector memory regardless of config file
    #[arg(long)]
    pub disable_memory: bool,
}

impl Config {
    /// Loading order (priority from highest to lowest): CLI args, env vars (`APP_`
    /// prefix), config file, defaults.
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();

        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("APP_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
        }
        if let Ok(host) = std::env::var("APP_DATABASE_HOST") {
            self.database.host = host;
        }
        if let Ok(port) = std::env::var("APP_DATABASE_PORT")
            && let Ok(port) = port.parse()
        {
            self.database.port = port;
        }
        if let Ok(user) = std::env::var("APP_DATABASE_USER") {
            self.database.user = user;
        }
        if let Ok(password) = std::env::var("APP_DATABASE_PASSWORD") {
            self.database.password = password;
        }
        if let Ok(api_base) = std::env::var("APP_LLM_API_BASE") {
            self.llm.api_base = api_base;
        }
        if let Ok(api_key) = std::env::var("APP_LLM_API_KEY") {
            self.llm.api_key = api_key;
        }
        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(deadline) = std::env::var("APP_DEFAULT_DEADLINE")
            && let Ok(secs) = parse_duration_to_secs(&deadline)
        {
            self.engine.default_deadline_secs = secs;
        }
        if let Ok(enabled) = std::env::var("APP_MEMORY_ENABLED")
            && let Ok(val) = enabled.parse()
        {
            self.engine.memory_enabled = val;
        }
    }

    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.server_port {
            self.server.port = port;
        }
        if let Some(api_base) = &args.llm_api_base {
            self.llm.api_base = api_base.clone();
        }
        if let Some(api_key) = &args.llm_api_key {
            self.llm.api_key = api_key.clone();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if let Some(deadline) = &args.default_deadline {
            match parse_duration_to_secs(deadline) {
                Ok(secs) => self.engine.default_deadline_secs = secs,
                Err(e) => tracing::warn!("invalid --default-deadline '{}': {}", deadline, e),
            }
        }
        if args.disable_memory {
            self.engine.memory_enabled = false;
        }
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.port == 0 {
            anyhow::bail!("server.port cannot be 0");
        }
        if self.database.host.is_empty() {
            anyhow::bail!("database.host cannot be empty");
        }
        if self.llm.api_base.is_empty() {
            anyhow::bail!("llm.api_base cannot be empty");
        }
        if self.engine.llm_concurrency == 0 || self.engine.db_concurrency == 0 {
            anyhow::bail!("engine concurrency limits must be > 0");
        }
        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths = ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];
        possible_paths.iter().find(|p| Path::new(p).exists()).map(|p| p.to_string())
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 3306, user: "root".to_string(), password: String::new(), database: String::new() }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self { api_base: "https://api.openai.com/v1".to_string(), api_key: String::new(), model: "gpt-4o-mini".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,analytical_query_engine=debug".to_string(), file: Some("logs/aqe.log".to_string()) }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            llm_concurrency: 4,
            db_concurrency: 10,
            llm_timeout_secs: 30,
            query_timeout_secs: 15,
            default_deadline_secs: 60,
            pagination_ttl_secs: 3600,
            memory_enabled: true,
        }
    }
}

fn parse_duration_to_secs(input: &str) -> Result<u64, String> {
    if let Ok(val) = input.parse::<u64>() {
        return Ok(val);
    }

    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: u64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(n),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(n * 60),
        "h" | "hr" | "hour" | "hours" => Ok(n * 60 * 60),
        _ => Err(format!("unsupported unit: {unit}")),
    }
}

fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = u64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of seconds or a string like '30s', '5m', '1h'")
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v >= 0 { Ok(v as u64) } else { Err(E::custom("negative not allowed")) }
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(v).map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(&v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}
