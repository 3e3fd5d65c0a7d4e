use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use secrecy::SecretString;
use sse::backoff::{Backoff, DEFAULT_MAX_ATTEMPTS};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default backend used when `BACKEND_BASE_URL` is not set.
pub const DEFAULT_BACKEND_BASE_URL: &str = "http://localhost:4000";

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// The base URL of the backend serving `/posts/{id}/events`.
    #[arg(short, long, env, default_value = DEFAULT_BACKEND_BASE_URL)]
    backend_base_url: String,

    /// The bearer credential sent in the `Authorization` header of every stream request.
    #[arg(long, env, hide_env_values = true)]
    bearer_token: Option<String>,

    /// Comma separated list of post ids whose event streams to follow.
    #[arg(long, env, value_delimiter = ',')]
    pub post_ids: Vec<String>,

    /// Delay in milliseconds before the first reconnect attempt; doubles on every attempt.
    #[arg(long, env, default_value_t = 1000)]
    pub reconnect_base_delay_ms: u64,

    /// Upper bound in milliseconds for the delay between reconnect attempts.
    #[arg(long, env, default_value_t = 30_000)]
    pub reconnect_max_delay_ms: u64,

    /// Number of consecutive failed reconnect attempts before a stream gives up.
    #[arg(long, env, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub reconnect_max_attempts: u32,

    /// Timeout in seconds for establishing the connection of a stream request
    #[arg(long, env, default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn backend_base_url(&self) -> &str {
        &self.backend_base_url
    }

    pub fn set_backend_base_url(mut self, backend_base_url: String) -> Self {
        self.backend_base_url = backend_base_url;
        self
    }

    /// Returns the bearer credential, if configured.
    pub fn bearer_token(&self) -> Option<SecretString> {
        self.bearer_token.clone().map(SecretString::new)
    }

    pub fn set_bearer_token(mut self, bearer_token: String) -> Self {
        self.bearer_token = Some(bearer_token);
        self
    }

    /// The reconnect policy built from the `reconnect_*` settings.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.reconnect_max_attempts)
            .with_base_delay(Duration::from_millis(self.reconnect_base_delay_ms))
            .with_max_delay(Duration::from_millis(self.reconnect_max_delay_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }
}
