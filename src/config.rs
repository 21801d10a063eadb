//! Server configuration from command line (`--key=value`), environment and `.env`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_TOKEN: &str = "switchboard-dev-secret";
/// One day.
pub const DEFAULT_JWT_EXPIRES_IN: u64 = 86_400;
pub const DEFAULT_API_PREFIX: &str = "/v1";
pub const DEFAULT_STATIC_PATH: &str = "/uploads";
/// 10 MiB.
pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

#[derive(Parser, Debug, Clone)]
#[command(name = "switchboard")]
#[command(about = "Registration-driven HTTP server")]
#[command(version)]
pub struct ServerConfig {
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// HS256 secret for issuing and verifying access tokens.
    #[arg(long, env = "APP_TOKEN", default_value = DEFAULT_TOKEN, hide_env_values = true)]
    pub token: String,

    /// Token lifetime in seconds.
    #[arg(long = "jwt-expires-in", env = "JWT_EXPIRES_IN", default_value_t = DEFAULT_JWT_EXPIRES_IN)]
    pub jwt_expires_in: u64,

    /// Mount point for every controller.
    #[arg(long = "api-prefix", env = "API_PREFIX", default_value = DEFAULT_API_PREFIX)]
    pub api_prefix: String,

    /// When set, a PostgreSQL data source is connected at startup.
    #[arg(long = "database-url", env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Directory served as static files under `static_path`.
    #[arg(long = "static-dir", env = "STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    #[arg(long = "static-path", env = "STATIC_PATH", default_value = DEFAULT_STATIC_PATH)]
    pub static_path: String,

    /// Maximum request body size in bytes.
    #[arg(long = "body-limit", env = "BODY_LIMIT", default_value_t = DEFAULT_BODY_LIMIT)]
    pub body_limit: usize,

    /// Whether this process installs cron triggers. Run exactly one
    /// coordinator per deployment.
    #[arg(long, env = "SCHEDULER_COORDINATOR", default_value_t = true, action = ArgAction::Set)]
    pub coordinator: bool,
}

impl Default for ServerConfig {
    /// Built-in defaults; reads neither arguments nor environment.
    fn default() -> Self {
        ServerConfig {
            port: DEFAULT_PORT,
            token: DEFAULT_TOKEN.to_string(),
            jwt_expires_in: DEFAULT_JWT_EXPIRES_IN,
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            database_url: None,
            static_dir: None,
            static_path: DEFAULT_STATIC_PATH.to_string(),
            body_limit: DEFAULT_BODY_LIMIT,
            coordinator: true,
        }
    }
}

impl ServerConfig {
    /// Load `.env` if present, then parse process arguments and environment.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self::parse()
    }

    /// Parse from explicit arguments (first item is the program name).
    pub fn from_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::try_parse_from(args)
    }

    pub fn jwt_expires_in(&self) -> Duration {
        Duration::from_secs(self.jwt_expires_in)
    }

    /// `api_prefix` with a leading slash and no trailing one; `/` stays `/`.
    pub fn normalized_prefix(&self) -> String {
        normalize_path(&self.api_prefix)
    }
}

pub(crate) fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
