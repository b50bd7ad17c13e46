use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub public_rps: u32,
    pub db_max_connections: u32,
    pub judge_timeout_ms: u64,
    pub judge_url: Option<String>,
    pub python_bin: String,
    pub node_bin: String,
    pub deadline_check_secs: u64,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            public_rps: get_env_parse("PUBLIC_RPS")?,
            db_max_connections: get_env_parse_or("DB_MAX_CONNECTIONS", 50)?,
            judge_timeout_ms: get_env_parse_or("JUDGE_TIMEOUT_MS", 2000)?,
            judge_url: env::var("JUDGE_URL").ok().filter(|v| !v.trim().is_empty()),
            python_bin: env::var("PYTHON_BIN").unwrap_or_else(|_| "python3".to_string()),
            node_bin: env::var("NODE_BIN").unwrap_or_else(|_| "node".to_string()),
            deadline_check_secs: get_env_parse_or("DEADLINE_CHECK_SECS", 60)?,
        })
    }

    pub fn judge_timeout(&self) -> Duration {
        Duration::from_millis(self.judge_timeout_ms)
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_parse<T>(name: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(name)?;
    raw.parse()
        .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e)))
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
