//! # Configuration
//!
//! Environment-driven settings with sane defaults. The server binary loads
//! `.env` via dotenvy before calling [`Settings::from_env`]; everything here
//! reads plain process environment.

use anyhow::{bail, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application settings loaded from environment variables
#[derive(Debug, Clone)]
pub struct Settings {
    // Model
    pub google_api_key: String,
    pub gemini_model: String,
    pub gemini_temperature: f32,
    /// Bound on one full model invocation (including retries)
    pub model_timeout_secs: u64,

    // Engine
    pub max_iterations: u32,

    // Server
    pub app_host: String,
    pub app_port: u16,

    // Rate limiting
    pub requests_per_minute: u32,
    pub burst_size: u32,

    // Tool policy
    pub allowed_file_extensions: Vec<String>,
    pub max_file_size_mb: u64,
    pub command_timeout_secs: u64,

    // Session persistence
    pub db_path: String,
    pub session_ttl_days: u32,
}

impl Settings {
    /// Load settings from the environment.
    ///
    /// Fails only on a missing `GOOGLE_API_KEY` or an unparsable override;
    /// everything else falls back to defaults.
    pub fn from_env() -> Result<Self> {
        let google_api_key = env::var("GOOGLE_API_KEY").unwrap_or_default();
        if google_api_key.trim().is_empty() {
            bail!("GOOGLE_API_KEY must be set");
        }

        Ok(Self {
            google_api_key,
            gemini_model: env_or("GEMINI_MODEL", "gemini-2.0-flash".to_string())?,
            gemini_temperature: env_or("GEMINI_TEMPERATURE", 0.0f32)?,
            model_timeout_secs: env_or("MODEL_TIMEOUT", 60u64)?,
            max_iterations: env_or("MAX_ITERATIONS", 25u32)?,
            app_host: env_or("APP_HOST", "127.0.0.1".to_string())?,
            app_port: env_or("APP_PORT", 8000u16)?,
            requests_per_minute: env_or("REQUESTS_PER_MINUTE", 60u32)?,
            burst_size: env_or("BURST_SIZE", 10u32)?,
            allowed_file_extensions: split_csv(&env_or(
                "ALLOWED_FILE_EXTENSIONS",
                ".rs,.toml,.txt,.md,.json,.yaml,.yml,.py,.js,.ts".to_string(),
            )?),
            max_file_size_mb: env_or("MAX_FILE_SIZE_MB", 10u64)?,
            command_timeout_secs: env_or("COMMAND_TIMEOUT", 60u64)?,
            db_path: env_or("DB_PATH", ".conductor/conductor.db".to_string())?,
            session_ttl_days: env_or("SESSION_TTL_DAYS", 7u32)?,
        })
    }

    /// Tool-facing slice of the settings
    pub fn tool_policy(&self) -> ToolPolicy {
        ToolPolicy {
            allowed_extensions: self.allowed_file_extensions.clone(),
            max_file_size: self.max_file_size_mb * 1024 * 1024,
            command_timeout: Duration::from_secs(self.command_timeout_secs),
        }
    }
}

impl Default for Settings {
    /// Defaults for tests and offline use; the API key is left empty.
    fn default() -> Self {
        Self {
            google_api_key: String::new(),
            gemini_model: "gemini-2.0-flash".to_string(),
            gemini_temperature: 0.0,
            model_timeout_secs: 60,
            max_iterations: 25,
            app_host: "127.0.0.1".to_string(),
            app_port: 8000,
            requests_per_minute: 60,
            burst_size: 10,
            allowed_file_extensions: split_csv(".rs,.toml,.txt,.md,.json,.yaml,.yml,.py,.js,.ts"),
            max_file_size_mb: 10,
            command_timeout_secs: 60,
            db_path: ".conductor/conductor.db".to_string(),
            session_ttl_days: 7,
        }
    }
}

/// Security limits the file and command tools enforce
#[derive(Debug, Clone)]
pub struct ToolPolicy {
    /// Extensions readable/writable by the file tools; empty allows all
    pub allowed_extensions: Vec<String>,
    /// Byte cap for file reads
    pub max_file_size: u64,
    /// Wall-clock cap for sandboxed commands
    pub command_timeout: Duration,
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().parse::<T>() {
            Ok(value) => Ok(value),
            Err(_) => bail!("invalid value for {key}: {raw:?}"),
        },
        _ => Ok(default),
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tool_policy() {
        let policy = Settings::default().tool_policy();

        assert!(policy.allowed_extensions.contains(&".rs".to_string()));
        assert_eq!(policy.max_file_size, 10 * 1024 * 1024);
        assert_eq!(policy.command_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_split_csv_trims_and_drops_empties() {
        assert_eq!(
            split_csv(" .rs , .md ,, .toml "),
            vec![".rs".to_string(), ".md".to_string(), ".toml".to_string()]
        );
    }
}
