//! Runtime configuration resolved from environment variables.
//!
//! Binaries call `dotenv().ok()` before `Config::from_env()`; CLI flags
//! override individual fields afterwards.

use std::env;
use std::path::PathBuf;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64_or(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64_or(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite compensation database.
    pub db_path: PathBuf,
    /// Directory scanned for pre-built tool artifacts.
    pub tools_dir: PathBuf,
    /// Root directory for CSV/JSON/report exports.
    pub export_dir: PathBuf,
    /// Hard timeout for a single tool invocation, in seconds.
    pub tool_timeout_secs: u64,
    /// Minimum similarity for a fuzzy resolution candidate.
    pub similarity_floor: f64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            db_path: PathBuf::from(env_or("PAYSCOPE_DB", "compensation_data.db")),
            tools_dir: PathBuf::from(env_or("PAYSCOPE_TOOLS_DIR", "tools")),
            export_dir: PathBuf::from(env_or("PAYSCOPE_EXPORT_DIR", "exports")),
            tool_timeout_secs: env_u64_or("PAYSCOPE_TOOL_TIMEOUT_SECS", 30),
            similarity_floor: env_f64_or("PAYSCOPE_SIMILARITY_FLOOR", 0.85),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("compensation_data.db"),
            tools_dir: PathBuf::from("tools"),
            export_dir: PathBuf::from("exports"),
            tool_timeout_secs: 30,
            similarity_floor: 0.85,
        }
    }
}
