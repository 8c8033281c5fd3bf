use std::env;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::roster::RosterStore;

const CACHE_DIR: &str = "ranklist";
const LOG_FILE: &str = "ranklist.log";

#[derive(Debug, Clone)]
pub struct Config {
    pub roster_path: Option<PathBuf>,
    pub workers: usize,
    pub http_timeout: Duration,
    pub crawl_service_url: Option<String>,
    pub log_file: Option<PathBuf>,
    pub log_filter: String,
}

impl Config {
    /// Reads `RANKLIST_*` variables. Call after the `.env` files are loaded.
    pub fn from_env() -> Self {
        let workers = env::var("RANKLIST_WORKERS")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(6)
            .clamp(1, 64);
        let http_timeout = env::var("RANKLIST_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .unwrap_or(10)
            .max(1);

        Self {
            roster_path: opt_env("RANKLIST_ROSTER")
                .map(PathBuf::from)
                .or_else(RosterStore::default_path),
            workers,
            http_timeout: Duration::from_secs(http_timeout),
            crawl_service_url: opt_env("RANKLIST_CRAWL_SERVICE_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
            log_file: opt_env("RANKLIST_LOG_FILE")
                .map(PathBuf::from)
                .or_else(default_log_path),
            log_filter: opt_env("RANKLIST_LOG").unwrap_or_else(|| "info".to_string()),
        }
    }
}

/// Opens the log file for appending, creating its directory first.
pub fn open_log_file(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))
}

fn opt_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty())
}

fn default_log_path() -> Option<PathBuf> {
    if let Some(base) = opt_env("XDG_CACHE_HOME") {
        return Some(PathBuf::from(base).join(CACHE_DIR).join(LOG_FILE));
    }
    let home = opt_env("HOME")?;
    Some(PathBuf::from(home).join(".cache").join(CACHE_DIR).join(LOG_FILE))
}
