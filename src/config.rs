//! # Configuration Module
//!
//! This module handles runtime settings, the platform data directory and the
//! line-oriented credentials file.
//!
//! ## Data Storage
//!
//! The SQLite store lives in the platform-standard data directory unless
//! `db_path` says otherwise:
//! - Linux: `~/.local/share/nowplaying/`
//! - macOS: `~/Library/Application Support/nowplaying/`
//! - Windows: `%APPDATA%\nowplaying\`
//!
//! ## Settings File
//!
//! Optional JSON, every key may be omitted:
//!
//! ```json
//! {
//!   "poll_interval_secs": 2,
//!   "icecast_url": "http://localhost:8000",
//!   "upload_url": "http://192.168.1.253/radio/upload.php",
//!   "rebuild_program": "library-updater"
//! }
//! ```
//!
//! ## Credentials File
//!
//! `auth.txt`, one entry per line:
//! 1. Icecast admin `user:password`
//! 2. Artwork uploader `user:password`

use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns the platform-appropriate database file path.
///
/// Creates the `nowplaying` subdirectory of the system data directory if it
/// doesn't exist yet.
///
/// # Errors
///
/// This function will return an error if:
/// - The system data directory cannot be determined
/// - The subdirectory cannot be created due to permissions
pub fn get_db_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Please pass --db or set db_path."
        )
    })?;

    let app_dir = data_dir.join("nowplaying");
    fs::create_dir_all(&app_dir).with_context(|| {
        format!(
            "Failed to create data directory at {}. Please check file permissions.",
            app_dir.display()
        )
    })?;

    Ok(app_dir.join("nowplaying.db"))
}

/// Runtime settings for the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite file holding `now_playing` and `library`. Resolved lazily.
    pub db_path: Option<PathBuf>,
    pub auth_file: PathBuf,
    /// Local staging directory for cover images.
    pub art_dir: PathBuf,
    /// MPD music directory. Detected from mpd.conf when unset.
    pub music_dir: Option<PathBuf>,
    pub mpc_program: String,
    pub poll_interval_secs: u64,
    /// Back-off after the player stops answering.
    pub exception_wait_secs: u64,
    pub store_retry_secs: u64,
    pub rebuild_poll_millis: u64,
    pub icecast_url: String,
    pub live_mount: String,
    /// Mount carrying the silence stream while the player is paused.
    pub fallback_mount: String,
    pub upload_url: String,
    pub rebuild_program: String,
    /// Arguments placed before the field list.
    pub rebuild_args: Vec<String>,
    pub http_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: None,
            auth_file: PathBuf::from("auth.txt"),
            art_dir: PathBuf::from("art"),
            music_dir: None,
            mpc_program: "mpc".to_string(),
            poll_interval_secs: 2,
            exception_wait_secs: 30,
            store_retry_secs: 5,
            rebuild_poll_millis: 100,
            icecast_url: "http://localhost:8000".to_string(),
            live_mount: "stream".to_string(),
            fallback_mount: "silence".to_string(),
            upload_url: "http://localhost/radio/upload.php".to_string(),
            rebuild_program: "library-updater".to_string(),
            rebuild_args: Vec::new(),
            http_timeout_secs: 10,
        }
    }
}

impl Settings {
    /// Load settings from an optional JSON file, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid settings file: {}", path.display()))
    }

    /// `db_path`, or the platform default.
    pub fn resolve_db_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => get_db_path(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn exception_wait(&self) -> Duration {
        Duration::from_secs(self.exception_wait_secs)
    }

    pub fn store_retry(&self) -> Duration {
        Duration::from_secs(self.store_retry_secs)
    }

    pub fn rebuild_poll(&self) -> Duration {
        Duration::from_millis(self.rebuild_poll_millis)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// A `user:password` pair sent as HTTP basic auth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth(String);

impl BasicAuth {
    pub fn new(user_password: impl Into<String>) -> Self {
        Self(user_password.into())
    }

    /// Value for the `Authorization` header.
    pub fn header_value(&self) -> String {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(self.0.as_bytes())
        )
    }
}

/// Credentials for the Icecast admin page and the artwork uploader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub icecast: BasicAuth,
    pub uploader: BasicAuth,
}

impl Credentials {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| {
            format!(
                "Please store your auth information in {} with Icecast and album art uploader \
                 basic auth credentials (one per line).",
                path.display()
            )
        })?;
        Self::parse(&content).with_context(|| format!("Invalid credentials file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let lines: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        match lines.as_slice() {
            [icecast, uploader, ..] => Ok(Self {
                icecast: BasicAuth::new(*icecast),
                uploader: BasicAuth::new(*uploader),
            }),
            _ => anyhow::bail!("expected 2 lines, found {}", lines.len()),
        }
    }
}
