//! # MPD Music Directory Detection
//!
//! `mpc` reports files relative to MPD's `music_directory`. Cover lookup needs
//! real paths, so the directory is taken from settings or, failing that, from
//! the first readable MPD configuration file.

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use path_absolutize::Absolutize;
use std::fs;
use std::path::{Path, PathBuf};

/// Resolve MPD's music directory.
///
/// An explicit directory always wins; otherwise the standard config locations
/// are tried in order.
///
/// # Errors
///
/// Returns an error if no explicit directory was given and no config file
/// names an existing `music_directory`.
pub fn get_mpd_music_directory(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        let dir = dir
            .absolutize()
            .with_context(|| format!("Invalid music directory: {}", dir.display()))?
            .into_owned();
        info!("Using configured music directory: {}", dir.display());
        return Ok(dir);
    }

    for path in config_candidates() {
        match parse_config_file(&path) {
            Ok(dir) => {
                info!("Found MPD music directory from config: {}", dir.display());
                return Ok(dir);
            }
            Err(e) => debug!("Skipping {}: {e}", path.display()),
        }
    }

    Err(anyhow!(
        "Could not determine MPD music directory. Set music_dir or check mpd.conf."
    ))
}

fn config_candidates() -> Vec<PathBuf> {
    [
        dirs::config_dir().map(|p| p.join("mpd").join("mpd.conf")),
        dirs::home_dir().map(|p| p.join(".mpdconf")),
        Some(PathBuf::from("/etc/mpd.conf")),
        Some(PathBuf::from("/usr/local/etc/mpd.conf")),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Parse a specific MPD config file for the `music_directory` setting.
fn parse_config_file(config_path: &Path) -> Result<PathBuf> {
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read MPD config: {}", config_path.display()))?;

    let dir = parse_music_directory(&content)
        .ok_or_else(|| anyhow!("No music_directory in {}", config_path.display()))?;

    if dir.is_dir() {
        Ok(dir)
    } else {
        warn!("Music directory in config does not exist: {}", dir.display());
        Err(anyhow!("music_directory {} does not exist", dir.display()))
    }
}

/// Extract `music_directory "..."` from config text, expanding `~`.
pub fn parse_music_directory(content: &str) -> Option<PathBuf> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let rest = line.strip_prefix("music_directory")?;
            let value = rest.trim().trim_matches('"').trim_matches('\'');
            (!value.is_empty()).then(|| expand_home(value))
        })
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ if path == "~" => dirs::home_dir().unwrap_or_else(|| PathBuf::from(path)),
        _ => PathBuf::from(path),
    }
}
