//! # MPD Client Module
//!
//! [`Automation`] implementation on top of the `mpc` command-line client.
//!
//! ## Design Decision: mpc vs Direct Protocol
//!
//! Same trade-off as always: `mpc` already handles connection setup,
//! `MPD_HOST`/`MPD_PORT` and protocol quirks, and a failed spawn or non-zero
//! exit is exactly the "player unavailable" signal the loop backs off on.
//!
//! ## Commands Used
//!
//! | Operation       | Command                     |
//! |-----------------|-----------------------------|
//! | playback state  | `mpc status -f %file%`      |
//! | metadata        | `mpc current -f <format>`   |
//! | library size    | `mpc stats`                 |
//!
//! ## Example Output Parsing
//!
//! ```text
//! artist/album/song.mp3
//! [playing] #5/20   1:23/3:45 (37%)
//! volume: 80%   repeat: on    random: off   single: off   consume: off
//! ```
//!
//! Extracts: state=Play, elapsed=83.0, duration=225.0

use crate::automation::Automation;
use crate::error::AutomationError;
use crate::schema::{FieldSource, FormatSpec};
use anyhow::Result;
use log::debug;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Playback state reported by MPD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Play,
    Pause,
    Stop,
}

/// MPD status information parsed from `mpc status` output
#[derive(Debug, Clone, PartialEq)]
pub struct MpdStatus {
    /// Current song file path (MPD relative), None if nothing loaded
    pub current_song: Option<String>,
    /// Elapsed time in seconds
    pub elapsed: f64,
    /// Total song duration in seconds, None for streams or unknown
    pub duration: Option<f64>,
    pub state: PlayerState,
}

/// Talks to MPD by spawning `mpc`.
#[derive(Debug, Clone)]
pub struct MpcAutomation {
    program: String,
    music_dir: Option<PathBuf>,
}

impl MpcAutomation {
    /// `music_dir` turns MPD-relative file names into absolute paths; without
    /// it paths are passed through unchanged.
    pub fn new(program: impl Into<String>, music_dir: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            music_dir,
        }
    }

    fn mpc(&self, args: &[&str]) -> Result<String, AutomationError> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| {
                AutomationError::unavailable(format!("failed to execute {}: {e}", self.program))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AutomationError::unavailable(format!(
                "{} {} failed: {}",
                self.program,
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Get current MPD status by parsing `mpc status` output
    pub fn status(&self) -> Result<MpdStatus, AutomationError> {
        debug!("Getting MPD status");
        let text = self.mpc(&["status", "-f", "%file%"])?;
        Ok(parse_status(&text))
    }
}

impl Automation for MpcAutomation {
    fn is_playing(&self) -> Result<bool, AutomationError> {
        Ok(matches!(self.status()?.state, PlayerState::Play | PlayerState::Pause))
    }

    fn is_paused(&self) -> Result<bool, AutomationError> {
        Ok(self.status()?.state == PlayerState::Pause)
    }

    fn read_metadata(&self, format: &FormatSpec) -> Result<Vec<String>, AutomationError> {
        let raw = self.mpc(&["current", "-f", &format.mpc_format()])?;
        let elapsed = if format.sources().contains(&FieldSource::Elapsed) {
            format_time(self.status()?.elapsed)
        } else {
            String::new()
        };

        Ok(decode_metadata(
            format,
            raw.trim_end_matches(['\r', '\n']),
            &elapsed,
            self.music_dir.as_deref(),
        ))
    }

    fn track_count(&self) -> Result<i64, AutomationError> {
        let text = self.mpc(&["stats"])?;
        parse_song_count(&text)
            .ok_or_else(|| AutomationError::Unparseable("no Songs: line in mpc stats".to_string()))
    }
}

/// Parse `mpc status -f %file%` output.
///
/// A stopped player prints only the options line, so the first line is a
/// file name only when a `[playing]`/`[paused]` line follows it.
pub fn parse_status(text: &str) -> MpdStatus {
    let lines: Vec<&str> = text.lines().collect();

    let mut elapsed = 0.0;
    let mut duration = None;
    let mut state = PlayerState::Stop;
    let mut state_line = None;

    // Parse status line (format: [playing] #1/50   0:32/3:45 (13%))
    for (index, line) in lines.iter().enumerate() {
        if line.starts_with("[playing]") {
            state = PlayerState::Play;
        } else if line.starts_with("[paused]") {
            state = PlayerState::Pause;
        } else {
            continue;
        }
        state_line = Some(index);

        let time_part = line
            .split_whitespace()
            .find(|s| s.contains('/') && s.contains(':'));
        if let Some((left, right)) = time_part.and_then(|t| t.split_once('/')) {
            if let Ok(secs) = parse_time(left) {
                elapsed = secs;
            }
            duration = parse_time(right).ok();
        }
        break;
    }

    let current_song = state_line
        .filter(|index| *index > 0)
        .map(|_| lines[0].trim().to_string())
        .filter(|song| !song.is_empty());

    MpdStatus {
        current_song,
        elapsed,
        duration,
        state,
    }
}

/// Parse time string in `M:SS` (or `H:MM:SS`) format to seconds
fn parse_time(time_str: &str) -> Result<f64> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        anyhow::bail!("Invalid time format: {}", time_str);
    }

    parts.iter().try_fold(0.0, |total, part| {
        let value: f64 = part.parse()?;
        Ok(total * 60.0 + value)
    })
}

/// Seconds back to `M:SS`, the form stored in `playback_time`.
pub fn format_time(seconds: f64) -> String {
    let whole = seconds.max(0.0).floor() as u64;
    format!("{}:{:02}", whole / 60, whole % 60)
}

/// Library size from `mpc stats` (`Songs:   1234`).
pub fn parse_song_count(text: &str) -> Option<i64> {
    text.lines()
        .find_map(|line| line.trim().strip_prefix("Songs:"))
        .and_then(|count| count.trim().parse().ok())
}

/// Lay the `|`-separated output of `mpc current` back onto the format.
///
/// Values `mpc` did not render are filled in (elapsed time, empty strings for
/// tags MPD doesn't know). A short output yields a short vector; surplus
/// pieces (a `|` inside a tag) are appended so the caller sees the mismatch.
pub fn decode_metadata(
    format: &FormatSpec,
    raw: &str,
    elapsed: &str,
    music_dir: Option<&Path>,
) -> Vec<String> {
    let mut pieces = raw.split('|');
    let mut values = Vec::with_capacity(format.sources().len());

    for source in format.sources() {
        let value = match source {
            FieldSource::Tag(_) => match pieces.next() {
                Some(piece) => piece.to_string(),
                None => break,
            },
            FieldSource::File => match pieces.next() {
                Some(piece) => to_absolute(piece, music_dir),
                None => break,
            },
            FieldSource::Elapsed => elapsed.to_string(),
            FieldSource::Absent => String::new(),
        };
        values.push(value);
    }

    values.extend(pieces.map(str::to_string));
    values
}

fn to_absolute(mpd_path: &str, music_dir: Option<&Path>) -> String {
    match music_dir {
        Some(dir) if !mpd_path.is_empty() && !Path::new(mpd_path).is_absolute() => {
            dir.join(mpd_path).to_string_lossy().into_owned()
        }
        _ => mpd_path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    #[test]
    fn test_parse_time_valid_formats() -> Result<()> {
        assert_eq!(parse_time("0:30")?, 30.0);
        assert_eq!(parse_time("1:45")?, 105.0);
        assert_eq!(parse_time("12:34")?, 754.0);
        assert_eq!(parse_time("1:02:03")?, 3723.0);
        Ok(())
    }

    #[test]
    fn test_parse_time_invalid_formats() {
        assert!(parse_time("invalid").is_err());
        assert!(parse_time("").is_err());
        assert!(parse_time("1:").is_err());
        assert!(parse_time(":30").is_err());
        assert!(parse_time("1:2:3:4").is_err());
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "0:00");
        assert_eq!(format_time(83.7), "1:23");
        assert_eq!(format_time(754.0), "12:34");
    }

    #[test]
    fn test_parse_status_playing() {
        let status = parse_status(
            "artist/album/song.mp3\n[playing] #5/20   1:23/3:45 (37%)\nvolume: 80%   repeat: on\n",
        );

        assert_eq!(status.state, PlayerState::Play);
        assert_eq!(status.current_song.as_deref(), Some("artist/album/song.mp3"));
        assert_eq!(status.elapsed, 83.0);
        assert_eq!(status.duration, Some(225.0));
    }

    #[test]
    fn test_parse_status_paused() {
        let status = parse_status("a/b.flac\n[paused]  #1/2   0:05/4:00 (2%)\nvolume: n/a\n");
        assert_eq!(status.state, PlayerState::Pause);
        assert_eq!(status.elapsed, 5.0);
    }

    #[test]
    fn test_parse_status_stopped() {
        let status = parse_status("volume: 80%   repeat: off   random: off   single: off   consume: off\n");

        assert_eq!(status.state, PlayerState::Stop);
        assert_eq!(status.current_song, None);
        assert_eq!(status.elapsed, 0.0);
    }

    #[test]
    fn test_parse_song_count() {
        let stats = "Artists:    312\nAlbums:     540\nSongs:     10234\n\nPlay Time:    0 days\n";
        assert_eq!(parse_song_count(stats), Some(10234));
        assert_eq!(parse_song_count("Artists: 1\n"), None);
    }

    #[test]
    fn test_decode_metadata_fills_unrendered_fields() {
        let schema = Schema::standard();
        let format = schema.format_spec();
        let rendered: Vec<String> = (0..format.rendered_count()).map(|i| format!("v{i}")).collect();
        let mut raw = rendered.join("|");
        raw = raw.replacen(&format!("v{}", format.rendered_count() - 1), "Artist/Album/01.flac", 1);

        let values = decode_metadata(&format, &raw, "1:23", Some(Path::new("/srv/music")));

        assert_eq!(values.len(), schema.len());
        assert_eq!(values[0], "v0");
        // arranger has no MPD tag
        assert_eq!(values[6], "");
        assert_eq!(values[17], "1:23");
        assert_eq!(values[18], "/srv/music/Artist/Album/01.flac");
    }

    #[test]
    fn test_decode_metadata_short_output_is_short() {
        let schema = Schema::standard();
        let values = decode_metadata(&schema.format_spec(), "", "0:00", None);
        assert!(values.len() < schema.len());
    }

    #[test]
    fn test_decode_metadata_extra_pipe_is_long() {
        let schema = Schema::standard();
        let format = schema.format_spec();
        let mut pieces: Vec<String> = (0..format.rendered_count()).map(|i| i.to_string()).collect();
        pieces[1] = "Title | Part II".into();
        let values = decode_metadata(&format, &pieces.join("|"), "0:00", None);

        assert!(values.len() > schema.len());
    }

    /// Shell stand-in for `mpc` that only answers the exact escaped format.
    fn fake_mpc(dir: &Path, expected_format: &str) -> Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt;

        let script = format!(
            r#"#!/bin/sh
case "$1" in
  status)
    printf 'Broadcast/Haha Sound/02 Pendulum.flac\n[playing] #2/12   1:05/4:00 (27%%)\nvolume: 80%%\n' ;;
  current)
    [ "$3" = '{expected_format}' ] || {{ echo "unexpected format: $3" >&2; exit 2; }}
    printf 'Broadcast|Pendulum|Haha Sound|2003|4:00|||Post-rock|Broadcast|2|1||Broadcast/Haha Sound/02 Pendulum.flac\n' ;;
  stats)
    printf 'Artists:     1\nAlbums:      1\nSongs:      42\n' ;;
  *)
    exit 1 ;;
esac
"#
        );
        let path = dir.join("mpc");
        std::fs::write(&path, script)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }

    #[test]
    fn test_reads_metadata_through_mpc() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let schema = Schema::standard();
        let format = schema.format_spec();
        let program = fake_mpc(temp.path(), &format.mpc_format())?;
        let client = MpcAutomation::new(program.to_string_lossy(), Some(PathBuf::from("/srv/music")));

        assert!(client.is_playing()?);
        assert!(!client.is_paused()?);
        assert_eq!(client.track_count()?, 42);

        let values = client.read_metadata(&format)?;
        assert_eq!(values.len(), schema.len());
        let value = |column: &str| {
            schema
                .fields()
                .iter()
                .position(|field| field.column == column)
                .map(|i| values[i].as_str())
        };
        assert_eq!(value("artist"), Some("Broadcast"));
        assert_eq!(value("title"), Some("Pendulum"));
        assert_eq!(value("album"), Some("Haha Sound"));
        assert_eq!(value("genre"), Some("Post-rock"));
        assert_eq!(value("comment"), Some(""));
        assert_eq!(value("playback_time"), Some("1:05"));
        assert_eq!(value("path"), Some("/srv/music/Broadcast/Haha Sound/02 Pendulum.flac"));
        Ok(())
    }

    #[test]
    fn test_unavailable_when_program_missing() {
        let client = MpcAutomation::new("/nonexistent/mpc", None);
        assert!(matches!(client.is_playing(), Err(AutomationError::Unavailable(_))));
        assert!(matches!(client.track_count(), Err(AutomationError::Unavailable(_))));
    }
}
