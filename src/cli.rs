//! # Command-Line Interface Module
//!
//! Clap derive definitions for the `nowplaying` binary.
//!
//! ## Commands
//!
//! - `run`: start the sync service (library check, then the reconciliation loop)
//! - `init`: create the `now_playing` and `library` tables
//! - `show`: print the stored now-playing row
//! - `listeners`: print the listeners Icecast currently reports
//! - `completion`: print a shell completion script
//!
//! ## Examples
//!
//! ```bash
//! nowplaying init
//! RUST_LOG=info nowplaying --config /etc/nowplaying.json run
//! nowplaying listeners --paused
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

/// Main application arguments structure.
///
/// Global options override the matching fields of the settings file.
#[derive(Parser, Debug)]
#[command(name = "nowplaying")]
#[command(about = "Keeps a radio station's now playing row in sync with MPD")]
#[command(version)]
pub struct Args {
    /// JSON settings file
    #[arg(long, global = true, env = "NOWPLAYING_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database holding the now playing row and the library mirror
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Credentials file: Icecast `user:pass` on line 1, uploader on line 2
    #[arg(long, global = true)]
    pub auth_file: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the sync service
    ///
    /// Checks the library mirror against MPD once, launching the library
    /// updater if the track counts differ, then polls MPD forever.
    Run {
        /// Seconds between polls
        #[arg(long)]
        poll_interval: Option<u64>,

        /// MPD music directory (detected from mpd.conf when omitted)
        #[arg(long)]
        music_dir: Option<PathBuf>,

        /// Skip the startup library check
        #[arg(long)]
        no_rebuild: bool,
    },

    /// Create the database tables
    Init,

    /// Print the stored now playing row
    Show,

    /// Print the current Icecast listeners
    Listeners {
        /// Query the fallback (silence) mount instead of the live one
        #[arg(long)]
        paused: bool,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
