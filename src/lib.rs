//! Now-playing sync service for an MPD-driven internet radio station.
//!
//! The service polls MPD, keeps a single `now_playing` row in SQLite in step
//! with it, publishes cover art when the album changes and records who is
//! listening on Icecast. On startup it also checks the mirrored `library`
//! table against MPD and supervises an external updater when they drift.
//!
//! Core modules:
//! - [`daemon`] - The reconciliation loop
//! - [`snapshot`] - Now-playing rows and change detection
//! - [`rebuild`] - Library updater supervision
//! - [`store`] - SQLite persistence
//!
//! ### Collaborators
//!
//! - [`automation`] - Player and filesystem seams
//! - [`mpd_client`] - MPD via `mpc`
//! - [`artwork`] - Cover lookup, staging and upload
//! - [`listeners`] - Icecast admin page scrape
//!
//! ### Supporting Modules
//!
//! - [`schema`] - The ordered field list shared by MPD, the row and the library
//! - [`config`] - Settings, data directory and credentials
//! - [`retry`] - Fixed-delay retry with injectable sleeps
//! - [`error`] - Automation errors
//! - [`mpd_config`] - MPD music directory detection
//! - [`cli`] / [`completion`] - Command-line front-end
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use nowplaying::artwork::{ArtUploader, ArtworkPipeline};
//! use nowplaying::automation::LocalFs;
//! use nowplaying::daemon::{Collaborators, LoopTiming, NowPlayingDaemon};
//! use nowplaying::listeners::IcecastAdmin;
//! use nowplaying::mpd_client::MpcAutomation;
//! use nowplaying::retry::{RetryPolicy, ThreadSleeper};
//! use nowplaying::schema::Schema;
//! use nowplaying::store::SqliteStore;
//! use std::path::PathBuf;
//! use std::time::Duration;
//!
//! let schema = Schema::standard();
//! let timeout = Duration::from_secs(10);
//! let store = SqliteStore::new(
//!     PathBuf::from("radio.db"),
//!     schema.clone(),
//!     RetryPolicy::forever(Duration::from_secs(5)),
//!     Box::new(ThreadSleeper),
//! );
//!
//! let mut daemon = NowPlayingDaemon::new(
//!     schema,
//!     LoopTiming::default(),
//!     Collaborators {
//!         automation: Box::new(MpcAutomation::new("mpc", None)),
//!         store: Box::new(store),
//!         artwork: Box::new(ArtworkPipeline::new(
//!             Box::new(LocalFs),
//!             PathBuf::from("art"),
//!             ArtUploader::new("http://localhost/radio/upload.php", None, timeout),
//!         )),
//!         listeners: Box::new(IcecastAdmin::new("http://localhost:8000", "stream", "silence", None, timeout)),
//!         sleeper: Box::new(ThreadSleeper),
//!     },
//! );
//! daemon.load_previous()?;
//! daemon.run()?; // Runs indefinitely
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! Plumbing returns `anyhow::Result`. The player seam uses
//! [`error::AutomationError`] so the loop can back off when MPD goes away.
//! Nothing that happens during a tick stops the service.

pub mod artwork;
pub mod automation;
pub mod cli;
pub mod completion;
pub mod config;
pub mod daemon;
pub mod error;
pub mod listeners;
pub mod mpd_client;
pub mod mpd_config;
pub mod rebuild;
pub mod retry;
pub mod schema;
pub mod snapshot;
pub mod store;
