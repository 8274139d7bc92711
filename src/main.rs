//! # nowplaying
//!
//! Keeps the station's now playing row in sync with MPD.
//!
//! ```bash
//! # Create the tables once
//! nowplaying init
//!
//! # Run the service
//! RUST_LOG=info nowplaying run
//!
//! # Inspect
//! nowplaying show
//! nowplaying listeners
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use nowplaying::artwork::{ArtUploader, ArtworkPipeline};
use nowplaying::automation::LocalFs;
use nowplaying::cli::{self, Command};
use nowplaying::completion;
use nowplaying::config::{Credentials, Settings};
use nowplaying::daemon::{Collaborators, LoopTiming, NowPlayingDaemon};
use nowplaying::listeners::{IcecastAdmin, ListenerSource};
use nowplaying::mpd_client::MpcAutomation;
use nowplaying::mpd_config;
use nowplaying::rebuild::{RebuildProcess, SpawnedRebuild};
use nowplaying::retry::{RetryPolicy, ThreadSleeper};
use nowplaying::schema::Schema;
use nowplaying::store::{self, NowPlayingStore, SqliteStore};
use std::fs;
use std::io;
use std::path::PathBuf;

/// One-shot commands give up on the store after this many attempts.
const ONE_SHOT_ATTEMPTS: u32 = 3;

/// Main entry point.
///
/// Initializes environment logger which can be controlled via `RUST_LOG`:
/// - `RUST_LOG=info nowplaying run` - Song changes and library checks
/// - `RUST_LOG=nowplaying::rebuild=debug nowplaying run` - Updater details
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(db) = args.db {
        settings.db_path = Some(db);
    }
    if let Some(auth_file) = args.auth_file {
        settings.auth_file = auth_file;
    }

    match args.command {
        Command::Run { poll_interval, music_dir, no_rebuild } => {
            if let Some(secs) = poll_interval {
                settings.poll_interval_secs = secs;
            }
            if music_dir.is_some() {
                settings.music_dir = music_dir;
            }
            run(&settings, !no_rebuild)?;
        }
        Command::Init => {
            let db_path = settings.resolve_db_path()?;
            store::init(&db_path, &Schema::standard())?;
            println!("Initialized {}", db_path.display());
        }
        Command::Show => {
            let store = open_store(&settings, RetryPolicy::bounded(settings.store_retry(), ONE_SHOT_ATTEMPTS))?;
            match store.read()? {
                Some(row) => {
                    for (column, value) in &row.fields {
                        println!("{column:>14}: {value}");
                    }
                    println!("{:>14}: {}", "paused", row.paused);
                    println!("{:>14}: {}", "art", row.art.as_deref().unwrap_or("-"));
                    println!("{:>14}: {}", "listeners", row.listeners_joined());
                }
                None => println!("Nothing playing."),
            }
        }
        Command::Listeners { paused } => {
            let admin = icecast_admin(&settings, load_credentials(&settings).as_ref());
            for ip in admin.listeners(paused) {
                println!("{ip}");
            }
        }
        Command::Completion { shell } => {
            completion::write_completions(shell, &mut io::stdout());
        }
    }

    Ok(())
}

fn run(settings: &Settings, check_library: bool) -> Result<()> {
    let schema = Schema::standard();
    let credentials = load_credentials(settings);

    let music_dir = match mpd_config::get_mpd_music_directory(settings.music_dir.as_deref()) {
        Ok(dir) => Some(dir),
        Err(e) => {
            warn!("{e:#}. Track paths will be passed through untranslated.");
            None
        }
    };

    fs::create_dir_all(&settings.art_dir)
        .with_context(|| format!("Failed to create art directory {}", settings.art_dir.display()))?;

    let store = open_store(settings, RetryPolicy::forever(settings.store_retry()))?;
    let artwork = ArtworkPipeline::new(
        Box::new(LocalFs),
        settings.art_dir.clone(),
        ArtUploader::new(
            settings.upload_url.clone(),
            credentials.as_ref().map(|c| c.uploader.clone()),
            settings.http_timeout(),
        ),
    );

    let mut daemon = NowPlayingDaemon::new(
        schema,
        LoopTiming {
            poll_interval: settings.poll_interval(),
            exception_wait: settings.exception_wait(),
        },
        Collaborators {
            automation: Box::new(MpcAutomation::new(settings.mpc_program.clone(), music_dir)),
            store: Box::new(store),
            artwork: Box::new(artwork),
            listeners: Box::new(icecast_admin(settings, credentials.as_ref())),
            sleeper: Box::new(ThreadSleeper),
        },
    );

    if check_library {
        daemon.check_library(|fields| {
            let job = SpawnedRebuild::spawn(
                &settings.rebuild_program,
                &settings.rebuild_args,
                fields,
                settings.rebuild_poll(),
            )?;
            debug!("Library updater running as PID {}", job.id());
            Ok(Box::new(job) as Box<dyn RebuildProcess>)
        });
    }

    daemon.load_previous()?;
    daemon.run()
}

fn open_store(settings: &Settings, retry: RetryPolicy) -> Result<SqliteStore> {
    let db_path: PathBuf = settings.resolve_db_path()?;
    info!("Using database {}", db_path.display());
    Ok(SqliteStore::new(db_path, Schema::standard(), retry, Box::new(ThreadSleeper)))
}

/// Credentials are optional: without them listeners stay empty and art is
/// not uploaded.
fn load_credentials(settings: &Settings) -> Option<Credentials> {
    match Credentials::load(&settings.auth_file) {
        Ok(credentials) => Some(credentials),
        Err(e) => {
            warn!("{e:#}");
            None
        }
    }
}

fn icecast_admin(settings: &Settings, credentials: Option<&Credentials>) -> IcecastAdmin {
    IcecastAdmin::new(
        settings.icecast_url.clone(),
        settings.live_mount.clone(),
        settings.fallback_mount.clone(),
        credentials.map(|c| c.icecast.clone()),
        settings.http_timeout(),
    )
}
