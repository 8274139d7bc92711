//! # Now-Playing Daemon
//!
//! The reconciliation loop that keeps the `now_playing` row in step with the
//! player.
//!
//! ## Architecture
//!
//! Every tick (2s by default) the daemon:
//!
//! 1. drains the library updater, if one is running, and forwards its progress
//! 2. asks the player whether anything is loaded; if the player doesn't
//!    answer the tick ends and the next one waits `exception_wait` (30s)
//! 3. while playing: reads metadata, scrapes listeners and either
//!    - writes the whole row when the song changed (refreshing cover art if
//!      the album changed too), or
//!    - touches only `playback_time`, `paused` and `listeners`
//! 4. while stopped: deletes the row once and forgets it
//!
//! Change detection compares against whatever row is cached, titled or not;
//! the empty-title rule only decides whether stopping deletes the row.
//!
//! The snapshot cache is only replaced after the matching store write
//! succeeded, so a failed write is simply retried on the next tick.
//!
//! All collaborators sit behind traits; [`Collaborators`] bundles the real or
//! fake implementations.

use crate::artwork::ArtworkService;
use crate::automation::Automation;
use crate::error::AutomationError;
use crate::listeners::ListenerSource;
use crate::rebuild::{should_rebuild, RebuildPhase, RebuildProcess, RebuildSupervisor};
use crate::retry::Sleeper;
use crate::schema::{FormatSpec, Schema};
use crate::snapshot::{has_changed, Candidate, NowPlayingSnapshot, SnapshotCache};
use crate::store::NowPlayingStore;
use anyhow::Result;
use log::{debug, error, info, warn};
use std::io::{self, Write};
use std::time::Duration;

/// Everything the loop talks to.
pub struct Collaborators {
    pub automation: Box<dyn Automation>,
    pub store: Box<dyn NowPlayingStore>,
    pub artwork: Box<dyn ArtworkService>,
    pub listeners: Box<dyn ListenerSource>,
    pub sleeper: Box<dyn Sleeper>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTiming {
    pub poll_interval: Duration,
    /// Back-off after the player stopped answering.
    pub exception_wait: Duration,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            exception_wait: Duration::from_secs(30),
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Player automation failed; nothing was touched.
    Unavailable,
    /// Metadata came back with the wrong number of fields; nothing was touched.
    Malformed { expected: usize, got: usize },
    SongChanged,
    PlaybackUpdated,
    Stopped,
    /// Stopped, and there was nothing to delete.
    Idle,
}

impl TickOutcome {
    /// How long to sleep before the next tick.
    pub fn wait(self, timing: &LoopTiming) -> Duration {
        match self {
            Self::Unavailable => timing.exception_wait,
            _ => timing.poll_interval,
        }
    }
}

/// Keeps the now-playing row in sync with the player.
pub struct NowPlayingDaemon {
    schema: Schema,
    format: FormatSpec,
    timing: LoopTiming,
    automation: Box<dyn Automation>,
    store: Box<dyn NowPlayingStore>,
    artwork: Box<dyn ArtworkService>,
    listeners: Box<dyn ListenerSource>,
    sleeper: Box<dyn Sleeper>,
    cache: SnapshotCache,
    rebuild: RebuildSupervisor,
    /// No tick has reached the player yet.
    first_pass: bool,
}

impl NowPlayingDaemon {
    pub fn new(schema: Schema, timing: LoopTiming, collaborators: Collaborators) -> Self {
        let format = schema.format_spec();
        Self {
            schema,
            format,
            timing,
            automation: collaborators.automation,
            store: collaborators.store,
            artwork: collaborators.artwork,
            listeners: collaborators.listeners,
            sleeper: collaborators.sleeper,
            cache: SnapshotCache::default(),
            rebuild: RebuildSupervisor::new(),
            first_pass: true,
        }
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn rebuild_phase(&self) -> RebuildPhase {
        self.rebuild.phase()
    }

    /// Compare the player's track count with the mirrored library and launch
    /// the updater when they differ. `launcher` receives the library field
    /// list. Returns whether a job was started.
    pub fn check_library<F>(&mut self, launcher: F) -> bool
    where
        F: FnOnce(&str) -> Result<Box<dyn RebuildProcess>>,
    {
        let remote = self.store.remote_library_count();
        let local = match self.automation.track_count() {
            Ok(count) => count,
            Err(e) => {
                warn!("Unable to read player track count: {e}");
                -1
            }
        };
        info!("Library size: {local} in player, {remote} in store");

        if !should_rebuild(local, remote) {
            if local < 0 || remote < 0 {
                warn!("Library size unknown, skipping library update");
            } else {
                info!("Library is up to date.");
            }
            return false;
        }

        info!("Library out of date, updating...");
        let fields = self.schema.library_field_list();
        self.rebuild.launch(|| launcher(&fields))
    }

    /// Seed the cache with the row left behind by a previous run.
    pub fn load_previous(&mut self) -> Result<()> {
        let previous = self.store.read()?;
        match &previous {
            Some(row) => info!("Previous now playing row: {}", row.change_notice()),
            None => debug!("No previous now playing row"),
        }
        self.cache = SnapshotCache::new(previous);
        Ok(())
    }

    /// Tick forever.
    pub fn run(&mut self) -> Result<()> {
        info!("Now playing daemon started");
        loop {
            let outcome = self.tick();
            self.sleeper.sleep(outcome.wait(&self.timing));
        }
    }

    /// Tick `ticks` times, sleeping between ticks like [`run`](Self::run).
    pub fn run_for(&mut self, ticks: usize) -> Vec<TickOutcome> {
        (0..ticks)
            .map(|_| {
                let outcome = self.tick();
                self.sleeper.sleep(outcome.wait(&self.timing));
                outcome
            })
            .collect()
    }

    /// One reconciliation pass, without the trailing sleep.
    pub fn tick(&mut self) -> TickOutcome {
        self.drain_rebuild();

        match self.reconcile() {
            Ok(outcome) => {
                self.first_pass = false;
                outcome
            }
            Err(e) => {
                warn!(
                    "{e}. Waiting {} seconds before retrying...",
                    self.timing.exception_wait.as_secs()
                );
                TickOutcome::Unavailable
            }
        }
    }

    fn drain_rebuild(&mut self) {
        let Some(report) = self.rebuild.drain() else {
            return;
        };

        if let Some(progress) = &report.progress {
            print!("{progress}");
            if let Err(e) = io::stdout().flush() {
                debug!("Failed to flush progress: {e}");
            }
        }
        if let Some(diagnostics) = &report.diagnostics {
            warn!("Library updater: {}", diagnostics.trim_end());
        }
        if report.finished {
            match self.rebuild.phase() {
                RebuildPhase::Done => {
                    println!();
                    info!("Library update finished.");
                }
                phase => warn!("Library update ended in state {phase:?}"),
            }
        }
    }

    fn reconcile(&mut self) -> Result<TickOutcome, AutomationError> {
        if !self.automation.is_playing()? {
            return Ok(self.stopped());
        }

        let paused = self.automation.is_paused()?;
        let values = self.automation.read_metadata(&self.format)?;
        if values.len() != self.schema.len() {
            warn!(
                "Malformed metadata read: expected {} fields, got {}. Skipping.",
                self.schema.len(),
                values.len()
            );
            return Ok(TickOutcome::Malformed {
                expected: self.schema.len(),
                got: values.len(),
            });
        }

        let mut candidate = Candidate::from_values(&self.schema, &values, paused);
        candidate.snapshot.listeners = self.listeners.listeners(paused);

        if has_changed(self.cache.current(), &candidate.snapshot) {
            Ok(self.song_changed(candidate))
        } else {
            Ok(self.playback_only(&candidate.snapshot))
        }
    }

    fn song_changed(&mut self, candidate: Candidate) -> TickOutcome {
        let previous = self.cache.current();
        let album_changed =
            previous.is_none() || previous.and_then(NowPlayingSnapshot::album) != candidate.snapshot.album();
        let carried_art = previous.and_then(|row| row.art.clone());

        let track_dir = candidate.track_dir();
        let mut snapshot = candidate.snapshot;
        snapshot.art = if album_changed {
            track_dir.and_then(|dir| self.artwork.refresh(&dir))
        } else {
            carried_art
        };

        println!("Song changing to {}", snapshot.change_notice());

        let written = if self.cache.holds_row() {
            self.store.update(&snapshot)
        } else {
            self.store.insert(&snapshot)
        };

        match written {
            Ok(0) => {
                error!("Now playing row write affected no rows");
                self.cache.replace(snapshot);
            }
            Ok(rows) => {
                debug!("Now playing row written ({rows} row)");
                self.cache.replace(snapshot);
            }
            Err(e) => error!("Unable to write now playing row: {e:#}"),
        }
        TickOutcome::SongChanged
    }

    fn playback_only(&mut self, candidate: &NowPlayingSnapshot) -> TickOutcome {
        if self.first_pass {
            info!("Song unchanged from previous run. Updating playback only.");
        }

        match self
            .store
            .update_playback(candidate.playback_time(), candidate.paused, &candidate.listeners)
        {
            Ok(0) => error!("Playback update affected no rows"),
            Ok(_) => debug!(
                "Playback at {}{}",
                candidate.playback_time(),
                if candidate.paused { " (paused)" } else { "" }
            ),
            Err(e) => error!("Unable to update playback: {e:#}"),
        }
        TickOutcome::PlaybackUpdated
    }

    fn stopped(&mut self) -> TickOutcome {
        if !self.cache.is_active() {
            // An untitled row is forgotten but not deleted.
            self.cache.clear();
            return TickOutcome::Idle;
        }

        match self.store.delete() {
            Ok(rows) => {
                if rows == 0 {
                    error!("Now playing row delete affected no rows");
                }
                info!("Playback stopped");
                self.cache.clear();
            }
            Err(e) => error!("Unable to delete now playing row: {e:#}"),
        }
        TickOutcome::Stopped
    }
}
