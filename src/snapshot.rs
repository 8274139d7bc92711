//! # Now-Playing Snapshot
//!
//! The last reconciled row, plus the rule that decides whether a fresh player
//! read is a new song or the same song a few seconds later.
//!
//! ## Change Detection
//!
//! - No prior snapshot: always a change.
//! - Otherwise only keys present in *both* snapshots are compared, minus
//!   `playback_time` and `paused`. Keys missing from the cached side are
//!   never compared.
//!
//! A snapshot whose title is empty counts as "nothing playing".

use crate::schema::Schema;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Fields that change while the same song keeps playing.
pub const IGNORED_FIELDS: [&str; 2] = ["playback_time", "paused"];

/// Separator used when the listener list is persisted as one column.
pub const LISTENER_SEPARATOR: char = ';';

/// One now-playing record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NowPlayingSnapshot {
    /// Persisted metadata columns (`path` is never in here).
    pub fields: BTreeMap<String, String>,
    pub paused: bool,
    /// Basename of the published cover image.
    pub art: Option<String>,
    pub listeners: Vec<String>,
}

impl NowPlayingSnapshot {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    pub fn title(&self) -> &str {
        self.get("title").unwrap_or_default()
    }

    pub fn album(&self) -> Option<&str> {
        self.get("album")
    }

    pub fn playback_time(&self) -> &str {
        self.get("playback_time").unwrap_or_default()
    }

    /// False for the empty-title row that means nothing is playing.
    pub fn is_active(&self) -> bool {
        !self.title().is_empty()
    }

    pub fn listeners_joined(&self) -> String {
        join_listeners(&self.listeners)
    }

    /// `artist - title [album]`, printable ASCII only.
    pub fn change_notice(&self) -> String {
        let notice = format!(
            "{} - {} [{}]",
            self.get("artist").unwrap_or_default(),
            self.title(),
            self.album().unwrap_or_default()
        );
        notice
            .chars()
            .map(|c| if c == ' ' || (c.is_ascii_graphic() && c != '`' && c != '~') { c } else { '?' })
            .collect()
    }
}

pub fn join_listeners(listeners: &[String]) -> String {
    listeners.join(&LISTENER_SEPARATOR.to_string())
}

pub fn split_listeners(joined: &str) -> Vec<String> {
    joined
        .split(LISTENER_SEPARATOR)
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .collect()
}

/// A snapshot built from one complete metadata read, plus the track path
/// that is kept out of the row but needed for cover lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub snapshot: NowPlayingSnapshot,
    pub track_path: Option<String>,
}

impl Candidate {
    /// Zip `values` onto the schema. Callers check the count first; surplus
    /// values are ignored and missing ones left out.
    pub fn from_values(schema: &Schema, values: &[String], paused: bool) -> Self {
        let mut fields = BTreeMap::new();
        let mut track_path = None;

        for (field, value) in schema.fields().iter().zip(values) {
            if field.persisted {
                fields.insert(field.column.to_string(), value.clone());
            } else if field.column == "path" {
                track_path = Some(value.clone());
            }
        }

        Self {
            snapshot: NowPlayingSnapshot {
                fields,
                paused,
                art: None,
                listeners: Vec::new(),
            },
            track_path,
        }
    }

    /// Directory holding the track, where cover images live.
    pub fn track_dir(&self) -> Option<PathBuf> {
        let path = self.track_path.as_deref().filter(|p| !p.is_empty())?;
        Path::new(path).parent().map(Path::to_path_buf)
    }
}

/// Whether `candidate` is a different song from `previous`.
pub fn has_changed(previous: Option<&NowPlayingSnapshot>, candidate: &NowPlayingSnapshot) -> bool {
    let Some(previous) = previous else {
        return true;
    };

    previous.fields.iter().any(|(column, old)| {
        if IGNORED_FIELDS.contains(&column.as_str()) {
            return false;
        }
        candidate.fields.get(column).is_some_and(|new| new != old)
    })
}

/// Holds the last reconciled snapshot. Only the reconciliation loop writes it,
/// and only after the matching store write has completed.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    current: Option<NowPlayingSnapshot>,
}

impl SnapshotCache {
    pub fn new(initial: Option<NowPlayingSnapshot>) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> Option<&NowPlayingSnapshot> {
        self.current.as_ref()
    }

    /// The cached snapshot, unless it is the empty-title "nothing playing" row.
    pub fn active(&self) -> Option<&NowPlayingSnapshot> {
        self.current.as_ref().filter(|s| s.is_active())
    }

    pub fn is_active(&self) -> bool {
        self.active().is_some()
    }

    /// A row exists in the store (so writes are updates, not inserts).
    pub fn holds_row(&self) -> bool {
        self.current.is_some()
    }

    pub fn replace(&mut self, snapshot: NowPlayingSnapshot) {
        self.current = Some(snapshot);
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pairs: &[(&str, &str)]) -> NowPlayingSnapshot {
        NowPlayingSnapshot {
            fields: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ..Default::default()
        }
    }

    fn song() -> NowPlayingSnapshot {
        snapshot(&[
            ("artist", "Boards of Canada"),
            ("title", "Roygbiv"),
            ("album", "Music Has the Right to Children"),
            ("playback_time", "0:12"),
        ])
    }

    #[test]
    fn test_no_previous_is_always_changed() {
        assert!(has_changed(None, &song()));
        assert!(has_changed(None, &NowPlayingSnapshot::default()));
    }

    #[test]
    fn test_playback_time_and_paused_are_ignored() {
        let old = song();
        let mut new = song();
        new.fields.insert("playback_time".into(), "0:17".into());
        new.paused = true;

        assert!(!has_changed(Some(&old), &new));
    }

    #[test]
    fn test_paused_column_from_store_is_ignored() {
        let mut old = song();
        old.fields.insert("paused".into(), "1".into());
        let mut new = song();
        new.fields.insert("paused".into(), "0".into());

        assert!(!has_changed(Some(&old), &new));
    }

    #[test]
    fn test_any_other_overlapping_field_is_a_change() {
        for column in ["artist", "title", "album"] {
            let old = song();
            let mut new = song();
            new.fields.insert(column.into(), "something else".into());
            assert!(has_changed(Some(&old), &new), "{column} should count as a change");
        }
    }

    #[test]
    fn test_fields_missing_from_cache_are_not_compared() {
        let old = song();
        let mut new = song();
        new.fields.insert("genre".into(), "IDM".into());

        assert!(!has_changed(Some(&old), &new));
    }

    #[test]
    fn test_fields_missing_from_candidate_are_not_compared() {
        let mut old = song();
        old.fields.insert("genre".into(), "IDM".into());

        assert!(!has_changed(Some(&old), &song()));
    }

    #[test]
    fn test_empty_title_is_inactive() {
        let cache = SnapshotCache::new(Some(snapshot(&[("title", "")])));

        assert!(cache.holds_row());
        assert!(!cache.is_active());
        assert!(cache.active().is_none());
    }

    #[test]
    fn test_candidate_keeps_path_out_of_fields() {
        let schema = Schema::standard();
        let mut values: Vec<String> = schema.fields().iter().map(|f| f.column.to_uppercase()).collect();
        let last = values.len() - 1;
        values[last] = "/music/Artist/Album/01 Track.flac".to_string();

        let candidate = Candidate::from_values(&schema, &values, true);

        assert!(candidate.snapshot.get("path").is_none());
        assert_eq!(candidate.snapshot.title(), "TITLE");
        assert_eq!(candidate.snapshot.playback_time(), "PLAYBACK_TIME");
        assert!(candidate.snapshot.paused);
        assert_eq!(candidate.track_dir(), Some(PathBuf::from("/music/Artist/Album")));
    }

    #[test]
    fn test_track_dir_missing_path() {
        let schema = Schema::standard();
        let mut values = vec![String::new(); schema.len()];
        values[1] = "Title".into();

        let candidate = Candidate::from_values(&schema, &values, false);
        assert_eq!(candidate.track_dir(), None);
    }

    #[test]
    fn test_change_notice_masks_non_ascii() {
        let s = snapshot(&[("artist", "Sigur Rós"), ("title", "Hoppípolla"), ("album", "Takk...")]);
        assert_eq!(s.change_notice(), "Sigur R?s - Hopp?polla [Takk...]");
    }

    #[test]
    fn test_listener_join_and_split() {
        let listeners = vec!["10.0.0.1".to_string(), "192.168.1.20".to_string()];
        let joined = join_listeners(&listeners);

        assert_eq!(joined, "10.0.0.1;192.168.1.20");
        assert_eq!(split_listeners(&joined), listeners);
        assert!(split_listeners("").is_empty());
    }
}
