//! # Field Schema
//!
//! One ordered descriptor shared by the player format string, the `now_playing`
//! row and the `library` mirror table. Every column name that ever reaches SQL
//! text comes from here, never from player output.
//!
//! ```
//! use nowplaying::schema::Schema;
//!
//! let schema = Schema::standard();
//! assert_eq!(schema.library_field_list().split('|').count(), 17);
//! assert!(schema.now_playing_columns().contains(&"playback_time"));
//! assert!(!schema.now_playing_columns().contains(&"path"));
//! ```

/// Where the player gets the value for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    /// An MPD tag rendered by `mpc current -f` (`%tag%`).
    Tag(&'static str),
    /// Elapsed time of the current track, taken from `mpc status`.
    Elapsed,
    /// The track's file, translated to an absolute path.
    File,
    /// No counterpart in MPD; always empty.
    Absent,
}

/// A single metadata field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub column: &'static str,
    pub source: FieldSource,
    /// Mirrored into the `library` table.
    pub in_library: bool,
    /// Written to the `now_playing` row.
    pub persisted: bool,
}

const fn library(column: &'static str, source: FieldSource) -> FieldDef {
    FieldDef { column, source, in_library: true, persisted: true }
}

const STANDARD_FIELDS: [FieldDef; 19] = [
    library("artist", FieldSource::Tag("artist")),
    library("title", FieldSource::Tag("title")),
    library("album", FieldSource::Tag("album")),
    library("date", FieldSource::Tag("date")),
    library("length", FieldSource::Tag("time")),
    library("composer", FieldSource::Tag("composer")),
    library("arranger", FieldSource::Absent),
    library("lyricist", FieldSource::Absent),
    library("performer", FieldSource::Tag("performer")),
    library("remixer", FieldSource::Absent),
    library("genre", FieldSource::Tag("genre")),
    library("album_artist", FieldSource::Tag("albumartist")),
    library("tracknumber", FieldSource::Tag("track")),
    library("totaltracks", FieldSource::Absent),
    library("discnumber", FieldSource::Tag("disc")),
    library("totaldiscs", FieldSource::Absent),
    library("comment", FieldSource::Tag("comment")),
    FieldDef { column: "playback_time", source: FieldSource::Elapsed, in_library: false, persisted: true },
    FieldDef { column: "path", source: FieldSource::File, in_library: false, persisted: false },
];

/// Ordered field list passed explicitly to everything that builds rows or
/// format strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<FieldDef>,
}

impl Schema {
    /// The field set used by the station.
    pub fn standard() -> Self {
        Self::new(STANDARD_FIELDS.to_vec())
    }

    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Number of values a complete metadata read must return.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Columns of the `now_playing` row that come from player metadata.
    pub fn now_playing_columns(&self) -> Vec<&'static str> {
        self.fields.iter().filter(|f| f.persisted).map(|f| f.column).collect()
    }

    pub fn library_columns(&self) -> Vec<&'static str> {
        self.fields.iter().filter(|f| f.in_library).map(|f| f.column).collect()
    }

    /// Pipe-delimited library columns, the sole argument of the rebuild process.
    pub fn library_field_list(&self) -> String {
        self.library_columns().join("|")
    }

    /// The request handed to the player for a metadata read.
    pub fn format_spec(&self) -> FormatSpec {
        FormatSpec {
            sources: self.fields.iter().map(|f| f.source).collect(),
        }
    }
}

/// Escaped `|` in mpc's format grammar; prints a literal pipe.
const MPC_SEPARATOR: &str = "#|";

/// Ordered list of value sources for one metadata read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSpec {
    sources: Vec<FieldSource>,
}

impl FormatSpec {
    pub fn sources(&self) -> &[FieldSource] {
        &self.sources
    }

    /// Sources the player renders itself, in output order.
    pub fn rendered_count(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| matches!(s, FieldSource::Tag(_) | FieldSource::File))
            .count()
    }

    /// `mpc` format string: each rendered field optional, joined with a
    /// literal `|`. A bare `|` is mpc's "else" operator, so it is escaped as
    /// `#|`.
    pub fn mpc_format(&self) -> String {
        self.sources
            .iter()
            .filter_map(|source| match source {
                FieldSource::Tag(tag) => Some(format!("[%{tag}%]")),
                FieldSource::File => Some("[%file%]".to_string()),
                FieldSource::Elapsed | FieldSource::Absent => None,
            })
            .collect::<Vec<_>>()
            .join(MPC_SEPARATOR)
    }
}
