//! # nowplaying Performance Benchmarks
//!
//! The per-tick hot paths: change detection against the cached row, the
//! listener page scrape, decoding `mpc` output and sentinel scanning.
//!
//! ## Running Benchmarks
//!
//! ```bash
//! cargo bench
//! cargo bench change_detection
//! ```

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use nowplaying::listeners::parse_listeners;
use nowplaying::mpd_client::decode_metadata;
use nowplaying::rebuild::scan_for_sentinel;
use nowplaying::schema::Schema;
use nowplaying::snapshot::{has_changed, Candidate};
use std::hint::black_box;
use std::path::Path;

fn sample_values(title: &str, elapsed: &str) -> Vec<String> {
    Schema::standard()
        .fields()
        .iter()
        .map(|field| match field.column {
            "artist" => "Broadcast".to_string(),
            "title" => title.to_string(),
            "album" => "Haha Sound".to_string(),
            "playback_time" => elapsed.to_string(),
            "path" => format!("/srv/music/Broadcast/Haha Sound/{title}.flac"),
            other => format!("{other} value"),
        })
        .collect()
}

/// Icecast admin page with `listeners` rows.
fn admin_page(listeners: usize) -> String {
    let rows: String = (0..listeners)
        .map(|i| {
            format!(
                "<tr><td>10.0.{}.{}</td><td>{}</td><td>VLC/3.0</td><td><a href=\"#\">Kick</a></td></tr>\n",
                i / 256,
                i % 256,
                i * 7
            )
        })
        .collect();
    format!(
        "<html><body><h3>Mount Point /stream.ogg</h3><div class=\"scrolltable\"><table>\
         <thead><tr><td>IP</td></tr></thead><tbody>\n{rows}</tbody></table></div></body></html>"
    )
}

/// Benchmark the song-changed decision
fn benchmark_change_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("change_detection");
    let schema = Schema::standard();

    let cached = Candidate::from_values(&schema, &sample_values("Pendulum", "1:00"), false).snapshot;
    let same = Candidate::from_values(&schema, &sample_values("Pendulum", "1:02"), true).snapshot;
    let next = Candidate::from_values(&schema, &sample_values("Valerie", "0:00"), false).snapshot;

    group.bench_function("unchanged", |b| {
        b.iter(|| has_changed(black_box(Some(&cached)), black_box(&same)))
    });
    group.bench_function("changed", |b| {
        b.iter(|| has_changed(black_box(Some(&cached)), black_box(&next)))
    });
    group.bench_function("candidate_from_values", |b| {
        let values = sample_values("Pendulum", "1:00");
        b.iter(|| Candidate::from_values(black_box(&schema), black_box(&values), false))
    });

    group.finish();
}

/// Benchmark the Icecast admin page scrape
fn benchmark_listener_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("listener_parsing");

    for size in [0, 10, 100, 1000].iter() {
        let page = admin_page(*size);
        group.bench_with_input(BenchmarkId::new("parse_listeners", size), &page, |b, page| {
            b.iter(|| parse_listeners(black_box(page)))
        });
    }

    group.finish();
}

/// Benchmark decoding `mpc current` output
fn benchmark_metadata_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("metadata_decoding");
    let format = Schema::standard().format_spec();
    let raw = (0..format.rendered_count())
        .map(|i| format!("field {i}"))
        .collect::<Vec<_>>()
        .join("|");
    let music_dir = Path::new("/srv/music");

    group.bench_function("decode_metadata", |b| {
        b.iter(|| decode_metadata(black_box(&format), black_box(&raw), "1:23", Some(music_dir)))
    });

    group.finish();
}

/// Benchmark sentinel scanning over updater progress output
fn benchmark_sentinel_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("sentinel_scan");
    let progress: Vec<u8> = (0..400)
        .map(|i| format!("{:.2}%...", f64::from(i) / 4.0))
        .collect::<String>()
        .into_bytes();
    let mut finished = progress.clone();
    finished.extend_from_slice(b"snagglepuss");

    group.bench_function("progress_only", |b| {
        b.iter_batched(
            || progress.clone(),
            |mut buffer| scan_for_sentinel(&mut buffer),
            BatchSize::SmallInput,
        )
    });
    group.bench_function("with_sentinel", |b| {
        b.iter_batched(
            || finished.clone(),
            |mut buffer| scan_for_sentinel(&mut buffer),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_change_detection,
    benchmark_listener_parsing,
    benchmark_metadata_decoding,
    benchmark_sentinel_scan
);
criterion_main!(benches);
