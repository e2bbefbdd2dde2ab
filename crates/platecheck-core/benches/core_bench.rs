//! Criterion benchmarks for platecheck-core.
//!
//! ## Benchmark groups
//!
//! 1. **schema**: DDL init and re-apply overhead.
//! 2. **classify**: filename classification and frame-number parsing.
//! 3. **templates**: validation and rendering of plate paths.
//! 4. **sop**: ASC slope/offset/power parsing.
//! 5. **timecode**: parsing and conversion.
//! 6. **scan**: walking a plates directory and checking frame integrity.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/platecheck-core/Cargo.toml
//! # Run only the template group:
//! cargo bench --manifest-path crates/platecheck-core/Cargo.toml -- templates
//! ```

use std::path::{Path, PathBuf};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use indexmap::IndexMap;
use rusqlite::Connection;

use platecheck_core::models::TemplateKind;
use platecheck_core::scanner::filesystem::{classify_filename, collect_plate_files, frame_number, FramePattern};
use platecheck_core::scanner::integrity::check_frames;
use platecheck_core::scanner::metadata::parse_asc_sop;
use platecheck_core::scanner::templates::{
    AssetTemplate, KeyType, PlateTemplates, StrFilter, Template,
};
use platecheck_core::store::schema::apply_schema;
use platecheck_core::timecode::Timecode;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn keys() -> IndexMap<String, KeyType> {
    let mut keys = IndexMap::new();
    keys.insert("Sequence".to_string(), KeyType::Str { filter: None });
    keys.insert("Shot".to_string(), KeyType::Str { filter: None });
    keys.insert(
        "plate_name".to_string(),
        KeyType::Str {
            filter: Some(StrFilter::Alphanumeric),
        },
    );
    keys.insert("version".to_string(), KeyType::Int { width: 3 });
    keys.insert("SEQ".to_string(), KeyType::Sequence { width: 4 });
    keys
}

fn templates(root: &Path) -> PlateTemplates {
    let keys = keys();
    let dir = "sequences/{Sequence}/{Shot}/plates/{plate_name}/v{version}/{Shot}_{plate_name}_v{version}";
    let asset = |kind: TemplateKind, suffix: &str| AssetTemplate {
        kind,
        template: Template::parse(
            kind.template_name(),
            &format!("{dir}{suffix}"),
            &keys,
            Some(root.to_path_buf()),
        )
        .unwrap(),
        published_file_type: kind.template_name().to_string(),
    };
    PlateTemplates::new(
        Template::parse("shot_root", "sequences/{Sequence}/{Shot}", &keys, Some(root.to_path_buf()))
            .unwrap(),
        Template::parse("plate_version_name", "{Shot}_{plate_name}_v{version}", &keys, None).unwrap(),
        vec![
            asset(TemplateKind::Frames, ".{SEQ}.exr"),
            asset(TemplateKind::PrimaryMovie, "_avid.mov"),
            asset(TemplateKind::AlternateMovie, "_vfx.mov"),
            asset(TemplateKind::Lut, ".cube"),
        ],
    )
    .unwrap()
}

/// Write `frames` members of one sequence plus a movie under a temp root.
fn write_plate(root: &Path, frames: u64) -> PathBuf {
    let dir = root.join("sequences/SQ010/SH010/plates/main/v001");
    std::fs::create_dir_all(&dir).unwrap();
    for frame in 1001..1001 + frames {
        std::fs::write(dir.join(format!("SH010_main_v001.{frame}.exr")), vec![0u8; 512]).unwrap();
    }
    std::fs::write(dir.join("SH010_main_v001_avid.mov"), b"mov").unwrap();
    dir
}

// ---------------------------------------------------------------------------
// Benchmark: Schema initialization
// ---------------------------------------------------------------------------

fn bench_schema(c: &mut Criterion) {
    let mut group = c.benchmark_group("schema");

    group.bench_function("init", |b| {
        b.iter(|| {
            let conn = Connection::open_in_memory().unwrap();
            apply_schema(&conn).unwrap();
            black_box(&conn);
        });
    });

    group.bench_function("reapply_on_current", |b| {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        b.iter(|| apply_schema(black_box(&conn)).unwrap());
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: Filename classification
// ---------------------------------------------------------------------------

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");

    group.bench_function("sequence_member", |b| {
        b.iter(|| classify_filename(black_box("SH010_main_v001.1001.exr")));
    });
    group.bench_function("movie", |b| {
        b.iter(|| classify_filename(black_box("SH010_main_v001_avid.mov")));
    });
    group.bench_function("rejected", |b| {
        b.iter(|| classify_filename(black_box("read me.txt")));
    });
    group.bench_function("frame_number", |b| {
        b.iter(|| frame_number(black_box("SH010_main_v001.10000.exr")));
    });
    group.bench_function("pattern_frame_filename", |b| {
        let pattern = FramePattern::parse("SH010_main_v001.%04d.exr").unwrap();
        b.iter(|| pattern.frame_filename(black_box(1014)));
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: Template validation
// ---------------------------------------------------------------------------

fn bench_templates(c: &mut Criterion) {
    let mut group = c.benchmark_group("templates");
    let root = PathBuf::from("/show");
    let templates = templates(&root);
    let dir = root.join("sequences/SQ010/SH010/plates/main/v001");

    let frames = dir.join("SH010_main_v001.%04d.exr");
    group.bench_function("match_frames", |b| {
        b.iter(|| templates.match_asset(black_box(&frames)));
    });
    // Falls through every earlier template before matching.
    let lut = dir.join("SH010_main_v001.cube");
    group.bench_function("match_lut", |b| {
        b.iter(|| templates.match_asset(black_box(&lut)));
    });
    let stray = dir.join("SH010_main_v001.jpg");
    group.bench_function("match_none", |b| {
        b.iter(|| templates.match_asset(black_box(&stray)));
    });
    group.bench_function("version_round_trip", |b| {
        b.iter(|| {
            let fields = templates.version_fields(black_box("SH010_0010_main_v003")).unwrap();
            templates.version_name(&fields).unwrap()
        });
    });
    group.bench_function("shot_root", |b| {
        b.iter(|| templates.shot_root(black_box("SQ010"), black_box("SH010")).unwrap());
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: SOP parsing
// ---------------------------------------------------------------------------

fn bench_sop(c: &mut Criterion) {
    let mut group = c.benchmark_group("sop");

    group.bench_function("triples", |b| {
        b.iter(|| parse_asc_sop(black_box("(1.1 1.0 0.9)(0.01 -0.02 0.0)(1.0 1.0 1.05)")));
    });
    group.bench_function("invalid_falls_back", |b| {
        b.iter(|| parse_asc_sop(black_box("(1.1 1.0 x)(0 0 0)(1 1 1)")));
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: Time-code
// ---------------------------------------------------------------------------

fn bench_timecode(c: &mut Criterion) {
    let mut group = c.benchmark_group("timecode");

    group.bench_function("parse_24", |b| {
        b.iter(|| Timecode::from_string(24.0, black_box("01:02:03:04")).unwrap());
    });
    group.bench_function("parse_drop_frame", |b| {
        b.iter(|| Timecode::from_string(29.97, black_box("01:02:03;04")).unwrap());
    });
    group.bench_function("millis_round_trip", |b| {
        b.iter(|| Timecode::from_millis(24.0, black_box(3_723_166)).to_millis());
    });
    group.bench_function("display", |b| {
        let tc = Timecode::from_string(25.0, "10:00:00:00").unwrap();
        b.iter(|| black_box(tc).to_string());
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: Directory scan & integrity
// ---------------------------------------------------------------------------

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");
    group.sample_size(20);

    for frames in [100u64, 1000] {
        let tmp = tempfile::tempdir().unwrap();
        let dir = write_plate(tmp.path(), frames);
        let plates = tmp.path().join("sequences/SQ010/SH010/plates");

        group.bench_with_input(BenchmarkId::new("collect_plate_files", frames), &plates, |b, p| {
            b.iter(|| collect_plate_files(black_box(p)));
        });

        let pattern = FramePattern::parse("SH010_main_v001.%04d.exr").unwrap();
        let total = 512 * frames;
        group.bench_with_input(BenchmarkId::new("check_frames", frames), &dir, |b, d| {
            b.iter(|| check_frames(d, &pattern, 1001, 1000 + frames, total, 0.25));
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Register all benchmark groups
// ---------------------------------------------------------------------------

criterion_group!(
    benches,
    bench_schema,
    bench_classify,
    bench_templates,
    bench_sop,
    bench_timecode,
    bench_scan,
);
criterion_main!(benches);
