// ABOUTME: Integration tests for the full collation workflow
// ABOUTME: Builds real stores on disk (plain, legacy, and compressed) and merges them end-to-end

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use neubot_collate::commands::digest::compute_table_digest;
use neubot_collate::merge::{merge, watermark, MergeOptions, SourceOutcome, Watermark};
use neubot_collate::store::{SchemaVersion, Store, Table};
use rusqlite::{params, Connection};
use tempfile::tempdir;

/// Create a current-version store holding one speedtest row per timestamp
fn current_store(dir: &Path, name: &str, timestamps: &[i64]) -> PathBuf {
    let path = dir.join(name);
    let store = Store::create(&path).unwrap();
    for ts in timestamps {
        store
            .connection()
            .execute(
                "INSERT INTO speedtest (timestamp, uuid, real_address, download_speed,
                                        privacy_can_share)
                 VALUES (?1, 'instance-a', '130.192.91.211', ?2, 1)",
                params![ts, *ts as f64 * 1000.0],
            )
            .unwrap();
    }
    path
}

/// Create a store laid out as version 2.0 wrote it, with raw SQL
fn legacy_v2_store(dir: &Path, name: &str, timestamps: &[i64]) -> PathBuf {
    let path = dir.join(name);
    let conn = Connection::open(&path).unwrap();
    let columns = "id INTEGER PRIMARY KEY AUTOINCREMENT, timestamp INTEGER, uuid TEXT,
                   internal_address TEXT, real_address TEXT, remote_address TEXT,
                   privacy_informed INTEGER DEFAULT 0, privacy_can_collect INTEGER DEFAULT 0,
                   privacy_can_publish INTEGER DEFAULT 0, connect_time REAL,
                   download_speed REAL, upload_speed REAL, latency REAL, platform TEXT,
                   neubot_version TEXT";
    conn.execute_batch(&format!(
        "CREATE TABLE config (key TEXT PRIMARY KEY, value TEXT);
         INSERT INTO config VALUES ('version', '2.0'), ('uuid', 'legacy-uuid');
         CREATE TABLE speedtest ({columns});
         CREATE TABLE bittorrent ({columns});"
    ))
    .unwrap();
    for ts in timestamps {
        conn.execute(
            "INSERT INTO bittorrent (timestamp, uuid, privacy_can_publish)
             VALUES (?1, 'legacy', 1)",
            params![ts],
        )
        .unwrap();
    }
    path
}

fn gzip_copy(path: &Path) -> PathBuf {
    let target = PathBuf::from(format!("{}.gz", path.display()));
    let data = std::fs::read(path).unwrap();
    let file = File::create(&target).unwrap();
    let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    encoder.write_all(&data).unwrap();
    encoder.finish().unwrap();
    target
}

fn bzip2_copy(path: &Path) -> PathBuf {
    let target = PathBuf::from(format!("{}.bz2", path.display()));
    let data = std::fs::read(path).unwrap();
    let file = File::create(&target).unwrap();
    let mut encoder = bzip2::write::BzEncoder::new(file, bzip2::Compression::default());
    encoder.write_all(&data).unwrap();
    encoder.finish().unwrap();
    target
}

fn timestamps(path: &Path, table: Table) -> Vec<i64> {
    let store = Store::open(path).unwrap();
    let mut stmt = store
        .connection()
        .prepare(&format!("SELECT timestamp FROM {} ORDER BY timestamp", table))
        .unwrap();
    let values = stmt
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<rusqlite::Result<Vec<i64>>>()
        .unwrap();
    values
}

fn digest_of(path: &Path, table: Table) -> String {
    let store = Store::open(path).unwrap();
    compute_table_digest(&store, table).unwrap().checksum
}

#[test]
fn test_overlapping_sources_merge_past_watermark() {
    let dir = tempdir().unwrap();
    let a = current_store(dir.path(), "a.sqlite3", &[10, 20, 30]);
    let b = current_store(dir.path(), "b.sqlite3", &[25, 40]);
    let dest = dir.path().join("database.sqlite3");

    println!("Merging A then B...");
    let report = merge(&dest, &[a, b], &MergeOptions::default()).unwrap();
    assert_eq!(report.merged(), 2);
    assert!(!report.has_failures());

    // 25 is behind the watermark left by A, so only 40 comes from B
    assert_eq!(timestamps(&dest, Table::Speedtest), vec![10, 20, 30, 40]);
    println!("✓ Rows behind the watermark were skipped");
}

#[test]
fn test_rerun_is_idempotent() {
    let dir = tempdir().unwrap();
    let a = current_store(dir.path(), "a.sqlite3", &[10, 20, 30]);
    let b = current_store(dir.path(), "b.sqlite3", &[25, 40]);
    let dest = dir.path().join("database.sqlite3");
    let sources = vec![a, b];

    merge(&dest, &sources, &MergeOptions::default()).unwrap();
    let before = digest_of(&dest, Table::Speedtest);

    let second = merge(&dest, &sources, &MergeOptions::default()).unwrap();
    assert_eq!(second.rows_copied(Table::Speedtest), 0);
    assert_eq!(second.rows_copied(Table::Bittorrent), 0);
    assert_eq!(digest_of(&dest, Table::Speedtest), before);
    println!("✓ Second run copied nothing");
}

#[test]
fn test_watermark_only_moves_forward() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("database.sqlite3");
    let mut last = Watermark::EMPTY;

    for (index, batch) in [&[5i64, 50][..], &[1, 2, 3], &[49, 51, 60]].iter().enumerate() {
        let source = current_store(dir.path(), &format!("s{}.sqlite3", index), batch);
        merge(&dest, &[source], &MergeOptions::default()).unwrap();

        let store = Store::open(&dest).unwrap();
        let current = watermark(store.connection(), Table::Speedtest).unwrap();
        assert!(current >= last, "watermark went from {:?} to {:?}", last, current);
        last = current;
    }

    assert_eq!(last, Watermark(60));
    assert_eq!(timestamps(&dest, Table::Speedtest), vec![5, 50, 51, 60]);
    println!("✓ Watermark is monotonic across runs");
}

#[test]
fn test_disjoint_sources_sum() {
    let dir = tempdir().unwrap();
    let a = current_store(dir.path(), "a.sqlite3", &[1, 2, 3]);
    let b = current_store(dir.path(), "b.sqlite3", &[4, 5]);
    let c = current_store(dir.path(), "c.sqlite3", &[6, 7, 8, 9]);
    let dest = dir.path().join("database.sqlite3");

    let report = merge(&dest, &[a, b, c], &MergeOptions::default()).unwrap();
    assert_eq!(report.rows_copied(Table::Speedtest), 9);

    let store = Store::open(&dest).unwrap();
    assert_eq!(store.count(Table::Speedtest).unwrap(), 9);
    println!("✓ Disjoint ranges add up");
}

#[test]
fn test_ids_are_reassigned_and_content_preserved() {
    let dir = tempdir().unwrap();
    let a = current_store(dir.path(), "a.sqlite3", &[10, 20]);
    let dest = dir.path().join("database.sqlite3");

    // Occupy ids 1 and 2 in the destination with older rows
    let early = current_store(dir.path(), "early.sqlite3", &[1, 2]);
    merge(&dest, &[early], &MergeOptions::default()).unwrap();
    merge(&dest, &[a.clone()], &MergeOptions::default()).unwrap();

    let store = Store::open(&dest).unwrap();
    let ids: Vec<i64> = store
        .connection()
        .prepare("SELECT id FROM speedtest WHERE timestamp >= 10 ORDER BY timestamp")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap();
    assert_eq!(ids, vec![3, 4]);
    drop(store);

    // Content without ids matches the source once the older rows are cut away
    let only_a = dir.path().join("only_a.sqlite3");
    merge(&only_a, &[a.clone()], &MergeOptions::default()).unwrap();
    assert_eq!(
        digest_of(&only_a, Table::Speedtest),
        digest_of(&a, Table::Speedtest)
    );
    println!("✓ Destination assigned fresh ids without altering content");
}

#[test]
fn test_version_gate_skips_legacy_unless_forced() {
    let dir = tempdir().unwrap();
    let legacy = legacy_v2_store(dir.path(), "legacy.sqlite3", &[100, 200]);
    let dest = dir.path().join("database.sqlite3");

    let report = merge(&dest, &[legacy.clone()], &MergeOptions::default()).unwrap();
    assert_eq!(report.skipped(), 1);
    assert!(!report.has_failures());
    match &report.sources[0].outcome {
        SourceOutcome::Skipped { version } => assert_eq!(*version, SchemaVersion::new(2, 0)),
        other => panic!("unexpected outcome {:?}", other),
    }
    println!("✓ Legacy source skipped by default");

    let forced = MergeOptions {
        force: true,
        ..MergeOptions::default()
    };
    let report = merge(&dest, &[legacy], &forced).unwrap();
    assert_eq!(report.merged(), 1);
    assert_eq!(report.rows_copied(Table::Bittorrent), 2);

    let store = Store::open(&dest).unwrap();
    let shareable: i64 = store
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM bittorrent WHERE privacy_can_share = 1",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(shareable, 2);
    println!("✓ Forced merge migrated and copied the legacy source");
}

#[test]
fn test_skipped_legacy_source_stays_skipped_on_rerun() {
    let dir = tempdir().unwrap();
    let legacy = legacy_v2_store(dir.path(), "legacy.sqlite3", &[100, 200]);
    let current = current_store(dir.path(), "current.sqlite3", &[10, 20]);
    let dest = dir.path().join("database.sqlite3");
    let sources = vec![legacy.clone(), current];

    for run in 1..=2 {
        let report = merge(&dest, &sources, &MergeOptions::default()).unwrap();
        match &report.sources[0].outcome {
            SourceOutcome::Skipped { version } => {
                assert_eq!(*version, SchemaVersion::new(2, 0), "run {}", run)
            }
            other => panic!("run {}: unexpected outcome {:?}", run, other),
        }
        assert_eq!(report.merged(), 1);
        assert_eq!(report.rows_copied(Table::Bittorrent), 0);
    }

    let store = Store::open(&dest).unwrap();
    assert_eq!(store.count(Table::Bittorrent).unwrap(), 0);
    assert_eq!(store.count(Table::Speedtest).unwrap(), 2);
    drop(store);

    let conn = Connection::open(&legacy).unwrap();
    let version: String = conn
        .query_row("SELECT value FROM config WHERE key = 'version'", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(version, "2.0");
    println!("✓ Skipped source left untouched and skipped again");
}

#[test]
fn test_lowered_min_version_admits_legacy() {
    let dir = tempdir().unwrap();
    let legacy = legacy_v2_store(dir.path(), "legacy.sqlite3", &[7]);
    let dest = dir.path().join("database.sqlite3");

    let options = MergeOptions {
        min_version: SchemaVersion::new(1, 2),
        ..MergeOptions::default()
    };
    let report = merge(&dest, &[legacy], &options).unwrap();
    assert_eq!(report.merged(), 1);
    assert_eq!(timestamps(&dest, Table::Bittorrent), vec![7]);
}

#[test]
fn test_compressed_sources_match_plain() {
    let dir = tempdir().unwrap();
    let a = current_store(dir.path(), "a.sqlite3", &[10, 20, 30]);
    let b = current_store(dir.path(), "b.sqlite3", &[25, 40, 50]);
    let a_gz = gzip_copy(&a);
    let b_bz2 = bzip2_copy(&b);

    let plain = dir.path().join("plain.sqlite3");
    let packed = dir.path().join("packed.sqlite3");
    merge(&plain, &[a, b], &MergeOptions::default()).unwrap();

    let scratch = dir.path().join("scratch");
    std::fs::create_dir(&scratch).unwrap();
    let options = MergeOptions {
        temp_dir: Some(scratch.clone()),
        ..MergeOptions::default()
    };
    let report = merge(&packed, &[a_gz, b_bz2], &options).unwrap();
    assert_eq!(report.merged(), 2);

    assert_eq!(
        digest_of(&plain, Table::Speedtest),
        digest_of(&packed, Table::Speedtest)
    );
    assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    println!("✓ .gz and .bz2 sources merge like their plain copies and leave no scratch files");
}

#[test]
fn test_bad_sources_do_not_block_batch() {
    let dir = tempdir().unwrap();
    let garbage = dir.path().join("garbage.sqlite3");
    std::fs::write(&garbage, b"this is not a database at all, just some bytes").unwrap();

    let future = dir.path().join("future.sqlite3");
    {
        let conn = Connection::open(&future).unwrap();
        conn.execute_batch(
            "CREATE TABLE config (key TEXT PRIMARY KEY, value TEXT);
             INSERT INTO config VALUES ('version', '9.0');",
        )
        .unwrap();
    }

    let corrupt_gz = dir.path().join("corrupt.sqlite3.gz");
    std::fs::write(&corrupt_gz, b"not gzip").unwrap();

    let good = current_store(dir.path(), "good.sqlite3", &[1, 2, 3]);
    let dest = dir.path().join("database.sqlite3");

    let report = merge(
        &dest,
        &[garbage, future, corrupt_gz, good],
        &MergeOptions::default(),
    )
    .unwrap();
    assert!(report.has_failures());
    assert_eq!(report.failed(), 3);
    assert_eq!(report.merged(), 1);

    match &report.sources[1].outcome {
        SourceOutcome::Failed { kind, .. } => assert_eq!(*kind, Some("migration")),
        other => panic!("unexpected outcome {:?}", other),
    }
    match &report.sources[2].outcome {
        SourceOutcome::Failed { kind, .. } => assert_eq!(*kind, Some("io")),
        other => panic!("unexpected outcome {:?}", other),
    }

    assert_eq!(timestamps(&dest, Table::Speedtest), vec![1, 2, 3]);
    println!("✓ Failed sources were isolated");
}

#[test]
fn test_fractional_timestamp_fails_source_without_wedging_destination() {
    let dir = tempdir().unwrap();
    let fractional = dir.path().join("fractional.sqlite3");
    {
        let store = Store::create(&fractional).unwrap();
        store
            .connection()
            .execute(
                "INSERT INTO speedtest (timestamp) VALUES (?1)",
                params![1324684800.5f64],
            )
            .unwrap();
    }
    let later = current_store(dir.path(), "later.sqlite3", &[1324684900]);
    let dest = dir.path().join("database.sqlite3");

    let report = merge(&dest, &[fractional, later], &MergeOptions::default()).unwrap();
    match &report.sources[0].outcome {
        SourceOutcome::Failed { kind, .. } => assert_eq!(*kind, Some("schema_mismatch")),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(report.merged(), 1);
    assert_eq!(timestamps(&dest, Table::Speedtest), vec![1324684900]);
    println!("✓ Non-integer timestamps are refused before they reach the destination");
}

#[test]
fn test_destination_with_fractional_timestamp_still_merges() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("database.sqlite3");
    {
        let store = Store::create(&dest).unwrap();
        store
            .connection()
            .execute(
                "INSERT INTO speedtest (timestamp) VALUES (?1)",
                params![1324684800.5f64],
            )
            .unwrap();
    }
    let later = current_store(dir.path(), "later.sqlite3", &[1324684700, 1324684900]);

    let report = merge(&dest, &[later], &MergeOptions::default()).unwrap();
    assert_eq!(report.merged(), 1);
    assert_eq!(report.rows_copied(Table::Speedtest), 1);

    let store = Store::open(&dest).unwrap();
    assert_eq!(
        watermark(store.connection(), Table::Speedtest).unwrap(),
        Watermark(1324684900)
    );
    println!("✓ A fractional watermark does not block later sources");
}

#[test]
fn test_legacy_source_migrated_on_open() {
    let dir = tempdir().unwrap();
    let legacy = legacy_v2_store(dir.path(), "legacy.sqlite3", &[1]);

    let store = Store::open(&legacy).unwrap();
    assert_eq!(store.opened_version(), SchemaVersion::new(2, 0));
    assert_eq!(store.config().unwrap()["version"], "4.0");
    assert_eq!(store.count(Table::Bittorrent).unwrap(), 1);
    println!("✓ Legacy store upgraded to the current schema");
}
