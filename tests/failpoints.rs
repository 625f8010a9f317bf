// Keepsake backup scheduler.
// Copyright 2024-2026 Keepsake contributors.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Tests based on failpoints, simulating IO errors that are hard to produce
//! for real.
//!
//! Failpoints aren't built by default.
//!
//! To run them use
//!
//!     cargo test --features fail/failpoints --test failpoints
//!

use std::fs::{self, File};

use fail::FailScenario;
use filetime::{set_file_mtime, FileTime};
use pretty_assertions::assert_eq;

use keepsake::retention::{enforce, RetentionStats};
use keepsake::test_fixtures::{TestHost, TreeFixture};
use keepsake::upload::upload_file;
use keepsake::*;

#[tokio::test]
async fn unreadable_files_are_left_out() {
    let scenario = FailScenario::setup();
    fail::cfg("archiver::open-source", "return").unwrap();

    let tree = TreeFixture::new();
    tree.populate_server();
    let mut config = Config::new("backups");
    config.working_dir = tree.path().to_owned();
    let keepsake = Keepsake::new(config, TestHost::new([tree.path().join("world")])).unwrap();
    let (path, stats) = match keepsake.run_backup(false).await.unwrap() {
        BackupOutcome::Completed { path, stats, .. } => (path, stats),
        other => panic!("backup didn't complete: {other:?}"),
    };
    assert_eq!(stats.files, 0);
    assert_eq!(stats.errors, 7);

    // Directories are still there; files aren't.
    let zip = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
    let names: Vec<&str> = zip.file_names().collect();
    assert!(names.contains(&"world/region/"), "{names:?}");
    assert!(!names.iter().any(|n| !n.ends_with('/')), "{names:?}");
    scenario.teardown();
}

#[test]
fn undeletable_archive_is_skipped_and_next_oldest_is_evicted() {
    let scenario = FailScenario::setup();
    // Only the first removal fails.
    fail::cfg("retention::remove-archive", "1*return->off").unwrap();

    let tree = TreeFixture::new();
    for i in 0..4 {
        let path = tree.create_file_with_contents(&format!("b{i}.zip"), b"zip");
        set_file_mtime(&path, FileTime::from_unix_time(1_600_000_000 + i * 60, 0)).unwrap();
    }
    let stats = enforce(tree.path(), 3).unwrap();
    assert_eq!(
        stats,
        RetentionStats {
            found: 4,
            deleted: 2,
            failed: 1,
        }
    );
    let names: Vec<String> = list_archives(tree.path())
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect();
    assert_eq!(names, ["b0.zip", "b3.zip"]);
    scenario.teardown();
}

#[test]
fn undeletable_local_copy_still_counts_as_uploaded() {
    let scenario = FailScenario::setup();
    fail::cfg("upload::remove-local", "return").unwrap();

    let local = TreeFixture::new();
    let remote = TreeFixture::new();
    let file = local.create_file_with_contents("backup-1.zip", b"pretend zip");
    let transport = Transport::local(remote.path());
    let outcome = upload_file(&transport, &file, false, true).unwrap();
    assert_eq!(
        outcome,
        UploadOutcome::Uploaded {
            name: "backup-1.zip".to_owned(),
            deleted_local: false,
        }
    );
    assert!(file.exists());
    assert_eq!(fs::read(remote.path().join("backup-1.zip")).unwrap(), b"pretend zip");

    // A test upload passes even if its local file can't be removed.
    let test_file = upload::write_test_file(local.path()).unwrap();
    assert_eq!(
        upload_file(&transport, &test_file, true, false).unwrap(),
        UploadOutcome::TestPassed
    );
    assert!(test_file.exists());
    assert!(!remote.path().join(upload::TEST_FILE_NAME).exists());
    scenario.teardown();
}
