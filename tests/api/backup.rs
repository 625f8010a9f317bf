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

//! Backups through the public API, read back with the zip crate.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pretty_assertions::assert_eq;

use keepsake::test_fixtures::{TestHost, TreeFixture};
use keepsake::*;

fn read_entry(archive: &Path, name: &str) -> String {
    let mut zip = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
    let mut entry = zip.by_name(name).unwrap();
    let mut content = String::new();
    entry.read_to_string(&mut content).unwrap();
    content
}

fn entry_names(archive: &Path) -> Vec<String> {
    let zip = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
    let mut names: Vec<String> = zip.file_names().map(str::to_owned).collect();
    names.sort();
    names
}

fn server_config(tree: &TreeFixture) -> Config {
    let mut config = Config::new("backups");
    config.working_dir = tree.path().to_owned();
    config.units = vec![PathBuf::from("world")];
    config
}

fn completed_path(outcome: BackupOutcome) -> PathBuf {
    match outcome {
        BackupOutcome::Completed { path, .. } => path,
        other => panic!("backup didn't complete: {other:?}"),
    }
}

#[tokio::test]
async fn archive_preserves_content() {
    let tree = TreeFixture::new();
    tree.populate_server();
    let host = Arc::new(DirectoryHost::from_config(&server_config(&tree)).unwrap());
    let keepsake = Keepsake::new(server_config(&tree), host).unwrap();

    let path = completed_path(keepsake.run_backup(false).await.unwrap());
    assert_eq!(read_entry(&path, "world/level.dat"), "overworld");
    assert_eq!(read_entry(&path, "world/region/r.0.0.mca"), "chunks");
    assert_eq!(read_entry(&path, "server.properties"), "motd=hello\n");
    assert_eq!(
        entry_names(&path),
        [
            "logs/",
            "logs/latest.log",
            "plugins/",
            "plugins/WorldEdit.jar",
            "plugins/WorldEdit/",
            "plugins/WorldEdit/config.yml",
            "server.properties",
            "world/",
            "world/level.dat",
            "world/region/",
            "world/region/r.0.0.mca",
            "world_nether/",
            "world_nether/empty/",
            "world_nether/level.dat",
        ]
    );
}

#[tokio::test]
async fn stored_archives_can_be_read_at_each_level() {
    for level in [0, 1, 9] {
        let tree = TreeFixture::new();
        tree.populate_server();
        let mut config = server_config(&tree);
        config.compression_level = level;
        let keepsake = Keepsake::new(config, TestHost::new([])).unwrap();
        let path = completed_path(keepsake.run_backup(false).await.unwrap());
        assert_eq!(read_entry(&path, "logs/latest.log"), "[INFO] Done\n");
    }
}

#[tokio::test]
async fn retention_across_runs() {
    let tree = TreeFixture::new();
    tree.populate_server();
    let mut config = server_config(&tree);
    config.max_backups = 2;
    let keepsake = Keepsake::new(config.clone(), TestHost::new([])).unwrap();

    for prefix in ["a", "b", "c"] {
        config.backup_format = format!("{prefix}-{{DATE}}");
        keepsake.reload(config.clone()).unwrap();
        completed_path(keepsake.run_backup(false).await.unwrap());
    }
    let names = keepsake.list_archives().unwrap();
    assert_eq!(names.len(), 2, "{names:?}");
    assert!(names[0].starts_with("b-"), "{names:?}");
    assert!(names[1].starts_with("c-"), "{names:?}");
    // Earlier archives weren't swept into later ones.
    let latest = keepsake.archives().unwrap().pop().unwrap();
    assert!(!entry_names(&latest.path)
        .iter()
        .any(|n| n.starts_with("backups")));
}

#[cfg(unix)]
#[tokio::test]
async fn symlinks_to_directories_are_not_followed() {
    let tree = TreeFixture::new();
    tree.populate_server();
    tree.create_symlink("world-link", "world");
    tree.create_symlink("props-link", "server.properties");
    let keepsake = Keepsake::new(server_config(&tree), TestHost::new([])).unwrap();
    let path = completed_path(keepsake.run_backup(false).await.unwrap());
    let names = entry_names(&path);
    assert!(!names.iter().any(|n| n.starts_with("world-link")), "{names:?}");
    assert_eq!(read_entry(&path, "props-link"), "motd=hello\n");
}

#[tokio::test]
async fn test_upload_to_local_directory() {
    let tree = TreeFixture::new();
    let remote = TreeFixture::new();
    let keepsake = Keepsake::new(server_config(&tree), TestHost::new([])).unwrap();
    keepsake.set_transport(Transport::local(remote.path()));
    assert_eq!(
        keepsake.run_test_upload().await.unwrap(),
        UploadOutcome::TestPassed
    );
    assert_eq!(std::fs::read_dir(remote.path()).unwrap().count(), 0);
}
