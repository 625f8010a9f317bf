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

use std::fs;

use filetime::{set_file_mtime, FileTime};
use pretty_assertions::assert_eq;

use keepsake::retention::enforce;
use keepsake::test_fixtures::TreeFixture;
use keepsake::{list_archives, TMP_PREFIX};

fn make_archives(tree: &TreeFixture, names: &[&str]) {
    for (i, name) in names.iter().enumerate() {
        let path = tree.create_file(name);
        set_file_mtime(&path, FileTime::from_unix_time(1_700_000_000 + i as i64, 0)).unwrap();
    }
}

#[test]
fn only_archives_are_listed_and_pruned() {
    let tree = TreeFixture::new();
    make_archives(&tree, &["zebra.zip", "apple.zip", "mango.zip"]);
    tree.create_file("notes.txt");
    tree.create_file(&format!("{TMP_PREFIX}partial"));
    tree.create_dir("folder.zip");

    let names: Vec<String> = list_archives(tree.path())
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect();
    assert_eq!(names, ["zebra.zip", "apple.zip", "mango.zip"]);

    let stats = enforce(tree.path(), 2).unwrap();
    assert_eq!(stats.found, 3);
    assert_eq!(stats.deleted, 2);
    let remaining: Vec<String> = list_archives(tree.path())
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect();
    assert_eq!(remaining, ["mango.zip"]);
    assert!(tree.path().join("notes.txt").exists());
    assert!(tree.path().join("folder.zip").is_dir());
}

#[test]
fn unlimited_retention_keeps_everything() {
    let tree = TreeFixture::new();
    make_archives(&tree, &["a.zip", "b.zip"]);
    for max in [0, -1] {
        assert_eq!(enforce(tree.path(), max).unwrap().deleted, 0);
    }
    assert_eq!(fs::read_dir(tree.path()).unwrap().count(), 2);
}
