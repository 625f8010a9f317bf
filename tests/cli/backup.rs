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

use super::*;

#[test]
fn backup_then_list() {
    let server = Server::new(json!({ "backup_format": "nightly-{DATE}" }));
    server
        .command()
        .args(["backup", "--local"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nightly-").and(predicate::str::contains(".zip")));

    let backups = server.tree.path().join("backups");
    let names: Vec<String> = std::fs::read_dir(&backups)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names.len(), 1, "{names:?}");

    server
        .command()
        .arg("list")
        .assert()
        .success()
        .stdout(format!("{}\n", names[0]));

    server
        .command()
        .args(["list", "--long"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with(names[0].as_str()));
}

#[test]
fn empty_list() {
    Server::new(json!({}))
        .command()
        .arg("list")
        .assert()
        .success()
        .stdout("");
}

#[test]
fn json_log() {
    let server = Server::new(json!({}));
    let log = server.config_dir.child("log.json");
    server
        .command()
        .args(["backup", "--local", "--log-json"])
        .arg(log.path())
        .assert()
        .success();
    let content = std::fs::read_to_string(log.path()).unwrap();
    let first: serde_json::Value =
        serde_json::from_str(content.lines().next().expect("log has lines")).unwrap();
    assert!(first.get("level").is_some(), "{first}");
    assert!(content.contains("Local backup complete"), "{content}");
}

#[test]
fn unsupported_protocol_test_upload_fails_cleanly() {
    let server = Server::new(json!({ "upload": { "protocol": "gopher" } }));
    server
        .command()
        .arg("test-upload")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Upload test did not run"));
    server
        .tree
        .path()
        .join("backups/uploadtest.txt")
        .metadata()
        .expect_err("test file removed");
}
