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

//! Run the keepsake CLI as a subprocess and test it.

use std::process::Command;

use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;
use serde_json::json;

use keepsake::test_fixtures::TreeFixture;

mod backup;
mod config;

fn run_keepsake() -> Command {
    Command::cargo_bin("keepsake").expect("locate keepsake binary")
}

/// A server tree plus a config file pointing at it.
struct Server {
    tree: TreeFixture,
    config_dir: TempDir,
}

impl Server {
    fn new(extra: serde_json::Value) -> Server {
        let tree = TreeFixture::new();
        tree.populate_server();
        let config_dir = TempDir::new().unwrap();
        let mut config = json!({
            "working_dir": tree.path(),
            "backup_path": "backups",
            "units": ["world", "world_nether"],
        });
        if let (Some(config), Some(extra)) = (config.as_object_mut(), extra.as_object()) {
            config.extend(extra.clone());
        }
        config_dir
            .child("keepsake.json")
            .write_str(&config.to_string())
            .unwrap();
        Server { tree, config_dir }
    }

    fn command(&self) -> Command {
        let mut command = run_keepsake();
        command.arg("--config").arg(self.config_dir.child("keepsake.json").path());
        command
    }
}

#[test]
fn no_args() {
    run_keepsake()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn help() {
    run_keepsake()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("test-upload"));
}

#[test]
fn version() {
    run_keepsake()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("keepsake "));
}

#[cfg(unix)]
#[test]
fn stats() {
    Server::new(json!({}))
        .command()
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Total space: "))
        .stdout(predicate::str::contains("Usable space: "));
}
