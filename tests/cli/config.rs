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
fn check_shows_next_backup() {
    Server::new(json!({ "schedule": "0 0 3 * * ?" }))
        .command()
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("Next backup at "));
}

#[test]
fn missing_config_file() {
    let dir = TempDir::new().unwrap();
    run_keepsake()
        .arg("--config")
        .arg(dir.child("nope.json").path())
        .arg("check")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn unknown_field_is_rejected() {
    Server::new(json!({ "scheduel": "* * * * * *" }))
        .command()
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown field"));
}

#[test]
fn bad_schedule_is_rejected() {
    Server::new(json!({ "schedule": "0 0 0 31 2 ?" }))
        .command()
        .arg("backup")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid schedule expression"));
}

#[test]
fn bad_date_format_is_rejected() {
    Server::new(json!({ "backup_date_format": "[year" }))
        .command()
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid archive date format"));
}
