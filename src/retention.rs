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

//! Find archives in the backup directory and delete the oldest ones.
//!
//! There is no index: archives are discovered by listing the directory,
//! matching the archive extension, and ordering by modification time.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Extension of archive files, without the dot.
pub const ARCHIVE_EXTENSION: &str = "zip";

/// An archive found in the backup directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArchiveInfo {
    /// File name within the backup directory.
    pub name: String,
    pub path: PathBuf,
    /// Size in bytes.
    pub len: u64,
    pub modified: OffsetDateTime,
}

/// What [enforce] did.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RetentionStats {
    /// Archives present before enforcement.
    pub found: usize,
    pub deleted: usize,
    /// Archives that should have been deleted but couldn't be.
    pub failed: usize,
}

/// List archives in `dir`, oldest first.
///
/// Ties in modification time are broken by name. A directory that doesn't
/// exist yet holds no archives.
pub fn list_archives(dir: &Path) -> Result<Vec<ArchiveInfo>> {
    let fail = |source| Error::ListBackups {
        path: dir.to_owned(),
        source,
    };
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(fail(err)),
    };
    let mut archives = Vec::new();
    for dir_entry in read_dir {
        let dir_entry = dir_entry.map_err(fail)?;
        let Ok(name) = dir_entry.file_name().into_string() else {
            continue;
        };
        if !is_archive_name(&name) {
            continue;
        }
        let metadata = match dir_entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(err) => {
                // Probably deleted while we were listing.
                debug!(?name, ?err, "Failed to stat archive");
                continue;
            }
        };
        let modified = metadata
            .modified()
            .map(OffsetDateTime::from)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        archives.push(ArchiveInfo {
            path: dir_entry.path(),
            name,
            len: metadata.len(),
            modified,
        });
    }
    Ok(archives
        .into_iter()
        .sorted_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)))
        .collect())
}

fn is_archive_name(name: &str) -> bool {
    !name.starts_with(crate::TMP_PREFIX)
        && name
            .rsplit_once('.')
            .is_some_and(|(stem, ext)| !stem.is_empty() && ext == ARCHIVE_EXTENSION)
}

/// Delete the oldest archives so that one more can be added without exceeding
/// `max_backups`.
///
/// Does nothing if `max_backups` is zero or negative. An archive that can't be
/// deleted is logged and still counts as present, so a later, newer archive is
/// deleted in its place and the next run tries it again.
pub fn enforce(dir: &Path, max_backups: i64) -> Result<RetentionStats> {
    if max_backups <= 0 {
        return Ok(RetentionStats::default());
    }
    let archives = list_archives(dir)?;
    let mut stats = RetentionStats {
        found: archives.len(),
        ..Default::default()
    };
    let mut remaining = archives.len() as i64;
    for archive in &archives {
        if remaining < max_backups {
            break;
        }
        match remove_archive(&archive.path) {
            Ok(()) => {
                info!("Deleted old backup {}", archive.name);
                stats.deleted += 1;
                remaining -= 1;
            }
            Err(err) => {
                warn!("Unable to delete old backup {}: {err}", archive.name);
                stats.failed += 1;
            }
        }
    }
    Ok(stats)
}

fn remove_archive(path: &Path) -> io::Result<()> {
    fail::fail_point!("retention::remove-archive", |_| {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "injected remove failure",
        ))
    });
    fs::remove_file(path)
}
