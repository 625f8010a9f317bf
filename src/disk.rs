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

//! Space on the filesystem holding the backups.

use std::io;
use std::path::Path;

use crate::{Error, Result};

/// Sizes in bytes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DiskStats {
    pub total: u64,
    /// Free space, including blocks reserved for the superuser.
    pub free: u64,
    /// Space available to this process.
    pub usable: u64,
}

impl DiskStats {
    /// Measure the filesystem containing `path`.
    pub fn for_path(path: &Path) -> Result<DiskStats> {
        stat_filesystem(path).map_err(|source| Error::DiskStats {
            path: path.to_owned(),
            source,
        })
    }
}

#[cfg(unix)]
fn stat_filesystem(path: &Path) -> io::Result<DiskStats> {
    use nix::sys::statvfs::statvfs;

    let stat = statvfs(path).map_err(io::Error::from)?;
    let block = stat.fragment_size() as u64;
    Ok(DiskStats {
        total: stat.blocks() as u64 * block,
        free: stat.blocks_free() as u64 * block,
        usable: stat.blocks_available() as u64 * block,
    })
}

#[cfg(not(unix))]
fn stat_filesystem(_path: &Path) -> io::Result<DiskStats> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "disk stats are only available on Unix",
    ))
}

/// Format a byte count as gigabytes with two decimals.
pub fn format_gb(bytes: u64) -> String {
    format!("{:.2}", bytes as f64 / (1u64 << 30) as f64)
}

#[cfg(test)]
mod test {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn stats_for_temp_dir() {
        let temp = tempfile::tempdir().unwrap();
        let stats = DiskStats::for_path(temp.path()).unwrap();
        assert!(stats.total > 0);
        assert!(stats.free <= stats.total);
        assert!(stats.usable <= stats.free);
    }

    #[cfg(unix)]
    #[test]
    fn missing_path_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let err = DiskStats::for_path(&temp.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::DiskStats { .. }), "{err:?}");
    }

    #[test]
    fn gigabytes() {
        assert_eq!(format_gb(0), "0.00");
        assert_eq!(format_gb(3 << 30), "3.00");
        assert_eq!(format_gb(1 << 29), "0.50");
    }
}
