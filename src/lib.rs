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

//! Keepsake: scheduled, exclusive backups of a live server tree.
//!
//! A [Keepsake] drives a cron-style [schedule], asks the [host::Host] to flush
//! its live state, writes a zip archive of the working tree with the
//! [archiver], prunes old archives by [retention], and optionally ships the
//! new archive to an FTP or SFTP server through a [transport::Transport].

pub mod archiver;
pub mod config;
pub mod disk;
pub mod entry_name;
pub mod errors;
pub mod gate;
pub mod host;
pub mod ignore;
mod orchestrator;
pub mod retention;
pub mod schedule;
pub mod test_fixtures;
pub mod transport;
pub mod upload;

pub use crate::archiver::{archive_tree, ArchiveStats, ArchiveWriter, ZipArchiveWriter};
pub use crate::config::{Config, TransportConfig};
pub use crate::disk::DiskStats;
pub use crate::errors::{Error, Result};
pub use crate::gate::{ConcurrencyGate, GateGuard, Lock};
pub use crate::host::{DirectoryHost, Host, StatefulUnit};
pub use crate::ignore::IgnoreSet;
pub use crate::orchestrator::{BackupOutcome, Keepsake, SkipReason};
pub use crate::retention::{list_archives, ArchiveInfo};
pub use crate::schedule::{check_schedule, Schedule, ScheduleState};
pub use crate::transport::Transport;
pub use crate::upload::{UploadOutcome, UploadSkip};

use time::OffsetDateTime;

pub(crate) const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Return the version of Keepsake.
pub fn version() -> &'static str {
    VERSION
}

/// Filename prefix for temporary files written into the backup directory.
///
/// These never end in the archive extension, so retention ignores them.
pub const TMP_PREFIX: &str = ".keepsake-tmp";

/// The current time in the local offset, or in UTC if the local offset can't
/// be determined.
pub fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}
