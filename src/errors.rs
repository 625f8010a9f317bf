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

//! Keepsake error types.

use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::transport;

/// Keepsake specific error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Failed to read config file {path:?}")]
    ReadConfig { path: PathBuf, source: io::Error },

    #[error("Failed to parse config file {path:?}: {source}")]
    ParseConfig {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Invalid schedule expression {expression:?}: {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("Failed to parse glob: {source}")]
    ParseGlob { source: globset::Error },

    #[error("Invalid archive date format {format:?}: {source}")]
    DateFormat {
        format: String,
        source: time::error::InvalidFormatDescription,
    },

    #[error("Failed to format archive date: {source}")]
    FormatDate { source: time::error::Format },

    #[error("Failed to create backup directory {path:?}")]
    CreateBackupDirectory { path: PathBuf, source: io::Error },

    #[error("Failed to list backup directory {path:?}")]
    ListBackups { path: PathBuf, source: io::Error },

    #[error("Failed to create archive {path:?}")]
    CreateArchive { path: PathBuf, source: io::Error },

    #[error("Failed to write archive {path:?}")]
    WriteArchive { path: PathBuf, source: io::Error },

    #[error("Failed to write upload test file {path:?}")]
    WriteTestFile { path: PathBuf, source: io::Error },

    #[error("Failed to read disk stats for {path:?}")]
    DiskStats { path: PathBuf, source: io::Error },

    #[error("Failed to start the host")]
    StartHost { source: io::Error },

    #[error("Host failed to flush {unit:?}: {source}")]
    FlushFailed {
        unit: String,
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("Timed out after {timeout:?} waiting for the host to flush {unit:?}")]
    FlushTimeout { unit: String, timeout: Duration },

    #[error("Host dropped the request to flush {unit:?}")]
    FlushAbandoned { unit: String },

    #[error("Background worker failed: {message}")]
    WorkerPanicked { message: String },

    #[error(transparent)]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error(transparent)]
    Transport {
        #[from]
        source: transport::Error,
    },
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::WorkerPanicked {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
