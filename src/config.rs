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

//! Configuration, read from a JSON file.
//!
//! Every key except `backup_path` has a default. Relative paths are resolved
//! against `working_dir`, which is itself relative to the process's current
//! directory.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use time::format_description;
use time::OffsetDateTime;
use tracing::warn;

use crate::archiver::DEFAULT_COMPRESSION_LEVEL;
use crate::retention::ARCHIVE_EXTENSION;
use crate::{Error, Result};

/// Replaced by the formatted start time in [Config::backup_format].
pub const DATE_PLACEHOLDER: &str = "{DATE}";

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Six-field cron expression for scheduled backups.
    pub schedule: String,
    /// Archive name template, without the extension.
    pub backup_format: String,
    /// A `time` format description for the date substituted into the name.
    pub backup_date_format: String,
    pub backup_path: PathBuf,
    /// Root of the tree to back up.
    pub working_dir: PathBuf,
    /// Archives to keep, counting the new one; zero or negative is unlimited.
    pub max_backups: i64,
    pub only_backup_if_activity: bool,
    pub delete_after_upload: bool,
    /// 0 stores entries uncompressed; 1-9 deflate at that level.
    pub compression_level: i64,
    /// Paths never archived.
    pub ignore: Vec<PathBuf>,
    pub plugins_dir: PathBuf,
    /// If false, files in `plugins_dir` matching `plugin_artifacts` are skipped.
    pub backup_plugin_jars: bool,
    /// If false, directories in `plugins_dir` are skipped.
    pub backup_plugin_confs: bool,
    pub plugin_artifacts: Vec<String>,
    /// Directories holding live state, flushed before they're archived.
    pub units: Vec<PathBuf>,
    pub flush_timeout_secs: u64,
    pub upload: TransportConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            schedule: "0 0 */6 * * ?".to_owned(),
            backup_format: format!("backup-{DATE_PLACEHOLDER}"),
            backup_date_format: "[year]-[month]-[day]-[hour]-[minute]-[second]".to_owned(),
            backup_path: PathBuf::new(),
            working_dir: PathBuf::from("."),
            max_backups: 0,
            only_backup_if_activity: false,
            delete_after_upload: false,
            compression_level: DEFAULT_COMPRESSION_LEVEL as i64,
            ignore: Vec::new(),
            plugins_dir: PathBuf::from("plugins"),
            backup_plugin_jars: true,
            backup_plugin_confs: true,
            plugin_artifacts: vec!["*.jar".to_owned()],
            units: Vec::new(),
            flush_timeout_secs: 300,
            upload: TransportConfig::default(),
        }
    }
}

impl Config {
    /// A default config that writes archives into `backup_path`.
    pub fn new(backup_path: impl Into<PathBuf>) -> Config {
        Config {
            backup_path: backup_path.into(),
            ..Config::default()
        }
    }

    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Config> {
        let json = fs::read_to_string(path).map_err(|source| Error::ReadConfig {
            path: path.to_owned(),
            source,
        })?;
        let config: Config = serde_json::from_str(&json).map_err(|source| Error::ParseConfig {
            path: path.to_owned(),
            source,
        })?;
        config.validate()
    }

    /// Check the config for errors, and clamp the compression level.
    pub fn validate(mut self) -> Result<Config> {
        if self.backup_path.as_os_str().is_empty() {
            return Err(Error::Config {
                message: "backup_path is not set".to_owned(),
            });
        }
        if !(0..=9).contains(&self.compression_level) {
            warn!(
                "Invalid compression level {}; must be between 0 and 9. Using {}.",
                self.compression_level, DEFAULT_COMPRESSION_LEVEL
            );
            self.compression_level = DEFAULT_COMPRESSION_LEVEL as i64;
        }
        if !self.backup_format.contains(DATE_PLACEHOLDER) {
            // Not fatal: archives will just overwrite each other.
            warn!(
                "backup_format {:?} doesn't contain {DATE_PLACEHOLDER}",
                self.backup_format
            );
        }
        self.parse_date_format()?;
        self.artifact_globs()?;
        Ok(self)
    }

    /// The compression level to use, always in 0..=9.
    pub fn compression_level(&self) -> u32 {
        u32::try_from(self.compression_level)
            .ok()
            .filter(|level| *level <= 9)
            .unwrap_or(DEFAULT_COMPRESSION_LEVEL)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_timeout_secs)
    }

    /// Resolve a configured path against the working directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.working_dir.join(path)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.resolve(&self.backup_path)
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.resolve(&self.plugins_dir)
    }

    pub fn ignore_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.ignore.iter().map(|p| self.resolve(p))
    }

    pub fn unit_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.units.iter().map(|p| self.resolve(p))
    }

    fn parse_date_format(&self) -> Result<Vec<format_description::BorrowedFormatItem<'_>>> {
        format_description::parse(&self.backup_date_format).map_err(|source| {
            Error::DateFormat {
                format: self.backup_date_format.clone(),
                source,
            }
        })
    }

    /// The archive file name for a backup started at `start`.
    pub fn archive_name(&self, start: OffsetDateTime) -> Result<String> {
        let date = start
            .format(&self.parse_date_format()?)
            .map_err(|source| Error::FormatDate { source })?;
        Ok(format!(
            "{}.{ARCHIVE_EXTENSION}",
            self.backup_format.replace(DATE_PLACEHOLDER, &date)
        ))
    }

    /// The full path of the archive for a backup started at `start`.
    pub fn archive_path(&self, start: OffsetDateTime) -> Result<PathBuf> {
        Ok(self.backup_dir().join(self.archive_name(start)?))
    }

    /// Globs matching plugin artifact file names.
    pub fn artifact_globs(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.plugin_artifacts {
            builder.add(
                GlobBuilder::new(pattern)
                    .literal_separator(true)
                    .build()
                    .map_err(|source| Error::ParseGlob { source })?,
            );
        }
        builder.build().map_err(|source| Error::ParseGlob { source })
    }
}

/// Where and how to upload archives.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    pub enable: bool,
    /// `ftp` or `sftp`.
    pub protocol: String,
    pub host: String,
    /// Defaults to the protocol's standard port.
    pub port: Option<u16>,
    /// Defaults to the local user name.
    pub user: Option<String>,
    pub password: String,
    /// SFTP only: authenticate with `private_key` rather than `password`.
    pub use_key_auth: bool,
    pub private_key: Option<PathBuf>,
    pub private_key_password: String,
    /// Remote directory to upload into.
    pub path: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            enable: false,
            protocol: "sftp".to_owned(),
            host: String::new(),
            port: None,
            user: None,
            password: String::new(),
            use_key_auth: false,
            private_key: None,
            private_key_password: String::new(),
            path: String::new(),
        }
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "<redacted>"
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("enable", &self.enable)
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &redacted(&self.password))
            .field("use_key_auth", &self.use_key_auth)
            .field("private_key", &self.private_key)
            .field(
                "private_key_password",
                &redacted(&self.private_key_password),
            )
            .field("path", &self.path)
            .finish()
    }
}
