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

//! Coordinate scheduled and requested backups and uploads.
//!
//! A backup takes the backup lock, asks the host to flush each stateful unit
//! and archives it, sweeps up the rest of the working tree, prunes old
//! archives, and optionally uploads the result. Blocking work runs on tokio's
//! blocking pool; the only wait on the host is a one-shot signal bounded by a
//! timeout.

use std::fmt;
use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thousands::Separable;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use tokio::task::{spawn_blocking, JoinHandle};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::archiver::{archive_tree, ArchiveStats, ZipArchiveWriter};
use crate::config::Config;
use crate::disk::DiskStats;
use crate::gate::{ConcurrencyGate, GateGuard, Lock};
use crate::host::{Host, StatefulUnit};
use crate::ignore::IgnoreSet;
use crate::retention::{self, ArchiveInfo};
use crate::schedule::{check_schedule, ScheduleState};
use crate::transport::{self, ErrorKind, Transport};
use crate::upload::{upload_file, write_test_file, UploadOutcome, UploadSkip, TEST_FILE_NAME};
use crate::{local_now, Error, Result};

/// What happened to a backup request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BackupOutcome {
    Completed {
        path: PathBuf,
        stats: ArchiveStats,
        /// Set if an upload was attempted and didn't fail.
        upload: Option<UploadOutcome>,
    },
    Skipped(SkipReason),
}

/// Why a backup didn't run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkipReason {
    /// The host is shutting down.
    HostInactive,
    /// Another backup holds the backup lock.
    Busy,
    /// Nobody has been active since the last backup.
    NoActivity,
}

/// The backup engine.
///
/// Cloning is cheap, and clones share all state.
#[derive(Clone)]
pub struct Keepsake {
    inner: Arc<Inner>,
}

struct Inner {
    host: Arc<dyn Host>,
    gate: Arc<ConcurrencyGate>,
    state: Mutex<State>,
    /// Set when a user is seen; cleared after a backup with nobody connected.
    activity: AtomicBool,
    transport_override: Mutex<Option<Transport>>,
}

/// Everything derived from one version of the configuration.
struct State {
    config: Arc<Config>,
    /// Configured ignores. Each backup works on its own copy.
    ignore: Arc<IgnoreSet>,
    schedule: ScheduleState,
}

impl State {
    fn prepare(config: Config, now: OffsetDateTime) -> Result<State> {
        let config = config.validate()?;
        let schedule = check_schedule(&config.schedule, now)?;
        let backup_dir = config.backup_dir();
        fs::create_dir_all(&backup_dir).map_err(|source| Error::CreateBackupDirectory {
            path: backup_dir.clone(),
            source,
        })?;
        let ignore = IgnoreSet::from_paths(config.ignore_paths());
        Ok(State {
            config: Arc::new(config),
            ignore: Arc::new(ignore),
            schedule,
        })
    }
}

impl Keepsake {
    /// Validate the config, parse the schedule, and create the backup
    /// directory.
    pub fn new(config: Config, host: Arc<dyn Host>) -> Result<Keepsake> {
        let state = State::prepare(config, local_now())?;
        Ok(Keepsake {
            inner: Arc::new(Inner {
                host,
                gate: Arc::new(ConcurrencyGate::new()),
                state: Mutex::new(state),
                activity: AtomicBool::new(false),
                transport_override: Mutex::new(None),
            }),
        })
    }

    /// Replace the configuration.
    ///
    /// Backups already running finish with the configuration they started
    /// with. If the new configuration is invalid the old one stays in force.
    pub fn reload(&self, config: Config) -> Result<()> {
        let state = State::prepare(config, local_now())?;
        info!(
            "Reloaded configuration; next backup at {}",
            state.schedule.next_execution()
        );
        *self.state() = state;
        Ok(())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.state.lock().expect("lock keepsake state")
    }

    /// The configuration currently in force.
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.state().config)
    }

    /// The configured ignores, not including anything added during a backup.
    pub fn ignore_set(&self) -> Arc<IgnoreSet> {
        Arc::clone(&self.state().ignore)
    }

    pub fn next_backup(&self) -> OffsetDateTime {
        self.state().schedule.next_execution()
    }

    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.inner.gate
    }

    /// Upload through `transport` rather than one built from the config.
    pub fn set_transport(&self, transport: Transport) {
        *self
            .inner
            .transport_override
            .lock()
            .expect("lock transport override") = Some(transport);
    }

    fn transport(&self, config: &Config) -> std::result::Result<Transport, transport::Error> {
        if let Some(transport) = self
            .inner
            .transport_override
            .lock()
            .expect("lock transport override")
            .clone()
        {
            return Ok(transport);
        }
        Transport::from_config(&config.upload)
    }

    /// Record that a user was active, for `only_backup_if_activity`.
    pub fn note_activity(&self) {
        self.inner.activity.store(true, Ordering::SeqCst);
    }

    pub fn has_activity(&self) -> bool {
        self.inner.activity.load(Ordering::SeqCst)
    }

    /// Names of archives in the backup directory, oldest first.
    pub fn list_archives(&self) -> Result<Vec<String>> {
        Ok(self.archives()?.into_iter().map(|a| a.name).collect())
    }

    /// Archives in the backup directory, oldest first.
    pub fn archives(&self) -> Result<Vec<ArchiveInfo>> {
        retention::list_archives(&self.config().backup_dir())
    }

    /// Space on the filesystem holding the backup directory.
    pub fn disk_stats(&self) -> Result<DiskStats> {
        DiskStats::for_path(&self.config().backup_dir())
    }

    /// Start a backup in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn trigger_backup(&self, upload: bool) -> JoinHandle<Result<BackupOutcome>> {
        let this = self.clone();
        tokio::spawn(async move { this.run_backup(upload).await })
    }

    /// Start an upload test in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn trigger_test_upload(&self) -> JoinHandle<Result<UploadOutcome>> {
        let this = self.clone();
        tokio::spawn(async move { this.run_test_upload().await })
    }

    /// Poll the schedule, and start a backup in the background if it's due.
    ///
    /// Must be called from within a tokio runtime.
    pub fn tick(&self, now: OffsetDateTime) -> Option<JoinHandle<Result<BackupOutcome>>> {
        if !self.state().schedule.poll(now) {
            return None;
        }
        if self.inner.gate.is_held(Lock::Backup) {
            warn!("A backup was scheduled to happen now, but a backup is in progress. Skipping...");
            return None;
        }
        let this = self.clone();
        Some(tokio::spawn(async move { this.run_scheduled_backup().await }))
    }

    /// Poll the schedule every `period` until `shutdown` completes.
    pub async fn run_scheduler(&self, period: Duration, shutdown: impl Future<Output = ()>) {
        info!("Scheduler started; next backup at {}", self.next_backup());
        let mut ticks = interval(period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticks.tick() => {
                    let _backup = self.tick(local_now());
                }
            }
        }
        if self.inner.gate.is_held(Lock::Backup) || self.inner.gate.is_held(Lock::Upload) {
            info!("Running backups or uploads will be abandoned by the shutdown");
        }
        info!("Scheduler stopped");
    }

    /// A backup started by the schedule: like [Keepsake::run_backup] with
    /// upload, but skipped if `only_backup_if_activity` is set and nobody
    /// has been active.
    pub async fn run_scheduled_backup(&self) -> Result<BackupOutcome> {
        if self.config().only_backup_if_activity && !self.has_activity() {
            info!("No activity since the last backup or startup; skipping backup...");
            return Ok(BackupOutcome::Skipped(SkipReason::NoActivity));
        }
        self.run_backup(true).await
    }

    /// Run one backup now, then upload it if `upload` is true and uploading
    /// is enabled.
    ///
    /// Returns immediately with a skip if the host is inactive or another
    /// backup is running.
    pub async fn run_backup(&self, upload: bool) -> Result<BackupOutcome> {
        let host = &self.inner.host;
        if !host.is_active() {
            warn!("Unable to start a backup, because the host is not active");
            return Ok(BackupOutcome::Skipped(SkipReason::HostInactive));
        }
        let Some(guard) = self.inner.gate.try_lock(Lock::Backup) else {
            info!("A backup was requested, but a backup is already in progress. Skipping...");
            return Ok(BackupOutcome::Skipped(SkipReason::Busy));
        };
        let (config, ignore) = {
            let state = self.state();
            (Arc::clone(&state.config), IgnoreSet::clone(&state.ignore))
        };
        info!("Starting backup...");
        let result = self.write_backup(&config, ignore).await;
        drop(guard);
        let (path, stats) = result.map_err(|err| {
            error!("Backup failed: {err}");
            err
        })?;
        info!(
            "Local backup complete: {} files, {} directories, {} bytes in {path:?}",
            stats.files.separate_with_commas(),
            stats.directories.separate_with_commas(),
            stats.bytes.separate_with_commas(),
        );
        if stats.errors > 0 {
            warn!("{} entries could not be read and were left out", stats.errors);
        }

        let upload = if upload && config.upload.enable {
            // Failures are logged by run_upload; the backup itself succeeded.
            self.run_upload(&path, false).await.ok()
        } else {
            None
        };

        if host.active_sessions() == 0 {
            self.inner.activity.store(false, Ordering::SeqCst);
        }
        Ok(BackupOutcome::Completed {
            path,
            stats,
            upload,
        })
    }

    /// Write the archive. The caller holds the backup lock.
    async fn write_backup(
        &self,
        config: &Arc<Config>,
        ignore: IgnoreSet,
    ) -> Result<(PathBuf, ArchiveStats)> {
        let archive_path = config.archive_path(local_now())?;
        let (mut ignore, mut writer) = {
            let config = Arc::clone(config);
            let archive_path = archive_path.clone();
            let mut ignore = ignore;
            blocking(move || -> Result<(IgnoreSet, ZipArchiveWriter)> {
                let backup_dir = config.backup_dir();
                ignore.insert(&backup_dir);
                for path in plugin_exclusions(&config)? {
                    ignore.insert(&path);
                }
                let retained = retention::enforce(&backup_dir, config.max_backups)?;
                debug!(?retained, "Enforced retention");
                let writer = ZipArchiveWriter::create(&archive_path, config.compression_level())
                    .map_err(|source| Error::CreateArchive {
                        path: archive_path.clone(),
                        source,
                    })?;
                Ok((ignore, writer))
            })
            .await??
        };

        let mut stats = ArchiveStats::default();
        for unit in self.inner.host.stateful_units() {
            if ignore.contains(&unit.path) {
                debug!(unit = unit.name, "Unit is ignored");
                continue;
            }
            self.flush(&unit, config.flush_timeout()).await?;
            let _suspended = AutoPersistSuspended::new(Arc::clone(&self.inner.host), &unit);
            let prefix = unit_prefix(&config.working_dir, &unit);
            info!("Backing up {} {prefix}...", unit.name);
            let unit_stats;
            (writer, ignore, unit_stats) =
                archive_blocking(writer, ignore, unit.path.clone(), prefix).await?;
            stats += unit_stats;
            ignore.insert(&unit.path);
        }

        info!("Backing up other files...");
        let (writer, _ignore, sweep_stats) =
            archive_blocking(writer, ignore, config.working_dir.clone(), String::new()).await?;
        stats += sweep_stats;

        let path = blocking(move || writer.finish())
            .await?
            .map_err(|source| Error::WriteArchive {
                path: archive_path,
                source,
            })?;
        Ok((path, stats))
    }

    /// Ask the host to flush `unit` on its primary context, and wait for it.
    async fn flush(&self, unit: &StatefulUnit, limit: Duration) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let host = Arc::clone(&self.inner.host);
        let task_unit = unit.clone();
        debug!(unit = unit.name, "Requesting flush");
        self.inner.host.run_on_primary(Box::new(move || {
            let result = host.flush_unit(&task_unit);
            // The receiver is gone if we already timed out.
            let _ = tx.send(result);
        }));
        match timeout(limit, rx).await {
            Ok(Ok(Ok(()))) => {
                debug!(unit = unit.name, "Flushed");
                Ok(())
            }
            Ok(Ok(Err(source))) => Err(Error::FlushFailed {
                unit: unit.name.clone(),
                source,
            }),
            Ok(Err(_dropped)) => Err(Error::FlushAbandoned {
                unit: unit.name.clone(),
            }),
            Err(_elapsed) => Err(Error::FlushTimeout {
                unit: unit.name.clone(),
                timeout: limit,
            }),
        }
    }

    /// Upload `file`, cleaning up according to the config.
    ///
    /// Returns a skip, without waiting, if another upload is running, or if
    /// uploading is disabled or its protocol isn't supported.
    pub async fn run_upload(&self, file: &Path, testing: bool) -> Result<UploadOutcome> {
        let config = self.config();
        if !testing && !config.upload.enable {
            info!("Uploading is disabled; not uploading {file:?}");
            return Ok(UploadOutcome::Skipped(UploadSkip::Disabled));
        }
        let Some(guard) = self.inner.gate.try_lock(Lock::Upload) else {
            info!("An upload was requested, but an upload is already in progress. Skipping...");
            return Ok(UploadOutcome::Skipped(UploadSkip::Busy));
        };
        self.upload_locked(guard, &config, file, testing).await
    }

    async fn upload_locked(
        &self,
        guard: GateGuard,
        config: &Config,
        file: &Path,
        testing: bool,
    ) -> Result<UploadOutcome> {
        let transport = match self.transport(config) {
            Ok(transport) => transport,
            Err(err) if err.kind() == ErrorKind::UnsupportedProtocol => {
                warn!("{err}. Skipping upload...");
                return Ok(UploadOutcome::Skipped(UploadSkip::UnsupportedProtocol));
            }
            Err(err) => {
                error!("Upload of {file:?} has failed: {err}");
                return Err(err.into());
            }
        };
        let delete_after_upload = config.delete_after_upload;
        let worker_file = file.to_owned();
        let result = blocking(move || {
            // Hold the lock until the transfer really ends, even if our caller
            // stops waiting.
            let _guard = guard;
            upload_file(&transport, &worker_file, testing, delete_after_upload)
        })
        .await?;
        result.map_err(|err| {
            error!("Upload of {file:?} has failed: {err}");
            err.into()
        })
    }

    /// Write a small file into the backup directory, upload it, and delete it
    /// from both ends.
    ///
    /// Runs even if uploading is disabled, so a configuration can be tested
    /// before it's switched on.
    pub async fn run_test_upload(&self) -> Result<UploadOutcome> {
        let config = self.config();
        let Some(guard) = self.inner.gate.try_lock(Lock::Upload) else {
            info!("An upload test was requested, but an upload is already in progress. Skipping...");
            return Ok(UploadOutcome::Skipped(UploadSkip::Busy));
        };
        info!("Starting upload test...");
        let dir = config.backup_dir();
        let test_file = blocking(move || write_test_file(&dir))
            .await?
            .map_err(|source| Error::WriteTestFile {
                path: config.backup_dir().join(TEST_FILE_NAME),
                source,
            })?;
        let outcome = self.upload_locked(guard, &config, &test_file, true).await;
        if !matches!(outcome, Ok(UploadOutcome::TestPassed)) {
            remove_if_present(&test_file);
        }
        outcome
    }
}

impl fmt::Debug for Keepsake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keepsake")
            .field("config", &self.config())
            .field("gate", &self.inner.gate)
            .finish()
    }
}

/// Run blocking work on tokio's blocking pool, converting a panic into an
/// error.
async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f).await.map_err(|err| {
        error!("Background worker failed: {err}");
        Error::from(err)
    })
}

async fn archive_blocking(
    mut writer: ZipArchiveWriter,
    ignore: IgnoreSet,
    root: PathBuf,
    prefix: String,
) -> Result<(ZipArchiveWriter, IgnoreSet, ArchiveStats)> {
    let (writer, ignore, result) = blocking(move || {
        let result = archive_tree(&root, &prefix, &mut writer, &ignore);
        (writer, ignore, result)
    })
    .await?;
    let stats = result.map_err(|source| Error::WriteArchive {
        path: writer.path().to_owned(),
        source,
    })?;
    Ok((writer, ignore, stats))
}

/// Resumes auto-persist for a unit when dropped.
struct AutoPersistSuspended {
    host: Arc<dyn Host>,
    unit: StatefulUnit,
}

impl AutoPersistSuspended {
    fn new(host: Arc<dyn Host>, unit: &StatefulUnit) -> AutoPersistSuspended {
        host.suspend_auto_persist(unit);
        AutoPersistSuspended {
            host,
            unit: unit.clone(),
        }
    }
}

impl Drop for AutoPersistSuspended {
    fn drop(&mut self) {
        self.host.resume_auto_persist(&self.unit);
    }
}

/// Archive directory holding units that live outside the working tree.
const EXTERNAL_UNITS_DIR: &str = "_units";

/// Name of a unit's directory in the archive: its path relative to the
/// working tree, or its name under [EXTERNAL_UNITS_DIR] if it's somewhere
/// else, so that it can't shadow a directory of the tree itself.
fn unit_prefix(working_dir: &Path, unit: &StatefulUnit) -> String {
    let relative = fs::canonicalize(working_dir)
        .ok()
        .zip(fs::canonicalize(&unit.path).ok())
        .and_then(|(working, unit)| unit.strip_prefix(working).ok().map(Path::to_path_buf));
    match relative {
        Some(relative) if !relative.as_os_str().is_empty() => {
            relative.to_string_lossy().into_owned()
        }
        _ => format!("{EXTERNAL_UNITS_DIR}/{}", unit.name),
    }
}

/// Plugin artifacts and plugin config directories to leave out, according to
/// the config.
fn plugin_exclusions(config: &Config) -> Result<Vec<PathBuf>> {
    let mut excluded = Vec::new();
    if config.backup_plugin_jars && config.backup_plugin_confs {
        return Ok(excluded);
    }
    let globs = config.artifact_globs()?;
    let plugins_dir = config.plugins_dir();
    let read_dir = match fs::read_dir(&plugins_dir) {
        Ok(read_dir) => read_dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(excluded),
        Err(err) => {
            warn!("Unable to list plugins in {plugins_dir:?}: {err}");
            return Ok(excluded);
        }
    };
    for dir_entry in read_dir.flatten() {
        let Ok(file_type) = dir_entry.file_type() else {
            continue;
        };
        let path = dir_entry.path();
        if file_type.is_dir() {
            if !config.backup_plugin_confs {
                excluded.push(path);
            }
        } else if !config.backup_plugin_jars
            && dir_entry
                .file_name()
                .to_str()
                .is_some_and(|name| globs.is_match(name))
        {
            excluded.push(path);
        }
    }
    debug!(?excluded, "Plugin exclusions");
    Ok(excluded)
}

fn remove_if_present(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(?path, "Removed"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!("Unable to delete {path:?}: {err}"),
    }
}
