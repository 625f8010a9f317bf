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

//! The long-running process whose files are backed up.
//!
//! The host owns some *stateful units*: directories whose on-disk contents
//! are only consistent after the host flushes its in-memory state. Flushing
//! must happen on the host's primary context, so the orchestrator hands the
//! host a task to run there and waits for it to report back.

use std::error::Error as StdError;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::Config;

/// Work to run on the host's primary context.
pub type PrimaryTask = Box<dyn FnOnce() + Send + 'static>;

/// Why a flush failed, in the host's terms.
pub type FlushError = Box<dyn StdError + Send + Sync>;

/// A directory of live state that must be flushed before it's archived.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct StatefulUnit {
    pub name: String,
    pub path: PathBuf,
}

impl StatefulUnit {
    /// A unit named after the last component of its path.
    pub fn from_path(path: PathBuf) -> StatefulUnit {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        StatefulUnit { name, path }
    }
}

/// What the orchestrator needs from the host.
pub trait Host: Send + Sync + 'static {
    /// False once the host is shutting down; no backups start then.
    fn is_active(&self) -> bool;

    fn stateful_units(&self) -> Vec<StatefulUnit>;

    /// Queue `task` to run on the primary context.
    ///
    /// If the task is dropped without running, the orchestrator treats the
    /// flush as abandoned.
    fn run_on_primary(&self, task: PrimaryTask);

    /// Write the unit's in-memory state to disk. Only called from a task
    /// passed to [Host::run_on_primary].
    fn flush_unit(&self, unit: &StatefulUnit) -> Result<(), FlushError>;

    /// Stop the host writing the unit in the background while it's archived.
    fn suspend_auto_persist(&self, unit: &StatefulUnit);

    fn resume_auto_persist(&self, unit: &StatefulUnit);

    /// Number of users currently connected.
    fn active_sessions(&self) -> usize;
}

/// A host whose units are plain directories, with nothing to flush.
///
/// The primary context is a dedicated thread draining a queue.
#[derive(Debug)]
pub struct DirectoryHost {
    units: Vec<StatefulUnit>,
    sender: mpsc::UnboundedSender<PrimaryTask>,
    active: AtomicBool,
    sessions: AtomicUsize,
}

impl DirectoryHost {
    pub fn new(unit_paths: impl IntoIterator<Item = PathBuf>) -> io::Result<DirectoryHost> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<PrimaryTask>();
        thread::Builder::new()
            .name("keepsake-primary".to_owned())
            .spawn(move || {
                while let Some(task) = receiver.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(task)).is_err() {
                        error!("Task on the primary thread panicked");
                    }
                }
                debug!("Primary thread exiting");
            })?;
        Ok(DirectoryHost {
            units: unit_paths
                .into_iter()
                .map(StatefulUnit::from_path)
                .collect(),
            sender,
            active: AtomicBool::new(true),
            sessions: AtomicUsize::new(0),
        })
    }

    pub fn from_config(config: &Config) -> io::Result<DirectoryHost> {
        DirectoryHost::new(config.unit_paths())
    }

    /// Mark the host as shutting down.
    pub fn shutdown(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Record that a user connected or disconnected.
    pub fn set_sessions(&self, sessions: usize) {
        self.sessions.store(sessions, Ordering::Relaxed);
    }
}

impl Host for DirectoryHost {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn stateful_units(&self) -> Vec<StatefulUnit> {
        self.units.clone()
    }

    fn run_on_primary(&self, task: PrimaryTask) {
        if self.sender.send(task).is_err() {
            warn!("Primary thread has stopped; dropping task");
        }
    }

    fn flush_unit(&self, unit: &StatefulUnit) -> Result<(), FlushError> {
        debug!(unit = unit.name, "Nothing to flush for a plain directory");
        Ok(())
    }

    fn suspend_auto_persist(&self, _unit: &StatefulUnit) {}

    fn resume_auto_persist(&self, _unit: &StatefulUnit) {}

    fn active_sessions(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }
}
