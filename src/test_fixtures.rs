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

//! Utilities to set up test environments.
//!
//! Fixtures that create directories will be automatically deleted when the object
//! is deleted.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::host::{FlushError, Host, PrimaryTask, StatefulUnit};

/// A temporary tree for running a test.
///
/// Created in a temporary directory and automatically disposed when done.
pub struct TreeFixture {
    pub root: PathBuf,
    _tempdir: TempDir, // held only for cleanup
}

impl TreeFixture {
    pub fn new() -> TreeFixture {
        let tempdir = TempDir::new().unwrap();
        let root = tempdir.path().to_path_buf();
        TreeFixture {
            _tempdir: tempdir,
            root,
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Make a file in the tree, with arbitrary contents. Returns the full path.
    pub fn create_file(&self, relative_path: &str) -> PathBuf {
        self.create_file_with_contents(relative_path, b"contents")
    }

    /// Make a file in the tree, with given contents, creating parent
    /// directories as needed. Returns the full path.
    pub fn create_file_with_contents(&self, relative_path: &str, contents: &[u8]) -> PathBuf {
        let full_path = self.root.join(relative_path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut f = fs::File::create(&full_path).unwrap();
        f.write_all(contents).unwrap();
        full_path
    }

    pub fn create_dir(&self, relative_path: &str) -> PathBuf {
        let full_path = self.root.join(relative_path);
        fs::create_dir_all(&full_path).unwrap();
        full_path
    }

    #[cfg(unix)]
    pub fn create_symlink(&self, relative_path: &str, target: &str) {
        use std::os::unix::fs as unix_fs;

        unix_fs::symlink(target, self.root.join(relative_path)).unwrap();
    }

    /// Symlinks are just not present on Windows.
    #[cfg(windows)]
    pub fn create_symlink(&self, _relative_path: &str, _target: &str) {}

    /// A small server tree: two worlds with state, some plugins, a log
    /// directory and a top-level file.
    pub fn populate_server(&self) {
        self.create_file_with_contents("server.properties", b"motd=hello\n");
        self.create_file_with_contents("world/level.dat", b"overworld");
        self.create_file_with_contents("world/region/r.0.0.mca", b"chunks");
        self.create_file_with_contents("world_nether/level.dat", b"nether");
        self.create_dir("world_nether/empty");
        self.create_file_with_contents("plugins/WorldEdit.jar", b"jar bytes");
        self.create_file_with_contents("plugins/WorldEdit/config.yml", b"wand: axe\n");
        self.create_file_with_contents("logs/latest.log", b"[INFO] Done\n");
    }
}

impl Default for TreeFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// What a [TestHost] was asked to do, in order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HostEvent {
    Flush(String),
    Suspend(String),
    Resume(String),
}

/// How a [TestHost] treats tasks sent to its primary context.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PrimaryMode {
    /// Run each task as soon as it's submitted.
    Immediate,
    /// Keep tasks until [TestHost::release_held].
    Hold,
    /// Drop tasks without running them, as a host that's shutting down would.
    Discard,
}

/// A [Host] that records what it's asked to do.
pub struct TestHost {
    units: Vec<StatefulUnit>,
    active: AtomicBool,
    sessions: AtomicUsize,
    fail_flush: AtomicBool,
    mode: Mutex<PrimaryMode>,
    held: Mutex<Vec<PrimaryTask>>,
    events: Mutex<Vec<HostEvent>>,
}

impl TestHost {
    /// A host with units at the given paths, named by their last component.
    pub fn new(unit_paths: impl IntoIterator<Item = PathBuf>) -> Arc<TestHost> {
        Arc::new(TestHost {
            units: unit_paths
                .into_iter()
                .map(StatefulUnit::from_path)
                .collect(),
            active: AtomicBool::new(true),
            sessions: AtomicUsize::new(0),
            fail_flush: AtomicBool::new(false),
            mode: Mutex::new(PrimaryMode::Immediate),
            held: Mutex::default(),
            events: Mutex::default(),
        })
    }

    pub fn set_mode(&self, mode: PrimaryMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn set_sessions(&self, sessions: usize) {
        self.sessions.store(sessions, Ordering::SeqCst);
    }

    /// Make every flush fail.
    pub fn set_fail_flush(&self, fail: bool) {
        self.fail_flush.store(fail, Ordering::SeqCst);
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    /// Run all held tasks, in order. Returns how many ran.
    pub fn release_held(&self) -> usize {
        let tasks = std::mem::take(&mut *self.held.lock().unwrap());
        let n = tasks.len();
        for task in tasks {
            task();
        }
        n
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().unwrap().clone()
    }

    fn event(&self, event: HostEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl Host for TestHost {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn stateful_units(&self) -> Vec<StatefulUnit> {
        self.units.clone()
    }

    fn run_on_primary(&self, task: PrimaryTask) {
        let mode = *self.mode.lock().unwrap();
        match mode {
            PrimaryMode::Immediate => task(),
            PrimaryMode::Hold => self.held.lock().unwrap().push(task),
            PrimaryMode::Discard => drop(task),
        }
    }

    fn flush_unit(&self, unit: &StatefulUnit) -> Result<(), FlushError> {
        self.event(HostEvent::Flush(unit.name.clone()));
        if self.fail_flush.load(Ordering::SeqCst) {
            Err(format!("disk full while saving {}", unit.name).into())
        } else {
            Ok(())
        }
    }

    fn suspend_auto_persist(&self, unit: &StatefulUnit) {
        self.event(HostEvent::Suspend(unit.name.clone()));
    }

    fn resume_auto_persist(&self, unit: &StatefulUnit) {
        self.event(HostEvent::Resume(unit.name.clone()));
    }

    fn active_sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}
