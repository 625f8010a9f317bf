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

//! Non-blocking exclusion between backups, and between uploads.
//!
//! Each lock is a flag claimed by compare-and-swap. A caller that finds the
//! lock held doesn't wait: it logs and skips its work. Locks live only in
//! memory and are not shared between processes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use derive_more::Display;
use tracing::trace;

/// Which category of operation a lock guards.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Hash)]
pub enum Lock {
    #[display(fmt = "backup")]
    Backup,
    #[display(fmt = "upload")]
    Upload,
}

/// Two independent locks: one for backups, one for uploads.
#[derive(Debug, Default)]
pub struct ConcurrencyGate {
    backup_in_progress: AtomicBool,
    upload_in_progress: AtomicBool,
}

impl ConcurrencyGate {
    pub fn new() -> ConcurrencyGate {
        ConcurrencyGate::default()
    }

    fn flag(&self, lock: Lock) -> &AtomicBool {
        match lock {
            Lock::Backup => &self.backup_in_progress,
            Lock::Upload => &self.upload_in_progress,
        }
    }

    /// Claim the lock if it's free. Returns false, without waiting, if it's held.
    pub fn try_acquire(&self, lock: Lock) -> bool {
        let acquired = self
            .flag(lock)
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        trace!(%lock, acquired, "try_acquire");
        acquired
    }

    /// Unconditionally clear the lock.
    pub fn release(&self, lock: Lock) {
        trace!(%lock, "release");
        self.flag(lock).store(false, Ordering::Release);
    }

    pub fn is_held(&self, lock: Lock) -> bool {
        self.flag(lock).load(Ordering::Acquire)
    }

    /// Claim the lock, returning a guard that releases it when dropped.
    ///
    /// The guard releases the lock on every exit path, including unwinding.
    pub fn try_lock(self: &Arc<Self>, lock: Lock) -> Option<GateGuard> {
        if self.try_acquire(lock) {
            Some(GateGuard {
                gate: Arc::clone(self),
                lock,
            })
        } else {
            None
        }
    }
}

/// Holds one lock of a [ConcurrencyGate] until dropped.
#[derive(Debug)]
#[must_use]
pub struct GateGuard {
    gate: Arc<ConcurrencyGate>,
    lock: Lock,
}

impl GateGuard {
    pub fn lock(&self) -> Lock {
        self.lock
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.gate.release(self.lock);
    }
}
