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

//! Paths excluded from archiving.
//!
//! Membership is by canonical path, so `world`, `./world`, `sub/../world`
//! and a symlink pointing at `world` all refer to the same entry.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;

/// A set of canonical paths that the archiver will not descend into.
///
/// The configured baseline is shared by the orchestrator; each backup works on
/// its own clone, so entries added for one run never leak into the next.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IgnoreSet {
    paths: BTreeSet<PathBuf>,
}

impl IgnoreSet {
    pub fn new() -> IgnoreSet {
        IgnoreSet::default()
    }

    pub fn from_paths<I, P>(paths: I) -> IgnoreSet
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut set = IgnoreSet::new();
        for path in paths {
            set.insert(path.as_ref());
        }
        set
    }

    /// Add a path. Returns true if it was not already present.
    pub fn insert(&mut self, path: &Path) -> bool {
        let canonical = canonical_form(path);
        trace!(?path, ?canonical, "Ignore");
        self.paths.insert(canonical)
    }

    /// Remove a path. Returns true if it was present.
    pub fn remove(&mut self, path: &Path) -> bool {
        self.paths.remove(&canonical_form(path))
    }

    /// True if `path` resolves to one of the ignored paths.
    pub fn contains(&self, path: &Path) -> bool {
        if self.paths.is_empty() {
            return false;
        }
        self.paths.contains(&canonical_form(path))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Iterate the canonical paths, in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }
}

/// Resolve a path for comparison.
///
/// Paths that don't exist can't be canonicalized, so they're made absolute
/// lexically instead, and will still match later lookups of the same spelling.
fn canonical_form(path: &Path) -> PathBuf {
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_owned())
}
