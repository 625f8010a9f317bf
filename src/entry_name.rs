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

//! Names of entries inside an archive.
//!
//! Entry names always use `/` as the separator, never start with a separator
//! or a `./` segment, and never end with a `/.` segment. Directory entries
//! additionally end in `/`.

/// Normalize a path string into an archive entry name.
///
/// On Windows, backslashes are treated as separators; elsewhere they are an
/// ordinary character that may appear in a file name. Leading separators,
/// leading `./` segments, and trailing `/.` segments are removed, repeatedly,
/// so that normalizing an already normalized name returns it unchanged.
pub fn normalize(name: &str) -> String {
    let slashed = if cfg!(windows) {
        name.replace('\\', "/")
    } else {
        name.to_owned()
    };
    let mut s = slashed.as_str();
    loop {
        if let Some(rest) = s.strip_prefix('/') {
            s = rest;
        } else if let Some(rest) = s.strip_prefix("./") {
            s = rest;
        } else if let Some(rest) = s.strip_suffix("/.") {
            s = rest;
        } else {
            break;
        }
    }
    if s == "." {
        s = "";
    }
    s.to_owned()
}

/// Join a normalized parent entry name and a child file name.
pub fn join(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        normalize(child)
    } else {
        normalize(&format!("{parent}/{child}"))
    }
}

/// Return the entry name for a directory: normalized, with a trailing `/`.
///
/// Returns None for the root of the archive, which has no entry of its own.
pub fn directory(name: &str) -> Option<String> {
    let mut name = normalize(name);
    if name.is_empty() {
        return None;
    }
    if !name.ends_with('/') {
        name.push('/');
    }
    Some(name)
}
