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

//! Ship one file through a [Transport], then clean up according to policy.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::transport::{self, Transport};

/// What happened to an upload request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UploadOutcome {
    /// The file was stored remotely.
    Uploaded {
        /// Remote name of the file.
        name: String,
        /// True if the local copy was deleted afterwards.
        deleted_local: bool,
    },
    /// A test file went there and back: it was stored, then removed from both
    /// ends.
    TestPassed,
    Skipped(UploadSkip),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UploadSkip {
    /// Another upload holds the upload lock.
    Busy,
    /// Uploading is disabled in the configuration.
    Disabled,
    /// The configured protocol isn't one we can speak.
    UnsupportedProtocol,
}

/// Upload `file` into the transport's directory.
///
/// With `testing`, the remote copy is removed again and the local file is
/// deleted, regardless of `delete_after_upload`. Otherwise the local file is
/// deleted only if `delete_after_upload` is set; failing to delete it is
/// logged and doesn't fail the upload.
///
/// If the transfer fails, nothing is deleted.
pub fn upload_file(
    transport: &Transport,
    file: &Path,
    testing: bool,
    delete_after_upload: bool,
) -> Result<UploadOutcome, transport::Error> {
    info!("Starting upload of {file:?} to {transport:?}");
    let mut session = transport.connect()?;
    let name = session.put(file)?;
    if testing {
        let removed = session.remove(&name);
        session.close();
        remove_local(file);
        removed?;
        info!("Test upload successful!");
        return Ok(UploadOutcome::TestPassed);
    }
    session.close();
    info!("Upload of {file:?} has succeeded!");
    let deleted_local = delete_after_upload && remove_local(file);
    Ok(UploadOutcome::Uploaded {
        name,
        deleted_local,
    })
}

fn delete_local(file: &Path) -> io::Result<()> {
    fail::fail_point!("upload::remove-local", |_| {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "injected remove failure",
        ))
    });
    fs::remove_file(file)
}

fn remove_local(file: &Path) -> bool {
    match delete_local(file) {
        Ok(()) => {
            info!("Deleted {file:?} after upload");
            true
        }
        Err(err) => {
            warn!("Unable to delete {file:?} after upload: {err}");
            false
        }
    }
}

/// Name of the file written by an upload test.
pub const TEST_FILE_NAME: &str = "uploadtest.txt";

/// Write a small file to upload as a test, in `dir`.
pub fn write_test_file(dir: &Path) -> io::Result<PathBuf> {
    let path = dir.join(TEST_FILE_NAME);
    fs::write(
        &path,
        format!("Upload test from keepsake {}\n", crate::version()),
    )?;
    Ok(path)
}
