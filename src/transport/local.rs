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

//! Upload by copying into a directory on the local filesystem.
//!
//! Useful for tests, and for shipping archives to a mounted network share.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{instrument, trace};
use url::Url;

use super::protocol::Connection;
use super::{Error, Result};

#[derive(Clone, Debug)]
pub(super) struct Protocol {
    /// Directory that files are copied into.
    root: PathBuf,
    url: Option<Url>,
}

impl Protocol {
    pub(super) fn new(path: &Path) -> Self {
        let url = std::path::absolute(path)
            .ok()
            .and_then(|abs| Url::from_directory_path(abs).ok());
        Protocol {
            root: path.to_owned(),
            url,
        }
    }
}

impl super::Protocol for Protocol {
    fn connect(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(LocalConnection {
            root: self.root.clone(),
        }))
    }

    fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }
}

#[derive(Debug)]
struct LocalConnection {
    root: PathBuf,
}

impl LocalConnection {
    fn full_path(&self, name: &str) -> PathBuf {
        debug_assert!(!name.contains('/'), "name must be a single component");
        self.root.join(name)
    }
}

impl Connection for LocalConnection {
    #[instrument(skip(self, source))]
    fn put(&mut self, name: &str, source: &mut dyn Read, len: u64) -> Result<()> {
        let path = self.full_path(name);
        let fail = |err| Error::io_error(&path, err);
        let mut file = File::create(&path).map_err(fail)?;
        let copied = io::copy(source, &mut file).map_err(fail)?;
        file.sync_all().map_err(fail)?;
        trace!(copied, len);
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        let path = self.full_path(name);
        fs::remove_file(&path).map_err(|err| Error::io_error(&path, err))
    }

    fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }
}
