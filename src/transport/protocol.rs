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

//! The seam between [super::Transport] and each concrete upload protocol.
//!
//! This isn't exposed in the public API but is only an internal detail of the transport module.

use std::io::Read;

use url::Url;

use super::Result;

pub(super) trait Protocol: std::fmt::Debug + Send + Sync {
    /// Open and authenticate a connection, positioned in the remote directory.
    fn connect(&self) -> Result<Box<dyn Connection>>;

    /// Where this protocol uploads to, without credentials.
    fn url(&self) -> Option<&Url>;
}

/// An open, authenticated connection.
pub(super) trait Connection: Send {
    /// Store `len` bytes read from `source` as `name` in the remote directory,
    /// replacing any existing file.
    fn put(&mut self, name: &str, source: &mut dyn Read, len: u64) -> Result<()>;

    /// Delete `name` from the remote directory.
    fn remove(&mut self, name: &str) -> Result<()>;

    /// Close the connection. Called exactly once.
    fn disconnect(&mut self) -> Result<()>;
}
