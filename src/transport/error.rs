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

//! Errors occurring on transports: connecting, authenticating, or storing files.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::path::Path;

use derive_more::Display;
use url::Url;

/// A transport error, as a generalization of IO errors.
#[derive(Debug)]
pub struct Error {
    /// What type of generally known error?
    pub kind: ErrorKind,
    /// The underlying error: for example an IO, FTP or SSH error.
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    /// The affected URL, if known.
    pub url: Option<Url>,
}

/// General categories of transport errors.
#[derive(Debug, Display, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    #[display(fmt = "Not found")]
    NotFound,

    #[display(fmt = "Permission denied")]
    PermissionDenied,

    #[display(fmt = "Connect error")]
    Connect,

    #[display(fmt = "Authentication failed")]
    Auth,

    #[display(fmt = "Timed out")]
    TimedOut,

    #[display(fmt = "Failed to store file")]
    Storage,

    #[display(fmt = "Unsupported protocol")]
    UnsupportedProtocol,

    #[display(fmt = "Other transport error")]
    Other,
}

impl From<io::ErrorKind> for ErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::TimedOut,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => ErrorKind::Connect,
            _ => ErrorKind::Other,
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub(super) fn new(kind: ErrorKind, url: Option<&Url>) -> Error {
        Error {
            kind,
            source: None,
            url: url.cloned(),
        }
    }

    pub(super) fn with_source(
        kind: ErrorKind,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
        url: Option<&Url>,
    ) -> Error {
        Error {
            kind,
            source: Some(source.into()),
            url: url.cloned(),
        }
    }

    pub(super) fn io_error(path: &Path, source: io::Error) -> Error {
        Error {
            kind: source.kind().into(),
            source: Some(Box::new(source)),
            url: Url::from_file_path(path).ok(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    /// The URL where this error occurred, if known.
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ref url) = self.url {
            write!(f, ": {url}")?;
        }
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|s| &**s as _)
    }
}
