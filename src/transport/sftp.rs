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

//! Upload over SFTP.
//!
//! Host keys are not checked.

use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, error, trace};
use url::Url;

use super::protocol::Connection;
use super::{Endpoint, Error, ErrorKind, ProtocolKind, Result, TIMEOUT};
use crate::config::TransportConfig;

pub(super) struct Protocol {
    endpoint: Endpoint,
    /// If set, authenticate with this key rather than a password.
    private_key: Option<PathBuf>,
    private_key_password: String,
}

impl Protocol {
    pub(super) fn new(config: &TransportConfig) -> Result<Self> {
        let private_key = if config.use_key_auth {
            Some(config.private_key.clone().ok_or_else(|| {
                Error::with_source(
                    ErrorKind::Auth,
                    "use_key_auth is set but private_key is not",
                    None,
                )
            })?)
        } else {
            None
        };
        Ok(Protocol {
            endpoint: Endpoint::new(ProtocolKind::Sftp, config)?,
            private_key,
            private_key_password: config.private_key_password.clone(),
        })
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("sftp::Protocol")
            .field("url", &self.endpoint.url)
            .field("user", &self.endpoint.user)
            .field("private_key", &self.private_key)
            .finish()
    }
}

impl super::Protocol for Protocol {
    fn connect(&self) -> Result<Box<dyn Connection>> {
        let endpoint = &self.endpoint;
        let url = &endpoint.url;
        let tcp_stream = endpoint.tcp_connect()?;
        trace!("got tcp connection");
        let mut session = ssh2::Session::new().map_err(|err| {
            error!(?err, "Error opening SSH session");
            ssh_error(err, url)
        })?;
        session.set_timeout(TIMEOUT.as_millis() as u32);
        session.set_tcp_stream(tcp_stream);
        session.handshake().map_err(|err| {
            error!(?err, "Error in SSH handshake");
            ssh_error(err, url)
        })?;
        trace!(
            "SSH hands shaken, banner: {}",
            session.banner().unwrap_or("(none)")
        );
        let username = endpoint.user.as_str();
        let auth = match &self.private_key {
            Some(private_key) => {
                let passphrase = Some(self.private_key_password.as_str()).filter(|p| !p.is_empty());
                session.userauth_pubkey_file(username, None, private_key, passphrase)
            }
            None => session.userauth_password(username, &endpoint.password),
        };
        auth.map_err(|err| {
            error!(?err, username, "Error in SSH user auth");
            Error::with_source(ErrorKind::Auth, err, Some(url))
        })?;
        if !session.authenticated() {
            return Err(Error::new(ErrorKind::Auth, Some(url)));
        }
        debug!(username, "Authenticated");
        let sftp = session.sftp().map_err(|err| {
            error!(?err, "Error opening SFTP session");
            ssh_error(err, url)
        })?;
        Ok(Box::new(SftpConnection {
            session,
            sftp,
            base_path: PathBuf::from(&endpoint.path),
            url: url.clone(),
        }))
    }

    fn url(&self) -> Option<&Url> {
        Some(&self.endpoint.url)
    }
}

struct SftpConnection {
    session: ssh2::Session,
    sftp: ssh2::Sftp,
    base_path: PathBuf,
    url: Url,
}

impl SftpConnection {
    fn full_path(&self, name: &str) -> PathBuf {
        if self.base_path.as_os_str().is_empty() {
            Path::new(name).to_owned()
        } else {
            self.base_path.join(name)
        }
    }
}

impl Connection for SftpConnection {
    fn put(&mut self, name: &str, source: &mut dyn Read, len: u64) -> Result<()> {
        let full_path = self.full_path(name);
        trace!("put {len:>9} bytes to {full_path:?}");
        let mut file = self.sftp.create(&full_path).map_err(|err| {
            error!(?err, ?full_path, "sftp error creating file");
            ssh_error(err, &self.url)
        })?;
        io::copy(source, &mut file).map_err(|err| {
            error!(?err, ?full_path, "sftp error writing file");
            Error::with_source(ErrorKind::Storage, err, Some(&self.url))
        })?;
        file.close().map_err(|err| ssh_error(err, &self.url))
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        let full_path = self.full_path(name);
        trace!("remove {full_path:?}");
        self.sftp
            .unlink(&full_path)
            .map_err(|err| ssh_error(err, &self.url))
    }

    fn disconnect(&mut self) -> Result<()> {
        self.session
            .disconnect(None, "upload finished", None)
            .map_err(|err| ssh_error(err, &self.url))
    }
}

impl From<ssh2::ErrorCode> for ErrorKind {
    fn from(code: ssh2::ErrorCode) -> Self {
        match code {
            ssh2::ErrorCode::SFTP(libssh2_sys::LIBSSH2_FX_NO_SUCH_FILE)
            | ssh2::ErrorCode::SFTP(libssh2_sys::LIBSSH2_FX_NO_SUCH_PATH) => ErrorKind::NotFound,
            ssh2::ErrorCode::SFTP(libssh2_sys::LIBSSH2_FX_PERMISSION_DENIED) => {
                ErrorKind::PermissionDenied
            }
            ssh2::ErrorCode::Session(libssh2_sys::LIBSSH2_ERROR_TIMEOUT) => ErrorKind::TimedOut,
            _ => ErrorKind::Other,
        }
    }
}

fn ssh_error(source: ssh2::Error, url: &Url) -> Error {
    Error {
        kind: source.code().into(),
        source: Some(Box::new(source)),
        url: Some(url.clone()),
    }
}
