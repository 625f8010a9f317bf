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

//! Upload archives to a remote server.
//!
//! A [Transport] is configured once from a [TransportConfig], dispatching on
//! the protocol name, and then opens a [Session] for each upload. Transports
//! are synchronous; callers run them on blocking worker threads.

use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use strum_macros::{Display, EnumString};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::TransportConfig;

use self::protocol::{Connection, Protocol};
use self::record::{Call, Verb};

mod error;
#[cfg(feature = "ftp")]
mod ftp;
pub mod local;
mod protocol;
#[cfg(feature = "sftp")]
mod sftp;

pub mod record;

pub use self::error::{Error, ErrorKind};

/// Bound on connecting, and on each read or write, for remote protocols.
pub const TIMEOUT: Duration = Duration::from_secs(180);

/// Remote protocols that can be configured.
#[derive(Clone, Copy, Debug, Display, EnumString, PartialEq, Eq)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum ProtocolKind {
    Ftp,
    Sftp,
}

impl ProtocolKind {
    pub fn default_port(self) -> u16 {
        match self {
            ProtocolKind::Ftp => 21,
            ProtocolKind::Sftp => 22,
        }
    }
}

/// A place to upload files to.
///
/// Transport objects can be cheaply cloned.
#[derive(Clone)]
pub struct Transport {
    /// The concrete protocol implementation: FTP, SFTP, or local.
    protocol: Arc<dyn Protocol + 'static>,

    /// If true, record operations into `calls` so that they can be inspected by tests.
    record_calls: bool,

    /// If recording is enabled, a list of all operations on all clones.
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Transport {
    /// Build a transport from configuration.
    ///
    /// Fails with [ErrorKind::UnsupportedProtocol] if the protocol name isn't
    /// recognized or support for it wasn't compiled in. No connection is
    /// made until [Transport::connect].
    pub fn from_config(config: &TransportConfig) -> Result<Transport> {
        let kind: ProtocolKind = config.protocol.parse().map_err(|_| {
            Error::with_source(
                ErrorKind::UnsupportedProtocol,
                format!(
                    "{:?} (only ftp and sftp are accepted)",
                    config.protocol
                ),
                None,
            )
        })?;
        let protocol: Arc<dyn Protocol> = match kind {
            #[cfg(feature = "ftp")]
            ProtocolKind::Ftp => Arc::new(ftp::Protocol::new(config)?),
            #[cfg(feature = "sftp")]
            ProtocolKind::Sftp => Arc::new(sftp::Protocol::new(config)?),
            #[allow(unreachable_patterns)]
            other => {
                return Err(Error::with_source(
                    ErrorKind::UnsupportedProtocol,
                    format!("support for {other} is not built in"),
                    None,
                ))
            }
        };
        Ok(Transport::from_protocol(protocol))
    }

    /// A transport that copies files into a local directory.
    pub fn local(path: &Path) -> Self {
        Transport::from_protocol(Arc::new(local::Protocol::new(path)))
    }

    fn from_protocol(protocol: Arc<dyn Protocol>) -> Self {
        Transport {
            protocol,
            record_calls: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Start recording operations from this and any cloned transports.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn enable_record_calls(self) -> Transport {
        Transport {
            record_calls: true,
            ..self
        }
    }

    /// Take out all the recorded calls, clearing the record.
    #[cfg(test)]
    pub(crate) fn take_recorded_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    /// If recording is enabled, record an event.
    fn record(&self, verb: Verb, name: &str) {
        if cfg!(test) && self.record_calls {
            self.calls
                .lock()
                .expect("lock transport calls")
                .push(Call::new(verb, name));
        }
    }

    /// Connect and authenticate.
    ///
    /// The returned session disconnects when it's dropped.
    #[instrument(skip(self), fields(url = ?self.url()))]
    pub fn connect(&self) -> Result<Session> {
        self.record(Verb::Connect, "");
        let connection = self.protocol.connect()?;
        debug!("Connected");
        Ok(Session {
            transport: self.clone(),
            connection,
            open: true,
        })
    }

    /// Where files are uploaded to, if it can be expressed as a URL.
    pub fn url(&self) -> Option<&Url> {
        self.protocol.url()
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.url() {
            Some(url) => write!(f, "Transport({url})"),
            None => write!(f, "Transport({:?})", self.protocol),
        }
    }
}

/// An open connection to a [Transport].
pub struct Session {
    transport: Transport,
    connection: Box<dyn Connection>,
    open: bool,
}

impl Session {
    /// Upload a local file into the remote directory, keeping its file name.
    ///
    /// Returns the remote name.
    #[instrument(skip(self))]
    pub fn put(&mut self, local_path: &Path) -> Result<String> {
        let name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::with_source(
                    ErrorKind::Other,
                    format!("can't upload {local_path:?}: no UTF-8 file name"),
                    None,
                )
            })?
            .to_owned();
        let mut file = File::open(local_path).map_err(|err| Error::io_error(local_path, err))?;
        let len = file
            .metadata()
            .map_err(|err| Error::io_error(local_path, err))?
            .len();
        self.transport.record(Verb::Put, &name);
        self.connection.put(&name, &mut file, len)?;
        debug!(len, "Uploaded");
        Ok(name)
    }

    /// Delete a file from the remote directory.
    #[instrument(skip(self))]
    pub fn remove(&mut self, name: &str) -> Result<()> {
        self.transport.record(Verb::Remove, name);
        self.connection.remove(name)
    }

    /// Disconnect now, logging any failure.
    pub fn close(mut self) {
        self.disconnect();
    }

    fn disconnect(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.transport.record(Verb::Disconnect, "");
        if let Err(err) = self.connection.disconnect() {
            warn!("Failed to disconnect cleanly: {err}");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.transport)
            .field("open", &self.open)
            .finish()
    }
}

/// Connection parameters shared by the remote protocols.
#[cfg(any(feature = "ftp", feature = "sftp"))]
#[derive(Clone)]
struct Endpoint {
    host: String,
    port: u16,
    user: String,
    password: String,
    /// Remote directory, possibly empty.
    path: String,
    /// For messages; has no credentials.
    url: Url,
}

#[cfg(any(feature = "ftp", feature = "sftp"))]
impl Endpoint {
    fn new(kind: ProtocolKind, config: &TransportConfig) -> Result<Endpoint> {
        let port = config.port.unwrap_or_else(|| kind.default_port());
        let mut url = Url::parse(&format!("{kind}://{}:{port}/", config.host)).map_err(|err| {
            Error::with_source(
                ErrorKind::Connect,
                format!("invalid host {:?}: {err}", config.host),
                None,
            )
        })?;
        url.set_path(&config.path);
        let user = match config.user.as_deref() {
            None | Some("") => whoami::username(),
            Some(user) => user.to_owned(),
        };
        Ok(Endpoint {
            host: config.host.clone(),
            port,
            user,
            password: config.password.clone(),
            path: config.path.clone(),
            url,
        })
    }

    /// Resolve and connect a TCP stream, trying each address in turn.
    fn tcp_connect(&self) -> Result<std::net::TcpStream> {
        use std::net::{TcpStream, ToSocketAddrs};

        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|err| Error::with_source(ErrorKind::Connect, err, Some(&self.url)))?;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, TIMEOUT) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(TIMEOUT))
                        .and_then(|()| stream.set_write_timeout(Some(TIMEOUT)))
                        .map_err(|err| Error::with_source(err.kind().into(), err, Some(&self.url)))?;
                    return Ok(stream);
                }
                Err(err) => {
                    debug!(?addr, ?err, "Connect failed");
                    last_err = Some(err);
                }
            }
        }
        Err(match last_err {
            Some(err) => {
                let kind = match ErrorKind::from(err.kind()) {
                    ErrorKind::TimedOut => ErrorKind::TimedOut,
                    _ => ErrorKind::Connect,
                };
                Error::with_source(kind, err, Some(&self.url))
            }
            None => Error::with_source(
                ErrorKind::Connect,
                format!("no addresses for {:?}", self.host),
                Some(&self.url),
            ),
        })
    }
}

type Result<T> = std::result::Result<T, Error>;
