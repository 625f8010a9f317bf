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

//! Upload over plain FTP.

use std::fmt;
use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream};

use suppaftp::types::{FileType, Mode};
use suppaftp::{FtpError, FtpStream};
use tracing::{debug, trace};
use url::Url;

use super::protocol::Connection;
use super::{Endpoint, Error, ErrorKind, ProtocolKind, Result, TIMEOUT};
use crate::config::TransportConfig;

pub(super) struct Protocol {
    endpoint: Endpoint,
}

impl Protocol {
    pub(super) fn new(config: &TransportConfig) -> Result<Self> {
        Ok(Protocol {
            endpoint: Endpoint::new(ProtocolKind::Ftp, config)?,
        })
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ftp::Protocol")
            .field("url", &self.endpoint.url)
            .field("user", &self.endpoint.user)
            .finish()
    }
}

impl super::Protocol for Protocol {
    fn connect(&self) -> Result<Box<dyn Connection>> {
        let endpoint = &self.endpoint;
        let url = &endpoint.url;
        let stream = endpoint.tcp_connect()?;
        let mut ftp = FtpStream::connect_with_stream(stream)
            .map_err(|err| ftp_error(ErrorKind::Connect, err, url))?
            .passive_stream_builder(|addr| data_stream(addr).map_err(FtpError::ConnectionError));
        trace!("Got FTP welcome");
        ftp.login(&endpoint.user, &endpoint.password)
            .map_err(|err| ftp_error(ErrorKind::Auth, err, url))?;
        debug!(user = endpoint.user, "Logged in");
        ftp.set_mode(Mode::Passive);
        if !endpoint.path.is_empty() {
            ftp.cwd(&endpoint.path)
                .map_err(|err| ftp_error(ErrorKind::NotFound, err, url))?;
        }
        ftp.transfer_type(FileType::Binary)
            .map_err(|err| ftp_error(ErrorKind::Other, err, url))?;
        Ok(Box::new(FtpConnection {
            ftp,
            url: url.clone(),
        }))
    }

    fn url(&self) -> Option<&Url> {
        Some(&self.endpoint.url)
    }
}

struct FtpConnection {
    ftp: FtpStream,
    url: Url,
}

impl Connection for FtpConnection {
    fn put(&mut self, name: &str, mut source: &mut dyn Read, len: u64) -> Result<()> {
        let written = self
            .ftp
            .put_file(name, &mut source)
            .map_err(|err| ftp_error(ErrorKind::Storage, err, &self.url))?;
        if written != len {
            return Err(Error::with_source(
                ErrorKind::Storage,
                format!("stored {written} bytes of {name:?}, expected {len}"),
                Some(&self.url),
            ));
        }
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        self.ftp
            .rm(name)
            .map_err(|err| ftp_error(ErrorKind::Storage, err, &self.url))
    }

    fn disconnect(&mut self) -> Result<()> {
        self.ftp
            .quit()
            .map_err(|err| ftp_error(ErrorKind::Connect, err, &self.url))
    }
}

/// Open a passive-mode data connection, bounded by the same timeout as the
/// control connection.
fn data_stream(addr: SocketAddr) -> io::Result<TcpStream> {
    trace!(%addr, "Opening FTP data connection");
    let stream = TcpStream::connect_timeout(&addr, TIMEOUT)?;
    stream.set_read_timeout(Some(TIMEOUT))?;
    stream.set_write_timeout(Some(TIMEOUT))?;
    Ok(stream)
}

/// Convert an FTP error, using `kind` unless the failure was at the socket level.
fn ftp_error(kind: ErrorKind, source: FtpError, url: &Url) -> Error {
    let kind = match &source {
        FtpError::ConnectionError(io_err) => match ErrorKind::from(io_err.kind()) {
            ErrorKind::TimedOut => ErrorKind::TimedOut,
            _ => ErrorKind::Connect,
        },
        _ => kind,
    };
    Error::with_source(kind, source, Some(url))
}

#[cfg(test)]
mod test {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn data_connection_has_timeouts() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = data_stream(listener.local_addr().unwrap()).unwrap();
        assert_eq!(stream.read_timeout().unwrap(), Some(TIMEOUT));
        assert_eq!(stream.write_timeout().unwrap(), Some(TIMEOUT));
    }

    #[test]
    fn refused_data_connection_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = data_stream(addr).map_err(FtpError::ConnectionError).unwrap_err();
        let url = Url::parse("ftp://127.0.0.1/").unwrap();
        assert_eq!(ftp_error(ErrorKind::Storage, err, &url).kind(), ErrorKind::Connect);
    }
}
