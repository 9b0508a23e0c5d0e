//! FTP/FTPS transport for hosted game servers.
//!
//! One control connection is kept open between polls and dropped after any
//! failure, so the next call reconnects. Ranged reads use `REST` + `RETR`
//! and close the data channel once `len` bytes have arrived.

use super::transport::{join_remote, RemoteEntry, RemoteTransport};
use crate::error::TransportError;
use async_trait::async_trait;
use rustls::{ClientConfig, RootCertStore};
use std::io::Read;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use suppaftp::list::File;
use suppaftp::types::FileType;
use suppaftp::{FtpError, RustlsConnector, RustlsFtpStream, Status};
use tracing::{debug, info, warn};

/// Connection parameters for an FTP host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Upgrade the control and data channels with `AUTH TLS`
    pub tls: bool,
    pub timeout: Duration,
}

fn ftp_error(err: FtpError) -> TransportError {
    match err {
        FtpError::ConnectionError(io) => TransportError::from(io),
        FtpError::UnexpectedResponse(response) => {
            let message = format!(
                "{:?}: {}",
                response.status,
                String::from_utf8_lossy(&response.body).trim()
            );
            match response.status {
                Status::NotLoggedIn => TransportError::Auth(message),
                Status::FileUnavailable => TransportError::NotFound(message),
                _ => TransportError::Io(message),
            }
        }
        other => TransportError::Io(other.to_string()),
    }
}

/// Reads logs from an FTP server, optionally over explicit TLS.
pub struct FtpTransport {
    config: FtpConfig,
    session: Arc<Mutex<Option<RustlsFtpStream>>>,
}

impl FtpTransport {
    pub fn new(config: FtpConfig) -> Self {
        Self {
            config,
            session: Arc::new(Mutex::new(None)),
        }
    }

    fn connect(config: &FtpConfig) -> Result<RustlsFtpStream, TransportError> {
        let address: SocketAddr = (config.host.as_str(), config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| TransportError::Io(format!("cannot resolve {}", config.host)))?;

        let mut stream = RustlsFtpStream::connect_timeout(address, config.timeout).map_err(ftp_error)?;
        stream.get_ref().set_read_timeout(Some(config.timeout))?;
        if config.tls {
            let roots = RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };
            let tls = ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();
            stream = stream
                .into_secure(RustlsConnector::from(Arc::new(tls)), &config.host)
                .map_err(ftp_error)?;
        }
        stream
            .login(&config.username, &config.password)
            .map_err(ftp_error)?;
        stream.transfer_type(FileType::Binary).map_err(ftp_error)?;

        info!(
            "🔌 Connected to ftp{}://{}@{}:{}",
            if config.tls { "s" } else { "" },
            config.username,
            config.host,
            config.port
        );
        Ok(stream)
    }

    /// Runs `op` on the blocking pool with a connected session. `op` returns
    /// whether the session is still usable; a failed call drops it.
    async fn with_session<F, T>(&self, op: F) -> Result<T, TransportError>
    where
        F: FnOnce(&mut RustlsFtpStream) -> Result<(T, bool), TransportError> + Send + 'static,
        T: Send + 'static,
    {
        let session = self.session.clone();
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| TransportError::Io("ftp session mutex poisoned".to_string()))?;
            let mut stream = match guard.take() {
                Some(stream) => stream,
                None => Self::connect(&config)?,
            };

            match op(&mut stream) {
                Ok((value, true)) => {
                    *guard = Some(stream);
                    Ok(value)
                }
                Ok((value, false)) => {
                    debug!("Dropping ftp session after an unclean transfer");
                    Ok(value)
                }
                Err(err) => {
                    warn!("⚠️ FTP call failed, reconnecting next time: {}", err);
                    Err(err)
                }
            }
        })
        .await
        .map_err(|err| TransportError::Io(format!("ftp task failed: {err}")))?
    }
}

#[async_trait]
impl RemoteTransport for FtpTransport {
    fn name(&self) -> &str {
        if self.config.tls {
            "ftps"
        } else {
            "ftp"
        }
    }

    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let dir = dir.to_string();
        self.with_session(move |ftp| {
            let lines = ftp.list(Some(dir.as_str())).map_err(ftp_error)?;
            let entries = lines
                .iter()
                .filter_map(|line| File::from_str(line).ok())
                .filter(|file| file.name() != "." && file.name() != "..")
                .map(|file| RemoteEntry {
                    path: join_remote(&dir, file.name()),
                    name: file.name().to_string(),
                    is_dir: file.is_directory(),
                })
                .collect();
            Ok((entries, true))
        })
        .await
    }

    async fn size(&self, path: &str) -> Result<u64, TransportError> {
        let path = path.to_string();
        self.with_session(move |ftp| {
            let size = ftp.size(&path).map_err(ftp_error)?;
            Ok((size as u64, true))
        })
        .await
    }

    async fn read_range(&self, path: &str, offset: u64, len: u64) -> Result<Vec<u8>, TransportError> {
        let path = path.to_string();
        self.with_session(move |ftp| {
            ftp.resume_transfer(offset as usize).map_err(ftp_error)?;
            let mut stream = ftp.retr_as_stream(&path).map_err(ftp_error)?;

            let mut buffer = Vec::with_capacity(len as usize);
            (&mut stream).take(len).read_to_end(&mut buffer)?;

            if (buffer.len() as u64) < len {
                ftp.finalize_retr_stream(stream).map_err(ftp_error)?;
                return Ok((buffer, true));
            }
            // More data may follow; cut the transfer short.
            match ftp.abort(stream) {
                Ok(()) => Ok((buffer, true)),
                Err(err) => {
                    debug!("ABOR after ranged read of {} failed: {}", path, err);
                    Ok((buffer, false))
                }
            }
        })
        .await
    }

    async fn read_all(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        let path = path.to_string();
        self.with_session(move |ftp| {
            let buffer = ftp.retr_as_buffer(&path).map_err(ftp_error)?;
            Ok((buffer.into_inner(), true))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use suppaftp::types::Response;

    fn rejected(status: Status) -> FtpError {
        FtpError::UnexpectedResponse(Response::new(status, b"550 No such file".to_vec()))
    }

    #[test]
    fn test_reply_codes_map_to_transport_errors() {
        assert!(ftp_error(rejected(Status::FileUnavailable)).is_not_found());
        assert!(matches!(ftp_error(rejected(Status::NotLoggedIn)), TransportError::Auth(_)));
        assert!(matches!(ftp_error(rejected(Status::CommandNotImplemented)), TransportError::Io(_)));

        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out");
        assert!(matches!(ftp_error(FtpError::ConnectionError(timeout)), TransportError::Timeout(_)));
    }

    #[test]
    fn test_unix_listing_lines_parse() {
        let file = File::from_str("-rw-r--r-- 1 user group 4096 Nov 24 10:00 DayZServer_x64.ADM").unwrap();
        assert_eq!(file.name(), "DayZServer_x64.ADM");
        assert!(!file.is_directory());

        let dir = File::from_str("drwxr-xr-x 2 user group 4096 Nov 24 10:00 logs").unwrap();
        assert!(dir.is_directory());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_transport_error() {
        let transport = FtpTransport::new(FtpConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: "anonymous".to_string(),
            password: String::new(),
            tls: false,
            timeout: Duration::from_millis(200),
        });
        assert_eq!(transport.name(), "ftp");
        assert!(transport.size("logs/a.ADM").await.is_err());
    }
}
