use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use tracing::debug;

use crate::error::ConnectError;

type Inner = StreamOwned<ClientConnection, TcpStream>;

/// A client TLS session shared by the reader and writer halves.
///
/// rustls keeps one state machine per connection, so both directions go
/// through the same lock. The reader holds it for at most one socket read
/// timeout at a time.
#[derive(Clone)]
pub(crate) struct TlsStream {
    inner: Arc<Mutex<Inner>>,
}

impl TlsStream {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        crate::lock(&self.inner)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.lock().sock.set_read_timeout(timeout)
    }

    /// Send close_notify and shut the socket down.
    pub fn close(&self) {
        let mut stream = self.lock();
        stream.conn.send_close_notify();
        let _ = stream.flush();
        let _ = stream.sock.shutdown(Shutdown::Both);
    }
}

impl Read for TlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.lock().read(buf)
    }
}

impl Write for TlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().flush()
    }
}

fn client_config() -> Result<Arc<ClientConfig>, rustls::Error> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Run the client handshake over an already connected socket.
///
/// The socket's read timeout bounds each handshake read.
pub(crate) fn handshake(
    target: &str,
    host: &str,
    mut sock: TcpStream,
) -> Result<TlsStream, ConnectError> {
    let failed = |reason: String| ConnectError::HandshakeFailed {
        target: target.to_string(),
        reason,
    };

    let config = client_config().map_err(|e| failed(e.to_string()))?;
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| failed(format!("invalid server name {host:?}: {e}")))?;
    let mut conn = ClientConnection::new(config, server_name).map_err(|e| failed(e.to_string()))?;

    while conn.is_handshaking() {
        if let Err(err) = conn.complete_io(&mut sock) {
            return Err(match err.kind() {
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ConnectError::Timeout {
                    target: target.to_string(),
                    timeout: sock.read_timeout().ok().flatten().unwrap_or_default(),
                },
                _ => failed(err.to_string()),
            });
        }
    }

    debug!(
        target_label = target,
        protocol = ?conn.protocol_version(),
        "tls handshake complete"
    );
    Ok(TlsStream {
        inner: Arc::new(Mutex::new(StreamOwned::new(conn, sock))),
    })
}
