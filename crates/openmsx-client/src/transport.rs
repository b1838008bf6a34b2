//! Tokio tasks driving a [`Connection`] over a byte stream.
//!
//! Each connection gets a writer task draining its outgoing channel and a
//! reader task feeding received chunks back in. Both only hold a weak
//! reference, so dropping every handle to the connection stops them.

use std::{
    net::SocketAddr,
    sync::{Arc, Weak},
    time::Duration,
};

use bytes::BytesMut;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
    time::timeout,
};
use tracing::{debug, error, info, trace};

use crate::{
    connection::{CloseReason, Connection, Outgoing},
    error::ClientError,
};

/// Connect attempts give up after this long.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 4096;

/// Drive `stream` as an emulator connection.
///
/// Must be called from within a tokio runtime.
pub fn spawn_connection<S>(stream: S) -> Arc<Connection>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = Connection::new(tx);

    tokio::spawn(writer_loop(write_half, rx, Arc::downgrade(&conn)));
    let reader = tokio::spawn(reader_loop(read_half, Arc::downgrade(&conn)));
    conn.set_reader(reader.abort_handle());
    conn
}

#[cfg(unix)]
pub async fn connect_unix(path: &std::path::Path) -> Result<Arc<Connection>, ClientError> {
    let stream = timeout(CONNECT_TIMEOUT, tokio::net::UnixStream::connect(path))
        .await
        .map_err(|_| ClientError::ConnectTimeout(path.display().to_string()))?
        .map_err(|e| {
            ClientError::ConnectionFailed(format!("Failed to connect to {}: {}", path.display(), e))
        })?;
    debug!("Connected to {}", path.display());
    Ok(spawn_connection(stream))
}

pub async fn connect_tcp(addr: SocketAddr) -> Result<Arc<Connection>, ClientError> {
    let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| ClientError::ConnectTimeout(addr.to_string()))?
        .map_err(|e| ClientError::ConnectionFailed(format!("Failed to connect to {}: {}", addr, e)))?;
    let _ = stream.set_nodelay(true);
    debug!("Connected to {addr}");
    Ok(spawn_connection(stream))
}

/// Writer task: drains the outgoing channel into the socket.
async fn writer_loop(
    mut write: impl AsyncWrite + Unpin,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    conn: Weak<Connection>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            Outgoing::Frame(bytes) => {
                trace!("Sending {} bytes to emulator", bytes.len());
                if let Err(e) = write.write_all(&bytes).await {
                    error!("Write error: {}", e);
                    if let Some(conn) = conn.upgrade() {
                        conn.transport_closed(CloseReason::Transport(e.to_string()));
                    }
                    break;
                }
            }
            Outgoing::Close => {
                debug!("Close requested");
                break;
            }
        }
    }

    let _ = write.shutdown().await;
}

/// Reader task: feeds received chunks to the connection.
async fn reader_loop(mut read: impl AsyncRead + Unpin, conn: Weak<Connection>) {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    loop {
        buf.clear();
        buf.reserve(READ_CHUNK);
        let result = read.read_buf(&mut buf).await;
        let Some(conn) = conn.upgrade() else {
            debug!("Connection dropped, stopping reader");
            return;
        };

        match result {
            Ok(0) => {
                info!("Emulator closed connection");
                conn.transport_closed(CloseReason::PeerClosed);
                return;
            }
            Ok(n) => {
                trace!("Received {} bytes from emulator", n);
                conn.feed(&buf);
                if conn.is_closed() {
                    return;
                }
            }
            Err(e) => {
                error!("Read error: {}", e);
                conn.transport_closed(CloseReason::Transport(e.to_string()));
                return;
            }
        }
    }
}
