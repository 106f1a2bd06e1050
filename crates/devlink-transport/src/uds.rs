use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{EventSender, Transport, TransportEvent, TransportKind};

const READ_CHUNK_SIZE: usize = 4 * 1024;

/// A device reached through a Unix domain socket.
///
/// Typical use is a serial or USB-CDC port bridged onto a socket
/// (`socat`, a vendor daemon, an emulator). The transport reconnects to the
/// same path on every `connect`.
pub struct UnixSocketTransport {
    path: PathBuf,
    events: EventSender,
    link: Mutex<Option<Link>>,
    connected: Arc<AtomicBool>,
}

struct Link {
    writer: OwnedWriteHalf,
    cancel: CancellationToken,
}

impl UnixSocketTransport {
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Create a disconnected transport for `path`. Received chunks go to `events`.
    pub fn new(path: impl AsRef<Path>, events: EventSender) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: Self::MAX_PATH_LEN,
            });
        }
        Ok(Self {
            path,
            events,
            link: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The socket path this transport connects to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn spawn_reader(
        &self,
        mut reader: tokio::net::unix::OwnedReadHalf,
        cancel: CancellationToken,
    ) {
        let events = self.events.clone();
        let connected = Arc::clone(&self.connected);
        let path = self.path.clone();
        tokio::spawn(async move {
            let mut chunk = vec![0u8; READ_CHUNK_SIZE];
            loop {
                let read = tokio::select! {
                    () = cancel.cancelled() => return,
                    read = reader.read(&mut chunk) => read,
                };
                let reason = match read {
                    Ok(0) => "eof".to_string(),
                    Ok(n) => {
                        let data = Bytes::copy_from_slice(&chunk[..n]);
                        if events.send(TransportEvent::Data(data)).await.is_err() {
                            return;
                        }
                        continue;
                    }
                    Err(err) => {
                        warn!(?path, error = %err, "unix socket read failed");
                        err.to_string()
                    }
                };
                connected.store(false, Ordering::SeqCst);
                let _ = events
                    .send(TransportEvent::Closed {
                        reason: Some(reason),
                    })
                    .await;
                return;
            }
        });
    }
}

#[async_trait]
impl Transport for UnixSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::UnixSocket
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The link lock is never held across an event send, and the reader
    /// starts only after `Opened` is queued.
    async fn connect(&self) -> Result<()> {
        if let Some(old) = self.link.lock().await.take() {
            old.cancel.cancel();
        }

        let stream = UnixStream::connect(&self.path)
            .await
            .map_err(|source| TransportError::Connect {
                target: self.path.display().to_string(),
                source,
            })?;
        let (reader, writer) = stream.into_split();
        let cancel = CancellationToken::new();
        {
            let mut link = self.link.lock().await;
            let fresh = Link {
                writer,
                cancel: cancel.clone(),
            };
            if let Some(stale) = link.replace(fresh) {
                stale.cancel.cancel();
            }
            self.connected.store(true, Ordering::SeqCst);
        }

        info!(path = ?self.path, "connected to unix socket device");
        let _ = self.events.send(TransportEvent::Opened).await;
        self.spawn_reader(reader, cancel);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let taken = self.link.lock().await.take();
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut old) = taken {
            old.cancel.cancel();
            if let Err(err) = old.writer.shutdown().await {
                debug!(path = ?self.path, error = %err, "shutdown after disconnect failed");
            }
        }
        let _ = self
            .events
            .send(TransportEvent::Closed {
                reason: Some("disconnect requested".to_string()),
            })
            .await;
        Ok(())
    }

    async fn send(&self, bytes: Bytes) -> Result<()> {
        let mut link = self.link.lock().await;
        let Some(active) = link.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        if let Err(err) = active.writer.write_all(&bytes).await {
            self.connected.store(false, Ordering::SeqCst);
            return Err(TransportError::Io(err));
        }
        active.writer.flush().await?;
        Ok(())
    }
}

impl std::fmt::Debug for UnixSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixSocketTransport")
            .field("path", &self.path)
            .field("connected", &self.is_connected())
            .finish()
    }
}
