// Copyright (c) 2026 Namechain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! TCP transport for peer envelopes and snapshot streams.
//!
//! One frame per connection: `kind(1) || len_be(4) || bytes`. Kinds 0..=2
//! are the delivery channels of [`Channel`]; kind 3 is a snapshot file,
//! written to the well-known inbox path before subscribers are notified.
//! Registered subscribers each see every inbound item at most once.

use crate::core::types::{PeerConfig, PeerRole};
use crate::monitoring::metrics::Metrics;
use crate::net::envelope::{Channel, Envelope};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, info, warn};

const FILE_FRAME: u8 = 3;
const MAX_ENVELOPE_BYTES: u32 = 4 * 1024 * 1024;
const MAX_FILE_BYTES: u32 = 1024 * 1024 * 1024;
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const FILE_SEND_TIMEOUT: Duration = Duration::from_secs(60);

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io")]
    Io,
    #[error("oversized frame")]
    Oversized,
    #[error("malformed frame")]
    Malformed,
}

/// Role filter for broadcasts. The sentinel [`RoleFilter::Any`] matches all.
#[derive(Clone, Debug)]
pub enum RoleFilter {
    /// Deliver to every peer.
    Any,
    /// Deliver only to peers holding one of these roles.
    Roles(Vec<PeerRole>),
}

impl RoleFilter {
    /// True when `role` passes the filter.
    pub fn matches(&self, role: PeerRole) -> bool {
        match self {
            RoleFilter::Any => true,
            RoleFilter::Roles(roles) => roles.contains(&role),
        }
    }
}

/// One inbound delivery.
#[derive(Clone, Debug)]
pub enum Inbound {
    /// A decoded peer envelope.
    Message {
        /// Channel the frame arrived on.
        channel: Channel,
        /// The decoded envelope.
        envelope: Envelope,
    },
    /// A snapshot file landed in the inbox.
    File {
        /// Where the bytes were written.
        path: PathBuf,
    },
}

/// Peer-to-peer transport over plain TCP.
pub struct Transport {
    peer_port: u16,
    inbox_dir: PathBuf,
    subscribers: RwLock<Vec<mpsc::Sender<Inbound>>>,
    workers: Arc<Semaphore>,
    metrics: Arc<Metrics>,
}

impl Transport {
    /// Create a transport sending to `peer_port` on every destination.
    pub fn new(peer_port: u16, data_dir: &str, workers: Arc<Semaphore>, metrics: Arc<Metrics>) -> Self {
        Self {
            peer_port,
            inbox_dir: PathBuf::from(data_dir).join("inbox"),
            subscribers: RwLock::new(Vec::new()),
            workers,
            metrics,
        }
    }

    /// Subscribe a channel to inbound deliveries.
    pub fn register(&self, subscriber: mpsc::Sender<Inbound>) {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner()).push(subscriber);
    }

    /// Well-known landing path for inbound snapshot files.
    pub fn inbox_snapshot_path(&self) -> PathBuf {
        self.inbox_dir.join("snapshot.bin")
    }

    /// Best-effort reliable delivery of one envelope to a single peer.
    pub async fn send_direct(&self, dest_ip: &str, envelope: &Envelope) -> bool {
        self.send_frame(dest_ip, Channel::Direct.tag(), envelope).await
    }

    /// Deliver to every peer in `peers` whose role passes `filter`.
    ///
    /// Deliveries run concurrently; failures are logged and skipped, since
    /// gossip repairs them on the next slot.
    pub async fn broadcast(&self, envelope: &Envelope, peers: &[PeerConfig], filter: &RoleFilter) {
        let sends = peers
            .iter()
            .filter(|peer| filter.matches(peer.role) && peer.ip != envelope.sender_ip)
            .map(|peer| async move {
                let delivered = self.send_frame(&peer.ip, Channel::Broadcast.tag(), envelope).await;
                (peer.ip.as_str(), delivered)
            });
        for (dest, delivered) in join_all(sends).await {
            if !delivered {
                warn!(dest = %dest, "broadcast delivery failed");
            }
        }
    }

    /// Stream a snapshot file to a peer's inbox.
    pub async fn send_file(&self, dest_ip: &str, path: &std::path::Path) -> bool {
        let send = async {
            let bytes = tokio::fs::read(path).await.map_err(|_| TransportError::Io)?;
            let len = u32::try_from(bytes.len()).map_err(|_| TransportError::Oversized)?;
            if len > MAX_FILE_BYTES {
                return Err(TransportError::Oversized);
            }
            let mut stream = TcpStream::connect((dest_ip, self.peer_port))
                .await
                .map_err(|_| TransportError::Io)?;
            stream.write_all(&[FILE_FRAME]).await.map_err(|_| TransportError::Io)?;
            stream.write_all(&len.to_be_bytes()).await.map_err(|_| TransportError::Io)?;
            stream.write_all(&bytes).await.map_err(|_| TransportError::Io)?;
            stream.flush().await.map_err(|_| TransportError::Io)?;
            Ok::<(), TransportError>(())
        };
        match tokio::time::timeout(FILE_SEND_TIMEOUT, send).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(dest = %dest_ip, err = %e, "file send failed");
                false
            }
            Err(_) => {
                warn!(dest = %dest_ip, "file send timed out");
                false
            }
        }
    }

    async fn send_frame(&self, dest_ip: &str, kind: u8, envelope: &Envelope) -> bool {
        let send = async {
            let bytes = envelope.to_bytes().map_err(|_| TransportError::Malformed)?;
            let len = u32::try_from(bytes.len()).map_err(|_| TransportError::Oversized)?;
            if len > MAX_ENVELOPE_BYTES {
                return Err(TransportError::Oversized);
            }
            let mut stream = TcpStream::connect((dest_ip, self.peer_port))
                .await
                .map_err(|_| TransportError::Io)?;
            stream.write_all(&[kind]).await.map_err(|_| TransportError::Io)?;
            stream.write_all(&len.to_be_bytes()).await.map_err(|_| TransportError::Io)?;
            stream.write_all(&bytes).await.map_err(|_| TransportError::Io)?;
            stream.flush().await.map_err(|_| TransportError::Io)?;
            Ok::<(), TransportError>(())
        };
        match tokio::time::timeout(SEND_TIMEOUT, send).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(dest = %dest_ip, err = %e, "send failed");
                false
            }
            Err(_) => {
                debug!(dest = %dest_ip, "send timed out");
                false
            }
        }
    }

    /// Bind the peer listener socket.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(("0.0.0.0", self.peer_port)).await
    }

    /// Run the accept loop until shutdown. One frame per connection;
    /// connections are handled on the bounded worker pool.
    pub async fn run_listener(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        info!(port = self.peer_port, "peer listener up");
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(err = %e, "accept failed");
                            continue;
                        }
                    };
                    let transport = Arc::clone(&self);
                    tokio::spawn(async move {
                        let Ok(_permit) = transport.workers.acquire().await else {
                            return;
                        };
                        if let Err(e) = transport.process_stream(stream).await {
                            debug!(remote = %remote, err = %e, "inbound frame dropped");
                            transport.metrics.malformed_total.inc();
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!("peer listener shutting down");
                    break;
                }
            }
        }
    }

    async fn process_stream<S: AsyncRead + AsyncWrite + Unpin>(&self, mut stream: S) -> Result<(), TransportError> {
        let mut kind = [0u8; 1];
        stream.read_exact(&mut kind).await.map_err(|_| TransportError::Io)?;
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.map_err(|_| TransportError::Io)?;
        let len = u32::from_be_bytes(len_buf);

        if kind[0] == FILE_FRAME {
            if len > MAX_FILE_BYTES {
                return Err(TransportError::Oversized);
            }
            let mut bytes = vec![0u8; len as usize];
            stream.read_exact(&mut bytes).await.map_err(|_| TransportError::Io)?;
            let path = self.inbox_snapshot_path();
            tokio::fs::create_dir_all(&self.inbox_dir).await.map_err(|_| TransportError::Io)?;
            tokio::fs::write(&path, &bytes).await.map_err(|_| TransportError::Io)?;
            self.deliver(Inbound::File { path }).await;
            return Ok(());
        }

        let channel = Channel::from_tag(kind[0]).ok_or(TransportError::Malformed)?;
        if len > MAX_ENVELOPE_BYTES {
            return Err(TransportError::Oversized);
        }
        let mut bytes = vec![0u8; len as usize];
        stream.read_exact(&mut bytes).await.map_err(|_| TransportError::Io)?;
        let envelope = Envelope::from_bytes(&bytes).map_err(|_| TransportError::Malformed)?;
        self.deliver(Inbound::Message { channel, envelope }).await;
        Ok(())
    }

    async fn deliver(&self, inbound: Inbound) {
        let subscribers: Vec<mpsc::Sender<Inbound>> =
            self.subscribers.read().unwrap_or_else(|e| e.into_inner()).clone();
        for subscriber in subscribers {
            let _ = subscriber.send(inbound.clone()).await;
        }
    }
}
