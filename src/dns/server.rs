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

//! UDP + TCP DNS listeners answering from the derived zone.
//!
//! Queries inside the authoritative origin are answered `AA=1` from the
//! zone store (through the read cache); everything else is forwarded to
//! the configured upstream. UDP replies over 4096 bytes are truncated
//! with `TC=1`; TCP frames are 2-byte length prefixed with a 30 s read
//! timeout and a 64 KiB cap.

use crate::core::types::RecordType;
use crate::dns::answer;
use crate::dns::cache::DnsCache;
use crate::dns::forwarder;
use crate::monitoring::metrics::Metrics;
use crate::storage::ZoneStore;
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::{Name, RecordType as WireType};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

const MAX_UDP_REPLY: usize = 4096;
const MAX_TCP_FRAME: usize = 64 * 1024;
const TCP_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Front-end configuration errors.
#[derive(Debug, Error)]
pub enum DnsServerError {
    /// The configured origin does not parse as a DNS name.
    #[error("bad origin")]
    BadOrigin,
}

/// The authoritative resolver front end.
pub struct DnsServer {
    origin: Name,
    port: u16,
    upstream: String,
    zone: ZoneStore,
    cache: Arc<DnsCache>,
    workers: Arc<Semaphore>,
    metrics: Arc<Metrics>,
}

impl DnsServer {
    /// Build a front end serving `origin` on `port`.
    pub fn new(
        origin: &str,
        port: u16,
        upstream: String,
        zone: ZoneStore,
        cache: Arc<DnsCache>,
        workers: Arc<Semaphore>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, DnsServerError> {
        let origin = Name::from_ascii(origin).map_err(|_| DnsServerError::BadOrigin)?;
        Ok(Self { origin, port, upstream, zone, cache, workers, metrics })
    }

    /// Bind the UDP listener socket.
    pub async fn bind_udp(&self) -> std::io::Result<UdpSocket> {
        UdpSocket::bind(("0.0.0.0", self.port)).await
    }

    /// Bind the TCP listener socket.
    pub async fn bind_tcp(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(("0.0.0.0", self.port)).await
    }

    /// Packet-per-query UDP loop.
    pub async fn run_udp(self: Arc<Self>, socket: UdpSocket, mut shutdown: watch::Receiver<bool>) {
        info!(port = self.port, origin = %self.origin, "dns udp listener up");
        let socket = Arc::new(socket);
        let mut buf = vec![0u8; MAX_TCP_FRAME];
        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => {
                    let (len, peer) = match received {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(err = %e, "udp recv failed");
                            continue;
                        }
                    };
                    let wire = buf[..len].to_vec();
                    let server = Arc::clone(&self);
                    let socket = Arc::clone(&socket);
                    tokio::spawn(async move {
                        let Ok(_permit) = server.workers.acquire().await else {
                            return;
                        };
                        if let Some(mut reply) = server.handle_query(&wire).await {
                            if reply.len() > MAX_UDP_REPLY {
                                reply = server.truncate_reply(&wire).unwrap_or(reply);
                                server.metrics.dns_truncated_total.inc();
                            }
                            let _ = socket.send_to(&reply, peer).await;
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!("dns udp listener shutting down");
                    break;
                }
            }
        }
    }

    /// Length-prefixed TCP loop.
    pub async fn run_tcp(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        info!(port = self.port, "dns tcp listener up");
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(err = %e, "tcp accept failed");
                            continue;
                        }
                    };
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        let Ok(_permit) = server.workers.acquire().await else {
                            return;
                        };
                        if let Err(e) = server.serve_tcp_conn(stream).await {
                            debug!(peer = %peer, err = %e, "tcp connection closed");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!("dns tcp listener shutting down");
                    break;
                }
            }
        }
    }

    async fn serve_tcp_conn(&self, mut stream: TcpStream) -> std::io::Result<()> {
        loop {
            let mut len_buf = [0u8; 2];
            match tokio::time::timeout(TCP_READ_TIMEOUT, stream.read_exact(&mut len_buf)).await {
                Ok(Ok(_)) => {}
                Ok(Err(_)) | Err(_) => return Ok(()), // EOF or idle timeout
            }
            let len = u16::from_be_bytes(len_buf) as usize;
            if len == 0 || len > MAX_TCP_FRAME {
                return Ok(());
            }
            let mut wire = vec![0u8; len];
            match tokio::time::timeout(TCP_READ_TIMEOUT, stream.read_exact(&mut wire)).await {
                Ok(Ok(_)) => {}
                Ok(Err(_)) | Err(_) => return Ok(()),
            }
            let Some(reply) = self.handle_query(&wire).await else {
                continue;
            };
            let reply_len = u16::try_from(reply.len()).unwrap_or(u16::MAX);
            stream.write_all(&reply_len.to_be_bytes()).await?;
            stream.write_all(&reply[..reply_len as usize]).await?;
            stream.flush().await?;
        }
    }

    /// Answer one wire query. `None` means the input was not worth a reply.
    pub async fn handle_query(&self, wire: &[u8]) -> Option<Vec<u8>> {
        self.metrics.dns_queries_total.inc();

        let request = match Message::from_bytes(wire) {
            Ok(m) => m,
            Err(_) => {
                self.metrics.malformed_total.inc();
                if wire.len() < 2 {
                    return None;
                }
                let id = u16::from_be_bytes([wire[0], wire[1]]);
                return answer::bare_error(id, ResponseCode::FormErr).to_bytes().ok();
            }
        };
        let Some(query) = request.queries().first().cloned() else {
            return answer::negative_answer(&request, ResponseCode::FormErr).to_bytes().ok();
        };

        if !self.origin.zone_of(query.name()) {
            self.metrics.dns_forwarded_total.inc();
            return match forwarder::forward(wire, &self.upstream).await {
                Ok(reply) => Some(reply),
                Err(e) => {
                    debug!(err = %e, upstream = %self.upstream, "forwarding failed");
                    answer::negative_answer(&request, ResponseCode::ServFail).to_bytes().ok()
                }
            };
        }

        let qname = query.name().to_ascii();
        let qtype = match query.query_type() {
            WireType::ANY => None,
            other => match RecordType::from_qtype(u16::from(other)) {
                Some(rt) => Some(rt),
                // A type the zone cannot hold resolves to an empty match.
                None => {
                    return answer::negative_answer(&request, ResponseCode::NXDomain).to_bytes().ok();
                }
            },
        };

        let records = match self.cache.get(&qname, qtype) {
            Some(cached) => {
                self.metrics.dns_cache_hits_total.inc();
                cached.as_ref().clone()
            }
            None => {
                self.metrics.dns_cache_misses_total.inc();
                match self.zone.lookup(&qname, qtype) {
                    Ok(rows) => {
                        self.cache.put(&qname, qtype, rows.clone());
                        rows
                    }
                    Err(e) => {
                        warn!(err = %e, "zone lookup failed");
                        return answer::negative_answer(&request, ResponseCode::ServFail)
                            .to_bytes()
                            .ok();
                    }
                }
            }
        };

        let response = if records.is_empty() {
            answer::negative_answer(&request, ResponseCode::NXDomain)
        } else {
            answer::authoritative_answer(&request, &records)
        };
        response.to_bytes().ok()
    }

    fn truncate_reply(&self, wire: &[u8]) -> Option<Vec<u8>> {
        let request = Message::from_bytes(wire).ok()?;
        answer::truncated(&request).to_bytes().ok()
    }
}
