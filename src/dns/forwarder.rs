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
#![deny(missing_docs)]

//! Upstream forwarding for names outside the authoritative origin.

use hickory_proto::op::Message;
use hickory_proto::serialize::binary::BinDecodable;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_UPSTREAM_REPLY: usize = 4096;

/// Forwarding errors.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// Socket failure.
    #[error("io")]
    Io,
    /// Upstream did not answer in time.
    #[error("upstream timeout")]
    Timeout,
    /// Upstream reply was not parseable DNS.
    #[error("bad upstream reply")]
    BadReply,
}

/// Forward a raw query to the upstream resolver and return its raw reply.
///
/// The query bytes are relayed verbatim, so the client's transaction id
/// survives the round trip.
pub async fn forward(query_wire: &[u8], upstream: &str) -> Result<Vec<u8>, ForwardError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(|_| ForwardError::Io)?;
    socket.send_to(query_wire, upstream).await.map_err(|_| ForwardError::Io)?;

    let mut buf = vec![0u8; MAX_UPSTREAM_REPLY];
    let (len, _) = tokio::time::timeout(UPSTREAM_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .map_err(|_| ForwardError::Timeout)?
        .map_err(|_| ForwardError::Io)?;
    buf.truncate(len);

    // Validate the reply is parseable DNS before relaying it.
    Message::from_bytes(&buf).map_err(|_| ForwardError::BadReply)?;
    Ok(buf)
}
