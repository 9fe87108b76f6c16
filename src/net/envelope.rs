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

//! The canonical-JSON peer message envelope.
//!
//! Wire form: `{"type": ..., "senderIp": ..., "senderPublicKey": ..., "payload": ...}`.
//! Handlers decode the envelope, inspect `type`, and process `payload`.

use crate::core::types::{canonical_json, CodecError};
use serde::{Deserialize, Serialize};

/// Fixed message type enumeration observed at the boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// New peer asks the directory to be admitted.
    #[serde(rename = "ADD_NODE")]
    AddNode,
    /// Peer asks the directory to leave.
    #[serde(rename = "DELETE_NODE")]
    DeleteNode,
    /// Peer asks the directory for a role change.
    #[serde(rename = "PROMOTE_NODE")]
    PromoteNode,
    /// Directory announces an admitted peer.
    #[serde(rename = "ADD")]
    Add,
    /// Directory announces a departed peer.
    #[serde(rename = "DELETE")]
    Delete,
    /// Directory announces a role change.
    #[serde(rename = "PROMOTE")]
    Promote,
    /// Ask the directory for its peer list.
    #[serde(rename = "FETCH_NODES")]
    FetchNodes,
    /// Directory's peer list reply.
    #[serde(rename = "FETCH_NODES_RESPONSE")]
    FetchNodesResponse,
    /// Full sorted leader queue from the directory.
    #[serde(rename = "QUEUE_UPDATE")]
    QueueUpdate,
    /// A sealed block from the slot leader.
    #[serde(rename = "BLOCK_PUBLISH")]
    BlockPublish,
    /// A signed transaction for everyone's mempool.
    #[serde(rename = "TRANSACTION_PUBLISH")]
    TransactionPublish,
    /// Ask a peer for a block-store snapshot.
    #[serde(rename = "SYNC_REQUEST")]
    SyncRequest,
    /// Directory opens a nomination.
    #[serde(rename = "CREATE_ELECTION")]
    CreateElection,
    /// A peer's ballot on an open nomination.
    #[serde(rename = "CASTE_VOTE")]
    CastVote,
}

/// Delivery channel a message arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    /// Point-to-point send.
    Direct,
    /// Role-filtered fan-out.
    Broadcast,
    /// Group delivery.
    Multicast,
}

impl Channel {
    /// Wire tag byte.
    pub fn tag(self) -> u8 {
        match self {
            Channel::Direct => 0,
            Channel::Broadcast => 1,
            Channel::Multicast => 2,
        }
    }

    /// Inverse of [`Channel::tag`].
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Channel::Direct),
            1 => Some(Channel::Broadcast),
            2 => Some(Channel::Multicast),
            _ => None,
        }
    }
}

/// One peer message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind.
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// Sender IPv4 address.
    #[serde(rename = "senderIp")]
    pub sender_ip: String,
    /// Sender public key, base64 SPKI; absent on anonymous fetches.
    #[serde(rename = "senderPublicKey")]
    pub sender_public_key: Option<String>,
    /// Type-specific payload.
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Build an envelope with a serializable payload.
    pub fn new<T: Serialize>(
        msg_type: MessageType,
        sender_ip: &str,
        sender_public_key: Option<String>,
        payload: &T,
    ) -> Result<Self, CodecError> {
        let payload = serde_json::to_value(payload).map_err(|_| CodecError::Serialize)?;
        Ok(Self { msg_type, sender_ip: sender_ip.to_string(), sender_public_key, payload })
    }

    /// Canonical JSON bytes for the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        canonical_json(self).map(String::into_bytes)
    }

    /// Decode from wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(|_| CodecError::Deserialize)
    }

    /// Decode the payload into a concrete type.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, CodecError> {
        serde_json::from_value(self.payload.clone()).map_err(|_| CodecError::Deserialize)
    }
}
