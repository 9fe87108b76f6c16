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

//! Deterministic core types and canonical encoding helpers.
//!
//! Hashes are lowercase-hex strings. Canonical JSON (keys sorted, no
//! insignificant whitespace) is the hashing input format; bincode with
//! fixint encoding is the durable-row format.

use crate::core::crypto::{self, sha256_hex};
use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Previous-hash sentinel of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Accepted clock skew for transaction timestamps, seconds.
pub const TX_TIMESTAMP_WINDOW_SECS: u64 = 300;

/// Canonical serialization error.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("serialization")]
    Serialize,
    #[error("deserialization")]
    Deserialize,
    #[error("size limit exceeded")]
    TooLarge,
}

/// Canonical bincode options (deterministic).
fn bincode_opts() -> impl Options {
    // Fixint encoding provides a stable integer representation.
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encode with deterministic rules. Requires deterministic container ordering.
pub fn encode_row<T: Serialize>(v: &T) -> Result<Vec<u8>, CodecError> {
    bincode_opts().serialize(v).map_err(|_| CodecError::Serialize)
}

/// Decode with a hard size cap.
pub fn decode_row_limited<T: DeserializeOwned>(bytes: &[u8], max: usize) -> Result<T, CodecError> {
    // Fast-path cap on the raw payload.
    if bytes.len() > max {
        return Err(CodecError::TooLarge);
    }
    // Cap inside the deserializer as well to bound container allocations.
    bincode_opts()
        .with_limit(max as u64)
        .deserialize(bytes)
        .map_err(|_| CodecError::Deserialize)
}

/// Canonical JSON: keys sorted lexicographically, no insignificant whitespace.
///
/// serde_json's default `Map` is BTreeMap-backed, so serializing through
/// `Value` yields sorted keys.
pub fn canonical_json<T: Serialize>(v: &T) -> Result<String, CodecError> {
    let value = serde_json::to_value(v).map_err(|_| CodecError::Serialize)?;
    serde_json::to_string(&value).map_err(|_| CodecError::Serialize)
}

/// JSON row encoding for self-describing values (transaction payloads are
/// untagged, which fixint bincode cannot re-read).
pub fn encode_json_row<T: Serialize>(v: &T) -> Result<Vec<u8>, CodecError> {
    canonical_json(v).map(String::into_bytes)
}

/// Decode a JSON row with a hard size cap.
pub fn decode_json_row_limited<T: DeserializeOwned>(
    bytes: &[u8],
    max: usize,
) -> Result<T, CodecError> {
    if bytes.len() > max {
        return Err(CodecError::TooLarge);
    }
    serde_json::from_slice(bytes).map_err(|_| CodecError::Deserialize)
}

/// Unix time in whole seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// DNS record types the zone can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    /// IPv4 host address.
    A,
    /// IPv6 host address.
    Aaaa,
    /// Free-form text.
    Txt,
    /// Reverse pointer.
    Ptr,
    /// Canonical name alias.
    Cname,
    /// Delegation name server.
    Ns,
}

impl RecordType {
    /// RFC 1035/3596 wire type code.
    pub fn qtype(self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::Ns => 2,
            RecordType::Cname => 5,
            RecordType::Ptr => 12,
            RecordType::Txt => 16,
            RecordType::Aaaa => 28,
        }
    }

    /// Inverse of [`RecordType::qtype`].
    pub fn from_qtype(code: u16) -> Option<Self> {
        match code {
            1 => Some(RecordType::A),
            2 => Some(RecordType::Ns),
            5 => Some(RecordType::Cname),
            12 => Some(RecordType::Ptr),
            16 => Some(RecordType::Txt),
            28 => Some(RecordType::Aaaa),
            _ => None,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Txt => "TXT",
            RecordType::Ptr => "PTR",
            RecordType::Cname => "CNAME",
            RecordType::Ns => "NS",
        };
        f.write_str(s)
    }
}

impl FromStr for RecordType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::Aaaa),
            "TXT" => Ok(RecordType::Txt),
            "PTR" => Ok(RecordType::Ptr),
            "CNAME" => Ok(RecordType::Cname),
            "NS" => Ok(RecordType::Ns),
            _ => Err(CodecError::Deserialize),
        }
    }
}

/// One unit of zone state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    /// Fully qualified, case-insensitive domain name.
    pub name: String,
    /// Record type.
    #[serde(rename = "type")]
    pub rtype: RecordType,
    /// Time to live, seconds.
    pub ttl: u32,
    /// Textual RDATA (address, target name, or text).
    pub rdata: String,
    /// Owning public key, base64 SPKI.
    pub owner: String,
    /// Hash of the last transaction that produced this value.
    #[serde(default)]
    pub tx_hash: String,
    /// Unix seconds of the last commit.
    #[serde(default)]
    pub timestamp: u64,
}

impl DnsRecord {
    /// Normalized (lowercase, trailing-dot) form of the name.
    pub fn name_norm(&self) -> String {
        normalize_name(&self.name)
    }
}

/// Lowercase a DNS name and ensure the trailing dot.
pub fn normalize_name(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    if lower.ends_with('.') {
        lower
    } else {
        format!("{lower}.")
    }
}

/// Transaction intent kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TxType {
    /// Create zone records.
    #[serde(rename = "REGISTER")]
    Register,
    /// Replace fields of owned records.
    #[serde(rename = "UPDATE_RECORDS")]
    UpdateRecords,
    /// Remove owned records.
    #[serde(rename = "DELETE_RECORDS")]
    DeleteRecords,
    /// Move record ownership to a new key.
    #[serde(rename = "TRANSFER_OWNERSHIP")]
    TransferOwnership,
    /// Extend the TTL of owned records.
    #[serde(rename = "RENEW")]
    Renew,
    /// Ask to join the peer set.
    #[serde(rename = "NODE_JOIN_REQUEST")]
    NodeJoinRequest,
    /// Vote on a join nomination.
    #[serde(rename = "NODE_JOIN_VOTE")]
    NodeJoinVote,
    /// Ask for a role promotion.
    #[serde(rename = "LEADER_PROMOTION_REQUEST")]
    LeaderPromotionRequest,
    /// Vote on a promotion nomination.
    #[serde(rename = "LEADER_PROMOTION_VOTE")]
    LeaderPromotionVote,
    /// Remove every record the sender owns for the named entries.
    #[serde(rename = "REVOKE")]
    Revoke,
    /// Ledger marker noting a zone snapshot export.
    #[serde(rename = "STATE_SNAPSHOT")]
    StateSnapshot,
}

impl TxType {
    /// Wire name used in canonical hashing.
    pub fn as_str(self) -> &'static str {
        match self {
            TxType::Register => "REGISTER",
            TxType::UpdateRecords => "UPDATE_RECORDS",
            TxType::DeleteRecords => "DELETE_RECORDS",
            TxType::TransferOwnership => "TRANSFER_OWNERSHIP",
            TxType::Renew => "RENEW",
            TxType::NodeJoinRequest => "NODE_JOIN_REQUEST",
            TxType::NodeJoinVote => "NODE_JOIN_VOTE",
            TxType::LeaderPromotionRequest => "LEADER_PROMOTION_REQUEST",
            TxType::LeaderPromotionVote => "LEADER_PROMOTION_VOTE",
            TxType::Revoke => "REVOKE",
            TxType::StateSnapshot => "STATE_SNAPSHOT",
        }
    }

    /// True for the types whose payload mutates the zone.
    pub fn touches_zone(self) -> bool {
        matches!(
            self,
            TxType::Register
                | TxType::UpdateRecords
                | TxType::DeleteRecords
                | TxType::TransferOwnership
                | TxType::Renew
                | TxType::Revoke
        )
    }
}

/// Governance ballot carried by vote transactions and `CASTE_VOTE` messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    /// Identifier of the nomination being voted on.
    pub nomination_id: String,
    /// Voter public key, base64 SPKI.
    pub voter: String,
    /// Approval flag.
    pub approve: bool,
}

/// Peer roles. Advisory except where the directory filters broadcasts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PeerRole {
    /// The network founder / directory seed.
    #[serde(rename = "GENESIS")]
    Genesis,
    /// A peer promoted into the leader rotation.
    #[serde(rename = "LEADER_NODE")]
    LeaderNode,
    /// An ordinary peer.
    #[serde(rename = "NORMAL_NODE")]
    NormalNode,
    /// Unassigned.
    #[serde(rename = "NONE")]
    None,
}

impl PeerRole {
    /// Wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            PeerRole::Genesis => "GENESIS",
            PeerRole::LeaderNode => "LEADER_NODE",
            PeerRole::NormalNode => "NORMAL_NODE",
            PeerRole::None => "NONE",
        }
    }
}

/// One peer's identity and address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// IPv4 address, unique across peers.
    pub ip: String,
    /// Advisory role.
    pub role: PeerRole,
    /// Public key, base64 SPKI, unique across peers.
    pub public_key: String,
}

/// One position in the circular leader queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Directory-assigned ordering key.
    pub sequence: u64,
    /// The peer occupying this position.
    pub peer: PeerConfig,
}

/// Transaction payload. The `tx_type` field decides which shape applies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TxPayload {
    /// Ordered records for the zone-touching types.
    Records(Vec<DnsRecord>),
    /// Peer identity for join/leave/promotion requests.
    Peer(PeerConfig),
    /// Governance ballot for the vote types.
    Ballot(Ballot),
    /// Free-form note (snapshot markers).
    Note(String),
}

impl TxPayload {
    /// Records carried by a zone-touching payload.
    pub fn records(&self) -> Option<&[DnsRecord]> {
        match self {
            TxPayload::Records(r) => Some(r),
            _ => None,
        }
    }

    /// Peer identity carried by a membership payload.
    pub fn peer(&self) -> Option<&PeerConfig> {
        match self {
            TxPayload::Peer(p) => Some(p),
            _ => None,
        }
    }

    /// Ballot carried by a vote payload.
    pub fn ballot(&self) -> Option<&Ballot> {
        match self {
            TxPayload::Ballot(b) => Some(b),
            _ => None,
        }
    }
}

/// A signed intent to mutate the zone or membership.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Lowercase-hex SHA-256 over the canonical signing input.
    pub hash: String,
    /// Sender public key, base64 SPKI.
    pub sender: String,
    /// Intent kind.
    #[serde(rename = "type")]
    pub tx_type: TxType,
    /// Type-specific payload.
    pub payload: TxPayload,
    /// Unix seconds at creation.
    pub timestamp: u64,
    /// Base64 ECDSA P-256 signature over the hash string's bytes.
    pub signature: String,
}

impl Transaction {
    /// Canonical hashing input: `sender || type || canonical(payload) || timestamp`.
    pub fn signing_input(
        sender: &str,
        tx_type: TxType,
        payload: &TxPayload,
        timestamp: u64,
    ) -> Result<String, CodecError> {
        let canon = canonical_json(payload)?;
        Ok(format!("{sender}{}{canon}{timestamp}", tx_type.as_str()))
    }

    /// Recompute the hash from the fields.
    pub fn compute_hash(&self) -> Result<String, CodecError> {
        let input = Self::signing_input(&self.sender, self.tx_type, &self.payload, self.timestamp)?;
        Ok(sha256_hex(input.as_bytes()))
    }

    /// Build and sign a transaction with the given keypair.
    pub fn create(
        keypair: &crypto::NodeKeypair,
        tx_type: TxType,
        payload: TxPayload,
        timestamp: u64,
    ) -> Result<Self, CodecError> {
        let sender = keypair.public_key_b64();
        let input = Self::signing_input(&sender, tx_type, &payload, timestamp)?;
        let hash = sha256_hex(input.as_bytes());
        let signature = keypair.sign_b64(hash.as_bytes()).map_err(|_| CodecError::Serialize)?;
        Ok(Self { hash, sender, tx_type, payload, timestamp, signature })
    }

    /// True when the hash is reproducible and the signature verifies.
    pub fn verify(&self) -> bool {
        match self.compute_hash() {
            Ok(h) if h == self.hash => crypto::verify(&self.sender, &self.signature, self.hash.as_bytes()),
            _ => false,
        }
    }

    /// True when `timestamp` lies within the acceptance window around `now`.
    pub fn timestamp_in_window(&self, now: u64) -> bool {
        let skew = now.abs_diff(self.timestamp);
        skew <= TX_TIMESTAMP_WINDOW_SECS
    }

    /// True when the payload shape matches the transaction type.
    pub fn payload_shape_ok(&self) -> bool {
        match self.tx_type {
            t if t.touches_zone() => self.payload.records().is_some_and(|r| !r.is_empty()),
            TxType::NodeJoinRequest | TxType::LeaderPromotionRequest => self.payload.peer().is_some(),
            TxType::NodeJoinVote | TxType::LeaderPromotionVote => self.payload.ballot().is_some(),
            TxType::StateSnapshot => matches!(self.payload, TxPayload::Note(_)),
            _ => true,
        }
    }
}

/// An ordered batch of transactions committed to the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// `sha256(previous_hash || merkle_root || timestamp)`, lowercase hex.
    pub hash: String,
    /// Hash of the parent block, `"0"` for genesis.
    pub previous_hash: String,
    /// Merkle root over the transaction hashes.
    pub merkle_root: String,
    /// Unix seconds at sealing.
    pub timestamp: u64,
    /// Transaction bodies; may be pruned to empty while the header stays valid.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Block hash commits to the header only, enabling body pruning.
    pub fn compute_hash(previous_hash: &str, merkle_root: &str, timestamp: u64) -> String {
        sha256_hex(format!("{previous_hash}{merkle_root}{timestamp}").as_bytes())
    }

    /// Seal a block over `transactions` on top of `previous_hash`.
    pub fn seal(previous_hash: String, transactions: Vec<Transaction>, timestamp: u64) -> Self {
        let hashes: Vec<String> = transactions.iter().map(|t| t.hash.clone()).collect();
        let merkle_root = crate::core::merkle::merkle_root(&hashes);
        let hash = Self::compute_hash(&previous_hash, &merkle_root, timestamp);
        Self { hash, previous_hash, merkle_root, timestamp, transactions }
    }

    /// The well-known first block.
    pub fn genesis(timestamp: u64) -> Self {
        Self::seal(GENESIS_PREVIOUS_HASH.to_string(), Vec::new(), timestamp)
    }

    /// True when the stored hash matches the header fields.
    pub fn header_valid(&self) -> bool {
        self.hash == Self::compute_hash(&self.previous_hash, &self.merkle_root, self.timestamp)
    }

    /// True when the merkle root matches the (non-pruned) transaction set.
    pub fn body_valid(&self) -> bool {
        let hashes: Vec<String> = self.transactions.iter().map(|t| t.hash.clone()).collect();
        self.merkle_root == crate::core::merkle::merkle_root(&hashes)
    }
}

/// Validate header hashes and parent links over a timestamp-ordered slice.
///
/// Transaction bodies are not consulted, so pruned chains stay valid.
pub fn is_chain_valid(blocks: &[Block]) -> bool {
    for (i, block) in blocks.iter().enumerate() {
        if !block.header_valid() {
            return false;
        }
        if i == 0 {
            if block.previous_hash != GENESIS_PREVIOUS_HASH {
                return false;
            }
        } else if block.previous_hash != blocks[i - 1].hash {
            return false;
        }
    }
    true
}

// --- Node configuration -------------------------------------------------------

/// Node configuration root.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node settings.
    pub node: NodeSettings,
    /// Peer networking settings.
    pub net: NetConfig,
    /// Consensus timing.
    #[serde(default)]
    pub consensus: ConsensusSettings,
    /// DNS front end settings.
    pub dns: DnsSettings,
    /// Metrics exposition settings.
    #[serde(default)]
    pub metrics: MetricsSettings,
}

/// Node settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Human-readable name.
    pub name: String,
    /// Data directory (stores + keys).
    pub data_dir: String,
}

/// Peer networking settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetConfig {
    /// This node's IPv4 address as peers reach it.
    pub self_ip: String,
    /// Directory (bootstrap) node address.
    pub bootstrap_ip: String,
    /// TCP port for peer envelopes and snapshot streams.
    pub peer_port: u16,
    /// Advisory role claimed at join time.
    #[serde(default = "default_role")]
    pub role: PeerRole,
}

fn default_role() -> PeerRole {
    PeerRole::NormalNode
}

/// Consensus timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsensusSettings {
    /// Block-buffer time B, seconds.
    pub block_interval_secs: u64,
    /// Failover timeout T, seconds. Must be >= 3 * B.
    pub failover_timeout_secs: u64,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self { block_interval_secs: 5, failover_timeout_secs: 15 }
    }
}

/// DNS front end settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DnsSettings {
    /// Authoritative origin, e.g. "chain.example.".
    pub origin: String,
    /// UDP+TCP listen port.
    pub port: u16,
    /// Upstream resolver for non-authoritative names, "ip:port".
    pub upstream: String,
}

/// Metrics exposition settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Listen address for /metrics, e.g. "127.0.0.1:9100". Empty disables.
    #[serde(default)]
    pub listen_addr: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::NodeKeypair;

    fn record(name: &str, owner: &str) -> DnsRecord {
        DnsRecord {
            name: name.to_string(),
            rtype: RecordType::A,
            ttl: 300,
            rdata: "10.0.0.1".to_string(),
            owner: owner.to_string(),
            tx_hash: String::new(),
            timestamp: 0,
        }
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let rec = record("Web.Example.Com", "pk");
        let canon = canonical_json(&rec).unwrap();
        let name_pos = canon.find("\"name\"").unwrap();
        let ttl_pos = canon.find("\"ttl\"").unwrap();
        let type_pos = canon.find("\"type\"").unwrap();
        assert!(name_pos < ttl_pos && ttl_pos < type_pos);
        assert!(!canon.contains(": "));
    }

    #[test]
    fn transaction_hash_reproducible() {
        let (kp, _) = NodeKeypair::generate().unwrap();
        let payload = TxPayload::Records(vec![record("web.example.com.", &kp.public_key_b64())]);
        let tx = Transaction::create(&kp, TxType::Register, payload, 1000).unwrap();
        assert_eq!(tx.compute_hash().unwrap(), tx.hash);
        assert!(tx.verify());
    }

    #[test]
    fn tampered_transaction_fails_verification() {
        let (kp, _) = NodeKeypair::generate().unwrap();
        let payload = TxPayload::Records(vec![record("web.example.com.", &kp.public_key_b64())]);
        let mut tx = Transaction::create(&kp, TxType::Register, payload, 1000).unwrap();
        tx.timestamp = 1001;
        assert!(!tx.verify());
    }

    #[test]
    fn block_hash_ignores_bodies() {
        let (kp, _) = NodeKeypair::generate().unwrap();
        let payload = TxPayload::Records(vec![record("a.example.com.", &kp.public_key_b64())]);
        let tx = Transaction::create(&kp, TxType::Register, payload, 1000).unwrap();
        let mut block = Block::seal("0".into(), vec![tx], 1005);
        assert!(block.header_valid());
        block.transactions.clear();
        assert!(block.header_valid());
        assert!(!block.body_valid());
    }

    #[test]
    fn chain_validation_links_parents() {
        let g = Block::genesis(1000);
        let b1 = Block::seal(g.hash.clone(), Vec::new(), 1005);
        let b2 = Block::seal(b1.hash.clone(), Vec::new(), 1010);
        assert!(is_chain_valid(&[g.clone(), b1.clone(), b2.clone()]));
        assert!(!is_chain_valid(&[g, b2, b1]));
    }

    #[test]
    fn name_normalization() {
        assert_eq!(normalize_name("Web.Example.COM"), "web.example.com.");
        assert_eq!(normalize_name("web.example.com."), "web.example.com.");
    }

    #[test]
    fn payload_shape_checks() {
        let (kp, _) = NodeKeypair::generate().unwrap();
        let tx = Transaction::create(&kp, TxType::Register, TxPayload::Records(vec![]), 0).unwrap();
        assert!(!tx.payload_shape_ok());
        let tx = Transaction::create(
            &kp,
            TxType::NodeJoinRequest,
            TxPayload::Peer(PeerConfig {
                ip: "10.0.0.5".into(),
                role: PeerRole::NormalNode,
                public_key: kp.public_key_b64(),
            }),
            0,
        )
        .unwrap();
        assert!(tx.payload_shape_ok());
    }
}
