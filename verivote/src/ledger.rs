//! The event ledger: every protocol event is signed and routed to exactly
//! one of three node roles, each keeping its own hash chain. Appends are
//! serialized per node; cross-node replication is asynchronous,
//! at-least-once, and idempotent by transaction id.

use crate::*;
use chrono::{DateTime, Utc};
use ed25519_dalek::ExpandedSecretKey;
use ed25519_dalek::PublicKey;
use ed25519_dalek::SecretKey;
use ed25519_dalek::Signature;
use indexmap::IndexMap;
use uuid::Uuid;

pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// A typed protocol event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum LedgerEvent {
    ManifestPublished(ManifestPublished),
    CredentialIssued(CredentialIssued),
    BallotCast(BallotCast),
    TreeHeadPublished(TreeHeadPublished),
    TallyPublished(TallyPublished),
    FraudFlagged(FraudFlagged),
    FraudActionTaken(FraudActionTaken),
}

impl LedgerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::ManifestPublished(_) => "manifest_published",
            LedgerEvent::CredentialIssued(_) => "credential_issued",
            LedgerEvent::BallotCast(_) => "ballot_cast",
            LedgerEvent::TreeHeadPublished(_) => "tree_head_published",
            LedgerEvent::TallyPublished(_) => "tally_published",
            LedgerEvent::FraudFlagged(_) => "fraud_flagged",
            LedgerEvent::FraudActionTaken(_) => "fraud_action_taken",
        }
    }

    pub fn role(&self) -> NodeRole {
        NodeRole::for_event(self)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ManifestPublished {
    pub manifest_id: String,

    #[serde(with = "Bytes32Hex")]
    pub manifest_hash: [u8; 32],
}

/// Records that an issuance ceremony happened. Deliberately carries only
/// an opaque ceremony id: recording the credential key here would undo
/// the blind signature's unlinkability.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CredentialIssued {
    pub ceremony_id: Uuid,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BallotCast {
    pub ballot_id: Uuid,
    pub leaf_index: u64,

    #[serde(with = "Bytes32Hex")]
    pub leaf_hash: [u8; 32],
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TreeHeadPublished {
    pub tree_size: u64,

    #[serde(with = "Bytes32Hex")]
    pub root_hash: [u8; 32],
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TallyPublished {
    pub manifest_id: String,
    pub ballot_count: u64,

    #[serde(with = "Bytes32Hex")]
    pub closing_root: [u8; 32],
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FraudFlagged {
    pub case_id: Uuid,
    pub flagged_by: String,
    pub reason: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FraudActionTaken {
    pub case_id: Uuid,
    pub action: String,
    pub resulting_status: String,
}

/// The three ledger node roles. Every event type routes to exactly one.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Governance,
    Balloting,
    Oversight,
}

impl NodeRole {
    /// The type -> role routing table.
    pub fn for_event(event: &LedgerEvent) -> NodeRole {
        match event {
            LedgerEvent::ManifestPublished(_) => NodeRole::Governance,
            LedgerEvent::TallyPublished(_) => NodeRole::Governance,
            LedgerEvent::CredentialIssued(_) => NodeRole::Balloting,
            LedgerEvent::BallotCast(_) => NodeRole::Balloting,
            LedgerEvent::TreeHeadPublished(_) => NodeRole::Balloting,
            LedgerEvent::FraudFlagged(_) => NodeRole::Oversight,
            LedgerEvent::FraudActionTaken(_) => NodeRole::Oversight,
        }
    }

    pub fn allowed_event_types(&self) -> Vec<&'static str> {
        match self {
            NodeRole::Governance => vec!["manifest_published", "tally_published"],
            NodeRole::Balloting => {
                vec!["credential_issued", "ballot_cast", "tree_head_published"]
            }
            NodeRole::Oversight => vec!["fraud_flagged", "fraud_action_taken"],
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            NodeRole::Governance => "governance",
            NodeRole::Balloting => "balloting",
            NodeRole::Oversight => "oversight",
        };
        write!(f, "{}", name)
    }
}

/// One link in a node's hash chain.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LedgerEntry {
    pub height: u64,

    #[serde(with = "Bytes32Hex")]
    pub prev_hash: [u8; 32],

    #[serde(with = "Bytes32Hex")]
    pub hash: [u8; 32],

    pub event: LedgerEvent,
    pub tx_id: Uuid,
    pub recorded_at: DateTime<Utc>,

    #[serde(with = "EdSignatureHex")]
    pub node_signature: Signature,
}

impl LedgerEntry {
    /// Recompute this entry's chain hash from its contents.
    pub fn expected_hash(&self) -> [u8; 32] {
        entry_hash(
            &self.prev_hash,
            self.height,
            &self.event,
            self.tx_id,
            &self.recorded_at,
        )
    }
}

fn entry_hash(
    prev_hash: &[u8; 32],
    height: u64,
    event: &LedgerEvent,
    tx_id: Uuid,
    recorded_at: &DateTime<Utc>,
) -> [u8; 32] {
    hash_canonical(
        "verivote.ledger",
        &(prev_hash, height, event, tx_id, recorded_at),
    )
}

/// Body of a `POST /ledger/append`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AppendRequest {
    pub event: LedgerEvent,

    #[serde(default)]
    pub tx_id: Option<Uuid>,

    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

/// The appended entry plus the node's acknowledgment signature over it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AppendAck {
    pub entry: LedgerEntry,

    #[serde(with = "EdSignatureHex")]
    pub ack_signature: Signature,
}

/// `GET /ledger/head`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LedgerHead {
    pub height: u64,

    #[serde(with = "Bytes32Hex")]
    pub hash: [u8; 32],
}

/// `GET /health`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NodeHealth {
    pub status: String,
    pub role: NodeRole,
    pub entries: u64,
}

/// `GET /ledger/stats`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LedgerStats {
    pub entries: u64,
    pub events_by_type: IndexMap<String, u64>,
}

/// `GET /node`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NodeInfo {
    pub node_id: String,
    pub role: NodeRole,
    pub allowed_event_types: Vec<String>,

    #[serde(with = "EdPublicKeyHex")]
    pub public_key: PublicKey,

    pub head: Option<LedgerHead>,
}

/// A ledger node: one role, one signing key, one hash chain.
///
/// The append path is serialized per node (`&mut self`); the transport
/// that carries the read/append contract is an external collaborator.
#[derive(Serialize, Deserialize)]
pub struct LedgerNode {
    pub node_id: String,
    pub role: NodeRole,

    #[serde(with = "EdPublicKeyHex")]
    pub public_key: PublicKey,

    secret_key: SecretKey,
    write_token: String,

    entries: Vec<LedgerEntry>,

    /// Entries mirrored from peer nodes, deduplicated by tx id.
    mirrored: Vec<LedgerEntry>,
}

impl LedgerNode {
    pub fn new(node_id: impl Into<String>, role: NodeRole, write_token: impl Into<String>) -> Self {
        let (secret_key, public_key) = generate_keypair();
        LedgerNode {
            node_id: node_id.into(),
            role,
            public_key,
            secret_key,
            write_token: write_token.into(),
            entries: Vec::new(),
            mirrored: Vec::new(),
        }
    }

    pub fn write_token(&self) -> &str {
        &self.write_token
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Append a signed event to this node's chain.
    ///
    /// Requires the node's write credential; the event type must route to
    /// this node's role. A repeated `tx_id` is idempotent and re-acks the
    /// existing entry instead of appending.
    pub fn append(
        &mut self,
        token: &str,
        request: AppendRequest,
        now: DateTime<Utc>,
    ) -> Result<AppendAck, ValidationError> {
        if token != self.write_token {
            return Err(ValidationError::WriteTokenInvalid);
        }
        if request.event.role() != self.role {
            return Err(ValidationError::EventRoleMismatch(
                request.event.event_type().to_string(),
            ));
        }

        let tx_id = request.tx_id.unwrap_or_else(Uuid::new_v4);
        if let Some(existing) = self.entries.iter().find(|e| e.tx_id == tx_id) {
            let entry = existing.clone();
            let ack_signature = self.sign(&entry.hash);
            return Ok(AppendAck {
                entry,
                ack_signature,
            });
        }

        let height = self.entries.len() as u64;
        let prev_hash = match self.entries.last() {
            Some(last) => last.hash,
            None => GENESIS_HASH,
        };
        let recorded_at = request.recorded_at.unwrap_or(now);

        let hash = entry_hash(&prev_hash, height, &request.event, tx_id, &recorded_at);
        let node_signature = self.sign(&hash);

        let entry = LedgerEntry {
            height,
            prev_hash,
            hash,
            event: request.event,
            tx_id,
            recorded_at,
            node_signature,
        };
        self.entries.push(entry.clone());

        let ack_signature = self.sign(&entry.hash);
        Ok(AppendAck {
            entry,
            ack_signature,
        })
    }

    fn sign(&self, message: &[u8; 32]) -> Signature {
        let expanded: ExpandedSecretKey = (&self.secret_key).into();
        expanded.sign(message, &self.public_key)
    }

    pub fn head(&self) -> Option<LedgerHead> {
        self.entries.last().map(|entry| LedgerHead {
            height: entry.height,
            hash: entry.hash,
        })
    }

    pub fn health(&self) -> NodeHealth {
        NodeHealth {
            status: "ok".to_string(),
            role: self.role,
            entries: self.entries.len() as u64,
        }
    }

    pub fn stats(&self) -> LedgerStats {
        let mut events_by_type: IndexMap<String, u64> = IndexMap::new();
        for entry in &self.entries {
            *events_by_type
                .entry(entry.event.event_type().to_string())
                .or_insert(0) += 1;
        }
        LedgerStats {
            entries: self.entries.len() as u64,
            events_by_type,
        }
    }

    /// `GET /ledger/entries?from&limit`
    pub fn entries_page(&self, from: u64, limit: usize) -> Vec<LedgerEntry> {
        self.entries
            .iter()
            .skip(from as usize)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            node_id: self.node_id.clone(),
            role: self.role,
            allowed_event_types: self
                .role
                .allowed_event_types()
                .into_iter()
                .map(str::to_string)
                .collect(),
            public_key: self.public_key,
            head: self.head(),
        }
    }

    /// Re-verify the whole chain: recompute every hash, check every link
    /// and every node signature. Any flipped byte in a historical entry
    /// invalidates that entry and all of its successors.
    pub fn verify_chain(&self) -> Result<(), ValidationError> {
        let mut prev_hash = GENESIS_HASH;
        for entry in &self.entries {
            if entry.prev_hash != prev_hash || entry.expected_hash() != entry.hash {
                return Err(ValidationError::ChainBroken(entry.height));
            }
            self.public_key
                .verify_strict(&entry.hash, &entry.node_signature)
                .map_err(|_| ValidationError::ChainSignatureInvalid(entry.height))?;
            prev_hash = entry.hash;
        }
        Ok(())
    }

    /// Accept an entry replicated from a peer node. Idempotent by tx id.
    pub fn receive_replicated(&mut self, entry: LedgerEntry) {
        let seen = self
            .mirrored
            .iter()
            .chain(self.entries.iter())
            .any(|e| e.tx_id == entry.tx_id);
        if !seen {
            self.mirrored.push(entry);
        }
    }

    pub fn mirrored(&self) -> &[LedgerEntry] {
        &self.mirrored
    }
}

/// Delivers ledger entries to peer nodes. The real transport is an
/// external collaborator; tests use an in-memory implementation.
pub trait PeerTransport {
    fn deliver(&mut self, peer_id: &str, entry: &LedgerEntry) -> Result<(), String>;
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PendingReplication {
    pub peer_id: String,
    pub entry: LedgerEntry,
    pub attempts: u32,
}

/// Outcome of one replication flush.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplicationOutcome {
    pub delivered: usize,
    pub failed: usize,
}

/// An explicit, observable replication queue.
///
/// Replication is fire-and-forget with respect to the originating append:
/// a failed delivery never rolls back committed local state. Failures are
/// logged and the item stays queued for a later flush, so delivery is
/// at-least-once; receivers deduplicate by tx id.
#[derive(Serialize, Deserialize, Default)]
pub struct ReplicationQueue {
    pending: Vec<PendingReplication>,
}

impl ReplicationQueue {
    pub fn enqueue(&mut self, peer_ids: &[String], entry: &LedgerEntry) {
        for peer_id in peer_ids {
            self.pending.push(PendingReplication {
                peer_id: peer_id.clone(),
                entry: entry.clone(),
                attempts: 0,
            });
        }
    }

    pub fn pending(&self) -> &[PendingReplication] {
        &self.pending
    }

    pub fn flush<T: PeerTransport>(&mut self, transport: &mut T) -> ReplicationOutcome {
        let mut outcome = ReplicationOutcome::default();
        let mut remaining = Vec::new();

        for mut item in self.pending.drain(..) {
            match transport.deliver(&item.peer_id, &item.entry) {
                Ok(()) => {
                    outcome.delivered += 1;
                }
                Err(reason) => {
                    item.attempts += 1;
                    log::warn!(
                        "verivote: replication to {} failed (attempt {}): {}",
                        item.peer_id,
                        item.attempts,
                        reason
                    );
                    outcome.failed += 1;
                    remaining.push(item);
                }
            }
        }

        self.pending = remaining;
        outcome
    }
}
