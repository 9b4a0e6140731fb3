//! The gateway's state aggregate and its persistence contract.
//!
//! All mutable protocol state lives in one `ElectionState` value, so the
//! cast path's check-then-mutate sequence is atomic under a single mutable
//! borrow. Persistence is a plain key-value contract; the aggregate is
//! saved and loaded as one CBOR document.

use crate::*;
use ed25519_dalek::ExpandedSecretKey;
use ed25519_dalek::PublicKey;
use ed25519_dalek::SecretKey;
use ed25519_dalek::Signature;
use indexmap::{IndexMap, IndexSet};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Cached outcome of a cast request, keyed by its request id.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IdempotencyRecord {
    #[serde(with = "Bytes32Hex")]
    pub content_hash: [u8; 32],

    pub receipt: CastReceipt,
}

/// The three ledger nodes, one per role.
#[derive(Serialize, Deserialize)]
pub struct LedgerSet {
    pub governance: LedgerNode,
    pub balloting: LedgerNode,
    pub oversight: LedgerNode,
}

impl LedgerSet {
    pub fn new() -> Self {
        LedgerSet {
            governance: LedgerNode::new(
                "ledger-governance",
                NodeRole::Governance,
                hex::encode(random_bytes_32()),
            ),
            balloting: LedgerNode::new(
                "ledger-balloting",
                NodeRole::Balloting,
                hex::encode(random_bytes_32()),
            ),
            oversight: LedgerNode::new(
                "ledger-oversight",
                NodeRole::Oversight,
                hex::encode(random_bytes_32()),
            ),
        }
    }

    pub fn node(&self, role: NodeRole) -> &LedgerNode {
        match role {
            NodeRole::Governance => &self.governance,
            NodeRole::Balloting => &self.balloting,
            NodeRole::Oversight => &self.oversight,
        }
    }

    pub fn node_mut(&mut self, role: NodeRole) -> &mut LedgerNode {
        match role {
            NodeRole::Governance => &mut self.governance,
            NodeRole::Balloting => &mut self.balloting,
            NodeRole::Oversight => &mut self.oversight,
        }
    }

    /// Append an event to the node its type routes to, using that node's
    /// own write credential.
    pub fn record(
        &mut self,
        event: LedgerEvent,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<AppendAck, ValidationError> {
        let node = self.node_mut(event.role());
        let token = node.write_token().to_string();
        node.append(
            &token,
            AppendRequest {
                event,
                tx_id: None,
                recorded_at: None,
            },
            now,
        )
    }
}

/// Everything the gateway knows about one running election.
#[derive(Serialize, Deserialize)]
pub struct ElectionState {
    pub manifest: SignedManifest,

    #[serde(with = "EdPublicKeyHex")]
    pub gateway_public: PublicKey,
    gateway_secret: SecretKey,

    pub challenge_issuer: ChallengeIssuer,
    pub challenges: IndexMap<Uuid, ChallengeRecord>,

    pub nullifiers: IndexSet<Nullifier>,
    pub idempotency: IndexMap<Uuid, IdempotencyRecord>,

    pub board: BulletinBoard,
    pub tree_head_signer: TreeHeadSigner,
    pub tree_heads: Vec<SignedTreeHead>,

    pub ledgers: LedgerSet,
    pub replication: ReplicationQueue,
    pub peer_ids: Vec<String>,

    pub trustee_shares: Vec<TrusteeShareRecord>,
    pub spoiled_ballots: IndexSet<Uuid>,
    pub fraud_cases: IndexMap<Uuid, FraudCase>,

    pub tally: Option<Tally>,
}

impl ElectionState {
    pub fn new(manifest: SignedManifest, challenge_issuer: ChallengeIssuer) -> Self {
        let (gateway_secret, gateway_public) = generate_keypair();

        ElectionState {
            manifest,
            gateway_public,
            gateway_secret,
            challenge_issuer,
            challenges: IndexMap::new(),
            nullifiers: IndexSet::new(),
            idempotency: IndexMap::new(),
            board: BulletinBoard::default(),
            tree_head_signer: TreeHeadSigner::new("board-gateway"),
            tree_heads: Vec::new(),
            ledgers: LedgerSet::new(),
            replication: ReplicationQueue::default(),
            peer_ids: Vec::new(),
            trustee_shares: Vec::new(),
            spoiled_ballots: IndexSet::new(),
            fraud_cases: IndexMap::new(),
            tally: None,
        }
    }

    /// Issue a fresh challenge and record it unused.
    pub fn issue_challenge(&mut self, now: chrono::DateTime<chrono::Utc>) -> Challenge {
        let challenge = self.challenge_issuer.issue(now);
        self.challenges
            .insert(challenge.id, ChallengeRecord::new(challenge.clone()));
        challenge
    }

    /// Anchor a completed issuance ceremony in the balloting ledger.
    /// Only the opaque ceremony id is recorded; the certified key never
    /// touches the ledger.
    pub fn record_credential_issued(
        &mut self,
        ceremony_id: Uuid,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<AppendAck, ValidationError> {
        self.ledgers.record(
            LedgerEvent::CredentialIssued(CredentialIssued { ceremony_id }),
            now,
        )
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        let expanded: ExpandedSecretKey = (&self.gateway_secret).into();
        expanded.sign(message, &self.gateway_public)
    }

    /// Record a spoiled ballot so the tally excludes it by construction.
    pub fn record_spoiled(&mut self, ballot_id: Uuid) {
        self.spoiled_ballots.insert(ballot_id);
    }

    pub fn latest_tree_head(&self) -> Option<&SignedTreeHead> {
        self.tree_heads.last()
    }
}

/// The persistence contract: opaque bytes under string keys. The concrete
/// database behind it is an external collaborator.
pub trait KvStore {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn put(&mut self, key: &str, value: Vec<u8>);

    /// Load an election state saved under `key`.
    fn load_election(&self, key: &str) -> Result<ElectionState, Error> {
        let bytes = self
            .get(key)
            .ok_or_else(|| Error::StateNotFound(key.to_string()))?;
        let state = serde_cbor::from_slice(&bytes)?;
        Ok(state)
    }

    /// Save an election state under `key` as a single CBOR document.
    fn save_election(&mut self, key: &str, state: &ElectionState) -> Result<(), Error> {
        let bytes = serde_cbor::to_vec(state)?;
        self.put(key, bytes);
        Ok(())
    }
}

/// A simple store that uses an in-memory BTreeMap
#[derive(Default, Clone)]
pub struct MemStore {
    inner: BTreeMap<String, Vec<u8>>,
}

impl KvStore for MemStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: Vec<u8>) {
        self.inner.insert(key.to_string(), value);
    }
}
