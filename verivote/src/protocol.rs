//! Cast, verify, and tally orchestration over the state aggregate.
//!
//! The cast path runs every check before any mutation: a rejected request
//! has zero server-side effects, and an identical retry is answered from
//! the idempotency cache.

use crate::*;
use chrono::{DateTime, Utc};
use ed25519_dalek::Signature;
use uuid::Uuid;

/// A complete cast submission.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CastRequest {
    pub request_id: Uuid,
    pub manifest_id: String,
    pub challenge_id: Uuid,
    pub proof: EligibilityProof,
    pub ballot: EncryptedBallot,
}

impl CastRequest {
    /// Content binding for idempotency: the same request id must carry the
    /// same content on every retry.
    pub fn content_hash(&self) -> [u8; 32] {
        hash_canonical("verivote.cast", self)
    }

    /// Parse a request from its JSON wire form.
    pub fn from_json(bytes: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Where the cast landed in the ledger.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LedgerAnchor {
    pub role: NodeRole,
    pub height: u64,

    #[serde(with = "Bytes32Hex")]
    pub entry_hash: [u8; 32],
}

/// The signed acknowledgment a voter takes home.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CastReceipt {
    pub ballot_id: Uuid,
    pub leaf_index: u64,

    #[serde(with = "Bytes32Hex")]
    pub leaf_hash: [u8; 32],

    pub tree_head: SignedTreeHead,
    pub ledger_anchor: LedgerAnchor,

    #[serde(with = "EdSignatureHex")]
    pub signature: Signature,
}

// The signed portion of a receipt
#[derive(Serialize)]
struct ReceiptPackage<'a> {
    ballot_id: &'a Uuid,
    leaf_index: u64,
    leaf_hash: &'a [u8; 32],
    tree_size: u64,
    root_hash: &'a [u8; 32],
    anchor_height: u64,
    anchor_hash: &'a [u8; 32],
}

impl CastReceipt {
    fn signing_hash(&self) -> [u8; 32] {
        let package = ReceiptPackage {
            ballot_id: &self.ballot_id,
            leaf_index: self.leaf_index,
            leaf_hash: &self.leaf_hash,
            tree_size: self.tree_head.tree_size,
            root_hash: &self.tree_head.root_hash,
            anchor_height: self.ledger_anchor.height,
            anchor_hash: &self.ledger_anchor.entry_hash,
        };
        hash_canonical("verivote.receipt", &package)
    }

    pub fn verify(&self, gateway_public: &ed25519_dalek::PublicKey) -> Result<(), ValidationError> {
        gateway_public
            .verify_strict(&self.signing_hash(), &self.signature)
            .map_err(|_| ValidationError::ReceiptSignatureInvalid)
    }
}

/// Accept or reject a cast request.
///
/// Check order: idempotency, manifest, challenge, proof, nullifier,
/// ballot. All checks precede all mutations; a rejection leaves the state
/// untouched. On success the ballot is appended to the board, a new tree
/// head is signed, the challenge and nullifier are consumed, the cast is
/// anchored in the balloting ledger, and the signed receipt is cached
/// under the request id.
pub fn cast(
    state: &mut ElectionState,
    request: &CastRequest,
    now: DateTime<Utc>,
) -> Result<CastReceipt, Rejection> {
    let content_hash = request.content_hash();

    // Idempotency: an exact retry gets the cached receipt back
    if let Some(record) = state.idempotency.get(&request.request_id) {
        if record.content_hash == content_hash {
            return Ok(record.receipt.clone());
        }
        return Err(Rejection::new(
            RejectionCode::IdempotencyMismatch,
            "request id was already used with different content",
        ));
    }

    // Manifest binding and voting window
    if request.manifest_id != state.manifest.id {
        return Err(Rejection::new(
            RejectionCode::BadManifest,
            "request references an unknown manifest",
        ));
    }
    if !state.manifest.window_contains(now) {
        return Err(Rejection::new(
            RejectionCode::BadManifest,
            "voting window is closed",
        ));
    }

    // Challenge: must exist, be fresh, and be unused
    let challenge = match state.challenges.get(&request.challenge_id) {
        Some(record) => {
            if record.used {
                return Err(Rejection::new(
                    RejectionCode::ChallengeExpired,
                    "challenge was already consumed",
                ));
            }
            if record.challenge.is_expired(now) {
                return Err(Rejection::new(
                    RejectionCode::ChallengeExpired,
                    "challenge has expired",
                ));
            }
            record.challenge.clone()
        }
        None => {
            return Err(Rejection::new(
                RejectionCode::ChallengeExpired,
                "challenge is unknown",
            ));
        }
    };

    // Proof: transcript must bind this manifest and this challenge, and
    // both proof checks must pass
    let inputs = &request.proof.public_inputs;
    if inputs.manifest_id != state.manifest.id
        || inputs.jurisdiction_id != state.manifest.jurisdiction_id
        || inputs.challenge_id != challenge.id
        || inputs.challenge_nonce != challenge.nonce
    {
        return Err(Rejection::new(
            RejectionCode::ProofInvalid,
            "proof transcript does not bind this manifest and challenge",
        ));
    }
    if request
        .proof
        .verify(&state.manifest.issuer_public_key)
        .is_err()
    {
        return Err(Rejection::new(
            RejectionCode::ProofInvalid,
            "eligibility proof failed verification",
        ));
    }

    // Nullifier: one cast per credential per election
    if state.nullifiers.contains(&inputs.nullifier) {
        return Err(Rejection::new(
            RejectionCode::NullifierUsed,
            "a ballot was already cast with this credential",
        ));
    }

    // Ballot: bound to this manifest, hash binding intact, not spoiled
    if request.ballot.manifest_id != state.manifest.id {
        return Err(Rejection::new(
            RejectionCode::BallotInvalid,
            "ballot references a different manifest",
        ));
    }
    if request.ballot.expected_hash() != request.ballot.ballot_hash {
        return Err(Rejection::new(
            RejectionCode::BallotInvalid,
            "ballot hash binding does not match the ciphertext",
        ));
    }
    if state.spoiled_ballots.contains(&request.ballot.ballot_id) {
        return Err(Rejection::new(
            RejectionCode::BallotInvalid,
            "ballot was spoiled and cannot be cast",
        ));
    }

    let payload = match serde_cbor::to_vec(&request.ballot) {
        Ok(payload) => payload,
        Err(_) => {
            return Err(Rejection::new(
                RejectionCode::GatewayOverloaded,
                "failed to serialize ballot for the bulletin board",
            ));
        }
    };

    // All checks passed: mutate
    let (leaf_index, leaf_hash) = state.board.append(payload);
    let tree_head = state.tree_head_signer.sign_tree_head(&state.board, now);
    state.tree_heads.push(tree_head.clone());

    if let Some(record) = state.challenges.get_mut(&request.challenge_id) {
        record.used = true;
    }
    state.nullifiers.insert(inputs.nullifier.clone());

    let ack = match state.ledgers.record(
        LedgerEvent::BallotCast(BallotCast {
            ballot_id: request.ballot.ballot_id,
            leaf_index,
            leaf_hash,
        }),
        now,
    ) {
        Ok(ack) => ack,
        Err(err) => {
            return Err(Rejection::new(
                RejectionCode::GatewayOverloaded,
                format!("ledger append failed: {}", err),
            ));
        }
    };
    let peer_ids = state.peer_ids.clone();
    state.replication.enqueue(&peer_ids, &ack.entry);

    let ledger_anchor = LedgerAnchor {
        role: NodeRole::Balloting,
        height: ack.entry.height,
        entry_hash: ack.entry.hash,
    };

    let package = ReceiptPackage {
        ballot_id: &request.ballot.ballot_id,
        leaf_index,
        leaf_hash: &leaf_hash,
        tree_size: tree_head.tree_size,
        root_hash: &tree_head.root_hash,
        anchor_height: ledger_anchor.height,
        anchor_hash: &ledger_anchor.entry_hash,
    };
    let signature = state.sign(&hash_canonical("verivote.receipt", &package));

    let receipt = CastReceipt {
        ballot_id: request.ballot.ballot_id,
        leaf_index,
        leaf_hash,
        tree_head,
        ledger_anchor,
        signature,
    };

    state.idempotency.insert(
        request.request_id,
        IdempotencyRecord {
            content_hash,
            receipt: receipt.clone(),
        },
    );

    Ok(receipt)
}

/// Independent verification sub-checks for one receipt. Each check passes
/// or fails on its own; a caller sees exactly which binding broke.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VerificationReport {
    pub receipt_signature: bool,
    pub ballot_hash: bool,
    pub tree_head_signature: bool,
    pub inclusion: bool,
    pub ledger_anchor: bool,
}

impl VerificationReport {
    pub fn all_passed(&self) -> bool {
        self.receipt_signature
            && self.ballot_hash
            && self.tree_head_signature
            && self.inclusion
            && self.ledger_anchor
    }
}

/// Re-check a receipt against the current state: signatures, the hash
/// binding from ciphertext to leaf, Merkle inclusion under the receipt's
/// tree head, and the ledger anchor.
pub fn verify_cast(
    state: &ElectionState,
    receipt: &CastReceipt,
    ballot: &EncryptedBallot,
) -> VerificationReport {
    let receipt_signature = receipt.verify(&state.gateway_public).is_ok();

    let ballot_hash = ballot.expected_hash() == ballot.ballot_hash
        && match serde_cbor::to_vec(ballot) {
            Ok(payload) => hash_canonical("verivote.leaf", &payload) == receipt.leaf_hash,
            Err(_) => false,
        };

    let tree_head_signature = receipt
        .tree_head
        .verify(&state.tree_head_signer.public_key)
        .is_ok();

    let inclusion = match state
        .board
        .inclusion_proof_at(&receipt.leaf_hash, receipt.tree_head.tree_size)
    {
        Ok(proof) => {
            proof.leaf_index == receipt.leaf_index
                && verify_inclusion(
                    &proof,
                    &receipt.leaf_hash,
                    &receipt.tree_head,
                    &state.tree_head_signer.public_key,
                )
                .is_ok()
        }
        Err(_) => false,
    };

    let ledger_anchor = state
        .ledgers
        .node(receipt.ledger_anchor.role)
        .entries()
        .get(receipt.ledger_anchor.height as usize)
        .map(|entry| entry.hash == receipt.ledger_anchor.entry_hash)
        .unwrap_or(false);

    VerificationReport {
        receipt_signature,
        ballot_hash,
        tree_head_signature,
        inclusion,
        ledger_anchor,
    }
}

/// Close the election and produce the signed tally.
///
/// Reconstructs the election secret from the supplied trustee shares
/// (failing closed below threshold or if the recovered key does not match
/// the manifest, with nothing published), then publishes the closing tree
/// head, decrypts every non-spoiled ballot covered by the closing root,
/// and signs the aggregated totals.
/// A second call is an error; a tally is never recomputed silently.
pub fn close_and_tally(
    state: &mut ElectionState,
    shares: &[TrusteeShareRecord],
    now: DateTime<Utc>,
) -> Result<Tally, Error> {
    if state.tally.is_some() {
        return Err(Error::TallyAlreadyPublished);
    }

    // Key recovery runs before any mutation: a failed tally publishes no
    // closing head and writes no ledger entry
    let secret = recover_secret(state.manifest.trustee_threshold, shares)?;
    if secret.public_key() != state.manifest.election_public_key {
        return Err(Error::SecretRecoveryFailed);
    }

    let closing_head = state.tree_head_signer.sign_tree_head(&state.board, now);
    let closing_root = closing_head.root_hash;
    let closing_size = closing_head.tree_size;
    state.tree_heads.push(closing_head);

    state.ledgers.record(
        LedgerEvent::TreeHeadPublished(TreeHeadPublished {
            tree_size: closing_size,
            root_hash: closing_root,
        }),
        now,
    )?;

    let mut plaintexts = Vec::new();
    for leaf in &state.board.leaves()[..closing_size as usize] {
        let encrypted: EncryptedBallot = serde_cbor::from_slice(&leaf.payload)?;
        if state.spoiled_ballots.contains(&encrypted.ballot_id) {
            continue;
        }
        plaintexts.push(decrypt_ballot(&secret, &encrypted)?);
    }

    let tally = Tally::assemble(
        state.manifest.id.clone(),
        closing_root,
        &plaintexts,
        now,
        |hash| state.sign(hash),
    );

    state.ledgers.record(
        LedgerEvent::TallyPublished(TallyPublished {
            manifest_id: tally.manifest_id.clone(),
            ballot_count: tally.ballot_count,
            closing_root,
        }),
        now,
    )?;

    state.tally = Some(tally.clone());
    Ok(tally)
}
