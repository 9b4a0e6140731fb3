//! The public bulletin board: an append-only Merkle log with signed tree
//! heads and inclusion proofs.
//!
//! Leaf hashes are domain-separated canonical hashes of the payload;
//! interior nodes are `SHA-256(0x01 || left || right)`. An unpaired node
//! at any level is promoted unchanged to the next level (RFC 6962
//! convention). Proofs are not portable to trees using the
//! duplicate-last-leaf convention.

use crate::*;
use chrono::{DateTime, Utc};
use ed25519_dalek::ExpandedSecretKey;
use ed25519_dalek::PublicKey;
use ed25519_dalek::SecretKey;
use ed25519_dalek::Signature;
use sha2::{Digest, Sha256};

/// Root hash of the empty tree.
pub const EMPTY_ROOT: [u8; 32] = [0u8; 32];

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BulletinBoardLeaf {
    pub index: u64,

    #[serde(with = "Bytes32Hex")]
    pub leaf_hash: [u8; 32],

    #[serde(with = "hex_serde")]
    pub payload: Vec<u8>,
}

/// The append-only Merkle log. Appends take `&mut self`: root
/// recomputation depends on total append order, so each board instance is
/// single-writer by construction.
#[derive(Serialize, Deserialize, Default, Clone)]
pub struct BulletinBoard {
    leaves: Vec<BulletinBoardLeaf>,
}

impl BulletinBoard {
    pub fn size(&self) -> u64 {
        self.leaves.len() as u64
    }

    pub fn leaves(&self) -> &[BulletinBoardLeaf] {
        &self.leaves
    }

    /// Append a payload; returns the new leaf's index and hash.
    pub fn append(&mut self, payload: Vec<u8>) -> (u64, [u8; 32]) {
        let leaf_hash = hash_canonical("verivote.leaf", &payload);
        let index = self.leaves.len() as u64;

        self.leaves.push(BulletinBoardLeaf {
            index,
            leaf_hash,
            payload,
        });

        (index, leaf_hash)
    }

    /// Recompute the root over the first `tree_size` leaves.
    pub fn root_at(&self, tree_size: u64) -> [u8; 32] {
        let tree_size = tree_size as usize;
        if tree_size == 0 || tree_size > self.leaves.len() {
            return EMPTY_ROOT;
        }

        let mut level: Vec<[u8; 32]> = self.leaves[..tree_size]
            .iter()
            .map(|leaf| leaf.leaf_hash)
            .collect();

        while level.len() > 1 {
            let mut next = Vec::with_capacity((level.len() + 1) / 2);
            for pair in level.chunks(2) {
                if pair.len() == 2 {
                    next.push(node_hash(&pair[0], &pair[1]));
                } else {
                    // Unpaired node: promoted unchanged
                    next.push(pair[0]);
                }
            }
            level = next;
        }

        level[0]
    }

    pub fn root(&self) -> [u8; 32] {
        self.root_at(self.size())
    }

    pub fn find_leaf(&self, leaf_hash: &[u8; 32]) -> Option<&BulletinBoardLeaf> {
        self.leaves.iter().find(|leaf| &leaf.leaf_hash == leaf_hash)
    }

    /// Build the sibling path from a leaf to the root at the current tree
    /// size. Proof generation is a read and may run concurrently against a
    /// captured tree head.
    pub fn inclusion_proof(&self, leaf_hash: &[u8; 32]) -> Result<InclusionProof, Error> {
        self.inclusion_proof_at(leaf_hash, self.size())
    }

    /// Build the sibling path against a historical tree size, for checking
    /// against an earlier signed tree head.
    pub fn inclusion_proof_at(
        &self,
        leaf_hash: &[u8; 32],
        tree_size: u64,
    ) -> Result<InclusionProof, Error> {
        let leaf = self.find_leaf(leaf_hash).ok_or(Error::LeafNotFound)?;
        if tree_size > self.size() || leaf.index >= tree_size {
            return Err(Error::LeafNotFound);
        }

        let mut path = Vec::new();
        let mut index = leaf.index as usize;
        let mut level: Vec<[u8; 32]> = self.leaves[..tree_size as usize]
            .iter()
            .map(|l| l.leaf_hash)
            .collect();

        while level.len() > 1 {
            let sibling = index ^ 1;
            if sibling < level.len() {
                path.push(ProofNode {
                    hash: level[sibling],
                    is_left: sibling < index,
                });
            }
            // Unpaired nodes are promoted, so the parent index is always
            // index / 2 in this convention
            index /= 2;

            let mut next = Vec::with_capacity((level.len() + 1) / 2);
            for pair in level.chunks(2) {
                if pair.len() == 2 {
                    next.push(node_hash(&pair[0], &pair[1]));
                } else {
                    next.push(pair[0]);
                }
            }
            level = next;
        }

        Ok(InclusionProof {
            leaf_index: leaf.index,
            tree_size,
            path,
        })
    }
}

fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(&[1u8]);
    hasher.update(left);
    hasher.update(right);

    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// One step of a sibling path, leaf to root.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProofNode {
    #[serde(with = "Bytes32Hex")]
    pub hash: [u8; 32],

    /// Whether the sibling sits to the left of the running hash.
    pub is_left: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InclusionProof {
    pub leaf_index: u64,
    pub tree_size: u64,
    pub path: Vec<ProofNode>,
}

/// A signed commitment to the board's size and root at a point in time.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SignedTreeHead {
    pub tree_size: u64,

    #[serde(with = "Bytes32Hex")]
    pub root_hash: [u8; 32],

    pub timestamp: DateTime<Utc>,
    pub signer_id: String,

    #[serde(with = "EdSignatureHex")]
    pub signature: Signature,
}

// The signed portion of a tree head
#[derive(Serialize)]
struct TreeHeadPackage<'a> {
    tree_size: u64,
    root_hash: &'a [u8; 32],
    timestamp: &'a DateTime<Utc>,
    signer_id: &'a str,
}

impl SignedTreeHead {
    pub fn verify(&self, signer_public: &PublicKey) -> Result<(), ValidationError> {
        let package = TreeHeadPackage {
            tree_size: self.tree_size,
            root_hash: &self.root_hash,
            timestamp: &self.timestamp,
            signer_id: &self.signer_id,
        };
        let hash = hash_canonical("verivote.sth", &package);

        signer_public
            .verify_strict(&hash, &self.signature)
            .map_err(|_| ValidationError::TreeHeadSignatureInvalid)
    }
}

/// Holds the board's tree-head signing key.
#[derive(Serialize, Deserialize)]
pub struct TreeHeadSigner {
    pub signer_id: String,

    #[serde(with = "EdPublicKeyHex")]
    pub public_key: PublicKey,

    secret_key: SecretKey,
}

impl TreeHeadSigner {
    pub fn new(signer_id: impl Into<String>) -> Self {
        let (secret_key, public_key) = generate_keypair();
        TreeHeadSigner {
            signer_id: signer_id.into(),
            public_key,
            secret_key,
        }
    }

    pub fn sign_tree_head(&self, board: &BulletinBoard, now: DateTime<Utc>) -> SignedTreeHead {
        let tree_size = board.size();
        let root_hash = board.root();

        let package = TreeHeadPackage {
            tree_size,
            root_hash: &root_hash,
            timestamp: &now,
            signer_id: &self.signer_id,
        };
        let hash = hash_canonical("verivote.sth", &package);

        let expanded: ExpandedSecretKey = (&self.secret_key).into();
        let signature = expanded.sign(&hash, &self.public_key);

        SignedTreeHead {
            tree_size,
            root_hash,
            timestamp: now,
            signer_id: self.signer_id.clone(),
            signature,
        }
    }
}

/// Verify an inclusion proof against a signed tree head.
///
/// The tree-head signature is verified first and is mandatory: an
/// inclusion proof checked against an unauthenticated root proves
/// nothing.
pub fn verify_inclusion(
    proof: &InclusionProof,
    leaf_hash: &[u8; 32],
    tree_head: &SignedTreeHead,
    signer_public: &PublicKey,
) -> Result<(), ValidationError> {
    tree_head.verify(signer_public)?;

    if proof.tree_size != tree_head.tree_size {
        return Err(ValidationError::InclusionProofSizeMismatch);
    }
    if proof.leaf_index >= proof.tree_size {
        return Err(ValidationError::InclusionProofInvalid);
    }

    // Replay the level widths implied by the tree size. At each level the
    // claimed leaf index either pairs with a sibling (one path node, whose
    // side the index determines) or sits unpaired and is promoted. A path
    // whose shape or directions disagree with the claimed index is
    // rejected before the root comparison.
    let mut running = *leaf_hash;
    let mut index = proof.leaf_index;
    let mut width = proof.tree_size;
    let mut path = proof.path.iter();

    while width > 1 {
        if index == width - 1 && width % 2 == 1 {
            // Unpaired node: promoted, no sibling at this level
        } else {
            let node = path
                .next()
                .ok_or(ValidationError::InclusionProofInvalid)?;
            let sibling_is_left = index % 2 == 1;
            if node.is_left != sibling_is_left {
                return Err(ValidationError::InclusionProofInvalid);
            }
            running = if sibling_is_left {
                node_hash(&node.hash, &running)
            } else {
                node_hash(&running, &node.hash)
            };
        }
        index /= 2;
        width = (width + 1) / 2;
    }

    if path.next().is_some() {
        return Err(ValidationError::InclusionProofInvalid);
    }
    if running != tree_head.root_hash {
        return Err(ValidationError::InclusionProofInvalid);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inclusion_proofs_verify_for_every_leaf() {
        let signer = TreeHeadSigner::new("board-1");
        let mut board = BulletinBoard::default();

        // Odd and even sizes both exercise the unpaired-node rule
        for n in 0..7u8 {
            board.append(vec![n]);
        }
        let sth = signer.sign_tree_head(&board, Utc::now());

        for leaf in board.leaves() {
            let proof = board.inclusion_proof(&leaf.leaf_hash).unwrap();
            verify_inclusion(&proof, &leaf.leaf_hash, &sth, &signer.public_key).unwrap();
        }
    }

    #[test]
    fn proof_fails_against_forged_root_or_wrong_size() {
        let signer = TreeHeadSigner::new("board-1");
        let mut board = BulletinBoard::default();
        for n in 0..5u8 {
            board.append(vec![n]);
        }

        let leaf_hash = board.leaves()[2].leaf_hash;
        let proof = board.inclusion_proof(&leaf_hash).unwrap();
        let sth = signer.sign_tree_head(&board, Utc::now());

        // Forged root: re-signed by an attacker key fails the mandatory
        // signature check
        let attacker = TreeHeadSigner::new("board-1");
        let forged = attacker.sign_tree_head(&board, Utc::now());
        assert!(verify_inclusion(&proof, &leaf_hash, &forged, &signer.public_key).is_err());

        // Tampered root under the honest signer's key fails too
        let mut tampered = sth.clone();
        tampered.root_hash[0] ^= 0x01;
        assert!(verify_inclusion(&proof, &leaf_hash, &tampered, &signer.public_key).is_err());

        // Mismatched size: board grew after the proof was captured
        board.append(vec![5]);
        let newer_sth = signer.sign_tree_head(&board, Utc::now());
        assert!(matches!(
            verify_inclusion(&proof, &leaf_hash, &newer_sth, &signer.public_key),
            Err(ValidationError::InclusionProofSizeMismatch)
        ));
    }

    #[test]
    fn proof_must_match_its_claimed_leaf_index() {
        let signer = TreeHeadSigner::new("board-1");
        let mut board = BulletinBoard::default();
        for n in 0..6u8 {
            board.append(vec![n]);
        }
        let sth = signer.sign_tree_head(&board, Utc::now());

        let leaf_hash = board.leaves()[2].leaf_hash;
        let proof = board.inclusion_proof(&leaf_hash).unwrap();
        verify_inclusion(&proof, &leaf_hash, &sth, &signer.public_key).unwrap();

        // A proof claiming a different position is rejected even with an
        // otherwise intact path
        let mut moved = proof.clone();
        moved.leaf_index = 3;
        assert!(matches!(
            verify_inclusion(&moved, &leaf_hash, &sth, &signer.public_key),
            Err(ValidationError::InclusionProofInvalid)
        ));

        // Flipped direction flags disagree with the index and are rejected
        let mut flipped = proof.clone();
        flipped.path[0].is_left = !flipped.path[0].is_left;
        assert!(matches!(
            verify_inclusion(&flipped, &leaf_hash, &sth, &signer.public_key),
            Err(ValidationError::InclusionProofInvalid)
        ));

        // A truncated path no longer matches the shape the index implies
        let mut short = proof.clone();
        short.path.pop();
        assert!(matches!(
            verify_inclusion(&short, &leaf_hash, &sth, &signer.public_key),
            Err(ValidationError::InclusionProofInvalid)
        ));
    }

    #[test]
    fn root_changes_with_every_append() {
        let mut board = BulletinBoard::default();
        assert_eq!(board.root(), EMPTY_ROOT);

        let mut roots = vec![];
        for n in 0..4u8 {
            board.append(vec![n]);
            roots.push(board.root());
        }

        for window in roots.windows(2) {
            assert_ne!(window[0], window[1]);
        }

        // Historical roots are recomputable
        assert_eq!(board.root_at(3), roots[2]);
    }

    #[test]
    fn unknown_leaf_has_no_proof() {
        let board = BulletinBoard::default();
        assert!(board.inclusion_proof(&[7u8; 32]).is_err());
    }
}
