//! Eligibility proofs: a Schnorr proof-of-knowledge of the credential
//! secret, bound to a canonical transcript of the cast's public inputs,
//! carried together with the issuer's blind signature over the credential
//! key. Verification requires both to pass; either failure is a hard
//! reject.

use crate::*;
use curve25519_dalek::constants;
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::scalar::Scalar;
use rand::Rng;
use rsa::RSAPublicKey;
use sha2::{Digest, Sha512};
use uuid::Uuid;

/// The public inputs an eligibility proof commits to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EligibilityPublicInputs {
    pub manifest_id: String,
    pub jurisdiction_id: String,
    pub nullifier: Nullifier,
    pub challenge_id: Uuid,

    #[serde(with = "Bytes32Hex")]
    pub challenge_nonce: [u8; 32],
}

impl EligibilityPublicInputs {
    /// Canonical transcript hash binding the public inputs to the
    /// credential public key.
    fn transcript_hash(&self, credential_public: &CredentialPublicKey) -> [u8; 32] {
        hash_canonical("verivote.eligibility", &(self, credential_public))
    }
}

/// A submitted eligibility proof. Ephemeral: one per cast attempt.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EligibilityProof {
    pub public_inputs: EligibilityPublicInputs,
    pub credential_public: CredentialPublicKey,

    #[serde(with = "hex_serde")]
    pub blind_signature: Vec<u8>,

    #[serde(with = "PointHex")]
    pub commitment: CompressedEdwardsY,

    #[serde(with = "ScalarHex")]
    pub response: Scalar,
}

impl EligibilityProof {
    /// Produce a proof-of-knowledge of the credential secret over the
    /// transcript hash: `R = r·B`, `c = H(transcript ‖ R ‖ P)`,
    /// `s = r + c·x`.
    pub fn create(credential: &VoterCredential, public_inputs: EligibilityPublicInputs) -> Self {
        let mut csprng = rand::rngs::OsRng {};
        let mut wide = [0u8; 64];
        csprng.fill(&mut wide[..32]);
        csprng.fill(&mut wide[32..]);
        let r = Scalar::from_bytes_mod_order_wide(&wide);

        let commitment = (&r * &constants::ED25519_BASEPOINT_TABLE).compress();

        let transcript = public_inputs.transcript_hash(&credential.keypair.public);
        let c = proof_challenge(&transcript, &commitment, &credential.keypair.public);

        let response = r + c * credential.keypair.secret;

        EligibilityProof {
            public_inputs,
            credential_public: credential.keypair.public.clone(),
            blind_signature: credential.blind_signature.clone(),
            commitment,
            response,
        }
    }

    /// Verify both independent checks:
    ///
    /// (a) the attached blind signature verifies against the issuer's
    ///     public key (credential authenticity), and
    /// (b) the proof-of-knowledge verifies against the credential public
    ///     key and the recomputed transcript hash.
    ///
    /// Either failure rejects the proof outright; there is no partial
    /// credit.
    pub fn verify(&self, issuer_public: &RSAPublicKey) -> Result<(), ValidationError> {
        verify_credential_signature(issuer_public, &self.credential_public, &self.blind_signature)?;

        let transcript = self.public_inputs.transcript_hash(&self.credential_public);
        let c = proof_challenge(&transcript, &self.commitment, &self.credential_public);

        let commitment = self
            .commitment
            .decompress()
            .ok_or(ValidationError::ProofOfKnowledgeInvalid)?;
        let credential_point = self
            .credential_public
            .0
            .decompress()
            .ok_or(ValidationError::ProofOfKnowledgeInvalid)?;

        // s·B == R + c·P
        let lhs = &self.response * &constants::ED25519_BASEPOINT_TABLE;
        let rhs = commitment + c * credential_point;

        if lhs.compress() != rhs.compress() {
            return Err(ValidationError::ProofOfKnowledgeInvalid);
        }

        Ok(())
    }
}

fn proof_challenge(
    transcript: &[u8; 32],
    commitment: &CompressedEdwardsY,
    credential_public: &CredentialPublicKey,
) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update(b"verivote.eligibility.challenge");
    hasher.update(transcript);
    hasher.update(commitment.as_bytes());
    hasher.update(credential_public.as_bytes());

    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    Scalar::from_bytes_mod_order_wide(&wide)
}
