//! Voter credentialing via RSA-FDH blind signatures.
//!
//! The issuer certifies the voter's credential public key without ever
//! seeing it: the voter full-domain-hashes the key, blinds the digest, the
//! issuer signs the blinded digest, and the voter unblinds. The resulting
//! signature verifies like any other FDH signature, but the issuance event
//! cannot be linked to the key it certified.

use crate::*;
use curve25519_dalek::constants;
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::scalar::Scalar;
use rand::Rng;
use rsa::{RSAPrivateKey, RSAPublicKey};
use rsa_fdh::blind;
use sha2::Sha256;
use uuid::Uuid;

pub const CREDENTIAL_RSA_BITS: usize = 2048;

/// A voter's credential public key: a point on Curve25519.
///
/// Credential keys are direct-scalar keys (like the election encryption
/// keys), so the eligibility proof-of-knowledge can work over the raw
/// scalar.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CredentialPublicKey(#[serde(with = "PointHex")] pub(crate) CompressedEdwardsY);

impl CredentialPublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct CredentialKeypair {
    #[serde(with = "ScalarHex")]
    pub(crate) secret: Scalar,
    pub public: CredentialPublicKey,
}

impl CredentialKeypair {
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng {};
        let mut wide = [0u8; 64];
        csprng.fill(&mut wide[..32]);
        csprng.fill(&mut wide[32..]);

        let secret = Scalar::from_bytes_mod_order_wide(&wide);
        let public = &secret * &constants::ED25519_BASEPOINT_TABLE;

        CredentialKeypair {
            secret,
            public: CredentialPublicKey(public.compress()),
        }
    }
}

/// The registration authority that blind-signs credential keys.
#[derive(Serialize, Deserialize, Clone)]
pub struct CredentialIssuer {
    #[serde(with = "RSAPublicKeyHex")]
    pub public_key: RSAPublicKey,
    secret_key: RSAPrivateKey,
}

impl CredentialIssuer {
    pub fn new(keysize: usize) -> Result<Self, Error> {
        let mut csprng = rand::rngs::OsRng {};
        let secret_key = RSAPrivateKey::new(&mut csprng, keysize)?;
        let public_key = RSAPublicKey::from(&secret_key);

        Ok(CredentialIssuer {
            public_key,
            secret_key,
        })
    }

    /// Sign a blinded digest. The issuer never learns which credential key
    /// it certified.
    pub fn sign_blinded(&self, blinded_digest: &[u8]) -> Result<Vec<u8>, Error> {
        let mut csprng = rand::rngs::OsRng {};
        let signature = blind::sign(&mut csprng, &self.secret_key, blinded_digest)?;
        Ok(signature)
    }
}

/// Voter-held blinding state between the blind and unblind steps.
pub struct BlindingSession {
    digest: Vec<u8>,
    unblinder: Vec<u8>,
    pub blinded_digest: Vec<u8>,
}

/// Start the issuance ceremony: full-domain-hash the credential public key
/// and blind it. The returned session's `blinded_digest` goes to the
/// issuer; the session stays with the voter.
pub fn begin_issuance(
    issuer_public: &RSAPublicKey,
    keypair: &CredentialKeypair,
) -> Result<BlindingSession, Error> {
    let mut csprng = rand::rngs::OsRng {};

    let digest = blind::hash_message::<Sha256, _>(issuer_public, keypair.public.as_bytes())?;
    let (blinded_digest, unblinder) = blind::blind(&mut csprng, issuer_public, &digest);

    Ok(BlindingSession {
        digest,
        unblinder,
        blinded_digest,
    })
}

/// Finish the ceremony: unblind the issuer's signature and self-verify it.
///
/// Self-verification failure is a fatal protocol error. A credential whose
/// authenticity cannot be locally confirmed is never returned, stored, or
/// used.
pub fn finish_issuance(
    issuer_public: &RSAPublicKey,
    keypair: CredentialKeypair,
    session: BlindingSession,
    blind_signature: &[u8],
) -> Result<VoterCredential, Error> {
    let signature = blind::unblind(issuer_public, blind_signature, &session.unblinder);

    blind::verify(issuer_public, &session.digest, &signature)
        .map_err(|_| Error::CredentialSelfCheckFailed)?;

    Ok(VoterCredential {
        credential_id: format!("did:verivote:{}", Uuid::new_v4()),
        keypair,
        blind_signature: signature,
    })
}

/// An issued voter credential: the keypair plus the unblinded issuer
/// signature over its public key.
#[derive(Serialize, Deserialize, Clone)]
pub struct VoterCredential {
    pub credential_id: String,
    pub keypair: CredentialKeypair,

    #[serde(with = "hex_serde")]
    pub blind_signature: Vec<u8>,
}

impl VoterCredential {
    /// Authenticity is exactly "the blind signature verifies against the
    /// issuer public key".
    pub fn verify(&self, issuer_public: &RSAPublicKey) -> Result<(), ValidationError> {
        verify_credential_signature(issuer_public, &self.keypair.public, &self.blind_signature)
    }
}

pub fn verify_credential_signature(
    issuer_public: &RSAPublicKey,
    credential_public: &CredentialPublicKey,
    signature: &[u8],
) -> Result<(), ValidationError> {
    let digest = blind::hash_message::<Sha256, _>(issuer_public, credential_public.as_bytes())
        .map_err(|_| ValidationError::CredentialSignatureInvalid)?;

    blind::verify(issuer_public, &digest, signature)
        .map_err(|_| ValidationError::CredentialSignatureInvalid)
}

/// A one-time-use double-vote detector, derived deterministically from a
/// credential and an election id without revealing the credential holder.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Nullifier(#[serde(with = "Bytes32Hex")] pub [u8; 32]);

impl Nullifier {
    pub fn derive(credential_public: &CredentialPublicKey, election_id: &str) -> Self {
        let hash = hash_canonical("verivote.nullifier", &(credential_public, election_id));
        Nullifier(hash)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl std::fmt::Display for Nullifier {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Small RSA keys keep the tests fast. Never use this size for real.
    const TEST_RSA_BITS: usize = 512;

    fn issue_test_credential(issuer: &CredentialIssuer) -> VoterCredential {
        let keypair = CredentialKeypair::generate();
        let session = begin_issuance(&issuer.public_key, &keypair).unwrap();
        let blind_sig = issuer.sign_blinded(&session.blinded_digest).unwrap();
        finish_issuance(&issuer.public_key, keypair, session, &blind_sig).unwrap()
    }

    #[test]
    fn blind_issuance_round_trip() {
        let issuer = CredentialIssuer::new(TEST_RSA_BITS).unwrap();
        let credential = issue_test_credential(&issuer);

        // Self-verified at issuance, and verifies again on demand
        credential.verify(&issuer.public_key).unwrap();

        // A different issuer's key rejects it
        let other_issuer = CredentialIssuer::new(TEST_RSA_BITS).unwrap();
        assert!(credential.verify(&other_issuer.public_key).is_err());
    }

    #[test]
    fn tampered_credential_is_invalid() {
        let issuer = CredentialIssuer::new(TEST_RSA_BITS).unwrap();
        let mut credential = issue_test_credential(&issuer);

        // Tamper with the signature
        credential.blind_signature[0] ^= 0x01;
        assert!(credential.verify(&issuer.public_key).is_err());
        credential.blind_signature[0] ^= 0x01;

        // Swap in a different credential key
        credential.keypair = CredentialKeypair::generate();
        assert!(credential.verify(&issuer.public_key).is_err());
    }

    #[test]
    fn issuance_rejects_wrong_signature() {
        let issuer = CredentialIssuer::new(TEST_RSA_BITS).unwrap();
        let keypair = CredentialKeypair::generate();
        let session = begin_issuance(&issuer.public_key, &keypair).unwrap();

        let mut blind_sig = issuer.sign_blinded(&session.blinded_digest).unwrap();
        blind_sig[0] ^= 0x01;

        let result = finish_issuance(&issuer.public_key, keypair, session, &blind_sig);
        assert!(matches!(result, Err(Error::CredentialSelfCheckFailed)));
    }

    #[test]
    fn nullifier_is_deterministic_and_input_sensitive() {
        let keypair_a = CredentialKeypair::generate();
        let keypair_b = CredentialKeypair::generate();

        let n1 = Nullifier::derive(&keypair_a.public, "election-2024");
        let n2 = Nullifier::derive(&keypair_a.public, "election-2024");
        assert_eq!(n1, n2);

        // Different credential or different election changes the nullifier
        assert_ne!(n1, Nullifier::derive(&keypair_b.public, "election-2024"));
        assert_ne!(n1, Nullifier::derive(&keypair_a.public, "election-2025"));
    }
}
