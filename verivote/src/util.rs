use ed25519_dalek::Keypair;
use ed25519_dalek::PublicKey;
use ed25519_dalek::SecretKey;
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};

pub fn generate_keypair() -> (SecretKey, PublicKey) {
    let mut csprng = rand::rngs::OsRng {};
    let Keypair { public, secret } = Keypair::generate(&mut csprng);
    (secret, public)
}

/// Hash a serializable value under a domain-separation tag.
///
/// Every hash in the protocol (transcripts, nullifiers, leaf hashes,
/// chain hashes, content hashes) goes through this single function:
/// SHA-256 over `domain || 0x00 || canonical-CBOR(value)`.
pub fn hash_canonical<T: Serialize>(domain: &str, value: &T) -> [u8; 32] {
    let serialized =
        serde_cbor::to_vec(value).expect("verivote: unexpected error serializing hash input");

    let mut hasher = Sha256::new();
    hasher.update(domain.as_bytes());
    hasher.update(&[0u8]);
    hasher.update(&serialized);

    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

pub fn random_bytes_32() -> [u8; 32] {
    let mut csprng = rand::rngs::OsRng {};
    let mut bytes = [0u8; 32];
    csprng.fill(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_hash_is_domain_separated() {
        let value = ("hello", 42u32);
        let a = hash_canonical("verivote.test.a", &value);
        let b = hash_canonical("verivote.test.b", &value);
        let a2 = hash_canonical("verivote.test.a", &value);

        assert_eq!(a, a2);
        assert_ne!(a, b);
    }
}
