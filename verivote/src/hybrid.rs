//! Ephemeral-key hybrid encryption on Curve25519.
//!
//! Ballots are encrypted under a fresh random AES-256-GCM key; that key is
//! wrapped to the election public key with an ephemeral-scalar key
//! agreement (shared point -> HKDF-SHA256 -> AES-256-GCM). The election
//! keypair is a direct-scalar keypair: the secret scalar is used as-is for
//! key agreement and must never be used for signing.

use crate::*;
use aes_gcm::aead::{Aead, NewAead};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use curve25519_dalek::constants;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use hkdf::Hkdf;
use rand::Rng;
use sha2::Sha256;

pub const AES_IV_LENGTH: usize = 12;
pub const AES_KEY_LENGTH: usize = 32;

pub type AesKey = [u8; AES_KEY_LENGTH];
pub type AesIv = [u8; AES_IV_LENGTH];

/// The election encryption secret: a canonical Curve25519 scalar.
///
/// This is the value that is Shamir-split across trustees. It is only ever
/// reconstructed at tally time.
#[derive(Serialize, Deserialize, Clone)]
pub struct ElectionSecretKey(#[serde(with = "ScalarHex")] pub(crate) Scalar);

impl ElectionSecretKey {
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Rebuild a secret key from reconstructed share bytes.
    ///
    /// Fails if the bytes are not a canonical scalar, which also catches
    /// most corrupted-share reconstructions.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != 32 {
            return Err(Error::SecretRecoveryBadScalar);
        }
        let mut array = [0u8; 32];
        array.copy_from_slice(bytes);

        match Scalar::from_canonical_bytes(array) {
            Some(scalar) => Ok(ElectionSecretKey(scalar)),
            None => Err(Error::SecretRecoveryBadScalar),
        }
    }

    pub fn public_key(&self) -> ElectionPublicKey {
        let point = &self.0 * &constants::ED25519_BASEPOINT_TABLE;
        ElectionPublicKey(point.compress())
    }
}

/// The election public key ballots are wrapped to.
///
/// This key is only for key agreement, never for signing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ElectionPublicKey(#[serde(with = "PointHex")] pub(crate) CompressedEdwardsY);

impl ElectionPublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub(crate) fn as_point(&self) -> EdwardsPoint {
        // Points are checked at construction and deserialization
        self.0.decompress().unwrap()
    }
}

/// A ballot key wrapped to the election public key.
///
/// The ephemeral public key is carried separately from the wrapped bytes
/// so the bulletin board can persist both without plaintext ever leaving
/// the cast path.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KeyWrap {
    #[serde(with = "PointHex")]
    pub ephemeral_public: CompressedEdwardsY,

    #[serde(with = "hex_serde")]
    pub wrapped: Vec<u8>,
}

/// Generate a fresh election keypair, ready for Shamir dealing.
pub fn generate_election_keypair() -> (ElectionSecretKey, ElectionPublicKey) {
    let mut csprng = rand::rngs::OsRng {};
    let mut wide = [0u8; 64];
    csprng.fill(&mut wide[..32]);
    csprng.fill(&mut wide[32..]);

    let secret = ElectionSecretKey(Scalar::from_bytes_mod_order_wide(&wide));
    let public = secret.public_key();
    (secret, public)
}

/// Wrap a ballot key to the election public key with a fresh ephemeral
/// scalar.
pub fn wrap_key(election_public: &ElectionPublicKey, key: &AesKey) -> KeyWrap {
    let (ephemeral_secret, ephemeral_public) = generate_election_keypair();

    let shared = agree(&ephemeral_secret.0, &election_public.as_point());
    let wrap_key = derive_wrap_key(ephemeral_public.0.as_bytes(), &shared);

    let mut csprng = rand::rngs::OsRng {};
    let mut iv = [0u8; AES_IV_LENGTH];
    csprng.fill(&mut iv);

    let mut wrapped = Vec::with_capacity(AES_IV_LENGTH + AES_KEY_LENGTH + 16);
    wrapped.extend(&iv);
    wrapped.extend(aes_encrypt(&wrap_key, &iv, key));

    KeyWrap {
        ephemeral_public: ephemeral_public.0,
        wrapped,
    }
}

/// Unwrap a ballot key with the reconstructed election secret.
pub fn unwrap_key(election_secret: &ElectionSecretKey, wrap: &KeyWrap) -> Result<AesKey, Error> {
    if wrap.wrapped.len() <= AES_IV_LENGTH {
        return Err(Error::MalformedKeyWrap);
    }
    let ephemeral_point = wrap
        .ephemeral_public
        .decompress()
        .ok_or(Error::MalformedKeyWrap)?;

    let shared = agree(&election_secret.0, &ephemeral_point);
    let wrap_key = derive_wrap_key(wrap.ephemeral_public.as_bytes(), &shared);

    let mut iv = [0u8; AES_IV_LENGTH];
    iv.copy_from_slice(&wrap.wrapped[..AES_IV_LENGTH]);

    let key = aes_decrypt(&wrap_key, &iv, &wrap.wrapped[AES_IV_LENGTH..])
        .map_err(|_| Error::KeyUnwrapFailed)?;

    if key.len() != AES_KEY_LENGTH {
        return Err(Error::KeyUnwrapFailed);
    }
    let mut out = [0u8; AES_KEY_LENGTH];
    out.copy_from_slice(&key);
    Ok(out)
}

fn agree(secret: &Scalar, public: &EdwardsPoint) -> [u8; 32] {
    let shared_point = public * secret;
    shared_point.compress().to_bytes()
}

fn derive_wrap_key(ephemeral_public: &[u8; 32], shared: &[u8; 32]) -> AesKey {
    let mut master = Vec::with_capacity(64);
    master.extend(ephemeral_public.iter());
    master.extend(shared.iter());

    let h = Hkdf::<Sha256>::new(None, &master);
    let mut out = [0u8; AES_KEY_LENGTH];
    h.expand(b"verivote.wrap", &mut out)
        .expect("verivote: hkdf expand failure");
    out
}

/// AES-256-GCM with a caller-held IV.
///
/// The IV is held by the caller rather than prefixed so the spoil path can
/// reveal (key, iv, plaintext) and let anyone re-derive the ciphertext.
pub fn aes_encrypt(key: &AesKey, iv: &AesIv, msg: &[u8]) -> Vec<u8> {
    let aead = Aes256Gcm::new(Key::from_slice(key));
    aead.encrypt(Nonce::from_slice(iv), msg)
        .expect("verivote: aes-gcm encryption failure")
}

pub fn aes_decrypt(key: &AesKey, iv: &AesIv, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
    let aead = Aes256Gcm::new(Key::from_slice(key));
    aead.decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| Error::BallotDecryptionFailed)
}

pub fn generate_ballot_key() -> (AesKey, AesIv) {
    let mut csprng = rand::rngs::OsRng {};
    let mut key = [0u8; AES_KEY_LENGTH];
    let mut iv = [0u8; AES_IV_LENGTH];
    csprng.fill(&mut key);
    csprng.fill(&mut iv);
    (key, iv)
}
