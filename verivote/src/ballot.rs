use crate::*;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One selected option in one contest.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub contest: u32,
    pub option: String,
}

/// The plaintext a voter encrypts. Never persisted server-side except
/// through an explicit spoil.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BallotPlaintext {
    pub ballot_id: Uuid,
    pub manifest_id: String,
    pub selections: Vec<Selection>,
    pub cast_at: DateTime<Utc>,
}

/// The per-ballot randomness held back by the voter. Revealing it spoils
/// the ballot.
#[derive(Clone)]
pub struct BallotSecrets {
    pub key: AesKey,
    pub iv: AesIv,
}

/// The artifact the bulletin board stores: ciphertext, wrapped key,
/// ephemeral public key (inside the wrap), and a hash binding. No
/// plaintext.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBallot {
    pub ballot_id: Uuid,
    pub manifest_id: String,

    #[serde(with = "hex_serde")]
    pub ciphertext: Vec<u8>,

    #[serde(with = "Bytes12Hex")]
    pub iv: AesIv,

    pub key_wrap: KeyWrap,

    #[serde(with = "Bytes32Hex")]
    pub ballot_hash: [u8; 32],
}

impl EncryptedBallot {
    /// Recompute the integrity binding over the ciphertext.
    pub fn expected_hash(&self) -> [u8; 32] {
        hash_canonical("verivote.ballot", &self.ciphertext)
    }
}

/// Encrypt a ballot under a fresh random symmetric key, wrapping that key
/// to the election public key. The returned secrets stay with the voter
/// and exist only to support spoiling.
pub fn encrypt_ballot(
    election_public: &ElectionPublicKey,
    plaintext: &BallotPlaintext,
) -> Result<(EncryptedBallot, BallotSecrets), Error> {
    let serialized = serde_cbor::to_vec(plaintext)?;

    let (key, iv) = generate_ballot_key();
    let ciphertext = aes_encrypt(&key, &iv, &serialized);
    let key_wrap = wrap_key(election_public, &key);
    let ballot_hash = hash_canonical("verivote.ballot", &ciphertext);

    let encrypted = EncryptedBallot {
        ballot_id: plaintext.ballot_id,
        manifest_id: plaintext.manifest_id.clone(),
        ciphertext,
        iv,
        key_wrap,
        ballot_hash,
    };

    Ok((encrypted, BallotSecrets { key, iv }))
}

/// Decrypt a ballot with the reconstructed election secret. Tally-time
/// only.
pub fn decrypt_ballot(
    election_secret: &ElectionSecretKey,
    encrypted: &EncryptedBallot,
) -> Result<BallotPlaintext, Error> {
    let key = unwrap_key(election_secret, &encrypted.key_wrap)?;
    let serialized = aes_decrypt(&key, &encrypted.iv, &encrypted.ciphertext)?;
    let plaintext: BallotPlaintext = serde_cbor::from_slice(&serialized)?;
    Ok(plaintext)
}

/// An intentional reveal of a ballot's randomness, for an unsubmitted or
/// explicitly designated copy. Spoiled ballots are excluded from tally.
#[derive(Serialize, Deserialize, Clone)]
pub struct SpoiledBallot {
    pub ballot_id: Uuid,

    #[serde(with = "Bytes32Hex")]
    pub key: AesKey,

    #[serde(with = "Bytes12Hex")]
    pub iv: AesIv,

    pub plaintext: BallotPlaintext,
}

pub fn spoil_ballot(plaintext: BallotPlaintext, secrets: &BallotSecrets) -> SpoiledBallot {
    SpoiledBallot {
        ballot_id: plaintext.ballot_id,
        key: secrets.key,
        iv: secrets.iv,
        plaintext,
    }
}

/// Check that a spoiled ballot's revealed randomness independently
/// re-derives the published ciphertext and hash binding.
pub fn verify_spoil(
    spoiled: &SpoiledBallot,
    encrypted: &EncryptedBallot,
) -> Result<(), ValidationError> {
    if spoiled.ballot_id != encrypted.ballot_id {
        return Err(ValidationError::SpoilMismatch);
    }

    let serialized = match serde_cbor::to_vec(&spoiled.plaintext) {
        Ok(bytes) => bytes,
        Err(_) => return Err(ValidationError::SpoilMismatch),
    };
    let reencrypted = aes_encrypt(&spoiled.key, &spoiled.iv, &serialized);

    if reencrypted != encrypted.ciphertext {
        return Err(ValidationError::SpoilMismatch);
    }
    if encrypted.expected_hash() != encrypted.ballot_hash {
        return Err(ValidationError::SpoilMismatch);
    }

    Ok(())
}
