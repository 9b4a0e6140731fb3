use crate::*;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::ExpandedSecretKey;
use ed25519_dalek::PublicKey;
use ed25519_dalek::SecretKey;
use ed25519_dalek::Signature;
use uuid::Uuid;

/// Default challenge lifetime: ten minutes.
pub const CHALLENGE_TTL_SECONDS: i64 = 600;

/// A single-use, time-boxed challenge binding one eligibility proof to one
/// cast request.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Challenge {
    pub id: Uuid,

    #[serde(with = "Bytes32Hex")]
    pub nonce: [u8; 32],

    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    #[serde(with = "EdSignatureHex")]
    pub signature: Signature,
}

// The signed portion of a challenge
#[derive(Serialize)]
struct ChallengePackage<'a> {
    id: &'a Uuid,
    nonce: &'a [u8; 32],
    expires_at: &'a DateTime<Utc>,
}

impl Challenge {
    pub fn verify(&self, issuer_public: &PublicKey) -> Result<(), ValidationError> {
        let package = ChallengePackage {
            id: &self.id,
            nonce: &self.nonce,
            expires_at: &self.expires_at,
        };
        let hash = hash_canonical("verivote.challenge", &package);

        issuer_public
            .verify_strict(&hash, &self.signature)
            .map_err(|_| ValidationError::ChallengeSignatureInvalid)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Mints signed single-use challenges.
#[derive(Serialize, Deserialize)]
pub struct ChallengeIssuer {
    #[serde(with = "EdPublicKeyHex")]
    pub public_key: PublicKey,
    secret_key: SecretKey,
}

impl ChallengeIssuer {
    pub fn new() -> Self {
        let (secret_key, public_key) = generate_keypair();
        ChallengeIssuer {
            public_key,
            secret_key,
        }
    }

    pub fn issue(&self, now: DateTime<Utc>) -> Challenge {
        let id = Uuid::new_v4();
        let nonce = random_bytes_32();
        let expires_at = now + Duration::seconds(CHALLENGE_TTL_SECONDS);

        let package = ChallengePackage {
            id: &id,
            nonce: &nonce,
            expires_at: &expires_at,
        };
        let hash = hash_canonical("verivote.challenge", &package);

        let expanded: ExpandedSecretKey = (&self.secret_key).into();
        let signature = expanded.sign(&hash, &self.public_key);

        Challenge {
            id,
            nonce,
            issued_at: now,
            expires_at,
            signature,
        }
    }
}

/// Server-side record of an issued challenge. The `used` flag is flipped
/// atomically inside the cast transaction.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChallengeRecord {
    pub challenge: Challenge,
    pub used: bool,
}

impl ChallengeRecord {
    pub fn new(challenge: Challenge) -> Self {
        ChallengeRecord {
            challenge,
            used: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_signature_and_expiry() {
        let issuer = ChallengeIssuer::new();
        let now = Utc::now();

        let challenge = issuer.issue(now);
        challenge.verify(&issuer.public_key).unwrap();

        assert!(!challenge.is_expired(now));
        assert!(!challenge.is_expired(now + Duration::seconds(CHALLENGE_TTL_SECONDS - 1)));
        assert!(challenge.is_expired(now + Duration::seconds(CHALLENGE_TTL_SECONDS)));

        // A different issuer's key rejects it
        let other = ChallengeIssuer::new();
        assert!(challenge.verify(&other.public_key).is_err());
    }

    #[test]
    fn tampered_challenge_is_invalid() {
        let issuer = ChallengeIssuer::new();
        let mut challenge = issuer.issue(Utc::now());

        challenge.nonce[0] ^= 0x01;
        assert!(challenge.verify(&issuer.public_key).is_err());
    }
}
