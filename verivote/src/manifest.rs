use crate::*;
use chrono::{DateTime, Utc};
use ed25519_dalek::ExpandedSecretKey;
use ed25519_dalek::PublicKey;
use ed25519_dalek::SecretKey;
use ed25519_dalek::Signature;
use rsa::RSAPublicKey;

pub const CRYPTO_SUITE: &str = "verivote-v1-ed25519-sha256";

/// The signed, immutable root of trust for one election. Every later
/// artifact references its id and is rejected on mismatch.
#[derive(Serialize, Deserialize, Clone)]
pub struct ElectionManifest {
    pub id: String,
    pub jurisdiction_id: String,

    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,

    pub crypto_suite: String,

    /// The key ballots are wrapped to. The matching secret exists only as
    /// trustee shares.
    pub election_public_key: ElectionPublicKey,

    /// Credential issuer (blind signatures)
    #[serde(with = "RSAPublicKeyHex")]
    pub issuer_public_key: RSAPublicKey,

    /// Challenge issuer
    #[serde(with = "EdPublicKeyHex")]
    pub challenge_public_key: PublicKey,

    pub trustees: Vec<Trustee>,
    pub trustee_threshold: u8,

    /// Manifest authority
    #[serde(with = "EdPublicKeyHex")]
    pub authority_public: PublicKey,
}

impl ElectionManifest {
    /// Sanity checks on an unsigned manifest.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.closes_at <= self.opens_at {
            return Err(ValidationError::ManifestWindowInvalid);
        }
        if self.trustee_threshold == 0
            || self.trustee_threshold as usize > self.trustees.len()
        {
            return Err(ValidationError::InvalidTrusteeThreshold);
        }
        Ok(())
    }

    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        now >= self.opens_at && now < self.closes_at
    }

    pub fn hash(&self) -> [u8; 32] {
        hash_canonical("verivote.manifest", self)
    }

    /// Sign the manifest with the authority key, producing the immutable
    /// published form. The signing key must match `authority_public`.
    pub fn sign(self, authority_secret: &SecretKey) -> Result<SignedManifest, Error> {
        let public = PublicKey::from(authority_secret);
        if public != self.authority_public {
            return Err(Error::MismatchedPublicKeys);
        }

        let hash = self.hash();
        let expanded: ExpandedSecretKey = authority_secret.into();
        let signature = expanded.sign(&hash, &public);

        Ok(SignedManifest {
            manifest: self,
            signature,
        })
    }
}

/// A manifest plus the authority's detached signature.
#[derive(Serialize, Deserialize, Clone)]
pub struct SignedManifest {
    pub manifest: ElectionManifest,

    #[serde(with = "EdSignatureHex")]
    pub signature: Signature,
}

impl SignedManifest {
    pub fn verify_signature(&self) -> Result<(), ValidationError> {
        self.manifest
            .authority_public
            .verify_strict(&self.manifest.hash(), &self.signature)
            .map_err(|_| ValidationError::ManifestSignatureInvalid)
    }

    /// Verify the signature and the manifest's internal sanity.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.verify_signature()?;
        self.manifest.validate()
    }
}

impl std::ops::Deref for SignedManifest {
    type Target = ElectionManifest;

    fn deref(&self) -> &Self::Target {
        &self.manifest
    }
}
