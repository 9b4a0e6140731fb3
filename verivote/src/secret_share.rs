use crate::*;
use ed25519_dalek::PublicKey;
use ed25519_dalek::SecretKey;
use sharks::{Share, Sharks};
use std::convert::TryFrom;

/// A trustee holding one Shamir share of the election secret. The id is
/// also the share's x-coordinate (1-based).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Trustee {
    pub id: u8,

    #[serde(with = "EdPublicKeyHex")]
    pub public_key: PublicKey,
}

impl Trustee {
    pub fn new(id: u8) -> (Self, SecretKey) {
        let (secret, public) = generate_keypair();

        let trustee = Trustee {
            id,
            public_key: public,
        };
        (trustee, secret)
    }
}

/// One trustee's long-lived share of the election secret scalar.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TrusteeShareRecord {
    pub trustee_id: u8,
    pub x: u8,

    #[serde(with = "hex_serde")]
    pub share: Vec<u8>,
}

/// Split the election secret across the trustees, threshold-of-n.
///
/// Shares are dealt in trustee order; share x-coordinates are assigned by
/// the dealer starting at 1, so `trustee.id` must run 1..=n.
pub fn deal_shares(
    threshold: u8,
    trustees: &[Trustee],
    secret: &ElectionSecretKey,
) -> Vec<TrusteeShareRecord> {
    let sharks = Sharks(threshold);
    let dealer = sharks.dealer(&secret.to_bytes());

    let mut records = Vec::with_capacity(trustees.len());
    for (trustee, share) in trustees.iter().zip(dealer.take(trustees.len())) {
        let share = Vec::from(&share);
        records.push(TrusteeShareRecord {
            trustee_id: trustee.id,
            x: share[0],
            share,
        });
    }

    records
}

/// Reconstruct the election secret from at least `threshold` distinct
/// shares (Lagrange interpolation at x = 0).
///
/// Fewer than `threshold` distinct shares produces no result at all.
/// Shares are trusted as dealt; there is no verifiable-secret-sharing
/// commitment check, but a corrupted quorum yields a wrong scalar which
/// then fails every AES-GCM unwrap.
pub fn recover_secret(
    threshold: u8,
    records: &[TrusteeShareRecord],
) -> Result<ElectionSecretKey, Error> {
    let mut shares: Vec<Share> = Vec::with_capacity(records.len());
    let mut seen_x: Vec<u8> = Vec::with_capacity(records.len());

    for record in records {
        if seen_x.contains(&record.x) {
            continue;
        }
        seen_x.push(record.x);

        let share =
            Share::try_from(record.share.as_slice()).map_err(|_| Error::SecretRecoveryFailed)?;
        shares.push(share);
    }

    let sharks = Sharks(threshold);
    let secret_bytes = sharks
        .recover(&shares)
        .map_err(|_| Error::SecretRecoveryFailed)?;

    ElectionSecretKey::from_bytes(&secret_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trustees(n: u8) -> Vec<Trustee> {
        (1..=n).map(|id| Trustee::new(id).0).collect()
    }

    #[test]
    fn all_quorums_recover_the_same_secret() {
        let (secret, public) = generate_election_keypair();
        let trustees = trustees(3);

        let shares = deal_shares(2, &trustees, &secret);
        assert_eq!(shares.len(), 3);

        // Every subset of size >= 2 recovers the same secret
        let subsets: Vec<Vec<usize>> = vec![
            vec![0, 1],
            vec![1, 2],
            vec![0, 2],
            vec![0, 1, 2],
        ];
        for subset in subsets {
            let selected: Vec<TrusteeShareRecord> =
                subset.iter().map(|&i| shares[i].clone()).collect();
            let recovered = recover_secret(2, &selected).unwrap();
            assert_eq!(recovered.public_key(), public);
        }
    }

    #[test]
    fn below_threshold_fails_closed() {
        let (secret, _public) = generate_election_keypair();
        let shares = deal_shares(2, &trustees(3), &secret);

        assert!(recover_secret(2, &shares[..1]).is_err());
        assert!(recover_secret(2, &[]).is_err());

        // A duplicated share does not count twice
        let duplicated = vec![shares[0].clone(), shares[0].clone()];
        assert!(recover_secret(2, &duplicated).is_err());
    }
}
