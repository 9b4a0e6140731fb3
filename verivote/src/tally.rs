use crate::*;
use chrono::{DateTime, Utc};
use ed25519_dalek::PublicKey;
use ed25519_dalek::Signature;
use indexmap::IndexMap;

/// Per-contest, per-option counts.
pub type TallyTotals = IndexMap<u32, IndexMap<String, u64>>;

/// Count selections across decrypted ballots.
pub fn aggregate(ballots: &[BallotPlaintext]) -> TallyTotals {
    let mut totals: TallyTotals = IndexMap::new();

    for ballot in ballots {
        for selection in &ballot.selections {
            *totals
                .entry(selection.contest)
                .or_insert_with(IndexMap::new)
                .entry(selection.option.clone())
                .or_insert(0) += 1;
        }
    }

    totals
}

/// The published election result, signed and bound to the closing root of
/// the bulletin board.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Tally {
    pub manifest_id: String,

    #[serde(with = "Bytes32Hex")]
    pub closing_root: [u8; 32],

    pub ballot_count: u64,
    pub totals: TallyTotals,
    pub tallied_at: DateTime<Utc>,

    #[serde(with = "EdSignatureHex")]
    pub signature: Signature,
}

// The signed portion of a tally
#[derive(Serialize)]
struct TallyPackage<'a> {
    manifest_id: &'a str,
    closing_root: &'a [u8; 32],
    ballot_count: u64,
    totals: &'a TallyTotals,
    tallied_at: &'a DateTime<Utc>,
}

impl Tally {
    /// Aggregate and sign a tally. The signer closure receives the
    /// package hash; the gateway passes its signing key through it.
    pub fn assemble(
        manifest_id: String,
        closing_root: [u8; 32],
        ballots: &[BallotPlaintext],
        tallied_at: DateTime<Utc>,
        sign: impl FnOnce(&[u8; 32]) -> Signature,
    ) -> Tally {
        let totals = aggregate(ballots);
        let ballot_count = ballots.len() as u64;

        let package = TallyPackage {
            manifest_id: &manifest_id,
            closing_root: &closing_root,
            ballot_count,
            totals: &totals,
            tallied_at: &tallied_at,
        };
        let hash = hash_canonical("verivote.tally", &package);
        let signature = sign(&hash);

        Tally {
            manifest_id,
            closing_root,
            ballot_count,
            totals,
            tallied_at,
            signature,
        }
    }

    pub fn verify(&self, signer_public: &PublicKey) -> Result<(), ValidationError> {
        let package = TallyPackage {
            manifest_id: &self.manifest_id,
            closing_root: &self.closing_root,
            ballot_count: self.ballot_count,
            totals: &self.totals,
            tallied_at: &self.tallied_at,
        };
        let hash = hash_canonical("verivote.tally", &package);

        signer_public
            .verify_strict(&hash, &self.signature)
            .map_err(|_| ValidationError::TallySignatureInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::ExpandedSecretKey;
    use uuid::Uuid;

    fn ballot(selections: Vec<(u32, &str)>) -> BallotPlaintext {
        BallotPlaintext {
            ballot_id: Uuid::new_v4(),
            manifest_id: "election-2024".to_string(),
            selections: selections
                .into_iter()
                .map(|(contest, option)| Selection {
                    contest,
                    option: option.to_string(),
                })
                .collect(),
            cast_at: Utc::now(),
        }
    }

    #[test]
    fn aggregate_counts_per_contest_and_option() {
        let ballots = vec![
            ballot(vec![(0, "yes"), (1, "alice")]),
            ballot(vec![(0, "yes"), (1, "bob")]),
            ballot(vec![(0, "no")]),
        ];

        let totals = aggregate(&ballots);
        assert_eq!(totals[&0]["yes"], 2);
        assert_eq!(totals[&0]["no"], 1);
        assert_eq!(totals[&1]["alice"], 1);
        assert_eq!(totals[&1]["bob"], 1);
    }

    #[test]
    fn tally_signature_binds_the_totals() {
        let (secret, public) = generate_keypair();
        let ballots = vec![ballot(vec![(0, "yes")]), ballot(vec![(0, "no")])];

        let tally = Tally::assemble(
            "election-2024".to_string(),
            [7u8; 32],
            &ballots,
            Utc::now(),
            |hash| {
                let expanded: ExpandedSecretKey = (&secret).into();
                expanded.sign(hash, &public)
            },
        );

        tally.verify(&public).unwrap();
        assert_eq!(tally.ballot_count, 2);

        // Shifting one count invalidates the signature
        let mut tampered = tally.clone();
        tampered.totals[&0]["yes"] = 2;
        assert!(tampered.verify(&public).is_err());

        // So does re-binding to a different closing root
        let mut tampered = tally;
        tampered.closing_root[0] ^= 0x01;
        assert!(tampered.verify(&public).is_err());
    }
}
