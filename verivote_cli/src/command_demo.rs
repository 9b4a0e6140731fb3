//! Runs a complete demo election in-process: manifest publication,
//! credential issuance, challenged casts, receipt verification, and a
//! threshold tally. Prints each artifact as JSON.

use chrono::{Duration, Utc};
use uuid::Uuid;
use verivote::*;

pub fn command_demo(election_id: &str, voters: usize) {
    let now = Utc::now();

    // Keys and trustees
    let (authority_secret, authority_public) = generate_keypair();
    let (election_secret, election_public) = generate_election_keypair();
    let challenge_issuer = ChallengeIssuer::new();
    let issuer = CredentialIssuer::new(CREDENTIAL_RSA_BITS).unwrap_or_else(|e| {
        eprintln!("verivote demo: issuer key generation failed: {}", e);
        std::process::exit(1);
    });

    let trustees: Vec<Trustee> = (1..=3).map(|id| Trustee::new(id).0).collect();
    let shares = deal_shares(2, &trustees, &election_secret);

    // Signed manifest
    let manifest = ElectionManifest {
        id: election_id.to_string(),
        jurisdiction_id: "demo-district".to_string(),
        opens_at: now - Duration::minutes(1),
        closes_at: now + Duration::hours(8),
        crypto_suite: CRYPTO_SUITE.to_string(),
        election_public_key: election_public,
        issuer_public_key: issuer.public_key.clone(),
        challenge_public_key: challenge_issuer.public_key,
        trustees,
        trustee_threshold: 2,
        authority_public,
    };
    let signed = manifest.sign(&authority_secret).unwrap_or_else(|e| {
        eprintln!("verivote demo: manifest signing failed: {}", e);
        std::process::exit(1);
    });

    println!("--- manifest ---");
    print_json(&signed);

    let mut state = ElectionState::new(signed, challenge_issuer);
    if let Err(e) = state.ledgers.record(
        LedgerEvent::ManifestPublished(ManifestPublished {
            manifest_id: state.manifest.id.clone(),
            manifest_hash: state.manifest.hash(),
        }),
        now,
    ) {
        eprintln!("verivote demo: ledger append failed: {}", e);
        std::process::exit(1);
    }

    // Cast one ballot per voter, alternating the referendum answer
    for n in 0..voters {
        let option = if n % 2 == 0 { "yes" } else { "no" };

        let keypair = CredentialKeypair::generate();
        let session = begin_issuance(&issuer.public_key, &keypair).unwrap_or_else(die);
        let blind_sig = issuer.sign_blinded(&session.blinded_digest).unwrap_or_else(die);
        let credential =
            finish_issuance(&issuer.public_key, keypair, session, &blind_sig).unwrap_or_else(die);
        state
            .record_credential_issued(Uuid::new_v4(), now)
            .unwrap_or_else(die);

        let challenge = state.issue_challenge(now);
        let nullifier = Nullifier::derive(&credential.keypair.public, &state.manifest.id);
        let proof = EligibilityProof::create(
            &credential,
            EligibilityPublicInputs {
                manifest_id: state.manifest.id.clone(),
                jurisdiction_id: state.manifest.jurisdiction_id.clone(),
                nullifier,
                challenge_id: challenge.id,
                challenge_nonce: challenge.nonce,
            },
        );

        let plaintext = BallotPlaintext {
            ballot_id: Uuid::new_v4(),
            manifest_id: state.manifest.id.clone(),
            selections: vec![Selection {
                contest: 0,
                option: option.to_string(),
            }],
            cast_at: now,
        };
        let (ballot, _secrets) =
            encrypt_ballot(&state.manifest.election_public_key, &plaintext).unwrap_or_else(die);

        let request = CastRequest {
            request_id: Uuid::new_v4(),
            manifest_id: state.manifest.id.clone(),
            challenge_id: challenge.id,
            proof,
            ballot: ballot.clone(),
        };

        let receipt = match cast(&mut state, &request, now) {
            Ok(receipt) => receipt,
            Err(rejection) => {
                eprintln!("verivote demo: cast rejected: {}", rejection);
                std::process::exit(1);
            }
        };

        println!("--- receipt (voter {}) ---", n + 1);
        print_json(&receipt);

        let report = verify_cast(&state, &receipt, &ballot);
        println!("--- verification report (voter {}) ---", n + 1);
        print_json(&report);

        if !report.all_passed() {
            eprintln!("verivote demo: receipt verification failed");
            std::process::exit(1);
        }
    }

    // Close with a two-trustee quorum
    let quorum = &shares[..2];
    let tally = match close_and_tally(&mut state, quorum, now) {
        Ok(tally) => tally,
        Err(e) => {
            eprintln!("verivote demo: tally failed: {}", e);
            std::process::exit(1);
        }
    };

    println!("--- tally ---");
    print_json(&tally);
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("verivote demo: serialization failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn die<E: std::fmt::Display, T>(e: E) -> T {
    eprintln!("verivote demo: {}", e);
    std::process::exit(1);
}
