//! End-to-end election scenarios.

use crate::*;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

// Small RSA keys keep the tests fast. Never use this size for real.
const TEST_RSA_BITS: usize = 512;

struct TestElection {
    state: ElectionState,
    issuer: CredentialIssuer,
    shares: Vec<TrusteeShareRecord>,
}

fn setup_election(threshold: u8, trustees: u8) -> TestElection {
    let (authority_secret, authority_public) = generate_keypair();
    let (election_secret, election_public) = generate_election_keypair();
    let issuer = CredentialIssuer::new(TEST_RSA_BITS).unwrap();
    let challenge_issuer = ChallengeIssuer::new();
    let now = Utc::now();

    let trustees: Vec<Trustee> = (1..=trustees).map(|id| Trustee::new(id).0).collect();
    let shares = deal_shares(threshold, &trustees, &election_secret);

    let manifest = ElectionManifest {
        id: "election-2024".to_string(),
        jurisdiction_id: "district-9".to_string(),
        opens_at: now - Duration::hours(1),
        closes_at: now + Duration::hours(8),
        crypto_suite: CRYPTO_SUITE.to_string(),
        election_public_key: election_public,
        issuer_public_key: issuer.public_key.clone(),
        challenge_public_key: challenge_issuer.public_key,
        trustees,
        trustee_threshold: threshold,
        authority_public,
    };
    manifest.validate().unwrap();
    let signed = manifest.sign(&authority_secret).unwrap();
    signed.validate().unwrap();

    let mut state = ElectionState::new(signed, challenge_issuer);
    state
        .ledgers
        .record(
            LedgerEvent::ManifestPublished(ManifestPublished {
                manifest_id: state.manifest.id.clone(),
                manifest_hash: state.manifest.hash(),
            }),
            now,
        )
        .unwrap();

    TestElection {
        state,
        issuer,
        shares,
    }
}

fn issue_credential(state: &mut ElectionState, issuer: &CredentialIssuer) -> VoterCredential {
    let keypair = CredentialKeypair::generate();
    let session = begin_issuance(&issuer.public_key, &keypair).unwrap();
    let blind_sig = issuer.sign_blinded(&session.blinded_digest).unwrap();
    let credential =
        finish_issuance(&issuer.public_key, keypair, session, &blind_sig).unwrap();

    // The gateway anchors the ceremony, not the key
    state
        .record_credential_issued(Uuid::new_v4(), Utc::now())
        .unwrap();
    credential
}

fn build_request(
    state: &mut ElectionState,
    credential: &VoterCredential,
    option: &str,
    now: DateTime<Utc>,
) -> (CastRequest, BallotSecrets, BallotPlaintext) {
    let challenge = state.issue_challenge(now);
    challenge
        .verify(&state.manifest.challenge_public_key)
        .unwrap();

    let nullifier = Nullifier::derive(&credential.keypair.public, &state.manifest.id);
    let proof = EligibilityProof::create(
        credential,
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
    let (ballot, secrets) =
        encrypt_ballot(&state.manifest.election_public_key, &plaintext).unwrap();

    let request = CastRequest {
        request_id: Uuid::new_v4(),
        manifest_id: state.manifest.id.clone(),
        challenge_id: challenge.id,
        proof,
        ballot,
    };
    (request, secrets, plaintext)
}

#[test]
fn referendum_end_to_end() {
    let now = Utc::now();
    let mut election = setup_election(2, 3);
    let issuer = election.issuer;

    // Three voters: two yes, one no
    let mut receipts = Vec::new();
    let mut ballots = Vec::new();
    for option in &["yes", "yes", "no"] {
        let credential = issue_credential(&mut election.state, &issuer);
        credential.verify(&issuer.public_key).unwrap();

        let (request, _secrets, _plaintext) =
            build_request(&mut election.state, &credential, option, now);
        let ballot = request.ballot.clone();
        let receipt = cast(&mut election.state, &request, now).unwrap();

        // Every receipt verifies on all five sub-checks
        let report = verify_cast(&election.state, &receipt, &ballot);
        assert!(report.all_passed(), "report: {:?}", report);

        receipts.push(receipt);
        ballots.push(ballot);
    }
    assert_eq!(election.state.board.size(), 3);

    // Earlier receipts still verify after the board has grown
    let report = verify_cast(&election.state, &receipts[0], &ballots[0]);
    assert!(report.all_passed(), "report: {:?}", report);

    // A spoiled ballot proves its own encryption and is never cast
    let spoiler = issue_credential(&mut election.state, &issuer);
    let (request, secrets, plaintext) =
        build_request(&mut election.state, &spoiler, "yes", now);
    let spoiled = spoil_ballot(plaintext, &secrets);
    verify_spoil(&spoiled, &request.ballot).unwrap();
    election.state.record_spoiled(spoiled.ballot_id);

    // Quorum {trustee 1, trustee 2} closes the election
    let quorum: Vec<TrusteeShareRecord> = election.shares[..2].to_vec();
    let tally = close_and_tally(&mut election.state, &quorum, now).unwrap();
    tally.verify(&election.state.gateway_public).unwrap();

    assert_eq!(tally.ballot_count, 3);
    assert_eq!(tally.totals[&0]["yes"], 2);
    assert_eq!(tally.totals[&0]["no"], 1);

    // Quorum {trustee 2, trustee 3} reconstructs the same secret
    let other_quorum = recover_secret(2, &election.shares[1..]).unwrap();
    assert_eq!(
        other_quorum.public_key(),
        election.state.manifest.election_public_key
    );

    // A lone trustee cannot
    assert!(recover_secret(2, &election.shares[..1]).is_err());

    // The tally is never recomputed silently
    assert!(matches!(
        close_and_tally(&mut election.state, &quorum, now),
        Err(Error::TallyAlreadyPublished)
    ));

    // Every ledger chain verifies end to end
    election.state.ledgers.governance.verify_chain().unwrap();
    election.state.ledgers.balloting.verify_chain().unwrap();
    election.state.ledgers.oversight.verify_chain().unwrap();
    let balloting_stats = election.state.ledgers.balloting.stats();
    assert_eq!(balloting_stats.events_by_type["ballot_cast"], 3);

    // Three voters plus the spoiler: four issuance ceremonies anchored
    assert_eq!(balloting_stats.events_by_type["credential_issued"], 4);
}

#[test]
fn below_threshold_tally_publishes_nothing() {
    let now = Utc::now();
    let mut election = setup_election(2, 3);
    let issuer = election.issuer;

    let credential = issue_credential(&mut election.state, &issuer);
    let (request, _, _) = build_request(&mut election.state, &credential, "yes", now);
    cast(&mut election.state, &request, now).unwrap();

    let tree_heads = election.state.tree_heads.len();
    let ledger_height = election.state.ledgers.balloting.head().unwrap().height;

    // A lone share of a two-share quorum fails closed
    assert!(close_and_tally(&mut election.state, &election.shares[..1], now).is_err());

    // No closing head was signed and no ledger entry was written
    assert_eq!(election.state.tree_heads.len(), tree_heads);
    assert_eq!(
        election.state.ledgers.balloting.head().unwrap().height,
        ledger_height
    );
    assert!(election.state.tally.is_none());

    // A full quorum still closes the election afterwards
    let quorum: Vec<TrusteeShareRecord> = election.shares[..2].to_vec();
    let tally = close_and_tally(&mut election.state, &quorum, now).unwrap();
    assert_eq!(tally.ballot_count, 1);
}

#[test]
fn double_vote_is_rejected_with_zero_side_effects() {
    let now = Utc::now();
    let mut election = setup_election(2, 3);
    let issuer = election.issuer;

    let credential = issue_credential(&mut election.state, &issuer);
    let (first, _, _) = build_request(&mut election.state, &credential, "yes", now);
    cast(&mut election.state, &first, now).unwrap();

    let board_size = election.state.board.size();
    let ledger_height = election.state.ledgers.balloting.head().unwrap().height;
    let nullifier_count = election.state.nullifiers.len();

    // Same credential, fresh challenge and ballot: the nullifier collides
    let (second, _, _) = build_request(&mut election.state, &credential, "no", now);
    let rejection = cast(&mut election.state, &second, now).unwrap_err();
    assert_eq!(rejection.code, RejectionCode::NullifierUsed);
    assert!(!rejection.retryable);

    // Nothing moved
    assert_eq!(election.state.board.size(), board_size);
    assert_eq!(
        election.state.ledgers.balloting.head().unwrap().height,
        ledger_height
    );
    assert_eq!(election.state.nullifiers.len(), nullifier_count);
    assert!(!election.state.challenges[&second.challenge_id].used);
}

#[test]
fn expired_challenge_leaves_the_board_unchanged() {
    let now = Utc::now();
    let mut election = setup_election(2, 3);
    let issuer = election.issuer;

    let credential = issue_credential(&mut election.state, &issuer);
    let (request, _, _) = build_request(&mut election.state, &credential, "yes", now);

    let later = now + Duration::seconds(CHALLENGE_TTL_SECONDS + 1);
    let rejection = cast(&mut election.state, &request, later).unwrap_err();
    assert_eq!(rejection.code, RejectionCode::ChallengeExpired);

    assert_eq!(election.state.board.size(), 0);
    assert!(election.state.nullifiers.is_empty());
    assert!(election.state.tree_heads.is_empty());
}

#[test]
fn retries_are_idempotent_and_content_bound() {
    let now = Utc::now();
    let mut election = setup_election(2, 3);
    let issuer = election.issuer;

    let credential = issue_credential(&mut election.state, &issuer);
    let (request, _, _) = build_request(&mut election.state, &credential, "yes", now);

    let receipt = cast(&mut election.state, &request, now).unwrap();

    // An exact retry returns the cached receipt without a second append
    let retried = cast(&mut election.state, &request, now).unwrap();
    assert_eq!(retried.leaf_hash, receipt.leaf_hash);
    assert_eq!(election.state.board.size(), 1);

    // The same request id with different content is a hard reject
    let mut altered = request;
    altered.ballot.ciphertext[0] ^= 0x01;
    let rejection = cast(&mut election.state, &altered, now).unwrap_err();
    assert_eq!(rejection.code, RejectionCode::IdempotencyMismatch);
}

#[test]
fn forged_proof_is_rejected() {
    let now = Utc::now();
    let mut election = setup_election(2, 3);
    let issuer = election.issuer;

    // A self-signed credential never touched the registration authority
    let credential = issue_credential(&mut election.state, &issuer);
    let (mut request, _, _) = build_request(&mut election.state, &credential, "yes", now);
    request.proof.blind_signature[0] ^= 0x01;

    let rejection = cast(&mut election.state, &request, now).unwrap_err();
    assert_eq!(rejection.code, RejectionCode::ProofInvalid);
    assert_eq!(election.state.board.size(), 0);
}

#[test]
fn every_quorum_decrypts_the_same_plaintext() {
    let (election_secret, election_public) = generate_election_keypair();
    let trustees: Vec<Trustee> = (1..=3).map(|id| Trustee::new(id).0).collect();
    let shares = deal_shares(2, &trustees, &election_secret);

    let plaintext = BallotPlaintext {
        ballot_id: Uuid::new_v4(),
        manifest_id: "election-2024".to_string(),
        selections: vec![Selection {
            contest: 0,
            option: "yes".to_string(),
        }],
        cast_at: Utc::now(),
    };
    let (encrypted, _secrets) = encrypt_ballot(&election_public, &plaintext).unwrap();

    // Trustees {1,2} and {2,3} recover the same ballot
    let first = recover_secret(2, &shares[..2]).unwrap();
    let second = recover_secret(2, &shares[1..]).unwrap();
    assert_eq!(decrypt_ballot(&first, &encrypted).unwrap(), plaintext);
    assert_eq!(decrypt_ballot(&second, &encrypted).unwrap(), plaintext);

    // Trustee {1} alone recovers nothing
    assert!(recover_secret(2, &shares[..1]).is_err());
}

#[test]
fn artifacts_round_trip_through_json() {
    let now = Utc::now();
    let mut election = setup_election(2, 3);
    let issuer = election.issuer;

    let credential = issue_credential(&mut election.state, &issuer);
    let (request, _, _) = build_request(&mut election.state, &credential, "yes", now);

    // Wire form: JSON in, same content hash out
    let wire = serde_json::to_vec(&request).unwrap();
    let parsed = CastRequest::from_json(&wire).unwrap();
    assert_eq!(parsed.content_hash(), request.content_hash());

    // Binary fields render as hex strings, not byte arrays
    let receipt = cast(&mut election.state, &request, now).unwrap();
    let value = serde_json::to_value(&receipt).unwrap();
    let leaf_hash = value["leaf_hash"].as_str().unwrap();
    assert_eq!(leaf_hash.len(), 64);
    assert_eq!(hex::decode(leaf_hash).unwrap(), receipt.leaf_hash.to_vec());
}

#[test]
fn fraud_case_lifecycle_is_anchored_in_the_oversight_ledger() {
    let now = Utc::now();
    let mut election = setup_election(2, 3);

    let case_id = flag_fraud(
        &mut election.state,
        FraudFlag {
            flagged_by: "observer-1".to_string(),
            reason: "duplicate nullifier seen at two gateways".to_string(),
            related_ballot: None,
            nullifier: None,
        },
        now,
    )
    .unwrap();

    apply_fraud_action(
        &mut election.state,
        case_id,
        CaseAction::TakeCase,
        "analyst-a",
        None,
        now,
    )
    .unwrap();
    apply_fraud_action(
        &mut election.state,
        case_id,
        CaseAction::StartInvestigation,
        "analyst-a",
        None,
        now,
    )
    .unwrap();
    let status = apply_fraud_action(
        &mut election.state,
        case_id,
        CaseAction::ResolveSystemError,
        "analyst-a",
        Some("replication lag, not fraud".to_string()),
        now,
    )
    .unwrap();
    assert_eq!(status, CaseStatus::ResolvedSystemError);

    // Terminal: no further state change is accepted
    assert!(apply_fraud_action(
        &mut election.state,
        case_id,
        CaseAction::Escalate,
        "analyst-b",
        None,
        now,
    )
    .is_err());

    let oversight = &election.state.ledgers.oversight;
    oversight.verify_chain().unwrap();
    let stats = oversight.stats();
    assert_eq!(stats.events_by_type["fraud_flagged"], 1);
    assert_eq!(stats.events_by_type["fraud_action_taken"], 3);
}
