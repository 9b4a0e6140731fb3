use thiserror::Error;

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("verivote: signature error: {0}")]
    SignatureError(#[from] ed25519_dalek::SignatureError),

    #[error("verivote: RSA error: {0}")]
    RSAError(#[from] rsa::errors::Error),

    #[error("verivote: blind signature error: {0}")]
    BlindSignatureError(#[from] rsa_fdh::Error),

    #[error("verivote: mismatched public keys")]
    MismatchedPublicKeys,

    #[error("verivote: issued credential failed self-verification")]
    CredentialSelfCheckFailed,

    #[error("verivote: secret recovery failed")]
    SecretRecoveryFailed,

    #[error("verivote: recovered secret is not a valid curve scalar")]
    SecretRecoveryBadScalar,

    #[error("verivote: CBOR serialization error: {0}")]
    CBORError(#[from] serde_cbor::Error),

    #[error("verivote: JSON serialization error: {0}")]
    JSONError(#[from] serde_json::Error),

    #[error("verivote: failed to unwrap ballot key")]
    KeyUnwrapFailed,

    #[error("verivote: failed to decrypt ballot")]
    BallotDecryptionFailed,

    #[error("verivote: malformed key wrap")]
    MalformedKeyWrap,

    #[error("verivote: tally has already been published for this election")]
    TallyAlreadyPublished,

    #[error("verivote: bulletin board leaf not found")]
    LeafNotFound,

    #[error("verivote: state store has no state under key {0}")]
    StateNotFound(String),

    #[error("verivote: {0}")]
    Validation(#[from] ValidationError),

    #[error("verivote: {0}")]
    Fraud(#[from] FraudError),
}

/// Validation errors: a signature, proof, or chain that failed to verify.
/// Always fatal for the artifact being checked, never retried with the
/// same inputs.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("verivote validation: manifest signature invalid")]
    ManifestSignatureInvalid,

    #[error("verivote validation: manifest validity window is not ordered")]
    ManifestWindowInvalid,

    #[error("verivote validation: trustee threshold is invalid for number of trustees")]
    InvalidTrusteeThreshold,

    #[error("verivote validation: challenge signature invalid")]
    ChallengeSignatureInvalid,

    #[error("verivote validation: credential blind signature invalid")]
    CredentialSignatureInvalid,

    #[error("verivote validation: eligibility proof-of-knowledge invalid")]
    ProofOfKnowledgeInvalid,

    #[error("verivote validation: tree head signature invalid")]
    TreeHeadSignatureInvalid,

    #[error("verivote validation: inclusion proof does not match tree head")]
    InclusionProofInvalid,

    #[error("verivote validation: inclusion proof tree size mismatch")]
    InclusionProofSizeMismatch,

    #[error("verivote validation: ledger chain broken at height {0}")]
    ChainBroken(u64),

    #[error("verivote validation: ledger entry signature invalid at height {0}")]
    ChainSignatureInvalid(u64),

    #[error("verivote validation: ledger write token invalid")]
    WriteTokenInvalid,

    #[error("verivote validation: event type {0} is not routed to this node role")]
    EventRoleMismatch(String),

    #[error("verivote validation: spoiled ballot does not re-derive the ciphertext")]
    SpoilMismatch,

    #[error("verivote validation: receipt signature invalid")]
    ReceiptSignatureInvalid,

    #[error("verivote validation: tally signature invalid")]
    TallySignatureInvalid,

    #[error("verivote validation: signature error: {0}")]
    SignatureError(#[from] ed25519_dalek::SignatureError),
}

/// Fraud case state machine errors. Terminal business-logic rejections,
/// not bugs.
#[derive(Debug, Error)]
pub enum FraudError {
    #[error("verivote fraud: case is in terminal state {0}")]
    CaseResolved(String),

    #[error("verivote fraud: action {action} is not valid in state {state}")]
    InvalidTransition { state: String, action: String },
}

/// Protocol-level rejection codes, safe to surface to a client.
///
/// Each code carries a fixed retryable flag: retryable codes indicate
/// transient service pressure, everything else is terminal for those
/// exact inputs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    BadManifest,
    ChallengeExpired,
    IdempotencyMismatch,
    ProofInvalid,
    NullifierUsed,
    BallotInvalid,
    RateLimited,
    GatewayOverloaded,
}

impl RejectionCode {
    pub fn retryable(&self) -> bool {
        match self {
            RejectionCode::RateLimited | RejectionCode::GatewayOverloaded => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            RejectionCode::BadManifest => "BAD_MANIFEST",
            RejectionCode::ChallengeExpired => "CHALLENGE_EXPIRED",
            RejectionCode::IdempotencyMismatch => "IDEMPOTENCY_MISMATCH",
            RejectionCode::ProofInvalid => "PROOF_INVALID",
            RejectionCode::NullifierUsed => "NULLIFIER_USED",
            RejectionCode::BallotInvalid => "BALLOT_INVALID",
            RejectionCode::RateLimited => "RATE_LIMITED",
            RejectionCode::GatewayOverloaded => "GATEWAY_OVERLOADED",
        };
        write!(f, "{}", name)
    }
}

/// A typed protocol rejection: code, retryable flag, and a human-readable
/// reason. A rejected request has zero server-side effects.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Rejection {
    pub code: RejectionCode,
    pub retryable: bool,
    pub reason: String,
}

impl Rejection {
    pub fn new(code: RejectionCode, reason: impl Into<String>) -> Self {
        Rejection {
            code,
            retryable: code.retryable(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.reason)
    }
}

impl std::error::Error for Rejection {}
