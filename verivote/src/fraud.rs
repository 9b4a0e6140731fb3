//! Fraud case lifecycle: a small state machine with an immutable action
//! history. Terminal states accept no state-changing action; notes are
//! allowed everywhere and never change state.

use crate::*;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// What triggered the case.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FraudFlag {
    pub flagged_by: String,
    pub reason: String,

    #[serde(default)]
    pub related_ballot: Option<Uuid>,

    #[serde(default)]
    pub nullifier: Option<Nullifier>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    PendingReview,
    Triaged,
    Investigating,
    Escalated,
    ResolvedCleared,
    ResolvedConfirmedFraud,
    ResolvedSystemError,
}

impl CaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CaseStatus::ResolvedCleared
                | CaseStatus::ResolvedConfirmedFraud
                | CaseStatus::ResolvedSystemError
        )
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            CaseStatus::PendingReview => "pending_review",
            CaseStatus::Triaged => "triaged",
            CaseStatus::Investigating => "investigating",
            CaseStatus::Escalated => "escalated",
            CaseStatus::ResolvedCleared => "resolved_cleared",
            CaseStatus::ResolvedConfirmedFraud => "resolved_confirmed_fraud",
            CaseStatus::ResolvedSystemError => "resolved_system_error",
        };
        write!(f, "{}", name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseAction {
    TakeCase,
    StartInvestigation,
    Escalate,
    ResolveCleared,
    ResolveConfirmedFraud,
    ResolveSystemError,
    Note,
}

impl std::fmt::Display for CaseAction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            CaseAction::TakeCase => "take_case",
            CaseAction::StartInvestigation => "start_investigation",
            CaseAction::Escalate => "escalate",
            CaseAction::ResolveCleared => "resolve_cleared",
            CaseAction::ResolveConfirmedFraud => "resolve_confirmed_fraud",
            CaseAction::ResolveSystemError => "resolve_system_error",
            CaseAction::Note => "note",
        };
        write!(f, "{}", name)
    }
}

/// One applied action. Records are append-only; nothing ever edits or
/// removes one.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FraudActionRecord {
    pub action: CaseAction,
    pub actor: String,
    pub note: Option<String>,
    pub applied_at: DateTime<Utc>,
    pub resulting_status: CaseStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FraudCase {
    pub case_id: Uuid,
    pub flag: FraudFlag,
    pub status: CaseStatus,
    pub opened_at: DateTime<Utc>,
    pub history: Vec<FraudActionRecord>,
}

impl FraudCase {
    pub fn open(flag: FraudFlag, now: DateTime<Utc>) -> Self {
        FraudCase {
            case_id: Uuid::new_v4(),
            flag,
            status: CaseStatus::PendingReview,
            opened_at: now,
            history: Vec::new(),
        }
    }

    /// Apply one action, validating it against the current state.
    ///
    /// On success exactly one record is appended and the new status is
    /// returned. An invalid action changes nothing.
    pub fn apply(
        &mut self,
        action: CaseAction,
        actor: impl Into<String>,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CaseStatus, FraudError> {
        let next = self.next_status(action)?;

        self.history.push(FraudActionRecord {
            action,
            actor: actor.into(),
            note,
            applied_at: now,
            resulting_status: next,
        });
        self.status = next;

        Ok(next)
    }

    // The transition table
    fn next_status(&self, action: CaseAction) -> Result<CaseStatus, FraudError> {
        use CaseAction::*;
        use CaseStatus::*;

        if action == Note {
            return Ok(self.status);
        }
        if self.status.is_terminal() {
            return Err(FraudError::CaseResolved(self.status.to_string()));
        }

        match (self.status, action) {
            (PendingReview, TakeCase) => Ok(Triaged),
            (Triaged, StartInvestigation) => Ok(Investigating),
            (Triaged, Escalate) | (Investigating, Escalate) => Ok(Escalated),
            (Triaged, ResolveCleared)
            | (Investigating, ResolveCleared)
            | (Escalated, ResolveCleared) => Ok(ResolvedCleared),
            (Triaged, ResolveConfirmedFraud)
            | (Investigating, ResolveConfirmedFraud)
            | (Escalated, ResolveConfirmedFraud) => Ok(ResolvedConfirmedFraud),
            (Triaged, ResolveSystemError)
            | (Investigating, ResolveSystemError)
            | (Escalated, ResolveSystemError) => Ok(ResolvedSystemError),
            (state, action) => Err(FraudError::InvalidTransition {
                state: state.to_string(),
                action: action.to_string(),
            }),
        }
    }
}

/// Open a case and anchor the flag in the oversight ledger.
pub fn flag_fraud(
    state: &mut ElectionState,
    flag: FraudFlag,
    now: DateTime<Utc>,
) -> Result<Uuid, ValidationError> {
    let case = FraudCase::open(flag, now);
    let case_id = case.case_id;

    state.ledgers.record(
        LedgerEvent::FraudFlagged(FraudFlagged {
            case_id,
            flagged_by: case.flag.flagged_by.clone(),
            reason: case.flag.reason.clone(),
        }),
        now,
    )?;
    state.fraud_cases.insert(case_id, case);

    Ok(case_id)
}

/// Apply an action to an open case and anchor it in the oversight ledger.
pub fn apply_fraud_action(
    state: &mut ElectionState,
    case_id: Uuid,
    action: CaseAction,
    actor: impl Into<String>,
    note: Option<String>,
    now: DateTime<Utc>,
) -> Result<CaseStatus, Error> {
    let case = state
        .fraud_cases
        .get_mut(&case_id)
        .ok_or_else(|| Error::StateNotFound(case_id.to_string()))?;

    let resulting = case.apply(action, actor, note, now)?;

    state.ledgers.record(
        LedgerEvent::FraudActionTaken(FraudActionTaken {
            case_id,
            action: action.to_string(),
            resulting_status: resulting.to_string(),
        }),
        now,
    )?;

    Ok(resulting)
}
