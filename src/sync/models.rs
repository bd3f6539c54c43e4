//! Sync Data Models - Operation Records & Core Types
//!
//! Defines the durable operation record, its payload variants (one per
//! entity action), network state, backoff policy, and the outcome type
//! strategies report back to the queue manager.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Operation Kind & Status
// ============================================================================

/// Coarse mutation intent, independent of entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "update" => Self::Update,
            "delete" => Self::Delete,
            _ => Self::Create,
        }
    }
}

/// Operation lifecycle state
///
/// `Pending → Processing → {Succeeded | Failed → Pending | DeadLetter}`.
/// Succeeded records are removed from the queue; DeadLetter records are kept
/// for inspection and manual retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Processing,
    Failed,
    DeadLetter,
    Succeeded,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Failed => "failed",
            Self::DeadLetter => "dead_letter",
            Self::Succeeded => "succeeded",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "processing" => Self::Processing,
            "failed" => Self::Failed,
            "dead_letter" => Self::DeadLetter,
            "succeeded" => Self::Succeeded,
            _ => Self::Pending,
        }
    }
}

// ============================================================================
// Conflict Policy
// ============================================================================

/// Conflict resolution policy, selectable per call site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Adopt the newer remote state, discard the local mutation (default)
    #[default]
    RemoteWins,

    /// Force remote to adopt the local payload
    LocalWins,

    /// Field-level union preferring non-null local values; timestamps
    /// always come from remote
    Merge,

    /// Requires a UI round-trip the engine cannot do; resolved as
    /// RemoteWins with an audit log entry
    PromptUser,
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCreatePayload {
    pub club_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opponent_id: Option<String>,
    pub scores: String,
    pub match_type: String, // "singles", "doubles"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub played_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchUpdatePayload {
    pub id: String,
    pub fields: serde_json::Value,
    /// `updated_at` of the local snapshot this edit was built from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDeletePayload {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClubJoinPayload {
    pub club_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClubLeavePayload {
    pub club_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdatePayload {
    pub user_id: String,
    pub fields: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeCreatePayload {
    pub club_id: String,
    pub challenger_id: String,
    pub challenged_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeRespondPayload {
    pub challenge_id: String,
    pub response: String, // "accepted", "declined"
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvitationCreatePayload {
    pub club_id: String,
    pub inviter_id: String,
    pub invitee_ids: Vec<String>,
    pub match_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvitationRespondPayload {
    pub invitation_id: String,
    pub participant_id: String,
    pub response: String, // "accepted", "declined"
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvitationCancelPayload {
    pub invitation_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvitationConfirmPayload {
    pub invitation_id: String,
    /// Participants whose responses are confirmed together with the
    /// invitation - a multi-record transaction
    pub participant_ids: Vec<String>,
}

/// Tagged payload union, keyed by operation name.
///
/// The serde tag doubles as the `operation_name` stored in the queue, so a
/// payload always deserializes back into the matching variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "snake_case")]
pub enum OperationPayload {
    CreateMatch(MatchCreatePayload),
    UpdateMatch(MatchUpdatePayload),
    DeleteMatch(MatchDeletePayload),
    JoinClub(ClubJoinPayload),
    LeaveClub(ClubLeavePayload),
    UpdateProfile(ProfileUpdatePayload),
    CreateChallenge(ChallengeCreatePayload),
    RespondChallenge(ChallengeRespondPayload),
    CreateInvitation(InvitationCreatePayload),
    RespondInvitation(InvitationRespondPayload),
    CancelInvitation(InvitationCancelPayload),
    ConfirmInvitation(InvitationConfirmPayload),
}

impl OperationPayload {
    /// Logical resource the payload mutates
    pub fn entity(&self) -> &'static str {
        match self {
            Self::CreateMatch(_) | Self::UpdateMatch(_) | Self::DeleteMatch(_) => "match",
            Self::JoinClub(_) | Self::LeaveClub(_) => "club",
            Self::UpdateProfile(_) => "user",
            Self::CreateChallenge(_) | Self::RespondChallenge(_) => "challenge",
            Self::CreateInvitation(_)
            | Self::RespondInvitation(_)
            | Self::CancelInvitation(_)
            | Self::ConfirmInvitation(_) => "invitation",
        }
    }

    /// Fine-grained action name, matching the serde tag
    pub fn operation_name(&self) -> &'static str {
        match self {
            Self::CreateMatch(_) => "create_match",
            Self::UpdateMatch(_) => "update_match",
            Self::DeleteMatch(_) => "delete_match",
            Self::JoinClub(_) => "join_club",
            Self::LeaveClub(_) => "leave_club",
            Self::UpdateProfile(_) => "update_profile",
            Self::CreateChallenge(_) => "create_challenge",
            Self::RespondChallenge(_) => "respond_challenge",
            Self::CreateInvitation(_) => "create_invitation",
            Self::RespondInvitation(_) => "respond_invitation",
            Self::CancelInvitation(_) => "cancel_invitation",
            Self::ConfirmInvitation(_) => "confirm_invitation",
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Self::CreateMatch(_)
            | Self::JoinClub(_)
            | Self::CreateChallenge(_)
            | Self::CreateInvitation(_) => OperationKind::Create,
            Self::UpdateMatch(_)
            | Self::UpdateProfile(_)
            | Self::RespondChallenge(_)
            | Self::RespondInvitation(_)
            | Self::CancelInvitation(_)
            | Self::ConfirmInvitation(_) => OperationKind::Update,
            Self::DeleteMatch(_) | Self::LeaveClub(_) => OperationKind::Delete,
        }
    }
}

// ============================================================================
// Metadata & Operation Record
// ============================================================================

/// Correlation data carried alongside a payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub club_id: Option<String>,

    /// Local-only record identifier; replaced with the remote-assigned id
    /// in the local mirror once the create is confirmed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
}

pub const DEFAULT_MAX_RETRIES: i32 = 5;

/// Durable description of one pending mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Stable unique identifier, assigned at enqueue time
    pub id: String,
    pub kind: OperationKind,
    pub entity: String,
    pub operation_name: String,
    pub payload: OperationPayload,
    pub metadata: OperationMetadata,
    pub status: OperationStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Operation {
    pub fn new(payload: OperationPayload, metadata: OperationMetadata) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: payload.kind(),
            entity: payload.entity().to_string(),
            operation_name: payload.operation_name().to_string(),
            payload,
            metadata,
            status: OperationStatus::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            next_retry_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a drain pass may pick this operation up now
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        if self.status != OperationStatus::Pending {
            return false;
        }
        match self.next_retry_at {
            Some(next) => next <= now,
            None => true,
        }
    }
}

// ============================================================================
// Backoff Policy
// ============================================================================

/// Exponential backoff parameters.
///
/// `delay = min(base * multiplier^retry_count, max)` - a pure function of the
/// retry count, so schedules are testable without real timers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_delay_secs: i64,
    pub multiplier: i64,
    pub max_delay_secs: i64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_secs: 30,
            multiplier: 2,
            max_delay_secs: 3600,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the attempt following `retry_count` failures
    pub fn delay_secs(&self, retry_count: i32) -> i64 {
        let factor = self.multiplier.saturating_pow(retry_count.max(0) as u32);
        self.base_delay_secs
            .saturating_mul(factor)
            .min(self.max_delay_secs)
    }

    /// Earliest timestamp the operation becomes eligible again
    pub fn next_retry_at(&self, retry_count: i32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.delay_secs(retry_count))
    }
}

// ============================================================================
// Network State
// ============================================================================

/// Connection transport reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Wifi,
    Cellular,
    Ethernet,
    None,
    Unknown,
}

/// Derived connection quality - used for UI and telemetry only, never for
/// correctness decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Poor,
    Offline,
}

/// Current network state, produced exclusively by the network monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    pub connected: bool,
    pub transport: Transport,
    /// `None` when reachability has not been determined yet
    pub internet_reachable: Option<bool>,
}

impl NetworkState {
    pub fn offline() -> Self {
        Self {
            connected: false,
            transport: Transport::None,
            internet_reachable: Some(false),
        }
    }

    pub fn wifi() -> Self {
        Self {
            connected: true,
            transport: Transport::Wifi,
            internet_reachable: Some(true),
        }
    }

    pub fn cellular() -> Self {
        Self {
            connected: true,
            transport: Transport::Cellular,
            internet_reachable: Some(true),
        }
    }

    /// Unknown state used when the platform signal is unavailable
    pub fn unknown() -> Self {
        Self {
            connected: false,
            transport: Transport::Unknown,
            internet_reachable: None,
        }
    }

    /// Pure quality classification from transport type
    pub fn quality(&self) -> ConnectionQuality {
        if !self.connected {
            return ConnectionQuality::Offline;
        }
        match self.transport {
            Transport::Wifi | Transport::Ethernet => ConnectionQuality::Excellent,
            Transport::Cellular => ConnectionQuality::Good,
            Transport::None | Transport::Unknown => ConnectionQuality::Poor,
        }
    }

    /// Human-readable connection label
    pub fn describe(&self) -> &'static str {
        if !self.connected {
            return "Offline";
        }
        match self.transport {
            Transport::Wifi => "Online (Wi-Fi)",
            Transport::Ethernet => "Online (Ethernet)",
            Transport::Cellular => "Online (Cellular)",
            Transport::None | Transport::Unknown => "Online (Unknown)",
        }
    }
}

// ============================================================================
// Execution Outcome
// ============================================================================

/// Result of a strategy `execute`, consumed only by the queue manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,

    /// Remote record returned on success, used to splice remote-assigned ids
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Whether a failure is transient and worth a retry
    pub should_retry: bool,
}

impl ExecutionOutcome {
    pub fn ok(data: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            data,
            error: None,
            should_retry: false,
        }
    }

    pub fn retryable(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            should_retry: true,
        }
    }

    pub fn permanent(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            should_retry: false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            OperationStatus::Pending,
            OperationStatus::Processing,
            OperationStatus::Failed,
            OperationStatus::DeadLetter,
            OperationStatus::Succeeded,
        ] {
            assert_eq!(OperationStatus::from_str(status.as_str()), status);
        }
    }

    #[test]
    fn test_payload_tags() {
        let payload = OperationPayload::CreateMatch(MatchCreatePayload {
            club_id: "c1".to_string(),
            opponent_id: None,
            scores: "6-4,6-3".to_string(),
            match_type: "singles".to_string(),
            played_at: None,
        });

        assert_eq!(payload.entity(), "match");
        assert_eq!(payload.operation_name(), "create_match");
        assert_eq!(payload.kind(), OperationKind::Create);

        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"op\":\"create_match\""));

        let back: OperationPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_operation_new_defaults() {
        let op = Operation::new(
            OperationPayload::CancelInvitation(InvitationCancelPayload {
                invitation_id: "i1".to_string(),
            }),
            OperationMetadata::default(),
        );

        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);
        assert_eq!(op.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(op.entity, "invitation");
        assert_eq!(op.operation_name, "cancel_invitation");
        assert!(op.next_retry_at.is_none());
        assert!(op.is_eligible(Utc::now()));
    }

    #[test]
    fn test_eligibility_respects_next_retry() {
        let mut op = Operation::new(
            OperationPayload::DeleteMatch(MatchDeletePayload {
                id: "m1".to_string(),
            }),
            OperationMetadata::default(),
        );

        let now = Utc::now();
        op.next_retry_at = Some(now + Duration::seconds(60));
        assert!(!op.is_eligible(now));
        assert!(op.is_eligible(now + Duration::seconds(61)));

        op.status = OperationStatus::DeadLetter;
        assert!(!op.is_eligible(now + Duration::seconds(61)));
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.delay_secs(0), 30);
        assert_eq!(policy.delay_secs(1), 60);
        assert_eq!(policy.delay_secs(2), 120);

        // Strictly increasing until the cap
        assert!(policy.delay_secs(3) > policy.delay_secs(2));

        // Capped at max_delay_secs
        assert_eq!(policy.delay_secs(20), 3600);
        assert_eq!(policy.delay_secs(1000), 3600);
    }

    #[test]
    fn test_backoff_next_retry_at() {
        let policy = BackoffPolicy::default();
        let now = Utc::now();

        let first = policy.next_retry_at(0, now);
        let second = policy.next_retry_at(1, now);

        assert_eq!((first - now).num_seconds(), 30);
        assert!(second > first);
    }

    #[test]
    fn test_quality_classification() {
        assert_eq!(NetworkState::wifi().quality(), ConnectionQuality::Excellent);
        assert_eq!(NetworkState::cellular().quality(), ConnectionQuality::Good);
        assert_eq!(NetworkState::offline().quality(), ConnectionQuality::Offline);

        let connected_unknown = NetworkState {
            connected: true,
            transport: Transport::Unknown,
            internet_reachable: None,
        };
        assert_eq!(connected_unknown.quality(), ConnectionQuality::Poor);
    }

    #[test]
    fn test_describe_labels() {
        assert_eq!(NetworkState::wifi().describe(), "Online (Wi-Fi)");
        assert_eq!(NetworkState::offline().describe(), "Offline");
    }

    #[test]
    fn test_outcome_constructors() {
        let ok = ExecutionOutcome::ok(Some(serde_json::json!({"id": "m1"})));
        assert!(ok.success);
        assert!(!ok.should_retry);

        let transient = ExecutionOutcome::retryable("timeout");
        assert!(!transient.success);
        assert!(transient.should_retry);

        let fatal = ExecutionOutcome::permanent("bad payload");
        assert!(!fatal.success);
        assert!(!fatal.should_retry);
    }
}
