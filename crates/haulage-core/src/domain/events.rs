//! Events - 監査イベント
//!
//! 監査ログに積まれるイベントの種類は閉じた列挙です。
//! 紛争処理と保険審査はこの列挙だけを根拠にします。

use serde::{Deserialize, Serialize};

use super::ids::{ActorId, JobId, LoadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    // reservation
    JobReserved,
    ReservationReleased,
    ReservationExpired,

    // acceptance and movement
    LoadAccepted,
    Departed,
    ArrivedAtStop,
    DepartedStop,
    ArrivedAtDestination,
    DistressDeclared,
    DistressResolved,

    // cargo condition
    SealApplied,
    SealBroken,
    ExcursionStarted,
    ExcursionEnded,
    TemperatureRecorded,
    IntegrityDamaged,
    IntegrityRestored,
    WelfareChanged,

    // compliance
    WeighStationPassed,
    WeighStationFailed,
    PreTripCompleted,
    ManifestVerified,
    EngineOff,
    EngineOn,

    // time
    WindowExtended,
    WindowPenalized,

    // terminal
    LoadDelivered,
    LoadRejected,
    LoadStolen,
    LoadAbandoned,
    LoadExpired,

    // insurance
    ClaimApproved,
    ClaimDenied,
    ClaimPaid,
}

impl AuditEventKind {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AuditEventKind::LoadDelivered
                | AuditEventKind::LoadRejected
                | AuditEventKind::LoadStolen
                | AuditEventKind::LoadAbandoned
                | AuditEventKind::LoadExpired
        )
    }
}

/// An event produced by a load mutation, before it is sequenced into the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadEvent {
    pub kind: AuditEventKind,
    pub payload: serde_json::Value,
}

impl LoadEvent {
    pub fn new(kind: AuditEventKind, payload: serde_json::Value) -> Self {
        Self { kind, payload }
    }

    pub fn bare(kind: AuditEventKind) -> Self {
        Self::new(kind, serde_json::Value::Null)
    }
}

/// One immutable entry of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub seq: u64,
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_id: Option<LoadId>,
    pub actor: ActorId,
    pub kind: AuditEventKind,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
    pub at: i64,
}
