//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID + Phantom Type
//! 掲示・積荷・保険の ID はすべて ULID で、生成順にソートできます。
//! `Id<T>` の `T` は実行時には使わないマーカー型で、
//! `JobId` と `LoadId` をコンパイル時に区別します。
//!
//! `ActorId` だけは外部のセッション層が払い出す不透明な文字列です。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"job-", "load-" など）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Job posting marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Job {}

impl IdMarker for Job {
    fn prefix() -> &'static str {
        "job-"
    }
}

/// Active load (bill of lading) marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Load {}

impl IdMarker for Load {
    fn prefix() -> &'static str {
        "bol-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Policy {}

impl IdMarker for Policy {
    fn prefix() -> &'static str {
        "policy-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Claim {}

impl IdMarker for Claim {
    fn prefix() -> &'static str {
        "claim-"
    }
}

/// Identifier of a board posting.
pub type JobId = Id<Job>;

/// Identifier of an active load (one per accepted job).
pub type LoadId = Id<Load>;

/// Identifier of an insurance policy.
pub type PolicyId = Id<Policy>;

/// Identifier of an insurance claim.
pub type ClaimId = Id<Claim>;

/// Stable actor identity supplied by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let job = JobId::from_ulid(Ulid::new());
        let load = LoadId::from_ulid(Ulid::new());
        let claim = ClaimId::from_ulid(Ulid::new());

        assert!(job.to_string().starts_with("job-"));
        assert!(load.to_string().starts_with("bol-"));
        assert!(claim.to_string().starts_with("claim-"));
        // let _: JobId = load; // <- does not compile
    }

    #[test]
    fn ids_serialize_as_bare_ulid() {
        let ulid = Ulid::new();
        let load = LoadId::from_ulid(ulid);

        let s = serde_json::to_string(&load).unwrap();
        assert_eq!(s, format!("\"{ulid}\""));

        let back: LoadId = serde_json::from_str(&s).unwrap();
        assert_eq!(back, load);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<JobId>(), size_of::<Ulid>());
        assert_eq!(size_of::<LoadId>(), 16);
    }

    #[test]
    fn actor_id_displays_raw_value() {
        let actor = ActorId::from("driver-7");
        assert_eq!(actor.to_string(), "driver-7");
        assert_eq!(actor.as_str(), "driver-7");
    }
}
