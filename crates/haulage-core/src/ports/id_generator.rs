//! IdGenerator port - ID 生成の抽象化
//!
//! テスト容易性のために trait として抽象化しています。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::ids::{ClaimId, JobId, LoadId, PolicyId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は掲示・積荷・保険の ID を生成
///
/// # ULID の特性
/// - 時刻でソート可能
/// - 調整なしで生成可能
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数タスクから使える）
pub trait IdGenerator: Send + Sync {
    fn job_id(&self) -> JobId;

    fn load_id(&self) -> LoadId;

    fn policy_id(&self) -> PolicyId;

    fn claim_id(&self) -> ClaimId;
}

/// Clock の時刻をタイムスタンプ部に使う ULID 生成器
///
/// FixedClock と組み合わせると、タイムスタンプ部分が決定的になります。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn job_id(&self) -> JobId {
        JobId::from(self.next())
    }

    fn load_id(&self) -> LoadId {
        LoadId::from(self.next())
    }

    fn policy_id(&self) -> PolicyId {
        PolicyId::from(self.next())
    }

    fn claim_id(&self) -> ClaimId {
        ClaimId::from(self.next())
    }
}
