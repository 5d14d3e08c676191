//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（セッション層・免許管理・評判・通知・永続化）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - デポのメモリ上の状態が正本（source of truth）
//! - 時刻は Clock からのみ取得する
//! - I/O を伴う trait は async-trait

pub mod clock;
pub mod collaborators;
pub mod id_generator;
pub mod state_store;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, ReconciledClock, SystemClock};
pub use self::collaborators::{
    NotificationSink, PopulationSignal, PortError, Presence, ReputationAdjuster,
    RequirementChecker, SessionProvider,
};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::state_store::{StateStore, StoreError};
