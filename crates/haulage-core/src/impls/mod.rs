//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemorySessions / StaticRequirements / RegionPopulation**: 外部サービスの代役
//! - **TracingSink / RecordingSink**: 評判・通知の受け口
//! - **InMemoryStateStore / JsonFileStore**: スナップショットの保存先

pub mod directory;
pub mod sinks;
pub mod stores;

// 主要な型を再エクスポート
pub use self::directory::{InMemorySessions, RegionPopulation, StaticRequirements};
pub use self::sinks::{Recorded, RecordingSink, TracingSink};
pub use self::stores::{InMemoryStateStore, JsonFileStore};
