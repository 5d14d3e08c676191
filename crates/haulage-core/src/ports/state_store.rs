//! StateStore port - 永続化の抽象化
//!
//! デポの状態はメモリ上の 1 つが正本で、変更のたびにスナップショットを
//! ここへ書き出します（write-through）。再起動時は `load()` から復元します。
//!
//! # 実装
//! - **InMemoryStateStore**: テスト用
//! - **JsonFileStore**: 単一プロセス運用向けの JSON ファイル

use async_trait::async_trait;
use thiserror::Error;

use crate::depot::DepotSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(String),

    #[error("snapshot could not be encoded or decoded: {0}")]
    Codec(String),

    #[error("snapshot version {found} is not supported (expected {expected})")]
    Version { found: u32, expected: u32 },
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Latest snapshot, or `None` on first start.
    async fn load(&self) -> Result<Option<DepotSnapshot>, StoreError>;

    async fn save(&self, snapshot: &DepotSnapshot) -> Result<(), StoreError>;
}
