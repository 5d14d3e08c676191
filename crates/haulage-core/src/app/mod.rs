//! App - アプリケーション層
//!
//! depot と ports を組み合わせて、動くアプリケーションに仕立てます。
//!
//! # 主要コンポーネント
//! - **DepotBuilder**: 構築とワイヤリング（起動時検証・復元）
//! - **SweepLoop**: 予約・掲示・積荷の定期回収
//! - **PublisherLoop**: Outbox effect の配送
//! - **Admin**: 運用者向けの操作
//! - **DepotStatus**: 状態の集計ビュー

pub mod admin;
pub mod builder;
pub mod handle;
pub mod publisher_loop;
pub mod status;
pub mod sweep_loop;

// 主要な型を再エクスポート
pub use self::admin::{Admin, LoadView};
pub use self::builder::{App, BuildError, DepotBuilder};
pub use self::handle::LoopGroup;
pub use self::publisher_loop::{PublishReport, PublisherLoop};
pub use self::status::DepotStatus;
pub use self::sweep_loop::SweepLoop;
