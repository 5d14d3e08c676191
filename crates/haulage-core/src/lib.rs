//! haulage-core
//!
//! Core of the freight dispatch service: job board, reservations, the load
//! lifecycle, payouts, deposits and insurance.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, catalog, posting, load, outcome, errors, events）
//! - **board / reservation**: 掲示板と予約の排他制御
//! - **payout**: 報酬計算パイプライン（純粋関数）
//! - **ledger / audit / outbox**: 残高・監査ログ・外部への effect
//! - **depot**: 上記を束ねる状態の正本とトランザクション
//! - **ports**: 抽象化レイヤー（Clock, SessionProvider, StateStore, など）
//! - **impls**: ports の実装（インメモリ・JSON ファイル）
//! - **app**: アプリケーション層（builder, sweep_loop, publisher_loop, admin, status）

pub mod app;
pub mod audit;
pub mod board;
pub mod config;
pub mod depot;
pub mod domain;
pub mod impls;
pub mod ledger;
pub mod outbox;
pub mod payout;
pub mod ports;
pub mod reservation;
