//! App - アプリケーション層
//!
//! ports を組み合わせて、エージェントに見せる操作を実装します。
//!
//! # 主要コンポーネント
//! - **EngineBuilder**: エンジンの構築とワイヤリング
//! - **Engine**: ファサード（ジョブのライフサイクル + 各コンポーネントへの委譲）
//! - **LockManager**: TTL 付きロック
//! - **BiddingMarket**: 入札と落札
//! - **PheromoneField**: 減衰するシグナル
//! - **DependencyGraph**: 依存関係・ブロッカー・実行可能判定
//! - **GroupProcessor**: グループ単位のスケジューリングループ

pub mod builder;
mod context;
pub mod dependency_graph;
pub mod engine;
pub mod lock_manager;
pub mod market;
pub mod pheromone_field;
pub mod processor;
pub mod retry;
pub mod status;

#[cfg(test)]
pub(crate) mod test_support;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, EngineBuilder};
pub use self::dependency_graph::{DependencyGraph, Readiness};
pub use self::engine::{Engine, FailureDisposition};
pub use self::lock_manager::LockManager;
pub use self::market::BiddingMarket;
pub use self::pheromone_field::{PheromoneField, PheromoneMatch};
pub use self::processor::{GroupProcessor, ProcessorReport, dispatch_order};
pub use self::retry::RetryPolicy;
pub use self::status::GroupStatus;
