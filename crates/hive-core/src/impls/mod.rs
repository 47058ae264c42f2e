//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryJobStore**: 単一 mutex で守る正本（開発・テスト・単一プロセス運用向け）
//! - **DependencyIndex**: 依存エッジの隣接リスト（逆引き付き）
//!
//! ネットワーク越しのストアは `JobStore` を別クレートで実装し、
//! `modify` を `Job::version` の条件付き書き込みで表現します。

pub mod graph;
pub mod memory_store;

pub use self::graph::DependencyIndex;
pub use self::memory_store::InMemoryJobStore;
