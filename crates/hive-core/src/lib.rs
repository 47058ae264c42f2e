//! hive-core
//!
//! Decentralized job coordination: agents discover jobs, compete for them
//! through leased locks and bids, leave decaying pheromone signals, and respect
//! a dependency DAG with blockers, while per-group processors schedule and
//! execute whatever is ready.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, status, job, lock, bid, pheromone, blocker, plan, errors）
//! - **ports**: 抽象化レイヤー（JobStore, Clock, IdGenerator, JobExecutor, JobGenerator）
//! - **impls**: 実装（InMemoryJobStore, DependencyIndex）
//! - **app**: アプリケーションロジック（Engine, LockManager, BiddingMarket, PheromoneField,
//!   DependencyGraph, GroupProcessor, EngineBuilder）
//! - **config**: TOML 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{Engine, EngineBuilder, GroupProcessor, ProcessorReport};
pub use config::{ConfigError, EngineConfig};
pub use domain::EngineError;
