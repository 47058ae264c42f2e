//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。エンジンはこれらの trait 越しにだけ
//! 外部（ストレージ、時刻、実行系、ジョブ生成）に触れます。

pub mod clock;
pub mod executor;
pub mod generator;
pub mod id_generator;
pub mod job_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::executor::{ExecutionError, JobExecutor};
pub use self::generator::JobGenerator;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::{JobStore, Mutation, Precondition, StatusCounts};
