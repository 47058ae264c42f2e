//! Domain model: ids, the job record and everything embedded in it.
//!
//! Mutations live next to the data they touch (`lock.rs` owns `Job::try_lock`,
//! `bid.rs` owns `Job::place_bid`, ...). They are pure functions of the record
//! and an explicit `now`, so the store can run them inside one atomic step.

pub mod bid;
pub mod blocker;
pub mod errors;
pub mod ids;
pub mod job;
pub mod lock;
pub mod pheromone;
pub mod plan;
pub mod status;

pub use bid::{AcceptedBid, Bid, BidState};
pub use blocker::{Blocker, BlockerKind};
pub use errors::EngineError;
pub use ids::{AgentId, BidId, BlockerId, JobId, ParseIdError};
pub use job::{Job, JobFilter, JobPatch, JobSpec};
pub use lock::{LockInfo, LockStatus};
pub use pheromone::{PheromoneEntry, PheromoneReading};
pub use plan::{DependencyEdge, Plan, PlanImport, PlannedEdge, PlannedJob};
pub use status::JobStatus;
