//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID + ジェネリック実装
//! エンジン内部で採番する ID（Job / Bid / Blocker）は ULID を使います。
//! Phantom type パターンで共通実装を 1 つにまとめつつ、
//! `JobId` と `BidId` を取り違えるとコンパイルエラーになります。
//!
//! Agent はエンジンの外側で生まれる主体なので、`AgentId` は文字列の newtype です。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"job-", "bid-", "blocker-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Fresh id from the process-wide ULID source (tests and ad-hoc callers).
    /// Engine code goes through `IdGenerator` so the timestamp follows the `Clock`.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when parsing an id from its display form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {expected}id: {input}")]
pub struct ParseIdError {
    expected: &'static str,
    input: String,
}

/// Accepts both the prefixed display form (`job-01H...`) and a bare ULID.
impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self::from_ulid)
            .map_err(|_| ParseIdError {
                expected: T::prefix(),
                input: s.to_string(),
            })
    }
}

// ========================================
// マーカー型の定義
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Job {}

impl IdMarker for Job {
    fn prefix() -> &'static str {
        "job-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bid {}

impl IdMarker for Bid {
    fn prefix() -> &'static str {
        "bid-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Blocker {}

impl IdMarker for Blocker {
    fn prefix() -> &'static str {
        "blocker-"
    }
}

/// Identifier of a Job (the unit that is locked, bid on and executed).
pub type JobId = Id<Job>;

/// Identifier of a Bid placed on a job.
pub type BidId = Id<Bid>;

/// Identifier of a Blocker raised on a job.
pub type BlockerId = Id<Blocker>;

/// Identity of an agent as reported by the agent itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let ulid1 = Ulid::new();
        let ulid2 = Ulid::new();

        let job = JobId::from_ulid(ulid1);
        let bid = BidId::from_ulid(ulid2);

        assert_eq!(job.as_ulid(), ulid1);
        assert_eq!(bid.as_ulid(), ulid2);

        assert!(job.to_string().starts_with("job-"));
        assert!(bid.to_string().starts_with("bid-"));
        assert!(BlockerId::generate().to_string().starts_with("blocker-"));

        // let _: JobId = bid; // <- does not compile
    }

    #[test]
    fn display_form_parses_back() {
        let job = JobId::generate();
        let parsed: JobId = job.to_string().parse().unwrap();
        assert_eq!(parsed, job);

        let bare: JobId = job.as_ulid().to_string().parse().unwrap();
        assert_eq!(bare, job);
    }

    #[test]
    fn garbage_does_not_parse() {
        let err = "job-not-a-ulid".parse::<JobId>().unwrap_err();
        assert!(err.to_string().contains("job-"));
    }

    #[test]
    fn ulid_ids_can_be_serialized() {
        let job_id = JobId::generate();
        let serialized = serde_json::to_string(&job_id).unwrap();
        let deserialized: JobId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(job_id, deserialized);
    }

    #[test]
    fn agent_id_serializes_as_plain_string() {
        let agent = AgentId::new("agent-7");
        assert_eq!(serde_json::to_string(&agent).unwrap(), "\"agent-7\"");
        assert_eq!(agent.to_string(), "agent-7");
    }
}
