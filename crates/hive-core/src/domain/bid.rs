//! Bids placed by agents competing for a job.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::EngineError;
use super::ids::{AgentId, BidId, JobId};
use super::job::Job;
use super::lock::LockInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidState {
    Active,
    Accepted,
    /// Lost to another accepted bid.
    Invalidated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub job_id: JobId,
    pub agent_id: AgentId,
    pub agent_name: String,
    pub amount: f64,
    pub submitted_at: DateTime<Utc>,
    pub state: BidState,
}

impl Bid {
    pub fn new(
        id: BidId,
        job_id: JobId,
        agent_id: AgentId,
        agent_name: impl Into<String>,
        amount: f64,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            job_id,
            agent_id,
            agent_name: agent_name.into(),
            amount,
            submitted_at,
            state: BidState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == BidState::Active
    }

    /// Market order: highest amount first, earliest submission breaks ties.
    pub fn market_order(a: &Bid, b: &Bid) -> Ordering {
        b.amount
            .total_cmp(&a.amount)
            .then_with(|| a.submitted_at.cmp(&b.submitted_at))
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Result of accepting a bid: the winning bid and the lock it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedBid {
    pub success: bool,
    pub bid: Bid,
    pub lock: LockInfo,
}

impl Job {
    /// Record a bid, replacing the same agent's active bid.
    pub fn place_bid(&mut self, bid: Bid, now: DateTime<Utc>) -> Result<Bid, EngineError> {
        if !bid.amount.is_finite() || bid.amount <= 0.0 {
            return Err(EngineError::InvalidBid {
                job_id: self.id,
                reason: format!("amount must be positive, got {}", bid.amount),
            });
        }

        let status = self.effective_status(now);
        if !status.accepts_bids() {
            return Err(EngineError::InvalidBid {
                job_id: self.id,
                reason: format!("job is {status}"),
            });
        }

        if let Some(lock) = self.live_lock(now) {
            if lock.agent_id != bid.agent_id {
                return Err(EngineError::AlreadyLocked {
                    job_id: self.id,
                    holder: lock.agent_id.clone(),
                });
            }
        }

        self.bids
            .retain(|existing| !(existing.is_active() && existing.agent_id == bid.agent_id));
        self.bids.push(bid.clone());
        self.touch(now);
        Ok(bid)
    }

    /// Lock the job for the bid's agent and invalidate every other active bid.
    pub fn accept_bid(
        &mut self,
        bid_id: BidId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<AcceptedBid, EngineError> {
        let winner = self
            .bids
            .iter()
            .find(|bid| bid.id == bid_id)
            .cloned()
            .ok_or_else(|| EngineError::bid_not_found(bid_id))?;

        if !winner.is_active() {
            return Err(EngineError::InvalidBid {
                job_id: self.id,
                reason: format!("bid {bid_id} is no longer active"),
            });
        }

        let lock = self.try_lock(&winner.agent_id, &winner.agent_name, ttl, now)?;

        for bid in &mut self.bids {
            if bid.id == bid_id {
                bid.state = BidState::Accepted;
            } else if bid.is_active() {
                bid.state = BidState::Invalidated;
            }
        }

        let mut bid = winner;
        bid.state = BidState::Accepted;
        Ok(AcceptedBid {
            success: true,
            bid,
            lock,
        })
    }

    /// All bids in market order.
    pub fn ranked_bids(&self) -> Vec<Bid> {
        let mut bids = self.bids.clone();
        bids.sort_by(Bid::market_order);
        bids
    }
}
