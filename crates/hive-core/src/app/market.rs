//! BiddingMarket - エージェントによる入札
//!
//! Acceptance is always explicit. `highest_bid` lets a caller build
//! auto-acceptance on top.

use std::sync::Arc;

use tracing::info;

use super::context::EngineContext;
use crate::domain::{AcceptedBid, AgentId, Bid, BidId, EngineError, Job, JobId};

#[derive(Clone)]
pub struct BiddingMarket {
    ctx: Arc<EngineContext>,
}

impl BiddingMarket {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Place a bid, replacing the agent's previous active bid on the job.
    pub async fn add_bid(
        &self,
        job_id: JobId,
        agent_id: &AgentId,
        agent_name: &str,
        amount: f64,
    ) -> Result<Bid, EngineError> {
        let now = self.ctx.now();
        let bid = Bid::new(
            self.ctx.ids.generate_bid_id(),
            job_id,
            agent_id.clone(),
            agent_name,
            amount,
            now,
        );
        let placed = bid.clone();
        self.ctx
            .store
            .modify(
                job_id,
                Box::new(move |job| job.place_bid(placed, now).map(|_| ())),
            )
            .await?;
        info!(job_id = %job_id, bid_id = %bid.id, agent_id = %agent_id, amount, "bid placed");
        Ok(bid)
    }

    /// Lock the job for the winning agent; every other active bid is invalidated
    /// in the same step.
    pub async fn accept_bid(&self, job_id: JobId, bid_id: BidId) -> Result<AcceptedBid, EngineError> {
        let ttl = self.ctx.config.bid_lock_ttl();
        let now = self.ctx.now();
        let job = self
            .ctx
            .store
            .modify(
                job_id,
                Box::new(move |job| job.accept_bid(bid_id, ttl, now).map(|_| ())),
            )
            .await?;

        let accepted = accepted_from(&job, bid_id)?;
        info!(
            job_id = %job_id,
            bid_id = %bid_id,
            agent_id = %accepted.bid.agent_id,
            amount = accepted.bid.amount,
            "bid accepted"
        );
        Ok(accepted)
    }

    /// Every bid on the job, highest amount first, earliest first on ties.
    pub async fn list_bids(&self, job_id: JobId) -> Result<Vec<Bid>, EngineError> {
        Ok(self.ctx.store.get(job_id).await?.ranked_bids())
    }

    pub async fn highest_bid(&self, job_id: JobId) -> Result<Option<Bid>, EngineError> {
        let bids = self.list_bids(job_id).await?;
        Ok(bids.into_iter().find(Bid::is_active))
    }
}

fn accepted_from(job: &Job, bid_id: BidId) -> Result<AcceptedBid, EngineError> {
    let bid = job
        .bids
        .iter()
        .find(|bid| bid.id == bid_id)
        .cloned()
        .ok_or_else(|| EngineError::bid_not_found(bid_id))?;
    let lock = job.lock.clone().ok_or_else(|| EngineError::Corrupted {
        job_id: job.id,
        detail: "accepted bid left no lock".into(),
    })?;
    Ok(AcceptedBid {
        success: true,
        bid,
        lock,
    })
}
