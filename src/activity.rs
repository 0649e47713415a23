//! Activity log and event bus.
//!
//! The log is append-only: entries are never updated or deleted. Every
//! committed activity is also published on a broadcast bus. The bus is a
//! wake-up signal; the store is the record, and consumers that need every
//! activity read it back by position with [`ActivityLog::after`].

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::error::Result;
use crate::model::{Activity, ActivityId, CandidateId};
use crate::store::Store;

/// Default bus capacity. Slow subscribers past this many events lag and
/// lose the oldest ones from the bus, never from the store.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct ActivityLog {
    store: Arc<dyn Store>,
    bus: broadcast::Sender<Activity>,
}

impl ActivityLog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_capacity(store, DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(store: Arc<dyn Store>, capacity: usize) -> Self {
        let (bus, _) = broadcast::channel(capacity);
        Self { store, bus }
    }

    /// Persist a standalone activity and publish it.
    pub async fn append(&self, activity: Activity) -> Result<ActivityId> {
        self.store.append_activity(&activity).await?;
        let id = activity.id;
        self.publish(activity);
        Ok(id)
    }

    /// Publish an activity the store already committed (as part of a
    /// candidate write).
    pub fn publish(&self, activity: Activity) {
        debug!(
            activity_id = %activity.id,
            candidate_id = %activity.candidate_id,
            kind = activity.kind.name(),
            depth = activity.depth,
            "activity published"
        );
        // No subscribers is fine: nothing is listening for workflows.
        let _ = self.bus.send(activity);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Activity> {
        self.bus.subscribe()
    }

    /// A candidate's activities in insertion order.
    pub async fn for_candidate(&self, candidate: CandidateId) -> Result<Vec<Activity>> {
        self.store.activities_for(candidate).await
    }

    /// Up to `limit` activities past log position `position`, oldest first.
    pub async fn after(&self, position: u64, limit: usize) -> Result<Vec<(u64, Activity)>> {
        self.store.activities_after(position, limit).await
    }

    /// Position of the newest activity.
    pub async fn head(&self) -> Result<u64> {
        self.store.activity_head().await
    }

    /// The most recent activity that counts as engagement with the candidate.
    pub async fn last_engagement(&self, candidate: CandidateId) -> Result<Option<Activity>> {
        let activities = self.store.activities_for(candidate).await?;
        Ok(activities.into_iter().rev().find(|a| a.kind.is_engagement()))
    }
}
