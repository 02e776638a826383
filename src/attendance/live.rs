//! Live view of the `status` collection.
//!
//! Subscribers get the current matching statuses first, then every change.
//! Delivery is at-least-once: a subscriber that falls behind the feed re-reads
//! the collection and replays what it missed as upserts and removals.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tracing::{debug, warn};

use crate::model::status::{EmployeeStatus, WorkStatus};
use crate::store::{self, ChangeEvent, ChangeKind, Collection, Filter, Store, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Employee(String),
    OnBreak,
    Status(WorkStatus),
    Department(String),
}

impl StatusFilter {
    pub fn matches(&self, status: &EmployeeStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Employee(id) => status.employee_id == *id,
            StatusFilter::OnBreak => status.status.is_on_break(),
            StatusFilter::Status(wanted) => status.status == *wanted,
            StatusFilter::Department(id) => status.department.as_deref() == Some(id.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusChange {
    Upserted(EmployeeStatus),
    /// Clocked out, or no longer matching the subscription.
    Removed(String),
}

#[derive(Clone)]
pub struct LiveStatusChannel {
    store: Arc<dyn Store>,
}

impl LiveStatusChannel {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn subscribe(&self, filter: StatusFilter) -> StoreResult<StatusSubscription> {
        // Listen before reading so nothing written in between is lost.
        let feed = self.store.subscribe();
        let current = matching(self.store.as_ref(), &filter).await?;
        let visible = current.iter().map(|status| status.employee_id.clone()).collect();
        Ok(StatusSubscription {
            store: self.store.clone(),
            feed,
            filter,
            visible,
            pending: current.into_iter().map(StatusChange::Upserted).collect(),
        })
    }

    pub async fn subscribe_employee(&self, employee_id: &str) -> StoreResult<StatusSubscription> {
        self.subscribe(StatusFilter::Employee(employee_id.to_string())).await
    }
}

async fn matching(store: &dyn Store, filter: &StatusFilter) -> StoreResult<Vec<EmployeeStatus>> {
    Ok(store::query_as::<EmployeeStatus>(store, Collection::Status, &Filter::all())
        .await?
        .into_iter()
        .map(|(_, status)| status)
        .filter(|status| filter.matches(status))
        .collect())
}

pub struct StatusSubscription {
    store: Arc<dyn Store>,
    feed: broadcast::Receiver<ChangeEvent>,
    filter: StatusFilter,
    visible: HashSet<String>,
    pending: VecDeque<StatusChange>,
}

impl StatusSubscription {
    pub fn filter(&self) -> &StatusFilter {
        &self.filter
    }

    /// Next change, or `None` once the store's feed is gone.
    pub async fn next(&mut self) -> Option<StatusChange> {
        loop {
            if let Some(change) = self.pending.pop_front() {
                return Some(change);
            }
            let event = match self.feed.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, filter = ?self.filter, "Status subscriber lagged behind the change feed");
                    self.resync().await;
                    continue;
                }
                Err(RecvError::Closed) => return None,
            };
            if let Some(change) = self.apply(event) {
                return Some(change);
            }
        }
    }

    /// Changes already in the feed, without waiting. `None` once caught up.
    pub async fn try_next(&mut self) -> Option<StatusChange> {
        loop {
            if let Some(change) = self.pending.pop_front() {
                return Some(change);
            }
            let event = match self.feed.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, filter = ?self.filter, "Status subscriber lagged behind the change feed");
                    self.resync().await;
                    continue;
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            };
            if let Some(change) = self.apply(event) {
                return Some(change);
            }
        }
    }

    /// Replaces the visible set with a fresh read, queueing an upsert for
    /// every match and a removal for every id that dropped out.
    async fn resync(&mut self) {
        let current = match matching(self.store.as_ref(), &self.filter).await {
            Ok(current) => current,
            Err(e) => {
                warn!(error = %e, filter = ?self.filter, "Status resync failed");
                return;
            }
        };
        let visible: HashSet<String> = current.iter().map(|status| status.employee_id.clone()).collect();
        let mut gone = self.visible.difference(&visible).cloned().collect::<Vec<_>>();
        gone.sort();
        self.pending.extend(gone.into_iter().map(StatusChange::Removed));
        self.pending.extend(current.into_iter().map(StatusChange::Upserted));
        self.visible = visible;
    }

    fn apply(&mut self, event: ChangeEvent) -> Option<StatusChange> {
        if event.collection != Collection::Status {
            return None;
        }
        let removed = |this: &mut Self, id: String| {
            let was_visible = this.visible.remove(&id);
            let is_watched = matches!(&this.filter, StatusFilter::Employee(watched) if *watched == id);
            (was_visible || is_watched).then_some(StatusChange::Removed(id))
        };

        match event.kind {
            ChangeKind::Deleted => removed(self, event.id),
            ChangeKind::Created | ChangeKind::Updated => {
                let doc = event.doc?;
                let status = match serde_json::from_value::<EmployeeStatus>(doc) {
                    Ok(status) => status,
                    Err(e) => {
                        debug!(employee_id = %event.id, error = %e, "Skipping unreadable status document");
                        return None;
                    }
                };
                if self.filter.matches(&status) {
                    self.visible.insert(event.id);
                    Some(StatusChange::Upserted(status))
                } else if self.visible.contains(&event.id) {
                    removed(self, event.id)
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::service::testing::Harness;
    use crate::model::status::BreakKind;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;
    use std::time::Duration;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
    }

    async fn next(subscription: &mut StatusSubscription) -> StatusChange {
        tokio::time::timeout(Duration::from_secs(1), subscription.next())
            .await
            .expect("no change delivered")
            .expect("feed closed")
    }

    async fn harness() -> Harness {
        let harness = Harness::new(utc(10, 0), None).await;
        harness.hire("e1", None).await;
        harness.hire("e2", None).await;
        harness
    }

    #[tokio::test]
    async fn employee_subscription_sees_its_own_shift() {
        let harness = harness().await;
        let live = LiveStatusChannel::new(harness.store.clone());
        let mut subscription = live.subscribe_employee("e1").await.unwrap();

        harness.service.clock_in("e2").await.unwrap();
        harness.service.clock_in("e1").await.unwrap();
        match next(&mut subscription).await {
            StatusChange::Upserted(status) => {
                assert_eq!(status.employee_id, "e1");
                assert_eq!(status.status, WorkStatus::Working);
            }
            other => panic!("unexpected {other:?}"),
        }

        harness.service.toggle_break("e1", BreakKind::Bio1).await.unwrap();
        match next(&mut subscription).await {
            StatusChange::Upserted(status) => assert_eq!(status.status, WorkStatus::OnBreak(BreakKind::Bio1)),
            other => panic!("unexpected {other:?}"),
        }

        harness.service.force_clock_out("e1").await.unwrap();
        assert_eq!(next(&mut subscription).await, StatusChange::Removed("e1".into()));
    }

    #[tokio::test]
    async fn existing_statuses_are_delivered_first() {
        let harness = harness().await;
        harness.service.clock_in("e1").await.unwrap();
        let live = LiveStatusChannel::new(harness.store.clone());
        let mut subscription = live.subscribe(StatusFilter::All).await.unwrap();
        assert!(matches!(next(&mut subscription).await, StatusChange::Upserted(s) if s.employee_id == "e1"));
    }

    #[tokio::test]
    async fn leaving_a_predicate_is_a_removal() {
        let harness = harness().await;
        harness.service.clock_in("e1").await.unwrap();
        harness.service.clock_in("e2").await.unwrap();
        let live = LiveStatusChannel::new(harness.store.clone());
        let mut on_break = live.subscribe(StatusFilter::OnBreak).await.unwrap();

        harness.service.toggle_break("e2", BreakKind::Lunch).await.unwrap();
        assert!(matches!(next(&mut on_break).await, StatusChange::Upserted(s) if s.employee_id == "e2"));

        // Unrelated writes are filtered out.
        harness.service.buzz("e1").await.unwrap();
        harness.service.toggle_break("e2", BreakKind::Lunch).await.unwrap();
        assert_eq!(next(&mut on_break).await, StatusChange::Removed("e2".into()));
    }

    #[tokio::test]
    async fn department_filter() {
        let harness = harness().await;
        let live = LiveStatusChannel::new(harness.store.clone());
        let mut ops = live.subscribe(StatusFilter::Department("ops".into())).await.unwrap();

        harness.service.clock_in("e1").await.unwrap();
        harness
            .store
            .update(Collection::Status, "e1", json!({ "department": "ops" }))
            .await
            .unwrap();
        assert!(matches!(next(&mut ops).await, StatusChange::Upserted(s) if s.employee_id == "e1"));
    }

    #[tokio::test]
    async fn lagging_subscriber_catches_up_on_a_missed_clock_out() {
        let harness = harness().await;
        harness.service.clock_in("e1").await.unwrap();
        let live = LiveStatusChannel::new(harness.store.clone());
        let mut subscription = live.subscribe_employee("e1").await.unwrap();
        assert!(matches!(next(&mut subscription).await, StatusChange::Upserted(s) if s.employee_id == "e1"));

        // The clock-out is pushed out of the feed before the subscriber reads it.
        harness.service.force_clock_out("e1").await.unwrap();
        for n in 0..2000 {
            harness
                .store
                .create(Collection::Messages, json!({ "message": format!("note {n}") }))
                .await
                .unwrap();
        }
        assert_eq!(next(&mut subscription).await, StatusChange::Removed("e1".into()));

        harness.service.clock_in("e1").await.unwrap();
        assert!(matches!(next(&mut subscription).await, StatusChange::Upserted(s) if s.employee_id == "e1"));
    }

    #[tokio::test]
    async fn try_next_drains_without_waiting() {
        let harness = harness().await;
        let live = LiveStatusChannel::new(harness.store.clone());
        let mut subscription = live.subscribe_employee("e1").await.unwrap();
        assert_eq!(subscription.try_next().await, None);

        harness.service.clock_in("e1").await.unwrap();
        harness.service.toggle_break("e1", BreakKind::Bio2).await.unwrap();
        assert!(matches!(subscription.try_next().await, Some(StatusChange::Upserted(s)) if s.status == WorkStatus::Working));
        assert!(
            matches!(subscription.try_next().await, Some(StatusChange::Upserted(s)) if s.status == WorkStatus::OnBreak(BreakKind::Bio2))
        );
        assert_eq!(subscription.try_next().await, None);
    }
}
