use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Seat availability of a slot over a window. A single-date window also
    /// counts that day's open trial bookings.
    pub async fn check_capacity(
        &self,
        slot_id: Ulid,
        window: DateRange,
        exclude_member: Option<Ulid>,
    ) -> Result<CapacityResult, EngineError> {
        if window.end < window.start {
            return Err(EngineError::InvalidTransition(
                "window end is before its start".into(),
            ));
        }
        if window.days() > MAX_QUERY_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let slot = self.require_slot(slot_id).await?;
        let trial_date = (window.start == window.end).then_some(window.start);
        let current = self
            .slot_occupancy(slot_id, window, exclude_member, trial_date)
            .await?;
        Ok(super::classify(&slot, current))
    }

    pub async fn get_subscription(
        &self,
        subscription_id: Ulid,
    ) -> Result<MembershipSubscription, EngineError> {
        self.require_subscription(subscription_id).await
    }

    pub async fn get_invoice(&self, invoice_id: Ulid) -> Result<Invoice, EngineError> {
        self.require_invoice(invoice_id).await
    }

    pub async fn list_slots(&self) -> Result<Vec<SessionSlot>, EngineError> {
        let mut slots = self.store.slots().await?;
        slots.sort_by_key(|s| s.start_time);
        Ok(slots)
    }

    /// A member's live subscriptions plus their current occupancy pointer.
    pub async fn member_schedule(&self, member_id: Ulid) -> Result<MemberSchedule, EngineError> {
        let member = self.require_member(member_id).await?;
        let mut subscriptions: Vec<MembershipSubscription> = self
            .store
            .subscriptions_for_member(member_id)
            .await?
            .into_iter()
            .filter(|s| s.status.is_live())
            .collect();
        subscriptions.sort_by_key(|s| s.range.start);
        let assignment = self.store.assignment_for_member(member_id).await?;
        Ok(MemberSchedule { member, subscriptions, assignment })
    }
}
