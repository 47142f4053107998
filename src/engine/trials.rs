use chrono::NaiveDate;
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::store::Change;

use super::{classify, validate_date, Engine, EngineError};

impl Engine {
    /// Book a single-date trial visit for a lead. Trials compete for the
    /// same seat pool as subscriptions on that date; `is_exception` lets
    /// staff place the visitor on an overflow seat.
    pub async fn book_trial(
        &self,
        lead_id: Ulid,
        slot_id: Ulid,
        date: NaiveDate,
        is_exception: bool,
    ) -> Result<TrialBooking, EngineError> {
        validate_date(date)?;
        let lead = self.require_lead(lead_id).await?;
        let slot = self.require_slot(slot_id).await?;
        if !slot.is_active {
            return Err(EngineError::InvalidTransition(format!(
                "slot {} is inactive",
                slot.display_name
            )));
        }

        let history = self.store.trials_for_lead(lead_id).await?;
        let completed = history.iter().filter(|t| t.status.is_completed()).count() as u32;
        if completed >= self.settings.max_trials_per_person {
            return Err(EngineError::InvalidTransition(format!(
                "trial limit reached: {completed} of {} visits used",
                self.settings.max_trials_per_person
            )));
        }
        if history.iter().any(|t| t.status.is_open() && t.date == date) {
            return Err(EngineError::OverlapConflict {
                what: "a trial visit".into(),
                range: DateRange::single(date),
            });
        }

        // A lead who already converted and holds a live subscription on
        // this date books through the member flow instead. Matching is by
        // email only.
        if let Some(member) = self.store.member_by_email(&lead.email).await? {
            let subs = self.store.subscriptions_for_member(member.id).await?;
            if subs
                .iter()
                .any(|s| s.status == SubscriptionStatus::Active && s.range.contains(date))
            {
                return Err(EngineError::InvalidTransition(
                    "already an active member on this date; no trial needed".into(),
                ));
            }
        }

        // Weekday gate comes before capacity so a weekend date is reported
        // as such even when the slot is full.
        if !is_working_day(date) {
            return Err(EngineError::InvalidTransition(
                "trials run Monday to Friday only".into(),
            ));
        }

        let _guard = self.slot_lock(slot_id).await?;
        let current = self
            .slot_occupancy(slot_id, DateRange::single(date), None, Some(date))
            .await?;
        let cap = classify(&slot, current);
        let has_room = if is_exception {
            cap.available
        } else {
            cap.current_bookings < cap.normal_capacity
        };
        if !has_room {
            return Err(EngineError::CapacityExceeded {
                current: cap.current_bookings,
                normal: cap.normal_capacity,
                total: cap.total_capacity,
            });
        }

        let trial = TrialBooking {
            id: Ulid::new(),
            lead_id,
            slot_id,
            date,
            status: TrialStatus::Pending,
            is_exception,
        };
        let mut updated_lead = lead;
        updated_lead.status = LeadStatus::TrialScheduled;
        updated_lead.trial_date = Some(date);
        updated_lead.trial_slot_id = Some(slot_id);

        self.commit(vec![
            Change::PutTrial(trial.clone()),
            Change::PutLead(updated_lead),
        ])
        .await?;

        info!(lead = %lead_id, slot = %slot_id, %date, "trial booked");
        Ok(trial)
    }

    pub async fn mark_trial_attended(&self, trial_id: Ulid) -> Result<TrialBooking, EngineError> {
        self.close_trial(trial_id, TrialStatus::Attended, LeadStatus::TrialAttended)
            .await
    }

    pub async fn mark_trial_no_show(&self, trial_id: Ulid) -> Result<TrialBooking, EngineError> {
        self.close_trial(trial_id, TrialStatus::NoShow, LeadStatus::TrialNoShow)
            .await
    }

    /// Plain state transition — no capacity involvement.
    async fn close_trial(
        &self,
        trial_id: Ulid,
        to: TrialStatus,
        lead_status: LeadStatus,
    ) -> Result<TrialBooking, EngineError> {
        let mut trial = self.require_trial(trial_id).await?;
        if !trial.status.is_open() {
            return Err(EngineError::InvalidTransition(format!(
                "trial is already {}",
                trial.status.label()
            )));
        }
        trial.status = to;

        let mut lead = self.require_lead(trial.lead_id).await?;
        lead.status = lead_status;

        self.commit(vec![Change::PutTrial(trial.clone()), Change::PutLead(lead)])
            .await?;
        info!(trial = %trial_id, status = to.label(), "trial closed");
        Ok(trial)
    }
}
