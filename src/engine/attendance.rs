use chrono::{NaiveDate, Utc};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::store::Change;

use super::{validate_date, validate_opt_text, Engine, EngineError};

impl Engine {
    /// Record (or correct) a member's attendance for one slot-day.
    ///
    /// The member's `classes_attended` counter moves by the present/absent
    /// *transition*, never recomputed from scratch: marking the same status
    /// twice is a counter no-op.
    pub async fn mark_attendance(
        &self,
        member_id: Ulid,
        slot_id: Ulid,
        date: NaiveDate,
        status: AttendanceStatus,
        notes: Option<String>,
    ) -> Result<AttendanceRecord, EngineError> {
        validate_date(date)?;
        validate_opt_text(notes.as_deref(), MAX_NOTES_LEN, "notes too long")?;
        let mut member = self.require_member(member_id).await?;
        self.require_slot(slot_id).await?;

        let today = Utc::now().date_naive();
        if date > today {
            return Err(EngineError::InvalidTransition(
                "cannot mark attendance for a future date".into(),
            ));
        }
        let backfill = self.settings.attendance_backfill_days;
        if (today - date).num_days() > backfill {
            return Err(EngineError::InvalidTransition(format!(
                "attendance for {date} is stale: more than {backfill} days in the past"
            )));
        }

        let now_present = status == AttendanceStatus::Present;
        let record = match self.store.attendance(member_id, slot_id, date).await? {
            Some(mut existing) => {
                let was_present = existing.status == AttendanceStatus::Present;
                match (was_present, now_present) {
                    (false, true) => member.classes_attended += 1,
                    (true, false) => {
                        member.classes_attended = member.classes_attended.saturating_sub(1)
                    }
                    _ => {}
                }
                existing.status = status;
                existing.notes = notes;
                existing.marked_at = Utc::now();
                existing
            }
            None => {
                if now_present {
                    member.classes_attended += 1;
                }
                // Snapshot which subscription this visit belongs to: the
                // active one covering the date, preferring this slot.
                let subs = self.store.subscriptions_for_member(member_id).await?;
                let covering = |s: &&MembershipSubscription| {
                    s.status == SubscriptionStatus::Active && s.range.contains(date)
                };
                let subscription_id = subs
                    .iter()
                    .filter(covering)
                    .find(|s| s.slot_id == slot_id)
                    .or_else(|| subs.iter().find(covering))
                    .map(|s| s.id);
                AttendanceRecord {
                    member_id,
                    slot_id,
                    date,
                    status,
                    subscription_id,
                    notes,
                    marked_at: Utc::now(),
                }
            }
        };

        self.commit(vec![
            Change::PutAttendance(record.clone()),
            Change::PutMember(member),
        ])
        .await?;
        Ok(record)
    }

    /// Present days vs. Mon–Fri working days owed over a period.
    ///
    /// Working days are summed over the intersection of the period with
    /// each of the member's active/expired subscriptions in this slot; the
    /// no-overlap invariant on live rows means no calendar day is counted
    /// twice.
    pub async fn attendance_summary(
        &self,
        member_id: Ulid,
        slot_id: Ulid,
        period: DateRange,
    ) -> Result<AttendanceSummary, EngineError> {
        if period.days() > MAX_QUERY_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("summary window too wide"));
        }
        self.require_member(member_id).await?;

        let records = self
            .store
            .attendance_in_range(member_id, slot_id, period)
            .await?;
        let present_days = records
            .iter()
            .filter(|r| r.status == AttendanceStatus::Present)
            .count() as u32;

        let mut total_working_days = 0u32;
        for sub in self.store.subscriptions_for_member(member_id).await? {
            if sub.slot_id != slot_id {
                continue;
            }
            if !matches!(
                sub.status,
                SubscriptionStatus::Active | SubscriptionStatus::Expired
            ) {
                continue;
            }
            if let Some(covered) = sub.range.intersect(&period) {
                total_working_days += covered.working_days();
            }
        }

        Ok(AttendanceSummary { present_days, total_working_days })
    }
}
