use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

/// Failure surfaced by a storage backend. The in-memory backend never
/// fails; remote backends map transport errors here.
#[derive(Debug)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "store error: {}", self.0)
    }
}

impl std::error::Error for StoreError {}

/// One row-level write. An engine operation commits all of its writes as a
/// single `Vec<Change>` batch — the backend applies the whole batch or none
/// of it.
#[derive(Debug, Clone)]
pub enum Change {
    PutSlot(SessionSlot),
    PutMember(Member),
    PutLead(Lead),
    PutPlan(Plan),
    PutSubscription(MembershipSubscription),
    PutInvoice(Invoice),
    PutTrial(TrialBooking),
    PutAttendance(AttendanceRecord),
    /// Stamp the member's active assignment inactive with the given end date.
    CloseAssignment { member_id: Ulid, end_date: NaiveDate },
    /// Open a new assignment row for the member.
    PushAssignment(SlotAssignment),
}

/// Storage port. Lifecycle and capacity logic live in the engine and are
/// backend-agnostic; a backend only moves rows.
#[async_trait]
pub trait Store: Send + Sync {
    async fn slot(&self, id: Ulid) -> Result<Option<SessionSlot>, StoreError>;
    async fn slots(&self) -> Result<Vec<SessionSlot>, StoreError>;

    async fn member(&self, id: Ulid) -> Result<Option<Member>, StoreError>;
    async fn member_by_email(&self, email: &str) -> Result<Option<Member>, StoreError>;
    async fn lead(&self, id: Ulid) -> Result<Option<Lead>, StoreError>;
    async fn plan(&self, id: Ulid) -> Result<Option<Plan>, StoreError>;

    async fn subscription(&self, id: Ulid) -> Result<Option<MembershipSubscription>, StoreError>;
    async fn subscriptions(&self) -> Result<Vec<MembershipSubscription>, StoreError>;
    async fn subscriptions_for_member(
        &self,
        member_id: Ulid,
    ) -> Result<Vec<MembershipSubscription>, StoreError>;
    async fn subscriptions_for_slot(
        &self,
        slot_id: Ulid,
    ) -> Result<Vec<MembershipSubscription>, StoreError>;

    async fn invoice(&self, id: Ulid) -> Result<Option<Invoice>, StoreError>;

    async fn trial(&self, id: Ulid) -> Result<Option<TrialBooking>, StoreError>;
    async fn trials_for_lead(&self, lead_id: Ulid) -> Result<Vec<TrialBooking>, StoreError>;
    async fn trials_for_slot_on(
        &self,
        slot_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<TrialBooking>, StoreError>;

    /// The member's active assignment row, if any.
    async fn assignment_for_member(
        &self,
        member_id: Ulid,
    ) -> Result<Option<SlotAssignment>, StoreError>;

    async fn attendance(
        &self,
        member_id: Ulid,
        slot_id: Ulid,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError>;
    async fn attendance_in_range(
        &self,
        member_id: Ulid,
        slot_id: Ulid,
        range: DateRange,
    ) -> Result<Vec<AttendanceRecord>, StoreError>;

    /// Apply a whole batch of writes — all-or-nothing.
    async fn apply(&self, changes: Vec<Change>) -> Result<(), StoreError>;
}

// ── In-memory backend ────────────────────────────────────────────

pub struct MemoryStore {
    slots: DashMap<Ulid, SessionSlot>,
    members: DashMap<Ulid, Member>,
    leads: DashMap<Ulid, Lead>,
    plans: DashMap<Ulid, Plan>,
    subscriptions: DashMap<Ulid, MembershipSubscription>,
    invoices: DashMap<Ulid, Invoice>,
    trials: DashMap<Ulid, TrialBooking>,
    /// Full assignment history per member, newest last.
    assignments: DashMap<Ulid, Vec<SlotAssignment>>,
    attendance: DashMap<(Ulid, Ulid, NaiveDate), AttendanceRecord>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            members: DashMap::new(),
            leads: DashMap::new(),
            plans: DashMap::new(),
            subscriptions: DashMap::new(),
            invoices: DashMap::new(),
            trials: DashMap::new(),
            assignments: DashMap::new(),
            attendance: DashMap::new(),
        }
    }

    fn apply_one(&self, change: Change) {
        match change {
            Change::PutSlot(slot) => {
                self.slots.insert(slot.id, slot);
            }
            Change::PutMember(member) => {
                self.members.insert(member.id, member);
            }
            Change::PutLead(lead) => {
                self.leads.insert(lead.id, lead);
            }
            Change::PutPlan(plan) => {
                self.plans.insert(plan.id, plan);
            }
            Change::PutSubscription(sub) => {
                self.subscriptions.insert(sub.id, sub);
            }
            Change::PutInvoice(invoice) => {
                self.invoices.insert(invoice.id, invoice);
            }
            Change::PutTrial(trial) => {
                self.trials.insert(trial.id, trial);
            }
            Change::PutAttendance(record) => {
                self.attendance
                    .insert((record.member_id, record.slot_id, record.date), record);
            }
            Change::CloseAssignment { member_id, end_date } => {
                if let Some(mut rows) = self.assignments.get_mut(&member_id) {
                    for row in rows.iter_mut().filter(|r| r.is_active) {
                        row.is_active = false;
                        row.end_date = Some(end_date);
                    }
                }
            }
            Change::PushAssignment(assignment) => {
                self.assignments
                    .entry(assignment.member_id)
                    .or_default()
                    .push(assignment);
            }
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn slot(&self, id: Ulid) -> Result<Option<SessionSlot>, StoreError> {
        Ok(self.slots.get(&id).map(|e| e.value().clone()))
    }

    async fn slots(&self) -> Result<Vec<SessionSlot>, StoreError> {
        Ok(self.slots.iter().map(|e| e.value().clone()).collect())
    }

    async fn member(&self, id: Ulid) -> Result<Option<Member>, StoreError> {
        Ok(self.members.get(&id).map(|e| e.value().clone()))
    }

    async fn member_by_email(&self, email: &str) -> Result<Option<Member>, StoreError> {
        Ok(self
            .members
            .iter()
            .find(|e| e.value().email.eq_ignore_ascii_case(email))
            .map(|e| e.value().clone()))
    }

    async fn lead(&self, id: Ulid) -> Result<Option<Lead>, StoreError> {
        Ok(self.leads.get(&id).map(|e| e.value().clone()))
    }

    async fn plan(&self, id: Ulid) -> Result<Option<Plan>, StoreError> {
        Ok(self.plans.get(&id).map(|e| e.value().clone()))
    }

    async fn subscription(&self, id: Ulid) -> Result<Option<MembershipSubscription>, StoreError> {
        Ok(self.subscriptions.get(&id).map(|e| e.value().clone()))
    }

    async fn subscriptions(&self) -> Result<Vec<MembershipSubscription>, StoreError> {
        Ok(self.subscriptions.iter().map(|e| e.value().clone()).collect())
    }

    async fn subscriptions_for_member(
        &self,
        member_id: Ulid,
    ) -> Result<Vec<MembershipSubscription>, StoreError> {
        Ok(self
            .subscriptions
            .iter()
            .filter(|e| e.value().member_id == member_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn subscriptions_for_slot(
        &self,
        slot_id: Ulid,
    ) -> Result<Vec<MembershipSubscription>, StoreError> {
        Ok(self
            .subscriptions
            .iter()
            .filter(|e| e.value().slot_id == slot_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn invoice(&self, id: Ulid) -> Result<Option<Invoice>, StoreError> {
        Ok(self.invoices.get(&id).map(|e| e.value().clone()))
    }

    async fn trial(&self, id: Ulid) -> Result<Option<TrialBooking>, StoreError> {
        Ok(self.trials.get(&id).map(|e| e.value().clone()))
    }

    async fn trials_for_lead(&self, lead_id: Ulid) -> Result<Vec<TrialBooking>, StoreError> {
        Ok(self
            .trials
            .iter()
            .filter(|e| e.value().lead_id == lead_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn trials_for_slot_on(
        &self,
        slot_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<TrialBooking>, StoreError> {
        Ok(self
            .trials
            .iter()
            .filter(|e| e.value().slot_id == slot_id && e.value().date == date)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn assignment_for_member(
        &self,
        member_id: Ulid,
    ) -> Result<Option<SlotAssignment>, StoreError> {
        Ok(self
            .assignments
            .get(&member_id)
            .and_then(|rows| rows.iter().find(|r| r.is_active).cloned()))
    }

    async fn attendance(
        &self,
        member_id: Ulid,
        slot_id: Ulid,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        Ok(self
            .attendance
            .get(&(member_id, slot_id, date))
            .map(|e| e.value().clone()))
    }

    async fn attendance_in_range(
        &self,
        member_id: Ulid,
        slot_id: Ulid,
        range: DateRange,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        Ok(self
            .attendance
            .iter()
            .filter(|e| {
                let r = e.value();
                r.member_id == member_id && r.slot_id == slot_id && range.contains(r.date)
            })
            .map(|e| e.value().clone())
            .collect())
    }

    async fn apply(&self, changes: Vec<Change>) -> Result<(), StoreError> {
        for change in changes {
            self.apply_one(change);
        }
        Ok(())
    }
}
