mod attendance;
mod capacity;
mod error;
mod queries;
mod subscriptions;
mod trials;

pub use capacity::{classify, occupancy};
pub use error::EngineError;
pub use subscriptions::{CreateOutcome, TransferOutcome};

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveTime};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::settings::Settings;
use crate::store::{Change, Store};

/// The booking engine. Holds the storage port, the policy knobs, and one
/// advisory lock per slot — the only contended resource is a slot's seat
/// pool, so every capacity check and the write it guards run under that
/// slot's lock.
pub struct Engine {
    pub(super) store: Arc<dyn Store>,
    pub(super) settings: Settings,
    slot_locks: DashMap<Ulid, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, settings: Settings) -> Self {
        Self {
            store,
            settings,
            slot_locks: DashMap::new(),
        }
    }

    /// Acquire the advisory lock for a slot, bounded by `Settings.lock_wait`.
    /// A second booking targeting the same slot blocks here; timing out
    /// surfaces as a retryable `Busy` instead of queueing indefinitely.
    pub(super) async fn slot_lock(
        &self,
        slot_id: Ulid,
    ) -> Result<OwnedMutexGuard<()>, EngineError> {
        let lock = self
            .slot_locks
            .entry(slot_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let wait_start = std::time::Instant::now();
        let guard = tokio::time::timeout(self.settings.lock_wait, lock.lock_owned())
            .await
            .map_err(|_| EngineError::Busy("slot is being booked by another request"))?;
        metrics::histogram!(crate::observability::SLOT_LOCK_WAIT_SECONDS)
            .record(wait_start.elapsed().as_secs_f64());
        Ok(guard)
    }

    /// Apply a whole operation's writes in one store call — all-or-nothing.
    pub(super) async fn commit(&self, changes: Vec<Change>) -> Result<(), EngineError> {
        let n = changes.len();
        self.store.apply(changes).await?;
        metrics::counter!(crate::observability::MUTATIONS_TOTAL).increment(n as u64);
        Ok(())
    }

    // ── Row resolution ───────────────────────────────────────

    pub(super) async fn require_slot(&self, id: Ulid) -> Result<SessionSlot, EngineError> {
        self.store
            .slot(id)
            .await?
            .ok_or(EngineError::not_found("slot", id))
    }

    pub(super) async fn require_member(&self, id: Ulid) -> Result<Member, EngineError> {
        self.store
            .member(id)
            .await?
            .ok_or(EngineError::not_found("member", id))
    }

    pub(super) async fn require_lead(&self, id: Ulid) -> Result<Lead, EngineError> {
        self.store
            .lead(id)
            .await?
            .ok_or(EngineError::not_found("lead", id))
    }

    pub(super) async fn require_plan(&self, id: Ulid) -> Result<Plan, EngineError> {
        self.store
            .plan(id)
            .await?
            .ok_or(EngineError::not_found("plan", id))
    }

    pub(super) async fn require_subscription(
        &self,
        id: Ulid,
    ) -> Result<MembershipSubscription, EngineError> {
        self.store
            .subscription(id)
            .await?
            .ok_or(EngineError::not_found("subscription", id))
    }

    pub(super) async fn require_invoice(&self, id: Ulid) -> Result<Invoice, EngineError> {
        self.store
            .invoice(id)
            .await?
            .ok_or(EngineError::not_found("invoice", id))
    }

    pub(super) async fn require_trial(&self, id: Ulid) -> Result<TrialBooking, EngineError> {
        self.store
            .trial(id)
            .await?
            .ok_or(EngineError::not_found("trial booking", id))
    }

    /// Occupancy of a slot over a window from live subscription rows, plus
    /// open trials when `trial_date` is given (single-date queries only).
    pub(super) async fn slot_occupancy(
        &self,
        slot_id: Ulid,
        window: DateRange,
        exclude_member: Option<Ulid>,
        trial_date: Option<NaiveDate>,
    ) -> Result<u32, EngineError> {
        let subs = self.store.subscriptions_for_slot(slot_id).await?;
        let trials = match trial_date {
            Some(date) => self.store.trials_for_slot_on(slot_id, date).await?,
            None => Vec::new(),
        };
        Ok(occupancy(&subs, &trials, &window, exclude_member))
    }

    // ── Directory surface ────────────────────────────────────
    //
    // The member/lead/plan directory and slot setup are owned elsewhere;
    // these are the minimal writes the engine accepts on their behalf.

    pub async fn create_slot(
        &self,
        display_name: String,
        start_time: NaiveTime,
        end_time: NaiveTime,
        capacity: u32,
        exception_capacity: u32,
    ) -> Result<SessionSlot, EngineError> {
        validate_text(&display_name, MAX_NAME_LEN, "slot name too long")?;
        if display_name.is_empty() {
            return Err(EngineError::InvalidTransition("slot name is empty".into()));
        }
        if start_time >= end_time {
            return Err(EngineError::InvalidTransition(
                "slot start time must be before end time".into(),
            ));
        }
        if capacity.saturating_add(exception_capacity) > MAX_SLOT_CAPACITY {
            return Err(EngineError::LimitExceeded("slot capacity too large"));
        }

        let slot = SessionSlot {
            id: Ulid::new(),
            display_name,
            start_time,
            end_time,
            capacity,
            exception_capacity,
            is_active: true,
        };
        self.commit(vec![Change::PutSlot(slot.clone())]).await?;
        debug!(slot = %slot.id, "slot created");
        Ok(slot)
    }

    pub async fn update_slot(
        &self,
        slot_id: Ulid,
        display_name: Option<String>,
        capacity: Option<u32>,
        exception_capacity: Option<u32>,
        is_active: Option<bool>,
    ) -> Result<SessionSlot, EngineError> {
        let mut slot = self.require_slot(slot_id).await?;
        if let Some(name) = display_name {
            validate_text(&name, MAX_NAME_LEN, "slot name too long")?;
            slot.display_name = name;
        }
        if let Some(cap) = capacity {
            slot.capacity = cap;
        }
        if let Some(exc) = exception_capacity {
            slot.exception_capacity = exc;
        }
        if slot.capacity.saturating_add(slot.exception_capacity) > MAX_SLOT_CAPACITY {
            return Err(EngineError::LimitExceeded("slot capacity too large"));
        }
        if let Some(active) = is_active {
            slot.is_active = active;
        }
        self.commit(vec![Change::PutSlot(slot.clone())]).await?;
        Ok(slot)
    }

    pub async fn register_member(&self, name: String, email: String) -> Result<Member, EngineError> {
        validate_text(&name, MAX_NAME_LEN, "member name too long")?;
        validate_text(&email, MAX_EMAIL_LEN, "email too long")?;
        let member = Member {
            id: Ulid::new(),
            name,
            email,
            status: MemberStatus::Inactive,
            assigned_slot_id: None,
            classes_attended: 0,
        };
        self.commit(vec![Change::PutMember(member.clone())]).await?;
        Ok(member)
    }

    pub async fn register_lead(&self, name: String, email: String) -> Result<Lead, EngineError> {
        validate_text(&name, MAX_NAME_LEN, "lead name too long")?;
        validate_text(&email, MAX_EMAIL_LEN, "email too long")?;
        let lead = Lead {
            id: Ulid::new(),
            name,
            email,
            status: LeadStatus::New,
            trial_date: None,
            trial_slot_id: None,
        };
        self.commit(vec![Change::PutLead(lead.clone())]).await?;
        Ok(lead)
    }

    pub async fn create_plan(
        &self,
        name: String,
        duration_months: u32,
        price: Amount,
    ) -> Result<Plan, EngineError> {
        validate_text(&name, MAX_NAME_LEN, "plan name too long")?;
        if duration_months == 0 || duration_months > MAX_PLAN_MONTHS {
            return Err(EngineError::LimitExceeded("plan duration out of range"));
        }
        if price < 0 {
            return Err(EngineError::InvalidTransition("plan price cannot be negative".into()));
        }
        let plan = Plan {
            id: Ulid::new(),
            name,
            duration_months,
            price,
        };
        self.commit(vec![Change::PutPlan(plan.clone())]).await?;
        Ok(plan)
    }
}

// ── Input guards ─────────────────────────────────────────────────

pub(super) fn validate_date(date: NaiveDate) -> Result<(), EngineError> {
    if date.year() < MIN_VALID_YEAR || date.year() > MAX_VALID_YEAR {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    Ok(())
}

pub(super) fn validate_text(
    text: &str,
    max: usize,
    msg: &'static str,
) -> Result<(), EngineError> {
    if text.len() > max {
        return Err(EngineError::LimitExceeded(msg));
    }
    Ok(())
}

pub(super) fn validate_opt_text(
    text: Option<&str>,
    max: usize,
    msg: &'static str,
) -> Result<(), EngineError> {
    match text {
        Some(t) => validate_text(t, max, msg),
        None => Ok(()),
    }
}
