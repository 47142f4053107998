use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Amounts are integer minor units (paise) — the only money type.
pub type Amount = i64;

/// Inclusive calendar-date range `[start, end]`.
///
/// All booking math runs on whole days: a subscription covering Jan 1 to
/// Jan 31 occupies its seat on both endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateRange start must not be after end");
        Self { start, end }
    }

    pub fn single(date: NaiveDate) -> Self {
        Self { start: date, end: date }
    }

    /// Inclusive overlap: ranges sharing a single day overlap.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn intersect(&self, other: &DateRange) -> Option<DateRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then(|| DateRange::new(start, end))
    }

    /// Number of calendar days covered, endpoints included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |d| *d <= self.end)
    }

    /// Count of Mon–Fri dates in the range.
    pub fn working_days(&self) -> u32 {
        self.iter_days().filter(|d| is_working_day(*d)).count() as u32
    }
}

/// Working day = Monday through Friday.
pub fn is_working_day(date: NaiveDate) -> bool {
    date.weekday().number_from_monday() <= 5
}

/// Inclusive end date for a plan starting at `start` and running `months`
/// calendar months: Jan 1 + 1 month covers through Jan 31, not Feb 1.
pub fn plan_end_date(start: NaiveDate, months: u32) -> Option<NaiveDate> {
    start
        .checked_add_months(Months::new(months))
        .and_then(|d| d.checked_sub_days(Days::new(1)))
}

// ── Statuses ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Scheduled,
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    /// Live rows occupy capacity and participate in overlap checks.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Pending | Self::Scheduled | Self::Active)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Sent,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Pending,
    Confirmed,
    Attended,
    NoShow,
    Cancelled,
}

impl TrialStatus {
    /// Open trials hold a seat on their date.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// Completed visits count toward the per-person trial quota.
    pub fn is_completed(self) -> bool {
        matches!(self, Self::Attended | Self::NoShow)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Attended => "attended",
            Self::NoShow => "no-show",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    TrialScheduled,
    TrialAttended,
    TrialNoShow,
    Converted,
}

// ── Entities ─────────────────────────────────────────────────────

/// A recurring daily time window with a finite seat pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSlot {
    pub id: Ulid,
    pub display_name: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// Guaranteed seats.
    pub capacity: u32,
    /// Overflow seats, used only once `capacity` is exhausted.
    pub exception_capacity: u32,
    pub is_active: bool,
}

impl SessionSlot {
    pub fn total_capacity(&self) -> u32 {
        self.capacity + self.exception_capacity
    }
}

/// A member's paid occupancy of a slot over a contiguous date range.
/// Never deleted — only status-transitioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipSubscription {
    pub id: Ulid,
    pub member_id: Ulid,
    pub plan_id: Ulid,
    pub slot_id: Ulid,
    pub range: DateRange,
    pub status: SubscriptionStatus,
    pub payment_status: PaymentStatus,
    pub original_amount: Amount,
    pub discount_amount: Amount,
    pub payable_amount: Amount,
    /// Authoritative cumulative total of compensation days already folded
    /// into `range.end` — set-absolute, not a delta.
    pub extra_days: u32,
    pub extra_days_reason: Option<String>,
    /// Cumulative days added through `extend`, distinct from `extra_days`.
    pub extension_days: u32,
    pub invoice_id: Option<Ulid>,
    /// Append-only audit trail.
    pub notes: Option<String>,
}

impl MembershipSubscription {
    /// Append one audit line, preserving prior notes.
    pub fn append_note(&mut self, line: &str) {
        self.notes = Some(match self.notes.take() {
            Some(existing) => format!("{existing}\n{line}"),
            None => line.to_string(),
        });
    }
}

/// Per-member occupancy pointer. At most one row per member is active.
/// Deactivated rows keep their history; the member's `assigned_slot_id`
/// is retained as a historical reference, never cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAssignment {
    pub member_id: Ulid,
    pub slot_id: Ulid,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub is_active: bool,
    pub is_exception: bool,
}

/// Single-date booking for a prospective lead, competing for the same
/// seat pool as subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBooking {
    pub id: Ulid,
    pub lead_id: Ulid,
    pub slot_id: Ulid,
    pub date: NaiveDate,
    pub status: TrialStatus,
    pub is_exception: bool,
}

/// One row per (member, slot, date); later marks update in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub member_id: Ulid,
    pub slot_id: Ulid,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    /// Snapshot of the subscription active at first mark — not rewritten
    /// by later marks.
    pub subscription_id: Option<Ulid>,
    pub notes: Option<String>,
    pub marked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub status: MemberStatus,
    pub assigned_slot_id: Option<Ulid>,
    /// Running counter maintained by attendance transitions.
    pub classes_attended: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub status: LeadStatus,
    pub trial_date: Option<NaiveDate>,
    pub trial_slot_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Ulid,
    pub name: String,
    pub duration_months: u32,
    pub price: Amount,
}

/// Created together with its subscription; numbering and rendering are
/// handled outside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Ulid,
    pub subscription_id: Ulid,
    pub member_id: Ulid,
    pub amount: Amount,
    pub discount: Amount,
    pub total: Amount,
    pub amount_paid: Amount,
    pub line_item: String,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacityResult {
    pub available: bool,
    pub is_exception_only: bool,
    pub current_bookings: u32,
    pub normal_capacity: u32,
    pub total_capacity: u32,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttendanceSummary {
    pub present_days: u32,
    pub total_working_days: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberSchedule {
    pub member: Member,
    pub subscriptions: Vec<MembershipSubscription>,
    pub assignment: Option<SlotAssignment>,
}
