use std::collections::HashSet;

use ulid::Ulid;

use crate::model::*;

// ── Capacity Model ───────────────────────────────────────────────

/// Count seats taken in a slot over `window`.
///
/// Subscriptions contribute **distinct members** holding live rows
/// (pending/scheduled/active) that overlap the window — a renewal's two
/// rows (old expiring, new starting) count once. `exclude_member` drops a
/// member entirely, used when that member is renewing into this slot so
/// their own rows don't count against them.
///
/// Trials contribute one seat per open booking whose date falls in the
/// window; callers pass trials only for single-date queries.
pub fn occupancy(
    subscriptions: &[MembershipSubscription],
    trials: &[TrialBooking],
    window: &DateRange,
    exclude_member: Option<Ulid>,
) -> u32 {
    let mut members: HashSet<Ulid> = HashSet::new();
    for sub in subscriptions {
        if !sub.status.is_live() {
            continue;
        }
        if Some(sub.member_id) == exclude_member {
            continue;
        }
        if sub.range.overlaps(window) {
            members.insert(sub.member_id);
        }
    }

    let mut count = members.len() as u32;
    for trial in trials {
        if trial.status.is_open() && window.contains(trial.date) {
            count += 1;
        }
    }
    count
}

/// Classify occupancy against a slot's seat pools.
///
/// `current < capacity` → available on a regular seat;
/// `capacity <= current < total` → available, but only an exception seat
/// remains; `current >= total` → full.
pub fn classify(slot: &SessionSlot, current: u32) -> CapacityResult {
    let normal = slot.capacity;
    let total = slot.total_capacity();

    let (available, is_exception_only, message) = if current < normal {
        (
            true,
            false,
            format!("{current} of {normal} regular seats taken"),
        )
    } else if current < total {
        (
            true,
            true,
            format!(
                "regular seats full ({current} of {normal}); the next booking takes an exception seat"
            ),
        )
    } else {
        (
            false,
            false,
            format!("slot is full: {current} of {total} seats taken"),
        )
    };

    CapacityResult {
        available,
        is_exception_only,
        current_bookings: current,
        normal_capacity: normal,
        total_capacity: total,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn slot(capacity: u32, exception: u32) -> SessionSlot {
        SessionSlot {
            id: Ulid::new(),
            display_name: "7:30 AM batch".into(),
            start_time: NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
            capacity,
            exception_capacity: exception,
            is_active: true,
        }
    }

    fn sub(member_id: Ulid, status: SubscriptionStatus, range: DateRange) -> MembershipSubscription {
        MembershipSubscription {
            id: Ulid::new(),
            member_id,
            plan_id: Ulid::new(),
            slot_id: Ulid::new(),
            range,
            status,
            payment_status: PaymentStatus::Pending,
            original_amount: 0,
            discount_amount: 0,
            payable_amount: 0,
            extra_days: 0,
            extra_days_reason: None,
            extension_days: 0,
            invoice_id: None,
            notes: None,
        }
    }

    fn trial(slot_id: Ulid, date: NaiveDate, status: TrialStatus) -> TrialBooking {
        TrialBooking {
            id: Ulid::new(),
            lead_id: Ulid::new(),
            slot_id,
            date,
            status,
            is_exception: false,
        }
    }

    #[test]
    fn occupancy_counts_distinct_members_once() {
        // Renewal: same member, expiring row + starting row
        let member = Ulid::new();
        let subs = vec![
            sub(member, SubscriptionStatus::Active, DateRange::new(d(2025, 1, 1), d(2025, 1, 31))),
            sub(member, SubscriptionStatus::Active, DateRange::new(d(2025, 2, 1), d(2025, 2, 28))),
        ];
        let window = DateRange::new(d(2025, 1, 15), d(2025, 2, 15));
        assert_eq!(occupancy(&subs, &[], &window, None), 1);
    }

    #[test]
    fn occupancy_skips_dead_rows() {
        let window = DateRange::new(d(2025, 1, 1), d(2025, 1, 31));
        let subs = vec![
            sub(Ulid::new(), SubscriptionStatus::Cancelled, window),
            sub(Ulid::new(), SubscriptionStatus::Expired, window),
            sub(Ulid::new(), SubscriptionStatus::Active, window),
        ];
        assert_eq!(occupancy(&subs, &[], &window, None), 1);
    }

    #[test]
    fn occupancy_excludes_renewing_member() {
        let renewer = Ulid::new();
        let window = DateRange::new(d(2025, 2, 1), d(2025, 2, 28));
        let subs = vec![
            sub(renewer, SubscriptionStatus::Active, DateRange::new(d(2025, 1, 15), d(2025, 2, 14))),
            sub(Ulid::new(), SubscriptionStatus::Active, window),
        ];
        assert_eq!(occupancy(&subs, &[], &window, None), 2);
        assert_eq!(occupancy(&subs, &[], &window, Some(renewer)), 1);
    }

    #[test]
    fn occupancy_ignores_non_overlapping() {
        let subs = vec![sub(
            Ulid::new(),
            SubscriptionStatus::Active,
            DateRange::new(d(2025, 1, 1), d(2025, 1, 31)),
        )];
        let window = DateRange::new(d(2025, 2, 1), d(2025, 2, 28));
        assert_eq!(occupancy(&subs, &[], &window, None), 0);
    }

    #[test]
    fn occupancy_adds_open_trials_on_date() {
        let slot_id = Ulid::new();
        let date = d(2025, 1, 6);
        let window = DateRange::single(date);
        let subs = vec![sub(
            Ulid::new(),
            SubscriptionStatus::Active,
            DateRange::new(d(2025, 1, 1), d(2025, 1, 31)),
        )];
        let trials = vec![
            trial(slot_id, date, TrialStatus::Pending),
            trial(slot_id, date, TrialStatus::Confirmed),
            trial(slot_id, date, TrialStatus::Cancelled), // closed — no seat
            trial(slot_id, date, TrialStatus::Attended),  // completed — no seat
        ];
        assert_eq!(occupancy(&subs, &trials, &window, None), 3);
    }

    #[test]
    fn classify_regular_seats() {
        let s = slot(10, 1);
        let r = classify(&s, 9);
        assert!(r.available);
        assert!(!r.is_exception_only);
        assert_eq!(r.current_bookings, 9);
        assert_eq!(r.normal_capacity, 10);
        assert_eq!(r.total_capacity, 11);
    }

    #[test]
    fn classify_exception_only_band() {
        let s = slot(10, 1);
        let r = classify(&s, 10);
        assert!(r.available);
        assert!(r.is_exception_only);
    }

    #[test]
    fn classify_full() {
        let s = slot(10, 1);
        let r = classify(&s, 11);
        assert!(!r.available);
        assert!(!r.is_exception_only);
        assert!(r.message.contains("11 of 11"));
    }

    #[test]
    fn classify_zero_capacity_slot_is_full() {
        let s = slot(0, 0);
        let r = classify(&s, 0);
        assert!(!r.available);
    }

    #[test]
    fn classify_no_exception_pool() {
        let s = slot(5, 0);
        assert!(classify(&s, 4).available);
        let at_cap = classify(&s, 5);
        assert!(!at_cap.available);
        assert!(!at_cap.is_exception_only);
    }
}
