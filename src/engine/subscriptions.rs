use chrono::{Days, NaiveDate, Utc};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::store::Change;

use super::{classify, validate_date, validate_opt_text, Engine, EngineError};

/// Outcome of `create_subscription`: the persisted rows plus a non-fatal
/// warning when the booking landed on an exception seat.
#[derive(Debug)]
pub struct CreateOutcome {
    pub subscription: MembershipSubscription,
    pub invoice: Invoice,
    pub warning: Option<String>,
}

#[derive(Debug)]
pub struct TransferOutcome {
    pub subscription: MembershipSubscription,
    pub warning: Option<String>,
}

impl Engine {
    /// Book a member into a slot for one plan term, creating the invoice,
    /// activating the member, and switching their slot assignment — all in
    /// one commit.
    pub async fn create_subscription(
        &self,
        member_id: Ulid,
        plan_id: Ulid,
        slot_id: Ulid,
        start_date: NaiveDate,
        discount_amount: Amount,
        discount_reason: Option<String>,
        notes: Option<String>,
    ) -> Result<CreateOutcome, EngineError> {
        validate_date(start_date)?;
        validate_opt_text(discount_reason.as_deref(), MAX_REASON_LEN, "discount reason too long")?;
        validate_opt_text(notes.as_deref(), MAX_NOTES_LEN, "notes too long")?;
        if discount_amount < 0 {
            return Err(EngineError::InvalidTransition(
                "discount cannot be negative".into(),
            ));
        }

        let plan = self.require_plan(plan_id).await?;
        let member = self.require_member(member_id).await?;
        let slot = self.require_slot(slot_id).await?;
        if !slot.is_active {
            return Err(EngineError::InvalidTransition(format!(
                "slot {} is inactive",
                slot.display_name
            )));
        }

        let end_date = plan_end_date(start_date, plan.duration_months)
            .ok_or(EngineError::LimitExceeded("start date out of range"))?;
        let range = DateRange::new(start_date, end_date);

        // One live subscription per member per window, anywhere.
        for own in self.store.subscriptions_for_member(member_id).await? {
            if own.status.is_live() && own.range.overlaps(&range) {
                let what = self
                    .store
                    .plan(own.plan_id)
                    .await?
                    .map(|p| p.name)
                    .unwrap_or_else(|| "an existing plan".into());
                return Err(EngineError::OverlapConflict { what, range: own.range });
            }
        }

        // Renewal: the member already occupies this slot, so their own
        // expiring row must not count against capacity.
        let is_renewal = member.assigned_slot_id == Some(slot_id);

        let _guard = self.slot_lock(slot_id).await?;
        let current = self
            .slot_occupancy(slot_id, range, is_renewal.then_some(member_id), None)
            .await?;
        let cap = classify(&slot, current);
        if !is_renewal && !cap.available {
            return Err(EngineError::CapacityExceeded {
                current: cap.current_bookings,
                normal: cap.normal_capacity,
                total: cap.total_capacity,
            });
        }

        let payable = (plan.price - discount_amount).max(0);
        let subscription_id = Ulid::new();
        let invoice_id = Ulid::new();

        let mut subscription = MembershipSubscription {
            id: subscription_id,
            member_id,
            plan_id,
            slot_id,
            range,
            status: SubscriptionStatus::Active,
            payment_status: PaymentStatus::Pending,
            original_amount: plan.price,
            discount_amount,
            payable_amount: payable,
            extra_days: 0,
            extra_days_reason: None,
            extension_days: 0,
            invoice_id: Some(invoice_id),
            notes,
        };
        if discount_amount > 0 {
            let reason = discount_reason.as_deref().unwrap_or("no reason given");
            subscription.append_note(&format!("discount {discount_amount} applied: {reason}"));
        }

        let invoice = Invoice {
            id: invoice_id,
            subscription_id,
            member_id,
            amount: plan.price,
            discount: discount_amount,
            total: payable,
            amount_paid: 0,
            line_item: format!(
                "{} — {} ({} to {})",
                plan.name, slot.display_name, range.start, range.end
            ),
            due_date: start_date,
            status: InvoiceStatus::Sent,
        };

        let mut updated_member = member.clone();
        updated_member.status = MemberStatus::Active;
        updated_member.assigned_slot_id = Some(slot_id);

        let mut changes = vec![
            Change::PutSubscription(subscription.clone()),
            Change::PutInvoice(invoice.clone()),
            Change::PutMember(updated_member),
        ];
        // Switch the occupancy pointer, deactivating the old slot first.
        // A renewal into the same slot keeps the existing row.
        let assignment = self.store.assignment_for_member(member_id).await?;
        let points_here = assignment.as_ref().is_some_and(|a| a.slot_id == slot_id);
        if !points_here {
            if assignment.is_some() {
                changes.push(Change::CloseAssignment { member_id, end_date: start_date });
            }
            changes.push(Change::PushAssignment(SlotAssignment {
                member_id,
                slot_id,
                start_date,
                end_date: None,
                is_active: true,
                is_exception: cap.is_exception_only && !is_renewal,
            }));
        }
        self.commit(changes).await?;

        info!(
            member = %member_id, slot = %slot_id, subscription = %subscription_id,
            renewal = is_renewal, "subscription created"
        );
        let warning = (cap.is_exception_only && !is_renewal).then(|| cap.message.clone());
        Ok(CreateOutcome { subscription, invoice, warning })
    }

    /// Push the end date out by `days`, accumulating the extension counter.
    pub async fn extend_subscription(
        &self,
        subscription_id: Ulid,
        days: u32,
        reason: Option<String>,
    ) -> Result<MembershipSubscription, EngineError> {
        validate_opt_text(reason.as_deref(), MAX_REASON_LEN, "reason too long")?;
        if days == 0 {
            return Err(EngineError::InvalidTransition(
                "extension must add at least one day".into(),
            ));
        }
        if days > MAX_EXTENSION_DAYS {
            return Err(EngineError::LimitExceeded("extension too long"));
        }

        let mut sub = self.require_subscription(subscription_id).await?;
        if sub.status == SubscriptionStatus::Cancelled {
            return Err(EngineError::InvalidTransition(
                "cannot extend a cancelled subscription".into(),
            ));
        }
        sub.range.end = sub
            .range
            .end
            .checked_add_days(Days::new(days as u64))
            .ok_or(EngineError::LimitExceeded("end date out of range"))?;
        sub.extension_days += days;
        match &reason {
            Some(r) => sub.append_note(&format!("extended by {days} days: {r}")),
            None => sub.append_note(&format!("extended by {days} days")),
        }
        self.commit(vec![Change::PutSubscription(sub.clone())]).await?;
        info!(subscription = %subscription_id, days, "subscription extended");
        Ok(sub)
    }

    /// Move the remaining days of a subscription to another slot. Capacity
    /// is checked on the target for `[effective_date, end]` only — the days
    /// already served stay where they were.
    pub async fn transfer_slot(
        &self,
        subscription_id: Ulid,
        new_slot_id: Ulid,
        effective_date: NaiveDate,
        reason: Option<String>,
    ) -> Result<TransferOutcome, EngineError> {
        validate_date(effective_date)?;
        validate_opt_text(reason.as_deref(), MAX_REASON_LEN, "reason too long")?;

        let mut sub = self.require_subscription(subscription_id).await?;
        if !matches!(
            sub.status,
            SubscriptionStatus::Active | SubscriptionStatus::Scheduled
        ) {
            return Err(EngineError::InvalidTransition(format!(
                "cannot transfer a {} subscription",
                sub.status.label()
            )));
        }
        if new_slot_id == sub.slot_id {
            return Err(EngineError::InvalidTransition(
                "subscription is already in this slot".into(),
            ));
        }
        if !sub.range.contains(effective_date) {
            return Err(EngineError::InvalidTransition(format!(
                "effective date {} is outside the subscription window {} to {}",
                effective_date, sub.range.start, sub.range.end
            )));
        }

        let target = self.require_slot(new_slot_id).await?;
        if !target.is_active {
            return Err(EngineError::InvalidTransition(format!(
                "slot {} is inactive",
                target.display_name
            )));
        }
        let old_slot = self.require_slot(sub.slot_id).await?;
        let member = self.require_member(sub.member_id).await?;

        let remaining = DateRange::new(effective_date, sub.range.end);
        let _guard = self.slot_lock(new_slot_id).await?;
        let current = self.slot_occupancy(new_slot_id, remaining, None, None).await?;
        let cap = classify(&target, current);
        if !cap.available {
            return Err(EngineError::CapacityExceeded {
                current: cap.current_bookings,
                normal: cap.normal_capacity,
                total: cap.total_capacity,
            });
        }

        sub.slot_id = new_slot_id;
        match &reason {
            Some(r) => sub.append_note(&format!(
                "transferred {} -> {} effective {}: {}",
                old_slot.display_name, target.display_name, effective_date, r
            )),
            None => sub.append_note(&format!(
                "transferred {} -> {} effective {}",
                old_slot.display_name, target.display_name, effective_date
            )),
        }

        let mut updated_member = member;
        updated_member.assigned_slot_id = Some(new_slot_id);

        self.commit(vec![
            Change::PutSubscription(sub.clone()),
            Change::PutMember(updated_member),
            Change::CloseAssignment { member_id: sub.member_id, end_date: effective_date },
            Change::PushAssignment(SlotAssignment {
                member_id: sub.member_id,
                slot_id: new_slot_id,
                start_date: effective_date,
                end_date: None,
                is_active: true,
                is_exception: cap.is_exception_only,
            }),
        ])
        .await?;

        info!(
            subscription = %subscription_id, from = %old_slot.id, to = %new_slot_id,
            "subscription transferred"
        );
        let warning = cap.is_exception_only.then(|| cap.message.clone());
        Ok(TransferOutcome { subscription: sub, warning })
    }

    /// Set the **total** compensation days — not a delta. The end date
    /// moves by the difference from the previous total, so repeating the
    /// same value is a no-op.
    pub async fn set_extra_days(
        &self,
        subscription_id: Ulid,
        new_total: i64,
        reason: Option<String>,
    ) -> Result<MembershipSubscription, EngineError> {
        validate_opt_text(reason.as_deref(), MAX_REASON_LEN, "reason too long")?;
        if new_total < 0 {
            return Err(EngineError::InvalidTransition(
                "extra days cannot be negative".into(),
            ));
        }
        if new_total > MAX_EXTRA_DAYS as i64 {
            return Err(EngineError::LimitExceeded("extra days too large"));
        }

        let mut sub = self.require_subscription(subscription_id).await?;
        if sub.status == SubscriptionStatus::Cancelled {
            return Err(EngineError::InvalidTransition(
                "cannot adjust a cancelled subscription".into(),
            ));
        }

        let delta = new_total - sub.extra_days as i64;
        if delta != 0 {
            let new_end = if delta > 0 {
                sub.range.end.checked_add_days(Days::new(delta as u64))
            } else {
                sub.range.end.checked_sub_days(Days::new((-delta) as u64))
            }
            .ok_or(EngineError::LimitExceeded("end date out of range"))?;
            if new_end < sub.range.start {
                return Err(EngineError::InvalidTransition(
                    "extra days would move the end date before the start".into(),
                ));
            }
            sub.range.end = new_end;
            sub.append_note(&format!(
                "extra days set to {new_total} (end moved by {delta} days)"
            ));
        }
        sub.extra_days = new_total as u32;
        sub.extra_days_reason = reason;

        self.commit(vec![Change::PutSubscription(sub.clone())]).await?;
        Ok(sub)
    }

    /// Status-transition a live subscription to cancelled and release the
    /// member's occupancy pointer. The row itself is never deleted.
    pub async fn cancel_subscription(
        &self,
        subscription_id: Ulid,
        reason: Option<String>,
    ) -> Result<MembershipSubscription, EngineError> {
        validate_opt_text(reason.as_deref(), MAX_REASON_LEN, "reason too long")?;
        let mut sub = self.require_subscription(subscription_id).await?;
        if !sub.status.is_live() {
            return Err(EngineError::InvalidTransition(format!(
                "cannot cancel a {} subscription",
                sub.status.label()
            )));
        }

        sub.status = SubscriptionStatus::Cancelled;
        match &reason {
            Some(r) => sub.append_note(&format!("cancelled: {r}")),
            None => sub.append_note("cancelled"),
        }

        let today = Utc::now().date_naive();
        let mut changes = vec![Change::PutSubscription(sub.clone())];
        if let Some(assignment) = self.store.assignment_for_member(sub.member_id).await?
            && assignment.slot_id == sub.slot_id
        {
            changes.push(Change::CloseAssignment {
                member_id: sub.member_id,
                end_date: today,
            });
        }
        self.commit(changes).await?;

        info!(subscription = %subscription_id, "subscription cancelled");
        Ok(sub)
    }

    /// Record full payment against an invoice. The payment flow itself is
    /// external; this is the hook it calls.
    pub async fn mark_invoice_paid(&self, invoice_id: Ulid) -> Result<Invoice, EngineError> {
        let mut invoice = self.require_invoice(invoice_id).await?;
        if invoice.status == InvoiceStatus::Paid {
            return Err(EngineError::InvalidTransition(
                "invoice is already paid".into(),
            ));
        }
        invoice.status = InvoiceStatus::Paid;
        invoice.amount_paid = invoice.total;

        let mut sub = self.require_subscription(invoice.subscription_id).await?;
        sub.payment_status = PaymentStatus::Paid;

        self.commit(vec![
            Change::PutInvoice(invoice.clone()),
            Change::PutSubscription(sub),
        ])
        .await?;
        info!(invoice = %invoice_id, "invoice paid");
        Ok(invoice)
    }

    /// One pass of the lifecycle sweep: scheduled rows whose start has
    /// arrived become active; live rows past their end become expired.
    /// Returns the number of transitions applied.
    pub async fn run_lifecycle_sweep(&self, today: NaiveDate) -> Result<u32, EngineError> {
        let mut transitions = 0u32;
        for sub in self.store.subscriptions().await? {
            let to = match sub.status {
                SubscriptionStatus::Scheduled if sub.range.start <= today && sub.range.end >= today => {
                    SubscriptionStatus::Active
                }
                SubscriptionStatus::Active | SubscriptionStatus::Scheduled
                    if sub.range.end < today =>
                {
                    SubscriptionStatus::Expired
                }
                _ => continue,
            };
            if self.sweep_transition(sub.id, to, today).await? {
                transitions += 1;
            }
        }
        if transitions > 0 {
            metrics::counter!(crate::observability::SWEEP_TRANSITIONS_TOTAL)
                .increment(transitions as u64);
        }
        Ok(transitions)
    }

    /// Apply one sweep transition under the slot lock, re-reading the row
    /// and rechecking the due condition in case a foreground operation
    /// (cancel, extend) beat us to it.
    async fn sweep_transition(
        &self,
        subscription_id: Ulid,
        to: SubscriptionStatus,
        today: NaiveDate,
    ) -> Result<bool, EngineError> {
        let probe = self.require_subscription(subscription_id).await?;
        let _guard = self.slot_lock(probe.slot_id).await?;
        let mut sub = self.require_subscription(subscription_id).await?;
        let still_due = match to {
            SubscriptionStatus::Active => {
                sub.status == SubscriptionStatus::Scheduled && sub.range.contains(today)
            }
            SubscriptionStatus::Expired => {
                matches!(
                    sub.status,
                    SubscriptionStatus::Active | SubscriptionStatus::Scheduled
                ) && sub.range.end < today
            }
            _ => false,
        };
        if !still_due {
            return Ok(false);
        }
        let from = sub.status;
        sub.status = to;

        let mut changes = vec![Change::PutSubscription(sub.clone())];
        if to == SubscriptionStatus::Expired {
            // Release the occupancy pointer and deactivate the member when
            // nothing live remains.
            let others = self.store.subscriptions_for_member(sub.member_id).await?;
            let has_live = others.iter().any(|s| s.id != sub.id && s.status.is_live());
            if !has_live {
                if self.store.assignment_for_member(sub.member_id).await?.is_some() {
                    changes.push(Change::CloseAssignment {
                        member_id: sub.member_id,
                        end_date: sub.range.end,
                    });
                }
                let mut member = self.require_member(sub.member_id).await?;
                member.status = MemberStatus::Inactive;
                changes.push(Change::PutMember(member));
            }
        }
        self.commit(changes).await?;
        info!(
            subscription = %subscription_id, from = from.label(), to = to.label(),
            "lifecycle sweep transition"
        );
        Ok(true)
    }
}
