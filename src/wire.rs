use std::io;
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, NaiveTime};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::debug;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::observability;

/// One JSON request per line. Every caller — admin UI, public booking
/// flow, chatbot tools — speaks this same operation set.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CheckCapacity {
        slot_id: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
    CreateSubscription {
        member_id: Ulid,
        plan_id: Ulid,
        slot_id: Ulid,
        start_date: NaiveDate,
        #[serde(default)]
        discount_amount: Amount,
        discount_reason: Option<String>,
        notes: Option<String>,
    },
    ExtendSubscription {
        subscription_id: Ulid,
        days: u32,
        reason: Option<String>,
    },
    TransferSlot {
        subscription_id: Ulid,
        new_slot_id: Ulid,
        effective_date: NaiveDate,
        reason: Option<String>,
    },
    SetExtraDays {
        subscription_id: Ulid,
        total_days: i64,
        reason: Option<String>,
    },
    CancelSubscription {
        subscription_id: Ulid,
        reason: Option<String>,
    },
    MarkInvoicePaid {
        invoice_id: Ulid,
    },
    BookTrial {
        lead_id: Ulid,
        slot_id: Ulid,
        date: NaiveDate,
        #[serde(default)]
        is_exception: bool,
    },
    MarkTrialAttended {
        trial_id: Ulid,
    },
    MarkTrialNoShow {
        trial_id: Ulid,
    },
    MarkAttendance {
        member_id: Ulid,
        slot_id: Ulid,
        date: NaiveDate,
        status: AttendanceStatus,
        notes: Option<String>,
    },
    AttendanceSummary {
        member_id: Ulid,
        slot_id: Ulid,
        period_start: NaiveDate,
        period_end: NaiveDate,
    },
    CreateSlot {
        display_name: String,
        start_time: NaiveTime,
        end_time: NaiveTime,
        capacity: u32,
        #[serde(default)]
        exception_capacity: u32,
    },
    UpdateSlot {
        slot_id: Ulid,
        display_name: Option<String>,
        capacity: Option<u32>,
        exception_capacity: Option<u32>,
        is_active: Option<bool>,
    },
    RegisterMember {
        name: String,
        email: String,
    },
    RegisterLead {
        name: String,
        email: String,
    },
    CreatePlan {
        name: String,
        duration_months: u32,
        price: Amount,
    },
    ListSlots,
    GetSubscription {
        subscription_id: Ulid,
    },
    GetInvoice {
        invoice_id: Ulid,
    },
    MemberSchedule {
        member_id: Ulid,
    },
}

fn window(start: NaiveDate, end: NaiveDate) -> Result<DateRange, EngineError> {
    if end < start {
        return Err(EngineError::InvalidTransition(
            "window end is before its start".into(),
        ));
    }
    Ok(DateRange::new(start, end))
}

async fn execute(engine: &Engine, req: Request) -> Result<Value, EngineError> {
    match req {
        Request::CheckCapacity { slot_id, start_date, end_date } => {
            let result = engine
                .check_capacity(slot_id, window(start_date, end_date)?, None)
                .await?;
            Ok(json!(result))
        }
        Request::CreateSubscription {
            member_id,
            plan_id,
            slot_id,
            start_date,
            discount_amount,
            discount_reason,
            notes,
        } => {
            let outcome = engine
                .create_subscription(
                    member_id,
                    plan_id,
                    slot_id,
                    start_date,
                    discount_amount,
                    discount_reason,
                    notes,
                )
                .await?;
            Ok(json!({
                "subscription_id": outcome.subscription.id,
                "invoice_id": outcome.invoice.id,
                "end_date": outcome.subscription.range.end,
                "payable_amount": outcome.subscription.payable_amount,
                "warning": outcome.warning,
            }))
        }
        Request::ExtendSubscription { subscription_id, days, reason } => {
            let sub = engine.extend_subscription(subscription_id, days, reason).await?;
            Ok(json!({
                "subscription_id": sub.id,
                "end_date": sub.range.end,
                "extension_days": sub.extension_days,
            }))
        }
        Request::TransferSlot { subscription_id, new_slot_id, effective_date, reason } => {
            let outcome = engine
                .transfer_slot(subscription_id, new_slot_id, effective_date, reason)
                .await?;
            Ok(json!({
                "subscription_id": outcome.subscription.id,
                "slot_id": outcome.subscription.slot_id,
                "warning": outcome.warning,
            }))
        }
        Request::SetExtraDays { subscription_id, total_days, reason } => {
            let sub = engine.set_extra_days(subscription_id, total_days, reason).await?;
            Ok(json!({
                "subscription_id": sub.id,
                "end_date": sub.range.end,
                "extra_days": sub.extra_days,
            }))
        }
        Request::CancelSubscription { subscription_id, reason } => {
            let sub = engine.cancel_subscription(subscription_id, reason).await?;
            Ok(json!({ "subscription_id": sub.id, "status": sub.status }))
        }
        Request::MarkInvoicePaid { invoice_id } => {
            let invoice = engine.mark_invoice_paid(invoice_id).await?;
            Ok(json!({
                "invoice_id": invoice.id,
                "status": invoice.status,
                "amount_paid": invoice.amount_paid,
            }))
        }
        Request::BookTrial { lead_id, slot_id, date, is_exception } => {
            let trial = engine.book_trial(lead_id, slot_id, date, is_exception).await?;
            Ok(json!({ "booking_id": trial.id, "is_exception": trial.is_exception }))
        }
        Request::MarkTrialAttended { trial_id } => {
            let trial = engine.mark_trial_attended(trial_id).await?;
            Ok(json!({ "trial_id": trial.id, "status": trial.status }))
        }
        Request::MarkTrialNoShow { trial_id } => {
            let trial = engine.mark_trial_no_show(trial_id).await?;
            Ok(json!({ "trial_id": trial.id, "status": trial.status }))
        }
        Request::MarkAttendance { member_id, slot_id, date, status, notes } => {
            let record = engine
                .mark_attendance(member_id, slot_id, date, status, notes)
                .await?;
            Ok(json!({
                "member_id": record.member_id,
                "date": record.date,
                "status": record.status,
                "subscription_id": record.subscription_id,
            }))
        }
        Request::AttendanceSummary { member_id, slot_id, period_start, period_end } => {
            let summary = engine
                .attendance_summary(member_id, slot_id, window(period_start, period_end)?)
                .await?;
            Ok(json!(summary))
        }
        Request::CreateSlot {
            display_name,
            start_time,
            end_time,
            capacity,
            exception_capacity,
        } => {
            let slot = engine
                .create_slot(display_name, start_time, end_time, capacity, exception_capacity)
                .await?;
            Ok(json!(slot))
        }
        Request::UpdateSlot {
            slot_id,
            display_name,
            capacity,
            exception_capacity,
            is_active,
        } => {
            let slot = engine
                .update_slot(slot_id, display_name, capacity, exception_capacity, is_active)
                .await?;
            Ok(json!(slot))
        }
        Request::RegisterMember { name, email } => {
            let member = engine.register_member(name, email).await?;
            Ok(json!(member))
        }
        Request::RegisterLead { name, email } => {
            let lead = engine.register_lead(name, email).await?;
            Ok(json!(lead))
        }
        Request::CreatePlan { name, duration_months, price } => {
            let plan = engine.create_plan(name, duration_months, price).await?;
            Ok(json!(plan))
        }
        Request::ListSlots => {
            let slots = engine.list_slots().await?;
            Ok(json!(slots))
        }
        Request::GetSubscription { subscription_id } => {
            let sub = engine.get_subscription(subscription_id).await?;
            Ok(json!(sub))
        }
        Request::GetInvoice { invoice_id } => {
            let invoice = engine.get_invoice(invoice_id).await?;
            Ok(json!(invoice))
        }
        Request::MemberSchedule { member_id } => {
            let schedule = engine.member_schedule(member_id).await?;
            Ok(json!(schedule))
        }
    }
}

fn error_reply(kind: &str, message: &str, retryable: bool) -> Value {
    json!({
        "ok": false,
        "error": { "kind": kind, "message": message, "retryable": retryable },
    })
}

/// Serve one client: read a request line, run it, write one reply line.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> io::Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(line) = framed.next().await {
        let line = line.map_err(io::Error::other)?;
        let reply = match serde_json::from_str::<Request>(&line) {
            Ok(req) => {
                let label = observability::op_label(&req);
                let start = Instant::now();
                let result = execute(&engine, req).await;
                metrics::histogram!(observability::OP_DURATION_SECONDS, "op" => label)
                    .record(start.elapsed().as_secs_f64());
                match result {
                    Ok(data) => {
                        metrics::counter!(observability::OPS_TOTAL, "op" => label, "status" => "ok")
                            .increment(1);
                        json!({ "ok": true, "data": data })
                    }
                    Err(e) => {
                        metrics::counter!(observability::OPS_TOTAL, "op" => label, "status" => "error")
                            .increment(1);
                        debug!(op = label, error = %e, "operation rejected");
                        error_reply(e.kind_label(), &e.to_string(), e.is_retryable())
                    }
                }
            }
            Err(e) => error_reply("bad_request", &format!("invalid request: {e}"), false),
        };
        framed
            .send(reply.to_string())
            .await
            .map_err(io::Error::other)?;
    }

    Ok(())
}
