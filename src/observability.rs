use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total operations executed. Labels: op, status.
pub const OPS_TOTAL: &str = "batchd_ops_total";

/// Histogram: operation latency in seconds. Labels: op.
pub const OP_DURATION_SECONDS: &str = "batchd_op_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "batchd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "batchd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "batchd_connections_rejected_total";

/// Histogram: time spent waiting for a slot's advisory lock in seconds.
pub const SLOT_LOCK_WAIT_SECONDS: &str = "batchd_slot_lock_wait_seconds";

/// Counter: row writes committed through the storage port.
pub const MUTATIONS_TOTAL: &str = "batchd_store_mutations_total";

/// Counter: subscription status transitions applied by the sweeper.
pub const SWEEP_TRANSITIONS_TOTAL: &str = "batchd_sweep_transitions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Request variant to a short label for metrics.
pub fn op_label(req: &Request) -> &'static str {
    match req {
        Request::CheckCapacity { .. } => "check_capacity",
        Request::CreateSubscription { .. } => "create_subscription",
        Request::ExtendSubscription { .. } => "extend_subscription",
        Request::TransferSlot { .. } => "transfer_slot",
        Request::SetExtraDays { .. } => "set_extra_days",
        Request::CancelSubscription { .. } => "cancel_subscription",
        Request::MarkInvoicePaid { .. } => "mark_invoice_paid",
        Request::BookTrial { .. } => "book_trial",
        Request::MarkTrialAttended { .. } => "mark_trial_attended",
        Request::MarkTrialNoShow { .. } => "mark_trial_no_show",
        Request::MarkAttendance { .. } => "mark_attendance",
        Request::AttendanceSummary { .. } => "attendance_summary",
        Request::CreateSlot { .. } => "create_slot",
        Request::UpdateSlot { .. } => "update_slot",
        Request::RegisterMember { .. } => "register_member",
        Request::RegisterLead { .. } => "register_lead",
        Request::CreatePlan { .. } => "create_plan",
        Request::ListSlots => "list_slots",
        Request::GetSubscription { .. } => "get_subscription",
        Request::GetInvoice { .. } => "get_invoice",
        Request::MemberSchedule { .. } => "member_schedule",
    }
}
