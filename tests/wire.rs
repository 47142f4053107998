use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Datelike, Days, NaiveDate, Utc, Weekday};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{tcp::OwnedReadHalf, tcp::OwnedWriteHalf, TcpListener, TcpStream};
use tokio_test::assert_ok;

use batchd::engine::Engine;
use batchd::model::is_working_day;
use batchd::settings::Settings;
use batchd::store::MemoryStore;
use batchd::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let engine = Arc::new(Engine::new(
        Arc::new(MemoryStore::new()),
        Settings::default(),
    ));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine).await;
            });
        }
    });

    addr
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = assert_ok!(TcpStream::connect(addr).await);
        let (read, writer) = stream.into_split();
        Self { reader: BufReader::new(read), writer }
    }

    async fn send_raw(&mut self, raw: &str) -> std::io::Result<()> {
        self.writer.write_all(raw.as_bytes()).await
    }

    async fn read_reply(&mut self) -> Value {
        let mut reply = String::new();
        assert_ok!(self.reader.read_line(&mut reply).await);
        serde_json::from_str(&reply).expect("reply must be JSON")
    }

    async fn call(&mut self, request: Value) -> Value {
        let mut line = request.to_string();
        line.push('\n');
        assert_ok!(self.writer.write_all(line.as_bytes()).await);
        self.read_reply().await
    }

    /// Call and unwrap the `data` payload, panicking on an error reply.
    async fn ok(&mut self, request: Value) -> Value {
        let reply = self.call(request).await;
        assert_eq!(reply["ok"], json!(true), "unexpected error: {reply}");
        reply["data"].clone()
    }

    /// Call and return the error object, panicking on success.
    async fn err(&mut self, request: Value) -> Value {
        let reply = self.call(request).await;
        assert_eq!(reply["ok"], json!(false), "expected an error: {reply}");
        reply["error"].clone()
    }
}

fn next_weekday(from: NaiveDate) -> NaiveDate {
    let mut date = from.checked_add_days(Days::new(1)).unwrap();
    while !is_working_day(date) {
        date = date.checked_add_days(Days::new(1)).unwrap();
    }
    date
}

fn next_saturday(from: NaiveDate) -> NaiveDate {
    let mut date = from.checked_add_days(Days::new(1)).unwrap();
    while date.weekday() != Weekday::Sat {
        date = date.checked_add_days(Days::new(1)).unwrap();
    }
    date
}

// ── End-to-end flows ─────────────────────────────────────────

#[tokio::test]
async fn booking_flow_over_the_wire() {
    let addr = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let slot = client
        .ok(json!({
            "op": "create_slot",
            "display_name": "7:30 AM batch",
            "start_time": "07:30:00",
            "end_time": "08:30:00",
            "capacity": 1,
            "exception_capacity": 0,
        }))
        .await;
    let slot_id = slot["id"].clone();

    let plan = client
        .ok(json!({
            "op": "create_plan",
            "name": "Gold Monthly",
            "duration_months": 1,
            "price": 150000,
        }))
        .await;
    let plan_id = plan["id"].clone();

    let member = client
        .ok(json!({
            "op": "register_member",
            "name": "Asha",
            "email": "asha@example.com",
        }))
        .await;
    let member_id = member["id"].clone();

    // Empty slot reports availability
    let capacity = client
        .ok(json!({
            "op": "check_capacity",
            "slot_id": &slot_id,
            "start_date": "2030-01-01",
            "end_date": "2030-01-31",
        }))
        .await;
    assert_eq!(capacity["available"], json!(true));
    assert_eq!(capacity["current_bookings"], json!(0));

    let created = client
        .ok(json!({
            "op": "create_subscription",
            "member_id": &member_id,
            "plan_id": &plan_id,
            "slot_id": &slot_id,
            "start_date": "2030-01-01",
        }))
        .await;
    assert_eq!(created["end_date"], json!("2030-01-31"));
    assert_eq!(created["payable_amount"], json!(150000));
    let subscription_id = created["subscription_id"].clone();
    let invoice_id = created["invoice_id"].clone();

    // Overlapping booking for the same member is a business-rule error
    let error = client
        .err(json!({
            "op": "create_subscription",
            "member_id": &member_id,
            "plan_id": &plan_id,
            "slot_id": &slot_id,
            "start_date": "2030-01-15",
        }))
        .await;
    assert_eq!(error["kind"], json!("overlap_conflict"));
    assert_eq!(error["retryable"], json!(false));
    assert!(error["message"].as_str().unwrap().contains("Gold Monthly"));

    // Another member finds the single seat taken, with counts in the message
    let other = client
        .ok(json!({
            "op": "register_member",
            "name": "Ravi",
            "email": "ravi@example.com",
        }))
        .await;
    let error = client
        .err(json!({
            "op": "create_subscription",
            "member_id": other["id"],
            "plan_id": &plan_id,
            "slot_id": &slot_id,
            "start_date": "2030-01-10",
        }))
        .await;
    assert_eq!(error["kind"], json!("capacity_exceeded"));
    assert!(error["message"].as_str().unwrap().contains("1 of 1"));

    // Lifecycle mutations round-trip
    let extended = client
        .ok(json!({
            "op": "extend_subscription",
            "subscription_id": &subscription_id,
            "days": 5,
            "reason": "festival closure",
        }))
        .await;
    assert_eq!(extended["end_date"], json!("2030-02-05"));

    let adjusted = client
        .ok(json!({
            "op": "set_extra_days",
            "subscription_id": &subscription_id,
            "total_days": 3,
        }))
        .await;
    assert_eq!(adjusted["end_date"], json!("2030-02-08"));
    assert_eq!(adjusted["extra_days"], json!(3));

    let paid = client
        .ok(json!({ "op": "mark_invoice_paid", "invoice_id": &invoice_id }))
        .await;
    assert_eq!(paid["status"], json!("paid"));
    let error = client
        .err(json!({ "op": "mark_invoice_paid", "invoice_id": &invoice_id }))
        .await;
    assert_eq!(error["kind"], json!("invalid_transition"));

    let sub = client
        .ok(json!({ "op": "get_subscription", "subscription_id": &subscription_id }))
        .await;
    assert_eq!(sub["payment_status"], json!("paid"));
    assert_eq!(sub["extension_days"], json!(5));

    let invoice = client
        .ok(json!({ "op": "get_invoice", "invoice_id": &invoice_id }))
        .await;
    assert_eq!(invoice["amount_paid"], json!(150000));
    assert_eq!(invoice["subscription_id"], subscription_id);
}

#[tokio::test]
async fn trial_flow_over_the_wire() {
    let addr = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let slot = client
        .ok(json!({
            "op": "create_slot",
            "display_name": "6 PM batch",
            "start_time": "18:00:00",
            "end_time": "19:00:00",
            "capacity": 5,
            "exception_capacity": 1,
        }))
        .await;
    let slot_id = slot["id"].clone();

    let lead = client
        .ok(json!({
            "op": "register_lead",
            "name": "Meera",
            "email": "meera@example.com",
        }))
        .await;
    let lead_id = lead["id"].clone();

    // Weekends are always rejected
    let today = Utc::now().date_naive();
    let saturday = next_saturday(today);
    let error = client
        .err(json!({
            "op": "book_trial",
            "lead_id": &lead_id,
            "slot_id": &slot_id,
            "date": saturday,
        }))
        .await;
    assert_eq!(error["kind"], json!("invalid_transition"));

    let weekday = next_weekday(today);
    let booked = client
        .ok(json!({
            "op": "book_trial",
            "lead_id": &lead_id,
            "slot_id": &slot_id,
            "date": weekday,
        }))
        .await;
    let booking_id = booked["booking_id"].clone();

    let marked = client
        .ok(json!({ "op": "mark_trial_attended", "trial_id": &booking_id }))
        .await;
    assert_eq!(marked["status"], json!("attended"));
}

#[tokio::test]
async fn attendance_transfer_and_cancel_over_the_wire() {
    let addr = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let morning = client
        .ok(json!({
            "op": "create_slot",
            "display_name": "7:30 AM batch",
            "start_time": "07:30:00",
            "end_time": "08:30:00",
            "capacity": 5,
            "exception_capacity": 1,
        }))
        .await;
    let morning_id = morning["id"].clone();
    let evening = client
        .ok(json!({
            "op": "create_slot",
            "display_name": "6 PM batch",
            "start_time": "18:00:00",
            "end_time": "19:00:00",
            "capacity": 5,
            "exception_capacity": 1,
        }))
        .await;
    let evening_id = evening["id"].clone();

    let plan = client
        .ok(json!({
            "op": "create_plan",
            "name": "Gold Monthly",
            "duration_months": 1,
            "price": 150000,
        }))
        .await;
    let member = client
        .ok(json!({
            "op": "register_member",
            "name": "Asha",
            "email": "asha@example.com",
        }))
        .await;
    let member_id = member["id"].clone();

    let today = Utc::now().date_naive();
    let start = today.checked_sub_days(Days::new(10)).unwrap();
    let created = client
        .ok(json!({
            "op": "create_subscription",
            "member_id": &member_id,
            "plan_id": plan["id"],
            "slot_id": &morning_id,
            "start_date": start,
        }))
        .await;
    let subscription_id = created["subscription_id"].clone();

    let marked = client
        .ok(json!({
            "op": "mark_attendance",
            "member_id": &member_id,
            "slot_id": &morning_id,
            "date": today,
            "status": "present",
        }))
        .await;
    assert_eq!(marked["status"], json!("present"));
    assert_eq!(marked["subscription_id"], subscription_id);

    let summary = client
        .ok(json!({
            "op": "attendance_summary",
            "member_id": &member_id,
            "slot_id": &morning_id,
            "period_start": start,
            "period_end": today,
        }))
        .await;
    assert_eq!(summary["present_days"], json!(1));
    assert!(summary["total_working_days"].as_u64().unwrap() > 0);

    let transferred = client
        .ok(json!({
            "op": "transfer_slot",
            "subscription_id": &subscription_id,
            "new_slot_id": &evening_id,
            "effective_date": today,
            "reason": "schedule change",
        }))
        .await;
    assert_eq!(transferred["slot_id"], evening_id);

    let schedule = client
        .ok(json!({ "op": "member_schedule", "member_id": &member_id }))
        .await;
    assert_eq!(schedule["assignment"]["slot_id"], evening_id);

    let cancelled = client
        .ok(json!({
            "op": "cancel_subscription",
            "subscription_id": &subscription_id,
            "reason": "moving away",
        }))
        .await;
    assert_eq!(cancelled["status"], json!("cancelled"));

    let slots = client.ok(json!({ "op": "list_slots" })).await;
    assert_eq!(slots.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn malformed_requests_get_bad_request() {
    let addr = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let error = client.err(json!({ "op": "drop_tables" })).await;
    assert_eq!(error["kind"], json!("bad_request"));

    // Not even JSON — the connection stays usable afterwards
    assert_ok!(client.send_raw("not json at all\n").await);
    let reply = client.read_reply().await;
    assert_eq!(reply["ok"], json!(false));
    assert_eq!(reply["error"]["kind"], json!("bad_request"));

    let slots = client.ok(json!({ "op": "list_slots" })).await;
    assert_eq!(slots, json!([]));
}

#[tokio::test]
async fn not_found_maps_over_the_wire() {
    let addr = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let error = client
        .err(json!({
            "op": "get_subscription",
            "subscription_id": "01ARZ3NDEKTSV4RRFFQ69G5FAV",
        }))
        .await;
    assert_eq!(error["kind"], json!("not_found"));
    assert_eq!(error["retryable"], json!(false));
}
