use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveTime, Utc};

use batchd::engine::Engine;
use batchd::model::DateRange;
use batchd::settings::Settings;
use batchd::store::MemoryStore;

const MEMBERS: usize = 200;
const READS: usize = 1000;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

#[tokio::main]
async fn main() {
    let engine = Arc::new(Engine::new(
        Arc::new(MemoryStore::new()),
        Settings::default(),
    ));

    // A mix of tight and roomy slots so some bookings contend hard.
    let capacities = [1u32, 1, 1, 1, 1, 5, 5, 5, 10, 10];
    let mut slots = Vec::new();
    for (i, &cap) in capacities.iter().enumerate() {
        let slot = engine
            .create_slot(format!("stress batch {i}"), t(6, 0), t(7, 0), cap, 1)
            .await
            .expect("create slot");
        slots.push(slot);
    }
    let plan = engine
        .create_plan("Stress Monthly".into(), 1, 100_000)
        .await
        .expect("create plan");
    let start_date = Utc::now().date_naive();

    println!("stress: {MEMBERS} concurrent bookings across {} slots", slots.len());

    let begin_all = Instant::now();
    let mut handles = Vec::with_capacity(MEMBERS);
    for i in 0..MEMBERS {
        let engine = engine.clone();
        let slot_id = slots[i % slots.len()].id;
        let plan_id = plan.id;
        handles.push(tokio::spawn(async move {
            let member = engine
                .register_member(format!("m{i}"), format!("m{i}@stress.local"))
                .await
                .expect("register member");
            let begin = Instant::now();
            let result = engine
                .create_subscription(member.id, plan_id, slot_id, start_date, 0, None, None)
                .await;
            (begin.elapsed(), result.is_ok())
        }));
    }

    let mut latencies = Vec::with_capacity(MEMBERS);
    let mut booked = 0usize;
    let mut rejected = 0usize;
    for handle in handles {
        let (latency, ok) = handle.await.expect("task panicked");
        latencies.push(latency);
        if ok {
            booked += 1;
        } else {
            rejected += 1;
        }
    }
    println!(
        "  {booked} booked, {rejected} rejected in {:.2}ms",
        begin_all.elapsed().as_secs_f64() * 1000.0
    );
    print_latency("create_subscription", &mut latencies);

    let mut read_latencies = Vec::with_capacity(READS);
    for i in 0..READS {
        let slot_id = slots[i % slots.len()].id;
        let begin = Instant::now();
        engine
            .check_capacity(slot_id, DateRange::single(start_date), None)
            .await
            .expect("check capacity");
        read_latencies.push(begin.elapsed());
    }
    print_latency("check_capacity", &mut read_latencies);
}
