use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use ulid::Ulid;

use reservd::engine::{Engine, EngineSettings, ErrorKind};
use reservd::mail::LogMailer;
use reservd::model::*;
use reservd::notify::NotifyHub;
use reservd::store::Store;

const HOUR: i64 = 3_600_000; // 1 hour in ms
const EVENT_DATE: Ms = 4_000_000_000_000;
const ORGANIZER: UserId = 1;
const PROVIDER: UserId = 2;
/// Spreads a service's reservations so no event budget hits its item limit.
const EVENTS_PER_SERVICE: i64 = 100;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

/// A fresh store with one organizer and one provider, behind an engine
/// whose mailer only logs.
async fn open_engine(name: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("reservd_bench_{name}_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let store = Arc::new(Store::open(dir.join("reservd.wal")).expect("open store"));
    for (id, role) in [(ORGANIZER, Role::Organizer), (PROVIDER, Role::Provider)] {
        store
            .put_user(User {
                id,
                email: format!("user{id}@example.com"),
                role,
            })
            .await
            .expect("put user");
    }
    Arc::new(Engine::new(
        store,
        Arc::new(LogMailer),
        Arc::new(NotifyHub::new()),
        EngineSettings::default(),
    ))
}

/// One-hour service with an unbounded reservation window, and its own events.
async fn add_service(engine: &Engine, id: ServiceId) {
    let store = engine.store();
    store
        .put_service(
            MerchandiseInfo {
                id,
                title: format!("bench service {id}"),
                category_id: id % 5,
                provider_id: PROVIDER,
                available: true,
                visible: true,
                deleted: false,
            },
            ServiceTerms {
                min_duration: 60,
                max_duration: 0,
                reservation_deadline: u32::MAX,
                cancellation_deadline: 0,
            },
        )
        .await
        .expect("put service");
    for n in 0..EVENTS_PER_SERVICE {
        store
            .put_event(Event {
                id: id * EVENTS_PER_SERVICE + n,
                date: EVENT_DATE,
                budget: Budget::default(),
            })
            .await
            .expect("put event");
    }
}

fn request(service_id: ServiceId, slot: i64) -> ReservationRequest {
    ReservationRequest {
        event_id: service_id * EVENTS_PER_SERVICE + slot % EVENTS_PER_SERVICE,
        organizer_id: ORGANIZER,
        start_time: EVENT_DATE - (slot + 1) * HOUR,
        end_time: None,
    }
}

async fn phase1_sequential() {
    let engine = open_engine("sequential").await;
    add_service(&engine, 1).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        engine
            .reserve(1, request(1, i as i64))
            .await
            .expect("reservation failed");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("reserve latency", &mut latencies);
}

async fn phase2_concurrent() {
    let n_tasks = 10;
    let n_per_task = 200;
    let engine = open_engine("concurrent").await;
    for id in 0..n_tasks {
        add_service(&engine, id as ServiceId).await;
    }

    let start = Instant::now();
    let mut handles = Vec::new();

    for i in 0..n_tasks {
        let engine = engine.clone();
        let service_id = i as ServiceId;
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                engine
                    .reserve(service_id, request(service_id, j as i64))
                    .await
                    .expect("reservation failed");
            }
        }));
    }

    for h in handles {
        h.await.expect("task panicked");
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} reservations = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_contention() {
    let n_tasks = 64;
    let n_slots = 100;
    let engine = open_engine("contention").await;
    add_service(&engine, 1).await;

    let won = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let engine = engine.clone();
        let won = won.clone();
        let lost = lost.clone();
        handles.push(tokio::spawn(async move {
            for slot in 0..n_slots {
                match engine.reserve(1, request(1, slot)).await {
                    Ok(_) => {
                        won.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) if e.kind() == ErrorKind::TimeSlotAlreadyBooked => {
                        lost.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
        }));
    }

    for h in handles {
        h.await.expect("task panicked");
    }

    let won = won.load(Ordering::Relaxed);
    let lost = lost.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks racing for {n_slots} slots: {won} won, {lost} conflicts in {:.2}s",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(won, n_slots as usize, "every slot must be won exactly once");
}

async fn phase4_read_under_load() {
    let engine = open_engine("read_load").await;
    add_service(&engine, 1).await;
    for slot in 0..200 {
        engine
            .reserve(1, request(1, slot))
            .await
            .expect("prefill failed");
    }

    // Writers keep booking other services in the background
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let service_id = 100 + w;
        add_service(&engine, service_id).await;
        let engine = engine.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let mut i = 0;
            while !stop.load(Ordering::Relaxed) {
                let _ = engine.reserve(service_id, request(service_id, i)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let engine = engine.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                engine.service_timeslots(1).await.expect("query failed");
                engine.provider_calendar(PROVIDER).await.expect("query failed");
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.expect("task panicked"));
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("timeslots + calendar query", &mut all_latencies);
}

#[tokio::main]
async fn main() {
    println!("=== reservd stress benchmark ===\n");

    println!("[phase 1] sequential reservation throughput");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent reservations, one service per task");
    phase2_concurrent().await;

    println!("\n[phase 3] contention on a single service");
    phase3_contention().await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load().await;

    println!("\n=== done ===");
}
