use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveTime, TimeDelta};
use ringside::engine::{Collaborators, CoachProfile, Engine, EngineError, EngineSettings, ReservationRequest};
use ringside::model::ClientIdentity;
use ringside::notify::NotifyHub;

fn bench_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("ringside_bench");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

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

async fn open_engine(name: &str, coaches: usize) -> Arc<Engine> {
    let engine = Engine::new(
        bench_wal_path(name),
        Arc::new(NotifyHub::new()),
        Collaborators::default(),
        EngineSettings::default(),
    )
    .unwrap();
    for i in 0..coaches {
        engine
            .register_coach(
                &format!("coach-{i}"),
                CoachProfile {
                    display_name: None,
                    work_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                    work_end: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
                    session_minutes: 60,
                    calendar_id: None,
                },
            )
            .await
            .unwrap();
    }
    Arc::new(engine)
}

fn request(coach: &str, day: u32, hour: u32, client: usize) -> ReservationRequest {
    let date = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap() + TimeDelta::days(i64::from(day));
    ReservationRequest {
        coach: coach.to_string(),
        date: date.format("%Y-%m-%d").to_string(),
        time: format!("{hour:02}:00"),
        client: ClientIdentity {
            name: format!("Client {client}"),
            email: format!("client{client}@example.com"),
            phone: None,
            notes: None,
        },
    }
}

/// Back-to-back sessions for one coach, one caller.
async fn phase1_sequential() {
    let engine = open_engine("sequential.wal", 1).await;
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let day = (i / 12) as u32;
        let hour = 8 + (i % 12) as u32;
        let t = Instant::now();
        engine.reserve(request("coach-0", day, hour, i)).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("reserve latency", &mut latencies);
}

/// Independent coaches in parallel; group commit should batch their fsyncs.
async fn phase2_concurrent() {
    let n_tasks = 10;
    let n_per_task = 200;
    let engine = open_engine("concurrent.wal", n_tasks).await;

    let start = Instant::now();
    let mut handles = Vec::new();
    for t in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let coach = format!("coach-{t}");
            for j in 0..n_per_task {
                let day = (j / 12) as u32;
                let hour = 8 + (j % 12) as u32;
                engine.reserve(request(&coach, day, hour, j)).await.unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

/// Many callers fighting over the same slots: exactly one winner per slot.
async fn phase3_contention() {
    let engine = open_engine("contention.wal", 1).await;
    let n_callers = 50;
    let slots = 12;
    let wins = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for c in 0..n_callers {
        let engine = engine.clone();
        let wins = wins.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            for s in 0..slots {
                match engine.reserve(request("coach-0", 0, 8 + s, c)).await {
                    Ok(_) => wins.fetch_add(1, Ordering::Relaxed),
                    Err(EngineError::SlotAlreadyTaken { .. }) => conflicts.fetch_add(1, Ordering::Relaxed),
                    Err(e) => panic!("unexpected error: {e}"),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let wins = wins.load(Ordering::Relaxed);
    let conflicts = conflicts.load(Ordering::Relaxed);
    println!(
        "  {n_callers} callers x {slots} slots in {:.2}s: {wins} won, {conflicts} rejected",
        elapsed.as_secs_f64()
    );
    assert_eq!(wins, slots as usize, "double booking detected");
}

/// Availability latency while a writer keeps reserving.
async fn phase4_read_under_load() {
    let engine = open_engine("read_load.wal", 1).await;
    for i in 0..600 {
        let day = (i / 6) as u32;
        let hour = 8 + 2 * (i % 6) as u32;
        engine.reserve(request("coach-0", day, hour, i)).await.unwrap();
    }

    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for i in 0..600 {
                let day = (i / 6) as u32;
                let hour = 9 + 2 * (i % 6) as u32;
                let _ = engine.reserve(request("coach-0", day, hour, i)).await;
            }
        })
    };

    let n = 1000;
    let mut latencies = Vec::with_capacity(n);
    for i in 0..n {
        let date = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap() + TimeDelta::days((i % 100) as i64);
        let t = Instant::now();
        engine
            .available_slots("coach-0", &date.format("%Y-%m-%d").to_string())
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    writer.await.unwrap();
    print_latency("availability latency", &mut latencies);
}

#[tokio::main]
async fn main() {
    println!("=== ringside stress benchmark ===\n");

    println!("[phase 1] sequential reservation throughput");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent reservation throughput");
    phase2_concurrent().await;

    println!("\n[phase 3] slot contention");
    phase3_contention().await;

    println!("\n[phase 4] availability latency under write load");
    phase4_read_under_load().await;

    println!("\n=== benchmark complete ===");
}
