//! `tickwork simulate`: drive a demo workload on a live dispatcher.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tickwork_engine::{DriverHandle, ExecutionMode, Owner, Schedule, Scheduler};
use tracing::info;

pub fn execute(path: Option<&Path>, ticks: u64, tps: Option<u32>) -> anyhow::Result<()> {
    let mut config = super::load_config(path)?;
    if let Some(tps) = tps {
        config.ticks_per_second = tps;
    }
    config.validate()?;
    let tps = config.ticks_per_second;

    let (scheduler, dispatcher) = Scheduler::start(config);
    let start = scheduler.current_tick();

    let physics = Owner::with_authors("physics", vec!["alice".to_string()]);
    let weather = Owner::with_authors("weather", vec!["bob".to_string()]);
    let steps = Arc::new(AtomicU64::new(0));
    let saves = Arc::new(AtomicU64::new(0));
    let forecasts = Arc::new(AtomicU64::new(0));

    let counter = Arc::clone(&steps);
    scheduler.repeat_sync(&physics, 0, 1, move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    })?;

    let counter = Arc::clone(&saves);
    scheduler.repeat_async(&physics, 5, 5, move |handle| {
        thread::sleep(Duration::from_millis(2));
        counter.fetch_add(1, Ordering::Relaxed);
        info!(task_id = %handle.id(), "autosave written");
        Ok(())
    })?;

    let counter = Arc::clone(&forecasts);
    scheduler.repeat_async(&weather, 0, 3, move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    })?;

    scheduler.submit(
        &weather,
        ExecutionMode::Sync,
        Schedule::once(ticks / 4),
        |handle| {
            info!(tick = handle.scheduler().current_tick(), "storm rolled in");
            Ok(())
        },
    )?;

    scheduler.run_sync(&weather, ticks.saturating_mul(2), |_| {
        anyhow::bail!("weather should have been cancelled before this ran")
    })?;

    println!("Simulating {} ticks at {} tps", ticks, tps);
    let driver = dispatcher
        .spawn_driver(tps)
        .context("failed to spawn dispatcher thread")?;

    wait_for_tick(&scheduler, &driver, start + ticks / 2)?;

    let thread_name = scheduler
        .call_sync(&physics, || thread::current().name().map(str::to_string))?
        .wait_timeout(Duration::from_secs(5))?;
    println!(
        "call_sync ran on {}",
        thread_name.as_deref().unwrap_or("<unnamed>")
    );

    println!("Cancelling all tasks of {}", weather);
    scheduler.cancel_tasks(&weather);

    wait_for_tick(&scheduler, &driver, start + ticks)?;

    println!();
    println!("Pending tasks at tick {}:", scheduler.current_tick());
    for task in scheduler.pending_tasks() {
        let interval = task
            .interval
            .map_or_else(|| "once".to_string(), |p| format!("every {}", p));
        println!(
            "  {:>5}  {:<8} {:<6} {:<10} next at {}",
            task.id.to_string(),
            task.owner.name(),
            format!("{:?}", task.mode),
            interval,
            task.next_run
        );
    }

    let dispatcher = driver
        .stop()
        .context("dispatcher thread did not stop")?;
    println!();
    println!("{}", dispatcher.recent_activity());

    let faults = scheduler.faults().try_iter().count();
    let report = scheduler.shutdown();

    println!();
    println!("physics steps:   {}", steps.load(Ordering::Relaxed));
    println!("autosaves:       {}", saves.load(Ordering::Relaxed));
    println!("forecasts:       {}", forecasts.load(Ordering::Relaxed));
    println!("async faults:    {}", faults);
    if report.is_clean() {
        println!("shutdown:        clean after {} polls", report.polls);
    } else {
        println!("shutdown:        {} overdue workers", report.overdue.len());
        for worker in &report.overdue {
            println!(
                "  {} on {}",
                worker.task_id(),
                worker.thread_name().unwrap_or("<unnamed>")
            );
        }
    }
    Ok(())
}

fn wait_for_tick(scheduler: &Scheduler, driver: &DriverHandle, target: u64) -> anyhow::Result<()> {
    while scheduler.current_tick() < target {
        if !driver.is_running() {
            anyhow::bail!("dispatcher thread exited at tick {}", scheduler.current_tick());
        }
        thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}
