//! Simulation runs: the scheduler against the demo cluster.

use tokio::sync::watch;
use tracing::info;

use batchgrid_core::{BatchConfig, Clock, ManualClock, SystemClock};
use batchgrid_oracle::SimCluster;
use batchgrid_scheduler::{Scheduler, SchedulerStatus};

use crate::world::demo_world;

/// Run `ticks` ticks in virtual time and print the final status.
pub fn simulate(config: BatchConfig, ticks: u64, realistic: bool, json: bool) -> anyhow::Result<()> {
    let clock = ManualClock::new(0);
    let env = demo_world(clock.clone(), &config, realistic);
    let tick_ms = config.tick_ms();
    let mut scheduler = Scheduler::new(env, config)?;

    info!(ticks, tick_ms, realistic, "simulation starting");
    let status = run_virtual(&mut scheduler, &clock, ticks);
    info!(
        elapsed_ms = status.now,
        completed = scheduler.env().completed_count(),
        "simulation finished"
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }
    Ok(())
}

fn run_virtual(
    scheduler: &mut Scheduler<SimCluster>,
    clock: &ManualClock,
    ticks: u64,
) -> SchedulerStatus {
    let tick_ms = scheduler.config().tick_ms();
    for _ in 0..ticks {
        let now = clock.now_ms();
        scheduler.tick(now);
        clock.advance(tick_ms);
    }
    scheduler.status(clock.now_ms())
}

/// Run in wall-clock time until Ctrl-C.
pub async fn run_sim(config: BatchConfig, realistic: bool) -> anyhow::Result<()> {
    let env = demo_world(SystemClock, &config, realistic);
    let mut scheduler = Scheduler::new(env, config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    scheduler.run(&SystemClock, shutdown_rx).await;

    print_status(&scheduler.status(SystemClock.now_ms()));
    info!("batchd stopped");
    Ok(())
}

fn print_status(status: &SchedulerStatus) {
    println!(
        "nodes={} free={:.1} batches={} exec_calls={} prep={} drift_resets={}",
        status.nodes,
        status.free_capacity,
        status.cycle.batches,
        status.cycle.exec_calls,
        status.cycle.prep_launches,
        status.cycle.drift_resets,
    );
    println!("skips: {}", status.skips.summary());
    for t in &status.targets {
        let money = t
            .money_ratio
            .map_or_else(|| "?".to_string(), |r| format!("{:.1}%", r * 100.0));
        let security = t
            .security_delta
            .map_or_else(|| "?".to_string(), |d| format!("{d:.2}"));
        println!(
            "{:<12} mode={:<5} inflight={:<3} total={:<6} money={:<7} sec+={:<6} ema$={:.2} emaSec={:.2} drift={}",
            t.target,
            t.mode.as_str(),
            t.inflight,
            t.total_batches,
            money,
            security,
            t.ema_money_ratio,
            t.ema_security_delta,
            t.drift_streak,
        );
    }
}
