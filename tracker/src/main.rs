use clap::Parser;
use log::{error, info};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracker::recorder::LogRecorder;
use tracker::{shutdown, Config, Manager, NoReputation, ServerSnapshot, TrackerSettings};

/// Tracks the configured servers until Ctrl+C, printing a roster summary
/// after every dump interval.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    let servers = config.server_configs()?;
    let settings = TrackerSettings::default();

    let manager = Manager::new(servers, settings, Arc::new(NoReputation)).with_recorder(Arc::new(LogRecorder));
    let (trigger, shutdown) = shutdown::channel();
    let handles = manager.start(shutdown).await;
    info!("Tracking {} server(s)", manager.len());

    let mut report = interval(settings.dump_interval);
    report.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
            _ = report.tick() => {
                for snapshot in manager.snapshot().await {
                    print_snapshot(&snapshot, config.json);
                }
            }
        }
    }

    trigger.fire();
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Worker task panicked: {}", e);
        }
    }
    manager.close().await;

    Ok(())
}

fn print_snapshot(snapshot: &ServerSnapshot, json: bool) {
    if json {
        match serde_json::to_string(snapshot) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Failed to serialize snapshot: {}", e),
        }
        return;
    }

    println!(
        "{} | {} | {} players | {:.0} fps",
        snapshot.server,
        snapshot.info.map,
        snapshot.players.len(),
        snapshot.stats.fps
    );
    for player in &snapshot.players {
        let flagged = if player.reputation_matches.is_empty() { "" } else { " !" };
        println!(
            "  {:>4} {:<32} team {} score {:>3} ping {:>3}{}",
            player.user_id, player.name, player.team, player.score, player.ping, flagged
        );
    }
}
