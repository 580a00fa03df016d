use clap::Parser;
use log::{info, warn};
use peer::config::{PeerConfig, PlayerConfig};
use peer::input::BotInput;
use peer::utils::get_timestamp;
use peer::{DistributedWorld, LocalGroup, Simulation};
use shared::WorldDimensions;
use std::sync::Arc;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Room shared by all peers
    #[arg(short = 'r', long, default_value = "tanks")]
    room: String,

    /// Arena width in grid pieces
    #[arg(long, default_value = "40")]
    pieces_x: u32,

    /// Arena height in grid pieces
    #[arg(long, default_value = "24")]
    pieces_y: u32,

    /// Number of in-process peers
    #[arg(short = 'p', long, default_value = "3")]
    peers: usize,

    /// Bot players per peer
    #[arg(long, default_value = "1")]
    players: usize,

    /// Tick rate (updates per second)
    #[arg(short = 't', long, default_value = "30")]
    tick_rate: u32,

    /// How long to run, in seconds
    #[arg(short = 'd', long, default_value = "20")]
    duration_secs: u64,

    /// Seed for bots and obstacle layouts
    #[arg(long, default_value = "1")]
    seed: u64,
}

/// Runs a headless session of bot-driven peers sharing one in-process group.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let group = LocalGroup::new();
    let mut simulations = Vec::with_capacity(args.peers);

    for index in 0..args.peers {
        let config = PeerConfig {
            room: args.room.clone(),
            dimensions: WorldDimensions::new(args.pieces_x, args.pieces_y),
            players: (0..args.players)
                .map(|player| PlayerConfig::new(format!("bot-{}-{}", index, player)))
                .collect(),
            ..PeerConfig::default()
        };
        let seed = args.seed.wrapping_add(index as u64 * 1_000);
        simulations.push(start_peer(&group, &config, seed).await?);
    }

    run_session(&mut simulations, args.tick_rate, Duration::from_secs(args.duration_secs)).await;

    for simulation in &simulations {
        let peer = simulation.peer();
        if let Ok(world) = peer.world() {
            let scores: Vec<String> = world
                .agents()
                .iter()
                .map(|agent| format!("{}={}", agent.name(), agent.state().score))
                .collect();
            info!(
                "{}: {} entities, scores [{}]",
                peer.local_id().map(|id| id.to_string()).unwrap_or_default(),
                world.entity_count(),
                scores.join(", ")
            );
        }
        peer.shutdown();
    }

    Ok(())
}

/// Connects one peer, seeds obstacles if it founded the world and spawns
/// its bots.
async fn start_peer(
    group: &LocalGroup,
    config: &PeerConfig,
    seed: u64,
) -> Result<Simulation, Box<dyn std::error::Error>> {
    let peer = Arc::new(DistributedWorld::with_seed(
        Arc::new(group.endpoint()),
        tokio::runtime::Handle::current(),
        seed,
    ));
    peer.connect(&config.room, config.dimensions).await?;

    if peer.is_founder() {
        for _ in 0..config.obstacle_count() {
            peer.create_obstacle()?;
        }
    }
    for (offset, player) in config.players.iter().enumerate() {
        peer.spawn_agent(player, BotInput::new(seed + offset as u64))?;
    }

    Ok(Simulation::with_seed(peer, seed))
}

/// Starts the tick loop.
async fn run_session(simulations: &mut [Simulation], tick_rate: u32, duration: Duration) {
    let mut interval_timer = interval(Duration::from_secs_f32(1.0 / tick_rate.max(1) as f32));
    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let started = Instant::now();
    let mut last_update = Instant::now();

    // Cap the maximum delta time to 50ms
    let max_delta_time = 1.0 / 20.0;

    // Skip the first tick since it fires immediately
    interval_timer.tick().await;

    while started.elapsed() < duration {
        tokio::select! {
            _ = interval_timer.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                return;
            }
        }

        let current_time = Instant::now();
        let mut delta_time = (current_time - last_update).as_secs_f32();
        last_update = current_time;

        if delta_time > max_delta_time {
            warn!(
                "Large delta time detected ({:.3}s), capping to {:.3}s",
                delta_time, max_delta_time
            );
            delta_time = max_delta_time;
        }

        let now = get_timestamp();
        for simulation in simulations.iter_mut() {
            if let Err(e) = simulation.tick(now, delta_time) {
                warn!("Tick failed: {}", e);
            }
        }
    }
}
