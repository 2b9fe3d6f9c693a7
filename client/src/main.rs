use clap::Parser;
use client::bot::OrbitBot;
use client::config::ClientConfig;
use client::replication::ReplicationManager;
use client::scene::{EntityCollection, MaterialHandle, MeshHandle, SceneEntities};
use glam::Vec3;
use log::{error, info, warn};
use rand::Rng;
use shared::DEFAULT_PORT;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};

const PLAYER_MESH: MeshHandle = MeshHandle(1);
const PLAYER_MATERIAL: MaterialHandle = MaterialHandle(1);
const PROJECTILE_MESH: MeshHandle = MeshHandle(2);
const PROJECTILE_MATERIAL: MaterialHandle = MaterialHandle(2);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay (or peer, with --direct-id) host to connect to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Relay (or peer) port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Local UDP port, 0 for ephemeral
    #[arg(long, default_value = "0")]
    local_port: u16,

    /// Skip the relay handshake and use this player ID
    #[arg(long)]
    direct_id: Option<u32>,

    /// Simulation ticks per second
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,

    /// Seconds without updates before a remote player is dropped (0 disables)
    #[arg(long, default_value = "5")]
    remote_timeout: u64,

    /// Radius of the walked circle
    #[arg(long, default_value = "10.0")]
    radius: f32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ClientConfig {
        local_port: args.local_port,
        direct_player_id: args.direct_id,
        remote_timeout: (args.remote_timeout > 0).then(|| Duration::from_secs(args.remote_timeout)),
        ..ClientConfig::default()
    };

    let phase = rand::thread_rng().gen_range(0.0..std::f32::consts::TAU);
    let mut bot = OrbitBot::new(Vec3::ZERO, args.radius, 0.8, phase);
    let mut scene = SceneEntities::new();
    let mut manager = ReplicationManager::new(config);

    info!("Starting client...");
    let player_id = manager
        .connect(
            &args.host,
            args.port,
            &bot.transform(),
            PLAYER_MESH,
            PLAYER_MATERIAL,
        )
        .await?;
    info!("Playing as {}", player_id);

    let mut ticker = interval(Duration::from_secs_f32(1.0 / args.tick_rate.max(1) as f32));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_tick = Instant::now();
    let mut last_report = Instant::now();
    let mut projectile_entities = [None; shared::MAX_PROJECTILES];

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last_tick).as_secs_f32();
                last_tick = now;

                let local = bot.step(dt);

                for slot in bot.expire() {
                    if let Err(e) = manager.remove_network_projectile(slot) {
                        warn!("Failed to free projectile slot {}: {}", slot, e);
                    }
                    if let Some(entity) = projectile_entities[slot].take() {
                        scene.despawn(entity);
                    }
                }

                if let Some((slot, origin)) = bot.try_fire() {
                    let entity = scene.spawn(PROJECTILE_MESH, PROJECTILE_MATERIAL, origin);
                    projectile_entities[slot] = Some(entity);
                    if let Err(e) = manager.add_network_projectile(entity, origin, slot) {
                        warn!("Failed to register projectile slot {}: {}", slot, e);
                    }
                }

                manager.update(dt, &local, &bot.projectile_transforms(), &mut scene);

                if last_report.elapsed() >= Duration::from_secs(2) {
                    last_report = Instant::now();
                    for remote in manager.remote_players() {
                        info!(
                            "Remote player {} at ({:.1}, {:.1}, {:.1})",
                            remote.id,
                            remote.transform.position.x,
                            remote.transform.position.y,
                            remote.transform.position.z
                        );
                    }
                }
            },

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, disconnecting...");
                break;
            },
        }
    }

    if let Err(e) = manager.disconnect(&mut scene).await {
        error!("Disconnect failed: {}", e);
    }

    Ok(())
}
