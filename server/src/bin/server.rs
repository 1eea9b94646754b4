//! Lodestone server binary.
//!
//! Runs the embedding driver: a nominal 50 Hz loop that polls the
//! network core and moves joined sessions into the player table.

use clap::Parser;
use io_driver::Engine;
use server::config::Config;
use server::net::Networking;
use server::player::PlayerTable;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Nominal tick interval.
const TICK: Duration = Duration::from_millis(20);

#[derive(Parser)]
#[command(name = "lodestone-server")]
#[command(about = "Minecraft Beta 1.7.3 server")]
struct Args {
    /// Path to configuration file
    config: Option<PathBuf>,

    /// Listen port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// I/O engine: auto, mio, or uring (overrides the config file)
    #[arg(long)]
    engine: Option<Engine>,
}

fn main() {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(engine) = args.engine {
        config.io_engine = engine;
    }

    server::logging::init(&config.logging);

    let mut networking = match Networking::new(config.io_engine) {
        Ok(networking) => networking,
        Err(e) => {
            error!("failed to initialize networking: {e}");
            std::process::exit(1);
        }
    };

    let addr = config.listen_addr();
    if let Err(e) = networking.listen(addr) {
        error!("failed to listen on {addr}: {e}");
        std::process::exit(1);
    }
    info!(%addr, engine = %config.io_engine, "listening");

    run(&mut networking);
}

/// The tick loop. Only exits with the process.
fn run(networking: &mut Networking) -> ! {
    let mut players = PlayerTable::new();
    let mut next_tick = Instant::now();

    loop {
        let joined = networking.poll();
        if joined > 0 {
            debug!(joined, "sessions completed login");
        }

        for session in networking.joined() {
            match players.join(session) {
                Some(key) => {
                    info!(
                        username = %session.username_lossy(),
                        connection = session.connection.index(),
                        player = key,
                        "player joined"
                    );
                }
                None => {
                    // The rest of this batch has nowhere to go either.
                    warn!("player table full");
                    break;
                }
            }
        }

        next_tick += TICK;
        match next_tick.checked_duration_since(Instant::now()) {
            Some(wait) => std::thread::sleep(wait),
            // A long tick; don't try to catch up.
            None => next_tick = Instant::now(),
        }
    }
}
