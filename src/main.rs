mod config;
mod storage;
mod world;

use std::env;
use std::process;
use std::sync::Arc;

use log::{error, info};

use config::Config;
use storage::LoadOutcome;
use world::World;

fn main() {
    pretty_env_logger::init();

    let config_path = env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&config_path);

    let map = Arc::new(World::new(config.storage.ignore_world_load_errors));
    let mut db = match storage::open_database(&config.storage, map.clone()) {
        Ok(db) => db,
        Err(e) => {
            error!("Cannot open block database: {}", e);
            process::exit(1);
        }
    };

    let positions = match db.list_all_blocks() {
        Ok(positions) => positions,
        Err(e) => {
            error!("Cannot list stored blocks: {}", e);
            process::exit(1);
        }
    };
    info!("{} blocks stored", positions.len());

    let mut loaded = 0usize;
    let mut ignored = 0usize;
    for pos in positions {
        match db.load_block(pos) {
            Ok(LoadOutcome::Loaded(_)) => loaded += 1,
            Ok(LoadOutcome::IgnoredCorrupt) => ignored += 1,
            Ok(LoadOutcome::NotFound) => {}
            Err(e) => {
                error!("Aborting world check: {}", e);
                process::exit(1);
            }
        }
    }

    info!(
        "World check complete: {} blocks loaded, {} corrupt and ignored",
        loaded, ignored
    );
}
