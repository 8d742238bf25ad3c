/*!
 * lodekv Server Main Entry Point
 *
 * Initializes logging, creates the keyspace and runs the event loop on
 * the calling thread.
 */

use anyhow::Result;
use lodekv::*;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    // Respects RUST_LOG, e.g. RUST_LOG=debug
    env_logger::init();

    let config = ServerConfig::default();
    let shard = Shard::new(0);
    let mut server = Server::bind(config, shard)?;

    // Blocks until the shutdown flag is raised, which nothing does here.
    server.run()
}
