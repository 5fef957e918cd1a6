pub mod config;
pub mod transport;

use std::sync::Arc;

use parking_lot::Mutex;
use rtp_session::port_allocator::PortAllocator;

use self::config::Config;

/// Starts one UDP transport per configured session concurrently, exposed as
/// a function rather than folded into `main` so integration tests can call
/// it directly instead of spawning a binary.
///
/// All sessions share one [`PortAllocator`], since the ephemeral range is a
/// process-wide resource: two sessions configured with overlapping listen
/// ports would otherwise race each other's `bind()`.
pub async fn startup(config: Arc<Config>) -> anyhow::Result<()> {
    let port_allocator = Arc::new(Mutex::new(PortAllocator::default()));
    let mut tasks = Vec::new();

    for session in config.sessions.clone() {
        let port_allocator = port_allocator.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = transport::run(session, port_allocator).await {
                log::error!("session task exited: {e}");
            }
        }));
    }

    for task in tasks {
        let _ = task.await;
    }

    Ok(())
}
