#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use rtp_sessiond::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::load()?);
    simple_logger::init_with_level(config.log.level.as_level())?;

    if config.sessions.is_empty() {
        log::warn!("no sessions configured, nothing to do");
        return Ok(());
    }

    rtp_sessiond::startup(config).await
}
