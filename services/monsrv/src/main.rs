//! Monitoring service binary

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use monsrv::bootstrap::{self, Args, Correlators};
use monsrv::Config;
use solar_codec::ProtocolDefinition;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ============ Phase 1: Arguments and configuration ============
    let args = Args::parse();
    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    if let Some(level) = &args.log_level {
        if common::logging::parse_level(level).is_none() {
            anyhow::bail!("Invalid log level: {}", level);
        }
        config.logging.level = level.clone();
    }
    let _log_guard =
        common::logging::init(&config.logging).context("Failed to initialize logging")?;

    if args.validate {
        info!("Configuration {} is valid", args.config.display());
        return Ok(());
    }

    if args.list_commands {
        let protocol = ProtocolDefinition::by_name(&config.device.protocol)?;
        print!("{}", bootstrap::list_commands(&protocol));
        return Ok(());
    }

    // ============ Phase 2: Port and scheduler ============
    let correlators = Correlators::default();
    let service = bootstrap::build_service(&config, args.once, &correlators)
        .context("Failed to build service")?;
    info!(
        "Monitoring {} ({}) via {}",
        config.device.name,
        config.device.protocol,
        service.port.lock().await.kind()
    );

    let port = service.port.clone();
    let mut handle = service.scheduler.start();

    // ============ Phase 3: Run until done or signalled ============
    if args.once {
        let summary = handle.join().await?;
        info!("Ran {} command(s)", summary.commands);
    } else {
        let signal = common::shutdown::wait_for_shutdown().await;
        info!("{} received, stopping", signal);
        if let Some(summary) = handle.stop().await {
            info!(
                "Scheduler ran {} cycle(s), {} command(s), {} ad-hoc",
                summary.cycles, summary.commands, summary.adhoc
            );
        }
    }

    if let Err(e) = port.lock().await.disconnect().await {
        warn!("Port disconnect failed: {}", e);
    }
    info!("monsrv stopped");
    Ok(())
}
