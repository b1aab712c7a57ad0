use flood::config::{Config, SubmitMode};
use flood::controller::Controller;
use flood::execution::broadcaster::{DryRunSubmitter, RelaySubmitter};
use flood::execution::gateway::{ChainQuery, TxSubmitter};
use flood::execution::lcd_client::LcdClient;
use flood::execution::node_submitter::NodeSubmitter;
use flood::feeds::chain_events::ChainEventFeed;

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().skip(1).any(|a| a == "-v" || a == "--version") {
        println!("flood {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Reads .env before the subscriber so LOG_LEVEL from the file applies.
    // A malformed variable stops startup with the offending key on stderr.
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.telemetry.log_level)),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("================================================");
    info!("  FLOOD v{}", env!("CARGO_PKG_VERSION"));
    info!("  Concentrated-liquidity market maker");
    info!("================================================");

    if let Err(e) = config.validate() {
        error!("Config validation failed: {e}");
        return Err(e);
    }

    info!(
        "Pool {} ({} / {}), contract {}, signer {}",
        config.power_pool.pool_id,
        config.power_pool.base_asset,
        config.power_pool.quote_asset,
        config.power_pool.contract_address,
        config.signer.address,
    );

    let query: Arc<dyn ChainQuery> = Arc::new(LcdClient::new(&config.chain.lcd_url, config.query_timeout())?);

    let submitter: Arc<dyn TxSubmitter> = match config.submit_mode() {
        SubmitMode::DryRun => {
            warn!("DRY RUN: transactions are logged, not broadcast");
            Arc::new(DryRunSubmitter)
        }
        SubmitMode::Node => {
            info!("Signing in-process on {}", config.signer.chain_id);
            Arc::new(NodeSubmitter::new(
                &config.chain.lcd_url,
                &config.signer,
                config.query_timeout(),
            )?)
        }
        SubmitMode::Relay => {
            info!("Submitting through signing relay");
            Arc::new(RelaySubmitter::new(&config.signer, config.query_timeout())?)
        }
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (trigger_tx, trigger_rx) = mpsc::channel(config.chain.event_buffer);

    let feed = ChainEventFeed::new(
        config.chain.rpc_ws_url.clone(),
        config.power_pool.pool_id,
        trigger_tx,
    );
    let feed_handle = feed.start(&shutdown_tx);

    let mut controller = Controller::new(query, submitter, config.engine_settings());
    let shutdown_rx = shutdown_tx.subscribe();
    let mut controller_handle =
        tokio::spawn(async move { controller.run(trigger_rx, shutdown_rx).await });

    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received. Cleaning up...");
            None
        }
        finished = &mut controller_handle => Some(finished),
    };

    let _ = shutdown_tx.send(());
    let finished = match finished {
        Some(finished) => finished,
        None => controller_handle.await,
    };
    let _ = feed_handle.await;

    match finished {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("Controller stopped: {e}");
            return Err(e.into());
        }
        Err(e) => {
            error!("Controller task failed: {e}");
            return Err(e.into());
        }
    }

    info!("FLOOD shutdown complete.");
    Ok(())
}
