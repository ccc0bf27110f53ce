use std::sync::Arc;

use eyre::Result;
use futures::StreamExt;
use network::ConsensusClient;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::WatcherState;

/// Queue every `chain_reorg` event until the stream ends or fails.
pub(crate) async fn listen_chain_reorgs(consensus: &ConsensusClient, state: &WatcherState) -> Result<()> {
    info!("Listening chain reorg events");
    let events = consensus.chain_reorg_events().await?;
    let mut events = std::pin::pin!(events);
    while let Some(event) = events.next().await {
        let event = event?;
        warn!(slot = event.slot, depth = event.depth, new_head = %event.new_head_block, "Chain reorg event");
        state.insert_reorg(event).await;
    }
    warn!("Chain reorg event stream ended");
    Ok(())
}

/// Run the listener in the background. The watcher restarts it once it finishes.
pub(crate) fn spawn(consensus: ConsensusClient, state: Arc<WatcherState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = listen_chain_reorgs(&consensus, &state).await {
            error!(%err, "Error while listening chain reorg events");
        }
    })
}
