use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// A request to run one reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub received_at: DateTime<Utc>,
    /// Hash of the swap that caused it, when the node reported one.
    pub tx_hash: Option<String>,
}

impl Trigger {
    pub fn now() -> Self {
        Self {
            received_at: Utc::now(),
            tx_hash: None,
        }
    }
}

/// Tendermint JSON-RPC frame as delivered over the websocket.
#[derive(Debug, Deserialize)]
struct RpcMessage {
    #[serde(default)]
    result: Option<RpcResult>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResult {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    events: Option<HashMap<String, Vec<String>>>,
}

/// Swap events on one pool, streamed from the node's websocket RPC.
///
/// Every notification becomes a [`Trigger`] on the bounded channel. When the
/// channel is full the read loop waits, so triggers queue behind the cycle
/// that is running instead of being dropped.
pub struct ChainEventFeed {
    ws_url: String,
    pool_id: u64,
    trigger_tx: mpsc::Sender<Trigger>,
}

impl ChainEventFeed {
    pub fn new(ws_url: impl Into<String>, pool_id: u64, trigger_tx: mpsc::Sender<Trigger>) -> Self {
        Self {
            ws_url: ws_url.into(),
            pool_id,
            trigger_tx,
        }
    }

    pub fn swap_query(pool_id: u64) -> String {
        format!("token_swapped.module = 'gamm' AND token_swapped.pool_id = '{pool_id}'")
    }

    fn subscribe_request(pool_id: u64) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": "subscribe",
            "id": 0,
            "params": { "query": Self::swap_query(pool_id) }
        })
        .to_string()
    }

    /// Spawn the subscription loop. The task owns the trigger sender and
    /// drops it on shutdown, which closes the controller's queue.
    pub fn start(self, shutdown_tx: &broadcast::Sender<()>) -> JoinHandle<()> {
        let mut shutdown = shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ChainEventFeed {
                ws_url,
                pool_id,
                trigger_tx,
            } = self;
            let mut backoff_ms: u64 = 500;

            loop {
                info!("Connecting to chain RPC websocket: {ws_url}");

                let conn = tokio::select! {
                    result = connect_async(ws_url.as_str()) => result,
                    _ = shutdown.recv() => {
                        info!("Chain event feed shutdown");
                        return;
                    }
                };

                match conn {
                    Ok((ws_stream, _)) => {
                        let (mut write, mut read) = ws_stream.split();

                        if let Err(e) = write.send(Message::Text(Self::subscribe_request(pool_id))).await {
                            warn!("Swap subscription request failed: {e}");
                        } else {
                            info!("Subscribed to swaps on pool {pool_id}");
                            backoff_ms = 500;

                            loop {
                                let msg = tokio::select! {
                                    msg = read.next() => msg,
                                    _ = shutdown.recv() => {
                                        info!("Chain event feed shutdown");
                                        return;
                                    }
                                };

                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        let Some(trigger) = parse_notification(&text) else {
                                            continue;
                                        };
                                        debug!("Swap event received: tx={:?}", trigger.tx_hash);

                                        let sent = tokio::select! {
                                            sent = trigger_tx.send(trigger) => sent,
                                            _ = shutdown.recv() => {
                                                info!("Chain event feed shutdown");
                                                return;
                                            }
                                        };
                                        if sent.is_err() {
                                            info!("Trigger consumer gone, stopping chain event feed");
                                            return;
                                        }
                                    }
                                    Some(Ok(Message::Ping(payload))) => {
                                        let _ = write.send(Message::Pong(payload)).await;
                                    }
                                    Some(Ok(Message::Close(_))) => {
                                        warn!("Chain RPC websocket closed by node");
                                        break;
                                    }
                                    Some(Ok(_)) => {}
                                    Some(Err(e)) => {
                                        warn!("Chain RPC websocket error: {e}");
                                        break;
                                    }
                                    None => {
                                        warn!("Chain RPC websocket stream ended");
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Chain RPC websocket connection failed: {e}");
                    }
                }

                warn!("Chain RPC websocket reconnecting in {backoff_ms}ms...");
                tokio::select! {
                    _ = tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)) => {}
                    _ = shutdown.recv() => {
                        info!("Chain event feed shutdown");
                        return;
                    }
                }
                backoff_ms = (backoff_ms * 2).min(30_000);
            }
        })
    }
}

/// Turn a websocket frame into a trigger. Subscription acks, RPC errors and
/// anything that is not an event notification yield `None`.
pub fn parse_notification(text: &str) -> Option<Trigger> {
    let msg: RpcMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!("Ignoring non-JSON-RPC frame: {e}");
            return None;
        }
    };

    if let Some(err) = msg.error {
        warn!("Chain RPC returned error: {err}");
        return None;
    }

    let result = msg.result?;
    // The subscribe ack is an empty result without a query.
    if result.query.is_none() {
        return None;
    }

    let tx_hash = result
        .events
        .as_ref()
        .and_then(|events| events.get("tx.hash"))
        .and_then(|hashes| hashes.first())
        .cloned();

    Some(Trigger {
        received_at: Utc::now(),
        tx_hash,
    })
}
