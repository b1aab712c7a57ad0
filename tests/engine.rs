//! Drives the controller end to end against an in-memory chain.
//!
//! The simulated chain answers the gateway queries and applies submitted
//! withdraw/create messages to its position book, so consecutive cycles see
//! the positions the previous cycle created.

use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use flood::controller::{Controller, ControllerState, EngineSettings};
use flood::error::{EngineError, QueryError, SubmissionError};
use flood::execution::gateway::{ChainQuery, TxSubmitter};
use flood::feeds::chain_events::Trigger;
use flood::models::chain::{Coin, PoolRef};
use flood::models::derivative::{DerivativeConfig, DerivativeState};
use flood::models::message::OutboundMessage;
use flood::models::position::Position;
use flood::strategies::reconciler::Sizing;

const POWER_POOL: u64 = 7;
const BASE_POOL: u64 = 1;
const AGENT: &str = "osmo1agent";
const CONTRACT: &str = "osmo1powercontract";
const POWER: &str = "factory/osmo1/upower";
const OSMO: &str = "uosmo";

// ---------------------------------------------------------------------------
// Simulated chain
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ChainBook {
    positions: Vec<Position>,
    next_id: u64,
    submissions: Vec<(String, Vec<OutboundMessage>)>,
}

struct SimChain {
    base_price: String,
    power_price: String,
    normalization_factor: String,
    index_scale: u64,
    current_tick: i64,
    /// Name of the query that fails, if any.
    failing: Option<&'static str>,
    spot_delay: Option<Duration>,
    spot_calls: AtomicU64,
    book: Mutex<ChainBook>,
}

impl SimChain {
    fn new() -> Self {
        Self {
            base_price: "1.0".into(),
            power_price: "0.25".into(),
            normalization_factor: "1".into(),
            index_scale: 1,
            current_tick: 1_500_000,
            failing: None,
            spot_delay: None,
            spot_calls: AtomicU64::new(0),
            book: Mutex::new(ChainBook {
                next_id: 100,
                ..ChainBook::default()
            }),
        }
    }

    fn with_positions(self, positions: Vec<Position>) -> Self {
        self.book.lock().unwrap().positions = positions;
        self
    }

    fn fail(&self, query: &'static str) -> Result<(), QueryError> {
        if self.failing == Some(query) {
            return Err(QueryError::Status {
                status: 503,
                body: format!("{query} unavailable"),
            });
        }
        Ok(())
    }

    fn submissions(&self) -> Vec<(String, Vec<OutboundMessage>)> {
        self.book.lock().unwrap().submissions.clone()
    }

    fn positions(&self) -> Vec<Position> {
        self.book.lock().unwrap().positions.clone()
    }

    fn apply(&self, owner: &str, messages: &[OutboundMessage]) {
        let mut book = self.book.lock().unwrap();
        book.submissions.push((owner.to_string(), messages.to_vec()));

        for msg in messages {
            match msg {
                OutboundMessage::WithdrawPosition(w) => {
                    book.positions.retain(|p| p.position_id != w.position_id);
                }
                OutboundMessage::CreatePosition(c) => {
                    let held = |denom: &str| {
                        c.tokens_provided
                            .iter()
                            .find(|coin| coin.denom == denom)
                            .map(|coin| coin.amount)
                            .unwrap_or(0)
                    };
                    let position = Position {
                        position_id: book.next_id,
                        owner: c.sender.clone(),
                        pool_id: c.pool_id,
                        lower_tick: c.lower_tick,
                        upper_tick: c.upper_tick,
                        liquidity: format!("{}.0", book.next_id),
                        asset0: Coin::new(POWER, held(POWER)),
                        asset1: Coin::new(OSMO, held(OSMO)),
                    };
                    book.next_id += 1;
                    book.positions.push(position);
                }
            }
        }
    }
}

#[async_trait]
impl ChainQuery for SimChain {
    async fn spot_price(&self, pool: &PoolRef) -> Result<String, QueryError> {
        self.spot_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.spot_delay {
            tokio::time::sleep(delay).await;
        }
        self.fail("spot_price")?;
        Ok(match pool.id {
            BASE_POOL => self.base_price.clone(),
            _ => self.power_price.clone(),
        })
    }

    async fn current_tick(&self, _pool_id: u64) -> Result<i64, QueryError> {
        self.fail("current_tick")?;
        Ok(self.current_tick)
    }

    async fn open_positions(&self, pool_id: u64, owner: &str) -> Result<Vec<Position>, QueryError> {
        self.fail("open_positions")?;
        Ok(self
            .positions()
            .into_iter()
            .filter(|p| p.pool_id == pool_id && p.owner == owner)
            .collect())
    }

    async fn derivative_config(&self, _contract: &str) -> Result<DerivativeConfig, QueryError> {
        self.fail("derivative_config")?;
        Ok(DerivativeConfig {
            power_pool: PoolRef::new(POWER_POOL, POWER, OSMO),
            base_pool: PoolRef::new(BASE_POOL, OSMO, "uusdc"),
            index_scale: self.index_scale,
            fee_rate: "0".into(),
            min_collateral: "0.5".into(),
            version: "0.1.0".into(),
            query_contract: None,
            fee_pool_contract: None,
            power_asset: None,
            base_asset: None,
            funding_period: None,
        })
    }

    async fn derivative_state(&self, _contract: &str) -> Result<DerivativeState, QueryError> {
        self.fail("derivative_state")?;
        Ok(DerivativeState {
            normalization_factor: self.normalization_factor.clone(),
            is_open: true,
            is_paused: false,
            last_pause: None,
            last_funding_update: "0".into(),
        })
    }
}

/// Submits straight into the simulated chain.
struct SimSubmitter {
    chain: Arc<SimChain>,
    reject: bool,
}

#[async_trait]
impl TxSubmitter for SimSubmitter {
    async fn submit(&self, owner: &str, messages: &[OutboundMessage]) -> Result<String, SubmissionError> {
        if self.reject {
            return Err(SubmissionError::Rejected {
                code: 5,
                raw_log: "insufficient funds".into(),
            });
        }
        self.chain.apply(owner, messages);
        Ok(format!("TX{}", self.chain.submissions().len()))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn settings() -> EngineSettings {
    EngineSettings {
        contract_address: CONTRACT.into(),
        pool: PoolRef::new(POWER_POOL, POWER, OSMO),
        owner: AGENT.into(),
        spread: dec!(0.05),
        tick_spacing: 100,
        defaults: Sizing {
            base: Coin::new(POWER, 1_000_000),
            quote: Coin::new(OSMO, 2_000_000),
        },
        query_timeout: Duration::from_secs(2),
        latency_summary_every: 1,
    }
}

fn controller(chain: Arc<SimChain>) -> Controller {
    controller_with(chain, false)
}

fn controller_with(chain: Arc<SimChain>, reject: bool) -> Controller {
    let submitter = Arc::new(SimSubmitter {
        chain: chain.clone(),
        reject,
    });
    Controller::new(chain, submitter, settings())
}

fn position(id: u64, base: u128, quote: u128) -> Position {
    Position {
        position_id: id,
        owner: AGENT.into(),
        pool_id: POWER_POOL,
        lower_tick: -500_000,
        upper_tick: 0,
        liquidity: format!("{id}.5"),
        asset0: Coin::new(POWER, base),
        asset1: Coin::new(OSMO, quote),
    }
}

// ---------------------------------------------------------------------------
// Cycles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_first_cycle_places_default_pair() {
    let chain = Arc::new(SimChain::new());
    let ctrl = controller(chain.clone());

    let plan = ctrl.plan_cycle().await.unwrap();

    assert_eq!(plan.basis.mark_price, 4.0);
    assert_eq!(plan.basis.index_price, 1.0);
    assert_eq!(plan.basis.target_price, 1.0);
    assert_eq!(plan.basis.premium, 3.0);
    assert_eq!(plan.quote_prices.buy, dec!(1));
    assert_eq!(plan.quote_prices.sell, dec!(4));
    assert_eq!(plan.current_tick, 1_500_000);

    assert_eq!(plan.messages.len(), 2);
    let buy = plan.messages[0].as_create().unwrap();
    assert_eq!((buy.lower_tick, buy.upper_tick), (-500_000, 0));
    assert_eq!(buy.tokens_provided, vec![Coin::new(OSMO, 2_000_000)]);
    let sell = plan.messages[1].as_create().unwrap();
    assert_eq!((sell.lower_tick, sell.upper_tick), (3_000_000, 3_200_000));
    assert_eq!(sell.tokens_provided, vec![Coin::new(POWER, 1_000_000)]);

    // Planning alone never submits.
    assert!(chain.submissions().is_empty());
    assert_eq!(chain.spot_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_run_cycle_submits_one_batch_as_owner() {
    let chain = Arc::new(SimChain::new());
    let mut ctrl = controller(chain.clone());

    let report = ctrl.run_cycle(&Trigger::now()).await.unwrap();
    assert_eq!(report.tx_hash, "TX1");

    let submissions = chain.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].0, AGENT);
    assert_eq!(submissions[0].1, report.plan.messages);
    assert_eq!(ctrl.stats().succeeded, 1);
}

#[tokio::test]
async fn test_capital_carries_over_between_cycles() {
    let chain = Arc::new(SimChain::new());
    let mut ctrl = controller(chain.clone());

    ctrl.run_cycle(&Trigger::now()).await.unwrap();
    assert_eq!(chain.positions().len(), 2);

    let report = ctrl.run_cycle(&Trigger::now()).await.unwrap();
    let messages = &report.plan.messages;
    assert_eq!(messages.len(), 4);
    assert!(messages[0].is_withdraw() && messages[1].is_withdraw());

    let buy = messages[2].as_create().unwrap();
    let sell = messages[3].as_create().unwrap();
    assert_eq!(buy.tokens_provided, vec![Coin::new(OSMO, 2_000_000)]);
    assert_eq!(sell.tokens_provided, vec![Coin::new(POWER, 1_000_000)]);

    let positions = chain.positions();
    assert_eq!(positions.len(), 2);
    let total_base: u128 = positions.iter().map(|p| p.asset0.amount).sum();
    let total_quote: u128 = positions.iter().map(|p| p.asset1.amount).sum();
    assert_eq!((total_base, total_quote), (1_000_000, 2_000_000));
}

#[tokio::test]
async fn test_unexpected_position_counts_submit_nothing() {
    for positions in [
        vec![position(1, 10, 10)],
        vec![position(1, 10, 10), position(2, 10, 10), position(3, 10, 10)],
    ] {
        let expected = positions.len();
        let chain = Arc::new(SimChain::new().with_positions(positions));
        let mut ctrl = controller(chain.clone());

        let err = ctrl.run_cycle(&Trigger::now()).await.unwrap_err();
        assert!(
            matches!(err, EngineError::UnexpectedPositionCount(n) if n == expected),
            "unexpected error {err:?}"
        );
        assert!(chain.submissions().is_empty());
        assert_eq!(ctrl.stats().failed, 1);
    }
}

#[tokio::test]
async fn test_query_failure_aborts_cycle() {
    for failing in ["derivative_state", "spot_price", "open_positions", "current_tick"] {
        let mut chain = SimChain::new();
        chain.failing = Some(failing);
        let chain = Arc::new(chain);
        let mut ctrl = controller(chain.clone());

        let err = ctrl.run_cycle(&Trigger::now()).await.unwrap_err();
        assert!(
            matches!(err, EngineError::Query(QueryError::Status { status: 503, .. })),
            "{failing}: unexpected error {err:?}"
        );
        assert!(chain.submissions().is_empty());
    }
}

#[tokio::test]
async fn test_empty_normalization_factor_is_invalid_input() {
    let mut chain = SimChain::new();
    chain.normalization_factor = String::new();
    let ctrl = controller(Arc::new(chain));

    let err = ctrl.plan_cycle().await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)), "{err:?}");
}

#[tokio::test]
async fn test_collapsed_ranges_submit_nothing() {
    // Power priced at the target: both quote prices land on the same tick.
    let mut chain = SimChain::new();
    chain.power_price = "1.0".into();
    let chain = Arc::new(chain);
    let mut ctrl = controller(chain.clone());

    let err = ctrl.run_cycle(&Trigger::now()).await.unwrap_err();
    assert!(matches!(err, EngineError::TickOrdering { .. }), "{err:?}");
    assert!(chain.submissions().is_empty());
    assert_eq!(ctrl.stats().failed, 1);
}

#[tokio::test]
async fn test_unrepresentable_quote_price_submits_nothing() {
    // A target of 1e13 inverts below the smallest price on the grid.
    let mut chain = SimChain::new();
    chain.base_price = "0.0000000000001".into();
    let chain = Arc::new(chain);
    let mut ctrl = controller(chain.clone());

    let err = ctrl.run_cycle(&Trigger::now()).await.unwrap_err();
    assert!(matches!(err, EngineError::TickConversion { .. }), "{err:?}");
    assert!(chain.submissions().is_empty());
}

#[tokio::test]
async fn test_stalled_query_times_out() {
    let mut chain = SimChain::new();
    chain.spot_delay = Some(Duration::from_millis(500));
    let chain = Arc::new(chain);

    let mut settings = settings();
    settings.query_timeout = Duration::from_millis(50);
    let submitter = Arc::new(SimSubmitter {
        chain: chain.clone(),
        reject: false,
    });
    let mut ctrl = Controller::new(chain.clone(), submitter, settings);

    let err = ctrl.run_cycle(&Trigger::now()).await.unwrap_err();
    assert!(
        matches!(err, EngineError::Query(QueryError::Timeout { .. })),
        "unexpected error {err:?}"
    );
    assert!(chain.submissions().is_empty());
}

#[tokio::test]
async fn test_rejected_submission_is_reported() {
    let chain = Arc::new(SimChain::new());
    let mut ctrl = controller_with(chain.clone(), true);

    let err = ctrl.run_cycle(&Trigger::now()).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Submission(SubmissionError::Rejected { code: 5, .. })
    ));
    assert!(chain.positions().is_empty());
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_closed_subscription_is_fatal_after_queued_cycles() {
    let chain = Arc::new(SimChain::new());
    let mut ctrl = controller(chain.clone());
    let state = ctrl.subscribe_state();

    let (trigger_tx, trigger_rx) = mpsc::channel(4);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    trigger_tx.send(Trigger::now()).await.unwrap();
    trigger_tx.send(Trigger::now()).await.unwrap();
    drop(trigger_tx);

    let result = ctrl.run(trigger_rx, shutdown_rx).await;
    assert!(matches!(result, Err(EngineError::SubscriptionClosed)));

    // Both queued triggers ran, one after the other.
    assert_eq!(ctrl.stats().succeeded, 2);
    assert_eq!(chain.submissions().len(), 2);
    assert_eq!(*state.borrow(), ControllerState::Idle);
    assert!(ctrl.latency().sample_count("cycle") >= 2);
}

#[tokio::test]
async fn test_failed_cycles_do_not_stop_the_loop() {
    let chain = Arc::new(SimChain::new().with_positions(vec![position(1, 1, 1)]));
    let mut ctrl = controller(chain.clone());

    let (trigger_tx, trigger_rx) = mpsc::channel(4);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    for _ in 0..3 {
        trigger_tx.send(Trigger::now()).await.unwrap();
    }
    drop(trigger_tx);

    let result = ctrl.run(trigger_rx, shutdown_rx).await;
    assert!(matches!(result, Err(EngineError::SubscriptionClosed)));
    assert_eq!(ctrl.stats().failed, 3);
    assert!(chain.submissions().is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_cleanly() {
    let chain = Arc::new(SimChain::new());
    let mut ctrl = controller(chain);

    let (_trigger_tx, trigger_rx) = mpsc::channel::<Trigger>(4);
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    shutdown_tx.send(()).unwrap();

    let result = ctrl.run(trigger_rx, shutdown_rx).await;
    assert!(result.is_ok());
    assert_eq!(ctrl.stats().completed(), 0);
}

#[tokio::test]
async fn test_state_moves_through_processing() {
    let mut chain = SimChain::new();
    chain.spot_delay = Some(Duration::from_millis(50));
    let mut ctrl = controller(Arc::new(chain));
    let mut state = ctrl.subscribe_state();
    assert_eq!(*state.borrow(), ControllerState::Idle);

    let (trigger_tx, trigger_rx) = mpsc::channel(4);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let handle = tokio::spawn(async move { ctrl.run(trigger_rx, shutdown_rx).await });

    trigger_tx.send(Trigger::now()).await.unwrap();

    state.changed().await.unwrap();
    assert_eq!(*state.borrow_and_update(), ControllerState::Processing);
    state.changed().await.unwrap();
    assert_eq!(*state.borrow_and_update(), ControllerState::Idle);

    drop(trigger_tx);
    let result = handle.await.unwrap();
    assert!(matches!(result, Err(EngineError::SubscriptionClosed)));
}
