use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult, SubmissionError};
use crate::execution::fanout::{join_pair, with_timeout};
use crate::execution::gateway::{ChainQuery, TxSubmitter};
use crate::feeds::chain_events::Trigger;
use crate::models::chain::PoolRef;
use crate::models::message::OutboundMessage;
use crate::models::position::Position;
use crate::models::quote::{PriceSet, QuoteBasis, QuotePrices, QuoteRanges};
use crate::pricing::price_model::{derive_quote_basis, parse_decimal, target_price_decimal};
use crate::strategies::range_quoter::RangeQuoter;
use crate::strategies::reconciler::{PositionReconciler, Sizing};
use crate::telemetry::latency::{self, LatencyTracker};

/// Everything the controller needs from configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub contract_address: String,
    /// The pool positions are held in.
    pub pool: PoolRef,
    /// Signer identity; owns the positions and sends every message.
    pub owner: String,
    pub spread: Decimal,
    pub tick_spacing: i64,
    pub defaults: Sizing,
    pub query_timeout: Duration,
    /// Log latency percentiles after this many cycles; 0 disables.
    pub latency_summary_every: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Processing,
}

/// Reads and computed values of one cycle, ready to submit.
#[derive(Debug, Clone)]
pub struct CyclePlan {
    pub cycle_id: Uuid,
    pub prices: PriceSet,
    pub normalization_factor: String,
    pub basis: QuoteBasis,
    pub quote_prices: QuotePrices,
    pub current_tick: i64,
    pub ranges: QuoteRanges,
    pub positions: Vec<Position>,
    pub messages: Vec<OutboundMessage>,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub plan: CyclePlan,
    pub tx_hash: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub succeeded: u64,
    pub failed: u64,
}

impl CycleStats {
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed
    }
}

/// What a cycle had gathered before it failed.
#[derive(Debug, Default)]
struct CycleContext {
    prices: Option<PriceSet>,
    basis: Option<QuoteBasis>,
    current_tick: Option<i64>,
    ranges: Option<QuoteRanges>,
    position_ids: Option<Vec<u64>>,
}

/// Runs one reconciliation cycle per trigger, never two at once.
pub struct Controller {
    query: Arc<dyn ChainQuery>,
    submitter: Arc<dyn TxSubmitter>,
    settings: EngineSettings,
    quoter: RangeQuoter,
    reconciler: PositionReconciler,
    latency: Arc<LatencyTracker>,
    state_tx: watch::Sender<ControllerState>,
    stats: CycleStats,
}

impl Controller {
    pub fn new(
        query: Arc<dyn ChainQuery>,
        submitter: Arc<dyn TxSubmitter>,
        settings: EngineSettings,
    ) -> Self {
        let quoter = RangeQuoter::new(settings.spread, settings.tick_spacing);
        let reconciler = PositionReconciler::new(
            settings.pool.id,
            settings.owner.clone(),
            settings.defaults.clone(),
        );
        let (state_tx, _) = watch::channel(ControllerState::Idle);

        Self {
            query,
            submitter,
            settings,
            quoter,
            reconciler,
            latency: Arc::new(LatencyTracker::new(1_000)),
            state_tx,
            stats: CycleStats::default(),
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ControllerState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    pub fn latency(&self) -> Arc<LatencyTracker> {
        self.latency.clone()
    }

    /// Consume triggers until shutdown or until the subscription closes.
    ///
    /// Cycle failures are logged and skipped. A closed trigger channel is
    /// fatal and returned as [`EngineError::SubscriptionClosed`].
    pub async fn run(
        &mut self,
        mut triggers: mpsc::Receiver<Trigger>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> EngineResult<()> {
        info!(
            "Controller started for pool {} as {}",
            self.settings.pool.id, self.settings.owner
        );

        loop {
            let trigger = tokio::select! {
                trigger = triggers.recv() => trigger,
                _ = shutdown.recv() => {
                    info!("Controller shutdown after {} cycles", self.stats.completed());
                    self.latency.log_summary();
                    return Ok(());
                }
            };

            let Some(trigger) = trigger else {
                error!("Event subscription closed");
                self.latency.log_summary();
                return Err(EngineError::SubscriptionClosed);
            };

            self.state_tx.send_replace(ControllerState::Processing);
            let result = self.run_cycle(&trigger).await;
            self.state_tx.send_replace(ControllerState::Idle);

            if let Err(e) = result {
                if e.is_fatal() {
                    return Err(e);
                }
            }

            let every = self.settings.latency_summary_every;
            if every > 0 && self.stats.completed() % every == 0 {
                self.latency.log_summary();
            }
        }
    }

    /// Plan and submit one cycle. Either every message is submitted as one
    /// batch or none is.
    pub async fn run_cycle(&mut self, trigger: &Trigger) -> EngineResult<CycleReport> {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("cycle", id = %cycle_id);

        let result = async {
            debug!(
                "Triggered at {} by tx {:?}",
                trigger.received_at, trigger.tx_hash
            );
            let _cycle_timer = self.latency.start_timer(latency::CYCLE);

            let mut ctx = CycleContext::default();
            let outcome = match self.plan_into(cycle_id, &mut ctx).await {
                Ok(plan) => self.submit(plan).await,
                Err(e) => Err(e),
            };

            match &outcome {
                Ok(report) => info!(
                    tx_hash = %report.tx_hash,
                    messages = report.plan.messages.len(),
                    "Cycle submitted"
                ),
                Err(e) => error!(
                    error = %e,
                    prices = ?ctx.prices,
                    basis = ?ctx.basis,
                    current_tick = ?ctx.current_tick,
                    ranges = ?ctx.ranges,
                    positions = ?ctx.position_ids,
                    "Cycle failed"
                ),
            }
            outcome
        }
        .instrument(span)
        .await;

        match &result {
            Ok(_) => self.stats.succeeded += 1,
            Err(_) => self.stats.failed += 1,
        }
        result
    }

    /// Run every read and computation of a cycle without submitting.
    pub async fn plan_cycle(&self) -> EngineResult<CyclePlan> {
        let mut ctx = CycleContext::default();
        self.plan_into(Uuid::new_v4(), &mut ctx).await
    }

    async fn submit(&self, plan: CyclePlan) -> EngineResult<CycleReport> {
        let after = self.settings.query_timeout;
        let _t = self.latency.start_timer(latency::SUBMIT);

        let call = self.submitter.submit(&self.settings.owner, &plan.messages);
        let tx_hash = match tokio::time::timeout(after, call).await {
            Ok(result) => result?,
            Err(_) => return Err(SubmissionError::Timeout(after).into()),
        };

        Ok(CycleReport { plan, tx_hash })
    }

    async fn plan_into(&self, cycle_id: Uuid, ctx: &mut CycleContext) -> EngineResult<CyclePlan> {
        let after = self.settings.query_timeout;
        let contract = self.settings.contract_address.as_str();
        let pool_id = self.settings.pool.id;

        let (config, state) = {
            let _t = self.latency.start_timer(latency::CONTRACT_FANOUT);
            join_pair(
                with_timeout("derivative_config", after, self.query.derivative_config(contract)),
                with_timeout("derivative_state", after, self.query.derivative_state(contract)),
            )
            .await?
        };

        if config.power_pool.id != pool_id {
            warn!(
                "Contract power pool {} differs from configured pool {pool_id}",
                config.power_pool.id
            );
        }

        let prices = {
            let _t = self.latency.start_timer(latency::PRICE_FANOUT);
            let (base_spot_price, power_spot_price) = join_pair(
                with_timeout("base_spot_price", after, self.query.spot_price(&config.base_pool)),
                with_timeout("power_spot_price", after, self.query.spot_price(&config.power_pool)),
            )
            .await?;
            PriceSet {
                base_spot_price,
                power_spot_price,
            }
        };
        ctx.prices = Some(prices.clone());

        let normalization_factor = state.normalization_factor;
        let basis = derive_quote_basis(&prices, &normalization_factor, config.index_scale)?;
        ctx.basis = Some(basis);

        let target = target_price_decimal(
            &prices.base_spot_price,
            &normalization_factor,
            config.index_scale,
        )?;
        let power = parse_decimal(&prices.power_spot_price, "power spot price")?;
        let quote_prices = RangeQuoter::quote_prices(target, power)?;

        let (positions, current_tick) = {
            let _t = self.latency.start_timer(latency::POOL_READS);
            let positions = with_timeout(
                "open_positions",
                after,
                self.query.open_positions(pool_id, &self.settings.owner),
            )
            .await?;
            ctx.position_ids = Some(positions.iter().map(|p| p.position_id).collect());

            let tick = with_timeout("current_tick", after, self.query.current_tick(pool_id)).await?;
            (positions, tick)
        };
        ctx.current_tick = Some(current_tick);

        debug!(
            mark = basis.mark_price,
            index = basis.index_price,
            target = basis.target_price,
            premium = basis.premium,
            inverse_target = 1.0 / basis.target_price,
            inverse_power = %Decimal::ONE.checked_div(power).unwrap_or_default(),
            normalization_factor = %normalization_factor,
            current_tick,
            "summary"
        );

        let ranges = self.quoter.quote_ranges(quote_prices, current_tick)?;
        ctx.ranges = Some(ranges);

        let messages = self.reconciler.reconcile(&positions, &ranges)?;

        Ok(CyclePlan {
            cycle_id,
            prices,
            normalization_factor,
            basis,
            quote_prices,
            current_tick,
            ranges,
            positions,
            messages,
        })
    }
}
