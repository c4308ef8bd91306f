//! The simulation driver.
//!
//! A [`Simulator`] owns the market, the agent roster, the clock and a single
//! seeded [`ChaCha8Rng`]. Each block it orders the agents, collects their
//! trade intents and executes them one at a time against the market, writing
//! one [`TradeRow`] per executed trade to an [`OutputSink`]. Every day
//! boundary accrues variable yield. On the final block agents are asked for
//! liquidation trades instead, so a run ends flat.

use std::io::Write;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::agent::{ActionType, Agent, InitialLiquidityProvider, Policy, TradeOutcome, TradeSpec};
use crate::config::SimConfig;
use crate::error::SimError;
use crate::market::Market;
use crate::pool::PoolSnapshot;
use crate::time::SimClock;
use crate::wallet::WalletSnapshot;

/// One executed trade and the state it left behind
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRow {
    pub run_number: u32,
    pub day: u32,
    pub block_number: u64,
    pub daily_block_number: u32,
    pub elapsed_years: f64,
    pub trade_number: u64,
    pub agent: usize,
    pub action: ActionType,
    pub amount: f64,
    pub maturity: Option<u32>,
    pub fixed_apr: f64,
    pub spot_price: f64,
    pub variable_apr: f64,
    pub pool: PoolSnapshot,
    pub wallets: Vec<WalletSnapshot>,
}

/// Write-only destination for trade rows
pub trait OutputSink {
    fn append(&mut self, row: &TradeRow) -> Result<(), SimError>;
}

/// Keeps every row in memory
#[derive(Debug, Clone, Default)]
pub struct SimulationRecord {
    rows: Vec<TradeRow>,
}

impl SimulationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[TradeRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<TradeRow> {
        self.rows
    }
}

impl OutputSink for SimulationRecord {
    fn append(&mut self, row: &TradeRow) -> Result<(), SimError> {
        self.rows.push(row.clone());
        Ok(())
    }
}

/// Writes each row as one JSON object per line
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> OutputSink for JsonLinesSink<W> {
    fn append(&mut self, row: &TradeRow) -> Result<(), SimError> {
        serde_json::to_writer(&mut self.writer, row).map_err(|err| SimError::Output {
            reason: err.to_string(),
        })?;
        self.writer.write_all(b"\n").map_err(|err| SimError::Output {
            reason: err.to_string(),
        })
    }
}

/// Totals for a finished run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub trades_executed: u64,
    pub trades_failed: u64,
    pub wallets: Vec<WalletSnapshot>,
}

/// Sequences agent trades against one market over a fixed number of blocks.
#[derive(Debug)]
pub struct Simulator {
    config: SimConfig,
    market: Market,
    rng: ChaCha8Rng,
    clock: SimClock,
    agents: Vec<Agent>,
    run_number: u32,
    trade_number: u64,
    trades_failed: u64,
}

impl Simulator {
    pub fn new(config: SimConfig, market: Market, rng: ChaCha8Rng) -> Result<Self, SimError> {
        let clock = SimClock::new(config.num_blocks_per_day())?;
        Ok(Self {
            config,
            market,
            rng,
            clock,
            agents: Vec::new(),
            run_number: 0,
            trade_number: 0,
            trades_failed: 0,
        })
    }

    /// Builds the market and rng a config describes.
    ///
    /// With `init_lp` set, agent 0 is an [`InitialLiquidityProvider`] funded
    /// with the target liquidity, and the pool is seeded from its wallet.
    pub fn from_config(config: SimConfig) -> Result<Self, SimError> {
        let market = Market::new(config.pricing_model(), config.market_params()?)?;
        let rng = ChaCha8Rng::seed_from_u64(config.random_seed());
        let init_lp = config.init_lp();
        let target_liquidity = config.target_liquidity();
        let mut simulator = Self::new(config, market, rng)?;
        if init_lp {
            simulator.register_agent(Box::new(InitialLiquidityProvider), target_liquidity)?;
            simulator.initialize_market()?;
        }
        Ok(simulator)
    }

    /// Tags every row, for callers that write several runs to one sink
    pub fn with_run_number(mut self, run_number: u32) -> Self {
        self.run_number = run_number;
        self
    }

    /// Adds an agent funded with `budget` base and returns its id.
    pub fn register_agent(&mut self, policy: Box<dyn Policy>, budget: f64) -> Result<usize, SimError> {
        let id = self.agents.len();
        let agent = Agent::new(id, budget, policy)?;
        debug!(agent = id, policy = agent.policy_name(), budget, "registered agent");
        self.agents.push(agent);
        Ok(id)
    }

    /// Seeds the pool from agent 0's wallet at the configured targets.
    pub fn initialize_market(&mut self) -> Result<(), SimError> {
        let target_liquidity = self.config.target_liquidity();
        let target_apr = self.config.target_fixed_apr();
        let agent = self
            .agents
            .first_mut()
            .ok_or_else(|| SimError::invalid_config("no agent registered to seed the market"))?;
        let (_, wallet_delta) = self
            .market
            .initialize(agent.wallet(), target_liquidity, target_apr)?;
        agent.apply_wallet_delta(&wallet_delta)
    }

    /// Order in which agents trade this block.
    ///
    /// Agent 0 is always last on the final block so it withdraws after
    /// every other position has closed.
    pub fn trade_order(&mut self, last_block: bool) -> Vec<usize> {
        let count = self.agents.len();
        if self.config.shuffle_users() {
            if last_block && count > 0 {
                let mut order: Vec<usize> = (1..count).collect();
                order.shuffle(&mut self.rng);
                order.push(0);
                order
            } else {
                let mut order: Vec<usize> = (0..count).collect();
                order.shuffle(&mut self.rng);
                order
            }
        } else if last_block {
            (0..count).rev().collect()
        } else {
            (0..count).collect()
        }
    }

    /// Collects every agent's trades for this block, then executes them in order.
    ///
    /// All policies see the market as it stood at the start of the block.
    /// A failed trade is skipped and logged unless the config asks to halt;
    /// fatal errors always abort.
    pub fn collect_and_execute<S>(
        &mut self,
        last_block: bool,
        sink: &mut S,
    ) -> Result<Vec<TradeOutcome>, SimError>
    where
        S: OutputSink + ?Sized,
    {
        let mut intents: Vec<(usize, TradeSpec)> = Vec::new();
        for index in self.trade_order(last_block) {
            let trades = self.agents[index].get_trades(&self.market, &mut self.rng, last_block);
            intents.extend(trades.into_iter().map(|trade| (index, trade)));
        }

        let mut outcomes = Vec::with_capacity(intents.len());
        for (index, trade) in intents {
            outcomes.push(self.execute_trade(index, trade, sink)?);
        }
        Ok(outcomes)
    }

    fn execute_trade<S>(&mut self, index: usize, trade: TradeSpec, sink: &mut S) -> Result<TradeOutcome, SimError>
    where
        S: OutputSink + ?Sized,
    {
        let agent_id = self.agents[index].id();
        match self.market.execute(self.agents[index].wallet(), &trade) {
            Ok((pool_delta, wallet_delta)) => {
                if let Err(err) = self.agents[index].apply_wallet_delta(&wallet_delta) {
                    error!(agent = agent_id, action = %trade.action, error = %err, "wallet rejected an applied trade");
                    return Err(err);
                }
                self.trade_number += 1;
                let row = self.trade_row(agent_id, &trade);
                sink.append(&row)?;
                Ok(TradeOutcome::executed(agent_id, trade, pool_delta, wallet_delta))
            }
            Err(err) if err.is_fatal() || self.config.halt_on_trade_error() => {
                error!(agent = agent_id, action = %trade.action, amount = trade.amount, error = %err, "aborting run");
                Err(err)
            }
            Err(err) => {
                warn!(agent = agent_id, action = %trade.action, amount = trade.amount, error = %err, "skipped trade");
                self.trades_failed += 1;
                Ok(TradeOutcome::failed(agent_id, trade, &err))
            }
        }
    }

    fn trade_row(&self, agent: usize, trade: &TradeSpec) -> TradeRow {
        TradeRow {
            run_number: self.run_number,
            day: self.clock.day(),
            block_number: self.clock.block_number(),
            daily_block_number: self.clock.block_in_day(),
            elapsed_years: self.market.block_time(),
            trade_number: self.trade_number,
            agent,
            action: trade.action,
            amount: trade.amount,
            maturity: trade.maturity,
            fixed_apr: self.market.fixed_apr().unwrap_or(f64::NAN),
            spot_price: self.market.spot_price().unwrap_or(f64::NAN),
            variable_apr: self.market.pool().variable_apr(),
            pool: self.market.pool().snapshot(),
            wallets: self.wallet_snapshots(),
        }
    }

    fn wallet_snapshots(&self) -> Vec<WalletSnapshot> {
        self.agents
            .iter()
            .map(|agent| agent.wallet().state(&self.market))
            .collect()
    }

    /// Runs every block of every trading day.
    pub fn run<S>(&mut self, sink: &mut S) -> Result<RunSummary, SimError>
    where
        S: OutputSink + ?Sized,
    {
        if !self.market.is_initialized() {
            return Err(SimError::MarketNotInitialized);
        }
        let total_blocks = self.config.total_blocks();
        info!(
            run = self.run_number,
            seed = self.config.random_seed(),
            agents = self.agents.len(),
            total_blocks,
            pricing_model = self.market.pricing_model().name(),
            "starting simulation"
        );

        for block in 0..total_blocks {
            if self.clock.day() > 0 && self.clock.block_in_day() == 0 {
                let variable_apr = self.config.variable_apr_on(self.clock.day());
                self.market
                    .advance_day(variable_apr, self.config.compound_variable_apr())?;
            }
            let last_block = block + 1 == total_blocks;
            self.collect_and_execute(last_block, sink)?;
            self.clock.advance_block();
            self.market.tick(self.clock.time_step())?;
        }

        let summary = RunSummary {
            trades_executed: self.trade_number,
            trades_failed: self.trades_failed,
            wallets: self.wallet_snapshots(),
        };
        self.report(&summary);
        Ok(summary)
    }

    fn report(&self, summary: &RunSummary) {
        info!(
            trades_executed = summary.trades_executed,
            trades_failed = summary.trades_failed,
            share_price = self.market.pool().share_price(),
            gov_fees = self.market.pool().gov_fees_accrued(),
            "simulation finished"
        );
        for (agent, wallet) in self.agents.iter().zip(&summary.wallets) {
            info!(
                agent = agent.id(),
                policy = agent.policy_name(),
                pnl = wallet.pnl,
                base = wallet.base,
                fees_paid = wallet.fees_paid,
                "final wallet"
            );
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn trade_number(&self) -> u64 {
        self.trade_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Opens a fixed long every block
    #[derive(Debug)]
    struct FixedLong {
        base: f64,
    }

    impl Policy for FixedLong {
        fn name(&self) -> &str {
            "fixed_long"
        }

        fn action(&mut self, _market: &Market, wallet: &Wallet, _rng: &mut ChaCha8Rng) -> Vec<TradeSpec> {
            if wallet.base() >= self.base {
                vec![TradeSpec::open_long(self.base)]
            } else {
                Vec::new()
            }
        }
    }

    /// Always asks for more than it holds
    #[derive(Debug)]
    struct Overspender;

    impl Policy for Overspender {
        fn name(&self) -> &str {
            "overspender"
        }

        fn action(&mut self, _market: &Market, wallet: &Wallet, _rng: &mut ChaCha8Rng) -> Vec<TradeSpec> {
            vec![TradeSpec::open_long(wallet.base() + 1.0)]
        }
    }

    /// Records the spot price it was shown, then opens a long
    #[derive(Debug)]
    struct Observer {
        seen: Rc<RefCell<Vec<f64>>>,
    }

    impl Policy for Observer {
        fn name(&self) -> &str {
            "observer"
        }

        fn action(&mut self, market: &Market, _wallet: &Wallet, _rng: &mut ChaCha8Rng) -> Vec<TradeSpec> {
            if let Ok(price) = market.spot_price() {
                self.seen.borrow_mut().push(price);
            }
            vec![TradeSpec::open_long(10_000.0)]
        }
    }

    fn create_test_simulator(shuffle: bool, halt: bool) -> Simulator {
        let config = SimConfig::builder()
            .with_shuffle_users(shuffle)
            .with_halt_on_trade_error(halt)
            .build()
            .unwrap();
        Simulator::from_config(config).unwrap()
    }

    #[test]
    fn test_unshuffled_order_puts_init_lp_last_on_final_block() {
        let mut sim = create_test_simulator(false, false);
        sim.register_agent(Box::new(FixedLong { base: 10.0 }), 100.0).unwrap();
        sim.register_agent(Box::new(FixedLong { base: 10.0 }), 100.0).unwrap();
        assert_eq!(sim.trade_order(false), vec![0, 1, 2]);
        assert_eq!(sim.trade_order(true), vec![2, 1, 0]);
    }

    #[test]
    fn test_shuffled_order_is_seeded_permutation() {
        let mut first = create_test_simulator(true, false);
        let mut second = create_test_simulator(true, false);
        for sim in [&mut first, &mut second] {
            for _ in 0..5 {
                sim.register_agent(Box::new(FixedLong { base: 10.0 }), 100.0).unwrap();
            }
        }
        let order = first.trade_order(false);
        assert_eq!(order, second.trade_order(false));
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..6).collect::<Vec<_>>());

        let last = first.trade_order(true);
        assert_eq!(last.last(), Some(&0));
        assert_eq!(last.len(), 6);
    }

    #[test]
    fn test_run_records_one_row_per_trade_and_ends_flat() {
        let mut sim = create_test_simulator(false, false);
        sim.register_agent(Box::new(FixedLong { base: 1_000.0 }), 10_000.0).unwrap();
        let mut record = SimulationRecord::new();
        let summary = sim.run(&mut record).unwrap();

        // eight opens across three checkpoints, three closes, one withdrawal
        assert_eq!(summary.trades_failed, 0);
        assert_eq!(summary.trades_executed, 8 + 3 + 1);
        assert_eq!(record.len() as u64, summary.trades_executed);
        assert_eq!(record.rows().last().map(|row| row.agent), Some(0));
        assert!(sim.agents().iter().all(|agent| agent.wallet().is_flat()));
        assert_eq!(sim.clock().day(), 3);
        assert!(sim.market().pool().share_price() > 1.0);
    }

    #[test]
    fn test_failed_trade_is_skipped_or_halts() {
        let mut sim = create_test_simulator(false, false);
        sim.register_agent(Box::new(Overspender), 100.0).unwrap();
        let mut record = SimulationRecord::new();
        let outcomes = sim.collect_and_execute(false, &mut record).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].error_kind, Some("insufficient_balance"));
        assert!(record.is_empty());

        let mut sim = create_test_simulator(false, true);
        sim.register_agent(Box::new(Overspender), 100.0).unwrap();
        assert!(matches!(
            sim.collect_and_execute(false, &mut record),
            Err(SimError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_policies_in_one_block_see_the_same_market() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut sim = create_test_simulator(false, false);
        for _ in 0..2 {
            let policy = Observer { seen: Rc::clone(&seen) };
            sim.register_agent(Box::new(policy), 10_000.0).unwrap();
        }
        let start_price = sim.market().spot_price().unwrap();
        let mut record = SimulationRecord::new();
        let outcomes = sim.collect_and_execute(false, &mut record).unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|outcome| outcome.success));
        assert_eq!(*seen.borrow(), vec![start_price, start_price]);
        // both longs did move the price, after every intent was collected
        assert!(sim.market().spot_price().unwrap() > start_price);
        assert!(record.rows()[1].spot_price > record.rows()[0].spot_price);
    }

    #[test]
    fn test_fatal_error_aborts_without_halt_flag() {
        let mut sim = create_test_simulator(false, false);
        // past the largest representable decimal
        sim.register_agent(Box::new(FixedLong { base: 1e30 }), 1e30).unwrap();
        let mut record = SimulationRecord::new();
        let err = sim.collect_and_execute(false, &mut record).unwrap_err();
        assert!(matches!(err, SimError::Precision { .. }));
        assert!(err.is_fatal());
        assert!(record.is_empty());
        assert_eq!(sim.trade_number(), 0);

        let mut sim = create_test_simulator(false, false);
        sim.register_agent(Box::new(FixedLong { base: 1e30 }), 1e30).unwrap();
        assert!(matches!(
            sim.run(&mut record),
            Err(SimError::Precision { .. })
        ));
    }

    #[test]
    fn test_json_lines_sink_writes_one_line_per_row() {
        let mut sim = create_test_simulator(false, false).with_run_number(4);
        sim.register_agent(Box::new(FixedLong { base: 100.0 }), 1_000.0).unwrap();
        let mut sink = JsonLinesSink::new(Vec::new());
        let summary = sim.run(&mut sink).unwrap();
        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(output.lines().count() as u64, summary.trades_executed);
        let first: serde_json::Value = serde_json::from_str(output.lines().next().unwrap()).unwrap();
        assert_eq!(first["action"], "open_long");
        assert_eq!(first["run_number"], 4);
        assert_eq!(first["wallets"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_run_requires_initialized_market() {
        let config = SimConfig::builder().with_init_lp(false).build().unwrap();
        let mut sim = Simulator::from_config(config).unwrap();
        let mut record = SimulationRecord::new();
        assert!(matches!(
            sim.run(&mut record),
            Err(SimError::MarketNotInitialized)
        ));
    }
}
