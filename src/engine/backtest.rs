use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::regime::{Regime, RegimeClassifier};
use crate::risk::CapitalRiskValidator;
use crate::strategies::DecisionMaker;
use crate::types::{
    Action, Asset, BarSeries, Decision, DecisionRecord, MarketSnapshot, PortfolioState,
    TradeRecord,
};

use super::portfolio::{EngineError, SimulatedPortfolio};

/// Parameters of a single backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub asset: Asset,
    pub initial_capital: Decimal,
    /// Fee charged on the traded notional.
    pub fee_rate: Decimal,
    /// Price worsening applied before the fee.
    pub slippage_rate: Decimal,
    /// Baseline position size as a percentage of portfolio value, before
    /// confidence and regime scaling.
    pub base_trade_pct: f64,
    /// Seed for the simulated decision maker.
    pub seed: u64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            asset: Asset::BTC,
            initial_capital: dec!(10000),
            fee_rate: dec!(0.006),
            slippage_rate: dec!(0.0005),
            base_trade_pct: 25.0,
            seed: 42,
        }
    }
}

/// One mark-to-market observation of the equity curve, annotated with the
/// regime active at that bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub value: Decimal,
    pub regime: Regime,
}

/// Everything a run produces: a decision for every bar, the executed trades,
/// the equity curve, and the final portfolio snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub asset: Asset,
    pub initial_capital: Decimal,
    pub final_value: Decimal,
    pub decisions: Vec<DecisionRecord>,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    pub final_state: PortfolioState,
}

/// Bar-by-bar replay driver. Each bar goes through snapshot, classification,
/// decision, risk validation, and application, in that order. Decision-maker
/// failures are downgraded to a safe HOLD so a single bad bar cannot abort
/// the run.
pub struct BacktestEngine {
    config: BacktestConfig,
    classifier: RegimeClassifier,
    validator: CapitalRiskValidator,
    decision_maker: Box<dyn DecisionMaker>,
}

impl BacktestEngine {
    pub fn new(
        config: BacktestConfig,
        classifier: RegimeClassifier,
        validator: CapitalRiskValidator,
        decision_maker: Box<dyn DecisionMaker>,
    ) -> Self {
        Self {
            config,
            classifier,
            validator,
            decision_maker,
        }
    }

    pub fn run(&mut self, series: &BarSeries) -> Result<BacktestResult, EngineError> {
        if series.is_empty() {
            return Err(EngineError::EmptySeries);
        }
        if !series.is_monotonic() {
            return Err(EngineError::NonMonotonicSeries);
        }

        let asset = self.config.asset;
        let mut portfolio = SimulatedPortfolio::new(
            self.config.initial_capital,
            self.config.fee_rate,
            self.config.slippage_rate,
        );
        let mut decisions = Vec::with_capacity(series.len());
        let mut trades = Vec::new();
        let mut equity_curve = Vec::with_capacity(series.len());

        info!(
            "backtest start: {} bars of {}, EUR {} initial capital",
            series.len(),
            asset,
            self.config.initial_capital
        );

        for index in 0..series.len() {
            let bar = &series.bars[index];
            let price = bar.close;
            let state = portfolio.state_view(asset, price);

            let (decision, regime) = match MarketSnapshot::from_series(series, index, asset) {
                Some(snapshot) => {
                    let regime = self.classifier.classify_snapshot(&snapshot);
                    let decision = match self
                        .decision_maker
                        .decide(&snapshot, bar, regime, &state)
                    {
                        Ok(decision) => decision,
                        Err(err) => {
                            warn!("bar {}: decision maker failed: {:#}", index, err);
                            Decision::safe_hold(format!("decision maker failed: {}", err))
                        }
                    };
                    (decision, regime)
                }
                None => {
                    warn!("bar {}: no snapshot available", index);
                    let decision = Decision::safe_hold("no market snapshot".to_string());
                    let regime = decision.regime;
                    (decision, regime)
                }
            };

            let mut risk_reason = None;
            if decision.action != Action::Hold {
                let requested = requested_size(&state, &decision, self.config.base_trade_pct);
                let outcome =
                    self.validator
                        .validate(decision.action, asset, &state, requested, bar.timestamp);
                if outcome.is_approved() {
                    let applied = match decision.action {
                        Action::Buy => portfolio.apply_buy(asset, outcome.approved, price),
                        Action::Sell => portfolio.apply_sell(asset, outcome.approved, price),
                        Action::Hold => unreachable!(),
                    };
                    match applied {
                        Ok(fill) => {
                            self.validator
                                .note_trade(asset, outcome.approved, bar.timestamp);
                            debug!(
                                "bar {}: {} EUR {} at {} (fee {})",
                                index, decision.action, outcome.approved, fill.execution_price,
                                fill.fee_eur
                            );
                            trades.push(TradeRecord {
                                index,
                                timestamp: bar.timestamp,
                                asset,
                                action: decision.action,
                                requested_eur: requested,
                                approved_eur: outcome.approved,
                                quantity: fill.quantity,
                                execution_price: fill.execution_price,
                                fee_eur: fill.fee_eur,
                                portfolio_value_after: portfolio.total_value(asset, price),
                                risk_reason: outcome.reason.clone(),
                                realized_pnl: fill.realized_pnl,
                            });
                            if outcome.reason != "approved at requested size" {
                                risk_reason = Some(outcome.reason);
                            }
                        }
                        Err(err) => {
                            warn!("bar {}: order rejected at execution: {}", index, err);
                            risk_reason = Some(err.to_string());
                        }
                    }
                } else {
                    debug!("bar {}: {} blocked: {}", index, decision.action, outcome.reason);
                    risk_reason = Some(outcome.reason);
                }
            }

            decisions.push(DecisionRecord {
                index,
                timestamp: bar.timestamp,
                asset,
                price,
                action: decision.action,
                confidence: decision.confidence,
                regime: decision.regime,
                strategy: decision.primary_strategy,
                risk_reason,
            });
            equity_curve.push(EquityPoint {
                index,
                timestamp: bar.timestamp,
                value: portfolio.total_value(asset, price),
                regime,
            });
        }

        let last_price = series
            .last()
            .map(|b| b.close)
            .unwrap_or(Decimal::ZERO);
        let final_value = portfolio.total_value(asset, last_price);
        info!(
            "backtest done: {} trades, final value EUR {}",
            trades.len(),
            final_value
        );

        Ok(BacktestResult {
            asset,
            initial_capital: self.config.initial_capital,
            final_value,
            decisions,
            trades,
            equity_curve,
            final_state: portfolio.state_view(asset, last_price),
        })
    }
}

/// Proposed trade size before risk validation: the configured base fraction
/// of portfolio value, scaled by confidence and the decision's own
/// size multiplier.
fn requested_size(state: &PortfolioState, decision: &Decision, base_trade_pct: f64) -> Decimal {
    let scale = (base_trade_pct / 100.0) * (decision.confidence / 100.0) * decision.size_multiplier;
    let scale = Decimal::try_from(scale).unwrap_or(Decimal::ZERO);
    (state.total_value() * scale).round_dp(2)
}
