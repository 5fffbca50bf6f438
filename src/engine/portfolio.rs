use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

use crate::types::{Asset, BalanceEntry, PortfolioState, EUR, PORTFOLIO_VALUE_KEY};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient cash: need EUR {needed}, have EUR {available}")]
    InsufficientCash { needed: Decimal, available: Decimal },
    #[error("insufficient holdings: need {needed} {asset}, have {available}")]
    InsufficientHoldings {
        asset: Asset,
        needed: Decimal,
        available: Decimal,
    },
    #[error("non-positive execution price {price}")]
    NonPositivePrice { price: Decimal },
    #[error("empty bar series")]
    EmptySeries,
    #[error("bar timestamps are not monotonic non-decreasing")]
    NonMonotonicSeries,
}

/// One executed order, after slippage and fees.
#[derive(Debug, Clone)]
pub struct Fill {
    pub quantity: Decimal,
    pub execution_price: Decimal,
    pub fee_eur: Decimal,
    /// Realized P&L against FIFO entry lots. None for buys.
    pub realized_pnl: Option<Decimal>,
}

/// An open entry lot, kept for FIFO matching of sell proceeds.
#[derive(Debug, Clone)]
struct Lot {
    quantity: Decimal,
    /// Per-unit acquisition cost including fees.
    unit_cost: Decimal,
}

/// In-memory portfolio the backtest trades against. All money movement goes
/// through `apply_buy`/`apply_sell`; slippage is applied to the price first,
/// then the fee is charged on the traded notional.
#[derive(Debug, Clone)]
pub struct SimulatedPortfolio {
    cash_eur: Decimal,
    holdings: HashMap<Asset, Decimal>,
    lots: HashMap<Asset, VecDeque<Lot>>,
    fee_rate: Decimal,
    slippage_rate: Decimal,
}

impl SimulatedPortfolio {
    pub fn new(initial_capital: Decimal, fee_rate: Decimal, slippage_rate: Decimal) -> Self {
        Self {
            cash_eur: initial_capital,
            holdings: HashMap::new(),
            lots: HashMap::new(),
            fee_rate,
            slippage_rate,
        }
    }

    pub fn cash_eur(&self) -> Decimal {
        self.cash_eur
    }

    pub fn quantity(&self, asset: Asset) -> Decimal {
        self.holdings.get(&asset).copied().unwrap_or(Decimal::ZERO)
    }

    /// Mark-to-market total at the given price.
    pub fn total_value(&self, asset: Asset, price: Decimal) -> Decimal {
        self.cash_eur + self.quantity(asset) * price
    }

    /// Spend `eur_amount` on the asset at the market price. Slippage worsens
    /// the execution price, the fee is charged on top of the notional.
    pub fn apply_buy(
        &mut self,
        asset: Asset,
        eur_amount: Decimal,
        market_price: Decimal,
    ) -> Result<Fill, EngineError> {
        if market_price <= Decimal::ZERO {
            return Err(EngineError::NonPositivePrice {
                price: market_price,
            });
        }
        let execution_price = market_price * (Decimal::ONE + self.slippage_rate);
        let fee_eur = eur_amount * self.fee_rate;
        let total_cost = eur_amount + fee_eur;
        if total_cost > self.cash_eur {
            return Err(EngineError::InsufficientCash {
                needed: total_cost,
                available: self.cash_eur,
            });
        }

        let quantity = eur_amount / execution_price;
        self.cash_eur -= total_cost;
        *self.holdings.entry(asset).or_insert(Decimal::ZERO) += quantity;
        self.lots.entry(asset).or_default().push_back(Lot {
            quantity,
            unit_cost: total_cost / quantity,
        });

        Ok(Fill {
            quantity,
            execution_price,
            fee_eur,
            realized_pnl: None,
        })
    }

    /// Sell `eur_amount` worth of the asset, valued at the market price.
    /// Proceeds land net of slippage and fee; realized P&L is matched FIFO
    /// against the entry lots.
    pub fn apply_sell(
        &mut self,
        asset: Asset,
        eur_amount: Decimal,
        market_price: Decimal,
    ) -> Result<Fill, EngineError> {
        if market_price <= Decimal::ZERO {
            return Err(EngineError::NonPositivePrice {
                price: market_price,
            });
        }
        let held = self.quantity(asset);
        let mut quantity = eur_amount / market_price;
        // EUR sizing is rounded to cents upstream; tolerate up to one cent
        // of overshoot against the exact position value.
        if quantity > held && (quantity - held) * market_price < Decimal::new(1, 2) {
            quantity = held;
        }
        if quantity > held {
            return Err(EngineError::InsufficientHoldings {
                asset,
                needed: quantity,
                available: held,
            });
        }

        let execution_price = market_price * (Decimal::ONE - self.slippage_rate);
        let gross = quantity * execution_price;
        let fee_eur = gross * self.fee_rate;
        let net = gross - fee_eur;

        let cost_basis = self.consume_lots(asset, quantity);
        self.cash_eur += net;
        if let Some(q) = self.holdings.get_mut(&asset) {
            *q -= quantity;
        }

        Ok(Fill {
            quantity,
            execution_price,
            fee_eur,
            realized_pnl: Some(net - cost_basis),
        })
    }

    /// Pop entry lots front-to-back until `quantity` is covered, returning
    /// the matched acquisition cost.
    fn consume_lots(&mut self, asset: Asset, mut quantity: Decimal) -> Decimal {
        let mut cost = Decimal::ZERO;
        let Some(lots) = self.lots.get_mut(&asset) else {
            return cost;
        };
        while quantity > Decimal::ZERO {
            let Some(front) = lots.front_mut() else {
                break;
            };
            if front.quantity <= quantity {
                cost += front.quantity * front.unit_cost;
                quantity -= front.quantity;
                lots.pop_front();
            } else {
                cost += quantity * front.unit_cost;
                front.quantity -= quantity;
                quantity = Decimal::ZERO;
            }
        }
        cost
    }

    /// Snapshot in the wire shape the risk validator consumes.
    pub fn state_view(&self, asset: Asset, price: Decimal) -> PortfolioState {
        let mut state = PortfolioState::new();
        state.set(EUR, BalanceEntry::amount(self.cash_eur));
        state.set(
            asset.as_str(),
            BalanceEntry::with_price(self.quantity(asset), price),
        );
        state.set(
            PORTFOLIO_VALUE_KEY,
            BalanceEntry::amount(self.total_value(asset, price)),
        );
        state
    }
}
