use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::types::{Action, Asset, PortfolioState};

use super::rebalance::{check_rebalance_need, RebalanceConfig, RebalanceSignal};

/// Capital-preservation limits applied to every proposed trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// EUR reserve floor as a percentage of total value. BUYs may not dip
    /// the cash balance below it.
    pub min_eur_reserve_pct: f64,
    /// Single-trade ceiling as a percentage of total value.
    pub max_trade_pct: f64,
    /// Smallest executable trade in EUR.
    pub min_trade_eur: Decimal,
    /// A sell leaving less than this behind takes the full position instead.
    pub dust_threshold_eur: Decimal,
    pub max_trades_per_day: u32,
    /// Daily turnover ceiling as a percentage of total value.
    pub max_daily_volume_pct: f64,
    /// Minimum seconds between trades in the same asset.
    pub min_trade_spacing_secs: i64,
    /// Fee plus slippage headroom reserved on top of a BUY, in percent.
    pub cost_buffer_pct: f64,
    pub rebalance: RebalanceConfig,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_eur_reserve_pct: 12.0,
            max_trade_pct: 35.0,
            min_trade_eur: dec!(30),
            dust_threshold_eur: dec!(5),
            max_trades_per_day: 12,
            max_daily_volume_pct: 50.0,
            min_trade_spacing_secs: 3600,
            cost_buffer_pct: 0.65,
            rebalance: RebalanceConfig::default(),
        }
    }
}

/// Result of sizing a proposed trade. `approved` is zero on rejection and
/// `reason` always explains what happened, including approvals that were
/// reduced along the way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingOutcome {
    pub approved: Decimal,
    pub reason: String,
}

impl SizingOutcome {
    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            approved: Decimal::ZERO,
            reason: reason.into(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.approved > Decimal::ZERO
    }
}

fn pct(value: f64) -> Decimal {
    Decimal::try_from(value / 100.0).unwrap_or(Decimal::ZERO)
}

/// Stateful trade gate. `validate` is a read-only advisory check and may be
/// called any number of times without side effects; the engine records an
/// executed trade separately through `note_trade`, which advances the daily
/// counters and the per-asset spacing clock.
#[derive(Debug, Clone)]
pub struct CapitalRiskValidator {
    config: RiskConfig,
    counter_day: Option<NaiveDate>,
    trades_today: u32,
    volume_today_eur: Decimal,
    last_trade_at: HashMap<Asset, DateTime<Utc>>,
}

impl CapitalRiskValidator {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            counter_day: None,
            trades_today: 0,
            volume_today_eur: Decimal::ZERO,
            last_trade_at: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Daily counters as of `now`: zero when the counter day has rolled over.
    fn effective_daily(&self, now: DateTime<Utc>) -> (u32, Decimal) {
        match self.counter_day {
            Some(day) if day == now.date_naive() => (self.trades_today, self.volume_today_eur),
            _ => (0, Decimal::ZERO),
        }
    }

    /// Size a proposed trade against the full rule chain. Rules are applied
    /// in a fixed order and the first disqualifying one wins; sizing rules
    /// reduce the amount and fold their explanation into the reason string.
    pub fn validate(
        &self,
        action: Action,
        asset: Asset,
        portfolio: &PortfolioState,
        requested_eur: Decimal,
        now: DateTime<Utc>,
    ) -> SizingOutcome {
        // 1. Portfolio sanity.
        if !portfolio.is_valid() {
            return SizingOutcome::rejected(
                "invalid portfolio: missing EUR balance or non-positive total value",
            );
        }

        // 2. Only BUY and SELL are executable.
        let Some(_side) = action.side() else {
            return SizingOutcome::rejected("invalid action: HOLD is not executable");
        };

        // 3. Requested size sanity.
        if requested_eur < Decimal::ZERO {
            return SizingOutcome::rejected("invalid size: negative amount requested");
        }

        let total = portfolio.total_value();

        // 4. Daily limits.
        let (trades_today, volume_today) = self.effective_daily(now);
        if trades_today >= self.config.max_trades_per_day {
            return SizingOutcome::rejected(format!(
                "daily limit: {} trades already executed today (max {})",
                trades_today, self.config.max_trades_per_day
            ));
        }
        let volume_cap = total * pct(self.config.max_daily_volume_pct);
        if volume_today >= volume_cap {
            return SizingOutcome::rejected(format!(
                "daily limit: volume EUR {:.2} at or above the EUR {:.2} cap",
                volume_today, volume_cap
            ));
        }

        // 5. Per-asset trade spacing.
        if let Some(last) = self.last_trade_at.get(&asset) {
            let elapsed = (now - *last).num_seconds();
            if elapsed < self.config.min_trade_spacing_secs {
                return SizingOutcome::rejected(format!(
                    "spacing limit: last {} trade {}s ago, minimum {}s",
                    asset, elapsed, self.config.min_trade_spacing_secs
                ));
            }
        }

        // 6. Rebalance lockout: while the portfolio is out of bounds, only
        // sells that restore it go through. Checked before any sizing so the
        // rejection names the structural problem, not a symptom of it.
        if action == Action::Buy {
            if let RebalanceSignal::ForceSell { reason, .. } =
                check_rebalance_need(portfolio, &self.config.rebalance)
            {
                return SizingOutcome::rejected(format!("rebalancing required: {}", reason));
            }
        }

        let mut approved = requested_eur;
        let mut notes: Vec<String> = Vec::new();

        match action {
            Action::Buy => {
                // 7. EUR reserve floor with fee/slippage headroom.
                let reserve_floor = total * pct(self.config.min_eur_reserve_pct);
                let spendable = portfolio.eur_amount() - reserve_floor;
                let buffer = Decimal::ONE + pct(self.config.cost_buffer_pct);
                let max_affordable = if spendable > Decimal::ZERO {
                    spendable / buffer
                } else {
                    Decimal::ZERO
                };
                if max_affordable < self.config.min_trade_eur {
                    return SizingOutcome::rejected(format!(
                        "insufficient EUR: {:.2} spendable above the {:.1}% reserve floor",
                        max_affordable, self.config.min_eur_reserve_pct
                    ));
                }
                if approved > max_affordable {
                    approved = max_affordable;
                    notes.push(format!(
                        "reduced to EUR {:.2} to keep the {:.1}% reserve",
                        approved, self.config.min_eur_reserve_pct
                    ));
                }
            }
            Action::Sell => {
                // 8. Cap at holdings and sweep dust remainders.
                let holdings_value = portfolio.asset_value_eur(asset);
                if holdings_value <= Decimal::ZERO {
                    return SizingOutcome::rejected(format!(
                        "insufficient holdings: no {} position to sell",
                        asset
                    ));
                }
                if approved > holdings_value {
                    approved = holdings_value;
                    notes.push(format!("reduced to full {} position", asset));
                }
                let remainder = holdings_value - approved;
                if remainder > Decimal::ZERO && remainder < self.config.dust_threshold_eur {
                    approved = holdings_value;
                    notes.push(format!(
                        "extended to full position: EUR {:.2} remainder below the dust threshold",
                        remainder
                    ));
                }
            }
            Action::Hold => unreachable!("filtered by rule 2"),
        }

        // 9. Single-trade ceiling.
        let trade_cap = total * pct(self.config.max_trade_pct);
        if approved > trade_cap {
            approved = trade_cap;
            notes.push(format!(
                "capped at {:.1}% of portfolio value",
                self.config.max_trade_pct
            ));
        }

        if approved < self.config.min_trade_eur {
            return SizingOutcome::rejected(format!(
                "too small: EUR {:.2} below the EUR {} minimum",
                approved, self.config.min_trade_eur
            ));
        }

        approved = approved.round_dp(2);
        let reason = if notes.is_empty() {
            "approved at requested size".to_string()
        } else {
            format!("approved ({})", notes.join("; "))
        };
        debug!("{} {} sized to EUR {}: {}", action, asset, approved, reason);
        SizingOutcome { approved, reason }
    }

    /// Record an executed trade. Rolls the daily counters when the day has
    /// changed since the last recorded trade.
    pub fn note_trade(&mut self, asset: Asset, size_eur: Decimal, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.counter_day != Some(today) {
            self.counter_day = Some(today);
            self.trades_today = 0;
            self.volume_today_eur = Decimal::ZERO;
        }
        self.trades_today += 1;
        self.volume_today_eur += size_eur;
        self.last_trade_at.insert(asset, now);
    }
}
