use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{Asset, PortfolioState};

/// Bounds outside of which the portfolio is considered in need of rebalancing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RebalanceConfig {
    /// EUR floor as a percentage of total value.
    pub min_eur_pct: f64,
    /// Single-asset concentration ceiling as a percentage of total value.
    pub max_asset_pct: f64,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            min_eur_pct: 10.0,
            max_asset_pct: 45.0,
        }
    }
}

/// Outcome of the rebalance-need check. `ForceSell` blocks new BUY orders at
/// the risk validator until the portfolio is back inside bounds; SELLs remain
/// allowed since they restore the EUR reserve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RebalanceSignal {
    Balanced,
    ForceSell { asset: Asset, reason: String },
}

impl RebalanceSignal {
    pub fn needs_rebalance(&self) -> bool {
        matches!(self, RebalanceSignal::ForceSell { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            RebalanceSignal::Balanced => None,
            RebalanceSignal::ForceSell { reason, .. } => Some(reason),
        }
    }
}

fn most_concentrated(portfolio: &PortfolioState) -> (Asset, f64) {
    Asset::all()
        .into_iter()
        .map(|a| (a, portfolio.concentration_pct(a)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap_or((Asset::BTC, 0.0))
}

/// Check whether the portfolio is outside its rebalancing bounds.
pub fn check_rebalance_need(portfolio: &PortfolioState, config: &RebalanceConfig) -> RebalanceSignal {
    if !portfolio.is_valid() {
        return RebalanceSignal::Balanced;
    }

    let eur_pct = portfolio.eur_reserve_pct();
    if eur_pct < config.min_eur_pct {
        let (asset, pct) = most_concentrated(portfolio);
        return RebalanceSignal::ForceSell {
            asset,
            reason: format!(
                "EUR reserve {:.1}% below {:.1}% floor (largest holding {} at {:.1}%)",
                eur_pct, config.min_eur_pct, asset, pct
            ),
        };
    }

    for asset in Asset::all() {
        let pct = portfolio.concentration_pct(asset);
        if pct > config.max_asset_pct {
            return RebalanceSignal::ForceSell {
                asset,
                reason: format!(
                    "{} concentration {:.1}% above {:.1}% ceiling",
                    asset, pct, config.max_asset_pct
                ),
            };
        }
    }

    RebalanceSignal::Balanced
}

/// A ranked buy candidate for capital allocation.
#[derive(Debug, Clone)]
pub struct Opportunity {
    pub asset: Asset,
    pub score: f64,
}

/// Split available capital across ranked opportunities, score-weighted, with
/// every allocation at or above the minimum trade size. Candidates are dropped
/// from the bottom until all surviving shares clear the minimum; with small
/// capital the single highest-ranked opportunity takes the full amount.
pub fn allocate_capital(
    available: Decimal,
    opportunities: &[Opportunity],
    min_trade: Decimal,
) -> Vec<(Asset, Decimal)> {
    if available < min_trade {
        return Vec::new();
    }

    let mut ranked: Vec<&Opportunity> = opportunities.iter().filter(|o| o.score > 0.0).collect();
    if ranked.is_empty() {
        return Vec::new();
    }
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.asset.cmp(&b.asset))
    });

    for n in (2..=ranked.len()).rev() {
        let top = &ranked[..n];
        let total_score: f64 = top.iter().map(|o| o.score).sum();
        let shares: Vec<(Asset, Decimal)> = top
            .iter()
            .map(|o| {
                let weight = Decimal::try_from(o.score / total_score).unwrap_or(Decimal::ZERO);
                (o.asset, (available * weight).round_dp(2))
            })
            .collect();
        if shares.iter().all(|(_, amount)| *amount >= min_trade) {
            return shares;
        }
    }

    // No split keeps every share above the minimum; the top-ranked
    // opportunity takes the full amount, which the entry guard already
    // cleared against `min_trade`.
    vec![(ranked[0].asset, available)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BalanceEntry, EUR, PORTFOLIO_VALUE_KEY};
    use rust_decimal_macros::dec;

    fn portfolio(eur: Decimal, btc_value: Decimal) -> PortfolioState {
        let mut state = PortfolioState::new();
        state.set(EUR, BalanceEntry::amount(eur));
        state.set("BTC", BalanceEntry::with_price(btc_value / dec!(30000), dec!(30000)));
        state.set(PORTFOLIO_VALUE_KEY, BalanceEntry::amount(eur + btc_value));
        state
    }

    #[test]
    fn test_low_eur_reserve_forces_sell() {
        // EUR at 5% of total value.
        let state = portfolio(dec!(100), dec!(1900));
        let signal = check_rebalance_need(&state, &RebalanceConfig::default());
        assert!(signal.needs_rebalance());
        match signal {
            RebalanceSignal::ForceSell { asset, reason } => {
                assert_eq!(asset, Asset::BTC);
                assert!(reason.contains("EUR reserve"));
            }
            _ => panic!("expected ForceSell"),
        }
    }

    #[test]
    fn test_concentration_forces_sell() {
        // EUR fine at 50%, but BTC is the other 50% with a 45% ceiling.
        let state = portfolio(dec!(1000), dec!(1000));
        let signal = check_rebalance_need(
            &state,
            &RebalanceConfig {
                min_eur_pct: 10.0,
                max_asset_pct: 45.0,
            },
        );
        assert!(signal.needs_rebalance());
    }

    #[test]
    fn test_balanced_portfolio() {
        let state = portfolio(dec!(1200), dec!(800));
        let signal = check_rebalance_need(&state, &RebalanceConfig::default());
        assert_eq!(signal, RebalanceSignal::Balanced);
    }

    #[test]
    fn test_small_capital_goes_to_top_opportunity() {
        // Production regression: €37.79 available with a €30 minimum must
        // still produce one allocation of at least €30.
        let opportunities = vec![
            Opportunity {
                asset: Asset::ETH,
                score: 0.4,
            },
            Opportunity {
                asset: Asset::BTC,
                score: 0.9,
            },
        ];
        let allocations = allocate_capital(dec!(37.79), &opportunities, dec!(30));
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].0, Asset::BTC);
        assert!(allocations[0].1 >= dec!(30));
    }

    #[test]
    fn test_insufficient_capital_allocates_nothing() {
        let opportunities = vec![Opportunity {
            asset: Asset::BTC,
            score: 0.9,
        }];
        assert!(allocate_capital(dec!(20), &opportunities, dec!(30)).is_empty());
    }

    #[test]
    fn test_large_capital_splits_by_score() {
        let opportunities = vec![
            Opportunity {
                asset: Asset::BTC,
                score: 0.6,
            },
            Opportunity {
                asset: Asset::ETH,
                score: 0.4,
            },
        ];
        let allocations = allocate_capital(dec!(1000), &opportunities, dec!(30));
        assert_eq!(allocations.len(), 2);
        assert_eq!(allocations[0].0, Asset::BTC);
        assert!(allocations[0].1 > allocations[1].1);
        let total: Decimal = allocations.iter().map(|(_, a)| *a).sum();
        assert!((total - dec!(1000)).abs() < dec!(0.05));
    }
}
