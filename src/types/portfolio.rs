use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Asset;

pub const EUR: &str = "EUR";
pub const PORTFOLIO_VALUE_KEY: &str = "portfolio_value_eur";

/// One entry of the nested portfolio mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BalanceEntry {
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_price_eur: Option<Decimal>,
}

impl BalanceEntry {
    pub fn amount(amount: Decimal) -> Self {
        Self {
            amount,
            last_price_eur: None,
        }
    }

    pub fn with_price(amount: Decimal, last_price_eur: Decimal) -> Self {
        Self {
            amount,
            last_price_eur: Some(last_price_eur),
        }
    }
}

/// Portfolio state in the wire shape consumed by the risk validator:
/// `EUR -> {amount}`, `<ASSET> -> {amount, last_price_eur}`,
/// `portfolio_value_eur -> {amount}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct PortfolioState {
    pub balances: BTreeMap<String, BalanceEntry>,
}

impl PortfolioState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, entry: BalanceEntry) {
        self.balances.insert(key.to_string(), entry);
    }

    pub fn eur_amount(&self) -> Decimal {
        self.balances
            .get(EUR)
            .map(|e| e.amount)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn asset_amount(&self, asset: Asset) -> Decimal {
        self.balances
            .get(asset.as_str())
            .map(|e| e.amount)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn asset_price(&self, asset: Asset) -> Option<Decimal> {
        self.balances
            .get(asset.as_str())
            .and_then(|e| e.last_price_eur)
    }

    pub fn asset_value_eur(&self, asset: Asset) -> Decimal {
        self.asset_amount(asset) * self.asset_price(asset).unwrap_or(Decimal::ZERO)
    }

    /// Total value from the dedicated entry, falling back to a recomputation
    /// from balances when the entry is absent.
    pub fn total_value(&self) -> Decimal {
        if let Some(entry) = self.balances.get(PORTFOLIO_VALUE_KEY) {
            return entry.amount;
        }
        let mut total = self.eur_amount();
        for asset in Asset::all() {
            total += self.asset_value_eur(asset);
        }
        total
    }

    /// Cash fraction of the total, as a percentage.
    pub fn eur_reserve_pct(&self) -> f64 {
        let total = self.total_value();
        if total <= Decimal::ZERO {
            return 0.0;
        }
        let ratio: f64 = (self.eur_amount() / total).try_into().unwrap_or(0.0);
        ratio * 100.0
    }

    /// Single-asset concentration as a percentage of total value.
    pub fn concentration_pct(&self, asset: Asset) -> f64 {
        let total = self.total_value();
        if total <= Decimal::ZERO {
            return 0.0;
        }
        let ratio: f64 = (self.asset_value_eur(asset) / total)
            .try_into()
            .unwrap_or(0.0);
        ratio * 100.0
    }

    /// A portfolio is usable when it has an EUR entry and a positive total value.
    pub fn is_valid(&self) -> bool {
        self.balances.contains_key(EUR) && self.total_value() > Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn sample_portfolio(eur: Decimal, btc: Decimal, btc_price: Decimal) -> PortfolioState {
        let mut state = PortfolioState::new();
        state.set(EUR, BalanceEntry::amount(eur));
        state.set("BTC", BalanceEntry::with_price(btc, btc_price));
        state.set(
            PORTFOLIO_VALUE_KEY,
            BalanceEntry::amount(eur + btc * btc_price),
        );
        state
    }

    #[test]
    fn test_wire_shape_roundtrip() {
        let state = sample_portfolio(dec!(1000), dec!(0.02), dec!(30000));
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["EUR"]["amount"], "1000");
        assert_eq!(json["BTC"]["amount"], "0.02");
        assert_eq!(json["BTC"]["last_price_eur"], "30000");
        // 1000 + 0.02 * 30000 keeps the two fractional digits of 0.02.
        assert_eq!(json["portfolio_value_eur"]["amount"], "1600.00");
        assert!(json["EUR"].get("last_price_eur").is_none());

        let back: PortfolioState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_reserve_and_concentration() {
        let state = sample_portfolio(dec!(200), dec!(0.06), dec!(30000));
        // 200 EUR of 2000 total = 10%
        assert!((state.eur_reserve_pct() - 10.0).abs() < 1e-9);
        assert!((state.concentration_pct(Asset::BTC) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_validity() {
        assert!(!PortfolioState::new().is_valid());
        let mut no_value = PortfolioState::new();
        no_value.set(EUR, BalanceEntry::amount(Decimal::ZERO));
        assert!(!no_value.is_valid());
        assert!(sample_portfolio(dec!(100), Decimal::ZERO, Decimal::ZERO).is_valid());
    }

    #[test]
    fn test_total_value_fallback_without_entry() {
        let mut state = PortfolioState::new();
        state.set(EUR, BalanceEntry::amount(dec!(500)));
        state.set("ETH", BalanceEntry::with_price(dec!(1), dec!(2000)));
        assert_eq!(state.total_value(), dec!(2500));
    }
}
