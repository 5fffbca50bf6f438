use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::regime::Regime;
use crate::strategies::StrategyKind;

use super::Asset;

/// Per-bar trading action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::Hold => "HOLD",
        }
    }

    pub fn side(&self) -> Option<Side> {
        match self {
            Action::Buy => Some(Side::Buy),
            Action::Sell => Some(Side::Sell),
            Action::Hold => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

/// Coarse risk label carried on every decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskAssessment {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskAssessment::Low => write!(f, "low"),
            RiskAssessment::Medium => write!(f, "medium"),
            RiskAssessment::High => write!(f, "high"),
        }
    }
}

/// Output of the decision maker for a single bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    #[serde(rename = "decision")]
    pub action: Action,
    /// 0..=100
    pub confidence: f64,
    pub reasoning: Vec<String>,
    pub risk_assessment: RiskAssessment,
    pub simulated: bool,
    pub trading_style: String,
    pub regime: Regime,
    pub primary_strategy: StrategyKind,
    #[serde(default = "default_size_multiplier")]
    pub size_multiplier: f64,
}

fn default_size_multiplier() -> f64 {
    1.0
}

impl Decision {
    /// Safe fallback used when a bar cannot be processed: HOLD with zero
    /// confidence and the ranging regime.
    pub fn safe_hold(reason: String) -> Self {
        Self {
            action: Action::Hold,
            confidence: 0.0,
            reasoning: vec![reason],
            risk_assessment: RiskAssessment::High,
            simulated: true,
            trading_style: "fallback".to_string(),
            regime: Regime::Ranging,
            primary_strategy: StrategyKind::LlmStrategy,
            size_multiplier: 1.0,
        }
    }
}

/// Append-only decision log entry, recorded for every bar including HOLDs
/// and blocked trades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub asset: Asset,
    pub price: Decimal,
    pub action: Action,
    pub confidence: f64,
    pub regime: Regime,
    pub strategy: StrategyKind,
    /// Risk-adjustment reason when the validator reduced or blocked the trade.
    pub risk_reason: Option<String>,
}

/// Immutable record of an approved and applied trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub asset: Asset,
    pub action: Action,
    pub requested_eur: Decimal,
    pub approved_eur: Decimal,
    pub quantity: Decimal,
    pub execution_price: Decimal,
    pub fee_eur: Decimal,
    pub portfolio_value_after: Decimal,
    pub risk_reason: String,
    /// Realized P&L for SELLs, matched FIFO against entry lots. None for BUYs.
    pub realized_pnl: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_serialization_shape() {
        assert_eq!(serde_json::to_string(&Action::Buy).unwrap(), "\"BUY\"");
        assert_eq!(serde_json::to_string(&Action::Hold).unwrap(), "\"HOLD\"");
        assert_eq!(
            serde_json::to_string(&RiskAssessment::Medium).unwrap(),
            "\"medium\""
        );
    }

    #[test]
    fn test_decision_wire_shape() {
        let decision = Decision::safe_hold("boom".to_string());
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["decision"], "HOLD");
        assert_eq!(json["confidence"], 0.0);
        assert!(json["reasoning"].is_array());
        assert_eq!(json["risk_assessment"], "high");
        assert_eq!(json["simulated"], true);
        assert!(json["trading_style"].is_string());
    }

    #[test]
    fn test_side_of_action() {
        assert_eq!(Action::Buy.side(), Some(Side::Buy));
        assert_eq!(Action::Sell.side(), Some(Side::Sell));
        assert_eq!(Action::Hold.side(), None);
    }
}
